//! Named lifecycle events and the shared event bus.
//!
//! The core never talks to the UI directly. Every state change is announced
//! as a [`BattleEvent`] on an [`EventBus`] that the turn manager, movement
//! system and victory system share, so consumers see one ordered stream.

use std::cell::RefCell;
use std::rc::Rc;

use serde::Serialize;

use super::ai::AIActionType;
use super::turn::{GameOutcome, GamePhase};
use super::unit::{EffectType, Faction, Position, SkillId, UnitId};
use super::victory::{StageFailureReport, StageRewards};
use crate::console;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum BattleEvent {
    TurnOrderInitialized { order: Vec<UnitId>, active_player: Faction },
    TurnChanged { current_turn: u32, active_unit: UnitId, active_player: Faction, phase: GamePhase },
    NewRoundStarted { current_turn: u32, active_player: Faction },
    UnitSelected { unit: UnitId, can_act: bool, can_move: bool },
    UnitDeselected,
    PhaseChanged { from: GamePhase, to: GamePhase },
    GameEnded { result: GameOutcome },
    UnitUpdated { unit: UnitId },
    UnitDefeated { unit: UnitId, faction: Faction },
    CharacterMovementCompleted { unit: UnitId, position: Position, can_act: bool },
    CharacterActionCompleted { unit: UnitId, can_move: bool },
    TurnSwitchedToPlayer { unit: UnitId },
    TurnSwitchedToEnemy { unit: UnitId },
    AiThinkingStarted { unit: UnitId },
    AiThinkingCompleted { unit: UnitId },
    AiUnitTurnStarted { unit: UnitId },
    AiActionCompleted { unit: UnitId, action: AIActionType, advance_pending: bool },
    SkillUsed { caster: UnitId, skill: SkillId, cooldown: u32, usage_count: u32 },
    SkillStatesUpdated { units: Vec<UnitId> },
    SkillEffectRemoved { unit: UnitId, effect_id: String, effect_type: EffectType },
    ContinuousDamageApplied { unit: UnitId, effect_id: String, damage: u32, hp_after: u32 },
    ObjectiveCompleted { objective: String },
    AutoVictoryDetected { turn: u32 },
    BossDefeated { boss: UnitId, essence: u32 },
    DistributeRewards { rewards: StageRewards },
    StageFailed { report: StageFailureReport },
}

impl BattleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            BattleEvent::TurnOrderInitialized { .. } => "turn-order-initialized",
            BattleEvent::TurnChanged { .. } => "turn-changed",
            BattleEvent::NewRoundStarted { .. } => "new-round-started",
            BattleEvent::UnitSelected { .. } => "unit-selected",
            BattleEvent::UnitDeselected => "unit-deselected",
            BattleEvent::PhaseChanged { .. } => "phase-changed",
            BattleEvent::GameEnded { .. } => "game-ended",
            BattleEvent::UnitUpdated { .. } => "unit-updated",
            BattleEvent::UnitDefeated { .. } => "unit-defeated",
            BattleEvent::CharacterMovementCompleted { .. } => "character-movement-completed",
            BattleEvent::CharacterActionCompleted { .. } => "character-action-completed",
            BattleEvent::TurnSwitchedToPlayer { .. } => "turn-switched-to-player",
            BattleEvent::TurnSwitchedToEnemy { .. } => "turn-switched-to-enemy",
            BattleEvent::AiThinkingStarted { .. } => "ai-thinking-started",
            BattleEvent::AiThinkingCompleted { .. } => "ai-thinking-completed",
            BattleEvent::AiUnitTurnStarted { .. } => "ai-unit-turn-started",
            BattleEvent::AiActionCompleted { .. } => "ai-action-completed",
            BattleEvent::SkillUsed { .. } => "skill-used",
            BattleEvent::SkillStatesUpdated { .. } => "skill-states-updated",
            BattleEvent::SkillEffectRemoved { .. } => "skill-effect-removed",
            BattleEvent::ContinuousDamageApplied { .. } => "continuous-damage-applied",
            BattleEvent::ObjectiveCompleted { .. } => "objective-completed",
            BattleEvent::AutoVictoryDetected { .. } => "auto-victory-detected",
            BattleEvent::BossDefeated { .. } => "boss-defeated",
            BattleEvent::DistributeRewards { .. } => "distribute-rewards",
            BattleEvent::StageFailed { .. } => "stage-failed",
        }
    }

    /// One JSON object per event, the format mirrored to the console.
    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"event":"{}","error":"{}"}}"#, self.name(), e)
        })
    }
}

type Handler = Box<dyn FnMut(&BattleEvent)>;

#[derive(Default)]
struct BusInner {
    handlers: Vec<(&'static str, Handler)>,
    queue: Vec<BattleEvent>,
    dispatching: bool,
}

/// Cheap-to-clone handle; clones share one queue and one handler list.
///
/// Handlers run synchronously inside [`EventBus::emit`]. An event emitted
/// from inside a handler is queued but not dispatched to handlers again.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Rc<RefCell<BusInner>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to one event name, or to everything with `"*"`.
    pub fn on(&self, name: &'static str, handler: impl FnMut(&BattleEvent) + 'static) {
        self.inner.borrow_mut().handlers.push((name, Box::new(handler)));
    }

    pub fn emit(&self, event: BattleEvent) {
        console::log(&event.to_json_line());

        let mut handlers = {
            let mut inner = self.inner.borrow_mut();
            inner.queue.push(event.clone());
            if inner.dispatching {
                return;
            }
            inner.dispatching = true;
            std::mem::take(&mut inner.handlers)
        };

        let name = event.name();
        for (wanted, handler) in handlers.iter_mut() {
            if *wanted == "*" || *wanted == name {
                handler(&event);
            }
        }

        let mut inner = self.inner.borrow_mut();
        handlers.append(&mut inner.handlers);
        inner.handlers = handlers;
        inner.dispatching = false;
    }

    /// Take every queued event in emission order.
    pub fn drain(&self) -> Vec<BattleEvent> {
        std::mem::take(&mut self.inner.borrow_mut().queue)
    }

    /// Names of queued events, without consuming them.
    pub fn pending_names(&self) -> Vec<&'static str> {
        self.inner.borrow().queue.iter().map(BattleEvent::name).collect()
    }

    pub fn clear(&self) {
        self.inner.borrow_mut().queue.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_preserves_emission_order() {
        let bus = EventBus::new();
        bus.emit(BattleEvent::UnitDeselected);
        bus.emit(BattleEvent::UnitUpdated { unit: "hero".into() });
        assert_eq!(bus.pending_names(), vec!["unit-deselected", "unit-updated"]);
        let events = bus.drain();
        assert_eq!(events.len(), 2);
        assert!(bus.drain().is_empty());
    }

    #[test]
    fn clones_share_the_queue() {
        let bus = EventBus::new();
        let other = bus.clone();
        other.emit(BattleEvent::UnitDeselected);
        assert_eq!(bus.pending_names(), vec!["unit-deselected"]);
    }

    #[test]
    fn handlers_filter_by_name() {
        let bus = EventBus::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        bus.on("unit-updated", move |e| sink.borrow_mut().push(e.name()));
        let all = Rc::new(RefCell::new(0));
        let counter = all.clone();
        bus.on("*", move |_| *counter.borrow_mut() += 1);

        bus.emit(BattleEvent::UnitDeselected);
        bus.emit(BattleEvent::UnitUpdated { unit: "a".into() });

        assert_eq!(*seen.borrow(), vec!["unit-updated"]);
        assert_eq!(*all.borrow(), 2);
    }

    #[test]
    fn emit_from_handler_is_queued_not_redispatched() {
        let bus = EventBus::new();
        let inner_bus = bus.clone();
        let calls = Rc::new(RefCell::new(0));
        let counter = calls.clone();
        bus.on("*", move |e| {
            *counter.borrow_mut() += 1;
            if e.name() == "unit-deselected" {
                inner_bus.emit(BattleEvent::UnitUpdated { unit: "x".into() });
            }
        });

        bus.emit(BattleEvent::UnitDeselected);
        assert_eq!(*calls.borrow(), 1);
        assert_eq!(bus.pending_names(), vec!["unit-deselected", "unit-updated"]);

        // Handlers survive the nested emit.
        bus.emit(BattleEvent::UnitDeselected);
        assert_eq!(*calls.borrow(), 2);
    }

    #[test]
    fn json_line_uses_kebab_event_name() {
        let line = BattleEvent::AiThinkingStarted { unit: "orc".into() }.to_json_line();
        assert!(line.contains(r#""event":"ai-thinking-started""#), "{line}");
        assert!(line.contains(r#""unit":"orc""#));
    }
}
