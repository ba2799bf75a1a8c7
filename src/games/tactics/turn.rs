//! Turn order and phase state machine.
//!
//! `GameStateManager` owns the canonical unit list. Other systems refer to
//! units by id and call back in here to record moves, actions and skill use.
//! Every mutator validates first and only then mutates, so an `Err` leaves
//! the state untouched.

use serde::{Deserialize, Serialize};

use super::ai::AIActionType;
use super::error::{ErrorKind, GameError, GameResult};
use super::events::{BattleEvent, EventBus};
use super::skills::SkillDef;
use super::unit::{ActiveSkillEffect, EffectType, Faction, Position, SkillData, Unit, UnitId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    Select,
    Move,
    Action,
    Enemy,
    AiThinking,
    Victory,
    Defeat,
}

impl GamePhase {
    pub fn label(self) -> &'static str {
        match self {
            GamePhase::Select => "選択",
            GamePhase::Move => "移動",
            GamePhase::Action => "行動",
            GamePhase::Enemy => "敵ターン",
            GamePhase::AiThinking => "思考中",
            GamePhase::Victory => "勝利",
            GamePhase::Defeat => "敗北",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameOutcome {
    Victory,
    Defeat,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameState {
    /// Round counter, starts at 1.
    pub current_turn: u32,
    pub active_player: Faction,
    pub phase: GamePhase,
    pub selected_unit: Option<UnitId>,
    pub game_result: Option<GameOutcome>,
    pub turn_order: Vec<Unit>,
    /// Indexes a living unit, or equals `turn_order.len()` once nobody is left.
    pub active_unit_index: usize,
}

impl Default for GameState {
    fn default() -> Self {
        Self {
            current_turn: 1,
            active_player: Faction::Player,
            phase: GamePhase::Select,
            selected_unit: None,
            game_result: None,
            turn_order: Vec::new(),
            active_unit_index: 0,
        }
    }
}

/// Returned by [`GameStateManager::complete_ai_action`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdvanceTicket {
    /// The unit still has something left to do this turn.
    Continue,
    /// The unit is done; call `flush_pending_advance` once feedback has played.
    Pending,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SkillUsageOutcome {
    pub turn_ended: bool,
}

fn phase_for(faction: Faction) -> GamePhase {
    match faction {
        Faction::Player => GamePhase::Select,
        Faction::Enemy => GamePhase::Enemy,
    }
}

pub struct GameStateManager {
    state: GameState,
    events: EventBus,
    pending_advance: bool,
}

impl GameStateManager {
    pub fn new(events: EventBus) -> Self {
        Self { state: GameState::default(), events, pending_advance: false }
    }

    // ── Queries ────────────────────────────────────────────────

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn units(&self) -> &[Unit] {
        &self.state.turn_order
    }

    pub fn unit(&self, id: &str) -> Option<&Unit> {
        self.state.turn_order.iter().find(|u| u.id == id)
    }

    pub(crate) fn unit_mut(&mut self, id: &str) -> Option<&mut Unit> {
        self.state.turn_order.iter_mut().find(|u| u.id == id)
    }

    pub fn active_unit(&self) -> Option<&Unit> {
        self.state.turn_order.get(self.state.active_unit_index)
    }

    pub fn is_game_over(&self) -> bool {
        self.state.game_result.is_some()
    }

    pub fn has_pending_advance(&self) -> bool {
        self.pending_advance
    }

    fn turn_marker(&self) -> (u32, Faction, usize) {
        (self.state.current_turn, self.state.active_player, self.state.active_unit_index)
    }

    pub fn living_units(&self, faction: Faction) -> impl Iterator<Item = &Unit> {
        self.state
            .turn_order
            .iter()
            .filter(move |u| u.faction == faction && u.is_alive())
    }

    /// Pure predicate; never mutates and never fails.
    pub fn can_character_move(&self, id: &str) -> bool {
        let Some(unit) = self.unit(id) else {
            return false;
        };
        !self.is_game_over()
            && unit.is_alive()
            && unit.stats.movement > 0
            && !unit.has_moved
            && unit.faction == self.state.active_player
    }

    pub fn get_characters_can_move(&self) -> Vec<&Unit> {
        self.state
            .turn_order
            .iter()
            .filter(|u| self.can_character_move(&u.id))
            .collect()
    }

    // ── Setup ──────────────────────────────────────────────────

    pub fn initialize_turn_order(&mut self, mut units: Vec<Unit>) -> GameResult<()> {
        if units.is_empty() {
            return Err(GameError::new(
                ErrorKind::InvalidStageData,
                "turn order needs at least one unit",
            ));
        }
        if let Some(bad) = units.iter().find(|u| u.stats.speed <= 0) {
            return Err(GameError::new(
                ErrorKind::CharacterLoadFailed,
                format!("unit '{}' has no valid speed stat", bad.id),
            ));
        }
        let mut ids: Vec<&str> = units.iter().map(|u| u.id.as_str()).collect();
        ids.sort_unstable();
        if let Some(pair) = ids.windows(2).find(|w| w[0] == w[1]) {
            return Err(GameError::new(
                ErrorKind::InvalidStageData,
                format!("unit id '{}' appears twice", pair[0]),
            ));
        }

        units.sort_by(|a, b| {
            b.stats
                .speed
                .cmp(&a.stats.speed)
                .then(a.faction.cmp(&b.faction))
                .then_with(|| a.id.cmp(&b.id))
        });
        for unit in &mut units {
            unit.reset_turn_flags();
            // Round 1 needs no start-of-round skill pass.
            if let Some(data) = unit.skill_data.as_mut() {
                data.processed_round = 1;
            }
        }

        let first = units[0].faction;
        self.state = GameState {
            current_turn: 1,
            active_player: first,
            phase: GamePhase::Select,
            selected_unit: None,
            game_result: None,
            turn_order: units,
            active_unit_index: 0,
        };
        self.pending_advance = false;
        self.events.emit(BattleEvent::TurnOrderInitialized {
            order: self.state.turn_order.iter().map(|u| u.id.clone()).collect(),
            active_player: first,
        });
        Ok(())
    }

    // ── Turn progression ───────────────────────────────────────

    /// Force-complete the active unit and hand the turn to the next living one.
    pub fn next_turn(&mut self) -> GameResult<()> {
        if self.state.turn_order.is_empty() {
            return Err(GameError::invalid_turn_state("turn order is empty"));
        }
        if self.is_game_over() {
            return Err(GameError::invalid_turn_state("the game has already ended"));
        }

        self.pending_advance = false;
        let index = self.state.active_unit_index;
        if let Some(unit) = self.state.turn_order.get_mut(index) {
            unit.has_acted = true;
        }

        match self.next_living_index(index + 1) {
            Some(next) => {
                self.activate(next);
                self.emit_turn_changed();
            }
            None => self.start_new_round(),
        }
        Ok(())
    }

    fn next_living_index(&self, from: usize) -> Option<usize> {
        (from..self.state.turn_order.len()).find(|&i| self.state.turn_order[i].is_alive())
    }

    fn activate(&mut self, index: usize) {
        let Some(faction) = self.state.turn_order.get(index).map(|u| u.faction) else {
            return;
        };
        self.state.active_unit_index = index;
        self.state.active_player = faction;
        if faction == Faction::Enemy {
            self.state.selected_unit = None;
        }
        self.set_phase(phase_for(faction));
    }

    fn emit_turn_changed(&self) {
        let Some(unit) = self.active_unit() else {
            return;
        };
        self.events.emit(BattleEvent::TurnChanged {
            current_turn: self.state.current_turn,
            active_unit: unit.id.clone(),
            active_player: self.state.active_player,
            phase: self.state.phase,
        });
    }

    fn start_new_round(&mut self) {
        self.state.current_turn += 1;
        for unit in &mut self.state.turn_order {
            unit.reset_turn_flags();
        }
        self.update_skill_states();

        match self.next_living_index(0) {
            Some(first) => self.activate(first),
            None => self.state.active_unit_index = self.state.turn_order.len(),
        }
        self.events.emit(BattleEvent::NewRoundStarted {
            current_turn: self.state.current_turn,
            active_player: self.state.active_player,
        });
    }

    /// Runs after every move or action completion.
    fn check_turn_advancement(&mut self) -> GameResult<()> {
        if self.is_game_over() {
            return Ok(());
        }
        if self.active_unit().is_some_and(Unit::turn_complete) {
            self.next_turn()?;
            return self.skip_finished_units();
        }

        let side = self.state.active_player;
        if self.living_units(side).any(|u| !u.has_acted) {
            return Ok(());
        }

        let other = side.opponent();
        let pending = self
            .state
            .turn_order
            .iter()
            .position(|u| u.faction == other && u.is_alive() && !u.has_acted);
        match pending {
            Some(index) => {
                self.activate(index);
                let unit = self.state.turn_order[index].id.clone();
                self.events.emit(match other {
                    Faction::Player => BattleEvent::TurnSwitchedToPlayer { unit },
                    Faction::Enemy => BattleEvent::TurnSwitchedToEnemy { unit },
                });
            }
            None => self.start_new_round(),
        }
        Ok(())
    }

    /// Units that already acted out of order do not get a second slot.
    fn skip_finished_units(&mut self) -> GameResult<()> {
        for _ in 0..=self.state.turn_order.len() {
            match self.active_unit() {
                Some(unit) if unit.is_alive() && unit.has_acted => self.next_turn()?,
                _ => break,
            }
        }
        Ok(())
    }

    // ── Player commands ────────────────────────────────────────

    pub fn select_unit(&mut self, id: Option<&str>) -> GameResult<()> {
        let Some(id) = id else {
            self.state.selected_unit = None;
            self.events.emit(BattleEvent::UnitDeselected);
            return Ok(());
        };
        let unit = self.unit(id).ok_or_else(|| GameError::unit_not_found(id))?;
        if self.state.active_player == Faction::Player {
            if unit.faction == Faction::Enemy {
                return Err(GameError::invalid_action(format!(
                    "cannot select enemy unit '{id}' during the player turn"
                )));
            }
            if unit.has_acted {
                return Err(GameError::invalid_action(format!(
                    "unit '{id}' has already acted this turn"
                )));
            }
        }

        let event = BattleEvent::UnitSelected {
            unit: unit.id.clone(),
            can_act: !unit.has_acted,
            can_move: !unit.has_moved,
        };
        self.state.selected_unit = Some(id.to_string());
        self.set_phase(GamePhase::Select);
        self.events.emit(event);
        Ok(())
    }

    fn ensure_running(&self) -> GameResult<()> {
        if self.is_game_over() {
            Err(GameError::invalid_turn_state("the game has already ended"))
        } else {
            Ok(())
        }
    }

    pub fn mark_character_moved(&mut self, id: &str) -> GameResult<()> {
        self.ensure_running()?;
        let unit = self.unit_mut(id).ok_or_else(|| GameError::unit_not_found(id))?;
        unit.has_moved = true;
        let event = BattleEvent::CharacterMovementCompleted {
            unit: unit.id.clone(),
            position: unit.position,
            can_act: !unit.has_acted,
        };
        self.events.emit(event);
        self.check_turn_advancement()
    }

    /// Attack or wait: the unit's action for this turn is spent.
    pub fn complete_character_action(&mut self, id: &str) -> GameResult<()> {
        self.ensure_running()?;
        self.mark_character_acted(id)?;
        self.check_turn_advancement()
    }

    fn mark_character_acted(&mut self, id: &str) -> GameResult<()> {
        let unit = self.unit_mut(id).ok_or_else(|| GameError::unit_not_found(id))?;
        unit.has_acted = true;
        let event = BattleEvent::CharacterActionCompleted {
            unit: unit.id.clone(),
            can_move: !unit.has_moved,
        };
        if self.state.selected_unit.as_deref() == Some(id) {
            self.state.selected_unit = None;
        }
        self.events.emit(event);
        Ok(())
    }

    /// Every living player unit forfeits whatever it has left.
    pub fn end_player_turn(&mut self) -> GameResult<()> {
        self.ensure_running()?;
        if self.state.active_player != Faction::Player {
            return Err(GameError::invalid_turn_state("it is not the player turn"));
        }
        for unit in &mut self.state.turn_order {
            if unit.faction == Faction::Player && unit.is_alive() {
                unit.has_acted = true;
            }
        }
        self.state.selected_unit = None;
        self.events.emit(BattleEvent::UnitDeselected);
        self.check_turn_advancement()
    }

    pub fn end_game(&mut self, outcome: GameOutcome) -> GameResult<()> {
        self.ensure_running()?;
        self.state.game_result = Some(outcome);
        self.state.selected_unit = None;
        self.pending_advance = false;
        self.set_phase(match outcome {
            GameOutcome::Victory => GamePhase::Victory,
            GameOutcome::Defeat => GamePhase::Defeat,
        });
        self.events.emit(BattleEvent::GameEnded { result: outcome });
        Ok(())
    }

    fn set_phase(&mut self, to: GamePhase) {
        let from = self.state.phase;
        if from != to {
            self.state.phase = to;
            self.events.emit(BattleEvent::PhaseChanged { from, to });
        }
    }

    // ── AI integration ─────────────────────────────────────────

    fn enemy_unit(&self, id: &str) -> GameResult<&Unit> {
        let unit = self.unit(id).ok_or_else(|| GameError::unit_not_found(id))?;
        if unit.faction != Faction::Enemy {
            return Err(GameError::invalid_action(format!("unit '{id}' is not AI controlled")));
        }
        Ok(unit)
    }

    /// Like [`Self::enemy_unit`], but the unit must also be the one whose turn it is.
    fn acting_enemy(&self, id: &str) -> GameResult<&Unit> {
        let unit = self.enemy_unit(id)?;
        if self.state.active_player != Faction::Enemy {
            return Err(GameError::invalid_turn_state("it is not the enemy turn"));
        }
        if self.active_unit().map(|u| u.id.as_str()) != Some(id) {
            return Err(GameError::invalid_turn_state(format!("it is not {}'s turn", unit.name)));
        }
        Ok(unit)
    }

    pub fn start_ai_thinking_phase(&mut self, id: &str) -> GameResult<()> {
        self.ensure_running()?;
        self.acting_enemy(id)?;
        self.set_phase(GamePhase::AiThinking);
        self.events.emit(BattleEvent::AiThinkingStarted { unit: id.to_string() });
        Ok(())
    }

    pub fn complete_ai_thinking_phase(&mut self, id: &str) -> GameResult<()> {
        self.acting_enemy(id)?;
        if self.state.phase != GamePhase::AiThinking {
            return Err(GameError::invalid_turn_state(format!(
                "AI is not thinking (phase is {:?})",
                self.state.phase
            )));
        }
        self.set_phase(GamePhase::Enemy);
        self.events.emit(BattleEvent::AiThinkingCompleted { unit: id.to_string() });
        Ok(())
    }

    /// Skill bookkeeping for the unit (at most once per round), then a clean slate.
    pub fn update_ai_unit_at_turn_start(&mut self, id: &str) -> GameResult<()> {
        self.ensure_running()?;
        self.enemy_unit(id)?;
        let index = self
            .state
            .turn_order
            .iter()
            .position(|u| u.id == id)
            .ok_or_else(|| GameError::unit_not_found(id))?;
        let round = self.state.current_turn;
        if self.process_unit_skill_state(index, round) {
            self.events.emit(BattleEvent::SkillStatesUpdated { units: vec![id.to_string()] });
        }
        if let Some(unit) = self.state.turn_order.get_mut(index) {
            unit.reset_turn_flags();
        }
        self.events.emit(BattleEvent::AiUnitTurnStarted { unit: id.to_string() });
        Ok(())
    }

    /// Record an AI action. Logical state changes immediately; the turn
    /// advance is deferred until [`Self::flush_pending_advance`].
    pub fn complete_ai_action(&mut self, id: &str, action: AIActionType) -> GameResult<AdvanceTicket> {
        self.ensure_running()?;
        if self.pending_advance {
            return Err(GameError::invalid_turn_state("a turn advance is already pending"));
        }
        let unit = self.acting_enemy(id)?;
        match action {
            AIActionType::Move if unit.has_moved => {
                return Err(GameError::invalid_action(format!("unit '{id}' has already moved")));
            }
            AIActionType::Attack | AIActionType::Skill if unit.has_acted => {
                return Err(GameError::invalid_action(format!("unit '{id}' has already acted")));
            }
            _ => {}
        }

        let unit = self.unit_mut(id).ok_or_else(|| GameError::unit_not_found(id))?;
        match action {
            AIActionType::Move => unit.has_moved = true,
            AIActionType::Attack | AIActionType::Skill | AIActionType::Wait => unit.has_acted = true,
        }
        let done = unit.turn_complete();
        self.pending_advance = done;
        self.events.emit(BattleEvent::AiActionCompleted {
            unit: id.to_string(),
            action,
            advance_pending: done,
        });
        Ok(if done { AdvanceTicket::Pending } else { AdvanceTicket::Continue })
    }

    /// The active enemy gives up whatever it has left. Always defers the advance.
    pub fn end_ai_unit_turn(&mut self, id: &str) -> GameResult<AdvanceTicket> {
        self.ensure_running()?;
        if self.pending_advance {
            return Err(GameError::invalid_turn_state("a turn advance is already pending"));
        }
        self.acting_enemy(id)?;
        self.pending_advance = true;
        Ok(AdvanceTicket::Pending)
    }

    /// Perform a deferred advance. Returns whether one was pending.
    pub fn flush_pending_advance(&mut self) -> GameResult<bool> {
        if !self.pending_advance {
            return Ok(false);
        }
        self.pending_advance = false;
        if self.is_game_over() {
            return Ok(false);
        }
        self.next_turn()?;
        self.skip_finished_units()?;
        Ok(true)
    }

    // ── Skills ─────────────────────────────────────────────────

    /// Whether `caster` may cast `skill` right now. Read-only.
    pub fn validate_skill_use(&self, caster: &str, skill: &SkillDef) -> GameResult<()> {
        self.ensure_running()?;
        let unit = self.unit(caster).ok_or_else(|| GameError::unit_not_found(caster))?;
        if !unit.is_alive() {
            return Err(GameError::invalid_action(format!("unit '{caster}' is defeated")));
        }
        if unit.has_acted {
            return Err(GameError::invalid_action(format!("unit '{caster}' has already acted")));
        }
        if unit.faction != self.state.active_player {
            return Err(GameError::invalid_action(format!("it is not {}'s turn", unit.name)));
        }
        let data = unit
            .skill_data
            .as_ref()
            .ok_or_else(|| GameError::invalid_action(format!("unit '{caster}' has no skills")))?;
        if !data.learned_skills.contains(skill.id) {
            return Err(GameError::invalid_action(format!(
                "unit '{caster}' has not learned '{}'",
                skill.id
            )));
        }
        let left = data.cooldown(skill.id);
        if left > 0 {
            return Err(GameError::invalid_action(format!(
                "'{}' is cooling down ({left} rounds left)",
                skill.id
            )));
        }
        if unit.current_mp < skill.mp_cost {
            return Err(GameError::invalid_action(format!("not enough MP for '{}'", skill.id)));
        }
        Ok(())
    }

    /// Cooldown, usage count and MP for a cast. Does not touch turn flags.
    pub fn register_skill_use(&mut self, caster: &str, skill: &SkillDef) -> GameResult<()> {
        self.validate_skill_use(caster, skill)?;
        let unit = self.unit_mut(caster).ok_or_else(|| GameError::unit_not_found(caster))?;
        unit.current_mp -= skill.mp_cost;
        let data = unit.skill_data.get_or_insert_with(SkillData::default);
        if skill.cooldown > 0 {
            data.skill_cooldowns.insert(skill.id.to_string(), skill.cooldown);
        }
        let count = data.skill_usage_counts.entry(skill.id.to_string()).or_insert(0);
        *count += 1;
        let usage_count = *count;
        self.events.emit(BattleEvent::SkillUsed {
            caster: caster.to_string(),
            skill: skill.id.to_string(),
            cooldown: skill.cooldown,
            usage_count,
        });
        Ok(())
    }

    /// Player-side skill cast: bookkeeping, then the caster's action is spent.
    pub fn handle_skill_usage(&mut self, caster: &str, skill: &SkillDef) -> GameResult<SkillUsageOutcome> {
        self.register_skill_use(caster, skill)?;
        let before = self.turn_marker();
        self.mark_character_acted(caster)?;
        self.check_turn_advancement()?;
        Ok(SkillUsageOutcome { turn_ended: self.turn_marker() != before })
    }

    /// Attach an effect to a unit. A unit that gains skill data mid-round is
    /// treated as already processed for that round.
    pub(crate) fn apply_effect(&mut self, target: &str, effect: ActiveSkillEffect) -> GameResult<()> {
        let round = self.state.current_turn;
        let unit = self.unit_mut(target).ok_or_else(|| GameError::unit_not_found(target))?;
        let fresh = unit.skill_data.is_none();
        unit.apply_effect(effect);
        if fresh {
            if let Some(data) = unit.skill_data.as_mut() {
                data.processed_round = round;
            }
        }
        self.events.emit(BattleEvent::UnitUpdated { unit: target.to_string() });
        Ok(())
    }

    /// Start-of-round pass over every living unit with skill data.
    pub fn update_skill_states(&mut self) {
        let round = self.state.current_turn;
        let mut updated = Vec::new();
        for index in 0..self.state.turn_order.len() {
            if self.process_unit_skill_state(index, round) {
                updated.push(self.state.turn_order[index].id.clone());
            }
        }
        if !updated.is_empty() {
            self.events.emit(BattleEvent::SkillStatesUpdated { units: updated });
        }
    }

    fn process_unit_skill_state(&mut self, index: usize, round: u32) -> bool {
        let Some(unit) = self.state.turn_order.get_mut(index) else {
            return false;
        };
        if !unit.is_alive() {
            return false;
        }
        let Some(data) = unit.skill_data.as_mut() else {
            return false;
        };
        if data.processed_round >= round {
            return false;
        }
        data.processed_round = round;
        decrease_skill_cooldowns(data);
        let effects = std::mem::take(&mut data.active_effects);

        let mut out = Vec::new();
        let kept = process_continuous_effects(unit, effects, &mut out);
        if let Some(data) = unit.skill_data.as_mut() {
            data.active_effects = kept;
        }
        for event in out {
            self.events.emit(event);
        }
        true
    }

    // ── Movement collaboration ─────────────────────────────────

    pub(crate) fn relocate_unit(&mut self, id: &str, to: Position) -> GameResult<()> {
        let unit = self.unit_mut(id).ok_or_else(|| GameError::unit_not_found(id))?;
        unit.position = to;
        Ok(())
    }

    // ── Snapshots ──────────────────────────────────────────────

    pub fn snapshot(&self) -> GameState {
        self.state.clone()
    }

    pub fn restore(&mut self, state: GameState) -> GameResult<()> {
        let invalid = |msg: &str| GameError::new(ErrorKind::InvalidStageData, msg);
        if state.current_turn == 0 {
            return Err(invalid("current turn must start at 1"));
        }
        if state.active_unit_index > state.turn_order.len() {
            return Err(invalid("active unit index is out of range"));
        }
        if state.game_result.is_none() {
            if let Some(unit) = state.turn_order.get(state.active_unit_index) {
                if !unit.is_alive() {
                    return Err(invalid("active unit is defeated"));
                }
                if unit.faction != state.active_player {
                    return Err(invalid("active player does not own the active unit"));
                }
            }
        }
        let mut ids: Vec<&str> = state.turn_order.iter().map(|u| u.id.as_str()).collect();
        ids.sort_unstable();
        if ids.windows(2).any(|w| w[0] == w[1]) {
            return Err(invalid("duplicate unit id"));
        }
        if let Some(sel) = &state.selected_unit {
            if !state.turn_order.iter().any(|u| &u.id == sel) {
                return Err(invalid("selected unit is not in the turn order"));
            }
        }
        self.state = state;
        self.pending_advance = false;
        Ok(())
    }
}

fn decrease_skill_cooldowns(data: &mut SkillData) {
    data.skill_cooldowns.retain(|_, left| {
        *left = left.saturating_sub(1);
        *left > 0
    });
}

/// Poison ticks first, then every effect loses a round; expired ones are reversed.
fn process_continuous_effects(
    unit: &mut Unit,
    effects: Vec<ActiveSkillEffect>,
    out: &mut Vec<BattleEvent>,
) -> Vec<ActiveSkillEffect> {
    let mut kept = Vec::with_capacity(effects.len());
    for mut effect in effects {
        if effect.effect_type == EffectType::Poison && unit.is_alive() {
            let damage = unit.take_damage((unit.stats.max_hp / 10).max(1));
            out.push(BattleEvent::ContinuousDamageApplied {
                unit: unit.id.clone(),
                effect_id: effect.effect_id.clone(),
                damage,
                hp_after: unit.current_hp,
            });
        }
        effect.remaining_duration = effect.remaining_duration.saturating_sub(1);
        if effect.remaining_duration == 0 {
            unit.reverse_effect(&effect);
            out.push(BattleEvent::SkillEffectRemoved {
                unit: unit.id.clone(),
                effect_id: effect.effect_id,
                effect_type: effect.effect_type,
            });
        } else {
            kept.push(effect);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::tactics::skills::{SkillKind, SkillTarget};
    use crate::games::tactics::unit::test_unit;

    fn manager() -> GameStateManager {
        GameStateManager::new(EventBus::new())
    }

    fn hero_and_orc() -> GameStateManager {
        let mut gsm = manager();
        gsm.initialize_turn_order(vec![
            test_unit("orc", Faction::Enemy, 10),
            test_unit("hero", Faction::Player, 12),
        ])
        .unwrap();
        gsm
    }

    const QUICK: SkillDef = SkillDef {
        id: "quick",
        name: "quick",
        mp_cost: 1,
        cooldown: 2,
        range: 1,
        target: SkillTarget::Enemy,
        kind: SkillKind::Damage { power: 100 },
    };

    fn order(gsm: &GameStateManager) -> Vec<&str> {
        gsm.units().iter().map(|u| u.id.as_str()).collect()
    }

    #[test]
    fn hero_orc_round_trip() {
        let mut gsm = hero_and_orc();
        assert_eq!(order(&gsm), vec!["hero", "orc"]);
        assert_eq!(gsm.state().active_player, Faction::Player);

        gsm.next_turn().unwrap();
        assert_eq!(gsm.state().active_player, Faction::Enemy);
        assert_eq!(gsm.state().phase, GamePhase::Enemy);
        assert_eq!(gsm.state().current_turn, 1);

        gsm.next_turn().unwrap();
        assert_eq!(gsm.state().current_turn, 2);
        assert_eq!(gsm.state().active_player, Faction::Player);
        assert!(gsm.units().iter().all(|u| !u.has_acted && !u.has_moved));
    }

    #[test]
    fn initialize_rejects_empty_and_bad_speed() {
        let mut gsm = manager();
        let err = gsm.initialize_turn_order(vec![]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidStageData);

        let err = gsm
            .initialize_turn_order(vec![test_unit("slug", Faction::Enemy, 0)])
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::CharacterLoadFailed);
        assert!(err.message.contains("slug"));
    }

    #[test]
    fn ties_break_on_faction_then_id() {
        let mut gsm = manager();
        gsm.initialize_turn_order(vec![
            test_unit("b_enemy", Faction::Enemy, 5),
            test_unit("z_player", Faction::Player, 5),
            test_unit("a_player", Faction::Player, 5),
            test_unit("fast", Faction::Enemy, 9),
        ])
        .unwrap();
        assert_eq!(order(&gsm), vec!["fast", "a_player", "z_player", "b_enemy"]);
        assert_eq!(gsm.state().active_player, Faction::Enemy);
    }

    #[test]
    fn initialize_emits_event() {
        let gsm = hero_and_orc();
        assert!(gsm.events.pending_names().contains(&"turn-order-initialized"));
    }

    #[test]
    fn next_turn_on_empty_order_fails() {
        let mut gsm = manager();
        assert_eq!(gsm.next_turn().unwrap_err().kind, ErrorKind::InvalidTurnState);
    }

    #[test]
    fn select_validates_before_mutating() {
        let mut gsm = hero_and_orc();
        gsm.select_unit(Some("hero")).unwrap();

        let err = gsm.select_unit(Some("orc")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidAction);
        assert_eq!(gsm.state().selected_unit.as_deref(), Some("hero"));

        assert_eq!(gsm.select_unit(Some("ghost")).unwrap_err().kind, ErrorKind::UnitNotFound);
        assert_eq!(gsm.select_unit(Some("")).unwrap_err().kind, ErrorKind::UnitNotFound);

        gsm.select_unit(None).unwrap();
        assert!(gsm.state().selected_unit.is_none());
    }

    #[test]
    fn acted_unit_cannot_be_selected() {
        let mut gsm = manager();
        gsm.initialize_turn_order(vec![
            test_unit("a", Faction::Player, 9),
            test_unit("b", Faction::Player, 8),
            test_unit("orc", Faction::Enemy, 1),
        ])
        .unwrap();
        gsm.complete_character_action("b").unwrap();
        assert_eq!(gsm.select_unit(Some("b")).unwrap_err().kind, ErrorKind::InvalidAction);
    }

    #[test]
    fn can_move_rules() {
        let mut gsm = hero_and_orc();
        assert!(gsm.can_character_move("hero"));
        assert!(!gsm.can_character_move("orc"));
        assert!(!gsm.can_character_move("ghost"));

        gsm.unit_mut("hero").unwrap().stats.movement = 0;
        assert!(!gsm.can_character_move("hero"));
        assert!(gsm.get_characters_can_move().is_empty());
    }

    #[test]
    fn move_then_act_passes_turn() {
        let mut gsm = hero_and_orc();
        gsm.mark_character_moved("hero").unwrap();
        assert_eq!(gsm.state().active_player, Faction::Player);
        gsm.complete_character_action("hero").unwrap();
        assert_eq!(gsm.state().active_player, Faction::Enemy);
        assert!(gsm.state().selected_unit.is_none());
    }

    #[test]
    fn finishing_every_player_unit_switches_to_enemy() {
        let mut gsm = manager();
        gsm.initialize_turn_order(vec![
            test_unit("hero", Faction::Player, 12),
            test_unit("orc", Faction::Enemy, 10),
            test_unit("mage", Faction::Player, 8),
        ])
        .unwrap();

        gsm.complete_character_action("mage").unwrap();
        assert_eq!(gsm.state().active_player, Faction::Player);

        gsm.complete_character_action("hero").unwrap();
        assert_eq!(gsm.state().active_player, Faction::Enemy);
        assert_eq!(gsm.active_unit().unwrap().id, "orc");
        assert!(gsm.events.pending_names().contains(&"turn-switched-to-enemy"));

        assert_eq!(gsm.complete_ai_action("orc", AIActionType::Wait).unwrap(), AdvanceTicket::Continue);
        assert_eq!(gsm.end_ai_unit_turn("orc").unwrap(), AdvanceTicket::Pending);
        assert!(gsm.flush_pending_advance().unwrap());
        // Mage already acted, so the round wraps.
        assert_eq!(gsm.state().current_turn, 2);
        assert_eq!(gsm.active_unit().unwrap().id, "hero");
    }

    #[test]
    fn end_player_turn_hands_over() {
        let mut gsm = hero_and_orc();
        gsm.end_player_turn().unwrap();
        assert_eq!(gsm.state().active_player, Faction::Enemy);
        assert_eq!(gsm.active_unit().unwrap().id, "orc");
        assert_eq!(gsm.end_player_turn().unwrap_err().kind, ErrorKind::InvalidTurnState);
    }

    #[test]
    fn ai_action_advance_is_deferred() {
        let mut gsm = hero_and_orc();
        gsm.next_turn().unwrap();

        gsm.start_ai_thinking_phase("orc").unwrap();
        assert_eq!(gsm.state().phase, GamePhase::AiThinking);
        gsm.complete_ai_thinking_phase("orc").unwrap();
        assert_eq!(gsm.state().phase, GamePhase::Enemy);

        assert_eq!(gsm.complete_ai_action("orc", AIActionType::Move).unwrap(), AdvanceTicket::Continue);
        assert_eq!(gsm.complete_ai_action("orc", AIActionType::Attack).unwrap(), AdvanceTicket::Pending);

        // Intermediate state is observable before the flush.
        assert_eq!(gsm.state().current_turn, 1);
        assert_eq!(gsm.active_unit().unwrap().id, "orc");
        assert!(gsm.has_pending_advance());
        assert_eq!(
            gsm.complete_ai_action("orc", AIActionType::Wait).unwrap_err().kind,
            ErrorKind::InvalidTurnState
        );

        assert!(gsm.flush_pending_advance().unwrap());
        assert_eq!(gsm.state().current_turn, 2);
        assert!(!gsm.flush_pending_advance().unwrap());
    }

    #[test]
    fn ai_methods_reject_player_units() {
        let mut gsm = hero_and_orc();
        assert_eq!(gsm.start_ai_thinking_phase("hero").unwrap_err().kind, ErrorKind::InvalidAction);
        assert_eq!(
            gsm.complete_ai_action("hero", AIActionType::Wait).unwrap_err().kind,
            ErrorKind::InvalidAction
        );
        assert_eq!(
            gsm.complete_ai_thinking_phase("orc").unwrap_err().kind,
            ErrorKind::InvalidTurnState
        );
    }

    #[test]
    fn ai_wait_only_spends_the_action() {
        let mut gsm = hero_and_orc();
        gsm.next_turn().unwrap();
        assert_eq!(gsm.complete_ai_action("orc", AIActionType::Wait).unwrap(), AdvanceTicket::Continue);
        let orc = gsm.unit("orc").unwrap();
        assert!(orc.has_acted);
        assert!(!orc.has_moved);
        assert!(!gsm.has_pending_advance());

        assert_eq!(gsm.end_ai_unit_turn("orc").unwrap(), AdvanceTicket::Pending);
        assert_eq!(gsm.end_ai_unit_turn("orc").unwrap_err().kind, ErrorKind::InvalidTurnState);
        assert!(gsm.flush_pending_advance().unwrap());
        assert_eq!(gsm.state().current_turn, 2);
    }

    #[test]
    fn ai_methods_require_the_active_enemy() {
        let mut gsm = manager();
        gsm.initialize_turn_order(vec![
            test_unit("hero", Faction::Player, 12),
            test_unit("orc", Faction::Enemy, 10),
            test_unit("goblin", Faction::Enemy, 8),
        ])
        .unwrap();

        // Still the player's turn.
        assert_eq!(gsm.start_ai_thinking_phase("orc").unwrap_err().kind, ErrorKind::InvalidTurnState);
        assert_eq!(
            gsm.complete_ai_action("orc", AIActionType::Attack).unwrap_err().kind,
            ErrorKind::InvalidTurnState
        );
        assert!(!gsm.unit("orc").unwrap().has_acted);
        assert!(!gsm.has_pending_advance());
        assert_eq!(gsm.state().phase, GamePhase::Select);

        // Enemy turn, but the goblin is not up yet.
        gsm.next_turn().unwrap();
        assert_eq!(gsm.active_unit().unwrap().id, "orc");
        assert_eq!(
            gsm.complete_ai_action("goblin", AIActionType::Move).unwrap_err().kind,
            ErrorKind::InvalidTurnState
        );
        assert_eq!(gsm.end_ai_unit_turn("goblin").unwrap_err().kind, ErrorKind::InvalidTurnState);
        assert!(!gsm.unit("goblin").unwrap().has_moved);
        assert!(gsm.start_ai_thinking_phase("orc").is_ok());
    }

    #[test]
    fn duplicate_ai_move_is_rejected() {
        let mut gsm = hero_and_orc();
        gsm.next_turn().unwrap();
        gsm.complete_ai_action("orc", AIActionType::Move).unwrap();
        assert_eq!(
            gsm.complete_ai_action("orc", AIActionType::Move).unwrap_err().kind,
            ErrorKind::InvalidAction
        );
    }

    #[test]
    fn skill_usage_sets_cooldown_and_ends_turn() {
        let mut gsm = manager();
        gsm.initialize_turn_order(vec![
            test_unit("hero", Faction::Player, 12).with_skills(["quick"]),
            test_unit("orc", Faction::Enemy, 10),
        ])
        .unwrap();

        let outcome = gsm.handle_skill_usage("hero", &QUICK).unwrap();
        assert!(outcome.turn_ended);
        assert_eq!(gsm.state().active_player, Faction::Enemy);

        let hero = gsm.unit("hero").unwrap();
        let data = hero.skill_data.as_ref().unwrap();
        assert_eq!(data.cooldown("quick"), 2);
        assert_eq!(data.skill_usage_counts.get("quick"), Some(&1));
        assert_eq!(hero.current_mp, 9);
    }

    #[test]
    fn off_turn_cast_does_not_report_a_turn_change() {
        let mut gsm = manager();
        gsm.initialize_turn_order(vec![
            test_unit("hero", Faction::Player, 12).with_skills(["quick"]),
            test_unit("orc", Faction::Enemy, 10),
            test_unit("mage", Faction::Player, 8).with_skills(["quick"]),
        ])
        .unwrap();

        gsm.mark_character_moved("mage").unwrap();
        let outcome = gsm.handle_skill_usage("mage", &QUICK).unwrap();
        assert!(!outcome.turn_ended);
        assert_eq!(gsm.active_unit().unwrap().id, "hero");
        assert_eq!(gsm.state().active_player, Faction::Player);

        // The hero is the last one left, so this cast hands over.
        let outcome = gsm.handle_skill_usage("hero", &QUICK).unwrap();
        assert!(outcome.turn_ended);
        assert_eq!(gsm.state().active_player, Faction::Enemy);
    }

    #[test]
    fn skill_usage_validates_readiness() {
        let mut gsm = manager();
        gsm.initialize_turn_order(vec![
            test_unit("hero", Faction::Player, 12),
            test_unit("orc", Faction::Enemy, 10),
        ])
        .unwrap();
        let err = gsm.handle_skill_usage("hero", &QUICK).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidAction);
        assert!(!gsm.unit("hero").unwrap().has_acted);
    }

    #[test]
    fn poison_ticks_minimum_one() {
        let mut gsm = manager();
        let mut weak = test_unit("weak", Faction::Player, 5);
        weak.stats.max_hp = 5;
        weak.current_hp = 5;
        gsm.initialize_turn_order(vec![weak, test_unit("orc", Faction::Enemy, 3)]).unwrap();
        gsm.apply_effect(
            "weak",
            ActiveSkillEffect {
                effect_id: "p1".into(),
                effect_type: EffectType::Poison,
                source_skill_id: "venom".into(),
                remaining_duration: 2,
                value: 0,
            },
        )
        .unwrap();

        gsm.next_turn().unwrap();
        gsm.next_turn().unwrap();
        assert_eq!(gsm.unit("weak").unwrap().current_hp, 4);
        assert!(gsm.events.pending_names().contains(&"continuous-damage-applied"));
    }

    #[test]
    fn expired_effect_is_reversed() {
        let mut gsm = hero_and_orc();
        gsm.apply_effect(
            "hero",
            ActiveSkillEffect {
                effect_id: "g".into(),
                effect_type: EffectType::DefenseUp,
                source_skill_id: "guard".into(),
                remaining_duration: 1,
                value: 4,
            },
        )
        .unwrap();
        assert_eq!(gsm.unit("hero").unwrap().stats.defense, 8);

        gsm.next_turn().unwrap();
        gsm.next_turn().unwrap();
        let hero = gsm.unit("hero").unwrap();
        assert_eq!(hero.stats.defense, 4);
        assert!(hero.skill_data.as_ref().unwrap().active_effects.is_empty());
        assert!(gsm.events.pending_names().contains(&"skill-effect-removed"));
    }

    #[test]
    fn ai_turn_start_does_not_double_decrement() {
        let mut gsm = manager();
        gsm.initialize_turn_order(vec![
            test_unit("hero", Faction::Player, 12),
            test_unit("orc", Faction::Enemy, 10).with_skills(["quick"]),
        ])
        .unwrap();
        gsm.next_turn().unwrap();
        gsm.register_skill_use("orc", &QUICK).unwrap();
        gsm.complete_ai_action("orc", AIActionType::Skill).unwrap();
        gsm.end_ai_unit_turn("orc").unwrap();
        gsm.flush_pending_advance().unwrap();
        assert_eq!(gsm.unit("orc").unwrap().skill_data.as_ref().unwrap().cooldown("quick"), 1);

        gsm.next_turn().unwrap();
        gsm.update_ai_unit_at_turn_start("orc").unwrap();
        assert_eq!(gsm.unit("orc").unwrap().skill_data.as_ref().unwrap().cooldown("quick"), 1);
    }

    #[test]
    fn dead_units_are_skipped() {
        let mut gsm = manager();
        gsm.initialize_turn_order(vec![
            test_unit("hero", Faction::Player, 12),
            test_unit("orc", Faction::Enemy, 10),
            test_unit("mage", Faction::Player, 8),
        ])
        .unwrap();
        gsm.unit_mut("orc").unwrap().current_hp = 0;
        gsm.next_turn().unwrap();
        assert_eq!(gsm.active_unit().unwrap().id, "mage");
        gsm.next_turn().unwrap();
        assert_eq!(gsm.state().current_turn, 2);
        assert_eq!(gsm.active_unit().unwrap().id, "hero");
    }

    #[test]
    fn end_game_is_terminal() {
        let mut gsm = hero_and_orc();
        gsm.end_game(GameOutcome::Victory).unwrap();
        assert_eq!(gsm.state().phase, GamePhase::Victory);
        assert_eq!(gsm.next_turn().unwrap_err().kind, ErrorKind::InvalidTurnState);
        assert_eq!(gsm.end_game(GameOutcome::Defeat).unwrap_err().kind, ErrorKind::InvalidTurnState);
        assert!(!gsm.can_character_move("hero"));
    }

    #[test]
    fn restore_validates_snapshot() {
        let mut gsm = hero_and_orc();
        let mut snap = gsm.snapshot();
        snap.active_unit_index = 9;
        assert_eq!(gsm.restore(snap).unwrap_err().kind, ErrorKind::InvalidStageData);

        let mut snap = gsm.snapshot();
        snap.active_player = Faction::Enemy;
        assert!(gsm.restore(snap).is_err());

        let mut snap = gsm.snapshot();
        snap.current_turn = 4;
        gsm.restore(snap).unwrap();
        assert_eq!(gsm.state().current_turn, 4);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use crate::games::tactics::skills::{SkillKind, SkillTarget};
    use crate::games::tactics::unit::test_unit;
    use proptest::prelude::*;

    fn roster() -> impl Strategy<Value = Vec<Unit>> {
        prop::collection::vec((1i32..20, any::<bool>()), 1..8).prop_map(|rolls| {
            rolls
                .into_iter()
                .enumerate()
                .map(|(i, (speed, enemy))| {
                    let faction = if enemy { Faction::Enemy } else { Faction::Player };
                    test_unit(&format!("u{:02}", (i * 7) % 13), faction, speed)
                })
                .fold(Vec::new(), |mut acc: Vec<Unit>, u| {
                    if !acc.iter().any(|o| o.id == u.id) {
                        acc.push(u);
                    }
                    acc
                })
        })
    }

    proptest! {
        #[test]
        fn order_is_sorted_and_reproducible(units in roster()) {
            let mut a = GameStateManager::new(EventBus::new());
            a.initialize_turn_order(units.clone()).unwrap();
            let mut reversed = units.clone();
            reversed.reverse();
            let mut b = GameStateManager::new(EventBus::new());
            b.initialize_turn_order(reversed).unwrap();

            prop_assert_eq!(a.units(), b.units());
            for w in a.units().windows(2) {
                let key = |u: &Unit| (-u.stats.speed, u.faction, u.id.clone());
                prop_assert!(key(&w[0]) < key(&w[1]));
            }
        }

        #[test]
        fn full_pass_completes_one_round(units in roster()) {
            let mut gsm = GameStateManager::new(EventBus::new());
            let n = units.len();
            gsm.initialize_turn_order(units).unwrap();
            for _ in 0..n {
                gsm.next_turn().unwrap();
            }
            prop_assert_eq!(gsm.state().current_turn, 2);
            prop_assert_eq!(gsm.state().active_unit_index, 0);
            prop_assert!(gsm.units().iter().all(|u| !u.has_acted && !u.has_moved));
        }

        #[test]
        fn can_move_is_pure(units in roster(), pick in 0usize..8) {
            let mut gsm = GameStateManager::new(EventBus::new());
            gsm.initialize_turn_order(units).unwrap();
            let id = gsm.units().get(pick).map(|u| u.id.clone()).unwrap_or_default();
            let before = gsm.snapshot();
            let first = gsm.can_character_move(&id);
            for _ in 0..3 {
                prop_assert_eq!(gsm.can_character_move(&id), first);
            }
            prop_assert_eq!(gsm.snapshot(), before);
        }

        #[test]
        fn cooldown_clears_after_exactly_n_rounds(n in 1u32..6) {
            let skill = SkillDef {
                id: "charge",
                name: "charge",
                mp_cost: 0,
                cooldown: n,
                range: 1,
                target: SkillTarget::Enemy,
                kind: SkillKind::Damage { power: 100 },
            };
            let mut gsm = GameStateManager::new(EventBus::new());
            gsm.initialize_turn_order(vec![
                test_unit("hero", Faction::Player, 9).with_skills(["charge"]),
            ]).unwrap();
            gsm.register_skill_use("hero", &skill).unwrap();

            for round in 1..=n {
                let ready = gsm.unit("hero").unwrap().skill_data.as_ref().unwrap().is_ready("charge");
                prop_assert!(!ready, "ready too early after {} round starts", round - 1);
                gsm.next_turn().unwrap();
            }
            prop_assert!(gsm.unit("hero").unwrap().skill_data.as_ref().unwrap().is_ready("charge"));
        }
    }
}
