//! Battle orchestration: wires the turn manager, movement, combat, AI and
//! victory systems together around one shared event bus.
//!
//! Player commands come in through the `Battle` methods and return whether
//! they were accepted. Enemy turns are stepped from `tick`, one AI step per
//! `ai_action_delay_ticks`, so every action stays on screen before the turn
//! moves on.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::ai::{is_ai_controlled, AIAction, AIActionType, AiController};
use super::combat::{self, CombatReport};
use super::error::{ErrorKind, GameError, GameResult};
use super::events::{BattleEvent, EventBus};
use super::map::BattleMap;
use super::movement::MovementSystem;
use super::save::BattleSnapshot;
use super::skills::{self, SkillDef, SkillTarget};
use super::stage::StageData;
use super::turn::{AdvanceTicket, GameOutcome, GameStateManager};
use super::unit::{Faction, Position, Unit, UnitId};
use super::victory::{StageFailureReport, StageRewards, VictoryConditionSystem};
use crate::console;

const MAX_LOG: usize = 30;

// ── Config ────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BattleConfig {
    /// Ticks between AI steps and before a pending advance is flushed. 0 = no pause.
    pub ai_action_delay_ticks: u32,
    /// Candidate evaluations allowed per AI decision.
    pub ai_evaluation_budget: u32,
    pub ticks_per_second: u32,
    /// Overrides the stage's own `check_on_turn_end` when set.
    pub check_on_turn_end: Option<bool>,
}

impl Default for BattleConfig {
    fn default() -> Self {
        Self {
            ai_action_delay_ticks: 5,
            ai_evaluation_budget: 256,
            ticks_per_second: 10,
            check_on_turn_end: None,
        }
    }
}

/// Where the enemy side is in its current unit's turn.
#[derive(Clone, Debug, PartialEq, Eq)]
enum AiStep {
    Idle,
    Thinking(UnitId),
    Flushing,
}

pub struct Battle {
    stage: StageData,
    config: BattleConfig,
    map: BattleMap,
    events: EventBus,
    gsm: GameStateManager,
    movement: MovementSystem,
    victory: VictoryConditionSystem,
    ai: AiController,
    ai_step: AiStep,
    ai_timer: u32,
    /// Units already reported as defeated.
    fallen: BTreeSet<UnitId>,
    log: Vec<String>,
    rewards: Option<StageRewards>,
    failure: Option<StageFailureReport>,
}

impl Battle {
    pub fn new(stage: StageData, config: BattleConfig) -> GameResult<Self> {
        let map = stage.build_map()?;
        let units = stage.build_units(&map)?;

        let events = EventBus::new();
        let mut gsm = GameStateManager::new(events.clone());
        let movement = MovementSystem::new(events.clone());
        let mut victory = VictoryConditionSystem::new(events.clone());

        let mut rules = stage.clone();
        if let Some(check) = config.check_on_turn_end {
            rules.check_on_turn_end = check;
        }
        let summary = victory.initialize(&rules)?;
        gsm.initialize_turn_order(units)?;

        let mut battle = Self {
            ai: AiController::new(config.ai_evaluation_budget),
            ai_timer: config.ai_action_delay_ticks,
            stage,
            config,
            map,
            events,
            gsm,
            movement,
            victory,
            ai_step: AiStep::Idle,
            fallen: BTreeSet::new(),
            log: Vec::new(),
            rewards: None,
            failure: None,
        };
        battle.add_log(&format!("【{}】開戦", battle.stage.name));
        battle.add_log(&format!("目標 {}件 / ボス {}体", summary.objectives, summary.bosses));
        battle.settle();
        Ok(battle)
    }

    // ── Accessors ──────────────────────────────────────────────

    pub fn stage(&self) -> &StageData {
        &self.stage
    }

    pub fn config(&self) -> &BattleConfig {
        &self.config
    }

    pub fn map(&self) -> &BattleMap {
        &self.map
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn gsm(&self) -> &GameStateManager {
        &self.gsm
    }

    pub fn movement(&self) -> &MovementSystem {
        &self.movement
    }

    pub fn victory(&self) -> &VictoryConditionSystem {
        &self.victory
    }

    pub fn log(&self) -> &[String] {
        &self.log
    }

    pub fn rewards(&self) -> Option<&StageRewards> {
        self.rewards.as_ref()
    }

    pub fn failure(&self) -> Option<&StageFailureReport> {
        self.failure.as_ref()
    }

    pub fn is_player_turn(&self) -> bool {
        !self.gsm.is_game_over() && self.gsm.state().active_player == Faction::Player
    }

    pub fn unit_at(&self, pos: Position) -> Option<&Unit> {
        self.gsm.units().iter().find(|u| u.is_alive() && u.position == pos)
    }

    pub fn selected_unit(&self) -> Option<&Unit> {
        let id = self.gsm.state().selected_unit.as_deref()?;
        self.gsm.unit(id)
    }

    /// Skills a unit knows, in the order the number keys address them.
    pub fn learned_skills(&self, id: &str) -> Vec<&'static SkillDef> {
        self.gsm
            .unit(id)
            .and_then(|u| u.skill_data.as_ref())
            .map(|data| data.learned_skills.iter().filter_map(|s| skills::find(s)).collect())
            .unwrap_or_default()
    }

    pub fn add_log(&mut self, text: &str) {
        self.log.push(text.to_string());
        if self.log.len() > MAX_LOG {
            self.log.remove(0);
        }
    }

    fn name_of(&self, id: &str) -> String {
        self.gsm.unit(id).map_or_else(|| id.to_string(), |u| u.name.clone())
    }

    // ── Player commands ────────────────────────────────────────

    /// Select the unit on `pos`, or move the selected unit there.
    pub fn select_at(&mut self, pos: Position) -> bool {
        let result = self.try_select_at(pos);
        self.finish_command(result)
    }

    fn try_select_at(&mut self, pos: Position) -> GameResult<()> {
        self.ensure_player_turn()?;
        if let Some(id) = self.unit_at(pos).map(|u| u.id.clone()) {
            return self.select(&id);
        }
        let Some(id) = self.movement.state().selected_character.clone() else {
            return Err(GameError::invalid_action("移動するユニットを選択してください"));
        };
        let to = self.movement.execute_movement(&mut self.gsm, &self.map, &id, pos)?;
        let name = self.name_of(&id);
        self.add_log(&format!("{name}が({}, {})へ移動", to.x, to.y));
        Ok(())
    }

    fn select(&mut self, id: &str) -> GameResult<()> {
        self.gsm.select_unit(Some(id))?;
        if self.gsm.can_character_move(id) {
            self.movement.select_character_for_movement(&self.gsm, &self.map, id)?;
        } else {
            self.movement.cancel_movement();
        }
        let name = self.name_of(id);
        self.add_log(&format!("{name}を選択"));
        Ok(())
    }

    /// Update the path preview for the cursor.
    pub fn preview_path(&mut self, pos: Position) -> &[Position] {
        self.movement.show_movement_path(&self.gsm, &self.map, pos)
    }

    pub fn attack(&mut self, target: Position) -> bool {
        let result = self.try_attack(target);
        self.finish_command(result)
    }

    fn try_attack(&mut self, target: Position) -> GameResult<()> {
        self.ensure_player_turn()?;
        let attacker = self.selected_id()?;
        let target = self.target_id(target)?;
        combat::check_attack(&self.gsm, &attacker, &target)?;
        let report = combat::apply_attack(&mut self.gsm, &attacker, &target)?;
        self.record(&report, None);
        self.movement.cancel_movement();
        self.gsm.complete_character_action(&attacker)
    }

    /// Cast the selected unit's `slot`-th skill at the unit on `target`.
    pub fn cast(&mut self, slot: usize, target: Position) -> bool {
        let result = self.try_cast(slot, target);
        self.finish_command(result)
    }

    fn try_cast(&mut self, slot: usize, target: Position) -> GameResult<()> {
        self.ensure_player_turn()?;
        let caster = self.selected_id()?;
        let skill = *self
            .learned_skills(&caster)
            .get(slot)
            .ok_or_else(|| GameError::invalid_action(format!("スキル{}は未習得", slot + 1)))?;
        let target = match skill.target {
            SkillTarget::SelfOnly => caster.clone(),
            SkillTarget::Enemy | SkillTarget::Ally => self.target_id(target)?,
        };
        combat::check_skill(&self.gsm, &caster, &target, skill)?;
        self.gsm.validate_skill_use(&caster, skill)?;

        let report = combat::apply_skill(&mut self.gsm, &caster, &target, skill)?;
        self.record(&report, Some(skill));
        self.movement.cancel_movement();
        self.gsm.handle_skill_usage(&caster, skill).map(|_| ())
    }

    pub fn wait(&mut self) -> bool {
        let result = self.try_wait();
        self.finish_command(result)
    }

    fn try_wait(&mut self) -> GameResult<()> {
        self.ensure_player_turn()?;
        let id = self.selected_id()?;
        let name = self.name_of(&id);
        self.movement.cancel_movement();
        self.gsm.complete_character_action(&id)?;
        self.add_log(&format!("{name}は待機"));
        Ok(())
    }

    pub fn end_turn(&mut self) -> bool {
        let result = self.ensure_player_turn().and_then(|_| {
            self.movement.cancel_movement();
            self.gsm.end_player_turn()
        });
        if result.is_ok() {
            self.add_log("ターン終了");
        }
        self.finish_command(result)
    }

    /// End the battle as won. Only needed when the stage does not detect
    /// victory by itself.
    pub fn claim_victory(&mut self) -> bool {
        let result = self.ensure_player_turn().and_then(|_| {
            if self.can_claim_victory() {
                Ok(())
            } else {
                Err(GameError::invalid_action("勝利条件を満たしていません"))
            }
        });
        if result.is_ok() {
            self.finish(GameOutcome::Victory, None);
        }
        self.finish_command(result)
    }

    pub fn can_claim_victory(&self) -> bool {
        !self.gsm.is_game_over()
            && !self.victory.auto_victory()
            && self.victory.check_victory_conditions()
    }

    /// Drop the movement preview and the selection.
    pub fn cancel(&mut self) -> bool {
        self.movement.handle_right_click();
        if self.gsm.state().selected_unit.is_none() {
            return false;
        }
        let result = self.gsm.select_unit(None);
        self.finish_command(result)
    }

    /// Reload the stage from scratch.
    pub fn restart(&mut self) -> bool {
        match Battle::new(self.stage.clone(), self.config.clone()) {
            Ok(fresh) => {
                *self = fresh;
                true
            }
            Err(e) => {
                self.fail(&e);
                false
            }
        }
    }

    fn ensure_player_turn(&self) -> GameResult<()> {
        if self.gsm.is_game_over() {
            return Err(GameError::invalid_turn_state("戦闘は終了しています"));
        }
        if self.gsm.state().active_player != Faction::Player {
            return Err(GameError::invalid_turn_state("敵のターンです"));
        }
        Ok(())
    }

    fn selected_id(&self) -> GameResult<UnitId> {
        self.gsm
            .state()
            .selected_unit
            .clone()
            .ok_or_else(|| GameError::invalid_action("ユニットを選択してください"))
    }

    fn target_id(&self, pos: Position) -> GameResult<UnitId> {
        self.unit_at(pos)
            .map(|u| u.id.clone())
            .ok_or_else(|| GameError::invalid_action("対象がいません"))
    }

    fn finish_command(&mut self, result: GameResult<()>) -> bool {
        let ok = match result {
            Ok(()) => true,
            Err(e) => {
                self.fail(&e);
                false
            }
        };
        self.settle();
        self.ai_timer = self.config.ai_action_delay_ticks;
        ok
    }

    fn fail(&mut self, e: &GameError) {
        console::warn(&format!("{}: {}", e.kind.as_str(), e.message));
        self.add_log(&format!("✗ {}", e.message));
    }

    /// Feed combat totals into the victory counters and the log.
    fn record(&mut self, report: &CombatReport, skill: Option<&SkillDef>) {
        let actor = self.name_of(&report.actor);
        let target = self.name_of(&report.target);
        if let Some(skill) = skill {
            self.add_log(&format!("{actor}の{}！", skill.name));
        }
        if report.damage > 0 {
            if let Some(faction) = report.actor_faction {
                self.victory.record_damage(faction, report.damage);
            }
            self.add_log(&format!("{target}に{}ダメージ", report.damage));
        }
        if report.healed > 0 {
            self.victory.record_healing(report.healed);
            self.add_log(&format!("{target}のHPが{}回復", report.healed));
        }
        if let Some(effect) = report.effect {
            self.add_log(&format!("{target}に{}", effect.name()));
        }
    }

    // ── Enemy turns ────────────────────────────────────────────

    fn active_enemy(&self) -> Option<UnitId> {
        self.gsm
            .active_unit()
            .filter(|u| is_ai_controlled(u) && u.is_alive())
            .map(|u| u.id.clone())
    }

    /// Whether the enemy side has something left to do right now.
    pub fn ai_has_work(&self) -> bool {
        if self.gsm.is_game_over() {
            return false;
        }
        self.ai_step != AiStep::Idle || self.active_enemy().is_some()
    }

    pub fn tick(&mut self, delta_ticks: u32) {
        if !self.ai_has_work() {
            return;
        }
        if self.ai_timer > delta_ticks {
            self.ai_timer -= delta_ticks;
            return;
        }
        self.ai_timer = self.config.ai_action_delay_ticks;
        self.step_ai();
    }

    /// Run every enemy step until control returns to the player.
    /// Returns the number of steps taken.
    pub fn run_enemy_phase(&mut self) -> usize {
        let limit = self.gsm.units().len() * 8 + 8;
        let mut steps = 0;
        while self.ai_has_work() && steps < limit {
            self.step_ai();
            steps += 1;
        }
        steps
    }

    fn step_ai(&mut self) {
        let step = std::mem::replace(&mut self.ai_step, AiStep::Idle);
        let result = match step {
            AiStep::Idle => self.begin_ai_unit(),
            AiStep::Thinking(id) => self.act_ai_unit(&id),
            AiStep::Flushing => self.gsm.flush_pending_advance().map(|_| ()),
        };
        if let Err(e) = result {
            self.fail(&e);
            self.recover_ai();
        }
        self.settle();
    }

    fn begin_ai_unit(&mut self) -> GameResult<()> {
        let Some(id) = self.active_enemy() else {
            return Ok(());
        };
        self.gsm.update_ai_unit_at_turn_start(&id)?;
        self.gsm.start_ai_thinking_phase(&id)?;
        self.ai_step = AiStep::Thinking(id);
        Ok(())
    }

    fn act_ai_unit(&mut self, id: &str) -> GameResult<()> {
        self.gsm.complete_ai_thinking_phase(id)?;
        let action = self.ai.decide(&self.gsm, &self.map, id);
        match self.execute_ai_action(&action)? {
            AdvanceTicket::Continue => {
                self.gsm.start_ai_thinking_phase(id)?;
                self.ai_step = AiStep::Thinking(id.to_string());
            }
            AdvanceTicket::Pending => self.ai_step = AiStep::Flushing,
        }
        Ok(())
    }

    fn execute_ai_action(&mut self, action: &AIAction) -> GameResult<AdvanceTicket> {
        let id = action.character.as_str();
        let name = self.name_of(id);
        match action.action_type {
            AIActionType::Move => {
                let dest = action
                    .destination
                    .ok_or_else(|| GameError::invalid_action("move without destination"))?;
                let ticket = self.movement.execute_ai_movement(&mut self.gsm, &self.map, id, dest)?;
                self.add_log(&format!("{name}が({}, {})へ移動", dest.x, dest.y));
                Ok(ticket)
            }
            AIActionType::Attack => {
                let target = action
                    .target
                    .as_deref()
                    .ok_or_else(|| GameError::invalid_action("attack without target"))?;
                combat::check_attack(&self.gsm, id, target)?;
                let report = combat::apply_attack(&mut self.gsm, id, target)?;
                self.add_log(&format!("{name}の攻撃！"));
                self.record(&report, None);
                self.gsm.complete_ai_action(id, AIActionType::Attack)
            }
            AIActionType::Skill => {
                let target = action
                    .target
                    .as_deref()
                    .ok_or_else(|| GameError::invalid_action("skill without target"))?;
                let skill = action
                    .skill_id
                    .as_deref()
                    .and_then(skills::find)
                    .ok_or_else(|| GameError::invalid_action("unknown skill"))?;
                combat::check_skill(&self.gsm, id, target, skill)?;
                self.gsm.register_skill_use(id, skill)?;
                let report = combat::apply_skill(&mut self.gsm, id, target, skill)?;
                self.record(&report, Some(skill));
                self.gsm.complete_ai_action(id, AIActionType::Skill)
            }
            AIActionType::Wait => {
                self.add_log(&format!("{name}は様子を見ている"));
                self.ai_wait(id)
            }
        }
    }

    /// Waiting spends only the action; the unit's turn then ends whether or not it moved.
    fn ai_wait(&mut self, id: &str) -> GameResult<AdvanceTicket> {
        match self.gsm.complete_ai_action(id, AIActionType::Wait)? {
            AdvanceTicket::Continue => self.gsm.end_ai_unit_turn(id),
            AdvanceTicket::Pending => Ok(AdvanceTicket::Pending),
        }
    }

    /// After a failed AI step, make sure the turn still moves on.
    fn recover_ai(&mut self) {
        if self.gsm.is_game_over() {
            return;
        }
        if self.gsm.has_pending_advance() {
            self.ai_step = AiStep::Flushing;
            return;
        }
        let Some(id) = self.active_enemy() else {
            return;
        };
        match self.ai_wait(&id) {
            Ok(AdvanceTicket::Pending) => self.ai_step = AiStep::Flushing,
            Ok(AdvanceTicket::Continue) => {}
            Err(e) => {
                self.fail(&e);
                if let Err(e) = self.gsm.next_turn() {
                    self.fail(&e);
                }
            }
        }
    }

    // ── Outcome and event routing ──────────────────────────────

    /// Settle the consequences of the last step: fallen units, queued
    /// events, then victory and defeat.
    fn settle(&mut self) {
        self.sweep_defeated();
        self.pump_events();
        self.check_outcome();
        self.pump_events();
    }

    fn sweep_defeated(&mut self) {
        let newly: Vec<Unit> = self
            .gsm
            .units()
            .iter()
            .filter(|u| !u.is_alive() && !self.fallen.contains(&u.id))
            .cloned()
            .collect();
        for unit in newly {
            self.fallen.insert(unit.id.clone());
            self.add_log(&format!("{}は倒れた", unit.name));
            if let Some(essence) = self.victory.on_unit_defeated(&unit) {
                self.add_log(&format!("{}撃破！ ローズエッセンス+{essence}", unit.name));
            }
        }
    }

    fn pump_events(&mut self) {
        // Reactions may emit more events; a few rounds always drain the bus.
        for _ in 0..4 {
            let events = self.events.drain();
            if events.is_empty() {
                return;
            }
            for event in &events {
                self.react(event);
            }
        }
    }

    fn react(&mut self, event: &BattleEvent) {
        match event {
            BattleEvent::NewRoundStarted { current_turn, .. } => {
                self.add_log(&format!("── ターン{current_turn} ──"));
                if self.victory.on_turn_end(&self.gsm) {
                    self.finish(GameOutcome::Victory, None);
                }
            }
            BattleEvent::TurnSwitchedToEnemy { .. } => self.add_log("敵の行動"),
            BattleEvent::TurnSwitchedToPlayer { .. } => self.add_log("味方の行動"),
            BattleEvent::ContinuousDamageApplied { unit, damage, .. } => {
                let name = self.name_of(unit);
                if let Some(faction) = self.gsm.unit(unit).map(|u| u.faction) {
                    self.victory.record_damage(faction.opponent(), *damage);
                }
                self.add_log(&format!("{name}は毒で{damage}ダメージ"));
            }
            BattleEvent::SkillEffectRemoved { unit, effect_type, .. } => {
                let name = self.name_of(unit);
                self.add_log(&format!("{name}の{}が切れた", effect_type.name()));
            }
            BattleEvent::ObjectiveCompleted { objective } => {
                let text = self
                    .victory
                    .objectives()
                    .iter()
                    .find(|o| &o.id == objective)
                    .map_or_else(|| objective.clone(), |o| o.description.clone());
                self.add_log(&format!("目標達成: {text}"));
            }
            BattleEvent::AutoVictoryDetected { turn } => {
                console::log(&format!("victory detected at turn {turn}"));
            }
            _ => {}
        }
        // Poison can end a battle at a round boundary.
        self.sweep_defeated();
    }

    fn check_outcome(&mut self) {
        if self.gsm.is_game_over() || self.victory.outcome().is_some() {
            return;
        }
        self.victory.refresh_objectives(&self.gsm);
        if let Some(reason) = self.victory.check_defeat_conditions(&self.gsm) {
            self.finish(GameOutcome::Defeat, Some(reason));
        } else if self.victory.auto_victory() && self.victory.check_victory_conditions() {
            self.finish(GameOutcome::Victory, None);
        }
    }

    fn finish(&mut self, outcome: GameOutcome, reason: Option<String>) {
        self.movement.cancel_movement();
        self.ai_step = AiStep::Idle;
        if let Err(e) = self.gsm.end_game(outcome) {
            self.fail(&e);
            return;
        }
        let state = self.gsm.state().clone();
        match outcome {
            GameOutcome::Victory => match self.victory.handle_stage_complete(&state) {
                Ok(rewards) => {
                    self.add_log(&format!(
                        "勝利！ 評価{} 経験値{} エッセンス{}",
                        rewards.clear_rating.label(),
                        rewards.experience,
                        rewards.rose_essence
                    ));
                    self.rewards = Some(rewards);
                }
                Err(e) => self.fail(&e),
            },
            GameOutcome::Defeat => {
                let reason = reason.unwrap_or_else(|| "敗北".to_string());
                match self.victory.handle_stage_failure(&reason, &state) {
                    Ok(report) => {
                        self.add_log(&format!("敗北… {}", report.reason));
                        self.failure = Some(report);
                    }
                    Err(e) => self.fail(&e),
                }
            }
        }
    }

    // ── Snapshots ──────────────────────────────────────────────

    pub fn snapshot(&self) -> BattleSnapshot {
        BattleSnapshot::capture(
            &self.stage.id,
            self.gsm.snapshot(),
            self.victory.performance().clone(),
            self.victory.bosses().iter().filter(|b| b.defeated).map(|b| b.id.clone()).collect(),
        )
    }

    /// Resume a battle saved from this stage. Nothing changes on error.
    pub fn restore(&mut self, snapshot: BattleSnapshot) -> GameResult<()> {
        let invalid = |msg: String| GameError::new(ErrorKind::InvalidStageData, msg);
        if snapshot.stage_id != self.stage.id {
            return Err(invalid(format!(
                "snapshot belongs to stage '{}', not '{}'",
                snapshot.stage_id, self.stage.id
            )));
        }
        if snapshot.state.game_result.is_some() {
            return Err(invalid("finished battles cannot be resumed".into()));
        }
        if let Some(u) = snapshot.state.turn_order.iter().find(|u| self.map.move_cost(u.position).is_none()) {
            return Err(invalid(format!("unit '{}' stands outside the map", u.id)));
        }
        if let Some(b) = snapshot.defeated_bosses.iter().find(|b| !self.victory.is_boss(b)) {
            return Err(GameError::new(ErrorKind::BossNotFound, format!("'{b}' is not a boss")));
        }

        self.gsm.restore(snapshot.state)?;
        let mut rules = self.stage.clone();
        if let Some(check) = self.config.check_on_turn_end {
            rules.check_on_turn_end = check;
        }
        self.victory.initialize(&rules)?;
        self.victory.restore_progress(snapshot.performance, &snapshot.defeated_bosses)?;
        self.victory.refresh_objectives(&self.gsm);

        self.fallen = self.gsm.units().iter().filter(|u| !u.is_alive()).map(|u| u.id.clone()).collect();
        self.movement.cancel_movement();
        self.ai_step = AiStep::Idle;
        self.ai_timer = self.config.ai_action_delay_ticks;
        self.rewards = None;
        self.failure = None;
        self.events.clear();
        self.add_log(&format!("ターン{}から再開", self.gsm.state().current_turn));
        Ok(())
    }
}
