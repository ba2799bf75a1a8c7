//! Objectives, victory/defeat conditions, bosses and stage rewards.
//!
//! Runs beside the turn manager: it never mutates units, it only reads the
//! battle state it is handed and keeps its own registries and counters.
//! Once a stage is completed or failed the system is sealed and any further
//! completion attempt is rejected.

use serde::{Deserialize, Serialize};

use super::error::{ErrorKind, GameError, GameResult};
use super::events::{BattleEvent, EventBus};
use super::stage::StageData;
use super::turn::{GameOutcome, GameState, GameStateManager};
use super::unit::{Faction, Position, Unit, UnitId};

// ── Stage entities ────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObjectiveKind {
    DefeatAllEnemies,
    DefeatBoss { boss: UnitId },
    SurviveTurns { turns: u32 },
    ReachPosition { x: i32, y: i32 },
    /// Progress only moves through `update_objective_progress`.
    Custom,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectiveProgress {
    pub current: u32,
    pub target: u32,
}

impl Default for ObjectiveProgress {
    fn default() -> Self {
        Self { current: 0, target: 1 }
    }
}

fn required_by_default() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Objective {
    pub id: String,
    #[serde(flatten)]
    pub kind: ObjectiveKind,
    pub description: String,
    #[serde(default = "required_by_default")]
    pub is_required: bool,
    #[serde(default)]
    pub is_complete: bool,
    #[serde(default)]
    pub progress: ObjectiveProgress,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VictoryCondition {
    pub id: String,
    pub description: String,
    /// All of these must be complete.
    pub objective_ids: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DefeatKind {
    AllAlliesDefeated,
    ProtectedUnitDefeated { unit: UnitId },
    TurnLimitExceeded { limit: u32 },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DefeatCondition {
    pub id: String,
    #[serde(flatten)]
    pub kind: DefeatKind,
    pub description: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Boss {
    /// Unit id of the boss in the roster.
    pub id: UnitId,
    pub name: String,
    /// Rose essence awarded on defeat.
    pub essence: u32,
    #[serde(default)]
    pub experience_bonus: u32,
    #[serde(default)]
    pub defeated: bool,
}

// ── Results ───────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ClearRating {
    S,
    A,
    B,
    C,
}

impl ClearRating {
    pub fn from_score(score: u32) -> Self {
        match score {
            90.. => ClearRating::S,
            75..=89 => ClearRating::A,
            50..=74 => ClearRating::B,
            _ => ClearRating::C,
        }
    }

    pub fn experience_multiplier(self) -> f64 {
        match self {
            ClearRating::S => 2.0,
            ClearRating::A => 1.5,
            ClearRating::B => 1.2,
            ClearRating::C => 1.0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ClearRating::S => "S",
            ClearRating::A => "A",
            ClearRating::B => "B",
            ClearRating::C => "C",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagePerformance {
    pub damage_dealt: u32,
    pub damage_taken: u32,
    pub healing_done: u32,
    pub enemies_defeated: u32,
    pub allies_lost: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StageRewards {
    pub stage_id: String,
    pub clear_rating: ClearRating,
    pub score: u32,
    pub turns_taken: u32,
    pub base_experience: u32,
    /// Base experience times the rating multiplier, plus boss bonuses.
    pub experience: u32,
    pub boss_bonus_experience: u32,
    pub rose_essence: u32,
    pub performance: StagePerformance,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StageFailureReport {
    pub stage_id: String,
    pub reason: String,
    pub turns_played: u32,
    pub performance: StagePerformance,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InitSummary {
    pub objectives: usize,
    pub bosses: usize,
}

// ── System ────────────────────────────────────────────────────

pub struct VictoryConditionSystem {
    events: EventBus,
    initialized: bool,
    stage_id: String,
    objectives: Vec<Objective>,
    bosses: Vec<Boss>,
    victory_conditions: Vec<VictoryCondition>,
    defeat_conditions: Vec<DefeatCondition>,
    performance: StagePerformance,
    check_on_turn_end: bool,
    base_experience: u32,
    par_turns: u32,
    sealed: Option<GameOutcome>,
}

fn malformed(message: String) -> GameError {
    GameError::new(ErrorKind::InvalidStageData, message)
}

impl VictoryConditionSystem {
    pub fn new(events: EventBus) -> Self {
        Self {
            events,
            initialized: false,
            stage_id: String::new(),
            objectives: Vec::new(),
            bosses: Vec::new(),
            victory_conditions: Vec::new(),
            defeat_conditions: Vec::new(),
            performance: StagePerformance::default(),
            check_on_turn_end: true,
            base_experience: 0,
            par_turns: 0,
            sealed: None,
        }
    }

    pub fn objectives(&self) -> &[Objective] {
        &self.objectives
    }

    pub fn bosses(&self) -> &[Boss] {
        &self.bosses
    }

    pub fn performance(&self) -> &StagePerformance {
        &self.performance
    }

    pub fn outcome(&self) -> Option<GameOutcome> {
        self.sealed
    }

    /// Whether a met victory condition ends the battle on its own. When off,
    /// the player has to claim the win.
    pub fn auto_victory(&self) -> bool {
        self.check_on_turn_end
    }

    pub fn is_boss(&self, id: &str) -> bool {
        self.bosses.iter().any(|b| b.id == id)
    }

    fn ensure_initialized(&self) -> GameResult<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(GameError::new(ErrorKind::StageNotInitialized, "no stage has been initialized"))
        }
    }

    /// Register the stage's objectives and bosses. Replaces any previous stage.
    pub fn initialize(&mut self, stage: &StageData) -> GameResult<InitSummary> {
        validate_stage(stage)?;

        self.stage_id = stage.id.clone();
        self.objectives = stage
            .objectives
            .iter()
            .cloned()
            .map(|mut o| {
                o.is_complete = false;
                o.progress.current = 0;
                o
            })
            .collect();
        self.bosses = stage
            .bosses
            .iter()
            .cloned()
            .map(|mut b| {
                b.defeated = false;
                b
            })
            .collect();
        self.victory_conditions = stage.victory_conditions.clone();
        self.defeat_conditions = stage.defeat_conditions.clone();
        self.performance = StagePerformance::default();
        self.check_on_turn_end = stage.check_on_turn_end;
        self.base_experience = stage.base_experience;
        self.par_turns = stage.par_turns;
        self.sealed = None;
        self.initialized = true;

        Ok(InitSummary { objectives: self.objectives.len(), bosses: self.bosses.len() })
    }

    /// Put back counters and boss kills taken from a snapshot.
    pub fn restore_progress(&mut self, performance: StagePerformance, defeated_bosses: &[UnitId]) -> GameResult<()> {
        self.ensure_initialized()?;
        if let Some(unknown) = defeated_bosses.iter().find(|id| !self.is_boss(id)) {
            return Err(GameError::new(ErrorKind::BossNotFound, format!("'{unknown}' is not a boss")));
        }
        for boss in &mut self.bosses {
            boss.defeated = defeated_bosses.contains(&boss.id);
        }
        self.performance = performance;
        Ok(())
    }

    // ── Objectives ─────────────────────────────────────────────

    /// Returns true when this call completed the objective.
    pub fn update_objective_progress(&mut self, id: &str, current: u32, target: u32) -> GameResult<bool> {
        self.ensure_initialized()?;
        let index = self
            .objectives
            .iter()
            .position(|o| o.id == id)
            .ok_or_else(|| GameError::new(ErrorKind::ObjectiveNotFound, format!("objective '{id}' is not registered")))?;
        Ok(self.set_progress(index, current, target))
    }

    fn set_progress(&mut self, index: usize, current: u32, target: u32) -> bool {
        let Some(objective) = self.objectives.get_mut(index) else {
            return false;
        };
        objective.progress = ObjectiveProgress { current, target };
        if objective.is_complete || current < target {
            return false;
        }
        objective.is_complete = true;
        let id = objective.id.clone();
        self.events.emit(BattleEvent::ObjectiveCompleted { objective: id });
        true
    }

    /// Derive progress of the built-in objective kinds from the battle state.
    pub fn refresh_objectives(&mut self, gsm: &GameStateManager) {
        if !self.initialized || self.sealed.is_some() {
            return;
        }
        for index in 0..self.objectives.len() {
            let progress = match &self.objectives[index].kind {
                ObjectiveKind::DefeatAllEnemies => {
                    let enemies = gsm.units().iter().filter(|u| u.faction == Faction::Enemy);
                    let total = enemies.clone().count() as u32;
                    let down = enemies.filter(|u| !u.is_alive()).count() as u32;
                    Some((down, total))
                }
                ObjectiveKind::DefeatBoss { boss } => {
                    let down = gsm.unit(boss).map_or(true, |u| !u.is_alive());
                    Some((u32::from(down), 1))
                }
                ObjectiveKind::SurviveTurns { turns } => {
                    Some((gsm.state().current_turn.saturating_sub(1), *turns))
                }
                ObjectiveKind::ReachPosition { x, y } => {
                    let goal = Position::new(*x, *y);
                    let there = gsm.living_units(Faction::Player).any(|u| u.position == goal);
                    Some((u32::from(there), 1))
                }
                ObjectiveKind::Custom => None,
            };
            if let Some((current, target)) = progress {
                self.set_progress(index, current, target);
            }
        }
    }

    /// Every objective named by some victory condition is complete.
    pub fn check_victory_conditions(&self) -> bool {
        if !self.initialized || self.victory_conditions.is_empty() {
            return false;
        }
        self.victory_conditions
            .iter()
            .flat_map(|c| c.objective_ids.iter())
            .all(|id| self.objectives.iter().any(|o| &o.id == id && o.is_complete))
    }

    /// Description of the first defeat condition that holds, if any.
    /// Losing every ally is always a defeat.
    pub fn check_defeat_conditions(&self, gsm: &GameStateManager) -> Option<String> {
        if gsm.living_units(Faction::Player).next().is_none() {
            return Some(
                self.defeat_conditions
                    .iter()
                    .find(|c| c.kind == DefeatKind::AllAlliesDefeated)
                    .map_or_else(|| "全滅".to_string(), |c| c.description.clone()),
            );
        }
        self.defeat_conditions.iter().find_map(|c| {
            let lost = match &c.kind {
                DefeatKind::AllAlliesDefeated => false,
                DefeatKind::ProtectedUnitDefeated { unit } => {
                    gsm.unit(unit).map_or(true, |u| !u.is_alive())
                }
                DefeatKind::TurnLimitExceeded { limit } => gsm.state().current_turn > *limit,
            };
            lost.then(|| c.description.clone())
        })
    }

    /// Turn-end hook. Returns true when victory was detected.
    pub fn on_turn_end(&mut self, gsm: &GameStateManager) -> bool {
        if !self.initialized || !self.check_on_turn_end || self.sealed.is_some() {
            return false;
        }
        self.refresh_objectives(gsm);
        let won = self.check_victory_conditions();
        if won {
            self.events.emit(BattleEvent::AutoVictoryDetected { turn: gsm.state().current_turn });
        }
        won
    }

    // ── Counters ───────────────────────────────────────────────

    pub fn record_damage(&mut self, attacker: Faction, amount: u32) {
        match attacker {
            Faction::Player => self.performance.damage_dealt += amount,
            Faction::Enemy => self.performance.damage_taken += amount,
        }
    }

    pub fn record_healing(&mut self, amount: u32) {
        self.performance.healing_done += amount;
    }

    /// Count a fallen unit. Returns the essence awarded if it was a boss.
    pub fn on_unit_defeated(&mut self, unit: &Unit) -> Option<u32> {
        match unit.faction {
            Faction::Enemy => self.performance.enemies_defeated += 1,
            Faction::Player => self.performance.allies_lost += 1,
        }
        self.events.emit(BattleEvent::UnitDefeated { unit: unit.id.clone(), faction: unit.faction });
        if self.is_boss(&unit.id) {
            self.handle_boss_defeat(&unit.id).ok()
        } else {
            None
        }
    }

    /// Mark a boss defeated and return its essence. A boss pays out once.
    pub fn handle_boss_defeat(&mut self, boss_id: &str) -> GameResult<u32> {
        self.ensure_initialized()?;
        let boss = self
            .bosses
            .iter_mut()
            .find(|b| b.id == boss_id)
            .ok_or_else(|| GameError::new(ErrorKind::BossNotFound, format!("'{boss_id}' is not a boss")))?;
        if boss.defeated {
            return Err(GameError::invalid_action(format!("{} was already defeated", boss.name)));
        }
        boss.defeated = true;
        let essence = boss.essence;
        self.events.emit(BattleEvent::BossDefeated { boss: boss_id.to_string(), essence });
        Ok(essence)
    }

    // ── Stage outcome ──────────────────────────────────────────

    fn ensure_open(&self) -> GameResult<()> {
        self.ensure_initialized()?;
        if self.sealed.is_some() {
            return Err(GameError::new(ErrorKind::StageAlreadyComplete, "Stage already complete"));
        }
        Ok(())
    }

    /// Score out of 100 for a cleared stage.
    pub fn clear_score(&self, turns_taken: u32) -> u32 {
        let over_par = turns_taken.saturating_sub(self.par_turns) as i64;
        let mut score = 100 - 5 * over_par - 15 * self.performance.allies_lost as i64;
        if self.performance.damage_taken > self.performance.damage_dealt {
            score -= 10;
        }
        score.clamp(0, 100) as u32
    }

    pub fn handle_stage_complete(&mut self, state: &GameState) -> GameResult<StageRewards> {
        self.ensure_open()?;

        let turns_taken = state.current_turn;
        let score = self.clear_score(turns_taken);
        let rating = ClearRating::from_score(score);
        let defeated_bosses = self.bosses.iter().filter(|b| b.defeated);
        let boss_bonus_experience: u32 = defeated_bosses.clone().map(|b| b.experience_bonus).sum();
        let rose_essence: u32 = defeated_bosses.map(|b| b.essence).sum();
        let scaled = (self.base_experience as f64 * rating.experience_multiplier()).round() as u32;

        let rewards = StageRewards {
            stage_id: self.stage_id.clone(),
            clear_rating: rating,
            score,
            turns_taken,
            base_experience: self.base_experience,
            experience: scaled + boss_bonus_experience,
            boss_bonus_experience,
            rose_essence,
            performance: self.performance.clone(),
        };
        self.sealed = Some(GameOutcome::Victory);
        self.events.emit(BattleEvent::DistributeRewards { rewards: rewards.clone() });
        Ok(rewards)
    }

    pub fn handle_stage_failure(&mut self, reason: &str, state: &GameState) -> GameResult<StageFailureReport> {
        self.ensure_open()?;
        let report = StageFailureReport {
            stage_id: self.stage_id.clone(),
            reason: reason.to_string(),
            turns_played: state.current_turn,
            performance: self.performance.clone(),
        };
        self.sealed = Some(GameOutcome::Defeat);
        self.events.emit(BattleEvent::StageFailed { report: report.clone() });
        Ok(report)
    }
}

fn validate_stage(stage: &StageData) -> GameResult<()> {
    let mut seen = std::collections::HashSet::new();
    for o in &stage.objectives {
        if !seen.insert(o.id.as_str()) {
            return Err(malformed(format!("objective '{}' is declared twice", o.id)));
        }
        if let ObjectiveKind::DefeatBoss { boss } = &o.kind {
            if !stage.bosses.iter().any(|b| &b.id == boss) {
                return Err(malformed(format!("objective '{}' names unknown boss '{boss}'", o.id)));
            }
        }
    }
    if stage.victory_conditions.is_empty() {
        return Err(malformed("stage has no victory condition".into()));
    }
    for c in &stage.victory_conditions {
        if c.objective_ids.is_empty() {
            return Err(malformed(format!("victory condition '{}' references no objective", c.id)));
        }
        if let Some(missing) = c.objective_ids.iter().find(|id| !seen.contains(id.as_str())) {
            return Err(malformed(format!(
                "victory condition '{}' references unknown objective '{missing}'",
                c.id
            )));
        }
    }
    let is_enemy = |id: &str| stage.units.iter().any(|u| u.id == id && u.faction == Faction::Enemy);
    let mut bosses = std::collections::HashSet::new();
    for b in &stage.bosses {
        if !bosses.insert(b.id.as_str()) || !is_enemy(&b.id) {
            return Err(malformed(format!("boss '{}' is duplicated or not an enemy unit", b.id)));
        }
    }
    for c in &stage.defeat_conditions {
        if let DefeatKind::ProtectedUnitDefeated { unit } = &c.kind {
            if !stage.units.iter().any(|u| &u.id == unit && u.faction == Faction::Player) {
                return Err(malformed(format!("defeat condition '{}' protects unknown unit '{unit}'", c.id)));
            }
        }
    }
    Ok(())
}
