//! Battle participants. Pure data, no turn logic.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

pub type UnitId = String;
pub type SkillId = String;

// ── Position ──────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn manhattan(&self, other: Position) -> u32 {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y)
    }

    /// Orthogonal neighbours in the fixed preference order up, right, down, left.
    pub fn neighbors(&self) -> [Position; 4] {
        [
            Position::new(self.x, self.y - 1),
            Position::new(self.x + 1, self.y),
            Position::new(self.x, self.y + 1),
            Position::new(self.x - 1, self.y),
        ]
    }
}

// ── Faction ───────────────────────────────────────────────────

/// Ordering matters: `Player < Enemy` is the turn-order tie-break.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Faction {
    Player,
    Enemy,
}

impl Faction {
    pub fn opponent(self) -> Faction {
        match self {
            Faction::Player => Faction::Enemy,
            Faction::Enemy => Faction::Player,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Faction::Player => "player",
            Faction::Enemy => "enemy",
        }
    }
}

// ── Stats ─────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnitStats {
    pub max_hp: u32,
    pub max_mp: u32,
    pub attack: i32,
    pub defense: i32,
    /// Must be positive for a unit to enter the turn order.
    pub speed: i32,
    /// Movement points per turn.
    pub movement: i32,
}

// ── Skill state ───────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EffectType {
    AttackUp,
    DefenseUp,
    SpeedUp,
    AttackDown,
    DefenseDown,
    Poison,
}

impl EffectType {
    pub fn name(self) -> &'static str {
        match self {
            EffectType::AttackUp => "ATK↑",
            EffectType::DefenseUp => "DEF↑",
            EffectType::SpeedUp => "SPD↑",
            EffectType::AttackDown => "ATK↓",
            EffectType::DefenseDown => "DEF↓",
            EffectType::Poison => "毒",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActiveSkillEffect {
    pub effect_id: String,
    pub effect_type: EffectType,
    pub source_skill_id: SkillId,
    /// Rounds left; the effect is removed when this reaches 0.
    pub remaining_duration: u32,
    /// Stat delta for buffs/debuffs. Ignored for statuses.
    pub value: i32,
}

impl ActiveSkillEffect {
    /// Signed change this effect makes to `attack`, `defense` and `speed`.
    fn stat_delta(&self) -> (i32, i32, i32) {
        let v = self.value;
        match self.effect_type {
            EffectType::AttackUp => (v, 0, 0),
            EffectType::DefenseUp => (0, v, 0),
            EffectType::SpeedUp => (0, 0, v),
            EffectType::AttackDown => (-v, 0, 0),
            EffectType::DefenseDown => (0, -v, 0),
            EffectType::Poison => (0, 0, 0),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SkillData {
    pub learned_skills: BTreeSet<SkillId>,
    /// Only skills still cooling down are present; absent means ready.
    pub skill_cooldowns: BTreeMap<SkillId, u32>,
    pub skill_usage_counts: BTreeMap<SkillId, u32>,
    pub active_effects: Vec<ActiveSkillEffect>,
    /// Round whose start-of-round skill update has already run for this unit.
    #[serde(default)]
    pub processed_round: u32,
}

impl SkillData {
    pub fn with_skills<I, S>(skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SkillId>,
    {
        Self {
            learned_skills: skills.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn cooldown(&self, skill_id: &str) -> u32 {
        self.skill_cooldowns.get(skill_id).copied().unwrap_or(0)
    }

    pub fn is_ready(&self, skill_id: &str) -> bool {
        self.learned_skills.contains(skill_id) && self.cooldown(skill_id) == 0
    }
}

// ── Unit ──────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    pub name: String,
    pub position: Position,
    pub stats: UnitStats,
    pub current_hp: u32,
    pub current_mp: u32,
    pub faction: Faction,
    #[serde(default)]
    pub has_acted: bool,
    #[serde(default)]
    pub has_moved: bool,
    #[serde(default)]
    pub skill_data: Option<SkillData>,
}

impl Unit {
    pub fn new(id: &str, name: &str, faction: Faction, position: Position, stats: UnitStats) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            position,
            current_hp: stats.max_hp,
            current_mp: stats.max_mp,
            stats,
            faction,
            has_acted: false,
            has_moved: false,
            skill_data: None,
        }
    }

    pub fn with_skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SkillId>,
    {
        self.skill_data = Some(SkillData::with_skills(skills));
        self
    }

    pub fn is_alive(&self) -> bool {
        self.current_hp > 0
    }

    /// Both the move and the action of this turn are spent.
    pub fn turn_complete(&self) -> bool {
        self.has_moved && self.has_acted
    }

    pub fn reset_turn_flags(&mut self) {
        self.has_acted = false;
        self.has_moved = false;
    }

    /// Subtract HP, saturating at 0. Returns the damage actually taken.
    pub fn take_damage(&mut self, amount: u32) -> u32 {
        let dealt = amount.min(self.current_hp);
        self.current_hp -= dealt;
        dealt
    }

    /// Restore HP up to max. Returns the amount actually healed.
    pub fn heal(&mut self, amount: u32) -> u32 {
        let healed = amount.min(self.stats.max_hp.saturating_sub(self.current_hp));
        self.current_hp += healed;
        healed
    }

    /// Attach an effect and apply its stat impact.
    pub fn apply_effect(&mut self, effect: ActiveSkillEffect) {
        let (atk, def, spd) = effect.stat_delta();
        self.stats.attack += atk;
        self.stats.defense += def;
        self.stats.speed += spd;
        self.skill_data
            .get_or_insert_with(SkillData::default)
            .active_effects
            .push(effect);
    }

    /// Undo the stat impact of an effect that has already been detached.
    pub fn reverse_effect(&mut self, effect: &ActiveSkillEffect) {
        let (atk, def, spd) = effect.stat_delta();
        self.stats.attack -= atk;
        self.stats.defense -= def;
        self.stats.speed -= spd;
    }
}

#[cfg(test)]
pub(crate) fn test_unit(id: &str, faction: Faction, speed: i32) -> Unit {
    Unit::new(
        id,
        id,
        faction,
        Position::new(0, 0),
        UnitStats { max_hp: 30, max_mp: 10, attack: 10, defense: 4, speed, movement: 3 },
    )
}
