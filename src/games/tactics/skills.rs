//! Static skill catalog.

use super::unit::EffectType;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkillTarget {
    Enemy,
    Ally,
    SelfOnly,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkillKind {
    /// Damage scaled by `power` percent of the caster's attack.
    Damage { power: i32 },
    /// Healing scaled by `power` percent of the caster's attack.
    Heal { power: i32 },
    /// Timed buff, debuff or status.
    Effect { effect_type: EffectType, value: i32, duration: u32 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SkillDef {
    pub id: &'static str,
    pub name: &'static str,
    pub mp_cost: u32,
    /// Rounds before the skill is ready again. 0 means always ready.
    pub cooldown: u32,
    /// Maximum Manhattan distance to the target.
    pub range: u32,
    pub target: SkillTarget,
    pub kind: SkillKind,
}

impl SkillDef {
    pub fn is_offensive(&self) -> bool {
        matches!(self.target, SkillTarget::Enemy)
    }
}

pub const SKILLS: &[SkillDef] = &[
    SkillDef {
        id: "power_strike",
        name: "パワーストライク",
        mp_cost: 3,
        cooldown: 2,
        range: 1,
        target: SkillTarget::Enemy,
        kind: SkillKind::Damage { power: 150 },
    },
    SkillDef {
        id: "fire_bolt",
        name: "ファイアボルト",
        mp_cost: 4,
        cooldown: 1,
        range: 3,
        target: SkillTarget::Enemy,
        kind: SkillKind::Damage { power: 120 },
    },
    SkillDef {
        id: "heal",
        name: "ヒール",
        mp_cost: 3,
        cooldown: 0,
        range: 2,
        target: SkillTarget::Ally,
        kind: SkillKind::Heal { power: 100 },
    },
    SkillDef {
        id: "guard",
        name: "ガード",
        mp_cost: 2,
        cooldown: 3,
        range: 0,
        target: SkillTarget::SelfOnly,
        kind: SkillKind::Effect { effect_type: EffectType::DefenseUp, value: 4, duration: 2 },
    },
    SkillDef {
        id: "war_cry",
        name: "ウォークライ",
        mp_cost: 2,
        cooldown: 3,
        range: 2,
        target: SkillTarget::Ally,
        kind: SkillKind::Effect { effect_type: EffectType::AttackUp, value: 3, duration: 2 },
    },
    SkillDef {
        id: "weaken",
        name: "ウィークン",
        mp_cost: 3,
        cooldown: 2,
        range: 2,
        target: SkillTarget::Enemy,
        kind: SkillKind::Effect { effect_type: EffectType::DefenseDown, value: 3, duration: 2 },
    },
    SkillDef {
        id: "venom",
        name: "ベノム",
        mp_cost: 3,
        cooldown: 3,
        range: 1,
        target: SkillTarget::Enemy,
        kind: SkillKind::Effect { effect_type: EffectType::Poison, value: 0, duration: 3 },
    },
];

pub fn find(id: &str) -> Option<&'static SkillDef> {
    SKILLS.iter().find(|s| s.id == id)
}
