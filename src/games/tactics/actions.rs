//! Semantic action IDs for Rose Tactics click targets.

pub const SELECT: u16 = 1;
pub const ATTACK: u16 = 2;
pub const WAIT: u16 = 3;
pub const END_TURN: u16 = 4;
pub const CANCEL: u16 = 5;
pub const RESTART: u16 = 6;
pub const CLAIM_VICTORY: u16 = 7;

/// Skill slots: SKILL_BASE + slot (0..3).
pub const SKILL_BASE: u16 = 10;
pub const SKILL_SLOTS: u16 = 3;

/// Map cells: CELL_BASE + y * width + x.
pub const CELL_BASE: u16 = 1000;
