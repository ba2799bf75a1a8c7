//! Stage definitions loaded from JSON.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::error::{ErrorKind, GameError, GameResult};
use super::map::BattleMap;
use super::skills;
use super::unit::{Faction, Position, SkillId, Unit, UnitId, UnitStats};
use super::victory::{Boss, DefeatCondition, Objective, VictoryCondition};

const BRIAR_PASS: &str = include_str!("stages/briar_pass.json");

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnitDef {
    pub id: UnitId,
    pub name: String,
    pub faction: Faction,
    pub x: i32,
    pub y: i32,
    pub stats: UnitStats,
    #[serde(default)]
    pub skills: Vec<SkillId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StageData {
    pub id: String,
    pub name: String,
    /// Terrain glyph rows, see [`super::map::Terrain::from_glyph`].
    pub map: Vec<String>,
    pub units: Vec<UnitDef>,
    pub objectives: Vec<Objective>,
    pub victory_conditions: Vec<VictoryCondition>,
    #[serde(default)]
    pub defeat_conditions: Vec<DefeatCondition>,
    #[serde(default)]
    pub bosses: Vec<Boss>,
    #[serde(default)]
    pub base_experience: u32,
    #[serde(default)]
    pub par_turns: u32,
    /// Evaluate victory at every round boundary.
    #[serde(default = "default_true")]
    pub check_on_turn_end: bool,
}

impl StageData {
    pub fn from_json(json: &str) -> GameResult<Self> {
        serde_json::from_str(json).map_err(|e| {
            GameError::new(ErrorKind::InvalidStageData, "stage JSON could not be parsed")
                .with_details(e.to_string())
        })
    }

    pub fn build_map(&self) -> GameResult<BattleMap> {
        BattleMap::from_rows(&self.map)
    }

    /// Materialize the roster onto `map`.
    pub fn build_units(&self, map: &BattleMap) -> GameResult<Vec<Unit>> {
        let mut taken = HashSet::new();
        let mut units = Vec::with_capacity(self.units.len());
        for def in &self.units {
            let load_failed =
                |why: String| GameError::new(ErrorKind::CharacterLoadFailed, format!("unit '{}': {why}", def.id));
            if def.stats.speed <= 0 {
                return Err(load_failed("speed must be positive".into()));
            }
            if def.stats.max_hp == 0 {
                return Err(load_failed("max HP must be positive".into()));
            }
            if let Some(unknown) = def.skills.iter().find(|s| skills::find(s).is_none()) {
                return Err(load_failed(format!("unknown skill '{unknown}'")));
            }
            let pos = Position::new(def.x, def.y);
            if map.move_cost(pos).is_none() {
                return Err(load_failed(format!("cannot stand at ({}, {})", def.x, def.y)));
            }
            if !taken.insert(pos) {
                return Err(GameError::new(
                    ErrorKind::InvalidStageData,
                    format!("two units start at ({}, {})", def.x, def.y),
                ));
            }

            let unit = Unit::new(&def.id, &def.name, def.faction, pos, def.stats.clone());
            units.push(if def.skills.is_empty() {
                unit
            } else {
                unit.with_skills(def.skills.iter().cloned())
            });
        }
        Ok(units)
    }
}

/// The stage the browser build opens with.
pub fn demo_stage() -> GameResult<StageData> {
    StageData::from_json(BRIAR_PASS)
}

#[cfg(test)]
pub(crate) fn test_stage() -> StageData {
    StageData::from_json(
        r#"{
            "id": "test",
            "name": "test",
            "map": ["......", "......", "......"],
            "units": [
                { "id": "hero", "name": "hero", "faction": "player", "x": 0, "y": 0,
                  "stats": { "max_hp": 30, "max_mp": 10, "attack": 10, "defense": 4, "speed": 9, "movement": 3 } },
                { "id": "chief", "name": "chief", "faction": "enemy", "x": 5, "y": 2,
                  "stats": { "max_hp": 30, "max_mp": 0, "attack": 10, "defense": 4, "speed": 5, "movement": 3 } },
                { "id": "imp", "name": "imp", "faction": "enemy", "x": 4, "y": 2,
                  "stats": { "max_hp": 10, "max_mp": 0, "attack": 6, "defense": 2, "speed": 4, "movement": 3 } }
            ],
            "objectives": [
                { "id": "slay_boss", "type": "defeat_boss", "boss": "chief", "description": "slay" },
                { "id": "rout", "type": "defeat_all_enemies", "description": "rout", "is_required": false },
                { "id": "bonus", "type": "custom", "description": "bonus", "is_required": false }
            ],
            "victory_conditions": [
                { "id": "main", "description": "main", "objective_ids": ["slay_boss"] }
            ],
            "defeat_conditions": [
                { "id": "wipe", "type": "all_allies_defeated", "description": "wipe" }
            ],
            "bosses": [
                { "id": "chief", "name": "chief", "essence": 50, "experience_bonus": 20 }
            ],
            "base_experience": 100,
            "par_turns": 5
        }"#,
    )
    .expect("test stage parses")
}
