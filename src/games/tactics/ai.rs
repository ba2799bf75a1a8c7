//! Enemy decision making.
//!
//! One call to [`AiController::decide`] yields the next single action for a
//! unit. The battle loop calls it again after a move so the unit can still
//! attack from its new tile.

use serde::{Deserialize, Serialize};

use super::map::BattleMap;
use super::movement::{occupied_tiles, MovementCalculator};
use super::skills::{self, SkillKind};
use super::turn::GameStateManager;
use super::unit::{Faction, Position, SkillId, Unit, UnitId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AIActionType {
    Move,
    Attack,
    Skill,
    Wait,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AIAction {
    pub action_type: AIActionType,
    pub character: UnitId,
    pub target: Option<UnitId>,
    pub destination: Option<Position>,
    pub skill_id: Option<SkillId>,
    pub priority: i32,
    pub reasoning: String,
}

impl AIAction {
    fn wait(character: &str, reasoning: &str) -> Self {
        Self {
            action_type: AIActionType::Wait,
            character: character.to_string(),
            target: None,
            destination: None,
            skill_id: None,
            priority: 0,
            reasoning: reasoning.to_string(),
        }
    }
}

/// Counts candidate evaluations against a fixed budget.
struct Budget {
    left: u32,
}

impl Budget {
    fn charge(&mut self) -> bool {
        if self.left == 0 {
            return false;
        }
        self.left -= 1;
        true
    }
}

pub struct AiController {
    pub evaluation_budget: u32,
}

impl AiController {
    pub fn new(evaluation_budget: u32) -> Self {
        Self { evaluation_budget }
    }

    pub fn decide(&self, gsm: &GameStateManager, map: &BattleMap, id: &str) -> AIAction {
        let Some(unit) = gsm.unit(id) else {
            return AIAction::wait(id, "unit is gone");
        };
        let mut budget = Budget { left: self.evaluation_budget };
        match self.evaluate(gsm, map, unit, &mut budget) {
            Some(action) => action,
            None => AIAction::wait(id, "evaluation budget exhausted"),
        }
    }

    /// `None` means the budget ran out before a decision was reached.
    fn evaluate(
        &self,
        gsm: &GameStateManager,
        map: &BattleMap,
        unit: &Unit,
        budget: &mut Budget,
    ) -> Option<AIAction> {
        let foes: Vec<&Unit> = gsm.living_units(unit.faction.opponent()).collect();
        if foes.is_empty() {
            return Some(AIAction::wait(&unit.id, "no targets left"));
        }

        if !unit.has_acted {
            if let Some(target) = weakest_within(unit, &foes, 1, budget)? {
                return Some(AIAction {
                    action_type: AIActionType::Attack,
                    character: unit.id.clone(),
                    target: Some(target.id.clone()),
                    destination: None,
                    skill_id: None,
                    priority: 100,
                    reasoning: format!("{} is adjacent with {} HP", target.name, target.current_hp),
                });
            }
            if let Some(action) = skill_candidate(unit, &foes, budget)? {
                return Some(action);
            }
        }

        if !unit.has_moved && unit.stats.movement > 0 {
            if let Some(dest) = approach_tile(gsm, map, unit, &foes, budget)? {
                return Some(AIAction {
                    action_type: AIActionType::Move,
                    character: unit.id.clone(),
                    target: None,
                    destination: Some(dest),
                    skill_id: None,
                    priority: 50,
                    reasoning: "closing distance to the nearest foe".to_string(),
                });
            }
        }

        Some(AIAction::wait(&unit.id, "nothing useful to do"))
    }
}

fn nearest_distance(pos: Position, foes: &[&Unit]) -> u32 {
    foes.iter().map(|f| pos.manhattan(f.position)).min().unwrap_or(u32::MAX)
}

/// Lowest HP foe within `range`, ties on id. Outer `None` = out of budget.
fn weakest_within<'a>(
    unit: &Unit,
    foes: &[&'a Unit],
    range: u32,
    budget: &mut Budget,
) -> Option<Option<&'a Unit>> {
    let mut best: Option<&Unit> = None;
    for &foe in foes {
        if !budget.charge() {
            return None;
        }
        if unit.position.manhattan(foe.position) > range {
            continue;
        }
        let better = best.map_or(true, |b| (foe.current_hp, &foe.id) < (b.current_hp, &b.id));
        if better {
            best = Some(foe);
        }
    }
    Some(best)
}

fn skill_candidate(unit: &Unit, foes: &[&Unit], budget: &mut Budget) -> Option<Option<AIAction>> {
    let Some(data) = unit.skill_data.as_ref() else {
        return Some(None);
    };
    for skill_id in &data.learned_skills {
        let Some(def) = skills::find(skill_id) else {
            continue;
        };
        let damaging = matches!(def.kind, SkillKind::Damage { .. });
        if !damaging || !data.is_ready(skill_id) || unit.current_mp < def.mp_cost {
            continue;
        }
        if let Some(target) = weakest_within(unit, foes, def.range, budget)? {
            return Some(Some(AIAction {
                action_type: AIActionType::Skill,
                character: unit.id.clone(),
                target: Some(target.id.clone()),
                destination: None,
                skill_id: Some(def.id.to_string()),
                priority: 80,
                reasoning: format!("{} reaches {}", def.name, target.name),
            }));
        }
    }
    Some(None)
}

/// Reachable tile that gets closest to any foe, if it beats staying put.
fn approach_tile(
    gsm: &GameStateManager,
    map: &BattleMap,
    unit: &Unit,
    foes: &[&Unit],
    budget: &mut Budget,
) -> Option<Option<Position>> {
    let blocked = occupied_tiles(gsm, &unit.id);
    let movement = unit.stats.movement.max(0) as u32;
    let range = MovementCalculator::reachable_tiles(map, unit.position, movement, &blocked);

    let here = nearest_distance(unit.position, foes);
    // Shortest distance, then cheapest, then first position.
    let mut best: Option<(u32, u32, Position)> = None;
    for (pos, cost) in range {
        if !budget.charge() {
            return None;
        }
        let dist = nearest_distance(pos, foes);
        if dist >= here {
            continue;
        }
        let key = (dist, cost, pos);
        if best.map_or(true, |b| key < b) {
            best = Some(key);
        }
    }
    Some(best.map(|(_, _, pos)| pos))
}

/// Enemies are AI controlled.
pub fn is_ai_controlled(unit: &Unit) -> bool {
    unit.faction == Faction::Enemy
}
