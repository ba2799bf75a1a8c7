//! Movement range, path preview and move execution.
//!
//! `MovementCalculator` and `PathfindingService` are pure functions over the
//! map and a set of blocked tiles. `MovementSystem` holds the transient
//! selection state and commits moves through the [`GameStateManager`].

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap, HashSet};

use super::ai::AIActionType;
use super::error::{ErrorKind, GameError, GameResult};
use super::events::{BattleEvent, EventBus};
use super::map::BattleMap;
use super::turn::{AdvanceTicket, GameStateManager};
use super::unit::{Position, UnitId};

/// Tiles held by living units other than `mover`.
pub fn occupied_tiles(gsm: &GameStateManager, mover: &str) -> HashSet<Position> {
    gsm.units()
        .iter()
        .filter(|u| u.is_alive() && u.id != mover)
        .map(|u| u.position)
        .collect()
}

// ── Range ─────────────────────────────────────────────────────

pub struct MovementCalculator;

impl MovementCalculator {
    /// Reachable tiles and their cheapest cost. The start tile is excluded.
    pub fn reachable_tiles(
        map: &BattleMap,
        start: Position,
        movement: u32,
        blocked: &HashSet<Position>,
    ) -> BTreeMap<Position, u32> {
        let mut best: HashMap<Position, u32> = HashMap::from([(start, 0)]);
        let mut open = BinaryHeap::new();
        open.push(std::cmp::Reverse((0u32, start)));

        while let Some(std::cmp::Reverse((cost, pos))) = open.pop() {
            if best.get(&pos).is_some_and(|&b| cost > b) {
                continue;
            }
            for next in pos.neighbors() {
                if blocked.contains(&next) {
                    continue;
                }
                let Some(step) = map.move_cost(next) else {
                    continue;
                };
                let total = cost + step;
                if total > movement {
                    continue;
                }
                if best.get(&next).map_or(true, |&b| total < b) {
                    best.insert(next, total);
                    open.push(std::cmp::Reverse((total, next)));
                }
            }
        }

        best.remove(&start);
        best.into_iter().collect()
    }
}

// ── Pathfinding ───────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq)]
struct PathNode {
    cost: u32,
    steps: u32,
    /// Push order; neighbours are pushed up, right, down, left.
    seq: u32,
    position: Position,
}

impl Ord for PathNode {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .cmp(&self.cost)
            .then_with(|| other.steps.cmp(&self.steps))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for PathNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub struct PathfindingService;

impl PathfindingService {
    /// Cheapest path from `start` to `goal`, both included. Ties go to the
    /// shorter path, then to the earlier direction. Empty when no path fits.
    pub fn find_path(
        map: &BattleMap,
        start: Position,
        goal: Position,
        blocked: &HashSet<Position>,
        max_cost: Option<u32>,
    ) -> Vec<Position> {
        if start == goal {
            return vec![start];
        }
        if blocked.contains(&goal) || map.move_cost(goal).is_none() {
            return Vec::new();
        }

        let mut best: HashMap<Position, (u32, u32)> = HashMap::from([(start, (0, 0))]);
        let mut came_from: HashMap<Position, Position> = HashMap::new();
        let mut open = BinaryHeap::new();
        let mut seq = 0;
        open.push(PathNode { cost: 0, steps: 0, seq, position: start });

        while let Some(node) = open.pop() {
            if node.position == goal {
                break;
            }
            if best.get(&node.position).is_some_and(|&b| (node.cost, node.steps) > b) {
                continue;
            }
            for next in node.position.neighbors() {
                if blocked.contains(&next) {
                    continue;
                }
                let Some(step) = map.move_cost(next) else {
                    continue;
                };
                let key = (node.cost + step, node.steps + 1);
                if max_cost.is_some_and(|m| key.0 > m) {
                    continue;
                }
                if best.get(&next).map_or(true, |&b| key < b) {
                    best.insert(next, key);
                    came_from.insert(next, node.position);
                    seq += 1;
                    open.push(PathNode { cost: key.0, steps: key.1, seq, position: next });
                }
            }
        }

        if !came_from.contains_key(&goal) {
            return Vec::new();
        }
        let mut path = vec![goal];
        let mut cur = goal;
        while let Some(&prev) = came_from.get(&cur) {
            path.push(prev);
            cur = prev;
        }
        path.reverse();
        path
    }

    /// Sum of entry costs along a path (the start tile is free).
    pub fn path_cost(map: &BattleMap, path: &[Position]) -> Option<u32> {
        path.iter().skip(1).map(|p| map.move_cost(*p)).sum()
    }
}

// ── Movement state ────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MovementMode {
    #[default]
    None,
    Selecting,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MovementState {
    pub selected_character: Option<UnitId>,
    pub movement_mode: MovementMode,
    pub movement_range: BTreeSet<Position>,
    pub current_path: Vec<Position>,
}

pub struct MovementSystem {
    state: MovementState,
    events: EventBus,
}

impl MovementSystem {
    pub fn new(events: EventBus) -> Self {
        Self { state: MovementState::default(), events }
    }

    pub fn state(&self) -> &MovementState {
        &self.state
    }

    pub fn is_selecting(&self) -> bool {
        self.state.movement_mode == MovementMode::Selecting
    }

    fn compute_range(gsm: &GameStateManager, map: &BattleMap, id: &str) -> GameResult<BTreeSet<Position>> {
        let unit = gsm.unit(id).ok_or_else(|| {
            GameError::new(ErrorKind::InvalidCharacterSelection, format!("unit '{id}' does not exist"))
        })?;
        if !unit.is_alive() {
            return Err(GameError::new(
                ErrorKind::InvalidCharacterSelection,
                format!("{} is defeated", unit.name),
            ));
        }
        if !gsm.can_character_move(id) {
            return Err(GameError::new(
                ErrorKind::InvalidCharacterSelection,
                format!("{} cannot move now", unit.name),
            ));
        }
        let movement = unit.stats.movement.max(0) as u32;
        let blocked = occupied_tiles(gsm, id);
        Ok(MovementCalculator::reachable_tiles(map, unit.position, movement, &blocked)
            .into_keys()
            .collect())
    }

    pub fn select_character_for_movement(
        &mut self,
        gsm: &GameStateManager,
        map: &BattleMap,
        id: &str,
    ) -> GameResult<&BTreeSet<Position>> {
        let range = Self::compute_range(gsm, map, id)?;
        self.state = MovementState {
            selected_character: Some(id.to_string()),
            movement_mode: MovementMode::Selecting,
            movement_range: range,
            current_path: Vec::new(),
        };
        Ok(&self.state.movement_range)
    }

    /// Preview only: an unreachable destination yields an empty path.
    pub fn show_movement_path(
        &mut self,
        gsm: &GameStateManager,
        map: &BattleMap,
        destination: Position,
    ) -> &[Position] {
        self.state.current_path.clear();
        let Some(id) = self.state.selected_character.as_deref() else {
            return &self.state.current_path;
        };
        if !self.state.movement_range.contains(&destination) {
            return &self.state.current_path;
        }
        if let Some(unit) = gsm.unit(id) {
            let blocked = occupied_tiles(gsm, id);
            let budget = unit.stats.movement.max(0) as u32;
            self.state.current_path =
                PathfindingService::find_path(map, unit.position, destination, &blocked, Some(budget));
        }
        &self.state.current_path
    }

    /// Full legality check for moving `id` to `destination`.
    fn validate_destination(
        &self,
        gsm: &GameStateManager,
        map: &BattleMap,
        id: &str,
        destination: Position,
    ) -> GameResult<()> {
        if !map.in_bounds(destination) {
            return Err(GameError::new(
                ErrorKind::InvalidPosition,
                format!("({}, {}) is outside the map", destination.x, destination.y),
            ));
        }
        if occupied_tiles(gsm, id).contains(&destination) {
            return Err(GameError::new(
                ErrorKind::DestinationOccupied,
                format!("({}, {}) is occupied", destination.x, destination.y),
            ));
        }
        let cached = self.state.selected_character.as_deref() == Some(id);
        let reachable = if cached {
            self.state.movement_range.contains(&destination)
        } else {
            Self::compute_range(gsm, map, id)?.contains(&destination)
        };
        if !reachable {
            return Err(GameError::new(
                ErrorKind::DestinationUnreachable,
                format!("({}, {}) is out of movement range", destination.x, destination.y),
            ));
        }
        Ok(())
    }

    pub fn execute_movement(
        &mut self,
        gsm: &mut GameStateManager,
        map: &BattleMap,
        id: &str,
        destination: Position,
    ) -> GameResult<Position> {
        self.validate_destination(gsm, map, id, destination)?;
        gsm.relocate_unit(id, destination)?;
        self.cancel_movement();
        self.events.emit(BattleEvent::UnitUpdated { unit: id.to_string() });
        gsm.mark_character_moved(id)?;
        Ok(destination)
    }

    /// AI variant: reports the move through the deferred-advance path.
    pub fn execute_ai_movement(
        &mut self,
        gsm: &mut GameStateManager,
        map: &BattleMap,
        id: &str,
        destination: Position,
    ) -> GameResult<AdvanceTicket> {
        if gsm.has_pending_advance() {
            return Err(GameError::invalid_turn_state("a turn advance is already pending"));
        }
        self.validate_destination(gsm, map, id, destination)?;
        gsm.relocate_unit(id, destination)?;
        self.cancel_movement();
        self.events.emit(BattleEvent::UnitUpdated { unit: id.to_string() });
        gsm.complete_ai_action(id, AIActionType::Move)
    }

    pub fn cancel_movement(&mut self) {
        self.state = MovementState::default();
    }

    pub fn handle_right_click(&mut self) {
        self.cancel_movement();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::tactics::unit::{test_unit, Faction, Unit};

    fn at(mut unit: Unit, x: i32, y: i32) -> Unit {
        unit.position = Position::new(x, y);
        unit
    }

    fn setup(rows: &[&str], units: Vec<Unit>) -> (GameStateManager, BattleMap, MovementSystem) {
        let bus = EventBus::new();
        let mut gsm = GameStateManager::new(bus.clone());
        gsm.initialize_turn_order(units).unwrap();
        (gsm, BattleMap::from_rows(rows).unwrap(), MovementSystem::new(bus))
    }

    #[test]
    fn range_respects_terrain_cost() {
        let map = BattleMap::from_rows(&["###", ".h.", "###"]).unwrap();
        let range = MovementCalculator::reachable_tiles(&map, Position::new(0, 1), 3, &HashSet::new());
        assert_eq!(range.get(&Position::new(1, 1)), Some(&3));
        assert!(!range.contains_key(&Position::new(2, 1)));
        assert!(!range.contains_key(&Position::new(0, 1)));
    }

    #[test]
    fn hill_blocks_two_tile_move() {
        let (mut gsm, map, mut ms) = setup(
            &["###", ".h.", "###", "..."],
            vec![
                at(test_unit("hero", Faction::Player, 9), 0, 1),
                at(test_unit("orc", Faction::Enemy, 1), 0, 3),
            ],
        );
        let err = ms.execute_movement(&mut gsm, &map, "hero", Position::new(2, 1)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DestinationUnreachable);
        assert_eq!(gsm.unit("hero").unwrap().position, Position::new(0, 1));
        assert!(!gsm.unit("hero").unwrap().has_moved);
    }

    #[test]
    fn execute_checks_bounds_then_occupancy() {
        let (mut gsm, map, mut ms) = setup(
            &["....", "...."],
            vec![
                at(test_unit("hero", Faction::Player, 9), 0, 0),
                at(test_unit("orc", Faction::Enemy, 1), 1, 0),
            ],
        );
        let err = ms.execute_movement(&mut gsm, &map, "hero", Position::new(-1, 0)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidPosition);
        let err = ms.execute_movement(&mut gsm, &map, "hero", Position::new(1, 0)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DestinationOccupied);
    }

    #[test]
    fn occupied_tiles_block_passage() {
        let map = BattleMap::from_rows(&["...", "#.#"]).unwrap();
        let blocked = HashSet::from([Position::new(1, 0)]);
        let range = MovementCalculator::reachable_tiles(&map, Position::new(0, 0), 5, &blocked);
        assert!(range.is_empty());
    }

    #[test]
    fn select_then_move_marks_moved_and_clears_state() {
        let (mut gsm, map, mut ms) = setup(
            &["....", "....", "...."],
            vec![
                at(test_unit("hero", Faction::Player, 9), 0, 0),
                at(test_unit("orc", Faction::Enemy, 1), 3, 2),
            ],
        );
        let range = ms.select_character_for_movement(&gsm, &map, "hero").unwrap();
        assert!(range.contains(&Position::new(2, 1)));
        assert!(ms.is_selecting());

        let path = ms.show_movement_path(&gsm, &map, Position::new(2, 1)).to_vec();
        assert_eq!(path.first(), Some(&Position::new(0, 0)));
        assert_eq!(path.last(), Some(&Position::new(2, 1)));
        assert_eq!(path.len(), 4);

        let pos = ms.execute_movement(&mut gsm, &map, "hero", Position::new(2, 1)).unwrap();
        assert_eq!(pos, Position::new(2, 1));
        let hero = gsm.unit("hero").unwrap();
        assert_eq!(hero.position, pos);
        assert!(hero.has_moved);
        assert_eq!(*ms.state(), MovementState::default());
    }

    #[test]
    fn defeated_or_enemy_units_cannot_be_selected() {
        let (mut gsm, map, mut ms) = setup(
            &["...."],
            vec![
                at(test_unit("hero", Faction::Player, 9), 0, 0),
                at(test_unit("orc", Faction::Enemy, 1), 3, 0),
            ],
        );
        let err = ms.select_character_for_movement(&gsm, &map, "orc").unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidCharacterSelection);

        gsm.unit_mut("hero").unwrap().current_hp = 0;
        let err = ms.select_character_for_movement(&gsm, &map, "hero").unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidCharacterSelection);
        assert!(!ms.is_selecting());
    }

    #[test]
    fn unreachable_preview_is_empty() {
        let (gsm, map, mut ms) = setup(
            &["......"],
            vec![
                at(test_unit("hero", Faction::Player, 9), 0, 0),
                at(test_unit("orc", Faction::Enemy, 1), 5, 0),
            ],
        );
        ms.select_character_for_movement(&gsm, &map, "hero").unwrap();
        assert!(ms.show_movement_path(&gsm, &map, Position::new(4, 0)).is_empty());
        assert!(ms.is_selecting());
    }

    #[test]
    fn cancel_resets_everything() {
        let (gsm, map, mut ms) = setup(
            &["...."],
            vec![
                at(test_unit("hero", Faction::Player, 9), 0, 0),
                at(test_unit("orc", Faction::Enemy, 1), 3, 0),
            ],
        );
        ms.select_character_for_movement(&gsm, &map, "hero").unwrap();
        ms.show_movement_path(&gsm, &map, Position::new(1, 0));
        ms.handle_right_click();
        let s = ms.state();
        assert!(s.selected_character.is_none());
        assert_eq!(s.movement_mode, MovementMode::None);
        assert!(s.movement_range.is_empty() && s.current_path.is_empty());
    }

    #[test]
    fn path_prefers_up_on_ties() {
        let map = BattleMap::open(3, 3);
        let path = PathfindingService::find_path(
            &map,
            Position::new(1, 1),
            Position::new(2, 0),
            &HashSet::new(),
            None,
        );
        assert_eq!(path, vec![Position::new(1, 1), Position::new(1, 0), Position::new(2, 0)]);
    }

    #[test]
    fn path_prefers_cost_then_steps() {
        let map = BattleMap::from_rows(&[".hh.", "...."]).unwrap();
        let path = PathfindingService::find_path(
            &map,
            Position::new(0, 0),
            Position::new(3, 0),
            &HashSet::new(),
            None,
        );
        assert_eq!(path.len(), 6);
        assert_eq!(PathfindingService::path_cost(&map, &path), Some(5));

        let map = BattleMap::from_rows(&[".h.", "..."]).unwrap();
        let path = PathfindingService::find_path(
            &map,
            Position::new(0, 0),
            Position::new(2, 0),
            &HashSet::new(),
            None,
        );
        assert_eq!(path, vec![Position::new(0, 0), Position::new(1, 0), Position::new(2, 0)]);
    }

    #[test]
    fn ai_move_reports_through_complete_ai_action() {
        let (mut gsm, map, mut ms) = setup(
            &["....."],
            vec![
                at(test_unit("hero", Faction::Player, 9), 0, 0),
                at(test_unit("orc", Faction::Enemy, 1), 4, 0),
            ],
        );
        gsm.next_turn().unwrap();
        let ticket = ms.execute_ai_movement(&mut gsm, &map, "orc", Position::new(2, 0)).unwrap();
        assert_eq!(ticket, AdvanceTicket::Continue);
        assert!(gsm.unit("orc").unwrap().has_moved);
    }
}
