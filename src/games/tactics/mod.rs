//! Rose Tactics: grid tactics battle against an AI side.
//!
//! Keys: [h/j/k/l] cursor, [space] select/move, [a] attack, [1]-[3] skills,
//! [w] wait, [e] end turn, [x] cancel, [r] restart after the battle ends.
//! [v] claims the win on stages that do not detect victory by themselves.
//! Clicking a map cell moves the cursor there and acts like [space].

pub mod actions;
pub mod ai;
pub mod battle;
pub mod combat;
pub mod error;
pub mod events;
pub mod map;
pub mod movement;
pub mod render;
pub mod save;
pub mod skills;
pub mod stage;
pub mod turn;
pub mod unit;
pub mod victory;

use std::cell::RefCell;
use std::rc::Rc;

use ratzilla::ratatui::layout::Rect;
use ratzilla::ratatui::Frame;

use crate::games::Game;
use crate::input::{ClickState, InputEvent};

use actions::*;
use battle::{Battle, BattleConfig};
use error::GameResult;
use unit::Position;

pub struct TacticsState {
    pub battle: GameResult<Battle>,
    pub cursor: Position,
}

impl TacticsState {
    pub fn new() -> Self {
        let battle = stage::demo_stage().and_then(|s| Battle::new(s, BattleConfig::default()));
        let mut state = Self { battle, cursor: Position::new(0, 0) };
        if let Ok(b) = &mut state.battle {
            #[cfg(target_arch = "wasm32")]
            if save::load_battle(b) {
                crate::console::log("Rose Tactics: 中断データから再開");
            }
            if let Some(unit) = b.gsm().active_unit() {
                state.cursor = unit.position;
            }
        }
        state
    }

    fn move_cursor(&mut self, dx: i32, dy: i32) -> bool {
        let Ok(battle) = &mut self.battle else {
            return false;
        };
        let map = battle.map();
        let x = (self.cursor.x + dx).clamp(0, (map.width - 1).max(0));
        let y = (self.cursor.y + dy).clamp(0, (map.height - 1).max(0));
        self.cursor = Position::new(x, y);
        battle.preview_path(self.cursor);
        true
    }
}

pub struct TacticsGame {
    state: TacticsState,
}

impl TacticsGame {
    pub fn new() -> Self {
        Self { state: TacticsState::new() }
    }

    /// Tick rate the AI delay is measured in.
    pub fn ticks_per_second(&self) -> u32 {
        match &self.state.battle {
            Ok(b) => b.config().ticks_per_second,
            Err(_) => BattleConfig::default().ticks_per_second,
        }
    }
}

impl Game for TacticsGame {
    fn handle_input(&mut self, event: &InputEvent) -> bool {
        let handled = match event {
            InputEvent::Key(ch) => handle_key(&mut self.state, *ch),
            InputEvent::Click(id) => handle_click(&mut self.state, *id),
        };
        #[cfg(target_arch = "wasm32")]
        if handled {
            if let Ok(b) = &self.state.battle {
                save::save_battle(b);
            }
        }
        handled
    }

    fn tick(&mut self, delta_ticks: u32) {
        let Ok(battle) = &mut self.state.battle else {
            return;
        };
        let was_player_turn = battle.is_player_turn();
        battle.tick(delta_ticks);
        if !was_player_turn && battle.is_player_turn() {
            if let Some(unit) = battle.gsm().active_unit() {
                self.state.cursor = unit.position;
            }
            #[cfg(target_arch = "wasm32")]
            save::save_battle(battle);
        }
    }

    fn render(&self, f: &mut Frame, area: Rect, click_state: &Rc<RefCell<ClickState>>) {
        render::render(&self.state, f, area, click_state);
    }
}

// ── Input Handling ──────────────────────────────────────────

fn handle_key(state: &mut TacticsState, ch: char) -> bool {
    match ch {
        'h' => return state.move_cursor(-1, 0),
        'l' => return state.move_cursor(1, 0),
        'k' => return state.move_cursor(0, -1),
        'j' => return state.move_cursor(0, 1),
        _ => {}
    }
    let cursor = state.cursor;
    let Ok(battle) = &mut state.battle else {
        return false;
    };
    match ch {
        ' ' => battle.select_at(cursor),
        'a' => battle.attack(cursor),
        '1'..='3' => {
            let slot = ch as usize - '1' as usize;
            battle.cast(slot, cursor)
        }
        'w' => battle.wait(),
        'e' => battle.end_turn(),
        'x' => battle.cancel(),
        'v' => battle.claim_victory(),
        'r' if battle.gsm().is_game_over() => battle.restart(),
        _ => false,
    }
}

fn handle_click(state: &mut TacticsState, id: u16) -> bool {
    if id >= CELL_BASE {
        let Ok(battle) = &state.battle else {
            return false;
        };
        let width = battle.map().width.max(1);
        let index = (id - CELL_BASE) as i32;
        state.cursor = Position::new(index % width, index / width);
        return handle_key(state, ' ');
    }
    if (SKILL_BASE..SKILL_BASE + SKILL_SLOTS).contains(&id) {
        let slot = (id - SKILL_BASE) as u8;
        return handle_key(state, (b'1' + slot) as char);
    }
    let key = match id {
        SELECT => ' ',
        ATTACK => 'a',
        WAIT => 'w',
        END_TURN => 'e',
        CANCEL => 'x',
        RESTART => 'r',
        CLAIM_VICTORY => 'v',
        _ => return false,
    };
    handle_key(state, key)
}
