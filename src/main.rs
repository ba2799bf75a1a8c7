mod console;
mod games;
mod input;
mod time;
mod widgets;

use std::{cell::RefCell, io, rc::Rc};

use games::tactics::TacticsGame;
use games::Game;
use input::{pixel_x_to_col, pixel_y_to_row, ClickState, InputEvent};
use ratzilla::event::{KeyCode, MouseButton, MouseEventKind};
use ratzilla::ratatui::Terminal;
use ratzilla::{DomBackend, WebRenderer};
use time::GameTime;

/// Query the grid container's bounding rect and convert a pointer position
/// into a terminal cell.
fn dom_pixel_to_cell(mouse_x: u32, mouse_y: u32, cs: &ClickState) -> Option<(u16, u16)> {
    let document = web_sys::window()?.document()?;
    // DomBackend renders into the first <div> under <body>.
    let grid = document.query_selector("body > div").ok()??;
    let rect = grid.get_bounding_client_rect();

    let col = pixel_x_to_col(mouse_x as f64 - rect.left(), rect.width(), cs.terminal_cols)?;
    let row = pixel_y_to_row(mouse_y as f64 - rect.top(), rect.height(), cs.terminal_rows)?;
    Some((col, row))
}

fn key_to_input(code: &KeyCode) -> Option<InputEvent> {
    let ch = match code {
        KeyCode::Char(c) => c.to_ascii_lowercase(),
        KeyCode::Enter => ' ',
        KeyCode::Esc => 'x',
        KeyCode::Left => 'h',
        KeyCode::Right => 'l',
        KeyCode::Up => 'k',
        KeyCode::Down => 'j',
        _ => return None,
    };
    Some(InputEvent::Key(ch))
}

fn main() -> io::Result<()> {
    console_error_panic_hook::set_once();

    let game = Rc::new(RefCell::new(TacticsGame::new()));
    let click_state = Rc::new(RefCell::new(ClickState::new()));
    let clock = Rc::new(RefCell::new(GameTime::new(game.borrow().ticks_per_second())));
    let backend = DomBackend::new()?;
    let terminal = Terminal::new(backend)?;

    terminal.on_mouse_event({
        let game = game.clone();
        let click_state = click_state.clone();
        move |mouse_event| {
            if mouse_event.event != MouseEventKind::Pressed {
                return;
            }
            let event = match mouse_event.button {
                MouseButton::Right => InputEvent::Key('x'),
                MouseButton::Left => {
                    let cs = click_state.borrow();
                    if cs.terminal_rows == 0 || cs.terminal_cols == 0 {
                        return;
                    }
                    let Some((col, row)) = dom_pixel_to_cell(mouse_event.x, mouse_event.y, &cs) else {
                        return;
                    };
                    let Some(id) = cs.hit_test(col, row) else {
                        return;
                    };
                    InputEvent::Click(id)
                }
                _ => return,
            };
            game.borrow_mut().handle_input(&event);
        }
    });

    terminal.on_key_event({
        let game = game.clone();
        move |key_event| {
            if let Some(event) = key_to_input(&key_event.code) {
                game.borrow_mut().handle_input(&event);
            }
        }
    });

    terminal.draw_web(move |f| {
        let ticks = clock.borrow_mut().update(js_sys::Date::now());
        if ticks > 0 {
            game.borrow_mut().tick(ticks);
        }

        let size = f.area();
        {
            let mut cs = click_state.borrow_mut();
            cs.terminal_cols = size.width;
            cs.terminal_rows = size.height;
            cs.clear_targets();
        }
        game.borrow().render(f, size, &click_state);
    });

    Ok(())
}
