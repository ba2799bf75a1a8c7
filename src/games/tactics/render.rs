//! Rose Tactics rendering: map grid, unit panel, commands and log.

use std::cell::RefCell;
use std::rc::Rc;

use ratzilla::ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratzilla::ratatui::style::{Color, Modifier, Style};
use ratzilla::ratatui::text::{Line, Span};
use ratzilla::ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use ratzilla::ratatui::Frame;

use crate::input::{is_narrow_layout, ClickState};
use crate::widgets::ClickableList;

use super::actions::*;
use super::battle::Battle;
use super::movement::PathfindingService;
use super::turn::{GameOutcome, GamePhase};
use super::unit::{Faction, Position, Unit};
use super::TacticsState;

pub fn render(state: &TacticsState, f: &mut Frame, area: Rect, click_state: &Rc<RefCell<ClickState>>) {
    let battle = match &state.battle {
        Ok(b) => b,
        Err(e) => {
            let text = vec![
                Line::from(Span::styled(" ステージを読み込めません", Style::default().fg(Color::Red))),
                Line::from(format!(" {}: {}", e.kind, e.message)),
            ];
            f.render_widget(Paragraph::new(text).block(Block::default().borders(Borders::ALL)), area);
            return;
        }
    };

    let grid_h = battle.map().height.max(0) as u16 + 2;
    let grid_w = battle.map().width.max(0) as u16 * 2 + 3;

    if is_narrow_layout(area.width) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),
                Constraint::Length(grid_h),
                Constraint::Length(4),
                Constraint::Min(8),
            ])
            .split(area);
        render_header(battle, f, chunks[0]);
        render_grid(battle, state.cursor, f, chunks[1], click_state);
        render_unit_panel(battle, state.cursor, f, chunks[2]);
        render_commands(battle, f, chunks[3], click_state);
        return;
    }

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(grid_w.max(30)), Constraint::Min(24)])
        .split(area);
    let left = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Length(grid_h), Constraint::Min(6)])
        .split(columns[0]);
    let right = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(12), Constraint::Length(6), Constraint::Min(4)])
        .split(columns[1]);

    render_header(battle, f, left[0]);
    render_grid(battle, state.cursor, f, left[1], click_state);
    render_unit_panel(battle, state.cursor, f, left[2]);
    render_commands(battle, f, right[0], click_state);
    render_objectives(battle, f, right[1]);
    render_log(battle, f, right[2]);
}

fn render_header(battle: &Battle, f: &mut Frame, area: Rect) {
    let gs = battle.gsm().state();
    let (status, color) = match gs.game_result {
        Some(GameOutcome::Victory) => {
            let rating = battle.rewards().map_or("-", |r| r.clear_rating.label());
            (format!("勝利！ 評価 {rating}"), Color::Yellow)
        }
        Some(GameOutcome::Defeat) => ("敗北…".to_string(), Color::Red),
        None => {
            let side = match gs.active_player {
                Faction::Player => "味方",
                Faction::Enemy => "敵",
            };
            (format!("ターン{} {}フェイズ [{}]", gs.current_turn, side, gs.phase.label()), Color::Cyan)
        }
    };
    let line = Line::from(vec![
        Span::styled(format!(" {} ", battle.stage().name), Style::default().fg(Color::White).add_modifier(Modifier::BOLD)),
        Span::styled(status, Style::default().fg(color).add_modifier(Modifier::BOLD)),
    ]);
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(" Rose Tactics ");
    f.render_widget(Paragraph::new(line).block(block), area);
}

fn unit_glyph(battle: &Battle, unit: &Unit) -> (String, Style) {
    let initial = unit.id.chars().next().unwrap_or('?');
    let (ch, color) = match unit.faction {
        Faction::Player => (initial.to_ascii_uppercase(), Color::Cyan),
        Faction::Enemy if battle.victory().is_boss(&unit.id) => ('B', Color::Magenta),
        Faction::Enemy => (initial.to_ascii_lowercase(), Color::Red),
    };
    let mut style = Style::default().fg(color).add_modifier(Modifier::BOLD);
    if unit.has_acted {
        style = style.remove_modifier(Modifier::BOLD).fg(Color::DarkGray);
    }
    (format!("{ch} "), style)
}

fn render_grid(
    battle: &Battle,
    cursor: Position,
    f: &mut Frame,
    area: Rect,
    click_state: &Rc<RefCell<ClickState>>,
) {
    let map = battle.map();
    let movement = battle.movement().state();
    let active = battle.gsm().active_unit().map(|u| u.id.as_str());
    let mut lines: Vec<Line> = Vec::new();

    for y in 0..map.height {
        let mut spans: Vec<Span> = vec![Span::raw(" ")];
        for x in 0..map.width {
            let pos = Position::new(x, y);
            let (text, mut style) = match battle.unit_at(pos) {
                Some(unit) => {
                    let (text, mut style) = unit_glyph(battle, unit);
                    if Some(unit.id.as_str()) == active {
                        style = style.add_modifier(Modifier::UNDERLINED);
                    }
                    (text, style)
                }
                None => match map.terrain(pos) {
                    Some(t) => (format!("{} ", t.glyph()), Style::default().fg(t.color())),
                    None => ("  ".to_string(), Style::default()),
                },
            };
            if movement.current_path.contains(&pos) {
                style = style.bg(Color::Yellow).fg(Color::Black);
            } else if movement.movement_range.contains(&pos) {
                style = style.bg(Color::Blue);
            }
            if pos == cursor {
                style = style.add_modifier(Modifier::REVERSED);
            }
            spans.push(Span::styled(text, style));
        }
        lines.push(Line::from(spans));
    }

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));
    f.render_widget(Paragraph::new(lines).block(block), area);

    // One target per cell; each cell is two columns wide after a one column pad.
    let mut cs = click_state.borrow_mut();
    for y in 0..map.height {
        let row = area.y + 1 + y as u16;
        if row >= area.y + area.height.saturating_sub(1) {
            break;
        }
        for x in 0..map.width {
            let col = area.x + 2 + x as u16 * 2;
            if col + 2 > area.x + area.width {
                break;
            }
            let id = CELL_BASE + (y * map.width + x) as u16;
            cs.add_click_target(Rect::new(col, row, 2, 1), id);
        }
    }
}

fn render_unit_panel(battle: &Battle, cursor: Position, f: &mut Frame, area: Rect) {
    let unit = battle.unit_at(cursor).or_else(|| battle.selected_unit());
    let mut lines = Vec::new();
    match unit {
        Some(u) => {
            let color = if u.faction == Faction::Player { Color::Cyan } else { Color::Red };
            let mut flags = Vec::new();
            if u.has_moved {
                flags.push("移動済");
            }
            if u.has_acted {
                flags.push("行動済");
            }
            lines.push(Line::from(vec![
                Span::styled(format!(" {} ", u.name), Style::default().fg(color).add_modifier(Modifier::BOLD)),
                Span::styled(flags.join(" "), Style::default().fg(Color::DarkGray)),
            ]));
            lines.push(Line::from(format!(
                " HP {}/{}  MP {}/{}",
                u.current_hp, u.stats.max_hp, u.current_mp, u.stats.max_mp
            )));
            lines.push(Line::from(format!(
                " 攻{} 防{} 速{} 移{}",
                u.stats.attack, u.stats.defense, u.stats.speed, u.stats.movement
            )));
            if let Some(data) = &u.skill_data {
                let effects: Vec<String> = data
                    .active_effects
                    .iter()
                    .map(|e| format!("{}({})", e.effect_type.name(), e.remaining_duration))
                    .collect();
                if !effects.is_empty() {
                    lines.push(Line::from(Span::styled(
                        format!(" {}", effects.join(" ")),
                        Style::default().fg(Color::Magenta),
                    )));
                }
            }
        }
        None => {
            let terrain = battle.map().terrain(cursor);
            let text = terrain.map_or("-".to_string(), |t| match t.move_cost() {
                Some(cost) => format!(" {} (移動コスト{cost})", t.name()),
                None => format!(" {} (通行不可)", t.name()),
            });
            lines.push(Line::from(text));
            let path = &battle.movement().state().current_path;
            if let Some(cost) = PathfindingService::path_cost(battle.map(), path).filter(|_| path.len() > 1) {
                lines.push(Line::from(Span::styled(
                    format!(" 経路 {}マス / コスト{cost}", path.len() - 1),
                    Style::default().fg(Color::Yellow),
                )));
            }
        }
    }
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));
    f.render_widget(Paragraph::new(lines).block(block).wrap(Wrap { trim: false }), area);
}

fn push_command(cl: &mut ClickableList, key: &str, label: &str, enabled: bool, action_id: u16) {
    let (key_color, label_color) = if enabled {
        (Color::Cyan, Color::White)
    } else {
        (Color::DarkGray, Color::DarkGray)
    };
    cl.push_clickable(
        Line::from(vec![
            Span::styled(format!(" [{key}] "), Style::default().fg(key_color).add_modifier(Modifier::BOLD)),
            Span::styled(label.to_string(), Style::default().fg(label_color)),
        ]),
        action_id,
    );
}

fn render_commands(battle: &Battle, f: &mut Frame, area: Rect, click_state: &Rc<RefCell<ClickState>>) {
    let mut cl = ClickableList::new();

    if battle.gsm().is_game_over() {
        if let Some(r) = battle.rewards() {
            cl.push(Line::from(format!(" スコア {} / 経験値 {}", r.score, r.experience)));
            cl.push(Line::from(format!(" ローズエッセンス {}", r.rose_essence)));
        }
        if let Some(report) = battle.failure() {
            cl.push(Line::from(format!(" {}", report.reason)));
        }
        push_command(&mut cl, "r", "もう一度", true, RESTART);
    } else if !battle.is_player_turn() {
        let thinking = battle.gsm().state().phase == GamePhase::AiThinking;
        cl.push(Line::from(Span::styled(
            if thinking { " 敵が考えている…" } else { " 敵の行動中" },
            Style::default().fg(Color::Red),
        )));
    } else {
        let selected = battle.selected_unit();
        let can_act = selected.is_some_and(|u| !u.has_acted);
        push_command(&mut cl, "space", "選択 / 移動", true, SELECT);
        push_command(&mut cl, "a", "攻撃", can_act, ATTACK);
        if let Some(unit) = selected {
            let skills = battle.learned_skills(&unit.id);
            for (slot, skill) in skills.iter().take(SKILL_SLOTS as usize).enumerate() {
                let data = unit.skill_data.as_ref();
                let cooldown = data.map_or(0, |d| d.cooldown(skill.id));
                let ready = can_act && cooldown == 0 && unit.current_mp >= skill.mp_cost;
                let label = if cooldown > 0 {
                    format!("{} MP{} (あと{cooldown})", skill.name, skill.mp_cost)
                } else {
                    format!("{} MP{}", skill.name, skill.mp_cost)
                };
                push_command(&mut cl, &(slot + 1).to_string(), &label, ready, SKILL_BASE + slot as u16);
            }
        }
        push_command(&mut cl, "w", "待機", can_act, WAIT);
        push_command(&mut cl, "e", "ターン終了", true, END_TURN);
        push_command(&mut cl, "x", "キャンセル", selected.is_some(), CANCEL);
        if battle.can_claim_victory() {
            push_command(&mut cl, "v", "勝利宣言", true, CLAIM_VICTORY);
        }
    }

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(" コマンド ");
    {
        let mut cs = click_state.borrow_mut();
        cl.register_targets(area, &mut cs, 1, 1, 0);
    }
    f.render_widget(Paragraph::new(cl.into_lines()).block(block), area);
}

fn render_objectives(battle: &Battle, f: &mut Frame, area: Rect) {
    let lines: Vec<Line> = battle
        .victory()
        .objectives()
        .iter()
        .map(|o| {
            let mark = if o.is_complete { "✔" } else { "・" };
            let color = match (o.is_complete, o.is_required) {
                (true, _) => Color::Green,
                (false, true) => Color::White,
                (false, false) => Color::DarkGray,
            };
            Line::from(Span::styled(
                format!(" {mark}{} ({}/{})", o.description, o.progress.current, o.progress.target),
                Style::default().fg(color),
            ))
        })
        .collect();
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(" 目標 ");
    f.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_log(battle: &Battle, f: &mut Frame, area: Rect) {
    let visible_height = area.height.saturating_sub(2) as usize;
    let lines: Vec<Line> = battle
        .log()
        .iter()
        .rev()
        .take(visible_height)
        .enumerate()
        .map(|(i, entry)| {
            let color = if i == 0 { Color::White } else { Color::DarkGray };
            Line::from(Span::styled(format!(" {entry}"), Style::default().fg(color)))
        })
        .collect();
    let widget = Paragraph::new(lines)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Blue))
                .title(" Log "),
        )
        .wrap(Wrap { trim: false });
    f.render_widget(widget, area);
}
