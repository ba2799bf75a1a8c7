//! Line builder that keeps click targets attached to the rows they render on.

use ratzilla::ratatui::layout::Rect;
use ratzilla::ratatui::text::Line;

use crate::input::ClickState;

/// Lines for a `Paragraph`, some of which carry an action id.
///
/// ```ignore
/// let mut cl = ClickableList::new();
/// cl.push(Line::from("コマンド"));
/// cl.push_clickable(Line::from(" [w] 待機"), WAIT);
/// cl.register_targets(area, &mut cs, 1, 1, 0);
/// f.render_widget(Paragraph::new(cl.into_lines()).block(block), area);
/// ```
pub struct ClickableList<'a> {
    lines: Vec<Line<'a>>,
    /// `(line_index, action_id)`
    actions: Vec<(u16, u16)>,
}

impl<'a> ClickableList<'a> {
    pub fn new() -> Self {
        Self { lines: Vec::new(), actions: Vec::new() }
    }

    pub fn push(&mut self, line: Line<'a>) {
        self.lines.push(line);
    }

    pub fn push_clickable(&mut self, line: Line<'a>, action_id: u16) {
        self.actions.push((self.lines.len() as u16, action_id));
        self.lines.push(line);
    }

    pub fn into_lines(self) -> Vec<Line<'a>> {
        self.lines
    }

    /// One row per line, no wrapping. `top`/`bottom` are border rows,
    /// `scroll` the number of lines scrolled off the top.
    pub fn register_targets(&self, area: Rect, cs: &mut ClickState, top: u16, bottom: u16, scroll: u16) {
        let content_y = area.y + top;
        let content_end = area.y + area.height.saturating_sub(bottom);
        for &(line_idx, action_id) in &self.actions {
            if line_idx < scroll {
                continue;
            }
            let row = content_y + (line_idx - scroll);
            if row < content_end {
                cs.add_row_target(area, row, action_id);
            }
        }
    }
}
