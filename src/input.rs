//! Input plumbing shared by the shell and the game: normalized events,
//! click target registry and pixel → cell conversion.

use ratzilla::ratatui::layout::Rect;

/// Keyboard and pointer input after normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    Key(char),
    /// A registered click target was hit; the id is game-defined.
    Click(u16),
}

#[derive(Debug, Clone)]
pub struct ClickTarget {
    /// Hit region in terminal cells.
    pub rect: Rect,
    pub action_id: u16,
}

/// Rebuilt on every frame by the renderer, read by the mouse handler.
pub struct ClickState {
    pub targets: Vec<ClickTarget>,
    pub terminal_cols: u16,
    pub terminal_rows: u16,
}

impl ClickState {
    pub fn new() -> Self {
        Self { targets: Vec::new(), terminal_cols: 0, terminal_rows: 0 }
    }

    pub fn clear_targets(&mut self) {
        self.targets.clear();
    }

    pub fn add_click_target(&mut self, rect: Rect, action_id: u16) {
        self.targets.push(ClickTarget { rect, action_id });
    }

    /// Full-width target on `row`, ignored when the row is outside `area`.
    pub fn add_row_target(&mut self, area: Rect, row: u16, action_id: u16) {
        if row >= area.y && row < area.y + area.height {
            self.add_click_target(Rect::new(area.x, row, area.width, 1), action_id);
        }
    }

    /// Later targets sit on top, so they win on overlap.
    pub fn hit_test(&self, col: u16, row: u16) -> Option<u16> {
        self.targets.iter().rev().find_map(|t| {
            let r = &t.rect;
            let inside = col >= r.x && col < r.x + r.width && row >= r.y && row < r.y + r.height;
            inside.then_some(t.action_id)
        })
    }
}

/// Below this width the map stacks above the panels.
pub fn is_narrow_layout(width: u16) -> bool {
    width < 60
}

/// Pixel offset inside the grid container → terminal row.
pub fn pixel_y_to_row(click_y: f64, grid_height: f64, terminal_rows: u16) -> Option<u16> {
    pixel_to_cell(click_y, grid_height, terminal_rows)
}

/// Pixel offset inside the grid container → terminal column.
pub fn pixel_x_to_col(click_x: f64, grid_width: f64, terminal_cols: u16) -> Option<u16> {
    pixel_to_cell(click_x, grid_width, terminal_cols)
}

fn pixel_to_cell(offset: f64, extent: f64, cells: u16) -> Option<u16> {
    if extent <= 0.0 || cells == 0 || offset < 0.0 {
        return None;
    }
    let cell = (offset / (extent / cells as f64)) as u16;
    (cell < cells).then_some(cell)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_target_wins() {
        let mut cs = ClickState::new();
        cs.add_click_target(Rect::new(0, 0, 10, 5), 1);
        cs.add_click_target(Rect::new(2, 2, 2, 1), 1002);
        assert_eq!(cs.hit_test(2, 2), Some(1002));
        assert_eq!(cs.hit_test(4, 2), Some(1));
        assert_eq!(cs.hit_test(10, 0), None);
    }

    #[test]
    fn map_cells_are_two_columns_wide() {
        let mut cs = ClickState::new();
        for x in 0..3u16 {
            cs.add_click_target(Rect::new(2 + x * 2, 1, 2, 1), 1000 + x);
        }
        assert_eq!(cs.hit_test(2, 1), Some(1000));
        assert_eq!(cs.hit_test(3, 1), Some(1000));
        assert_eq!(cs.hit_test(4, 1), Some(1001));
        assert_eq!(cs.hit_test(7, 1), Some(1002));
        assert_eq!(cs.hit_test(8, 1), None);
    }

    #[test]
    fn row_target_outside_area_is_dropped() {
        let mut cs = ClickState::new();
        let area = Rect::new(0, 5, 20, 3);
        cs.add_row_target(area, 4, 1);
        cs.add_row_target(area, 6, 2);
        assert_eq!(cs.targets.len(), 1);
        assert_eq!(cs.hit_test(19, 6), Some(2));
        cs.clear_targets();
        assert_eq!(cs.hit_test(19, 6), None);
    }

    #[test]
    fn narrow_threshold() {
        assert!(is_narrow_layout(59));
        assert!(!is_narrow_layout(60));
    }

    #[test]
    fn pixel_conversion() {
        assert_eq!(pixel_y_to_row(0.0, 400.0, 20), Some(0));
        assert_eq!(pixel_y_to_row(399.0, 400.0, 20), Some(19));
        assert_eq!(pixel_y_to_row(400.0, 400.0, 20), None);
        assert_eq!(pixel_y_to_row(-1.0, 400.0, 20), None);
        assert_eq!(pixel_x_to_col(25.0, 800.0, 80), Some(2));
        assert_eq!(pixel_x_to_col(5.0, 0.0, 80), None);
        assert_eq!(pixel_x_to_col(5.0, 800.0, 0), None);
    }

    #[test]
    fn click_pipeline_reaches_cell_target() {
        let mut cs = ClickState::new();
        cs.terminal_cols = 80;
        cs.terminal_rows = 24;
        cs.add_click_target(Rect::new(4, 3, 2, 1), 1013);
        // 10px x 20px cells
        let col = pixel_x_to_col(45.0, 800.0, cs.terminal_cols).unwrap();
        let row = pixel_y_to_row(65.0, 480.0, cs.terminal_rows).unwrap();
        assert_eq!(cs.hit_test(col, row), Some(1013));
    }
}
