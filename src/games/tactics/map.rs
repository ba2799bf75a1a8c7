//! Battle map and terrain.

use super::error::{ErrorKind, GameError, GameResult};
use super::unit::Position;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Terrain {
    Plain,
    Forest,
    Hill,
    Water,
    Wall,
}

impl Terrain {
    pub fn from_glyph(c: char) -> Option<Terrain> {
        match c {
            '.' => Some(Terrain::Plain),
            'f' => Some(Terrain::Forest),
            'h' => Some(Terrain::Hill),
            '~' => Some(Terrain::Water),
            '#' => Some(Terrain::Wall),
            _ => None,
        }
    }

    pub fn glyph(&self) -> char {
        match self {
            Terrain::Plain => '.',
            Terrain::Forest => 'f',
            Terrain::Hill => 'h',
            Terrain::Water => '~',
            Terrain::Wall => '#',
        }
    }

    /// Movement points to enter this tile. `None` = impassable.
    pub fn move_cost(&self) -> Option<u32> {
        match self {
            Terrain::Plain => Some(1),
            Terrain::Forest => Some(2),
            Terrain::Hill => Some(3),
            Terrain::Water | Terrain::Wall => None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Terrain::Plain => "平地",
            Terrain::Forest => "森",
            Terrain::Hill => "丘",
            Terrain::Water => "水",
            Terrain::Wall => "壁",
        }
    }

    /// Display color for this terrain.
    pub fn color(&self) -> ratzilla::ratatui::style::Color {
        use ratzilla::ratatui::style::Color;
        match self {
            Terrain::Plain => Color::DarkGray,
            Terrain::Forest => Color::Green,
            Terrain::Hill => Color::Yellow,
            Terrain::Water => Color::Blue,
            Terrain::Wall => Color::Gray,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BattleMap {
    pub width: i32,
    pub height: i32,
    /// Row-major [y][x].
    tiles: Vec<Vec<Terrain>>,
}

impl BattleMap {
    /// All-plain map.
    #[cfg(test)]
    pub fn open(width: i32, height: i32) -> Self {
        let w = width.max(0) as usize;
        let h = height.max(0) as usize;
        Self { width, height, tiles: vec![vec![Terrain::Plain; w]; h] }
    }

    /// Parse glyph rows. Rows must be non-empty and of equal width.
    pub fn from_rows<S: AsRef<str>>(rows: &[S]) -> GameResult<Self> {
        let invalid = |msg: String| GameError::new(ErrorKind::InvalidStageData, msg);
        if rows.is_empty() {
            return Err(invalid("map has no rows".into()));
        }
        let mut tiles = Vec::with_capacity(rows.len());
        for (y, row) in rows.iter().enumerate() {
            let parsed = row
                .as_ref()
                .chars()
                .enumerate()
                .map(|(x, c)| {
                    Terrain::from_glyph(c)
                        .ok_or_else(|| invalid(format!("unknown terrain '{c}' at ({x}, {y})")))
                })
                .collect::<GameResult<Vec<_>>>()?;
            tiles.push(parsed);
        }
        let width = tiles[0].len();
        if width == 0 || tiles.iter().any(|r| r.len() != width) {
            return Err(invalid("map rows must be non-empty and equally wide".into()));
        }
        Ok(Self { width: width as i32, height: tiles.len() as i32, tiles })
    }

    pub fn in_bounds(&self, pos: Position) -> bool {
        pos.x >= 0 && pos.y >= 0 && pos.x < self.width && pos.y < self.height
    }

    pub fn terrain(&self, pos: Position) -> Option<Terrain> {
        if !self.in_bounds(pos) {
            return None;
        }
        self.tiles.get(pos.y as usize)?.get(pos.x as usize).copied()
    }

    /// Cost to step onto `pos`; `None` when out of bounds or impassable.
    pub fn move_cost(&self, pos: Position) -> Option<u32> {
        self.terrain(pos)?.move_cost()
    }

    #[cfg(test)]
    pub fn set_terrain(&mut self, pos: Position, terrain: Terrain) {
        if self.in_bounds(pos) {
            self.tiles[pos.y as usize][pos.x as usize] = terrain;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rows() {
        let map = BattleMap::from_rows(&["..f", "h~#"]).unwrap();
        assert_eq!((map.width, map.height), (3, 2));
        assert_eq!(map.terrain(Position::new(2, 0)), Some(Terrain::Forest));
        assert_eq!(map.move_cost(Position::new(0, 1)), Some(3));
        assert_eq!(map.move_cost(Position::new(1, 1)), None);
        assert_eq!(map.move_cost(Position::new(5, 5)), None);
    }

    #[test]
    fn reject_bad_rows() {
        let err = BattleMap::from_rows(&["..", "."]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidStageData);
        let err = BattleMap::from_rows(&[".X"]).unwrap_err();
        assert!(err.message.contains("'X'"));
        assert!(BattleMap::from_rows::<&str>(&[]).is_err());
    }

    #[test]
    fn glyphs_round_trip() {
        for c in ['.', 'f', 'h', '~', '#'] {
            assert_eq!(Terrain::from_glyph(c).map(|t| t.glyph()), Some(c));
        }
    }

    #[test]
    fn negative_positions_are_out_of_bounds() {
        let map = BattleMap::open(3, 3);
        assert!(!map.in_bounds(Position::new(-1, 0)));
        assert!(map.in_bounds(Position::new(2, 2)));
    }
}
