//! Grid primitives: points, directions, rectangles and per-cell state.

use serde::{Deserialize, Serialize};

use crate::room::RoomType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn manhattan(&self, other: Point) -> u32 {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y)
    }

    pub fn step(&self, dir: Direction) -> Point {
        let (dx, dy) = dir.delta();
        Point::new(self.x + dx, self.y + dy)
    }

    /// Direction that leads from `self` to an orthogonally adjacent `other`
    pub fn direction_to(&self, other: Point) -> Option<Direction> {
        Direction::ALL.into_iter().find(|d| self.step(*d) == other)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    North,
    East,
    South,
    West,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::North,
        Direction::East,
        Direction::South,
        Direction::West,
    ];

    pub fn delta(self) -> (i32, i32) {
        match self {
            Direction::North => (0, -1),
            Direction::East => (1, 0),
            Direction::South => (0, 1),
            Direction::West => (-1, 0),
        }
    }

    pub fn opposite(self) -> Direction {
        match self {
            Direction::North => Direction::South,
            Direction::East => Direction::West,
            Direction::South => Direction::North,
            Direction::West => Direction::East,
        }
    }

    fn bit(self) -> u8 {
        match self {
            Direction::North => 0b0001,
            Direction::East => 0b0010,
            Direction::South => 0b0100,
            Direction::West => 0b1000,
        }
    }
}

/// Axis-aligned rectangle in level coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> usize {
        (self.width.max(0) * self.height.max(0)) as usize
    }

    pub fn min_side(&self) -> i32 {
        self.width.min(self.height)
    }

    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.x && p.y >= self.y && p.x < self.x + self.width && p.y < self.y + self.height
    }

    /// Row-major index of `p` inside the rectangle
    pub fn index_of(&self, p: Point) -> Option<usize> {
        if !self.contains(p) {
            return None;
        }
        Some(((p.y - self.y) * self.width + (p.x - self.x)) as usize)
    }

    pub fn point_at(&self, index: usize) -> Point {
        let i = index as i32;
        Point::new(self.x + i % self.width, self.y + i / self.width)
    }

    /// All points, row-major
    pub fn points(&self) -> impl Iterator<Item = Point> + '_ {
        (0..self.area()).map(move |i| self.point_at(i))
    }

    pub fn right(&self) -> i32 {
        self.x + self.width - 1
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height - 1
    }
}

/// A single dungeon cell.
///
/// `steps_from_start` is assigned once on first visit and never changes.
/// `links` records which neighbours are connected by a walker step; the
/// link back to the cell the walker came from is `parent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSection {
    pub point: Point,
    pub visited: bool,
    pub dead_end: bool,
    pub crossroad: bool,
    pub steps_from_start: Option<u32>,
    pub room_type: RoomType,
    pub parent: Option<Direction>,
    pub glyph: char,
    links: u8,
}

impl GridSection {
    pub fn new(point: Point) -> Self {
        Self {
            point,
            visited: false,
            dead_end: false,
            crossroad: false,
            steps_from_start: None,
            room_type: RoomType::Normal,
            parent: None,
            glyph: ' ',
            links: 0,
        }
    }

    /// Mark visited; the first visit fixes `steps_from_start`
    pub fn visit(&mut self, steps: u32, parent: Option<Direction>) -> bool {
        if self.visited {
            return false;
        }
        self.visited = true;
        self.steps_from_start = Some(steps);
        self.parent = parent;
        if let Some(dir) = parent {
            self.link(dir);
        }
        true
    }

    pub fn link(&mut self, dir: Direction) {
        self.links |= dir.bit();
    }

    pub fn is_linked(&self, dir: Direction) -> bool {
        self.links & dir.bit() != 0
    }

    pub fn linked_directions(&self) -> impl Iterator<Item = Direction> + '_ {
        Direction::ALL.into_iter().filter(|d| self.is_linked(*d))
    }

    /// Links leading away from the parent
    pub fn forward_branches(&self) -> usize {
        self.linked_directions()
            .filter(|d| Some(*d) != self.parent)
            .count()
    }

    pub fn refresh_glyph(&mut self) {
        self.glyph = if !self.visited {
            ' '
        } else if self.dead_end && self.room_type == RoomType::Normal {
            ','
        } else {
            self.room_type.glyph()
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manhattan() {
        assert_eq!(Point::new(0, 0).manhattan(Point::new(9, 9)), 18);
        assert_eq!(Point::new(-2, 3).manhattan(Point::new(1, 3)), 3);
    }

    #[test]
    fn test_direction_roundtrip() {
        let p = Point::new(4, 4);
        for dir in Direction::ALL {
            let q = p.step(dir);
            assert_eq!(p.direction_to(q), Some(dir));
            assert_eq!(q.step(dir.opposite()), p);
        }
        assert_eq!(p.direction_to(Point::new(6, 4)), None);
    }

    #[test]
    fn test_rect_indexing() {
        let r = Rect::new(10, 20, 3, 2);
        assert_eq!(r.area(), 6);
        assert_eq!(r.index_of(Point::new(10, 20)), Some(0));
        assert_eq!(r.index_of(Point::new(12, 21)), Some(5));
        assert_eq!(r.index_of(Point::new(13, 21)), None);
        for (i, p) in r.points().enumerate() {
            assert_eq!(r.index_of(p), Some(i));
        }
        assert_eq!(r.right(), 12);
        assert_eq!(r.bottom(), 21);
    }

    #[test]
    fn test_first_visit_wins() {
        let mut cell = GridSection::new(Point::new(1, 1));
        assert!(cell.visit(3, Some(Direction::West)));
        assert!(!cell.visit(1, None));
        assert_eq!(cell.steps_from_start, Some(3));
        assert!(cell.is_linked(Direction::West));
        assert_eq!(cell.forward_branches(), 0);
        cell.link(Direction::East);
        assert_eq!(cell.forward_branches(), 1);
    }

    #[test]
    fn test_glyphs() {
        let mut cell = GridSection::new(Point::new(0, 0));
        cell.refresh_glyph();
        assert_eq!(cell.glyph, ' ');
        cell.visit(0, None);
        cell.dead_end = true;
        cell.refresh_glyph();
        assert_eq!(cell.glyph, ',');
        cell.room_type = RoomType::Treasure;
        cell.refresh_glyph();
        assert_eq!(cell.glyph, '$');
    }
}
