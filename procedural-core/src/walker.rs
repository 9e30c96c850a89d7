//! Walkers - traversal cursors that fill a cluster one cell at a time.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::grid::{Direction, Point};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WalkerId(pub u64);

/// Source of walker identities.
///
/// Owned by whoever runs generation (the orchestrator, a bench, a test) and
/// shared by cloning; every clone draws from the same counter, so ids stay
/// unique across concurrently running clusters.
#[derive(Debug, Clone, Default)]
pub struct WalkerIds {
    next: Arc<AtomicU64>,
}

impl WalkerIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> WalkerId {
        WalkerId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// Number of ids handed out so far
    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Walker {
    pub id: WalkerId,
    pub position: Point,
    pub direction: Direction,
    pub steps_from_start: u32,
    pub came_from: Option<Point>,
    pub stalled: bool,
}

impl Walker {
    pub fn spawn(id: WalkerId, position: Point, direction: Direction, steps_from_start: u32) -> Self {
        Self {
            id,
            position,
            direction,
            steps_from_start,
            came_from: None,
            stalled: false,
        }
    }

    pub fn advance(&mut self, dir: Direction) -> Point {
        self.came_from = Some(self.position);
        self.position = self.position.step(dir);
        self.direction = dir;
        self.steps_from_start += 1;
        self.position
    }

    /// Move a stalled walker to a new branch point and resume
    pub fn relocate(&mut self, position: Point, steps_from_start: u32) {
        self.came_from = None;
        self.position = position;
        self.steps_from_start = steps_from_start;
        self.stalled = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_unique_across_threads() {
        let ids = WalkerIds::new();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ids = ids.clone();
                std::thread::spawn(move || (0..250).map(|_| ids.next_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for h in handles {
            for id in h.join().unwrap() {
                assert!(seen.insert(id), "duplicate walker id {id:?}");
            }
        }
        assert_eq!(seen.len(), 1000);
        assert_eq!(ids.issued(), 1000);
    }

    #[test]
    fn test_advance_and_relocate() {
        let mut w = Walker::spawn(WalkerId(7), Point::new(0, 0), Direction::East, 0);
        assert_eq!(w.advance(Direction::East), Point::new(1, 0));
        assert_eq!(w.advance(Direction::South), Point::new(1, 1));
        assert_eq!(w.steps_from_start, 2);
        assert_eq!(w.came_from, Some(Point::new(1, 0)));

        w.stalled = true;
        w.relocate(Point::new(0, 0), 0);
        assert!(!w.stalled);
        assert_eq!(w.came_from, None);
        assert_eq!(w.id, WalkerId(7));
    }
}
