//! Clusters - independently generatable rectangles of the level grid.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::grid::{GridSection, Point, Rect};
use crate::room::RoomType;
use crate::walker::Walker;
use crate::weight::WeightVector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClusterId(pub u32);

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Everything needed to generate one cluster, produced by `LevelPlan`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSpec {
    pub id: ClusterId,
    pub rect: Rect,
    pub start: Point,
    pub end: Point,
    pub expected_weight: WeightVector,
    pub depth: u32,
    pub seed: u64,
}

impl ClusterSpec {
    /// Fresh seed for a retry; attempt 0 is the base seed
    pub fn attempt_seed(&self, attempt: u32) -> u64 {
        if attempt == 0 {
            return self.seed;
        }
        // splitmix64 step keyed by the attempt number
        let mut z = self
            .seed
            .wrapping_add(0x9E37_79B9_7F4A_7C15u64.wrapping_mul(attempt as u64));
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }
}

/// Running state of a cluster while walkers fill it
#[derive(Debug, Clone)]
pub struct Cluster {
    pub id: ClusterId,
    pub rect: Rect,
    pub start: Point,
    pub end: Point,
    pub size: usize,
    pub negative_rooms_count: usize,
    pub dead_ends: Vec<Point>,
    pub walkers: Vec<Walker>,
    pub expected_weight: WeightVector,
    pub current_weight: WeightVector,
}

impl Cluster {
    pub fn from_spec(spec: &ClusterSpec) -> Self {
        Self {
            id: spec.id,
            rect: spec.rect,
            start: spec.start,
            end: spec.end,
            size: 0,
            negative_rooms_count: 0,
            dead_ends: Vec::new(),
            walkers: Vec::new(),
            expected_weight: spec.expected_weight,
            current_weight: WeightVector::ZERO,
        }
    }

    pub fn area(&self) -> usize {
        self.rect.area()
    }

    pub fn density(&self) -> f64 {
        let area = self.area();
        if area == 0 {
            0.0
        } else {
            self.size as f64 / area as f64
        }
    }

    pub fn has_small_side(&self, min_side: i32) -> bool {
        self.rect.min_side() < min_side
    }

    pub fn is_small_cluster(&self, min_side: i32) -> bool {
        self.area() < (min_side * min_side) as usize
    }

    pub fn has_dead_ends(&self) -> bool {
        !self.dead_ends.is_empty()
    }

    pub fn has_negative_rooms(&self) -> bool {
        self.negative_rooms_count > 0
    }

    pub fn is_filled(&self) -> bool {
        self.size >= self.area()
    }

    /// Balance left until the running weight reaches the expected one (signed)
    pub fn deviation(&self) -> f64 {
        self.current_weight.balance() - self.expected_weight.balance()
    }

    /// Account for a newly placed room
    pub fn place_room(&mut self, room_type: RoomType, weight: WeightVector) {
        self.size += 1;
        if room_type.is_negative() {
            self.negative_rooms_count += 1;
        }
        self.current_weight = self.current_weight + weight;
    }

    /// Swap a previously placed room for another type
    pub fn replace_room(
        &mut self,
        old: RoomType,
        old_weight: WeightVector,
        new: RoomType,
        new_weight: WeightVector,
    ) {
        if old.is_negative() {
            self.negative_rooms_count = self.negative_rooms_count.saturating_sub(1);
        }
        if new.is_negative() {
            self.negative_rooms_count += 1;
        }
        self.current_weight = self.current_weight - old_weight + new_weight;
    }
}

/// A finished cluster, ready to be published to the assembler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedCluster {
    pub id: ClusterId,
    pub rect: Rect,
    pub start: Point,
    pub end: Point,
    /// Row-major cells of `rect`
    pub cells: Vec<GridSection>,
    pub net_weight: WeightVector,
    pub expected_weight: WeightVector,
    pub dead_ends: Vec<Point>,
    pub negative_rooms_count: usize,
    pub walker_count: usize,
    pub seed: u64,
    pub attempts: u32,
    /// Running balance after every room placement or replacement
    pub weight_trace: Vec<f64>,
}

impl GeneratedCluster {
    pub fn section(&self, p: Point) -> Option<&GridSection> {
        self.rect.index_of(p).and_then(|i| self.cells.get(i))
    }

    pub fn visited_count(&self) -> usize {
        self.cells.iter().filter(|c| c.visited).count()
    }

    pub fn count_rooms(&self, room_type: RoomType) -> usize {
        self.cells.iter().filter(|c| c.room_type == room_type).count()
    }

    pub fn balance(&self) -> f64 {
        self.net_weight.balance()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ClusterSpec {
        ClusterSpec {
            id: ClusterId(3),
            rect: Rect::new(0, 0, 10, 3),
            start: Point::new(0, 0),
            end: Point::new(9, 2),
            expected_weight: WeightVector::with_balance(-40.0),
            depth: 1,
            seed: 99,
        }
    }

    #[test]
    fn test_predicates() {
        let mut c = Cluster::from_spec(&spec());
        assert!(c.has_small_side(4));
        assert!(!c.is_small_cluster(4));
        assert!(!c.has_dead_ends());
        assert_eq!(c.density(), 0.0);

        c.place_room(RoomType::Normal, WeightVector::ZERO);
        c.place_room(RoomType::Monster, RoomType::Monster.base_weight());
        assert_eq!(c.size, 2);
        assert!(c.has_negative_rooms());
        assert!((c.density() - 2.0 / 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_replace_decrements_negative_rooms() {
        let mut c = Cluster::from_spec(&spec());
        let m = RoomType::Monster.base_weight();
        let t = RoomType::Treasure.base_weight();
        c.place_room(RoomType::Monster, m);
        c.replace_room(RoomType::Monster, m, RoomType::Treasure, t);
        assert_eq!(c.negative_rooms_count, 0);
        assert!((c.current_weight.balance() - t.balance()).abs() < 1e-9);

        // never underflows
        c.replace_room(RoomType::Monster, m, RoomType::Normal, WeightVector::ZERO);
        assert_eq!(c.negative_rooms_count, 0);
    }

    #[test]
    fn test_deviation_against_budget() {
        let mut c = Cluster::from_spec(&spec());
        assert!((c.deviation() - 40.0).abs() < 1e-9);
        c.place_room(RoomType::Monster, RoomType::Monster.base_weight());
        c.place_room(RoomType::Monster, RoomType::Monster.base_weight());
        assert!(c.deviation().abs() < 1e-9);
    }

    #[test]
    fn test_attempt_seeds_differ() {
        let s = spec();
        assert_eq!(s.attempt_seed(0), 99);
        assert_ne!(s.attempt_seed(1), s.attempt_seed(0));
        assert_ne!(s.attempt_seed(1), s.attempt_seed(2));
    }
}
