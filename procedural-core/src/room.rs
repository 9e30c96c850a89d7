//! Room categories, their balance weights, and the content-balancing seam.

use serde::{Deserialize, Serialize};

use crate::weight::{WeightAxis, WeightVector};

/// Category assigned to every visited grid cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RoomType {
    #[default]
    Normal,
    Monster,
    Treasure,
    Shrine,
    Merchant,
}

impl RoomType {
    pub const ALL: [RoomType; 5] = [
        RoomType::Normal,
        RoomType::Monster,
        RoomType::Treasure,
        RoomType::Shrine,
        RoomType::Merchant,
    ];

    /// Balance weight at depth 1
    pub fn base_weight(self) -> WeightVector {
        match self {
            RoomType::Normal => WeightVector::ZERO,
            // net -20
            RoomType::Monster => WeightVector::from_pairs(&[
                (WeightAxis::HealthRatio, -12.0),
                (WeightAxis::Attack, -8.0),
                (WeightAxis::Dodge, -4.0),
                (WeightAxis::GoldBonus, 2.0),
                (WeightAxis::ExperienceBonus, 2.0),
            ]),
            // net +20
            RoomType::Treasure => WeightVector::from_pairs(&[
                (WeightAxis::GoldBonus, 12.0),
                (WeightAxis::Attack, 4.0),
                (WeightAxis::CriticalChance, 2.0),
                (WeightAxis::CriticalDamage, 2.0),
            ]),
            // net +10
            RoomType::Shrine => WeightVector::from_pairs(&[
                (WeightAxis::HealthRatio, 4.0),
                (WeightAxis::Mana, 3.0),
                (WeightAxis::Regeneration, 3.0),
            ]),
            // net +5
            RoomType::Merchant => WeightVector::from_pairs(&[
                (WeightAxis::GoldBonus, -6.0),
                (WeightAxis::Defense, 6.0),
                (WeightAxis::Accuracy, 5.0),
            ]),
        }
    }

    /// Weight scaled for dungeon depth (deeper rooms swing harder)
    pub fn weight_at(self, depth: u32) -> WeightVector {
        self.base_weight() * depth_factor(depth)
    }

    /// Rooms whose weight pulls the balance toward the dungeon
    pub fn is_negative(self) -> bool {
        self == RoomType::Monster
    }

    /// At most one of these per cluster
    pub fn is_exclusive(self) -> bool {
        matches!(self, RoomType::Shrine | RoomType::Merchant)
    }

    pub fn glyph(self) -> char {
        match self {
            RoomType::Normal => '.',
            RoomType::Monster => 'M',
            RoomType::Treasure => '$',
            RoomType::Shrine => '+',
            RoomType::Merchant => '&',
        }
    }
}

pub fn depth_factor(depth: u32) -> f64 {
    1.0 + 0.15 * depth.saturating_sub(1) as f64
}

/// Concrete content placed in a room (monster stats, treasure reward, shrine effect)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomContent {
    pub room_type: RoomType,
    pub name: String,
    pub weight: WeightVector,
}

/// Produces a content object whose weight approximates a target.
///
/// The optimizer behind this is external; generation only relies on it being a
/// pure function with bounded latency.
pub trait ContentBalancer: Send + Sync {
    fn fit(&self, target: &WeightVector, room_type: RoomType) -> RoomContent;
}

/// Balancer that picks a name from a fixed table and reuses the target weight verbatim
#[derive(Debug, Clone, Default)]
pub struct TableContentBalancer;

const MONSTER_NAMES: &[&str] = &["Goblin", "Skeleton", "Cave Spider", "Ghoul", "Wraith", "Ogre"];
const TREASURE_NAMES: &[&str] = &["Gold Pouch", "Iron Chest", "Gilded Coffer", "Dragon Hoard"];
const SHRINE_NAMES: &[&str] = &["Shrine of Vigor", "Shrine of Focus", "Shrine of Mending"];

impl TableContentBalancer {
    fn pick(table: &[&str], target: &WeightVector) -> String {
        let magnitude = target.norm();
        let idx = ((magnitude / 10.0) as usize).min(table.len().saturating_sub(1));
        table.get(idx).copied().unwrap_or("Unknown").to_string()
    }
}

impl ContentBalancer for TableContentBalancer {
    fn fit(&self, target: &WeightVector, room_type: RoomType) -> RoomContent {
        let name = match room_type {
            RoomType::Monster => Self::pick(MONSTER_NAMES, target),
            RoomType::Treasure => Self::pick(TREASURE_NAMES, target),
            RoomType::Shrine => Self::pick(SHRINE_NAMES, target),
            RoomType::Merchant => "Wandering Merchant".to_string(),
            RoomType::Normal => "Empty Hall".to_string(),
        };
        RoomContent {
            room_type,
            name,
            weight: *target,
        }
    }
}
