//! Session item pools.
//!
//! The item family produces a pool of treasure contents per session. Level
//! content generation then draws treasure rooms from that pool and falls back
//! to the configured balancer for every other room type.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use std::sync::Arc;

use dungeon_core::{ContentBalancer, RoomContent, RoomType, WeightVector};

/// Treasure tiers the pool is built from, as target balances
const ITEM_TIERS: [f64; 6] = [5.0, 10.0, 20.0, 35.0, 50.0, 80.0];

/// Build a shuffled pool of `size` treasure contents
pub fn build_item_pool(balancer: &dyn ContentBalancer, seed: u64, size: usize) -> Vec<RoomContent> {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let mut pool: Vec<RoomContent> = (0..size)
        .map(|i| {
            let target = WeightVector::with_balance(ITEM_TIERS[i % ITEM_TIERS.len()]);
            balancer.fit(&target, RoomType::Treasure)
        })
        .collect();
    pool.shuffle(&mut rng);
    pool
}

/// Treasure rooms take the pool item nearest their weight
pub struct ItemPoolBalancer {
    pool: Vec<RoomContent>,
    fallback: Arc<dyn ContentBalancer>,
}

impl ItemPoolBalancer {
    pub fn new(pool: Vec<RoomContent>, fallback: Arc<dyn ContentBalancer>) -> Self {
        Self { pool, fallback }
    }

    fn nearest(&self, target: &WeightVector) -> Option<&RoomContent> {
        let wanted = target.balance();
        self.pool.iter().min_by(|a, b| {
            let da = (a.weight.balance() - wanted).abs();
            let db = (b.weight.balance() - wanted).abs();
            da.total_cmp(&db)
        })
    }
}

impl ContentBalancer for ItemPoolBalancer {
    fn fit(&self, target: &WeightVector, room_type: RoomType) -> RoomContent {
        if room_type == RoomType::Treasure {
            if let Some(item) = self.nearest(target) {
                return item.clone();
            }
        }
        self.fallback.fit(target, room_type)
    }
}
