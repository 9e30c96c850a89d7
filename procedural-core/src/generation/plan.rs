//! Level partitioning into clusters.
//!
//! The level is tiled row by row with cluster rectangles; rows alternate
//! direction (boustrophedon) so every cluster shares a border with the next
//! one. Each pair of consecutive clusters gets a connection point on that
//! border, and the level weight budget is split in proportion to area.

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{ClusterGenerator, LevelSeed};
use crate::cluster::{ClusterId, ClusterSpec, GeneratedCluster};
use crate::config::GenerationConfig;
use crate::error::GenerationError;
use crate::grid::{Point, Rect};
use crate::level::Level;
use crate::walker::WalkerIds;
use crate::weight::WeightVector;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelPlan {
    pub seed: LevelSeed,
    pub width: i32,
    pub height: i32,
    /// In traversal order; `clusters[i].end` touches `clusters[i + 1].start`
    pub clusters: Vec<ClusterSpec>,
    pub expected_weight: WeightVector,
}

impl LevelPlan {
    pub fn partition(config: &GenerationConfig, seed: LevelSeed) -> Result<Self, GenerationError> {
        config.validate()?;
        let (width, height) = (config.level_width, config.level_height);
        let (cw, ch) = (config.cluster_width, config.cluster_height);
        let cols = (width + cw - 1) / cw;
        let rows = (height + ch - 1) / ch;

        let mut rects = Vec::with_capacity((cols * rows) as usize);
        for row in 0..rows {
            let y = row * ch;
            let h = ch.min(height - y);
            let mut line: Vec<Rect> = (0..cols)
                .map(|col| {
                    let x = col * cw;
                    Rect::new(x, y, cw.min(width - x), h)
                })
                .collect();
            if row % 2 == 1 {
                line.reverse();
            }
            rects.extend(line);
        }

        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed.plan_seed());
        let mut starts = vec![Point::new(0, 0); rects.len()];
        let mut ends = vec![Point::new(0, 0); rects.len()];
        for i in 0..rects.len().saturating_sub(1) {
            let (a, b) = (rects[i], rects[i + 1]);
            let (end, start) = connection_points(a, b, &mut rng)?;
            ends[i] = end;
            starts[i + 1] = start;
        }
        if let Some(last) = rects.last() {
            let i = rects.len() - 1;
            ends[i] = farthest_point(last, starts[i]);
        }

        let total_area: usize = rects.iter().map(|r| r.area()).sum();
        let level_balance = config.level_balance(seed.depth);
        let clusters = rects
            .iter()
            .enumerate()
            .map(|(i, rect)| {
                let id = ClusterId(i as u32);
                let share = rect.area() as f64 / total_area.max(1) as f64;
                ClusterSpec {
                    id,
                    rect: *rect,
                    start: starts[i],
                    end: ends[i],
                    expected_weight: WeightVector::with_balance(level_balance * share),
                    depth: seed.depth,
                    seed: seed.cluster_seed(id),
                }
            })
            .collect::<Vec<_>>();

        debug!(
            depth = seed.depth,
            clusters = clusters.len(),
            balance = level_balance,
            "level partitioned"
        );
        Ok(Self {
            seed,
            width,
            height,
            clusters,
            expected_weight: WeightVector::with_balance(level_balance),
        })
    }

    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    pub fn spec(&self, id: ClusterId) -> Option<&ClusterSpec> {
        self.clusters.iter().find(|c| c.id == id)
    }

    pub fn start(&self) -> Point {
        self.clusters.first().map(|c| c.start).unwrap_or_default()
    }

    pub fn end(&self) -> Point {
        self.clusters.last().map(|c| c.end).unwrap_or_default()
    }

    pub fn bounds(&self) -> Rect {
        Rect::new(0, 0, self.width, self.height)
    }

    /// Fill every cluster on the rayon pool and stitch the result.
    /// Used where no session orchestration is wanted (CLI offline mode, benches).
    pub fn generate_parallel(
        &self,
        config: &GenerationConfig,
        ids: &WalkerIds,
    ) -> Result<Level, GenerationError> {
        let generator = ClusterGenerator::new(config.clone());
        let clusters = self
            .clusters
            .par_iter()
            .map(|spec| generator.generate(spec, ids))
            .collect::<Result<Vec<GeneratedCluster>, _>>()?;
        let level = Level::assemble(self, clusters)?;
        info!(
            depth = self.seed.depth,
            rooms = level.rooms.len(),
            balance = level.net_weight.balance(),
            "level generated offline"
        );
        Ok(level)
    }
}

/// Pick the adjacent pair of cells `(a_end, b_start)` on the shared border
fn connection_points(
    a: Rect,
    b: Rect,
    rng: &mut Xoshiro256PlusPlus,
) -> Result<(Point, Point), GenerationError> {
    if a.y == b.y && (b.x == a.right() + 1 || a.x == b.right() + 1) {
        let lo = a.y.max(b.y);
        let hi = a.bottom().min(b.bottom());
        let y = rng.gen_range(lo..=hi);
        if b.x > a.x {
            Ok((Point::new(a.right(), y), Point::new(b.x, y)))
        } else {
            Ok((Point::new(a.x, y), Point::new(b.right(), y)))
        }
    } else if b.y == a.bottom() + 1 {
        let lo = a.x.max(b.x);
        let hi = a.right().min(b.right());
        if lo > hi {
            return Err(GenerationError::InvalidPlan(format!(
                "clusters at ({}, {}) and ({}, {}) share no border",
                a.x, a.y, b.x, b.y
            )));
        }
        let x = rng.gen_range(lo..=hi);
        Ok((Point::new(x, a.bottom()), Point::new(x, b.y)))
    } else {
        Err(GenerationError::InvalidPlan(format!(
            "clusters at ({}, {}) and ({}, {}) are not adjacent",
            a.x, a.y, b.x, b.y
        )))
    }
}

fn farthest_point(rect: &Rect, from: Point) -> Point {
    let corners = [
        Point::new(rect.x, rect.y),
        Point::new(rect.right(), rect.y),
        Point::new(rect.x, rect.bottom()),
        Point::new(rect.right(), rect.bottom()),
    ];
    corners
        .into_iter()
        .max_by_key(|p| p.manhattan(from))
        .unwrap_or(from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_default_plan_tiles_level() {
        let plan = LevelPlan::partition(&GenerationConfig::default(), LevelSeed::new(1, 1)).unwrap();
        assert_eq!(plan.cluster_count(), 4);

        let mut covered = HashSet::new();
        for spec in &plan.clusters {
            for p in spec.rect.points() {
                assert!(covered.insert(p), "{p:?} covered twice");
            }
        }
        assert_eq!(covered.len(), 400);
        assert_eq!(plan.start(), Point::new(0, 0));
    }

    #[test]
    fn test_consecutive_clusters_are_connected() {
        let config = GenerationConfig {
            level_width: 23,
            level_height: 17,
            cluster_width: 6,
            cluster_height: 5,
            ..Default::default()
        };
        let plan = LevelPlan::partition(&config, LevelSeed::new(9, 2)).unwrap();
        for pair in plan.clusters.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            assert!(a.rect.contains(a.end));
            assert!(b.rect.contains(b.start));
            assert_eq!(a.end.manhattan(b.start), 1, "{} -> {}", a.id, b.id);
        }
    }

    #[test]
    fn test_budget_split_by_area() {
        let config = GenerationConfig {
            level_width: 15,
            level_height: 10,
            level_base_balance: -150.0,
            ..Default::default()
        };
        let plan = LevelPlan::partition(&config, LevelSeed::new(3, 1)).unwrap();
        let total: f64 = plan.clusters.iter().map(|c| c.expected_weight.balance()).sum();
        assert!((total - -150.0).abs() < 1e-6);
        // 10x10 and 5x10 clusters
        assert!((plan.clusters[0].expected_weight.balance() - -100.0).abs() < 1e-6);
        assert!((plan.clusters[1].expected_weight.balance() - -50.0).abs() < 1e-6);
    }

    #[test]
    fn test_partition_is_deterministic() {
        let config = GenerationConfig::default();
        let a = LevelPlan::partition(&config, LevelSeed::new(77, 4)).unwrap();
        let b = LevelPlan::partition(&config, LevelSeed::new(77, 4)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_generate_parallel() {
        let config = GenerationConfig::default();
        let plan = LevelPlan::partition(&config, LevelSeed::new(5, 1)).unwrap();
        let level = plan.generate_parallel(&config, &WalkerIds::new()).unwrap();
        assert_eq!(level.rooms.len(), 400);
        assert_eq!(level.cluster_count, 4);
    }
}
