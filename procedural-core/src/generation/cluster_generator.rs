//! Randomized walker fill for a single cluster.
//!
//! ## Algorithm
//! 1. Walkers spawn on the start connection point, heading for the end point.
//! 2. Each step a walker enters an unvisited neighbour, preferring the ones
//!    that shorten the Manhattan distance to the end point, with a random
//!    deviation chance so corridors bend. Ties are broken uniformly.
//! 3. Every entered cell gets a room type sampled from the category weights,
//!    restricted by per-cluster caps, shrine/merchant exclusivity and the
//!    signed balance range. When the running balance is ahead of the budget
//!    the positive types drop out of the pool, and vice versa.
//! 4. A walker with nowhere to go stalls and its cell is recorded as a dead
//!    end. A recorded dead end never regains an unvisited neighbour, so when
//!    every walker has stalled but cells remain, relocation backtracks from
//!    the latest dead ends along parent links to the first cell that can
//!    still branch. Crossroads, then any frontier cell, are the fallback.
//! 5. Once filled, leaf cells become dead ends and some are turned into
//!    treasure/shrine rooms when the cluster still owes the player rewards.
//!
//! Clusters with a side shorter than `min_cluster_side` skip all of this and
//! become a plain corridor of normal rooms.

use rand::distributions::{Distribution, WeightedIndex};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use tracing::{debug, trace, warn};

use crate::cluster::{Cluster, ClusterSpec, GeneratedCluster};
use crate::config::GenerationConfig;
use crate::error::GenerationError;
use crate::grid::{Direction, GridSection, Point, Rect};
use crate::room::RoomType;
use crate::walker::{Walker, WalkerIds};
use crate::weight::WeightVector;

#[derive(Debug, Clone, Copy, Default)]
struct RoomCounts {
    monsters: usize,
    treasures: usize,
    shrines: usize,
    merchants: usize,
}

impl RoomCounts {
    fn add(&mut self, room_type: RoomType) {
        match room_type {
            RoomType::Monster => self.monsters += 1,
            RoomType::Treasure => self.treasures += 1,
            RoomType::Shrine => self.shrines += 1,
            RoomType::Merchant => self.merchants += 1,
            RoomType::Normal => {}
        }
    }

    fn remove(&mut self, room_type: RoomType) {
        match room_type {
            RoomType::Monster => self.monsters = self.monsters.saturating_sub(1),
            RoomType::Treasure => self.treasures = self.treasures.saturating_sub(1),
            RoomType::Shrine => self.shrines = self.shrines.saturating_sub(1),
            RoomType::Merchant => self.merchants = self.merchants.saturating_sub(1),
            RoomType::Normal => {}
        }
    }
}

/// Dead ends searched when relocating a stalled walker
const RECENT_DEAD_ENDS: usize = 8;

/// Fills cluster rectangles
#[derive(Debug, Clone)]
pub struct ClusterGenerator {
    config: GenerationConfig,
}

impl ClusterGenerator {
    pub fn new(config: GenerationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Generate with retries and no interruption
    pub fn generate(
        &self,
        spec: &ClusterSpec,
        ids: &WalkerIds,
    ) -> Result<GeneratedCluster, GenerationError> {
        self.generate_until(spec, ids, || false)
    }

    /// Generate with up to `cluster_retries` fresh-seed retries.
    ///
    /// `should_stop` is polled every step; returning `true` aborts with
    /// `GenerationError::Interrupted`, which is never retried.
    pub fn generate_until<F>(
        &self,
        spec: &ClusterSpec,
        ids: &WalkerIds,
        should_stop: F,
    ) -> Result<GeneratedCluster, GenerationError>
    where
        F: Fn() -> bool,
    {
        let mut last_err = GenerationError::InvalidCluster {
            id: spec.id,
            reason: "no generation attempt was made".to_string(),
        };
        for attempt in 0..=self.config.cluster_retries {
            match self.generate_attempt(spec, ids, attempt, &should_stop) {
                Ok(cluster) => return Ok(cluster),
                Err(e) if e.is_retryable() => {
                    warn!(cluster = %spec.id, attempt, error = %e, "cluster attempt failed, retrying with a fresh seed");
                    last_err = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }

    /// A single attempt using `spec.attempt_seed(attempt)`
    pub fn generate_attempt<F>(
        &self,
        spec: &ClusterSpec,
        ids: &WalkerIds,
        attempt: u32,
        should_stop: &F,
    ) -> Result<GeneratedCluster, GenerationError>
    where
        F: Fn() -> bool,
    {
        validate_spec(spec)?;
        let seed = spec.attempt_seed(attempt);
        let mut fill = Fill::new(&self.config, spec, seed);

        let mut generated = if fill.cluster.has_small_side(self.config.min_cluster_side) {
            fill.carve_corridor(ids, should_stop)?;
            fill.finish()
        } else {
            fill.walk(ids, should_stop)?;
            fill.furnish_dead_ends();
            fill.check_convergence()?;
            fill.finish()
        };
        generated.attempts = attempt + 1;

        debug!(
            cluster = %generated.id,
            cells = generated.cells.len(),
            balance = generated.balance(),
            walkers = generated.walker_count,
            dead_ends = generated.dead_ends.len(),
            "cluster generated"
        );
        Ok(generated)
    }
}

fn validate_spec(spec: &ClusterSpec) -> Result<(), GenerationError> {
    let invalid = |reason: &str| {
        Err(GenerationError::InvalidCluster {
            id: spec.id,
            reason: reason.to_string(),
        })
    };
    if spec.rect.area() == 0 {
        return invalid("empty rectangle");
    }
    if !spec.rect.contains(spec.start) {
        return invalid("start point outside rectangle");
    }
    if !spec.rect.contains(spec.end) {
        return invalid("end point outside rectangle");
    }
    Ok(())
}

/// Working state of one attempt
struct Fill<'a> {
    config: &'a GenerationConfig,
    spec: &'a ClusterSpec,
    seed: u64,
    rng: Xoshiro256PlusPlus,
    cells: Vec<GridSection>,
    cluster: Cluster,
    counts: RoomCounts,
    max_monsters: usize,
    max_treasures: usize,
    crossroads: Vec<Point>,
    trace: Vec<f64>,
    walker_count: usize,
}

impl<'a> Fill<'a> {
    fn new(config: &'a GenerationConfig, spec: &'a ClusterSpec, seed: u64) -> Self {
        let area = spec.rect.area();
        Self {
            config,
            spec,
            seed,
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
            cells: spec.rect.points().map(GridSection::new).collect(),
            cluster: Cluster::from_spec(spec),
            counts: RoomCounts::default(),
            max_monsters: (area as f64 * config.monster_ratio).round() as usize,
            max_treasures: (area as f64 * config.treasure_ratio).round() as usize,
            crossroads: Vec::new(),
            trace: Vec::with_capacity(area),
            walker_count: 0,
        }
    }

    fn section(&self, p: Point) -> Option<&GridSection> {
        self.spec.rect.index_of(p).and_then(|i| self.cells.get(i))
    }

    fn section_mut(&mut self, p: Point) -> Option<&mut GridSection> {
        match self.spec.rect.index_of(p) {
            Some(i) => self.cells.get_mut(i),
            None => None,
        }
    }

    fn is_visited(&self, p: Point) -> bool {
        self.section(p).map(|c| c.visited).unwrap_or(false)
    }

    fn unvisited_neighbors(&self, p: Point) -> Vec<Direction> {
        Direction::ALL
            .into_iter()
            .filter(|d| matches!(self.section(p.step(*d)), Some(c) if !c.visited))
            .collect()
    }

    fn weight_of(&self, room_type: RoomType) -> WeightVector {
        room_type.weight_at(self.spec.depth)
    }

    fn within_caps(&self, room_type: RoomType) -> bool {
        match room_type {
            RoomType::Normal => true,
            RoomType::Monster => self.counts.monsters < self.max_monsters,
            RoomType::Treasure => self.counts.treasures < self.max_treasures,
            RoomType::Shrine => self.counts.shrines == 0,
            RoomType::Merchant => self.counts.merchants == 0,
        }
    }

    fn within_range(&self, balance: f64) -> bool {
        balance.abs() <= self.config.cluster_weight_range
    }

    fn record_trace(&mut self) {
        self.trace.push(self.cluster.current_weight.balance());
    }

    /// Pick a room type for a freshly entered cell
    fn sample_room(&mut self) -> RoomType {
        let current = self.cluster.current_weight.balance();
        let deviation = self.cluster.deviation();

        let allowed: Vec<RoomType> = RoomType::ALL
            .into_iter()
            .filter(|t| self.within_caps(*t))
            .filter(|t| self.within_range(current + self.weight_of(*t).balance()))
            .filter(|t| self.config.category_weights.weight_of(*t) > 0.0)
            .collect();

        // pull the walk back toward the budget
        let steered: Vec<RoomType> = allowed
            .iter()
            .copied()
            .filter(|t| {
                let b = self.weight_of(*t).balance();
                if deviation > 0.0 {
                    b <= 0.0
                } else if deviation < 0.0 {
                    b >= 0.0
                } else {
                    true
                }
            })
            .collect();
        let pool = if steered.is_empty() { allowed } else { steered };

        let weights: Vec<f64> = pool
            .iter()
            .map(|t| self.config.category_weights.weight_of(*t))
            .collect();
        match WeightedIndex::new(&weights) {
            Ok(dist) => pool[dist.sample(&mut self.rng)],
            Err(_) => RoomType::Normal,
        }
    }

    /// Mark `p` visited and give it a room
    fn enter(&mut self, p: Point, steps: u32, parent: Option<Direction>) {
        let fresh = match self.section_mut(p) {
            Some(cell) => cell.visit(steps, parent),
            None => false,
        };
        if !fresh {
            return;
        }

        if self.unvisited_neighbors(p).len() >= 3 {
            if let Some(cell) = self.section_mut(p) {
                cell.crossroad = true;
            }
            self.crossroads.push(p);
        }

        let room_type = if p == self.spec.start || p == self.spec.end {
            RoomType::Normal
        } else {
            self.sample_room()
        };
        let weight = self.weight_of(room_type);
        if let Some(cell) = self.section_mut(p) {
            cell.room_type = room_type;
        }
        self.counts.add(room_type);
        self.cluster.place_room(room_type, weight);
        self.record_trace();
        trace!(cluster = %self.spec.id, x = p.x, y = p.y, ?room_type, "room placed");
    }

    /// Step from `from` toward `dir`, linking both cells
    fn open(&mut self, from: Point, dir: Direction, steps: u32) -> Point {
        let to = from.step(dir);
        if let Some(cell) = self.section_mut(from) {
            cell.link(dir);
        }
        self.enter(to, steps, Some(dir.opposite()));
        to
    }

    fn heading_toward_end(&self, from: Point) -> Direction {
        let end = self.spec.end;
        Direction::ALL
            .into_iter()
            .filter(|d| self.spec.rect.contains(from.step(*d)))
            .min_by_key(|d| from.step(*d).manhattan(end))
            .unwrap_or(Direction::East)
    }

    fn spawn_walkers(&mut self, ids: &WalkerIds) {
        let area = self.cluster.area();
        let mut count = self.config.base_walkers;
        if !self.cluster.has_small_side(self.config.min_cluster_side)
            && self.config.cells_per_extra_walker > 0
        {
            count += area / self.config.cells_per_extra_walker;
        }
        let count = count.clamp(1, self.config.max_walkers.max(1));

        let start = self.spec.start;
        let heading = self.heading_toward_end(start);
        for _ in 0..count {
            self.cluster
                .walkers
                .push(Walker::spawn(ids.next_id(), start, heading, 0));
        }
        self.walker_count = count;
    }

    fn choose_direction(&mut self, walker: usize) -> Option<Direction> {
        let (pos, heading) = {
            let w = &self.cluster.walkers[walker];
            (w.position, w.direction)
        };
        let candidates = self.unvisited_neighbors(pos);
        if candidates.is_empty() {
            return None;
        }

        let end = self.spec.end;
        if !self.is_visited(end) {
            let here = pos.manhattan(end);
            let closer: Vec<Direction> = candidates
                .iter()
                .copied()
                .filter(|d| pos.step(*d).manhattan(end) < here)
                .collect();
            if !closer.is_empty() && !self.rng.gen_bool(self.config.deviation_chance) {
                return closer.choose(&mut self.rng).copied();
            }
        } else if candidates.contains(&heading) && self.rng.gen_bool(self.config.straight_bias) {
            return Some(heading);
        }
        candidates.choose(&mut self.rng).copied()
    }

    /// Nearest ancestor with an unvisited neighbour, found by walking parent
    /// links back from the most recently recorded dead ends
    fn branch_behind_dead_ends(&self) -> Option<Point> {
        for &dead_end in self.cluster.dead_ends.iter().rev().take(RECENT_DEAD_ENDS) {
            let mut p = dead_end;
            loop {
                if !self.unvisited_neighbors(p).is_empty() {
                    return Some(p);
                }
                match self.section(p).and_then(|c| c.parent) {
                    Some(dir) => p = p.step(dir),
                    None => break,
                }
            }
        }
        None
    }

    /// Move one stalled walker to a cell that can still branch: behind a
    /// recorded dead end first, then a crossroad, then any frontier cell
    fn relocate(&mut self) -> Result<(), GenerationError> {
        self.crossroads
            .retain(|p| !Self::frontier_of(&self.cells, &self.spec.rect, *p).is_empty());

        let behind = self.branch_behind_dead_ends();
        let target = match behind.or_else(|| self.crossroads.choose(&mut self.rng).copied()) {
            Some(p) => Some(p),
            None => {
                let frontier: Vec<Point> = self
                    .cells
                    .iter()
                    .filter(|c| c.visited)
                    .map(|c| c.point)
                    .filter(|p| !self.unvisited_neighbors(*p).is_empty())
                    .collect();
                frontier.choose(&mut self.rng).copied()
            }
        };

        let Some(target) = target else {
            return Err(GenerationError::IncompleteCoverage {
                id: self.spec.id,
                unvisited: self.cluster.area() - self.cluster.size,
            });
        };
        let steps = self
            .section(target)
            .and_then(|c| c.steps_from_start)
            .unwrap_or(0);

        match self.cluster.walkers.iter_mut().find(|w| w.stalled) {
            Some(walker) => {
                trace!(cluster = %self.spec.id, walker = walker.id.0, x = target.x, y = target.y, "walker relocated");
                walker.relocate(target, steps);
            }
            None => {
                return Err(GenerationError::InvalidCluster {
                    id: self.spec.id,
                    reason: "relocation requested with no stalled walker".to_string(),
                })
            }
        }
        Ok(())
    }

    fn frontier_of(cells: &[GridSection], rect: &Rect, p: Point) -> Vec<Direction> {
        Direction::ALL
            .into_iter()
            .filter(|d| {
                rect.index_of(p.step(*d))
                    .and_then(|i| cells.get(i))
                    .map(|c| !c.visited)
                    .unwrap_or(false)
            })
            .collect()
    }

    fn walk<F>(&mut self, ids: &WalkerIds, should_stop: &F) -> Result<(), GenerationError>
    where
        F: Fn() -> bool,
    {
        let budget = self.cluster.area() * self.config.step_budget_factor;
        self.enter(self.spec.start, 0, None);
        self.spawn_walkers(ids);

        let mut rounds = 0usize;
        while !self.cluster.is_filled() {
            if should_stop() {
                return Err(GenerationError::Interrupted(self.spec.id));
            }
            rounds += 1;
            if rounds > budget {
                return Err(GenerationError::StepBudgetExhausted {
                    id: self.spec.id,
                    budget,
                });
            }

            let mut progressed = false;
            for i in 0..self.cluster.walkers.len() {
                if self.cluster.is_filled() {
                    break;
                }
                if self.cluster.walkers[i].stalled {
                    continue;
                }
                match self.choose_direction(i) {
                    Some(dir) => {
                        let from = self.cluster.walkers[i].position;
                        let steps = self.cluster.walkers[i].steps_from_start + 1;
                        self.cluster.walkers[i].advance(dir);
                        self.open(from, dir, steps);
                        progressed = true;
                    }
                    None => {
                        let walker = &mut self.cluster.walkers[i];
                        walker.stalled = true;
                        let p = walker.position;
                        if !self.cluster.dead_ends.contains(&p) {
                            self.cluster.dead_ends.push(p);
                        }
                    }
                }
            }

            if !progressed && !self.cluster.is_filled() {
                self.relocate()?;
            }
        }

        self.cluster.walkers.clear();
        self.mark_dead_ends();
        Ok(())
    }

    /// Depth-first corridor of normal rooms, greedy toward the end point
    fn carve_corridor<F>(&mut self, ids: &WalkerIds, should_stop: &F) -> Result<(), GenerationError>
    where
        F: Fn() -> bool,
    {
        let start = self.spec.start;
        let end = self.spec.end;
        let heading = self.heading_toward_end(start);
        let mut walker = Walker::spawn(ids.next_id(), start, heading, 0);
        self.walker_count = 1;

        self.enter_corridor(start, 0, None);
        let mut stack = vec![start];
        while let Some(&top) = stack.last() {
            if should_stop() {
                return Err(GenerationError::Interrupted(self.spec.id));
            }
            let mut next: Vec<Direction> = self.unvisited_neighbors(top);
            next.sort_by_key(|d| top.step(*d).manhattan(end));
            match next.first().copied() {
                Some(dir) => {
                    let steps = self
                        .section(top)
                        .and_then(|c| c.steps_from_start)
                        .unwrap_or(0)
                        + 1;
                    if walker.position != top {
                        walker.relocate(top, steps - 1);
                    }
                    let to = walker.advance(dir);
                    if let Some(cell) = self.section_mut(top) {
                        cell.link(dir);
                    }
                    self.enter_corridor(to, steps, Some(dir.opposite()));
                    stack.push(to);
                }
                None => {
                    stack.pop();
                }
            }
        }

        if !self.cluster.is_filled() {
            return Err(GenerationError::IncompleteCoverage {
                id: self.spec.id,
                unvisited: self.cluster.area() - self.cluster.size,
            });
        }
        self.mark_dead_ends();
        Ok(())
    }

    fn enter_corridor(&mut self, p: Point, steps: u32, parent: Option<Direction>) {
        let fresh = self
            .section_mut(p)
            .map(|cell| cell.visit(steps, parent))
            .unwrap_or(false);
        if fresh {
            self.cluster.place_room(RoomType::Normal, WeightVector::ZERO);
            self.record_trace();
        }
    }

    /// Leaves of the walk tree (other than the end point) are dead ends
    fn mark_dead_ends(&mut self) {
        let end = self.spec.end;
        let mut dead_ends = Vec::new();
        for cell in self.cells.iter_mut() {
            cell.dead_end = cell.visited && cell.forward_branches() == 0 && cell.point != end;
            if cell.dead_end {
                dead_ends.push(cell.point);
            }
        }
        self.cluster.dead_ends = dead_ends;
    }

    /// Turn dead ends into content rooms while the player is owed rewards
    fn furnish_dead_ends(&mut self) {
        if !self.cluster.has_dead_ends() {
            return;
        }
        let dead_ends = self.cluster.dead_ends.clone();
        for p in dead_ends {
            let Some(current) = self.section(p).map(|c| c.room_type) else {
                continue;
            };
            let options: &[RoomType] = match current {
                RoomType::Normal => &[RoomType::Treasure, RoomType::Shrine],
                RoomType::Monster if self.cluster.has_negative_rooms() => &[RoomType::Treasure],
                _ => &[],
            };
            let replacement = options.iter().copied().find(|t| self.can_replace(current, *t));
            if let Some(new_type) = replacement {
                let old_weight = self.weight_of(current);
                let new_weight = self.weight_of(new_type);
                self.cluster
                    .replace_room(current, old_weight, new_type, new_weight);
                self.counts.remove(current);
                self.counts.add(new_type);
                if let Some(cell) = self.section_mut(p) {
                    cell.room_type = new_type;
                }
                self.record_trace();
                trace!(cluster = %self.spec.id, x = p.x, y = p.y, from = ?current, to = ?new_type, "dead end furnished");
            }
        }
    }

    fn can_replace(&self, old: RoomType, new: RoomType) -> bool {
        if self.cluster.deviation() >= 0.0 || !self.within_caps(new) {
            return false;
        }
        let delta = self.weight_of(new).balance() - self.weight_of(old).balance();
        let after = self.cluster.current_weight.balance() + delta;
        let deviation_after = self.cluster.deviation() + delta;
        self.within_range(after) && deviation_after.abs() <= self.config.convergence_tolerance
    }

    fn check_convergence(&self) -> Result<(), GenerationError> {
        let actual = self.cluster.current_weight.balance();
        let expected = self.cluster.expected_weight.balance();
        if (actual - expected).abs() > self.config.convergence_tolerance {
            return Err(GenerationError::WeightDiverged {
                id: self.spec.id,
                actual,
                expected,
            });
        }
        Ok(())
    }

    fn finish(mut self) -> GeneratedCluster {
        for cell in self.cells.iter_mut() {
            cell.refresh_glyph();
        }
        GeneratedCluster {
            id: self.spec.id,
            rect: self.spec.rect,
            start: self.spec.start,
            end: self.spec.end,
            cells: self.cells,
            net_weight: self.cluster.current_weight,
            expected_weight: self.cluster.expected_weight,
            dead_ends: self.cluster.dead_ends,
            negative_rooms_count: self.cluster.negative_rooms_count,
            walker_count: self.walker_count,
            seed: self.seed,
            attempts: 1,
            weight_trace: self.trace,
        }
    }
}
