//! The assembled level: stitched grid, rooms map, map overlay.
//!
//! A `Level` is created once per session and depth by [`Level::assemble`] and
//! never regenerated in place; moving deeper produces a new one.

use petgraph::algo::{connected_components, has_path_connecting};
use petgraph::graph::{NodeIndex, UnGraph};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::cluster::{ClusterId, GeneratedCluster};
use crate::error::GenerationError;
use crate::generation::{LevelPlan, LevelSeed};
use crate::grid::{Direction, GridSection, Point, Rect};
use crate::room::{ContentBalancer, RoomContent, RoomType};
use crate::weight::WeightVector;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub point: Point,
    pub cluster: ClusterId,
    pub room_type: RoomType,
    pub weight: WeightVector,
    pub content: Option<RoomContent>,
    pub visited: bool,
}

/// Rooms the player has seen, with a running bounding box
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapOverlay {
    visited: BTreeSet<Point>,
    min: Option<Point>,
    max: Option<Point>,
}

impl MapOverlay {
    /// Returns `true` the first time `p` is seen
    pub fn visit(&mut self, p: Point) -> bool {
        if !self.visited.insert(p) {
            return false;
        }
        self.min = Some(match self.min {
            Some(m) => Point::new(m.x.min(p.x), m.y.min(p.y)),
            None => p,
        });
        self.max = Some(match self.max {
            Some(m) => Point::new(m.x.max(p.x), m.y.max(p.y)),
            None => p,
        });
        true
    }

    pub fn contains(&self, p: Point) -> bool {
        self.visited.contains(&p)
    }

    pub fn len(&self) -> usize {
        self.visited.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visited.is_empty()
    }

    pub fn bounding_box(&self) -> Option<Rect> {
        match (self.min, self.max) {
            (Some(min), Some(max)) => Some(Rect::new(
                min.x,
                min.y,
                max.x - min.x + 1,
                max.y - min.y + 1,
            )),
            _ => None,
        }
    }
}

/// Undirected graph of linked rooms
pub struct RoomGraph {
    pub graph: UnGraph<Point, ()>,
    nodes: HashMap<Point, NodeIndex>,
}

impl RoomGraph {
    pub fn node(&self, p: Point) -> Option<NodeIndex> {
        self.nodes.get(&p).copied()
    }

    pub fn is_reachable(&self, from: Point, to: Point) -> bool {
        match (self.node(from), self.node(to)) {
            (Some(a), Some(b)) => has_path_connecting(&self.graph, a, b, None),
            _ => false,
        }
    }

    pub fn component_count(&self) -> usize {
        connected_components(&self.graph)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Level {
    pub seed: LevelSeed,
    pub depth: u32,
    pub width: i32,
    pub height: i32,
    /// Row-major over `(0, 0, width, height)`
    pub grid: Vec<GridSection>,
    pub start: Point,
    pub end: Point,
    pub overlay: MapOverlay,
    pub rooms: BTreeMap<Point, Room>,
    pub net_weight: WeightVector,
    pub expected_weight: WeightVector,
    pub cluster_count: usize,
}

impl Level {
    /// Stitch generated clusters into one level.
    ///
    /// Every cluster in `plan` must be present exactly once. Consecutive
    /// clusters are linked through their connection points and step counts are
    /// rebased so they run from the level start. Fails with
    /// `GenerationError::Disconnected` if the end room cannot be reached.
    pub fn assemble(plan: &LevelPlan, clusters: Vec<GeneratedCluster>) -> Result<Self, GenerationError> {
        let mut by_id: BTreeMap<ClusterId, GeneratedCluster> = BTreeMap::new();
        for cluster in clusters {
            if plan.spec(cluster.id).is_none() {
                return Err(GenerationError::InvalidPlan(format!(
                    "cluster {} is not part of the plan",
                    cluster.id
                )));
            }
            let id = cluster.id;
            if by_id.insert(id, cluster).is_some() {
                return Err(GenerationError::InvalidPlan(format!("cluster {id} received twice")));
            }
        }

        let bounds = plan.bounds();
        let mut grid: Vec<GridSection> = bounds.points().map(GridSection::new).collect();
        let mut rooms = BTreeMap::new();
        let mut net_weight = WeightVector::ZERO;
        let mut offset = 0u32;
        let mut previous_end: Option<Point> = None;

        for spec in &plan.clusters {
            let cluster = by_id
                .get(&spec.id)
                .ok_or(GenerationError::MissingCluster(spec.id))?;
            if cluster.rect != spec.rect || cluster.start != spec.start || cluster.end != spec.end {
                return Err(GenerationError::InvalidPlan(format!(
                    "cluster {} does not match its plan entry",
                    spec.id
                )));
            }

            for cell in &cluster.cells {
                let idx = bounds.index_of(cell.point).ok_or_else(|| {
                    GenerationError::InvalidPlan(format!("cell {:?} outside the level", cell.point))
                })?;
                let mut section = cell.clone();
                section.steps_from_start = cell.steps_from_start.map(|s| s + offset);
                grid[idx] = section;
                if cell.visited {
                    rooms.insert(
                        cell.point,
                        Room {
                            point: cell.point,
                            cluster: cluster.id,
                            room_type: cell.room_type,
                            weight: cell.room_type.weight_at(spec.depth),
                            content: None,
                            visited: false,
                        },
                    );
                }
            }

            if let Some(prev) = previous_end {
                link_border(&mut grid, &bounds, prev, spec.start)?;
            }
            net_weight = net_weight + cluster.net_weight;
            offset = cluster
                .section(cluster.end)
                .and_then(|c| c.steps_from_start)
                .map(|s| s + offset + 1)
                .unwrap_or(offset);
            previous_end = Some(spec.end);
        }

        let start = plan.start();
        let mut overlay = MapOverlay::default();
        overlay.visit(start);
        if let Some(room) = rooms.get_mut(&start) {
            room.visited = true;
        }

        let level = Self {
            seed: plan.seed,
            depth: plan.seed.depth,
            width: plan.width,
            height: plan.height,
            grid,
            start,
            end: plan.end(),
            overlay,
            rooms,
            net_weight,
            expected_weight: plan.expected_weight,
            cluster_count: plan.cluster_count(),
        };
        if !level.room_graph().is_reachable(level.start, level.end) {
            return Err(GenerationError::Disconnected);
        }
        Ok(level)
    }

    pub fn bounds(&self) -> Rect {
        Rect::new(0, 0, self.width, self.height)
    }

    pub fn section(&self, p: Point) -> Option<&GridSection> {
        self.bounds().index_of(p).and_then(|i| self.grid.get(i))
    }

    pub fn room(&self, p: Point) -> Option<&Room> {
        self.rooms.get(&p)
    }

    pub fn count_rooms(&self, room_type: RoomType) -> usize {
        self.rooms.values().filter(|r| r.room_type == room_type).count()
    }

    pub fn room_graph(&self) -> RoomGraph {
        let mut graph = UnGraph::new_undirected();
        let mut nodes = HashMap::new();
        for cell in self.grid.iter().filter(|c| c.visited) {
            nodes.insert(cell.point, graph.add_node(cell.point));
        }
        for cell in self.grid.iter().filter(|c| c.visited) {
            for dir in [Direction::East, Direction::South] {
                if !cell.is_linked(dir) {
                    continue;
                }
                if let (Some(a), Some(b)) = (nodes.get(&cell.point), nodes.get(&cell.point.step(dir))) {
                    graph.add_edge(*a, *b, ());
                }
            }
        }
        RoomGraph { graph, nodes }
    }

    /// Mark a room as explored and grow the overlay
    pub fn visit(&mut self, p: Point) -> Option<&Room> {
        let room = self.rooms.get_mut(&p)?;
        room.visited = true;
        self.overlay.visit(p);
        Some(room)
    }

    /// Ask the balancer for content in every non-empty room
    pub fn attach_content(&mut self, balancer: &dyn ContentBalancer) {
        for room in self.rooms.values_mut() {
            if room.room_type != RoomType::Normal && room.content.is_none() {
                room.content = Some(balancer.fit(&room.weight, room.room_type));
            }
        }
    }

    /// SHA3-256 over depth, seed and every cell's room type
    pub fn validation_hash(&self) -> [u8; 32] {
        let mut hasher = Sha3_256::new();
        hasher.update(self.seed.session_seed.to_le_bytes());
        hasher.update(self.depth.to_le_bytes());
        for cell in &self.grid {
            hasher.update(cell.point.x.to_le_bytes());
            hasher.update(cell.point.y.to_le_bytes());
            hasher.update([cell.visited as u8, cell.glyph as u8]);
        }
        let digest = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        out
    }

    pub fn validation_hex(&self) -> String {
        self.validation_hash()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    pub fn render_ascii(&self) -> String {
        let mut out = String::with_capacity(((self.width + 1) * self.height) as usize);
        for y in 0..self.height {
            for x in 0..self.width {
                let p = Point::new(x, y);
                let glyph = if p == self.start {
                    'S'
                } else if p == self.end {
                    'E'
                } else {
                    self.section(p).map(|c| c.glyph).unwrap_or(' ')
                };
                out.push(glyph);
            }
            out.push('\n');
        }
        out
    }
}

fn link_border(
    grid: &mut [GridSection],
    bounds: &Rect,
    from: Point,
    to: Point,
) -> Result<(), GenerationError> {
    let dir = from.direction_to(to).ok_or_else(|| {
        GenerationError::InvalidPlan(format!("connection points {from:?} and {to:?} are not adjacent"))
    })?;
    let (a, b) = match (bounds.index_of(from), bounds.index_of(to)) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Err(GenerationError::InvalidPlan(
                "connection point outside the level".to_string(),
            ))
        }
    };
    grid[a].link(dir);
    grid[b].link(dir.opposite());
    grid[b].parent = Some(dir.opposite());
    Ok(())
}
