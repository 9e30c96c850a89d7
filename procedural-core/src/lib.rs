//! Dungeon Procedural Core
//!
//! Deterministic, synchronous level generation for the dungeon session server:
//! - Weight vectors (multi-axis balance scores) and room categories
//! - Grid primitives, clusters and walkers
//! - Cluster fill via randomized walker traversal under a balance budget
//! - Level partitioning, parallel generation and stitching
//! - Structured logging setup shared with the server
//!
//! Nothing here spawns tasks or touches storage; orchestration lives in
//! `dungeon-session-server`.

pub mod cluster;
pub mod config;
pub mod error;
pub mod generation;
pub mod grid;
pub mod level;
pub mod logging;
pub mod room;
pub mod walker;
pub mod weight;

pub use cluster::{Cluster, ClusterId, ClusterSpec, GeneratedCluster};
pub use config::{CategoryWeights, GenerationConfig};
pub use error::GenerationError;
pub use generation::{ClusterGenerator, LevelPlan, LevelSeed};
pub use grid::{Direction, GridSection, Point, Rect};
pub use level::{Level, MapOverlay, Room, RoomGraph};
pub use room::{ContentBalancer, RoomContent, RoomType, TableContentBalancer};
pub use walker::{Walker, WalkerId, WalkerIds};
pub use weight::{WeightAxis, WeightVector, AXIS_COUNT};
