//! Messaging collaborator: delivers finished levels and explored rooms.
//!
//! Called only after persistence succeeded. Delivery problems are logged by
//! the implementation; nothing in the generation flow depends on them.

use async_trait::async_trait;
use tracing::info;

use dungeon_core::{Level, Room};

use crate::orchestrator::SessionId;

#[async_trait]
pub trait LevelNotifier: Send + Sync {
    async fn level_ready(&self, session: SessionId, level: &Level);

    async fn room_updated(&self, session: SessionId, room: &Room);
}

/// Renders levels as ASCII into the log
#[derive(Debug, Default, Clone)]
pub struct LogNotifier {
    pub render_map: bool,
}

impl LogNotifier {
    pub fn new(render_map: bool) -> Self {
        Self { render_map }
    }
}

#[async_trait]
impl LevelNotifier for LogNotifier {
    async fn level_ready(&self, session: SessionId, level: &Level) {
        info!(
            %session,
            depth = level.depth,
            rooms = level.rooms.len(),
            balance = format!("{:.1}", level.net_weight.balance()),
            hash = %level.validation_hex(),
            "level ready"
        );
        if self.render_map {
            info!(%session, "\n{}", level.render_ascii());
        }
    }

    async fn room_updated(&self, session: SessionId, room: &Room) {
        info!(
            %session,
            x = room.point.x,
            y = room.point.y,
            room_type = ?room.room_type,
            content = room.content.as_ref().map(|c| c.name.as_str()).unwrap_or("-"),
            "room explored"
        );
    }
}

/// Drops every notification
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

#[async_trait]
impl LevelNotifier for NullNotifier {
    async fn level_ready(&self, _session: SessionId, _level: &Level) {}

    async fn room_updated(&self, _session: SessionId, _room: &Room) {}
}
