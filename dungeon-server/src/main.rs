//! `dungeon-server`: generate levels for a batch of concurrent sessions.
//!
//! ```text
//! dungeon-server [-s N] [-d D] [--offline] [--no-map] [--prometheus]
//! ```
//!
//! Configuration comes from `DUNGEON_*` variables (see `config.rs`);
//! `DUNGEON_LOG_LEVEL` picks the default log level, `RUST_LOG` overrides it.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};

use dungeon_core::logging::{init_tracing, LogLevel, TimingSpan, TracingConfig};
use dungeon_core::{LevelPlan, LevelSeed, TableContentBalancer, WalkerIds};
use dungeon_server::{storage, LevelService, LogNotifier, ServerConfig, SessionError, SessionId};

/// Generate dungeon levels for a batch of concurrent sessions
#[derive(Debug, Clone, Parser)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Number of sessions to run
    #[arg(short, long, default_value_t = 4)]
    sessions: u64,
    /// Level depth, starting at 1
    #[arg(short, long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    depth: u32,
    /// Generate on the rayon pool only, without sessions or storage
    #[arg(long)]
    offline: bool,
    /// Skip the ASCII map of each level
    #[arg(long)]
    no_map: bool,
    /// Print task metrics in Prometheus text format
    #[arg(long)]
    prometheus: bool,
}

fn main() -> Result<()> {
    let level = std::env::var("DUNGEON_LOG_LEVEL")
        .ok()
        .and_then(|s| s.parse::<LogLevel>().ok())
        .unwrap_or(LogLevel::Info);
    init_tracing(&TracingConfig::with_level(level));

    let args = CliArgs::parse();
    let config = ServerConfig::from_env().context("invalid DUNGEON_* configuration")?;
    info!(
        sessions = args.sessions,
        depth = args.depth,
        offline = args.offline,
        level = %format!("{}x{}", config.generation.level_width, config.generation.level_height),
        "starting dungeon server"
    );

    if args.offline {
        return run_offline(&config, &args);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    runtime.block_on(run(config, args))
}

/// Rayon-only generation: no sessions, no storage
fn run_offline(config: &ServerConfig, args: &CliArgs) -> Result<()> {
    let ids = WalkerIds::new();
    for session in 0..args.sessions {
        let _timing = TimingSpan::new("offline_level");
        let seed = LevelSeed::new(config.world_seed ^ session, args.depth);
        let plan = LevelPlan::partition(&config.generation, seed)?;
        let level = plan.generate_parallel(&config.generation, &ids)?;
        println!(
            "session {session}: {} rooms, balance {:.1}, hash {}",
            level.rooms.len(),
            level.net_weight.balance(),
            level.validation_hex()
        );
        if !args.no_map {
            println!("{}", level.render_ascii());
        }
    }
    Ok(())
}

async fn run(config: ServerConfig, args: CliArgs) -> Result<()> {
    let repo = storage::init_storage(&config).context("failed to initialize level storage")?;
    let service = Arc::new(LevelService::new(
        config,
        repo,
        Arc::new(LogNotifier::new(!args.no_map)),
        Arc::new(TableContentBalancer),
    ));

    let sessions: Vec<SessionId> = (1..=args.sessions).map(SessionId).collect();
    let mut handles = Vec::with_capacity(sessions.len());
    for &session in &sessions {
        let service = service.clone();
        let depth = args.depth;
        handles.push(tokio::spawn(async move { run_session(&service, session, depth).await }));
    }

    let all = async {
        let mut failed = 0usize;
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(error = %e, "session failed");
                    failed += 1;
                }
                Err(e) => {
                    error!(error = %e, "session task panicked");
                    failed += 1;
                }
            }
        }
        failed
    };

    let failed = tokio::select! {
        failed = all => failed,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, cancelling every session");
            for &session in &sessions {
                service.cancel_session(session).await;
            }
            sessions.len()
        }
    };

    println!("{}", service.metrics().summary());
    if args.prometheus {
        println!("{}", service.metrics().render_prometheus());
    }
    if failed > 0 {
        bail!("{failed} of {} sessions failed", sessions.len());
    }
    Ok(())
}

async fn run_session(service: &LevelService, session: SessionId, depth: u32) -> Result<(), SessionError> {
    service.generate_items(session).await?;
    let level = service.generate_level(session, depth).await?;
    let player = service.generate_player(session).await?;
    info!(%session, loadout = player.loadout.len(), "player ready");

    // walk the first few rooms next to the start
    let start = level.start;
    for room in level.rooms.values().filter(|r| r.point.manhattan(start) <= 1).take(3) {
        service.visit_room(session, room.point).await?;
    }
    service.end_session(session);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = CliArgs::try_parse_from(["dungeon-server"]).unwrap();
        assert_eq!((args.sessions, args.depth), (4, 1));
        assert!(!args.offline && !args.no_map && !args.prometheus);
    }

    #[test]
    fn test_flags_and_values() {
        let args = CliArgs::try_parse_from(["dungeon-server", "-s", "9", "--depth", "3", "--offline", "--no-map"]).unwrap();
        assert_eq!((args.sessions, args.depth), (9, 3));
        assert!(args.offline && args.no_map);
    }

    #[test]
    fn test_rejects_depth_zero_and_unknown_flags() {
        assert!(CliArgs::try_parse_from(["dungeon-server", "--depth", "0"]).is_err());
        assert!(CliArgs::try_parse_from(["dungeon-server", "--sessions", "many"]).is_err());
        assert!(CliArgs::try_parse_from(["dungeon-server", "--verbose"]).is_err());
    }
}
