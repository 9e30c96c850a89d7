//! Server configuration.
//!
//! Defaults suit a single-process deployment; `from_env` overrides them from
//! `DUNGEON_*` variables:
//!
//! | Variable                      | Field                    |
//! |-------------------------------|--------------------------|
//! | `DUNGEON_GENERATION_CONFIG`   | `generation` (RON/JSON)  |
//! | `DUNGEON_WORLD_SEED`          | `world_seed`             |
//! | `DUNGEON_MISSING_CLUSTERS`    | `fail_fast` or `retry:N` |
//! | `DUNGEON_SIBLING_FAILURE`     | `salvage` or `cancel`    |
//! | `DUNGEON_CANCEL_GRACE_MS`     | `cancel_grace_ms`        |
//! | `DUNGEON_DRAIN_TIMEOUT_MS`    | `drain_timeout_ms`       |
//! | `DUNGEON_CACHE_CAPACITY`      | `cache_capacity`         |
//! | `DUNGEON_LMDB_PATH`           | `lmdb_path`              |
//! | `DUNGEON_LMDB_MAX_SIZE`       | `lmdb_max_size`          |
//! | `DUNGEON_WORKER_THREADS`      | `worker_threads`         |

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use dungeon_core::{GenerationConfig, GenerationError};

/// LMDB requires the map size to be a multiple of the OS page size
const PAGE_SIZE: usize = 4096;

/// What the assembler does when fewer clusters arrive than planned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MissingClusterPolicy {
    /// Regenerate each missing cluster inline, up to `attempts` fresh seeds each
    RetrySynchronously { attempts: u32 },
    /// Fail the level with `SessionError::MissingClusters`
    FailFast,
}

impl Default for MissingClusterPolicy {
    fn default() -> Self {
        MissingClusterPolicy::RetrySynchronously { attempts: 1 }
    }
}

/// What happens to in-flight siblings when one cluster fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SiblingFailurePolicy {
    /// Siblings finish; the missing-cluster policy then decides
    #[default]
    Salvage,
    /// First failure cancels the session scope
    CancelSiblings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub generation: GenerationConfig,
    /// Session seeds are derived from this and the session id
    pub world_seed: u64,
    pub missing_clusters: MissingClusterPolicy,
    pub sibling_failure: SiblingFailurePolicy,
    /// How long `cancel_scope` waits before aborting stragglers
    pub cancel_grace_ms: u64,
    /// Upper bound on draining the cluster channel
    pub drain_timeout_ms: u64,
    /// LRU entries in front of the backing store; 0 disables the tier
    pub cache_capacity: usize,
    pub lmdb_path: Option<PathBuf>,
    pub lmdb_max_size: usize,
    pub worker_threads: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            generation: GenerationConfig::default(),
            world_seed: 0x5eed_d00d,
            missing_clusters: MissingClusterPolicy::default(),
            sibling_failure: SiblingFailurePolicy::default(),
            cancel_grace_ms: 500,
            drain_timeout_ms: 30_000,
            cache_capacity: 64,
            lmdb_path: None,
            lmdb_max_size: 100 * 1024 * 1024,
            worker_threads: 4,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, GenerationError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unparsable numbers keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, GenerationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(raw: Option<String>) -> Option<T> {
            raw.and_then(|s| s.trim().parse().ok())
        }

        let mut config = Self::default();
        if let Some(path) = lookup("DUNGEON_GENERATION_CONFIG") {
            config.generation = GenerationConfig::load(path)?;
        }
        if let Some(seed) = parsed(lookup("DUNGEON_WORLD_SEED")) {
            config.world_seed = seed;
        }
        if let Some(raw) = lookup("DUNGEON_MISSING_CLUSTERS") {
            config.missing_clusters = parse_missing_policy(&raw)?;
        }
        if let Some(raw) = lookup("DUNGEON_SIBLING_FAILURE") {
            config.sibling_failure = match raw.trim() {
                "salvage" => SiblingFailurePolicy::Salvage,
                "cancel" => SiblingFailurePolicy::CancelSiblings,
                other => {
                    return Err(GenerationError::Config(format!(
                        "unknown sibling failure policy '{other}'"
                    )))
                }
            };
        }
        if let Some(ms) = parsed(lookup("DUNGEON_CANCEL_GRACE_MS")) {
            config.cancel_grace_ms = ms;
        }
        if let Some(ms) = parsed(lookup("DUNGEON_DRAIN_TIMEOUT_MS")) {
            config.drain_timeout_ms = ms;
        }
        if let Some(n) = parsed(lookup("DUNGEON_CACHE_CAPACITY")) {
            config.cache_capacity = n;
        }
        if let Some(path) = lookup("DUNGEON_LMDB_PATH") {
            config.lmdb_path = Some(PathBuf::from(path));
        }
        if let Some(size) = parsed::<usize>(lookup("DUNGEON_LMDB_MAX_SIZE")) {
            config.lmdb_max_size = size;
        }
        if let Some(n) = parsed(lookup("DUNGEON_WORKER_THREADS")) {
            config.worker_threads = n;
        }

        config.lmdb_max_size = round_to_page(config.lmdb_max_size);
        config.worker_threads = config.worker_threads.max(1);
        config.generation.validate()?;
        Ok(config)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

fn parse_missing_policy(raw: &str) -> Result<MissingClusterPolicy, GenerationError> {
    let raw = raw.trim();
    if raw == "fail_fast" {
        return Ok(MissingClusterPolicy::FailFast);
    }
    match raw.strip_prefix("retry") {
        Some("") => Ok(MissingClusterPolicy::default()),
        Some(rest) => rest
            .trim_start_matches(':')
            .parse()
            .map(|attempts| MissingClusterPolicy::RetrySynchronously { attempts })
            .map_err(|_| GenerationError::Config(format!("bad retry count in '{raw}'"))),
        None => Err(GenerationError::Config(format!(
            "unknown missing cluster policy '{raw}'"
        ))),
    }
}

fn round_to_page(size: usize) -> usize {
    size.max(PAGE_SIZE).div_ceil(PAGE_SIZE) * PAGE_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_lookup(|_| None).unwrap();
        assert_eq!(
            config.missing_clusters,
            MissingClusterPolicy::RetrySynchronously { attempts: 1 }
        );
        assert_eq!(config.sibling_failure, SiblingFailurePolicy::Salvage);
        assert_eq!(config.cancel_grace(), Duration::from_millis(500));
        assert_eq!(config.lmdb_max_size % PAGE_SIZE, 0);
        assert!(config.lmdb_path.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("DUNGEON_WORLD_SEED", "42"),
            ("DUNGEON_MISSING_CLUSTERS", "retry:3"),
            ("DUNGEON_SIBLING_FAILURE", "cancel"),
            ("DUNGEON_DRAIN_TIMEOUT_MS", "250"),
            ("DUNGEON_LMDB_PATH", "/tmp/levels"),
            ("DUNGEON_LMDB_MAX_SIZE", "5000"),
            ("DUNGEON_WORKER_THREADS", "0"),
            ("DUNGEON_CACHE_CAPACITY", "not-a-number"),
        ]))
        .unwrap();

        assert_eq!(config.world_seed, 42);
        assert_eq!(
            config.missing_clusters,
            MissingClusterPolicy::RetrySynchronously { attempts: 3 }
        );
        assert_eq!(config.sibling_failure, SiblingFailurePolicy::CancelSiblings);
        assert_eq!(config.drain_timeout(), Duration::from_millis(250));
        assert_eq!(config.lmdb_path, Some(PathBuf::from("/tmp/levels")));
        assert_eq!(config.lmdb_max_size, 8192);
        assert_eq!(config.worker_threads, 1);
        assert_eq!(config.cache_capacity, 64, "unparsable value keeps default");
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!(
            parse_missing_policy("fail_fast").unwrap(),
            MissingClusterPolicy::FailFast
        );
        assert_eq!(
            parse_missing_policy("retry").unwrap(),
            MissingClusterPolicy::RetrySynchronously { attempts: 1 }
        );
        assert!(parse_missing_policy("retry:x").is_err());
        assert!(parse_missing_policy("drop").is_err());
        assert!(ServerConfig::from_lookup(lookup(&[("DUNGEON_SIBLING_FAILURE", "ignore")])).is_err());
    }

    #[test]
    fn test_generation_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gen.ron");
        let generation = GenerationConfig {
            level_width: 12,
            level_height: 8,
            ..Default::default()
        };
        std::fs::write(&path, generation.to_ron()).unwrap();

        let config = ServerConfig::from_lookup(lookup(&[(
            "DUNGEON_GENERATION_CONFIG",
            path.to_str().unwrap(),
        )]))
        .unwrap();
        assert_eq!(config.generation.level_width, 12);
        assert_eq!(config.generation.level_height, 8);
    }
}
