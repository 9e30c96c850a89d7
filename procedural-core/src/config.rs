//! Generation tuning knobs.
//!
//! Loaded from RON or JSON (by file extension); every field has a default so
//! partial files are fine.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::GenerationError;
use crate::room::RoomType;

/// Relative odds of each room category when a walker enters a new cell
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryWeights {
    pub normal: f64,
    pub monster: f64,
    pub treasure: f64,
    pub shrine: f64,
    pub merchant: f64,
}

impl Default for CategoryWeights {
    fn default() -> Self {
        Self {
            normal: 45.0,
            monster: 30.0,
            treasure: 15.0,
            shrine: 5.0,
            merchant: 5.0,
        }
    }
}

impl CategoryWeights {
    pub fn weight_of(&self, room_type: RoomType) -> f64 {
        match room_type {
            RoomType::Normal => self.normal,
            RoomType::Monster => self.monster,
            RoomType::Treasure => self.treasure,
            RoomType::Shrine => self.shrine,
            RoomType::Merchant => self.merchant,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub level_width: i32,
    pub level_height: i32,
    pub cluster_width: i32,
    pub cluster_height: i32,
    /// Running cluster balance must stay inside `[-range, +range]`
    pub cluster_weight_range: f64,
    /// Clusters with a side below this are filled as a plain corridor
    pub min_cluster_side: i32,
    pub monster_ratio: f64,
    pub treasure_ratio: f64,
    pub category_weights: CategoryWeights,
    /// Chance a walker ignores the direction toward the end point
    pub deviation_chance: f64,
    /// Chance a walker keeps its heading once the end point is reached
    pub straight_bias: f64,
    pub base_walkers: usize,
    pub cells_per_extra_walker: usize,
    pub max_walkers: usize,
    /// Step budget is `area * step_budget_factor`
    pub step_budget_factor: usize,
    /// Allowed `|actual - expected|` balance at completion
    pub convergence_tolerance: f64,
    /// Fresh-seed retries per cluster before the error escalates
    pub cluster_retries: u32,
    pub level_base_balance: f64,
    pub depth_balance_step: f64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            level_width: 20,
            level_height: 20,
            cluster_width: 10,
            cluster_height: 10,
            cluster_weight_range: 200.0,
            min_cluster_side: 4,
            monster_ratio: 0.3,
            treasure_ratio: 0.15,
            category_weights: CategoryWeights::default(),
            deviation_chance: 0.3,
            straight_bias: 0.5,
            base_walkers: 1,
            cells_per_extra_walker: 40,
            max_walkers: 4,
            step_budget_factor: 8,
            convergence_tolerance: 200.0,
            cluster_retries: 2,
            level_base_balance: 0.0,
            depth_balance_step: -5.0,
        }
    }
}

impl GenerationConfig {
    pub fn from_ron_str(text: &str) -> Result<Self, GenerationError> {
        let config: Self = ron::from_str(text).map_err(|e| GenerationError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(text: &str) -> Result<Self, GenerationError> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| GenerationError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.ron` or `.json` file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, GenerationError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| GenerationError::Config(format!("{}: {}", path.display(), e)))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&text),
            _ => Self::from_ron_str(&text),
        }
    }

    pub fn to_ron(&self) -> String {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default()).unwrap_or_default()
    }

    /// Target balance for a whole level at `depth`
    pub fn level_balance(&self, depth: u32) -> f64 {
        self.level_base_balance + self.depth_balance_step * depth.saturating_sub(1) as f64
    }

    pub fn validate(&self) -> Result<(), GenerationError> {
        let fail = |msg: &str| Err(GenerationError::Config(msg.to_string()));
        if self.level_width <= 0 || self.level_height <= 0 {
            return fail("level dimensions must be positive");
        }
        if self.cluster_width <= 0 || self.cluster_height <= 0 {
            return fail("cluster dimensions must be positive");
        }
        if !(self.cluster_weight_range.is_finite() && self.cluster_weight_range >= 0.0) {
            return fail("cluster_weight_range must be a non-negative number");
        }
        if self.category_weights.normal <= 0.0 {
            return fail("normal rooms must have a positive sampling weight");
        }
        if RoomType::ALL
            .iter()
            .any(|t| self.category_weights.weight_of(*t) < 0.0)
        {
            return fail("category weights must be non-negative");
        }
        if !(0.0..=1.0).contains(&self.deviation_chance) || !(0.0..=1.0).contains(&self.straight_bias) {
            return fail("probabilities must be within [0, 1]");
        }
        if self.base_walkers == 0 || self.max_walkers < self.base_walkers {
            return fail("need at least one walker and max_walkers >= base_walkers");
        }
        if self.step_budget_factor == 0 {
            return fail("step_budget_factor must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        GenerationConfig::default().validate().unwrap();
    }

    #[test]
    fn test_partial_ron() {
        let cfg = GenerationConfig::from_ron_str("(cluster_weight_range: 50.0, level_width: 30)").unwrap();
        assert_eq!(cfg.cluster_weight_range, 50.0);
        assert_eq!(cfg.level_width, 30);
        assert_eq!(cfg.level_height, 20);
    }

    #[test]
    fn test_ron_roundtrip() {
        let cfg = GenerationConfig {
            cluster_retries: 7,
            ..Default::default()
        };
        let back = GenerationConfig::from_ron_str(&cfg.to_ron()).unwrap();
        assert_eq!(back.cluster_retries, 7);
    }

    #[test]
    fn test_json_and_validation() {
        assert!(GenerationConfig::from_json_str(r#"{"max_walkers": 2}"#).is_ok());
        let err = GenerationConfig::from_json_str(r#"{"level_width": 0}"#).unwrap_err();
        assert!(matches!(err, GenerationError::Config(_)));
        assert!(GenerationConfig::from_json_str(r#"{"category_weights": {"normal": 0.0}}"#).is_err());
    }

    #[test]
    fn test_load_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gen.json");
        std::fs::write(&path, r#"{"cluster_width": 6}"#).unwrap();
        assert_eq!(GenerationConfig::load(&path).unwrap().cluster_width, 6);

        let path = dir.path().join("gen.ron");
        std::fs::write(&path, "(cluster_height: 5)").unwrap();
        assert_eq!(GenerationConfig::load(&path).unwrap().cluster_height, 5);

        assert!(GenerationConfig::load(dir.path().join("missing.ron")).is_err());
    }

    #[test]
    fn test_level_balance_by_depth() {
        let cfg = GenerationConfig::default();
        assert_eq!(cfg.level_balance(1), 0.0);
        assert_eq!(cfg.level_balance(3), -10.0);
    }
}
