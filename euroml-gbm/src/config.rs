use serde::{Deserialize, Serialize};

/// Parameters of the rolling feature builder. Any change here changes the
/// feature schema, so models trained under another configuration are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Rolling frequency windows, ascending. The first is the "short" window,
    /// the last the "long" one used for momentum and pairing.
    pub windows: Vec<usize>,
    /// Number of past inter-appearance gaps kept for the variance feature.
    pub gap_history: usize,
    pub gap_variance_scale: f64,
    pub streak_scale: f64,
    pub pair_top_balls: usize,
    pub pair_top_stars: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            windows: vec![10, 30, 100],
            gap_history: 20,
            gap_variance_scale: 100.0,
            streak_scale: 5.0,
            pair_top_balls: 10,
            pair_top_stars: 3,
        }
    }
}

impl FeatureConfig {
    /// Sorted, deduplicated windows with zero removed.
    pub fn normalized(&self) -> Self {
        let mut windows: Vec<usize> = self.windows.iter().copied().filter(|&w| w > 0).collect();
        windows.sort_unstable();
        windows.dedup();
        if windows.is_empty() {
            windows.push(1);
        }
        Self { windows, ..self.clone() }
    }

    pub fn short_window(&self) -> usize {
        self.windows.first().copied().unwrap_or(1)
    }

    pub fn long_window(&self) -> usize {
        self.windows.last().copied().unwrap_or(1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostParams {
    pub n_rounds: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub lambda: f64,
    pub row_subsample: f64,
    pub feature_subsample: f64,
    pub max_bins: usize,
    pub seed: u64,
}

impl Default for BoostParams {
    fn default() -> Self {
        Self {
            n_rounds: 100,
            learning_rate: 0.1,
            max_depth: 3,
            min_samples_leaf: 20,
            lambda: 1.0,
            row_subsample: 0.8,
            feature_subsample: 0.8,
            max_bins: 32,
            seed: 42,
        }
    }
}

/// Which ruleset eras enter the training history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum EraPolicy {
    /// Post-2016 draws only when there are enough of them, all draws otherwise.
    #[default]
    ModernPreferred,
    ModernOnly,
    All,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    pub folds: usize,
    pub min_draws: usize,
    pub era_policy: EraPolicy,
    /// Minimum modern draws for `ModernPreferred` to drop older eras.
    pub modern_min_draws: usize,
    pub balance_classes: bool,
    pub max_class_weight: f64,
    pub boost: BoostParams,
    pub features: FeatureConfig,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            folds: 5,
            min_draws: 300,
            era_policy: EraPolicy::ModernPreferred,
            modern_min_draws: 200,
            balance_classes: false,
            max_class_weight: 20.0,
            boost: BoostParams::default(),
            features: FeatureConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_feature_config() {
        let config = FeatureConfig::default();
        assert_eq!(config.windows, vec![10, 30, 100]);
        assert_eq!(config.short_window(), 10);
        assert_eq!(config.long_window(), 100);
    }

    #[test]
    fn test_normalized_windows() {
        let config = FeatureConfig {
            windows: vec![30, 0, 10, 30],
            ..FeatureConfig::default()
        };
        assert_eq!(config.normalized().windows, vec![10, 30]);
    }

    #[test]
    fn test_train_config_serde_roundtrip() {
        let config = TrainConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("modern-preferred"));
        let restored: TrainConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, config);
    }
}
