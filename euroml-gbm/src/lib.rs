//! Per-number appearance models for EuroMillions draws: causal rolling
//! features, one boosted binary classifier per candidate, chronological
//! cross-validation, combination assembly from the resulting scores, and a
//! walk-forward backtest of the whole chain.

pub mod artifact;
pub mod backtest;
pub mod blend;
pub mod config;
pub mod error;
pub mod features;
pub mod gbdt;
pub mod sampler;
pub mod scoring;
pub mod training;

#[cfg(test)]
pub(crate) mod testutil;

pub use backtest::{backtest, BacktestOptions, BacktestReport, BacktestStep};
pub use blend::BlendWeights;
pub use config::{BoostParams, EraPolicy, FeatureConfig, TrainConfig};
pub use error::{ModelError, Result};
pub use sampler::{suggest, Method, SuggestOptions};
pub use scoring::{score, ModelContext, ScoreTable};
pub use training::{train, TrainedModels};
