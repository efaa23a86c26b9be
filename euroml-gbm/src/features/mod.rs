mod rolling;

use std::ops::Range;

use chrono::NaiveDate;
use euroml_db::models::{Draw, Pool};
use log::debug;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, s};
use serde::{Deserialize, Serialize};

use crate::config::FeatureConfig;
use crate::error::{ModelError, Result};
use rolling::PoolState;

/// Bumped whenever the meaning or order of a feature changes.
pub const FEATURE_VERSION: u32 = 1;

/// Per-candidate feature names, in column order.
pub fn feature_names(pool: Pool, config: &FeatureConfig) -> Vec<String> {
    let mut names: Vec<String> = config.windows.iter().map(|w| format!("freq_{w}")).collect();
    names.push("gap".into());
    names.push("streak".into());
    if pool == Pool::Balls {
        names.extend((1..=5).map(|k| format!("pos_{k}")));
    }
    for name in ["momentum", "pair", "gap_var", "day_of_week", "month"] {
        names.push(name.into());
    }
    names
}

/// Everything a trained model depends on in the feature layout.
/// Two schemas are compatible only when equal field for field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: u32,
    pub config: FeatureConfig,
    pub ball_features: Vec<String>,
    pub star_features: Vec<String>,
}

impl FeatureSchema {
    pub fn from_config(config: &FeatureConfig) -> Self {
        let config = config.normalized();
        Self {
            version: FEATURE_VERSION,
            ball_features: feature_names(Pool::Balls, &config),
            star_features: feature_names(Pool::Stars, &config),
            config,
        }
    }

    pub fn names(&self, pool: Pool) -> &[String] {
        match pool {
            Pool::Balls => &self.ball_features,
            Pool::Stars => &self.star_features,
        }
    }

    pub fn features_per_candidate(&self, pool: Pool) -> usize {
        self.names(pool).len()
    }

    pub fn index_of(&self, pool: Pool, name: &str) -> Option<usize> {
        self.names(pool).iter().position(|n| n == name)
    }

    /// Short human-readable form, used in error messages and `info`.
    pub fn fingerprint(&self) -> String {
        let windows: Vec<String> = self.config.windows.iter().map(|w| w.to_string()).collect();
        format!(
            "v{} windows=[{}] gaps={} gap_scale={} streak_scale={} pairs={}/{} features={}/{}",
            self.version,
            windows.join(","),
            self.config.gap_history,
            self.config.gap_variance_scale,
            self.config.streak_scale,
            self.config.pair_top_balls,
            self.config.pair_top_stars,
            self.ball_features.len(),
            self.star_features.len(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetMeta {
    pub windows: Vec<usize>,
    pub ball_features: usize,
    pub star_features: usize,
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
    pub n_draws: usize,
    pub n_transitions: usize,
}

/// Aligned (features, labels) for one pool. Row `i` holds the state after
/// draw `i`, its labels mark the numbers of draw `i + 1`.
#[derive(Debug, Clone)]
pub struct PoolDataset {
    pub pool: Pool,
    pub features: Array2<f64>,
    pub labels: Array2<f64>,
    /// Snapshot after the last draw, the input for the next prediction.
    pub latest: Array1<f64>,
    pub features_per_candidate: usize,
}

impl PoolDataset {
    pub fn n_samples(&self) -> usize {
        self.features.nrows()
    }

    pub fn n_candidates(&self) -> usize {
        self.labels.ncols()
    }

    /// Columns of candidate `c` (0-based, number `c + 1`).
    pub fn candidate_columns(&self, c: usize) -> Range<usize> {
        c * self.features_per_candidate..(c + 1) * self.features_per_candidate
    }

    pub fn candidate_features(&self, c: usize) -> ArrayView2<'_, f64> {
        let cols = self.candidate_columns(c);
        self.features.slice(s![.., cols])
    }

    pub fn candidate_labels(&self, c: usize) -> ArrayView1<'_, f64> {
        self.labels.column(c)
    }

    pub fn latest_for(&self, c: usize) -> ArrayView1<'_, f64> {
        let cols = self.candidate_columns(c);
        self.latest.slice(s![cols])
    }
}

#[derive(Debug, Clone)]
pub struct Datasets {
    pub balls: PoolDataset,
    pub stars: PoolDataset,
    pub meta: DatasetMeta,
    pub schema: FeatureSchema,
}

impl Datasets {
    pub fn pool(&self, pool: Pool) -> &PoolDataset {
        match pool {
            Pool::Balls => &self.balls,
            Pool::Stars => &self.stars,
        }
    }
}

/// Builds both pools from draws in ascending date order.
pub fn build_datasets(draws: &[Draw], config: &FeatureConfig) -> Result<Datasets> {
    if draws.len() < 2 {
        return Err(ModelError::InsufficientData {
            context: "feature building",
            needed: 2,
            available: draws.len(),
        });
    }
    for draw in draws {
        check_numbers(draw)?;
    }
    let schema = FeatureSchema::from_config(config);
    let config = &schema.config;

    let balls = build_pool(draws, Pool::Balls, config, schema.features_per_candidate(Pool::Balls));
    let stars = build_pool(draws, Pool::Stars, config, schema.features_per_candidate(Pool::Stars));

    let meta = DatasetMeta {
        windows: config.windows.clone(),
        ball_features: balls.features_per_candidate,
        star_features: stars.features_per_candidate,
        first_date: draws[0].date,
        last_date: draws[draws.len() - 1].date,
        n_draws: draws.len(),
        n_transitions: draws.len() - 1,
    };
    debug!(
        "datasets: {} transitions, balls {:?}, stars {:?}",
        meta.n_transitions,
        balls.features.dim(),
        stars.features.dim()
    );

    Ok(Datasets {
        balls,
        stars,
        meta,
        schema,
    })
}

/// Draws reach the builder with public fields, so ranges are checked here
/// before any of them is used as an index.
fn check_numbers(draw: &Draw) -> Result<()> {
    for pool in [Pool::Balls, Pool::Stars] {
        let numbers = pool.numbers_from(draw);
        for (k, &n) in numbers.iter().enumerate() {
            let reason = if n == 0 || n as usize > pool.size() {
                format!("{} {} outside 1-{}", pool, n, pool.size())
            } else if numbers[..k].contains(&n) {
                format!("{} {} appears twice", pool, n)
            } else {
                continue;
            };
            return Err(ModelError::InvalidDraw {
                draw_id: draw.draw_id.clone(),
                reason,
            });
        }
    }
    Ok(())
}

fn build_pool(draws: &[Draw], pool: Pool, config: &FeatureConfig, nf: usize) -> PoolDataset {
    let size = pool.size();
    let n = draws.len() - 1;
    let mut features = Array2::zeros((n, size * nf));
    let mut labels = Array2::zeros((n, size));
    let mut state = PoolState::new(pool, config);
    let mut row = Vec::with_capacity(size * nf);

    for (i, draw) in draws.iter().enumerate() {
        state.ingest(pool.numbers_from(draw));
        state.snapshot(draw.date, &mut row);
        if let Some(next) = draws.get(i + 1) {
            features.row_mut(i).assign(&ArrayView1::from(&row));
            for &number in pool.numbers_from(next) {
                labels[[i, number as usize - 1]] = 1.0;
            }
        }
    }

    PoolDataset {
        pool,
        features,
        labels,
        latest: Array1::from(row),
        features_per_candidate: nf,
    }
}
