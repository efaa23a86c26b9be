use std::ops::Range;

use chrono::{DateTime, NaiveDate, Utc};
use euroml_db::models::{Draw, Era, Pool};
use log::{info, warn};
use ndarray::{s, ArrayView1};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{EraPolicy, TrainConfig};
use crate::error::{ModelError, Result};
use crate::features::{build_datasets, DatasetMeta, FeatureSchema, PoolDataset};
use crate::gbdt::CandidateModel;

const LOG_LOSS_EPS: f64 = 1e-15;

/// One chronological fold: every validation index is after every training index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldSplit {
    pub train: Range<usize>,
    pub validate: Range<usize>,
}

/// Expanding-window time-series split over `n` rows into `folds` folds.
pub fn time_series_splits(n: usize, folds: usize) -> Result<Vec<FoldSplit>> {
    let folds = folds.max(1);
    let test = n / (folds + 1);
    if test == 0 {
        return Err(ModelError::InsufficientData {
            context: "cross-validation",
            needed: folds + 1,
            available: n,
        });
    }
    Ok((0..folds)
        .map(|f| {
            let train_end = n - (folds - f) * test;
            FoldSplit {
                train: 0..train_end,
                validate: train_end..train_end + test,
            }
        })
        .collect())
}

/// Mean binary cross-entropy with probabilities clipped away from 0 and 1.
pub fn log_loss(labels: ArrayView1<f64>, probs: &[f64]) -> f64 {
    if probs.is_empty() {
        return 0.0;
    }
    let total: f64 = labels
        .iter()
        .zip(probs)
        .map(|(&y, &p)| {
            let p = p.clamp(LOG_LOSS_EPS, 1.0 - LOG_LOSS_EPS);
            -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
        })
        .sum();
    total / probs.len() as f64
}

/// Positive-class weight from the negative/positive ratio, clamped to `[1, max]`.
pub fn class_weight(labels: ArrayView1<f64>, max: f64) -> f64 {
    let pos = labels.iter().filter(|&&y| y > 0.5).count();
    let neg = labels.len() - pos;
    if pos == 0 {
        return max.max(1.0);
    }
    (neg as f64 / pos as f64).clamp(1.0, max.max(1.0))
}

/// Draws kept for training under the era policy. Input is in date order.
pub fn select_history<'a>(draws: &'a [Draw], config: &TrainConfig) -> &'a [Draw] {
    let modern_from = draws.partition_point(|d| Era::of(d.date) < Era::Modern);
    let modern = &draws[modern_from..];
    match config.era_policy {
        EraPolicy::All => draws,
        EraPolicy::ModernOnly => modern,
        EraPolicy::ModernPreferred if modern.len() >= config.modern_min_draws => {
            if modern_from > 0 {
                info!(
                    "keeping {} modern-era draws, ignoring {} earlier draws",
                    modern.len(),
                    modern_from
                );
            }
            modern
        }
        EraPolicy::ModernPreferred => {
            info!(
                "only {} modern-era draws (< {}), using the full history",
                modern.len(),
                config.modern_min_draws
            );
            draws
        }
    }
}

/// Classifiers of one pool, indexed by candidate (number - 1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolModel {
    pub run_id: String,
    pub pool: Pool,
    pub fold: usize,
    pub features_per_candidate: usize,
    pub candidates: Vec<CandidateModel>,
}

impl PoolModel {
    /// Appearance probability of every candidate for the dataset's latest snapshot.
    pub fn predict_latest(&self, dataset: &PoolDataset) -> Result<Vec<f64>> {
        if dataset.pool != self.pool
            || dataset.n_candidates() != self.candidates.len()
            || dataset.features_per_candidate != self.features_per_candidate
        {
            return Err(ModelError::ArtifactInconsistent(format!(
                "{} model has {} candidates × {} features, dataset has {} × {}",
                self.pool,
                self.candidates.len(),
                self.features_per_candidate,
                dataset.n_candidates(),
                dataset.features_per_candidate
            )));
        }
        Ok(self
            .candidates
            .iter()
            .enumerate()
            .map(|(c, model)| model.predict(dataset.latest_for(c)))
            .collect())
    }

    pub fn constant_count(&self) -> usize {
        self.candidates.iter().filter(|m| m.is_constant()).count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolMetrics {
    pub fold_log_loss: Vec<f64>,
    pub mean_log_loss: f64,
    pub std_log_loss: f64,
    pub best_fold: usize,
    pub best_log_loss: f64,
    /// Log-loss of the training base rate on the chosen fold's validation rows.
    pub baseline_log_loss: f64,
    pub degenerate_candidates: Vec<usize>,
    pub class_weights: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMeta {
    pub run_id: String,
    pub trained_at: DateTime<Utc>,
    /// First draw date of the training history; scoring rebuilds from here.
    pub history_from: NaiveDate,
    pub data: DatasetMeta,
    pub schema: FeatureSchema,
    pub config: TrainConfig,
    pub balls: PoolMetrics,
    pub stars: PoolMetrics,
}

impl ModelMeta {
    pub fn metrics(&self, pool: Pool) -> &PoolMetrics {
        match pool {
            Pool::Balls => &self.balls,
            Pool::Stars => &self.stars,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrainedModels {
    pub balls: PoolModel,
    pub stars: PoolModel,
    pub meta: ModelMeta,
}

impl TrainedModels {
    pub fn pool(&self, pool: Pool) -> &PoolModel {
        match pool {
            Pool::Balls => &self.balls,
            Pool::Stars => &self.stars,
        }
    }
}

/// Progress notification emitted after each fitted fold.
#[derive(Debug, Clone)]
pub struct FoldReport {
    pub pool: Pool,
    pub fold: usize,
    pub folds: usize,
    pub log_loss: f64,
    pub degenerate: usize,
}

/// Trains both pools. Fails before any fit when the history is too short.
pub fn train<F>(draws: &[Draw], config: &TrainConfig, mut on_fold: F) -> Result<TrainedModels>
where
    F: FnMut(&FoldReport),
{
    let history = select_history(draws, config);
    if history.len() < config.min_draws {
        return Err(ModelError::InsufficientData {
            context: "training",
            needed: config.min_draws,
            available: history.len(),
        });
    }
    let datasets = build_datasets(history, &config.features)?;
    info!(
        "training on {} draws ({} to {}), {} transitions",
        datasets.meta.n_draws, datasets.meta.first_date, datasets.meta.last_date, datasets.meta.n_transitions
    );

    let trained_at = Utc::now();
    let run_id = trained_at.format("%Y%m%dT%H%M%S%.3fZ").to_string();

    let (balls, ball_metrics) = train_pool(&datasets.balls, config, &run_id, &mut on_fold)?;
    let (stars, star_metrics) = train_pool(&datasets.stars, config, &run_id, &mut on_fold)?;

    let meta = ModelMeta {
        run_id,
        trained_at,
        history_from: datasets.meta.first_date,
        data: datasets.meta,
        schema: datasets.schema,
        config: config.clone(),
        balls: ball_metrics,
        stars: star_metrics,
    };
    Ok(TrainedModels { balls, stars, meta })
}

struct FoldFit {
    models: Vec<CandidateModel>,
    weights: Vec<f64>,
    log_loss: f64,
    baseline: f64,
    degenerate: usize,
}

fn train_pool<F>(data: &PoolDataset, config: &TrainConfig, run_id: &str, on_fold: &mut F) -> Result<(PoolModel, PoolMetrics)>
where
    F: FnMut(&FoldReport),
{
    let splits = time_series_splits(data.n_samples(), config.folds)?;
    let mut best: Option<(usize, FoldFit)> = None;
    let mut fold_log_loss = Vec::with_capacity(splits.len());
    let mut degenerate_candidates = Vec::with_capacity(splits.len());

    for (f, split) in splits.iter().enumerate() {
        let fit = fit_fold(data, config, split, f);
        if fit.degenerate > 0 {
            warn!(
                "{} fold {}: {} single-class candidates, using constant probability",
                data.pool, f, fit.degenerate
            );
        }
        info!(
            "{} fold {}/{}: log-loss {:.5} (base rate {:.5})",
            data.pool,
            f + 1,
            splits.len(),
            fit.log_loss,
            fit.baseline
        );
        on_fold(&FoldReport {
            pool: data.pool,
            fold: f,
            folds: splits.len(),
            log_loss: fit.log_loss,
            degenerate: fit.degenerate,
        });
        fold_log_loss.push(fit.log_loss);
        degenerate_candidates.push(fit.degenerate);
        if best.as_ref().map_or(true, |(_, b)| fit.log_loss < b.log_loss) {
            best = Some((f, fit));
        }
    }

    let Some((best_fold, fit)) = best else {
        return Err(ModelError::InsufficientData {
            context: "cross-validation",
            needed: config.folds + 1,
            available: data.n_samples(),
        });
    };
    info!("{}: selected fold {} (log-loss {:.5})", data.pool, best_fold + 1, fit.log_loss);

    let n = fold_log_loss.len() as f64;
    let mean = fold_log_loss.iter().sum::<f64>() / n;
    let std = (fold_log_loss.iter().map(|l| (l - mean).powi(2)).sum::<f64>() / n).sqrt();

    let metrics = PoolMetrics {
        mean_log_loss: mean,
        std_log_loss: std,
        best_fold,
        best_log_loss: fit.log_loss,
        baseline_log_loss: fit.baseline,
        fold_log_loss,
        degenerate_candidates,
        class_weights: fit.weights,
    };
    let model = PoolModel {
        run_id: run_id.to_string(),
        pool: data.pool,
        fold: best_fold,
        features_per_candidate: data.features_per_candidate,
        candidates: fit.models,
    };
    Ok((model, metrics))
}

fn fit_fold(data: &PoolDataset, config: &TrainConfig, split: &FoldSplit, fold: usize) -> FoldFit {
    let pool_offset = match data.pool {
        Pool::Balls => 0,
        Pool::Stars => 100,
    };
    let results: Vec<(CandidateModel, f64, f64, f64)> = (0..data.n_candidates())
        .into_par_iter()
        .map(|c| {
            let x = data.candidate_features(c);
            let y = data.candidate_labels(c);
            let (x_train, y_train) = (x.slice(s![split.train.clone(), ..]), y.slice(s![split.train.clone()]));
            let (x_val, y_val) = (x.slice(s![split.validate.clone(), ..]), y.slice(s![split.validate.clone()]));

            let weight = if config.balance_classes {
                class_weight(y_train, config.max_class_weight)
            } else {
                1.0
            };
            let seed = config
                .boost
                .seed
                .wrapping_add((fold * 1000 + pool_offset + c) as u64);
            let model = CandidateModel::fit(x_train, y_train, weight, &config.boost, seed);

            let probs: Vec<f64> = x_val.rows().into_iter().map(|row| model.predict(row)).collect();
            let rate = y_train.mean().unwrap_or(0.0);
            let baseline = log_loss(y_val, &vec![rate; y_val.len()]);
            (model, weight, log_loss(y_val, &probs), baseline)
        })
        .collect();

    let n = results.len().max(1) as f64;
    let mut fit = FoldFit {
        models: Vec::with_capacity(results.len()),
        weights: Vec::with_capacity(results.len()),
        log_loss: 0.0,
        baseline: 0.0,
        degenerate: 0,
    };
    for (model, weight, loss, baseline) in results {
        if model.is_constant() {
            fit.degenerate += 1;
        }
        fit.log_loss += loss / n;
        fit.baseline += baseline / n;
        fit.models.push(model);
        fit.weights.push(weight);
    }
    fit
}
