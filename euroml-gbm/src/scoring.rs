use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use euroml_db::models::{Draw, Pool};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::artifact;
use crate::blend::BlendWeights;
use crate::config::FeatureConfig;
use crate::error::{ModelError, Result};
use crate::features::{build_datasets, FeatureSchema};
use crate::training::TrainedModels;

/// Explicit holder of the loaded model set. Passed to every scoring call
/// instead of any process-wide cache.
#[derive(Debug)]
pub struct ModelContext {
    dir: PathBuf,
    loaded: Option<TrainedModels>,
}

impl ModelContext {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            loaded: None,
        }
    }

    /// Context over an in-memory model set, nothing read from disk.
    pub fn with_models(dir: impl Into<PathBuf>, models: TrainedModels) -> Self {
        Self {
            dir: dir.into(),
            loaded: Some(models),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    /// Loads from disk on first use, then serves the cached set.
    pub fn load(&mut self) -> Result<&TrainedModels> {
        if self.loaded.is_none() {
            self.loaded = Some(artifact::load(&self.dir)?);
        }
        self.loaded
            .as_ref()
            .ok_or_else(|| ModelError::ArtifactMissing(self.dir.clone()))
    }

    /// Drops the cached set and reads the artifacts again.
    pub fn reload(&mut self) -> Result<&TrainedModels> {
        self.loaded = None;
        self.load()
    }

    /// Fails with `SchemaMismatch` unless the models were trained with the
    /// same feature layout as `config`. When the directory holds artifacts,
    /// a stale cache is refreshed once first; the cached set is kept if that
    /// refresh fails.
    pub fn ensure_compatible(&mut self, config: &FeatureConfig) -> Result<()> {
        let found = FeatureSchema::from_config(config);
        if self.load()?.meta.schema == found {
            return Ok(());
        }
        if artifact::exists(&self.dir) {
            debug!("cached model schema differs, reloading from {}", self.dir.display());
            match artifact::load(&self.dir) {
                Ok(fresh) => self.loaded = Some(fresh),
                Err(e) => warn!("keeping cached models, reload from {} failed: {}", self.dir.display(), e),
            }
        }
        let expected = &self.load()?.meta.schema;
        if *expected == found {
            return Ok(());
        }
        Err(ModelError::SchemaMismatch {
            expected: Box::new(expected.clone()),
            found: Box::new(found),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CandidateScore {
    pub number: u8,
    pub probability: f64,
}

/// Per-candidate probabilities of both pools, each sorted by decreasing
/// probability, ties by lower number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreTable {
    pub run_id: String,
    /// Date of the last draw the scores are conditioned on.
    pub as_of: NaiveDate,
    pub blended: bool,
    pub balls: Vec<CandidateScore>,
    pub stars: Vec<CandidateScore>,
}

impl ScoreTable {
    pub fn new(run_id: impl Into<String>, as_of: NaiveDate, balls: &[f64], stars: &[f64], blended: bool) -> Self {
        Self {
            run_id: run_id.into(),
            as_of,
            blended,
            balls: ranked(balls),
            stars: ranked(stars),
        }
    }

    pub fn pool(&self, pool: Pool) -> &[CandidateScore] {
        match pool {
            Pool::Balls => &self.balls,
            Pool::Stars => &self.stars,
        }
    }

    pub fn probability(&self, pool: Pool, number: u8) -> Option<f64> {
        self.pool(pool)
            .iter()
            .find(|s| s.number == number)
            .map(|s| s.probability)
    }
}

fn ranked(probs: &[f64]) -> Vec<CandidateScore> {
    let mut scores: Vec<CandidateScore> = probs
        .iter()
        .enumerate()
        .map(|(i, &p)| CandidateScore {
            number: (i + 1) as u8,
            probability: p,
        })
        .collect();
    scores.sort_by(|a, b| b.probability.total_cmp(&a.probability).then(a.number.cmp(&b.number)));
    scores
}

/// Scores the next draw from the full history in `draws` (date order).
/// Only draws from the model's `history_from` onwards are used, so the
/// snapshot matches the one training saw.
pub fn score(
    ctx: &mut ModelContext,
    draws: &[Draw],
    config: &FeatureConfig,
    blend: Option<&BlendWeights>,
) -> Result<ScoreTable> {
    ctx.ensure_compatible(config)?;
    let models = ctx.load()?;
    let from = draws.partition_point(|d| d.date < models.meta.history_from);
    let history = &draws[from..];
    let datasets = build_datasets(history, config)?;

    let mut balls = models.balls.predict_latest(&datasets.balls)?;
    let mut stars = models.stars.predict_latest(&datasets.stars)?;
    if let Some(weights) = blend {
        balls = weights.apply(&balls, &datasets.balls, &datasets.schema)?;
        stars = weights.apply(&stars, &datasets.stars, &datasets.schema)?;
    }
    info!(
        "scored {} draws ({} to {}) with models {}",
        datasets.meta.n_draws, datasets.meta.first_date, datasets.meta.last_date, models.meta.run_id
    );

    Ok(ScoreTable::new(
        models.meta.run_id.clone(),
        datasets.meta.last_date,
        &balls,
        &stars,
        blend.is_some(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{fast_config, make_test_draws};
    use crate::training::train;

    #[test]
    fn test_ranked_ties_by_number() {
        let table = ScoreTable::new("r", NaiveDate::default(), &[0.1, 0.3, 0.3, 0.2], &[0.5, 0.5], false);
        let order: Vec<u8> = table.balls.iter().map(|s| s.number).collect();
        assert_eq!(order, vec![2, 3, 4, 1]);
        assert_eq!(table.stars[0].number, 1);
        assert_eq!(table.probability(Pool::Balls, 4), Some(0.2));
        assert_eq!(table.probability(Pool::Stars, 9), None);
    }

    #[test]
    fn test_score_roundtrip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let draws = make_test_draws(90);
        let config = fast_config();
        let models = train(&draws, &config, |_| {}).unwrap();
        artifact::save(dir.path(), &models).unwrap();

        let mut ctx = ModelContext::new(dir.path());
        assert!(!ctx.is_loaded());
        let table = score(&mut ctx, &draws, &config.features, None).unwrap();
        assert!(ctx.is_loaded());
        assert_eq!(table.balls.len(), 50);
        assert_eq!(table.stars.len(), 12);
        assert_eq!(table.as_of, draws[89].date);
        assert_eq!(table.run_id, models.meta.run_id);
        assert!(table.balls.windows(2).all(|w| w[0].probability >= w[1].probability));
        assert!(table.balls.iter().all(|s| s.probability > 0.0 && s.probability < 1.0));
    }

    #[test]
    fn test_score_rejects_other_feature_config() {
        let draws = make_test_draws(80);
        let config = fast_config();
        let models = train(&draws, &config, |_| {}).unwrap();
        let mut ctx = ModelContext::with_models("unused", models);

        let err = score(&mut ctx, &draws, &FeatureConfig::default(), None).unwrap_err();
        assert!(matches!(err, ModelError::SchemaMismatch { .. }));
        assert!(ctx.is_loaded());
        assert!(score(&mut ctx, &draws, &config.features, None).is_ok());

        let dir = tempfile::tempdir().unwrap();
        let models = train(&draws, &config, |_| {}).unwrap();
        artifact::save(dir.path(), &models).unwrap();
        let mut ctx = ModelContext::new(dir.path());
        let err = score(&mut ctx, &draws, &FeatureConfig::default(), None).unwrap_err();
        assert!(matches!(err, ModelError::SchemaMismatch { .. }));
        assert!(err.to_string().contains("windows=[5,20]"));

        assert!(score(&mut ctx, &draws, &config.features, None).is_ok());
    }

    #[test]
    fn test_mismatch_keeps_cache_when_artifacts_removed() {
        let dir = tempfile::tempdir().unwrap();
        let draws = make_test_draws(80);
        let config = fast_config();
        let models = train(&draws, &config, |_| {}).unwrap();
        artifact::save(dir.path(), &models).unwrap();

        let mut ctx = ModelContext::new(dir.path());
        ctx.load().unwrap();
        std::fs::remove_file(dir.path().join(artifact::META_FILE)).unwrap();

        let err = ctx.ensure_compatible(&FeatureConfig::default()).unwrap_err();
        match err {
            ModelError::SchemaMismatch { expected, .. } => assert_eq!(*expected, models.meta.schema),
            other => panic!("expected a schema mismatch, got {other:?}"),
        }
        assert!(ctx.ensure_compatible(&config.features).is_ok());
    }

    #[test]
    fn test_mismatch_keeps_cache_when_reload_fails() {
        let dir = tempfile::tempdir().unwrap();
        let draws = make_test_draws(80);
        let config = fast_config();
        let models = train(&draws, &config, |_| {}).unwrap();
        artifact::save(dir.path(), &models).unwrap();

        let mut ctx = ModelContext::new(dir.path());
        ctx.load().unwrap();
        std::fs::write(dir.path().join(artifact::BALLS_FILE), "{").unwrap();

        let err = ctx.ensure_compatible(&FeatureConfig::default()).unwrap_err();
        assert!(matches!(err, ModelError::SchemaMismatch { .. }));
        assert_eq!(ctx.load().unwrap().meta.run_id, models.meta.run_id);
    }

    #[test]
    fn test_reload_picks_up_new_run() {
        let dir = tempfile::tempdir().unwrap();
        let draws = make_test_draws(80);
        let config = fast_config();
        let first = train(&draws, &config, |_| {}).unwrap();
        artifact::save(dir.path(), &first).unwrap();

        let mut ctx = ModelContext::new(dir.path());
        ctx.load().unwrap();

        let mut second = train(&draws, &config, |_| {}).unwrap();
        second.meta.run_id = "second".into();
        second.balls.run_id = "second".into();
        second.stars.run_id = "second".into();
        artifact::save(dir.path(), &second).unwrap();

        assert_eq!(ctx.load().unwrap().meta.run_id, first.meta.run_id);
        assert_eq!(ctx.reload().unwrap().meta.run_id, "second");
    }

    #[test]
    fn test_blended_scores_flagged() {
        let draws = make_test_draws(80);
        let config = fast_config();
        let models = train(&draws, &config, |_| {}).unwrap();
        let mut ctx = ModelContext::with_models("unused", models);
        let table = score(&mut ctx, &draws, &config.features, Some(&BlendWeights::default())).unwrap();
        assert!(table.blended);
        let sum: f64 = table.stars.iter().map(|s| s.probability).sum();
        assert!((sum - 2.0).abs() < 1e-6);
    }
}
