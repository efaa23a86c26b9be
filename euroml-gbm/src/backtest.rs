//! Walk-forward evaluation: for each of the last draws, train on the history
//! strictly before it, score, suggest, and compare with what was drawn.

use chrono::NaiveDate;
use euroml_db::models::{Combination, Draw, Pool};
use log::info;
use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::blend::BlendWeights;
use crate::config::TrainConfig;
use crate::error::{ModelError, Result};
use crate::sampler::{suggest, SuggestOptions};
use crate::scoring::{score, ModelContext, ScoreTable};
use crate::training::{log_loss, train};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestOptions {
    /// Number of trailing draws evaluated.
    pub steps: usize,
    /// Retrain every `retrain_every` steps, reusing the last models in between.
    pub retrain_every: usize,
    pub suggest: SuggestOptions,
    pub blend: Option<BlendWeights>,
}

impl Default for BacktestOptions {
    fn default() -> Self {
        Self {
            steps: 10,
            retrain_every: 1,
            suggest: SuggestOptions::default(),
            blend: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinationHits {
    pub combination: Combination,
    pub ball_hits: usize,
    pub star_hits: usize,
}

/// Outcome of one held-out draw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestStep {
    pub draw_id: String,
    pub date: NaiveDate,
    pub run_id: String,
    /// Draws the models in use were trained on.
    pub trained_on: usize,
    pub combinations: Vec<CombinationHits>,
    pub brier_balls: f64,
    pub brier_stars: f64,
    pub log_loss_balls: f64,
    pub log_loss_stars: f64,
}

impl BacktestStep {
    pub fn best_hits(&self) -> (usize, usize) {
        self.combinations
            .iter()
            .map(|c| (c.ball_hits, c.star_hits))
            .max()
            .unwrap_or((0, 0))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    pub steps: Vec<BacktestStep>,
    pub mean_ball_hits: f64,
    pub mean_star_hits: f64,
    /// Hits a uniformly random combination scores on average.
    pub random_ball_hits: f64,
    pub random_star_hits: f64,
    pub mean_brier_balls: f64,
    pub mean_brier_stars: f64,
    pub mean_log_loss_balls: f64,
    pub mean_log_loss_stars: f64,
}

/// Runs the walk-forward loop over `draws` (date order). `on_step` is called
/// after each evaluated draw.
pub fn backtest<F>(draws: &[Draw], config: &TrainConfig, options: &BacktestOptions, mut on_step: F) -> Result<BacktestReport>
where
    F: FnMut(&BacktestStep),
{
    if options.steps == 0 || options.retrain_every == 0 {
        return Err(ModelError::InvalidConfig(format!(
            "backtest needs at least one step and a positive retrain interval, got {} and {}",
            options.steps, options.retrain_every
        )));
    }
    if options.steps >= draws.len() {
        return Err(ModelError::InsufficientData {
            context: "backtest",
            needed: options.steps + 1,
            available: draws.len(),
        });
    }

    let first_target = draws.len() - options.steps;
    let mut ctx: Option<ModelContext> = None;
    let mut trained_on = 0;
    let mut steps = Vec::with_capacity(options.steps);

    for (k, t) in (first_target..draws.len()).enumerate() {
        let history = &draws[..t];
        let target = &draws[t];
        if k % options.retrain_every == 0 || ctx.is_none() {
            let models = train(history, config, |_| {})?;
            ctx = Some(ModelContext::with_models("", models));
            trained_on = t;
        }
        let Some(ctx) = ctx.as_mut() else {
            continue;
        };
        let table = score(ctx, history, &config.features, options.blend.as_ref())?;

        let step_options = SuggestOptions {
            seed: options.suggest.seed.wrapping_add(k as u64),
            ..options.suggest.clone()
        };
        let combinations = suggest(&table, &step_options)?
            .into_iter()
            .map(|combination| CombinationHits {
                ball_hits: combination.balls.iter().filter(|b| target.balls.contains(b)).count(),
                star_hits: combination.stars.iter().filter(|s| target.stars.contains(s)).count(),
                combination,
            })
            .collect();

        let (brier_balls, log_loss_balls) = calibration(&table, Pool::Balls, target);
        let (brier_stars, log_loss_stars) = calibration(&table, Pool::Stars, target);
        let step = BacktestStep {
            draw_id: target.draw_id.clone(),
            date: target.date,
            run_id: table.run_id.clone(),
            trained_on,
            combinations,
            brier_balls,
            brier_stars,
            log_loss_balls,
            log_loss_stars,
        };
        info!(
            "backtest {} ({}): best hits {:?}, brier {:.4}/{:.4}",
            step.draw_id,
            step.date,
            step.best_hits(),
            brier_balls,
            brier_stars
        );
        on_step(&step);
        steps.push(step);
    }

    Ok(summarize(steps))
}

/// Brier score and log-loss of a pool's probabilities against the drawn numbers.
fn calibration(table: &ScoreTable, pool: Pool, target: &Draw) -> (f64, f64) {
    let drawn = pool.numbers_from(target);
    let size = pool.size();
    let mut probs = vec![0.0; size];
    for s in table.pool(pool) {
        if let Some(p) = probs.get_mut(s.number as usize - 1) {
            *p = s.probability;
        }
    }
    let labels = Array1::from_shape_fn(size, |c| if drawn.contains(&((c + 1) as u8)) { 1.0 } else { 0.0 });
    let brier = probs.iter().zip(labels.iter()).map(|(p, y)| (p - y).powi(2)).sum::<f64>() / size as f64;
    (brier, log_loss(labels.view(), &probs))
}

fn summarize(steps: Vec<BacktestStep>) -> BacktestReport {
    let n = steps.len().max(1) as f64;
    let mean = |f: &dyn Fn(&BacktestStep) -> f64| steps.iter().map(f).sum::<f64>() / n;
    let hits = |step: &BacktestStep, balls: bool| {
        let total: usize = step
            .combinations
            .iter()
            .map(|c| if balls { c.ball_hits } else { c.star_hits })
            .sum();
        total as f64 / step.combinations.len().max(1) as f64
    };
    let random = |pool: Pool| (pool.pick_count() * pool.pick_count()) as f64 / pool.size() as f64;

    BacktestReport {
        mean_ball_hits: mean(&|s| hits(s, true)),
        mean_star_hits: mean(&|s| hits(s, false)),
        random_ball_hits: random(Pool::Balls),
        random_star_hits: random(Pool::Stars),
        mean_brier_balls: mean(&|s| s.brier_balls),
        mean_brier_stars: mean(&|s| s.brier_stars),
        mean_log_loss_balls: mean(&|s| s.log_loss_balls),
        mean_log_loss_stars: mean(&|s| s.log_loss_stars),
        steps,
    }
}
