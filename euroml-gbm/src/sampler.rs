use std::fmt;
use std::str::FromStr;

use euroml_db::models::{Combination, Pool};
use log::warn;
use rand::distr::weighted::WeightedIndex;
use rand::prelude::Distribution;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};
use crate::scoring::{CandidateScore, ScoreTable};

const MIN_WEIGHT: f64 = 1e-12;

/// How a combination is assembled from a score table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// Highest probabilities, no randomness.
    Topk,
    /// Weighted sampling without replacement over the whole pool.
    Random,
    /// Weighted sampling restricted to the top-N candidates.
    Hybrid,
}

impl Method {
    pub fn name(&self) -> &'static str {
        match self {
            Method::Topk => "topk",
            Method::Random => "random",
            Method::Hybrid => "hybrid",
        }
    }

    pub fn is_random(&self) -> bool {
        !matches!(self, Method::Topk)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Method {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "topk" | "top-k" => Ok(Method::Topk),
            "random" | "weighted-random" => Ok(Method::Random),
            "hybrid" => Ok(Method::Hybrid),
            other => Err(ModelError::UnknownMethod(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestOptions {
    pub method: Method,
    pub count: usize,
    pub seed: u64,
    pub hybrid_top_balls: usize,
    pub hybrid_top_stars: usize,
    /// Regenerations allowed for one combination before giving up.
    pub max_retries: usize,
}

impl Default for SuggestOptions {
    fn default() -> Self {
        Self {
            method: Method::Hybrid,
            count: 5,
            seed: 42,
            hybrid_top_balls: 15,
            hybrid_top_stars: 5,
            max_retries: 10,
        }
    }
}

/// Assembles `options.count` combinations. Random methods draw from one
/// generator seeded with `options.seed`, so a given table and seed always
/// produce the same list.
pub fn suggest(table: &ScoreTable, options: &SuggestOptions) -> Result<Vec<Combination>> {
    if options.method == Method::Hybrid
        && (options.hybrid_top_balls <= Pool::Balls.pick_count() || options.hybrid_top_stars <= Pool::Stars.pick_count())
    {
        // N == K would always return the top-K combination
        return Err(ModelError::InvalidConfig(format!(
            "hybrid top-N must exceed 5 balls and 2 stars, got {} and {}",
            options.hybrid_top_balls, options.hybrid_top_stars
        )));
    }

    let mut rng = StdRng::seed_from_u64(options.seed);
    let mut combos = Vec::with_capacity(options.count);
    for _ in 0..options.count {
        combos.push(one_combination(table, options, &mut rng)?);
    }
    Ok(combos)
}

fn one_combination(table: &ScoreTable, options: &SuggestOptions, rng: &mut StdRng) -> Result<Combination> {
    let attempts = if options.method.is_random() {
        options.max_retries.max(1)
    } else {
        1
    };
    let mut last_error = None;
    for attempt in 0..attempts {
        let built = match options.method {
            Method::Topk => top_k(table),
            Method::Random => sampled(table, usize::MAX, usize::MAX, rng),
            Method::Hybrid => sampled(table, options.hybrid_top_balls, options.hybrid_top_stars, rng),
        };
        match built.and_then(|(balls, stars)| validated(table, &balls, &stars, options.method)) {
            Ok(combo) => return Ok(combo),
            Err(e) => {
                warn!("{} combination rejected (attempt {}): {}", options.method, attempt + 1, e);
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| ModelError::InvalidCombination("no combination generated".into())))
}

fn top_k(table: &ScoreTable) -> Result<(Vec<u8>, Vec<u8>)> {
    let pick = |pool: Pool| -> Vec<u8> {
        table
            .pool(pool)
            .iter()
            .take(pool.pick_count())
            .map(|s| s.number)
            .collect()
    };
    Ok((pick(Pool::Balls), pick(Pool::Stars)))
}

fn sampled(table: &ScoreTable, top_balls: usize, top_stars: usize, rng: &mut StdRng) -> Result<(Vec<u8>, Vec<u8>)> {
    let balls = sample_without_replacement(table.pool(Pool::Balls), top_balls, Pool::Balls.pick_count(), rng)?;
    let stars = sample_without_replacement(table.pool(Pool::Stars), top_stars, Pool::Stars.pick_count(), rng)?;
    Ok((balls, stars))
}

/// Draws `count` distinct numbers from the `top` best-ranked candidates,
/// proportionally to their probability.
fn sample_without_replacement(
    scores: &[CandidateScore],
    top: usize,
    count: usize,
    rng: &mut StdRng,
) -> Result<Vec<u8>> {
    let mut available: Vec<(u8, f64)> = scores
        .iter()
        .take(top)
        .map(|s| (s.number, s.probability.max(MIN_WEIGHT)))
        .collect();
    let mut selected = Vec::with_capacity(count);
    for _ in 0..count {
        let weights: Vec<f64> = available.iter().map(|(_, w)| *w).collect();
        let dist = WeightedIndex::new(&weights).map_err(|e| ModelError::Sampling(e.to_string()))?;
        let (number, _) = available.remove(dist.sample(rng));
        selected.push(number);
    }
    Ok(selected)
}

/// Boundary check: only well-formed combinations leave the sampler.
fn validated(table: &ScoreTable, balls: &[u8], stars: &[u8], method: Method) -> Result<Combination> {
    let probs: Vec<f64> = balls
        .iter()
        .map(|&b| table.probability(Pool::Balls, b))
        .chain(stars.iter().map(|&s| table.probability(Pool::Stars, s)))
        .collect::<Option<_>>()
        .ok_or_else(|| ModelError::InvalidCombination(format!("numbers {balls:?} + {stars:?} are not all scored")))?;
    let confidence = probs.iter().sum::<f64>() / probs.len().max(1) as f64;
    Combination::new(balls, stars, confidence, method.name()).map_err(|e| ModelError::InvalidCombination(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn table() -> ScoreTable {
        let balls: Vec<f64> = (0..50).map(|i| 0.02 + (i % 7) as f64 * 0.03 + i as f64 * 0.001).collect();
        let stars: Vec<f64> = (0..12).map(|i| 0.1 + (i % 4) as f64 * 0.05 + i as f64 * 0.002).collect();
        ScoreTable::new("test", NaiveDate::default(), &balls, &stars, false)
    }

    fn options(method: Method, seed: u64) -> SuggestOptions {
        SuggestOptions {
            method,
            count: 20,
            seed,
            ..SuggestOptions::default()
        }
    }

    #[test]
    fn test_method_from_str() {
        assert_eq!("topk".parse::<Method>().unwrap(), Method::Topk);
        assert_eq!("Weighted-Random".parse::<Method>().unwrap(), Method::Random);
        assert_eq!(" hybrid ".parse::<Method>().unwrap(), Method::Hybrid);
        assert!(matches!("best".parse::<Method>(), Err(ModelError::UnknownMethod(_))));
    }

    #[test]
    fn test_topk_is_repeatable() {
        let table = table();
        let combos = suggest(&table, &SuggestOptions { count: 3, ..options(Method::Topk, 1) }).unwrap();
        assert_eq!(combos.len(), 3);
        assert!(combos.iter().all(|c| *c == combos[0]));

        let best: Vec<u8> = table.balls.iter().take(5).map(|s| s.number).collect();
        let mut sorted = best.clone();
        sorted.sort_unstable();
        assert_eq!(combos[0].balls.to_vec(), sorted);
        assert_eq!(combos[0].method, "topk");

        let other_seed = suggest(&table, &SuggestOptions { count: 3, ..options(Method::Topk, 99) }).unwrap();
        assert_eq!(other_seed, combos);
    }

    #[test]
    fn test_invariants_hold_for_every_method() {
        let table = table();
        for method in [Method::Topk, Method::Random, Method::Hybrid] {
            for seed in 0..10 {
                for combo in suggest(&table, &options(method, seed)).unwrap() {
                    let mut balls = combo.balls.to_vec();
                    balls.dedup();
                    assert_eq!(balls.len(), 5, "{method} seed {seed}: {combo}");
                    assert!(combo.balls.iter().all(|&b| (1..=50).contains(&b)));
                    assert!(combo.stars[0] < combo.stars[1]);
                    assert!(combo.stars.iter().all(|&s| (1..=12).contains(&s)));
                    assert!(combo.confidence > 0.0 && combo.confidence < 1.0);
                }
            }
        }
    }

    #[test]
    fn test_random_methods_are_deterministic_per_seed() {
        let table = table();
        for method in [Method::Random, Method::Hybrid] {
            let a = suggest(&table, &options(method, 7)).unwrap();
            let b = suggest(&table, &options(method, 7)).unwrap();
            assert_eq!(a, b);
            let c = suggest(&table, &options(method, 8)).unwrap();
            assert_ne!(a, c);
        }
    }

    #[test]
    fn test_hybrid_stays_in_top_n() {
        let table = table();
        let top_balls: Vec<u8> = table.balls.iter().take(15).map(|s| s.number).collect();
        let top_stars: Vec<u8> = table.stars.iter().take(5).map(|s| s.number).collect();
        for combo in suggest(&table, &options(Method::Hybrid, 3)).unwrap() {
            assert!(combo.balls.iter().all(|b| top_balls.contains(b)));
            assert!(combo.stars.iter().all(|s| top_stars.contains(s)));
        }
    }

    #[test]
    fn test_confidence_is_mean_of_selected() {
        let table = table();
        let combo = &suggest(&table, &SuggestOptions { count: 1, ..options(Method::Topk, 0) }).unwrap()[0];
        let expected: f64 = table.balls.iter().take(5).map(|s| s.probability).sum::<f64>()
            + table.stars.iter().take(2).map(|s| s.probability).sum::<f64>();
        assert!((combo.confidence - expected / 7.0).abs() < 1e-12);
    }

    #[test]
    fn test_incomplete_table_is_rejected() {
        let mut table = table();
        table.stars.truncate(1);
        let err = suggest(&table, &options(Method::Topk, 0)).unwrap_err();
        assert!(matches!(err, ModelError::InvalidCombination(_)));
        let err = suggest(&table, &options(Method::Random, 0)).unwrap_err();
        assert!(matches!(err, ModelError::Sampling(_)));
    }

    #[test]
    fn test_hybrid_top_n_must_exceed_pick_count() {
        for (balls, stars) in [(15, 1), (15, 2), (5, 5), (4, 5)] {
            let opts = SuggestOptions {
                hybrid_top_balls: balls,
                hybrid_top_stars: stars,
                ..options(Method::Hybrid, 0)
            };
            assert!(
                matches!(suggest(&table(), &opts), Err(ModelError::InvalidConfig(_))),
                "top {balls}/{stars} accepted"
            );
        }
        let smallest = SuggestOptions {
            hybrid_top_balls: 6,
            hybrid_top_stars: 3,
            ..options(Method::Hybrid, 0)
        };
        assert!(suggest(&table(), &smallest).is_ok());
        let topk_ignores_n = SuggestOptions {
            hybrid_top_balls: 5,
            ..options(Method::Topk, 0)
        };
        assert!(suggest(&table(), &topk_ignores_n).is_ok());
    }
}
