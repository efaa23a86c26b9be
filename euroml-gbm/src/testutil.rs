use chrono::{Duration, NaiveDate};
use euroml_db::models::Draw;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::config::{BoostParams, FeatureConfig, TrainConfig};

/// Tuesday/Friday draw dates starting on the first Tuesday of 2020.
fn draw_date(i: usize) -> NaiveDate {
    let start = NaiveDate::from_ymd_opt(2020, 1, 7).unwrap();
    let weeks = (i / 2) as i64;
    let extra = if i % 2 == 1 { 3 } else { 0 };
    start + Duration::days(weeks * 7 + extra)
}

/// Balls `[5k+1 ..= 5k+5]` with k = i mod 10, stars cycling `[1,2] .. [11,12]`.
pub fn cyclic_draws(n: usize) -> Vec<Draw> {
    (0..n)
        .map(|i| {
            let base = ((i % 10) * 5) as u8;
            let s = ((i % 6) * 2) as u8;
            Draw::new(
                format!("{:04}", i + 1),
                draw_date(i),
                [base + 1, base + 2, base + 3, base + 4, base + 5],
                [s + 1, s + 2],
            )
            .unwrap()
        })
        .collect()
}

/// Reproducible uniform draws in the modern ruleset.
pub fn make_test_draws(n: usize) -> Vec<Draw> {
    let mut rng = StdRng::seed_from_u64(7);
    let mut balls: Vec<u8> = (1..=50).collect();
    let mut stars: Vec<u8> = (1..=12).collect();
    (0..n)
        .map(|i| {
            balls.shuffle(&mut rng);
            stars.shuffle(&mut rng);
            Draw::new(
                format!("{:04}", i + 1),
                draw_date(i),
                [balls[0], balls[1], balls[2], balls[3], balls[4]],
                [stars[0], stars[1]],
            )
            .unwrap()
        })
        .collect()
}

/// Draws where ball 1 and star 1 appear in every draw.
pub fn biased_draws(n: usize) -> Vec<Draw> {
    let mut draws = make_test_draws(n);
    for draw in &mut draws {
        if !draw.balls.contains(&1) {
            draw.balls[0] = 1;
        }
        if !draw.stars.contains(&1) {
            draw.stars[0] = 1;
        }
    }
    draws
}

/// Same numbers as `make_test_draws` but dated from `start` onwards.
pub fn draws_from(start: NaiveDate, n: usize) -> Vec<Draw> {
    let offset = draw_date(0);
    make_test_draws(n)
        .into_iter()
        .map(|mut d| {
            d.date = start + (d.date - offset);
            d
        })
        .collect()
}

/// Small windows and few rounds so full training runs stay fast in tests.
pub fn fast_config() -> TrainConfig {
    TrainConfig {
        folds: 3,
        min_draws: 60,
        boost: BoostParams {
            n_rounds: 8,
            min_samples_leaf: 10,
            ..BoostParams::default()
        },
        features: FeatureConfig {
            windows: vec![5, 20],
            ..FeatureConfig::default()
        },
        ..TrainConfig::default()
    }
}
