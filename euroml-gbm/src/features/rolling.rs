use std::collections::VecDeque;

use chrono::{Datelike, NaiveDate};
use euroml_db::models::Pool;

use crate::config::FeatureConfig;

/// Incremental per-pool statistics over the draws ingested so far.
/// A snapshot only ever reads state built from draws `0..=i`.
pub(crate) struct PoolState<'a> {
    pool: Pool,
    config: &'a FeatureConfig,
    history: Vec<Vec<u8>>,
    // [window][candidate]
    counts: Vec<Vec<u32>>,
    last_seen: Vec<Option<usize>>,
    streak: Vec<i64>,
    appearances: Vec<u32>,
    positions: Vec<[u32; 5]>,
    gaps: Vec<VecDeque<usize>>,
    // Co-occurrences inside the longest window, size × size.
    pairs: Vec<Vec<u32>>,
}

impl<'a> PoolState<'a> {
    pub fn new(pool: Pool, config: &'a FeatureConfig) -> Self {
        let size = pool.size();
        Self {
            pool,
            config,
            history: Vec::new(),
            counts: vec![vec![0; size]; config.windows.len()],
            last_seen: vec![None; size],
            streak: vec![0; size],
            appearances: vec![0; size],
            positions: vec![[0; 5]; size],
            gaps: vec![VecDeque::new(); size],
            pairs: vec![vec![0; size]; size],
        }
    }

    pub fn ingest(&mut self, numbers: &[u8]) {
        let i = self.history.len();
        let mut sorted: Vec<u8> = numbers.to_vec();
        sorted.sort_unstable();

        for (wi, &w) in self.config.windows.iter().enumerate() {
            for &n in &sorted {
                self.counts[wi][n as usize - 1] += 1;
            }
            if i >= w {
                for &n in &self.history[i - w] {
                    self.counts[wi][n as usize - 1] -= 1;
                }
            }
        }

        let long = self.config.long_window();
        add_pairs(&mut self.pairs, &sorted, 1);
        if i >= long {
            let expired = self.history[i - long].clone();
            add_pairs(&mut self.pairs, &expired, -1);
        }

        for c in 0..self.pool.size() {
            let number = (c + 1) as u8;
            if sorted.contains(&number) {
                self.streak[c] = if self.streak[c] > 0 { self.streak[c] + 1 } else { 1 };
                if let Some(last) = self.last_seen[c] {
                    let gaps = &mut self.gaps[c];
                    gaps.push_back(i - last);
                    while gaps.len() > self.config.gap_history {
                        gaps.pop_front();
                    }
                }
                self.last_seen[c] = Some(i);
                self.appearances[c] += 1;
            } else {
                self.streak[c] = if self.streak[c] < 0 { self.streak[c] - 1 } else { -1 };
            }
        }

        if self.pool == Pool::Balls {
            for (slot, &n) in sorted.iter().enumerate().take(5) {
                self.positions[n as usize - 1][slot] += 1;
            }
        }

        self.history.push(sorted);
    }

    /// Writes the features of every candidate for the latest ingested draw,
    /// candidate-major, into `out` (length `size × features_per_candidate`).
    pub fn snapshot(&self, date: NaiveDate, out: &mut Vec<f64>) {
        out.clear();
        let Some(i) = self.history.len().checked_sub(1) else {
            return;
        };
        let windows = &self.config.windows;
        let elapsed = i + 1;
        let day_of_week = date.weekday().num_days_from_monday() as f64 / 6.0;
        let month = date.month0() as f64 / 11.0;

        let top = self.top_candidates(self.pair_top() + 1);
        let long_eff = self.config.long_window().min(elapsed) as f64;
        let pair_norm = long_eff * (self.pool.pick_count() - 1) as f64;

        for c in 0..self.pool.size() {
            let freqs: Vec<f64> = windows
                .iter()
                .enumerate()
                .map(|(wi, &w)| self.counts[wi][c] as f64 / w.min(elapsed) as f64)
                .collect();
            out.extend_from_slice(&freqs);

            let gap = match self.last_seen[c] {
                Some(last) => (i - last) as f64,
                None => elapsed as f64,
            };
            out.push(gap);
            out.push((self.streak[c] as f64 / self.config.streak_scale).tanh());

            if self.pool == Pool::Balls {
                let seen = self.appearances[c];
                for slot in 0..5 {
                    out.push(if seen == 0 {
                        0.2
                    } else {
                        self.positions[c][slot] as f64 / seen as f64
                    });
                }
            }

            let momentum = freqs.first().copied().unwrap_or(0.0) - freqs.last().copied().unwrap_or(0.0);
            out.push(momentum);

            let together: u32 = top
                .iter()
                .filter(|&&t| t != c)
                .take(self.pair_top())
                .map(|&t| self.pairs[c][t])
                .sum();
            out.push(if pair_norm > 0.0 {
                (together as f64 / pair_norm).min(1.0)
            } else {
                0.0
            });

            out.push(self.gap_variance(c));
            out.push(day_of_week);
            out.push(month);
        }
    }

    fn pair_top(&self) -> usize {
        match self.pool {
            Pool::Balls => self.config.pair_top_balls,
            Pool::Stars => self.config.pair_top_stars,
        }
    }

    /// Most frequent candidates of the longest window, ties by lower number.
    fn top_candidates(&self, n: usize) -> Vec<usize> {
        let Some(long_counts) = self.counts.last() else {
            return Vec::new();
        };
        let mut order: Vec<usize> = (0..self.pool.size()).collect();
        order.sort_by(|&a, &b| long_counts[b].cmp(&long_counts[a]).then(a.cmp(&b)));
        order.truncate(n);
        order
    }

    fn gap_variance(&self, c: usize) -> f64 {
        let gaps = &self.gaps[c];
        if gaps.len() < 3 {
            return 0.0;
        }
        let n = gaps.len() as f64;
        let mean = gaps.iter().sum::<usize>() as f64 / n;
        let var = gaps.iter().map(|&g| (g as f64 - mean).powi(2)).sum::<f64>() / n;
        (var / self.config.gap_variance_scale).min(1.0)
    }
}

fn add_pairs(pairs: &mut [Vec<u32>], numbers: &[u8], delta: i32) {
    for (k, &a) in numbers.iter().enumerate() {
        for &b in &numbers[k + 1..] {
            let (a, b) = (a as usize - 1, b as usize - 1);
            if delta > 0 {
                pairs[a][b] += 1;
                pairs[b][a] += 1;
            } else {
                pairs[a][b] -= 1;
                pairs[b][a] -= 1;
            }
        }
    }
}
