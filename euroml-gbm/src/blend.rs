use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};
use crate::features::{FeatureSchema, PoolDataset};

const PROB_EPS: f64 = 1e-6;

/// Mix of model probabilities with frequency, pairing and overdue-gap
/// heuristics read from the latest feature snapshot. The default weights are
/// a starting point only, nothing validates them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlendWeights {
    pub ml: f64,
    pub frequency: f64,
    pub pattern: f64,
    pub gap: f64,
}

impl Default for BlendWeights {
    fn default() -> Self {
        Self {
            ml: 0.4,
            frequency: 0.25,
            pattern: 0.2,
            gap: 0.15,
        }
    }
}

impl BlendWeights {
    pub fn new(ml: f64, frequency: f64, pattern: f64, gap: f64) -> Result<Self> {
        let weights = Self {
            ml,
            frequency,
            pattern,
            gap,
        };
        let all = [ml, frequency, pattern, gap];
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(ModelError::InvalidConfig(format!(
                "blend weights must be finite and non-negative, got {all:?}"
            )));
        }
        if weights.total() <= 0.0 {
            return Err(ModelError::InvalidConfig("blend weights sum to zero".into()));
        }
        Ok(weights)
    }

    /// Parses `ml,frequency,pattern,gap`.
    pub fn parse(s: &str) -> Result<Self> {
        let parts: Vec<f64> = s
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| ModelError::InvalidConfig(format!("blend weights '{s}': {e}")))?;
        match parts.as_slice() {
            &[ml, frequency, pattern, gap] => Self::new(ml, frequency, pattern, gap),
            _ => Err(ModelError::InvalidConfig(format!(
                "expected 4 blend weights (ml,frequency,pattern,gap), got {}",
                parts.len()
            ))),
        }
    }

    fn total(&self) -> f64 {
        self.ml + self.frequency + self.pattern + self.gap
    }

    /// Blended per-candidate probabilities, rescaled so they sum to the
    /// number of picks in the pool while each stays inside (0, 1).
    pub fn apply(&self, ml: &[f64], dataset: &PoolDataset, schema: &FeatureSchema) -> Result<Vec<f64>> {
        let pool = dataset.pool;
        let column = |name: &str| {
            schema
                .index_of(pool, name)
                .ok_or_else(|| ModelError::InvalidConfig(format!("no '{name}' feature for {pool}")))
        };
        let windows = &schema.config.windows;
        let freq_cols: Vec<usize> = windows
            .iter()
            .map(|w| column(&format!("freq_{w}")))
            .collect::<Result<_>>()?;
        let pair_col = column("pair")?;
        let gap_col = column("gap")?;

        // shorter windows weigh more
        let freq_weights: Vec<f64> = (0..windows.len()).map(|k| (windows.len() - k) as f64).collect();
        let freq_total: f64 = freq_weights.iter().sum();
        let expected_gap = pool.size() as f64 / pool.pick_count() as f64;

        let n = dataset.n_candidates();
        if ml.len() != n {
            return Err(ModelError::InvalidConfig(format!(
                "{} model probabilities for {n} {pool} candidates",
                ml.len()
            )));
        }
        let mut frequency = Vec::with_capacity(n);
        let mut pattern = Vec::with_capacity(n);
        let mut overdue = Vec::with_capacity(n);
        for c in 0..n {
            let row = dataset.latest_for(c);
            let f: f64 = freq_cols.iter().zip(&freq_weights).map(|(&i, w)| row[i] * w).sum();
            frequency.push(f / freq_total);
            pattern.push(row[pair_col]);
            overdue.push((row[gap_col] / (2.0 * expected_gap)).min(1.0));
        }

        let components = [
            (self.ml, scaled(ml)),
            (self.frequency, scaled(&frequency)),
            (self.pattern, scaled(&pattern)),
            (self.gap, scaled(&overdue)),
        ];
        let total = self.total();
        let mut mixed: Vec<f64> = (0..n)
            .map(|c| components.iter().map(|(w, v)| w * v[c]).sum::<f64>() / total)
            .collect();

        rescale_capped(&mut mixed, pool.pick_count() as f64);
        Ok(mixed)
    }
}

/// Scales `values` to sum to `target` with every value below 1. Values that
/// would reach the cap are pinned there and the rest share the remainder.
fn rescale_capped(values: &mut [f64], target: f64) {
    let cap = 1.0 - PROB_EPS;
    let mut pinned = vec![false; values.len()];
    loop {
        let free = pinned.iter().filter(|&&p| !p).count();
        if free == 0 {
            break;
        }
        let remaining = target - (values.len() - free) as f64 * cap;
        let free_sum: f64 = values.iter().zip(&pinned).filter(|(_, p)| !**p).map(|(v, _)| *v).sum();
        let scale = if free_sum > 0.0 { remaining / free_sum } else { 0.0 };

        let mut newly_pinned = false;
        for (v, p) in values.iter().zip(pinned.iter_mut()) {
            if !*p && *v * scale >= cap {
                *p = true;
                newly_pinned = true;
            }
        }
        if newly_pinned {
            continue;
        }
        for (v, &p) in values.iter_mut().zip(&pinned) {
            *v = if p {
                cap
            } else if free_sum > 0.0 {
                *v * scale
            } else {
                remaining / free as f64
            };
        }
        break;
    }
    for v in values.iter_mut() {
        *v = v.clamp(PROB_EPS, cap);
    }
}

/// Divides by the maximum so the component spans [0, 1].
fn scaled(values: &[f64]) -> Vec<f64> {
    let max = values.iter().copied().fold(0.0, f64::max);
    if max <= 0.0 {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| v / max).collect()
}
