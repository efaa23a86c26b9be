//! Gradient-boosted decision trees for one binary target.
//!
//! Logistic loss with second-order (Newton) leaf values, histogram splits on
//! per-feature quantile thresholds, and per-tree row/feature subsampling.

use ndarray::{ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::config::BoostParams;

const PROB_EPS: f64 = 1e-6;
const MIN_GAIN: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
enum TreeNode {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

impl TreeNode {
    fn predict(&self, row: ArrayView1<f64>) -> f64 {
        match self {
            TreeNode::Leaf { value } => *value,
            TreeNode::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                if row[*feature] <= *threshold {
                    left.predict(row)
                } else {
                    right.predict(row)
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostedTrees {
    base_score: f64,
    trees: Vec<TreeNode>,
}

impl BoostedTrees {
    /// Fits on rows of `x` against 0/1 labels `y`; positives weigh `pos_weight`.
    pub fn fit(x: ArrayView2<f64>, y: ArrayView1<f64>, pos_weight: f64, params: &BoostParams, seed: u64) -> Self {
        let n = x.nrows();
        let weights: Vec<f64> = y.iter().map(|&l| if l > 0.5 { pos_weight } else { 1.0 }).collect();
        let total_w: f64 = weights.iter().sum();
        let pos_w: f64 = y.iter().zip(&weights).map(|(&l, &w)| l * w).sum();
        let p0 = (pos_w / total_w.max(f64::MIN_POSITIVE)).clamp(PROB_EPS, 1.0 - PROB_EPS);
        let base_score = (p0 / (1.0 - p0)).ln();

        let bins = Histogram::build(x, params.max_bins);
        let mut margin = vec![base_score; n];
        let mut grad = vec![0.0; n];
        let mut hess = vec![0.0; n];
        let mut rng = StdRng::seed_from_u64(seed);
        let mut all_rows: Vec<usize> = (0..n).collect();
        let mut all_features: Vec<usize> = (0..x.ncols()).collect();
        let n_rows = ((n as f64 * params.row_subsample).ceil() as usize).clamp(1, n.max(1));
        let n_features = ((x.ncols() as f64 * params.feature_subsample).ceil() as usize).clamp(1, x.ncols().max(1));

        let mut trees = Vec::with_capacity(params.n_rounds);
        for _ in 0..params.n_rounds {
            for i in 0..n {
                let p = sigmoid(margin[i]);
                grad[i] = weights[i] * (p - y[i]);
                hess[i] = weights[i] * (p * (1.0 - p)).max(1e-16);
            }

            all_rows.shuffle(&mut rng);
            all_features.shuffle(&mut rng);
            let mut rows = all_rows[..n_rows].to_vec();
            let mut features = all_features[..n_features].to_vec();
            rows.sort_unstable();
            features.sort_unstable();

            let grower = Grower {
                bins: &bins,
                grad: &grad,
                hess: &hess,
                features: &features,
                params,
            };
            let tree = grower.grow(rows, 0);
            for (i, m) in margin.iter_mut().enumerate() {
                *m += tree.predict(x.row(i));
            }
            trees.push(tree);
        }

        Self { base_score, trees }
    }

    pub fn predict_proba(&self, row: ArrayView1<f64>) -> f64 {
        let margin = self.base_score + self.trees.iter().map(|t| t.predict(row)).sum::<f64>();
        sigmoid(margin)
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

/// Binned copy of the training matrix: thresholds and bin index per feature.
struct Histogram {
    thresholds: Vec<Vec<f64>>,
    // [feature][row]
    binned: Vec<Vec<u8>>,
}

impl Histogram {
    fn build(x: ArrayView2<f64>, max_bins: usize) -> Self {
        let max_bins = max_bins.clamp(2, 255);
        let mut thresholds = Vec::with_capacity(x.ncols());
        let mut binned = Vec::with_capacity(x.ncols());
        for column in x.columns() {
            let t = split_points(column, max_bins);
            binned.push(column.iter().map(|&v| t.partition_point(|&th| th < v) as u8).collect());
            thresholds.push(t);
        }
        Self { thresholds, binned }
    }
}

/// Candidate thresholds: midpoints between distinct values when few,
/// quantiles otherwise. `x <= t[k]` falls in bins `0..=k`.
fn split_points(column: ArrayView1<f64>, max_bins: usize) -> Vec<f64> {
    let mut values: Vec<f64> = column.iter().copied().filter(|v| v.is_finite()).collect();
    values.sort_by(|a, b| a.total_cmp(b));
    let mut distinct = values.clone();
    distinct.dedup();
    if distinct.len() < 2 {
        return Vec::new();
    }
    if distinct.len() <= max_bins {
        return distinct.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect();
    }
    let max = distinct[distinct.len() - 1];
    let mut t: Vec<f64> = (1..max_bins)
        .map(|k| values[k * values.len() / max_bins])
        .filter(|&v| v < max)
        .collect();
    t.dedup();
    t
}

struct Grower<'a> {
    bins: &'a Histogram,
    grad: &'a [f64],
    hess: &'a [f64],
    features: &'a [usize],
    params: &'a BoostParams,
}

struct BestSplit {
    feature: usize,
    bin: usize,
    gain: f64,
}

impl Grower<'_> {
    fn grow(&self, rows: Vec<usize>, depth: usize) -> TreeNode {
        let g: f64 = rows.iter().map(|&i| self.grad[i]).sum();
        let h: f64 = rows.iter().map(|&i| self.hess[i]).sum();
        let leaf = TreeNode::Leaf {
            value: -g / (h + self.params.lambda) * self.params.learning_rate,
        };
        let min_leaf = self.params.min_samples_leaf.max(1);
        if depth >= self.params.max_depth || rows.len() < 2 * min_leaf {
            return leaf;
        }

        let Some(best) = self.best_split(&rows, g, h, min_leaf) else {
            return leaf;
        };
        let column = &self.bins.binned[best.feature];
        let (left, right): (Vec<usize>, Vec<usize>) = rows.iter().partition(|&&i| column[i] as usize <= best.bin);

        TreeNode::Split {
            feature: best.feature,
            threshold: self.bins.thresholds[best.feature][best.bin],
            left: Box::new(self.grow(left, depth + 1)),
            right: Box::new(self.grow(right, depth + 1)),
        }
    }

    fn best_split(&self, rows: &[usize], g: f64, h: f64, min_leaf: usize) -> Option<BestSplit> {
        let lambda = self.params.lambda;
        let parent = g * g / (h + lambda);
        let mut best: Option<BestSplit> = None;

        for &f in self.features {
            let n_thresholds = self.bins.thresholds[f].len();
            if n_thresholds == 0 {
                continue;
            }
            let column = &self.bins.binned[f];
            let mut hist_g = vec![0.0; n_thresholds + 1];
            let mut hist_h = vec![0.0; n_thresholds + 1];
            let mut hist_n = vec![0usize; n_thresholds + 1];
            for &i in rows {
                let b = column[i] as usize;
                hist_g[b] += self.grad[i];
                hist_h[b] += self.hess[i];
                hist_n[b] += 1;
            }

            let (mut gl, mut hl, mut nl) = (0.0, 0.0, 0usize);
            for b in 0..n_thresholds {
                gl += hist_g[b];
                hl += hist_h[b];
                nl += hist_n[b];
                let nr = rows.len() - nl;
                if nl < min_leaf {
                    continue;
                }
                if nr < min_leaf {
                    break;
                }
                let (gr, hr) = (g - gl, h - hl);
                let gain = gl * gl / (hl + lambda) + gr * gr / (hr + lambda) - parent;
                if gain > MIN_GAIN && best.as_ref().map_or(true, |s| gain > s.gain) {
                    best = Some(BestSplit { feature: f, bin: b, gain });
                }
            }
        }
        best
    }
}

/// One classifier slot. Candidates whose labels are single-class in a fold
/// get a smoothed constant rate instead of a boosted model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CandidateModel {
    Boosted(BoostedTrees),
    Constant { probability: f64 },
}

impl CandidateModel {
    pub fn fit(x: ArrayView2<f64>, y: ArrayView1<f64>, pos_weight: f64, params: &BoostParams, seed: u64) -> Self {
        let n = y.len();
        let positives = y.iter().filter(|&&l| l > 0.5).count();
        if positives == 0 || positives == n {
            return CandidateModel::Constant {
                probability: (positives as f64 + 1.0) / (n as f64 + 2.0),
            };
        }
        CandidateModel::Boosted(BoostedTrees::fit(x, y, pos_weight, params, seed))
    }

    pub fn predict(&self, row: ArrayView1<f64>) -> f64 {
        match self {
            CandidateModel::Boosted(trees) => trees.predict_proba(row),
            CandidateModel::Constant { probability } => *probability,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, CandidateModel::Constant { .. })
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2};

    fn params() -> BoostParams {
        BoostParams {
            n_rounds: 30,
            min_samples_leaf: 5,
            ..BoostParams::default()
        }
    }

    /// Label is 1 when the first feature exceeds 0.7, second feature is noise.
    fn threshold_data(n: usize) -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((n, 2), |(i, j)| {
            if j == 0 {
                i as f64 / n as f64
            } else {
                ((i * 37) % 11) as f64
            }
        });
        let y = Array1::from_shape_fn(n, |i| if i as f64 / n as f64 > 0.7 { 1.0 } else { 0.0 });
        (x, y)
    }

    #[test]
    fn test_learns_threshold() {
        let (x, y) = threshold_data(200);
        let model = BoostedTrees::fit(x.view(), y.view(), 1.0, &params(), 1);
        assert_eq!(model.n_trees(), 30);
        let low = model.predict_proba(Array1::from(vec![0.2, 3.0]).view());
        let high = model.predict_proba(Array1::from(vec![0.9, 3.0]).view());
        assert!(low < 0.2, "low = {low}");
        assert!(high > 0.8, "high = {high}");
    }

    #[test]
    fn test_fit_is_deterministic_per_seed() {
        let (x, y) = threshold_data(120);
        let a = BoostedTrees::fit(x.view(), y.view(), 1.0, &params(), 9);
        let b = BoostedTrees::fit(x.view(), y.view(), 1.0, &params(), 9);
        assert_eq!(a, b);
    }

    #[test]
    fn test_positive_weight_raises_probabilities() {
        let (x, y) = threshold_data(200);
        let row = Array1::from(vec![0.5, 1.0]);
        let plain = BoostedTrees::fit(x.view(), y.view(), 1.0, &params(), 3);
        let weighted = BoostedTrees::fit(x.view(), y.view(), 5.0, &params(), 3);
        assert!(weighted.predict_proba(row.view()) > plain.predict_proba(row.view()));
    }

    #[test]
    fn test_degenerate_labels_give_constant() {
        let x = Array2::zeros((10, 3));
        let zeros = Array1::zeros(10);
        let model = CandidateModel::fit(x.view(), zeros.view(), 1.0, &params(), 0);
        assert!(model.is_constant());
        let p = model.predict(x.row(0));
        assert!((p - 1.0 / 12.0).abs() < 1e-12);

        let ones = Array1::ones(10);
        let model = CandidateModel::fit(x.view(), ones.view(), 1.0, &params(), 0);
        assert!((model.predict(x.row(0)) - 11.0 / 12.0).abs() < 1e-12);
    }

    #[test]
    fn test_constant_feature_gives_base_rate() {
        let x = Array2::from_elem((100, 2), 1.0);
        let y = Array1::from_shape_fn(100, |i| if i % 10 == 0 { 1.0 } else { 0.0 });
        let params = BoostParams {
            row_subsample: 1.0,
            ..params()
        };
        let model = BoostedTrees::fit(x.view(), y.view(), 1.0, &params, 0);
        let p = model.predict_proba(x.row(0));
        assert!((p - 0.1).abs() < 1e-9, "p = {p}");
    }

    #[test]
    fn test_split_points() {
        let col = Array1::from(vec![1.0, 1.0, 2.0, 3.0]);
        assert_eq!(split_points(col.view(), 32), vec![1.5, 2.5]);
        let col = Array1::from_shape_fn(1000, |i| i as f64);
        let t = split_points(col.view(), 32);
        assert!(t.len() <= 31);
        assert!(t.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_model_serde_roundtrip() {
        let (x, y) = threshold_data(80);
        let model = CandidateModel::fit(x.view(), y.view(), 1.0, &params(), 2);
        let json = serde_json::to_string(&model).unwrap();
        assert!(json.contains("\"kind\":\"boosted\""));
        let restored: CandidateModel = serde_json::from_str(&json).unwrap();
        for row in x.rows() {
            assert!((restored.predict(row) - model.predict(row)).abs() < 1e-9);
        }
    }
}
