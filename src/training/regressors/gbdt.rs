//! Gradient boosted regression trees with squared loss.
//!
//! Split search is histogram based: each feature is cut at up to `max_bins`
//! quantile thresholds once per fit, and every node accumulates residual sums
//! per bin before scanning for the best cut. Shrinkage is folded into the
//! stored leaf values, so prediction is `base_score + Σ tree(row)`.

use serde::{Deserialize, Serialize};

use super::{FitError, ModelError, Regressor, check_shape};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    /// Walks from the root. A path longer than the tree means the node links
    /// are broken, which shows up as NaN.
    fn predict(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        for _ in 0..=self.nodes.len() {
            match self.nodes.get(idx) {
                Some(Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    let x = row.get(*feature).copied().unwrap_or(0.0);
                    idx = if x <= *threshold { *left } else { *right };
                }
                Some(Node::Leaf { value }) => return *value,
                None => return 0.0,
            }
        }
        f64::NAN
    }

    /// Children always sit after their parent and inside the node list.
    fn validate(&self, n_features: usize) -> Result<(), String> {
        for (id, node) in self.nodes.iter().enumerate() {
            if let Node::Split {
                feature,
                threshold,
                left,
                right,
            } = node
            {
                for child in [*left, *right] {
                    if child <= id || child >= self.nodes.len() {
                        return Err(format!("node {id} links to node {child}"));
                    }
                }
                if *feature >= n_features {
                    return Err(format!("node {id} splits on feature {feature} of {n_features}"));
                }
                if threshold.is_nan() {
                    return Err(format!("node {id} has a NaN threshold"));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GbdtRegressor {
    pub n_rounds: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub max_bins: usize,

    #[serde(default)]
    base_score: f64,
    #[serde(default)]
    n_features: usize,
    #[serde(default)]
    trees: Vec<Tree>,
}

impl Default for GbdtRegressor {
    fn default() -> Self {
        Self {
            n_rounds: 100,
            learning_rate: 0.1,
            max_depth: 3,
            min_samples_leaf: 3,
            max_bins: 32,
            base_score: 0.0,
            n_features: 0,
            trees: Vec::new(),
        }
    }
}

/// Per-feature cut points and each row's bin under them.
struct Binned {
    cuts: Vec<Vec<f64>>,
    /// `bins[feature][row]`; bin `k` means `x <= cuts[k]`, the last bin is
    /// everything above the highest cut.
    bins: Vec<Vec<u16>>,
}

impl Binned {
    fn new(x: &[Vec<f64>], n_features: usize, max_bins: usize) -> Self {
        let mut cuts = Vec::with_capacity(n_features);
        let mut bins = Vec::with_capacity(n_features);
        for j in 0..n_features {
            let mut values: Vec<f64> = x.iter().map(|r| r[j]).collect();
            values.sort_by(f64::total_cmp);
            values.dedup();

            // Every distinct value but the largest is a candidate cut.
            let mut feature_cuts: Vec<f64> = if values.len() <= max_bins {
                values[..values.len().saturating_sub(1)].to_vec()
            } else {
                (1..max_bins)
                    .map(|q| values[q * values.len() / max_bins])
                    .collect()
            };
            feature_cuts.dedup();
            if let Some(max) = values.last() {
                feature_cuts.retain(|c| c < max);
            }

            bins.push(
                x.iter()
                    .map(|r| feature_cuts.partition_point(|&c| c < r[j]) as u16)
                    .collect(),
            );
            cuts.push(feature_cuts);
        }
        Self { cuts, bins }
    }
}

struct SplitCandidate {
    feature: usize,
    cut: usize,
    gain: f64,
}

impl GbdtRegressor {
    fn grow(&self, binned: &Binned, residual: &[f64], rows: Vec<usize>, depth: usize, nodes: &mut Vec<Node>) -> usize {
        let id = nodes.len();
        let sum: f64 = rows.iter().map(|&i| residual[i]).sum();
        let leaf_value = self.learning_rate * sum / rows.len().max(1) as f64;
        nodes.push(Node::Leaf { value: leaf_value });

        if depth >= self.max_depth || rows.len() < 2 * self.min_samples_leaf {
            return id;
        }
        let Some(best) = self.best_split(binned, residual, &rows, sum) else {
            return id;
        };

        let feature_bins = &binned.bins[best.feature];
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|&i| (feature_bins[i] as usize) <= best.cut);

        let left = self.grow(binned, residual, left_rows, depth + 1, nodes);
        let right = self.grow(binned, residual, right_rows, depth + 1, nodes);
        nodes[id] = Node::Split {
            feature: best.feature,
            threshold: binned.cuts[best.feature][best.cut],
            left,
            right,
        };
        id
    }

    fn best_split(&self, binned: &Binned, residual: &[f64], rows: &[usize], total: f64) -> Option<SplitCandidate> {
        let n = rows.len() as f64;
        let parent_score = total * total / n;
        let mut best: Option<SplitCandidate> = None;

        for (feature, cuts) in binned.cuts.iter().enumerate() {
            if cuts.is_empty() {
                continue;
            }
            let feature_bins = &binned.bins[feature];
            let mut sums = vec![0.0; cuts.len() + 1];
            let mut counts = vec![0usize; cuts.len() + 1];
            for &i in rows {
                let b = feature_bins[i] as usize;
                sums[b] += residual[i];
                counts[b] += 1;
            }

            let (mut left_sum, mut left_n) = (0.0, 0usize);
            for cut in 0..cuts.len() {
                left_sum += sums[cut];
                left_n += counts[cut];
                let right_n = rows.len() - left_n;
                if left_n < self.min_samples_leaf || right_n < self.min_samples_leaf {
                    continue;
                }
                let right_sum = total - left_sum;
                let gain = left_sum * left_sum / left_n as f64
                    + right_sum * right_sum / right_n as f64
                    - parent_score;
                if gain > 1e-12 && best.as_ref().is_none_or(|b| gain > b.gain) {
                    best = Some(SplitCandidate { feature, cut, gain });
                }
            }
        }
        best
    }
}

impl Regressor for GbdtRegressor {
    fn name(&self) -> &'static str {
        "gbdt"
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<(), FitError> {
        let n_features = check_shape(x, y)?;
        let binned = Binned::new(x, n_features, self.max_bins.clamp(2, u16::MAX as usize));

        let base_score = y.iter().sum::<f64>() / y.len() as f64;
        let mut predictions = vec![base_score; y.len()];
        let mut trees = Vec::with_capacity(self.n_rounds);

        for _ in 0..self.n_rounds {
            let residual: Vec<f64> = y.iter().zip(&predictions).map(|(t, p)| t - p).collect();
            let mut nodes = Vec::new();
            self.grow(&binned, &residual, (0..y.len()).collect(), 0, &mut nodes);
            let tree = Tree { nodes };
            for (p, row) in predictions.iter_mut().zip(x) {
                *p += tree.predict(row);
            }
            trees.push(tree);
        }

        self.base_score = base_score;
        self.n_features = n_features;
        self.trees = trees;
        Ok(())
    }

    fn predict_row(&self, row: &[f64]) -> f64 {
        self.base_score + self.trees.iter().map(|t| t.predict(row)).sum::<f64>()
    }

    fn validate(&self) -> Result<(), ModelError> {
        for (i, tree) in self.trees.iter().enumerate() {
            tree.validate(self.n_features)
                .map_err(|detail| ModelError::Malformed(format!("tree {i}: {detail}")))?;
        }
        Ok(())
    }
}
