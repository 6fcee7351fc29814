//! CART tree growing shared by the boosted-tree and random-forest backends.
//!
//! Trees are grown greedily with exact splits: for each candidate feature the rows
//! are sorted once and every boundary between distinct values is scored. What a
//! split is worth and what a leaf stores is decided by a [`SplitCriterion`].

use gridlab_abstraction::FeatureMatrix;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum Node {
    /// Rows with `row[feature] < threshold` go left.
    Split { feature: usize, threshold: f64, gain: f64, left: usize, right: usize },
    Leaf { value: Vec<f64> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    pub(crate) fn leaf_value(&self, row: &[f64]) -> &[f64] {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Split { feature, threshold, left, right, .. } => {
                    idx = if row[*feature] < *threshold { *left } else { *right };
                }
                Node::Leaf { value } => return value,
            }
        }
    }

    /// Total split gain per feature.
    pub(crate) fn gain_by_feature(&self, n_features: usize) -> Vec<f64> {
        let mut out = vec![0.0; n_features];
        for node in &self.nodes {
            if let Node::Split { feature, gain, .. } = node {
                out[*feature] += gain;
            }
        }
        out
    }
}

/// Scores candidate splits and produces leaf values.
pub(crate) trait SplitCriterion {
    type Stats: Clone;

    fn empty(&self) -> Self::Stats;

    fn push(&self, stats: &mut Self::Stats, row: usize);

    /// `parent` minus `part`.
    fn difference(&self, parent: &Self::Stats, part: &Self::Stats) -> Self::Stats;

    /// Gain of splitting `parent` into `left`/`right`, or `None` if the split
    /// violates a child constraint.
    fn gain(&self, parent: &Self::Stats, left: &Self::Stats, right: &Self::Stats) -> Option<f64>;

    fn leaf(&self, stats: &Self::Stats) -> Vec<f64>;
}

#[derive(Debug, Clone)]
pub(crate) struct GrowParams {
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    /// Number of features drawn per split; `None` means all.
    pub max_features: Option<usize>,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    gain: f64,
}

pub(crate) fn grow<C: SplitCriterion>(
    criterion: &C,
    features: &FeatureMatrix,
    rows: Vec<usize>,
    params: &GrowParams,
    mut rng: Option<&mut StdRng>,
) -> Tree {
    let placeholder = || Node::Leaf { value: Vec::new() };
    let mut nodes = vec![placeholder()];
    let mut stack = vec![(0_usize, rows, 0_usize)];

    while let Some((node_idx, rows, depth)) = stack.pop() {
        let mut stats = criterion.empty();
        for &row in &rows {
            criterion.push(&mut stats, row);
        }

        let splittable = rows.len() >= params.min_samples_split.max(2)
            && params.max_depth.is_none_or(|max| depth < max);
        let best = if splittable {
            let candidates = candidate_features(features.n_cols(), params.max_features, rng.as_deref_mut());
            best_split(criterion, features, &rows, &stats, &candidates).or_else(|| {
                // Keep searching the remaining features when the sampled ones are all constant.
                let rest: Vec<usize> = (0..features.n_cols()).filter(|f| !candidates.contains(f)).collect();
                best_split(criterion, features, &rows, &stats, &rest)
            })
        } else {
            None
        };

        match best {
            Some(split) => {
                let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
                    rows.iter().partition(|&&r| features.value(r, split.feature) < split.threshold);
                let left = nodes.len();
                let right = left + 1;
                nodes.push(placeholder());
                nodes.push(placeholder());
                nodes[node_idx] = Node::Split {
                    feature: split.feature,
                    threshold: split.threshold,
                    gain: split.gain,
                    left,
                    right,
                };
                stack.push((right, right_rows, depth + 1));
                stack.push((left, left_rows, depth + 1));
            }
            None => nodes[node_idx] = Node::Leaf { value: criterion.leaf(&stats) },
        }
    }

    Tree { nodes }
}

fn candidate_features(n_cols: usize, max_features: Option<usize>, rng: Option<&mut StdRng>) -> Vec<usize> {
    match (max_features, rng) {
        (Some(k), Some(rng)) if k < n_cols => rand::seq::index::sample(rng, n_cols, k.max(1)).into_vec(),
        _ => (0..n_cols).collect(),
    }
}

fn best_split<C: SplitCriterion>(
    criterion: &C,
    features: &FeatureMatrix,
    rows: &[usize],
    parent: &C::Stats,
    candidates: &[usize],
) -> Option<BestSplit> {
    let mut best: Option<BestSplit> = None;
    let mut sorted: Vec<(f64, usize)> = Vec::with_capacity(rows.len());

    for &feature in candidates {
        sorted.clear();
        sorted.extend(rows.iter().map(|&r| (features.value(r, feature), r)));
        sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut left = criterion.empty();
        for i in 0..sorted.len() - 1 {
            criterion.push(&mut left, sorted[i].1);
            let (lo, hi) = (sorted[i].0, sorted[i + 1].0);
            if lo >= hi {
                continue;
            }
            let right = criterion.difference(parent, &left);
            let Some(gain) = criterion.gain(parent, &left, &right) else {
                continue;
            };
            if gain > 1e-12 && best.as_ref().is_none_or(|b| gain > b.gain) {
                let mid = lo + (hi - lo) / 2.0;
                let threshold = if lo < mid { mid } else { hi };
                best = Some(BestSplit { feature, threshold, gain });
            }
        }
    }

    best
}

/// Second-order gradient criterion (XGBoost-style leaf weights).
pub(crate) struct GradientCriterion<'a> {
    pub grad: &'a [f64],
    pub hess: &'a [f64],
    pub lambda: f64,
    pub gamma: f64,
    pub min_child_weight: f64,
    pub eta: f64,
}

impl GradientCriterion<'_> {
    fn score(&self, (g, h): (f64, f64)) -> f64 {
        g * g / (h + self.lambda)
    }
}

impl SplitCriterion for GradientCriterion<'_> {
    type Stats = (f64, f64);

    fn empty(&self) -> Self::Stats {
        (0.0, 0.0)
    }

    fn push(&self, stats: &mut Self::Stats, row: usize) {
        stats.0 += self.grad[row];
        stats.1 += self.hess[row];
    }

    fn difference(&self, parent: &Self::Stats, part: &Self::Stats) -> Self::Stats {
        (parent.0 - part.0, parent.1 - part.1)
    }

    fn gain(&self, parent: &Self::Stats, left: &Self::Stats, right: &Self::Stats) -> Option<f64> {
        if left.1 < self.min_child_weight || right.1 < self.min_child_weight {
            return None;
        }
        Some(0.5 * (self.score(*left) + self.score(*right) - self.score(*parent)) - self.gamma)
    }

    fn leaf(&self, stats: &Self::Stats) -> Vec<f64> {
        vec![-self.eta * stats.0 / (stats.1 + self.lambda)]
    }
}

/// Squared-error reduction; leaves hold the mean target.
pub(crate) struct VarianceCriterion<'a> {
    pub targets: &'a [f64],
}

impl SplitCriterion for VarianceCriterion<'_> {
    /// (sum, count)
    type Stats = (f64, f64);

    fn empty(&self) -> Self::Stats {
        (0.0, 0.0)
    }

    fn push(&self, stats: &mut Self::Stats, row: usize) {
        stats.0 += self.targets[row];
        stats.1 += 1.0;
    }

    fn difference(&self, parent: &Self::Stats, part: &Self::Stats) -> Self::Stats {
        (parent.0 - part.0, parent.1 - part.1)
    }

    fn gain(&self, parent: &Self::Stats, left: &Self::Stats, right: &Self::Stats) -> Option<f64> {
        if left.1 < 1.0 || right.1 < 1.0 {
            return None;
        }
        Some(left.0 * left.0 / left.1 + right.0 * right.0 / right.1 - parent.0 * parent.0 / parent.1)
    }

    fn leaf(&self, stats: &Self::Stats) -> Vec<f64> {
        vec![if stats.1 > 0.0 { stats.0 / stats.1 } else { 0.0 }]
    }
}

/// Gini impurity reduction; leaves hold the class distribution.
pub(crate) struct GiniCriterion<'a> {
    pub classes: &'a [usize],
    pub n_classes: usize,
}

fn gini_score(counts: &[f64]) -> f64 {
    let total: f64 = counts.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    counts.iter().map(|c| c * c).sum::<f64>() / total
}

impl SplitCriterion for GiniCriterion<'_> {
    type Stats = Vec<f64>;

    fn empty(&self) -> Self::Stats {
        vec![0.0; self.n_classes]
    }

    fn push(&self, stats: &mut Self::Stats, row: usize) {
        stats[self.classes[row]] += 1.0;
    }

    fn difference(&self, parent: &Self::Stats, part: &Self::Stats) -> Self::Stats {
        parent.iter().zip(part).map(|(p, q)| p - q).collect()
    }

    fn gain(&self, parent: &Self::Stats, left: &Self::Stats, right: &Self::Stats) -> Option<f64> {
        if left.iter().sum::<f64>() < 1.0 || right.iter().sum::<f64>() < 1.0 {
            return None;
        }
        Some(gini_score(left) + gini_score(right) - gini_score(parent))
    }

    fn leaf(&self, stats: &Self::Stats) -> Vec<f64> {
        let total: f64 = stats.iter().sum();
        if total <= 0.0 {
            return vec![1.0 / self.n_classes as f64; self.n_classes];
        }
        stats.iter().map(|c| c / total).collect()
    }
}
