//! Random forest classifier: bootstrapped CART trees with per-split feature sampling

use crate::error::PipelineError;
use ndarray::{Array1, Array2, ArrayView1};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Impurity criterion used to rank candidate splits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Criterion {
    Gini,
    Entropy,
}

/// Number of features examined at each split
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaxFeatures {
    /// Classifier default, same as `Sqrt`
    Auto,
    Sqrt,
    Log2,
    /// Every feature at every split
    All,
}

impl MaxFeatures {
    /// Resolve the strategy against a concrete feature count
    pub fn resolve(self, n_features: usize) -> usize {
        let n = n_features as f64;
        let k = match self {
            MaxFeatures::Auto | MaxFeatures::Sqrt => n.sqrt().floor() as usize,
            MaxFeatures::Log2 => n.log2().floor() as usize,
            MaxFeatures::All => n_features,
        };
        k.clamp(1, n_features.max(1))
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Criterion::Gini => write!(f, "gini"),
            Criterion::Entropy => write!(f, "entropy"),
        }
    }
}

impl fmt::Display for MaxFeatures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MaxFeatures::Auto => "auto",
            MaxFeatures::Sqrt => "sqrt",
            MaxFeatures::Log2 => "log2",
            MaxFeatures::All => "all",
        };
        write!(f, "{}", name)
    }
}

/// Hyperparameters of a single forest
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_features: MaxFeatures,
    pub max_depth: usize,
    pub criterion: Criterion,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub bootstrap: bool,
    /// Base seed; tree `i` draws from `seed + i`
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_features: MaxFeatures::Sqrt,
            max_depth: usize::MAX,
            criterion: Criterion::Gini,
            min_samples_split: 2,
            min_samples_leaf: 1,
            bootstrap: true,
            seed: 42,
        }
    }
}

impl fmt::Display for ForestParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "n_estimators={}, max_features={}, max_depth={}, criterion={}",
            self.n_estimators, self.max_features, self.max_depth, self.criterion
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum TreeNode {
    Leaf {
        /// Class frequencies of the training rows that reached this leaf
        distribution: Vec<f64>,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

impl TreeNode {
    fn leaf_for(&self, row: ArrayView1<f64>) -> &[f64] {
        let mut node = self;
        loop {
            match node {
                TreeNode::Leaf { distribution } => return distribution,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] <= *threshold { &**left } else { &**right };
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DecisionTree {
    root: TreeNode,
    /// Unnormalized impurity decrease per feature
    importances: Vec<f64>,
}

struct TreeBuilder<'a> {
    x: &'a Array2<f64>,
    y: &'a Array1<usize>,
    n_classes: usize,
    max_features: usize,
    params: &'a ForestParams,
    importances: Vec<f64>,
    rng: ChaCha8Rng,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    gain: f64,
    left_impurity: f64,
    right_impurity: f64,
}

impl<'a> TreeBuilder<'a> {
    fn class_counts(&self, indices: &[usize]) -> Vec<usize> {
        let mut counts = vec![0usize; self.n_classes];
        for &i in indices {
            counts[self.y[i]] += 1;
        }
        counts
    }

    fn leaf(&self, counts: &[usize], n: usize) -> TreeNode {
        let distribution = counts
            .iter()
            .map(|&c| if n > 0 { c as f64 / n as f64 } else { 0.0 })
            .collect();
        TreeNode::Leaf { distribution }
    }

    fn build(&mut self, indices: Vec<usize>, depth: usize) -> TreeNode {
        let n = indices.len();
        let counts = self.class_counts(&indices);
        let node_impurity = impurity(self.params.criterion, &counts, n);

        if n < self.params.min_samples_split
            || n < 2 * self.params.min_samples_leaf
            || depth >= self.params.max_depth
            || node_impurity <= f64::EPSILON
        {
            return self.leaf(&counts, n);
        }

        let Some(best) = self.find_best_split(&indices, &counts, node_impurity) else {
            return self.leaf(&counts, n);
        };

        let (left, right): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .partition(|&&i| self.x[[i, best.feature]] <= best.threshold);

        let (n_left, n_right) = (left.len() as f64, right.len() as f64);
        self.importances[best.feature] += n as f64 * node_impurity
            - n_left * best.left_impurity
            - n_right * best.right_impurity;

        let left = Box::new(self.build(left, depth + 1));
        let right = Box::new(self.build(right, depth + 1));

        TreeNode::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        }
    }

    /// Scan features in random order; keep scanning past `max_features`
    /// until at least one valid split has been seen.
    fn find_best_split(
        &mut self,
        indices: &[usize],
        parent_counts: &[usize],
        parent_impurity: f64,
    ) -> Option<BestSplit> {
        let n = indices.len();
        let mut features: Vec<usize> = (0..self.x.ncols()).collect();
        features.shuffle(&mut self.rng);

        let mut best: Option<BestSplit> = None;
        let mut sorted = indices.to_vec();

        for (visited, &feature) in features.iter().enumerate() {
            if visited >= self.max_features && best.is_some() {
                break;
            }

            sorted.sort_unstable_by(|&a, &b| self.x[[a, feature]].total_cmp(&self.x[[b, feature]]));

            let mut left_counts = vec![0usize; self.n_classes];
            let mut right_counts = parent_counts.to_vec();

            for pos in 0..n - 1 {
                let label = self.y[sorted[pos]];
                left_counts[label] += 1;
                right_counts[label] -= 1;

                let here = self.x[[sorted[pos], feature]];
                let next = self.x[[sorted[pos + 1], feature]];
                if here == next {
                    continue;
                }

                let n_left = pos + 1;
                let n_right = n - n_left;
                if n_left < self.params.min_samples_leaf || n_right < self.params.min_samples_leaf {
                    continue;
                }

                let left_impurity = impurity(self.params.criterion, &left_counts, n_left);
                let right_impurity = impurity(self.params.criterion, &right_counts, n_right);
                let weighted =
                    (n_left as f64 * left_impurity + n_right as f64 * right_impurity) / n as f64;
                let gain = parent_impurity - weighted;

                if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.gain) {
                    best = Some(BestSplit {
                        feature,
                        threshold: here + (next - here) / 2.0,
                        gain,
                        left_impurity,
                        right_impurity,
                    });
                }
            }
        }

        best
    }
}

fn impurity(criterion: Criterion, counts: &[usize], n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let n = n as f64;
    match criterion {
        Criterion::Gini => 1.0 - counts.iter().map(|&c| (c as f64 / n).powi(2)).sum::<f64>(),
        Criterion::Entropy => -counts
            .iter()
            .filter(|&&c| c > 0)
            .map(|&c| {
                let p = c as f64 / n;
                p * p.log2()
            })
            .sum::<f64>(),
    }
}

/// Fitted random forest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    params: ForestParams,
    trees: Vec<DecisionTree>,
    n_features: usize,
    n_classes: usize,
    feature_importances: Array1<f64>,
}

impl RandomForest {
    /// Fit a forest on `x` and class labels `y` (0-based).
    ///
    /// Trees are built in parallel on the current rayon pool. Each tree is
    /// seeded from `params.seed + tree_index`, so the result does not depend
    /// on the number of worker threads.
    pub fn fit(params: &ForestParams, x: &Array2<f64>, y: &Array1<usize>) -> crate::Result<Self> {
        let n_samples = x.nrows();
        let n_features = x.ncols();

        if n_samples == 0 || n_features == 0 {
            return Err(PipelineError::FitFailure("cannot fit a forest on an empty matrix".into()).into());
        }
        if y.len() != n_samples {
            return Err(PipelineError::FitFailure(format!(
                "{} rows in X but {} labels",
                n_samples,
                y.len()
            ))
            .into());
        }
        if params.n_estimators == 0 {
            return Err(PipelineError::FitFailure("n_estimators must be positive".into()).into());
        }

        let n_classes = y.iter().copied().max().unwrap_or(0).max(1) + 1;
        let max_features = params.max_features.resolve(n_features);

        let trees: Vec<DecisionTree> = (0..params.n_estimators)
            .into_par_iter()
            .map(|tree_idx| {
                let mut rng = ChaCha8Rng::seed_from_u64(params.seed.wrapping_add(tree_idx as u64));
                let sample: Vec<usize> = if params.bootstrap {
                    (0..n_samples).map(|_| rng.gen_range(0..n_samples)).collect()
                } else {
                    (0..n_samples).collect()
                };

                let mut builder = TreeBuilder {
                    x,
                    y,
                    n_classes,
                    max_features,
                    params,
                    importances: vec![0.0; n_features],
                    rng,
                };
                let root = builder.build(sample, 0);
                DecisionTree {
                    root,
                    importances: builder.importances,
                }
            })
            .collect();

        let feature_importances = average_importances(&trees, n_features);

        Ok(Self {
            params: *params,
            trees,
            n_features,
            n_classes,
            feature_importances,
        })
    }

    fn check_width(&self, x: &Array2<f64>) -> crate::Result<()> {
        if x.ncols() != self.n_features {
            return Err(PipelineError::SchemaMismatch {
                column: "<feature matrix>".to_string(),
                reason: format!("expected {} features, got {}", self.n_features, x.ncols()),
            }
            .into());
        }
        Ok(())
    }

    /// Mean of the leaf class distributions across trees, shape `(n_rows, n_classes)`
    pub fn predict_proba(&self, x: &Array2<f64>) -> crate::Result<Array2<f64>> {
        self.check_width(x)?;

        let rows: Vec<Vec<f64>> = (0..x.nrows())
            .into_par_iter()
            .map(|i| {
                let row = x.row(i);
                let mut acc = vec![0.0; self.n_classes];
                for tree in &self.trees {
                    for (a, p) in acc.iter_mut().zip(tree.root.leaf_for(row)) {
                        *a += p;
                    }
                }
                let n_trees = self.trees.len() as f64;
                acc.iter_mut().for_each(|a| *a /= n_trees);
                acc
            })
            .collect();

        let flat: Vec<f64> = rows.into_iter().flatten().collect();
        Ok(Array2::from_shape_vec((x.nrows(), self.n_classes), flat)?)
    }

    /// Most probable class per row; ties go to the lower class
    pub fn predict(&self, x: &Array2<f64>) -> crate::Result<Array1<usize>> {
        let proba = self.predict_proba(x)?;
        Ok(proba
            .outer_iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .fold((0usize, f64::NEG_INFINITY), |best, (class, &p)| {
                        if p > best.1 {
                            (class, p)
                        } else {
                            best
                        }
                    })
                    .0
            })
            .collect())
    }

    /// Normalized mean impurity decrease per feature, summing to 1
    pub fn feature_importances(&self) -> &Array1<f64> {
        &self.feature_importances
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }
}

fn average_importances(trees: &[DecisionTree], n_features: usize) -> Array1<f64> {
    let mut total = Array1::<f64>::zeros(n_features);

    for tree in trees {
        let tree_sum: f64 = tree.importances.iter().sum();
        if tree_sum > 0.0 {
            for (t, &imp) in total.iter_mut().zip(&tree.importances) {
                *t += imp / tree_sum;
            }
        }
    }

    let sum = total.sum();
    if sum > 0.0 {
        total /= sum;
    }
    total
}
