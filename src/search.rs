//! Exhaustive cross-validated grid search over random forest hyperparameters

use crate::config::{ForestGrid, SearchConfig};
use crate::error::PipelineError;
use crate::forest::{ForestParams, RandomForest};
use crate::metrics::accuracy;
use ndarray::{Array1, Array2, Axis};
use rayon::prelude::*;
use std::collections::BTreeMap;

/// One cross-validation split
#[derive(Debug, Clone)]
pub struct CvFold {
    pub train_indices: Vec<usize>,
    pub test_indices: Vec<usize>,
}

/// Cross-validated score of one grid point
#[derive(Debug, Clone)]
pub struct CandidateScore {
    pub params: ForestParams,
    pub fold_scores: Vec<f64>,
    pub mean_score: f64,
    pub std_score: f64,
}

impl CandidateScore {
    fn from_scores(params: ForestParams, fold_scores: Vec<f64>) -> Self {
        let n = fold_scores.len().max(1) as f64;
        let mean_score = fold_scores.iter().sum::<f64>() / n;
        let variance = fold_scores
            .iter()
            .map(|s| (s - mean_score).powi(2))
            .sum::<f64>()
            / n;
        Self {
            params,
            fold_scores,
            mean_score,
            std_score: variance.sqrt(),
        }
    }
}

/// Outcome of a grid search: every candidate's score and the refitted winner
#[derive(Debug, Clone)]
pub struct GridSearchResult {
    pub candidates: Vec<CandidateScore>,
    pub best_index: usize,
    pub best_estimator: RandomForest,
}

impl GridSearchResult {
    pub fn best(&self) -> &CandidateScore {
        &self.candidates[self.best_index]
    }
}

/// Cartesian product of the grid, `n_estimators` varying fastest
pub fn expand_grid(grid: &ForestGrid, seed: u64) -> Vec<ForestParams> {
    let mut points = Vec::with_capacity(grid.len());
    for &criterion in &grid.criterion {
        for &max_depth in &grid.max_depth {
            for &max_features in &grid.max_features {
                for &n_estimators in &grid.n_estimators {
                    points.push(ForestParams {
                        n_estimators,
                        max_features,
                        max_depth,
                        criterion,
                        seed,
                        ..ForestParams::default()
                    });
                }
            }
        }
    }
    points
}

/// Stratified k-fold without shuffling: each class's rows are dealt to folds
/// round-robin in row order, so every fold keeps the class balance.
pub fn stratified_folds(y: &Array1<usize>, n_splits: usize) -> crate::Result<Vec<CvFold>> {
    if n_splits < 2 {
        return Err(PipelineError::InvalidConfig(format!(
            "n_splits must be at least 2, got {}",
            n_splits
        ))
        .into());
    }
    if y.len() < n_splits {
        return Err(PipelineError::FitFailure(format!(
            "cannot make {} folds from {} rows",
            n_splits,
            y.len()
        ))
        .into());
    }

    let mut by_class: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (idx, &label) in y.iter().enumerate() {
        by_class.entry(label).or_default().push(idx);
    }

    let mut fold_members: Vec<Vec<usize>> = vec![Vec::new(); n_splits];
    let mut next_fold = 0;
    for indices in by_class.values() {
        for &idx in indices {
            fold_members[next_fold].push(idx);
            next_fold = (next_fold + 1) % n_splits;
        }
    }

    let folds = (0..n_splits)
        .map(|k| {
            let mut test_indices = fold_members[k].clone();
            test_indices.sort_unstable();
            let mut train_indices: Vec<usize> = fold_members
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != k)
                .flat_map(|(_, members)| members.iter().copied())
                .collect();
            train_indices.sort_unstable();
            CvFold {
                train_indices,
                test_indices,
            }
        })
        .collect();

    Ok(folds)
}

/// Thread pool with the configured worker count; 0 lets rayon pick
pub fn build_pool(workers: usize) -> crate::Result<rayon::ThreadPool> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("churnforge-worker-{}", i))
        .build()
        .map_err(|err| PipelineError::InvalidConfig(format!("cannot start worker pool: {}", err)))?;
    Ok(pool)
}

fn score_fold(params: &ForestParams, x: &Array2<f64>, y: &Array1<usize>, fold: &CvFold) -> crate::Result<f64> {
    let x_train = x.select(Axis(0), &fold.train_indices);
    let y_train = y.select(Axis(0), &fold.train_indices);
    let x_test = x.select(Axis(0), &fold.test_indices);
    let y_test = y.select(Axis(0), &fold.test_indices);

    let forest = RandomForest::fit(params, &x_train, &y_train)?;
    let predictions = forest.predict(&x_test)?;
    Ok(accuracy(&y_test, &predictions))
}

/// Score every grid point by mean fold accuracy and refit the best on all rows.
///
/// Ties keep the earliest grid point. All fits run on a dedicated pool of
/// `config.workers` threads; events are logged from the calling thread.
pub fn grid_search(config: &SearchConfig, x: &Array2<f64>, y: &Array1<usize>) -> crate::Result<GridSearchResult> {
    let candidates = expand_grid(&config.grid, config.seed);
    if candidates.is_empty() {
        return Err(PipelineError::InvalidConfig("forest grid is empty".to_string()).into());
    }
    let folds = stratified_folds(y, config.cv_folds)?;
    let pool = build_pool(config.workers)?;

    tracing::info!(
        "Grid search: {} candidates x {} folds on {} threads",
        candidates.len(),
        folds.len(),
        pool.current_num_threads()
    );

    let scored = pool.install(|| {
        candidates
            .par_iter()
            .map(|params| {
                let fold_scores = folds
                    .par_iter()
                    .map(|fold| score_fold(params, x, y, fold))
                    .collect::<crate::Result<Vec<f64>>>()?;
                Ok(CandidateScore::from_scores(*params, fold_scores))
            })
            .collect::<crate::Result<Vec<CandidateScore>>>()
    })?;

    let best_index = scored.iter().enumerate().fold(0, |best, (i, c)| {
        if c.mean_score > scored[best].mean_score {
            i
        } else {
            best
        }
    });

    for candidate in &scored {
        tracing::debug!(
            "{} -> mean accuracy {:.4} (+/- {:.4})",
            candidate.params,
            candidate.mean_score,
            candidate.std_score
        );
    }
    tracing::info!(
        "Best forest: {} (mean CV accuracy {:.4})",
        scored[best_index].params,
        scored[best_index].mean_score
    );

    let best_params = scored[best_index].params;
    let best_estimator = pool.install(|| RandomForest::fit(&best_params, x, y))?;

    Ok(GridSearchResult {
        candidates: scored,
        best_index,
        best_estimator,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forest::{Criterion, MaxFeatures};
    use ndarray::Array2;

    fn small_grid() -> ForestGrid {
        ForestGrid {
            n_estimators: vec![3, 6],
            max_features: vec![MaxFeatures::Sqrt],
            max_depth: vec![1, 4],
            criterion: vec![Criterion::Gini],
        }
    }

    fn noisy_data(n: usize) -> (Array2<f64>, Array1<usize>) {
        let x = Array2::from_shape_fn((n, 3), |(i, j)| ((i * 7 + j * 13) % 17) as f64 + (i % 2) as f64 * 10.0);
        let y = Array1::from_shape_fn(n, |i| i % 2);
        (x, y)
    }

    #[test]
    fn test_default_grid_expansion() {
        let points = expand_grid(&ForestGrid::default(), 42);
        assert_eq!(points.len(), 24);
        assert_eq!(points[0].n_estimators, 200);
        assert_eq!(points[1].n_estimators, 500);
        assert!(points.iter().all(|p| p.seed == 42));
        assert_eq!(points[23].criterion, Criterion::Entropy);
    }

    #[test]
    fn test_stratified_folds_partition_rows() {
        let y = Array1::from_vec(vec![0, 0, 0, 0, 0, 1, 1, 1, 1, 1]);
        let folds = stratified_folds(&y, 5).unwrap();

        assert_eq!(folds.len(), 5);
        let mut all_test: Vec<usize> = folds.iter().flat_map(|f| f.test_indices.clone()).collect();
        all_test.sort_unstable();
        assert_eq!(all_test, (0..10).collect::<Vec<_>>());

        for fold in &folds {
            assert_eq!(fold.test_indices.len(), 2);
            assert_eq!(fold.train_indices.len(), 8);
            let positives = fold.test_indices.iter().filter(|&&i| y[i] == 1).count();
            assert_eq!(positives, 1);
            assert!(fold.test_indices.iter().all(|i| !fold.train_indices.contains(i)));
        }
    }

    #[test]
    fn test_folds_need_enough_rows() {
        let y = Array1::from_vec(vec![0, 1, 0]);
        assert!(stratified_folds(&y, 5).is_err());
        assert!(stratified_folds(&y, 1).is_err());
    }

    #[test]
    fn test_grid_search_picks_best_mean() {
        let (x, y) = noisy_data(60);
        let config = SearchConfig {
            grid: small_grid(),
            cv_folds: 3,
            seed: 7,
            workers: 2,
        };

        let result = grid_search(&config, &x, &y).unwrap();
        assert_eq!(result.candidates.len(), 4);
        assert!(result.candidates.iter().all(|c| c.fold_scores.len() == 3));

        let best = result.best().mean_score;
        assert!(result.candidates.iter().all(|c| c.mean_score <= best));
        assert_eq!(result.best_estimator.params(), &result.best().params);
        assert_eq!(result.best_estimator.n_trees(), result.best().params.n_estimators);
    }

    #[test]
    fn test_worker_count_does_not_change_result() {
        let (x, y) = noisy_data(40);
        let mut config = SearchConfig {
            grid: small_grid(),
            cv_folds: 2,
            seed: 11,
            workers: 1,
        };
        let single = grid_search(&config, &x, &y).unwrap();
        config.workers = 3;
        let multi = grid_search(&config, &x, &y).unwrap();

        assert_eq!(single.best_index, multi.best_index);
        let scores = |r: &GridSearchResult| r.candidates.iter().map(|c| c.mean_score).collect::<Vec<_>>();
        assert_eq!(scores(&single), scores(&multi));
    }
}
