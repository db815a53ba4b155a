//! Model training: grid-searched random forest and logistic regression, with
//! their diagnostic images and persisted artifacts

use crate::config::PipelineConfig;
use crate::data::SplitData;
use crate::error::PipelineError;
use crate::forest::ForestParams;
use crate::metrics::{accuracy, RocCurve};
use crate::model::{save_model, ChurnClassifier, LogisticModel, FOREST_MODEL_FILE, LINEAR_MODEL_FILE};
use crate::report::classification_report_image;
use crate::search::grid_search;
use crate::viz::{feature_importance_plot, roc_plot, FEATURE_IMPORTANCE_PLOT, ROC_PLOT};
use ndarray::{Array1, Array2};
use std::path::PathBuf;

/// Train and test predictions of one fitted model
#[derive(Debug, Clone)]
pub struct ModelPredictions {
    pub train: Array1<usize>,
    pub test: Array1<usize>,
    /// Churn probability per test row
    pub test_scores: Array1<f64>,
}

impl ModelPredictions {
    fn from_model<M: ChurnClassifier>(model: &M, x_train: &Array2<f64>, x_test: &Array2<f64>) -> crate::Result<Self> {
        Ok(Self {
            train: model.predict(x_train)?,
            test: model.predict(x_test)?,
            test_scores: model.churn_probability(x_test)?,
        })
    }
}

/// What a training run produced
#[derive(Debug, Clone)]
pub struct TrainingSummary {
    pub best_params: ForestParams,
    /// Mean cross-validated accuracy of the best grid point
    pub cv_accuracy: f64,
    pub candidates_evaluated: usize,
    pub forest_test_accuracy: f64,
    pub linear_test_accuracy: f64,
    pub forest_auc: f64,
    pub linear_auc: f64,
    /// Images written, in creation order
    pub images: Vec<PathBuf>,
    /// Serialized model files
    pub models: Vec<PathBuf>,
}

/// Fit both classifiers on the training partition, evaluate them and persist
/// everything under the configured images and models directories.
///
/// # Arguments
/// * `split` - Train/test partitions and feature names
/// * `config` - Model settings and output directories
///
/// # Returns
/// * Summary of the best forest, test metrics and written artifacts
pub fn train_models(split: &SplitData, config: &PipelineConfig) -> crate::Result<TrainingSummary> {
    for dir in [&config.images_dir, &config.models_dir] {
        std::fs::create_dir_all(dir).map_err(|err| PipelineError::artifact(dir, err))?;
    }

    let search = grid_search(&config.search, &split.x_train, &split.y_train)?;
    let forest = &search.best_estimator;
    let best = search.best();

    tracing::info!("Fitting logistic regression (max {} iterations)", config.linear.max_iterations);
    let linear = LogisticModel::fit(&config.linear, &split.x_train, &split.y_train)?;

    let rf = ModelPredictions::from_model(forest, &split.x_train, &split.x_test)?;
    let lr = ModelPredictions::from_model(&linear, &split.x_train, &split.x_test)?;

    let rf_roc = RocCurve::new(&split.y_test, &rf.test_scores)?;
    let lr_roc = RocCurve::new(&split.y_test, &lr.test_scores)?;
    let forest_auc = rf_roc.auc();
    let linear_auc = lr_roc.auc();

    let mut images = Vec::new();

    let roc_path = config.image_path(ROC_PLOT);
    roc_plot(&[(forest.name(), rf_roc), (linear.name(), lr_roc)], &roc_path)?;
    images.push(roc_path);

    images.extend(classification_report_image(
        &split.y_train,
        &split.y_test,
        &lr.train,
        &rf.train,
        &lr.test,
        &rf.test,
        &config.images_dir,
    )?);

    let importance_path = config.image_path(FEATURE_IMPORTANCE_PLOT);
    feature_importance_plot(forest, &split.feature_names, &importance_path)?;
    images.push(importance_path);

    let forest_path = config.model_path(FOREST_MODEL_FILE);
    let linear_path = config.model_path(LINEAR_MODEL_FILE);
    save_model(forest, &forest_path)?;
    save_model(&linear, &linear_path)?;

    Ok(TrainingSummary {
        best_params: best.params,
        cv_accuracy: best.mean_score,
        candidates_evaluated: search.candidates.len(),
        forest_test_accuracy: accuracy(&split.y_test, &rf.test),
        linear_test_accuracy: accuracy(&split.y_test, &lr.test),
        forest_auc,
        linear_auc,
        images,
        models: vec![forest_path, linear_path],
    })
}
