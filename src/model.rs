//! Churn classifiers: logistic regression wrapper, shared prediction trait and persistence

use crate::config::LinearConfig;
use crate::error::PipelineError;
use crate::forest::RandomForest;
use linfa::prelude::*;
use linfa_logistic::{FittedLogisticRegression, LogisticRegression};
use ndarray::{Array1, Array2, Axis};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// File name of the persisted random forest
pub const FOREST_MODEL_FILE: &str = "rfc_model.bin";
/// File name of the persisted logistic regression
pub const LINEAR_MODEL_FILE: &str = "logistic_model.bin";

/// Common prediction surface of the fitted models
pub trait ChurnClassifier {
    /// Display name used in reports and plot legends
    fn name(&self) -> &'static str;

    /// Predicted class per row (1 = churn)
    fn predict(&self, x: &Array2<f64>) -> crate::Result<Array1<usize>>;

    /// Probability of churn per row
    fn churn_probability(&self, x: &Array2<f64>) -> crate::Result<Array1<f64>>;
}

/// L2-regularized logistic regression on standardized features
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticModel {
    /// Per-feature mean of the training matrix
    means: Array1<f64>,
    /// Per-feature standard deviation, 1 for constant columns
    scales: Array1<f64>,
    /// Weights on standardized features, oriented towards class 1
    coefficients: Array1<f64>,
    intercept: f64,
}

impl LogisticModel {
    /// Fit with linfa's L-BFGS logistic regression
    ///
    /// # Arguments
    /// * `config` - Iteration cap, penalty and gradient tolerance
    /// * `x` - Training features
    /// * `y` - Binary labels
    pub fn fit(config: &LinearConfig, x: &Array2<f64>, y: &Array1<usize>) -> crate::Result<Self> {
        if x.nrows() != y.len() {
            return Err(PipelineError::FitFailure(format!(
                "{} rows in X but {} labels",
                x.nrows(),
                y.len()
            ))
            .into());
        }
        if !(y.iter().any(|&c| c == 0) && y.iter().any(|&c| c == 1)) {
            return Err(PipelineError::FitFailure(
                "logistic regression needs both classes in the training labels".to_string(),
            )
            .into());
        }

        let means = x
            .mean_axis(Axis(0))
            .ok_or_else(|| PipelineError::FitFailure("empty training matrix".to_string()))?;
        let scales = x
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > f64::EPSILON { s } else { 1.0 });
        let standardized = (x - &means) / &scales;

        let dataset = Dataset::new(standardized, y.clone());
        let fitted: FittedLogisticRegression<f64, usize> = LogisticRegression::default()
            .alpha(config.alpha)
            .gradient_tolerance(config.gradient_tolerance)
            .max_iterations(config.max_iterations)
            .fit(&dataset)
            .map_err(|err| PipelineError::FitFailure(format!("logistic regression: {}", err)))?;

        // linfa picks its own positive class; store weights for class 1
        let sign = if fitted.labels().pos.class == 1 { 1.0 } else { -1.0 };

        Ok(Self {
            means,
            scales,
            coefficients: fitted.params() * sign,
            intercept: fitted.intercept() * sign,
        })
    }

    pub fn coefficients(&self) -> &Array1<f64> {
        &self.coefficients
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    pub fn n_features(&self) -> usize {
        self.coefficients.len()
    }
}

impl ChurnClassifier for LogisticModel {
    fn name(&self) -> &'static str {
        "Logistic Regression"
    }

    fn predict(&self, x: &Array2<f64>) -> crate::Result<Array1<usize>> {
        Ok(self
            .churn_probability(x)?
            .mapv(|p| if p > 0.5 { 1 } else { 0 }))
    }

    fn churn_probability(&self, x: &Array2<f64>) -> crate::Result<Array1<f64>> {
        if x.ncols() != self.n_features() {
            return Err(PipelineError::SchemaMismatch {
                column: "<feature matrix>".to_string(),
                reason: format!("expected {} features, got {}", self.n_features(), x.ncols()),
            }
            .into());
        }
        let standardized = (x - &self.means) / &self.scales;
        let logits = standardized.dot(&self.coefficients) + self.intercept;
        Ok(logits.mapv(|z| 1.0 / (1.0 + (-z).exp())))
    }
}

impl ChurnClassifier for RandomForest {
    fn name(&self) -> &'static str {
        "Random Forest"
    }

    fn predict(&self, x: &Array2<f64>) -> crate::Result<Array1<usize>> {
        RandomForest::predict(self, x)
    }

    fn churn_probability(&self, x: &Array2<f64>) -> crate::Result<Array1<f64>> {
        Ok(self.predict_proba(x)?.column(1).to_owned())
    }
}

/// Serialize a fitted model with bincode, creating the parent directory if needed
pub fn save_model<M: Serialize>(model: &M, path: &Path) -> crate::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| PipelineError::artifact(parent, err))?;
    }
    let bytes = bincode::serialize(model).map_err(|err| PipelineError::artifact(path, err))?;
    std::fs::write(path, bytes).map_err(|err| PipelineError::artifact(path, err))?;
    Ok(())
}

/// Load a model previously written by [`save_model`]
pub fn load_model<M: DeserializeOwned>(path: &Path) -> crate::Result<M> {
    if !path.is_file() {
        return Err(PipelineError::InputNotFound {
            path: path.to_path_buf(),
        }
        .into());
    }
    let bytes = std::fs::read(path)?;
    let model = bincode::deserialize(&bytes)
        .map_err(|err| anyhow::anyhow!("cannot decode model {}: {}", path.display(), err))?;
    Ok(model)
}
