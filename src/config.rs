//! Pipeline configuration: defaults, TOML loading and validation

use crate::encoder::UnseenCategory;
use crate::error::PipelineError;
use crate::forest::{Criterion, MaxFeatures};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Categorical columns replaced by their churn rate
pub const DEFAULT_CATEGORICAL_COLUMNS: [&str; 5] = [
    "Gender",
    "Education_Level",
    "Marital_Status",
    "Income_Category",
    "Card_Category",
];

/// Raw numeric columns fed to the models as-is
pub const DEFAULT_NUMERIC_COLUMNS: [&str; 14] = [
    "Customer_Age",
    "Dependent_count",
    "Months_on_book",
    "Total_Relationship_Count",
    "Months_Inactive_12_mon",
    "Contacts_Count_12_mon",
    "Credit_Limit",
    "Total_Revolving_Bal",
    "Avg_Open_To_Buy",
    "Total_Amt_Chng_Q4_Q1",
    "Total_Trans_Amt",
    "Total_Trans_Ct",
    "Total_Ct_Chng_Q4_Q1",
    "Avg_Utilization_Ratio",
];

/// Complete configuration for one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// CSV with customer records
    pub input: PathBuf,
    /// Directory receiving EDA and result images
    pub images_dir: PathBuf,
    /// Directory receiving serialized models
    pub models_dir: PathBuf,
    /// Log file, truncated at the start of each run
    pub log_file: PathBuf,
    pub label: LabelConfig,
    /// Columns target-mean encoded into `<column>_<response>`
    pub categorical_columns: Vec<String>,
    /// Ordered model inputs
    pub feature_columns: Vec<String>,
    pub unseen_category: UnseenCategory,
    pub split: SplitConfig,
    pub linear: LinearConfig,
    pub search: SearchConfig,
}

/// How the churn label is derived from the attrition field
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelConfig {
    pub attrition_column: String,
    /// Attrition value meaning the customer stayed
    pub retained_value: String,
    /// Name of the derived binary label column
    pub response: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    /// Fraction of rows held out for testing
    pub test_size: f64,
    pub seed: u64,
}

/// Logistic regression settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinearConfig {
    pub max_iterations: u64,
    /// L2 penalty strength
    pub alpha: f64,
    pub gradient_tolerance: f64,
}

/// Random forest grid search settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub grid: ForestGrid,
    pub cv_folds: usize,
    pub seed: u64,
    /// Worker threads for grid search and tree building, 0 means all cores
    pub workers: usize,
}

/// Candidate values for every tuned forest hyperparameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestGrid {
    pub n_estimators: Vec<usize>,
    pub max_features: Vec<MaxFeatures>,
    pub max_depth: Vec<usize>,
    pub criterion: Vec<Criterion>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let label = LabelConfig::default();
        let categorical_columns: Vec<String> = DEFAULT_CATEGORICAL_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .collect();
        let feature_columns = DEFAULT_NUMERIC_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .chain(
                categorical_columns
                    .iter()
                    .map(|c| format!("{}_{}", c, label.response)),
            )
            .collect();

        Self {
            input: PathBuf::from("./data/bank_data.csv"),
            images_dir: PathBuf::from("./images"),
            models_dir: PathBuf::from("./models"),
            log_file: PathBuf::from("./logs/churn_library.log"),
            label,
            categorical_columns,
            feature_columns,
            unseen_category: UnseenCategory::GlobalMean,
            split: SplitConfig::default(),
            linear: LinearConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            attrition_column: "Attrition_Flag".to_string(),
            retained_value: "Existing Customer".to_string(),
            response: "Churn".to_string(),
        }
    }
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            test_size: 0.3,
            seed: 42,
        }
    }
}

impl Default for LinearConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3000,
            alpha: 1.0,
            gradient_tolerance: 1e-4,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            grid: ForestGrid::default(),
            cv_folds: 5,
            seed: 42,
            workers: 0,
        }
    }
}

impl Default for ForestGrid {
    fn default() -> Self {
        Self {
            n_estimators: vec![200, 500],
            max_features: vec![MaxFeatures::Auto, MaxFeatures::Sqrt],
            max_depth: vec![4, 5, 100],
            criterion: vec![Criterion::Gini, Criterion::Entropy],
        }
    }
}

impl ForestGrid {
    /// Number of parameter combinations in the grid
    pub fn len(&self) -> usize {
        self.n_estimators.len() * self.max_features.len() * self.max_depth.len() * self.criterion.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PipelineConfig {
    /// Load a configuration from a TOML file; absent keys keep their defaults
    pub fn from_toml_file(path: &Path) -> crate::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| anyhow::anyhow!("cannot read config {}: {}", path.display(), err))?;
        let config: PipelineConfig = toml::from_str(&text)
            .map_err(|err| PipelineError::InvalidConfig(format!("{}: {}", path.display(), err)))?;
        Ok(config)
    }

    /// Encoded column name for a categorical column
    pub fn encoded_column(&self, category: &str) -> String {
        format!("{}_{}", category, self.label.response)
    }

    pub fn image_path(&self, file_name: &str) -> PathBuf {
        self.images_dir.join(file_name)
    }

    pub fn model_path(&self, file_name: &str) -> PathBuf {
        self.models_dir.join(file_name)
    }

    /// Check internal consistency before any stage runs
    pub fn validate(&self) -> Result<(), PipelineError> {
        let invalid = |msg: String| -> Result<(), PipelineError> { Err(PipelineError::InvalidConfig(msg)) };

        if self.label.response.is_empty() || self.label.attrition_column.is_empty() {
            return invalid("label columns must be named".to_string());
        }
        if self.feature_columns.is_empty() {
            return invalid("feature list is empty".to_string());
        }
        if let Some(dup) = first_duplicate(&self.feature_columns) {
            return invalid(format!("feature '{}' listed twice", dup));
        }
        if let Some(dup) = first_duplicate(&self.categorical_columns) {
            return invalid(format!("categorical column '{}' listed twice", dup));
        }
        if self.feature_columns.contains(&self.label.response) {
            return invalid(format!(
                "response '{}' cannot also be a feature",
                self.label.response
            ));
        }
        if !(self.split.test_size > 0.0 && self.split.test_size < 1.0) {
            return invalid(format!(
                "test_size must lie in (0, 1), got {}",
                self.split.test_size
            ));
        }
        if self.linear.max_iterations == 0 {
            return invalid("linear.max_iterations must be positive".to_string());
        }
        if self.search.cv_folds < 2 {
            return invalid(format!(
                "cv_folds must be at least 2, got {}",
                self.search.cv_folds
            ));
        }
        let grid = &self.search.grid;
        if grid.is_empty() {
            return invalid("forest grid has an empty dimension".to_string());
        }
        if grid.n_estimators.contains(&0) || grid.max_depth.contains(&0) {
            return invalid("tree counts and depths must be positive".to_string());
        }

        Ok(())
    }
}

fn first_duplicate(values: &[String]) -> Option<&str> {
    let mut seen = HashSet::new();
    values
        .iter()
        .find(|v| !seen.insert(v.as_str()))
        .map(|v| v.as_str())
}
