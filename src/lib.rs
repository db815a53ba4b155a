//! ChurnForge: a batch pipeline that predicts customer churn
//!
//! Loads customer records, derives a churn label, draws exploratory plots,
//! target-encodes categorical columns, and trains a logistic regression and a
//! grid-searched random forest whose models, reports and plots are written to disk.

pub mod cli;
pub mod config;
pub mod data;
pub mod encoder;
pub mod error;
pub mod forest;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod report;
pub mod search;
pub mod train;
pub mod viz;

// Re-export public items for easier access
pub use cli::Args;
pub use config::PipelineConfig;
pub use data::{add_churn_label, import_data, perform_feature_engineering, SplitData};
pub use encoder::{encoder_helper, TargetEncoder, UnseenCategory};
pub use error::PipelineError;
pub use forest::RandomForest;
pub use logging::RunLog;
pub use model::{ChurnClassifier, LogisticModel};
pub use pipeline::{Pipeline, RunReport, ScoreSummary};
pub use report::classification_report_image;
pub use train::{train_models, TrainingSummary};
pub use viz::{feature_importance_plot, perform_eda};

/// Common result type used throughout the application
pub type Result<T> = anyhow::Result<T>;
