//! End-to-end churn pipeline and batch scoring

use crate::config::PipelineConfig;
use crate::data::{add_churn_label, feature_matrix, import_data, perform_feature_engineering};
use crate::encoder::{TargetEncoder, CATEGORY_GROUPS_FILE};
use crate::error::PipelineError;
use crate::forest::RandomForest;
use crate::logging::RunLog;
use crate::model::{load_model, ChurnClassifier, LogisticModel, FOREST_MODEL_FILE, LINEAR_MODEL_FILE};
use crate::train::{train_models, TrainingSummary};
use crate::viz::perform_eda;
use polars::prelude::*;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Wall-clock time spent in one stage
#[derive(Debug, Clone)]
pub struct StageTiming {
    pub stage: &'static str,
    pub elapsed: Duration,
}

/// Outcome of a full training run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub rows: usize,
    pub columns: usize,
    pub eda_images: Vec<PathBuf>,
    pub category_groups: PathBuf,
    pub train_rows: usize,
    pub test_rows: usize,
    pub training: TrainingSummary,
    pub timings: Vec<StageTiming>,
}

impl RunReport {
    /// Every image written during the run
    pub fn images(&self) -> impl Iterator<Item = &PathBuf> {
        self.eda_images.iter().chain(self.training.images.iter())
    }
}

/// Outcome of a batch scoring run
#[derive(Debug, Clone)]
pub struct ScoreSummary {
    pub rows: usize,
    pub output: PathBuf,
    /// Share of rows each model predicts as churning
    pub forest_churn_rate: f64,
    pub linear_churn_rate: f64,
}

/// Validated configuration plus the stage sequence.
///
/// Stages run strictly in order and the first failure ends the run.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Validate `config` before any stage can run
    pub fn new(config: PipelineConfig) -> crate::Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Like [`Pipeline::new`], with the outcome recorded as the `validate_config` stage
    pub fn new_recorded(config: PipelineConfig, log: &RunLog) -> crate::Result<Self> {
        log.record("validate_config", Self::new(config))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn stage<T>(
        log: &RunLog,
        timings: &mut Vec<StageTiming>,
        stage: &'static str,
        f: impl FnOnce() -> crate::Result<T>,
    ) -> crate::Result<T> {
        let start = Instant::now();
        let result = log.record(stage, f());
        timings.push(StageTiming {
            stage,
            elapsed: start.elapsed(),
        });
        result
    }

    /// Load → label + EDA → encode → split → train
    pub fn run(&self, log: &RunLog) -> crate::Result<RunReport> {
        let config = &self.config;
        let mut timings = Vec::new();

        let mut df = Self::stage(log, &mut timings, "import_data", || import_data(&config.input))?;
        let (rows, columns) = df.shape();
        tracing::info!("Loaded {} rows x {} columns from {}", rows, columns, config.input.display());

        let eda_images = Self::stage(log, &mut timings, "perform_eda", || {
            add_churn_label(&mut df, &config.label)?;
            perform_eda(&df, config)
        })?;

        let category_groups = Self::stage(log, &mut timings, "encoder_helper", || {
            let encoder = TargetEncoder::fit(
                &df,
                &config.categorical_columns,
                &config.label.response,
                config.unseen_category,
            )?;
            encoder.transform(&mut df)?;
            let path = config.model_path(CATEGORY_GROUPS_FILE);
            encoder.save_json(&path)?;
            Ok(path)
        })?;

        let split = Self::stage(log, &mut timings, "perform_feature_engineering", || {
            perform_feature_engineering(&df, &config.feature_columns, &config.label.response, &config.split)
        })?;
        tracing::info!(
            "Split {} rows into {} train / {} test",
            split.n_rows(),
            split.x_train.nrows(),
            split.x_test.nrows()
        );

        let training = Self::stage(log, &mut timings, "train_models", || train_models(&split, config))?;

        Ok(RunReport {
            rows,
            columns,
            eda_images,
            category_groups,
            train_rows: split.x_train.nrows(),
            test_rows: split.x_test.nrows(),
            training,
            timings,
        })
    }

    /// Score a new CSV with the persisted encoder and models.
    ///
    /// The output holds the input columns plus churn probability and
    /// prediction columns for both models.
    pub fn score(&self, input: &Path, output: &Path, log: &RunLog) -> crate::Result<ScoreSummary> {
        let config = &self.config;
        let mut timings = Vec::new();

        let mut df = Self::stage(log, &mut timings, "import_data", || import_data(input))?;

        let x = Self::stage(log, &mut timings, "encode_features", || {
            let encoder = TargetEncoder::load_json(&config.model_path(CATEGORY_GROUPS_FILE))?
                .with_policy(config.unseen_category);
            let mut encoded = df.clone();
            encoder.transform(&mut encoded)?;
            feature_matrix(&encoded, &config.feature_columns)
        })?;

        let (forest, linear) = Self::stage(log, &mut timings, "load_models", || {
            let forest: RandomForest = load_model(&config.model_path(FOREST_MODEL_FILE))?;
            let linear: LogisticModel = load_model(&config.model_path(LINEAR_MODEL_FILE))?;
            Ok((forest, linear))
        })?;

        let summary = Self::stage(log, &mut timings, "score_rows", || {
            let rf_proba = forest.churn_probability(&x)?;
            let rf_pred = forest.predict(&x)?;
            let lr_proba = linear.churn_probability(&x)?;
            let lr_pred = linear.predict(&x)?;

            let rate = |preds: &ndarray::Array1<usize>| {
                preds.iter().filter(|&&p| p == 1).count() as f64 / preds.len().max(1) as f64
            };
            let forest_churn_rate = rate(&rf_pred);
            let linear_churn_rate = rate(&lr_pred);

            df.with_column(Series::new("churn_probability_rf".into(), rf_proba.to_vec()))?;
            df.with_column(Series::new(
                "churn_prediction_rf".into(),
                rf_pred.iter().map(|&p| p as i32).collect::<Vec<i32>>(),
            ))?;
            df.with_column(Series::new("churn_probability_lr".into(), lr_proba.to_vec()))?;
            df.with_column(Series::new(
                "churn_prediction_lr".into(),
                lr_pred.iter().map(|&p| p as i32).collect::<Vec<i32>>(),
            ))?;

            write_csv(&mut df, output)?;
            Ok(ScoreSummary {
                rows: df.height(),
                output: output.to_path_buf(),
                forest_churn_rate,
                linear_churn_rate,
            })
        })?;

        for timing in &timings {
            tracing::debug!("{} took {:.2}s", timing.stage, timing.elapsed.as_secs_f64());
        }
        Ok(summary)
    }
}

fn write_csv(df: &mut DataFrame, path: &Path) -> crate::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|err| PipelineError::artifact(parent, err))?;
    }
    let mut file = File::create(path).map_err(|err| PipelineError::artifact(path, err))?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .finish(df)
        .map_err(|err| PipelineError::artifact(path, err))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = PipelineConfig::default();
        config.split.test_size = 0.0;
        let err = Pipeline::new(config).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_invalid_config_is_logged() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("run.log");
        let mut config = PipelineConfig::default();
        config.search.cv_folds = 1;

        {
            let log = RunLog::init(&log_path, false).unwrap();
            assert!(Pipeline::new_recorded(config, &log).is_err());
        }

        let text = std::fs::read_to_string(&log_path).unwrap();
        assert!(text.contains("ERROR: validate_config"), "{}", text);
    }

    #[test]
    fn test_missing_input_stops_run() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            input: dir.path().join("absent.csv"),
            images_dir: dir.path().join("images"),
            models_dir: dir.path().join("models"),
            ..PipelineConfig::default()
        };
        let log = RunLog::init(&dir.path().join("run.log"), false).unwrap();

        let err = Pipeline::new(config).unwrap().run(&log).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::InputNotFound { .. })
        ));
        assert!(!dir.path().join("images").exists());
    }

    #[test]
    fn test_score_needs_trained_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("new.csv");
        std::fs::write(&input, "Customer_Age,Gender\n40,M\n").unwrap();
        let config = PipelineConfig {
            models_dir: dir.path().join("models"),
            ..PipelineConfig::default()
        };
        let log = RunLog::init(&dir.path().join("run.log"), false).unwrap();

        let err = Pipeline::new(config)
            .unwrap()
            .score(&input, &dir.path().join("scores.csv"), &log)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::InputNotFound { .. })
        ));
    }
}
