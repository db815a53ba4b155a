//! Command-line interface definitions and argument parsing

use crate::config::PipelineConfig;
use clap::Parser;
use std::path::{Path, PathBuf};

/// Customer churn pipeline: EDA, target encoding, model training and batch scoring
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// TOML configuration file; command-line flags override its values
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Path to the input CSV file
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Directory for EDA, report and result images
    #[arg(long)]
    pub images_dir: Option<PathBuf>,

    /// Directory for serialized models and the category map
    #[arg(long)]
    pub models_dir: Option<PathBuf>,

    /// Log file, truncated at the start of each run
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Worker threads for grid search (0 = all cores)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Scoring mode: CSV of customers to score with previously trained models
    #[arg(long, requires = "scores_output")]
    pub score: Option<PathBuf>,

    /// Where scoring mode writes its predictions
    #[arg(long, requires = "score")]
    pub scores_output: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Build the run configuration: defaults, then the config file, then flags
    pub fn pipeline_config(&self) -> crate::Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_toml_file(path)?,
            None => PipelineConfig::default(),
        };

        if let Some(input) = &self.input {
            config.input = input.clone();
        }
        if let Some(dir) = &self.images_dir {
            config.images_dir = dir.clone();
        }
        if let Some(dir) = &self.models_dir {
            config.models_dir = dir.clone();
        }
        if let Some(file) = &self.log_file {
            config.log_file = file.clone();
        }
        if let Some(workers) = self.workers {
            config.search.workers = workers;
        }

        Ok(config)
    }

    /// Input and output paths when running in scoring mode
    pub fn scoring_paths(&self) -> Option<(&Path, &Path)> {
        match (&self.score, &self.scores_output) {
            (Some(input), Some(output)) => Some((input.as_path(), output.as_path())),
            _ => None,
        }
    }
}
