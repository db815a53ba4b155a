//! ChurnForge: customer churn pipeline CLI
//!
//! Orchestrates data loading, EDA, encoding, model training and reporting,
//! or scores a new file with previously trained models.

use anyhow::Result;
use churnforge::{Args, Pipeline, RunLog, RunReport};
use clap::Parser;
use std::path::Path;
use std::time::Instant;

fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.pipeline_config()?;

    if args.verbose {
        println!("ChurnForge - Customer Churn Prediction");
        println!("======================================\n");
    }

    let log = RunLog::init(&config.log_file, args.verbose)?;
    let pipeline = Pipeline::new_recorded(config, &log)?;

    if let Some((input, output)) = args.scoring_paths() {
        run_scoring_mode(&pipeline, &log, input, output, args.verbose)?;
    } else {
        run_full_pipeline(&pipeline, &log, args.verbose)?;
    }

    Ok(())
}

/// Score a new CSV with the persisted models
fn run_scoring_mode(pipeline: &Pipeline, log: &RunLog, input: &Path, output: &Path, verbose: bool) -> Result<()> {
    println!("=== Scoring Mode ===");
    if verbose {
        println!("Input file: {}", input.display());
        println!("Models from: {}", pipeline.config().models_dir.display());
    }

    let start_time = Instant::now();
    let summary = pipeline.score(input, output, log)?;
    let elapsed = start_time.elapsed();

    println!("\n✓ Scored {} customers", summary.rows);
    println!(
        "  Predicted churn rate: {:.1}% (random forest), {:.1}% (logistic regression)",
        summary.forest_churn_rate * 100.0,
        summary.linear_churn_rate * 100.0
    );
    println!("  Scores saved to: {}", summary.output.display());
    println!("  Processing time: {:.2}s", elapsed.as_secs_f64());

    Ok(())
}

/// Run the full training pipeline
fn run_full_pipeline(pipeline: &Pipeline, log: &RunLog, verbose: bool) -> Result<()> {
    println!("=== Full Churn Pipeline ===\n");
    let config = pipeline.config();

    if verbose {
        println!("Input file: {}", config.input.display());
        println!("Features: {}", config.feature_columns.len());
        println!(
            "Grid: {} candidates, {}-fold CV, workers: {}",
            config.search.grid.len(),
            config.search.cv_folds,
            if config.search.workers == 0 {
                "all cores".to_string()
            } else {
                config.search.workers.to_string()
            }
        );
        println!();
    }

    let start_time = Instant::now();
    let report = pipeline.run(log)?;
    let total_time = start_time.elapsed();

    print_run_report(&report, verbose);

    println!("\n=== Pipeline Complete ===");
    println!("Total processing time: {:.2}s", total_time.as_secs_f64());
    println!("Images saved to: {}", config.images_dir.display());
    println!("Models saved to: {}", config.models_dir.display());
    println!("Log written to: {}", log.path().display());

    Ok(())
}

fn print_run_report(report: &RunReport, verbose: bool) {
    println!("✓ Data loaded: {} customers, {} columns", report.rows, report.columns);
    println!("✓ EDA plots written: {}", report.eda_images.len());
    println!("✓ Category map saved to: {}", report.category_groups.display());
    println!(
        "✓ Split: {} train / {} test",
        report.train_rows, report.test_rows
    );

    let training = &report.training;
    println!("✓ Models trained");
    println!("\n=== Model Summary ===");
    println!("Best random forest: {}", training.best_params);
    println!(
        "  CV accuracy: {:.3} ({} candidates)",
        training.cv_accuracy, training.candidates_evaluated
    );
    println!(
        "Random forest       test accuracy: {:.3}  AUC: {:.3}",
        training.forest_test_accuracy, training.forest_auc
    );
    println!(
        "Logistic regression test accuracy: {:.3}  AUC: {:.3}",
        training.linear_test_accuracy, training.linear_auc
    );

    if verbose {
        println!("\nStage timings:");
        for timing in &report.timings {
            println!("  {:<28} {:.2}s", timing.stage, timing.elapsed.as_secs_f64());
        }
        println!("\nImages:");
        for image in report.images() {
            println!("  {}", image.display());
        }
    }
}
