//! Classification reports rendered to PNG

use crate::error::PipelineError;
use crate::metrics::ClassificationReport;
use ndarray::Array1;
use plotters::prelude::*;
use std::path::{Path, PathBuf};

const REPORT_SIZE: (u32, u32) = (500, 500);
const LINE_HEIGHT: i32 = 20;

/// Image file name for an evaluation title: spaces become underscores
pub fn report_file_name(evaluation: &str) -> String {
    format!("{}.png", evaluation.replace(' ', "_"))
}

/// Draw a titled report table in monospace text on a white canvas
///
/// # Arguments
/// * `title` - Heading drawn above the table
/// * `report` - Metrics to render
/// * `output_path` - Path to save the PNG
pub fn write_report_image(title: &str, report: &ClassificationReport, output_path: &Path) -> crate::Result<()> {
    let root = BitMapBackend::new(output_path, REPORT_SIZE).into_drawing_area();
    root.fill(&WHITE)?;

    let style = ("monospace", 14).into_font().color(&BLACK);
    root.draw(&Text::new(title.to_string(), (10, 20), style.clone()))?;

    for (i, line) in report.render().lines().enumerate() {
        let y = 70 + i as i32 * LINE_HEIGHT;
        root.draw(&Text::new(line.to_string(), (10, y), style.clone()))?;
    }

    root.present()
        .map_err(|err| PipelineError::artifact(output_path, err))?;
    Ok(())
}

/// Write train and test classification reports for both models into `images_dir`.
///
/// Produces `Random_Forest_Train.png`, `Random_Forest_Test.png`,
/// `Logistic_Regression_Train.png` and `Logistic_Regression_Test.png`.
///
/// # Returns
/// * Paths of the written images, in the order above
pub fn classification_report_image(
    y_train: &Array1<usize>,
    y_test: &Array1<usize>,
    y_train_preds_lr: &Array1<usize>,
    y_train_preds_rf: &Array1<usize>,
    y_test_preds_lr: &Array1<usize>,
    y_test_preds_rf: &Array1<usize>,
    images_dir: &Path,
) -> crate::Result<Vec<PathBuf>> {
    std::fs::create_dir_all(images_dir).map_err(|err| PipelineError::artifact(images_dir, err))?;

    let evaluations = [
        ("Random Forest Train", y_train, y_train_preds_rf),
        ("Random Forest Test", y_test, y_test_preds_rf),
        ("Logistic Regression Train", y_train, y_train_preds_lr),
        ("Logistic Regression Test", y_test, y_test_preds_lr),
    ];

    let mut written = Vec::with_capacity(evaluations.len());
    for (evaluation, truth, preds) in evaluations {
        if truth.len() != preds.len() {
            return Err(PipelineError::FitFailure(format!(
                "{}: {} labels but {} predictions",
                evaluation,
                truth.len(),
                preds.len()
            ))
            .into());
        }
        let report = ClassificationReport::new(truth, preds);
        let path = images_dir.join(report_file_name(evaluation));
        write_report_image(evaluation, &report, &path)?;
        tracing::debug!("{} accuracy {:.4}", evaluation, report.accuracy);
        written.push(path);
    }

    Ok(written)
}
