//! Visualization functions using Plotters: EDA charts, ROC curves and feature importances

use crate::config::PipelineConfig;
use crate::data::{nullable_numeric_column, numeric_columns};
use crate::encoder::category_values;
use crate::error::PipelineError;
use crate::forest::RandomForest;
use crate::metrics::RocCurve;
use ndarray::Array2;
use plotters::prelude::*;
use polars::prelude::DataFrame;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const CHURN_HISTOGRAM: &str = "churn_histogram.png";
pub const AGE_HISTOGRAM: &str = "age_histogram.png";
pub const MARITAL_STATUS_PLOT: &str = "marital_status_plot.png";
pub const TRANSACTION_COUNT_HISTOGRAM: &str = "transaction_count_histogram.png";
pub const CORRELATION_HEATMAP: &str = "correlation.png";
pub const ROC_PLOT: &str = "ROC_plot.png";
pub const FEATURE_IMPORTANCE_PLOT: &str = "result.png";

const AGE_COLUMN: &str = "Customer_Age";
const MARITAL_STATUS_COLUMN: &str = "Marital_Status";
const TRANSACTION_COUNT_COLUMN: &str = "Total_Trans_Ct";

const LABEL_BINS: usize = 10;
const AGE_BINS: usize = 10;
const KDE_POINTS: usize = 200;

const BAR_COLOR: RGBColor = RGBColor(31, 119, 180);

/// Color palette for overlaid series
const SERIES_COLORS: [RGBColor; 5] = [BLUE, RED, GREEN, MAGENTA, CYAN];

/// One histogram bin over `[lo, hi)`; the last bin also holds the maximum
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramBin {
    pub lo: f64,
    pub hi: f64,
    pub count: usize,
}

/// Split the value range into `bins` equal-width bins and count members
pub fn histogram_bins(values: &[f64], bins: usize) -> Vec<HistogramBin> {
    let bins = bins.max(1);
    let (mut min, mut max) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if values.is_empty() {
        min = 0.0;
        max = 1.0;
    } else if min == max {
        min -= 0.5;
        max += 0.5;
    }

    let width = (max - min) / bins as f64;
    let mut out: Vec<HistogramBin> = (0..bins)
        .map(|i| HistogramBin {
            lo: min + i as f64 * width,
            hi: min + (i + 1) as f64 * width,
            count: 0,
        })
        .collect();

    for &v in values {
        let idx = (((v - min) / width) as usize).min(bins - 1);
        out[idx].count += 1;
    }
    out
}

/// Sturges' rule bin count
pub fn sturges_bins(n: usize) -> usize {
    if n < 2 {
        1
    } else {
        ((n as f64).log2().ceil() as usize) + 1
    }
}

/// Gaussian kernel density estimate evaluated at `points` evenly spaced
/// locations across the data range, with Scott's rule bandwidth.
///
/// Returns an empty curve when the data has no spread.
pub fn gaussian_kde(values: &[f64], points: usize) -> Vec<(f64, f64)> {
    let n = values.len();
    if n < 2 || points < 2 {
        return Vec::new();
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    let bandwidth = var.sqrt() * (n as f64).powf(-0.2);
    if bandwidth <= 0.0 {
        return Vec::new();
    }

    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let step = (max - min) / (points - 1) as f64;
    let norm = 1.0 / (n as f64 * bandwidth * (2.0 * std::f64::consts::PI).sqrt());

    (0..points)
        .map(|i| {
            let x = min + i as f64 * step;
            let density = values
                .iter()
                .map(|v| (-0.5 * ((x - v) / bandwidth).powi(2)).exp())
                .sum::<f64>()
                * norm;
            (x, density)
        })
        .collect()
}

/// Share of each non-null value, largest first (ties by value)
pub fn normalized_value_counts(values: &[Option<String>]) -> Vec<(String, f64)> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for v in values.iter().flatten() {
        *counts.entry(v.as_str()).or_insert(0) += 1;
    }
    let total: usize = counts.values().sum();

    let mut shares: Vec<(String, f64)> = counts
        .into_iter()
        .map(|(k, c)| (k.to_string(), c as f64 / total.max(1) as f64))
        .collect();
    shares.sort_by(|a, b| b.1.total_cmp(&a.1));
    shares
}

/// Pearson correlation over pairwise-complete rows
///
/// A pair uses only the rows where both columns are present. The result is
/// NaN where that subset has fewer than two rows or no variance.
pub fn pearson_correlation(columns: &[Vec<Option<f64>>]) -> Array2<f64> {
    let k = columns.len();
    let mut corr = Array2::from_elem((k, k), f64::NAN);

    for i in 0..k {
        for j in i..k {
            let pairs: Vec<(f64, f64)> = columns[i]
                .iter()
                .zip(&columns[j])
                .filter_map(|(a, b)| Some(((*a)?, (*b)?)))
                .collect();
            let r = pair_correlation(&pairs);
            corr[[i, j]] = r;
            corr[[j, i]] = r;
        }
    }
    corr
}

fn pair_correlation(pairs: &[(f64, f64)]) -> f64 {
    if pairs.len() < 2 {
        return f64::NAN;
    }
    let n = pairs.len() as f64;
    let mean_a = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_b = pairs.iter().map(|p| p.1).sum::<f64>() / n;

    let (mut dot, mut ss_a, mut ss_b) = (0.0, 0.0, 0.0);
    for &(a, b) in pairs {
        let (da, db) = (a - mean_a, b - mean_b);
        dot += da * db;
        ss_a += da * da;
        ss_b += db * db;
    }
    if ss_a == 0.0 || ss_b == 0.0 {
        return f64::NAN;
    }
    (dot / (ss_a.sqrt() * ss_b.sqrt())).clamp(-1.0, 1.0)
}

/// Present values of a numeric column; nulls are dropped
fn present_values(df: &DataFrame, name: &str) -> crate::Result<Vec<f64>> {
    Ok(nullable_numeric_column(df, name)?.into_iter().flatten().collect())
}

fn correlation_color(r: f64) -> RGBColor {
    if r.is_nan() {
        return RGBColor(200, 200, 200);
    }
    let fade = |full: u8, amount: f64| (255.0 - (255.0 - full as f64) * amount).round() as u8;
    if r >= 0.0 {
        RGBColor(fade(178, r), fade(24, r), fade(43, r))
    } else {
        RGBColor(fade(33, -r), fade(102, -r), fade(172, -r))
    }
}

fn present(root: &DrawingArea<BitMapBackend<'_>, plotters::coord::Shift>, path: &Path) -> crate::Result<()> {
    root.present().map_err(|err| PipelineError::artifact(path, err))?;
    Ok(())
}

/// Draw histogram bars, optionally as a density with an overlaid curve
fn draw_histogram(
    path: &Path,
    title: &str,
    x_desc: &str,
    bins: &[HistogramBin],
    density: bool,
    overlay: Option<&[(f64, f64)]>,
) -> crate::Result<()> {
    let total: usize = bins.iter().map(|b| b.count).sum();
    let heights: Vec<f64> = bins
        .iter()
        .map(|b| {
            if density {
                b.count as f64 / (total.max(1) as f64 * (b.hi - b.lo))
            } else {
                b.count as f64
            }
        })
        .collect();

    let x_min = bins.first().map_or(0.0, |b| b.lo);
    let x_max = bins.last().map_or(1.0, |b| b.hi);
    let curve_max = overlay
        .unwrap_or(&[])
        .iter()
        .map(|p| p.1)
        .fold(0.0, f64::max);
    let y_max = heights.iter().cloned().fold(curve_max, f64::max);
    let y_max = if y_max > 0.0 { y_max * 1.1 } else { 1.0 };

    let root = BitMapBackend::new(path, (1000, 500)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(x_min..x_max, 0f64..y_max)?;

    chart
        .configure_mesh()
        .x_desc(x_desc)
        .y_desc(if density { "Density" } else { "Count" })
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    chart.draw_series(
        bins.iter()
            .zip(&heights)
            .map(|(b, &h)| Rectangle::new([(b.lo, 0.0), (b.hi, h)], BAR_COLOR.mix(0.8).filled())),
    )?;

    if let Some(curve) = overlay.filter(|c| !c.is_empty()) {
        chart
            .draw_series(LineSeries::new(curve.iter().copied(), RED.stroke_width(2)))?
            .label("KDE")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], RED));
        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()?;
    }

    present(&root, path)
}

/// Bar chart over named categories
fn draw_category_bars(
    path: &Path,
    size: (u32, u32),
    title: &str,
    y_desc: &str,
    labels: &[String],
    values: &[f64],
    rotate_labels: bool,
) -> crate::Result<()> {
    if labels.is_empty() || labels.len() != values.len() {
        return Err(PipelineError::artifact(
            path,
            format!("{} labels for {} bars", labels.len(), values.len()),
        )
        .into());
    }
    let y_max = values.iter().cloned().fold(0.0, f64::max);
    let y_max = if y_max > 0.0 { y_max * 1.1 } else { 1.0 };

    let root = BitMapBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(if rotate_labels { 220 } else { 50 })
        .y_label_area_size(60)
        .build_cartesian_2d((0u32..labels.len() as u32).into_segmented(), 0f64..y_max)?;

    let label_font = if rotate_labels {
        ("sans-serif", 14).into_font().transform(FontTransform::Rotate90)
    } else {
        ("sans-serif", 14).into_font()
    };
    let label_for = |v: &SegmentValue<u32>| match v {
        SegmentValue::CenterOf(i) => labels.get(*i as usize).cloned().unwrap_or_default(),
        _ => String::new(),
    };

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(labels.len())
        .x_label_style(label_font)
        .x_label_formatter(&label_for)
        .y_desc(y_desc)
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    chart.draw_series(
        Histogram::vertical(&chart)
            .style(BAR_COLOR.filled())
            .margin(8)
            .data(values.iter().enumerate().map(|(i, &v)| (i as u32, v))),
    )?;

    present(&root, path)
}

/// Heatmap of a square matrix with the same labels on both axes
fn draw_heatmap(path: &Path, title: &str, labels: &[String], matrix: &Array2<f64>) -> crate::Result<()> {
    let n = labels.len() as u32;
    if n == 0 {
        return Err(PipelineError::artifact(path, "no numeric columns to correlate").into());
    }

    let root = BitMapBackend::new(path, (1200, 1100)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(220)
        .y_label_area_size(220)
        .build_cartesian_2d((0u32..n).into_segmented(), (0u32..n).into_segmented())?;

    let label_for = |v: &SegmentValue<u32>| match v {
        SegmentValue::CenterOf(i) => labels.get(*i as usize).cloned().unwrap_or_default(),
        _ => String::new(),
    };

    chart
        .configure_mesh()
        .disable_mesh()
        .x_labels(labels.len())
        .y_labels(labels.len())
        .x_label_style(("sans-serif", 13).into_font().transform(FontTransform::Rotate90))
        .y_label_style(("sans-serif", 13))
        .x_label_formatter(&label_for)
        .y_label_formatter(&label_for)
        .draw()?;

    chart.draw_series((0..n).flat_map(|i| (0..n).map(move |j| (i, j))).map(|(i, j)| {
        let r = matrix[[i as usize, j as usize]];
        Rectangle::new(
            [
                (SegmentValue::Exact(j), SegmentValue::Exact(i)),
                (SegmentValue::Exact(j + 1), SegmentValue::Exact(i + 1)),
            ],
            correlation_color(r).filled(),
        )
    }))?;

    present(&root, path)
}

/// Write the exploratory plots for a labelled table into `config.images_dir`
///
/// # Arguments
/// * `df` - Record table carrying the response column
/// * `config` - Supplies the images directory and response name
///
/// # Returns
/// * Paths of the five written images
pub fn perform_eda(df: &DataFrame, config: &PipelineConfig) -> crate::Result<Vec<PathBuf>> {
    std::fs::create_dir_all(&config.images_dir)
        .map_err(|err| PipelineError::artifact(&config.images_dir, err))?;
    let mut written = Vec::with_capacity(5);

    let response = &config.label.response;
    let churn = present_values(df, response)?;
    let path = config.image_path(CHURN_HISTOGRAM);
    draw_histogram(&path, response, response, &histogram_bins(&churn, LABEL_BINS), false, None)?;
    written.push(path);

    let ages = present_values(df, AGE_COLUMN)?;
    let path = config.image_path(AGE_HISTOGRAM);
    draw_histogram(&path, AGE_COLUMN, AGE_COLUMN, &histogram_bins(&ages, AGE_BINS), false, None)?;
    written.push(path);

    let shares = normalized_value_counts(&category_values(df, MARITAL_STATUS_COLUMN)?);
    let (labels, values): (Vec<String>, Vec<f64>) = shares.into_iter().unzip();
    let path = config.image_path(MARITAL_STATUS_PLOT);
    draw_category_bars(&path, (1000, 500), MARITAL_STATUS_COLUMN, "Proportion", &labels, &values, false)?;
    written.push(path);

    let transactions = present_values(df, TRANSACTION_COUNT_COLUMN)?;
    let bins = histogram_bins(&transactions, sturges_bins(transactions.len()));
    let kde = gaussian_kde(&transactions, KDE_POINTS);
    let path = config.image_path(TRANSACTION_COUNT_HISTOGRAM);
    draw_histogram(&path, TRANSACTION_COUNT_COLUMN, TRANSACTION_COUNT_COLUMN, &bins, true, Some(&kde))?;
    written.push(path);

    let names = numeric_columns(df);
    let columns = names
        .iter()
        .map(|name| nullable_numeric_column(df, name))
        .collect::<crate::Result<Vec<_>>>()?;
    let path = config.image_path(CORRELATION_HEATMAP);
    draw_heatmap(&path, "Correlation", &names, &pearson_correlation(&columns))?;
    written.push(path);

    Ok(written)
}

/// Overlay test-set ROC curves, each labelled with its AUC
pub fn roc_plot(curves: &[(&str, RocCurve)], output_path: &Path) -> crate::Result<()> {
    let root = BitMapBackend::new(output_path, (1200, 640)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("ROC Curves", ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(0f64..1f64, 0f64..1.02f64)?;

    chart
        .configure_mesh()
        .x_desc("False Positive Rate (Positive label: 1)")
        .y_desc("True Positive Rate (Positive label: 1)")
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    for (i, (name, curve)) in curves.iter().enumerate() {
        let color = SERIES_COLORS[i % SERIES_COLORS.len()];
        chart
            .draw_series(LineSeries::new(
                curve.fpr.iter().copied().zip(curve.tpr.iter().copied()),
                color.mix(0.8).stroke_width(2),
            ))?
            .label(format!("{} (AUC = {:.2})", name, curve.auc()))
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
    }

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::LowerRight)
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    present(&root, output_path)
}

/// Bar chart of forest feature importances, largest first, labels rotated 90°
///
/// # Arguments
/// * `model` - Fitted forest
/// * `feature_names` - Column names in matrix order
/// * `output_path` - Path to save the PNG plot
pub fn feature_importance_plot(
    model: &RandomForest,
    feature_names: &[String],
    output_path: &Path,
) -> crate::Result<()> {
    let importances = model.feature_importances();
    if importances.len() != feature_names.len() {
        return Err(PipelineError::SchemaMismatch {
            column: "<feature names>".to_string(),
            reason: format!(
                "{} names for {} importances",
                feature_names.len(),
                importances.len()
            ),
        }
        .into());
    }

    let mut order: Vec<usize> = (0..importances.len()).collect();
    order.sort_by(|&a, &b| importances[b].total_cmp(&importances[a]));

    let names: Vec<String> = order.iter().map(|&i| feature_names[i].clone()).collect();
    let values: Vec<f64> = order.iter().map(|&i| importances[i]).collect();

    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|err| PipelineError::artifact(parent, err))?;
    }
    draw_category_bars(output_path, (1600, 900), "Feature Importance", "Importance", &names, &values, true)
}
