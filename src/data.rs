//! Data loading, churn labelling and train/test splitting using Polars

use crate::config::{LabelConfig, SplitConfig};
use crate::error::PipelineError;
use ndarray::{Array1, Array2, Axis};
use polars::prelude::*;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::path::Path;

/// Train/test partitions of the feature matrix and label vector
#[derive(Debug, Clone)]
pub struct SplitData {
    pub x_train: Array2<f64>,
    pub x_test: Array2<f64>,
    pub y_train: Array1<usize>,
    pub y_test: Array1<usize>,
    /// Column names of X, in matrix order
    pub feature_names: Vec<String>,
    /// Source row of each training sample
    pub train_indices: Vec<usize>,
    /// Source row of each test sample
    pub test_indices: Vec<usize>,
}

impl SplitData {
    pub fn n_rows(&self) -> usize {
        self.x_train.nrows() + self.x_test.nrows()
    }
}

/// Load a CSV file with a header row into a DataFrame
///
/// # Arguments
/// * `path` - Path to the CSV file
///
/// # Returns
/// * The record table, or `PipelineError::InputNotFound` if `path` does not exist
pub fn import_data(path: impl AsRef<Path>) -> crate::Result<DataFrame> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(PipelineError::InputNotFound {
            path: path.to_path_buf(),
        }
        .into());
    }

    let empty = || PipelineError::EmptyInput {
        path: path.to_path_buf(),
    };

    let df = CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .and_then(|reader| reader.finish())
        .map_err(|err| match err {
            PolarsError::NoData(_) => anyhow::Error::from(empty()),
            err => err.into(),
        })?;

    if df.height() == 0 {
        return Err(empty().into());
    }

    Ok(df)
}

/// Add the binary response column: 0 for retained customers, 1 otherwise
pub fn add_churn_label(df: &mut DataFrame, label: &LabelConfig) -> crate::Result<()> {
    let attrition = df
        .column(&label.attrition_column)
        .map_err(|_| PipelineError::missing_column(&label.attrition_column))?
        .as_materialized_series()
        .cast(&DataType::String)?;

    let churn: Vec<i32> = attrition
        .str()?
        .into_iter()
        .map(|v| if v == Some(label.retained_value.as_str()) { 0 } else { 1 })
        .collect();

    df.with_column(Series::new(label.response.as_str().into(), churn))?;
    Ok(())
}

/// Names of all numeric columns, in table order
pub fn numeric_columns(df: &DataFrame) -> Vec<String> {
    df.get_columns()
        .iter()
        .filter(|c| c.dtype().is_primitive_numeric())
        .map(|c| c.name().to_string())
        .collect()
}

/// Values of a numeric column as f64, with nulls kept as `None`
pub fn nullable_numeric_column(df: &DataFrame, name: &str) -> crate::Result<Vec<Option<f64>>> {
    let column = df
        .column(name)
        .map_err(|_| PipelineError::missing_column(name))?;

    if !column.dtype().is_primitive_numeric() {
        return Err(PipelineError::SchemaMismatch {
            column: name.to_string(),
            reason: format!("expected a numeric column, found {}", column.dtype()),
        }
        .into());
    }

    let series = column.as_materialized_series().cast(&DataType::Float64)?;
    Ok(series.f64()?.into_iter().collect())
}

/// Values of a numeric column as f64; nulls are an error
pub fn numeric_column(df: &DataFrame, name: &str) -> crate::Result<Vec<f64>> {
    nullable_numeric_column(df, name)?
        .into_iter()
        .map(|v| {
            v.ok_or_else(|| {
                PipelineError::MissingValues {
                    column: name.to_string(),
                }
                .into()
            })
        })
        .collect()
}

/// Build the `(n_rows, n_features)` matrix from the named columns, in order
pub fn feature_matrix(df: &DataFrame, features: &[String]) -> crate::Result<Array2<f64>> {
    let mut matrix = Array2::<f64>::zeros((df.height(), features.len()));
    for (j, name) in features.iter().enumerate() {
        let values = numeric_column(df, name)?;
        matrix.column_mut(j).assign(&Array1::from_vec(values));
    }
    Ok(matrix)
}

/// Binary labels from the response column
pub fn label_vector(df: &DataFrame, response: &str) -> crate::Result<Array1<usize>> {
    let values = numeric_column(df, response)?;
    let labels = values
        .into_iter()
        .map(|v| match v {
            v if v == 0.0 => Ok(0usize),
            v if v == 1.0 => Ok(1usize),
            other => Err(PipelineError::SchemaMismatch {
                column: response.to_string(),
                reason: format!("label value {} is not binary", other),
            }
            .into()),
        })
        .collect::<crate::Result<Vec<usize>>>()?;
    Ok(Array1::from_vec(labels))
}

/// Shuffle `0..n_rows` with a seeded RNG; the first `ceil(n_rows * test_size)`
/// indices form the test partition.
pub fn train_test_indices(
    n_rows: usize,
    test_size: f64,
    seed: u64,
) -> crate::Result<(Vec<usize>, Vec<usize>)> {
    if n_rows < 2 {
        return Err(PipelineError::FitFailure(format!(
            "need at least 2 rows to split, got {}",
            n_rows
        ))
        .into());
    }

    let n_test = ((n_rows as f64 * test_size).ceil() as usize).clamp(1, n_rows - 1);

    let mut indices: Vec<usize> = (0..n_rows).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let train = indices.split_off(n_test);
    Ok((train, indices))
}

/// Select the feature columns and response, then split into train and test
///
/// # Arguments
/// * `df` - Encoded record table
/// * `features` - Ordered feature column names
/// * `response` - Binary label column
/// * `split` - Test fraction and seed
pub fn perform_feature_engineering(
    df: &DataFrame,
    features: &[String],
    response: &str,
    split: &SplitConfig,
) -> crate::Result<SplitData> {
    let x = feature_matrix(df, features)?;
    let y = label_vector(df, response)?;

    let (train_indices, test_indices) = train_test_indices(df.height(), split.test_size, split.seed)?;

    Ok(SplitData {
        x_train: x.select(Axis(0), &train_indices),
        x_test: x.select(Axis(0), &test_indices),
        y_train: y.select(Axis(0), &train_indices),
        y_test: y.select(Axis(0), &test_indices),
        feature_names: features.to_vec(),
        train_indices,
        test_indices,
    })
}
