//! Target-mean encoding of categorical columns

use crate::error::PipelineError;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// File name of the persisted category map inside the models directory
pub const CATEGORY_GROUPS_FILE: &str = "category_groups.json";

/// What to do with a category value absent from the fitted group map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnseenCategory {
    /// Substitute the overall response mean of the fitting table
    #[default]
    GlobalMean,
    /// Fail with `PipelineError::UnseenCategory`
    Reject,
}

/// Category value → mean response, for one categorical column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryGroupMap {
    pub column: String,
    pub means: BTreeMap<String, f64>,
    pub global_mean: f64,
}

impl CategoryGroupMap {
    /// Encoded value for a category under the given policy
    pub fn lookup(&self, value: Option<&str>, policy: UnseenCategory) -> crate::Result<f64> {
        match value.and_then(|v| self.means.get(v)) {
            Some(&mean) => Ok(mean),
            None => match policy {
                UnseenCategory::GlobalMean => Ok(self.global_mean),
                UnseenCategory::Reject => Err(PipelineError::UnseenCategory {
                    column: self.column.clone(),
                    value: value.unwrap_or("<null>").to_string(),
                }
                .into()),
            },
        }
    }
}

/// Fitted target-mean encoder for a set of categorical columns
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetEncoder {
    response: String,
    policy: UnseenCategory,
    groups: Vec<CategoryGroupMap>,
}

impl TargetEncoder {
    /// Learn per-category response means from `df`
    pub fn fit(
        df: &DataFrame,
        categories: &[String],
        response: &str,
        policy: UnseenCategory,
    ) -> crate::Result<Self> {
        let target = response_values(df, response)?;
        let global_mean = if target.is_empty() {
            0.0
        } else {
            target.iter().sum::<f64>() / target.len() as f64
        };

        let mut groups = Vec::with_capacity(categories.len());
        for category in categories {
            let values = category_values(df, category)?;

            let mut sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
            for (value, &t) in values.iter().zip(&target) {
                if let Some(v) = value {
                    let entry = sums.entry(v.clone()).or_insert((0.0, 0));
                    entry.0 += t;
                    entry.1 += 1;
                }
            }

            let means = sums
                .into_iter()
                .map(|(k, (sum, count))| (k, sum / count as f64))
                .collect();

            groups.push(CategoryGroupMap {
                column: category.clone(),
                means,
                global_mean,
            });
        }

        Ok(Self {
            response: response.to_string(),
            policy,
            groups,
        })
    }

    /// Append one `<category>_<response>` column per fitted category.
    ///
    /// Existing columns and row order are untouched.
    pub fn transform(&self, df: &mut DataFrame) -> crate::Result<()> {
        for group in &self.groups {
            let values = category_values(df, &group.column)?;
            let encoded = values
                .iter()
                .map(|v| group.lookup(v.as_deref(), self.policy))
                .collect::<crate::Result<Vec<f64>>>()?;

            let name = self.encoded_name(&group.column);
            df.with_column(Series::new(name.as_str().into(), encoded))?;
        }
        Ok(())
    }

    /// Same groups, different handling of unseen values
    pub fn with_policy(mut self, policy: UnseenCategory) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> UnseenCategory {
        self.policy
    }

    pub fn encoded_name(&self, category: &str) -> String {
        format!("{}_{}", category, self.response)
    }

    pub fn groups(&self) -> &[CategoryGroupMap] {
        &self.groups
    }

    pub fn group(&self, category: &str) -> Option<&CategoryGroupMap> {
        self.groups.iter().find(|g| g.column == category)
    }

    pub fn response(&self) -> &str {
        &self.response
    }

    pub fn save_json(&self, path: &Path) -> crate::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|err| PipelineError::artifact(parent, err))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|err| PipelineError::artifact(path, err))?;
        Ok(())
    }

    pub fn load_json(path: &Path) -> crate::Result<Self> {
        if !path.exists() {
            return Err(PipelineError::InputNotFound {
                path: path.to_path_buf(),
            }
            .into());
        }
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Replace each categorical column's values with the churn rate of its group,
/// appended as `<category>_<response>`.
///
/// Returns the fitted encoder so the same map can be applied to other tables.
pub fn encoder_helper(
    df: &mut DataFrame,
    categories: &[String],
    response: &str,
) -> crate::Result<TargetEncoder> {
    let encoder = TargetEncoder::fit(df, categories, response, UnseenCategory::GlobalMean)?;
    encoder.transform(df)?;
    Ok(encoder)
}

fn response_values(df: &DataFrame, response: &str) -> crate::Result<Vec<f64>> {
    let series = df
        .column(response)
        .map_err(|_| PipelineError::missing_column(response))?
        .as_materialized_series()
        .cast(&DataType::Float64)?;

    let values = series
        .f64()?
        .into_iter()
        .map(|v| {
            v.ok_or_else(|| {
                PipelineError::MissingValues {
                    column: response.to_string(),
                }
                .into()
            })
        })
        .collect::<crate::Result<Vec<f64>>>()?;
    Ok(values)
}

pub(crate) fn category_values(df: &DataFrame, category: &str) -> crate::Result<Vec<Option<String>>> {
    let series = df
        .column(category)
        .map_err(|_| PipelineError::missing_column(category))?
        .as_materialized_series()
        .cast(&DataType::String)?;

    let values = series
        .str()?
        .into_iter()
        .map(|v| v.map(|s| s.to_string()))
        .collect();
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_df() -> DataFrame {
        df!(
            "Marital_Status" => &["Married", "Single", "Married", "Married", "Single", "Married", "Divorced"],
            "Gender" => &["M", "F", "F", "M", "M", "F", "F"],
            "Churn" => &[0i32, 1, 1, 0, 1, 0, 1]
        )
        .unwrap()
    }

    fn names(cols: &[&str]) -> Vec<String> {
        cols.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_group_means() {
        let mut df = sample_df();
        encoder_helper(&mut df, &names(&["Marital_Status", "Gender"]), "Churn").unwrap();

        let married: Vec<f64> = df
            .column("Marital_Status_Churn")
            .unwrap()
            .as_materialized_series()
            .f64()
            .unwrap()
            .into_no_null_iter()
            .collect();

        // Married rows carry [0, 1, 0, 0]
        assert_eq!(married[0], 0.25);
        assert_eq!(married[2], 0.25);
        assert_eq!(married[3], 0.25);
        assert_eq!(married[5], 0.25);
        assert_eq!(married[1], 1.0);
        // single-member category yields its own label
        assert_eq!(married[6], 1.0);
    }

    #[test]
    fn test_preserves_rows_and_columns() {
        let mut df = sample_df();
        let before: Vec<String> = df
            .get_column_names()
            .iter()
            .map(|c| c.to_string())
            .collect();

        encoder_helper(&mut df, &names(&["Marital_Status", "Gender"]), "Churn").unwrap();

        assert_eq!(df.height(), 7);
        assert_eq!(df.width(), before.len() + 2);
        for col in &before {
            assert!(df.column(col).is_ok());
        }
        let status = df.column("Marital_Status").unwrap().as_materialized_series().str().unwrap().get(6);
        assert_eq!(status, Some("Divorced"));
    }

    #[test]
    fn test_missing_response_fails() {
        let mut df = sample_df();
        let err = encoder_helper(&mut df, &names(&["Gender"]), "Attrition").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::SchemaMismatch { column, .. }) if column == "Attrition"
        ));
    }

    #[test]
    fn test_missing_category_fails() {
        let mut df = sample_df();
        assert!(encoder_helper(&mut df, &names(&["Card_Category"]), "Churn").is_err());
    }

    #[test]
    fn test_unseen_category_policies() {
        let train = sample_df();
        let mut new_rows = df!(
            "Marital_Status" => &["Married", "Widowed"],
            "Gender" => &["M", "F"]
        )
        .unwrap();

        let lenient = TargetEncoder::fit(
            &train,
            &names(&["Marital_Status"]),
            "Churn",
            UnseenCategory::GlobalMean,
        )
        .unwrap();
        lenient.transform(&mut new_rows).unwrap();
        let encoded: Vec<f64> = new_rows
            .column("Marital_Status_Churn")
            .unwrap()
            .as_materialized_series()
            .f64()
            .unwrap()
            .into_no_null_iter()
            .collect();
        assert_eq!(encoded[0], 0.25);
        assert!((encoded[1] - 4.0 / 7.0).abs() < 1e-12);

        let strict = TargetEncoder::fit(
            &train,
            &names(&["Marital_Status"]),
            "Churn",
            UnseenCategory::Reject,
        )
        .unwrap();
        let err = strict.transform(&mut new_rows).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::UnseenCategory { value, .. }) if value == "Widowed"
        ));
    }

    #[test]
    fn test_json_round_trip_keeps_groups() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("groups.json");

        let encoder = TargetEncoder::fit(
            &sample_df(),
            &names(&["Gender"]),
            "Churn",
            UnseenCategory::Reject,
        )
        .unwrap();
        encoder.save_json(&path).unwrap();

        let loaded = TargetEncoder::load_json(&path).unwrap();
        assert_eq!(loaded.groups(), encoder.groups());
        assert_eq!(loaded.policy(), UnseenCategory::Reject);
        assert_eq!(loaded.clone().with_policy(UnseenCategory::GlobalMean).policy(), UnseenCategory::GlobalMean);
        assert_eq!(loaded.group("Gender").unwrap().means.len(), 2);
    }
}
