//! Integration tests for ChurnForge

use churnforge::config::ForestGrid;
use churnforge::data::{label_vector, numeric_column};
use churnforge::forest::{Criterion, MaxFeatures};
use churnforge::model::{load_model, FOREST_MODEL_FILE, LINEAR_MODEL_FILE};
use churnforge::{
    add_churn_label, encoder_helper, import_data, perform_feature_engineering, LogisticModel,
    Pipeline, PipelineConfig, PipelineError, RandomForest, RunLog,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::{tempdir, NamedTempFile};

const HEADER: &str = "CLIENTNUM,Attrition_Flag,Customer_Age,Gender,Dependent_count,Education_Level,\
Marital_Status,Income_Category,Card_Category,Months_on_book,Total_Relationship_Count,\
Months_Inactive_12_mon,Contacts_Count_12_mon,Credit_Limit,Total_Revolving_Bal,Avg_Open_To_Buy,\
Total_Amt_Chng_Q4_Q1,Total_Trans_Amt,Total_Trans_Ct,Total_Ct_Chng_Q4_Q1,Avg_Utilization_Ratio";

const GENDERS: [&str; 2] = ["M", "F"];
const EDUCATION: [&str; 4] = ["Graduate", "High School", "Uneducated", "Unknown"];
const MARITAL: [&str; 3] = ["Married", "Single", "Divorced"];
const INCOME: [&str; 4] = ["Less than $40K", "$40K - $60K", "$60K - $80K", "$120K +"];
const CARDS: [&str; 2] = ["Blue", "Silver"];

/// Write a synthetic bank customer table; churners trade less and carry lower balances
fn write_bank_csv(file: &mut impl Write, rows: usize, seed: u64, marital: &[&str]) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    writeln!(file, "{}", HEADER).unwrap();

    for i in 0..rows {
        let churned = i % 2 == 1;
        let trans_ct: i64 = if churned {
            rng.gen_range(10..60)
        } else {
            rng.gen_range(45..130)
        };
        let revolving: i64 = if churned {
            rng.gen_range(0..1200)
        } else {
            rng.gen_range(800..2500)
        };
        let credit_limit: f64 = rng.gen_range(1500.0..30000.0);
        let trans_amt = trans_ct * rng.gen_range(40..90);

        writeln!(
            file,
            "{},{},{},{},{},{},{},{},{},{},{},{},{},{:.1},{},{:.1},{:.3},{},{},{:.3},{:.3}",
            700_000_000 + i,
            if churned { "Attrited Customer" } else { "Existing Customer" },
            rng.gen_range(26..70),
            GENDERS[rng.gen_range(0..GENDERS.len())],
            rng.gen_range(0..5),
            EDUCATION[rng.gen_range(0..EDUCATION.len())],
            marital[rng.gen_range(0..marital.len())],
            INCOME[rng.gen_range(0..INCOME.len())],
            CARDS[rng.gen_range(0..CARDS.len())],
            rng.gen_range(13..56),
            rng.gen_range(1..7),
            rng.gen_range(0..6),
            rng.gen_range(0..6),
            credit_limit,
            revolving,
            credit_limit - revolving as f64,
            rng.gen_range(0.3..1.5),
            trans_amt,
            trans_ct,
            rng.gen_range(0.2..1.3),
            revolving as f64 / credit_limit,
        )
        .unwrap();
    }
}

fn create_test_csv(rows: usize) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write_bank_csv(&mut file, rows, 7, &MARITAL);
    file
}

fn quick_config(input: &Path, root: &Path) -> PipelineConfig {
    let mut config = PipelineConfig {
        input: input.to_path_buf(),
        images_dir: root.join("images"),
        models_dir: root.join("models"),
        log_file: root.join("logs").join("churn_library.log"),
        ..PipelineConfig::default()
    };
    config.search.grid = ForestGrid {
        n_estimators: vec![10],
        max_features: vec![MaxFeatures::Sqrt],
        max_depth: vec![4, 8],
        criterion: vec![Criterion::Gini],
    };
    config.search.workers = 2;
    config
}

fn count_files(dir: &Path, extension: &str) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().and_then(|e| e.to_str()) == Some(extension))
        .count()
}

#[test]
fn test_end_to_end_pipeline() {
    let csv = create_test_csv(1000);
    let dir = tempdir().unwrap();
    let config = quick_config(csv.path(), dir.path());

    let report = {
        let log = RunLog::init(&config.log_file, false).unwrap();
        Pipeline::new(config.clone()).unwrap().run(&log).unwrap()
    };

    assert_eq!(report.rows, 1000);
    assert_eq!(report.train_rows, 700);
    assert_eq!(report.test_rows, 300);

    // exactly the two model files, plus the category map
    assert_eq!(count_files(&config.models_dir, "bin"), 2);
    assert!(config.models_dir.join("category_groups.json").exists());

    assert!(count_files(&config.images_dir, "png") >= 11);
    assert_eq!(report.images().count(), 11);
    for name in [
        "churn_histogram.png",
        "age_histogram.png",
        "marital_status_plot.png",
        "transaction_count_histogram.png",
        "correlation.png",
        "ROC_plot.png",
        "result.png",
        "Random_Forest_Train.png",
        "Random_Forest_Test.png",
        "Logistic_Regression_Train.png",
        "Logistic_Regression_Test.png",
    ] {
        assert!(config.images_dir.join(name).exists(), "{} missing", name);
    }

    // the signal is strong, both models should find it
    assert!(report.training.forest_auc > 0.9);
    assert!(report.training.linear_auc > 0.9);

    let log_text = fs::read_to_string(&config.log_file).unwrap();
    for stage in [
        "import_data",
        "perform_eda",
        "encoder_helper",
        "perform_feature_engineering",
        "train_models",
    ] {
        assert!(log_text.contains(&format!("INFO - SUCCESS: {}", stage)), "{} not logged", stage);
    }
    assert!(!log_text.contains("ERROR"));
}

#[test]
fn test_models_reload_and_score_new_rows() {
    let csv = create_test_csv(400);
    let dir = tempdir().unwrap();
    let config = quick_config(csv.path(), dir.path());
    let log = RunLog::init(&config.log_file, false).unwrap();
    let pipeline = Pipeline::new(config.clone()).unwrap();
    pipeline.run(&log).unwrap();

    // persisted models load on their own
    let forest: RandomForest = load_model(&config.models_dir.join(FOREST_MODEL_FILE)).unwrap();
    let linear: LogisticModel = load_model(&config.models_dir.join(LINEAR_MODEL_FILE)).unwrap();
    assert_eq!(forest.n_features(), 19);
    assert_eq!(linear.n_features(), 19);

    // new rows include a marital status never seen in training
    let new_csv = dir.path().join("new_customers.csv");
    let mut file = fs::File::create(&new_csv).unwrap();
    write_bank_csv(&mut file, 50, 99, &["Married", "Widowed"]);
    drop(file);

    let output = dir.path().join("scores").join("scores.csv");
    let first = pipeline.score(&new_csv, &output, &log).unwrap();
    assert_eq!(first.rows, 50);

    let scored = import_data(&output).unwrap();
    assert_eq!(scored.height(), 50);
    for column in [
        "churn_probability_rf",
        "churn_prediction_rf",
        "churn_probability_lr",
        "churn_prediction_lr",
    ] {
        assert!(scored.column(column).is_ok(), "{} missing", column);
    }
    let rf_first = numeric_column(&scored, "churn_probability_rf").unwrap();
    assert!(rf_first.iter().all(|p| (0.0..=1.0).contains(p)));

    let second = pipeline.score(&new_csv, &output, &log).unwrap();
    let rf_second = numeric_column(&import_data(&output).unwrap(), "churn_probability_rf").unwrap();
    assert_eq!(rf_first, rf_second);
    assert_eq!(first.forest_churn_rate, second.forest_churn_rate);
}

#[test]
fn test_strict_policy_rejects_unseen_category() {
    let csv = create_test_csv(200);
    let dir = tempdir().unwrap();
    let config = quick_config(csv.path(), dir.path());
    let log = RunLog::init(&config.log_file, false).unwrap();
    Pipeline::new(config.clone()).unwrap().run(&log).unwrap();

    let new_csv = dir.path().join("new_customers.csv");
    let mut file = fs::File::create(&new_csv).unwrap();
    write_bank_csv(&mut file, 20, 3, &["Widowed"]);
    drop(file);

    let strict = PipelineConfig {
        unseen_category: churnforge::UnseenCategory::Reject,
        ..config
    };
    let err = Pipeline::new(strict)
        .unwrap()
        .score(&new_csv, &dir.path().join("scores.csv"), &log)
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::UnseenCategory { value, .. }) if value == "Widowed"
    ));
}

#[test]
fn test_strict_policy_rejects_null_category_in_training() {
    let mut csv = NamedTempFile::new().unwrap();
    // empty marital status fields load as nulls
    write_bank_csv(&mut csv, 200, 11, &["Married", "Single", ""]);
    let dir = tempdir().unwrap();
    let config = PipelineConfig {
        unseen_category: churnforge::UnseenCategory::Reject,
        ..quick_config(csv.path(), dir.path())
    };

    let err = {
        let log = RunLog::init(&config.log_file, false).unwrap();
        Pipeline::new(config.clone()).unwrap().run(&log).unwrap_err()
    };
    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::UnseenCategory { column, .. }) if column == "Marital_Status"
    ));

    let log_text = fs::read_to_string(&config.log_file).unwrap();
    assert!(log_text.contains("ERROR: encoder_helper"));
    assert!(!config.models_dir.join(FOREST_MODEL_FILE).exists());
}

#[test]
fn test_missing_input_file() {
    let err = import_data("./data/no_such_bank_data.csv").unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::InputNotFound { .. })
    ));
}

#[test]
fn test_encoding_and_split_invariants() {
    let csv = create_test_csv(300);
    let config = PipelineConfig::default();

    let mut df = import_data(csv.path()).unwrap();
    assert!(df.height() > 0 && df.width() > 0);
    add_churn_label(&mut df, &config.label).unwrap();

    let labels = label_vector(&df, "Churn").unwrap();
    assert!(labels.iter().all(|&c| c == 0 || c == 1));

    encoder_helper(&mut df, &config.categorical_columns, "Churn").unwrap();
    for category in &config.categorical_columns {
        assert!(df.column(&config.encoded_column(category)).is_ok());
    }

    // rows sharing a category share the encoded value, equal to their mean label
    let statuses = df
        .column("Marital_Status")
        .unwrap()
        .as_materialized_series()
        .str()
        .unwrap()
        .clone();
    let encoded = numeric_column(&df, "Marital_Status_Churn").unwrap();
    for status in MARITAL {
        let members: Vec<usize> = (0..df.height())
            .filter(|&i| statuses.get(i) == Some(status))
            .collect();
        if members.is_empty() {
            continue;
        }
        let mean = members.iter().map(|&i| labels[i] as f64).sum::<f64>() / members.len() as f64;
        for &i in &members {
            assert!((encoded[i] - mean).abs() < 1e-12);
        }
    }

    let split_a = perform_feature_engineering(&df, &config.feature_columns, "Churn", &config.split).unwrap();
    let split_b = perform_feature_engineering(&df, &config.feature_columns, "Churn", &config.split).unwrap();
    assert_eq!(split_a.x_train.nrows() + split_a.x_test.nrows(), 300);
    assert_eq!(split_a.x_test.nrows(), 90);
    assert_eq!(split_a.x_train.nrows(), split_a.y_train.len());
    assert_eq!(split_a.x_train.ncols(), 19);
    assert_eq!(split_a.test_indices, split_b.test_indices);
    assert_eq!(split_a.y_test, split_b.y_test);
}
