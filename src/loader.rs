//! Reading raw patient tables and turning them into canonical feature tables.
//!
//! Training files and uploaded files go through the same [`canonicalize`]
//! step, so the column contract cannot drift between the two paths.

use crate::error::{Result, RiskError};
use crate::records::{HeartRecord, ID_COLUMN, INDEX_COLUMN, LABEL_COLUMN, SEX};
use log::{debug, info, warn};
use polars::prelude::*;
use polars_io::parquet::ParquetReader;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::HashSet;
use std::fs::File;
use std::io::Cursor;
use std::path::Path;

pub fn read_csv<P: AsRef<Path>>(path: P) -> Result<DataFrame> {
    let file = File::open(path)?;

    Ok(CsvReader::new(file).has_header(true).finish()?)
}

pub fn read_parquet<P: AsRef<Path>>(path: P) -> Result<DataFrame> {
    let file = File::open(path)?;

    Ok(ParquetReader::new(file).finish()?)
}

/// Parse an in-memory CSV document (header row required).
pub fn parse_csv(bytes: &[u8]) -> Result<DataFrame> {
    Ok(CsvReader::new(Cursor::new(bytes.to_vec()))
        .has_header(true)
        .finish()?)
}

/// Read a CSV or Parquet table, picked by file extension.
pub fn read_table<P: AsRef<Path>>(path: P) -> Result<DataFrame> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("csv") => read_csv(path),
        Some("parquet") => read_parquet(path),
        _ => Err(RiskError::InputFormat {
            path: path.to_path_buf(),
        }),
    }
}

/// Rename external headers to canonical names and encode the sex column.
///
/// Columns without a mapping are kept as they are. When two external headers
/// map to the same canonical name, the first one in file order wins.
pub fn canonicalize(mut df: DataFrame) -> Result<DataFrame> {
    let names: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|name| name.to_string())
        .collect();

    let mut taken: HashSet<String> = names
        .iter()
        .filter(|name| HeartRecord::canonical_name(name).is_none())
        .cloned()
        .collect();

    for name in &names {
        let Some(canonical) = HeartRecord::canonical_name(name) else {
            continue;
        };
        if taken.contains(canonical) {
            warn!("dropping column {:?}, {:?} is already present", name, canonical);
            df = df.drop(name)?;
            continue;
        }
        df.rename(name, canonical)?;
        taken.insert(canonical.to_string());
    }

    if df.get_column_names().contains(&SEX) {
        df = df
            .lazy()
            .with_column(
                col(SEX)
                    .alias(SEX)
                    .apply(encode_sex, GetOutput::from_type(DataType::Int32)),
            )
            .collect()?;
    }

    debug!("canonical columns: {:?}", df.get_column_names());
    Ok(df)
}

fn encode_sex(column: Series) -> std::result::Result<Option<Series>, PolarsError> {
    let text = column.cast(&DataType::Utf8)?;
    let encoded: Vec<i32> = text
        .utf8()?
        .into_iter()
        .map(HeartRecord::encode_sex)
        .collect();
    Ok(Option::from(Series::new(column.name(), encoded)))
}

fn drop_if_present(df: DataFrame, name: &str) -> Result<DataFrame> {
    if df.get_column_names().contains(&name) {
        Ok(df.drop(name)?)
    } else {
        Ok(df)
    }
}

/// Split a canonical table into features and 0/1 labels.
///
/// Fails when the label column is absent or holds anything but 0 and 1.
pub fn feature_and_target(df: &DataFrame) -> Result<(DataFrame, Vec<i32>)> {
    let label = df
        .column(LABEL_COLUMN)
        .map_err(|_| RiskError::MissingColumn {
            column: LABEL_COLUMN.to_string(),
        })?
        .cast(&DataType::Float64)?;

    let labels = label
        .f64()?
        .into_iter()
        .enumerate()
        .map(|(row, value)| match value {
            Some(v) if v == 0.0 => Ok(0),
            Some(v) if v == 1.0 => Ok(1),
            other => Err(RiskError::InvalidLabel { row, value: other }),
        })
        .collect::<Result<Vec<i32>>>()?;

    let mut features = df.drop(LABEL_COLUMN)?;
    features = drop_if_present(features, ID_COLUMN)?;
    features = drop_if_present(features, INDEX_COLUMN)?;

    Ok((features, labels))
}

/// Canonicalize a raw training table and split it into features and labels.
pub fn prepare_train(raw: DataFrame) -> Result<(DataFrame, Vec<i32>)> {
    let df = canonicalize(raw)?;
    feature_and_target(&df)
}

/// Canonicalize a raw table for scoring: id, index and label columns are dropped.
pub fn prepare_infer(raw: DataFrame) -> Result<DataFrame> {
    let mut df = canonicalize(raw)?;
    for name in [ID_COLUMN, INDEX_COLUMN, LABEL_COLUMN] {
        df = drop_if_present(df, name)?;
    }
    Ok(df)
}

pub fn load_train<P: AsRef<Path>>(path: P) -> Result<(DataFrame, Vec<i32>)> {
    let path = path.as_ref();
    info!("loading training data from {}", path.display());

    let raw = read_table(path)?;
    info!("loaded {} rows, {} columns", raw.height(), raw.width());

    let (features, labels) = prepare_train(raw)?;
    let positives = labels.iter().filter(|&&l| l == 1).count();
    info!(
        "training table ready: {} rows, {} feature columns, {} positive",
        features.height(),
        features.width(),
        positives
    );
    Ok((features, labels))
}

pub fn load_infer<P: AsRef<Path>>(path: P) -> Result<DataFrame> {
    let path = path.as_ref();
    info!("loading scoring data from {}", path.display());

    let features = prepare_infer(read_table(path)?)?;
    info!("loaded {} rows to score", features.height());
    Ok(features)
}

/// Shuffle rows with a fixed seed and hold out `test_fraction` of them.
///
/// Returns `(x_train, x_test, y_train, y_test)`. Both sides keep at least one
/// row when the table has two or more.
pub fn train_test_split(
    features: &DataFrame,
    labels: &[i32],
    test_fraction: f64,
    seed: u64,
) -> Result<(DataFrame, DataFrame, Vec<i32>, Vec<i32>)> {
    let rows = features.height();
    if rows != labels.len() {
        return Err(RiskError::LengthMismatch {
            rows,
            labels: labels.len(),
        });
    }
    if rows < 2 {
        return Err(RiskError::EmptyTable);
    }

    let mut order: Vec<usize> = (0..rows).collect();
    order.shuffle(&mut StdRng::seed_from_u64(seed));

    let n_test = ((rows as f64) * test_fraction.clamp(0.0, 1.0)).round() as usize;
    let n_test = n_test.clamp(1, rows - 1);
    let (test_rows, train_rows) = order.split_at(n_test);

    let take = |idx: &[usize]| -> Result<(DataFrame, Vec<i32>)> {
        let positions = IdxCa::from_vec("idx", idx.iter().map(|&i| i as IdxSize).collect());
        let table = features.take(&positions)?;
        let y = idx.iter().map(|&i| labels[i]).collect();
        Ok((table, y))
    };

    let (x_train, y_train) = take(train_rows)?;
    let (x_test, y_test) = take(test_rows)?;
    Ok((x_train, x_test, y_train, y_test))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{CHOLESTEROL, DIET, SLEEP_HOURS};
    use polars_io::parquet::ParquetWriter;

    fn raw_training_csv() -> &'static str {
        "id,Age,Cholesterol,Gender,Diet,Sleep Hours Per Day,Heart Attack Risk (Binary)\n\
         7,0.3,0.5,Male,1,0.2,1.0\n\
         8,0.6,,female,2,0.4,0.0\n\
         9,0.1,0.9,unknown,0,0.6,0.0\n"
    }

    #[test]
    fn canonicalize_renames_and_encodes_sex() {
        let df = canonicalize(parse_csv(raw_training_csv().as_bytes()).unwrap()).unwrap();
        let names = df.get_column_names();
        assert!(names.contains(&"age"));
        assert!(names.contains(&CHOLESTEROL));
        assert!(names.contains(&SLEEP_HOURS));
        assert!(!names.contains(&"Gender"));

        let sex: Vec<Option<i32>> = df.column(SEX).unwrap().i32().unwrap().into_iter().collect();
        assert_eq!(sex, vec![Some(1), Some(0), Some(-1)]);
    }

    #[test]
    fn canonicalize_encodes_missing_sex_as_unknown() {
        let csv = "Gender,Age\nMale,1\n,2\nFemale,3\n";
        let df = canonicalize(parse_csv(csv.as_bytes()).unwrap()).unwrap();
        let sex: Vec<Option<i32>> = df.column(SEX).unwrap().i32().unwrap().into_iter().collect();
        assert_eq!(sex, vec![Some(1), Some(-1), Some(0)]);
    }

    #[test]
    fn duplicate_sleep_headers_keep_the_first() {
        let csv = "Sleep Hours Per Week,Sleep Hours Per Day\n1,2\n3,4\n";
        let df = canonicalize(parse_csv(csv.as_bytes()).unwrap()).unwrap();
        assert_eq!(df.width(), 1);
        let sleep: Vec<Option<i64>> = df
            .column(SLEEP_HOURS)
            .unwrap()
            .i64()
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(sleep, vec![Some(1), Some(3)]);
    }

    #[test]
    fn prepare_train_splits_label_and_drops_id() {
        let raw = parse_csv(raw_training_csv().as_bytes()).unwrap();
        let (features, labels) = prepare_train(raw).unwrap();
        assert_eq!(labels, vec![1, 0, 0]);
        let names = features.get_column_names();
        assert!(!names.contains(&ID_COLUMN));
        assert!(!names.contains(&LABEL_COLUMN));
        assert!(names.contains(&DIET));
        assert_eq!(features.height(), 3);
    }

    #[test]
    fn prepare_train_requires_label() {
        let raw = parse_csv(b"id,Age\n1,0.5\n").unwrap();
        match prepare_train(raw) {
            Err(RiskError::MissingColumn { column }) => assert_eq!(column, LABEL_COLUMN),
            other => panic!("expected missing label, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn prepare_train_rejects_non_binary_label() {
        let raw = parse_csv(b"Age,Heart Attack Risk (Binary)\n0.5,2\n").unwrap();
        assert!(matches!(
            prepare_train(raw),
            Err(RiskError::InvalidLabel { row: 0, .. })
        ));
    }

    #[test]
    fn prepare_infer_drops_id_and_stray_label() {
        let raw = parse_csv(raw_training_csv().as_bytes()).unwrap();
        let features = prepare_infer(raw).unwrap();
        let names = features.get_column_names();
        assert!(!names.contains(&ID_COLUMN));
        assert!(!names.contains(&LABEL_COLUMN));
        assert_eq!(features.height(), 3);
    }

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("cardio-risk-{}-{}", std::process::id(), name))
    }

    #[test]
    fn loads_training_and_scoring_tables_from_csv_files() {
        let path = temp_path("patients.csv");
        std::fs::write(&path, raw_training_csv()).unwrap();
        let trained = load_train(&path);
        let scored = load_infer(&path);
        std::fs::remove_file(&path).unwrap();

        let (features, labels) = trained.unwrap();
        assert_eq!(labels, vec![1, 0, 0]);
        assert!(features.get_column_names().contains(&SEX));
        assert!(!features.get_column_names().contains(&LABEL_COLUMN));

        let scored = scored.unwrap();
        assert_eq!(scored.height(), 3);
        assert!(!scored.get_column_names().contains(&ID_COLUMN));
        assert!(!scored.get_column_names().contains(&LABEL_COLUMN));
    }

    #[test]
    fn loads_training_table_from_parquet() {
        let mut raw = parse_csv(raw_training_csv().as_bytes()).unwrap();
        let path = temp_path("patients.parquet");
        let mut file = File::create(&path).unwrap();
        ParquetWriter::new(&mut file).finish(&mut raw).unwrap();
        drop(file);

        let loaded = load_train(&path);
        std::fs::remove_file(&path).unwrap();

        let (features, labels) = loaded.unwrap();
        let (expected, expected_labels) = prepare_train(raw).unwrap();
        assert_eq!(labels, expected_labels);
        assert_eq!(features.get_column_names(), expected.get_column_names());
        assert!(features.frame_equal_missing(&expected));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        assert!(matches!(
            load_train(temp_path("absent.csv")),
            Err(RiskError::Io(_))
        ));
    }

    #[test]
    fn read_table_rejects_unknown_extension() {
        assert!(matches!(
            read_table("patients.xlsx"),
            Err(RiskError::InputFormat { .. })
        ));
    }

    #[test]
    fn split_is_seeded_and_partitions_rows() {
        let features = df!("age" => (0..10).map(|i| i as f64).collect::<Vec<_>>()).unwrap();
        let labels: Vec<i32> = (0..10).map(|i| i % 2).collect();

        let (x_train, x_test, y_train, y_test) =
            train_test_split(&features, &labels, 0.3, 42).unwrap();
        assert_eq!(x_train.height(), 7);
        assert_eq!(x_test.height(), 3);
        assert_eq!(y_train.len(), 7);
        assert_eq!(y_test.len(), 3);

        let (_, again, _, _) = train_test_split(&features, &labels, 0.3, 42).unwrap();
        assert!(x_test.frame_equal(&again));

        let mut ages: Vec<f64> = x_train
            .column("age")
            .unwrap()
            .f64()
            .unwrap()
            .into_no_null_iter()
            .chain(x_test.column("age").unwrap().f64().unwrap().into_no_null_iter())
            .collect();
        ages.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(ages, (0..10).map(|i| i as f64).collect::<Vec<_>>());
    }
}
