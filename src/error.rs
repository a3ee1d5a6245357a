use polars::prelude::PolarsError;
use smartcore::error::Failed;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RiskError {
    #[error("{component} is not fitted, call fit() first")]
    NotFitted { component: &'static str },
    #[error("{component} is already fitted, build a new instance to refit")]
    AlreadyFitted { component: &'static str },
    #[error("missing column {column:?}")]
    MissingColumn { column: String },
    #[error("no column of the {group} group is present")]
    MissingGroup { group: &'static str },
    #[error("column {column:?} has no usable values")]
    EmptyColumn { column: String },
    #[error("invalid label {value:?} in row {row}, expected 0 or 1")]
    InvalidLabel { row: usize, value: Option<f64> },
    #[error("feature matrix has {rows} rows but {labels} labels were given")]
    LengthMismatch { rows: usize, labels: usize },
    #[error("expected {expected} feature columns, got {actual}")]
    Shape { expected: usize, actual: usize },
    #[error("empty table")]
    EmptyTable,
    #[error("invalid input format {path:?}")]
    InputFormat { path: PathBuf },
    #[error("file must be a CSV, got {file_name:?}")]
    NotCsv { file_name: String },
    #[error("invalid upload: {message}")]
    Upload { message: String },
    #[error(transparent)]
    Polars(#[from] PolarsError),
    #[error("model failure: {0}")]
    Model(#[from] Failed),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, RiskError>;
