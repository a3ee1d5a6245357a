//! Column-wise preprocessing learned once from training data.
//!
//! Output layout is fixed: continuous block, binary block, then one
//! indicator block per categorical column.

use crate::error::{Result, RiskError};
use crate::records::ColumnGroups;
use log::{debug, info};
use polars::prelude::*;
use smartcore::linalg::basic::matrix::DenseMatrix;
use std::cmp::Ordering;
use std::collections::BTreeMap;

pub type FeatureMatrix = DenseMatrix<f64>;

const COMPONENT: &str = "preprocessor";

/// Median imputation followed by standard scaling.
#[derive(Debug, Clone, PartialEq)]
struct ScaledColumn {
    name: String,
    median: f64,
    mean: f64,
    scale: f64,
}

impl ScaledColumn {
    fn apply(&self, value: Option<f64>) -> f64 {
        (value.unwrap_or(self.median) - self.mean) / self.scale
    }
}

/// Most-frequent imputation, values passed through.
#[derive(Debug, Clone, PartialEq)]
struct ImputedColumn {
    name: String,
    fill: f64,
}

/// Most-frequent imputation followed by one-hot encoding over the
/// categories seen at fit time. Unseen values encode to all zeros.
#[derive(Debug, Clone, PartialEq)]
struct OneHotColumn {
    name: String,
    fill: String,
    categories: Vec<String>,
}

impl OneHotColumn {
    fn indicator(&self, value: Option<&str>) -> impl Iterator<Item = f64> + '_ {
        let value = value.unwrap_or(&self.fill).to_string();
        self.categories
            .iter()
            .map(move |category| if *category == value { 1.0 } else { 0.0 })
    }
}

#[derive(Debug, Clone, PartialEq)]
struct FittedState {
    continuous: Vec<ScaledColumn>,
    binary: Vec<ImputedColumn>,
    categorical: Vec<OneHotColumn>,
}

impl FittedState {
    fn width(&self) -> usize {
        self.continuous.len()
            + self.binary.len()
            + self
                .categorical
                .iter()
                .map(|c| c.categories.len())
                .sum::<usize>()
    }
}

/// Impute/scale/encode pipeline over a [`ColumnGroups`] layout.
///
/// Starts unfitted; [`Preprocessor::fit`] moves it to fitted exactly once.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    groups: ColumnGroups,
    fitted: Option<FittedState>,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Preprocessor::new(ColumnGroups::default())
    }
}

impl Preprocessor {
    pub fn new(groups: ColumnGroups) -> Self {
        Self {
            groups,
            fitted: None,
        }
    }

    pub fn groups(&self) -> &ColumnGroups {
        &self.groups
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    /// Learn imputation, scaling and category statistics from `features`.
    ///
    /// Every grouped column must be present with at least one value.
    pub fn fit(&mut self, features: &DataFrame) -> Result<()> {
        if self.is_fitted() {
            return Err(RiskError::AlreadyFitted {
                component: COMPONENT,
            });
        }
        info!("fitting preprocessor on {} rows", features.height());
        if features.height() == 0 {
            return Err(RiskError::EmptyTable);
        }

        let continuous = self
            .groups
            .continuous
            .iter()
            .map(|name| fit_scaled(features, name))
            .collect::<Result<Vec<_>>>()?;

        let binary = self
            .groups
            .binary
            .iter()
            .map(|name| {
                let values = required(numeric_values(features, name)?, name)?;
                let fill = most_frequent_number(values.into_iter().flatten())
                    .ok_or_else(|| empty(name))?;
                Ok(ImputedColumn {
                    name: name.clone(),
                    fill,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let categorical = self
            .groups
            .categorical
            .iter()
            .map(|name| {
                let values = required(category_values(features, name)?, name)?;
                let counts = count_categories(values.into_iter().flatten());
                let categories = ordered_categories(&counts);
                let fill = most_frequent_category(&categories, &counts).ok_or_else(|| empty(name))?;
                debug!("{}: {} categories", name, categories.len());
                Ok(OneHotColumn {
                    name: name.clone(),
                    fill,
                    categories,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let state = FittedState {
            continuous,
            binary,
            categorical,
        };
        info!("preprocessor fitted, {} output features", state.width());
        self.fitted = Some(state);
        Ok(())
    }

    /// Apply the fitted pipeline and return a dense row-major matrix.
    ///
    /// Missing values are imputed. A single absent column is imputed whole,
    /// but a group with none of its columns present is an error.
    pub fn transform(&self, features: &DataFrame) -> Result<FeatureMatrix> {
        let state = self.state()?;
        let rows = features.height();
        if rows == 0 {
            return Err(RiskError::EmptyTable);
        }

        let mut columns: Vec<Vec<f64>> = Vec::with_capacity(state.width());

        ensure_group(features, "continuous", state.continuous.iter().map(|c| &c.name))?;
        for column in &state.continuous {
            let values = numeric_values(features, &column.name)?.unwrap_or_else(|| vec![None; rows]);
            columns.push(values.into_iter().map(|v| column.apply(v)).collect());
        }

        ensure_group(features, "binary", state.binary.iter().map(|c| &c.name))?;
        for column in &state.binary {
            let values = numeric_values(features, &column.name)?.unwrap_or_else(|| vec![None; rows]);
            columns.push(values.into_iter().map(|v| v.unwrap_or(column.fill)).collect());
        }

        ensure_group(features, "categorical", state.categorical.iter().map(|c| &c.name))?;
        for column in &state.categorical {
            let values =
                category_values(features, &column.name)?.unwrap_or_else(|| vec![None; rows]);
            let mut block = vec![Vec::with_capacity(rows); column.categories.len()];
            for value in &values {
                for (slot, bit) in block.iter_mut().zip(column.indicator(value.as_deref())) {
                    slot.push(bit);
                }
            }
            columns.extend(block);
        }

        let width = columns.len();
        let mut values = Vec::with_capacity(rows * width);
        for row in 0..rows {
            values.extend(columns.iter().map(|column| column[row]));
        }
        debug!("transformed table to {}x{}", rows, width);

        Ok(DenseMatrix::new(rows, width, values, false))
    }

    pub fn fit_transform(&mut self, features: &DataFrame) -> Result<FeatureMatrix> {
        self.fit(features)?;
        self.transform(features)
    }

    /// Number of columns [`Preprocessor::transform`] produces.
    pub fn n_features_out(&self) -> Result<usize> {
        Ok(self.state()?.width())
    }

    /// Output column names in matrix order; indicators are `<column>=<category>`.
    pub fn feature_names(&self) -> Result<Vec<String>> {
        let state = self.state()?;
        let mut names: Vec<String> = state
            .continuous
            .iter()
            .map(|c| c.name.clone())
            .chain(state.binary.iter().map(|c| c.name.clone()))
            .collect();
        for column in &state.categorical {
            names.extend(
                column
                    .categories
                    .iter()
                    .map(|category| format!("{}={}", column.name, category)),
            );
        }
        Ok(names)
    }

    fn state(&self) -> Result<&FittedState> {
        self.fitted.as_ref().ok_or(RiskError::NotFitted {
            component: COMPONENT,
        })
    }
}

fn empty(name: &str) -> RiskError {
    RiskError::EmptyColumn {
        column: name.to_string(),
    }
}

fn required<T>(values: Option<T>, name: &str) -> Result<T> {
    values.ok_or_else(|| RiskError::MissingColumn {
        column: name.to_string(),
    })
}

fn ensure_group<'a>(
    features: &DataFrame,
    group: &'static str,
    names: impl IntoIterator<Item = &'a String>,
) -> Result<()> {
    let present = features.get_column_names();
    let mut names = names.into_iter().peekable();
    if names.peek().is_none() || names.any(|name| present.contains(&name.as_str())) {
        Ok(())
    } else {
        Err(RiskError::MissingGroup { group })
    }
}

fn fit_scaled(features: &DataFrame, name: &str) -> Result<ScaledColumn> {
    let values = required(numeric_values(features, name)?, name)?;
    let observed = Series::new(name, values.clone());
    let median = observed.median().ok_or_else(|| empty(name))?;

    let filled = Float64Chunked::from_vec(name, values.into_iter().map(|v| v.unwrap_or(median)).collect());
    let mean = filled.mean().ok_or_else(|| empty(name))?;
    let std = filled.std(0).unwrap_or(0.0);
    let scale = if std > 0.0 && std.is_finite() { std } else { 1.0 };

    Ok(ScaledColumn {
        name: name.to_string(),
        median,
        mean,
        scale,
    })
}

/// Column values as floats, NaN treated as missing. `None` when the column is absent.
fn numeric_values(features: &DataFrame, name: &str) -> Result<Option<Vec<Option<f64>>>> {
    let Ok(column) = features.column(name) else {
        return Ok(None);
    };
    let column = column.cast(&DataType::Float64)?;
    let values = column
        .f64()?
        .into_iter()
        .map(|v| v.filter(|x| !x.is_nan()))
        .collect();
    Ok(Some(values))
}

/// Column values as category keys. Numeric values are keyed by their
/// shortest rendering so `1` and `1.0` are the same category.
fn category_values(features: &DataFrame, name: &str) -> Result<Option<Vec<Option<String>>>> {
    let Ok(column) = features.column(name) else {
        return Ok(None);
    };
    let values = if column.dtype().is_numeric() {
        column
            .cast(&DataType::Float64)?
            .f64()?
            .into_iter()
            .map(|v| v.filter(|x| !x.is_nan()).map(category_key))
            .collect()
    } else {
        column
            .cast(&DataType::Utf8)?
            .utf8()?
            .into_iter()
            .map(|v| v.filter(|s| !s.is_empty()).map(str::to_string))
            .collect()
    };
    Ok(Some(values))
}

fn category_key(value: f64) -> String {
    format!("{}", value)
}

/// Mode of the values; ties go to the smallest.
fn most_frequent_number(values: impl Iterator<Item = f64>) -> Option<f64> {
    let mut sorted: Vec<f64> = values.collect();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let mut best: Option<(f64, usize)> = None;
    let mut i = 0;
    while i < sorted.len() {
        let value = sorted[i];
        let run = sorted[i..].iter().take_while(|&&v| v == value).count();
        if best.map_or(true, |(_, count)| run > count) {
            best = Some((value, run));
        }
        i += run;
    }
    best.map(|(value, _)| value)
}

fn count_categories(values: impl Iterator<Item = String>) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for value in values {
        *counts.entry(value).or_insert(0) += 1;
    }
    counts
}

/// Numeric keys compare by value, so `2` sorts before `10`. Any other key
/// falls back to string order, after the numeric ones.
fn compare_categories(a: &str, b: &str) -> Ordering {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.total_cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

fn ordered_categories(counts: &BTreeMap<String, usize>) -> Vec<String> {
    let mut categories: Vec<String> = counts.keys().cloned().collect();
    categories.sort_by(|a, b| compare_categories(a, b));
    categories
}

/// Most frequent key; ties go to the first in category order.
fn most_frequent_category(
    categories: &[String],
    counts: &BTreeMap<String, usize>,
) -> Option<String> {
    let mut best: Option<(&String, usize)> = None;
    for key in categories {
        let count = counts.get(key).copied().unwrap_or(0);
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((key, count));
        }
    }
    best.map(|(key, _)| key.clone())
}
