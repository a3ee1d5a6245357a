//! Random-forest risk classifier built from smartcore decision trees.
//!
//! Each tree is grown on a bootstrap sample of the rows, drawn with
//! per-class weights when balancing is on, and sees a random subset of
//! `round(sqrt(n_features))` columns. Probabilities are the share of trees
//! voting for the positive class.

use crate::error::{Result, RiskError};
use crate::preprocess::FeatureMatrix;
use log::{debug, info};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use smartcore::error::Failed;
use smartcore::linalg::basic::arrays::Array;
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::metrics::roc_auc_score;
use smartcore::tree::decision_tree_classifier::{
    DecisionTreeClassifier, DecisionTreeClassifierParameters,
};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

const COMPONENT: &str = "classifier";

type TreeModel = DecisionTreeClassifier<f64, i32, DenseMatrix<f64>, Vec<i32>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassWeight {
    /// Every row is equally likely to be drawn.
    Uniform,
    /// Rows are drawn with weight `n / (k * n_class)`, evening out rare classes.
    Balanced,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForestParameters {
    pub n_trees: u16,
    pub max_depth: u16,
    pub min_samples_split: usize,
    pub class_weight: ClassWeight,
    pub seed: u64,
}

impl Default for ForestParameters {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: 10,
            min_samples_split: 10,
            class_weight: ClassWeight::Balanced,
            seed: 42,
        }
    }
}

#[derive(Serialize, Deserialize)]
enum Member {
    /// The bootstrap sample held a single class.
    Constant(i32),
    /// A tree over the listed columns of the input, in ascending order.
    Tree { columns: Vec<usize>, tree: TreeModel },
}

impl Member {
    fn predict(&self, x: &FeatureMatrix) -> Result<Vec<i32>> {
        match self {
            Member::Constant(label) => Ok(vec![*label; x.shape().0]),
            Member::Tree { columns, tree } => {
                let rows: Vec<usize> = (0..x.shape().0).collect();
                Ok(tree.predict(&select(x, &rows, columns))?)
            }
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Forest {
    n_features: usize,
    members: Vec<Member>,
}

#[derive(Deserialize)]
struct SavedModel {
    params: ForestParameters,
    forest: Forest,
}

/// Binary confusion counts, positive class = 1.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confusion {
    pub true_positive: usize,
    pub false_positive: usize,
    pub true_negative: usize,
    pub false_negative: usize,
}

impl Confusion {
    pub fn new(y_true: &[i32], y_pred: &[i32]) -> Self {
        let mut counts = Confusion::default();
        for (&truth, &predicted) in y_true.iter().zip(y_pred) {
            match (truth == 1, predicted == 1) {
                (true, true) => counts.true_positive += 1,
                (false, true) => counts.false_positive += 1,
                (false, false) => counts.true_negative += 1,
                (true, false) => counts.false_negative += 1,
            }
        }
        counts
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Recall, precision, F1 and ROC-AUC for the positive class.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub recall: f64,
    pub precision: f64,
    pub f1: f64,
    pub roc_auc: f64,
    pub confusion: Confusion,
}

impl Metrics {
    /// Score hard predictions and positive-class probabilities against the truth.
    /// Undefined ratios (no positives predicted, say) come out as 0, and so
    /// does ROC-AUC when the truth holds a single class.
    pub fn from_predictions(y_true: &[i32], y_pred: &[i32], p_positive: &[f64]) -> Self {
        let confusion = Confusion::new(y_true, y_pred);
        let tp = confusion.true_positive;
        let recall = ratio(tp, tp + confusion.false_negative);
        let precision = ratio(tp, tp + confusion.false_positive);
        let f1 = if recall + precision > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        let both_classes = y_true.contains(&0) && y_true.contains(&1);
        let roc_auc = if both_classes {
            let truth: Vec<f64> = y_true.iter().map(|&v| v as f64).collect();
            roc_auc_score(&truth, &p_positive.to_vec())
        } else {
            0.0
        };

        Metrics {
            recall,
            precision,
            f1,
            roc_auc,
            confusion,
        }
    }
}

impl fmt::Display for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "recall={:.4} precision={:.4} f1={:.4} roc_auc={:.4}",
            self.recall, self.precision, self.f1, self.roc_auc
        )
    }
}

/// Binary heart-attack risk classifier.
///
/// Unfitted until [`RiskClassifier::fit`] (or [`RiskClassifier::load`]);
/// a fitted instance is never refitted.
pub struct RiskClassifier {
    params: ForestParameters,
    forest: Option<Forest>,
}

impl fmt::Debug for RiskClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RiskClassifier")
            .field("params", &self.params)
            .field("fitted", &self.is_fitted())
            .finish()
    }
}

impl Default for RiskClassifier {
    fn default() -> Self {
        RiskClassifier::new(ForestParameters::default())
    }
}

impl RiskClassifier {
    pub fn new(params: ForestParameters) -> Self {
        Self {
            params,
            forest: None,
        }
    }

    pub fn params(&self) -> &ForestParameters {
        &self.params
    }

    pub fn is_fitted(&self) -> bool {
        self.forest.is_some()
    }

    /// Width of the matrices the fitted forest accepts.
    pub fn n_features(&self) -> Result<usize> {
        Ok(self.forest()?.n_features)
    }

    pub fn fit(&mut self, x: &FeatureMatrix, y: &[i32]) -> Result<()> {
        if self.is_fitted() {
            return Err(RiskError::AlreadyFitted {
                component: COMPONENT,
            });
        }
        let (rows, n_features) = x.shape();
        if rows != y.len() {
            return Err(RiskError::LengthMismatch {
                rows,
                labels: y.len(),
            });
        }
        if rows == 0 || n_features == 0 {
            return Err(RiskError::EmptyTable);
        }
        info!(
            "fitting {} trees on {}x{} (max_depth={}, min_samples_split={}, {:?})",
            self.params.n_trees,
            rows,
            n_features,
            self.params.max_depth,
            self.params.min_samples_split,
            self.params.class_weight
        );

        let subspace = subspace_size(n_features);
        debug!("{} of {} columns per tree", subspace, n_features);

        let weights = sample_weights(y, self.params.class_weight);
        let draw = WeightedIndex::new(&weights).map_err(|e| Failed::fit(&e.to_string()))?;
        let mut rng = StdRng::seed_from_u64(self.params.seed);

        let mut members = Vec::with_capacity(self.params.n_trees as usize);
        for _ in 0..self.params.n_trees {
            let bootstrap: Vec<usize> = (0..rows).map(|_| draw.sample(&mut rng)).collect();
            let mut columns = sample(&mut rng, n_features, subspace).into_vec();
            columns.sort_unstable();
            let tree_seed: u64 = rng.gen();

            let labels: Vec<i32> = bootstrap.iter().map(|&i| y[i]).collect();
            if labels.iter().all(|&l| l == labels[0]) {
                members.push(Member::Constant(labels[0]));
                continue;
            }

            let parameters = DecisionTreeClassifierParameters {
                max_depth: Some(self.params.max_depth),
                min_samples_split: self.params.min_samples_split,
                seed: Some(tree_seed),
                ..Default::default()
            };
            let tree =
                DecisionTreeClassifier::fit(&select(x, &bootstrap, &columns), &labels, parameters)?;
            members.push(Member::Tree { columns, tree });
        }

        let constant = members
            .iter()
            .filter(|m| matches!(m, Member::Constant(_)))
            .count();
        debug!("{} of {} trees are single-class", constant, members.len());

        self.forest = Some(Forest {
            n_features,
            members,
        });
        info!("classifier fitted");
        Ok(())
    }

    /// Per-row `[P(low), P(high)]`.
    pub fn predict_proba(&self, x: &FeatureMatrix) -> Result<Vec<[f64; 2]>> {
        let forest = self.forest()?;
        let (rows, n_features) = x.shape();
        if n_features != forest.n_features {
            return Err(RiskError::Shape {
                expected: forest.n_features,
                actual: n_features,
            });
        }

        let mut votes = vec![0usize; rows];
        for member in &forest.members {
            for (count, label) in votes.iter_mut().zip(member.predict(x)?) {
                if label == 1 {
                    *count += 1;
                }
            }
        }

        let total = forest.members.len().max(1) as f64;
        Ok(votes
            .into_iter()
            .map(|count| {
                let high = count as f64 / total;
                [1.0 - high, high]
            })
            .collect())
    }

    /// One 0/1 label per row; ties go to the low-risk class.
    pub fn predict(&self, x: &FeatureMatrix) -> Result<Vec<i32>> {
        Ok(self
            .predict_proba(x)?
            .into_iter()
            .map(|[_, high]| i32::from(high > 0.5))
            .collect())
    }

    pub fn evaluate(&self, x: &FeatureMatrix, y: &[i32]) -> Result<Metrics> {
        let probabilities = self.predict_proba(x)?;
        if probabilities.len() != y.len() {
            return Err(RiskError::LengthMismatch {
                rows: probabilities.len(),
                labels: y.len(),
            });
        }
        let positive: Vec<f64> = probabilities.iter().map(|p| p[1]).collect();
        let predicted: Vec<i32> = positive.iter().map(|&p| i32::from(p > 0.5)).collect();
        Ok(Metrics::from_predictions(y, &predicted, &positive))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let forest = self.forest()?;
        let path = path.as_ref();
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(
            writer,
            &SavedModelRef {
                params: &self.params,
                forest,
            },
        )?;
        info!("classifier saved to {}", path.display());
        Ok(())
    }

    /// Read a classifier written by [`RiskClassifier::save`]; it comes back fitted.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let saved: SavedModel = serde_json::from_reader(BufReader::new(File::open(path)?))?;
        info!(
            "classifier loaded from {} ({} trees)",
            path.display(),
            saved.forest.members.len()
        );
        Ok(Self {
            params: saved.params,
            forest: Some(saved.forest),
        })
    }

    fn forest(&self) -> Result<&Forest> {
        self.forest.as_ref().ok_or(RiskError::NotFitted {
            component: COMPONENT,
        })
    }
}

#[derive(Serialize)]
struct SavedModelRef<'a> {
    params: &'a ForestParameters,
    forest: &'a Forest,
}

fn sample_weights(y: &[i32], class_weight: ClassWeight) -> Vec<f64> {
    match class_weight {
        ClassWeight::Uniform => vec![1.0; y.len()],
        ClassWeight::Balanced => {
            let positives = y.iter().filter(|&&l| l == 1).count();
            let negatives = y.len() - positives;
            let classes = usize::from(positives > 0) + usize::from(negatives > 0);
            let weight = |count: usize| y.len() as f64 / (classes as f64 * count as f64);
            y.iter()
                .map(|&l| if l == 1 { weight(positives) } else { weight(negatives) })
                .collect()
        }
    }
}

/// Columns offered to each tree: the rounded square root, at least one.
fn subspace_size(n_features: usize) -> usize {
    ((n_features as f64).sqrt().round() as usize).clamp(1, n_features.max(1))
}

/// Copy the given rows (repeats allowed) and columns of `x` into a new matrix.
fn select(x: &FeatureMatrix, rows: &[usize], columns: &[usize]) -> FeatureMatrix {
    let mut values = Vec::with_capacity(rows.len() * columns.len());
    for &r in rows {
        values.extend(columns.iter().map(|&c| *x.get((r, c))));
    }
    DenseMatrix::new(rows.len(), columns.len(), values, false)
}
