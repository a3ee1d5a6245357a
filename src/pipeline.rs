//! Fitted preprocessor + classifier, shared read-only by every request.

use crate::error::{Result, RiskError};
use crate::loader::{parse_csv, prepare_infer};
use crate::model::{ForestParameters, Metrics, RiskClassifier};
use crate::preprocess::Preprocessor;
use crate::records::ColumnGroups;
use log::info;
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    High,
}

impl From<i32> for RiskLevel {
    fn from(prediction: i32) -> Self {
        if prediction == 1 {
            RiskLevel::High
        } else {
            RiskLevel::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientPrediction {
    /// Row position in the scored table.
    pub patient_id: usize,
    pub prediction: i32,
    pub risk_level: RiskLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionReport {
    pub status: String,
    pub total_patients: usize,
    pub patients_with_risk: usize,
    pub predictions: Vec<PatientPrediction>,
}

impl PredictionReport {
    pub fn from_predictions(predictions: &[i32]) -> Self {
        let predictions: Vec<PatientPrediction> = predictions
            .iter()
            .enumerate()
            .map(|(patient_id, &prediction)| PatientPrediction {
                patient_id,
                prediction,
                risk_level: RiskLevel::from(prediction),
            })
            .collect();
        Self {
            status: "success".to_string(),
            total_patients: predictions.len(),
            patients_with_risk: predictions.iter().filter(|p| p.prediction == 1).count(),
            predictions,
        }
    }
}

/// A fitted preprocessor and classifier that are never mutated again.
#[derive(Debug)]
pub struct ScoringPipeline {
    preprocessor: Preprocessor,
    classifier: RiskClassifier,
}

impl ScoringPipeline {
    /// Wrap already fitted components.
    pub fn new(preprocessor: Preprocessor, classifier: RiskClassifier) -> Result<Self> {
        if !preprocessor.is_fitted() {
            return Err(RiskError::NotFitted {
                component: "preprocessor",
            });
        }
        if !classifier.is_fitted() {
            return Err(RiskError::NotFitted {
                component: "classifier",
            });
        }
        Ok(Self {
            preprocessor,
            classifier,
        })
    }

    /// Fit both components on a canonical training table.
    pub fn train(
        features: &DataFrame,
        labels: &[i32],
        groups: ColumnGroups,
        params: ForestParameters,
    ) -> Result<Self> {
        let mut preprocessor = Preprocessor::new(groups);
        let x = preprocessor.fit_transform(features)?;
        let mut classifier = RiskClassifier::new(params);
        classifier.fit(&x, labels)?;
        Self::new(preprocessor, classifier)
    }

    /// Fit the preprocessor on the training table and reuse a saved classifier.
    pub fn with_saved_classifier<P: AsRef<Path>>(
        features: &DataFrame,
        groups: ColumnGroups,
        model_path: P,
    ) -> Result<Self> {
        let mut preprocessor = Preprocessor::new(groups);
        preprocessor.fit(features)?;
        let classifier = RiskClassifier::load(model_path)?;

        let expected = classifier.n_features()?;
        let actual = preprocessor.n_features_out()?;
        if expected != actual {
            return Err(RiskError::Shape { expected, actual });
        }
        Self::new(preprocessor, classifier)
    }

    pub fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }

    pub fn classifier(&self) -> &RiskClassifier {
        &self.classifier
    }

    /// Predictions for a canonical feature table.
    pub fn predict(&self, features: &DataFrame) -> Result<Vec<i32>> {
        let x = self.preprocessor.transform(features)?;
        self.classifier.predict(&x)
    }

    pub fn evaluate(&self, features: &DataFrame, labels: &[i32]) -> Result<Metrics> {
        let x = self.preprocessor.transform(features)?;
        self.classifier.evaluate(&x, labels)
    }

    /// Score a raw table with external headers.
    pub fn score(&self, raw: DataFrame) -> Result<PredictionReport> {
        let features = prepare_infer(raw)?;
        let predictions = self.predict(&features)?;
        let report = PredictionReport::from_predictions(&predictions);
        info!(
            "scored {} patients, {} at risk",
            report.total_patients, report.patients_with_risk
        );
        Ok(report)
    }

    /// Score an uploaded CSV document.
    pub fn score_csv(&self, bytes: &[u8]) -> Result<PredictionReport> {
        self.score(parse_csv(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{parse_csv, prepare_train};
    use crate::records::RENAMES;

    /// CSV with every external header plus id and label. High troponin rows
    /// are the risky ones.
    fn patients_csv(rows: usize, with_label: bool) -> String {
        let mut header = vec!["id".to_string()];
        header.extend(RENAMES.iter().map(|(external, _)| external.to_string()));
        if with_label {
            header.push("Heart Attack Risk (Binary)".to_string());
        }
        let mut out = header.join(",");
        out.push('\n');

        for i in 0..rows {
            let risky = i % 3 == 0;
            let mut fields = vec![i.to_string()];
            for (external, _) in RENAMES.iter() {
                let value = match *external {
                    "Gender" => if i % 2 == 0 { "Male" } else { "female" }.to_string(),
                    "Diet" => (i % 3).to_string(),
                    "Troponin" => if risky { "0.9" } else { "0.1" }.to_string(),
                    "Diabetes" | "Smoking" | "Obesity" => (i % 2).to_string(),
                    _ => format!("{:.3}", (i % 10) as f64 / 10.0),
                };
                fields.push(value);
            }
            if with_label {
                fields.push(if risky { "1.0" } else { "0.0" }.to_string());
            }
            out.push_str(&fields.join(","));
            out.push('\n');
        }
        out
    }

    fn params() -> ForestParameters {
        ForestParameters {
            min_samples_split: 2,
            ..ForestParameters::default()
        }
    }

    fn trained() -> ScoringPipeline {
        let raw = parse_csv(patients_csv(60, true).as_bytes()).unwrap();
        let (features, labels) = prepare_train(raw).unwrap();
        ScoringPipeline::train(&features, &labels, ColumnGroups::default(), params()).unwrap()
    }

    #[test]
    fn unfitted_parts_are_rejected() {
        let result = ScoringPipeline::new(Preprocessor::default(), RiskClassifier::default());
        assert!(matches!(
            result,
            Err(RiskError::NotFitted { component: "preprocessor" })
        ));
    }

    #[test]
    fn training_layout_width() {
        let pipeline = trained();
        // 12 continuous + 8 binary + 3 diet categories
        assert_eq!(pipeline.preprocessor().n_features_out().unwrap(), 23);
        assert!(pipeline.classifier().is_fitted());
    }

    #[test]
    fn scores_uploaded_rows() {
        let pipeline = trained();
        let report = pipeline.score_csv(patients_csv(9, false).as_bytes()).unwrap();

        assert_eq!(report.status, "success");
        assert_eq!(report.total_patients, 9);
        assert_eq!(report.predictions.len(), 9);
        for (i, p) in report.predictions.iter().enumerate() {
            assert_eq!(p.patient_id, i);
            assert_eq!(p.prediction, i32::from(i % 3 == 0));
            assert_eq!(p.risk_level, RiskLevel::from(p.prediction));
        }
        assert_eq!(report.patients_with_risk, 3);
    }

    #[test]
    fn tolerates_a_missing_value_and_a_stray_label() {
        let pipeline = trained();
        let mut csv = patients_csv(3, true);
        // blank out Cholesterol (second external column) in the last row
        let last = csv.trim_end().rsplit('\n').next().unwrap().to_string();
        let mut fields: Vec<&str> = last.split(',').collect();
        fields[2] = "";
        csv = csv.replace(&last, &fields.join(","));

        let report = pipeline.score_csv(csv.as_bytes()).unwrap();
        assert_eq!(report.total_patients, 3);
    }

    #[test]
    fn report_serializes_like_the_api() {
        let report = PredictionReport::from_predictions(&[1, 0]);
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["status"], "success");
        assert_eq!(value["total_patients"], 2);
        assert_eq!(value["patients_with_risk"], 1);
        assert_eq!(value["predictions"][0]["risk_level"], "high");
        assert_eq!(value["predictions"][1]["risk_level"], "low");
        assert_eq!(value["predictions"][1]["patient_id"], 1);
    }

    #[test]
    fn saved_classifier_is_reused() {
        let pipeline = trained();
        let path = std::env::temp_dir().join(format!("cardio-risk-pipeline-{}.json", std::process::id()));
        pipeline.classifier().save(&path).unwrap();

        let raw = parse_csv(patients_csv(60, true).as_bytes()).unwrap();
        let (features, labels) = prepare_train(raw).unwrap();
        let reloaded =
            ScoringPipeline::with_saved_classifier(&features, ColumnGroups::default(), &path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(
            reloaded.predict(&features).unwrap(),
            pipeline.predict(&features).unwrap()
        );
        let metrics = reloaded.evaluate(&features, &labels).unwrap();
        assert!(metrics.recall > 0.9);
    }

    #[test]
    fn saved_classifier_of_another_width_is_rejected() {
        let pipeline = trained();
        let path = std::env::temp_dir().join(format!("cardio-risk-width-{}.json", std::process::id()));
        pipeline.classifier().save(&path).unwrap();

        let raw = parse_csv(patients_csv(60, true).as_bytes()).unwrap();
        let (features, _) = prepare_train(raw).unwrap();
        let defaults = ColumnGroups::default();
        let narrower = ColumnGroups {
            continuous: defaults.continuous[1..].to_vec(),
            ..defaults
        };
        let result = ScoringPipeline::with_saved_classifier(&features, narrower, &path);
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(
            result,
            Err(RiskError::Shape {
                expected: 23,
                actual: 22
            })
        ));
    }
}
