use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Ground-truth column of the training file. Never renamed.
pub static LABEL_COLUMN: &str = "Heart Attack Risk (Binary)";
pub static ID_COLUMN: &str = "id";
/// Spreadsheet export index that sometimes leaks into training files.
pub static INDEX_COLUMN: &str = "Unnamed: 0";

pub static AGE: &str = "age";
pub static CHOLESTEROL: &str = "cholesterol";
pub static HEART_RATE: &str = "heart_rate";
pub static DIABETES: &str = "diabetes";
pub static FAMILY_HISTORY: &str = "family_history";
pub static SMOKING: &str = "smoking";
pub static OBESITY: &str = "obesity";
pub static ALCOHOL: &str = "alcohol_consumption";
pub static EXERCISE_HOURS: &str = "exercise_hours_per_week";
pub static DIET: &str = "diet";
pub static PREVIOUS_HEART_PROBLEMS: &str = "previous_heart_problems";
pub static MEDICATION_USE: &str = "medication_use";
pub static STRESS_LEVEL: &str = "stress_level";
pub static SEDENTARY_HOURS: &str = "sedentary_hours_per_day";
pub static INCOME: &str = "income";
pub static BMI: &str = "bmi";
pub static TRIGLYCERIDES: &str = "triglycerides";
pub static ACTIVE_DAYS: &str = "physical_activity_days_per_week";
pub static SLEEP_HOURS: &str = "sleep_hours_per_day";
pub static BLOOD_SUGAR: &str = "blood_sugar";
pub static CK_MB: &str = "ck_mb";
pub static TROPONIN: &str = "troponin";
pub static SEX: &str = "sex";
pub static SYSTOLIC: &str = "systolic_blood_pressure";
pub static DIASTOLIC: &str = "diastolic_blood_pressure";

/// External header -> canonical name, in the order the source files list them.
///
/// Both sleep headers land on the same canonical column; older exports used
/// the (mislabelled) weekly header for the daily value.
pub static RENAMES: [(&str, &str); 26] = [
    ("Age", AGE),
    ("Cholesterol", CHOLESTEROL),
    ("Heart rate", HEART_RATE),
    ("Diabetes", DIABETES),
    ("Family History", FAMILY_HISTORY),
    ("Smoking", SMOKING),
    ("Obesity", OBESITY),
    ("Alcohol Consumption", ALCOHOL),
    ("Exercise Hours Per Week", EXERCISE_HOURS),
    ("Diet", DIET),
    ("Previous Heart Problems", PREVIOUS_HEART_PROBLEMS),
    ("Medication Use", MEDICATION_USE),
    ("Stress Level", STRESS_LEVEL),
    ("Sedentary Hours Per Day", SEDENTARY_HOURS),
    ("Income", INCOME),
    ("BMI", BMI),
    ("Triglycerides", TRIGLYCERIDES),
    ("Physical Activity Days Per Week", ACTIVE_DAYS),
    ("Sleep Hours Per Week", SLEEP_HOURS),
    ("Sleep Hours Per Day", SLEEP_HOURS),
    ("Blood sugar", BLOOD_SUGAR),
    ("CK-MB", CK_MB),
    ("Troponin", TROPONIN),
    ("Gender", SEX),
    ("Systolic blood pressure", SYSTOLIC),
    ("Diastolic blood pressure", DIASTOLIC),
];

lazy_static! {
    static ref RENAME_MAP: HashMap<&'static str, &'static str> = RENAMES.iter().copied().collect();
}

pub struct HeartRecord {}

impl HeartRecord {
    /// Canonical name for an external header, if it is one we know.
    pub fn canonical_name(external: &str) -> Option<&'static str> {
        RENAME_MAP.get(external).copied()
    }

    /// Encoded sex value: male -> 1, female -> 0, anything else (missing included) -> -1.
    pub fn encode_sex(value: Option<&str>) -> i32 {
        match value {
            Some("Male") | Some("male") => 1,
            Some("Female") | Some("female") => 0,
            _ => -1,
        }
    }
}

/// Named partition of the feature columns the preprocessor consumes.
///
/// Columns not listed in any group are ignored by the preprocessor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnGroups {
    /// Median-imputed and standard-scaled.
    pub continuous: Vec<String>,
    /// Most-frequent-imputed, passed through unscaled.
    pub binary: Vec<String>,
    /// Most-frequent-imputed, then one-hot encoded.
    pub categorical: Vec<String>,
}

impl ColumnGroups {
    pub fn new<S: Into<String>>(
        continuous: impl IntoIterator<Item = S>,
        binary: impl IntoIterator<Item = S>,
        categorical: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            continuous: continuous.into_iter().map(Into::into).collect(),
            binary: binary.into_iter().map(Into::into).collect(),
            categorical: categorical.into_iter().map(Into::into).collect(),
        }
    }

    /// Every column the groups expect, continuous first.
    pub fn expected(&self) -> impl Iterator<Item = &str> {
        self.continuous
            .iter()
            .chain(self.binary.iter())
            .chain(self.categorical.iter())
            .map(String::as_str)
    }
}

impl Default for ColumnGroups {
    fn default() -> Self {
        ColumnGroups::new(
            [
                AGE,
                CHOLESTEROL,
                EXERCISE_HOURS,
                INCOME,
                BMI,
                TRIGLYCERIDES,
                SLEEP_HOURS,
                BLOOD_SUGAR,
                CK_MB,
                TROPONIN,
                SYSTOLIC,
                DIASTOLIC,
            ],
            [
                DIABETES,
                FAMILY_HISTORY,
                SMOKING,
                OBESITY,
                ALCOHOL,
                PREVIOUS_HEART_PROBLEMS,
                MEDICATION_USE,
                SEX,
            ],
            [DIET],
        )
    }
}
