//! Patient intake: the raw form a user fills in and the validated record the
//! rest of the workflow works from.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{DiagnosisError, Result};

pub const MIN_AGE: u8 = 1;
pub const MAX_AGE: u8 = 120;
pub const PHONE_DIGITS: usize = 10;

/// Catalog entry that unlocks the free-text symptom field.
pub const OTHER_SYMPTOMS: &str = "Other symptoms";

/// Symptoms offered as checkboxes on the intake form.
pub const SYMPTOM_CATALOG: [&str; 12] = [
    "Blurry or distorted vision",
    "Eye pain",
    "Irritation",
    "Redness",
    "Seeing floaters or flashes of light",
    "Difficulty with night vision",
    "Sensitivity to light",
    "Double vision",
    "Sudden or gradual loss of vision",
    "Excessive tearing or discharge from eye",
    "Headache",
    OTHER_SYMPTOMS,
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    Other,
    #[default]
    Unspecified,
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Male => write!(f, "Male"),
            Self::Female => write!(f, "Female"),
            Self::Other => write!(f, "Other"),
            Self::Unspecified => write!(f, "Not specified"),
        }
    }
}

/// Intake form exactly as submitted by the user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntakeForm {
    #[serde(default)]
    pub full_name: String,
    pub age: Option<i64>,
    #[serde(default)]
    pub gender: Gender,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub medical_history: String,
    #[serde(default)]
    pub symptoms: Vec<String>,
    #[serde(default)]
    pub other_symptoms: Option<String>,
}

/// A validated intake. Only produced by [`IntakeForm::validate`] and never
/// modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntakeRecord {
    full_name: String,
    age: u8,
    gender: Gender,
    phone: String,
    medical_history: String,
    symptoms: Vec<String>,
    other_symptoms: Option<String>,
}

impl IntakeForm {
    pub fn validate(self) -> Result<IntakeRecord> {
        let full_name = self.full_name.trim().to_string();
        if full_name.is_empty() {
            return Err(DiagnosisError::Validation("full name is required".to_string()));
        }

        let age = match self.age {
            Some(age) if (i64::from(MIN_AGE)..=i64::from(MAX_AGE)).contains(&age) => age as u8,
            Some(age) => {
                return Err(DiagnosisError::Validation(format!(
                    "age must be between {MIN_AGE} and {MAX_AGE}, got {age}"
                )));
            }
            None => return Err(DiagnosisError::Validation("age is required".to_string())),
        };

        let phone = normalize_phone(&self.phone)?;

        let mut symptoms: Vec<String> = Vec::with_capacity(self.symptoms.len());
        for symptom in self.symptoms {
            let symptom = symptom.trim();
            let Some(known) = SYMPTOM_CATALOG
                .iter()
                .find(|entry| entry.eq_ignore_ascii_case(symptom))
            else {
                return Err(DiagnosisError::Validation(format!(
                    "unknown symptom: {symptom}"
                )));
            };
            if !symptoms.iter().any(|s| s == known) {
                symptoms.push(known.to_string());
            }
        }

        // Free text only counts when the "Other symptoms" box is ticked.
        let other_symptoms = self
            .other_symptoms
            .filter(|_| symptoms.iter().any(|s| s == OTHER_SYMPTOMS))
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty());

        Ok(IntakeRecord {
            full_name,
            age,
            gender: self.gender,
            phone,
            medical_history: self.medical_history.trim().to_string(),
            symptoms,
            other_symptoms,
        })
    }
}

/// Strips the usual separators from a phone number and checks it is either
/// empty or exactly ten digits.
pub fn normalize_phone(raw: &str) -> Result<String> {
    let mut digits = String::with_capacity(PHONE_DIGITS);
    for c in raw.chars() {
        match c {
            '0'..='9' => digits.push(c),
            ' ' | '-' | '(' | ')' | '.' => {}
            _ => {
                return Err(DiagnosisError::Validation(format!(
                    "phone number contains an invalid character: {c:?}"
                )));
            }
        }
    }

    if digits.is_empty() || digits.len() == PHONE_DIGITS {
        Ok(digits)
    } else {
        Err(DiagnosisError::Validation(format!(
            "phone number must have {PHONE_DIGITS} digits, got {}",
            digits.len()
        )))
    }
}

impl IntakeRecord {
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn age(&self) -> u8 {
        self.age
    }

    pub fn gender(&self) -> Gender {
        self.gender
    }

    /// Empty when the patient gave no number.
    pub fn phone(&self) -> &str {
        &self.phone
    }

    pub fn medical_history(&self) -> &str {
        &self.medical_history
    }

    pub fn symptoms(&self) -> &[String] {
        &self.symptoms
    }

    pub fn other_symptoms(&self) -> Option<&str> {
        self.other_symptoms.as_deref()
    }

    /// Symptoms as a single comma separated line. The "Other symptoms" entry
    /// is replaced by its free text.
    pub fn symptom_summary(&self) -> String {
        let mut parts: Vec<&str> = self
            .symptoms
            .iter()
            .map(String::as_str)
            .filter(|s| *s != OTHER_SYMPTOMS)
            .collect();
        if let Some(other) = self.other_symptoms.as_deref() {
            parts.push(other);
        }
        parts.join(", ")
    }
}
