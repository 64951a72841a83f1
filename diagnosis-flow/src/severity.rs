use serde::{Deserialize, Serialize};

use crate::analysis::Severity;

/// Rules deriving a severity from a general-model classification.
///
/// Applied in order: the normal condition is mild, a fatal condition is
/// severe, anything else is moderate. Finally a confidence below
/// `confidence_floor` forces mild, whatever the condition was.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeverityPolicy {
    pub normal_condition: String,
    pub fatal_conditions: Vec<String>,
    pub confidence_floor: f64,
}

impl Default for SeverityPolicy {
    fn default() -> Self {
        Self {
            normal_condition: "Normal Fundus".to_string(),
            fatal_conditions: vec![
                "Glaucoma".to_string(),
                "ARMD".to_string(),
                "Diabetic Retinopathy".to_string(),
            ],
            confidence_floor: 70.0,
        }
    }
}

impl SeverityPolicy {
    pub fn derive(&self, condition: &str, confidence_score: f64) -> Severity {
        let condition = condition.trim();
        let mut severity = Severity::Moderate;
        if condition.eq_ignore_ascii_case(&self.normal_condition) {
            severity = Severity::Mild;
        }
        if self
            .fatal_conditions
            .iter()
            .any(|fatal| fatal.eq_ignore_ascii_case(condition))
        {
            severity = Severity::Severe;
        }
        if confidence_score < self.confidence_floor {
            severity = Severity::Mild;
        }
        severity
    }
}
