//! Strategy-independent analysis types.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{DiagnosisError, Result};
use crate::gateway::UploadedAsset;
use crate::intake::IntakeRecord;

/// What kind of file is being analysed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    /// Fundus photograph.
    #[default]
    Fundus,
    /// Electroretinography report.
    Erg,
}

impl Modality {
    pub fn is_image(self) -> bool {
        matches!(self, Modality::Fundus)
    }

    pub fn describe(self) -> &'static str {
        match self {
            Modality::Fundus => "fundus image",
            Modality::Erg => "ERG report",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Modality::Fundus => write!(f, "fundus"),
            Modality::Erg => write!(f, "erg"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Mild,
    Moderate,
    Severe,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Mild => write!(f, "mild"),
            Severity::Moderate => write!(f, "moderate"),
            Severity::Severe => write!(f, "severe"),
        }
    }
}

/// Method the user picked on the analysis screen. Only honoured for image
/// modality.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMethod {
    #[default]
    SpecializedModel,
    GeneralModel,
}

/// Inference path actually used for one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStrategy {
    /// Dedicated retinal classification model.
    Specialized,
    /// General-purpose LLM constrained to the disease catalog.
    General,
}

impl AnalysisStrategy {
    /// ERG reports always go through the general model.
    pub fn select(modality: Modality, preferred: AnalysisMethod) -> Self {
        match (modality, preferred) {
            (Modality::Fundus, AnalysisMethod::SpecializedModel) => AnalysisStrategy::Specialized,
            _ => AnalysisStrategy::General,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AnalysisStrategy::Specialized => "ML Model",
            AnalysisStrategy::General => "LLM Analysis",
        }
    }
}

impl fmt::Display for AnalysisStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Everything one analysis attempt needs, built fresh per attempt.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub asset: UploadedAsset,
    pub intake: IntakeRecord,
    pub modality: Modality,
    pub strategy: AnalysisStrategy,
}

/// Fields every strategy has to fill in before a result exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultDraft {
    pub diagnosis: String,
    pub confidence_score: f64,
    pub severity: Severity,
    pub detected_conditions: Vec<String>,
    pub recommendations: String,
    pub detailed_findings: String,
}

/// Normalized diagnosis, the same shape whichever strategy produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ResultDraft")]
pub struct AnalysisResult {
    diagnosis: String,
    confidence_score: f64,
    severity: Severity,
    detected_conditions: Vec<String>,
    recommendations: String,
    #[serde(rename = "doctor_review_required")]
    review_required: bool,
    detailed_findings: String,
}

impl AnalysisResult {
    pub fn new(draft: ResultDraft) -> Result<Self> {
        if draft.diagnosis.trim().is_empty() {
            return Err(incomplete("diagnosis narrative is empty"));
        }
        if !draft.confidence_score.is_finite() || !(0.0..=100.0).contains(&draft.confidence_score) {
            return Err(incomplete(format!(
                "confidence score {} is outside 0-100",
                draft.confidence_score
            )));
        }
        if draft.detected_conditions.is_empty()
            || draft.detected_conditions.iter().any(|c| c.trim().is_empty())
        {
            return Err(incomplete("no detected conditions"));
        }
        if draft.recommendations.trim().is_empty() {
            return Err(incomplete("recommendations are empty"));
        }
        if draft.detailed_findings.trim().is_empty() {
            return Err(incomplete("detailed findings are empty"));
        }

        Ok(Self {
            review_required: draft.severity != Severity::Mild,
            diagnosis: draft.diagnosis,
            confidence_score: draft.confidence_score,
            severity: draft.severity,
            detected_conditions: draft.detected_conditions,
            recommendations: draft.recommendations,
            detailed_findings: draft.detailed_findings,
        })
    }

    pub fn diagnosis(&self) -> &str {
        &self.diagnosis
    }

    pub fn confidence_score(&self) -> f64 {
        self.confidence_score
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn detected_conditions(&self) -> &[String] {
        &self.detected_conditions
    }

    pub fn recommendations(&self) -> &str {
        &self.recommendations
    }

    /// True whenever the severity is worse than mild.
    pub fn review_required(&self) -> bool {
        self.review_required
    }

    pub fn detailed_findings(&self) -> &str {
        &self.detailed_findings
    }
}

impl TryFrom<ResultDraft> for AnalysisResult {
    type Error = DiagnosisError;

    fn try_from(draft: ResultDraft) -> Result<Self> {
        AnalysisResult::new(draft)
    }
}

fn incomplete(reason: impl Into<String>) -> DiagnosisError {
    DiagnosisError::IncompleteResult(reason.into())
}
