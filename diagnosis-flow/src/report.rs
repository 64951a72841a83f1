//! What the workflow hands to the report screen, and its downloadable form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::analysis::{AnalysisResult, AnalysisStrategy, Modality};
use crate::context::SessionUser;
use crate::gateway::{PersistedReport, ReportId};
use crate::intake::IntakeRecord;

pub const DISCLAIMER: &str = "DISCLAIMER: This report is generated by AI and is for informational \
purposes only. It should not replace professional medical diagnosis or treatment. Always consult \
with a qualified healthcare professional for proper medical advice and treatment decisions.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportView {
    pub result: AnalysisResult,
    pub patient_name: String,
    pub report_id: ReportId,
    pub analysis_method_label: String,
    pub modality: Modality,
    /// Set for fundus images so the screen can show the photograph.
    pub image_url: Option<String>,
}

impl ReportView {
    pub fn new(persisted: PersistedReport, intake: &IntakeRecord, strategy: AnalysisStrategy) -> Self {
        let image_url = persisted.report.fundus_image_url.clone();
        Self {
            result: persisted.report.result,
            patient_name: intake.full_name().to_string(),
            report_id: persisted.id,
            analysis_method_label: strategy.label().to_string(),
            modality: persisted.report.analysis_type,
            image_url,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportedReport {
    pub file_name: String,
    pub content_type: &'static str,
    pub body: String,
}

/// `Medical_Report_<Name>_<YYYY-MM-DD>.md`, whitespace in the name replaced
/// by underscores.
pub fn export_file_name(patient_name: &str, generated_at: DateTime<Utc>) -> String {
    let name = patient_name.split_whitespace().collect::<Vec<_>>().join("_");
    let name = if name.is_empty() { "Patient".to_string() } else { name };
    format!("Medical_Report_{}_{}.md", name, generated_at.format("%Y-%m-%d"))
}

/// Renders the report as markdown. The report id is only included for
/// clinical staff.
pub fn export(
    view: &ReportView,
    intake: &IntakeRecord,
    viewer: &SessionUser,
    generated_at: DateTime<Utc>,
) -> ExportedReport {
    let body = MarkdownReport {
        view,
        intake,
        show_report_id: viewer.is_clinical_staff(),
        generated_at,
    }
    .to_string();

    ExportedReport {
        file_name: export_file_name(&view.patient_name, generated_at),
        content_type: "text/markdown; charset=utf-8",
        body,
    }
}

struct MarkdownReport<'a> {
    view: &'a ReportView,
    intake: &'a IntakeRecord,
    show_report_id: bool,
    generated_at: DateTime<Utc>,
}

impl fmt::Display for MarkdownReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (view, intake) = (self.view, self.intake);
        let result = &view.result;

        writeln!(f, "# Retinal Analysis Report\n")?;
        writeln!(f, "Generated: {}", self.generated_at.format("%B %-d, %Y %H:%M UTC"))?;
        if self.show_report_id {
            writeln!(f, "Report ID: {}", view.report_id)?;
        }

        writeln!(f, "\n## Patient Information\n")?;
        writeln!(f, "- Full name: {}", view.patient_name)?;
        writeln!(f, "- Age: {} years", intake.age())?;
        writeln!(f, "- Gender: {}", intake.gender())?;
        let phone = if intake.phone().is_empty() { "Not provided" } else { intake.phone() };
        writeln!(f, "- Phone: {phone}")?;
        if !intake.medical_history().is_empty() {
            writeln!(f, "- Medical history: {}", intake.medical_history())?;
        }
        let symptoms = intake.symptom_summary();
        if !symptoms.is_empty() {
            writeln!(f, "- Current symptoms: {symptoms}")?;
        }

        writeln!(f, "\n## Analysis Results\n")?;
        writeln!(f, "- AI confidence score: {}%", result.confidence_score().round())?;
        writeln!(f, "- Severity: {}", result.severity().to_string().to_uppercase())?;
        writeln!(f, "- Analysis type: {}", view.modality.to_string().to_uppercase())?;
        writeln!(f, "- Method: {}", view.analysis_method_label)?;
        if result.review_required() {
            writeln!(f, "- Review required by a specialist")?;
        }
        writeln!(f, "- Detected conditions: {}", result.detected_conditions().join(", "))?;

        writeln!(f, "\n## Detailed Analysis\n\n{}", result.diagnosis())?;
        writeln!(f, "\n## Findings\n\n{}", result.detailed_findings())?;
        writeln!(f, "\n## Recommendations\n\n{}", result.recommendations())?;
        writeln!(f, "\n---\n\n{DISCLAIMER}")
    }
}
