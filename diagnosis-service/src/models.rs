use base64::{Engine as _, engine::general_purpose::STANDARD};
use diagnosis_flow::{
    AnalysisMethod, AnalysisStrategy, FileUpload, IntakeRecord, Modality, ReportView, Step,
    UploadedAsset, WorkflowSession,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StartDiagnosisRequest {
    #[serde(default)]
    pub modality: Modality,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadRequest {
    pub file_name: String,
    pub content_type: String,
    pub data_base64: String,
}

impl UploadRequest {
    pub fn into_upload(self) -> Result<FileUpload, String> {
        let bytes = STANDARD
            .decode(self.data_base64.trim())
            .map_err(|e| format!("data_base64 is not valid base64: {e}"))?;
        Ok(FileUpload {
            file_name: self.file_name,
            content_type: self.content_type,
            bytes,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MethodRequest {
    pub method: AnalysisMethod,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub step: Step,
    pub step_number: u8,
    pub modality: Modality,
    pub method: AnalysisMethod,
    pub strategy: AnalysisStrategy,
    pub analysis_method_label: &'static str,
    pub intake: Option<IntakeRecord>,
    pub asset: Option<UploadedAsset>,
    pub report: Option<ReportView>,
    pub error: Option<String>,
    pub progress: u8,
    pub analyzing: bool,
}

impl SessionResponse {
    /// `live_progress` is the progress of an attempt still running, which
    /// takes precedence over the stored value.
    pub fn new(session: &WorkflowSession, live_progress: Option<u8>) -> Self {
        let strategy = session.strategy();
        Self {
            session_id: session.id.clone(),
            step: session.step(),
            step_number: session.step().number(),
            modality: session.modality,
            method: session.method,
            strategy,
            analysis_method_label: strategy.label(),
            intake: session.intake().cloned(),
            asset: session.asset().cloned(),
            report: session.report().cloned(),
            error: session.error().map(str::to_string),
            progress: live_progress.unwrap_or(session.progress()),
            analyzing: live_progress.is_some(),
        }
    }
}
