use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

use crate::analysis::{AnalysisResult, Modality, Severity};
use crate::error::GatewayError;
use crate::intake::IntakeRecord;

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatientId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReportId(pub String);

impl fmt::Display for PatientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for ReportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable URL the backend hands out for an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetReference {
    pub file_url: String,
}

/// File bytes as received from the user.
#[derive(Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl fmt::Debug for FileUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileUpload")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// The single file attached to a workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedAsset {
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: usize,
    pub reference: AssetReference,
    pub uploaded_at: DateTime<Utc>,
}

/// Catalog entry describing a recognised disease classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiseaseInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub precaution: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub disease: String,
    #[serde(default)]
    pub description: String,
    pub confidence_score: f64,
    pub severity: Severity,
}

/// Response of the dedicated retinal model endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpecializedModelResponse {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub prediction: Option<Prediction>,
    #[serde(default)]
    pub detected_conditions: Option<Vec<String>>,
    #[serde(default)]
    pub recommendations: Option<String>,
    #[serde(default)]
    pub detailed_findings: Option<String>,
}

impl SpecializedModelResponse {
    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(reason.into()),
            ..Default::default()
        }
    }
}

/// Prompt, attached file and structured-output schema sent to the general model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralModelRequest {
    pub modality: Modality,
    pub prompt: String,
    pub file_urls: Vec<String>,
    pub response_json_schema: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralModelResponse {
    pub disease_name: String,
    pub confidence_score: f64,
    pub justification: String,
}

/// Report payload handed to the backend for persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewReport {
    pub patient_id: PatientId,
    pub analysis_type: Modality,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fundus_image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub erg_report_url: Option<String>,
    #[serde(flatten)]
    pub result: AnalysisResult,
}

/// A report once the backend has accepted it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedReport {
    pub id: ReportId,
    #[serde(flatten)]
    pub report: NewReport,
}

/// Remote backend holding patients, reports and uploaded files, and running
/// the inference models. Every call may fail independently.
#[async_trait]
pub trait RemoteDataGateway: Send + Sync {
    async fn create_patient(&self, intake: &IntakeRecord) -> GatewayResult<PatientId>;

    async fn list_disease_catalog(&self) -> GatewayResult<Vec<DiseaseInfo>>;

    async fn upload_file(&self, file: FileUpload) -> GatewayResult<AssetReference>;

    async fn invoke_specialized_model(
        &self,
        asset: &AssetReference,
        intake: &IntakeRecord,
    ) -> GatewayResult<SpecializedModelResponse>;

    async fn invoke_general_model(
        &self,
        request: GeneralModelRequest,
    ) -> GatewayResult<GeneralModelResponse>;

    async fn create_report(&self, report: &NewReport) -> GatewayResult<ReportId>;
}

/// Catalog used by [`InMemoryGateway`] unless another one is supplied.
pub fn default_disease_catalog() -> Vec<DiseaseInfo> {
    [
        (
            "Normal Fundus",
            "No signs of retinal disease were identified.",
            "Continue routine eye examinations every one to two years.",
        ),
        (
            "Diabetic Retinopathy",
            "Damage to the retinal blood vessels caused by prolonged high blood sugar.",
            "Keep blood sugar under control and see a retina specialist promptly.",
        ),
        (
            "Glaucoma",
            "Optic nerve damage usually associated with raised intraocular pressure.",
            "Arrange an intraocular pressure check and visual field test.",
        ),
        (
            "ARMD",
            "Age-related macular degeneration affecting central vision.",
            "Monitor central vision with an Amsler grid and consult a specialist.",
        ),
        (
            "Cataract",
            "Clouding of the natural lens of the eye.",
            "Discuss surgical options with an ophthalmologist when vision is affected.",
        ),
        (
            "Hypertensive Retinopathy",
            "Retinal vascular changes caused by high blood pressure.",
            "Review blood pressure management with a physician.",
        ),
    ]
    .into_iter()
    .map(|(name, description, precaution)| DiseaseInfo {
        name: name.to_string(),
        description: description.to_string(),
        precaution: precaution.to_string(),
    })
    .collect()
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory backend with scriptable model responses and failures.
pub struct InMemoryGateway {
    catalog: Mutex<Vec<DiseaseInfo>>,
    patients: DashMap<PatientId, IntakeRecord>,
    reports: DashMap<ReportId, NewReport>,
    uploads: AtomicUsize,
    upload_failure: Mutex<Option<GatewayError>>,
    report_failure: Mutex<Option<GatewayError>>,
    specialized_response: Mutex<GatewayResult<SpecializedModelResponse>>,
    general_response: Mutex<GatewayResult<GeneralModelResponse>>,
    general_requests: Mutex<Vec<GeneralModelRequest>>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self {
            catalog: Mutex::new(default_disease_catalog()),
            patients: DashMap::new(),
            reports: DashMap::new(),
            uploads: AtomicUsize::new(0),
            upload_failure: Mutex::new(None),
            report_failure: Mutex::new(None),
            specialized_response: Mutex::new(Err(GatewayError::Rejected(
                "no specialized model response configured".to_string(),
            ))),
            general_response: Mutex::new(Err(GatewayError::Rejected(
                "no general model response configured".to_string(),
            ))),
            general_requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_catalog(self, catalog: Vec<DiseaseInfo>) -> Self {
        *locked(&self.catalog) = catalog;
        self
    }

    pub fn set_specialized_response(&self, response: GatewayResult<SpecializedModelResponse>) {
        *locked(&self.specialized_response) = response;
    }

    pub fn set_general_response(&self, response: GatewayResult<GeneralModelResponse>) {
        *locked(&self.general_response) = response;
    }

    pub fn fail_uploads(&self, failure: Option<GatewayError>) {
        *locked(&self.upload_failure) = failure;
    }

    pub fn fail_reports(&self, failure: Option<GatewayError>) {
        *locked(&self.report_failure) = failure;
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn patient_count(&self) -> usize {
        self.patients.len()
    }

    pub fn report_count(&self) -> usize {
        self.reports.len()
    }

    pub fn report(&self, id: &ReportId) -> Option<NewReport> {
        self.reports.get(id).map(|entry| entry.clone())
    }

    pub fn general_requests(&self) -> Vec<GeneralModelRequest> {
        locked(&self.general_requests).clone()
    }
}

impl Default for InMemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteDataGateway for InMemoryGateway {
    async fn create_patient(&self, intake: &IntakeRecord) -> GatewayResult<PatientId> {
        let id = PatientId(Uuid::new_v4().to_string());
        self.patients.insert(id.clone(), intake.clone());
        Ok(id)
    }

    async fn list_disease_catalog(&self) -> GatewayResult<Vec<DiseaseInfo>> {
        Ok(locked(&self.catalog).clone())
    }

    async fn upload_file(&self, file: FileUpload) -> GatewayResult<AssetReference> {
        if let Some(failure) = locked(&self.upload_failure).clone() {
            return Err(failure);
        }
        let n = self.uploads.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(AssetReference {
            file_url: format!("memory://uploads/{n}/{}", file.file_name),
        })
    }

    async fn invoke_specialized_model(
        &self,
        _asset: &AssetReference,
        _intake: &IntakeRecord,
    ) -> GatewayResult<SpecializedModelResponse> {
        locked(&self.specialized_response).clone()
    }

    async fn invoke_general_model(
        &self,
        request: GeneralModelRequest,
    ) -> GatewayResult<GeneralModelResponse> {
        locked(&self.general_requests).push(request);
        locked(&self.general_response).clone()
    }

    async fn create_report(&self, report: &NewReport) -> GatewayResult<ReportId> {
        if let Some(failure) = locked(&self.report_failure).clone() {
            return Err(failure);
        }
        let id = ReportId(Uuid::new_v4().to_string());
        self.reports.insert(id.clone(), report.clone());
        Ok(id)
    }
}
