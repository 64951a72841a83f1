//! HTTP client for the remote backend that stores patients and reports,
//! hosts uploaded files and runs the inference models.

use async_trait::async_trait;
use diagnosis_flow::{
    AssetReference, DiseaseInfo, FileUpload, GatewayError, GatewayResult, GeneralModelRequest,
    GeneralModelResponse, IntakeRecord, NewReport, PatientId, RemoteDataGateway, ReportId,
    SpecializedModelResponse,
};
use reqwest::{Client, Method, RequestBuilder, Response, multipart};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::llm::OpenRouterClassifier;

#[derive(Debug, Deserialize)]
struct CreatedEntity {
    id: String,
}

#[derive(Debug, Deserialize)]
struct UploadedFile {
    file_url: String,
}

pub struct HttpGateway {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    classifier: Option<Arc<OpenRouterClassifier>>,
}

impl HttpGateway {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            classifier: None,
        }
    }

    /// Route general-model calls to OpenRouter instead of the backend.
    pub fn with_classifier(mut self, classifier: OpenRouterClassifier) -> Self {
        self.classifier = Some(Arc::new(classifier));
        self
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}/{}", self.base_url, path));
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

pub fn patient_payload(intake: &IntakeRecord) -> Value {
    json!({
        "full_name": intake.full_name(),
        "age": intake.age(),
        "gender": intake.gender(),
        "phone": intake.phone(),
        "medical_history": intake.medical_history(),
        "symptoms": intake.symptoms(),
        "other_symptoms": intake.other_symptoms(),
    })
}

pub fn specialized_payload(asset: &AssetReference, intake: &IntakeRecord) -> Value {
    json!({
        "imageUrl": asset.file_url,
        "patientData": patient_payload(intake),
    })
}

fn transport(err: reqwest::Error) -> GatewayError {
    GatewayError::Transport(err.to_string())
}

/// Non-2xx becomes [`GatewayError::Status`] carrying the body, anything
/// unreadable becomes [`GatewayError::Decode`].
async fn decode<T: DeserializeOwned>(response: Response) -> GatewayResult<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), body = %body, "Backend request failed");
        return Err(GatewayError::Status {
            status: status.as_u16(),
            body,
        });
    }
    let bytes = response.bytes().await.map_err(transport)?;
    serde_json::from_slice(&bytes).map_err(|e| GatewayError::Decode(e.to_string()))
}

#[async_trait]
impl RemoteDataGateway for HttpGateway {
    async fn create_patient(&self, intake: &IntakeRecord) -> GatewayResult<PatientId> {
        let response = self
            .request(Method::POST, "entities/Patient")
            .json(&patient_payload(intake))
            .send()
            .await
            .map_err(transport)?;
        let created: CreatedEntity = decode(response).await?;
        info!(patient_id = %created.id, "Patient record created");
        Ok(PatientId(created.id))
    }

    async fn list_disease_catalog(&self) -> GatewayResult<Vec<DiseaseInfo>> {
        let response = self
            .request(Method::GET, "entities/DiseaseInfo")
            .send()
            .await
            .map_err(transport)?;
        let catalog: Vec<DiseaseInfo> = decode(response).await?;
        debug!(entries = catalog.len(), "Loaded disease catalog");
        Ok(catalog)
    }

    async fn upload_file(&self, file: FileUpload) -> GatewayResult<AssetReference> {
        let size = file.bytes.len();
        let part = multipart::Part::bytes(file.bytes)
            .file_name(file.file_name.clone())
            .mime_str(&file.content_type)
            .map_err(|e| GatewayError::Rejected(format!("invalid content type: {e}")))?;
        let form = multipart::Form::new().part("file", part);

        let response = self
            .request(Method::POST, "integrations/Core/UploadFile")
            .multipart(form)
            .send()
            .await
            .map_err(transport)?;
        let uploaded: UploadedFile = decode(response).await?;
        info!(file_name = %file.file_name, size, file_url = %uploaded.file_url, "File uploaded");
        Ok(AssetReference {
            file_url: uploaded.file_url,
        })
    }

    async fn invoke_specialized_model(
        &self,
        asset: &AssetReference,
        intake: &IntakeRecord,
    ) -> GatewayResult<SpecializedModelResponse> {
        let response = self
            .request(Method::POST, "functions/mlRetinalAnalysis")
            .json(&specialized_payload(asset, intake))
            .send()
            .await
            .map_err(transport)?;
        decode(response).await
    }

    async fn invoke_general_model(
        &self,
        request: GeneralModelRequest,
    ) -> GatewayResult<GeneralModelResponse> {
        if let Some(classifier) = &self.classifier {
            return classifier.classify(&request).await;
        }

        let response = self
            .request(Method::POST, "integrations/Core/InvokeLLM")
            .json(&json!({
                "prompt": request.prompt,
                "file_urls": request.file_urls,
                "response_json_schema": request.response_json_schema,
            }))
            .send()
            .await
            .map_err(transport)?;
        decode(response).await
    }

    async fn create_report(&self, report: &NewReport) -> GatewayResult<ReportId> {
        let response = self
            .request(Method::POST, "entities/DiagnosisReport")
            .json(report)
            .send()
            .await
            .map_err(transport)?;
        let created: CreatedEntity = decode(response).await?;
        info!(report_id = %created.id, patient_id = %report.patient_id, "Diagnosis report saved");
        Ok(ReportId(created.id))
    }
}
