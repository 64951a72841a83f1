pub mod analysis;
pub mod context;
pub mod error;
pub mod gateway;
pub mod intake;
pub mod progress;
pub mod report;
pub mod runner;
pub mod severity;
pub mod storage;
#[cfg(feature = "postgres")]
pub mod storage_postgres;
pub mod strategy;
pub mod workflow;

// Re-export commonly used types
pub use analysis::{
    AnalysisMethod, AnalysisRequest, AnalysisResult, AnalysisStrategy, Modality, ResultDraft,
    Severity,
};
pub use context::{Role, SessionUser};
pub use error::{DiagnosisError, GatewayError, Result};
pub use gateway::{
    AssetReference, DiseaseInfo, FileUpload, GatewayResult, GeneralModelRequest,
    GeneralModelResponse, InMemoryGateway, NewReport, PatientId, PersistedReport, Prediction,
    RemoteDataGateway, ReportId, SpecializedModelResponse, UploadedAsset,
};
pub use intake::{Gender, IntakeForm, IntakeRecord, SYMPTOM_CATALOG};
pub use progress::{ProgressHandle, ProgressTicker};
pub use report::{ExportedReport, ReportView};
pub use runner::FlowRunner;
pub use severity::SeverityPolicy;
pub use storage::{InMemorySessionStorage, SessionStorage};
#[cfg(feature = "postgres")]
pub use storage_postgres::PostgresSessionStorage;
pub use workflow::{DiagnosisWorkflow, Step, WorkflowAction, WorkflowSession};
