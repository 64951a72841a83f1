use thiserror::Error;

use crate::workflow::Step;

/// Failures reported by a [`RemoteDataGateway`](crate::gateway::RemoteDataGateway).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Backend responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Could not decode backend response: {0}")]
    Decode(String),

    #[error("{0}")]
    Rejected(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DiagnosisError {
    #[error("Invalid patient intake: {0}")]
    Validation(String),

    #[error("Failed to upload file: {0}")]
    Upload(#[source] GatewayError),

    #[error("{0}")]
    Inference(String),

    #[error("AI returned an unknown disease: {0}")]
    UnknownClassification(String),

    #[error("Failed to save diagnosis: {0}")]
    Persistence(#[source] GatewayError),

    #[error("Incomplete analysis result: {0}")]
    IncompleteResult(String),

    #[error("Cannot {action} while in step {step}")]
    InvalidTransition { action: &'static str, step: Step },

    #[error("Session {0} is busy with another request")]
    SessionBusy(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Workflow action was interrupted: {0}")]
    Interrupted(String),
}

impl DiagnosisError {
    /// Errors raised by an analysis attempt; these are attached to the session
    /// as a user-facing message instead of only being returned.
    pub fn is_attempt_failure(&self) -> bool {
        matches!(
            self,
            DiagnosisError::Inference(_)
                | DiagnosisError::UnknownClassification(_)
                | DiagnosisError::Persistence(_)
                | DiagnosisError::IncompleteResult(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DiagnosisError>;
