//! The four-step diagnosis wizard.
//!
//! A [`WorkflowSession`] holds the transient state of one run; the
//! [`DiagnosisWorkflow`] moves it between steps and talks to the backend.
//! Errors raised by an upload or an analysis attempt are attached to the
//! session and leave it in the step it was in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::analysis::{AnalysisMethod, AnalysisRequest, AnalysisStrategy, Modality};
use crate::error::{DiagnosisError, Result};
use crate::gateway::{
    FileUpload, NewReport, PersistedReport, RemoteDataGateway, UploadedAsset,
};
use crate::intake::{IntakeForm, IntakeRecord};
use crate::progress::{ProgressHandle, ProgressTicker};
use crate::report::ReportView;
use crate::severity::SeverityPolicy;
use crate::strategy;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    #[default]
    Intake,
    Acquisition,
    ReadyToAnalyze,
    Complete,
}

impl Step {
    /// 1-based position shown in the wizard header.
    pub fn number(self) -> u8 {
        match self {
            Step::Intake => 1,
            Step::Acquisition => 2,
            Step::ReadyToAnalyze => 3,
            Step::Complete => 4,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Intake => write!(f, "intake"),
            Step::Acquisition => write!(f, "acquisition"),
            Step::ReadyToAnalyze => write!(f, "ready_to_analyze"),
            Step::Complete => write!(f, "complete"),
        }
    }
}

/// A user action driving the wizard forward (or back).
#[derive(Debug, Clone)]
pub enum WorkflowAction {
    SubmitIntake(IntakeForm),
    Upload(FileUpload),
    ChangeFile,
    SelectMethod(AnalysisMethod),
    Analyze,
    Reset,
}

impl WorkflowAction {
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowAction::SubmitIntake(_) => "submit intake",
            WorkflowAction::Upload(_) => "upload a file",
            WorkflowAction::ChangeFile => "change the file",
            WorkflowAction::SelectMethod(_) => "select an analysis method",
            WorkflowAction::Analyze => "start an analysis",
            WorkflowAction::Reset => "reset",
        }
    }
}

/// State of one diagnosis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSession {
    pub id: String,
    pub modality: Modality,
    pub method: AnalysisMethod,
    step: Step,
    intake: Option<IntakeRecord>,
    asset: Option<UploadedAsset>,
    report: Option<ReportView>,
    error: Option<String>,
    progress: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowSession {
    pub fn new(id: impl Into<String>, modality: Modality) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            modality,
            method: AnalysisMethod::default(),
            step: Step::Intake,
            intake: None,
            asset: None,
            report: None,
            error: None,
            progress: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_random_id(modality: Modality) -> Self {
        Self::new(Uuid::new_v4().to_string(), modality)
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn intake(&self) -> Option<&IntakeRecord> {
        self.intake.as_ref()
    }

    pub fn asset(&self) -> Option<&UploadedAsset> {
        self.asset.as_ref()
    }

    pub fn report(&self) -> Option<&ReportView> {
        self.report.as_ref()
    }

    /// User-facing message of the last failed upload or analysis.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    /// Strategy the next analysis attempt would use.
    pub fn strategy(&self) -> AnalysisStrategy {
        AnalysisStrategy::select(self.modality, self.method)
    }

    fn expect_step(&self, allowed: &[Step], action: &'static str) -> Result<()> {
        if allowed.contains(&self.step) {
            Ok(())
        } else {
            Err(DiagnosisError::InvalidTransition {
                action,
                step: self.step,
            })
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

pub struct DiagnosisWorkflow {
    gateway: Arc<dyn RemoteDataGateway>,
    policy: SeverityPolicy,
}

impl DiagnosisWorkflow {
    pub fn new(gateway: Arc<dyn RemoteDataGateway>) -> Self {
        Self {
            gateway,
            policy: SeverityPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: SeverityPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Applies one action to the session. Progress of an analysis attempt is
    /// reported through `progress`.
    pub async fn apply(
        &self,
        session: &mut WorkflowSession,
        action: WorkflowAction,
        progress: &ProgressHandle,
    ) -> Result<()> {
        info!(
            session_id = %session.id,
            step = %session.step,
            action = action.name(),
            "Applying workflow action"
        );
        let outcome = match action {
            WorkflowAction::SubmitIntake(form) => self.submit_intake(session, form),
            WorkflowAction::Upload(file) => self.upload(session, file).await,
            WorkflowAction::ChangeFile => self.change_file(session),
            WorkflowAction::SelectMethod(method) => self.select_method(session, method),
            WorkflowAction::Analyze => self.analyze_with_progress(session, progress).await,
            WorkflowAction::Reset => {
                self.reset(session);
                Ok(())
            }
        };
        session.touch();
        outcome
    }

    pub fn submit_intake(&self, session: &mut WorkflowSession, form: IntakeForm) -> Result<()> {
        session.expect_step(&[Step::Intake], "submit intake")?;
        let record = form.validate()?;
        session.intake = Some(record);
        session.error = None;
        session.step = Step::Acquisition;
        info!(session_id = %session.id, "Intake accepted");
        Ok(())
    }

    /// Uploads a file, replacing any previous asset once the upload succeeds.
    pub async fn upload(&self, session: &mut WorkflowSession, file: FileUpload) -> Result<()> {
        session.expect_step(&[Step::Acquisition, Step::ReadyToAnalyze], "upload a file")?;
        if file.bytes.is_empty() {
            return Err(DiagnosisError::Validation(format!(
                "{} is empty",
                file.file_name
            )));
        }
        session.error = None;

        let file_name = file.file_name.clone();
        let content_type = file.content_type.clone();
        let size_bytes = file.bytes.len();

        match self.gateway.upload_file(file).await {
            Ok(reference) => {
                info!(
                    session_id = %session.id,
                    file_name = %file_name,
                    file_url = %reference.file_url,
                    replaced = session.asset.is_some(),
                    "File uploaded"
                );
                session.asset = Some(UploadedAsset {
                    file_name,
                    content_type,
                    size_bytes,
                    reference,
                    uploaded_at: Utc::now(),
                });
                session.step = Step::ReadyToAnalyze;
                Ok(())
            }
            Err(e) => {
                error!(session_id = %session.id, error = %e, "Upload failed");
                let err = DiagnosisError::Upload(e);
                session.error = Some(format!("{err}. Please try again."));
                Err(err)
            }
        }
    }

    /// Goes back to the upload step; the current asset stays until a new
    /// upload replaces it.
    pub fn change_file(&self, session: &mut WorkflowSession) -> Result<()> {
        session.expect_step(&[Step::ReadyToAnalyze], "change the file")?;
        session.step = Step::Acquisition;
        session.error = None;
        Ok(())
    }

    pub fn select_method(&self, session: &mut WorkflowSession, method: AnalysisMethod) -> Result<()> {
        session.expect_step(
            &[Step::Intake, Step::Acquisition, Step::ReadyToAnalyze],
            "select an analysis method",
        )?;
        if !session.modality.is_image() && method != AnalysisMethod::GeneralModel {
            warn!(
                session_id = %session.id,
                "Specialized model only handles fundus images; ERG reports use the general model"
            );
        }
        session.method = method;
        Ok(())
    }

    pub async fn analyze(&self, session: &mut WorkflowSession) -> Result<()> {
        self.analyze_with_progress(session, &ProgressHandle::new())
            .await
    }

    /// Runs one analysis attempt: model dispatch, then patient and report
    /// creation. On failure the session keeps its step and gets an error
    /// message; nothing is shown from a failed attempt.
    pub async fn analyze_with_progress(
        &self,
        session: &mut WorkflowSession,
        progress: &ProgressHandle,
    ) -> Result<()> {
        session.expect_step(&[Step::ReadyToAnalyze], "start an analysis")?;
        let (Some(intake), Some(asset)) = (session.intake.clone(), session.asset.clone()) else {
            return Err(DiagnosisError::InvalidTransition {
                action: "start an analysis",
                step: session.step,
            });
        };

        let request = AnalysisRequest {
            asset,
            intake,
            modality: session.modality,
            strategy: session.strategy(),
        };

        session.error = None;
        session.progress = 0;
        let ticker = ProgressTicker::start(progress.clone());

        match self.run_attempt(&request, progress).await {
            Ok(view) => {
                ticker.finish();
                info!(
                    session_id = %session.id,
                    report_id = %view.report_id,
                    severity = %view.result.severity(),
                    review_required = view.result.review_required(),
                    "Analysis complete"
                );
                session.report = Some(view);
                session.progress = progress.get();
                session.step = Step::Complete;
                Ok(())
            }
            Err(err) => {
                drop(ticker);
                error!(
                    session_id = %session.id,
                    strategy = %request.strategy,
                    error = %err,
                    "Analysis failed"
                );
                session.progress = progress.get();
                session.error = Some(format!(
                    "Analysis failed: {err}. Please check the file format or try again."
                ));
                Err(err)
            }
        }
    }

    async fn run_attempt(
        &self,
        request: &AnalysisRequest,
        progress: &ProgressHandle,
    ) -> Result<ReportView> {
        let result = strategy::run(self.gateway.as_ref(), &self.policy, request, progress).await?;

        let patient_id = self
            .gateway
            .create_patient(&request.intake)
            .await
            .map_err(DiagnosisError::Persistence)?;

        let file_url = request.asset.reference.file_url.clone();
        let (fundus_image_url, erg_report_url) = match request.modality {
            Modality::Fundus => (Some(file_url), None),
            Modality::Erg => (None, Some(file_url)),
        };
        let report = NewReport {
            patient_id,
            analysis_type: request.modality,
            fundus_image_url,
            erg_report_url,
            result,
        };

        let id = self
            .gateway
            .create_report(&report)
            .await
            .map_err(DiagnosisError::Persistence)?;

        Ok(ReportView::new(
            PersistedReport { id, report },
            &request.intake,
            request.strategy,
        ))
    }

    /// Clears everything and returns to the intake step.
    pub fn reset(&self, session: &mut WorkflowSession) {
        info!(session_id = %session.id, step = %session.step, "Resetting workflow");
        session.step = Step::Intake;
        session.intake = None;
        session.asset = None;
        session.report = None;
        session.error = None;
        session.progress = 0;
    }
}
