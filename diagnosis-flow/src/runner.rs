//! FlowRunner – loads a session, applies exactly **one** workflow action, and persists the
//! updated session back to storage.
//!
//! Use it from request handlers: one HTTP call maps to one action, and the session is saved
//! whether the action succeeded or not (a failed upload or analysis leaves an error message on
//! the session that the next status query must see).
//!
//! The runner also tracks which sessions have an action running. A second action on a busy
//! session fails with [`DiagnosisError::SessionBusy`], so an analysis cannot be submitted twice
//! while the first attempt is outstanding. The live progress of a running attempt is available
//! through [`FlowRunner::progress`].
//!
//! Use [`DiagnosisWorkflow`] directly when the session lives in memory only (tests, CLIs).

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use tracing::{info, warn};

use crate::{
    analysis::Modality,
    error::{DiagnosisError, Result},
    progress::ProgressHandle,
    storage::SessionStorage,
    workflow::{DiagnosisWorkflow, WorkflowAction, WorkflowSession},
};

/// High-level helper that orchestrates the common _load → apply → save_ pattern.
#[derive(Clone)]
pub struct FlowRunner {
    workflow: Arc<DiagnosisWorkflow>,
    storage: Arc<dyn SessionStorage>,
    /// Sessions with an action running; analyses carry their progress.
    in_flight: Arc<DashMap<String, Option<ProgressHandle>>>,
}

/// Releases a session's in-flight slot when dropped.
struct InFlightGuard {
    in_flight: Arc<DashMap<String, Option<ProgressHandle>>>,
    session_id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.session_id);
    }
}

impl FlowRunner {
    pub fn new(workflow: Arc<DiagnosisWorkflow>, storage: Arc<dyn SessionStorage>) -> Self {
        Self {
            workflow,
            storage,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Creates and stores a fresh session at the intake step.
    pub async fn start(&self, modality: Modality) -> Result<WorkflowSession> {
        let session = WorkflowSession::with_random_id(modality);
        self.storage.save(session.clone()).await?;
        info!(session_id = %session.id, modality = %modality, "Diagnosis session created");
        Ok(session)
    }

    pub async fn load(&self, session_id: &str) -> Result<WorkflowSession> {
        self.storage
            .get(session_id)
            .await?
            .ok_or_else(|| DiagnosisError::SessionNotFound(session_id.to_string()))
    }

    /// Apply **exactly one** action to the session and persist it.
    ///
    /// On error the session is still saved, so attached error messages survive; the error
    /// itself is returned to the caller as well.
    ///
    /// The action runs on its own task: dropping the returned future does not stop it, and the
    /// session stays busy until the action has been applied and saved.
    pub async fn run(&self, session_id: &str, action: WorkflowAction) -> Result<WorkflowSession> {
        let progress = matches!(action, WorkflowAction::Analyze).then(ProgressHandle::new);
        let guard = self.claim(session_id, progress.clone())?;

        let runner = self.clone();
        let session_id = session_id.to_string();
        let task = tokio::spawn(async move {
            let _guard = guard;
            let progress = progress.unwrap_or_default();
            runner.apply_and_save(&session_id, action, &progress).await
        });

        match task.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(DiagnosisError::Interrupted(e.to_string())),
        }
    }

    async fn apply_and_save(
        &self,
        session_id: &str,
        action: WorkflowAction,
        progress: &ProgressHandle,
    ) -> Result<WorkflowSession> {
        // 1. Load session
        let mut session = self.load(session_id).await?;

        // 2. Apply the action
        let outcome = self.workflow.apply(&mut session, action, progress).await;

        // 3. Persist new state so the next call starts where we left off
        self.storage.save(session.clone()).await?;

        outcome.map(|_| session)
    }

    /// Progress of the analysis currently running for the session, if any.
    pub fn progress(&self, session_id: &str) -> Option<u8> {
        self.in_flight
            .get(session_id)
            .and_then(|entry| entry.value().as_ref().map(ProgressHandle::get))
    }

    pub fn is_busy(&self, session_id: &str) -> bool {
        self.in_flight.contains_key(session_id)
    }

    fn claim(&self, session_id: &str, progress: Option<ProgressHandle>) -> Result<InFlightGuard> {
        match self.in_flight.entry(session_id.to_string()) {
            Entry::Occupied(_) => {
                warn!(session_id = %session_id, "Rejected action on busy session");
                Err(DiagnosisError::SessionBusy(session_id.to_string()))
            }
            Entry::Vacant(slot) => {
                slot.insert(progress);
                Ok(InFlightGuard {
                    in_flight: self.in_flight.clone(),
                    session_id: session_id.to_string(),
                })
            }
        }
    }
}
