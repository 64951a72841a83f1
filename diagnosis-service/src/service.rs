use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, Request, StatusCode, header},
    middleware::{Next, from_fn},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use diagnosis_flow::{
    DiagnosisError, FlowRunner, IntakeForm, Role, SYMPTOM_CATALOG, SessionUser, WorkflowAction,
    report,
};
use serde_json::{Value, json};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Instrument, error, info, warn};
use uuid::Uuid;

use crate::{
    config::ServiceConfig,
    models::{MethodRequest, SessionResponse, StartDiagnosisRequest, UploadRequest},
    workflow::{build_gateway, create_flow_runner, create_session_storage},
};

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<Value>)>;
type ApiError = (StatusCode, Json<Value>);

pub const USER_ROLE_HEADER: &str = "x-user-role";

fn bad_request_error(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

fn not_found_error(message: &str, id: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": message,
            "session_id": id
        })),
    )
}

fn conflict_error(message: &str, id: &str) -> ApiError {
    (
        StatusCode::CONFLICT,
        Json(json!({
            "error": message,
            "session_id": id
        })),
    )
}

fn internal_error(message: &str, details: &str) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": message,
            "details": details
        })),
    )
}

fn workflow_error(err: &DiagnosisError, session_id: &str) -> ApiError {
    match err {
        DiagnosisError::Validation(_) => bad_request_error(&err.to_string()),
        DiagnosisError::SessionNotFound(_) => not_found_error("Session not found", session_id),
        DiagnosisError::SessionBusy(_) => {
            conflict_error("An analysis is already running for this session", session_id)
        }
        DiagnosisError::InvalidTransition { .. } => conflict_error(&err.to_string(), session_id),
        DiagnosisError::Storage(details) => internal_error("Session storage failed", details),
        DiagnosisError::Interrupted(details) => {
            internal_error("Workflow action was interrupted", details)
        }
        DiagnosisError::Upload(_)
        | DiagnosisError::Inference(_)
        | DiagnosisError::UnknownClassification(_)
        | DiagnosisError::Persistence(_)
        | DiagnosisError::IncompleteResult(_) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({
                "error": err.to_string(),
                "session_id": session_id
            })),
        ),
    }
}

#[derive(Clone)]
pub struct AppState {
    pub runner: FlowRunner,
}

pub async fn create_app(config: &ServiceConfig) -> Router {
    let session_storage = create_session_storage(config).await;
    let runner = create_flow_runner(build_gateway(config), config, session_storage);
    build_router(AppState { runner })
}

/// Adds a correlation id to every request and runs it inside a span carrying it.
async fn correlation_id_middleware(
    mut request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let correlation_id = Uuid::new_v4().to_string();
    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        request.headers_mut().insert("x-correlation-id", value);
    }

    let span = tracing::info_span!("http_request", correlation_id = %correlation_id);
    next.run(request).instrument(span).await
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/diagnosis", post(start_diagnosis))
        .route("/diagnosis/{session_id}", get(get_session_status))
        .route("/diagnosis/{session_id}/intake", post(submit_intake))
        .route("/diagnosis/{session_id}/upload", post(upload_file))
        .route("/diagnosis/{session_id}/change-file", post(change_file))
        .route("/diagnosis/{session_id}/method", post(select_method))
        .route("/diagnosis/{session_id}/analyze", post(analyze))
        .route("/diagnosis/{session_id}/reset", post(reset))
        .route("/diagnosis/{session_id}/report/export", get(export_report))
        .layer(from_fn(correlation_id_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "Retinal Diagnosis Service",
        "version": "1.0.0",
        "description": "Guided retinal diagnosis: patient intake, file upload, AI analysis and report",
        "symptom_catalog": SYMPTOM_CATALOG,
        "endpoints": {
            "POST /diagnosis": "Start a diagnosis session ({\"modality\": \"fundus\" | \"erg\"})",
            "GET /diagnosis/{session_id}": "Get session step, progress, error and report",
            "POST /diagnosis/{session_id}/intake": "Submit the patient intake form",
            "POST /diagnosis/{session_id}/upload": "Upload the fundus image or ERG report (base64)",
            "POST /diagnosis/{session_id}/change-file": "Go back and pick another file",
            "POST /diagnosis/{session_id}/method": "Choose specialized_model or general_model",
            "POST /diagnosis/{session_id}/analyze": "Run the analysis",
            "POST /diagnosis/{session_id}/reset": "Start over",
            "GET /diagnosis/{session_id}/report/export": "Download the report (x-user-role header)",
            "GET /health": "Health check"
        }
    }))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn start_diagnosis(
    State(state): State<AppState>,
    request: Option<Json<StartDiagnosisRequest>>,
) -> ApiResult<SessionResponse> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let session = state.runner.start(request.modality).await.map_err(|e| {
        error!("Failed to create session: {}", e);
        internal_error("Failed to create diagnosis session", &e.to_string())
    })?;
    Ok(Json(SessionResponse::new(&session, None)))
}

async fn get_session_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<SessionResponse> {
    let session = state
        .runner
        .load(&session_id)
        .await
        .map_err(|e| workflow_error(&e, &session_id))?;
    let live_progress = state.runner.progress(&session_id);
    Ok(Json(SessionResponse::new(&session, live_progress)))
}

async fn run_action(
    state: &AppState,
    session_id: &str,
    action: WorkflowAction,
) -> ApiResult<SessionResponse> {
    let action_name = action.name();
    match state.runner.run(session_id, action).await {
        Ok(session) => Ok(Json(SessionResponse::new(&session, None))),
        Err(e) => {
            warn!(session_id = %session_id, action = action_name, error = %e, "Workflow action failed");
            Err(workflow_error(&e, session_id))
        }
    }
}

async fn submit_intake(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(form): Json<IntakeForm>,
) -> ApiResult<SessionResponse> {
    run_action(&state, &session_id, WorkflowAction::SubmitIntake(form)).await
}

async fn upload_file(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<UploadRequest>,
) -> ApiResult<SessionResponse> {
    let upload = request
        .into_upload()
        .map_err(|message| bad_request_error(&message))?;
    info!(
        session_id = %session_id,
        file_name = %upload.file_name,
        size = upload.bytes.len(),
        "Received file"
    );
    run_action(&state, &session_id, WorkflowAction::Upload(upload)).await
}

async fn change_file(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<SessionResponse> {
    run_action(&state, &session_id, WorkflowAction::ChangeFile).await
}

async fn select_method(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<MethodRequest>,
) -> ApiResult<SessionResponse> {
    run_action(&state, &session_id, WorkflowAction::SelectMethod(request.method)).await
}

async fn analyze(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<SessionResponse> {
    run_action(&state, &session_id, WorkflowAction::Analyze).await
}

async fn reset(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<SessionResponse> {
    run_action(&state, &session_id, WorkflowAction::Reset).await
}

fn viewer_from_headers(headers: &HeaderMap) -> Result<SessionUser, ApiError> {
    let Some(raw) = headers.get(USER_ROLE_HEADER) else {
        return Ok(SessionUser::anonymous());
    };
    let role = raw
        .to_str()
        .map_err(|_| bad_request_error("x-user-role header is not valid text"))?
        .parse::<Role>()
        .map_err(|message| bad_request_error(&message))?;
    Ok(SessionUser::with_role(role))
}

async fn export_report(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let viewer = viewer_from_headers(&headers)?;
    let session = state
        .runner
        .load(&session_id)
        .await
        .map_err(|e| workflow_error(&e, &session_id))?;

    let (Some(view), Some(intake)) = (session.report(), session.intake()) else {
        return Err(conflict_error(
            "No report available until the analysis is complete",
            &session_id,
        ));
    };

    let exported = report::export(view, intake, &viewer, chrono::Utc::now());
    info!(
        session_id = %session_id,
        viewer_role = %viewer.role,
        file_name = %exported.file_name,
        "Exporting report"
    );

    let disposition = format!("attachment; filename=\"{}\"", exported.file_name);
    Ok((
        [
            (header::CONTENT_TYPE, exported.content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        exported.body,
    )
        .into_response())
}
