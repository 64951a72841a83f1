use async_trait::async_trait;
use diagnosis_flow::{
    AnalysisMethod, AssetReference, DiagnosisError, DiagnosisWorkflow, DiseaseInfo, FileUpload,
    FlowRunner, GatewayError, GatewayResult, GeneralModelRequest, GeneralModelResponse,
    InMemoryGateway, InMemorySessionStorage, IntakeForm, IntakeRecord, Modality, NewReport,
    PatientId, Prediction, RemoteDataGateway, ReportId, Severity, SpecializedModelResponse, Step,
    WorkflowAction, WorkflowSession,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

fn jane() -> IntakeForm {
    IntakeForm {
        full_name: "Jane Doe".into(),
        age: Some(45),
        phone: "5551234567".into(),
        ..Default::default()
    }
}

fn fundus(name: &str) -> FileUpload {
    FileUpload {
        file_name: name.into(),
        content_type: "image/jpeg".into(),
        bytes: vec![0xFF, 0xD8, 0xFF, 0xE0],
    }
}

fn retinopathy(confidence: f64) -> SpecializedModelResponse {
    SpecializedModelResponse {
        success: true,
        error: None,
        prediction: Some(Prediction {
            disease: "Diabetic Retinopathy".into(),
            description: "Microvascular damage of the retina.".into(),
            confidence_score: confidence,
            severity: Severity::Severe,
        }),
        detected_conditions: Some(vec!["Diabetic Retinopathy".into()]),
        recommendations: Some("Refer to a retina specialist within two weeks.".into()),
        detailed_findings: Some("Dot-blot haemorrhages and hard exudates.".into()),
    }
}

async fn ready_session(
    workflow: &DiagnosisWorkflow,
    modality: Modality,
) -> WorkflowSession {
    let mut session = WorkflowSession::with_random_id(modality);
    workflow.submit_intake(&mut session, jane()).unwrap();
    workflow.upload(&mut session, fundus("eye.jpg")).await.unwrap();
    assert_eq!(session.step(), Step::ReadyToAnalyze);
    session
}

#[tokio::test]
async fn specialized_end_to_end_reaches_complete() {
    let gateway = Arc::new(InMemoryGateway::new());
    gateway.set_specialized_response(Ok(retinopathy(92.0)));
    let workflow = DiagnosisWorkflow::new(gateway.clone());

    let mut session = ready_session(&workflow, Modality::Fundus).await;
    workflow.analyze(&mut session).await.unwrap();

    assert_eq!(session.step(), Step::Complete);
    assert_eq!(session.progress(), 100);
    assert!(session.error().is_none());

    let report = session.report().unwrap();
    assert!(report.result.review_required());
    assert_eq!(report.result.confidence_score(), 92.0);
    assert_eq!(report.result.severity(), Severity::Severe);
    assert_eq!(report.patient_name, "Jane Doe");
    assert_eq!(report.analysis_method_label, "ML Model");

    let stored = gateway.report(&report.report_id).unwrap();
    assert_eq!(stored.analysis_type, Modality::Fundus);
    assert!(stored.fundus_image_url.is_some());
    assert!(stored.erg_report_url.is_none());
    assert_eq!(gateway.patient_count(), 1);
}

#[tokio::test]
async fn specialized_failure_reason_is_surfaced() {
    let gateway = Arc::new(InMemoryGateway::new());
    gateway.set_specialized_response(Ok(SpecializedModelResponse::failure("x")));
    let workflow = DiagnosisWorkflow::new(gateway.clone());

    let mut session = ready_session(&workflow, Modality::Fundus).await;
    let err = workflow.analyze(&mut session).await.unwrap_err();

    assert_eq!(err, DiagnosisError::Inference("x".into()));
    assert_eq!(session.step(), Step::ReadyToAnalyze);
    let message = session.error().unwrap();
    assert!(message.contains('x'));
    assert!(message.starts_with("Analysis failed:"));
    assert!(session.report().is_none());
    assert_eq!(gateway.report_count(), 0);
    assert_eq!(gateway.patient_count(), 0);
}

#[tokio::test]
async fn retry_after_failure_is_a_fresh_attempt() {
    let gateway = Arc::new(InMemoryGateway::new());
    gateway.set_specialized_response(Err(GatewayError::Transport("timed out".into())));
    let workflow = DiagnosisWorkflow::new(gateway.clone());

    let mut session = ready_session(&workflow, Modality::Fundus).await;
    assert!(workflow.analyze(&mut session).await.is_err());
    assert!(session.error().unwrap().contains("timed out"));

    gateway.set_specialized_response(Ok(retinopathy(80.0)));
    workflow.analyze(&mut session).await.unwrap();
    assert_eq!(session.step(), Step::Complete);
    assert!(session.error().is_none());
    assert_eq!(gateway.report_count(), 1);
}

#[tokio::test]
async fn general_unknown_disease_creates_no_report() {
    let gateway = Arc::new(InMemoryGateway::new());
    gateway.set_general_response(Ok(GeneralModelResponse {
        disease_name: "Retinal Detachment".into(),
        confidence_score: 97.0,
        justification: "Large tear".into(),
    }));
    let workflow = DiagnosisWorkflow::new(gateway.clone());

    let mut session = ready_session(&workflow, Modality::Erg).await;
    let err = workflow.analyze(&mut session).await.unwrap_err();

    assert!(matches!(err, DiagnosisError::UnknownClassification(ref name) if name == "Retinal Detachment"));
    assert_eq!(session.step(), Step::ReadyToAnalyze);
    assert!(session.error().unwrap().contains("unknown disease: Retinal Detachment"));
    assert_eq!(gateway.report_count(), 0);
}

#[tokio::test]
async fn general_path_prompt_and_severity_policy() {
    let gateway = Arc::new(InMemoryGateway::new());
    gateway.set_general_response(Ok(GeneralModelResponse {
        disease_name: "glaucoma".into(),
        confidence_score: 69.0,
        justification: "Possible cupping, image quality limited".into(),
    }));
    let workflow = DiagnosisWorkflow::new(gateway.clone());

    let mut session = ready_session(&workflow, Modality::Fundus).await;
    workflow
        .select_method(&mut session, AnalysisMethod::GeneralModel)
        .unwrap();
    workflow.analyze(&mut session).await.unwrap();

    let report = session.report().unwrap();
    assert_eq!(report.analysis_method_label, "LLM Analysis");
    assert_eq!(report.result.severity(), Severity::Mild);
    assert!(!report.result.review_required());
    assert_eq!(report.result.detected_conditions(), ["Glaucoma"]);

    let requests = gateway.general_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].modality, Modality::Fundus);
    assert!(requests[0].prompt.contains("Glaucoma"));
    assert_eq!(requests[0].file_urls.len(), 1);
    assert_eq!(
        requests[0].response_json_schema["required"],
        serde_json::json!(["disease_name", "confidence_score", "justification"])
    );
}

#[tokio::test]
async fn minimal_specialized_answer_still_completes() {
    let gateway = Arc::new(InMemoryGateway::new());
    let response: SpecializedModelResponse = serde_json::from_value(serde_json::json!({
        "success": true,
        "prediction": {
            "disease": "Diabetic Retinopathy",
            "confidence_score": 92,
            "severity": "severe"
        }
    }))
    .unwrap();
    gateway.set_specialized_response(Ok(response));
    let workflow = DiagnosisWorkflow::new(gateway.clone());

    let mut session = ready_session(&workflow, Modality::Fundus).await;
    workflow.analyze(&mut session).await.unwrap();

    assert_eq!(session.step(), Step::Complete);
    assert!(session.error().is_none());
    let report = session.report().unwrap();
    assert_eq!(report.patient_name, "Jane Doe");
    assert_eq!(report.result.severity(), Severity::Severe);
    assert!(report.result.review_required());
    assert!(!report.result.recommendations().is_empty());
    assert!(!report.result.detailed_findings().is_empty());
    assert_eq!(gateway.report_count(), 1);
}

#[tokio::test]
async fn erg_report_is_stored_under_report_url() {
    let gateway = Arc::new(InMemoryGateway::new());
    gateway.set_general_response(Ok(GeneralModelResponse {
        disease_name: "Normal Fundus".into(),
        confidence_score: 95.0,
        justification: "Normal a- and b-wave amplitudes".into(),
    }));
    let workflow = DiagnosisWorkflow::new(gateway.clone());

    let mut session = ready_session(&workflow, Modality::Erg).await;
    workflow.analyze(&mut session).await.unwrap();

    let report = session.report().unwrap();
    assert_eq!(report.result.severity(), Severity::Mild);
    assert!(report.image_url.is_none());
    let stored = gateway.report(&report.report_id).unwrap();
    assert!(stored.erg_report_url.is_some());
    assert!(stored.fundus_image_url.is_none());
}

#[tokio::test]
async fn persistence_failure_hides_result() {
    let gateway = Arc::new(InMemoryGateway::new());
    gateway.set_specialized_response(Ok(retinopathy(92.0)));
    gateway.fail_reports(Some(GatewayError::Status {
        status: 503,
        body: "maintenance".into(),
    }));
    let workflow = DiagnosisWorkflow::new(gateway.clone());

    let mut session = ready_session(&workflow, Modality::Fundus).await;
    let err = workflow.analyze(&mut session).await.unwrap_err();

    assert!(matches!(err, DiagnosisError::Persistence(_)));
    assert_eq!(session.step(), Step::ReadyToAnalyze);
    assert!(session.report().is_none());
    assert!(session.error().unwrap().contains("503"));
    assert!(session.progress() < 100);
}

#[tokio::test]
async fn replacing_asset_keeps_intake() {
    let gateway = Arc::new(InMemoryGateway::new());
    let workflow = DiagnosisWorkflow::new(gateway.clone());

    let mut session = ready_session(&workflow, Modality::Fundus).await;
    let intake_before = session.intake().cloned();
    let first = session.asset().unwrap().reference.clone();

    workflow.upload(&mut session, fundus("second.jpg")).await.unwrap();
    let second = session.asset().unwrap();

    assert_ne!(second.reference, first);
    assert_eq!(second.file_name, "second.jpg");
    assert_eq!(session.intake().cloned(), intake_before);
    assert_eq!(session.step(), Step::ReadyToAnalyze);
    assert_eq!(gateway.upload_count(), 2);
}

#[tokio::test]
async fn failed_replacement_keeps_previous_asset() {
    let gateway = Arc::new(InMemoryGateway::new());
    let workflow = DiagnosisWorkflow::new(gateway.clone());

    let mut session = ready_session(&workflow, Modality::Fundus).await;
    let first = session.asset().cloned();

    gateway.fail_uploads(Some(GatewayError::Rejected("unsupported format".into())));
    assert!(workflow.upload(&mut session, fundus("bad.tiff")).await.is_err());

    assert_eq!(session.asset().cloned(), first);
    assert_eq!(session.step(), Step::ReadyToAnalyze);
    assert!(session.error().unwrap().contains("unsupported format"));
}

#[tokio::test]
async fn reset_returns_to_initial_state() {
    let gateway = Arc::new(InMemoryGateway::new());
    gateway.set_specialized_response(Ok(retinopathy(92.0)));
    let workflow = DiagnosisWorkflow::new(gateway);

    let mut session = ready_session(&workflow, Modality::Fundus).await;
    workflow.analyze(&mut session).await.unwrap();
    assert_eq!(session.step(), Step::Complete);

    workflow.reset(&mut session);
    assert_eq!(session.step(), Step::Intake);
    assert!(session.intake().is_none());
    assert!(session.asset().is_none());
    assert!(session.report().is_none());
    assert!(session.error().is_none());
    assert_eq!(session.progress(), 0);
}

#[tokio::test]
async fn analyze_is_rejected_outside_ready_step() {
    let workflow = DiagnosisWorkflow::new(Arc::new(InMemoryGateway::new()));
    let mut session = WorkflowSession::with_random_id(Modality::Fundus);
    workflow.submit_intake(&mut session, jane()).unwrap();

    let err = workflow.analyze(&mut session).await.unwrap_err();
    assert!(matches!(
        err,
        DiagnosisError::InvalidTransition { step: Step::Acquisition, .. }
    ));
    assert!(session.error().is_none());
}

/// Gateway whose specialized model (and optionally uploads) blocks until released.
struct GatedGateway {
    inner: InMemoryGateway,
    release: Notify,
    hold_uploads: bool,
}

fn gated(hold_uploads: bool) -> Arc<GatedGateway> {
    let gateway = Arc::new(GatedGateway {
        inner: InMemoryGateway::new(),
        release: Notify::new(),
        hold_uploads,
    });
    gateway.inner.set_specialized_response(Ok(retinopathy(92.0)));
    gateway
}

async fn wait_until_idle(runner: &FlowRunner, id: &str) {
    while runner.is_busy(id) {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[async_trait]
impl RemoteDataGateway for GatedGateway {
    async fn create_patient(&self, intake: &IntakeRecord) -> GatewayResult<PatientId> {
        self.inner.create_patient(intake).await
    }

    async fn list_disease_catalog(&self) -> GatewayResult<Vec<DiseaseInfo>> {
        self.inner.list_disease_catalog().await
    }

    async fn upload_file(&self, file: FileUpload) -> GatewayResult<AssetReference> {
        if self.hold_uploads {
            self.release.notified().await;
        }
        self.inner.upload_file(file).await
    }

    async fn invoke_specialized_model(
        &self,
        asset: &AssetReference,
        intake: &IntakeRecord,
    ) -> GatewayResult<SpecializedModelResponse> {
        self.release.notified().await;
        self.inner.invoke_specialized_model(asset, intake).await
    }

    async fn invoke_general_model(
        &self,
        request: GeneralModelRequest,
    ) -> GatewayResult<GeneralModelResponse> {
        self.inner.invoke_general_model(request).await
    }

    async fn create_report(&self, report: &NewReport) -> GatewayResult<ReportId> {
        self.inner.create_report(report).await
    }
}

#[tokio::test]
async fn runner_rejects_second_action_while_analysis_runs() {
    let gateway = gated(false);
    let workflow = Arc::new(DiagnosisWorkflow::new(gateway.clone()));
    let runner = FlowRunner::new(workflow, Arc::new(InMemorySessionStorage::new()));

    let id = runner.start(Modality::Fundus).await.unwrap().id;
    runner.run(&id, WorkflowAction::SubmitIntake(jane())).await.unwrap();
    runner
        .run(&id, WorkflowAction::Upload(fundus("eye.jpg")))
        .await
        .unwrap();

    let background = {
        let runner = runner.clone();
        let id = id.clone();
        tokio::spawn(async move { runner.run(&id, WorkflowAction::Analyze).await })
    };

    while !runner.is_busy(&id) {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let progress = runner.progress(&id).unwrap();
    assert!(progress < 100);

    let err = runner.run(&id, WorkflowAction::Analyze).await.unwrap_err();
    assert_eq!(err, DiagnosisError::SessionBusy(id.clone()));

    gateway.release.notify_one();
    let session = background.await.unwrap().unwrap();
    assert_eq!(session.step(), Step::Complete);
    assert!(!runner.is_busy(&id));
    assert_eq!(gateway.inner.report_count(), 1);
}

#[tokio::test]
async fn dropped_caller_does_not_cancel_analysis() {
    let gateway = gated(false);
    let workflow = Arc::new(DiagnosisWorkflow::new(gateway.clone()));
    let runner = FlowRunner::new(workflow, Arc::new(InMemorySessionStorage::new()));

    let id = runner.start(Modality::Fundus).await.unwrap().id;
    runner.run(&id, WorkflowAction::SubmitIntake(jane())).await.unwrap();
    runner
        .run(&id, WorkflowAction::Upload(fundus("eye.jpg")))
        .await
        .unwrap();

    let attempt = runner.run(&id, WorkflowAction::Analyze);
    let abandoned = tokio::time::timeout(Duration::from_millis(50), attempt).await;
    assert!(abandoned.is_err());
    assert!(runner.is_busy(&id));

    gateway.release.notify_one();
    wait_until_idle(&runner, &id).await;

    let stored = runner.load(&id).await.unwrap();
    assert_eq!(stored.step(), Step::Complete);
    assert!(stored.report().is_some());
    assert_eq!(gateway.inner.report_count(), 1);
    assert_eq!(gateway.inner.patient_count(), 1);
}

#[tokio::test]
async fn upload_in_flight_reports_no_analysis_progress() {
    let gateway = gated(true);
    let workflow = Arc::new(DiagnosisWorkflow::new(gateway.clone()));
    let runner = FlowRunner::new(workflow, Arc::new(InMemorySessionStorage::new()));

    let id = runner.start(Modality::Fundus).await.unwrap().id;
    runner.run(&id, WorkflowAction::SubmitIntake(jane())).await.unwrap();

    let background = {
        let runner = runner.clone();
        let id = id.clone();
        tokio::spawn(async move {
            runner
                .run(&id, WorkflowAction::Upload(fundus("eye.jpg")))
                .await
        })
    };

    while !runner.is_busy(&id) {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(runner.progress(&id), None);

    gateway.release.notify_one();
    let session = background.await.unwrap().unwrap();
    assert_eq!(session.step(), Step::ReadyToAnalyze);
}
