//! The two inference paths and how their answers are normalized into an
//! [`AnalysisResult`].

use serde_json::{Value, json};
use tracing::{info, warn};

use crate::analysis::{AnalysisRequest, AnalysisResult, AnalysisStrategy, Modality, ResultDraft};
use crate::error::{DiagnosisError, Result};
use crate::gateway::{
    DiseaseInfo, GeneralModelRequest, GeneralModelResponse, RemoteDataGateway,
    SpecializedModelResponse,
};
use crate::intake::IntakeRecord;
use crate::progress::ProgressHandle;
use crate::severity::SeverityPolicy;

/// Progress shown once the request has been sent to a model.
pub const PROGRESS_DISPATCHED: u8 = 30;
/// Progress shown once the model has answered.
pub const PROGRESS_CLASSIFIED: u8 = 70;

/// Used when the specialized model answers without recommendations.
pub const DEFAULT_RECOMMENDATIONS: &str =
    "Consult an ophthalmologist for a comprehensive eye examination.";
/// Used when the specialized model answers without findings or a description.
pub const DEFAULT_FINDINGS: &str = "No additional findings reported.";

pub(crate) async fn run(
    gateway: &dyn RemoteDataGateway,
    policy: &SeverityPolicy,
    request: &AnalysisRequest,
    progress: &ProgressHandle,
) -> Result<AnalysisResult> {
    info!(
        strategy = %request.strategy,
        modality = %request.modality,
        file_url = %request.asset.reference.file_url,
        "Dispatching analysis"
    );

    match request.strategy {
        AnalysisStrategy::Specialized => {
            progress.advance_to(PROGRESS_DISPATCHED);
            let response = gateway
                .invoke_specialized_model(&request.asset.reference, &request.intake)
                .await
                .map_err(|e| DiagnosisError::Inference(format!("ML analysis failed: {e}")))?;
            progress.advance_to(PROGRESS_CLASSIFIED);
            normalize_specialized(response)
        }
        AnalysisStrategy::General => {
            let catalog = gateway.list_disease_catalog().await.map_err(|e| {
                DiagnosisError::Inference(format!("Could not load disease catalog: {e}"))
            })?;
            if catalog.is_empty() {
                return Err(DiagnosisError::Inference(
                    "Disease catalog is empty".to_string(),
                ));
            }

            progress.advance_to(PROGRESS_DISPATCHED);
            let names: Vec<&str> = catalog.iter().map(|d| d.name.as_str()).collect();
            let model_request = GeneralModelRequest {
                modality: request.modality,
                prompt: build_prompt(&request.intake, request.modality, &names),
                file_urls: vec![request.asset.reference.file_url.clone()],
                response_json_schema: output_schema(&names),
            };
            let response = gateway
                .invoke_general_model(model_request)
                .await
                .map_err(|e| DiagnosisError::Inference(format!("LLM analysis failed: {e}")))?;
            progress.advance_to(PROGRESS_CLASSIFIED);
            normalize_general(response, &catalog, policy)
        }
    }
}

/// Turns a specialized model response into a result, failing with the
/// endpoint's own reason when it reports `success: false`.
pub fn normalize_specialized(response: SpecializedModelResponse) -> Result<AnalysisResult> {
    if !response.success {
        let reason = response
            .error
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| "ML analysis failed".to_string());
        warn!(reason = %reason, "Specialized model reported failure");
        return Err(DiagnosisError::Inference(reason));
    }

    let prediction = response
        .prediction
        .ok_or_else(|| DiagnosisError::IncompleteResult("model returned no prediction".into()))?;

    let detected_conditions = response
        .detected_conditions
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| vec![prediction.disease.clone()]);

    let recommendations = response
        .recommendations
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_RECOMMENDATIONS.to_string());
    let detailed_findings = response
        .detailed_findings
        .filter(|f| !f.trim().is_empty())
        .or_else(|| Some(prediction.description.clone()).filter(|d| !d.trim().is_empty()))
        .unwrap_or_else(|| DEFAULT_FINDINGS.to_string());

    AnalysisResult::new(ResultDraft {
        diagnosis: format!(
            "**ML Model Prediction: {}**\n\n{}",
            prediction.disease, prediction.description
        ),
        confidence_score: prediction.confidence_score,
        severity: prediction.severity,
        detected_conditions,
        recommendations,
        detailed_findings,
    })
}

/// Matches the general model's answer against the catalog and applies the
/// severity policy. A name outside the catalog fails the attempt.
pub fn normalize_general(
    response: GeneralModelResponse,
    catalog: &[DiseaseInfo],
    policy: &SeverityPolicy,
) -> Result<AnalysisResult> {
    let matched = match_catalog(catalog, &response.disease_name)?;
    let severity = policy.derive(&matched.name, response.confidence_score);

    info!(
        disease = %matched.name,
        confidence = response.confidence_score,
        severity = %severity,
        "General model classification matched catalog"
    );

    AnalysisResult::new(ResultDraft {
        diagnosis: format!(
            "**LLM Prediction: {}**\n\n{}",
            matched.name, matched.description
        ),
        confidence_score: response.confidence_score,
        severity,
        detected_conditions: vec![matched.name.clone()],
        recommendations: if matched.precaution.trim().is_empty() {
            DEFAULT_RECOMMENDATIONS.to_string()
        } else {
            matched.precaution.clone()
        },
        detailed_findings: response.justification,
    })
}

pub fn match_catalog<'a>(catalog: &'a [DiseaseInfo], disease_name: &str) -> Result<&'a DiseaseInfo> {
    let wanted = disease_name.trim().to_lowercase();
    catalog
        .iter()
        .find(|d| d.name.to_lowercase() == wanted)
        .ok_or_else(|| DiagnosisError::UnknownClassification(disease_name.to_string()))
}

pub fn build_prompt(intake: &IntakeRecord, modality: Modality, disease_names: &[&str]) -> String {
    let source = match modality {
        Modality::Fundus => "fundus image",
        Modality::Erg => "ERG data",
    };
    let history = if intake.medical_history().is_empty() {
        "No significant history provided".to_string()
    } else {
        intake.medical_history().to_string()
    };
    let symptoms = intake.symptom_summary();
    let symptoms = if symptoms.is_empty() {
        "No specific symptoms reported".to_string()
    } else {
        symptoms
    };

    format!(
        r#"You are an expert ophthalmologist AI. Your task is to analyze the provided {kind} and classify it into one of the following categories: {categories}.

Patient Context:
- Name: {name}
- Age: {age}
- Gender: {gender}
- Medical History: {history}
- Current Symptoms: {symptoms}

Based on the {source}, provide:
1. The most likely disease classification from the provided list.
2. A confidence score for your classification (0-100).
3. A detailed clinical analysis and justification for your choice."#,
        kind = modality.describe(),
        categories = disease_names.join(", "),
        name = intake.full_name(),
        age = intake.age(),
        gender = intake.gender(),
    )
}

/// JSON schema restricting the general model to a catalog name, a score and
/// a justification.
pub fn output_schema(disease_names: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": {
            "disease_name": { "type": "string", "enum": disease_names },
            "confidence_score": { "type": "number" },
            "justification": { "type": "string" }
        },
        "required": ["disease_name", "confidence_score", "justification"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Severity;
    use crate::gateway::{Prediction, default_disease_catalog};
    use crate::intake::IntakeForm;

    fn general(name: &str, confidence: f64) -> GeneralModelResponse {
        GeneralModelResponse {
            disease_name: name.to_string(),
            confidence_score: confidence,
            justification: "Microaneurysms in all quadrants".to_string(),
        }
    }

    #[test]
    fn specialized_failure_carries_reason() {
        let err = normalize_specialized(SpecializedModelResponse::failure("image too dark"))
            .unwrap_err();
        assert_eq!(err, DiagnosisError::Inference("image too dark".into()));
    }

    #[test]
    fn specialized_success_is_normalized() {
        let result = normalize_specialized(SpecializedModelResponse {
            success: true,
            prediction: Some(Prediction {
                disease: "Glaucoma".into(),
                description: "Optic nerve damage".into(),
                confidence_score: 88.0,
                severity: Severity::Moderate,
            }),
            detected_conditions: Some(vec!["Glaucoma".into(), "Cataract".into()]),
            recommendations: Some("Refer to glaucoma clinic".into()),
            detailed_findings: Some("Enlarged cup".into()),
            ..Default::default()
        })
        .unwrap();

        assert!(result.diagnosis().starts_with("**ML Model Prediction: Glaucoma**"));
        assert_eq!(result.detected_conditions(), ["Glaucoma", "Cataract"]);
        assert!(result.review_required());
    }

    #[test]
    fn specialized_minimal_answer_gets_fallbacks() {
        let response: SpecializedModelResponse = serde_json::from_value(json!({
            "success": true,
            "prediction": {
                "disease": "Diabetic Retinopathy",
                "confidence_score": 92,
                "severity": "severe"
            }
        }))
        .unwrap();

        let result = normalize_specialized(response).unwrap();
        assert_eq!(result.detected_conditions(), ["Diabetic Retinopathy"]);
        assert_eq!(result.recommendations(), DEFAULT_RECOMMENDATIONS);
        assert_eq!(result.detailed_findings(), DEFAULT_FINDINGS);
        assert!(result.review_required());
    }

    #[test]
    fn specialized_findings_fall_back_to_description() {
        let result = normalize_specialized(SpecializedModelResponse {
            success: true,
            prediction: Some(Prediction {
                disease: "Cataract".into(),
                description: "Lens opacity".into(),
                confidence_score: 80.0,
                severity: Severity::Mild,
            }),
            detailed_findings: Some("   ".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(result.detailed_findings(), "Lens opacity");
        assert!(!result.review_required());
    }

    #[test]
    fn general_match_is_case_insensitive() {
        let catalog = default_disease_catalog();
        let result =
            normalize_general(general("diabetic RETINOPATHY", 92.0), &catalog, &SeverityPolicy::default())
                .unwrap();
        assert_eq!(result.detected_conditions(), ["Diabetic Retinopathy"]);
        assert_eq!(result.severity(), Severity::Severe);
        assert!(result.diagnosis().starts_with("**LLM Prediction: Diabetic Retinopathy**"));
        assert_eq!(result.detailed_findings(), "Microaneurysms in all quadrants");
    }

    #[test]
    fn general_unknown_name_is_fatal() {
        let catalog = default_disease_catalog();
        let err = normalize_general(general("Retinal Detachment", 95.0), &catalog, &SeverityPolicy::default())
            .unwrap_err();
        assert_eq!(
            err,
            DiagnosisError::UnknownClassification("Retinal Detachment".into())
        );
    }

    #[test]
    fn prompt_embeds_catalog_and_intake() {
        let intake = IntakeForm {
            full_name: "Jane Doe".into(),
            age: Some(45),
            ..Default::default()
        }
        .validate()
        .unwrap();

        let prompt = build_prompt(&intake, Modality::Erg, &["Normal Fundus", "Glaucoma"]);
        assert!(prompt.contains("analyze the provided ERG report"));
        assert!(prompt.contains("categories: Normal Fundus, Glaucoma."));
        assert!(prompt.contains("- Name: Jane Doe"));
        assert!(prompt.contains("- Gender: Not specified"));
        assert!(prompt.contains("No specific symptoms reported"));

        let schema = output_schema(&["Normal Fundus", "Glaucoma"]);
        assert_eq!(
            schema["properties"]["disease_name"]["enum"],
            json!(["Normal Fundus", "Glaucoma"])
        );
    }
}
