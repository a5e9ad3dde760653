mod common;

use std::sync::Arc;
use assert_matches::assert_matches;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use common::*;
use consultation_cell::*;
use network_monitor_cell::{NetworkMonitorService, ScriptedNetworkProbe};
use shared_utils::test_utils::TestConfig;
use sync_batcher_cell::{decode_batch, HttpRecordStore, PayloadEncoding, ResourceSyncBatcher};

fn text(value: &str) -> StepResponse {
    StepResponse::Text(value.to_string())
}

fn choice(value: &str) -> StepResponse {
    StepResponse::Choice(value.to_string())
}

#[tokio::test]
async fn test_structured_start_delivers_first_prompt() {
    let h = harness(&[1500.0]);

    let structured = h
        .orchestrator
        .start_structured(options(), GENERAL_INTAKE)
        .await
        .unwrap();

    assert_eq!(structured.current().unwrap().id, "chief-complaint");
    assert!(!structured.is_complete());

    let session = h.session().await;
    assert_eq!(session.mode, ConsultationMode::Text);
    assert_eq!(session.template_id.as_deref(), Some(GENERAL_INTAKE));
    assert_eq!(structured.session_id, session.id);

    let delivered = h.chat.delivered().await;
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].step_id.as_deref(), Some("chief-complaint"));
    assert_eq!(delivered[0].body, "What brings you in today?");
}

#[tokio::test]
async fn test_unknown_template_is_rejected() {
    let h = harness(&[1500.0]);

    let err = h
        .orchestrator
        .start_structured(options(), "no-such-template")
        .await
        .unwrap_err();

    assert_eq!(err.code(), "STRUCTURED_CONSULTATION_FAILED");
    assert!(h.orchestrator.get_current_session().await.is_none());
}

#[tokio::test]
async fn test_chat_outage_fails_structured_start() {
    let h = harness(&[1500.0]);
    h.chat.fail_next_starts(1).await;

    let err = h
        .orchestrator
        .start_structured(options(), FOLLOW_UP_CHECK)
        .await
        .unwrap_err();

    assert_eq!(err.code(), "STRUCTURED_CONSULTATION_FAILED");
    assert_eq!(h.session().await.status, SessionStatus::Failed);
}

#[tokio::test]
async fn test_full_intake_walkthrough() {
    let h = harness(&[1500.0]);
    h.orchestrator.start_structured(options(), GENERAL_INTAKE).await.unwrap();
    let o = &h.orchestrator;

    o.record_step_response("chief-complaint", text("Persistent cough")).await.unwrap();
    o.record_step_response("symptom-duration-days", StepResponse::Number(4.0)).await.unwrap();
    o.record_step_response("pain-level", StepResponse::Number(3.0)).await.unwrap();
    o.record_step_response("has-fever", StepResponse::YesNo(false)).await.unwrap();

    let progress = o.skip_step().await.unwrap();
    assert_eq!(progress.current().unwrap().id, "severity");
    assert!(progress.response_for("current-medications").is_none());

    let done = o.record_step_response("severity", choice("moderate")).await.unwrap();
    assert!(done.is_complete());
    assert!(done.current().is_none());
    assert_eq!(done.responses.len(), 6);
    assert_eq!(done.response_for("has-fever"), Some(&StepResponse::YesNo(false)));

    // one prompt per step
    let prompts: Vec<_> = h
        .chat
        .delivered()
        .await
        .into_iter()
        .filter_map(|m| m.step_id)
        .collect();
    assert_eq!(
        prompts,
        vec![
            "chief-complaint",
            "symptom-duration-days",
            "pain-level",
            "has-fever",
            "current-medications",
            "severity"
        ]
    );

    let err = o.record_step_response("severity", choice("mild")).await.unwrap_err();
    assert_eq!(err.code(), "INVALID_STEP_RESPONSE");

    let session = o.get_current_session().await.unwrap();
    o.end_session().await.unwrap();

    let encounter = h
        .store
        .resource("Encounter", &format!("encounter-{}", session.id))
        .await
        .unwrap();
    assert_eq!(encounter["structured"]["template_id"], GENERAL_INTAKE);
    assert_eq!(encounter["structured"]["completed"], true);
    assert_eq!(encounter["structured"]["responses"].as_array().unwrap().len(), 6);
}

#[tokio::test]
async fn test_invalid_answers_do_not_advance() {
    let h = harness(&[1500.0]);
    h.orchestrator.start_structured(options(), GENERAL_INTAKE).await.unwrap();
    let o = &h.orchestrator;

    let err = o.record_step_response("chief-complaint", text("  ")).await.unwrap_err();
    assert_matches!(err, ConsultationError::InvalidStepResponse { ref step_id, .. } if step_id == "chief-complaint");

    let err = o.record_step_response("pain-level", StepResponse::Number(2.0)).await.unwrap_err();
    assert_eq!(err.code(), "INVALID_STEP_RESPONSE");
    assert!(err.to_string().contains("chief-complaint"));

    o.record_step_response("chief-complaint", text("Headache")).await.unwrap();
    o.record_step_response("symptom-duration-days", StepResponse::Number(1.0)).await.unwrap();

    let err = o.record_step_response("pain-level", StepResponse::Number(11.0)).await.unwrap_err();
    assert_eq!(err.code(), "INVALID_STEP_RESPONSE");

    let err = o.skip_step().await.unwrap_err();
    assert!(err.to_string().contains("cannot be skipped"));

    let progress = o.get_structured().await.unwrap();
    assert_eq!(progress.current().unwrap().id, "pain-level");
    assert_eq!(progress.responses.len(), 2);
}

#[tokio::test]
async fn test_steps_need_an_active_session() {
    let h = harness(&[1500.0]);
    h.orchestrator.start_structured(options(), FOLLOW_UP_CHECK).await.unwrap();

    h.orchestrator.pause_session().await.unwrap();
    let err = h
        .orchestrator
        .record_step_response("symptoms-improved", StepResponse::YesNo(true))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_SESSION_STATE");

    h.orchestrator.resume_session().await.unwrap();
    h.orchestrator
        .record_step_response("symptoms-improved", StepResponse::YesNo(true))
        .await
        .unwrap();

    h.orchestrator.end_session().await.unwrap();
    let err = h
        .orchestrator
        .record_step_response("adherence", choice("fully"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NO_ACTIVE_SESSION");
}

#[tokio::test]
async fn test_plain_text_session_has_no_template() {
    let h = harness(&[1500.0]);
    h.orchestrator.start_text(options()).await.unwrap();

    let err = h
        .orchestrator
        .record_step_response("chief-complaint", text("Cough"))
        .await
        .unwrap_err();

    assert_eq!(err.code(), "STRUCTURED_CONSULTATION_FAILED");
    assert!(h.orchestrator.get_structured().await.is_none());
}

#[tokio::test]
async fn test_custom_template_with_trailing_optional_steps() {
    let h = harness(&[1500.0]);
    h.orchestrator
        .register_template(ConsultationTemplate {
            id: "wound-check".to_string(),
            name: "Wound check".to_string(),
            steps: vec![
                TemplateStep::required("healing", "Is the wound healing?", ResponseKind::YesNo),
                TemplateStep::optional("photo-notes", "Describe how it looks.", ResponseKind::FreeText),
            ],
        })
        .await
        .unwrap();

    h.orchestrator.start_structured(options(), "wound-check").await.unwrap();
    h.orchestrator
        .record_step_response("healing", StepResponse::YesNo(true))
        .await
        .unwrap();
    let done = h.orchestrator.skip_step().await.unwrap();

    assert!(done.is_complete());
    assert_eq!(done.responses[1].response, None);
}

#[tokio::test]
async fn test_invalid_template_is_not_registered() {
    let h = harness(&[1500.0]);

    let err = h
        .orchestrator
        .register_template(ConsultationTemplate {
            id: "empty".to_string(),
            name: "Empty".to_string(),
            steps: vec![],
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), "STRUCTURED_CONSULTATION_FAILED");

    let err = h.orchestrator.start_structured(options(), "empty").await.unwrap_err();
    assert_eq!(err.code(), "STRUCTURED_CONSULTATION_FAILED");
}

#[tokio::test]
async fn test_summary_reaches_http_record_store() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/batch"))
        .respond_with(|request: &Request| {
            let encoding = match request.headers.get("content-encoding") {
                Some(_) => PayloadEncoding::Bzip2,
                None => PayloadEncoding::Identity,
            };
            let envelope = decode_batch(&request.body, encoding).unwrap();
            let results: Vec<_> = envelope
                .operations
                .iter()
                .map(|op| json!({ "operation_id": op.operation_id, "status_code": 201 }))
                .collect();
            ResponseTemplate::new(200).set_body_json(json!({ "results": results }))
        })
        .mount(&mock_server)
        .await;

    let test_config = TestConfig::default();
    let config = test_config.to_telehealth_config();
    let monitor = Arc::new(NetworkMonitorService::new(
        &config,
        Arc::new(ScriptedNetworkProbe::from_bandwidths(&[1500.0])),
    ));
    let store = Arc::new(HttpRecordStore::new(&test_config.to_app_config(&mock_server.uri())).unwrap());
    let batcher = Arc::new(ResourceSyncBatcher::new(&config, store, monitor.clone()));
    let orchestrator = ConsultationOrchestrator::new(
        config,
        monitor.clone(),
        batcher.clone(),
        Arc::new(SimulatedVideoTransport::new()),
        Arc::new(SimulatedChatTransport::new()),
    )
    .unwrap();

    monitor.sample_now().await;
    orchestrator.start_structured(options(), FOLLOW_UP_CHECK).await.unwrap();
    orchestrator
        .record_step_response("symptoms-improved", StepResponse::YesNo(true))
        .await
        .unwrap();
    let ended = orchestrator.end_session().await.unwrap();

    let summary_op = format!("encounter-summary-{}", ended.id);
    assert!(!batcher.pending_operation_ids().await.contains(&summary_op));

    let requests = mock_server.received_requests().await.unwrap();
    let summary = requests
        .iter()
        .flat_map(|request| {
            let encoding = match request.headers.get("content-encoding") {
                Some(_) => PayloadEncoding::Bzip2,
                None => PayloadEncoding::Identity,
            };
            decode_batch(&request.body, encoding).unwrap().operations
        })
        .find(|op| op.operation_id == summary_op)
        .expect("summary posted to the record store");

    let payload = summary.payload.unwrap();
    assert_eq!(payload["structured"]["template_id"], FOLLOW_UP_CHECK);
    assert_eq!(payload["structured"]["completed"], false);
    assert_eq!(payload["subject"], "patient-1");
}
