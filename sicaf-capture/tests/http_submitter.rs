mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use image::RgbImage;

use common::*;
use sicaf_capture::config::ApiConfig;
use sicaf_capture::control::{ControlSubmitter, ControlType};
use sicaf_capture::error::Error;
use sicaf_capture::session::{SessionController, ValidationStep};
use sicaf_capture::settings::SettingsWatcher;
use sicaf_capture::submit::{AttendanceSubmitter, HttpSubmitter, PersonalId, RecordType, SubmitOutcome, Submission};

fn api(base_url: &str) -> ApiConfig {
    ApiConfig {
        base_url: base_url.to_string(),
        timeout_secs: 5.0,
    }
}

fn submission() -> Submission {
    Submission {
        descriptor: descriptor(),
        frame: RgbImage::new(16, 12),
        record_type: RecordType::EntradaTarde,
        captured_at: Utc::now(),
        settings: settings(true, 0.7),
    }
}

fn body_json(body: &str) -> serde_json::Value {
    serde_json::from_str(body).unwrap()
}

#[test]
fn test_match_posts_recognition_request() {
    let (base, server) = serve(vec![(
        200,
        r#"{"score": 0.91, "matched_personal_id": 17, "usuario": {"nombres": "Luis", "apellidos": "Mamani"}, "tipo": "ENTRADA_TARDE", "estado": "PUNTUAL", "fecha": "2025-03-04"}"#.into(),
    )]);

    let outcome = HttpSubmitter::new(&api(&base)).submit(&submission()).unwrap();
    let SubmitOutcome::Matched(result) = outcome else {
        panic!("expected a match");
    };
    assert_eq!(result.matched_personal_id, Some(PersonalId::Number(17)));
    assert_eq!(result.display_name().as_deref(), Some("Luis Mamani"));
    assert_eq!(result.match_percentage(), Some(91));

    let requests = server.join().unwrap();
    assert_eq!(requests[0].0, "POST /asistencia/realtime HTTP/1.1");
    let body = body_json(&requests[0].1);
    assert_eq!(body["tipo_registro"], "ENTRADA_TARDE");
    assert_eq!(body["embedding"].as_array().unwrap().len(), 128);
    assert!(body["imagen_base64"].as_str().unwrap().starts_with("data:image/jpeg;base64,"));
    assert!(body["marca_tiempo"].as_str().unwrap().ends_with('Z'));
    assert!(body.get("solo_validar").is_none());
}

#[test]
fn test_not_found_detail_becomes_no_match() {
    let (base, server) = serve(vec![(404, r#"{"detail": "Rostro no registrado"}"#.into())]);

    let outcome = HttpSubmitter::new(&api(&base)).submit(&submission()).unwrap();
    assert_eq!(outcome, SubmitOutcome::NoMatch { detail: Some("Rostro no registrado".into()) });
    server.join().unwrap();
}

#[test]
fn test_empty_success_body_is_no_match() {
    let (base, server) = serve(vec![(200, "{}".into())]);

    let outcome = HttpSubmitter::new(&api(&base)).submit(&submission()).unwrap();
    assert_eq!(outcome, SubmitOutcome::NoMatch { detail: None });
    server.join().unwrap();
}

#[test]
fn test_service_unavailable_is_server_error() {
    let (base, server) = serve(vec![(503, r#"{"detail": "Servicio en mantenimiento"}"#.into())]);

    match HttpSubmitter::new(&api(&base)).submit(&submission()) {
        Err(Error::Server { status, detail }) => {
            assert_eq!(status, 503);
            assert_eq!(detail, "Servicio en mantenimiento");
        }
        other => panic!("unexpected {:?}", other),
    }
    server.join().unwrap();
}

#[test]
fn test_unreachable_server_is_transport_error() {
    let result = HttpSubmitter::new(&api(&dead_url())).submit(&submission());
    assert!(matches!(result, Err(Error::Transport(_))));
}

#[test]
fn test_control_validates_then_registers() {
    let (base, server) = serve(vec![
        (200, r#"{"score": 0.87, "matched_personal_id": 17, "usuario": "Ana Quispe"}"#.into()),
        (200, r#"{"hora_registro": "08:01", "estado": "PUNTUAL"}"#.into()),
    ]);

    let submitter = ControlSubmitter::new(&api(&base), ControlType::Entrada, "JORNADA");
    let SubmitOutcome::Matched(result) = submitter.submit(&submission()).unwrap() else {
        panic!("expected a match");
    };
    assert_eq!(result.hora.as_deref(), Some("08:01"));
    assert_eq!(result.estado.as_deref(), Some("PUNTUAL"));

    let requests = server.join().unwrap();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].0, "POST /asistencia/realtime HTTP/1.1");
    assert_eq!(body_json(&requests[0].1)["solo_validar"], true);
    assert_eq!(requests[1].0, "POST /control-tiempo/registrar HTTP/1.1");
    assert_eq!(
        body_json(&requests[1].1),
        serde_json::json!({"personal_id": 17, "tipo_registro": "ENTRADA", "categoria": "JORNADA"})
    );
}

#[test]
fn test_control_rejection_is_no_match() {
    let (base, server) = serve(vec![
        (200, r#"{"score": 0.87, "matched_personal_id": "P-017"}"#.into()),
        (409, r#"{"detail": "Registro duplicado"}"#.into()),
    ]);

    let submitter = ControlSubmitter::new(&api(&base), ControlType::Salida, "ALMUERZO");
    let outcome = submitter.submit(&submission()).unwrap();
    assert_eq!(outcome, SubmitOutcome::NoMatch { detail: Some("Registro duplicado".into()) });

    let requests = server.join().unwrap();
    assert_eq!(body_json(&requests[1].1)["personal_id"], "P-017");
}

#[test]
fn test_control_skips_registration_without_match() {
    let (base, server) = serve(vec![(404, r#"{"detail": "Rostro no registrado"}"#.into())]);

    let submitter = ControlSubmitter::new(&api(&base), ControlType::Entrada, "JORNADA");
    let outcome = submitter.submit(&submission()).unwrap();
    assert_eq!(outcome, SubmitOutcome::NoMatch { detail: Some("Rostro no registrado".into()) });
    assert_eq!(server.join().unwrap().len(), 1);
}

#[tokio::test]
async fn test_session_against_rejecting_server() {
    let (base, server) = serve(vec![(404, "{}".into())]);
    let model = ScriptedModel::new(vec![face(0.0), None]);
    let controller = SessionController::new(
        camera_manager(FakeCamera::new(false)),
        Arc::new(HttpSubmitter::new(&api(&base))),
        SettingsWatcher::fixed(settings(false, 0.7)),
        options(),
    );

    controller.initialize(Arc::new(FakeLoader { model: Some(model) })).await;
    controller.start_camera().await.unwrap();

    let mut rx = controller.subscribe();
    let snapshot = tokio::time::timeout(
        Duration::from_secs(10),
        rx.wait_for(|s| s.step == ValidationStep::NoMatch),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();
    assert_eq!(snapshot.message, "No se encontró coincidencia");

    controller.shutdown().await;
    assert_eq!(server.join().unwrap().len(), 1);
}
