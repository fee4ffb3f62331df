//! BackendClient against an in-process stub backend
//!
//! Each test binds a throwaway axum server on an ephemeral port and points
//! the client at it.

use axum::{
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use coursedesk_common::{
    backend::{BackendApi, BackendClient, Credentials, LoginOutcome, RelationWrite, StudentWrite},
    config::{BackendConfig, EndpointMode, EnrollmentEndpointConfig},
    enrollment::{EnrollmentForm, NewStudent},
    AppError,
};
use serde_json::{json, Value};
use std::time::Duration;

async fn spawn_stub(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

fn client(base_url: &str, mode: EndpointMode, timeout_secs: u64) -> BackendClient {
    BackendClient::new(&BackendConfig {
        base_url: base_url.to_string(),
        timeout_secs,
        enrollment_endpoint: EnrollmentEndpointConfig {
            mode,
            path: "/api/inscripciones".to_string(),
        },
    })
    .unwrap()
}

fn student() -> NewStudent {
    let form: EnrollmentForm = serde_json::from_value(json!({
        "curp": "ABCD900101HDFXXX01",
        "nombre": "Juan",
        "apellidoPaterno": "Pérez",
        "cursoId": 5,
    }))
    .unwrap();
    form.into_request().unwrap().student
}

#[tokio::test]
async fn test_course_list_is_normalized() {
    let router = Router::new().route(
        "/api/cursos",
        get(|| async {
            Json(json!({
                "data": [
                    { "id_curso": "5", "nombre_curso": "Seguridad Industrial", "costo": "1500.50" },
                    { "idCurso": 7, "Nombre": "Primeros Auxilios", "sede": "Saltillo" },
                    { "sin_id": true }
                ]
            }))
        }),
    );
    let base = spawn_stub(router).await;
    let backend = client(&base, EndpointMode::Disabled, 5);

    let courses = backend.list_courses().await.unwrap();
    assert_eq!(courses.len(), 2);
    assert_eq!(courses[0].id, 5);
    assert_eq!(courses[0].name, "Seguridad Industrial");
    assert_eq!(courses[0].fee, Some(1500.5));
    assert_eq!(courses[1].location.as_deref(), Some("Saltillo"));

    let found = backend.find_course(7).await.unwrap().unwrap();
    assert_eq!(found.name, "Primeros Auxilios");
    assert!(backend.find_course(9999).await.unwrap().is_none());
}

#[tokio::test]
async fn test_student_list_accepts_bare_array() {
    let router = Router::new().route(
        "/api/alumnos",
        get(|| async {
            Json(json!([
                { "CURP": "ABCD900101HDFXXX01", "nombres": "Juan", "apellido_paterno": "Pérez" }
            ]))
        }),
    );
    let base = spawn_stub(router).await;
    let backend = client(&base, EndpointMode::Disabled, 5);

    let found = backend
        .find_student("abcd900101hdfxxx01")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.given_name, "Juan");
    assert_eq!(found.paternal_surname, "Pérez");
}

#[tokio::test]
async fn test_create_student_duplicate_answers() {
    let router = Router::new()
        .route(
            "/api/alumnos",
            post(|Json(body): Json<Value>| async move {
                match body["nombre"].as_str() {
                    Some("Juan") => (StatusCode::CONFLICT, "conflict".to_string()),
                    _ => (StatusCode::CREATED, "{}".to_string()),
                }
            }),
        );
    let base = spawn_stub(router).await;
    let backend = client(&base, EndpointMode::Disabled, 5);

    assert_eq!(
        backend.create_student(&student()).await.unwrap(),
        StudentWrite::AlreadyExists
    );

    let mut other = student();
    other.given_name = "Ana".to_string();
    assert_eq!(
        backend.create_student(&other).await.unwrap(),
        StudentWrite::Created
    );
}

#[tokio::test]
async fn test_duplicate_reported_as_server_error() {
    let router = Router::new().route(
        "/api/alumnos",
        post(|| async {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                r#"{"error":"duplicate key value violates unique constraint \"alumnos_pkey\""}"#,
            )
        }),
    );
    let base = spawn_stub(router).await;
    let backend = client(&base, EndpointMode::Disabled, 5);

    assert_eq!(
        backend.create_student(&student()).await.unwrap(),
        StudentWrite::AlreadyExists
    );
}

#[tokio::test]
async fn test_probe_detects_missing_relation_endpoint() {
    let base = spawn_stub(Router::new().route("/api/cursos", get(|| async { "[]" }))).await;
    let backend = client(&base, EndpointMode::Probe, 5);

    assert!(!backend.supports_enrollment_relation().await);
    // Cached answer
    assert!(!backend.supports_enrollment_relation().await);
}

#[tokio::test]
async fn test_probe_detects_relation_endpoint() {
    let router = Router::new().route(
        "/api/inscripciones",
        post(|Json(body): Json<Value>| async move {
            if body["curp"] == "ABCD900101HDFXXX01" && body["curso_id"] == 5 {
                (StatusCode::CONFLICT, "ya existe")
            } else {
                (StatusCode::CREATED, "{}")
            }
        }),
    );
    let base = spawn_stub(router).await;
    let backend = client(&base, EndpointMode::Probe, 5);

    assert!(backend.supports_enrollment_relation().await);
    assert_eq!(
        backend
            .create_enrollment("ABCD900101HDFXXX01", 5)
            .await
            .unwrap(),
        RelationWrite::AlreadyExists
    );
    assert_eq!(
        backend
            .create_enrollment("ABCD900101HDFXXX01", 6)
            .await
            .unwrap(),
        RelationWrite::Created
    );
}

#[tokio::test]
async fn test_disabled_mode_never_probes() {
    let backend = client("http://127.0.0.1:9", EndpointMode::Disabled, 1);
    assert!(!backend.supports_enrollment_relation().await);

    let backend = client("http://127.0.0.1:9", EndpointMode::Enabled, 1);
    assert!(backend.supports_enrollment_relation().await);
}

#[tokio::test]
async fn test_slow_backend_times_out() {
    let router = Router::new().route(
        "/api/cursos",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(3)).await;
            "[]"
        }),
    );
    let base = spawn_stub(router).await;
    let backend = client(&base, EndpointMode::Disabled, 1);

    let err = backend.list_courses().await.unwrap_err();
    assert!(matches!(err, AppError::UpstreamTimeout { .. }), "{:?}", err);
    assert!(err.is_unavailable());
}

#[tokio::test]
async fn test_unreachable_backend_is_unavailable() {
    // Nothing listens on the discard port
    let backend = client("http://127.0.0.1:9", EndpointMode::Disabled, 1);
    let err = backend.list_students().await.unwrap_err();
    assert!(err.is_unavailable(), "{:?}", err);
}

#[tokio::test]
async fn test_login_outcomes() {
    let router = Router::new().route(
        "/api/auth/login",
        post(|Json(body): Json<Value>| async move {
            if body["usuario"] == "admin" && body["password"] == "secreto" {
                (StatusCode::OK, Json(json!({ "token": "abc" })))
            } else {
                (StatusCode::UNAUTHORIZED, Json(json!({ "error": "invalid" })))
            }
        }),
    );
    let base = spawn_stub(router).await;
    let backend = client(&base, EndpointMode::Disabled, 5);

    let accepted = backend
        .login(&Credentials {
            account: "admin".to_string(),
            password: "secreto".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(accepted, LoginOutcome::Accepted(json!({ "token": "abc" })));

    let rejected = backend
        .login(&Credentials {
            account: "admin".to_string(),
            password: "otra".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(rejected, LoginOutcome::Rejected);
}
