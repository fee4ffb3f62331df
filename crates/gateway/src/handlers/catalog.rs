//! Course and student passthrough handlers
//!
//! List routes degrade to an empty list with `success: false` when the
//! backend cannot be reached, so the UI can still render its forms.

use axum::{extract::rejection::JsonRejection, extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::handlers::json_body;
use crate::AppState;
use coursedesk_common::{
    backend::StudentWrite,
    enrollment::{Course, StudentForm, StudentRecord},
    errors::Result,
};

#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub success: bool,
    pub data: Vec<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ListResponse<T> {
    fn ok(data: Vec<T>) -> Self {
        Self {
            success: true,
            data,
            message: None,
        }
    }

    fn unavailable(message: &str) -> Self {
        Self {
            success: false,
            data: Vec::new(),
            message: Some(message.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StudentResponse {
    pub success: bool,
    pub message: String,
    pub data: StudentRecord,
}

/// List courses from the backend
pub async fn list_courses(State(state): State<AppState>) -> Json<ListResponse<Course>> {
    match state.backend.list_courses().await {
        Ok(courses) => Json(ListResponse::ok(courses)),
        Err(e) => {
            tracing::warn!(error = %e, "Course list unavailable");
            Json(ListResponse::unavailable("No fue posible obtener la lista de cursos"))
        }
    }
}

/// List students from the backend
pub async fn list_students(State(state): State<AppState>) -> Json<ListResponse<StudentRecord>> {
    match state.backend.list_students().await {
        Ok(students) => Json(ListResponse::ok(students)),
        Err(e) => {
            tracing::warn!(error = %e, "Student list unavailable");
            Json(ListResponse::unavailable("No fue posible obtener la lista de alumnos"))
        }
    }
}

/// Create a student upstream; an existing student is reported with 200
pub async fn create_student(
    State(state): State<AppState>,
    payload: std::result::Result<Json<StudentForm>, JsonRejection>,
) -> Result<(StatusCode, Json<StudentResponse>)> {
    let student = json_body(payload)?.into_student()?;

    let (status, message) = match state.backend.create_student(&student).await? {
        StudentWrite::Created => (StatusCode::CREATED, "Alumno registrado correctamente"),
        StudentWrite::AlreadyExists => (StatusCode::OK, "El alumno ya estaba registrado"),
    };
    tracing::info!(curp = %student.identity_code, status = status.as_u16(), "Student create forwarded");

    Ok((
        status,
        Json(StudentResponse {
            success: true,
            message: message.to_string(),
            data: StudentRecord::from(&student),
        }),
    ))
}
