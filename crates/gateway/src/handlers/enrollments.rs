//! Enrollment handler

use axum::{extract::rejection::JsonRejection, extract::State, Json};
use serde::Serialize;

use crate::handlers::json_body;
use crate::AppState;
use coursedesk_common::{
    enrollment::{EnrollmentForm, EnrollmentOutcome, EnrollmentReceipt, ManualInstructions},
    errors::Result,
};

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum EnrollmentData {
    Receipt(EnrollmentReceipt),
    Manual(ManualInstructions),
}

/// Body returned for every non-error enrollment result
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentResponse {
    pub success: bool,
    pub message: String,
    pub outcome: &'static str,
    pub requires_manual_action: bool,
    pub data: EnrollmentData,
}

impl From<EnrollmentOutcome> for EnrollmentResponse {
    fn from(outcome: EnrollmentOutcome) -> Self {
        let label = outcome.label();
        match outcome {
            EnrollmentOutcome::Enrolled(receipt) => Self {
                success: true,
                message: format!(
                    "{} quedó inscrito en {}",
                    receipt.student_name, receipt.course_name
                ),
                outcome: label,
                requires_manual_action: false,
                data: EnrollmentData::Receipt(receipt),
            },
            EnrollmentOutcome::StudentAlreadyExisted(receipt) => Self {
                success: true,
                message: format!(
                    "{} ya estaba registrado y quedó inscrito en {}",
                    receipt.student_name, receipt.course_name
                ),
                outcome: label,
                requires_manual_action: false,
                data: EnrollmentData::Receipt(receipt),
            },
            EnrollmentOutcome::ManualInterventionRequired(instructions) => Self {
                success: true,
                message: if instructions.student_registered {
                    "El alumno fue registrado, pero la inscripción debe completarse manualmente"
                } else {
                    "No se pudo confirmar el registro del alumno; la inscripción debe completarse manualmente"
                }
                .to_string(),
                outcome: label,
                requires_manual_action: true,
                data: EnrollmentData::Manual(instructions),
            },
        }
    }
}

/// Enroll a student in a course, creating the student upstream if needed
pub async fn enroll(
    State(state): State<AppState>,
    payload: std::result::Result<Json<EnrollmentForm>, JsonRejection>,
) -> Result<Json<EnrollmentResponse>> {
    let request = json_body(payload)?.into_request()?;

    tracing::info!(
        curp = %request.student.identity_code,
        course_id = request.course_id,
        "Enrollment requested"
    );

    let outcome = state.reconciler.enroll(&request).await?;
    Ok(Json(EnrollmentResponse::from(outcome)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use coursedesk_common::enrollment::ManualReason;

    fn manual(student_registered: bool) -> EnrollmentOutcome {
        EnrollmentOutcome::ManualInterventionRequired(ManualInstructions {
            student_name: "Juan Pérez".to_string(),
            identity_code: "ABC123".to_string(),
            course_id: 5,
            statement: "INSERT INTO inscripciones (alumno_curp, curso_id) VALUES ('ABC123', 5);"
                .to_string(),
            reason: ManualReason::StoreWriteFailed,
            student_registered,
        })
    }

    #[test]
    fn test_manual_message_follows_student_status() {
        let confirmed = EnrollmentResponse::from(manual(true));
        assert!(confirmed.requires_manual_action);
        assert!(confirmed.message.contains("fue registrado"));

        let unconfirmed = EnrollmentResponse::from(manual(false));
        assert!(unconfirmed.requires_manual_action);
        assert!(!unconfirmed.message.contains("fue registrado"));
        assert!(unconfirmed.message.contains("manualmente"));
    }
}
