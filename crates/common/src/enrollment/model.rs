//! Student, course and enrollment types shared by the gateway, the backend
//! client and the data store.

use crate::errors::{AppError, Result};
use chrono::NaiveDate;
use regex_lite::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::OnceLock;
use validator::{Validate, ValidationError, ValidationErrors};

/// Longest identity code accepted (CURP length)
pub const IDENTITY_CODE_MAX_LEN: usize = 18;

fn identity_code_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Z0-9]{1,18}$").expect("identity code pattern is valid")
    })
}

/// Uppercase and trim an identity code so every lookup and write agrees on it
pub fn normalize_identity_code(raw: &str) -> String {
    raw.trim().to_uppercase()
}

// ============================================================================
// Wire forms
// ============================================================================

/// Student fields as submitted by the UI
#[derive(Debug, Default, Clone, Deserialize, Validate)]
pub struct StudentForm {
    #[serde(default, rename = "curp")]
    #[validate(custom(function = "non_blank"))]
    pub identity_code: String,

    #[serde(default, rename = "nombre")]
    #[validate(custom(function = "non_blank"))]
    pub given_name: String,

    #[serde(default, rename = "apellidoPaterno", alias = "apellido_paterno")]
    #[validate(custom(function = "non_blank"))]
    pub paternal_surname: String,

    #[serde(default, rename = "apellidoMaterno", alias = "apellido_materno")]
    pub maternal_surname: Option<String>,

    #[serde(default, rename = "fechaNacimiento", alias = "fecha_nacimiento")]
    pub birth_date: Option<String>,

    #[serde(default, rename = "puesto")]
    pub job_title: Option<String>,

    #[serde(default, rename = "estadoNacimiento", alias = "estado_nacimiento")]
    pub birth_state: Option<String>,

    #[serde(default, rename = "rfc")]
    pub tax_id: Option<String>,
}

/// Enrollment request body: student fields plus the target course
#[derive(Debug, Default, Clone, Deserialize)]
pub struct EnrollmentForm {
    #[serde(flatten)]
    pub student: StudentForm,

    #[serde(
        default,
        rename = "cursoId",
        alias = "curso_id",
        alias = "idCurso",
        deserialize_with = "de_opt_i64"
    )]
    pub course_id: Option<i64>,
}

fn non_blank(value: &str) -> std::result::Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("required"));
    }
    Ok(())
}

/// Map validator output to the wire name of the first missing field
fn first_missing_field(errors: &ValidationErrors) -> &'static str {
    let fields = errors.field_errors();
    [
        ("identity_code", "curp"),
        ("given_name", "nombre"),
        ("paternal_surname", "apellidoPaterno"),
    ]
    .into_iter()
    .find(|(field, _)| fields.contains_key(*field))
    .map(|(_, wire)| wire)
    .unwrap_or("solicitud")
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_birth_date(raw: Option<String>) -> Result<Option<NaiveDate>> {
    let Some(raw) = clean(raw) else {
        return Ok(None);
    };
    // Accept full timestamps by keeping the date part
    let date_part = raw.get(..10).unwrap_or(&raw);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .map(Some)
        .map_err(|_| AppError::Validation {
            message: "La fecha de nacimiento debe tener el formato AAAA-MM-DD".to_string(),
            field: Some("fechaNacimiento".to_string()),
        })
}

impl StudentForm {
    /// Validate and normalize into a student ready for the backend
    pub fn into_student(self) -> Result<NewStudent> {
        if let Err(errors) = self.validate() {
            return Err(AppError::MissingField {
                field: first_missing_field(&errors).to_string(),
            });
        }

        let identity_code = normalize_identity_code(&self.identity_code);
        if identity_code.len() > IDENTITY_CODE_MAX_LEN
            || !identity_code_pattern().is_match(&identity_code)
        {
            return Err(AppError::Validation {
                message: "La CURP solo puede contener letras y números (máximo 18)".to_string(),
                field: Some("curp".to_string()),
            });
        }

        Ok(NewStudent {
            identity_code,
            given_name: self.given_name.trim().to_string(),
            paternal_surname: self.paternal_surname.trim().to_string(),
            maternal_surname: clean(self.maternal_surname).unwrap_or_default(),
            birth_date: parse_birth_date(self.birth_date)?,
            job_title: clean(self.job_title),
            birth_state: clean(self.birth_state),
            tax_id: clean(self.tax_id).map(|v| v.to_uppercase()),
        })
    }
}

impl EnrollmentForm {
    /// Validate the whole request; no external call happens before this passes
    pub fn into_request(self) -> Result<EnrollmentRequest> {
        let student = self.student.into_student()?;
        let course_id = match self.course_id {
            None => {
                return Err(AppError::MissingField {
                    field: "cursoId".to_string(),
                })
            }
            Some(id) if id <= 0 => {
                return Err(AppError::Validation {
                    message: "El curso seleccionado no es válido".to_string(),
                    field: Some("cursoId".to_string()),
                })
            }
            Some(id) => id,
        };
        Ok(EnrollmentRequest { student, course_id })
    }
}

// ============================================================================
// Domain types
// ============================================================================

/// Validated, normalized student
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewStudent {
    pub identity_code: String,
    pub given_name: String,
    pub paternal_surname: String,
    pub maternal_surname: String,
    pub birth_date: Option<NaiveDate>,
    pub job_title: Option<String>,
    pub birth_state: Option<String>,
    pub tax_id: Option<String>,
}

impl NewStudent {
    /// Display name: given name followed by the non-empty surnames
    pub fn full_name(&self) -> String {
        [
            self.given_name.as_str(),
            self.paternal_surname.as_str(),
            self.maternal_surname.as_str(),
        ]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
    }
}

/// Validated enrollment input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentRequest {
    pub student: NewStudent,
    pub course_id: i64,
}

/// Student as reported by the backend, after field-name normalization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentRecord {
    #[serde(rename = "curp")]
    pub identity_code: String,
    #[serde(rename = "nombre", default)]
    pub given_name: String,
    #[serde(rename = "apellidoPaterno", default)]
    pub paternal_surname: String,
    #[serde(rename = "apellidoMaterno", default)]
    pub maternal_surname: String,
    #[serde(rename = "fechaNacimiento", default)]
    pub birth_date: Option<String>,
    #[serde(rename = "puesto", default)]
    pub job_title: Option<String>,
    #[serde(rename = "estadoNacimiento", default)]
    pub birth_state: Option<String>,
    #[serde(rename = "rfc", default)]
    pub tax_id: Option<String>,
}

impl From<&NewStudent> for StudentRecord {
    fn from(student: &NewStudent) -> Self {
        Self {
            identity_code: student.identity_code.clone(),
            given_name: student.given_name.clone(),
            paternal_surname: student.paternal_surname.clone(),
            maternal_surname: student.maternal_surname.clone(),
            birth_date: student.birth_date.map(|d| d.format("%Y-%m-%d").to_string()),
            job_title: student.job_title.clone(),
            birth_state: student.birth_state.clone(),
            tax_id: student.tax_id.clone(),
        }
    }
}

/// Course, read-only from the enrollment workflow's point of view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    #[serde(deserialize_with = "de_i64")]
    pub id: i64,
    #[serde(rename = "nombre", default)]
    pub name: String,
    #[serde(rename = "costo", default, deserialize_with = "de_opt_f64")]
    pub fee: Option<f64>,
    #[serde(rename = "ubicacion", default)]
    pub location: Option<String>,
    #[serde(rename = "empresa", default)]
    pub company: Option<String>,
}

/// Which subsystem persisted the enrollment relation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteChannel {
    Backend,
    Store,
}

/// Outcome of the ensure-student step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StudentStatus {
    Created,
    AlreadyExisted,
    /// Creation failed and the backend could not confirm either way
    Unknown,
}

/// Proof of a persisted enrollment
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentReceipt {
    #[serde(rename = "alumno")]
    pub student_name: String,
    #[serde(rename = "curp")]
    pub identity_code: String,
    #[serde(rename = "cursoId")]
    pub course_id: i64,
    #[serde(rename = "curso")]
    pub course_name: String,
    #[serde(rename = "canal")]
    pub channel: WriteChannel,
}

/// Everything an operator needs to finish an enrollment by hand
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManualInstructions {
    #[serde(rename = "alumno")]
    pub student_name: String,
    #[serde(rename = "curp")]
    pub identity_code: String,
    #[serde(rename = "cursoId")]
    pub course_id: i64,
    #[serde(rename = "sql")]
    pub statement: String,
    #[serde(rename = "motivo")]
    pub reason: ManualReason,
    /// False when the backend never confirmed the student record
    #[serde(rename = "alumnoRegistrado")]
    pub student_registered: bool,
}

/// Why the enrollment could not be written automatically
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ManualReason {
    /// Neither the backend relation endpoint nor a store is configured
    NoChannel,
    /// The backend relation endpoint rejected the write
    BackendWriteFailed,
    /// The store answered but refused the insert
    StoreWriteFailed,
}

/// Successful results of `enroll`; rejections travel as `AppError`
#[derive(Debug, Clone, PartialEq)]
pub enum EnrollmentOutcome {
    Enrolled(EnrollmentReceipt),
    /// Enrolled, and the student record was already present upstream
    StudentAlreadyExisted(EnrollmentReceipt),
    ManualInterventionRequired(ManualInstructions),
}

impl EnrollmentOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            EnrollmentOutcome::Enrolled(_) => "enrolled",
            EnrollmentOutcome::StudentAlreadyExisted(_) => "student_already_existed",
            EnrollmentOutcome::ManualInterventionRequired(_) => "manual_intervention_required",
        }
    }

    pub fn receipt(&self) -> Option<&EnrollmentReceipt> {
        match self {
            EnrollmentOutcome::Enrolled(receipt)
            | EnrollmentOutcome::StudentAlreadyExisted(receipt) => Some(receipt),
            EnrollmentOutcome::ManualInterventionRequired(_) => None,
        }
    }
}

// ============================================================================
// Lenient numeric deserializers (upstream sends ids and fees as strings too)
// ============================================================================

fn number_from_value(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn int_from_value(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn de_i64<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    int_from_value(&value)
        .ok_or_else(|| serde::de::Error::custom(format!("expected integer id, got {}", value)))
}

fn de_opt_i64<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(v) => int_from_value(&v)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("expected integer id, got {}", v))),
    }
}

fn de_opt_f64<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(number_from_value))
}
