//! Backend gateway
//!
//! Client for the external system of record (students, courses and, on some
//! deployments, the enrollment relation). Every call is bounded by the
//! configured timeout and every response passes through [`normalize`].

mod mock;
pub mod normalize;

pub use mock::MockBackend;

use crate::config::{BackendConfig, EndpointMode, EnrollmentEndpointConfig};
use crate::enrollment::{Course, NewStudent, StudentRecord};
use crate::errors::{AppError, Result};
use crate::metrics;
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;

const SERVICE: &str = "backend";
const STUDENTS_PATH: &str = "/api/alumnos";
const COURSES_PATH: &str = "/api/cursos";
const LOGIN_PATH: &str = "/api/auth/login";

/// Upstream bodies are truncated to this many chars in logs and errors
const BODY_SNIPPET_LEN: usize = 200;

/// Result of the create-student call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StudentWrite {
    Created,
    AlreadyExists,
}

/// Result of the relation-create call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationWrite {
    Created,
    AlreadyExists,
}

/// Login credentials forwarded to the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(rename = "usuario", alias = "email", alias = "username")]
    pub account: String,
    pub password: String,
}

/// Backend verdict on a login attempt
#[derive(Debug, Clone, PartialEq)]
pub enum LoginOutcome {
    /// Accepted; carries the backend's session payload untouched
    Accepted(serde_json::Value),
    Rejected,
}

/// Operations the gateway and the reconciler need from the backend
#[async_trait]
pub trait BackendApi: Send + Sync {
    /// Create a student; an existing student is not an error
    async fn create_student(&self, student: &NewStudent) -> Result<StudentWrite>;

    /// List all students, normalized
    async fn list_students(&self) -> Result<Vec<StudentRecord>>;

    /// List all courses, normalized
    async fn list_courses(&self) -> Result<Vec<Course>>;

    /// Whether the backend can persist the enrollment relation
    async fn supports_enrollment_relation(&self) -> bool;

    /// Persist the enrollment relation upstream
    async fn create_enrollment(&self, identity_code: &str, course_id: i64) -> Result<RelationWrite>;

    /// Forward a login attempt
    async fn login(&self, credentials: &Credentials) -> Result<LoginOutcome>;

    /// Connectivity check
    async fn ping(&self) -> Result<()>;

    /// Find a student by identity code via the list endpoint
    async fn find_student(&self, identity_code: &str) -> Result<Option<StudentRecord>> {
        Ok(self
            .list_students()
            .await?
            .into_iter()
            .find(|s| s.identity_code.eq_ignore_ascii_case(identity_code)))
    }

    /// Find a course by id via the list endpoint
    async fn find_course(&self, course_id: i64) -> Result<Option<Course>> {
        Ok(self
            .list_courses()
            .await?
            .into_iter()
            .find(|c| c.id == course_id))
    }
}

/// Create-student body in the backend's own field naming
#[derive(Serialize)]
struct StudentPayload<'a> {
    curp: &'a str,
    nombre: &'a str,
    apellido_paterno: &'a str,
    apellido_materno: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    fecha_nacimiento: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    puesto: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    estado_nacimiento: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rfc: Option<&'a str>,
}

impl<'a> From<&'a NewStudent> for StudentPayload<'a> {
    fn from(student: &'a NewStudent) -> Self {
        Self {
            curp: &student.identity_code,
            nombre: &student.given_name,
            apellido_paterno: &student.paternal_surname,
            apellido_materno: &student.maternal_surname,
            fecha_nacimiento: student.birth_date.map(|d| d.format("%Y-%m-%d").to_string()),
            puesto: student.job_title.as_deref(),
            estado_nacimiento: student.birth_state.as_deref(),
            rfc: student.tax_id.as_deref(),
        }
    }
}

#[derive(Serialize)]
struct RelationPayload<'a> {
    curp: &'a str,
    curso_id: i64,
}

fn snippet(body: &str) -> String {
    body.chars().take(BODY_SNIPPET_LEN).collect()
}

/// HTTP client for the backend
pub struct BackendClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    enrollment_endpoint: EnrollmentEndpointConfig,
    relation_probe: OnceCell<bool>,
}

impl BackendClient {
    /// Create a new backend client from configuration
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout,
            enrollment_endpoint: config.enrollment_endpoint.clone(),
            relation_probe: OnceCell::new(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn transport_error(&self, err: reqwest::Error) -> AppError {
        if err.is_timeout() {
            AppError::UpstreamTimeout {
                service: SERVICE.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            AppError::HttpClient(err)
        }
    }

    /// Send a request, recording latency and status per endpoint
    async fn send(&self, endpoint: &'static str, request: RequestBuilder) -> Result<Response> {
        let start = Instant::now();
        match request.send().await {
            Ok(response) => {
                metrics::record_backend_call(
                    endpoint,
                    response.status().as_u16(),
                    start.elapsed().as_secs_f64(),
                );
                Ok(response)
            }
            Err(e) => {
                metrics::record_backend_call(endpoint, 0, start.elapsed().as_secs_f64());
                tracing::warn!(endpoint, error = %e, "Backend request failed");
                Err(self.transport_error(e))
            }
        }
    }

    async fn unexpected(endpoint: &str, response: Response) -> AppError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        AppError::Upstream {
            service: SERVICE.to_string(),
            message: format!("{} returned {}: {}", endpoint, status, snippet(&body)),
        }
    }

    async fn get_json(&self, endpoint: &'static str, path: &str) -> Result<serde_json::Value> {
        let response = self.send(endpoint, self.client.get(self.url(path))).await?;
        if !response.status().is_success() {
            return Err(Self::unexpected(endpoint, response).await);
        }
        response.json().await.map_err(|e| self.transport_error(e))
    }

    /// Ask the backend whether the relation endpoint exists. 404 means no;
    /// any other answer (including 405 for OPTIONS) means the route is there.
    async fn probe_relation_endpoint(&self) -> Result<bool> {
        let path = &self.enrollment_endpoint.path;
        let response = self
            .send(
                "enrollment_probe",
                self.client.request(reqwest::Method::OPTIONS, self.url(path)),
            )
            .await?;
        let supported = response.status() != StatusCode::NOT_FOUND;
        tracing::info!(
            path = %path,
            status = response.status().as_u16(),
            supported,
            "Probed backend enrollment endpoint"
        );
        Ok(supported)
    }
}

#[async_trait]
impl BackendApi for BackendClient {
    async fn create_student(&self, student: &NewStudent) -> Result<StudentWrite> {
        let payload = StudentPayload::from(student);
        let response = self
            .send(
                "create_student",
                self.client.post(self.url(STUDENTS_PATH)).json(&payload),
            )
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(StudentWrite::Created);
        }
        if status == StatusCode::CONFLICT {
            return Ok(StudentWrite::AlreadyExists);
        }

        // Some backend versions report duplicates as 400/500
        let body = response.text().await.unwrap_or_default();
        if normalize::mentions_duplicate(&body) {
            tracing::debug!(status = status.as_u16(), "Backend reported existing student as error");
            return Ok(StudentWrite::AlreadyExists);
        }

        Err(AppError::Upstream {
            service: SERVICE.to_string(),
            message: format!("create_student returned {}: {}", status, snippet(&body)),
        })
    }

    async fn list_students(&self) -> Result<Vec<StudentRecord>> {
        let body = self.get_json("list_students", STUDENTS_PATH).await?;
        Ok(normalize::students(body))
    }

    async fn list_courses(&self) -> Result<Vec<Course>> {
        let body = self.get_json("list_courses", COURSES_PATH).await?;
        Ok(normalize::courses(body))
    }

    async fn supports_enrollment_relation(&self) -> bool {
        match self.enrollment_endpoint.mode {
            EndpointMode::Enabled => true,
            EndpointMode::Disabled => false,
            EndpointMode::Probe => {
                match self
                    .relation_probe
                    .get_or_try_init(|| self.probe_relation_endpoint())
                    .await
                {
                    Ok(supported) => *supported,
                    // Not cached; the next request probes again
                    Err(e) => {
                        tracing::warn!(error = %e, "Enrollment endpoint probe failed");
                        false
                    }
                }
            }
        }
    }

    async fn create_enrollment(&self, identity_code: &str, course_id: i64) -> Result<RelationWrite> {
        let payload = RelationPayload {
            curp: identity_code,
            curso_id: course_id,
        };
        let response = self
            .send(
                "create_enrollment",
                self.client
                    .post(self.url(&self.enrollment_endpoint.path))
                    .json(&payload),
            )
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(RelationWrite::Created);
        }
        if status == StatusCode::CONFLICT {
            return Ok(RelationWrite::AlreadyExists);
        }

        let body = response.text().await.unwrap_or_default();
        if status.is_client_error() && normalize::mentions_duplicate(&body) {
            return Ok(RelationWrite::AlreadyExists);
        }

        Err(AppError::Upstream {
            service: SERVICE.to_string(),
            message: format!("create_enrollment returned {}: {}", status, snippet(&body)),
        })
    }

    async fn login(&self, credentials: &Credentials) -> Result<LoginOutcome> {
        let response = self
            .send("login", self.client.post(self.url(LOGIN_PATH)).json(credentials))
            .await?;

        let status = response.status();
        if status.is_success() {
            let body = response
                .json::<serde_json::Value>()
                .await
                .unwrap_or(serde_json::Value::Null);
            return Ok(LoginOutcome::Accepted(body));
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Ok(LoginOutcome::Rejected);
        }
        Err(Self::unexpected("login", response).await)
    }

    async fn ping(&self) -> Result<()> {
        // Any HTTP answer means the backend is reachable
        self.send("ping", self.client.get(self.url("/"))).await?;
        Ok(())
    }
}
