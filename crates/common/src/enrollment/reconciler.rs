//! The enroll workflow

use super::{
    Course, EnrollmentOutcome, EnrollmentReceipt, EnrollmentRequest, EnrollmentStore,
    InsertOutcome, ManualInstructions, ManualReason, NewStudent, StudentStatus, WriteChannel,
};
use crate::backend::{BackendApi, RelationWrite, StudentWrite};
use crate::db::ENROLLMENT_TABLE;
use crate::errors::{AppError, Result};
use crate::metrics;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Coordinates student creation and enrollment persistence across the
/// backend and the relational store.
pub struct EnrollmentReconciler {
    backend: Arc<dyn BackendApi>,
    store: Option<Arc<dyn EnrollmentStore>>,
    call_timeout: Duration,
    deadline: Duration,
}

impl EnrollmentReconciler {
    pub fn new(
        backend: Arc<dyn BackendApi>,
        store: Option<Arc<dyn EnrollmentStore>>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            store,
            call_timeout,
            deadline: call_timeout * 3,
        }
    }

    /// Bound on one whole `enroll` call, across all of its outbound calls
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Ensure the student exists and exactly one enrollment exists for
    /// (student, course).
    ///
    /// `AlreadyEnrolled`, `CourseNotFound` and `BackendUnavailable` are
    /// returned as errors; everything else is an [`EnrollmentOutcome`].
    /// Re-running after a partial failure is safe. Exceeding the overall
    /// deadline reports `BackendUnavailable`.
    pub async fn enroll(&self, request: &EnrollmentRequest) -> Result<EnrollmentOutcome> {
        let start = Instant::now();
        let result = match tokio::time::timeout(self.deadline, self.reconcile(request)).await {
            Ok(result) => result,
            Err(_) => Err(unavailable(
                "enrollment deadline",
                AppError::UpstreamTimeout {
                    service: "enroll".to_string(),
                    timeout_ms: self.deadline.as_millis() as u64,
                },
            )),
        };

        let label = match &result {
            Ok(outcome) => outcome.label(),
            Err(AppError::AlreadyEnrolled { .. }) => "already_enrolled",
            Err(AppError::CourseNotFound { .. }) => "course_not_found",
            Err(_) => "backend_unavailable",
        };
        metrics::record_enrollment(label, start.elapsed().as_secs_f64());

        result
    }

    async fn reconcile(&self, request: &EnrollmentRequest) -> Result<EnrollmentOutcome> {
        let student = &request.student;
        let course_id = request.course_id;

        let student_status = self.ensure_student(student).await;
        let course = self.resolve_course(course_id).await?;

        if let Some(store) = &self.store {
            let exists = self
                .bounded("enrollment_exists", store.enrollment_exists(&student.identity_code, course_id))
                .await
                .map_err(|e| unavailable("enrollment check", e))?;
            if exists {
                return Err(already_enrolled(student, course_id));
            }
        }

        let mut reason = ManualReason::NoChannel;

        if self.backend.supports_enrollment_relation().await {
            match self
                .bounded(
                    "create_enrollment",
                    self.backend.create_enrollment(&student.identity_code, course_id),
                )
                .await
            {
                Ok(RelationWrite::Created) => {
                    return Ok(enrolled(student_status, student, &course, WriteChannel::Backend));
                }
                Ok(RelationWrite::AlreadyExists) => {
                    return Err(already_enrolled(student, course_id));
                }
                // The backend may have committed the row; writing the store too
                // could record the pair twice
                Err(e) if e.is_unavailable() => {
                    return Err(unavailable("enrollment write", e));
                }
                Err(e) => {
                    warn!(
                        curp = %student.identity_code,
                        course_id,
                        error = %e,
                        "Backend relation write failed, falling back"
                    );
                    reason = ManualReason::BackendWriteFailed;
                }
            }
        }

        if let Some(store) = &self.store {
            match self
                .bounded(
                    "insert_enrollment",
                    store.insert_enrollment(&student.identity_code, course_id),
                )
                .await
            {
                Ok(InsertOutcome::Inserted) => {
                    return Ok(enrolled(student_status, student, &course, WriteChannel::Store));
                }
                Ok(InsertOutcome::AlreadyPresent) => {
                    return Err(already_enrolled(student, course_id));
                }
                Err(e) if e.is_unavailable() => {
                    return Err(unavailable("enrollment write", e));
                }
                Err(e) => {
                    warn!(
                        curp = %student.identity_code,
                        course_id,
                        error = %e,
                        "Store insert failed"
                    );
                    reason = ManualReason::StoreWriteFailed;
                }
            }
        }

        warn!(
            curp = %student.identity_code,
            course_id,
            reason = ?reason,
            "Enrollment requires manual intervention"
        );
        Ok(EnrollmentOutcome::ManualInterventionRequired(
            ManualInstructions {
                student_name: student.full_name(),
                identity_code: student.identity_code.clone(),
                course_id,
                statement: manual_statement(&student.identity_code, course_id),
                reason,
                student_registered: student_status != StudentStatus::Unknown,
            },
        ))
    }

    /// Create the student upstream. Never fails: a pre-existing student is the
    /// common case and some backends report it as an error.
    async fn ensure_student(&self, student: &NewStudent) -> StudentStatus {
        match self
            .bounded("create_student", self.backend.create_student(student))
            .await
        {
            Ok(StudentWrite::Created) => {
                info!(curp = %student.identity_code, "Student created");
                StudentStatus::Created
            }
            Ok(StudentWrite::AlreadyExists) => {
                debug!(curp = %student.identity_code, "Student already existed");
                StudentStatus::AlreadyExisted
            }
            Err(e) if e.is_unavailable() => {
                warn!(
                    curp = %student.identity_code,
                    error = %e,
                    "Backend unreachable while creating student, continuing"
                );
                StudentStatus::Unknown
            }
            Err(e) => {
                warn!(
                    curp = %student.identity_code,
                    error = %e,
                    "Student creation failed, continuing"
                );
                match self
                    .bounded("find_student", self.backend.find_student(&student.identity_code))
                    .await
                {
                    Ok(Some(_)) => StudentStatus::AlreadyExisted,
                    Ok(None) | Err(_) => StudentStatus::Unknown,
                }
            }
        }
    }

    async fn resolve_course(&self, course_id: i64) -> Result<Course> {
        let (source, lookup) = match &self.store {
            Some(store) => ("store", self.bounded("find_course", store.find_course(course_id)).await),
            None => (
                "backend",
                self.bounded("find_course", self.backend.find_course(course_id)).await,
            ),
        };

        match lookup {
            Ok(Some(course)) => {
                debug!(course_id, source, "Course verified");
                Ok(course)
            }
            Ok(None) => Err(AppError::CourseNotFound { course_id }),
            Err(e) => Err(unavailable("course verification", e)),
        }
    }

    /// Apply the outbound-call bound
    async fn bounded<T, F>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(AppError::UpstreamTimeout {
                service: operation.to_string(),
                timeout_ms: self.call_timeout.as_millis() as u64,
            }),
        }
    }
}

fn enrolled(
    status: StudentStatus,
    student: &NewStudent,
    course: &Course,
    channel: WriteChannel,
) -> EnrollmentOutcome {
    info!(
        curp = %student.identity_code,
        course_id = course.id,
        channel = ?channel,
        "Student enrolled"
    );
    let receipt = EnrollmentReceipt {
        student_name: student.full_name(),
        identity_code: student.identity_code.clone(),
        course_id: course.id,
        course_name: course.name.clone(),
        channel,
    };
    match status {
        StudentStatus::AlreadyExisted => EnrollmentOutcome::StudentAlreadyExisted(receipt),
        StudentStatus::Created | StudentStatus::Unknown => EnrollmentOutcome::Enrolled(receipt),
    }
}

fn already_enrolled(student: &NewStudent, course_id: i64) -> AppError {
    AppError::AlreadyEnrolled {
        curp: student.identity_code.clone(),
        course_id,
    }
}

fn unavailable(stage: &str, cause: AppError) -> AppError {
    error!(stage, error = %cause, "Enrollment dependency unavailable");
    AppError::BackendUnavailable {
        message: format!("{}: {}", stage, cause),
    }
}

/// The statement an operator runs to finish the enrollment by hand. The
/// identity code is validated alphanumeric before it gets here.
fn manual_statement(identity_code: &str, course_id: i64) -> String {
    format!(
        "INSERT INTO {} (alumno_curp, curso_id) VALUES ('{}', {});",
        ENROLLMENT_TABLE, identity_code, course_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Credentials, LoginOutcome, MockBackend};
    use crate::enrollment::{EnrollmentForm, InMemoryEnrollmentStore, StudentRecord};
    use async_trait::async_trait;
    use sea_orm::DbErr;
    use serde_json::json;

    fn course(id: i64, name: &str, fee: f64) -> Course {
        Course {
            id,
            name: name.to_string(),
            fee: Some(fee),
            location: None,
            company: None,
        }
    }

    fn request(curp: &str, course_id: i64) -> EnrollmentRequest {
        serde_json::from_value::<EnrollmentForm>(json!({
            "curp": curp,
            "nombre": "Juan",
            "apellidoPaterno": "Pérez",
            "cursoId": course_id
        }))
        .unwrap()
        .into_request()
        .unwrap()
    }

    fn with_store(
        backend: MockBackend,
        store: Arc<InMemoryEnrollmentStore>,
    ) -> (EnrollmentReconciler, Arc<MockBackend>) {
        let backend = Arc::new(backend);
        let reconciler = EnrollmentReconciler::new(
            backend.clone(),
            Some(store),
            Duration::from_secs(10),
        );
        (reconciler, backend)
    }

    fn store_with_course() -> Arc<InMemoryEnrollmentStore> {
        Arc::new(InMemoryEnrollmentStore::new().with_course(course(5, "Soldadura", 500.0)))
    }

    /// Store whose writes fail with a non-connectivity error
    struct BrokenSchemaStore;

    #[async_trait]
    impl EnrollmentStore for BrokenSchemaStore {
        async fn find_course(&self, course_id: i64) -> Result<Option<Course>> {
            Ok(Some(course(course_id, "Soldadura", 500.0)))
        }
        async fn enrollment_exists(&self, _: &str, _: i64) -> Result<bool> {
            Ok(false)
        }
        async fn insert_enrollment(&self, _: &str, _: i64) -> Result<InsertOutcome> {
            Err(AppError::Database(DbErr::Custom(
                "relation \"inscripciones\" does not exist".into(),
            )))
        }
        async fn ping(&self) -> Result<()> {
            Ok(())
        }
    }

    /// Backend that commits the relation but times out before answering
    struct LateRelationBackend {
        inner: MockBackend,
    }

    #[async_trait]
    impl BackendApi for LateRelationBackend {
        async fn create_student(&self, student: &NewStudent) -> Result<StudentWrite> {
            self.inner.create_student(student).await
        }
        async fn list_students(&self) -> Result<Vec<StudentRecord>> {
            self.inner.list_students().await
        }
        async fn list_courses(&self) -> Result<Vec<Course>> {
            self.inner.list_courses().await
        }
        async fn supports_enrollment_relation(&self) -> bool {
            true
        }
        async fn create_enrollment(&self, identity_code: &str, course_id: i64) -> Result<RelationWrite> {
            self.inner.create_enrollment(identity_code, course_id).await?;
            Err(AppError::UpstreamTimeout {
                service: "create_enrollment".to_string(),
                timeout_ms: 10_000,
            })
        }
        async fn login(&self, credentials: &Credentials) -> Result<LoginOutcome> {
            self.inner.login(credentials).await
        }
        async fn ping(&self) -> Result<()> {
            self.inner.ping().await
        }
    }

    /// Store that never answers
    struct HangingStore;

    #[async_trait]
    impl EnrollmentStore for HangingStore {
        async fn find_course(&self, _: i64) -> Result<Option<Course>> {
            std::future::pending().await
        }
        async fn enrollment_exists(&self, _: &str, _: i64) -> Result<bool> {
            std::future::pending().await
        }
        async fn insert_enrollment(&self, _: &str, _: i64) -> Result<InsertOutcome> {
            std::future::pending().await
        }
        async fn ping(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_first_enrollment_writes_one_row() {
        let store = store_with_course();
        let (reconciler, backend) = with_store(MockBackend::new(), store.clone());

        let outcome = reconciler.enroll(&request("ABCD900101HDFXXX01", 5)).await.unwrap();

        let receipt = match outcome {
            EnrollmentOutcome::Enrolled(receipt) => receipt,
            other => panic!("unexpected outcome: {:?}", other),
        };
        assert_eq!(receipt.student_name, "Juan Pérez");
        assert_eq!(receipt.course_id, 5);
        assert_eq!(receipt.channel, WriteChannel::Store);
        assert_eq!(store.enrollment_count("ABCD900101HDFXXX01", 5).await, 1);
        assert!(backend.has_student("ABCD900101HDFXXX01").await);
    }

    #[tokio::test]
    async fn test_second_call_is_rejected() {
        let store = store_with_course();
        let (reconciler, _) = with_store(MockBackend::new(), store.clone());

        reconciler.enroll(&request("ABC123", 5)).await.unwrap();
        let err = reconciler.enroll(&request("ABC123", 5)).await.unwrap_err();

        assert!(matches!(err, AppError::AlreadyEnrolled { course_id: 5, .. }));
        assert_eq!(store.total_enrollments().await, 1);
    }

    #[tokio::test]
    async fn test_identity_code_case_is_normalized() {
        let store = store_with_course();
        let (reconciler, _) = with_store(MockBackend::new(), store.clone());

        reconciler.enroll(&request("abc123", 5)).await.unwrap();
        let err = reconciler.enroll(&request("ABC123", 5)).await.unwrap_err();

        assert!(matches!(err, AppError::AlreadyEnrolled { .. }));
        assert_eq!(store.enrollment_count("ABC123", 5).await, 1);
    }

    #[tokio::test]
    async fn test_unknown_course_writes_nothing() {
        let store = store_with_course();
        let (reconciler, _) = with_store(MockBackend::new(), store.clone());

        let err = reconciler.enroll(&request("ABC123", 9999)).await.unwrap_err();

        assert!(matches!(err, AppError::CourseNotFound { course_id: 9999 }));
        assert_eq!(store.total_enrollments().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_calls_persist_one_row() {
        let store = store_with_course();
        let (reconciler, _) = with_store(MockBackend::new(), store.clone());
        let reconciler = Arc::new(reconciler);

        let calls = (0..8).map(|_| {
            let reconciler = reconciler.clone();
            tokio::spawn(async move { reconciler.enroll(&request("ABC123", 5)).await })
        });
        let results = futures::future::join_all(calls).await;

        let successes = results
            .iter()
            .filter(|r| matches!(r, Ok(Ok(_))))
            .count();
        let rejections = results
            .iter()
            .filter(|r| matches!(r, Ok(Err(AppError::AlreadyEnrolled { .. }))))
            .count();
        assert_eq!(successes, 1);
        assert_eq!(rejections, 7);
        assert_eq!(store.enrollment_count("ABC123", 5).await, 1);
    }

    #[tokio::test]
    async fn test_existing_student_is_reported() {
        let existing = StudentRecord {
            identity_code: "ABC123".into(),
            given_name: "Juan".into(),
            paternal_surname: "Pérez".into(),
            maternal_surname: String::new(),
            birth_date: None,
            job_title: None,
            birth_state: None,
            tax_id: None,
        };
        let (reconciler, _) = with_store(MockBackend::new().with_student(existing), store_with_course());

        let outcome = reconciler.enroll(&request("ABC123", 5)).await.unwrap();
        assert!(matches!(outcome, EnrollmentOutcome::StudentAlreadyExisted(_)));
    }

    #[tokio::test]
    async fn test_backend_relation_preferred_when_supported() {
        let store = store_with_course();
        let (reconciler, backend) =
            with_store(MockBackend::new().with_relation_endpoint(), store.clone());

        let outcome = reconciler.enroll(&request("ABC123", 5)).await.unwrap();

        assert_eq!(outcome.receipt().unwrap().channel, WriteChannel::Backend);
        assert_eq!(backend.relation_count().await, 1);
        assert_eq!(store.total_enrollments().await, 0);
    }

    #[tokio::test]
    async fn test_backend_only_deployment() {
        let backend = Arc::new(
            MockBackend::new()
                .with_relation_endpoint()
                .with_course(course(5, "Soldadura", 500.0)),
        );
        let reconciler = EnrollmentReconciler::new(backend.clone(), None, Duration::from_secs(10));

        reconciler.enroll(&request("ABC123", 5)).await.unwrap();
        let err = reconciler.enroll(&request("ABC123", 5)).await.unwrap_err();

        assert!(matches!(err, AppError::AlreadyEnrolled { .. }));
        assert_eq!(backend.relation_count().await, 1);
    }

    #[tokio::test]
    async fn test_no_channel_requires_manual_intervention() {
        let backend = Arc::new(MockBackend::new().with_course(course(5, "Soldadura", 500.0)));
        let reconciler = EnrollmentReconciler::new(backend, None, Duration::from_secs(10));

        let outcome = reconciler.enroll(&request("ABC123", 5)).await.unwrap();

        match outcome {
            EnrollmentOutcome::ManualInterventionRequired(instructions) => {
                assert_eq!(instructions.identity_code, "ABC123");
                assert_eq!(instructions.course_id, 5);
                assert_eq!(instructions.reason, ManualReason::NoChannel);
                assert!(instructions.student_registered);
                assert_eq!(
                    instructions.statement,
                    "INSERT INTO inscripciones (alumno_curp, curso_id) VALUES ('ABC123', 5);"
                );
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_schema_failure_degrades_to_manual() {
        let backend = Arc::new(MockBackend::new());
        let reconciler = EnrollmentReconciler::new(
            backend,
            Some(Arc::new(BrokenSchemaStore)),
            Duration::from_secs(10),
        );

        let outcome = reconciler.enroll(&request("ABC123", 5)).await.unwrap();
        match outcome {
            EnrollmentOutcome::ManualInterventionRequired(instructions) => {
                assert_eq!(instructions.reason, ManualReason::StoreWriteFailed);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_student_creation_outage_is_absorbed() {
        let store = store_with_course();
        let (reconciler, backend) = with_store(MockBackend::new(), store.clone());
        backend.set_reachable(false);

        let outcome = reconciler.enroll(&request("ABC123", 5)).await.unwrap();

        assert!(matches!(outcome, EnrollmentOutcome::Enrolled(_)));
        assert_eq!(backend.create_student_calls(), 1);
        assert_eq!(store.total_enrollments().await, 1);
    }

    #[tokio::test]
    async fn test_course_lookup_outage_is_fatal() {
        let backend = Arc::new(MockBackend::new().with_relation_endpoint());
        backend.set_reachable(false);
        let reconciler = EnrollmentReconciler::new(backend.clone(), None, Duration::from_secs(10));

        let err = reconciler.enroll(&request("ABC123", 5)).await.unwrap_err();

        assert!(matches!(err, AppError::BackendUnavailable { .. }));
        assert_eq!(backend.relation_count().await, 0);
    }

    #[tokio::test]
    async fn test_hanging_store_times_out() {
        let reconciler = EnrollmentReconciler::new(
            Arc::new(MockBackend::new()),
            Some(Arc::new(HangingStore)),
            Duration::from_millis(50),
        );

        let err = reconciler.enroll(&request("ABC123", 5)).await.unwrap_err();
        assert!(matches!(err, AppError::BackendUnavailable { .. }));
        assert_eq!(err.status_code(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_ambiguous_backend_write_is_not_repeated_in_store() {
        let store = store_with_course();
        let backend = Arc::new(LateRelationBackend {
            inner: MockBackend::new().with_relation_endpoint(),
        });
        let reconciler =
            EnrollmentReconciler::new(backend.clone(), Some(store.clone()), Duration::from_secs(10));

        let err = reconciler.enroll(&request("ABC123", 5)).await.unwrap_err();

        assert!(matches!(err, AppError::BackendUnavailable { .. }));
        assert_eq!(backend.inner.relation_count().await, 1);
        assert_eq!(store.total_enrollments().await, 0);
    }

    #[tokio::test]
    async fn test_overall_deadline_bounds_enrollment() {
        let reconciler = EnrollmentReconciler::new(
            Arc::new(MockBackend::new()),
            Some(Arc::new(HangingStore)),
            Duration::from_secs(10),
        )
        .with_deadline(Duration::from_millis(50));

        let started = Instant::now();
        let err = reconciler.enroll(&request("ABC123", 5)).await.unwrap_err();

        assert!(matches!(err, AppError::BackendUnavailable { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_unreachable_backend_skips_student_lookup() {
        let store = store_with_course();
        let (reconciler, backend) = with_store(MockBackend::new(), store);
        backend.set_reachable(false);

        reconciler.enroll(&request("ABC123", 5)).await.unwrap();

        assert_eq!(backend.list_students_calls(), 0);
    }

    #[tokio::test]
    async fn test_manual_instructions_flag_unconfirmed_student() {
        let backend = Arc::new(MockBackend::new());
        backend.set_reachable(false);
        let reconciler = EnrollmentReconciler::new(
            backend,
            Some(Arc::new(BrokenSchemaStore)),
            Duration::from_secs(10),
        );

        match reconciler.enroll(&request("ABC123", 5)).await.unwrap() {
            EnrollmentOutcome::ManualInterventionRequired(instructions) => {
                assert!(!instructions.student_registered);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
