//! Enrollment reconciliation
//!
//! Ensures a student exists upstream and that exactly one enrollment relation
//! exists for a (student, course) pair, persisting it through the backend
//! relation endpoint or the relational store, in that order.

mod memory;
mod model;
mod reconciler;

pub use memory::InMemoryEnrollmentStore;
pub use model::{
    normalize_identity_code, Course, EnrollmentForm, EnrollmentOutcome, EnrollmentReceipt,
    EnrollmentRequest, ManualInstructions, ManualReason, NewStudent, StudentForm, StudentRecord,
    StudentStatus, WriteChannel, IDENTITY_CODE_MAX_LEN,
};
pub use reconciler::EnrollmentReconciler;

use crate::errors::Result;
use async_trait::async_trait;

/// Result of a guarded insert into the enrollment relation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The pair was already present; nothing was written
    AlreadyPresent,
}

/// Relational store operations the reconciler needs
#[async_trait]
pub trait EnrollmentStore: Send + Sync {
    /// Look up a course by id
    async fn find_course(&self, course_id: i64) -> Result<Option<Course>>;

    /// Whether the (identity code, course) pair is already enrolled
    async fn enrollment_exists(&self, identity_code: &str, course_id: i64) -> Result<bool>;

    /// Check-then-insert as one atomic unit
    async fn insert_enrollment(&self, identity_code: &str, course_id: i64) -> Result<InsertOutcome>;

    /// Connectivity check
    async fn ping(&self) -> Result<()>;
}
