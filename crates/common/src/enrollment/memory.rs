//! In-process enrollment store for tests and local development

use super::{Course, EnrollmentStore, InsertOutcome};
use crate::errors::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::{Mutex, RwLock};

/// Enrollment store backed by process memory.
///
/// The pair set sits behind one mutex so check-then-insert is atomic, the
/// same guarantee the relational store gets from its unique constraint.
#[derive(Default)]
pub struct InMemoryEnrollmentStore {
    courses: RwLock<HashMap<i64, Course>>,
    enrollments: Mutex<HashSet<(String, i64)>>,
}

impl InMemoryEnrollmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style course registration
    pub fn with_course(mut self, course: Course) -> Self {
        self.courses.get_mut().insert(course.id, course);
        self
    }

    pub async fn add_course(&self, course: Course) {
        self.courses.write().await.insert(course.id, course);
    }

    /// Number of persisted rows for a pair (0 or 1 when the invariant holds)
    pub async fn enrollment_count(&self, identity_code: &str, course_id: i64) -> usize {
        self.enrollments
            .lock()
            .await
            .iter()
            .filter(|(code, id)| code == identity_code && *id == course_id)
            .count()
    }

    /// Total persisted rows
    pub async fn total_enrollments(&self) -> usize {
        self.enrollments.lock().await.len()
    }
}

#[async_trait]
impl EnrollmentStore for InMemoryEnrollmentStore {
    async fn find_course(&self, course_id: i64) -> Result<Option<Course>> {
        Ok(self.courses.read().await.get(&course_id).cloned())
    }

    async fn enrollment_exists(&self, identity_code: &str, course_id: i64) -> Result<bool> {
        Ok(self
            .enrollments
            .lock()
            .await
            .contains(&(identity_code.to_string(), course_id)))
    }

    async fn insert_enrollment(&self, identity_code: &str, course_id: i64) -> Result<InsertOutcome> {
        let mut enrollments = self.enrollments.lock().await;
        if enrollments.insert((identity_code.to_string(), course_id)) {
            Ok(InsertOutcome::Inserted)
        } else {
            Ok(InsertOutcome::AlreadyPresent)
        }
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_is_guarded() {
        let store = InMemoryEnrollmentStore::new();
        assert_eq!(store.insert_enrollment("ABC123", 5).await.unwrap(), InsertOutcome::Inserted);
        assert_eq!(
            store.insert_enrollment("ABC123", 5).await.unwrap(),
            InsertOutcome::AlreadyPresent
        );
        assert!(store.enrollment_exists("ABC123", 5).await.unwrap());
        assert_eq!(store.enrollment_count("ABC123", 5).await, 1);
    }
}
