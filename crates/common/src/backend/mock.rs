//! Mock backend for testing

use super::{BackendApi, Credentials, LoginOutcome, RelationWrite, StudentWrite};
use crate::enrollment::{Course, NewStudent, StudentRecord};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{Mutex, RwLock};

/// In-memory stand-in for the external backend
pub struct MockBackend {
    students: Mutex<HashMap<String, StudentRecord>>,
    courses: RwLock<Vec<Course>>,
    relations: Mutex<HashSet<(String, i64)>>,
    accounts: HashMap<String, String>,
    relation_supported: bool,
    reachable: AtomicBool,
    create_student_calls: AtomicUsize,
    list_students_calls: AtomicUsize,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self {
            students: Mutex::new(HashMap::new()),
            courses: RwLock::new(Vec::new()),
            relations: Mutex::new(HashSet::new()),
            accounts: HashMap::new(),
            relation_supported: false,
            reachable: AtomicBool::new(true),
            create_student_calls: AtomicUsize::new(0),
            list_students_calls: AtomicUsize::new(0),
        }
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_course(mut self, course: Course) -> Self {
        self.courses.get_mut().push(course);
        self
    }

    pub fn with_student(mut self, student: StudentRecord) -> Self {
        self.students
            .get_mut()
            .insert(student.identity_code.clone(), student);
        self
    }

    /// Let the mock persist enrollment relations itself
    pub fn with_relation_endpoint(mut self) -> Self {
        self.relation_supported = true;
        self
    }

    pub fn with_account(mut self, account: &str, password: &str) -> Self {
        self.accounts.insert(account.to_string(), password.to_string());
        self
    }

    /// Simulate an outage (every call fails as unreachable)
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn create_student_calls(&self) -> usize {
        self.create_student_calls.load(Ordering::SeqCst)
    }

    pub fn list_students_calls(&self) -> usize {
        self.list_students_calls.load(Ordering::SeqCst)
    }

    pub async fn has_student(&self, identity_code: &str) -> bool {
        self.students.lock().await.contains_key(identity_code)
    }

    pub async fn relation_count(&self) -> usize {
        self.relations.lock().await.len()
    }

    fn check_reachable(&self) -> Result<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AppError::BackendUnavailable {
                message: "mock backend unreachable".to_string(),
            })
        }
    }
}

#[async_trait]
impl BackendApi for MockBackend {
    async fn create_student(&self, student: &NewStudent) -> Result<StudentWrite> {
        self.create_student_calls.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;

        let mut students = self.students.lock().await;
        if students.contains_key(&student.identity_code) {
            return Ok(StudentWrite::AlreadyExists);
        }
        students.insert(student.identity_code.clone(), StudentRecord::from(student));
        Ok(StudentWrite::Created)
    }

    async fn list_students(&self) -> Result<Vec<StudentRecord>> {
        self.list_students_calls.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;
        Ok(self.students.lock().await.values().cloned().collect())
    }

    async fn list_courses(&self) -> Result<Vec<Course>> {
        self.check_reachable()?;
        Ok(self.courses.read().await.clone())
    }

    async fn supports_enrollment_relation(&self) -> bool {
        self.relation_supported
    }

    async fn create_enrollment(&self, identity_code: &str, course_id: i64) -> Result<RelationWrite> {
        self.check_reachable()?;
        if !self.relation_supported {
            return Err(AppError::Upstream {
                service: "backend".to_string(),
                message: "relation endpoint not found".to_string(),
            });
        }

        let mut relations = self.relations.lock().await;
        if relations.insert((identity_code.to_string(), course_id)) {
            Ok(RelationWrite::Created)
        } else {
            Ok(RelationWrite::AlreadyExists)
        }
    }

    async fn login(&self, credentials: &Credentials) -> Result<LoginOutcome> {
        self.check_reachable()?;
        match self.accounts.get(&credentials.account) {
            Some(password) if *password == credentials.password => {
                Ok(LoginOutcome::Accepted(serde_json::json!({
                    "usuario": credentials.account,
                    "token": "mock-session-token",
                })))
            }
            _ => Ok(LoginOutcome::Rejected),
        }
    }

    async fn ping(&self) -> Result<()> {
        self.check_reachable()
    }
}
