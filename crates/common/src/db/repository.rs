//! Repository for the relational store
//!
//! Course lookups run as plain parameterized SQL against the `cursos` table;
//! enrollment rows go through the SeaORM entity inside a transaction.

use crate::db::models::*;
use crate::db::DbPool;
use crate::enrollment::{Course, EnrollmentStore, InsertOutcome};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, DbErr,
    EntityTrait, IsolationLevel, PaginatorTrait, QueryFilter, QueryResult, RuntimeErr, Set,
    Statement, TransactionTrait,
};

const FIND_COURSE_SQL: &str =
    "SELECT id::int8, nombre, costo::float8, ubicacion, empresa FROM cursos WHERE id = $1";

/// The `cursos.id` column is INTEGER; ids outside that range cannot exist
fn course_key(course_id: i64) -> Option<i32> {
    i32::try_from(course_id).ok()
}

fn course_from_row(row: &QueryResult) -> Result<Course> {
    let decode = |e: DbErr| AppError::Internal {
        message: format!("Unexpected course row shape: {:?}", e),
    };
    Ok(Course {
        id: row.try_get_by_index::<i64>(0).map_err(decode)?,
        name: row.try_get_by_index::<String>(1).map_err(decode)?,
        fee: row.try_get_by_index::<Option<f64>>(2).map_err(decode)?,
        location: row.try_get_by_index::<Option<String>>(3).map_err(decode)?,
        company: row.try_get_by_index::<Option<String>>(4).map_err(decode)?,
    })
}

/// Postgres reports SQLSTATE 23505; sqlx classifies it as a unique violation
fn is_unique_violation(err: &DbErr) -> bool {
    match err {
        DbErr::Exec(RuntimeErr::SqlxError(sqlx::Error::Database(e)))
        | DbErr::Query(RuntimeErr::SqlxError(sqlx::Error::Database(e))) => e.is_unique_violation(),
        _ => false,
    }
}

/// Repository for data access operations
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> &DatabaseConnection {
        self.pool.conn()
    }
}

#[async_trait]
impl EnrollmentStore for Repository {
    async fn find_course(&self, course_id: i64) -> Result<Option<Course>> {
        if course_key(course_id).is_none() {
            return Ok(None);
        }

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            FIND_COURSE_SQL,
            vec![course_id.into()],
        );
        match self.conn().query_one(stmt).await? {
            Some(row) => course_from_row(&row).map(Some),
            None => Ok(None),
        }
    }

    async fn enrollment_exists(&self, identity_code: &str, course_id: i64) -> Result<bool> {
        let Some(course) = course_key(course_id) else {
            return Ok(false);
        };

        let count = EnrollmentEntity::find()
            .filter(EnrollmentColumn::AlumnoCurp.eq(identity_code))
            .filter(EnrollmentColumn::CursoId.eq(course))
            .count(self.conn())
            .await?;
        Ok(count > 0)
    }

    async fn insert_enrollment(&self, identity_code: &str, course_id: i64) -> Result<InsertOutcome> {
        let course = course_key(course_id).ok_or_else(|| AppError::Validation {
            message: format!("Course id {} is out of range", course_id),
            field: Some("cursoId".to_string()),
        })?;

        let txn = self
            .conn()
            .begin_with_config(Some(IsolationLevel::ReadCommitted), None)
            .await?;

        let existing = EnrollmentEntity::find()
            .filter(EnrollmentColumn::AlumnoCurp.eq(identity_code))
            .filter(EnrollmentColumn::CursoId.eq(course))
            .count(&txn)
            .await?;
        if existing > 0 {
            txn.rollback().await?;
            return Ok(InsertOutcome::AlreadyPresent);
        }

        let row = EnrollmentActiveModel {
            alumno_curp: Set(identity_code.to_string()),
            curso_id: Set(course),
            created_at: Set(chrono::Utc::now().into()),
            ..Default::default()
        };

        match row.insert(&txn).await {
            Ok(_) => {
                txn.commit().await?;
                Ok(InsertOutcome::Inserted)
            }
            // A concurrent writer committed the same pair between our check and insert
            Err(e) if is_unique_violation(&e) => {
                txn.rollback().await?;
                tracing::debug!(identity_code, course_id, "Enrollment insert lost the race");
                Ok(InsertOutcome::AlreadyPresent)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{MockDatabase, Transaction, Value};
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::borrow::Cow;
    use std::collections::BTreeMap;

    /// Database error that sqlx classifies as a unique violation
    #[derive(Debug, thiserror::Error)]
    #[error("duplicate key value violates unique constraint \"inscripciones_alumno_curso_key\"")]
    struct DuplicateKey;

    impl DatabaseError for DuplicateKey {
        fn message(&self) -> &str {
            "duplicate key value violates unique constraint"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            Some(Cow::Borrowed("23505"))
        }

        fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::UniqueViolation
        }
    }

    fn duplicate_key() -> DbErr {
        DbErr::Query(RuntimeErr::SqlxError(sqlx::Error::Database(Box::new(DuplicateKey))))
    }

    fn count_row(n: i64) -> BTreeMap<&'static str, Value> {
        BTreeMap::from([("num_items", Value::BigInt(Some(n)))])
    }

    fn repository(db: MockDatabase) -> Repository {
        Repository::new(DbPool {
            primary: db.into_connection(),
        })
    }

    fn statements(repo: Repository) -> Vec<Transaction> {
        repo.pool.primary.into_transaction_log()
    }

    #[test]
    fn test_course_key_range() {
        assert_eq!(course_key(5), Some(5));
        assert_eq!(course_key(i64::from(i32::MAX) + 1), None);
    }

    #[test]
    fn test_course_lookup_is_parameterized() {
        assert!(FIND_COURSE_SQL.contains("$1"));
        assert!(!FIND_COURSE_SQL.contains('\''));
    }

    #[test]
    fn test_unique_violation_detection() {
        assert!(is_unique_violation(&duplicate_key()));
        assert!(!is_unique_violation(&DbErr::Custom("boom".into())));
        assert!(!is_unique_violation(&DbErr::RecordNotInserted));
    }

    #[tokio::test]
    async fn test_insert_writes_row_in_transaction() {
        let row = Enrollment {
            id: 1,
            alumno_curp: "ABC123".to_string(),
            curso_id: 5,
            created_at: chrono::Utc::now().fixed_offset(),
        };
        let repo = repository(
            MockDatabase::new(DbBackend::Postgres)
                .append_query_results([vec![count_row(0)]])
                .append_query_results([vec![row]]),
        );

        let outcome = repo.insert_enrollment("ABC123", 5).await.unwrap();
        assert_eq!(outcome, InsertOutcome::Inserted);

        let log = format!("{:?}", statements(repo));
        assert!(log.contains("COMMIT"));
        assert!(log.contains("INSERT INTO"));
    }

    #[tokio::test]
    async fn test_insert_skips_existing_pair() {
        let repo = repository(
            MockDatabase::new(DbBackend::Postgres).append_query_results([vec![count_row(1)]]),
        );

        let outcome = repo.insert_enrollment("ABC123", 5).await.unwrap();
        assert_eq!(outcome, InsertOutcome::AlreadyPresent);

        let log = format!("{:?}", statements(repo));
        assert!(log.contains("ROLLBACK"));
        assert!(!log.contains("INSERT"));
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_maps_to_already_present() {
        let repo = repository(
            MockDatabase::new(DbBackend::Postgres)
                .append_query_results([vec![count_row(0)]])
                .append_query_errors([duplicate_key()]),
        );

        let outcome = repo.insert_enrollment("ABC123", 5).await.unwrap();
        assert_eq!(outcome, InsertOutcome::AlreadyPresent);

        let log = format!("{:?}", statements(repo));
        assert!(log.contains("ROLLBACK"));
        assert!(!log.contains("COMMIT"));
    }

    #[tokio::test]
    async fn test_other_insert_errors_propagate() {
        let repo = repository(
            MockDatabase::new(DbBackend::Postgres)
                .append_query_results([vec![count_row(0)]])
                .append_query_errors([DbErr::Custom("relation does not exist".into())]),
        );

        let err = repo.insert_enrollment("ABC123", 5).await.unwrap_err();
        assert!(matches!(err, AppError::Database(_)));
        assert!(!err.is_unavailable());
    }

    #[tokio::test]
    async fn test_out_of_range_course_is_absent() {
        let repo = repository(MockDatabase::new(DbBackend::Postgres));
        let missing = i64::from(i32::MAX) + 1;

        assert!(repo.find_course(missing).await.unwrap().is_none());
        assert!(!repo.enrollment_exists("ABC123", missing).await.unwrap());
    }
}
