use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid: {0}")]
    Invalid(String),
    /// The write touches a meal plan that has already been finalized.
    #[error("meal plan is finalized")]
    Finalized,
    #[error("database busy: {0}")]
    Transient(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type DbResult<T> = Result<T, DbError>;

impl From<rusqlite::Error> for DbError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::QueryReturnedNoRows => DbError::NotFound,
            rusqlite::Error::SqliteFailure(f, msg) => {
                let detail = msg.clone().unwrap_or_else(|| f.to_string());
                match f.code {
                    ErrorCode::ConstraintViolation if f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
                        DbError::Invalid("referenced entity does not exist".into())
                    }
                    ErrorCode::ConstraintViolation => DbError::Conflict(detail),
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => DbError::Transient(detail),
                    _ => DbError::Other(e.into()),
                }
            }
            _ => DbError::Other(e.into()),
        }
    }
}

impl From<serde_json::Error> for DbError {
    fn from(e: serde_json::Error) -> Self {
        DbError::Other(e.into())
    }
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> DbResult<Option<T>>;
}

impl<T> OptionalExt<T> for Result<T, rusqlite::Error> {
    fn optional(self) -> DbResult<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_rows_is_not_found() {
        assert!(matches!(DbError::from(rusqlite::Error::QueryReturnedNoRows), DbError::NotFound));
        let missing: Result<i64, rusqlite::Error> = Err(rusqlite::Error::QueryReturnedNoRows);
        assert!(matches!(missing.optional(), Ok(None)));
    }

    #[test]
    fn unique_violations_are_conflicts() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (name TEXT UNIQUE); INSERT INTO t VALUES ('a');").unwrap();
        let err: DbError = conn.execute("INSERT INTO t VALUES ('a')", []).unwrap_err().into();
        assert!(matches!(err, DbError::Conflict(_)));
    }
}
