//! Shared Postgres plumbing: schema bootstrap, error mapping, row decoding helpers.
//!
//! ## Error Mapping
//!
//! | SQLx Error | StoreError |
//! |------------|------------|
//! | Database (`23505` unique violation) | `Storage` |
//! | Database (`23514` check violation) | `Corrupt` |
//! | RowNotFound | `NotFound` |
//! | Decode / ColumnDecode | `Corrupt` |
//! | anything else (pool, io, tls) | `Storage` |

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;

use mediawatch_screening::{Subject, SubjectKind};

use crate::error::StoreError;

const SCHEMA: &str = include_str!("../migrations/0001_adverse_media.sql");

/// Create the tables if they do not exist yet. Idempotent.
#[instrument(skip(pool), err)]
pub async fn apply_schema(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .map_err(|e| map_sqlx_error("apply_schema", e))?;
    Ok(())
}

pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23514") => StoreError::Corrupt(msg),
                _ => StoreError::Storage(msg),
            }
        }
        sqlx::Error::RowNotFound => StoreError::NotFound(format!("{operation}: row not found")),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Corrupt(format!("{operation}: {err}"))
        }
        other => StoreError::Storage(format!("{operation}: {other}")),
    }
}

pub(crate) fn decode(operation: &str) -> impl Fn(sqlx::Error) -> StoreError + '_ {
    move |e| StoreError::Corrupt(format!("failed to decode {operation} row: {e}"))
}

/// Read the `(subject_kind, subject_id)` column pair.
pub(crate) fn subject_from_row(row: &PgRow) -> Result<Subject, StoreError> {
    let kind: String = row.try_get("subject_kind").map_err(decode("subject"))?;
    let id: i64 = row.try_get("subject_id").map_err(decode("subject"))?;
    let kind: SubjectKind = kind
        .parse()
        .map_err(|e| StoreError::Corrupt(format!("subject_kind: {e}")))?;
    Ok(Subject::from_parts(kind, id))
}
