//! # Parameter Repository
//!
//! Versioned key-value records in `config_parameters`.
//!
//! ## Write Semantics
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Parameter Writes                                    │
//! │                                                                         │
//! │  put(name, value)                                                      │
//! │    INSERT ... ON CONFLICT(name) DO UPDATE                              │
//! │    → last write wins, version += 1                                     │
//! │                                                                         │
//! │  compare_and_swap(name, expected, value)                               │
//! │    expected = None     → INSERT only if the row is missing             │
//! │    expected = Some(v)  → UPDATE ... WHERE value = v                    │
//! │    0 rows affected     → StoreError::ConditionFailed { actual }        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{StoreError, StoreResult};

/// One stored parameter.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ParameterRecord {
    pub name: String,
    pub value: String,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

/// Repository for config parameters.
#[derive(Debug, Clone)]
pub struct ParameterRepository {
    pool: SqlitePool,
}

impl ParameterRepository {
    /// Creates a new ParameterRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ParameterRepository { pool }
    }

    /// Fetches a parameter by name.
    pub async fn get(&self, name: &str) -> StoreResult<Option<ParameterRecord>> {
        let record = sqlx::query_as::<_, ParameterRecord>(
            r#"
            SELECT name, value, version, updated_at
            FROM config_parameters
            WHERE name = ?1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Writes a parameter, overwriting any previous value.
    pub async fn put(&self, name: &str, value: &str) -> StoreResult<ParameterRecord> {
        let now = Utc::now();

        debug!(parameter = %name, "Writing parameter");

        let record = sqlx::query_as::<_, ParameterRecord>(
            r#"
            INSERT INTO config_parameters (name, value, version, updated_at)
            VALUES (?1, ?2, 1, ?3)
            ON CONFLICT(name) DO UPDATE SET
                value = excluded.value,
                version = config_parameters.version + 1,
                updated_at = excluded.updated_at
            RETURNING name, value, version, updated_at
            "#,
        )
        .bind(name)
        .bind(value)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    /// Writes `value` only if the current value equals `expected`.
    ///
    /// `expected = None` means the parameter must not exist yet.
    pub async fn compare_and_swap(
        &self,
        name: &str,
        expected: Option<&str>,
        value: &str,
    ) -> StoreResult<ParameterRecord> {
        let now = Utc::now();

        let written = match expected {
            None => {
                sqlx::query_as::<_, ParameterRecord>(
                    r#"
                    INSERT INTO config_parameters (name, value, version, updated_at)
                    VALUES (?1, ?2, 1, ?3)
                    ON CONFLICT(name) DO NOTHING
                    RETURNING name, value, version, updated_at
                    "#,
                )
                .bind(name)
                .bind(value)
                .bind(now)
                .fetch_optional(&self.pool)
                .await?
            }
            Some(current) => {
                sqlx::query_as::<_, ParameterRecord>(
                    r#"
                    UPDATE config_parameters SET
                        value = ?2,
                        version = version + 1,
                        updated_at = ?3
                    WHERE name = ?1 AND value = ?4
                    RETURNING name, value, version, updated_at
                    "#,
                )
                .bind(name)
                .bind(value)
                .bind(now)
                .bind(current)
                .fetch_optional(&self.pool)
                .await?
            }
        };

        match written {
            Some(record) => {
                debug!(parameter = %name, version = record.version, "Conditional write applied");
                Ok(record)
            }
            None => {
                let actual = self.get(name).await?.map(|r| r.value);
                Err(StoreError::ConditionFailed {
                    name: name.to_string(),
                    expected: expected.map(str::to_string),
                    actual,
                })
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use crate::pool::Database;
    use crate::StoreError;

    #[tokio::test]
    async fn test_put_overwrites_and_bumps_version() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.parameters();

        let first = repo.put("/meshstage/stage-registry", "{}").await.unwrap();
        assert_eq!(first.version, 1);

        let second = repo
            .put("/meshstage/stage-registry", r#"{"beta":"sn-1"}"#)
            .await
            .unwrap();
        assert_eq!(second.version, 2);

        let stored = repo.get("/meshstage/stage-registry").await.unwrap().unwrap();
        assert_eq!(stored.value, r#"{"beta":"sn-1"}"#);
    }

    #[tokio::test]
    async fn test_compare_and_swap() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.parameters();

        repo.compare_and_swap("/p/svc-1", None, "alpha").await.unwrap();

        // Row exists now, so an insert-only swap fails
        let err = repo
            .compare_and_swap("/p/svc-1", None, "beta")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::ConditionFailed { actual: Some(ref v), .. } if v == "alpha"
        ));

        let err = repo
            .compare_and_swap("/p/svc-1", Some("prod"), "beta")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ConditionFailed { .. }));

        let record = repo
            .compare_and_swap("/p/svc-1", Some("alpha"), "beta")
            .await
            .unwrap();
        assert_eq!(record.value, "beta");
        assert_eq!(record.version, 2);
    }
}
