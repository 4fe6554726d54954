//! SQLite usage store implementation.
//!
//! Implements `UsageStore` from `flowgate-core`. One row per identity;
//! entitlements are stored as a JSON array and timestamps as RFC 3339 text.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use flowgate_core::quota::UsageStore;
use flowgate_types::error::RepositoryError;
use flowgate_types::tier::{IdentityStatus, Tier, TierLimits, UsageRecord};
use sqlx::Row;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `UsageStore`.
pub struct SqliteUsageStore {
    pool: DatabasePool,
}

impl SqliteUsageStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Private Row types for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

struct UsageRow {
    identity: String,
    tier: String,
    status: String,
    premium_expires_at: Option<String>,
    daily_used: i64,
    daily_reset_at: String,
    monthly_used: i64,
    monthly_reset_at: String,
    daily_limit: i64,
    monthly_limit: i64,
    entitlements: String,
    created_at: String,
    updated_at: String,
}

impl UsageRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            identity: row.try_get("identity")?,
            tier: row.try_get("tier")?,
            status: row.try_get("status")?,
            premium_expires_at: row.try_get("premium_expires_at")?,
            daily_used: row.try_get("daily_used")?,
            daily_reset_at: row.try_get("daily_reset_at")?,
            monthly_used: row.try_get("monthly_used")?,
            monthly_reset_at: row.try_get("monthly_reset_at")?,
            daily_limit: row.try_get("daily_limit")?,
            monthly_limit: row.try_get("monthly_limit")?,
            entitlements: row.try_get("entitlements")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_record(self) -> Result<UsageRecord, RepositoryError> {
        let tier: Tier = self.tier.parse().map_err(RepositoryError::Query)?;
        let status: IdentityStatus = self.status.parse().map_err(RepositoryError::Query)?;
        let entitlements: BTreeSet<String> = serde_json::from_str(&self.entitlements)
            .map_err(|e| RepositoryError::Query(format!("invalid entitlements JSON: {e}")))?;

        Ok(UsageRecord {
            identity: self.identity,
            tier,
            status,
            premium_expires_at: self
                .premium_expires_at
                .as_deref()
                .map(parse_datetime)
                .transpose()?,
            daily_used: to_count(self.daily_used),
            daily_reset_at: parse_datetime(&self.daily_reset_at)?,
            monthly_used: to_count(self.monthly_used),
            monthly_reset_at: parse_datetime(&self.monthly_reset_at)?,
            limits: TierLimits {
                daily_limit: to_count(self.daily_limit),
                monthly_limit: to_count(self.monthly_limit),
                entitlements,
            },
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn to_count(v: i64) -> u64 {
    u64::try_from(v).unwrap_or(0)
}

fn to_column(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn entitlements_json(limits: &TierLimits) -> Result<String, RepositoryError> {
    serde_json::to_string(&limits.entitlements)
        .map_err(|e| RepositoryError::Query(format!("failed to serialize entitlements: {e}")))
}

// ---------------------------------------------------------------------------
// UsageStore implementation
// ---------------------------------------------------------------------------

impl UsageStore for SqliteUsageStore {
    async fn get(&self, identity: &str) -> Result<Option<UsageRecord>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM usage_records WHERE identity = ?")
            .bind(identity)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let usage_row =
                    UsageRow::from_row(&row).map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(usage_row.into_record()?))
            }
            None => Ok(None),
        }
    }

    async fn insert(&self, record: &UsageRecord) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"INSERT INTO usage_records
               (identity, tier, status, premium_expires_at,
                daily_used, daily_reset_at, monthly_used, monthly_reset_at,
                daily_limit, monthly_limit, entitlements, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&record.identity)
        .bind(record.tier.as_str())
        .bind(record.status.as_str())
        .bind(record.premium_expires_at.as_ref().map(format_datetime))
        .bind(to_column(record.daily_used))
        .bind(format_datetime(&record.daily_reset_at))
        .bind(to_column(record.monthly_used))
        .bind(format_datetime(&record.monthly_reset_at))
        .bind(to_column(record.limits.daily_limit))
        .bind(to_column(record.limits.monthly_limit))
        .bind(entitlements_json(&record.limits)?)
        .bind(format_datetime(&record.created_at))
        .bind(format_datetime(&record.updated_at))
        .execute(&self.pool.writer)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Err(
                RepositoryError::Conflict(format!("identity '{}' already registered", record.identity)),
            ),
            Err(e) => Err(RepositoryError::Query(e.to_string())),
        }
    }

    async fn update(&self, record: &UsageRecord) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE usage_records SET
                 tier = ?, status = ?, premium_expires_at = ?,
                 daily_used = ?, daily_reset_at = ?,
                 monthly_used = ?, monthly_reset_at = ?,
                 daily_limit = ?, monthly_limit = ?, entitlements = ?,
                 updated_at = ?
               WHERE identity = ?"#,
        )
        .bind(record.tier.as_str())
        .bind(record.status.as_str())
        .bind(record.premium_expires_at.as_ref().map(format_datetime))
        .bind(to_column(record.daily_used))
        .bind(format_datetime(&record.daily_reset_at))
        .bind(to_column(record.monthly_used))
        .bind(format_datetime(&record.monthly_reset_at))
        .bind(to_column(record.limits.daily_limit))
        .bind(to_column(record.limits.monthly_limit))
        .bind(entitlements_json(&record.limits)?)
        .bind(format_datetime(&record.updated_at))
        .bind(&record.identity)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn list_identities(&self) -> Result<Vec<String>, RepositoryError> {
        let rows = sqlx::query("SELECT identity FROM usage_records ORDER BY identity")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("identity")
                    .map_err(|e| RepositoryError::Query(e.to_string()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Duration;
    use flowgate_core::quota::AccessGate;
    use flowgate_core::quota::window::new_usage_record;
    use flowgate_types::tier::default_tier_policies;

    use crate::sqlite::pool::database_url;

    async fn test_store() -> SqliteUsageStore {
        let dir = tempfile::tempdir().unwrap();
        let pool = DatabasePool::new(&database_url(dir.path())).await.unwrap();
        // Leak the tempdir so it persists for the test duration
        std::mem::forget(dir);
        SqliteUsageStore::new(pool)
    }

    fn premium_record(identity: &str) -> UsageRecord {
        let now = Utc::now();
        new_usage_record(
            identity,
            &default_tier_policies()[1],
            Some(now + Duration::days(30)),
            now,
        )
    }

    #[tokio::test]
    async fn insert_and_get_round_trips_every_field() {
        let store = test_store().await;
        let record = premium_record("0xabc");
        store.insert(&record).await.unwrap();

        let loaded = store.get("0xabc").await.unwrap().unwrap();
        assert_eq!(loaded.tier, Tier::Premium);
        assert_eq!(loaded.status, IdentityStatus::Active);
        assert_eq!(loaded.limits, record.limits);
        assert_eq!(
            loaded.premium_expires_at.map(|t| t.timestamp()),
            record.premium_expires_at.map(|t| t.timestamp())
        );
        assert_eq!(loaded.daily_reset_at, record.daily_reset_at);
        assert!(store.get("0xdef").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_insert_conflicts() {
        let store = test_store().await;
        store.insert(&premium_record("0xabc")).await.unwrap();
        let err = store.insert(&premium_record("0xabc")).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn update_persists_counters_and_status() {
        let store = test_store().await;
        let mut record = premium_record("0xabc");
        assert!(matches!(
            store.update(&record).await.unwrap_err(),
            RepositoryError::NotFound
        ));

        store.insert(&record).await.unwrap();
        record.daily_used = 7;
        record.monthly_used = 42;
        record.status = IdentityStatus::Suspended;
        store.update(&record).await.unwrap();

        let loaded = store.get("0xabc").await.unwrap().unwrap();
        assert_eq!(loaded.daily_used, 7);
        assert_eq!(loaded.monthly_used, 42);
        assert_eq!(loaded.status, IdentityStatus::Suspended);
    }

    #[tokio::test]
    async fn list_identities_is_sorted() {
        let store = test_store().await;
        store.insert(&premium_record("b")).await.unwrap();
        store.insert(&premium_record("a")).await.unwrap();
        assert_eq!(
            store.list_identities().await.unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[tokio::test]
    async fn gate_counts_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let url = database_url(dir.path());

        {
            let store = SqliteUsageStore::new(DatabasePool::new(&url).await.unwrap());
            let gate = AccessGate::new(Arc::new(store), default_tier_policies());
            gate.register_identity("0xabc", Tier::Free, None).await.unwrap();
            gate.record_usage("0xabc", "notify").await.unwrap();
            gate.record_usage("0xabc", "notify").await.unwrap();
        }

        let store = SqliteUsageStore::new(DatabasePool::new(&url).await.unwrap());
        let record = store.get("0xabc").await.unwrap().unwrap();
        assert_eq!(record.daily_used, 2);
        assert_eq!(record.monthly_used, 2);
    }
}
