//! Usage store trait definition and an in-memory implementation.
//!
//! The infrastructure layer (flowgate-infra) implements `UsageStore` with
//! SQLite persistence. `InMemoryUsageStore` backs tests and ephemeral
//! deployments.

use std::future::Future;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use flowgate_types::error::RepositoryError;
use flowgate_types::tier::UsageRecord;

/// Keyed persistent store of per-identity usage records.
///
/// Single-record reads and writes must be atomic. Read-check-write sequences
/// are serialized per identity by the access gate, not by the store.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait UsageStore: Send + Sync + 'static {
    /// Fetch the record for an identity.
    fn get(
        &self,
        identity: &str,
    ) -> impl Future<Output = Result<Option<UsageRecord>, RepositoryError>> + Send;

    /// Insert a new record. Fails with `Conflict` if the identity exists.
    fn insert(
        &self,
        record: &UsageRecord,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Replace an existing record. Fails with `NotFound` if absent.
    fn update(
        &self,
        record: &UsageRecord,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// All known identities, in no particular order.
    fn list_identities(
        &self,
    ) -> impl Future<Output = Result<Vec<String>, RepositoryError>> + Send;
}

/// `DashMap`-backed store. Not durable across restarts.
#[derive(Debug, Default)]
pub struct InMemoryUsageStore {
    records: DashMap<String, UsageRecord>,
}

impl InMemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl UsageStore for InMemoryUsageStore {
    async fn get(&self, identity: &str) -> Result<Option<UsageRecord>, RepositoryError> {
        Ok(self.records.get(identity).map(|r| r.value().clone()))
    }

    async fn insert(&self, record: &UsageRecord) -> Result<(), RepositoryError> {
        match self.records.entry(record.identity.clone()) {
            Entry::Occupied(_) => Err(RepositoryError::Conflict(format!(
                "identity '{}' already registered",
                record.identity
            ))),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(())
            }
        }
    }

    async fn update(&self, record: &UsageRecord) -> Result<(), RepositoryError> {
        match self.records.get_mut(&record.identity) {
            Some(mut existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn list_identities(&self) -> Result<Vec<String>, RepositoryError> {
        Ok(self.records.iter().map(|r| r.key().clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::window::new_usage_record;
    use chrono::Utc;
    use flowgate_types::tier::default_tier_policies;

    fn record(identity: &str) -> UsageRecord {
        new_usage_record(identity, &default_tier_policies()[0], None, Utc::now())
    }

    #[tokio::test]
    async fn insert_then_get() {
        let store = InMemoryUsageStore::new();
        store.insert(&record("0xabc")).await.unwrap();

        let got = store.get("0xabc").await.unwrap().unwrap();
        assert_eq!(got.identity, "0xabc");
        assert!(store.get("0xdef").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_insert_conflicts() {
        let store = InMemoryUsageStore::new();
        store.insert(&record("0xabc")).await.unwrap();
        let err = store.insert(&record("0xabc")).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn update_requires_existing_record() {
        let store = InMemoryUsageStore::new();
        let mut rec = record("0xabc");
        assert!(matches!(
            store.update(&rec).await.unwrap_err(),
            RepositoryError::NotFound
        ));

        store.insert(&rec).await.unwrap();
        rec.daily_used = 3;
        store.update(&rec).await.unwrap();
        assert_eq!(store.get("0xabc").await.unwrap().unwrap().daily_used, 3);
    }

    #[tokio::test]
    async fn list_identities_returns_all() {
        let store = InMemoryUsageStore::new();
        store.insert(&record("a")).await.unwrap();
        store.insert(&record("b")).await.unwrap();

        let mut ids = store.list_identities().await.unwrap();
        ids.sort();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(store.len(), 2);
    }
}
