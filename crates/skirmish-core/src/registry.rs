//! Capsule registry abstraction.
//!
//! The registry's CRUD surface and persistent storage live outside this
//! engine; battles and the evolution engine consume it through
//! [`CapsuleRegistry`]. `MemoryCapsuleRegistry` satisfies the contract
//! without external dependencies and is the default wiring for local use
//! and tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::{CapsuleRecord, Result, Role, SkirmishError};

/// Lookup and creation of capsule configuration records.
#[async_trait]
pub trait CapsuleRegistry: Send + Sync {
    /// Fetch a record by id. `CapsuleNotFound` if absent.
    async fn get(&self, id: &str) -> Result<CapsuleRecord>;

    /// Records of one role, oldest first. `enabled_only` filters out
    /// disabled records.
    async fn list_by_role(&self, role: Role, enabled_only: bool) -> Result<Vec<CapsuleRecord>>;

    /// Register a new record. Never overwrites an existing id.
    async fn create(&self, record: CapsuleRecord) -> Result<CapsuleRecord>;
}

/// In-memory registry backed by a `HashMap`, creation order preserved.
#[derive(Default)]
pub struct MemoryCapsuleRegistry {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    records: HashMap<String, CapsuleRecord>,
    order: Vec<String>,
}

impl MemoryCapsuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CapsuleRegistry for MemoryCapsuleRegistry {
    async fn get(&self, id: &str) -> Result<CapsuleRecord> {
        let inner = self.inner.lock().unwrap();
        inner
            .records
            .get(id)
            .cloned()
            .ok_or_else(|| SkirmishError::CapsuleNotFound(id.to_string()))
    }

    async fn list_by_role(&self, role: Role, enabled_only: bool) -> Result<Vec<CapsuleRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.records.get(id))
            .filter(|record| record.role == role && (!enabled_only || record.enabled))
            .cloned()
            .collect())
    }

    async fn create(&self, record: CapsuleRecord) -> Result<CapsuleRecord> {
        let mut inner = self.inner.lock().unwrap();
        if inner.records.contains_key(&record.id) {
            return Err(SkirmishError::Validation(format!(
                "capsule id {} already registered",
                record.id
            )));
        }
        inner.order.push(record.id.clone());
        inner.records.insert(record.id.clone(), record.clone());
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_and_not_found() {
        let registry = MemoryCapsuleRegistry::new();
        let record = CapsuleRecord::new("probe", Role::Attack, "img:latest");
        let id = record.id.clone();
        registry.create(record).await.unwrap();

        assert_eq!(registry.get(&id).await.unwrap().name, "probe");
        assert!(matches!(
            registry.get("missing").await,
            Err(SkirmishError::CapsuleNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_by_role_is_oldest_first_and_filters_disabled() {
        let registry = MemoryCapsuleRegistry::new();
        let older = CapsuleRecord::new("guard-a", Role::Defense, "img");
        let older_id = older.id.clone();
        registry.create(older).await.unwrap();

        let mut disabled = CapsuleRecord::new("guard-b", Role::Defense, "img");
        disabled.enabled = false;
        registry.create(disabled).await.unwrap();

        registry
            .create(CapsuleRecord::new("probe", Role::Attack, "img"))
            .await
            .unwrap();

        let defenders = registry.list_by_role(Role::Defense, true).await.unwrap();
        assert_eq!(defenders.len(), 1);
        assert_eq!(defenders[0].id, older_id);

        let all_defenders = registry.list_by_role(Role::Defense, false).await.unwrap();
        assert_eq!(all_defenders.len(), 2);
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_id() {
        let registry = MemoryCapsuleRegistry::new();
        let record = CapsuleRecord::new("probe", Role::Attack, "img");
        registry.create(record.clone()).await.unwrap();
        assert!(registry.create(record).await.is_err());
    }
}
