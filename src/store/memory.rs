use async_trait::async_trait;
use dashmap::DashMap;

use super::{apply_mutation, Filter, KeyedLocks, Locked, Mutator, RequestStore};
use crate::errors::StoreError;
use crate::models::approval::{ApprovalRequest, NewApprovalRequest, RequestKey};

/// Process-local store. Same locking discipline as the durable backends,
/// nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    records: DashMap<RequestKey, ApprovalRequest>,
    locks: KeyedLocks,
}

impl MemoryStore {
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

#[async_trait]
impl RequestStore for MemoryStore {
    async fn create(&self, new: NewApprovalRequest) -> Result<ApprovalRequest, StoreError> {
        if !new.key.is_valid() {
            return Err(StoreError::InvalidKey(new.key));
        }
        let _guard = self.locks.acquire(&new.key).await;
        if self.records.contains_key(&new.key) {
            return Err(StoreError::AlreadyExists(new.key));
        }
        let key = new.key.clone();
        let record = new.into_record();
        self.records.insert(key, record.clone());
        Ok(record)
    }

    async fn get(&self, key: &RequestKey) -> Result<ApprovalRequest, StoreError> {
        self.records
            .get(key)
            .map(|r| r.value().clone())
            .ok_or_else(|| StoreError::NotFound(key.clone()))
    }

    async fn with_lock(&self, key: &RequestKey, mutate: Mutator) -> Result<Locked, StoreError> {
        let _guard = self.locks.acquire(key).await;
        let current = self.get(key).await?;
        match apply_mutation(&current, mutate) {
            Some(next) => {
                self.records.insert(key.clone(), next.clone());
                Ok(Locked {
                    record: next,
                    committed: true,
                })
            }
            None => Ok(Locked {
                record: current,
                committed: false,
            }),
        }
    }

    async fn list(&self, filter: Filter<'_>) -> Result<Vec<ApprovalRequest>, StoreError> {
        Ok(self
            .records
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|r| filter(r))
            .collect())
    }
}
