//! In-memory `LockProvider`, thread-safe via a single mutex around a map.
//!
//! Used for tests and for single-process deployments. Same semantics as
//! the Postgres-backed provider — only the storage differs.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::{DistributedLock, LockError, LockProvider};

#[derive(Default)]
pub struct InMemoryLockProvider {
    records: Mutex<HashMap<String, DistributedLock>>,
}

impl InMemoryLockProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockProvider for InMemoryLockProvider {
    async fn try_acquire(
        &self,
        key: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<DistributedLock, LockError> {
        let now = Utc::now();
        let mut records = self.records.lock().unwrap();

        if let Some(existing) = records.get(key) {
            if !existing.is_expired_at(now) && existing.owner != owner {
                return Err(LockError::AlreadyExists);
            }
        }

        let expires_at = now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());
        let lock = DistributedLock {
            key: key.to_string(),
            owner: owner.to_string(),
            expires_at,
        };
        records.insert(key.to_string(), lock.clone());
        Ok(lock)
    }

    async fn unlock(&self, key: &str, owner: &str) -> Result<(), LockError> {
        let mut records = self.records.lock().unwrap();
        match records.get(key) {
            Some(existing) if existing.owner == owner => {
                records.remove(key);
                Ok(())
            }
            _ => Err(LockError::NotFound),
        }
    }

    async fn refresh(&self, key: &str, owner: &str, ttl: Duration) -> Result<DistributedLock, LockError> {
        let now = Utc::now();
        let mut records = self.records.lock().unwrap();
        match records.get_mut(key) {
            Some(existing) if existing.owner == owner => {
                existing.expires_at =
                    now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());
                Ok(existing.clone())
            }
            _ => Err(LockError::NotFound),
        }
    }

    async fn is_locked(&self, key: &str) -> Result<(bool, Option<String>), LockError> {
        let now = Utc::now();
        let records = self.records.lock().unwrap();
        match records.get(key) {
            Some(existing) if !existing.is_expired_at(now) => Ok((true, Some(existing.owner.clone()))),
            _ => Ok((false, None)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mutual_exclusion_across_distinct_owners() {
        let provider = InMemoryLockProvider::new();
        provider
            .try_acquire("k", "owner-a", Duration::from_secs(60))
            .await
            .expect("first acquire succeeds");

        let err = provider
            .try_acquire("k", "owner-b", Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::AlreadyExists));
    }

    #[tokio::test]
    async fn reentry_by_same_owner_refreshes_expiry() {
        let provider = InMemoryLockProvider::new();
        let first = provider
            .try_acquire("k", "owner-a", Duration::from_secs(1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = provider
            .try_acquire("k", "owner-a", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(second.expires_at > first.expires_at);
    }

    #[tokio::test]
    async fn expired_lock_is_reclaimable() {
        let provider = InMemoryLockProvider::new();
        provider
            .try_acquire("k", "owner-a", Duration::from_millis(1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let lock = provider
            .try_acquire("k", "owner-b", Duration::from_secs(60))
            .await
            .expect("expired record should be reclaimable");
        assert_eq!(lock.owner, "owner-b");
    }

    #[tokio::test]
    async fn unlock_requires_matching_owner() {
        let provider = InMemoryLockProvider::new();
        provider
            .try_acquire("k", "owner-a", Duration::from_secs(60))
            .await
            .unwrap();

        assert!(matches!(
            provider.unlock("k", "owner-b").await,
            Err(LockError::NotFound)
        ));
        provider.unlock("k", "owner-a").await.expect("owner matches");
        assert!(!provider.is_locked("k").await.unwrap().0);
    }

    #[tokio::test]
    async fn lock_retries_then_times_out() {
        let provider = InMemoryLockProvider::new();
        provider
            .try_acquire("k", "owner-a", Duration::from_secs(60))
            .await
            .unwrap();

        let err = provider
            .lock("k", "owner-b", Duration::from_secs(60), 2, Duration::from_millis(1))
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::Timeout));
    }

    #[tokio::test]
    async fn lock_with_zero_retries_fails_immediately() {
        let provider = InMemoryLockProvider::new();
        provider
            .try_acquire("k", "owner-a", Duration::from_secs(60))
            .await
            .unwrap();

        let err = provider
            .lock("k", "owner-b", Duration::from_secs(60), 0, Duration::from_millis(1))
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::AlreadyExists));
    }
}
