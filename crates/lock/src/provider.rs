//! `LockProvider` — the distributed advisory lock contract.
//!
//! Correctness requirements (restated from the design): mutual exclusion
//! across unexpired records with distinct owners; liveness (an expired
//! record is reclaimable by anyone); reentry (same-owner re-acquire always
//! succeeds and refreshes the expiry); and no partial window in which two
//! owners simultaneously believe they hold the lock — `try_acquire` must
//! be a single atomic test-and-set against the backing store.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::LockError;

/// One lock record as observed by a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributedLock {
    pub key: String,
    pub owner: String,
    pub expires_at: DateTime<Utc>,
}

impl DistributedLock {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// Backend-agnostic distributed lock API.
///
/// Implementors provide the single atomic primitive (`try_acquire`) plus
/// `unlock`/`refresh`/`is_locked`; the retry loop in `lock` is shared
/// across all backends so retry semantics can't drift between them.
#[async_trait]
pub trait LockProvider: Send + Sync {
    /// Atomically test "record absent, expired, or already owned by
    /// `owner`" and, if true, insert/update the record with a fresh
    /// `expires_at`. Returns [`LockError::AlreadyExists`] otherwise.
    async fn try_acquire(
        &self,
        key: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<DistributedLock, LockError>;

    /// Delete the record iff `owner` currently holds it.
    async fn unlock(&self, key: &str, owner: &str) -> Result<(), LockError>;

    /// Extend `expires_at` iff `owner` currently holds the record.
    async fn refresh(&self, key: &str, owner: &str, ttl: Duration) -> Result<DistributedLock, LockError>;

    /// Report whether `key` is currently held, and by whom. An expired
    /// record is reported as not held.
    async fn is_locked(&self, key: &str) -> Result<(bool, Option<String>), LockError>;

    /// Acquire `key`, retrying up to `retries` additional times with
    /// `retry_delay` between attempts when the record is held by another
    /// owner. With `retries == 0` a single failed attempt surfaces
    /// immediately as [`LockError::AlreadyExists`]; with `retries > 0`,
    /// exhausting the budget surfaces as [`LockError::Timeout`].
    async fn lock(
        &self,
        key: &str,
        owner: &str,
        ttl: Duration,
        retries: u32,
        retry_delay: Duration,
    ) -> Result<DistributedLock, LockError> {
        let mut attempts_made = 0u32;
        loop {
            match self.try_acquire(key, owner, ttl).await {
                Ok(lock) => return Ok(lock),
                Err(LockError::AlreadyExists) => {
                    if attempts_made >= retries {
                        return Err(if retries == 0 {
                            LockError::AlreadyExists
                        } else {
                            LockError::Timeout
                        });
                    }
                    attempts_made += 1;
                    tokio::time::sleep(retry_delay).await;
                }
                Err(other) => return Err(other),
            }
        }
    }
}
