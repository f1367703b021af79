//! Postgres-backed `LockProvider`, the reference backend.
//!
//! A single table keyed on `lock_key UNIQUE`. Acquisition is one
//! transaction: `INSERT ... ON CONFLICT (lock_key) DO UPDATE` with a
//! `WHERE` clause that only lets the update through when the existing
//! record is expired (reclaim) or owned by the requester (reentry). A
//! `RETURNING` clause tells us whether the write happened; if not, the
//! row was held by someone else and we report `AlreadyExists`. This is
//! the same single-round-trip, no-partial-window pattern the `db` crate
//! uses for its own repository functions.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{DistributedLock, LockError, LockProvider};

pub struct PostgresLockProvider {
    pool: PgPool,
}

impl PostgresLockProvider {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Delete rows whose `expires_at` is already in the past. Safe to call
    /// on demand or from a periodic background task; acquisition does not
    /// depend on it for correctness (expired rows are reclaimed inline).
    pub async fn sweep_expired(&self) -> Result<u64, LockError> {
        let result = sqlx::query!("DELETE FROM distributed_locks WHERE expires_at < $1", Utc::now())
            .execute(&self.pool)
            .await
            .map_err(|e| LockError::Backend(e.into()))?;
        Ok(result.rows_affected())
    }
}

struct LockRow {
    lock_key: String,
    owner: String,
    expires_at: DateTime<Utc>,
}

#[async_trait]
impl LockProvider for PostgresLockProvider {
    async fn try_acquire(
        &self,
        key: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<DistributedLock, LockError> {
        let now = Utc::now();
        let expires_at = now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());
        let id = Uuid::new_v4();

        let row = sqlx::query_as!(
            LockRow,
            r#"
            INSERT INTO distributed_locks (id, lock_key, owner, expires_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            ON CONFLICT (lock_key) DO UPDATE
              SET owner = EXCLUDED.owner,
                  expires_at = EXCLUDED.expires_at,
                  updated_at = EXCLUDED.updated_at
              WHERE distributed_locks.expires_at < $5
                 OR distributed_locks.owner = EXCLUDED.owner
            RETURNING lock_key, owner, expires_at
            "#,
            id,
            key,
            owner,
            expires_at,
            now,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LockError::Backend(e.into()))?;

        match row {
            Some(r) => Ok(DistributedLock {
                key: r.lock_key,
                owner: r.owner,
                expires_at: r.expires_at,
            }),
            None => Err(LockError::AlreadyExists),
        }
    }

    async fn unlock(&self, key: &str, owner: &str) -> Result<(), LockError> {
        let result = sqlx::query!(
            "DELETE FROM distributed_locks WHERE lock_key = $1 AND owner = $2",
            key,
            owner,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| LockError::Backend(e.into()))?;

        if result.rows_affected() == 0 {
            return Err(LockError::NotFound);
        }
        Ok(())
    }

    async fn refresh(&self, key: &str, owner: &str, ttl: Duration) -> Result<DistributedLock, LockError> {
        let now = Utc::now();
        let expires_at = now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());

        let row = sqlx::query_as!(
            LockRow,
            r#"
            UPDATE distributed_locks
            SET expires_at = $1, updated_at = $2
            WHERE lock_key = $3 AND owner = $4
            RETURNING lock_key, owner, expires_at
            "#,
            expires_at,
            now,
            key,
            owner,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LockError::Backend(e.into()))?;

        row.map(|r| DistributedLock {
            key: r.lock_key,
            owner: r.owner,
            expires_at: r.expires_at,
        })
        .ok_or(LockError::NotFound)
    }

    async fn is_locked(&self, key: &str) -> Result<(bool, Option<String>), LockError> {
        let row = sqlx::query_as!(
            LockRow,
            "SELECT lock_key, owner, expires_at FROM distributed_locks WHERE lock_key = $1",
            key,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LockError::Backend(e.into()))?;

        match row {
            Some(r) if r.expires_at >= Utc::now() => Ok((true, Some(r.owner))),
            _ => Ok((false, None)),
        }
    }
}
