//! Advisory edit locks.
//!
//! A lock is identified by a signed 64-bit key derived from the record it
//! protects, so every process that edits the same record contends on the same
//! Postgres advisory lock. Locks are transaction scoped: they are released when
//! the owning transaction commits or rolls back and are never released early.

use std::fmt;
use std::time::Duration;

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::AppResult;
use crate::ledger::store::LedgerTx;

/// How long an editor is prepared to wait for a contended lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockPolicy {
    /// Fail with `ConcurrencyConflict` immediately if the lock is held
    FailFast,
    /// Block up to `timeout`, then fail with `ConcurrencyConflict`
    Wait { timeout: Duration },
}

impl Default for LockPolicy {
    fn default() -> Self {
        LockPolicy::Wait { timeout: Duration::from_secs(5) }
    }
}

/// Kind of record an edit lock protects. Part of the key derivation so a
/// settlement and a payout that happen to share an id never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockScope {
    Settlement,
    /// Taken by payout editors outside this crate through `acquire_edit_lock`,
    /// so payout and settlement edits share one lock manager.
    Payout,
}

impl LockScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockScope::Settlement => "settlement",
            LockScope::Payout => "payout",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockKey(i64);

impl LockKey {
    /// First eight bytes of `sha256("<scope>:<id>")`, big endian.
    pub fn for_record(scope: LockScope, record_id: Uuid) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(scope.as_str().as_bytes());
        hasher.update(b":");
        hasher.update(record_id.as_bytes());
        let digest = hasher.finalize();

        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        LockKey(i64::from_be_bytes(bytes))
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Proof that the current transaction holds an edit lock. Dropping it does
/// not release anything; the lock lives until the transaction ends.
#[must_use = "an edit lock only protects work done in the same transaction"]
#[derive(Debug)]
pub struct EditLockGuard {
    key: LockKey,
}

impl EditLockGuard {
    pub fn key(&self) -> LockKey {
        self.key
    }
}

/// Acquire the edit lock for `record_id` inside `tx`.
pub async fn acquire_edit_lock<T: LedgerTx + ?Sized>(
    tx: &mut T,
    scope: LockScope,
    record_id: Uuid,
    policy: LockPolicy,
) -> AppResult<EditLockGuard> {
    let key = LockKey::for_record(scope, record_id);
    tx.acquire_advisory_lock(key, policy).await?;

    tracing::debug!(
        scope = scope.as_str(),
        record_id = %record_id,
        lock_key = %key,
        "Edit lock acquired"
    );

    Ok(EditLockGuard { key })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_deterministic() {
        let id = Uuid::new_v4();
        assert_eq!(
            LockKey::for_record(LockScope::Settlement, id),
            LockKey::for_record(LockScope::Settlement, id)
        );
    }

    #[test]
    fn test_key_differs_per_record_and_scope() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_ne!(
            LockKey::for_record(LockScope::Settlement, a),
            LockKey::for_record(LockScope::Settlement, b)
        );
        assert_ne!(
            LockKey::for_record(LockScope::Settlement, a),
            LockKey::for_record(LockScope::Payout, a)
        );
    }

    #[test]
    fn test_known_key_value() {
        // sha256("settlement:" ++ 16 zero bytes) truncated to 8 bytes
        let key = LockKey::for_record(LockScope::Settlement, Uuid::nil());
        let mut hasher = Sha256::new();
        hasher.update(b"settlement:");
        hasher.update([0u8; 16]);
        let digest = hasher.finalize();
        let expected = i64::from_be_bytes(digest[..8].try_into().unwrap());
        assert_eq!(key.value(), expected);
    }

    #[tokio::test]
    async fn test_payout_and_settlement_locks_do_not_contend() {
        use crate::error::AppError;
        use crate::ledger::{LedgerStore, MemoryLedgerStore};

        let store = MemoryLedgerStore::new();
        let id = Uuid::new_v4();

        let mut editor = store.begin().await.unwrap();
        acquire_edit_lock(&mut editor, LockScope::Payout, id, LockPolicy::FailFast)
            .await
            .unwrap();

        let mut other = store.begin().await.unwrap();
        acquire_edit_lock(&mut other, LockScope::Settlement, id, LockPolicy::FailFast)
            .await
            .unwrap();
        let err = acquire_edit_lock(&mut other, LockScope::Payout, id, LockPolicy::FailFast)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ConcurrencyConflict(_)));
    }
}
