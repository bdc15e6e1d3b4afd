//! Named operation locks with TTL.
//!
//! Serializes conflicting job initiations: at most one holder per key, and
//! the holder of an expired lock is silently reclaimable by the next
//! caller. Acquire-while-held is not an error; callers get the current
//! holder's metadata and surface an informational "already in progress"
//! response instead.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::job::model::TaskType;
use crate::time::now_ms;

pub fn tally_lock_key(election_id: &Uuid) -> String {
    format!("lock:tally:{election_id}")
}

pub fn decryption_lock_key(election_id: &Uuid, guardian_sequence: i64) -> String {
    format!("lock:decryption:{election_id}:{guardian_sequence}")
}

pub fn combine_lock_key(election_id: &Uuid) -> String {
    format!("lock:combine:{election_id}")
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LockMetadata {
    pub holder: String,
    pub operation_type: TaskType,
    pub acquired_at_ms: u64,
}

/// Result of a lock attempt. Being held is a normal outcome, not an error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired,
    Held(LockMetadata),
}

struct LockEntry {
    meta: LockMetadata,
    expires_at_ms: u64,
}

pub struct LockManager {
    ttl_ms: u64,
    inner: Mutex<HashMap<String, LockEntry>>,
}

impl LockManager {
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            ttl_ms: ttl_seconds * 1_000,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Atomic create-if-absent. An expired entry counts as absent.
    pub fn try_acquire(&self, key: &str, holder: &str, op: TaskType) -> AcquireOutcome {
        self.try_acquire_at(key, holder, op, now_ms())
    }

    /// Release a lock. Idempotent; releasing an unheld key is a no-op.
    pub fn release(&self, key: &str) {
        if self.inner.lock().remove(key).is_some() {
            debug!(key, "lock released");
        }
    }

    /// Metadata of the current live holder, if any.
    pub fn get_metadata(&self, key: &str) -> Option<LockMetadata> {
        let now = now_ms();
        let guard = self.inner.lock();
        guard
            .get(key)
            .filter(|e| e.expires_at_ms > now)
            .map(|e| e.meta.clone())
    }

    fn try_acquire_at(&self, key: &str, holder: &str, op: TaskType, now: u64) -> AcquireOutcome {
        let mut guard = self.inner.lock();

        if let Some(existing) = guard.get(key) {
            if existing.expires_at_ms > now {
                return AcquireOutcome::Held(existing.meta.clone());
            }
            info!(
                key,
                stale_holder = %existing.meta.holder,
                "reclaiming expired lock"
            );
        }

        guard.insert(
            key.to_string(),
            LockEntry {
                meta: LockMetadata {
                    holder: holder.to_string(),
                    operation_type: op,
                    acquired_at_ms: now,
                },
                expires_at_ms: now + self.ttl_ms,
            },
        );

        AcquireOutcome::Acquired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_acquire_wins_second_sees_holder() {
        let locks = LockManager::new(7_200);
        let key = tally_lock_key(&Uuid::new_v4());

        assert_eq!(
            locks.try_acquire(&key, "a@example.com", TaskType::Tally),
            AcquireOutcome::Acquired
        );

        match locks.try_acquire(&key, "b@example.com", TaskType::Tally) {
            AcquireOutcome::Held(meta) => {
                assert_eq!(meta.holder, "a@example.com");
                assert_eq!(meta.operation_type, TaskType::Tally);
            }
            other => panic!("expected Held, got {other:?}"),
        }
    }

    #[test]
    fn release_makes_key_acquirable_again() {
        let locks = LockManager::new(7_200);
        let key = combine_lock_key(&Uuid::new_v4());

        locks.try_acquire(&key, "a", TaskType::Combine);
        locks.release(&key);

        assert_eq!(
            locks.try_acquire(&key, "b", TaskType::Combine),
            AcquireOutcome::Acquired
        );
    }

    #[test]
    fn release_of_unheld_key_is_noop() {
        let locks = LockManager::new(7_200);
        locks.release("lock:tally:nope");
    }

    #[test]
    fn expired_lock_is_reclaimable() {
        let locks = LockManager::new(2); // 2_000 ms TTL
        let key = decryption_lock_key(&Uuid::new_v4(), 1);

        assert_eq!(
            locks.try_acquire_at(&key, "stale", TaskType::PartialDecrypt, 0),
            AcquireOutcome::Acquired
        );

        // Still held inside the TTL window.
        assert!(matches!(
            locks.try_acquire_at(&key, "next", TaskType::PartialDecrypt, 1_999),
            AcquireOutcome::Held(_)
        ));

        // Reclaimable once expired; metadata reflects the new holder.
        assert_eq!(
            locks.try_acquire_at(&key, "next", TaskType::PartialDecrypt, 2_000),
            AcquireOutcome::Acquired
        );
        let meta = locks.inner.lock().get(&key).unwrap().meta.clone();
        assert_eq!(meta.holder, "next");
    }

    #[test]
    fn metadata_reports_live_holder_only() {
        let locks = LockManager::new(7_200);
        let key = tally_lock_key(&Uuid::new_v4());

        assert!(locks.get_metadata(&key).is_none());

        locks.try_acquire(&key, "a", TaskType::Tally);
        let meta = locks.get_metadata(&key).unwrap();
        assert_eq!(meta.holder, "a");
    }

    #[test]
    fn metadata_serializes_to_json_envelope() {
        let meta = LockMetadata {
            holder: "a@example.com".into(),
            operation_type: TaskType::Tally,
            acquired_at_ms: 42,
        };
        let v = serde_json::to_value(&meta).unwrap();
        assert_eq!(v["holder"], "a@example.com");
        assert_eq!(v["operationType"], "TALLY");
        assert_eq!(v["acquiredAtMs"], 42);
    }
}
