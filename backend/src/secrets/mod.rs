//! Ephemeral store for decrypted guardian material.
//!
//! Values live in process memory only and are never written to any
//! persistent medium. Entries expire on a sliding TTL; completion of the
//! owning job must still delete them explicitly.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::time::now_ms;

pub fn private_key_key(election_id: &Uuid, guardian_sequence: i64) -> String {
    format!("guardian:privatekey:{election_id}:{guardian_sequence}")
}

pub fn polynomial_key(election_id: &Uuid, guardian_sequence: i64) -> String {
    format!("guardian:polynomial:{election_id}:{guardian_sequence}")
}

struct Entry {
    value: String,
    expires_at_ms: u64,
}

pub struct SecretCache {
    ttl_ms: u64,
    inner: Mutex<HashMap<String, Entry>>,
}

impl SecretCache {
    pub fn new(ttl_minutes: u64) -> Self {
        Self {
            ttl_ms: ttl_minutes * 60_000,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Insert or overwrite. Idempotent.
    pub fn put(&self, key: &str, value: String) {
        self.put_at(key, value, now_ms());
    }

    /// Fetch a live value, refreshing its sliding expiry.
    /// Expired entries read as absent and are dropped on the way out.
    pub fn get(&self, key: &str) -> Option<String> {
        self.get_at(key, now_ms())
    }

    pub fn exists(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Remove an entry. Idempotent; absent keys are a no-op.
    pub fn delete(&self, key: &str) {
        if self.inner.lock().remove(key).is_some() {
            debug!(key, "secret deleted");
        }
    }

    /// Drop every expired entry. Called opportunistically; correctness
    /// does not depend on it since reads check expiry themselves.
    pub fn purge_expired(&self) {
        let now = now_ms();
        self.inner.lock().retain(|_, e| e.expires_at_ms > now);
    }

    fn put_at(&self, key: &str, value: String, now: u64) {
        let mut guard = self.inner.lock();
        guard.insert(
            key.to_string(),
            Entry {
                value,
                expires_at_ms: now + self.ttl_ms,
            },
        );
    }

    fn get_at(&self, key: &str, now: u64) -> Option<String> {
        let mut guard = self.inner.lock();
        match guard.get_mut(key) {
            Some(e) if e.expires_at_ms > now => {
                e.expires_at_ms = now + self.ttl_ms;
                Some(e.value.clone())
            }
            Some(_) => {
                guard.remove(key);
                None
            }
            None => None,
        }
    }
}
