//! Decrypted-profile cache.
//!
//! Templates are decrypted once per user and the plaintext descriptors
//! held as an immutable snapshot behind an `Arc`. Concurrent readers
//! share snapshots; re-enrollment invalidates the entry rather than
//! mutating it, so a reader never observes a half-updated profile.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use rollcall_core::types::FaceDescriptor;

/// One user's decrypted enrollment, frozen at cache-fill time.
pub struct CachedProfile {
    pub descriptors: Vec<FaceDescriptor>,
    /// Plaintext digests, parallel to `descriptors`.
    pub hashes: Vec<String>,
}

#[derive(Default)]
pub struct ProfileCache {
    inner: RwLock<HashMap<String, Arc<CachedProfile>>>,
}

impl ProfileCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, user_id: &str) -> Option<Arc<CachedProfile>> {
        self.inner.read().expect("cache lock").get(user_id).cloned()
    }

    pub fn insert(&self, user_id: &str, profile: CachedProfile) -> Arc<CachedProfile> {
        let snapshot = Arc::new(profile);
        self.inner
            .write()
            .expect("cache lock")
            .insert(user_id.to_string(), Arc::clone(&snapshot));
        snapshot
    }

    /// Drop a user's snapshot. Called on re-enrollment and profile
    /// deletion; the next read repopulates lazily.
    pub fn invalidate(&self, user_id: &str) {
        self.inner.write().expect("cache lock").remove(user_id);
        tracing::debug!(user_id, "profile cache invalidated");
    }
}
