//! Hands a partially drained stream from the call that produced it to a
//! later call that drains it. Each entry is taken at most once.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::capabilities::TextStream;
use crate::error::StreamBridgeError;

/// A stream waiting for its consumer.
pub struct StreamHandle {
    pub key: String,
    pub capability: String,
    pub thread_id: String,
    pub tool_call_id: Option<String>,
    pub stream: TextStream,
    pub published_at: DateTime<Utc>,
}

impl StreamHandle {
    pub fn new(
        key: impl Into<String>,
        capability: impl Into<String>,
        thread_id: impl Into<String>,
        stream: TextStream,
    ) -> Self {
        Self {
            key: key.into(),
            capability: capability.into(),
            thread_id: thread_id.into(),
            tool_call_id: None,
            stream,
            published_at: Utc::now(),
        }
    }

    pub fn with_tool_call_id(mut self, id: Option<String>) -> Self {
        self.tool_call_id = id;
        self
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("key", &self.key)
            .field("capability", &self.capability)
            .field("thread_id", &self.thread_id)
            .field("published_at", &self.published_at)
            .finish_non_exhaustive()
    }
}

/// Single-producer, single-consumer handoff keyed by thread or session id.
#[derive(Default)]
pub struct StreamBridge {
    // Never held across an await.
    entries: Mutex<HashMap<String, StreamHandle>>,
}

impl StreamBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a stream under `handle.key`. An occupied key is rejected and the
    /// handle is dropped, closing its stream.
    pub fn publish(&self, handle: StreamHandle) -> Result<(), StreamBridgeError> {
        let mut entries = self.lock();
        if entries.contains_key(&handle.key) {
            tracing::warn!(key = %handle.key, "Stream key already occupied");
            return Err(StreamBridgeError::Occupied { key: handle.key });
        }
        tracing::debug!(key = %handle.key, capability = %handle.capability, "Published stream");
        entries.insert(handle.key.clone(), handle);
        Ok(())
    }

    /// Remove and return the stream under `key`.
    pub fn take(&self, key: &str) -> Option<StreamHandle> {
        self.lock().remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// Drop streams nobody claimed within `ttl`. Returns their keys.
    pub fn prune_expired(&self, ttl: Duration) -> Vec<String> {
        let Some(cutoff) = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_sub_signed(ttl))
        else {
            return Vec::new();
        };
        let mut entries = self.lock();
        let expired: Vec<String> = entries
            .values()
            .filter(|h| h.published_at < cutoff)
            .map(|h| h.key.clone())
            .collect();
        for key in &expired {
            entries.remove(key);
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, StreamHandle>> {
        // A poisoned map is still structurally valid.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
