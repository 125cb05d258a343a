//! Key pool state and circular rotation
//!
//! The pool owns an immutable, non-empty list of keys plus mutable rotation
//! state (active index, per-key usage counters, optional exhaustion cooldown).
//! All mutation goes through the methods below, each of which holds the state
//! lock for a single short critical section.

use std::time::{Duration, Instant};

use common::Secret;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// The key selected for one attempt, with its position in the pool.
#[derive(Debug, Clone)]
pub struct KeyLease {
    pub index: usize,
    pub key: Secret<String>,
}

#[derive(Debug)]
struct PoolState {
    cursor: usize,
    usage: Vec<u64>,
    rotations: u64,
    cooldown_until: Option<Instant>,
}

/// Rotating set of upstream credentials.
///
/// Constructed once per process and shared via `Arc`. Invariant:
/// `0 <= cursor < keys.len()`, and `keys` is never empty.
pub struct KeyPool {
    keys: Vec<Secret<String>>,
    state: Mutex<PoolState>,
}

impl KeyPool {
    /// Build a pool over `keys`. Fails with `EmptyPool` if there are none.
    pub fn new(keys: Vec<Secret<String>>) -> Result<Self> {
        if keys.is_empty() {
            return Err(Error::EmptyPool);
        }
        info!(keys = keys.len(), "key pool initialized");
        let usage = vec![0; keys.len()];
        Ok(Self {
            keys,
            state: Mutex::new(PoolState {
                cursor: 0,
                usage,
                rotations: 0,
                cooldown_until: None,
            }),
        })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Always false: construction rejects empty key lists.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn lease(&self, index: usize) -> KeyLease {
        KeyLease {
            index,
            key: self.keys[index].clone(),
        }
    }

    /// The active key.
    pub async fn current(&self) -> KeyLease {
        let cursor = self.state.lock().await.cursor;
        self.lease(cursor)
    }

    /// Advance the cursor circularly and return the new active key.
    pub async fn rotate(&self) -> KeyLease {
        let mut state = self.state.lock().await;
        state.cursor = (state.cursor + 1) % self.keys.len();
        state.rotations += 1;
        self.lease(state.cursor)
    }

    /// Advance only if the cursor still points at `index`.
    ///
    /// When several in-flight requests fail on the same key, only the first
    /// report moves the cursor; the rest observe it already moved and pick up
    /// the new active key.
    pub async fn rotate_past(&self, index: usize) -> KeyLease {
        let mut state = self.state.lock().await;
        if state.cursor == index {
            state.cursor = (state.cursor + 1) % self.keys.len();
            state.rotations += 1;
        } else {
            debug!(
                key_index = index,
                cursor = state.cursor,
                "cursor already moved past key, not rotating"
            );
        }
        self.lease(state.cursor)
    }

    /// Count one successful request against the key at `index`.
    pub async fn record_usage(&self, index: usize) {
        let mut state = self.state.lock().await;
        match state.usage.get_mut(index) {
            Some(count) => *count += 1,
            None => warn!(key_index = index, "usage recorded for unknown key index"),
        }
    }

    /// Requests served by the key at `index`.
    pub async fn usage(&self, index: usize) -> u64 {
        self.state
            .lock()
            .await
            .usage
            .get(index)
            .copied()
            .unwrap_or(0)
    }

    /// Zero all usage counters.
    pub async fn reset_usage(&self) {
        let mut state = self.state.lock().await;
        state.usage.iter_mut().for_each(|c| *c = 0);
        info!("key usage counters reset");
    }

    /// Total cursor advances since startup.
    pub async fn rotations(&self) -> u64 {
        self.state.lock().await.rotations
    }

    /// Rotate past every key whose counter has reached `max_requests`.
    ///
    /// Returns the selected key and how many keys were skipped. Scans at most
    /// one full cycle. If every key is saturated, the counters are reset and
    /// the active key is returned as the start of a new cycle.
    pub async fn advance_past_saturated(&self, max_requests: u64) -> (KeyLease, usize) {
        let mut state = self.state.lock().await;
        let n = self.keys.len();
        let mut skipped = 0;
        for _ in 0..n {
            if state.usage[state.cursor] < max_requests {
                return (self.lease(state.cursor), skipped);
            }
            let from = state.cursor;
            state.cursor = (state.cursor + 1) % n;
            state.rotations += 1;
            skipped += 1;
            warn!(
                from_index = from,
                to_index = state.cursor,
                reason = "usage-threshold",
                max_requests,
                "key reached request threshold, rotating"
            );
        }
        info!(max_requests, "every key reached request threshold, starting new cycle");
        state.usage.iter_mut().for_each(|c| *c = 0);
        (self.lease(state.cursor), skipped)
    }

    /// Refuse new attempts for `duration`.
    pub async fn begin_cooldown(&self, duration: Duration) {
        let until = Instant::now() + duration;
        self.state.lock().await.cooldown_until = Some(until);
        warn!(cooldown_secs = duration.as_secs(), "key pool entering cooldown");
    }

    /// Time left on an active cooldown. An expired cooldown is cleared.
    pub async fn cooldown_remaining(&self) -> Option<Duration> {
        let mut state = self.state.lock().await;
        let until = state.cooldown_until?;
        let now = Instant::now();
        if now >= until {
            info!("key pool cooldown expired");
            state.cooldown_until = None;
            None
        } else {
            Some(until - now)
        }
    }

    /// Pool summary for the health endpoint. Never includes key material.
    pub async fn health(&self) -> serde_json::Value {
        let state = self.state.lock().await;
        let now = Instant::now();
        let cooling_down_secs = state
            .cooldown_until
            .filter(|until| *until > now)
            .map(|until| (until - now).as_secs());

        let keys: Vec<serde_json::Value> = state
            .usage
            .iter()
            .enumerate()
            .map(|(index, requests)| {
                serde_json::json!({
                    "index": index,
                    "requests": requests,
                    "active": index == state.cursor,
                })
            })
            .collect();

        serde_json::json!({
            "keys_total": self.keys.len(),
            "active_index": state.cursor,
            "rotations_total": state.rotations,
            "cooling_down_secs": cooling_down_secs,
            "keys": keys,
        })
    }
}
