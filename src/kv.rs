//! The shared key/value store is an external collaborator (spec §1): VEIL
//! only needs its `SETNX`+`EXPIRE` / `GET`+`SETEX` contract, not a specific
//! backend. `KvStore` is that contract; [`InMemoryKv`] is the dev/test
//! implementation that makes the contract concrete without standing in for
//! a real Redis deployment.

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};

/// A backend-level failure (connection refused, timeout, protocol error).
/// Distinct from "key absent" — callers that need to fail-closed on an
/// unreachable store (spec §4.2's replay-defense fail-open exception) match
/// on this rather than inferring it from `Ok(false)`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("kv store unreachable: {0}")]
pub struct KvUnavailable(pub String);

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Atomic set-if-absent with a TTL. Returns `Ok(true)` iff this call
    /// created the key (i.e. it was previously absent or had already
    /// expired), `Ok(false)` if another caller holds it.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvUnavailable>;

    /// Fetch a value if present and not expired.
    async fn get(&self, key: &str) -> Result<Option<String>, KvUnavailable>;

    /// Unconditional set with TTL (used for cache writes).
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvUnavailable>;
}

/// In-memory `KvStore` backed by a sharded concurrent map. Suitable for dev
/// and tests; a production deployment injects a Redis-backed `KvStore`
/// behind the same trait so gates never know which backend they're talking
/// to (spec §9: "inject into gates via constructor wiring").
pub struct InMemoryKv {
    entries: DashMap<String, (String, Instant)>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        InMemoryKv {
            entries: DashMap::new(),
        }
    }

    fn is_live(expiry: Instant) -> bool {
        Instant::now() < expiry
    }
}

impl Default for InMemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for InMemoryKv {
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvUnavailable> {
        let expiry = Instant::now() + ttl;
        // DashMap's entry API gives us the atomic set-if-absent-or-expired
        // semantics an external SETNX would provide.
        let created = match self.entries.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert((value.to_string(), expiry));
                true
            }
            dashmap::mapref::entry::Entry::Occupied(mut slot) => {
                if Self::is_live(slot.get().1) {
                    false
                } else {
                    slot.insert((value.to_string(), expiry));
                    true
                }
            }
        };
        Ok(created)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvUnavailable> {
        let value = self.entries.get(key).and_then(|entry| {
            let (value, expiry) = entry.value();
            if Self::is_live(*expiry) {
                Some(value.clone())
            } else {
                None
            }
        });
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvUnavailable> {
        let expiry = Instant::now() + ttl;
        self.entries.insert(key.to_string(), (value.to_string(), expiry));
        Ok(())
    }
}

/// Test/dev-only `KvStore` that always reports the backend as unreachable,
/// used to exercise the fail-open (dev) / fail-closed (prod) paths in
/// `IntentGate` without a real network dependency.
pub struct UnreachableKv;

#[async_trait]
impl KvStore for UnreachableKv {
    async fn set_nx_ex(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<bool, KvUnavailable> {
        Err(KvUnavailable("simulated outage".to_string()))
    }

    async fn get(&self, _key: &str) -> Result<Option<String>, KvUnavailable> {
        Err(KvUnavailable("simulated outage".to_string()))
    }

    async fn set_ex(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), KvUnavailable> {
        Err(KvUnavailable("simulated outage".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_nx_ex_wins_exactly_once() {
        let kv = InMemoryKv::new();
        assert!(kv.set_nx_ex("k", "1", Duration::from_secs(60)).await.unwrap());
        assert!(!kv.set_nx_ex("k", "1", Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn expired_key_can_be_reclaimed() {
        let kv = InMemoryKv::new();
        assert!(kv.set_nx_ex("k", "1", Duration::from_millis(5)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(kv.set_nx_ex("k", "2", Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn get_returns_none_past_ttl() {
        let kv = InMemoryKv::new();
        kv.set_ex("k", "v", Duration::from_millis(5)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(kv.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn concurrent_claims_admit_exactly_one() {
        use std::sync::Arc;
        let kv = Arc::new(InMemoryKv::new());
        let mut handles = Vec::new();
        for _ in 0..32 {
            let kv = kv.clone();
            handles.push(tokio::spawn(async move {
                kv.set_nx_ex("shared-nonce", "1", Duration::from_secs(60)).await.unwrap()
            }));
        }
        let mut wins = 0;
        for h in handles {
            if h.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }
}
