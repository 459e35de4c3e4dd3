//! `NonceStore` — atomic check-and-set for single-use replay tokens
//! (spec §3, §4.2).

use crate::kv::KvStore;
use std::sync::Arc;
use std::time::Duration;

pub const NONCE_TTL: Duration = Duration::from_secs(300);

pub struct NonceStore {
    kv: Arc<dyn KvStore>,
    ttl: Duration,
}

/// Result of attempting to claim a nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceClaim {
    /// The nonce was fresh; this caller now owns it.
    Fresh,
    /// The nonce had already been claimed — a replay.
    Replayed,
    /// The store could not be reached.
    Unreachable,
}

impl NonceStore {
    /// `ttl` is the configured nonce lifetime (spec §3: 300s by default,
    /// overridable via `NONCE_TTL_SECS` — see [`crate::config::Config`]).
    pub fn new(kv: Arc<dyn KvStore>, ttl: Duration) -> Self {
        NonceStore { kv, ttl }
    }

    fn key(nonce: &str) -> String {
        format!("veil:nonce:{nonce}")
    }

    /// Atomically claim `nonce`. Exactly one concurrent caller for the same
    /// nonce observes [`NonceClaim::Fresh`] (spec §4.2, §8 replay-uniqueness
    /// property). This implementation trusts `KvStore::set_nx_ex` to be
    /// linearizable; it never falls back to a read-then-write sequence.
    pub async fn claim_or_reject(&self, nonce: &str) -> NonceClaim {
        match self.kv.set_nx_ex(&Self::key(nonce), "1", self.ttl).await {
            Ok(true) => NonceClaim::Fresh,
            Ok(false) => NonceClaim::Replayed,
            Err(_) => NonceClaim::Unreachable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{InMemoryKv, UnreachableKv};

    #[tokio::test]
    async fn first_claim_is_fresh_second_is_replay() {
        let store = NonceStore::new(Arc::new(InMemoryKv::new()), NONCE_TTL);
        assert_eq!(store.claim_or_reject("n1").await, NonceClaim::Fresh);
        assert_eq!(store.claim_or_reject("n1").await, NonceClaim::Replayed);
    }

    #[tokio::test]
    async fn distinct_nonces_are_independent() {
        let store = NonceStore::new(Arc::new(InMemoryKv::new()), NONCE_TTL);
        assert_eq!(store.claim_or_reject("a").await, NonceClaim::Fresh);
        assert_eq!(store.claim_or_reject("b").await, NonceClaim::Fresh);
    }

    #[tokio::test]
    async fn ttl_expiry_allows_reclaim() {
        let store = NonceStore::new(Arc::new(InMemoryKv::new()), Duration::from_millis(5));
        assert_eq!(store.claim_or_reject("n").await, NonceClaim::Fresh);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.claim_or_reject("n").await, NonceClaim::Fresh);
    }

    #[tokio::test]
    async fn concurrent_same_nonce_admits_exactly_one() {
        let store = Arc::new(NonceStore::new(Arc::new(InMemoryKv::new()), NONCE_TTL));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.claim_or_reject("race").await }));
        }
        let mut fresh = 0;
        for h in handles {
            if h.await.unwrap() == NonceClaim::Fresh {
                fresh += 1;
            }
        }
        assert_eq!(fresh, 1);
    }

    #[tokio::test]
    async fn unreachable_store_is_observable() {
        let store = NonceStore::new(Arc::new(UnreachableKv), NONCE_TTL);
        assert_eq!(store.claim_or_reject("n").await, NonceClaim::Unreachable);
    }
}
