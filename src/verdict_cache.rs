//! `VerdictCache` — TTL-bounded cache of judge outcomes, keyed by content
//! fingerprint (spec §3, §4.4).

use crate::canonical::sha256_hex;
use crate::types::CachedJudgement;
use crate::kv::KvStore;
use std::sync::Arc;
use std::time::Duration;

pub const JUDGE_CACHE_TTL: Duration = Duration::from_secs(3600);

pub struct VerdictCache {
    kv: Arc<dyn KvStore>,
    ttl: Duration,
}

impl VerdictCache {
    /// `ttl` is the configured judgement lifetime (spec §3: 3600s by
    /// default, overridable via `JUDGE_CACHE_TTL_SECS` — see
    /// [`crate::config::Config`]).
    pub fn new(kv: Arc<dyn KvStore>, ttl: Duration) -> Self {
        VerdictCache { kv, ttl }
    }

    /// Fingerprint = SHA-256 over the canonical `"<justification>|<evidence>"`
    /// byte string (spec §3). Content-addressed, not reference-identical, so
    /// distinct requests with equal content share a cache entry.
    pub fn fingerprint(justification: &str, evidence: &str) -> String {
        let content = format!("{justification}|{evidence}");
        sha256_hex(content.as_bytes())
    }

    fn key(fingerprint: &str) -> String {
        format!("veil:l4:judge:{fingerprint}")
    }

    pub async fn get(&self, fingerprint: &str) -> Option<CachedJudgement> {
        let raw = self.kv.get(&Self::key(fingerprint)).await.ok()??;
        serde_json::from_str(&raw).ok()
    }

    /// A failed judge call is never written to cache (spec §4.4: "the cache
    /// is never authoritative on fail-closed paths"). Callers therefore only
    /// invoke this with a verdict that reached a clean decision.
    pub async fn put(&self, fingerprint: &str, judgement: &CachedJudgement) {
        if let Ok(encoded) = serde_json::to_string(judgement) {
            let _ = self.kv.set_ex(&Self::key(fingerprint), &encoded, self.ttl).await;
        }
    }
}
