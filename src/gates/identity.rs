//! IdentityGate (spec §4.1) — validate the bearer token and the runtime
//! identity of the calling sandbox.

use super::{is_bypassed, Gate, GateOutcome};
use crate::config::Config;
use crate::context::PipelineContext;
use crate::types::{AssessmentRequest, Verdict};
use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use subtle::ConstantTimeEq;

pub const GATE_NAME: &str = "identity";
const BYPASS_PATHS: &[&str] = super::IDENTITY_BYPASS_PATHS;
const UNKNOWN_FINGERPRINT: &str = "UNKNOWN";
const ERROR_FINGERPRINT: &str = "ERROR";
const IDENTITY_CACHE_SIZE: usize = 1024;

/// Resolves a client network address to the image digest of the container
/// whose attached network endpoint matches it (spec §4.1 step 3). The
/// container runtime itself is an external collaborator (spec §1); this
/// trait is its entire surface as far as VEIL is concerned.
#[async_trait]
pub trait RuntimeInspector: Send + Sync {
    async fn identity_for(&self, address: &str) -> String;
}

/// Queries a container runtime's HTTP inspection API (e.g. the Docker Engine
/// API) for the image digest of the container bound to `address`.
pub struct HttpRuntimeInspector {
    client: reqwest::Client,
    inspection_url: String,
}

impl HttpRuntimeInspector {
    pub fn new(client: reqwest::Client, inspection_url: String) -> Self {
        HttpRuntimeInspector { client, inspection_url }
    }
}

#[async_trait]
impl RuntimeInspector for HttpRuntimeInspector {
    async fn identity_for(&self, address: &str) -> String {
        let url = format!("{}?address={}", self.inspection_url, address);
        match self.client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.json::<serde_json::Value>().await {
                Ok(body) => body
                    .get("image_digest")
                    .and_then(|v| v.as_str())
                    .unwrap_or(UNKNOWN_FINGERPRINT)
                    .to_string(),
                Err(_) => ERROR_FINGERPRINT.to_string(),
            },
            Ok(_) => UNKNOWN_FINGERPRINT.to_string(),
            Err(_) => ERROR_FINGERPRINT.to_string(),
        }
    }
}

pub struct IdentityGate {
    internal_token: String,
    authorized_proxy_hash: String,
    is_dev: bool,
    inspector: Box<dyn RuntimeInspector>,
    /// Bounded LRU, per-process, single writer per key via this local lock
    /// (spec §4.1, §5).
    cache: Mutex<LruCache<String, String>>,
}

impl IdentityGate {
    pub fn new(config: &Config, inspector: Box<dyn RuntimeInspector>) -> Self {
        IdentityGate {
            internal_token: config.internal_token.clone(),
            authorized_proxy_hash: config.authorized_proxy_hash.clone(),
            is_dev: config.env.is_dev(),
            inspector,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(IDENTITY_CACHE_SIZE).expect("nonzero cache size"),
            )),
        }
    }

    fn token_matches(&self, presented: &str) -> bool {
        // Constant-time comparison (spec §4.1 step 2 explicit requirement).
        let expected = self.internal_token.as_bytes();
        let actual = presented.as_bytes();
        expected.len() == actual.len() && bool::from(expected.ct_eq(actual))
    }

    async fn fingerprint_for(&self, address: &str) -> String {
        if let Some(cached) = self.cache.lock().expect("identity cache lock").get(address) {
            return cached.clone();
        }
        let fingerprint = self.inspector.identity_for(address).await;
        self.cache
            .lock()
            .expect("identity cache lock")
            .put(address.to_string(), fingerprint.clone());
        fingerprint
    }
}

#[async_trait]
impl Gate for IdentityGate {
    fn name(&self) -> &'static str {
        GATE_NAME
    }

    async fn check(&self, req: &AssessmentRequest, _ctx: &mut PipelineContext) -> GateOutcome {
        let start = std::time::Instant::now();
        let latency = || start.elapsed().as_secs_f64() * 1000.0;

        if is_bypassed(&req.path(), BYPASS_PATHS) {
            return GateOutcome::Forward;
        }

        let presented = req.header("X-Internal-Token").unwrap_or("");
        if !self.token_matches(presented) {
            return GateOutcome::Block(Verdict::block(
                GATE_NAME,
                "Unauthorized Handshake",
                latency(),
            ));
        }

        let fingerprint = self.fingerprint_for(&req.client_address).await;

        let accepted = fingerprint == self.authorized_proxy_hash
            || (fingerprint == UNKNOWN_FINGERPRINT && self.is_dev);

        if !accepted {
            return GateOutcome::Block(Verdict::block(
                GATE_NAME,
                "Runtime Identity Mismatch",
                latency(),
            ));
        }

        GateOutcome::Forward
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;
    use std::collections::HashMap;

    struct FixedInspector(String);

    #[async_trait]
    impl RuntimeInspector for FixedInspector {
        async fn identity_for(&self, _address: &str) -> String {
            self.0.clone()
        }
    }

    fn req(token: &str) -> AssessmentRequest {
        let mut headers = HashMap::new();
        headers.insert("X-Internal-Token".to_string(), token.to_string());
        AssessmentRequest {
            method: "POST".into(),
            url: "https://proxy.internal/v1/assess".into(),
            host: "proxy.internal".into(),
            headers,
            body: None,
            client_address: "10.0.0.5".into(),
        }
    }

    fn config(env: Environment, hash: &str) -> Config {
        Config {
            env,
            bind_addr: "0.0.0.0:8080".into(),
            internal_token: "correct-token".into(),
            authorized_proxy_hash: hash.into(),
            kv_url: "memory://local".into(),
            ledger_file: "veil.ledger.jsonl".into(),
            signing_key_file: None,
            policy_url: "http://localhost".into(),
            model_url: "http://localhost".into(),
            nonce_ttl_secs: 300,
            judge_cache_ttl_secs: 3600,
        }
    }

    #[tokio::test]
    async fn missing_token_is_blocked() {
        let gate = IdentityGate::new(
            &config(Environment::Dev, "sha256:abc"),
            Box::new(FixedInspector("sha256:abc".into())),
        );
        let mut ctx = PipelineContext::new();
        let mut r = req("wrong");
        r.headers.remove("X-Internal-Token");
        match gate.check(&r, &mut ctx).await {
            GateOutcome::Block(v) => assert_eq!(v.reason, "Unauthorized Handshake"),
            GateOutcome::Forward => panic!("expected block"),
        }
    }

    #[tokio::test]
    async fn matching_fingerprint_forwards() {
        let gate = IdentityGate::new(
            &config(Environment::Prod, "sha256:abc"),
            Box::new(FixedInspector("sha256:abc".into())),
        );
        let mut ctx = PipelineContext::new();
        match gate.check(&req("correct-token"), &mut ctx).await {
            GateOutcome::Forward => {}
            GateOutcome::Block(v) => panic!("unexpected block: {}", v.reason),
        }
    }

    #[tokio::test]
    async fn mismatched_fingerprint_blocks_in_prod() {
        let gate = IdentityGate::new(
            &config(Environment::Prod, "sha256:abc"),
            Box::new(FixedInspector("sha256:other".into())),
        );
        let mut ctx = PipelineContext::new();
        match gate.check(&req("correct-token"), &mut ctx).await {
            GateOutcome::Block(v) => assert_eq!(v.reason, "Runtime Identity Mismatch"),
            GateOutcome::Forward => panic!("expected block"),
        }
    }

    #[tokio::test]
    async fn unknown_fingerprint_forwards_only_in_dev() {
        let dev_gate = IdentityGate::new(
            &config(Environment::Dev, "sha256:abc"),
            Box::new(FixedInspector(UNKNOWN_FINGERPRINT.into())),
        );
        let mut ctx = PipelineContext::new();
        assert!(matches!(
            dev_gate.check(&req("correct-token"), &mut ctx).await,
            GateOutcome::Forward
        ));

        let prod_gate = IdentityGate::new(
            &config(Environment::Prod, "sha256:abc"),
            Box::new(FixedInspector(UNKNOWN_FINGERPRINT.into())),
        );
        let mut ctx = PipelineContext::new();
        assert!(matches!(
            prod_gate.check(&req("correct-token"), &mut ctx).await,
            GateOutcome::Block(_)
        ));
    }

    #[tokio::test]
    async fn inspector_error_fingerprint_always_blocks() {
        let gate = IdentityGate::new(
            &config(Environment::Dev, "sha256:abc"),
            Box::new(FixedInspector(ERROR_FINGERPRINT.into())),
        );
        let mut ctx = PipelineContext::new();
        assert!(matches!(
            gate.check(&req("correct-token"), &mut ctx).await,
            GateOutcome::Block(_)
        ));
    }

    #[tokio::test]
    async fn bypass_paths_skip_all_checks() {
        let gate = IdentityGate::new(
            &config(Environment::Prod, "sha256:abc"),
            Box::new(FixedInspector(ERROR_FINGERPRINT.into())),
        );
        let mut ctx = PipelineContext::new();
        let mut r = req("anything");
        r.url = "https://proxy.internal/health".into();
        assert!(matches!(gate.check(&r, &mut ctx).await, GateOutcome::Forward));
    }
}
