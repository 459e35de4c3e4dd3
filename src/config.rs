//! Configuration for the VEIL decision engine (spec §6).
//!
//! Mirrors the teacher's env-driven `Config::from_env` shape: every knob has
//! a dev-safe default, except the two that `ENV=prod` requires to be
//! explicitly overridden — violating that is `ConfigurationFatal`, not a
//! silent fallback.

use crate::error::VeilError;
use anyhow::{Context, Result};

const DEFAULT_INTERNAL_TOKEN: &str = "dev-secret-token";
const DEFAULT_AUTHORIZED_PROXY_HASH: &str = "UNKNOWN";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Prod,
}

impl Environment {
    pub fn is_dev(&self) -> bool {
        matches!(self, Environment::Dev)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub env: Environment,
    pub bind_addr: String,

    /// Shared secret the proxy must present in `X-Internal-Token` (spec §4.1).
    pub internal_token: String,
    /// Expected container image digest of the authorized proxy (spec §4.1).
    pub authorized_proxy_hash: String,

    pub kv_url: String,
    pub ledger_file: String,
    /// Path to a 32-byte raw Ed25519 seed. When absent, the ledger falls
    /// back to an ephemeral per-process key (spec §9: persistence is a
    /// hook implementations should expose, not something this engine can
    /// decide on the operator's behalf).
    pub signing_key_file: Option<String>,
    pub policy_url: String,
    pub model_url: String,

    pub nonce_ttl_secs: u64,
    pub judge_cache_ttl_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let env = match std::env::var("ENV").unwrap_or_else(|_| "dev".into()).as_str() {
            "prod" => Environment::Prod,
            _ => Environment::Dev,
        };

        let internal_token = std::env::var("INTERNAL_TOKEN")
            .unwrap_or_else(|_| DEFAULT_INTERNAL_TOKEN.to_string());
        let authorized_proxy_hash = std::env::var("AUTHORIZED_PROXY_HASH")
            .unwrap_or_else(|_| DEFAULT_AUTHORIZED_PROXY_HASH.to_string());

        let config = Config {
            env,
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            internal_token,
            authorized_proxy_hash,
            kv_url: std::env::var("KV_URL").unwrap_or_else(|_| "memory://local".into()),
            ledger_file: std::env::var("LEDGER_FILE").unwrap_or_else(|_| "veil.ledger.jsonl".into()),
            signing_key_file: std::env::var("SIGNING_KEY_FILE").ok(),
            policy_url: std::env::var("POLICY_URL")
                .unwrap_or_else(|_| "http://localhost:8181/v1/data/veil/allow".into()),
            model_url: std::env::var("MODEL_URL")
                .unwrap_or_else(|_| "http://localhost:11434/api/generate".into()),
            nonce_ttl_secs: std::env::var("NONCE_TTL_SECS")
                .unwrap_or_else(|_| "300".into())
                .parse()
                .context("Invalid NONCE_TTL_SECS")?,
            judge_cache_ttl_secs: std::env::var("JUDGE_CACHE_TTL_SECS")
                .unwrap_or_else(|_| "3600".into())
                .parse()
                .context("Invalid JUDGE_CACHE_TTL_SECS")?,
        };

        config.validate_for_env()?;
        Ok(config)
    }

    /// Prod forbids the default token/hash (spec §6, §7 `ConfigurationFatal`).
    fn validate_for_env(&self) -> Result<()> {
        if self.env == Environment::Prod {
            if self.internal_token == DEFAULT_INTERNAL_TOKEN {
                return Err(VeilError::ConfigurationFatal(
                    "INTERNAL_TOKEN must be set explicitly in prod".to_string(),
                )
                .into());
            }
            if self.authorized_proxy_hash == DEFAULT_AUTHORIZED_PROXY_HASH {
                return Err(VeilError::ConfigurationFatal(
                    "AUTHORIZED_PROXY_HASH must be set explicitly in prod".to_string(),
                )
                .into());
            }
        }
        Ok(())
    }
}
