//! Core data model (spec §3).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What the proxy submits for assessment. Immutable within the pipeline —
/// gates attach derived context via [`crate::context::PipelineContext`],
/// never by mutating this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentRequest {
    pub method: String,
    pub url: String,
    pub host: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, with = "body_as_base64", skip_serializing_if = "Option::is_none")]
    pub body: Option<Vec<u8>>,
    pub client_address: String,
}

impl AssessmentRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The request path without query string, as used by the intent
    /// cross-check (spec §4.2).
    pub fn path(&self) -> String {
        match url::Url::parse(&self.url) {
            Ok(parsed) => parsed.path().to_string(),
            // Treat an unparseable URL as already a bare path.
            Err(_) => self.url.split('?').next().unwrap_or("").to_string(),
        }
    }
}

mod body_as_base64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(bytes) => s.serialize_str(&base64::Engine::encode(
                &base64::engine::general_purpose::STANDARD,
                bytes,
            )),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        match raw {
            Some(s) => base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &s)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

/// Self-assessed risk that gates the judge path (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// The caller's self-description. Strict schema: unknown fields are a
/// validation error, per spec §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IntentDeclaration {
    pub goal: String,
    pub action: String,
    pub justification: String,
    pub risk_level: RiskLevel,
    pub nonce: String,
    pub timestamp: i64,
}

/// Pipeline outcome (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum VerdictStatus {
    Allow,
    Block,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub status: VerdictStatus,
    pub reason: String,
    pub gate_that_decided: &'static str,
    pub latency_ms: f64,
}

/// Reasons that mark a BLOCK as `DependencyUnavailable` (HTTP 503) rather
/// than a clean `ClientRejection` deny (HTTP 403) — spec §4.3, §4.4, §7's
/// explicit "this distinction is observable".
const DEPENDENCY_UNAVAILABLE_REASONS: &[&str] = &[
    "Policy Engine Unreachable",
    "Policy Engine Unavailable",
    "Judge Unavailable",
];

impl Verdict {
    pub fn allow(gate: &'static str, latency_ms: f64) -> Self {
        Verdict {
            status: VerdictStatus::Allow,
            reason: "Allowed".to_string(),
            gate_that_decided: gate,
            latency_ms,
        }
    }

    pub fn block(gate: &'static str, reason: impl Into<String>, latency_ms: f64) -> Self {
        Verdict {
            status: VerdictStatus::Block,
            reason: reason.into(),
            gate_that_decided: gate,
            latency_ms,
        }
    }

    pub fn is_allow(&self) -> bool {
        self.status == VerdictStatus::Allow
    }

    /// HTTP status for this outcome (spec §6): 200 on allow, 503 when a
    /// dependency (policy evaluator, model endpoint) was unreachable or
    /// unavailable, 403 for every other clean denial.
    pub fn http_status_code(&self) -> u16 {
        match self.status {
            VerdictStatus::Allow => 200,
            VerdictStatus::Block => {
                if DEPENDENCY_UNAVAILABLE_REASONS.contains(&self.reason.as_str()) {
                    503
                } else {
                    403
                }
            }
        }
    }
}

/// Cache entry for a judge outcome, keyed by content fingerprint (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedJudgement {
    pub verdict: bool,
    pub confidence: f64,
    pub reason: String,
}

/// A single entry in the verifiable ledger (spec §3, §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub timestamp: i64,
    pub data: serde_json::Value,
    pub prev_hash: String,
    pub signature: String,
    #[serde(default)]
    pub verification_data: Option<String>,
}

/// The captured pipeline outcome recorded for every request (spec §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentOutcome {
    pub path: String,
    pub method: String,
    pub client_ip: String,
    pub status_code: u16,
    pub latency_ms: f64,
    pub layers_passed: String,
    pub intent_header_present: bool,
}
