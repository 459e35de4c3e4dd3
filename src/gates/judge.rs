//! JudgeGate (spec §4.4) — the pipeline's last line of defense against
//! requests whose declared justification and actual evidence are
//! semantically incoherent.

use super::{Gate, GateOutcome};
use crate::context::PipelineContext;
use crate::types::{AssessmentRequest, CachedJudgement, RiskLevel, Verdict};
use crate::verdict_cache::VerdictCache;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::RegexSet;
use std::sync::Arc;
use std::time::Duration;

pub const GATE_NAME: &str = "judge";
const BYPASS_PATHS: &[&str] = &[
    "/health",
    "/docs",
    "/openapi.json",
    "/dashboard",
    "/api/v1/stats",
    "/api/v1/health",
    "/api/auth",
    "/api/agents",
    "/api/policies",
    "/api/logs",
    "/api/validate",
    "/api/insights",
];
const MODEL_TIMEOUT: Duration = Duration::from_secs(5);
const EVIDENCE_TRUNCATE_BYTES: usize = 500;
const NO_PAYLOAD: &str = "No Payload";
const SKEPTICAL_THRESHOLD: f64 = 0.7;

/// Fixed, case-insensitive attack-pattern table (spec §4.4 step 2).
/// Compiled once into a single `RegexSet` so the pre-filter is a single
/// O(patterns) scan rather than N sequential regex evaluations.
static ATTACK_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new(PATTERN_TABLE.iter().map(|(_, p)| format!("(?i){p}")))
        .expect("attack pattern table compiles")
});

const PATTERN_TABLE: &[(&str, &str)] = &[
    ("DROP TABLE", r"drop\s+table"),
    ("DELETE FROM", r"delete\s+from"),
    ("TRUNCATE TABLE", r"truncate\s+table"),
    ("ALTER TABLE", r"alter\s+table"),
    ("INSERT INTO ... VALUES", r"insert\s+into.*values"),
    ("UPDATE ... SET", r"update\s+.*set"),
    ("exec(", r"exec\s*\("),
    ("eval(", r"eval\s*\("),
    ("<script>", r"<script>"),
    ("javascript:", r"javascript:"),
    ("rm -rf", r"rm\s+-rf"),
    ("curl | sh", r"curl\s+.*\|\s*sh"),
    ("wget | sh", r"wget\s+.*\|\s*sh"),
];

fn pre_check_attack(evidence: &str) -> Option<&'static str> {
    ATTACK_PATTERNS
        .matches(evidence)
        .iter()
        .next()
        .map(|idx| PATTERN_TABLE[idx].0)
}

/// The text-generation endpoint's contract (spec §6): POST
/// `{model, prompt, format:"json", stream:false}`, expect
/// `{response: "<JSON text>"}`.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn judge(&self, justification: &str, evidence: &str) -> Result<ModelVerdict, ModelError>;
}

#[derive(Debug, Clone)]
pub struct ModelVerdict {
    pub verdict: bool,
    pub confidence: f64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    Unavailable,
    InvalidOutput,
}

pub struct HttpModelClient {
    client: reqwest::Client,
    model_url: String,
    model_name: String,
}

impl HttpModelClient {
    pub fn new(client: reqwest::Client, model_url: String, model_name: String) -> Self {
        HttpModelClient { client, model_url, model_name }
    }

    fn prompt(justification: &str, evidence: &str) -> String {
        format!(
            "You are a security judge.\nJUSTIFICATION: \"{justification}\"\nEVIDENCE: \"{evidence}\"\nQUESTION: Does the EVIDENCE entail the JUSTIFICATION?\nRespond with JSON only: {{ \"verdict\": boolean, \"confidence\": float, \"reason\": string }}"
        )
    }
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn judge(&self, justification: &str, evidence: &str) -> Result<ModelVerdict, ModelError> {
        let body = serde_json::json!({
            "model": self.model_name,
            "prompt": Self::prompt(justification, evidence),
            "format": "json",
            "stream": false,
        });

        let response = self
            .client
            .post(&self.model_url)
            .json(&body)
            .timeout(MODEL_TIMEOUT)
            .send()
            .await
            .map_err(|_| ModelError::Unavailable)?;

        if !response.status().is_success() {
            return Err(ModelError::Unavailable);
        }

        let envelope: serde_json::Value =
            response.json().await.map_err(|_| ModelError::InvalidOutput)?;
        let response_text = envelope
            .get("response")
            .and_then(|v| v.as_str())
            .ok_or(ModelError::InvalidOutput)?;

        let decision: serde_json::Value =
            serde_json::from_str(response_text).map_err(|_| ModelError::InvalidOutput)?;

        let verdict = decision.get("verdict").and_then(|v| v.as_bool());
        let confidence = decision.get("confidence").and_then(|v| v.as_f64());
        let reason = decision.get("reason").and_then(|v| v.as_str());

        match (verdict, confidence, reason) {
            (Some(verdict), Some(confidence), Some(reason)) => Ok(ModelVerdict {
                verdict,
                confidence,
                reason: reason.to_string(),
            }),
            _ => Err(ModelError::InvalidOutput),
        }
    }
}

pub struct JudgeGate {
    cache: Arc<VerdictCache>,
    model: Box<dyn ModelClient>,
}

impl JudgeGate {
    pub fn new(cache: Arc<VerdictCache>, model: Box<dyn ModelClient>) -> Self {
        JudgeGate { cache, model }
    }

    fn extract_evidence(body: Option<&[u8]>) -> String {
        match body {
            Some(bytes) => match std::str::from_utf8(bytes) {
                Ok(text) => {
                    // Truncate to 500 bytes (spec §4.4 step 1), not 500
                    // chars, snapping back to the nearest char boundary so
                    // we never split a multi-byte UTF-8 sequence.
                    let cut = (0..=text.len().min(EVIDENCE_TRUNCATE_BYTES))
                        .rev()
                        .find(|&i| text.is_char_boundary(i))
                        .unwrap_or(0);
                    text[..cut].to_string()
                }
                Err(_) => NO_PAYLOAD.to_string(),
            },
            None => NO_PAYLOAD.to_string(),
        }
    }
}

#[async_trait]
impl Gate for JudgeGate {
    fn name(&self) -> &'static str {
        GATE_NAME
    }

    async fn check(&self, req: &AssessmentRequest, ctx: &mut PipelineContext) -> GateOutcome {
        let start = std::time::Instant::now();
        let latency = || start.elapsed().as_secs_f64() * 1000.0;

        if super::is_bypassed(&req.path(), BYPASS_PATHS) {
            return GateOutcome::Forward;
        }

        let Some(intent) = ctx.intent.clone() else {
            // IntentGate should have blocked first; fail safe rather than
            // invent a risk level.
            return GateOutcome::Block(Verdict::block(
                GATE_NAME,
                "Missing Intent Context",
                latency(),
            ));
        };

        if intent.risk_level == RiskLevel::Low {
            return GateOutcome::Forward;
        }

        let evidence = Self::extract_evidence(ctx.body());

        // Deterministic pre-filter: any match blocks with confidence 1.0,
        // no model call made (spec §4.4 step 2, §8 pre-filter precedence).
        if let Some(matched) = pre_check_attack(&evidence) {
            return GateOutcome::Block(Verdict::block(
                GATE_NAME,
                format!("Pre-Check Block: {matched}"),
                latency(),
            ));
        }

        let fingerprint = VerdictCache::fingerprint(&intent.justification, &evidence);

        let judgement = if let Some(cached) = self.cache.get(&fingerprint).await {
            cached
        } else {
            match self.model.judge(&intent.justification, &evidence).await {
                Ok(raw) => {
                    let mut verdict = raw.verdict;
                    let mut reason = raw.reason;
                    if verdict && raw.confidence < SKEPTICAL_THRESHOLD {
                        verdict = false;
                        reason = format!(
                            "Skeptical Override: Confidence too low ({})",
                            raw.confidence
                        );
                    }
                    let judgement = CachedJudgement {
                        verdict,
                        confidence: raw.confidence,
                        reason,
                    };
                    // Only a clean decision is cached; failures never
                    // overwrite a prior good entry (spec §4.4 step 6).
                    self.cache.put(&fingerprint, &judgement).await;
                    judgement
                }
                Err(ModelError::InvalidOutput) => {
                    return GateOutcome::Block(Verdict::block(
                        GATE_NAME,
                        "Invalid Judge Output (Fail-Closed)",
                        latency(),
                    ));
                }
                Err(ModelError::Unavailable) => {
                    return GateOutcome::Block(Verdict::block(
                        GATE_NAME,
                        "Judge Unavailable",
                        latency(),
                    ));
                }
            }
        };

        if judgement.verdict && judgement.confidence >= SKEPTICAL_THRESHOLD {
            GateOutcome::Forward
        } else {
            GateOutcome::Block(Verdict::block(
                GATE_NAME,
                format!("Judge Denied - {}", judgement.reason),
                latency(),
            ))
        }
    }
}
