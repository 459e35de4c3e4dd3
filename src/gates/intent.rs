//! IntentGate (spec §4.2) — parse/validate the declared intent, cross-check
//! it against the actual request, and defend against replay.

use super::{Gate, GateOutcome};
use crate::context::PipelineContext;
use crate::nonce_store::{NonceClaim, NonceStore};
use crate::types::{AssessmentRequest, Verdict};
use async_trait::async_trait;
use std::sync::Arc;

pub const GATE_NAME: &str = "intent";
const BYPASS_PATHS: &[&str] = &["/health", "/docs", "/openapi.json"];

pub struct IntentGate {
    nonce_store: Arc<NonceStore>,
    is_dev: bool,
}

impl IntentGate {
    pub fn new(nonce_store: Arc<NonceStore>, is_dev: bool) -> Self {
        IntentGate { nonce_store, is_dev }
    }
}

#[async_trait]
impl Gate for IntentGate {
    fn name(&self) -> &'static str {
        GATE_NAME
    }

    async fn check(&self, req: &AssessmentRequest, ctx: &mut PipelineContext) -> GateOutcome {
        let start = std::time::Instant::now();
        let latency = || start.elapsed().as_secs_f64() * 1000.0;

        if super::is_bypassed(&req.path(), BYPASS_PATHS) {
            return GateOutcome::Forward;
        }

        // 1. Presence.
        let Some(header) = req.header("X-Veil-Intent") else {
            return GateOutcome::Block(Verdict::block(
                GATE_NAME,
                "Missing Intent Declaration",
                latency(),
            ));
        };

        // 2 + 3. JSON parse + schema, in one step: serde's derive already
        // enforces "all required fields present, enum closed, no extra
        // fields" (deny_unknown_fields), so a parse failure and a schema
        // failure are the same Rust error — we distinguish them only for
        // the reason string, matching spec's two distinct BLOCK reasons.
        let intent: crate::types::IntentDeclaration = match serde_json::from_str(header) {
            Ok(intent) => intent,
            Err(e) if e.is_data() => {
                return GateOutcome::Block(Verdict::block(
                    GATE_NAME,
                    format!("Intent Schema Error - {e}"),
                    latency(),
                ));
            }
            Err(e) => {
                return GateOutcome::Block(Verdict::block(
                    GATE_NAME,
                    format!("Invalid Intent JSON - {e}"),
                    latency(),
                ));
            }
        };

        // 4. Cross-check — the "lie detector".
        let actual_action = format!("{} {}", req.method, req.path());
        if intent.action != actual_action {
            return GateOutcome::Block(Verdict::block(
                GATE_NAME,
                format!(
                    "Intent-Action Mismatch (Claimed: {}, Actual: {})",
                    intent.action, actual_action
                ),
                latency(),
            ));
        }

        // 5. Replay.
        match self.nonce_store.claim_or_reject(&intent.nonce).await {
            NonceClaim::Fresh => {}
            NonceClaim::Replayed => {
                return GateOutcome::Block(Verdict::block(
                    GATE_NAME,
                    "Replay Attack Detected",
                    latency(),
                ));
            }
            NonceClaim::Unreachable => {
                // Fail-open exception (spec §4.2): dev may pass with a
                // warning; prod must fail-closed.
                if !self.is_dev {
                    return GateOutcome::Block(Verdict::block(
                        GATE_NAME,
                        "Nonce Store Unreachable",
                        latency(),
                    ));
                }
                tracing::warn!("IntentGate: nonce store unreachable, allowing (dev only)");
            }
        }

        ctx.intent = Some(intent);
        GateOutcome::Forward
    }
}
