//! PolicyGate (spec §4.3) — consult the external rule evaluator with
//! fail-closed semantics, distinguishing a clean deny (403) from dependency
//! unavailability (503).

use super::{Gate, GateOutcome};
use crate::context::PipelineContext;
use crate::types::{AssessmentRequest, Verdict};
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

pub const GATE_NAME: &str = "policy";
const BYPASS_PATHS: &[&str] = &[
    "/health",
    "/dashboard",
    "/api/v1/stats",
    "/api/v1/health",
    "/docs",
    "/openapi.json",
];
const POLICY_TIMEOUT: Duration = Duration::from_millis(500);

pub struct PolicyGate {
    client: reqwest::Client,
    policy_url: String,
}

impl PolicyGate {
    pub fn new(client: reqwest::Client, policy_url: String) -> Self {
        PolicyGate { client, policy_url }
    }

    fn parse_payload(body: Option<&[u8]>) -> serde_json::Value {
        match body {
            Some(bytes) if !bytes.is_empty() => serde_json::from_slice(bytes)
                .unwrap_or_else(|_| json!({ "raw_size": bytes.len() })),
            _ => json!({}),
        }
    }
}

#[async_trait]
impl Gate for PolicyGate {
    fn name(&self) -> &'static str {
        GATE_NAME
    }

    async fn check(&self, req: &AssessmentRequest, ctx: &mut PipelineContext) -> GateOutcome {
        let start = std::time::Instant::now();
        let latency = || start.elapsed().as_secs_f64() * 1000.0;

        if super::is_bypassed(&req.path(), BYPASS_PATHS) {
            return GateOutcome::Forward;
        }

        // Body preservation: buffer once so downstream (Judge) gates read
        // from the same bytes rather than re-consuming anything.
        let body = ctx.buffer_body(req.body.clone()).map(|b| b.to_vec());
        let payload = Self::parse_payload(body.as_deref());

        let intent_json = ctx
            .intent
            .as_ref()
            .and_then(|i| serde_json::to_value(i).ok())
            .unwrap_or_else(|| json!({}));

        let input = json!({
            "input": {
                "method": req.method,
                "path": req.path(),
                "intent": intent_json,
                "payload": payload,
                "client_address": req.client_address,
            }
        });

        let response = self
            .client
            .post(&self.policy_url)
            .json(&input)
            .timeout(POLICY_TIMEOUT)
            .send()
            .await;

        let response = match response {
            Ok(resp) => resp,
            Err(_) => {
                return GateOutcome::Block(Verdict::block(
                    GATE_NAME,
                    "Policy Engine Unreachable",
                    latency(),
                ));
            }
        };

        if !response.status().is_success() {
            return GateOutcome::Block(Verdict::block(
                GATE_NAME,
                "Policy Engine Unavailable",
                latency(),
            ));
        }

        let decision: Result<serde_json::Value, _> = response.json().await;
        let allowed = match decision {
            Ok(value) => value.get("result").and_then(|v| v.as_bool()),
            Err(_) => None,
        };

        match allowed {
            Some(true) => GateOutcome::Forward,
            Some(false) => {
                GateOutcome::Block(Verdict::block(GATE_NAME, "Policy Violation", latency()))
            }
            None => GateOutcome::Block(Verdict::block(
                GATE_NAME,
                "Policy Engine Unavailable",
                latency(),
            )),
        }
    }
}
