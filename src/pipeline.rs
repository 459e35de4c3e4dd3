//! `PipelineHost` — the fixed gate chain and the ledger wrapper around it
//! (spec §4.6, §9).
//!
//! Gate order is Identity → Intent → Policy → Judge, built once at startup
//! and never reordered or introspected at request time. The ledger sits
//! outside every gate: it records the outcome of a request regardless of
//! which gate (if any) blocked it.

use crate::context::PipelineContext;
use crate::gates::Gate;
use crate::ledger::LedgerRecorder;
use crate::types::{AssessmentOutcome, AssessmentRequest, Verdict};
use std::sync::Arc;

pub struct PipelineHost {
    gates: Vec<Arc<dyn Gate>>,
    ledger: Arc<LedgerRecorder>,
}

impl PipelineHost {
    pub fn new(gates: Vec<Arc<dyn Gate>>, ledger: Arc<LedgerRecorder>) -> Self {
        PipelineHost { gates, ledger }
    }

    /// Runs `req` through every gate in order, short-circuiting on the
    /// first block, then records the outcome to the ledger in the
    /// background before returning the verdict to the caller.
    pub async fn assess(&self, req: &AssessmentRequest) -> Verdict {
        let mut ctx = PipelineContext::new();

        let mut verdict = Verdict::allow("pipeline", 0.0);
        let mut layers_passed: Vec<&'static str> = Vec::new();

        for gate in &self.gates {
            match gate.check(req, &mut ctx).await {
                crate::gates::GateOutcome::Forward => {
                    layers_passed.push(gate.name());
                }
                crate::gates::GateOutcome::Block(blocked) => {
                    verdict = blocked;
                    self.record(req, &ctx, &verdict, &layers_passed);
                    return verdict;
                }
            }
        }

        verdict = Verdict::allow("pipeline", ctx.elapsed_ms());
        self.record(req, &ctx, &verdict, &layers_passed);
        verdict
    }

    fn record(
        &self,
        req: &AssessmentRequest,
        ctx: &PipelineContext,
        verdict: &Verdict,
        layers_passed: &[&'static str],
    ) {
        let outcome = AssessmentOutcome {
            path: req.path(),
            method: req.method.clone(),
            client_ip: req.client_address.clone(),
            status_code: verdict.http_status_code(),
            latency_ms: ctx.elapsed_ms(),
            layers_passed: if verdict.is_allow() {
                "ALL".to_string()
            } else {
                layers_passed.join(",")
            },
            intent_header_present: req.header("X-Veil-Intent").is_some(),
        };
        self.ledger.record_async(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gates::GateOutcome;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct AlwaysForward(&'static str);

    #[async_trait]
    impl Gate for AlwaysForward {
        fn name(&self) -> &'static str {
            self.0
        }
        async fn check(&self, _req: &AssessmentRequest, _ctx: &mut PipelineContext) -> GateOutcome {
            GateOutcome::Forward
        }
    }

    struct AlwaysBlock(&'static str, &'static str);

    #[async_trait]
    impl Gate for AlwaysBlock {
        fn name(&self) -> &'static str {
            self.0
        }
        async fn check(&self, _req: &AssessmentRequest, _ctx: &mut PipelineContext) -> GateOutcome {
            GateOutcome::Block(Verdict::block(self.0, self.1, 0.0))
        }
    }

    fn req() -> AssessmentRequest {
        AssessmentRequest {
            method: "POST".into(),
            url: "https://proxy.internal/v1/assess".into(),
            host: "proxy.internal".into(),
            headers: HashMap::new(),
            body: None,
            client_address: "10.0.0.5".into(),
        }
    }

    fn ledger_in(dir: &tempfile::TempDir) -> Arc<LedgerRecorder> {
        LedgerRecorder::open(dir.path().join("ledger.jsonl"), None).unwrap()
    }

    #[tokio::test]
    async fn all_gates_forwarding_allows() {
        let dir = tempfile::tempdir().unwrap();
        let host = PipelineHost::new(
            vec![Arc::new(AlwaysForward("a")), Arc::new(AlwaysForward("b"))],
            ledger_in(&dir),
        );
        let verdict = host.assess(&req()).await;
        assert!(verdict.is_allow());
    }

    #[tokio::test]
    async fn first_blocking_gate_short_circuits_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let host = PipelineHost::new(
            vec![
                Arc::new(AlwaysForward("identity")),
                Arc::new(AlwaysBlock("intent", "Missing Intent Declaration")),
                Arc::new(AlwaysBlock("policy", "should never run")),
            ],
            ledger_in(&dir),
        );
        let verdict = host.assess(&req()).await;
        assert!(!verdict.is_allow());
        assert_eq!(verdict.gate_that_decided, "intent");
        assert_eq!(verdict.reason, "Missing Intent Declaration");
    }
}
