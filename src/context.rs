//! Per-request scratch space threaded through the gate chain (spec §3, §9).
//!
//! `PipelineContext` is exclusively owned by one request. It replaces ambient
//! request-scratch mutation with an explicit value: the parsed intent, a
//! read-once body cache so the policy gate's body read doesn't starve
//! downstream gates, and a monotonic clock for latency accounting.

use crate::types::IntentDeclaration;
use std::time::Instant;

#[derive(Debug)]
pub struct PipelineContext {
    pub intent: Option<IntentDeclaration>,
    body_cache: Option<Vec<u8>>,
    start: Instant,
}

impl PipelineContext {
    pub fn new() -> Self {
        PipelineContext {
            intent: None,
            body_cache: None,
            start: Instant::now(),
        }
    }

    /// First read buffers `body` for every later caller; later reads are
    /// served from the buffer rather than re-consuming anything.
    pub fn buffer_body(&mut self, body: Option<Vec<u8>>) -> Option<&[u8]> {
        if self.body_cache.is_none() {
            self.body_cache = body;
        }
        self.body_cache.as_deref()
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body_cache.as_deref()
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for PipelineContext {
    fn default() -> Self {
        Self::new()
    }
}
