//! Error taxonomy (spec §7).
//!
//! Gates never propagate errors up the call stack — each gate resolves any
//! failure into a concrete [`crate::types::Verdict`] itself. `VeilError`
//! exists only for the handful of paths where no gate is in a position to
//! produce a verdict at all: ledger write failure and startup configuration
//! validation.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum VeilError {
    /// HTTP 403 — well-formed rejection by a gate (bad token, schema, replay,
    /// policy deny, judge deny). Carried for completeness; in practice gates
    /// return a `Verdict` directly rather than this variant.
    #[error("client rejection: {0}")]
    ClientRejection(String),

    /// HTTP 503 — an upstream dependency (policy evaluator, model endpoint)
    /// could not be reached or timed out.
    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),

    /// HTTP 500 — an invariant the rest of the system assumes was broken
    /// (ledger write failure, unexpected internal state).
    #[error("internal invariant broken: {0}")]
    InternalInvariantBreak(String),

    /// Process refuses to start (e.g. prod env with default secret).
    #[error("configuration fatal: {0}")]
    ConfigurationFatal(String),
}

impl IntoResponse for VeilError {
    fn into_response(self) -> Response {
        let (status, reason) = match &self {
            VeilError::ClientRejection(reason) => (StatusCode::FORBIDDEN, reason.clone()),
            VeilError::DependencyUnavailable(reason) => {
                (StatusCode::SERVICE_UNAVAILABLE, reason.clone())
            }
            VeilError::InternalInvariantBreak(reason) => {
                (StatusCode::INTERNAL_SERVER_ERROR, reason.clone())
            }
            VeilError::ConfigurationFatal(reason) => {
                (StatusCode::INTERNAL_SERVER_ERROR, reason.clone())
            }
        };
        (status, Json(json!({ "verdict": "BLOCK", "reason": reason }))).into_response()
    }
}
