//! VEIL server binary — wires the gate chain, the ledger, and the HTTP
//! surface the proxy submits assessment requests to (spec §1, §6).

use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use veil::config::Config;
use veil::gates::identity::{HttpRuntimeInspector, IdentityGate};
use veil::gates::intent::IntentGate;
use veil::gates::judge::{HttpModelClient, JudgeGate};
use veil::gates::policy::PolicyGate;
use veil::gates::Gate;
use veil::kv::{InMemoryKv, KvStore};
use veil::ledger::LedgerRecorder;
use veil::nonce_store::NonceStore;
use veil::pipeline::PipelineHost;
use veil::types::{AssessmentRequest, Verdict, VerdictStatus};
use veil::verdict_cache::VerdictCache;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "configuration fatal, refusing to start");
            std::process::exit(1);
        }
    };
    tracing::info!(env = ?config.env, "VEIL Reflex Engine online");

    let http_client = reqwest::Client::new();

    // Every gate that needs the shared key/value store receives it through
    // this one trait object; swapping `InMemoryKv` for a real backend never
    // touches gate code (spec §9).
    let kv: Arc<dyn KvStore> = Arc::new(InMemoryKv::new());

    let nonce_store = Arc::new(NonceStore::new(
        kv.clone(),
        std::time::Duration::from_secs(config.nonce_ttl_secs),
    ));
    let verdict_cache = Arc::new(VerdictCache::new(
        kv.clone(),
        std::time::Duration::from_secs(config.judge_cache_ttl_secs),
    ));

    let inspector = Box::new(HttpRuntimeInspector::new(
        http_client.clone(),
        format!("{}/containers/json", std::env::var("DOCKER_API_URL").unwrap_or_else(|_| "http://localhost:2375".into())),
    ));
    let model_client = Box::new(HttpModelClient::new(
        http_client.clone(),
        config.model_url.clone(),
        std::env::var("MODEL_NAME").unwrap_or_else(|_| "llama3".into()),
    ));

    let gates: Vec<Arc<dyn Gate>> = vec![
        Arc::new(IdentityGate::new(&config, inspector)),
        Arc::new(IntentGate::new(nonce_store, config.env.is_dev())),
        Arc::new(PolicyGate::new(http_client.clone(), config.policy_url.clone())),
        Arc::new(JudgeGate::new(verdict_cache, model_client)),
    ];

    let ledger = LedgerRecorder::open(&config.ledger_file, config.signing_key_file.as_deref())?;
    let pipeline = Arc::new(PipelineHost::new(gates, ledger));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    let app = Router::new()
        .route("/v1/assess", post(assess_handler))
        .route("/health", get(health_handler))
        .route("/api/v1/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(pipeline);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(serde::Serialize)]
struct AssessmentResponse {
    verdict: String,
    reason: String,
}

impl From<&Verdict> for AssessmentResponse {
    fn from(v: &Verdict) -> Self {
        let verdict = match v.status {
            VerdictStatus::Allow => "ALLOW",
            VerdictStatus::Block => "BLOCK",
        };
        AssessmentResponse {
            verdict: verdict.to_string(),
            reason: v.reason.clone(),
        }
    }
}

/// 200 on allow, 403 on a clean denial, 503 when a dependency was
/// unreachable/unavailable (spec §6) — the distinction scenario (2) and
/// the fail-closed properties (spec §8) depend on.
async fn assess_handler(
    State(pipeline): State<Arc<PipelineHost>>,
    Json(req): Json<AssessmentRequest>,
) -> Response {
    let verdict = pipeline.assess(&req).await;
    let status = StatusCode::from_u16(verdict.http_status_code()).unwrap_or(StatusCode::FORBIDDEN);
    (status, Json(AssessmentResponse::from(&verdict))).into_response()
}

#[derive(serde::Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "active" })
}
