//! Prism Server
//!
//! Thin axum surface and CLI over the core research pipeline. The server
//! owns the database, builds one provider client per stage from environment
//! keys, and streams pipeline progress over SSE.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json,
    },
    routing::{get, post},
    Router,
};
use clap::{Parser, Subcommand};
use futures::Stream;
use prism_core::models::{LlmProvider, StageModels};
use prism_core::pipeline::{
    ConsultantRole, Orchestrator, PhaseStatus, PipelineError, PipelineEvent, StageClients,
};
use prism_core::provider::{create_client, SharedModel};
use prism_core::state::{BudgetGate, PrismDb, SessionStore, StoredMessage, UsageLedger};
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, sync::broadcast};
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tracing::{info, warn};
use utoipa::{OpenApi, ToSchema};

/// Application state shared by all handlers
struct AppState {
    orchestrator: Orchestrator,
    db: Arc<PrismDb>,
    event_tx: broadcast::Sender<PipelineEvent>,
}

type SharedState = Arc<AppState>;

// === CLI ===

#[derive(Parser)]
#[command(name = "prism", about = "Multi-model research pipeline")]
struct Args {
    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Clone)]
enum CliCommand {
    /// Start the Prism server (default)
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },
    /// Answer one question and print the processing log
    Ask {
        /// The question to research
        question: String,
        /// Session to continue
        #[arg(short, long)]
        session: Option<String>,
    },
}

// === API Types ===

#[derive(Deserialize, ToSchema)]
struct AskRequest {
    question: String,
    /// Session to continue; omitted means a fresh throwaway session
    session_id: Option<String>,
}

#[derive(Serialize, ToSchema)]
struct ApiError {
    error: String,
}

#[derive(Serialize, ToSchema)]
struct StatusResponse {
    status: String,
    budget_limit_usd: f64,
    spent_usd: f64,
    total_input_tokens: u64,
    total_output_tokens: u64,
}

#[derive(Serialize, ToSchema)]
struct SessionListResponse {
    sessions: Vec<String>,
}

#[derive(Serialize, ToSchema)]
struct SessionResponse {
    session_id: String,
    #[schema(value_type = Vec<Object>)]
    messages: Vec<StoredMessage>,
}

// === Stage model configuration ===

const CONSULTANT_STAGES: [(ConsultantRole, &str); 3] = [
    (ConsultantRole::Contrarian, "contrarian"),
    (ConsultantRole::Structural, "structural"),
    (ConsultantRole::Checklist, "checklist"),
];

fn parse_provider(name: &str) -> Option<LlmProvider> {
    match name.to_ascii_lowercase().as_str() {
        "gemini" => Some(LlmProvider::Gemini),
        "openai" => Some(LlmProvider::OpenAI),
        "anthropic" => Some(LlmProvider::Anthropic),
        "grok" | "xai" => Some(LlmProvider::Grok),
        "openrouter" => Some(LlmProvider::OpenRouter),
        _ => None,
    }
}

/// Build per-stage model selection from the environment.
///
/// Defaults lean on Gemini (cheap flash models for the mechanical stages),
/// and spread the consultant pool across providers when their keys are
/// present. `PRISM_MODEL` / `PRISM_PROVIDER` set the global pair;
/// `PRISM_<STAGE>_MODEL` / `PRISM_<STAGE>_PROVIDER` override one stage.
fn stage_models_from_env() -> StageModels {
    let mut models = StageModels::default();

    if let Ok(provider) = std::env::var("PRISM_PROVIDER") {
        if let Some(provider) = parse_provider(&provider) {
            models.global_provider = provider;
        } else {
            warn!(provider, "unknown PRISM_PROVIDER, keeping default");
        }
    }
    models.global_model = std::env::var("PRISM_MODEL").ok();
    models.base_url = std::env::var("PRISM_BASE_URL").ok();

    // Cheap, fast models for classification and extraction
    for (stage, model) in [
        ("router", "gemini-2.0-flash"),
        ("extractor", "gemini-2.5-flash"),
        ("meta", "gemini-2.5-flash"),
    ] {
        models
            .per_stage_models
            .insert(stage.to_string(), model.to_string());
    }

    // Consultant diversity: different vendors argue with each other better
    // than one vendor argues with itself. Only wire a provider whose key
    // is actually present; missing ones degrade to skipped consultants.
    if std::env::var("XAI_API_KEY").is_ok() {
        models
            .per_stage_providers
            .insert("contrarian".to_string(), LlmProvider::Grok);
        models
            .per_stage_models
            .insert("contrarian".to_string(), "grok-3".to_string());
    }
    if std::env::var("OPENAI_API_KEY").is_ok() {
        models
            .per_stage_providers
            .insert("structural".to_string(), LlmProvider::OpenAI);
        models
            .per_stage_models
            .insert("structural".to_string(), "gpt-4o".to_string());
        models
            .per_stage_providers
            .insert("checklist".to_string(), LlmProvider::OpenAI);
        models
            .per_stage_models
            .insert("checklist".to_string(), "o4-mini".to_string());
    }
    if std::env::var("ANTHROPIC_API_KEY").is_ok() {
        models
            .per_stage_providers
            .insert("secondary_review".to_string(), LlmProvider::Anthropic);
        models.per_stage_models.insert(
            "secondary_review".to_string(),
            LlmProvider::Anthropic.default_model().to_string(),
        );
    }

    for stage in STAGE_IDS {
        let upper = stage.to_ascii_uppercase();
        if let Ok(model) = std::env::var(format!("PRISM_{upper}_MODEL")) {
            models.per_stage_models.insert(stage.to_string(), model);
        }
        if let Ok(provider) = std::env::var(format!("PRISM_{upper}_PROVIDER")) {
            if let Some(provider) = parse_provider(&provider) {
                models.per_stage_providers.insert(stage.to_string(), provider);
            }
        }
    }

    models
}

const STAGE_IDS: [&str; 10] = [
    "router",
    "research",
    "extractor",
    "meta",
    "contrarian",
    "structural",
    "checklist",
    "synthesis",
    "strict_review",
    "secondary_review",
];

/// One client per stage. Core stages must construct; a consultant whose
/// provider key is missing is left out of the pool and the run marks that
/// role skipped.
fn build_clients(models: &StageModels) -> anyhow::Result<StageClients> {
    let required = |stage: &str| -> anyhow::Result<SharedModel> {
        let config = models.resolve(stage);
        create_client(&config)
            .map_err(|e| anyhow::anyhow!("cannot build client for stage '{stage}': {e}"))
    };

    let synthesis = required("synthesis")?;

    let mut consultants = std::collections::BTreeMap::new();
    for (role, stage) in CONSULTANT_STAGES {
        match create_client(&models.resolve(stage)) {
            Ok(client) => {
                consultants.insert(role, client);
            }
            Err(e) => warn!(stage, error = %e, "consultant left unconfigured"),
        }
    }

    // The critique stage is optional hardening; fall back to the synthesis
    // model rather than refusing to start.
    let secondary_review = match create_client(&models.resolve("secondary_review")) {
        Ok(client) => client,
        Err(e) => {
            warn!(error = %e, "secondary review falls back to the synthesis model");
            synthesis.clone()
        }
    };

    Ok(StageClients {
        router: required("router")?,
        research: required("research")?,
        extractor: required("extractor")?,
        meta: required("meta")?,
        consultants,
        synthesis,
        strict_review: required("strict_review")?,
        secondary_review,
    })
}

fn build_orchestrator(
    db: &Arc<PrismDb>,
    event_tx: Option<broadcast::Sender<PipelineEvent>>,
) -> anyhow::Result<Orchestrator> {
    let clients = build_clients(&stage_models_from_env())?;
    let mut orchestrator = Orchestrator::new(clients).with_persistence(
        SessionStore::new(db.connection()),
        UsageLedger::new(db.connection()),
    );
    if let Some(tx) = event_tx {
        orchestrator = orchestrator.with_events(tx);
    }
    Ok(orchestrator)
}

// === Handlers ===

/// Run the full pipeline on one question
#[utoipa::path(
    post,
    path = "/api/v1/ask",
    tag = "pipeline",
    request_body = AskRequest,
    responses(
        (status = 200, description = "Pipeline answer with processing log", body = Object),
        (status = 402, description = "Budget cap already spent", body = ApiError),
        (status = 502, description = "Research failed with no partial data", body = ApiError)
    )
)]
async fn ask(State(state): State<SharedState>, Json(req): Json<AskRequest>) -> impl IntoResponse {
    match state
        .orchestrator
        .answer(&req.question, req.session_id.as_deref())
        .await
    {
        Ok(answer) => (StatusCode::OK, Json(answer)).into_response(),
        Err(e @ PipelineError::Budget(_)) => (
            StatusCode::PAYMENT_REQUIRED,
            Json(ApiError {
                error: e.to_string(),
            }),
        )
            .into_response(),
        Err(e @ PipelineError::ResearchFailed(_)) => (
            StatusCode::BAD_GATEWAY,
            Json(ApiError {
                error: e.to_string(),
            }),
        )
            .into_response(),
    }
}

/// Server health, spend, and budget headroom
#[utoipa::path(
    get,
    path = "/status",
    tag = "status",
    responses((status = 200, body = StatusResponse))
)]
async fn get_status(State(state): State<SharedState>) -> impl IntoResponse {
    let ledger = UsageLedger::new(state.db.connection());
    match ledger.totals() {
        Ok(totals) => (
            StatusCode::OK,
            Json(StatusResponse {
                status: "running".to_string(),
                budget_limit_usd: BudgetGate::default().max_budget_usd,
                spent_usd: totals.total_cost_usd,
                total_input_tokens: totals.total_input_tokens,
                total_output_tokens: totals.total_output_tokens,
            }),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiError {
                error: e.to_string(),
            }),
        )
            .into_response(),
    }
}

/// Known session ids, most recent first
#[utoipa::path(
    get,
    path = "/api/v1/sessions",
    tag = "sessions",
    responses((status = 200, body = SessionListResponse))
)]
async fn list_sessions(State(state): State<SharedState>) -> impl IntoResponse {
    let store = SessionStore::new(state.db.connection());
    match store.session_ids() {
        Ok(sessions) => (StatusCode::OK, Json(SessionListResponse { sessions })).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiError {
                error: e.to_string(),
            }),
        )
            .into_response(),
    }
}

/// Full message history for one session
#[utoipa::path(
    get,
    path = "/api/v1/sessions/{id}",
    tag = "sessions",
    params(("id" = String, Path, description = "Session id")),
    responses(
        (status = 200, body = SessionResponse),
        (status = 404, description = "Unknown session", body = ApiError)
    )
)]
async fn get_session(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let store = SessionStore::new(state.db.connection());
    match store.messages(&id) {
        Ok(messages) if messages.is_empty() => (
            StatusCode::NOT_FOUND,
            Json(ApiError {
                error: format!("no session '{id}'"),
            }),
        )
            .into_response(),
        Ok(messages) => (
            StatusCode::OK,
            Json(SessionResponse {
                session_id: id,
                messages,
            }),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiError {
                error: e.to_string(),
            }),
        )
            .into_response(),
    }
}

/// SSE feed of live pipeline progress events
async fn events(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_tx.subscribe();
    let stream = BroadcastStream::new(rx).map(|msg| {
        let event = match msg {
            Ok(event) => Event::default()
                .json_data(&event)
                .unwrap_or_else(|_| Event::default().comment("serialization failed")),
            // Slow consumer dropped messages; tell it rather than hiding it
            Err(_) => Event::default().comment("lagged"),
        };
        Ok(event)
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

// === OpenAPI Definition ===

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Prism API",
        version = "1.0.0",
        description = "API for the Prism multi-model research pipeline"
    ),
    paths(ask, get_status, list_sessions, get_session),
    components(schemas(
        AskRequest,
        ApiError,
        StatusResponse,
        SessionListResponse,
        SessionResponse
    )),
    tags(
        (name = "pipeline", description = "Question answering"),
        (name = "sessions", description = "Stored conversations"),
        (name = "status", description = "Health and spend")
    )
)]
struct ApiDoc;

async fn serve_openapi() -> impl IntoResponse {
    let spec = ApiDoc::openapi().to_json().unwrap_or_default();
    ([(header::CONTENT_TYPE, "application/json")], spec)
}

// === Server Entry ===

async fn run_server(port: u16) -> anyhow::Result<()> {
    let (event_tx, _) = broadcast::channel::<PipelineEvent>(100);
    let db = Arc::new(PrismDb::open()?);
    let orchestrator = build_orchestrator(&db, Some(event_tx.clone()))?;

    let state: SharedState = Arc::new(AppState {
        orchestrator,
        db,
        event_tx,
    });

    let app = Router::new()
        .route("/api/v1/ask", post(ask))
        .route("/api/v1/sessions", get(list_sessions))
        .route("/api/v1/sessions/:id", get(get_session))
        .route("/api/v1/events", get(events))
        .route("/api/v1/openapi.json", get(serve_openapi))
        .route("/status", get(get_status))
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "prism server listening");
    info!("endpoints: POST /api/v1/ask, GET /api/v1/sessions, GET /api/v1/events (SSE), GET /status");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn run_ask(question: &str, session: Option<&str>) -> anyhow::Result<()> {
    let db = Arc::new(PrismDb::open()?);
    let orchestrator = build_orchestrator(&db, None)?;

    let answer = orchestrator.answer(question, session).await?;

    println!("{}", answer.text);
    println!();
    println!(
        "--- {} mode ({}){} ---",
        answer.mode,
        answer.routing_reason,
        if answer.degraded { ", degraded" } else { "" }
    );
    for entry in answer.processing_log.entries() {
        let status = match entry.status {
            PhaseStatus::Success => "ok",
            PhaseStatus::Degraded => "degraded",
            PhaseStatus::Error => "error",
            PhaseStatus::Skipped => "skipped",
        };
        match &entry.detail {
            Some(detail) => println!("{:<24} {:<9} {detail}", entry.phase, status),
            None => println!("{:<24} {status}", entry.phase),
        }
    }
    if !answer.sources.is_empty() {
        println!();
        println!("sources:");
        for source in &answer.sources {
            println!("  {source}");
        }
    }
    println!();
    println!(
        "tokens: {} in / {} out (session {})",
        answer.usage.input_tokens, answer.usage.output_tokens, answer.session_id
    );

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    match args.command {
        Some(CliCommand::Ask { question, session }) => {
            run_ask(&question, session.as_deref()).await
        }
        Some(CliCommand::Serve { port }) => run_server(port).await,
        None => run_server(8080).await,
    }
}
