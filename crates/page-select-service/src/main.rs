use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::{Parser, ValueEnum};
use page_select_api::{
    OpenPageRequest, ProgressEntry, SelectTargetRequest, SelectTargetResult, SelectionSession,
    SelectionView, TogglePageRequest, TogglePageResult, ToggleRecordRequest, ToggleRecordResult,
    API_CONTRACT_VERSION,
};
use page_select_core::{Progress, SelectError};
use page_select_source::{ArtworkSource, ConfiguredSource, FixtureSource, SourceConfig};
use serde::Serialize;
use tokio::sync::{watch, Mutex, MutexGuard};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const OPENAPI_YAML: &str = include_str!("../../../openapi/openapi.yaml");

type Session = SelectionSession<Arc<ConfiguredSource>>;

#[derive(Clone)]
struct ServiceState {
    source: Arc<ConfiguredSource>,
    session: Arc<Mutex<Option<Session>>>,
    progress: Arc<watch::Sender<Option<ProgressEntry>>>,
}

impl ServiceState {
    fn new(source: ConfiguredSource) -> Self {
        let (progress, _) = watch::channel(None);
        Self {
            source: Arc::new(source),
            session: Arc::new(Mutex::new(None)),
            progress: Arc::new(progress),
        }
    }

    /// Runs are serialized per session; a second caller is turned away rather than queued.
    fn claim(&self) -> Result<MutexGuard<'_, Option<Session>>, ServiceError> {
        self.session.try_lock().map_err(|_| {
            ServiceError::new(StatusCode::CONFLICT, "selection session is busy with another request")
        })
    }
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    #[serde(skip)]
    status: StatusCode,
    service_contract_version: &'static str,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    view: Option<SelectionView>,
}

impl ServiceError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            service_contract_version: SERVICE_CONTRACT_VERSION,
            error: message.into(),
            view: None,
        }
    }

    fn no_session() -> Self {
        Self::new(StatusCode::BAD_REQUEST, "no page loaded; POST /v1/page first")
    }

    fn from_select(err: &SelectError) -> Self {
        let status = if err.is_fetch_failure() {
            StatusCode::BAD_GATEWAY
        } else {
            StatusCode::BAD_REQUEST
        };
        Self::new(status, err.to_string())
    }

    fn with_view(mut self, view: SelectionView) -> Self {
        self.view = Some(view);
        self
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status;
        (status, Json(self)).into_response()
    }
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SourceArg {
    Artic,
    Fixture,
}

#[derive(Debug, Parser)]
#[command(name = "page-select-service")]
#[command(about = "Local HTTP service for paginated selection")]
struct Args {
    #[arg(long, default_value = "127.0.0.1:4020")]
    bind: SocketAddr,
    #[arg(long, value_enum, default_value_t = SourceArg::Artic)]
    source: SourceArg,
    #[arg(long, default_value = "https://api.artic.edu/api/v1")]
    base_url: String,
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,
    #[arg(long)]
    fixture: Option<PathBuf>,
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/openapi", get(openapi))
        .route("/v1/view", get(view))
        .route("/v1/progress", get(progress))
        .route("/v1/page", post(open_page))
        .route("/v1/toggle/page", post(toggle_page))
        .route("/v1/toggle/record", post(toggle_record))
        .route("/v1/select/target", post(select_target))
        .with_state(state)
}

fn build_source(args: &Args) -> Result<ConfiguredSource> {
    match args.source {
        SourceArg::Artic => {
            let config = SourceConfig {
                base_url: args.base_url.clone(),
                timeout_secs: args.timeout_secs,
                ..SourceConfig::default()
            };
            Ok(ConfiguredSource::Artic(ArtworkSource::new(config)?))
        }
        SourceArg::Fixture => {
            let path = args
                .fixture
                .as_ref()
                .ok_or_else(|| anyhow!("--fixture is required with --source fixture"))?;
            let source = FixtureSource::from_path(path)
                .with_context(|| format!("failed to load fixture {}", path.display()))?;
            Ok(ConfiguredSource::Fixture(source))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    let state = ServiceState::new(build_source(&args)?);
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(bind = %args.bind, "page-select service listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn openapi() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "application/yaml; charset=utf-8")], OPENAPI_YAML)
}

async fn view(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<SelectionView>>, ServiceError> {
    let guard = state.claim()?;
    let session = guard.as_ref().ok_or_else(ServiceError::no_session)?;
    Ok(Json(envelope(session.view())))
}

async fn progress(
    State(state): State<ServiceState>,
) -> Json<ServiceEnvelope<Option<ProgressEntry>>> {
    let latest = state.progress.borrow().clone();
    Json(envelope(latest))
}

async fn open_page(
    State(state): State<ServiceState>,
    Json(request): Json<OpenPageRequest>,
) -> Result<Json<ServiceEnvelope<SelectionView>>, ServiceError> {
    let mut guard = state.claim()?;
    let view = if let Some(session) = guard.as_mut() {
        session.go_to_page(request.page).await.map_err(|err| ServiceError::from_select(&err))?
    } else {
        let session = SelectionSession::open(Arc::clone(&state.source), request.page)
            .await
            .map_err(|err| ServiceError::from_select(&err))?;
        let view = session.view();
        *guard = Some(session);
        view
    };
    Ok(Json(envelope(view)))
}

async fn toggle_page(
    State(state): State<ServiceState>,
    Json(request): Json<TogglePageRequest>,
) -> Result<Json<ServiceEnvelope<TogglePageResult>>, ServiceError> {
    let mut guard = state.claim()?;
    let session = guard.as_mut().ok_or_else(ServiceError::no_session)?;
    Ok(Json(envelope(session.set_page_checked(request.checked))))
}

async fn toggle_record(
    State(state): State<ServiceState>,
    Json(request): Json<ToggleRecordRequest>,
) -> Result<Json<ServiceEnvelope<ToggleRecordResult>>, ServiceError> {
    let mut guard = state.claim()?;
    let session = guard.as_mut().ok_or_else(ServiceError::no_session)?;
    let result = session.toggle_record(request.id).map_err(|err| ServiceError::from_select(&err))?;
    Ok(Json(envelope(result)))
}

async fn select_target(
    State(state): State<ServiceState>,
    Json(request): Json<SelectTargetRequest>,
) -> Result<Json<ServiceEnvelope<SelectTargetResult>>, ServiceError> {
    let mut guard = state.claim()?;
    let session = guard.as_mut().ok_or_else(ServiceError::no_session)?;

    let progress = Arc::clone(&state.progress);
    progress.send_replace(None);
    let mut observer = move |snapshot: &Progress<'_>| {
        progress.send_replace(Some(ProgressEntry::from(snapshot)));
    };

    match session.select_target(request.target, &mut observer).await {
        Ok(result) => Ok(Json(envelope(result))),
        Err(err) => Err(ServiceError::from_select(&err).with_view(session.view())),
    }
}
