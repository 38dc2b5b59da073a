use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use threat_hunt_core::Dashboard;
use threat_hunt_store_sqlite::{seed_if_empty, SqliteHuntStore};
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod page;

use page::DashboardPage;

#[derive(Clone)]
struct ServiceState {
    store: Arc<Mutex<SqliteHuntStore>>,
    page: Arc<DashboardPage>,
    operation_timeout: Duration,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    error: ServiceErrorPayload,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceErrorPayload {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
struct ServiceFailure {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

#[derive(Debug, Parser)]
#[command(name = "threat-hunt-service")]
#[command(about = "Threat hunt dashboard service")]
struct Args {
    #[arg(long, default_value = "./acthp.db")]
    db: PathBuf,
    #[arg(long, default_value = "0.0.0.0:5000")]
    bind: SocketAddr,
    #[arg(long, default_value_t = 2500)]
    operation_timeout_ms: u64,
}

impl IntoResponse for ServiceFailure {
    fn into_response(self) -> Response {
        let payload = ServiceError {
            error: ServiceErrorPayload {
                code: self.code,
                message: self.message,
                details: self.details,
            },
        };
        (self.status, Json(payload)).into_response()
    }
}

impl ServiceState {
    fn new(store: SqliteHuntStore, page: DashboardPage, operation_timeout: Duration) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
            page: Arc::new(page),
            operation_timeout,
        }
    }

    fn failure(
        status: StatusCode,
        code: &'static str,
        message: impl Into<String>,
        details: Option<serde_json::Value>,
    ) -> ServiceFailure {
        ServiceFailure { status, code, message: message.into(), details }
    }

    /// Runs a store operation on the blocking pool, holding the store lock for
    /// the duration of that one operation.
    async fn run_blocking<T, F>(
        &self,
        default_status: StatusCode,
        default_code: &'static str,
        operation_label: &'static str,
        op: F,
    ) -> Result<T, ServiceFailure>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteHuntStore) -> anyhow::Result<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let handle = tokio::task::spawn_blocking(move || {
            let mut guard = store.lock();
            op(&mut *guard)
        });
        let join_result =
            tokio::time::timeout(self.operation_timeout, handle).await.map_err(|_| {
                let timeout_ms =
                    u64::try_from(self.operation_timeout.as_millis()).unwrap_or(u64::MAX);
                tracing::warn!(operation = operation_label, timeout_ms, "store operation timed out");
                Self::failure(
                    default_status,
                    default_code,
                    format!("{operation_label} timed out after {timeout_ms} ms"),
                    Some(json!({ "timeout_ms": timeout_ms })),
                )
            })?;

        let op_result = join_result.map_err(|err| {
            tracing::error!(operation = operation_label, error = %err, "store task failed to join");
            Self::failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                format!("{operation_label} join failure: {err}"),
                None,
            )
        })?;

        op_result.map_err(|err| {
            tracing::error!(operation = operation_label, error = %format!("{err:#}"), "store operation failed");
            Self::failure(default_status, default_code, format!("{err:#}"), None)
        })
    }
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/", get(dashboard))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut store = SqliteHuntStore::open(&args.db)?;
    let report = seed_if_empty(&mut store).context("failed to initialize hunt store")?;
    tracing::info!(
        db = %args.db.display(),
        seeded = report.seeded,
        hunts = report.existing + report.inserted,
        "hunt store ready"
    );

    let page = DashboardPage::new().context("failed to load dashboard template")?;
    let state = ServiceState::new(
        store,
        page,
        Duration::from_millis(args.operation_timeout_ms),
    );

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    tracing::info!(bind = %args.bind, "listening");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("shut down");
    Ok(())
}

fn render_failure(stage: &'static str, err: &dyn std::fmt::Display) -> ServiceFailure {
    tracing::error!(stage, error = %err, "dashboard render failed");
    ServiceState::failure(
        StatusCode::INTERNAL_SERVER_ERROR,
        "render_failed",
        err.to_string(),
        None,
    )
}

async fn dashboard(State(state): State<ServiceState>) -> Result<Html<String>, ServiceFailure> {
    let records = state
        .run_blocking(
            StatusCode::SERVICE_UNAVAILABLE,
            "store_unavailable",
            "list_hunts",
            |store| store.list_all(),
        )
        .await?;

    let dashboard = Dashboard::from_records(&records)
        .map_err(|err| render_failure("build_payload", &err))?;
    let body = state
        .page
        .render(&dashboard)
        .map_err(|err| render_failure("render_template", &err))?;

    Ok(Html(body))
}
