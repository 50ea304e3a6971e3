//! Gateway HTTP server (single port): liveness, task dispatch and jailed reads.

use crate::config::{self, Config};
use crate::dispatch::{DispatchError, Dispatcher};
use crate::gateway::protocol::{ErrorKind, ErrorResponse, ReadQuery, RunBody, RunQuery, TaskResponse};
use crate::init;
use crate::jail::{JailContent, JailError, PathJail};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::path::PathBuf;
use std::sync::Arc;

const LIVENESS_TEXT: &str = "taskgate is running";

/// When auth mode is token and a token is configured, returns it for request validation.
fn require_request_token(config: &Config) -> Option<String> {
    if config.gateway.auth.mode == config::GatewayAuthMode::Token {
        config::resolve_gateway_token(config)
    } else {
        None
    }
}

/// Shared state for the gateway. Everything in it is immutable after startup.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub dispatcher: Dispatcher,
    pub jail: Arc<PathJail>,
    /// When Some, /run and /read require `Authorization: Bearer <token>`.
    pub required_token: Option<String>,
}

impl GatewayState {
    pub fn new(config: Config, dispatcher: Dispatcher, jail: PathJail) -> Self {
        let required_token = require_request_token(&config);
        Self {
            config: Arc::new(config),
            dispatcher,
            jail: Arc::new(jail),
            required_token,
        }
    }
}

/// Routes: `GET /` liveness, `POST /run` task, `GET /read` jailed read.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(health_http))
        .route("/run", post(run_http))
        .route("/read", get(read_http))
        .with_state(state)
}

/// Run the gateway: verify init and auth, build the pipeline and jail, and serve until SIGINT/SIGTERM.
pub async fn run_gateway(config: Config, config_path: PathBuf) -> Result<()> {
    init::require_initialized(&config_path, &config)?;
    let bind = config.gateway.bind.trim().to_string();
    if !config::is_loopback_bind(&bind) {
        let token = config::resolve_gateway_token(&config);
        if token.is_none() || config.gateway.auth.mode != config::GatewayAuthMode::Token {
            anyhow::bail!(
                "refusing to bind gateway to {} without auth (set gateway.auth.mode to \"token\" and gateway.auth.token or TASKGATE_GATEWAY_TOKEN)",
                bind
            );
        }
    }

    let dispatcher = Dispatcher::from_config(&config, &config_path)?;
    let jail = PathJail::new(&config.data.root)
        .with_context(|| format!("opening data root {}", config.data.root.display()))?;
    log::info!("serving reads from {}", jail.root().display());

    let bind_addr = format!("{}:{}", bind, config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    let state = GatewayState::new(config, dispatcher, jail);
    serve(listener, state).await
}

/// Serve on an already bound listener until SIGINT/SIGTERM. In-flight requests are allowed to finish.
pub async fn serve(listener: tokio::net::TcpListener, state: GatewayState) -> Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, draining connections");
}

fn error_response(status: StatusCode, body: ErrorResponse) -> Response {
    (status, Json(body)).into_response()
}

/// Checks the bearer token when one is required.
fn authorize(state: &GatewayState, headers: &HeaderMap) -> Result<(), Response> {
    let Some(ref expected) = state.required_token else {
        return Ok(());
    };
    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);
    if provided == Some(expected.as_str()) {
        Ok(())
    } else {
        Err(error_response(
            StatusCode::UNAUTHORIZED,
            ErrorResponse::new(ErrorKind::Unauthorized, "missing or invalid bearer token"),
        ))
    }
}

/// GET / returns a fixed liveness string for health checks.
async fn health_http() -> &'static str {
    LIVENESS_TEXT
}

/// Task text from `?task=` or a JSON body `{"task": ...}`; the query wins.
fn task_from_request(query: RunQuery, body: &[u8]) -> Result<String, Response> {
    if let Some(task) = query.task.filter(|t| !t.trim().is_empty()) {
        return Ok(task);
    }
    let from_body = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        let parsed: RunBody = serde_json::from_slice(body).map_err(|e| {
            error_response(
                StatusCode::BAD_REQUEST,
                ErrorResponse::new(ErrorKind::InputError, "request body is not valid JSON")
                    .with_details(e.to_string()),
            )
        })?;
        parsed.task
    };
    from_body.filter(|t| !t.trim().is_empty()).ok_or_else(|| {
        error_response(
            StatusCode::BAD_REQUEST,
            ErrorResponse::new(
                ErrorKind::InputError,
                "no task given; pass ?task= or a JSON body {\"task\": ...}",
            ),
        )
    })
}

/// POST /run translates the task, sanitizes the command and runs it.
async fn run_http(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Query(query): Query<RunQuery>,
    body: Bytes,
) -> Response {
    if let Err(denied) = authorize(&state, &headers) {
        return denied;
    }
    let task = match task_from_request(query, &body) {
        Ok(t) => t,
        Err(bad) => return bad,
    };
    match state.dispatcher.run_task(&task).await {
        Ok(result) => {
            let status = if result.outcome.is_success() {
                StatusCode::OK
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            (status, Json(TaskResponse::from(&result))).into_response()
        }
        Err(DispatchError::EmptyTask) => error_response(
            StatusCode::BAD_REQUEST,
            ErrorResponse::new(ErrorKind::InputError, "task is empty"),
        ),
        Err(DispatchError::Translation(e)) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorResponse::new(ErrorKind::TranslationError, "could not translate the task into a command")
                .with_details(e.to_string()),
        ),
        Err(DispatchError::Rejected(r)) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorResponse::new(ErrorKind::SanitizationRejection, "generated command was rejected")
                .with_details(r.to_string()),
        ),
    }
}

/// GET /read?path= returns file bytes as text or a directory listing as a JSON array.
async fn read_http(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Query(query): Query<ReadQuery>,
) -> Response {
    if let Err(denied) = authorize(&state, &headers) {
        return denied;
    }
    let Some(path) = query.path else {
        return error_response(
            StatusCode::BAD_REQUEST,
            ErrorResponse::new(ErrorKind::InputError, "missing path parameter"),
        );
    };
    let content = match state.jail.resolve(&path) {
        Ok(p) => state.jail.read(&p).await,
        Err(e) => Err(e),
    };
    match content {
        Ok(JailContent::File(bytes)) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            bytes,
        )
            .into_response(),
        Ok(JailContent::Directory(names)) => (StatusCode::OK, Json(names)).into_response(),
        Err(e) => jail_error_response(e),
    }
}

fn jail_error_response(e: JailError) -> Response {
    let (status, kind) = match &e {
        JailError::PathEscape(_) => (StatusCode::BAD_REQUEST, ErrorKind::PathEscape),
        JailError::NotFound(_) => (StatusCode::NOT_FOUND, ErrorKind::NotFound),
        JailError::UnsupportedType(_) => (StatusCode::INTERNAL_SERVER_ERROR, ErrorKind::UnsupportedPathType),
        JailError::Io { .. } => {
            log::warn!("read failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, ErrorKind::InternalError)
        }
    };
    error_response(status, ErrorResponse::new(kind, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_task_wins_over_body() {
        let task = task_from_request(
            RunQuery {
                task: Some("from query".to_string()),
            },
            br#"{"task": "from body"}"#,
        )
        .expect("task");
        assert_eq!(task, "from query");
    }

    #[test]
    fn body_task_is_used_without_query() {
        let task = task_from_request(RunQuery::default(), br#"{"task": "from body"}"#).expect("task");
        assert_eq!(task, "from body");
    }

    #[test]
    fn blank_everywhere_is_input_error() {
        let res = task_from_request(RunQuery { task: Some("  ".to_string()) }, b"  ").expect_err("no task");
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let res = task_from_request(RunQuery::default(), b"not json").expect_err("bad body");
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn jail_errors_map_to_status() {
        assert_eq!(
            jail_error_response(JailError::PathEscape("../x".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            jail_error_response(JailError::NotFound("x".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            jail_error_response(JailError::UnsupportedType("s".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn token_required_only_in_token_mode() {
        let mut config = Config::default();
        config.gateway.auth.token = Some("secret".to_string());
        assert_eq!(require_request_token(&config), None);
        config.gateway.auth.mode = config::GatewayAuthMode::Token;
        if std::env::var("TASKGATE_GATEWAY_TOKEN").is_err() {
            assert_eq!(require_request_token(&config), Some("secret".to_string()));
        }
    }
}
