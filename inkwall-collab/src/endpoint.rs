//! HTTP endpoint of the reference backend.
//!
//! - `POST /insert-stroke` — submit a draft, get the canonical row back
//! - `GET /pages/{id}` — page metadata
//! - `GET /pages/{id}/strokes` — all strokes of a page in acceptance order
//!
//! Errors are JSON `{"error": <code>, "message": <text>}`.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;

use inkwall_core::{PageId, StrokeDraft};

use crate::config::ServerConfig;
use crate::ledger::{LedgerError, StrokeLedger};
use crate::writer::{INSERT_STROKE_PATH, SECRET_HEADER};

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
}

fn error_response(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    let body = ErrorBody {
        error: code,
        message: message.into(),
    };
    (status, Json(body)).into_response()
}

fn ledger_error_response(err: &LedgerError) -> Response {
    let status = match err {
        LedgerError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        LedgerError::UnknownPage(_) | LedgerError::Malformed(_) | LedgerError::RateLimited { .. } => {
            StatusCode::BAD_REQUEST
        }
    };
    error_response(status, err.code(), err.to_string())
}

fn with_cors(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("authorization, content-type, x-insert-stroke-secret"),
    );
    response
}

/// Shared handler state.
#[derive(Clone)]
pub struct ApiState {
    ledger: Arc<StrokeLedger>,
    api_key: Option<String>,
    insert_secret: Option<String>,
}

impl ApiState {
    pub fn new(ledger: Arc<StrokeLedger>, config: &ServerConfig) -> Self {
        Self {
            ledger,
            api_key: config.api_key.clone(),
            insert_secret: config.insert_secret.clone(),
        }
    }

    fn authorize(&self, headers: &HeaderMap) -> Result<(), Response> {
        if let Some(key) = &self.api_key {
            let expected = format!("Bearer {key}");
            let given = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok());
            if given != Some(expected.as_str()) {
                return Err(error_response(
                    StatusCode::UNAUTHORIZED,
                    "unauthorized",
                    "missing or invalid API key",
                ));
            }
        }
        Ok(())
    }

    fn check_secret(&self, headers: &HeaderMap) -> Result<(), Response> {
        if let Some(secret) = &self.insert_secret {
            let given = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());
            if given != Some(secret.as_str()) {
                return Err(error_response(
                    StatusCode::UNAUTHORIZED,
                    "unauthorized",
                    "missing or invalid insert secret",
                ));
            }
        }
        Ok(())
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route(
            INSERT_STROKE_PATH,
            post(insert_stroke)
                .options(preflight)
                .fallback(method_not_allowed),
        )
        .route("/pages/{id}", get(get_page))
        .route("/pages/{id}/strokes", get(get_page_strokes))
        .with_state(state)
}

async fn insert_stroke(State(state): State<ApiState>, headers: HeaderMap, body: Bytes) -> Response {
    if let Err(response) = state.authorize(&headers).and_then(|_| state.check_secret(&headers)) {
        log::warn!("Rejected unauthorized insert");
        return response;
    }

    let draft: StrokeDraft = match serde_json::from_slice(&body) {
        Ok(draft) => draft,
        Err(e) => {
            log::debug!("Unparseable insert body: {e}");
            return error_response(StatusCode::BAD_REQUEST, "malformed", format!("invalid request: {e}"));
        }
    };

    match state.ledger.insert(draft).await {
        Ok(stroke) => with_cors((StatusCode::OK, Json(stroke)).into_response()),
        Err(e) => {
            if let LedgerError::Storage(_) = e {
                log::error!("Insert failed: {e}");
            }
            ledger_error_response(&e)
        }
    }
}

async fn preflight() -> Response {
    with_cors(StatusCode::NO_CONTENT.into_response())
}

async fn method_not_allowed() -> Response {
    error_response(StatusCode::METHOD_NOT_ALLOWED, "method_not_allowed", "Method not allowed")
}

async fn get_page(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(response) = state.authorize(&headers) {
        return response;
    }
    match state.ledger.page(&PageId::new(id.as_str())) {
        Ok(Some(meta)) => Json(meta).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "unknown_page", format!("unknown page {id}")),
        Err(e) => ledger_error_response(&e),
    }
}

async fn get_page_strokes(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(response) = state.authorize(&headers) {
        return response;
    }
    match state.ledger.strokes(&PageId::new(id)) {
        Ok(strokes) => Json(strokes).into_response(),
        Err(e @ LedgerError::UnknownPage(_)) => {
            error_response(StatusCode::NOT_FOUND, e.code(), e.to_string())
        }
        Err(e) => ledger_error_response(&e),
    }
}

/// A bound but not yet running HTTP endpoint.
pub struct ApiServer {
    listener: TcpListener,
    router: Router,
}

impl ApiServer {
    pub async fn bind(addr: &str, state: ApiState) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            router: router(state),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(self) -> io::Result<()> {
        log::info!("HTTP endpoint listening on {}", self.local_addr()?);
        axum::serve(self.listener, self.router).await
    }
}
