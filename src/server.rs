//! HTTP surface: the feed as JSON and live notifications over a WebSocket.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::aggregate::RecencyAggregator;
use crate::broadcast::{Broadcaster, Notification};
use crate::context::RepositoryContext;
use crate::fs::resolve_path;
use crate::git::diff::{file_diff, is_revision_id};
use crate::record::ExtensionSet;

/// Per-connection queue depth. A client that falls this far behind misses
/// notifications until it catches up.
const OBSERVER_QUEUE: usize = 64;

const DEFAULT_LIMIT: usize = 10;
const MAX_LIMIT: usize = 1000;

/// A served directory and, in multi-repository mode, its name.
#[derive(Clone)]
pub struct ServedRepository {
    pub name: Option<String>,
    pub context: RepositoryContext,
}

#[derive(Clone)]
pub struct AppState {
    repos: Arc<Vec<ServedRepository>>,
    aggregator: RecencyAggregator,
    extensions: ExtensionSet,
    broadcaster: Broadcaster,
}

impl AppState {
    pub fn new(
        repos: Vec<ServedRepository>,
        aggregator: RecencyAggregator,
        extensions: ExtensionSet,
        broadcaster: Broadcaster,
    ) -> Self {
        Self {
            repos: Arc::new(repos),
            aggregator,
            extensions,
            broadcaster,
        }
    }

    fn find(&self, name: Option<&str>) -> Result<&ServedRepository, (StatusCode, String)> {
        match name {
            Some(name) => self
                .repos
                .iter()
                .find(|repo| repo.name.as_deref() == Some(name))
                .ok_or((StatusCode::NOT_FOUND, format!("unknown repository: {name}"))),
            None if self.repos.len() == 1 => Ok(&self.repos[0]),
            None => Err((
                StatusCode::BAD_REQUEST,
                "repo parameter required in multi-repository mode".to_string(),
            )),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/recent", get(recent))
        .route("/api/diff", get(diff))
        .route("/api/ws", get(websocket))
        .with_state(state)
}

/// Bind `addr` and serve until Ctrl-C.
pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %listener.local_addr()?, "listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "failed to listen for ctrl-c");
            }
        })
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// /api/recent
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RecentQuery {
    limit: Option<usize>,
    repo: Option<String>,
}

async fn recent(State(state): State<AppState>, Query(query): Query<RecentQuery>) -> Response {
    let repo = match state.find(query.repo.as_deref()) {
        Ok(repo) => repo,
        Err(rejection) => return rejection.into_response(),
    };
    let limit = feed_limit(query.limit);
    let feed = state
        .aggregator
        .aggregate(&repo.context, limit, &state.extensions)
        .await;
    Json(feed.as_slice()).into_response()
}

/// Requested feed size capped at [`MAX_LIMIT`]. Zero stays zero (an empty
/// feed).
pub fn feed_limit(requested: Option<usize>) -> usize {
    requested.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT)
}

// ---------------------------------------------------------------------------
// /api/diff
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DiffQuery {
    path: String,
    revision: String,
    repo: Option<String>,
}

async fn diff(State(state): State<AppState>, Query(query): Query<DiffQuery>) -> Response {
    let repo = match state.find(query.repo.as_deref()) {
        Ok(repo) => repo,
        Err(rejection) => return rejection.into_response(),
    };
    if !is_revision_id(&query.revision) {
        return (StatusCode::BAD_REQUEST, "Invalid revision id").into_response();
    }
    if let Err(err) = resolve_path(repo.context.root(), &query.path) {
        return (StatusCode::BAD_REQUEST, err.to_string()).into_response();
    }
    match file_diff(&repo.context, &query.path, &query.revision).await {
        Some(diff) => Json(diff).into_response(),
        None => (StatusCode::NOT_FOUND, "Could not generate diff").into_response(),
    }
}

// ---------------------------------------------------------------------------
// /api/ws
// ---------------------------------------------------------------------------

/// Only browser pages served from this machine may subscribe. Requests
/// without an `Origin` header (non-browser clients) are allowed.
pub fn origin_allowed(origin: &str) -> bool {
    let authority = origin
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(origin);
    let authority = authority.split('/').next().unwrap_or_default();
    let host = if let Some(rest) = authority.strip_prefix('[') {
        rest.split(']').next().unwrap_or_default()
    } else {
        authority.split(':').next().unwrap_or_default()
    };
    matches!(
        host.to_ascii_lowercase().as_str(),
        "localhost" | "127.0.0.1" | "::1"
    )
}

async fn websocket(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if let Some(origin) = headers.get(header::ORIGIN) {
        let allowed = origin.to_str().map(origin_allowed).unwrap_or(false);
        if !allowed {
            debug!(origin = ?origin, "rejected websocket origin");
            return (StatusCode::FORBIDDEN, "Origin not allowed").into_response();
        }
    }
    ws.on_upgrade(move |socket| observe(socket, state.broadcaster))
}

async fn send(socket: &mut WebSocket, notification: &Notification) -> bool {
    match serde_json::to_string(notification) {
        Ok(text) => socket.send(Message::Text(text.into())).await.is_ok(),
        Err(err) => {
            warn!(error = %err, "failed to encode notification");
            true
        }
    }
}

async fn observe(mut socket: WebSocket, broadcaster: Broadcaster) {
    if !send(&mut socket, &Notification::hello()).await {
        return;
    }
    let (id, mut notifications) = broadcaster.register_channel(OBSERVER_QUEUE);
    loop {
        tokio::select! {
            next = notifications.recv() => match next {
                Some(notification) => {
                    if !send(&mut socket, &notification).await {
                        break;
                    }
                }
                None => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    broadcaster.unregister(id);
}
