//! HTTP host that puts an [`AssetWorker`] in front of the site origin.
//!
//! - every request outside `/__encore/` is handed to the worker and answered
//!   from cache or network the way a page under its control would see it
//! - `POST /__encore/messages` delivers a page message
//! - `GET /__encore/events` streams broadcast client messages as SSE

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    extract::{Request, State},
    http::{HeaderMap, HeaderName, StatusCode, Uri, header},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use encore_engine::{AssetWorker, FetchOutcome, SiteOrigin};
use futures::Stream;
use tokio_stream::{StreamExt, wrappers::BroadcastStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{AppError, Result};

/// Largest request body forwarded to the origin
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Clone)]
struct AppState {
    worker: Arc<AssetWorker>,
    client: reqwest::Client,
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/__encore/messages", post(post_message))
        .route("/__encore/events", get(events))
        .fallback(intercept)
        .with_state(state)
}

/// Serve until Ctrl-C
pub async fn run(
    worker: Arc<AssetWorker>,
    client: reqwest::Client,
    addr: SocketAddr,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        origin = %worker.config().origin.url(),
        "Listening on http://{}",
        addr
    );

    axum::serve(listener, router(AppState { worker, client }))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| AppError::Server(e.to_string()))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Cannot listen for Ctrl-C, serving until killed");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

async fn post_message(State(state): State<AppState>, body: String) -> StatusCode {
    let worker = Arc::clone(&state.worker);
    tokio::spawn(async move {
        worker.handle_raw_message(&body).await;
    });
    StatusCode::ACCEPTED
}

async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    // A lagging subscriber skips what it missed
    let stream = BroadcastStream::new(state.worker.subscribe()).filter_map(|message| {
        message
            .ok()
            .map(|m| Ok::<_, Infallible>(Event::default().data(m.to_json())))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn intercept(State(state): State<AppState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    let url = match site_url(&state.worker.config().origin, &parts.uri) {
        Some(url) => url,
        None => return (StatusCode::BAD_REQUEST, "Invalid request path").into_response(),
    };
    let headers = forwardable_headers(&parts.headers);

    let intercepted =
        encore_engine::Request::new(parts.method.clone(), url.clone()).with_headers(headers.clone());

    match state.worker.handle_fetch(&intercepted).await {
        FetchOutcome::Respond(response) => {
            let mut reply = Response::new(Body::from(response.body));
            *reply.status_mut() = response.status;
            *reply.headers_mut() = forwardable_headers(&response.headers);
            reply
        }
        FetchOutcome::NetworkError(e) => {
            warn!(url = %url, error = %e, "Upstream unreachable");
            (StatusCode::BAD_GATEWAY, "Upstream unreachable").into_response()
        }
        FetchOutcome::Passthrough => {
            debug!(method = %parts.method, url = %url, "Passing through");
            forward(&state.client, parts.method, url, headers, body).await
        }
    }
}

async fn forward(
    client: &reqwest::Client,
    method: axum::http::Method,
    url: Url,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let body = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => return (StatusCode::PAYLOAD_TOO_LARGE, e.to_string()).into_response(),
    };

    let upstream = match client
        .request(method, url.clone())
        .headers(headers)
        .body(body)
        .send()
        .await
    {
        Ok(upstream) => upstream,
        Err(e) => {
            warn!(url = %url, error = %e, "Passthrough request failed");
            return (StatusCode::BAD_GATEWAY, "Upstream unreachable").into_response();
        }
    };

    let status = upstream.status();
    let headers = forwardable_headers(upstream.headers());
    match upstream.bytes().await {
        Ok(bytes) => {
            let mut reply = Response::new(Body::from(bytes));
            *reply.status_mut() = status;
            *reply.headers_mut() = headers;
            reply
        }
        Err(e) => {
            warn!(url = %url, error = %e, "Passthrough body failed");
            (StatusCode::BAD_GATEWAY, "Upstream body failed").into_response()
        }
    }
}

/// Map a request line onto the site: `/letter.js` → `<origin>/letter.js`.
fn site_url(origin: &SiteOrigin, uri: &Uri) -> Option<Url> {
    let target = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let url = origin.resolve(target.trim_start_matches('/')).ok()?;
    origin.is_same_origin(&url).then_some(url)
}

/// Drop connection-level headers and those the client recomputes
fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
    headers
        .iter()
        .filter(|(name, _)| !is_hop_by_hop(name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    [
        header::CONNECTION,
        header::HOST,
        header::PROXY_AUTHENTICATE,
        header::PROXY_AUTHORIZATION,
        header::TE,
        header::TRAILER,
        header::TRANSFER_ENCODING,
        header::UPGRADE,
        header::CONTENT_LENGTH,
        header::ACCEPT_ENCODING,
    ]
    .contains(name)
        || name.as_str() == "keep-alive"
}
