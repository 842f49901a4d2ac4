//! # REST API
//!
//! The agent's local HTTP interface. All handlers share [`AppState`]
//! through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path                   | Description                             |
//! |--------|------------------------|-----------------------------------------|
//! | GET    | `/health`              | Liveness probe                          |
//! | GET    | `/status`              | Account id, block count, link session   |
//! | POST   | `/blobs`               | Store a blob, returns its CID           |
//! | GET    | `/blobs/:cid`          | Raw bytes of a stored blob              |
//! | POST   | `/device-link-session` | Open a device-link session              |
//! | GET    | `/device-link-session` | Status of the current session           |

use axum::{
    body::Bytes,
    extract::{Path, Request, State},
    http::{header, HeaderMap, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use cid::Cid;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use hypermedia_protocol::blob::check_submitted;
use hypermedia_protocol::crypto::hash::raw_cid;
use hypermedia_protocol::link::{AddrInfo, LinkInitiator, LinkSessionStatus};
use hypermedia_protocol::storage::{Block, Blockstore};
use hypermedia_protocol::{Context, Error};

use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub version: String,
    pub ctx: Arc<Context>,
    pub blocks: Arc<Blockstore>,
    /// Answers incoming device-link streams; owns the current session.
    pub initiator: Arc<LinkInitiator>,
    /// Where joiners should dial, advertised in new sessions.
    pub addr_info: AddrInfo,
    pub metrics: SharedMetrics,
}

/// Build the router with CORS and request tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/blobs", axum::routing::post(put_blob_handler))
        .route("/blobs/:cid", get(get_blob_handler))
        .route(
            "/device-link-session",
            get(link_session_status_handler).post(create_link_session_handler),
        )
        .layer(middleware::from_fn_with_state(state.metrics.clone(), count_requests))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn count_requests(State(metrics): State<SharedMetrics>, request: Request, next: Next) -> Response {
    metrics.api_requests_total.inc();
    next.run(request).await
}

// ---------------------------------------------------------------------------
// Response Types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub version: String,
    /// `None` until `hm-node init` or a device link has run.
    pub account_id: Option<String>,
    pub block_count: usize,
    pub link_session: Option<LinkSessionStatus>,
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PutBlobResponse {
    pub cid: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateLinkSessionRequest {
    pub label: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (status, Json(ErrorResponse { error: error.into() })).into_response()
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `GET /status`
async fn status_handler(State(state): State<AppState>) -> Response {
    let account_id = match state.ctx.identity() {
        Ok(identity) => identity.map(|i| i.account_id()),
        Err(e) => {
            tracing::error!(error = %e, "failed to load identity");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };

    Json(StatusResponse {
        version: state.version.clone(),
        account_id,
        block_count: state.blocks.len(),
        link_session: state.initiator.status(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
    .into_response()
}

/// `POST /blobs`
///
/// `application/octet-stream` bodies are stored as raw blocks. Anything
/// else must be a DAG-CBOR map; signed record types are decoded and their
/// signatures checked before storing.
async fn put_blob_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if body.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "empty body");
    }

    let is_raw = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/octet-stream"));
    let cid = if is_raw {
        raw_cid(&body).map_err(hypermedia_protocol::Error::from)
    } else {
        check_submitted(&body).map(|(cid, blob_type)| {
            tracing::debug!(%cid, blob_type = ?blob_type, "blob accepted");
            cid
        })
    };
    let cid = match cid {
        Ok(cid) => cid,
        Err(e) => {
            tracing::debug!(error = %e, "blob rejected");
            return error_response(StatusCode::BAD_REQUEST, e.to_string());
        }
    };

    let block = Block {
        cid,
        data: body.to_vec(),
    };
    match state.blocks.put(&block) {
        Ok(is_new) => {
            if is_new {
                state.metrics.blobs_stored_total.inc();
                state.metrics.blob_bytes_total.inc_by(block.data.len() as u64);
            }
            (
                StatusCode::CREATED,
                Json(PutBlobResponse {
                    cid: cid.to_string(),
                }),
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!(%cid, error = %e, "failed to store blob");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// `GET /blobs/:cid`
async fn get_blob_handler(Path(cid): Path<String>, State(state): State<AppState>) -> Response {
    let cid: Cid = match cid.parse() {
        Ok(cid) => cid,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("invalid cid: {e}")),
    };

    match state.blocks.get(&cid) {
        Ok(Some(data)) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/octet-stream")],
            data,
        )
            .into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("blob not found: {cid}")),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// `POST /device-link-session`
///
/// Replaces any previous session. Needs a local identity to link to.
async fn create_link_session_handler(
    State(state): State<AppState>,
    body: Option<Json<CreateLinkSessionRequest>>,
) -> Response {
    let label = body.and_then(|Json(req)| req.label);
    match state.initiator.create_session(label, state.addr_info.clone()) {
        Ok(session) => {
            state.metrics.link_sessions_created_total.inc();
            (StatusCode::CREATED, Json(session)).into_response()
        }
        Err(Error::NoIdentity) => error_response(
            StatusCode::CONFLICT,
            "no local account; run `hm-node init` first",
        ),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// `GET /device-link-session`
async fn link_session_status_handler(State(state): State<AppState>) -> Response {
    match state.initiator.status() {
        Some(status) => Json(status).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "no device-link session"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use hypermedia_protocol::clock::SystemClock;
    use hypermedia_protocol::config::ProtocolConfig;
    use hypermedia_protocol::crypto::hash::dag_cbor_cid;
    use hypermedia_protocol::identity::account::create_account;
    use hypermedia_protocol::link::DeviceLinkSession;
    use hypermedia_protocol::storage::MemoryStore;
    use tower::ServiceExt;

    fn test_app_state() -> AppState {
        let blocks = Arc::new(Blockstore::in_memory());
        let ctx = Arc::new(Context::local(
            ProtocolConfig::default(),
            Arc::new(SystemClock),
            Arc::new(MemoryStore::new()),
            blocks.clone(),
        ));
        AppState {
            version: "0.1.0-test".into(),
            initiator: Arc::new(LinkInitiator::new(ctx.clone())),
            ctx,
            blocks,
            addr_info: AddrInfo {
                peer_id: "local".into(),
                addrs: vec!["/ip4/127.0.0.1/tcp/56000".into()],
            },
            metrics: Arc::new(crate::metrics::NodeMetrics::new().unwrap()),
        }
    }

    async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec();
        (status, body)
    }

    async fn get(router: &Router, path: &str) -> (StatusCode, Vec<u8>) {
        send(router, Request::builder().uri(path).body(Body::empty()).unwrap()).await
    }

    async fn post(
        router: &Router,
        path: &str,
        content_type: &str,
        body: Vec<u8>,
    ) -> (StatusCode, Vec<u8>) {
        let req = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", content_type)
            .body(Body::from(body))
            .unwrap();
        send(router, req).await
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let router = create_router(test_app_state());
        let (status, body) = get(&router, "/health").await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn requests_are_counted() {
        let state = test_app_state();
        let metrics = state.metrics.clone();
        let router = create_router(state);
        get(&router, "/health").await;
        get(&router, "/status").await;
        assert_eq!(metrics.api_requests_total.get(), 2);
    }

    #[tokio::test]
    async fn status_without_account() {
        let router = create_router(test_app_state());
        let (status, body) = get(&router, "/status").await;

        assert_eq!(status, StatusCode::OK);
        let resp: StatusResponse = serde_json::from_slice(&body).unwrap();
        assert!(resp.account_id.is_none());
        assert_eq!(resp.block_count, 0);
    }

    #[tokio::test]
    async fn status_reports_account_and_blocks() {
        let state = test_app_state();
        let created = create_account(&state.ctx, "Alice", None).await.unwrap();
        let router = create_router(state);

        let (_, body) = get(&router, "/status").await;
        let resp: StatusResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp.account_id, Some(created.identity.account_id()));
        assert_eq!(resp.block_count, 3);
    }

    #[tokio::test]
    async fn raw_blob_roundtrip() {
        let state = test_app_state();
        let metrics = state.metrics.clone();
        let router = create_router(state);

        let (status, body) =
            post(&router, "/blobs", "application/octet-stream", b"icon bytes".to_vec()).await;
        assert_eq!(status, StatusCode::CREATED);
        let resp: PutBlobResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp.cid, raw_cid(b"icon bytes").unwrap().to_string());

        let (status, body) = get(&router, &format!("/blobs/{}", resp.cid)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"icon bytes");

        // Storing it again is accepted but not counted twice.
        post(&router, "/blobs", "application/octet-stream", b"icon bytes".to_vec()).await;
        assert_eq!(metrics.blobs_stored_total.get(), 1);
    }

    #[tokio::test]
    async fn cbor_blob_uses_dag_cbor_codec() {
        let router = create_router(test_app_state());
        let bytes = vec![0xa1, 0x61, 0x61, 0x01]; // {"a": 1}
        let (status, body) = post(&router, "/blobs", "application/cbor", bytes.clone()).await;

        assert_eq!(status, StatusCode::CREATED);
        let resp: PutBlobResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp.cid, dag_cbor_cid(&bytes).unwrap().to_string());
    }

    #[tokio::test]
    async fn signed_blob_is_verified_before_storing() {
        let state = test_app_state();
        let created = create_account(&state.ctx, "Alice", None).await.unwrap();
        let blocks = state.blocks.clone();
        let router = create_router(state);

        let home = created.home.data.clone();
        let (status, body) = post(&router, "/blobs", "application/cbor", home.clone()).await;
        assert_eq!(status, StatusCode::CREATED);
        let resp: PutBlobResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp.cid, created.home.cid.to_string());

        let mut flipped = home;
        let last = flipped.len() - 1;
        flipped[last] ^= 1;
        let before = blocks.len();
        let (status, _) = post(&router, "/blobs", "application/cbor", flipped).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(blocks.len(), before);
    }

    #[tokio::test]
    async fn cbor_that_is_not_a_map_is_rejected() {
        let router = create_router(test_app_state());
        let bytes = vec![0x82, 0x01, 0x02]; // [1, 2]
        let (status, _) = post(&router, "/blobs", "application/cbor", bytes).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_blob_is_404() {
        let router = create_router(test_app_state());
        let cid = raw_cid(b"never stored").unwrap();
        let (status, _) = get(&router, &format!("/blobs/{cid}")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = get(&router, "/blobs/not-a-cid").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn link_session_requires_account() {
        let router = create_router(test_app_state());
        let (status, body) = post(
            &router,
            "/device-link-session",
            "application/json",
            b"{}".to_vec(),
        )
        .await;

        assert_eq!(status, StatusCode::CONFLICT);
        let err: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert!(err.error.contains("hm-node init"));
    }

    #[tokio::test]
    async fn link_session_lifecycle() {
        let state = test_app_state();
        let created = create_account(&state.ctx, "Alice", None).await.unwrap();
        let router = create_router(state);

        let (status, _) = get(&router, "/device-link-session").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = post(
            &router,
            "/device-link-session",
            "application/json",
            br#"{"label":"Laptop"}"#.to_vec(),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let session: DeviceLinkSession = serde_json::from_slice(&body).unwrap();
        assert_eq!(session.account_id, created.identity.account_id());
        assert!(session.secret_token.starts_with('m'));
        assert_eq!(session.addr_info.addrs, vec!["/ip4/127.0.0.1/tcp/56000"]);

        let (status, body) = get(&router, "/device-link-session").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["label"], "Laptop");
        assert!(json["redeemedAt"].is_null());
    }
}
