use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::State;
use axum::http::header::{self, HeaderName};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tillscan_core::{ScanSubmission, SubmitResponse};
use tokio::sync::mpsc::UnboundedSender;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::page;

/// Path of the scanner page, also the tail of the advertised URL.
pub const SCAN_PATH: &str = "/scan";
/// Path scanner pages POST codes to.
pub const SUBMIT_PATH: &str = "/scan/submit";

const ALLOWED_METHODS: &str = "POST, OPTIONS";
const ALLOWED_HEADERS: &str = "Content-Type";

#[derive(Clone)]
pub(crate) struct RouterState {
    pub scans: UnboundedSender<ScanSubmission>,
    pub page: Arc<String>,
}

pub(crate) fn router(state: RouterState) -> Router {
    Router::new()
        .route("/", get(index))
        .route(SCAN_PATH, get(scan_page))
        .route(SUBMIT_PATH, post(submit).options(submit_preflight))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(page::INDEX_REDIRECT)
}

async fn scan_page(State(state): State<RouterState>) -> Response {
    (
        [(
            HeaderName::from_static("permissions-policy"),
            "camera=(self)",
        )],
        Html(state.page.as_str().to_owned()),
    )
        .into_response()
}

/// Accepts a raw text body holding one code. Always answers 200 with the
/// JSON contract; scanner pages stop their camera loop on anything else.
/// Bodies the extractor refuses to buffer count as unreadable, not as an
/// HTTP error.
async fn submit(
    State(state): State<RouterState>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(err) => {
            warn!("unreadable scan body: {err}");
            return respond(SubmitResponse::empty());
        }
    };
    let raw = String::from_utf8_lossy(&body);
    let code = raw.trim();
    if code.is_empty() {
        debug!("ignoring empty scan submission");
        return respond(SubmitResponse::empty());
    }

    let processed = state.scans.send(ScanSubmission::new(code)).is_ok();
    if processed {
        debug!(%code, "scan accepted");
    } else {
        warn!(%code, "scan consumer is gone, acknowledging without hand-off");
    }
    respond(SubmitResponse::accepted(code, processed))
}

async fn submit_preflight() -> Response {
    (
        [
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (header::ACCESS_CONTROL_ALLOW_METHODS, ALLOWED_METHODS),
            (header::ACCESS_CONTROL_ALLOW_HEADERS, ALLOWED_HEADERS),
        ],
        StatusCode::OK,
    )
        .into_response()
}

fn respond(body: SubmitResponse) -> Response {
    (
        [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
        Json(body),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use std::time::Duration;
    use tokio::sync::mpsc::{self, UnboundedReceiver};
    use tower::ServiceExt;

    fn test_router() -> (Router, UnboundedReceiver<ScanSubmission>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = RouterState {
            scans: tx,
            page: Arc::new(page::render_scan_page(Duration::from_secs(5))),
        };
        (router(state), rx)
    }

    async fn send(router: &Router, request: Request<Body>) -> Response {
        router.clone().oneshot(request).await.unwrap()
    }

    async fn json_body(response: Response) -> SubmitResponse {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_submit(body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(SUBMIT_PATH)
            .body(body.into())
            .unwrap()
    }

    #[tokio::test]
    async fn index_redirects_into_the_scan_page() {
        let (router, _rx) = test_router();
        let response = send(
            &router,
            Request::builder().uri("/").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.starts_with("text/html"), "{content_type}");
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(body.contains("url=/scan"), "{body}");
    }

    #[tokio::test]
    async fn scan_page_allows_camera_use() {
        let (router, _rx) = test_router();
        let response = send(
            &router,
            Request::builder()
                .uri(SCAN_PATH)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["permissions-policy"],
            "camera=(self)"
        );
        let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.starts_with("text/html"), "{content_type}");
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(body.contains("COOLDOWN_MS = 5000"), "cooldown not rendered");
    }

    #[tokio::test]
    async fn submission_is_trimmed_and_forwarded_exactly_once() {
        let (router, mut rx) = test_router();
        let response = send(&router, post_submit("  2000000420509\n")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");

        let body = json_body(response).await;
        assert_eq!(body, SubmitResponse::accepted("2000000420509", true));

        let forwarded = rx.try_recv().unwrap();
        assert_eq!(forwarded.code, "2000000420509");
        assert!(rx.try_recv().is_err(), "more than one hand-off");
    }

    #[tokio::test]
    async fn empty_and_blank_bodies_are_acknowledged_without_hand_off() {
        let (router, mut rx) = test_router();
        for payload in ["", "   \n\t "] {
            let response = send(&router, post_submit(payload)).await;
            assert_eq!(response.status(), StatusCode::OK);
            let body = json_body(response).await;
            assert_eq!(body, SubmitResponse::empty());
        }
        assert!(rx.try_recv().is_err(), "empty body reached the consumer");
    }

    #[tokio::test]
    async fn body_over_the_buffer_limit_is_acknowledged_without_hand_off() {
        let (router, mut rx) = test_router();
        // 3 MiB. The extractor refuses to buffer past its 2 MiB default.
        let response = send(&router, post_submit(vec![b'9'; 3 * 1024 * 1024])).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        let body = json_body(response).await;
        assert_eq!(body, SubmitResponse::empty());
        assert!(rx.try_recv().is_err(), "oversized body reached the consumer");
    }

    #[tokio::test]
    async fn closed_consumer_still_gets_a_success_answer() {
        let (router, rx) = test_router();
        drop(rx);
        let response = send(&router, post_submit("2000000420509")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body.status, "success");
        assert!(!body.processed);
    }

    #[tokio::test]
    async fn invalid_utf8_is_decoded_lossily_not_rejected() {
        let (router, mut rx) = test_router();
        let response = send(
            &router,
            post_submit(Body::from(vec![0xff, 0xfe, b'2', b'0', b'0'])),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body.status, "success");
        assert!(body.barcode.contains("200"));
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn preflight_announces_the_cors_contract() {
        let (router, _rx) = test_router();
        let response = send(
            &router,
            Request::builder()
                .method("OPTIONS")
                .uri(SUBMIT_PATH)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_METHODS], ALLOWED_METHODS);
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_HEADERS], ALLOWED_HEADERS);
    }

    #[tokio::test]
    async fn other_methods_on_submit_are_rejected() {
        let (router, _rx) = test_router();
        let response = send(
            &router,
            Request::builder()
                .method("DELETE")
                .uri(SUBMIT_PATH)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
