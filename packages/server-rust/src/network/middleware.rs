//! HTTP middleware for the `SiteLens` API.
//!
//! Every route gets a request id, a trace span carrying that id, and CORS.
//! Only the classify routes get the request timeout: the event stream stays
//! open as long as its client listens.

use axum::body::Body;
use axum::http::header::HeaderName;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::Span;

use super::config::NetworkConfig;

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Wraps every route of `router`, outermost first:
///
/// 1. `SetRequestId` keeps a client-supplied `X-Request-Id` or assigns a UUID
/// 2. `Trace` opens an `http` span tagged with that id
/// 3. `CORS` for the configured origins, GET and POST only
/// 4. `PropagateRequestId` echoes the id on the response
pub fn with_common_layers<S>(router: Router<S>, config: &NetworkConfig) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::new(REQUEST_ID_HEADER, MakeRequestUuid))
            .layer(TraceLayer::new_for_http().make_span_with(request_span))
            .layer(build_cors_layer(&config.cors_origins))
            .layer(PropagateRequestIdLayer::new(REQUEST_ID_HEADER)),
    )
}

/// Answers 408 when a route takes longer than `request_timeout` to produce
/// its response headers.
pub fn with_request_timeout<S>(router: Router<S>, config: &NetworkConfig) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(TimeoutLayer::with_status_code(
        StatusCode::REQUEST_TIMEOUT,
        config.request_timeout,
    ))
}

fn request_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get(&REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-");
    tracing::info_span!(
        "http",
        method = %request.method(),
        path = request.uri().path(),
        request_id,
    )
}

/// `"*"` allows any origin; otherwise only the parseable entries are allowed.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let parsed: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::http::header;
    use axum::routing::get;
    use tower::ServiceExt;

    use super::*;

    fn ping() -> Router {
        Router::new().route("/ping", get(|| async { "pong" }))
    }

    #[tokio::test]
    async fn request_id_is_assigned_and_echoed() {
        let app = with_common_layers(ping(), &NetworkConfig::default());

        let assigned = app
            .clone()
            .oneshot(Request::get("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(assigned.status(), StatusCode::OK);
        assert!(!assigned.headers()[&REQUEST_ID_HEADER].is_empty());

        let kept = app
            .oneshot(
                Request::get("/ping")
                    .header(&REQUEST_ID_HEADER, "client-7")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(kept.headers()[&REQUEST_ID_HEADER], "client-7");
    }

    #[tokio::test]
    async fn cors_preflight_honors_configured_origins() {
        let config = NetworkConfig {
            cors_origins: vec![
                "http://localhost:3000".to_string(),
                "not a header value\n".to_string(),
            ],
            ..NetworkConfig::default()
        };
        let app = with_common_layers(ping(), &config);

        let preflight = app
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/ping")
                    .header(header::ORIGIN, "http://localhost:3000")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            preflight.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://localhost:3000"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_route_times_out_with_408() {
        let config = NetworkConfig {
            request_timeout: Duration::from_millis(50),
            ..NetworkConfig::default()
        };
        let slow = Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                "late"
            }),
        );
        let app = with_request_timeout(slow, &config);

        let response = app
            .oneshot(Request::get("/slow").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    }
}
