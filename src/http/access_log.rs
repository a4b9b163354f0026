//! Request access logging.
//!
//! One line per request with method, route, host, path, status and
//! response time. Failed responses (status >= 400) log at error level.

use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request},
    http::header::HOST,
    middleware::Next,
    response::Response,
};

/// Axum middleware emitting one access log line per request.
///
/// Install with `axum::middleware::from_fn(access_log)`.
pub async fn access_log(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| path.clone());
    let host = request
        .headers()
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| request.uri().host().map(str::to_string))
        .unwrap_or_default();

    let response = next.run(request).await;

    let status = response.status().as_u16();
    let response_time_ms = started.elapsed().as_secs_f64() * 1000.0;

    if status >= 400 {
        tracing::error!(
            method = %method,
            route = %route,
            host = %host,
            path = %path,
            status,
            response_time_ms,
            "request failed"
        );
    } else {
        tracing::info!(
            method = %method,
            route = %route,
            host = %host,
            path = %path,
            status,
            response_time_ms,
            "request served"
        );
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode, middleware, routing::get, Router};
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route("/ok", get(|| async { "ok" }))
            .route("/missing", get(|| async { StatusCode::NOT_FOUND }))
            .layer(middleware::from_fn(access_log))
    }

    #[tokio::test]
    async fn passes_response_through() {
        let response = app()
            .oneshot(Request::builder().uri("/ok").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn failed_status_is_preserved() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/missing")
                    .header(HOST, "localhost")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
