use crate::mapper::Mapper;
use crate::metrics;
use axum::extract::{Query, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use lazy_static::lazy_static;
use prometheus::{Encoder, TextEncoder};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

#[derive(Clone)]
pub struct AppState {
    pub mapper: Arc<Mapper>,
    /// End-to-end budget applied at the HTTP layer; the event loop applies
    /// its own collection budget on top.
    pub scrape_timeout: Duration,
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/bmc", get(bmc))
        .route("/metrics", get(self_metrics))
        .layer(middleware::from_fn(record_request_duration))
        .with_state(state)
}

lazy_static! {
    static ref ROOT_PAGE: String = format!(
        r#"<!DOCTYPE html>
<html lang="en">
    <head>
        <meta charset="utf-8"/>
        <title>bmcmon</title>
    </head>
    <body>
        <h1>bmcmon</h1>
        <form action="/bmc">
            <label>Target:</label>
            <input type="text" name="target" placeholder="IP[:port=623]" required="required"/>
            <input type="submit" value="Scrape"/>
        </form>
        <pre>bmcmon {}</pre>
    </body>
</html>
"#,
        metrics::VERSION
    );
}

async fn root() -> Html<&'static str> {
    Html(ROOT_PAGE.as_str())
}

async fn bmc(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let Some(addr) = params.get("target") else {
        return (
            StatusCode::BAD_REQUEST,
            "'target' parameter must be specified\n",
        )
            .into_response();
    };

    let timeout = lowest_timeout(&headers, state.scrape_timeout);
    let deadline = Instant::now() + timeout;
    let target = state.mapper.handler(addr);
    match target.scrape(deadline).await {
        Ok(body) => ([(header::CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)], body).into_response(),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, format!("{e}\n")).into_response(),
    }
}

async fn self_metrics() -> Response {
    let mut buf = Vec::new();
    match TextEncoder::new().encode(&prometheus::gather(), &mut buf) {
        Ok(()) => ([(header::CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)], buf).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {e}\n"),
        )
            .into_response(),
    }
}

/// The lower of the exporter's configured timeout and the timeout the
/// scraper declared in its request, e.g. `X-Prometheus-Scrape-Timeout-Seconds:
/// 10.000000`. An absent or unparsable header means the configured timeout
/// stands.
fn lowest_timeout(headers: &HeaderMap, configured: Duration) -> Duration {
    let Some(header) = headers
        .get("x-prometheus-scrape-timeout-seconds")
        .and_then(|value| value.to_str().ok())
    else {
        return configured;
    };
    let Ok(seconds) = header.parse::<f64>() else {
        return configured;
    };
    if !seconds.is_finite() || seconds <= 0.0 {
        return configured;
    }
    Duration::from_secs_f64(seconds).min(configured)
}

async fn record_request_duration(request: Request, next: Next) -> Response {
    // only the known endpoints get a series; anything else would let
    // clients mint label values
    let path = match request.uri().path() {
        path @ ("/" | "/bmc" | "/metrics") => Some(path.to_string()),
        _ => None,
    };
    let start = std::time::Instant::now();
    let response = next.run(request).await;
    if let Some(path) = path {
        metrics::REQUEST_DURATION
            .with_label_values(&[&path])
            .observe(start.elapsed().as_secs_f64());
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-prometheus-scrape-timeout-seconds",
            HeaderValue::from_str(value).unwrap(),
        );
        headers
    }

    #[test]
    fn absent_header_uses_configured_timeout() {
        let configured = Duration::from_secs(9);
        assert_eq!(lowest_timeout(&HeaderMap::new(), configured), configured);
    }

    #[test]
    fn scraper_timeout_wins_when_stricter() {
        let configured = Duration::from_secs(9);
        assert_eq!(
            lowest_timeout(&headers_with("2.500000"), configured),
            Duration::from_secs_f64(2.5)
        );
    }

    #[test]
    fn configured_timeout_wins_when_stricter() {
        let configured = Duration::from_secs(9);
        assert_eq!(lowest_timeout(&headers_with("30"), configured), configured);
    }

    #[test]
    fn unparsable_header_uses_configured_timeout() {
        let configured = Duration::from_secs(9);
        assert_eq!(lowest_timeout(&headers_with("soon"), configured), configured);
        assert_eq!(lowest_timeout(&headers_with("-4"), configured), configured);
        assert_eq!(lowest_timeout(&headers_with("NaN"), configured), configured);
    }
}
