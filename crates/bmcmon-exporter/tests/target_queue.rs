mod common;

use axum::http::StatusCode;
use common::{build_context, get, get_with_headers, sample_value, MockProvider};
use std::sync::atomic::Ordering;
use std::time::Duration;

#[tokio::test]
async fn concurrent_scrapes_of_one_target_serialise() {
    let provider = MockProvider::with_delay(&["10.0.0.1"], Duration::from_millis(50));
    let ctx = build_context(provider);

    let (first, second, third) = tokio::join!(
        get(&ctx.app, "/bmc?target=10.0.0.1"),
        get(&ctx.app, "/bmc?target=10.0.0.1"),
        get(&ctx.app, "/bmc?target=10.0.0.1"),
    );

    for (status, body) in [first, second, third] {
        assert_eq!(status, StatusCode::OK);
        assert_eq!(sample_value(&body, "bmc_up"), Some(1.0));
    }
    // at no point were two commands in flight against the BMC
    assert_eq!(ctx.provider.in_flight.max.load(Ordering::SeqCst), 1);
    assert_eq!(ctx.provider.requests(), 1);
}

#[tokio::test]
async fn queued_request_whose_deadline_expires_is_abandoned() {
    let provider = MockProvider::with_delay(&["10.0.0.1"], Duration::from_millis(200));
    let ctx = build_context(provider);

    // occupy the event loop with a slow scrape
    let app = ctx.app.clone();
    let slow = tokio::spawn(async move { get(&app, "/bmc?target=10.0.0.1").await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    // this one's declared budget expires while still queued
    let (status, body) = get_with_headers(
        &ctx.app,
        "/bmc?target=10.0.0.1",
        &[("x-prometheus-scrape-timeout-seconds", "0.05")],
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body.contains("abandoned"));

    // the slow scrape is unaffected
    let (status, body) = slow.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sample_value(&body, "bmc_up"), Some(1.0));

    // and the abandonment was counted
    let (_, metrics) = get(&ctx.app, "/metrics").await;
    let abandoned = sample_value(&metrics, "bmc_target_abandoned_requests_total");
    assert!(abandoned.unwrap_or(0.0) >= 1.0);
}
