mod common;

use bmcmon_exporter::mapper::GcPolicy;
use common::{build_context, build_context_with_policy, get, sample_value, MockProvider};
use std::sync::atomic::Ordering;
use std::time::Duration;

#[tokio::test]
async fn repeated_lookups_return_the_same_target() {
    let ctx = build_context(MockProvider::new(&["10.0.0.1"]));

    let first = ctx.mapper.handler("10.0.0.1");
    let second = ctx.mapper.handler("10.0.0.1");
    assert!(std::sync::Arc::ptr_eq(&first, &second));
    assert_eq!(ctx.mapper.len(), 1);

    ctx.mapper.handler("10.0.0.2");
    assert_eq!(ctx.mapper.len(), 2);
}

#[tokio::test]
async fn idle_targets_are_evicted_and_closed() {
    let ctx = build_context_with_policy(
        MockProvider::new(&["10.0.0.1"]),
        GcPolicy {
            interval: Duration::from_millis(200),
            inactivity_threshold: Duration::from_secs(1),
        },
    );

    let (_, body) = get(&ctx.app, "/bmc?target=10.0.0.1").await;
    assert_eq!(sample_value(&body, "bmc_up"), Some(1.0));
    assert_eq!(ctx.mapper.len(), 1);

    // within the threshold the target survives GC passes
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(ctx.mapper.len(), 1);

    // past it, the target is removed and its session torn down
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(ctx.mapper.len(), 0);
    let flags = ctx.provider.session_flags(0);
    assert!(flags.session_closed.load(Ordering::SeqCst));
    assert!(flags.closer_closed.load(Ordering::SeqCst));

    // a new scrape recreates the target from scratch
    let (_, body) = get(&ctx.app, "/bmc?target=10.0.0.1").await;
    assert_eq!(sample_value(&body, "bmc_up"), Some(1.0));
    assert_eq!(ctx.provider.requests(), 2);
}

#[tokio::test]
async fn targets_created_but_never_scraped_survive_gc() {
    let ctx = build_context_with_policy(
        MockProvider::new(&["10.0.0.1"]),
        GcPolicy {
            interval: Duration::from_millis(100),
            inactivity_threshold: Duration::from_millis(100),
        },
    );

    let _target = ctx.mapper.handler("10.0.0.1");
    tokio::time::sleep(Duration::from_millis(400)).await;
    // a zero last-collection stamp is not "idle since 1970"
    assert_eq!(ctx.mapper.len(), 1);
}

#[tokio::test]
async fn shutdown_closes_every_target() {
    let ctx = build_context(MockProvider::new(&["10.0.0.1", "10.0.0.2"]));

    let (_, first) = get(&ctx.app, "/bmc?target=10.0.0.1").await;
    let (_, second) = get(&ctx.app, "/bmc?target=10.0.0.2").await;
    assert_eq!(sample_value(&first, "bmc_up"), Some(1.0));
    assert_eq!(sample_value(&second, "bmc_up"), Some(1.0));

    ctx.mapper.close().await;

    assert_eq!(ctx.mapper.len(), 0);
    for index in 0..2 {
        let flags = ctx.provider.session_flags(index);
        assert!(flags.session_closed.load(Ordering::SeqCst));
        assert!(flags.closer_closed.load(Ordering::SeqCst));
    }
}
