//! The exporter's own build and request metrics.

use lazy_static::lazy_static;
use prometheus::{
    register_gauge, register_histogram_vec, register_int_gauge_vec, Gauge, HistogramOpts,
    HistogramVec, IntGaugeVec, Opts,
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

lazy_static! {
    static ref BUILD_INFO: IntGaugeVec = register_int_gauge_vec!(
        Opts::new(
            "build_info",
            "The version and commit of the running exporter. Constant 1.",
        )
        .namespace("bmc")
        .subsystem("exporter"),
        &["version", "commit"]
    )
    .expect("build_info registration");
    static ref BUILD_TIME: Gauge = register_gauge!(Opts::new(
        "build_time_seconds",
        "When the running exporter was built, as seconds since the Unix epoch.",
    )
    .namespace("bmc")
    .subsystem("exporter"))
    .expect("build_time_seconds registration");
    pub static ref REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        HistogramOpts::new(
            "request_duration_seconds",
            "The time taken to execute the handlers of web server endpoints.",
        )
        .namespace("bmc")
        .subsystem("exporter"),
        &["path"]
    )
    .expect("request_duration_seconds registration");
}

/// Stamps the build metrics and pre-creates the per-path duration series so
/// they exist from the first scrape.
pub fn init() {
    let commit = option_env!("BMCMON_COMMIT").unwrap_or("unknown");
    BUILD_INFO.with_label_values(&[VERSION, commit]).set(1);
    if let Some(epoch) =
        option_env!("SOURCE_DATE_EPOCH").and_then(|raw| raw.parse::<f64>().ok())
    {
        BUILD_TIME.set(epoch);
    }
    for path in ["/", "/bmc", "/metrics"] {
        REQUEST_DURATION.with_label_values(&[path]);
    }
}
