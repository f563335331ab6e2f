use crate::target::Target;
use bmcmon_collector::Collector;
use bmcmon_session::Provider;
use lazy_static::lazy_static;
use prometheus::{register_histogram, register_int_counter, Histogram, HistogramOpts, IntCounter, Opts};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;

lazy_static! {
    static ref QUERIES: IntCounter = register_int_counter!(Opts::new(
        "queries_total",
        "The number of times a target has been requested from the mapper.",
    )
    .namespace("bmc")
    .subsystem("mapper"))
    .expect("queries_total registration");
    static ref HITS: IntCounter = register_int_counter!(Opts::new(
        "hits_total",
        "The number of times a previously created target was returned.",
    )
    .namespace("bmc")
    .subsystem("mapper"))
    .expect("hits_total registration");
    static ref GC_TARGETS_CLEARED: Histogram = register_histogram!(HistogramOpts::new(
        "gc_targets_cleared",
        "Observes the number of targets removed by GC each cycle.",
    )
    .namespace("bmc")
    .subsystem("mapper")
    .buckets(prometheus::exponential_buckets(1.0, 1.5, 10).expect("valid buckets")))
    .expect("gc_targets_cleared registration");
    static ref GC_DURATION: Histogram = register_histogram!(HistogramOpts::new(
        "gc_duration_seconds",
        "The time spent scanning the target map under the write lock.",
    )
    .namespace("bmc")
    .subsystem("mapper")
    .buckets(prometheus::exponential_buckets(0.0001, 1.5, 10).expect("valid buckets")))
    .expect("gc_duration_seconds registration");
}

/// When targets are scanned for eviction and how long one may sit unscraped
/// before it goes. Only tests deviate from the defaults.
#[derive(Debug, Clone, Copy)]
pub struct GcPolicy {
    pub interval: Duration,
    pub inactivity_threshold: Duration,
}

impl Default for GcPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30 * 60),
            inactivity_threshold: Duration::from_secs(30 * 60),
        }
    }
}

struct MapperInner {
    targets: RwLock<HashMap<String, Arc<Target>>>,
    provider: Arc<dyn Provider>,
    timeout: Duration,
}

/// Lazily maps target addresses to their long-lived [`Target`]s. Targets are
/// created on first scrape and kept until GC decides nobody is scraping them
/// any more; without that, the map would grow forever on a scraper that
/// rotates addresses.
pub struct Mapper {
    inner: Arc<MapperInner>,
    gc_task: Mutex<Option<JoinHandle<()>>>,
}

impl Mapper {
    pub fn new(provider: Arc<dyn Provider>, timeout: Duration) -> Self {
        Self::with_policy(provider, timeout, GcPolicy::default())
    }

    pub fn with_policy(provider: Arc<dyn Provider>, timeout: Duration, policy: GcPolicy) -> Self {
        let inner = Arc::new(MapperInner {
            targets: RwLock::new(HashMap::new()),
            provider,
            timeout,
        });
        let gc_inner = Arc::clone(&inner);
        let gc_task = tokio::spawn(async move {
            let first = tokio::time::Instant::now() + policy.interval;
            let mut ticker = tokio::time::interval_at(first, policy.interval);
            loop {
                ticker.tick().await;
                gc(&gc_inner, policy.inactivity_threshold).await;
            }
        });
        Self {
            inner,
            gc_task: Mutex::new(Some(gc_task)),
        }
    }

    /// Returns the target for `addr`, creating it on first sight. The fast
    /// path is a shared read lock; creation re-checks under the write lock,
    /// since another request may have created the target while this one
    /// waited.
    pub fn handler(&self, addr: &str) -> Arc<Target> {
        QUERIES.inc();
        {
            let targets = self.inner.targets.read().unwrap();
            if let Some(target) = targets.get(addr) {
                HITS.inc();
                return Arc::clone(target);
            }
        }

        let mut targets = self.inner.targets.write().unwrap();
        if let Some(target) = targets.get(addr) {
            return Arc::clone(target);
        }
        let collector = Collector::new(
            addr.to_string(),
            Arc::clone(&self.inner.provider),
            self.inner.timeout,
        );
        let target = Arc::new(Target::new(collector));
        targets.insert(addr.to_string(), Arc::clone(&target));
        target
    }

    /// The number of targets currently cached.
    pub fn len(&self) -> usize {
        self.inner.targets.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops GC and closes every remaining target in parallel. Each close
    /// goes through its target's event loop, so in-flight scrapes finish
    /// first.
    pub async fn close(&self) {
        if let Some(task) = self.gc_task.lock().unwrap().take() {
            task.abort();
        }
        let targets: Vec<Arc<Target>> = {
            let mut targets = self.inner.targets.write().unwrap();
            targets.drain().map(|(_, target)| target).collect()
        };
        close_all(targets).await;
    }
}

/// One eviction pass. Targets past the inactivity threshold are removed from
/// the map first, so no new scrape can find them, then closed outside the
/// lock; the lock is held only for the scan, which never does I/O.
async fn gc(inner: &Arc<MapperInner>, inactivity_threshold: Duration) {
    let timer = GC_DURATION.start_timer();
    let threshold = chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or(i64::MAX)
        .saturating_sub(inactivity_threshold.as_nanos() as i64);

    let evicted: Vec<Arc<Target>> = {
        let mut targets = inner.targets.write().unwrap();
        let mut evicted = Vec::new();
        targets.retain(|_, target| {
            let last = target.last_collection();
            // a zero stamp means created but never scraped; leave it for the
            // scrape that prompted its creation
            if last == 0 || last >= threshold {
                return true;
            }
            evicted.push(Arc::clone(target));
            false
        });
        evicted
    };
    timer.observe_duration();

    let cleared = evicted.len();
    close_all(evicted).await;
    GC_TARGETS_CLEARED.observe(cleared as f64);
    if cleared > 0 {
        tracing::info!(cleared, "garbage-collected idle targets");
    }
}

/// Closes targets concurrently, one task per target.
async fn close_all(targets: Vec<Arc<Target>>) {
    let mut tasks = Vec::with_capacity(targets.len());
    for target in targets {
        tasks.push(tokio::spawn(async move { target.close().await }));
    }
    for task in tasks {
        let _ = task.await;
    }
}
