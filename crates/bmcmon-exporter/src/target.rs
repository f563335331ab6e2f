use crate::render;
use bmcmon_collector::{Collector, SampleSet};
use lazy_static::lazy_static;
use prometheus::{register_histogram, register_int_counter, Histogram, HistogramOpts, IntCounter, Opts};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

lazy_static! {
    static ref SCRAPE_DISPATCH_LATENCY: Histogram = register_histogram!(HistogramOpts::new(
        "scrape_dispatch_latency_seconds",
        "Observes the duration spent waiting for the event loop to pick up \
         scrape requests.",
    )
    .namespace("bmc")
    .subsystem("target")
    .buckets(prometheus::exponential_buckets(0.1, 1.8, 10).expect("valid buckets")))
    .expect("scrape_dispatch_latency_seconds registration");
    static ref ABANDONED_REQUESTS: IntCounter = register_int_counter!(Opts::new(
        "abandoned_requests_total",
        "The number of scrapes we have abandoned before the client's request \
         got to the front of the queue for the BMC, either because they gave \
         up or one of our timeouts fired. This indicates an overly short \
         scrape timeout and/or interval.",
    )
    .namespace("bmc")
    .subsystem("target"))
    .expect("abandoned_requests_total registration");
}

/// Cap on the final Close Session when the event loop shuts down.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// The scrape never reached the event loop: its deadline expired while
/// queued. Surfaces to the client as a 503.
#[derive(Debug, thiserror::Error)]
#[error("scrape abandoned: deadline expired before the event loop picked it up")]
pub struct Abandoned;

struct ScrapeRequest {
    deadline: Instant,
    created: std::time::Instant,
    /// `None` means the event loop found the request already expired.
    done: oneshot::Sender<Option<String>>,
}

/// The outermost wrapper around one BMC being scraped. It owns the collector
/// and runs an event loop around it, so all access to the BMC is serialised
/// and the collector needs no locking.
pub struct Target {
    scrape_tx: mpsc::Sender<ScrapeRequest>,
    close_tx: mpsc::Sender<oneshot::Sender<()>>,
    last_collection: Arc<AtomicI64>,
}

impl Target {
    /// Constructs the target and starts its event-loop task. Call
    /// [`Target::close`] when finished to terminate the task and the
    /// underlying BMC connection.
    pub fn new(collector: Collector) -> Self {
        let last_collection = collector.last_collection_cell();
        let (scrape_tx, scrape_rx) = mpsc::channel(1);
        let (close_tx, close_rx) = mpsc::channel(1);
        tokio::spawn(event_loop(collector, scrape_rx, close_rx));
        Self {
            scrape_tx,
            close_tx,
            last_collection,
        }
    }

    /// Queues a scrape and waits for its exposition. Requests are served in
    /// send order, one at a time. A request whose deadline expires before
    /// the event loop picks it up is abandoned rather than left clogging
    /// the queue - a few briefly queued requests are normal with several
    /// scrapers asking about the same BMC, that's the serialisation doing
    /// its job.
    pub async fn scrape(&self, deadline: Instant) -> Result<String, Abandoned> {
        let (done_tx, done_rx) = oneshot::channel();
        let request = ScrapeRequest {
            deadline,
            created: std::time::Instant::now(),
            done: done_tx,
        };
        tokio::select! {
            sent = self.scrape_tx.send(request) => {
                if sent.is_err() {
                    // the event loop is gone; the target is being closed
                    ABANDONED_REQUESTS.inc();
                    return Err(Abandoned);
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                ABANDONED_REQUESTS.inc();
                return Err(Abandoned);
            }
        }
        match done_rx.await {
            Ok(Some(body)) => Ok(body),
            // expired in the queue, or the target closed underneath us
            Ok(None) | Err(_) => Err(Abandoned),
        }
    }

    /// When this target last started a scrape, as nanoseconds since the Unix
    /// epoch. Read without going through the event loop: GC must not wait
    /// behind an in-flight scrape.
    pub fn last_collection(&self) -> i64 {
        self.last_collection.load(Ordering::Relaxed)
    }

    /// Terminates the event loop and the BMC connection behind it. Goes
    /// through the event loop, so an in-flight scrape finishes first.
    pub async fn close(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.close_tx.send(ack_tx).await.is_ok() {
            let _ = ack_rx.await;
        }
    }
}

async fn event_loop(
    mut collector: Collector,
    mut scrape_rx: mpsc::Receiver<ScrapeRequest>,
    mut close_rx: mpsc::Receiver<oneshot::Sender<()>>,
) {
    loop {
        // one request at a time; this is what serialises access to the BMC
        tokio::select! {
            request = scrape_rx.recv() => {
                let Some(request) = request else { return };
                if Instant::now() >= request.deadline {
                    // sat in the queue past its deadline; not worth a scrape
                    ABANDONED_REQUESTS.inc();
                    let _ = request.done.send(None);
                    continue;
                }
                SCRAPE_DISPATCH_LATENCY.observe(request.created.elapsed().as_secs_f64());

                let mut samples = SampleSet::new();
                collector.collect(request.deadline, &mut samples).await;
                // the requester may have given up; nothing to do about it
                let _ = request.done.send(Some(render::exposition(&samples)));
            }
            ack = close_rx.recv() => {
                let Some(ack) = ack else { return };
                collector.close(Instant::now() + CLOSE_TIMEOUT).await;
                let _ = ack.send(());
                return;
            }
        }
    }
}
