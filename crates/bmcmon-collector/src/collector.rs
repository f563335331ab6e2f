use crate::bmc_info::BmcInfo;
use crate::chassis_status::ChassisStatus;
use crate::power_draw::PowerDraw;
use crate::processor_temperatures::ProcessorTemperatures;
use crate::sample::{bool_to_f64, Family, SampleSet};
use crate::subcollector::Subcollector;
use bmcmon_session::{within, Closer, Provider, ProviderError, Session, SessionError};
use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, Histogram, HistogramOpts, IntCounter, Opts,
};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

lazy_static! {
    static ref COLLECT_DURATION: Histogram = register_histogram!(HistogramOpts::new(
        "collect_duration_seconds",
        "Observes the time taken by each BMC collection.",
    )
    .namespace("bmc")
    .subsystem("collector"))
    .expect("collect_duration_seconds registration");
    static ref PROVIDER_REQUESTS: IntCounter = register_int_counter!(Opts::new(
        "provider_requests_total",
        "The number of requests made to a session provider.",
    )
    .namespace("bmc")
    .subsystem("collector"))
    .expect("provider_requests_total registration");
    static ref INITIALISE_TIMEOUTS: IntCounter = register_int_counter!(Opts::new(
        "initialise_timeouts_total",
        "The number of freshly established sessions discarded because \
         discovery or subcollector initialisation did not complete.",
    )
    .namespace("bmc")
    .subsystem("collector"))
    .expect("initialise_timeouts_total registration");
    static ref SESSION_EXPIRIES: IntCounter = register_int_counter!(Opts::new(
        "session_expiries_total",
        "The number of sessions that have stopped working.",
    )
    .namespace("bmc")
    .subsystem("collector"))
    .expect("session_expiries_total registration");
}

pub static UP: Family = Family {
    name: "bmc_up",
    help: "1 if the exporter had a working session with the BMC this scrape, \
           0 otherwise.",
    labels: &[],
};

pub static SCRAPE_DURATION: Family = Family {
    name: "bmc_scrape_duration_seconds",
    help: "The time taken to collect all metrics, measured by the exporter.",
    labels: &[],
};

/// Per-command allowance for the liveness canary. Kept well under the scrape
/// budget so that a dead session leaves time to re-establish and still
/// answer.
const CANARY_TIMEOUT: Duration = Duration::from_secs(2);

/// Allowance for Close Session on a session believed expired; a reply is
/// unlikely, so don't wait long for one.
const EXPIRED_CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
enum SetupError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("scrape deadline expired before a session was established")]
    Deadline,
    #[error("initial discovery failed: {0}")]
    Discovery(SessionError),
}

/// Scrapes metrics from a single BMC on demand.
///
/// A collector is driven by exactly one event-loop task: its owning target
/// serialises scrapes, so none of this state needs locking. The one
/// exception is `last_collection`, which mapper GC samples from outside the
/// event loop via the shared atomic cell.
pub struct Collector {
    target: String,
    provider: Arc<dyn Provider>,

    /// Budget for each collection before returning what we have. This exists
    /// to ensure fairness when multiple scrapers are querying the exporter
    /// for a given BMC; collection returns early when either this has passed
    /// or the caller's deadline fires, whichever happens first.
    timeout: Duration,

    /// Start of the most recent scrape, as nanoseconds since the Unix epoch.
    /// An atomic rather than a timestamp type so GC can read it while a
    /// scrape is in progress, without waiting behind the event loop.
    last_collection: Arc<AtomicI64>,

    /// The session established with the target, if any, and the closer for
    /// its transport. `None` if no collection has been attempted, or
    /// establishment failed, or the collector has been closed. The two are
    /// always set and cleared together.
    session: Option<Box<dyn Session>>,
    closer: Option<Box<dyn Closer>>,

    info: BmcInfo,
    chassis: ChassisStatus,
    processors: ProcessorTemperatures,
    power: PowerDraw,
}

impl Collector {
    pub fn new(target: String, provider: Arc<dyn Provider>, timeout: Duration) -> Self {
        Self {
            target,
            provider,
            timeout,
            last_collection: Arc::new(AtomicI64::new(0)),
            session: None,
            closer: None,
            info: BmcInfo::new(),
            chassis: ChassisStatus::new(),
            processors: ProcessorTemperatures::new(),
            power: PowerDraw::new(),
        }
    }

    /// When this collector last started a scrape, as nanoseconds since the
    /// Unix epoch; zero if it has never been scraped.
    pub fn last_collection(&self) -> i64 {
        self.last_collection.load(Ordering::Relaxed)
    }

    /// The cell behind [`Collector::last_collection`], for readers that
    /// outlive the move of this collector into its event loop.
    pub fn last_collection_cell(&self) -> Arc<AtomicI64> {
        Arc::clone(&self.last_collection)
    }

    /// Runs one scrape, recording samples into `sink`. Always records
    /// exactly one `bmc_up` and one `bmc_scrape_duration_seconds` sample;
    /// everything else depends on how far the pipeline got before the
    /// deadline.
    pub async fn collect(&mut self, deadline: Instant, sink: &mut SampleSet) {
        let start = std::time::Instant::now();
        self.last_collection.store(unix_nanos(), Ordering::Relaxed);

        let deadline = deadline.min(Instant::now() + self.timeout);
        let up = self.scrape(deadline, sink).await;
        sink.record(&UP, &[], bool_to_f64(up));

        let elapsed = start.elapsed().as_secs_f64();
        COLLECT_DURATION.observe(elapsed);
        sink.record(&SCRAPE_DURATION, &[], elapsed);
    }

    async fn scrape(&mut self, deadline: Instant, sink: &mut SampleSet) -> bool {
        if self.session.is_none() {
            if let Err(e) = self.new_session(deadline).await {
                tracing::warn!(addr = %self.target, error = %e, "could not obtain session");
                return false;
            }
        }

        // liveness canary: bmc-info always succeeds on a healthy session, so
        // a failure means the session expired or the BMC hit a bug. Capped
        // well under the scrape budget so there is still time to recover.
        let canary_deadline = deadline.min(Instant::now() + CANARY_TIMEOUT);
        let Some(session) = self.session.as_deref_mut() else {
            return false;
        };
        if self.info.collect(canary_deadline, session, sink).await.is_err() {
            SESSION_EXPIRIES.inc();

            // resetting only the session is not enough: a delayed response
            // from the old session arriving on the same socket could be
            // matched against a command from the new one, so both go.
            let close_deadline = deadline.min(Instant::now() + EXPIRED_CLOSE_TIMEOUT);
            self.close(close_deadline).await;

            if let Err(e) = self.new_session(deadline).await {
                tracing::warn!(
                    addr = %self.target,
                    error = %e,
                    "could not re-establish session after expiry"
                );
                return false;
            }
            let Some(session) = self.session.as_deref_mut() else {
                return false;
            };
            if let Err(e) = self.info.collect(deadline, session, sink).await {
                tracing::warn!(
                    addr = %self.target,
                    error = %e,
                    "canary failed on a fresh session"
                );
                self.close(deadline).await;
                return false;
            }
        }

        let Some(session) = self.session.as_deref_mut() else {
            return false;
        };
        let rest: [&mut dyn Subcollector; 3] =
            [&mut self.chassis, &mut self.processors, &mut self.power];
        for subcollector in rest {
            // the only expected cause of an error here is deadline expiry,
            // in which case there is no time for more commands; return what
            // we have. The session is retained.
            if let Err(e) = subcollector.collect(deadline, &mut *session, sink).await {
                tracing::debug!(addr = %self.target, error = %e, "scrape curtailed");
                break;
            }
        }
        true
    }

    /// Establishes a session and performs per-session discovery, leaving
    /// every subcollector initialised. On any failure the collector is back
    /// to the no-session state with both handles released.
    async fn new_session(&mut self, deadline: Instant) -> Result<(), SetupError> {
        PROVIDER_REQUESTS.inc();
        let handle =
            match tokio::time::timeout_at(deadline, self.provider.session(&self.target)).await {
                Ok(Ok(handle)) => handle,
                Ok(Err(e)) => return Err(SetupError::Provider(e)),
                Err(_) => return Err(SetupError::Deadline),
            };
        self.session = Some(handle.session);
        self.closer = Some(handle.closer);

        if let Err(e) = self.discover(deadline).await {
            INITIALISE_TIMEOUTS.inc();
            self.close(deadline).await;
            return Err(e);
        }
        Ok(())
    }

    async fn discover(&mut self, deadline: Instant) -> Result<(), SetupError> {
        let Some(session) = self.session.as_deref_mut() else {
            return Ok(());
        };
        let sdr = within(deadline, session.sdr_repository())
            .await
            .map_err(SetupError::Discovery)?;

        let subcollectors: [&mut dyn Subcollector; 4] = [
            &mut self.info,
            &mut self.chassis,
            &mut self.processors,
            &mut self.power,
        ];
        for subcollector in subcollectors {
            subcollector
                .initialise(deadline, &mut *session, &sdr)
                .await
                .map_err(SetupError::Discovery)?;
        }
        Ok(())
    }

    /// Cleanly terminates the session and the socket under it. The collector
    /// stays usable: the next collect re-establishes a connection. The
    /// deadline bounds the Close Session command; the transport is released
    /// whether or not that succeeds.
    pub async fn close(&mut self, deadline: Instant) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        if let Err(e) = within(deadline, session.close()).await {
            tracing::debug!(addr = %self.target, error = %e, "session close failed");
        }
        if let Some(mut closer) = self.closer.take() {
            closer.close();
        }
    }
}

fn unix_nanos() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}
