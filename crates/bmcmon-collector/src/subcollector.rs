use crate::sample::{Family, SampleSet};
use async_trait::async_trait;
use bmcmon_session::{SdrRepository, Session, SessionError};
use tokio::time::Instant;

/// Implemented by things that know how to produce a subset of a BMC's
/// metrics. Subcollectors are bound to the lifetime of their collector, not
/// of a session: `initialise` rebinds them to each new session so that
/// describing metrics and adding subcollectors stays decoupled from session
/// churn.
#[async_trait]
pub trait Subcollector: Send {
    /// All families this subcollector can ever produce. Must not touch
    /// session state; it may be called at any time.
    fn describe(&self) -> &'static [&'static Family];

    /// Performs per-session capability detection against a fresh session and
    /// its SDR snapshot. Called once per session, before the first
    /// `collect`; it may be called again for a replacement session and must
    /// discard prior state deterministically. Whatever per-session state is
    /// needed (sensor readers, capability flags) is allocated here, so
    /// `collect` allocates nothing.
    ///
    /// The SDR snapshot is retrieved once by the collector and shared, to
    /// relieve subcollectors from fetching it repeatedly.
    async fn initialise(
        &mut self,
        deadline: Instant,
        session: &mut dyn Session,
        sdr: &SdrRepository,
    ) -> Result<(), SessionError>;

    /// Sends the relevant commands and records zero or more samples. Returns
    /// an error only when the deadline expires or the session itself fails;
    /// an unreadable sensor (the machine could be off) or an absent BMC
    /// feature is not an error.
    async fn collect(
        &mut self,
        deadline: Instant,
        session: &mut dyn Session,
        sink: &mut SampleSet,
    ) -> Result<(), SessionError>;
}
