use crate::sample::{Family, SampleSet};
use crate::subcollector::Subcollector;
use async_trait::async_trait;
use bmcmon_session::{
    within, EntityId, SdrRepository, SensorReader, SensorUnit, Session, SessionError,
};
use std::time::Duration;
use tokio::time::Instant;

pub static POWER_DRAW: Family = Family {
    name: "power_draw_watts",
    help: "The instantaneous amount of electricity being used by the machine.",
    labels: &["psu"],
};

static FAMILIES: [&Family; 1] = [&POWER_DRAW];

/// Cap on the DCMI capability probe at initialisation, so a BMC that
/// silently drops the command cannot eat the whole scrape budget.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Reads power consumption, preferring per-PSU wattage sensors from the SDR
/// and falling back to DCMI Get Power Reading, which yields a single figure
/// for the whole machine under `psu=""`.
#[derive(Default)]
pub struct PowerDraw {
    /// One reader per PSU wattage sensor; the first element is the `psu`
    /// label value, pre-rendered to save a conversion each scrape.
    sensors: Vec<(String, SensorReader)>,

    /// Whether DCMI Get Power Reading is still worth sending this session.
    /// Only consulted when `sensors` is empty.
    supports_power_reading: bool,
}

impl PowerDraw {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Subcollector for PowerDraw {
    fn describe(&self) -> &'static [&'static Family] {
        &FAMILIES
    }

    async fn initialise(
        &mut self,
        deadline: Instant,
        session: &mut dyn Session,
        sdr: &SdrRepository,
    ) -> Result<(), SessionError> {
        self.sensors.clear();
        self.supports_power_reading = false;

        for record in sdr.records() {
            // the sensor type for power draw is Other (0x0b), so the base
            // unit and entity do the filtering
            if record.base_unit != SensorUnit::Watts {
                continue;
            }
            if record.entity != EntityId::PowerSupply {
                continue;
            }
            let Some(reader) = SensorReader::new(record) else {
                tracing::debug!(
                    sensor = %record.id,
                    "skipping wattage sensor with unsupported conversion"
                );
                continue;
            };
            self.sensors.push((record.instance.to_string(), reader));
        }
        if !self.sensors.is_empty() {
            return Ok(());
        }

        // no per-PSU sensors; probe DCMI once per session. A BMC without
        // DCMI support may silently ignore the command rather than reject
        // it, which is indistinguishable from a timeout - in that case stay
        // enabled and try again next scrape. Only a substantive rejection
        // disables the command for the rest of the session.
        self.supports_power_reading = true;
        let probe_deadline = deadline.min(Instant::now() + PROBE_TIMEOUT);
        match within(probe_deadline, session.power_reading()).await {
            Ok(_) => {}
            Err(e) if e.is_timeout() => {}
            Err(e) => {
                tracing::debug!(error = %e, "disabling DCMI power reading for this session");
                self.supports_power_reading = false;
            }
        }
        Ok(())
    }

    async fn collect(
        &mut self,
        deadline: Instant,
        session: &mut dyn Session,
        sink: &mut SampleSet,
    ) -> Result<(), SessionError> {
        if !self.sensors.is_empty() {
            for (psu, reader) in &self.sensors {
                match within(deadline, reader.read(&mut *session)).await {
                    Ok(reading) => sink.record(&POWER_DRAW, &[psu], reading),
                    // machine could be off
                    Err(_) => continue,
                }
            }
            return Ok(());
        }

        if !self.supports_power_reading {
            return Ok(());
        }
        let reading = within(deadline, session.power_reading()).await?;
        if !reading.active {
            // power measurement is switched off; nothing to report
            return Ok(());
        }
        sink.record(&POWER_DRAW, &[""], f64::from(reading.watts));
        Ok(())
    }
}
