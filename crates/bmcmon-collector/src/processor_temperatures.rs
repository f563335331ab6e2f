use crate::sample::{Family, SampleSet};
use crate::subcollector::Subcollector;
use async_trait::async_trait;
use bmcmon_session::{
    within, EntityId, SdrRepository, SensorReader, SensorType, SensorUnit, Session, SessionError,
};
use tokio::time::Instant;

pub static PROCESSOR_TEMPERATURE: Family = Family {
    name: "processor_temperature_celsius",
    help: "The temperature of a processor die in degrees celsius.",
    labels: &["cpu"],
};

static FAMILIES: [&Family; 1] = [&PROCESSOR_TEMPERATURE];

/// Reads per-CPU die temperatures discovered from the SDR.
#[derive(Default)]
pub struct ProcessorTemperatures {
    /// One reader per CPU temperature sensor; the first element is the `cpu`
    /// label value, pre-rendered to save a conversion each scrape.
    sensors: Vec<(String, SensorReader)>,
}

impl ProcessorTemperatures {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Subcollector for ProcessorTemperatures {
    fn describe(&self) -> &'static [&'static Family] {
        &FAMILIES
    }

    async fn initialise(
        &mut self,
        _deadline: Instant,
        _session: &mut dyn Session,
        sdr: &SdrRepository,
    ) -> Result<(), SessionError> {
        self.sensors.clear();

        let mut processor = Vec::new();
        let mut dcmi = Vec::new();
        for record in sdr.records() {
            // in practice FSRs under these entities are always temperature
            // sensors, but be a little defensive
            if record.sensor_type != SensorType::Temperature {
                continue;
            }
            if record.base_unit != SensorUnit::Celsius {
                continue;
            }
            match record.entity {
                EntityId::Processor => processor.push(record),
                EntityId::DcmiProcessor => dcmi.push(record),
                _ => {}
            }
        }

        // prefer sensors under the processor entity; otherwise fall back to
        // the deprecated DCMI entity. Never combine sensors from the two -
        // it's one or the other.
        let chosen = if processor.is_empty() { dcmi } else { processor };
        for record in chosen {
            let Some(reader) = SensorReader::new(record) else {
                tracing::debug!(
                    sensor = %record.id,
                    "skipping temperature sensor with unsupported conversion"
                );
                continue;
            };
            self.sensors.push((record.instance.to_string(), reader));
        }
        Ok(())
    }

    async fn collect(
        &mut self,
        deadline: Instant,
        session: &mut dyn Session,
        sink: &mut SampleSet,
    ) -> Result<(), SessionError> {
        for (cpu, reader) in &self.sensors {
            match within(deadline, reader.read(&mut *session)).await {
                Ok(reading) => sink.record(&PROCESSOR_TEMPERATURE, &[cpu], reading),
                // machine could be off
                Err(_) => continue,
            }
        }
        Ok(())
    }
}
