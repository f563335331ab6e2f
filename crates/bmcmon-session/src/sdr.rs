//! The typed model of the Sensor Data Repository consumed by subcollectors.
//!
//! Records are retrieved once per session and treated as a read-only
//! snapshot; discovery (which sensors exist, how to convert their raw
//! readings) happens at subcollector initialisation, not per scrape.

use crate::error::SessionError;
use crate::session::Session;

/// IPMI linearisation code for a plain linear sensor. Anything else requires
/// conversion formulas the exporter does not implement; such sensors are
/// skipped at reader construction.
const LINEARISATION_LINEAR: u8 = 0x00;

/// The entity a sensor is attached to. Only the entities the exporter
/// filters on are named; everything else is carried raw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityId {
    Processor,
    PowerSupply,
    /// The deprecated DCMI-specific processor entity, still emitted by some
    /// BMCs instead of `Processor`.
    DcmiProcessor,
    Other(u8),
}

impl EntityId {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0x03 => EntityId::Processor,
            0x0a => EntityId::PowerSupply,
            0x41 => EntityId::DcmiProcessor,
            other => EntityId::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorType {
    Temperature,
    Other(u8),
}

impl SensorType {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0x01 => SensorType::Temperature,
            other => SensorType::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorUnit {
    Celsius,
    Watts,
    Other(u8),
}

impl SensorUnit {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0x01 => SensorUnit::Celsius,
            0x06 => SensorUnit::Watts,
            other => SensorUnit::Other(other),
        }
    }
}

/// How the raw reading byte is to be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalogDataFormat {
    Unsigned,
    OnesComplement,
    TwosComplement,
    /// The sensor does not provide analog readings.
    NonAnalog,
}

impl AnalogDataFormat {
    /// Decodes bits 7:6 of the "sensor units 1" field.
    pub fn from_raw(bits: u8) -> Self {
        match bits & 0x03 {
            0 => AnalogDataFormat::Unsigned,
            1 => AnalogDataFormat::OnesComplement,
            2 => AnalogDataFormat::TwosComplement,
            _ => AnalogDataFormat::NonAnalog,
        }
    }
}

/// One Full Sensor Record: the sensor's identity plus the conversion factors
/// needed to turn a raw reading byte into a real value.
#[derive(Debug, Clone)]
pub struct FullSensorRecord {
    pub sensor_number: u8,
    pub entity: EntityId,
    /// Entity instance, rendered in decimal as the `cpu`/`psu` label value.
    pub instance: u8,
    pub sensor_type: SensorType,
    pub base_unit: SensorUnit,
    pub analog_format: AnalogDataFormat,
    pub linearisation: u8,
    pub m: i16,
    pub b: i16,
    pub b_exp: i8,
    pub r_exp: i8,
    /// The record's ID string, for diagnostics only.
    pub id: String,
}

/// A read-only snapshot of the SDR's full sensor records.
#[derive(Debug, Clone, Default)]
pub struct SdrRepository {
    records: Vec<FullSensorRecord>,
}

impl SdrRepository {
    pub fn new(records: Vec<FullSensorRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[FullSensorRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Converts raw readings of one sensor into real values. Built once per
/// session from a Full Sensor Record so that scrapes allocate nothing.
#[derive(Debug, Clone)]
pub struct SensorReader {
    sensor_number: u8,
    format: AnalogDataFormat,
    m: i16,
    b: i16,
    b_exp: i8,
    r_exp: i8,
}

impl SensorReader {
    /// Returns `None` when the record needs conversion machinery the
    /// exporter does not implement (non-linear sensors, discrete readings).
    pub fn new(record: &FullSensorRecord) -> Option<Self> {
        if record.linearisation != LINEARISATION_LINEAR {
            return None;
        }
        if record.analog_format == AnalogDataFormat::NonAnalog {
            return None;
        }
        Some(Self {
            sensor_number: record.sensor_number,
            format: record.analog_format,
            m: record.m,
            b: record.b,
            b_exp: record.b_exp,
            r_exp: record.r_exp,
        })
    }

    pub async fn read(&self, session: &mut dyn Session) -> Result<f64, SessionError> {
        let reading = session.sensor_reading(self.sensor_number).await?;
        if !reading.available {
            return Err(SessionError::ReadingUnavailable);
        }
        Ok(self.convert(reading.raw))
    }

    /// `y = (M * raw + B * 10^Bexp) * 10^Rexp` per the full-record
    /// conversion formula.
    fn convert(&self, raw: u8) -> f64 {
        let raw = match self.format {
            AnalogDataFormat::Unsigned => f64::from(raw),
            AnalogDataFormat::TwosComplement => f64::from(raw as i8),
            AnalogDataFormat::OnesComplement => {
                if raw & 0x80 != 0 {
                    -f64::from(!raw)
                } else {
                    f64::from(raw)
                }
            }
            AnalogDataFormat::NonAnalog => f64::NAN,
        };
        (f64::from(self.m) * raw + f64::from(self.b) * 10f64.powi(i32::from(self.b_exp)))
            * 10f64.powi(i32::from(self.r_exp))
    }
}
