use crate::error::SessionError;
use crate::sdr::SdrRepository;
use async_trait::async_trait;
use std::future::Future;
use tokio::time::Instant;

/// A live, authenticated IPMI session bound to one UDP flow.
///
/// A session is exclusively owned by the collector responsible for its
/// address; the per-target event loop guarantees at most one command is in
/// flight at a time, which is why every method takes `&mut self` and no
/// implementation needs internal locking.
///
/// Methods do not take deadlines themselves; callers bound each command with
/// [`within`] so sub-deadline policy stays in one place.
#[async_trait]
pub trait Session: Send {
    /// The IPMI version negotiated for this session, as rendered into the
    /// `ipmi` label of `bmc_info`.
    fn ipmi_version(&self) -> &'static str;

    /// Get System GUID.
    async fn system_guid(&mut self) -> Result<[u8; 16], SessionError>;

    /// Get Device ID.
    async fn device_id(&mut self) -> Result<DeviceInfo, SessionError>;

    /// Get Chassis Status.
    async fn chassis_status(&mut self) -> Result<ChassisState, SessionError>;

    /// DCMI Get Power Reading in "Normal" statistics mode.
    async fn power_reading(&mut self) -> Result<PowerReading, SessionError>;

    /// Get Sensor Reading for the given sensor number.
    async fn sensor_reading(&mut self, sensor: u8) -> Result<SensorReading, SessionError>;

    /// Retrieve the full-sensor-record snapshot of the SDR repository. Called
    /// once per session, immediately after establishment.
    async fn sdr_repository(&mut self) -> Result<SdrRepository, SessionError>;

    /// Close Session. The underlying transport is torn down separately by the
    /// accompanying closer, whether or not this succeeds.
    async fn close(&mut self) -> Result<(), SessionError>;
}

/// Bounds a session operation with a deadline, mapping expiry to
/// [`SessionError::Timeout`].
pub async fn within<T, F>(deadline: Instant, fut: F) -> Result<T, SessionError>
where
    F: Future<Output = Result<T, SessionError>> + Send,
{
    match tokio::time::timeout_at(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(SessionError::Timeout),
    }
}

/// The subset of Get Device ID used by the exporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    pub firmware_major: u8,
    pub firmware_minor: u8,
}

impl DeviceInfo {
    /// Renders the firmware revision the way the BMC reports it: a 7-bit
    /// major part and a BCD-encoded minor part, e.g. `1.23`.
    pub fn firmware(&self) -> String {
        format!("{}.{:02x}", self.firmware_major & 0x7f, self.firmware_minor)
    }
}

/// The subset of Get Chassis Status used by the exporter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChassisState {
    pub powered_on: bool,
    pub intrusion: bool,
    pub power_fault: bool,
    pub cooling_fault: bool,
    pub drive_fault: bool,
}

/// A DCMI power reading. `active` mirrors the power measurement state bit;
/// when false, `watts` is meaningless and must not be emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerReading {
    pub active: bool,
    pub watts: u16,
}

/// A raw sensor reading. `available` is false when the BMC flags the reading
/// as unavailable (scanning disabled, machine off).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorReading {
    pub raw: u8,
    pub available: bool,
}
