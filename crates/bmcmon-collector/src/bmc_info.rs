use crate::sample::{Family, SampleSet};
use crate::subcollector::Subcollector;
use async_trait::async_trait;
use bmcmon_session::{within, SdrRepository, Session, SessionError};
use tokio::time::Instant;

pub static BMC_INFO: Family = Family {
    name: "bmc_info",
    help: "Provides the BMC's GUID, firmware, and the version of IPMI used \
           to scrape it. Constant 1.",
    labels: &["guid", "firmware", "ipmi"],
};

static FAMILIES: [&Family; 1] = [&BMC_INFO];

/// Identifies the BMC via Get System GUID and Get Device ID. Also doubles as
/// the session liveness canary: these commands always succeed on a healthy
/// session, so a failure here means the session has expired.
pub struct BmcInfo {
    /// Scratch for the canonical dashed-hex GUID rendering, sized once for
    /// the collector's lifetime.
    guid_buf: [u8; 36],
}

impl BmcInfo {
    pub fn new() -> Self {
        Self { guid_buf: [0; 36] }
    }
}

impl Default for BmcInfo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Subcollector for BmcInfo {
    fn describe(&self) -> &'static [&'static Family] {
        &FAMILIES
    }

    async fn initialise(
        &mut self,
        _deadline: Instant,
        _session: &mut dyn Session,
        _sdr: &SdrRepository,
    ) -> Result<(), SessionError> {
        Ok(())
    }

    async fn collect(
        &mut self,
        deadline: Instant,
        session: &mut dyn Session,
        sink: &mut SampleSet,
    ) -> Result<(), SessionError> {
        let guid = within(deadline, session.system_guid()).await?;
        let device = within(deadline, session.device_id()).await?;
        encode_guid(&mut self.guid_buf, &guid);
        let guid = std::str::from_utf8(&self.guid_buf).unwrap_or_default();
        sink.record(
            &BMC_INFO,
            &[guid, &device.firmware(), session.ipmi_version()],
            1.0,
        );
        Ok(())
    }
}

const HEX: &[u8; 16] = b"0123456789abcdef";

/// Renders a 16-byte GUID as the canonical 36-character dashed form, with
/// the bytes grouped 4-2-2-2-6.
fn encode_guid(dst: &mut [u8; 36], guid: &[u8; 16]) {
    let mut out = 0;
    for (i, byte) in guid.iter().enumerate() {
        if matches!(i, 4 | 6 | 8 | 10) {
            dst[out] = b'-';
            out += 1;
        }
        dst[out] = HEX[usize::from(byte >> 4)];
        out += 1;
        dst[out] = HEX[usize::from(byte & 0x0f)];
        out += 1;
    }
}
