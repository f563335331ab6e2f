use crate::sample::{bool_to_f64, Family, SampleSet};
use crate::subcollector::Subcollector;
use async_trait::async_trait;
use bmcmon_session::{within, SdrRepository, Session, SessionError};
use tokio::time::Instant;

pub static CHASSIS_POWERED_ON: Family = Family {
    name: "chassis_powered_on",
    help: "Whether the system is currently turned on, according to Get \
           Chassis Status. If 0, the system could be in S4/S5, or mechanical \
           off.",
    labels: &[],
};

pub static CHASSIS_INTRUSION: Family = Family {
    name: "chassis_intrusion",
    help: "Whether the system cover is open, according to Get Chassis Status.",
    labels: &[],
};

pub static CHASSIS_POWER_FAULT: Family = Family {
    name: "chassis_power_fault",
    help: "Whether a fault has been detected in the main power subsystem, \
           according to Get Chassis Status.",
    labels: &[],
};

pub static CHASSIS_COOLING_FAULT: Family = Family {
    name: "chassis_cooling_fault",
    help: "Whether a cooling or fan fault has been detected, according to \
           Get Chassis Status.",
    labels: &[],
};

pub static CHASSIS_DRIVE_FAULT: Family = Family {
    name: "chassis_drive_fault",
    help: "Whether a disk drive in the system is faulty, according to Get \
           Chassis Status.",
    labels: &[],
};

static FAMILIES: [&Family; 5] = [
    &CHASSIS_POWERED_ON,
    &CHASSIS_INTRUSION,
    &CHASSIS_POWER_FAULT,
    &CHASSIS_COOLING_FAULT,
    &CHASSIS_DRIVE_FAULT,
];

/// Turns the boolean flags of Get Chassis Status into five gauges.
#[derive(Default)]
pub struct ChassisStatus;

impl ChassisStatus {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subcollector for ChassisStatus {
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
        let status = within(deadline, session.chassis_status()).await?;
        sink.record(&CHASSIS_POWERED_ON, &[], bool_to_f64(status.powered_on));
        sink.record(&CHASSIS_INTRUSION, &[], bool_to_f64(status.intrusion));
        sink.record(&CHASSIS_POWER_FAULT, &[], bool_to_f64(status.power_fault));
        sink.record(&CHASSIS_COOLING_FAULT, &[], bool_to_f64(status.cooling_fault));
        sink.record(&CHASSIS_DRIVE_FAULT, &[], bool_to_f64(status.drive_fault));
        Ok(())
    }
}
