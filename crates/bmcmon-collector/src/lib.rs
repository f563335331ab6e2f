pub mod bmc_info;
pub mod chassis_status;
pub mod collector;
pub mod power_draw;
pub mod processor_temperatures;
pub mod sample;
pub mod subcollector;


pub use bmc_info::BmcInfo;
pub use chassis_status::ChassisStatus;
pub use collector::Collector;
pub use power_draw::PowerDraw;
pub use processor_temperatures::ProcessorTemperatures;
pub use sample::{Family, Sample, SampleSet};
pub use subcollector::Subcollector;
