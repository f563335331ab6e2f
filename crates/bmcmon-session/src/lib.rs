pub mod error;
pub mod file;
pub mod provider;
pub mod sdr;
pub mod session;

pub use error::{ProviderError, SessionError};
pub use file::FileRetriever;
pub use provider::{
    Closer, Connector, Credentials, CredentialsProvider, CredentialsRetriever, Provider,
    SessionHandle,
};
pub use sdr::{
    AnalogDataFormat, EntityId, FullSensorRecord, SdrRepository, SensorReader, SensorType,
    SensorUnit,
};
pub use session::{within, ChassisState, DeviceInfo, PowerReading, Session, SensorReading};
