mod record;
mod store;

pub use record::{DeviceStateRecord, StateLogEntry};
pub use store::{ArchivedPair, StateStore, DEFAULT_DATA_SUFFIX, DEFAULT_LOG_SUFFIX};
