pub mod challenge;
pub mod error;
pub mod gateway;
pub mod guard;
pub mod keystore;
pub mod ledger;
pub mod params;
pub mod radio;
pub mod session;
pub mod state;

pub use error::{ErrorCode, GatewayError, GatewayResult};
pub use gateway::{Command, CommandGateway, CommandOutput, Envelope, GatewayConfig};
pub use keystore::SharedKey;
pub use params::CommandParams;
