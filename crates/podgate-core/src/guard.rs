use tracing::info;

use crate::error::{GatewayError, GatewayResult};
use crate::session::SessionFactory;
use crate::state::DeviceStateRecord;

pub struct BusyGuard<'a> {
    sessions: &'a dyn SessionFactory,
}

impl<'a> BusyGuard<'a> {
    pub fn new(sessions: &'a dyn SessionFactory) -> Self {
        Self { sessions }
    }

    pub fn is_busy(&self, record: Option<DeviceStateRecord>) -> bool {
        self.sessions.open(record).is_busy()
    }

    pub fn ensure_idle(&self, record: Option<DeviceStateRecord>, action: &str) -> GatewayResult<()> {
        if self.is_busy(record) {
            info!(action, "refusing disruptive command, device busy");
            return Err(GatewayError::validation(format!(
                "cannot {} while the device is busy",
                action
            )));
        }
        Ok(())
    }
}
