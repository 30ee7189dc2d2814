use thiserror::Error;

use crate::error::GatewayError;
use crate::state::DeviceStateRecord;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{0}")]
    Hardware(String),
    #[error("{0}")]
    Rejected(String),
    #[error("{0}")]
    Internal(String),
}

impl From<SessionError> for GatewayError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Hardware(msg) => GatewayError::Hardware(msg),
            SessionError::Rejected(msg) => GatewayError::Validation(msg),
            SessionError::Internal(msg) => GatewayError::Unexpected(msg),
        }
    }
}

pub type SessionResult<T> = Result<T, SessionError>;

pub trait DeviceSession: Send {
    fn is_busy(&self) -> bool;

    fn update_status(&mut self, request_type: u8) -> SessionResult<()>;

    fn acknowledge_alerts(&mut self, alert_mask: u8) -> SessionResult<()>;

    fn deactivate(&mut self) -> SessionResult<()>;

    fn bolus(&mut self, amount: f64) -> SessionResult<()>;

    fn cancel_bolus(&mut self) -> SessionResult<()>;

    fn set_temp_basal(&mut self, rate: f64, hours: f64) -> SessionResult<()>;

    fn cancel_temp_basal(&mut self) -> SessionResult<()>;

    fn record(&self) -> Option<&DeviceStateRecord>;
}

pub trait SessionFactory: Send + Sync {
    fn open(&self, record: Option<DeviceStateRecord>) -> Box<dyn DeviceSession>;
}

#[derive(Debug, Default)]
pub struct DetachedSession {
    record: Option<DeviceStateRecord>,
}

impl DetachedSession {
    pub fn new(record: Option<DeviceStateRecord>) -> Self {
        Self { record }
    }

    fn unavailable<T>(&self) -> SessionResult<T> {
        Err(SessionError::Hardware(
            "no device driver is attached".to_string(),
        ))
    }
}

impl DeviceSession for DetachedSession {
    fn is_busy(&self) -> bool {
        false
    }

    fn update_status(&mut self, _request_type: u8) -> SessionResult<()> {
        self.unavailable()
    }

    fn acknowledge_alerts(&mut self, _alert_mask: u8) -> SessionResult<()> {
        self.unavailable()
    }

    fn deactivate(&mut self) -> SessionResult<()> {
        self.unavailable()
    }

    fn bolus(&mut self, _amount: f64) -> SessionResult<()> {
        self.unavailable()
    }

    fn cancel_bolus(&mut self) -> SessionResult<()> {
        self.unavailable()
    }

    fn set_temp_basal(&mut self, _rate: f64, _hours: f64) -> SessionResult<()> {
        self.unavailable()
    }

    fn cancel_temp_basal(&mut self) -> SessionResult<()> {
        self.unavailable()
    }

    fn record(&self) -> Option<&DeviceStateRecord> {
        self.record.as_ref()
    }
}

#[derive(Debug, Default)]
pub struct DetachedSessionFactory;

impl SessionFactory for DetachedSessionFactory {
    fn open(&self, record: Option<DeviceStateRecord>) -> Box<dyn DeviceSession> {
        Box::new(DetachedSession::new(record))
    }
}
