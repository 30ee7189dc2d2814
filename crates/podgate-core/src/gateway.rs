use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::challenge::ChallengeVerifier;
use crate::error::{ApiError, GatewayError, GatewayResult, StoreError};
use crate::guard::BusyGuard;
use crate::keystore::SharedKey;
use crate::ledger::TokenLedger;
use crate::params::{
    parse_i64, parse_non_negative_f64, parse_u32, CommandParams, ParameterSet,
};
use crate::radio::{self, NoRadio, RadioConnector};
use crate::session::{DetachedSessionFactory, DeviceSession, SessionFactory, SessionResult};
use crate::state::{DeviceStateRecord, StateStore, DEFAULT_DATA_SUFFIX, DEFAULT_LOG_SUFFIX};

pub const API_VERSION_MAJOR: u32 = 1;
pub const API_VERSION_MINOR: u32 = 1;

const NO_ACTIVE_SESSION: &str = "no active device session";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Version,
    Token,
    CheckPassword,
    PdmAddress,
    NewPod,
    SetParams,
    RlInfo,
    Status,
    AckAlerts,
    Deactivate,
    Bolus,
    CancelBolus,
    SetTempBasal,
    CancelTempBasal,
    PdmBusy,
    Shutdown,
    Restart,
}

impl Command {
    pub const ALL: [Command; 17] = [
        Command::Version,
        Command::Token,
        Command::CheckPassword,
        Command::PdmAddress,
        Command::NewPod,
        Command::SetParams,
        Command::RlInfo,
        Command::Status,
        Command::AckAlerts,
        Command::Deactivate,
        Command::Bolus,
        Command::CancelBolus,
        Command::SetTempBasal,
        Command::CancelTempBasal,
        Command::PdmBusy,
        Command::Shutdown,
        Command::Restart,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Command::Version => "version",
            Command::Token => "token",
            Command::CheckPassword => "checkpassword",
            Command::PdmAddress => "pdmaddress",
            Command::NewPod => "newpod",
            Command::SetParams => "setparams",
            Command::RlInfo => "rlinfo",
            Command::Status => "status",
            Command::AckAlerts => "ackalerts",
            Command::Deactivate => "deactivate",
            Command::Bolus => "bolus",
            Command::CancelBolus => "cancelbolus",
            Command::SetTempBasal => "settempbasal",
            Command::CancelTempBasal => "canceltempbasal",
            Command::PdmBusy => "pdmbusy",
            Command::Shutdown => "shutdown",
            Command::Restart => "restart",
        }
    }

    pub fn path(self) -> &'static str {
        match self {
            Command::Version => "/omnipy/version",
            Command::Token => "/omnipy/token",
            Command::CheckPassword => "/omnipy/pwcheck",
            Command::PdmAddress => "/omnipy/pdmspy",
            Command::NewPod => "/omnipy/newpod",
            Command::SetParams => "/omnipy/parameters",
            Command::RlInfo => "/rl/info",
            Command::Status => "/pdm/status",
            Command::AckAlerts => "/pdm/ack",
            Command::Deactivate => "/pdm/deactivate",
            Command::Bolus => "/pdm/bolus",
            Command::CancelBolus => "/pdm/cancelbolus",
            Command::SetTempBasal => "/pdm/settempbasal",
            Command::CancelTempBasal => "/pdm/canceltempbasal",
            Command::PdmBusy => "/pdm/isbusy",
            Command::Shutdown => "/omnipy/shutdown",
            Command::Restart => "/omnipy/restart",
        }
    }

    pub fn from_name(name: &str) -> Option<Command> {
        Command::ALL.into_iter().find(|c| c.name() == name)
    }

    pub fn requires_auth(self) -> bool {
        !matches!(
            self,
            Command::Version
                | Command::Token
                | Command::PdmBusy
                | Command::Shutdown
                | Command::Restart
        )
    }

    pub fn failure_label(self) -> &'static str {
        match self {
            Command::Version => "failure while getting version",
            Command::Token => "failure while creating token",
            Command::CheckPassword => "failure while verifying password",
            Command::PdmAddress => "failure while reading address from the controller",
            Command::NewPod => "failure while creating a new device session",
            Command::SetParams => "failure while setting parameters",
            Command::RlInfo => "failure while getting radio info",
            Command::Status => "failure while getting device status",
            Command::AckAlerts => "failure while acknowledging alerts",
            Command::Deactivate => "failure while deactivating device",
            Command::Bolus => "failure while executing bolus",
            Command::CancelBolus => "failure while cancelling bolus",
            Command::SetTempBasal => "failure while setting temp basal",
            Command::CancelTempBasal => "failure while cancelling temp basal",
            Command::PdmBusy => "failure while checking busy state",
            Command::Shutdown => "failure while executing shutdown",
            Command::Restart => "failure while executing restart",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub response: Option<Value>,
    pub status: Option<DeviceStateRecord>,
}

impl CommandOutput {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn response(value: Value) -> Self {
        Self {
            response: Some(value),
            status: None,
        }
    }

    pub fn status(record: Option<DeviceStateRecord>) -> Self {
        Self {
            response: None,
            status: record,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub success: bool,
    pub response: Option<Value>,
    pub status: Option<DeviceStateRecord>,
}

impl Envelope {
    pub fn from_result(command: Command, result: GatewayResult<CommandOutput>) -> Self {
        match result {
            Ok(output) => Self {
                success: true,
                response: output.response,
                status: output.status,
            },
            Err(err) => {
                match &err {
                    GatewayError::Unexpected(detail) => {
                        error!(command = command.name(), error = %detail, "{}", command.failure_label())
                    }
                    other => info!(command = command.name(), code = other.code().as_str(), error = %other, "command rejected"),
                }
                Self {
                    success: false,
                    response: serde_json::to_value(ApiError::from(&err)).ok(),
                    status: None,
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub key_file: PathBuf,
    pub token_file: PathBuf,
    pub state_base: PathBuf,
    pub data_suffix: String,
    pub log_suffix: String,
    pub response_file: PathBuf,
}

impl GatewayConfig {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let dir = data_dir.as_ref();
        Self {
            key_file: dir.join("key"),
            token_file: dir.join("tokens"),
            state_base: dir.join("pod"),
            data_suffix: DEFAULT_DATA_SUFFIX.to_string(),
            log_suffix: DEFAULT_LOG_SUFFIX.to_string(),
            response_file: dir.join("response"),
        }
    }
}

pub struct CommandGateway {
    verifier: ChallengeVerifier,
    ledger: TokenLedger,
    store: StateStore,
    response_file: PathBuf,
    sessions: Arc<dyn SessionFactory>,
    radio: Arc<dyn RadioConnector>,
    state_lock: Mutex<()>,
    radio_lock: Mutex<()>,
}

impl CommandGateway {
    pub fn new(config: &GatewayConfig, key: SharedKey) -> Self {
        Self {
            verifier: ChallengeVerifier::new(key),
            ledger: TokenLedger::new(&config.token_file),
            store: StateStore::with_suffixes(
                &config.state_base,
                &config.data_suffix,
                &config.log_suffix,
            ),
            response_file: config.response_file.clone(),
            sessions: Arc::new(DetachedSessionFactory),
            radio: Arc::new(NoRadio),
            state_lock: Mutex::new(()),
            radio_lock: Mutex::new(()),
        }
    }

    pub fn with_sessions(mut self, sessions: Arc<dyn SessionFactory>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn with_radio(mut self, radio: Arc<dyn RadioConnector>) -> Self {
        self.radio = radio;
        self
    }

    pub fn ledger(&self) -> &TokenLedger {
        &self.ledger
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn clear_stale_files(&self) {
        if let Err(err) = self.ledger.reset() {
            warn!(path = %self.ledger.path().display(), error = %err, "failed to remove stale token ledger");
        }
        match fs::remove_file(&self.response_file) {
            Ok(()) => info!(path = %self.response_file.display(), "removed response queue from previous run"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                warn!(path = %self.response_file.display(), error = %err, "failed to remove stale response queue")
            }
        }
    }

    pub fn execute(&self, command: Command, params: &CommandParams) -> Envelope {
        debug!(command = command.name(), "executing command");
        let result = self
            .authenticate(command, params)
            .and_then(|()| self.dispatch(command, params));
        Envelope::from_result(command, result)
    }

    fn authenticate(&self, command: Command, params: &CommandParams) -> GatewayResult<()> {
        if !command.requires_auth() {
            return Ok(());
        }
        let candidate = self
            .verifier
            .recover_token(params.get("i"), params.get("auth"))?;
        self.ledger.consume(&candidate)
    }

    fn dispatch(&self, command: Command, params: &CommandParams) -> GatewayResult<CommandOutput> {
        match command {
            Command::Version => Ok(CommandOutput::response(json!({
                "version_major": API_VERSION_MAJOR,
                "version_minor": API_VERSION_MINOR,
            }))),
            Command::Token => {
                let token = self.ledger.issue()?;
                Ok(CommandOutput::response(json!({ "token": token.to_base64() })))
            }
            Command::CheckPassword => Ok(CommandOutput::empty()),
            Command::PdmAddress => self.pdm_address(params),
            Command::NewPod => self.new_pod(params),
            Command::SetParams => self.set_params(params),
            Command::RlInfo => {
                let _radio = lock(&self.radio_lock);
                let info = radio::radio_info(self.radio.as_ref())?;
                Ok(CommandOutput::response(info))
            }
            Command::Status => {
                let request_type = params.parse_with("type", parse_u8)?.unwrap_or(0);
                self.run_session(command, |s| s.update_status(request_type))
            }
            Command::AckAlerts => {
                let mask = params.require_with("alertmask", parse_u8)?;
                self.run_session(command, |s| s.acknowledge_alerts(mask))
            }
            Command::Deactivate => self.run_session(command, |s| s.deactivate()),
            Command::Bolus => {
                let amount = params.require_with("amount", parse_non_negative_f64)?;
                self.run_session(command, |s| s.bolus(amount))
            }
            Command::CancelBolus => self.run_session(command, |s| s.cancel_bolus()),
            Command::SetTempBasal => {
                let rate = params.require_with("amount", parse_non_negative_f64)?;
                let hours = params.require_with("hours", parse_non_negative_f64)?;
                self.run_session(command, |s| s.set_temp_basal(rate, hours))
            }
            Command::CancelTempBasal => self.run_session(command, |s| s.cancel_temp_basal()),
            Command::PdmBusy => {
                let _state = lock(&self.state_lock);
                let busy = BusyGuard::new(self.sessions.as_ref()).is_busy(self.store.load());
                Ok(CommandOutput::response(json!({ "busy": busy })))
            }
            Command::Shutdown => self.ensure_idle("shutdown"),
            Command::Restart => self.ensure_idle("restart"),
        }
    }

    fn pdm_address(&self, params: &CommandParams) -> GatewayResult<CommandOutput> {
        let seconds = params.parse_with("timeout", parse_i64)?;
        let timeout = radio::discovery_timeout(seconds)?;
        let _radio = lock(&self.radio_lock);
        let address = radio::discover_address(self.radio.as_ref(), timeout)?;
        Ok(CommandOutput::response(json!({ "radio_address": address })))
    }

    fn new_pod(&self, params: &CommandParams) -> GatewayResult<CommandOutput> {
        let id_lot = params.parse_with("id_lot", parse_u32)?;
        let id_t = params.parse_with("id_t", parse_u32)?;
        let radio_address = params.parse_with("radio_address", parse_u32)?;
        let record = DeviceStateRecord::new(id_lot, id_t, radio_address);

        let _state = lock(&self.state_lock);
        self.archive_current();
        self.store.save(&record, Command::NewPod.name())?;
        info!(?id_lot, ?id_t, "created new device session");
        Ok(CommandOutput::status(Some(record)))
    }

    fn set_params(&self, params: &CommandParams) -> GatewayResult<CommandOutput> {
        let updates = ParameterSet::from_params(params)?;

        let _state = lock(&self.state_lock);
        let mut record = self
            .store
            .load()
            .ok_or_else(|| GatewayError::validation(NO_ACTIVE_SESSION))?;
        updates.apply(&mut record);
        self.store.save(&record, Command::SetParams.name())?;
        Ok(CommandOutput::status(Some(record)))
    }

    fn ensure_idle(&self, action: &str) -> GatewayResult<CommandOutput> {
        let _state = lock(&self.state_lock);
        BusyGuard::new(self.sessions.as_ref()).ensure_idle(self.store.load(), action)?;
        Ok(CommandOutput::empty())
    }

    /// Runs one session operation against the current record and saves
    /// whatever the session left behind, even when the operation failed.
    fn run_session<F>(&self, command: Command, operation: F) -> GatewayResult<CommandOutput>
    where
        F: FnOnce(&mut dyn DeviceSession) -> SessionResult<()>,
    {
        let _state = lock(&self.state_lock);
        let record = self
            .store
            .load()
            .ok_or_else(|| GatewayError::validation(NO_ACTIVE_SESSION))?;
        let mut session = self.sessions.open(Some(record));
        let outcome = operation(session.as_mut());
        let snapshot = session.record().cloned();

        let saved: Result<(), StoreError> = match &snapshot {
            Some(record) => self.store.save(record, command.name()),
            None => Ok(()),
        };
        match (outcome, saved) {
            (Err(err), Err(save_err)) => {
                error!(command = command.name(), error = %save_err, "failed to save device state after failed operation");
                return Err(err.into());
            }
            (Err(err), Ok(())) => return Err(err.into()),
            (Ok(()), Err(save_err)) => return Err(save_err.into()),
            (Ok(()), Ok(())) => {}
        }

        if command == Command::Deactivate {
            self.archive_current();
        }
        Ok(CommandOutput::status(snapshot))
    }

    fn archive_current(&self) {
        if let Err(err) = self.store.archive() {
            error!(error = %err, "failed to archive device state");
        }
    }
}

fn parse_u8(val: &str) -> Option<u8> {
    parse_u32(val).and_then(|v| u8::try_from(v).ok())
}

fn lock(mutex: &Mutex<()>) -> MutexGuard<'_, ()> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}
