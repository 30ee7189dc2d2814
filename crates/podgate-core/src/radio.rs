use std::time::{Duration, Instant};

use crc::{Crc, CRC_8_SMBUS};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::{GatewayError, GatewayResult};

pub const MAX_DISCOVERY_TIMEOUT: Duration = Duration::from_millis(30_000);

const PACKET_HEADER_LEN: usize = 2;
const ADDRESS_LEN: usize = 4;

const PACKET_CRC: Crc<u8> = Crc::<u8>::new(&CRC_8_SMBUS);

#[derive(Debug, Error)]
pub enum RadioError {
    #[error("radio peripheral unavailable: {0}")]
    Unavailable(String),
    #[error("radio I/O error: {0}")]
    Io(String),
}

impl From<RadioError> for GatewayError {
    fn from(err: RadioError) -> Self {
        GatewayError::Hardware(err.to_string())
    }
}

pub trait RadioLink: Send {
    fn get_packet(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, RadioError>;

    fn info(&mut self) -> Result<Value, RadioError>;

    fn disconnect(&mut self) -> Result<(), RadioError>;
}

pub trait RadioConnector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn RadioLink>, RadioError>;
}

pub struct RadioHandle {
    link: Box<dyn RadioLink>,
}

impl RadioHandle {
    pub fn open(connector: &dyn RadioConnector) -> Result<Self, RadioError> {
        Ok(Self {
            link: connector.connect()?,
        })
    }

    pub fn link(&mut self) -> &mut dyn RadioLink {
        self.link.as_mut()
    }
}

impl Drop for RadioHandle {
    fn drop(&mut self) {
        if let Err(err) = self.link.disconnect() {
            debug!(error = %err, "ignoring radio disconnect failure");
        }
    }
}

pub fn discovery_timeout(seconds: Option<i64>) -> GatewayResult<Duration> {
    let Some(seconds) = seconds else {
        return Ok(MAX_DISCOVERY_TIMEOUT);
    };
    if seconds < 0 {
        return Err(GatewayError::validation("timeout cannot be negative"));
    }
    let millis = seconds.saturating_mul(1000) as u64;
    if millis > MAX_DISCOVERY_TIMEOUT.as_millis() as u64 {
        return Err(GatewayError::validation(
            "timeout cannot be more than 30 seconds",
        ));
    }
    Ok(Duration::from_millis(millis))
}

pub fn packet_address(data: &[u8]) -> Option<u32> {
    if data.len() <= PACKET_HEADER_LEN + 1 {
        return None;
    }
    let (body, checksum) = data.split_at(data.len() - 1);
    let payload = &body[PACKET_HEADER_LEN..];
    if PACKET_CRC.checksum(payload) != checksum[0] {
        return None;
    }
    let address: [u8; ADDRESS_LEN] = payload.get(..ADDRESS_LEN)?.try_into().ok()?;
    Some(u32::from_be_bytes(address))
}

pub fn discover_address(connector: &dyn RadioConnector, timeout: Duration) -> GatewayResult<u32> {
    let deadline = Instant::now() + timeout;
    let mut handle = RadioHandle::open(connector)?;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        let Some(data) = handle.link().get_packet(remaining)? else {
            break;
        };
        match packet_address(&data) {
            Some(address) => {
                debug!(address = %format!("{:08x}", address), "radio address detected");
                return Ok(address);
            }
            None => warn!(len = data.len(), "discarding invalid radio packet"),
        }
    }
    Err(GatewayError::hardware("no packet detected"))
}

pub fn radio_info(connector: &dyn RadioConnector) -> GatewayResult<Value> {
    let mut handle = RadioHandle::open(connector)?;
    Ok(handle.link().info()?)
}

#[derive(Debug, Default)]
pub struct NoRadio;

impl RadioConnector for NoRadio {
    fn connect(&self) -> Result<Box<dyn RadioLink>, RadioError> {
        Err(RadioError::Unavailable(
            "no radio peripheral configured".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn framed(address: u32, extra: &[u8]) -> Vec<u8> {
        let mut payload = address.to_be_bytes().to_vec();
        payload.extend_from_slice(extra);
        let mut packet = vec![0xAA, 0x01];
        packet.extend_from_slice(&payload);
        packet.push(PACKET_CRC.checksum(&payload));
        packet
    }

    #[derive(Default)]
    struct Script {
        packets: Mutex<VecDeque<Option<Vec<u8>>>>,
        connects: AtomicUsize,
        disconnects: AtomicUsize,
    }

    struct ScriptLink(Arc<Script>);

    impl RadioLink for ScriptLink {
        fn get_packet(&mut self, _timeout: Duration) -> Result<Option<Vec<u8>>, RadioError> {
            match self.0.packets.lock().unwrap().pop_front() {
                Some(next) => Ok(next),
                None => Err(RadioError::Io("script exhausted".into())),
            }
        }

        fn info(&mut self) -> Result<Value, RadioError> {
            Ok(serde_json::json!({"version": "2.0"}))
        }

        fn disconnect(&mut self) -> Result<(), RadioError> {
            self.0.disconnects.fetch_add(1, Ordering::SeqCst);
            Err(RadioError::Io("already closed".into()))
        }
    }

    struct ScriptConnector(Arc<Script>);

    impl RadioConnector for ScriptConnector {
        fn connect(&self) -> Result<Box<dyn RadioLink>, RadioError> {
            self.0.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptLink(self.0.clone())))
        }
    }

    fn scripted(packets: Vec<Option<Vec<u8>>>) -> (ScriptConnector, Arc<Script>) {
        let script = Arc::new(Script::default());
        *script.packets.lock().unwrap() = packets.into();
        (ScriptConnector(script.clone()), script)
    }

    #[test]
    fn finds_address_after_skipping_bad_checksum() {
        let mut corrupt = framed(0x11223344, &[0x05]);
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0xFF;
        let (connector, script) = scripted(vec![Some(corrupt), Some(framed(0x1f0e89f0, &[0x05]))]);

        let address = discover_address(&connector, Duration::from_secs(5)).unwrap();

        assert_eq!(address, 0x1f0e89f0);
        assert_eq!(script.disconnects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn timeout_reports_no_packet_and_releases_link() {
        let (connector, script) = scripted(vec![None]);

        let err = discover_address(&connector, Duration::from_secs(5)).unwrap_err();

        assert!(matches!(err, GatewayError::Hardware(msg) if msg == "no packet detected"));
        assert_eq!(script.disconnects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn link_error_still_releases_link() {
        let (connector, script) = scripted(vec![]);

        let err = discover_address(&connector, Duration::from_secs(5)).unwrap_err();

        assert!(matches!(err, GatewayError::Hardware(_)));
        assert_eq!(script.disconnects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn zero_budget_does_not_poll() {
        let (connector, script) = scripted(vec![Some(framed(1, &[]))]);

        let err = discover_address(&connector, Duration::ZERO).unwrap_err();

        assert!(matches!(err, GatewayError::Hardware(_)));
        assert_eq!(script.packets.lock().unwrap().len(), 1);
        assert_eq!(script.disconnects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn short_or_headerless_packets_are_invalid() {
        assert_eq!(packet_address(&[]), None);
        assert_eq!(packet_address(&[0xAA, 0x01, 0x00]), None);
        let payload = [0x01, 0x02];
        let mut short = vec![0xAA, 0x01];
        short.extend_from_slice(&payload);
        short.push(PACKET_CRC.checksum(&payload));
        assert_eq!(packet_address(&short), None);
    }

    #[test]
    fn timeout_ceiling_is_inclusive() {
        assert_eq!(discovery_timeout(Some(30)).unwrap(), MAX_DISCOVERY_TIMEOUT);
        assert_eq!(discovery_timeout(None).unwrap(), MAX_DISCOVERY_TIMEOUT);
        assert_eq!(discovery_timeout(Some(0)).unwrap(), Duration::ZERO);
        assert!(matches!(discovery_timeout(Some(31)), Err(GatewayError::Validation(_))));
        assert!(matches!(discovery_timeout(Some(-1)), Err(GatewayError::Validation(_))));
        assert!(matches!(discovery_timeout(Some(i64::MAX)), Err(GatewayError::Validation(_))));
    }

    #[test]
    fn radio_info_releases_link() {
        let (connector, script) = scripted(vec![]);
        let info = radio_info(&connector).unwrap();
        assert_eq!(info["version"], "2.0");
        assert_eq!(script.connects.load(Ordering::SeqCst), 1);
        assert_eq!(script.disconnects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn crc_matches_known_value() {
        // CRC-8/SMBUS check value for "123456789".
        assert_eq!(PACKET_CRC.checksum(b"123456789"), 0xF4);
    }
}
