use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceStateRecord {
    pub id_lot: Option<u32>,
    pub id_t: Option<u32>,
    pub radio_address: Option<u32>,

    pub nonce_last: Option<u32>,
    pub nonce_seed: u32,

    pub radio_packet_sequence: u32,
    pub radio_message_sequence: u32,

    pub var_utc_offset: f64,
    pub var_maximum_bolus: f64,
    pub var_maximum_temp_basal_rate: f64,
    pub var_alert_low_reservoir: f64,
    pub var_alert_replace_pod: i64,
    pub var_notify_bolus_start: bool,
    pub var_notify_bolus_cancel: bool,
    pub var_notify_temp_basal_set: bool,
    pub var_notify_temp_basal_cancel: bool,
    pub var_notify_basal_schedule_change: bool,

    pub state_progress: u32,
    pub state_faulted: bool,
    pub state_alert: u32,
    pub state_active_minutes: u32,
    pub insulin_delivered: f64,
    pub insulin_reservoir: f64,
    pub last_command: Option<String>,
    pub state_last_updated: Option<DateTime<Utc>>,
}

impl Default for DeviceStateRecord {
    fn default() -> Self {
        Self {
            id_lot: None,
            id_t: None,
            radio_address: None,
            nonce_last: None,
            nonce_seed: 0,
            radio_packet_sequence: 0,
            radio_message_sequence: 0,
            var_utc_offset: 0.0,
            var_maximum_bolus: 15.0,
            var_maximum_temp_basal_rate: 15.0,
            var_alert_low_reservoir: 10.0,
            var_alert_replace_pod: 4200,
            var_notify_bolus_start: false,
            var_notify_bolus_cancel: false,
            var_notify_temp_basal_set: false,
            var_notify_temp_basal_cancel: false,
            var_notify_basal_schedule_change: false,
            state_progress: 0,
            state_faulted: false,
            state_alert: 0,
            state_active_minutes: 0,
            insulin_delivered: 0.0,
            insulin_reservoir: 0.0,
            last_command: None,
            state_last_updated: None,
        }
    }
}

impl DeviceStateRecord {
    pub fn new(id_lot: Option<u32>, id_t: Option<u32>, radio_address: Option<u32>) -> Self {
        Self {
            id_lot,
            id_t,
            radio_address,
            ..Self::default()
        }
    }

    pub fn reset_nonce(&mut self) {
        self.nonce_last = None;
        self.nonce_seed = 0;
    }

    pub fn reset_radio_sequences(&mut self) {
        self.radio_packet_sequence = 0;
        self.radio_message_sequence = 0;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateLogEntry {
    pub timestamp: DateTime<Utc>,
    pub event: String,
    pub record: DeviceStateRecord,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let record: DeviceStateRecord =
            serde_json::from_str(r#"{"id_lot": 44147, "nonce_seed": 3}"#).unwrap();
        assert_eq!(record.id_lot, Some(44147));
        assert_eq!(record.nonce_seed, 3);
        assert_eq!(record.var_maximum_bolus, 15.0);
        assert_eq!(record.radio_address, None);
    }
}
