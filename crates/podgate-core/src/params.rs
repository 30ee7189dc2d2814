use std::collections::HashMap;

use crate::error::{GatewayError, GatewayResult};
use crate::state::DeviceStateRecord;

#[derive(Debug, Clone, Default)]
pub struct CommandParams(HashMap<String, String>);

impl CommandParams {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self(values)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn parse_with<T>(
        &self,
        name: &str,
        parser: fn(&str) -> Option<T>,
    ) -> GatewayResult<Option<T>> {
        match self.get(name) {
            None => Ok(None),
            Some(raw) => parser(raw)
                .map(Some)
                .ok_or_else(|| invalid_value(name, raw)),
        }
    }

    pub fn require_with<T>(&self, name: &str, parser: fn(&str) -> Option<T>) -> GatewayResult<T> {
        self.parse_with(name, parser)?
            .ok_or_else(|| GatewayError::validation(format!("missing parameter '{}'", name)))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for CommandParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

fn invalid_value(name: &str, raw: &str) -> GatewayError {
    GatewayError::validation(format!("invalid value '{}' for parameter '{}'", raw, name))
}

pub fn parse_u32(val: &str) -> Option<u32> {
    let trimmed = val.trim();
    if let Some(hex) = trimmed.strip_prefix("0x") {
        u32::from_str_radix(hex, 16).ok()
    } else {
        trimmed.parse::<u32>().ok()
    }
}

pub fn parse_i64(val: &str) -> Option<i64> {
    val.trim().parse::<i64>().ok()
}

pub fn parse_f64(val: &str) -> Option<f64> {
    val.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

pub fn parse_non_negative_f64(val: &str) -> Option<f64> {
    parse_f64(val).filter(|v| *v >= 0.0)
}

pub fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParameterUpdate {
    IdLot(u32),
    IdT(u32),
    RadioAddress(u32),
    UtcOffset(f64),
    MaximumBolus(f64),
    MaximumTempBasalRate(f64),
    AlertLowReservoir(f64),
    AlertReplacePod(i64),
    NotifyBolusStart(bool),
    NotifyBolusCancel(bool),
    NotifyTempBasalSet(bool),
    NotifyTempBasalCancel(bool),
    NotifyBasalScheduleChange(bool),
}

type ParameterParser = fn(&str) -> Option<ParameterUpdate>;

pub const PARAMETER_TABLE: &[(&str, ParameterParser)] = &[
    ("id_lot", |v| parse_u32(v).map(ParameterUpdate::IdLot)),
    ("id_t", |v| parse_u32(v).map(ParameterUpdate::IdT)),
    ("radio_address", |v| parse_u32(v).map(ParameterUpdate::RadioAddress)),
    ("var_utc_offset", |v| parse_f64(v).map(ParameterUpdate::UtcOffset)),
    ("var_maximum_bolus", |v| {
        parse_non_negative_f64(v).map(ParameterUpdate::MaximumBolus)
    }),
    ("var_maximum_temp_basal_rate", |v| {
        parse_non_negative_f64(v).map(ParameterUpdate::MaximumTempBasalRate)
    }),
    ("var_alert_low_reservoir", |v| {
        parse_non_negative_f64(v).map(ParameterUpdate::AlertLowReservoir)
    }),
    ("var_alert_replace_pod", |v| parse_i64(v).map(ParameterUpdate::AlertReplacePod)),
    ("var_notify_bolus_start", |v| parse_bool(v).map(ParameterUpdate::NotifyBolusStart)),
    ("var_notify_bolus_cancel", |v| parse_bool(v).map(ParameterUpdate::NotifyBolusCancel)),
    ("var_notify_temp_basal_set", |v| {
        parse_bool(v).map(ParameterUpdate::NotifyTempBasalSet)
    }),
    ("var_notify_temp_basal_cancel", |v| {
        parse_bool(v).map(ParameterUpdate::NotifyTempBasalCancel)
    }),
    ("var_notify_basal_schedule_change", |v| {
        parse_bool(v).map(ParameterUpdate::NotifyBasalScheduleChange)
    }),
];

impl ParameterUpdate {
    fn assign(self, record: &mut DeviceStateRecord) {
        match self {
            ParameterUpdate::IdLot(v) => record.id_lot = Some(v),
            ParameterUpdate::IdT(v) => record.id_t = Some(v),
            ParameterUpdate::RadioAddress(v) => record.radio_address = Some(v),
            ParameterUpdate::UtcOffset(v) => record.var_utc_offset = v,
            ParameterUpdate::MaximumBolus(v) => record.var_maximum_bolus = v,
            ParameterUpdate::MaximumTempBasalRate(v) => record.var_maximum_temp_basal_rate = v,
            ParameterUpdate::AlertLowReservoir(v) => record.var_alert_low_reservoir = v,
            ParameterUpdate::AlertReplacePod(v) => record.var_alert_replace_pod = v,
            ParameterUpdate::NotifyBolusStart(v) => record.var_notify_bolus_start = v,
            ParameterUpdate::NotifyBolusCancel(v) => record.var_notify_bolus_cancel = v,
            ParameterUpdate::NotifyTempBasalSet(v) => record.var_notify_temp_basal_set = v,
            ParameterUpdate::NotifyTempBasalCancel(v) => record.var_notify_temp_basal_cancel = v,
            ParameterUpdate::NotifyBasalScheduleChange(v) => {
                record.var_notify_basal_schedule_change = v
            }
        }
    }

    fn invalidates_nonce(self) -> bool {
        matches!(self, ParameterUpdate::IdLot(_) | ParameterUpdate::IdT(_))
    }

    fn invalidates_radio_sequences(self) -> bool {
        matches!(self, ParameterUpdate::RadioAddress(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSet {
    updates: Vec<ParameterUpdate>,
}

impl ParameterSet {
    /// Parses every known field present in `params`. Any bad value rejects
    /// the whole set, so nothing is applied half-way.
    pub fn from_params(params: &CommandParams) -> GatewayResult<Self> {
        let mut updates = Vec::new();
        for (name, parser) in PARAMETER_TABLE {
            if let Some(raw) = params.get(name) {
                let update = parser(raw).ok_or_else(|| invalid_value(name, raw))?;
                updates.push(update);
            }
        }
        Ok(Self { updates })
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn updates(&self) -> &[ParameterUpdate] {
        &self.updates
    }

    pub fn apply(&self, record: &mut DeviceStateRecord) {
        for update in &self.updates {
            update.assign(record);
        }
        if self.updates.iter().any(|u| u.invalidates_nonce()) {
            record.reset_nonce();
        }
        if self.updates.iter().any(|u| u.invalidates_radio_sequences()) {
            record.reset_radio_sequences();
        }
    }
}
