use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// A temperature characteristic field reported by the thermostat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TemperatureField {
    CurrentTemp,
    ManualTemp,
    TargetTempLow,
    TargetTempHigh,
    TempOffset,
    WindowOpen,
    WindowOpenMinutes,
}

/// Every temperature field the thermostat reports, in characteristic order.
pub const ALL_TEMPERATURE_FIELDS: [TemperatureField; 7] = [
    TemperatureField::CurrentTemp,
    TemperatureField::ManualTemp,
    TemperatureField::TargetTempLow,
    TemperatureField::TargetTempHigh,
    TemperatureField::TempOffset,
    TemperatureField::WindowOpen,
    TemperatureField::WindowOpenMinutes,
];

impl TemperatureField {
    pub fn key(self) -> &'static str {
        match self {
            Self::CurrentTemp => "currentTemp",
            Self::ManualTemp => "manualTemp",
            Self::TargetTempLow => "targetTempLow",
            Self::TargetTempHigh => "targetTempHigh",
            Self::TempOffset => "tempOffset",
            Self::WindowOpen => "windowOpen",
            Self::WindowOpenMinutes => "windowOpenMinutes",
        }
    }
}

impl fmt::Display for TemperatureField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A decoded value of one temperature field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TemperatureValue {
    /// Degrees Celsius, in half degree steps
    Celsius(f32),
    /// Window open detection enabled
    Flag(bool),
    Minutes(u8),
}

impl TemperatureValue {
    pub fn as_celsius(self) -> Option<f32> {
        match self {
            Self::Celsius(value) => Some(value),
            _ => None,
        }
    }
}

/// Temperature fields as returned by one read of the temperature characteristic.
/// A read may omit fields it could not decode.
pub type Temperatures = BTreeMap<TemperatureField, TemperatureValue>;

/// A holiday (away) period programmed into one of the thermostat's slots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Holiday {
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
    pub temperature: Option<f32>,
}

impl Holiday {
    /// An unused slot reads back with nothing set.
    pub fn is_empty(&self) -> bool {
        self.start.is_none() && self.end.is_none() && self.temperature.is_none()
    }
}

/// What one polling attempt managed to read. Optional fields that failed to
/// decode are `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reading {
    pub temperatures: Temperatures,
    pub battery: Option<u8>,
    pub holiday: Option<Holiday>,
}

/// The last known good state of a thermostat.
///
/// A snapshot only ever grows: merging a [`Reading`] replaces a field when the
/// reading carries a value for it and keeps the previous value otherwise, so a
/// field that has been read once is never blanked by a later failed read.
///
/// Temperatures count as read whenever the device returned them, `0.0` and
/// `false` included. A battery level of `0` and an all-empty holiday count as
/// not read.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    temperatures: Temperatures,
    battery: Option<u8>,
    holiday: Option<Holiday>,
}

impl Snapshot {
    pub fn temperature(&self, field: TemperatureField) -> Option<TemperatureValue> {
        self.temperatures.get(&field).copied()
    }

    pub fn temperatures(&self) -> &Temperatures {
        &self.temperatures
    }

    /// Battery level in %
    pub fn battery(&self) -> Option<u8> {
        self.battery
    }

    pub fn holiday(&self) -> Option<&Holiday> {
        self.holiday.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.temperatures.is_empty() && self.battery.is_none() && self.holiday.is_none()
    }

    /// Merge `reading` on top of this snapshot. Only the temperature fields listed
    /// in `fields` are tracked.
    pub fn merged(&self, reading: Reading, fields: &[TemperatureField]) -> Snapshot {
        let temperatures = fields
            .iter()
            .filter_map(|field| {
                reading
                    .temperatures
                    .get(field)
                    .or_else(|| self.temperatures.get(field))
                    .map(|value| (*field, *value))
            })
            .collect();

        let holiday = reading
            .holiday
            .filter(|holiday| !holiday.is_empty())
            .or_else(|| self.holiday.clone());

        Snapshot {
            temperatures,
            battery: reading.battery.filter(|level| *level > 0).or(self.battery),
            holiday,
        }
    }
}
