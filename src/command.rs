use chrono::{Local, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{DeviceError, ValidationError};
use crate::session::DeviceSession;
use crate::snapshot::{Holiday, Snapshot, TemperatureField};

pub const MIN_TEMP: f32 = 7.5;
pub const MAX_TEMP: f32 = 28.5;
pub const HOLIDAY_SLOT_COUNT: u8 = 8;
pub const MAX_SCHEDULE_PERIODS: usize = 4;

fn first_holiday_slot() -> u8 {
    1
}

/// Temperatures to write. Fields left as `None` are not changed on the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemperatureTargets {
    pub manual_temp: Option<f32>,
    pub target_temp_low: Option<f32>,
    pub target_temp_high: Option<f32>,
}

impl TemperatureTargets {
    fn validate(&self) -> Result<(), ValidationError> {
        let targets = [
            ("manualTemp", self.manual_temp),
            ("targetTempLow", self.target_temp_low),
            ("targetTempHigh", self.target_temp_high),
        ];
        if targets.iter().all(|(_, value)| value.is_none()) {
            return Err(ValidationError::NoTemperature);
        }
        for (field, value) in targets {
            if let Some(value) = value {
                validate_temperature(field, value)?;
            }
        }
        Ok(())
    }
}

/// Heating mode, set through the manual temperature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HvacMode {
    /// Manual temperature at [`MIN_TEMP`]
    Off,
    /// Manual temperature at [`MAX_TEMP`]
    Heat,
    /// Manual temperature at the current eco target
    Auto,
}

/// One heating period of a day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

/// The heating periods of one weekday. `delete` clears the day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaySchedule {
    #[serde(default)]
    pub delete: bool,
    #[serde(default)]
    pub periods: Vec<Period>,
}

impl DaySchedule {
    /// Periods must be well formed, in order and must not overlap.
    fn validate(&self) -> Result<(), ValidationError> {
        if self.delete {
            return Ok(());
        }
        if self.periods.is_empty() {
            return Err(ValidationError::EmptySchedule);
        }
        if self.periods.len() > MAX_SCHEDULE_PERIODS {
            return Err(ValidationError::TooManyPeriods {
                count: self.periods.len(),
                max: MAX_SCHEDULE_PERIODS,
            });
        }

        let mut previous_end: Option<NaiveTime> = None;
        for (index, period) in self.periods.iter().enumerate() {
            let index = index + 1;
            if period.start >= period.end {
                return Err(ValidationError::PeriodRange {
                    index,
                    start: period.start,
                    end: period.end,
                });
            }
            if let Some(previous_end) = previous_end.filter(|end| *end > period.start) {
                return Err(ValidationError::PeriodOverlap {
                    index,
                    start: period.start,
                    previous_end,
                });
            }
            previous_end = Some(period.end);
        }
        Ok(())
    }

    fn to_write(&self) -> DaySchedule {
        if self.delete {
            DaySchedule::default()
        } else {
            self.clone()
        }
    }
}

/// An operation the coordinator can carry out on a thermostat.
///
/// Deserializes from `{ "operation": "setEco", "payload": { "value": 16.0 } }`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "operation", content = "payload", rename_all = "camelCase")]
pub enum Command {
    SetTemperatures(TemperatureTargets),
    SetManual {
        value: f32,
    },
    /// Lower (eco) target temperature
    SetEco {
        value: f32,
    },
    /// Upper (comfort) target temperature
    SetComfort {
        value: f32,
    },
    SetHoliday {
        #[serde(default = "first_holiday_slot")]
        slot: u8,
        start: NaiveDateTime,
        end: NaiveDateTime,
        temperature: f32,
    },
    /// Sync the device clock, to local time if no datetime is given
    SetDatetime {
        #[serde(default)]
        datetime: Option<NaiveDateTime>,
    },
    SetSchedule {
        day: Weekday,
        schedule: DaySchedule,
    },
    GetHoliday {
        #[serde(default = "first_holiday_slot")]
        slot: u8,
    },
    SetHvacMode {
        mode: HvacMode,
    },
}

/// What a successful command produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CommandOutcome {
    Done,
    Holiday(Holiday),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetTemperatures(_) => "setTemperatures",
            Self::SetManual { .. } => "setManual",
            Self::SetEco { .. } => "setEco",
            Self::SetComfort { .. } => "setComfort",
            Self::SetHoliday { .. } => "setHoliday",
            Self::SetDatetime { .. } => "setDatetime",
            Self::SetSchedule { .. } => "setSchedule",
            Self::GetHoliday { .. } => "getHoliday",
            Self::SetHvacMode { .. } => "setHvacMode",
        }
    }

    /// Check the payload without talking to the device.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::SetTemperatures(targets) => targets.validate(),
            Self::SetManual { value } => validate_temperature("manualTemp", *value),
            Self::SetEco { value } => validate_temperature("targetTempLow", *value),
            Self::SetComfort { value } => validate_temperature("targetTempHigh", *value),
            Self::SetHoliday {
                slot,
                start,
                end,
                temperature,
            } => {
                validate_holiday_slot(*slot)?;
                if start >= end {
                    return Err(ValidationError::HolidayRange {
                        start: *start,
                        end: *end,
                    });
                }
                validate_temperature("temperature", *temperature)
            }
            Self::SetDatetime { .. } => Ok(()),
            Self::SetSchedule { schedule, .. } => schedule.validate(),
            Self::GetHoliday { slot } => validate_holiday_slot(*slot),
            Self::SetHvacMode { .. } => Ok(()),
        }
    }

    /// The temperatures this command writes, given what the device last reported.
    ///
    /// The device turns itself off when a write leaves out the manual temperature,
    /// so the current one is sent along unless the command sets it.
    pub fn temperature_targets(
        &self,
        current: &Snapshot,
    ) -> Result<Option<TemperatureTargets>, ValidationError> {
        let known = |field: TemperatureField| {
            current.temperature(field).and_then(|value| value.as_celsius())
        };

        let targets = match self {
            Self::SetTemperatures(targets) => *targets,
            Self::SetManual { value } => TemperatureTargets {
                manual_temp: Some(*value),
                ..TemperatureTargets::default()
            },
            Self::SetEco { value } => TemperatureTargets {
                target_temp_low: Some(*value),
                ..TemperatureTargets::default()
            },
            Self::SetComfort { value } => TemperatureTargets {
                target_temp_high: Some(*value),
                ..TemperatureTargets::default()
            },
            Self::SetHvacMode { mode } => TemperatureTargets {
                manual_temp: match mode {
                    HvacMode::Off => Some(MIN_TEMP),
                    HvacMode::Heat => Some(MAX_TEMP),
                    HvacMode::Auto => known(TemperatureField::TargetTempLow),
                },
                ..TemperatureTargets::default()
            },
            _ => return Ok(None),
        };

        let targets = TemperatureTargets {
            manual_temp: targets.manual_temp.or_else(|| known(TemperatureField::ManualTemp)),
            ..targets
        };
        if targets == TemperatureTargets::default() {
            return Err(ValidationError::NoTemperature);
        }
        Ok(Some(targets))
    }

    pub(crate) async fn apply<S>(
        &self,
        session: &S,
        current: &Snapshot,
    ) -> Result<CommandOutcome, DeviceError>
    where
        S: DeviceSession + ?Sized,
    {
        match self {
            Self::SetTemperatures(_)
            | Self::SetManual { .. }
            | Self::SetEco { .. }
            | Self::SetComfort { .. }
            | Self::SetHvacMode { .. } => {
                let targets = self
                    .temperature_targets(current)
                    .map_err(|err| DeviceError::InvalidInput(err.to_string()))?;
                if let Some(targets) = targets {
                    session.set_temperatures(targets).await?
                }
            }
            Self::SetHoliday {
                slot,
                start,
                end,
                temperature,
            } => {
                let holiday = Holiday {
                    start: Some(*start),
                    end: Some(*end),
                    temperature: Some(*temperature),
                };
                session.set_holiday(*slot, holiday).await?
            }
            Self::SetDatetime { datetime } => {
                let datetime = datetime.unwrap_or_else(|| Local::now().naive_local());
                session.set_datetime(datetime).await?
            }
            Self::SetSchedule { day, schedule } => {
                session.set_schedule(*day, schedule.to_write()).await?
            }
            Self::GetHoliday { slot } => {
                return Ok(CommandOutcome::Holiday(session.get_holiday(*slot).await?));
            }
        }
        Ok(CommandOutcome::Done)
    }
}

fn validate_temperature(field: &'static str, value: f32) -> Result<(), ValidationError> {
    if !(MIN_TEMP..=MAX_TEMP).contains(&value) {
        return Err(ValidationError::OutOfRange {
            field,
            value,
            min: MIN_TEMP,
            max: MAX_TEMP,
        });
    }
    if (value * 2.0).fract() != 0.0 {
        return Err(ValidationError::NotHalfStep { field, value });
    }
    Ok(())
}

fn validate_holiday_slot(slot: u8) -> Result<(), ValidationError> {
    if (1..=HOLIDAY_SLOT_COUNT).contains(&slot) {
        Ok(())
    } else {
        Err(ValidationError::HolidaySlot(slot))
    }
}

/// A command as issued by an outside caller: an operation name, its payload,
/// and who asked for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub operation: String,
    #[serde(default)]
    pub payload: Value,
    pub caller: String,
}

impl CommandRequest {
    pub fn new(operation: impl Into<String>, payload: Value, caller: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            payload,
            caller: caller.into(),
        }
    }

    /// Resolve the operation name into a [`Command`]. Unknown operations and
    /// malformed payloads are caller errors.
    pub fn command(&self) -> Result<Command, ValidationError> {
        let payload = match &self.payload {
            Value::Null => Value::Object(Map::new()),
            payload => payload.clone(),
        };
        serde_json::from_value(json!({ "operation": self.operation, "payload": payload }))
            .map_err(|err| ValidationError::Payload(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::NaiveDate;

    use crate::session::scripted::ScriptedSession;
    use crate::snapshot::{Reading, TemperatureValue, ALL_TEMPERATURE_FIELDS};

    fn at(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
    }

    #[test]
    fn test_request_resolves_to_command() {
        let request =
            CommandRequest::new("setEco", json!({ "value": 16.5 }), "climate.living_room");
        assert_eq!(request.command(), Ok(Command::SetEco { value: 16.5 }));

        let request = CommandRequest::new(
            "setTemperatures",
            json!({ "manualTemp": 21.0, "targetTempHigh": 22.0 }),
            "climate.living_room",
        );
        assert_eq!(
            request.command(),
            Ok(Command::SetTemperatures(TemperatureTargets {
                manual_temp: Some(21.0),
                target_temp_low: None,
                target_temp_high: Some(22.0),
            }))
        );
    }

    #[test]
    fn test_request_without_payload() {
        let request = CommandRequest::new("setDatetime", Value::Null, "button.sync_clock");
        assert_eq!(request.command(), Ok(Command::SetDatetime { datetime: None }));

        let request = CommandRequest::new("getHoliday", Value::Null, "sensor.holiday");
        assert_eq!(request.command(), Ok(Command::GetHoliday { slot: 1 }));
    }

    #[test]
    fn test_unknown_operation_is_a_payload_error() {
        let request = CommandRequest::new("setFanSpeed", json!({ "value": 3 }), "fan.kitchen");
        assert!(matches!(request.command(), Err(ValidationError::Payload(_))));

        let request = CommandRequest::new("setEco", json!({ "value": "warm" }), "climate.kitchen");
        assert!(matches!(request.command(), Err(ValidationError::Payload(_))));
    }

    #[test]
    fn test_request_round_trips_through_json() {
        let json = r#"{
            "operation": "setComfort",
            "payload": { "value": 21.5 },
            "caller": "climate.office"
        }"#;
        let request: CommandRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.caller, "climate.office");
        assert_eq!(request.command(), Ok(Command::SetComfort { value: 21.5 }));
    }

    #[test]
    fn test_temperature_validation() {
        assert!(Command::SetEco { value: 16.0 }.validate().is_ok());
        assert!(Command::SetEco { value: MIN_TEMP }.validate().is_ok());
        assert!(Command::SetEco { value: MAX_TEMP }.validate().is_ok());
        assert_eq!(
            Command::SetEco { value: 99.9 }.validate(),
            Err(ValidationError::OutOfRange {
                field: "targetTempLow",
                value: 99.9,
                min: MIN_TEMP,
                max: MAX_TEMP,
            })
        );
        assert_eq!(
            Command::SetComfort { value: 20.3 }.validate(),
            Err(ValidationError::NotHalfStep {
                field: "targetTempHigh",
                value: 20.3,
            })
        );
        assert!(Command::SetManual { value: f32::NAN }.validate().is_err());
        assert_eq!(
            Command::SetTemperatures(TemperatureTargets::default()).validate(),
            Err(ValidationError::NoTemperature)
        );
    }

    #[test]
    fn test_holiday_validation() {
        let day = NaiveDate::from_ymd_opt(2024, 12, 24).unwrap();
        let start = day.and_hms_opt(10, 0, 0).unwrap();
        let end = day.and_hms_opt(18, 0, 0).unwrap();

        let holiday = |slot, start, end| Command::SetHoliday {
            slot,
            start,
            end,
            temperature: 12.0,
        };
        assert!(holiday(1, start, end).validate().is_ok());
        assert_eq!(holiday(9, start, end).validate(), Err(ValidationError::HolidaySlot(9)));
        assert_eq!(
            holiday(1, end, start).validate(),
            Err(ValidationError::HolidayRange { start: end, end: start })
        );
        assert_eq!(
            Command::GetHoliday { slot: 0 }.validate(),
            Err(ValidationError::HolidaySlot(0))
        );
    }

    #[test]
    fn test_schedule_validation() {
        let schedule = |periods: Vec<(NaiveTime, NaiveTime)>| DaySchedule {
            delete: false,
            periods: periods
                .into_iter()
                .map(|(start, end)| Period { start, end })
                .collect(),
        };

        assert!(schedule(vec![(at(6, 0), at(8, 0)), (at(8, 0), at(22, 0))])
            .validate()
            .is_ok());
        assert_eq!(
            schedule(vec![(at(8, 0), at(6, 0))]).validate(),
            Err(ValidationError::PeriodRange {
                index: 1,
                start: at(8, 0),
                end: at(6, 0),
            })
        );
        assert_eq!(
            schedule(vec![(at(6, 0), at(9, 0)), (at(8, 30), at(10, 0))]).validate(),
            Err(ValidationError::PeriodOverlap {
                index: 2,
                start: at(8, 30),
                previous_end: at(9, 0),
            })
        );
        assert_eq!(schedule(vec![]).validate(), Err(ValidationError::EmptySchedule));
        assert!(matches!(
            schedule(vec![(at(1, 0), at(2, 0)); 5]).validate(),
            Err(ValidationError::TooManyPeriods { count: 5, max: 4 })
        ));
        assert!(DaySchedule {
            delete: true,
            periods: vec![],
        }
        .validate()
        .is_ok());
    }

    #[test]
    fn test_schedule_request() {
        let request = CommandRequest::new(
            "setSchedule",
            json!({
                "day": "monday",
                "schedule": { "periods": [{ "start": "06:30:00", "end": "08:00:00" }] }
            }),
            "climate.bedroom",
        );
        let command = request.command().unwrap();
        assert_eq!(
            command,
            Command::SetSchedule {
                day: Weekday::Mon,
                schedule: DaySchedule {
                    delete: false,
                    periods: vec![Period {
                        start: at(6, 30),
                        end: at(8, 0),
                    }],
                },
            }
        );
        assert!(command.validate().is_ok());
    }

    fn current(manual_temp: f32, target_temp_low: f32) -> Snapshot {
        let reading = Reading {
            temperatures: [
                (TemperatureField::ManualTemp, TemperatureValue::Celsius(manual_temp)),
                (TemperatureField::TargetTempLow, TemperatureValue::Celsius(target_temp_low)),
            ]
            .into(),
            ..Reading::default()
        };
        Snapshot::default().merged(reading, &ALL_TEMPERATURE_FIELDS)
    }

    #[test]
    fn test_targets_keep_the_current_manual_temperature() {
        let current = current(19.5, 16.0);

        assert_eq!(
            Command::SetComfort { value: 22.0 }.temperature_targets(&current),
            Ok(Some(TemperatureTargets {
                manual_temp: Some(19.5),
                target_temp_high: Some(22.0),
                ..TemperatureTargets::default()
            }))
        );
        assert_eq!(
            Command::SetManual { value: 21.0 }.temperature_targets(&current),
            Ok(Some(TemperatureTargets {
                manual_temp: Some(21.0),
                ..TemperatureTargets::default()
            }))
        );
        assert_eq!(
            Command::SetHvacMode { mode: HvacMode::Auto }.temperature_targets(&current),
            Ok(Some(TemperatureTargets {
                manual_temp: Some(16.0),
                ..TemperatureTargets::default()
            }))
        );
        assert_eq!(Command::GetHoliday { slot: 1 }.temperature_targets(&current), Ok(None));
        assert_eq!(
            Command::SetHvacMode { mode: HvacMode::Auto }.temperature_targets(&Snapshot::default()),
            Err(ValidationError::NoTemperature)
        );
    }

    #[test]
    fn test_hvac_mode_request() {
        let request =
            CommandRequest::new("setHvacMode", json!({ "mode": "heat" }), "climate.office");
        assert_eq!(request.command(), Ok(Command::SetHvacMode { mode: HvacMode::Heat }));

        let request =
            CommandRequest::new("setHvacMode", json!({ "mode": "cool" }), "climate.office");
        assert!(matches!(request.command(), Err(ValidationError::Payload(_))));
    }

    #[tokio::test]
    async fn test_presets_without_a_known_manual_temperature() {
        let session = ScriptedSession::new("E0:E5:CF:00:00:01");
        let nothing = Snapshot::default();
        let outcome = Command::SetEco { value: 16.0 }.apply(&session, &nothing).await.unwrap();
        assert_eq!(outcome, CommandOutcome::Done);
        Command::SetComfort { value: 21.0 }.apply(&session, &nothing).await.unwrap();

        assert_eq!(
            session.written(),
            vec![
                format!(
                    "set_temperatures {:?}",
                    TemperatureTargets {
                        target_temp_low: Some(16.0),
                        ..TemperatureTargets::default()
                    }
                ),
                format!(
                    "set_temperatures {:?}",
                    TemperatureTargets {
                        target_temp_high: Some(21.0),
                        ..TemperatureTargets::default()
                    }
                ),
            ]
        );
    }

    #[tokio::test]
    async fn test_deleting_a_day_writes_an_empty_schedule() {
        let session = ScriptedSession::new("E0:E5:CF:00:00:01");
        let command = Command::SetSchedule {
            day: Weekday::Sun,
            schedule: DaySchedule {
                delete: true,
                periods: vec![Period {
                    start: at(6, 0),
                    end: at(7, 0),
                }],
            },
        };
        command.apply(&session, &Snapshot::default()).await.unwrap();

        assert_eq!(
            session.written(),
            vec![format!("set_schedule Sun {:?}", DaySchedule::default())]
        );
    }

    #[tokio::test]
    async fn test_get_holiday_returns_the_slot() {
        let session = ScriptedSession::new("E0:E5:CF:00:00:01");
        let holiday = Holiday {
            temperature: Some(12.0),
            ..Holiday::default()
        };
        session.queue_holiday(Ok(holiday.clone()));

        let outcome = Command::GetHoliday { slot: 2 }
            .apply(&session, &Snapshot::default())
            .await
            .unwrap();
        assert_eq!(outcome, CommandOutcome::Holiday(holiday));
        assert!(session.written().is_empty());
    }
}
