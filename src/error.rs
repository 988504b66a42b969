use std::fmt;

use chrono::{NaiveDateTime, NaiveTime};
use thiserror::Error;

/// Classification of a [`DeviceError`], used by the coordinator to decide
/// between retrying, swallowing and giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The device answered with a value that could not be decoded.
    MalformedByte,
    /// The device did not answer in time.
    Timeout,
    /// The BLE link failed.
    Transport,
    /// The device rejected the written value.
    InvalidInput,
    /// Anything else.
    Unclassified,
}

impl ErrorKind {
    /// Whether an attempt that failed with this kind may be repeated within the
    /// same invocation.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::MalformedByte | Self::Timeout | Self::Transport)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::MalformedByte => "MalformedByte",
            Self::Timeout => "Timeout",
            Self::Transport => "Transport",
            Self::InvalidInput => "InvalidInput",
            Self::Unclassified => "Unclassified",
        };
        f.write_str(name)
    }
}

/// An error reported by a [`DeviceSession`](crate::DeviceSession).
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("invalid byte value for {field}: 0x{}", hex::encode(.raw))]
    MalformedByte { field: &'static str, raw: Vec<u8> },
    #[error("timed out waiting for the device")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DeviceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedByte { .. } => ErrorKind::MalformedByte,
            Self::Timeout => ErrorKind::Timeout,
            Self::Transport(_) => ErrorKind::Transport,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Other(_) => ErrorKind::Unclassified,
        }
    }
}

impl From<bluest::Error> for DeviceError {
    fn from(err: bluest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// A command payload that was rejected before or by the device. The caller has
/// to fix its input; repeating the command unchanged will not help.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{field} {value} is outside {min}..={max}")]
    OutOfRange {
        field: &'static str,
        value: f32,
        min: f32,
        max: f32,
    },
    #[error("{field} {value} is not a multiple of 0.5")]
    NotHalfStep { field: &'static str, value: f32 },
    #[error("no temperature given")]
    NoTemperature,
    #[error("holiday slot {0} is outside 1..=8")]
    HolidaySlot(u8),
    #[error("holiday start {start} is not before its end {end}")]
    HolidayRange {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
    #[error("schedule has {count} periods, at most {max} are supported")]
    TooManyPeriods { count: usize, max: usize },
    #[error("period {index} starts at {start}, which is not before its end {end}")]
    PeriodRange {
        index: usize,
        start: NaiveTime,
        end: NaiveTime,
    },
    #[error("period {index} starts at {start}, before the previous period ends at {previous_end}")]
    PeriodOverlap {
        index: usize,
        start: NaiveTime,
        previous_end: NaiveTime,
    },
    #[error("schedule has no periods, set delete to clear the day")]
    EmptySchedule,
    #[error("malformed payload: {0}")]
    Payload(String),
    #[error("rejected by the device: {0}")]
    Rejected(String),
}

/// The failures a scheduler or caller sees from an [`UpdateCoordinator`](crate::UpdateCoordinator).
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// The session did not come up. Transient, try again on the next cycle.
    #[error("failed to connect to '{address}'")]
    NotReady { address: String },
    /// A polling cycle exhausted its retry budget or hit an unclassified error.
    #[error("error retrieving data from '{address}' after {attempts} attempt(s): {source}")]
    UpdateFailed {
        address: String,
        attempts: u32,
        #[source]
        source: DeviceError,
    },
    /// The command payload is invalid. Never retried.
    #[error("invalid payload from '{caller}': {source}")]
    Validation {
        caller: String,
        #[source]
        source: ValidationError,
    },
    /// A command could not be delivered within the retry budget.
    #[error("error sending command '{command}' from '{caller}': {source}")]
    Communication {
        command: &'static str,
        caller: String,
        #[source]
        source: DeviceError,
    },
    #[error("coordinator for '{address}' is no longer running")]
    Closed { address: String },
}

impl CoordinatorError {
    /// Whether the same request may succeed later without the caller changing anything.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Validation { .. } | Self::Closed { .. })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("malformed configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("device address is empty")]
    EmptyAddress,
    #[error("retry count {0} is outside 1..=5")]
    RetryCount(u32),
    #[error("timeout of {0}s is outside 10..=60")]
    Timeout(u64),
    #[error("update interval must be at least one second")]
    UpdateInterval,
    #[error("no temperature fields configured")]
    NoTemperatureFields,
}
