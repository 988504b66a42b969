//! Keep track of Eurotronic Comet Blue radiator thermostats over Bluetooth Low Energy
//!
//! The thermostats are battery powered and only briefly reachable: connections drop,
//! reads time out and now and then a characteristic comes back with a value that
//! cannot be decoded. This crate polls a thermostat on a fixed interval, keeps the
//! last known good readings in a [`Snapshot`], and carries commands to the device,
//! retrying where it makes sense and reporting failures where it doesn't.
//!
//! The BLE link and the characteristic encoding live behind the [`DeviceSession`]
//! trait. Everything above it is here:
//!
//! - [`UpdateCoordinator`] runs polling cycles and commands with a retry budget
//!   and merges partial reads so a bad value never blanks a good one.
//! - [`scheduler::spawn`] puts a coordinator on its own task, polling every five
//!   minutes and serializing commands.
//! - [`Listener`] is what displays hold on to: the snapshot, plus whether to
//!   trust it given recent failures and whether the device is in range.
//! - [`PresenceTracker`] and [`BlePresenceScanner`] work out "in range" from
//!   advertisements.
//!
//! # Example
//!
//! ```rust,no_run
//! # use cometread::{CommandRequest, CoordinatorConfig, DeviceSession, UpdateCoordinator};
//! # async fn example(session: impl DeviceSession + 'static) -> anyhow::Result<()> {
//!     let config = CoordinatorConfig::new("E0:E5:CF:00:00:01");
//!     let coordinator = UpdateCoordinator::new(session, config)?;
//!     let (device, _task) = cometread::scheduler::spawn(coordinator);
//!
//!     let mut listener = device.listener();
//!     while listener.changed().await {
//!         println!("{:?}", listener.snapshot());
//!         let payload = serde_json::json!({ "value": 16.0 });
//!         let request = CommandRequest::new("setEco", payload, "example");
//!         device.dispatch(request).await?;
//!     }
//! #   Ok(())
//! # }
//! ```

mod availability;
mod command;
mod config;
mod coordinator;
mod error;
pub mod logging;
mod presence;
pub mod scheduler;
mod session;
mod snapshot;

pub use availability::{is_available, PresenceTracker, DEFAULT_PRESENCE_WINDOW};
pub use command::{
    Command, CommandOutcome, CommandRequest, DaySchedule, HvacMode, Period, TemperatureTargets,
    HOLIDAY_SLOT_COUNT, MAX_SCHEDULE_PERIODS, MAX_TEMP, MIN_TEMP,
};
pub use config::{CoordinatorConfig, DEFAULT_TIMEOUT, DEFAULT_UPDATE_INTERVAL, RETRY_THRESHOLD};
pub use coordinator::{DeviceState, Listener, UpdateCoordinator, POLLED_HOLIDAY_SLOT};
pub use error::{ConfigError, CoordinatorError, DeviceError, ErrorKind, ValidationError};
pub use presence::BlePresenceScanner;
pub use scheduler::DeviceHandle;
pub use session::DeviceSession;
pub use snapshot::{
    Holiday, Reading, Snapshot, TemperatureField, TemperatureValue, Temperatures,
    ALL_TEMPERATURE_FIELDS,
};
