use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::availability;
use crate::command::{Command, CommandOutcome, CommandRequest};
use crate::config::CoordinatorConfig;
use crate::error::{ConfigError, CoordinatorError, DeviceError, ErrorKind, ValidationError};
use crate::session::{Connection, DeviceSession};
use crate::snapshot::{Reading, Snapshot};

/// The holiday slot read on every poll.
pub const POLLED_HOLIDAY_SLOT: u8 = 1;

/// What listeners get to see of a device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceState {
    pub snapshot: Snapshot,
    pub failed_update_count: u32,
}

/// Why one attempt against the device failed.
enum AttemptError {
    /// The session came back without a link.
    NotReady,
    Device(DeviceError),
}

impl From<DeviceError> for AttemptError {
    fn from(err: DeviceError) -> Self {
        Self::Device(err)
    }
}

/// Keeps one thermostat's snapshot up to date and carries commands to it.
///
/// Each poll and each command makes up to `retry_count` attempts, every attempt
/// on a fresh connection. Errors that point at a flaky link or a garbled value
/// are retried, everything else ends the invocation immediately. Retries never
/// outlive the invocation that started them.
///
/// Both entry points take `&mut self`, so at most one operation per device is in
/// flight. Coordinators of different devices share nothing.
pub struct UpdateCoordinator<S: DeviceSession + 'static> {
    session: Arc<S>,
    config: CoordinatorConfig,
    snapshot: Snapshot,
    failed_update_count: u32,
    state: watch::Sender<DeviceState>,
}

impl<S: DeviceSession + 'static> UpdateCoordinator<S> {
    /// Fails if `config` does not pass [`CoordinatorConfig::validate`].
    pub fn new(session: S, config: CoordinatorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let (state, _) = watch::channel(DeviceState::default());
        Ok(Self {
            session: Arc::new(session),
            config,
            snapshot: Snapshot::default(),
            failed_update_count: 0,
            state,
        })
    }

    pub fn address(&self) -> &str {
        &self.config.address
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Consecutive failed polling cycles.
    pub fn failed_update_count(&self) -> u32 {
        self.failed_update_count
    }

    pub fn is_available(&self, device_present: bool) -> bool {
        availability::is_available(
            self.failed_update_count,
            self.config.retry_count,
            device_present,
        )
    }

    /// Watch this device. The listener is woken once per successful poll.
    pub fn subscribe(&self) -> Listener {
        Listener {
            state: self.state.subscribe(),
            retry_threshold: self.config.retry_count,
        }
    }

    /// Run one polling cycle and return the merged snapshot.
    ///
    /// Temperatures are mandatory: failing to read them fails the attempt.
    /// Battery and holiday are optional: a garbled value is logged and the
    /// previous value is kept, but a timeout or transport error while reading
    /// them still fails the attempt since it means the link itself is unreliable.
    ///
    /// Dropping the returned future before it completes leaves the snapshot
    /// untouched.
    #[tracing::instrument(level = "debug", skip_all, fields(address = %self.config.address))]
    pub async fn poll(&mut self) -> Result<Snapshot, CoordinatorError> {
        let mut attempts = 0;
        let reading = loop {
            attempts += 1;
            match self.read_attempt().await {
                Ok(reading) => break reading,
                Err(AttemptError::NotReady) => {
                    let err = CoordinatorError::NotReady {
                        address: self.config.address.clone(),
                    };
                    return Err(self.fail_cycle(err));
                }
                Err(AttemptError::Device(err))
                    if err.kind().is_retryable() && attempts < self.config.retry_count =>
                {
                    info!(attempt = attempts, "Retrying after {} ({err})", err.kind());
                }
                Err(AttemptError::Device(source)) => {
                    let err = CoordinatorError::UpdateFailed {
                        address: self.config.address.clone(),
                        attempts,
                        source,
                    };
                    return Err(self.fail_cycle(err));
                }
            }
        };

        self.snapshot = self.snapshot.merged(reading, &self.config.temperature_fields);
        self.failed_update_count = 0;
        debug!(snapshot = ?self.snapshot, "Received data");

        self.state.send_replace(DeviceState {
            snapshot: self.snapshot.clone(),
            failed_update_count: 0,
        });
        Ok(self.snapshot.clone())
    }

    /// Resolve and carry out a caller's request.
    pub async fn dispatch_request(
        &mut self,
        request: &CommandRequest,
    ) -> Result<CommandOutcome, CoordinatorError> {
        let command = request.command().map_err(|source| CoordinatorError::Validation {
            caller: request.caller.clone(),
            source,
        })?;
        self.dispatch(&command, &request.caller).await
    }

    /// Carry out `command` on behalf of `caller`.
    ///
    /// The payload is validated before any connection is made. Temperature writes
    /// take the manual temperature they leave out from the snapshot. Commands never
    /// touch the snapshot or the failed update count.
    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(address = %self.config.address, command = command.name(), caller = %caller)
    )]
    pub async fn dispatch(
        &mut self,
        command: &Command,
        caller: &str,
    ) -> Result<CommandOutcome, CoordinatorError> {
        debug!(?command, "Updating device");
        command
            .validate()
            .and_then(|()| command.temperature_targets(&self.snapshot).map(drop))
            .map_err(|source| CoordinatorError::Validation {
                caller: caller.to_string(),
                source,
            })?;

        let mut attempts = 0;
        loop {
            attempts += 1;
            let err = match self.command_attempt(command).await {
                Ok(outcome) => return Ok(outcome),
                Err(AttemptError::NotReady) => {
                    return Err(CoordinatorError::NotReady {
                        address: self.config.address.clone(),
                    })
                }
                Err(AttemptError::Device(err)) => err,
            };

            match err.kind() {
                ErrorKind::InvalidInput => {
                    return Err(CoordinatorError::Validation {
                        caller: caller.to_string(),
                        source: ValidationError::Rejected(err.to_string()),
                    })
                }
                kind if kind.is_retryable() && attempts < self.config.retry_count => {
                    info!(
                        attempt = attempts,
                        "Retrying command '{}' from '{caller}' after {kind} ({err})",
                        command.name()
                    );
                }
                _ => {
                    return Err(CoordinatorError::Communication {
                        command: command.name(),
                        caller: caller.to_string(),
                        source: err,
                    })
                }
            }
        }
    }

    /// Record a failed cycle without waking listeners.
    fn fail_cycle(&mut self, err: CoordinatorError) -> CoordinatorError {
        self.failed_update_count = self.failed_update_count.saturating_add(1);
        let failed_update_count = self.failed_update_count;
        self.state.send_if_modified(|state| {
            state.failed_update_count = failed_update_count;
            false
        });
        warn!(failed_update_count, "Update failed: {err}");
        err
    }

    async fn connect(&self) -> Result<Connection<S>, AttemptError> {
        let connection = Connection::open(Arc::clone(&self.session), self.config.timeout()).await?;
        if !connection.session().is_connected() {
            connection.release().await;
            return Err(AttemptError::NotReady);
        }
        Ok(connection)
    }

    async fn read_attempt(&self) -> Result<Reading, AttemptError> {
        let connection = self.connect().await?;
        let reading = self.read(connection.session()).await;
        connection.release().await;
        Ok(reading?)
    }

    async fn read(&self, session: &S) -> Result<Reading, DeviceError> {
        let temperatures = self.bounded(session.get_temperatures()).await?;
        let battery = self.optional(self.bounded(session.get_battery()).await)?;
        let holiday = self.optional(self.bounded(session.get_holiday(POLLED_HOLIDAY_SLOT)).await)?;
        Ok(Reading {
            temperatures,
            battery,
            holiday,
        })
    }

    async fn command_attempt(&self, command: &Command) -> Result<CommandOutcome, AttemptError> {
        let connection = self.connect().await?;
        let outcome = self.bounded(command.apply(connection.session(), &self.snapshot)).await;
        connection.release().await;
        Ok(outcome?)
    }

    /// Swallow a garbled optional value, keeping the previous one.
    fn optional<T>(&self, result: Result<T, DeviceError>) -> Result<Option<T>, DeviceError> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == ErrorKind::MalformedByte => {
                warn!(address = %self.config.address, "Failed to retrieve optional data: {err}");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, DeviceError>>,
    ) -> Result<T, DeviceError> {
        match timeout(self.config.timeout(), call).await {
            Ok(result) => result,
            Err(_) => Err(DeviceError::Timeout),
        }
    }
}

/// A read-only view of one device for the things that display it.
#[derive(Debug, Clone)]
pub struct Listener {
    state: watch::Receiver<DeviceState>,
    retry_threshold: u32,
}

impl Listener {
    pub fn snapshot(&self) -> Snapshot {
        self.state.borrow().snapshot.clone()
    }

    pub fn failed_update_count(&self) -> u32 {
        self.state.borrow().failed_update_count
    }

    pub fn is_available(&self, device_present: bool) -> bool {
        availability::is_available(self.failed_update_count(), self.retry_threshold, device_present)
    }

    /// Wait for the next successful poll. Returns `false` once the coordinator
    /// is gone.
    pub async fn changed(&mut self) -> bool {
        self.state.changed().await.is_ok()
    }
}
