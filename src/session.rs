use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDateTime, Weekday};
use tokio::runtime::Handle;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::command::{DaySchedule, TemperatureTargets};
use crate::error::DeviceError;
use crate::snapshot::{Holiday, Temperatures};

/// A connection to one thermostat.
///
/// Implementations own the BLE transport and the characteristic encoding and
/// hand back decoded values. Every read and write is only valid between
/// [`connect`](Self::connect) and [`disconnect`](Self::disconnect); the
/// coordinator brackets each polling attempt and each command attempt with them.
#[async_trait]
pub trait DeviceSession: Send + Sync {
    fn address(&self) -> &str;

    /// Whether the last `connect` actually established a link.
    fn is_connected(&self) -> bool;

    async fn connect(&self) -> Result<(), DeviceError>;

    /// Must be safe to call when not connected.
    async fn disconnect(&self) -> Result<(), DeviceError>;

    async fn get_temperatures(&self) -> Result<Temperatures, DeviceError>;

    /// Battery level in %
    async fn get_battery(&self) -> Result<u8, DeviceError>;

    async fn get_holiday(&self, slot: u8) -> Result<Holiday, DeviceError>;

    async fn set_temperatures(&self, targets: TemperatureTargets) -> Result<(), DeviceError>;

    async fn set_holiday(&self, slot: u8, holiday: Holiday) -> Result<(), DeviceError>;

    async fn set_datetime(&self, datetime: NaiveDateTime) -> Result<(), DeviceError>;

    async fn set_schedule(&self, day: Weekday, schedule: DaySchedule) -> Result<(), DeviceError>;
}

#[async_trait]
impl<T: DeviceSession + ?Sized> DeviceSession for Arc<T> {
    fn address(&self) -> &str {
        (**self).address()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    async fn connect(&self) -> Result<(), DeviceError> {
        (**self).connect().await
    }

    async fn disconnect(&self) -> Result<(), DeviceError> {
        (**self).disconnect().await
    }

    async fn get_temperatures(&self) -> Result<Temperatures, DeviceError> {
        (**self).get_temperatures().await
    }

    async fn get_battery(&self) -> Result<u8, DeviceError> {
        (**self).get_battery().await
    }

    async fn get_holiday(&self, slot: u8) -> Result<Holiday, DeviceError> {
        (**self).get_holiday(slot).await
    }

    async fn set_temperatures(&self, targets: TemperatureTargets) -> Result<(), DeviceError> {
        (**self).set_temperatures(targets).await
    }

    async fn set_holiday(&self, slot: u8, holiday: Holiday) -> Result<(), DeviceError> {
        (**self).set_holiday(slot, holiday).await
    }

    async fn set_datetime(&self, datetime: NaiveDateTime) -> Result<(), DeviceError> {
        (**self).set_datetime(datetime).await
    }

    async fn set_schedule(&self, day: Weekday, schedule: DaySchedule) -> Result<(), DeviceError> {
        (**self).set_schedule(day, schedule).await
    }
}

/// An open link to a device, held for the duration of one attempt.
///
/// Call [`release`](Self::release) on the way out. If the connection is dropped
/// instead, e.g. because the surrounding future was cancelled, the disconnect is
/// handed to the runtime so the link is still torn down.
pub(crate) struct Connection<S: DeviceSession + 'static> {
    session: Arc<S>,
    deadline: Duration,
    open: bool,
}

impl<S: DeviceSession + 'static> Connection<S> {
    pub(crate) async fn open(session: Arc<S>, deadline: Duration) -> Result<Self, DeviceError> {
        let connection = Self {
            session,
            deadline,
            open: true,
        };

        let result = match timeout(deadline, connection.session.connect()).await {
            Ok(result) => result,
            Err(_) => Err(DeviceError::Timeout),
        };

        match result {
            Ok(()) => Ok(connection),
            Err(err) => {
                connection.release().await;
                Err(err)
            }
        }
    }

    pub(crate) fn session(&self) -> &S {
        &self.session
    }

    pub(crate) async fn release(mut self) {
        self.open = false;
        match timeout(self.deadline, self.session.disconnect()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(address = self.session.address(), "Failed to disconnect: {err}"),
            Err(_) => warn!(address = self.session.address(), "Timed out disconnecting"),
        }
    }
}

impl<S: DeviceSession + 'static> Drop for Connection<S> {
    fn drop(&mut self) {
        if !self.open {
            return;
        }

        let session = Arc::clone(&self.session);
        let deadline = self.deadline;
        match Handle::try_current() {
            Ok(handle) => {
                debug!(
                    address = session.address(),
                    "Connection abandoned, disconnecting in background"
                );
                handle.spawn(async move {
                    match timeout(deadline, session.disconnect()).await {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => {
                            warn!(address = session.address(), "Failed to disconnect: {err}")
                        }
                        Err(_) => warn!(address = session.address(), "Timed out disconnecting"),
                    }
                });
            }
            Err(_) => warn!(
                address = session.address(),
                "Connection abandoned outside a runtime, link left open"
            ),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::scripted::ScriptedSession;
    use super::*;

    #[tokio::test]
    async fn test_release_disconnects() {
        let session = Arc::new(ScriptedSession::new("E0:E5:CF:00:00:01"));
        let connection = Connection::open(Arc::clone(&session), Duration::from_secs(20))
            .await
            .unwrap();
        assert!(connection.session().is_connected());

        connection.release().await;
        assert_eq!(session.disconnects(), 1);
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_abandoned_connection_disconnects_in_background() {
        let session = Arc::new(ScriptedSession::new("E0:E5:CF:00:00:01"));
        let connection = Connection::open(Arc::clone(&session), Duration::from_secs(20))
            .await
            .unwrap();

        drop(connection);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(session.disconnects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_disconnect_gives_up_after_deadline() {
        let session = Arc::new(ScriptedSession::new("E0:E5:CF:00:00:01"));
        let connection = Connection::open(Arc::clone(&session), Duration::from_secs(20))
            .await
            .unwrap();
        session.stall_disconnects();

        drop(connection);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(session.disconnects(), 1);
        assert_eq!(Arc::strong_count(&session), 2);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(Arc::strong_count(&session), 1);
    }

    #[tokio::test]
    async fn test_failed_connect_is_released() {
        let session = Arc::new(ScriptedSession::new("E0:E5:CF:00:00:01"));
        session.queue_connect(Err(DeviceError::Transport("no route".into())));

        let result = Connection::open(Arc::clone(&session), Duration::from_secs(20)).await;

        assert!(matches!(result, Err(DeviceError::Transport(_))));
        assert_eq!(session.connects(), 1);
        assert_eq!(session.disconnects(), 1);
    }
}
