use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::command::{CommandOutcome, CommandRequest};
use crate::coordinator::{Listener, UpdateCoordinator};
use crate::error::CoordinatorError;
use crate::session::DeviceSession;
use crate::snapshot::Snapshot;

const INBOX_CAPACITY: usize = 16;

enum Message {
    Dispatch {
        request: CommandRequest,
        reply: oneshot::Sender<Result<CommandOutcome, CoordinatorError>>,
    },
    Refresh {
        reply: oneshot::Sender<Result<Snapshot, CoordinatorError>>,
    },
    Shutdown,
}

/// Handle onto a running device task. Clones talk to the same task; the task
/// stops when the last handle is dropped.
#[derive(Debug, Clone)]
pub struct DeviceHandle {
    address: String,
    inbox: mpsc::Sender<Message>,
    listener: Listener,
}

/// Move `coordinator` onto its own task, polling it every update interval and
/// feeding it commands one at a time.
///
/// The first poll runs straight away. A successful command is followed by a
/// refresh so listeners see its effect without waiting for the next tick.
pub fn spawn<S: DeviceSession + 'static>(
    coordinator: UpdateCoordinator<S>,
) -> (DeviceHandle, JoinHandle<()>) {
    let (inbox, messages) = mpsc::channel(INBOX_CAPACITY);
    let handle = DeviceHandle {
        address: coordinator.address().to_string(),
        inbox,
        listener: coordinator.subscribe(),
    };
    let task = tokio::spawn(run(coordinator, messages));
    (handle, task)
}

async fn run<S: DeviceSession + 'static>(
    mut coordinator: UpdateCoordinator<S>,
    mut messages: mpsc::Receiver<Message>,
) {
    let mut ticker = interval(coordinator.config().update_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(address = coordinator.address(), "Coordinator started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = coordinator.poll().await {
                    error!(address = coordinator.address(), "Scheduled update failed: {err}");
                }
            }
            message = messages.recv() => match message {
                Some(Message::Dispatch { request, reply }) => {
                    let result = coordinator.dispatch_request(&request).await;
                    let refresh = result.is_ok();
                    if reply.send(result).is_err() {
                        debug!(
                            caller = %request.caller,
                            "Caller went away before the command finished"
                        );
                    }
                    if refresh {
                        if let Err(err) = coordinator.poll().await {
                            error!(
                                address = coordinator.address(),
                                "Refresh after command failed: {err}"
                            );
                        }
                        ticker.reset();
                    }
                }
                Some(Message::Refresh { reply }) => {
                    let result = coordinator.poll().await;
                    ticker.reset();
                    if reply.send(result).is_err() {
                        debug!("Caller went away before the refresh finished");
                    }
                }
                Some(Message::Shutdown) | None => break,
            },
        }
    }

    info!(address = coordinator.address(), "Coordinator stopped");
}

impl DeviceHandle {
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn listener(&self) -> Listener {
        self.listener.clone()
    }

    /// Queue a command behind any poll or command already in flight and wait for
    /// its result.
    pub async fn dispatch(
        &self,
        request: CommandRequest,
    ) -> Result<CommandOutcome, CoordinatorError> {
        let (reply, result) = oneshot::channel();
        self.send(Message::Dispatch { request, reply }).await?;
        result.await.map_err(|_| self.closed())?
    }

    /// Poll now instead of waiting for the next tick.
    pub async fn refresh(&self) -> Result<Snapshot, CoordinatorError> {
        let (reply, result) = oneshot::channel();
        self.send(Message::Refresh { reply }).await?;
        result.await.map_err(|_| self.closed())?
    }

    /// Stop the task once the operation in flight, if any, has finished.
    pub async fn shutdown(&self) -> Result<(), CoordinatorError> {
        self.send(Message::Shutdown).await
    }

    async fn send(&self, message: Message) -> Result<(), CoordinatorError> {
        self.inbox.send(message).await.map_err(|_| self.closed())
    }

    fn closed(&self) -> CoordinatorError {
        CoordinatorError::Closed {
            address: self.address.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use tokio::time::Duration;

    use super::*;
    use crate::config::CoordinatorConfig;
    use crate::session::scripted::ScriptedSession;

    const ADDRESS: &str = "E0:E5:CF:00:00:01";

    fn start() -> (Arc<ScriptedSession>, DeviceHandle, JoinHandle<()>) {
        let session = Arc::new(ScriptedSession::new(ADDRESS));
        let coordinator =
            UpdateCoordinator::new(Arc::clone(&session), CoordinatorConfig::new(ADDRESS)).unwrap();
        let (handle, task) = spawn(coordinator);
        (session, handle, task)
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_immediately_then_every_interval() {
        let (session, handle, _task) = start();
        let mut listener = handle.listener();

        assert!(listener.changed().await);
        assert_eq!(session.temperature_reads(), 1);

        tokio::time::sleep(Duration::from_secs(299)).await;
        assert_eq!(session.temperature_reads(), 1);

        assert!(listener.changed().await);
        assert_eq!(session.temperature_reads(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_is_followed_by_refresh() {
        let (session, handle, _task) = start();
        let mut listener = handle.listener();
        assert!(listener.changed().await);

        let outcome = handle
            .dispatch(CommandRequest::new("setEco", json!({ "value": 17.0 }), "climate.entity"))
            .await
            .unwrap();
        assert_eq!(outcome, CommandOutcome::Done);

        assert!(listener.changed().await);
        assert_eq!(session.written().len(), 1);
        assert_eq!(session.temperature_reads(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_command_skips_refresh() {
        let (session, handle, _task) = start();
        handle.refresh().await.unwrap();
        let reads = session.temperature_reads();

        let result = handle
            .dispatch(CommandRequest::new("setEco", json!({ "value": 99.9 }), "climate.entity"))
            .await;

        assert!(matches!(result, Err(CoordinatorError::Validation { .. })));
        assert_eq!(session.connects(), reads);
        assert_eq!(session.temperature_reads(), reads);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_the_task() {
        let (_session, handle, task) = start();
        handle.shutdown().await.unwrap();
        task.await.unwrap();

        assert!(matches!(handle.refresh().await, Err(CoordinatorError::Closed { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handles_stops_the_task() {
        let (_session, handle, task) = start();
        drop(handle);
        task.await.unwrap();
    }
}
