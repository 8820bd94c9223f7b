//! Persistent notification socket with fixed-delay reconnect.
//!
//! All socket events go through [`ChannelMachine`], a plain state machine with
//! no I/O. The driver task performs the actions it returns. Close is the only
//! transition that schedules a reconnect, so an error followed by a close
//! still yields exactly one attempt.

use crate::api::NotificationBackend;
use crate::config::OverlayConfig;
use crate::errors::{ChannelError, ConfigError};
use crate::notifications::types::{parse_frame, Inbound, NotificationEvent};
use crate::session::SessionToken;
use crate::socket::{SocketConnection, SocketConnector, SocketEvent};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Connectivity of the channel, for the display's connection indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    Connecting,
    Open,
    Reconnecting,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Connecting,
    Open,
    /// force-closed after an error, waiting for the close
    Closing,
    Reconnecting,
    Stopped,
}

#[derive(Debug, PartialEq)]
enum Input {
    Opened,
    Message(String),
    Errored(String),
    Closed,
    ReconnectDue,
    Shutdown,
}

#[derive(Debug, PartialEq)]
enum Action {
    None,
    Deliver(NotificationEvent),
    ForceClose,
    ScheduleReconnect(Duration),
    Connect,
    Detach,
}

struct ChannelMachine {
    phase: Phase,
    reconnect_delay: Duration,
}

impl ChannelMachine {
    fn new(reconnect_delay: Duration) -> Self {
        Self {
            phase: Phase::Connecting,
            reconnect_delay,
        }
    }

    fn state(&self) -> ChannelState {
        match self.phase {
            Phase::Connecting => ChannelState::Connecting,
            Phase::Open => ChannelState::Open,
            Phase::Closing | Phase::Reconnecting => ChannelState::Reconnecting,
            Phase::Stopped => ChannelState::Stopped,
        }
    }

    fn step(&mut self, input: Input) -> Action {
        use Phase::*;
        match (self.phase, input) {
            (Stopped, _) => Action::None,
            (_, Input::Shutdown) => {
                self.phase = Stopped;
                Action::Detach
            }
            (Connecting, Input::Opened) => {
                info!("notification socket open");
                self.phase = Open;
                Action::None
            }
            (Open, Input::Message(text)) => match parse_frame(&text) {
                Ok(Inbound::Transaction(event)) => Action::Deliver(event),
                Ok(Inbound::Ignored(kind)) => {
                    debug!(%kind, "ignoring notification frame");
                    Action::None
                }
                Err(e) => {
                    warn!(error = %e, "dropping malformed notification frame");
                    Action::None
                }
            },
            (Connecting | Open, Input::Errored(reason)) => {
                let err = ChannelError::Disconnected { reason };
                warn!(error = %err, "notification socket error, closing");
                self.phase = Closing;
                Action::ForceClose
            }
            (Connecting | Open | Closing, Input::Closed) => {
                info!(delay_ms = self.reconnect_delay.as_millis() as u64, "notification socket closed, reconnect scheduled");
                self.phase = Reconnecting;
                Action::ScheduleReconnect(self.reconnect_delay)
            }
            (Reconnecting, Input::ReconnectDue) => {
                self.phase = Connecting;
                Action::Connect
            }
            (phase, input) => {
                debug!(?phase, ?input, "notification input ignored");
                Action::None
            }
        }
    }
}

/// Opens the notification channel for `token`. Must be called inside a tokio
/// runtime; the returned handle owns the driver task.
pub fn connect(
    config: &OverlayConfig,
    token: &SessionToken,
    connector: Arc<dyn SocketConnector>,
    backend: Arc<dyn NotificationBackend>,
) -> Result<ChannelHandle, ConfigError> {
    let url = config.notification_socket_url(token)?;
    let (pending_tx, _) = watch::channel(Vec::new());
    let pending = Arc::new(pending_tx);
    let (state_tx, state_rx) = watch::channel(ChannelState::Connecting);
    let cancel = CancellationToken::new();

    let driver = ChannelDriver {
        url,
        connector,
        machine: ChannelMachine::new(config.reconnect_delay()),
        pending: pending.clone(),
        state: state_tx,
        cancel: cancel.clone(),
        socket: None,
        reconnect_at: None,
    };
    let task = tokio::spawn(driver.run());

    Ok(ChannelHandle {
        cancel,
        task: Mutex::new(Some(task)),
        pending,
        state: state_rx,
        backend,
    })
}

enum Wake {
    Cancel,
    Reconnect,
    Socket(SocketEvent),
}

async fn recv_from(socket: Option<&mut Box<dyn SocketConnection>>) -> SocketEvent {
    match socket {
        Some(socket) => socket.recv().await,
        None => std::future::pending().await,
    }
}

struct ChannelDriver {
    url: String,
    connector: Arc<dyn SocketConnector>,
    machine: ChannelMachine,
    pending: Arc<watch::Sender<Vec<NotificationEvent>>>,
    state: watch::Sender<ChannelState>,
    cancel: CancellationToken,
    socket: Option<Box<dyn SocketConnection>>,
    reconnect_at: Option<Instant>,
}

impl ChannelDriver {
    async fn run(mut self) {
        let mut queue: VecDeque<Input> = self.perform(Action::Connect).await.into();
        loop {
            while let Some(input) = queue.pop_front() {
                let action = self.machine.step(input);
                self.state.send_replace(self.machine.state());
                queue.extend(self.perform(action).await);
            }
            if self.machine.phase == Phase::Stopped {
                break;
            }
            queue.push_back(self.next_input().await);
        }
        debug!("notification driver stopped");
    }

    async fn next_input(&mut self) -> Input {
        let wake = {
            let reconnect_at = self.reconnect_at;
            let socket = self.socket.as_mut();
            let has_socket = socket.is_some();
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Wake::Cancel,
                _ = sleep_until(reconnect_at.unwrap_or_else(Instant::now)), if reconnect_at.is_some() => Wake::Reconnect,
                ev = recv_from(socket), if has_socket => Wake::Socket(ev),
            }
        };
        match wake {
            Wake::Cancel => Input::Shutdown,
            Wake::Reconnect => {
                self.reconnect_at = None;
                Input::ReconnectDue
            }
            Wake::Socket(SocketEvent::Message(text)) => Input::Message(text),
            Wake::Socket(SocketEvent::Error(reason)) => Input::Errored(reason),
            Wake::Socket(SocketEvent::Closed { code, reason }) => {
                debug!(?code, %reason, "notification close frame");
                self.socket = None;
                Input::Closed
            }
        }
    }

    /// Runs one action; returns the inputs it produced.
    async fn perform(&mut self, action: Action) -> Vec<Input> {
        match action {
            Action::None => vec![],
            Action::Deliver(event) => {
                info!(id = event.id, amount = event.amount, "notification received");
                self.pending.send_if_modified(|list| {
                    if list.iter().any(|e| e.id == event.id) {
                        debug!(id = event.id, "duplicate notification ignored");
                        return false;
                    }
                    list.push(event);
                    true
                });
                vec![]
            }
            Action::ForceClose => {
                if let Some(mut socket) = self.socket.take() {
                    socket.close().await;
                }
                vec![Input::Closed]
            }
            Action::ScheduleReconnect(delay) => {
                if let Some(mut socket) = self.socket.take() {
                    socket.close().await;
                }
                self.reconnect_at = Some(Instant::now() + delay);
                vec![]
            }
            Action::Connect => {
                info!("connecting notification socket");
                let connected = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return vec![Input::Shutdown],
                    r = self.connector.connect(&self.url) => r,
                };
                match connected {
                    Ok(socket) => {
                        self.socket = Some(socket);
                        vec![Input::Opened]
                    }
                    Err(e) => vec![Input::Errored(e.to_string()), Input::Closed],
                }
            }
            Action::Detach => {
                self.reconnect_at = None;
                if let Some(mut socket) = self.socket.take() {
                    socket.close().await;
                }
                info!("notification channel stopped");
                vec![]
            }
        }
    }
}

/// Owner of a running notification channel. Dropping it disconnects.
pub struct ChannelHandle {
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    pending: Arc<watch::Sender<Vec<NotificationEvent>>>,
    state: watch::Receiver<ChannelState>,
    backend: Arc<dyn NotificationBackend>,
}

impl ChannelHandle {
    /// Idempotent. No event is delivered once this returns.
    pub async fn disconnect(&self) {
        self.cancel.cancel();
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "notification driver ended abnormally");
            }
        }
    }

    /// Drops the event from the pending list, then tells the backend it was
    /// shown. Backend failures are only logged.
    pub async fn acknowledge(&self, event_id: u64) {
        self.pending.send_if_modified(|list| {
            let before = list.len();
            list.retain(|e| e.id != event_id);
            list.len() != before
        });
        if let Err(e) = self.backend.mark_notification_read(event_id).await {
            warn!(id = event_id, error = %e, "failed to mark notification as read");
        }
    }

    pub fn pending(&self) -> Vec<NotificationEvent> {
        self.pending.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<NotificationEvent>> {
        self.pending.subscribe()
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.state.clone()
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
