use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info};

/// Lifecycle of the publish pipeline as shown by the display layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineStatus {
    pub state: StreamState,
    pub last_error: Option<String>,
}

impl Default for PipelineStatus {
    fn default() -> Self {
        Self {
            state: StreamState::Disconnected,
            last_error: None,
        }
    }
}

impl PipelineStatus {
    pub fn is_streaming(&self) -> bool {
        self.state == StreamState::Connected
    }
}

/// Single writer of the pipeline status; readers subscribe through `watch`.
pub(crate) struct StatusBoard {
    tx: watch::Sender<PipelineStatus>,
}

impl StatusBoard {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(PipelineStatus::default());
        Self { tx }
    }

    pub(crate) fn current(&self) -> PipelineStatus {
        self.tx.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<PipelineStatus> {
        self.tx.subscribe()
    }

    fn set(&self, state: StreamState, last_error: Option<String>) {
        self.tx.send_replace(PipelineStatus { state, last_error });
    }

    pub(crate) fn emit_connecting(&self) {
        info!("stream connecting");
        self.set(StreamState::Connecting, None);
    }

    pub(crate) fn emit_connected(&self) {
        info!("stream connected");
        self.set(StreamState::Connected, None);
    }

    pub(crate) fn emit_disconnected(&self) {
        info!("stream disconnected");
        self.set(StreamState::Disconnected, None);
    }

    pub(crate) fn emit_error(&self, message: String) {
        error!(error = %message, "stream failed");
        self.set(StreamState::Error, Some(message));
    }
}
