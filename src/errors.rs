use thiserror::Error;

/// Failures acquiring the local display/audio capture.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Capture permission denied: {reason}")]
    PermissionDenied { reason: String },

    #[error("Capture not supported: {reason}")]
    Unsupported { reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SocketError {
    #[error("Socket connect failed: {reason}")]
    ConnectFailed { reason: String },

    #[error("Socket send failed: {reason}")]
    SendFailed { reason: String },

    #[error("Socket error: {reason}")]
    Broken { reason: String },

    #[error("Socket closed")]
    Closed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeerError {
    #[error("Peer connection setup failed: {0}")]
    Setup(String),

    #[error("Session description rejected: {0}")]
    Description(String),

    #[error("ICE candidate rejected: {0}")]
    Candidate(String),
}

/// Errors surfaced by the media publish pipeline. Every variant leaves the
/// previous session fully torn down.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("No offer from the signaling server within {ms}ms")]
    SignalingTimeout { ms: u64 },

    #[error("{0}")]
    SignalingProtocol(String),

    #[error("WebRTC connection failed: {0}")]
    PeerConnectionFailure(String),

    #[error(transparent)]
    Socket(#[from] SocketError),

    #[error(transparent)]
    Peer(#[from] PeerError),

    #[error("Streaming stopped")]
    Cancelled,
}

/// Notification socket problems. Always recoverable: the channel reconnects.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Notification socket disconnected: {reason}")]
    Disconnected { reason: String },
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid URL: {0}")]
    Url(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Configuration invalid: {reason}")]
    Invalid { reason: String },

    #[error("Session token missing")]
    MissingToken,
}

/// Failures wiring up an [`Overlay`](crate::overlay::Overlay).
#[derive(Error, Debug)]
pub enum OverlayError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Api(#[from] ApiError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_error_displays_server_message_verbatim() {
        let err = PipelineError::SignalingProtocol("bad stream name".into());
        assert_eq!(err.to_string(), "bad stream name");
    }

    #[test]
    fn capture_error_converts_into_pipeline_error() {
        let err: PipelineError = CaptureError::Unsupported {
            reason: "no display".into(),
        }
        .into();
        assert!(matches!(err, PipelineError::Capture(_)));
        assert_eq!(err.to_string(), "Capture not supported: no display");
    }
}
