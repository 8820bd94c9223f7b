pub mod capture;
pub mod connection;
pub mod ice;
pub mod pipeline;
pub mod state;
pub mod types;

pub use capture::{CaptureConstraints, CaptureProvider, LocalStream, MediaTrack, UnsupportedCapture};
pub use connection::{PeerEvent, PeerFactory, PeerSession, PeerState, WebRtcPeerFactory};
pub use pipeline::MediaPublishPipeline;
pub use state::{PipelineStatus, StreamState};
pub use types::{IceCandidate, IceServer, ServerConfig, TrackKind};
