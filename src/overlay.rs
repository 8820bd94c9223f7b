//! The owning display unit: one notification channel plus one publish pipeline.

use crate::api::{ApiClient, NotificationBackend};
use crate::config::OverlayConfig;
use crate::errors::OverlayError;
use crate::notifications::{self, ChannelHandle};
use crate::peer::capture::CaptureProvider;
use crate::peer::connection::{PeerFactory, WebRtcPeerFactory};
use crate::peer::pipeline::MediaPublishPipeline;
use crate::session::SessionToken;
use crate::socket::{SocketConnector, WsConnector};
use std::sync::Arc;
use tracing::info;

/// Everything the overlay talks to
pub struct Collaborators {
    pub sockets: Arc<dyn SocketConnector>,
    pub backend: Arc<dyn NotificationBackend>,
    pub capture: Arc<dyn CaptureProvider>,
    pub peers: Arc<dyn PeerFactory>,
}

pub struct Overlay {
    config: OverlayConfig,
    channel: ChannelHandle,
    pipeline: MediaPublishPipeline,
}

impl Overlay {
    /// Wires tungstenite sockets, the REST backend and webrtc-rs peers.
    pub fn new(
        config: OverlayConfig,
        token: SessionToken,
        capture: Arc<dyn CaptureProvider>,
    ) -> Result<Self, OverlayError> {
        let api = ApiClient::new(&config, token.clone())?;
        let collaborators = Collaborators {
            sockets: Arc::new(WsConnector),
            backend: Arc::new(api),
            capture,
            peers: Arc::new(WebRtcPeerFactory),
        };
        Self::with_collaborators(config, token, collaborators)
    }

    pub fn with_collaborators(
        config: OverlayConfig,
        token: SessionToken,
        c: Collaborators,
    ) -> Result<Self, OverlayError> {
        config.validate()?;
        let channel = notifications::connect(&config, &token, c.sockets.clone(), c.backend)?;
        let pipeline =
            MediaPublishPipeline::new(config.media.clone(), c.capture, c.sockets, c.peers);
        info!(
            stream = %config.media.signaling_url(),
            playback = %config.media.llhls_playback_url(),
            "overlay ready"
        );
        Ok(Self {
            config,
            channel,
            pipeline,
        })
    }

    pub fn config(&self) -> &OverlayConfig {
        &self.config
    }

    pub fn notifications(&self) -> &ChannelHandle {
        &self.channel
    }

    pub fn pipeline(&self) -> &MediaPublishPipeline {
        &self.pipeline
    }

    /// Disconnects the channel and stops streaming.
    pub async fn shutdown(&self) {
        self.channel.disconnect().await;
        self.pipeline.stop_streaming().await;
        info!("overlay shut down");
    }
}
