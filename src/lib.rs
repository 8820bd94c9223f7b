pub mod api;
pub mod config;
pub mod errors;
pub mod logger;
pub mod notifications;
pub mod overlay;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod socket;
pub mod utils;

#[cfg(test)]
mod testing;

pub use config::{EncodingLimits, MediaServerConfig, OverlayConfig};
pub use errors::{CaptureError, ConfigError, OverlayError, PipelineError, SocketError};
pub use notifications::{ChannelHandle, ChannelState, NotificationEvent};
pub use overlay::{Collaborators, Overlay};
pub use peer::{MediaPublishPipeline, PipelineStatus, StreamState};
pub use session::SessionToken;

use anyhow::Context;
use std::sync::Arc;
use tracing::info;

fn session_token() -> anyhow::Result<SessionToken> {
    if let Ok(token) = std::env::var("OVERLAY_TOKEN") {
        return Ok(SessionToken::new(token)?);
    }
    let url = std::env::args()
        .nth(1)
        .ok_or(ConfigError::MissingToken)
        .context("set OVERLAY_TOKEN or pass the overlay URL")?;
    Ok(SessionToken::from_overlay_url(&url)?)
}

/// Headless overlay: shows each donation for the configured time, then
/// acknowledges it. Runs until Ctrl-C.
pub async fn run() -> anyhow::Result<()> {
    let config = OverlayConfig::from_env().context("loading configuration")?;
    let token = session_token()?;
    let display = config.notification_display();
    let overlay = Overlay::new(config, token, Arc::new(peer::UnsupportedCapture))?;

    let channel = overlay.notifications();
    let mut pending = channel.subscribe();
    loop {
        let next = pending.borrow_and_update().first().cloned();
        match next {
            Some(event) => {
                info!(
                    id = event.id,
                    donor = %event.display_name(),
                    amount = event.amount,
                    title = %event.title,
                    "showing notification"
                );
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    _ = tokio::time::sleep(display) => {}
                }
                channel.acknowledge(event.id).await;
            }
            None => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    changed = pending.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }

    overlay.shutdown().await;
    Ok(())
}
