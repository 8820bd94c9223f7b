use crate::errors::ConfigError;
use crate::peer::types::ServerConfig;
use crate::session::SessionToken;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// Default log filter: verbose while developing, quiet in release builds

#[cfg(debug_assertions)]
pub const DEFAULT_LOG_FILTER: &str = "debug";

#[cfg(not(debug_assertions))]
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Encoder caps applied to the outgoing video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingLimits {
    pub max_bitrate_bps: u64,
    pub max_framerate: u32,
}

impl Default for EncodingLimits {
    fn default() -> Self {
        Self {
            max_bitrate_bps: 2_500_000,
            max_framerate: 30,
        }
    }
}

/// Media ingestion server (OvenMediaEngine style WebRTC signaling)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaServerConfig {
    pub host: String,
    pub signaling_port: u16,
    pub app: String,
    pub stream: String,
    pub tls: bool,
    /// Ask the server to relay media over TCP (`transport=tcp`)
    pub tcp_transport: bool,
    pub ice_servers: Vec<ServerConfig>,
    pub limits: EncodingLimits,
    pub connect_timeout_ms: u64,
}

impl Default for MediaServerConfig {
    fn default() -> Self {
        Self {
            host: "tvlive.gpw.cloud".into(),
            signaling_port: 3334,
            app: "app".into(),
            stream: "live".into(),
            tls: true,
            tcp_transport: true,
            ice_servers: default_ice_servers(),
            limits: EncodingLimits::default(),
            connect_timeout_ms: 30_000,
        }
    }
}

impl MediaServerConfig {
    pub fn signaling_url(&self) -> String {
        let scheme = if self.tls { "wss" } else { "ws" };
        let mut url = format!(
            "{scheme}://{}:{}/{}/{}?direction=send",
            self.host, self.signaling_port, self.app, self.stream
        );
        if self.tcp_transport {
            url.push_str("&transport=tcp");
        }
        url
    }

    /// LL-HLS playback of the published stream
    pub fn llhls_playback_url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!(
            "{scheme}://{}:{}/{}/{}/llhls.m3u8",
            self.host, self.signaling_port, self.app, self.stream
        )
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

pub fn default_ice_servers() -> Vec<ServerConfig> {
    vec![
        ServerConfig::stun("default-stun", "stun:stun.l.google.com:19302"),
        ServerConfig::stun("default-stun-1", "stun:stun1.l.google.com:19302"),
    ]
}

/// Everything the overlay core needs from its environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    pub api_url: String,
    pub ws_url: String,
    pub media: MediaServerConfig,
    pub default_phone: String,
    pub reconnect_delay_ms: u64,
    /// How long the display layer keeps one notification on screen
    pub notification_display_ms: u64,
    pub http_timeout_ms: u64,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000".into(),
            ws_url: "ws://localhost:8000".into(),
            media: MediaServerConfig::default(),
            default_phone: "924893117".into(),
            reconnect_delay_ms: 3_000,
            notification_display_ms: 10_500,
            http_timeout_ms: 10_000,
        }
    }
}

impl OverlayConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(json).map_err(|e| ConfigError::Invalid {
            reason: e.to_string(),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reads `OVERLAY_*` variables on top of the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Some(v) = lookup("OVERLAY_API_URL") {
            cfg.api_url = v;
        }
        if let Some(v) = lookup("OVERLAY_WS_URL") {
            cfg.ws_url = v;
        }
        if let Some(v) = lookup("OVERLAY_MEDIA_HOST") {
            cfg.media.host = v;
        }
        if let Some(v) = lookup("OVERLAY_MEDIA_PORT") {
            cfg.media.signaling_port = v.parse().map_err(|_| ConfigError::Invalid {
                reason: format!("OVERLAY_MEDIA_PORT is not a port: {v}"),
            })?;
        }
        if let Some(v) = lookup("OVERLAY_MEDIA_APP") {
            cfg.media.app = v;
        }
        if let Some(v) = lookup("OVERLAY_MEDIA_STREAM") {
            cfg.media.stream = v;
        }
        if let Some(v) = lookup("OVERLAY_PHONE") {
            cfg.default_phone = v;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, url) in [("api_url", &self.api_url), ("ws_url", &self.ws_url)] {
            Url::parse(url).map_err(|e| ConfigError::Invalid {
                reason: format!("{name} '{url}': {e}"),
            })?;
        }
        if self.media.host.is_empty() || self.media.app.is_empty() || self.media.stream.is_empty() {
            return Err(ConfigError::Invalid {
                reason: "media host, app and stream must be set".into(),
            });
        }
        Ok(())
    }

    /// `<ws_url>/api/v1/ws?token=<token>`
    pub fn notification_socket_url(&self, token: &SessionToken) -> Result<String, ConfigError> {
        let mut url = Url::parse(&format!("{}/api/v1/ws", self.ws_url.trim_end_matches('/')))
            .map_err(|e| ConfigError::Invalid {
                reason: format!("ws_url: {e}"),
            })?;
        url.query_pairs_mut().append_pair("token", token.as_str());
        Ok(url.into())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn notification_display(&self) -> Duration {
        Duration::from_millis(self.notification_display_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }
}
