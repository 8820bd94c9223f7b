use crate::config::EncodingLimits;
use crate::errors::PeerError;
use crate::logger::dump_selected_pair;
use crate::peer::capture::LocalStream;
use crate::peer::types::{IceCandidate, IceServer};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_local::TrackLocal;

/// Coarse peer connection state, as reported by the WebRTC stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Callbacks of the peer connection, funnelled into the session driver
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    LocalCandidate(IceCandidate),
    StateChanged(PeerState),
}

/// The publishing side of one peer connection (we always answer).
#[async_trait]
pub trait PeerSession: Send + Sync {
    async fn apply_remote_offer(&self, sdp: &str) -> Result<(), PeerError>;

    /// Creates the answer, applies the encoder caps, sets it locally and
    /// returns the SDP that was applied.
    async fn create_local_answer(&self, limits: &EncodingLimits) -> Result<String, PeerError>;

    /// Only valid once the remote description is set.
    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError>;

    async fn close(&self);
}

#[async_trait]
pub trait PeerFactory: Send + Sync {
    /// Builds a peer connection carrying every track of `stream`.
    async fn create(
        &self,
        ice_servers: Vec<IceServer>,
        stream: &LocalStream,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerSession>, PeerError>;
}

/// Rewrites the video m-section bandwidth lines (`b=AS` in kbps, `b=TIAS` in bps).
///
/// Advisory only: bandwidth lines in our answer bound what the server may send
/// to us, not what we publish. The encoder cap travels to the capture backend
/// through `VideoConstraints::max_bitrate_bps`.
pub fn cap_video_bitrate(sdp: &str, max_bitrate_bps: u64) -> String {
    if max_bitrate_bps == 0 {
        return sdp.to_owned();
    }
    let eol = if sdp.contains("\r\n") { "\r\n" } else { "\n" };
    let kbps = max_bitrate_bps / 1000;

    let mut out: Vec<String> = Vec::new();
    let mut in_video = false;
    let mut inserted = false;
    for line in sdp.split(eol) {
        if line.starts_with("m=") {
            in_video = line.starts_with("m=video");
            inserted = false;
            out.push(line.to_owned());
            continue;
        }
        if in_video {
            if line.starts_with("b=") {
                continue;
            }
            // b= goes after the optional i= and c= lines
            if !inserted && !line.starts_with("i=") && !line.starts_with("c=") {
                out.push(format!("b=AS:{kbps}"));
                out.push(format!("b=TIAS:{max_bitrate_bps}"));
                inserted = true;
            }
        }
        out.push(line.to_owned());
    }
    out.join(eol)
}

// ── webrtc-rs implementation ────────────────────────────────────────────────

fn rtc_config(ice_servers: Vec<IceServer>) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: ice_servers
            .into_iter()
            .map(|s| RTCIceServer {
                urls: s.urls,
                username: s.username,
                credential: s.credential,
            })
            .collect(),
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

fn map_state(state: RTCPeerConnectionState) -> PeerState {
    match state {
        RTCPeerConnectionState::Connecting => PeerState::Connecting,
        RTCPeerConnectionState::Connected => PeerState::Connected,
        RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
        RTCPeerConnectionState::Failed => PeerState::Failed,
        RTCPeerConnectionState::Closed => PeerState::Closed,
        _ => PeerState::New,
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WebRtcPeerFactory;

#[async_trait]
impl PeerFactory for WebRtcPeerFactory {
    async fn create(
        &self,
        ice_servers: Vec<IceServer>,
        stream: &LocalStream,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerSession>, PeerError> {
        let setup = |e: webrtc::Error| PeerError::Setup(e.to_string());

        let mut media = MediaEngine::default();
        media.register_default_codecs().map_err(setup)?;
        let registry = register_default_interceptors(Registry::new(), &mut media).map_err(setup)?;
        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        info!(servers = ice_servers.len(), "creating peer connection");
        let pc = Arc::new(api.new_peer_connection(rtc_config(ice_servers)).await.map_err(setup)?);

        for track in stream.tracks() {
            let local: Arc<dyn TrackLocal + Send + Sync> = track.local();
            let sender = pc.add_track(local).await.map_err(setup)?;
            debug!(kind = ?track.kind(), "track added to peer connection");
            // RTCP has to be drained for the interceptors (NACK, reports) to work
            tokio::spawn(async move {
                let mut rtcp_buf = vec![0u8; 1500];
                while sender.read(&mut rtcp_buf).await.is_ok() {}
            });
        }

        let candidate_tx = events.clone();
        pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
            match cand.map(|c| c.to_json()) {
                Some(Ok(init)) => {
                    let _ = candidate_tx.send(PeerEvent::LocalCandidate(init.into()));
                }
                Some(Err(e)) => warn!(error = %e, "failed to serialize local candidate"),
                None => debug!("local ICE gathering complete"),
            }
            Box::pin(async {})
        }));

        let weak_pc = Arc::downgrade(&pc);
        pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
            info!(state = %st, "peer connection state changed");
            if st == RTCPeerConnectionState::Failed {
                if let Some(pc) = weak_pc.upgrade() {
                    tokio::spawn(async move {
                        dump_selected_pair(&pc, "BEFORE-FAIL").await;
                    });
                }
            }
            let _ = events.send(PeerEvent::StateChanged(map_state(st)));
            Box::pin(async {})
        }));

        Ok(Arc::new(WebRtcPeer { pc }))
    }
}

pub struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerSession for WebRtcPeer {
    async fn apply_remote_offer(&self, sdp: &str) -> Result<(), PeerError> {
        let offer = RTCSessionDescription::offer(sdp.to_owned())
            .map_err(|e| PeerError::Description(e.to_string()))?;
        self.pc
            .set_remote_description(offer)
            .await
            .map_err(|e| PeerError::Description(e.to_string()))?;
        debug!("remote description applied");
        Ok(())
    }

    async fn create_local_answer(&self, limits: &EncodingLimits) -> Result<String, PeerError> {
        let desc = |e: webrtc::Error| PeerError::Description(e.to_string());
        let answer = self.pc.create_answer(None).await.map_err(desc)?;
        let capped = cap_video_bitrate(&answer.sdp, limits.max_bitrate_bps);
        let answer = RTCSessionDescription::answer(capped).map_err(desc)?;
        self.pc.set_local_description(answer).await.map_err(desc)?;
        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| PeerError::Description("local description missing".into()))?;
        Ok(local.sdp)
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        self.pc
            .add_ice_candidate(candidate.into())
            .await
            .map_err(|e| PeerError::Candidate(e.to_string()))
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            warn!(error = %e, "peer connection close failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANSWER: &str = "v=0\r\no=- 1 2 IN IP4 0.0.0.0\r\ns=-\r\nt=0 0\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\nc=IN IP4 0.0.0.0\r\na=mid:0\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96\r\nc=IN IP4 0.0.0.0\r\nb=AS:8000\r\na=mid:1\r\na=rtpmap:96 VP8/90000\r\n";

    #[test]
    fn bitrate_cap_only_touches_video_section() {
        let capped = cap_video_bitrate(ANSWER, 2_500_000);
        let lines: Vec<&str> = capped.split("\r\n").collect();

        let video = lines.iter().position(|l| l.starts_with("m=video")).unwrap();
        assert_eq!(lines[video + 1], "c=IN IP4 0.0.0.0");
        assert_eq!(lines[video + 2], "b=AS:2500");
        assert_eq!(lines[video + 3], "b=TIAS:2500000");
        assert!(!capped.contains("b=AS:8000"));

        let audio = lines.iter().position(|l| l.starts_with("m=audio")).unwrap();
        assert!(lines[audio..video].iter().all(|l| !l.starts_with("b=")));
        assert!(capped.ends_with("\r\n"));
    }

    #[test]
    fn zero_cap_leaves_sdp_alone() {
        assert_eq!(cap_video_bitrate(ANSWER, 0), ANSWER);
    }

    #[test]
    fn config_keeps_turn_credentials() {
        let cfg = rtc_config(vec![IceServer {
            urls: vec!["turn:203.0.113.7:3478".into()],
            username: "u".into(),
            credential: "p".into(),
        }]);
        assert_eq!(cfg.ice_servers[0].username, "u");
        assert_eq!(cfg.bundle_policy, RTCBundlePolicy::MaxBundle);
    }
}
