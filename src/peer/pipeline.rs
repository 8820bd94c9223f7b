//! Media publish pipeline.
//!
//! ```text
//! start_streaming ─► capture ─► signaling socket ─► request_offer
//!                                      │
//!                    offer ◄───────────┘
//!                      │ build peer (tracks, merged ICE servers)
//!                      │ set remote ─► bundled + deferred candidates
//!                      │ answer ─────────────────────────────────►
//!                    candidates ◄──────────────────────────────►
//!                      │
//!               peer connected ─► start_streaming resolves
//! ```
//!
//! One driver task per session is the only consumer of socket, peer and timer
//! events. Stopping cancels the driver and waits for its teardown, so nothing
//! from an old session can act after `stop_streaming` returns.

use crate::config::MediaServerConfig;
use crate::errors::{PipelineError, SocketError};
use crate::logger::dump_candidate;
use crate::peer::capture::{CaptureConstraints, CaptureProvider, LocalStream};
use crate::peer::connection::{PeerEvent, PeerFactory, PeerSession, PeerState};
use crate::peer::ice::{apply_candidates, is_valid_candidate, merge_ice_servers, PendingCandidates};
use crate::peer::state::{PipelineStatus, StatusBoard};
use crate::peer::types::IceCandidate;
use crate::signaling::{
    parse_inbound, InboundMessage, OfferMessage, OutboundCommand, SessionDescription, SessionId,
};
use crate::socket::{SocketConnection, SocketConnector, SocketEvent};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct MediaPublishPipeline {
    config: MediaServerConfig,
    capture: Arc<dyn CaptureProvider>,
    connector: Arc<dyn SocketConnector>,
    peers: Arc<dyn PeerFactory>,
    status: Arc<StatusBoard>,
    active: Mutex<Option<ActiveSession>>,
}

struct ActiveSession {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ActiveSession {
    async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "session driver ended abnormally");
        }
    }
}

impl MediaPublishPipeline {
    pub fn new(
        config: MediaServerConfig,
        capture: Arc<dyn CaptureProvider>,
        connector: Arc<dyn SocketConnector>,
        peers: Arc<dyn PeerFactory>,
    ) -> Self {
        Self {
            config,
            capture,
            connector,
            peers,
            status: Arc::new(StatusBoard::new()),
            active: Mutex::new(None),
        }
    }

    pub fn status(&self) -> PipelineStatus {
        self.status.current()
    }

    pub fn subscribe(&self) -> watch::Receiver<PipelineStatus> {
        self.status.subscribe()
    }

    pub fn config(&self) -> &MediaServerConfig {
        &self.config
    }

    /// Captures the display and publishes it. Resolves once the peer
    /// connection is up; rejects on capture, signaling or peer failure, on
    /// the connection timeout, and when stopped first.
    pub async fn start_streaming(&self) -> Result<(), PipelineError> {
        let (done_tx, done_rx) = oneshot::channel();
        {
            let mut active = self.active.lock().await;
            if let Some(previous) = active.take() {
                info!("tearing down previous streaming session");
                previous.shutdown().await;
            }

            self.status.emit_connecting();
            let cancel = CancellationToken::new();
            let driver = SessionDriver {
                config: self.config.clone(),
                capture: self.capture.clone(),
                connector: self.connector.clone(),
                peers: self.peers.clone(),
                status: self.status.clone(),
                cancel: cancel.clone(),
                done: Some(done_tx),
            };
            let task = tokio::spawn(driver.run());
            *active = Some(ActiveSession { cancel, task });
        }
        done_rx.await.unwrap_or(Err(PipelineError::Cancelled))
    }

    /// Idempotent. Stops tracks, closes socket and peer, resets to
    /// `disconnected`, and rejects a pending start.
    pub async fn stop_streaming(&self) {
        let previous = self.active.lock().await.take();
        if let Some(previous) = previous {
            info!("stopping stream");
            previous.shutdown().await;
        }
        self.status.emit_disconnected();
    }
}

impl Drop for MediaPublishPipeline {
    fn drop(&mut self) {
        // the driver tears itself down once cancelled
        if let Ok(mut active) = self.active.try_lock() {
            if let Some(session) = active.take() {
                session.cancel.cancel();
            }
        }
    }
}

// ── session driver ──────────────────────────────────────────────────────────

enum Outcome {
    Cancelled,
    CaptureEnded,
    SocketClosed,
    Failed(PipelineError),
}

enum DriverEvent {
    Cancel,
    CaptureEnded,
    Timeout,
    Socket(SocketEvent),
    Peer(PeerEvent),
}

/// Resources of one signaling attempt
#[derive(Default)]
struct Session {
    stream: Option<LocalStream>,
    socket: Option<Box<dyn SocketConnection>>,
    peer: Option<Arc<dyn PeerSession>>,
    session_id: Option<SessionId>,
    remote_set: bool,
    deferred_remote: PendingCandidates,
}

impl Session {
    async fn send(&mut self, command: OutboundCommand) -> Result<(), PipelineError> {
        let socket = self.socket.as_mut().ok_or(SocketError::Closed)?;
        socket.send(command.to_json()).await?;
        Ok(())
    }

    async fn on_local_candidate(&mut self, candidate: IceCandidate) -> Result<(), PipelineError> {
        if !is_valid_candidate(&candidate) {
            debug!(candidate = %candidate.candidate, "dropping local candidate with unspecified address");
            return Ok(());
        }
        dump_candidate("LOCAL", &candidate);
        // the peer only exists once the offer assigned the session id
        debug_assert!(self.session_id.is_some(), "local candidate before session id");
        let Some(id) = self.session_id.clone() else {
            warn!(candidate = %candidate.candidate, "local candidate before session id, dropping");
            return Ok(());
        };
        self.send(OutboundCommand::Candidate {
            id,
            candidates: vec![candidate],
        })
        .await
    }

    async fn on_remote_candidates(&mut self, candidates: Vec<IceCandidate>) {
        for candidate in &candidates {
            dump_candidate("REMOTE", candidate);
        }
        match (&self.peer, self.remote_set) {
            (Some(peer), true) => {
                apply_candidates(peer.as_ref(), candidates).await;
            }
            _ => {
                for candidate in candidates.into_iter().filter(is_valid_candidate) {
                    self.deferred_remote.push(candidate);
                }
            }
        }
    }

    async fn teardown(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            socket.close().await;
        }
        if let Some(peer) = self.peer.take() {
            peer.close().await;
        }
        if let Some(stream) = self.stream.take() {
            stream.stop();
        }
        self.session_id = None;
        self.remote_set = false;
        self.deferred_remote.drain();
    }
}

struct SessionDriver {
    config: MediaServerConfig,
    capture: Arc<dyn CaptureProvider>,
    connector: Arc<dyn SocketConnector>,
    peers: Arc<dyn PeerFactory>,
    status: Arc<StatusBoard>,
    cancel: CancellationToken,
    done: Option<oneshot::Sender<Result<(), PipelineError>>>,
}

impl SessionDriver {
    async fn run(mut self) {
        let mut session = Session::default();
        let outcome = self.drive(&mut session).await;
        session.teardown().await;

        match outcome {
            // stop_streaming owns the status after a cancel
            Outcome::Cancelled => self.finish(Err(PipelineError::Cancelled)),
            Outcome::CaptureEnded => {
                info!("capture ended by the user");
                self.status.emit_disconnected();
                self.finish(Err(PipelineError::Cancelled));
            }
            Outcome::SocketClosed => {
                info!("signaling socket closed");
                self.status.emit_disconnected();
                self.finish(Err(SocketError::Closed.into()));
            }
            Outcome::Failed(e) => {
                self.status.emit_error(e.to_string());
                self.finish(Err(e));
            }
        }
    }

    fn finish(&mut self, result: Result<(), PipelineError>) {
        if let Some(done) = self.done.take() {
            let _ = done.send(result);
        }
    }

    async fn drive(&mut self, s: &mut Session) -> Outcome {
        let constraints = CaptureConstraints::for_limits(&self.config.limits);
        let captured = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Outcome::Cancelled,
            r = self.capture.request_display_media(&constraints) => r,
        };
        let mut stream = match captured {
            Ok(stream) => stream,
            Err(e) => return Outcome::Failed(e.into()),
        };
        stream.ensure_audio_track();
        let ended = stream.ended_token();
        s.stream = Some(stream);

        let timeout = self.config.connect_timeout();
        let deadline = Instant::now() + timeout;
        let timeout_err = || PipelineError::SignalingTimeout {
            ms: timeout.as_millis() as u64,
        };

        let url = self.config.signaling_url();
        info!(%url, "connecting to signaling server");
        let connected = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Outcome::Cancelled,
            _ = sleep_until(deadline) => return Outcome::Failed(timeout_err()),
            r = self.connector.connect(&url) => r,
        };
        match connected {
            Ok(socket) => s.socket = Some(socket),
            Err(e) => return Outcome::Failed(e.into()),
        }

        if let Err(e) = s.send(OutboundCommand::RequestOffer).await {
            return Outcome::Failed(e);
        }
        debug!("offer requested");

        let (peer_tx, mut peer_rx) = mpsc::unbounded_channel();
        let mut is_connected = false;
        loop {
            let event = {
                let Some(socket) = s.socket.as_mut() else {
                    return Outcome::SocketClosed;
                };
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => DriverEvent::Cancel,
                    _ = ended.cancelled() => DriverEvent::CaptureEnded,
                    _ = sleep_until(deadline), if !is_connected => DriverEvent::Timeout,
                    Some(ev) = peer_rx.recv() => DriverEvent::Peer(ev),
                    ev = socket.recv() => DriverEvent::Socket(ev),
                }
            };

            match event {
                DriverEvent::Cancel => return Outcome::Cancelled,
                DriverEvent::CaptureEnded => return Outcome::CaptureEnded,
                DriverEvent::Timeout => return Outcome::Failed(timeout_err()),
                DriverEvent::Socket(SocketEvent::Message(text)) => {
                    if let Err(e) = self.on_message(s, &text, &peer_tx).await {
                        return Outcome::Failed(e);
                    }
                }
                DriverEvent::Socket(SocketEvent::Error(reason)) => {
                    return Outcome::Failed(SocketError::Broken { reason }.into());
                }
                DriverEvent::Socket(SocketEvent::Closed { code, reason }) => {
                    debug!(?code, %reason, "signaling socket close frame");
                    return Outcome::SocketClosed;
                }
                DriverEvent::Peer(PeerEvent::LocalCandidate(candidate)) => {
                    if let Err(e) = s.on_local_candidate(candidate).await {
                        return Outcome::Failed(e);
                    }
                }
                DriverEvent::Peer(PeerEvent::StateChanged(state)) => match state {
                    PeerState::Connected if !is_connected => {
                        is_connected = true;
                        self.status.emit_connected();
                        self.finish(Ok(()));
                    }
                    PeerState::Failed | PeerState::Disconnected => {
                        return Outcome::Failed(PipelineError::PeerConnectionFailure(format!(
                            "peer connection {state:?}"
                        )));
                    }
                    _ => debug!(?state, "peer state"),
                },
            }
        }
    }

    async fn on_message(
        &self,
        s: &mut Session,
        text: &str,
        peer_tx: &mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<(), PipelineError> {
        match parse_inbound(text) {
            Err(e) => {
                warn!(error = %e, "dropping malformed signaling message");
                Ok(())
            }
            Ok(InboundMessage::Error(message)) => Err(PipelineError::SignalingProtocol(message)),
            Ok(InboundMessage::Offer(offer)) => self.on_offer(s, offer, peer_tx).await,
            Ok(InboundMessage::Candidates(candidates)) => {
                s.on_remote_candidates(candidates).await;
                Ok(())
            }
            Ok(InboundMessage::Other(command)) => {
                debug!(%command, "ignoring signaling command");
                Ok(())
            }
        }
    }

    async fn on_offer(
        &self,
        s: &mut Session,
        offer: OfferMessage,
        peer_tx: &mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<(), PipelineError> {
        if s.peer.is_some() {
            warn!(session = %offer.id, "ignoring repeated offer");
            return Ok(());
        }
        info!(session = %offer.id, "offer received");
        s.session_id = Some(offer.id.clone());

        let ice_servers = merge_ice_servers(&self.config.ice_servers, &offer.ice_servers);
        let stream = s.stream.as_ref().ok_or(PipelineError::Cancelled)?;
        let peer = self.peers.create(ice_servers, stream, peer_tx.clone()).await?;
        s.peer = Some(peer.clone());

        peer.apply_remote_offer(&offer.sdp.sdp).await?;
        s.remote_set = true;

        let bundled = apply_candidates(peer.as_ref(), offer.candidates).await;
        let deferred = apply_candidates(peer.as_ref(), s.deferred_remote.drain()).await;
        debug!(bundled, deferred, "remote candidates applied");

        let answer = peer.create_local_answer(&self.config.limits).await?;
        s.send(OutboundCommand::Answer {
            id: offer.id,
            sdp: SessionDescription::answer(answer),
        })
        .await?;
        info!("answer sent");
        Ok(())
    }
}
