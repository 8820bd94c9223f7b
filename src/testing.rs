//! In-memory collaborators for driver tests.

use crate::api::NotificationBackend;
use crate::config::EncodingLimits;
use crate::errors::{ApiError, CaptureError, PeerError, SocketError};
use crate::peer::capture::{CaptureConstraints, CaptureProvider, LocalStream, MediaTrack};
use crate::peer::connection::{cap_video_bitrate, PeerEvent, PeerFactory, PeerSession, PeerState};
use crate::peer::types::{IceCandidate, IceServer, TrackKind};
use crate::socket::{SocketConnection, SocketConnector, SocketEvent};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

// ── sockets ─────────────────────────────────────────────────────────────────

/// Server side of one fake socket connection
pub struct FakeServer {
    inbound: mpsc::UnboundedSender<SocketEvent>,
    sent: mpsc::UnboundedReceiver<String>,
    closed: Arc<AtomicBool>,
}

impl FakeServer {
    pub fn push(&self, text: String) {
        let _ = self.inbound.send(SocketEvent::Message(text));
    }

    pub fn push_error(&self, reason: &str) {
        let _ = self.inbound.send(SocketEvent::Error(reason.into()));
    }

    pub fn close_from_server(&self) {
        let _ = self.inbound.send(SocketEvent::Closed {
            code: Some(1000),
            reason: "bye".into(),
        });
    }

    /// Next frame the client sent.
    pub async fn next_sent(&mut self) -> String {
        self.sent.recv().await.expect("client connection dropped")
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct FakeConnection {
    inbound: mpsc::UnboundedReceiver<SocketEvent>,
    sent: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl SocketConnection for FakeConnection {
    async fn recv(&mut self) -> SocketEvent {
        if self.closed.load(Ordering::SeqCst) {
            return SocketEvent::closed();
        }
        self.inbound.recv().await.unwrap_or_else(SocketEvent::closed)
    }

    async fn send(&mut self, text: String) -> Result<(), SocketError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SocketError::Closed);
        }
        self.sent.send(text).map_err(|_| SocketError::Closed)
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub struct FakeConnector {
    accepted_tx: mpsc::UnboundedSender<FakeServer>,
    accepted_rx: Mutex<mpsc::UnboundedReceiver<FakeServer>>,
    attempts: AtomicUsize,
    fail_next: AtomicUsize,
    urls: StdMutex<Vec<String>>,
}

impl Default for FakeConnector {
    fn default() -> Self {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        Self {
            accepted_tx,
            accepted_rx: Mutex::new(accepted_rx),
            attempts: AtomicUsize::new(0),
            fail_next: AtomicUsize::new(0),
            urls: StdMutex::new(Vec::new()),
        }
    }
}

impl FakeConnector {
    /// Waits for the next successful connection.
    pub async fn accept(&self) -> FakeServer {
        self.accepted_rx
            .lock()
            .await
            .recv()
            .await
            .expect("connector alive")
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SocketConnector for FakeConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn SocketConnection>, SocketError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.to_owned());
        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SocketError::ConnectFailed {
                reason: "connection refused".into(),
            });
        }

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let _ = self.accepted_tx.send(FakeServer {
            inbound: inbound_tx,
            sent: sent_rx,
            closed: closed.clone(),
        });
        Ok(Box::new(FakeConnection {
            inbound: inbound_rx,
            sent: sent_tx,
            closed,
        }))
    }
}

// ── http backend ────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeBackend {
    calls: StdMutex<Vec<u64>>,
    failing: AtomicBool,
}

impl FakeBackend {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<u64> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationBackend for FakeBackend {
    async fn mark_notification_read(&self, id: u64) -> Result<(), ApiError> {
        self.calls.lock().unwrap().push(id);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ApiError::Status {
                status: 500,
                body: "boom".into(),
            });
        }
        Ok(())
    }
}

// ── capture ─────────────────────────────────────────────────────────────────

#[derive(Clone, Copy)]
enum CaptureMode {
    WithAudio,
    VideoOnly,
    Denied,
}

pub struct FakeCapture {
    mode: CaptureMode,
    track_stops: StdMutex<Vec<CancellationToken>>,
    ended: StdMutex<Vec<CancellationToken>>,
}

impl FakeCapture {
    fn new(mode: CaptureMode) -> Self {
        Self {
            mode,
            track_stops: StdMutex::new(Vec::new()),
            ended: StdMutex::new(Vec::new()),
        }
    }

    pub fn with_audio() -> Self {
        Self::new(CaptureMode::WithAudio)
    }

    pub fn video_only() -> Self {
        Self::new(CaptureMode::VideoOnly)
    }

    pub fn denied() -> Self {
        Self::new(CaptureMode::Denied)
    }

    /// Captured tracks not yet stopped, across every stream handed out.
    pub fn live_tracks(&self) -> usize {
        self.track_stops
            .lock()
            .unwrap()
            .iter()
            .filter(|t| !t.is_cancelled())
            .count()
    }

    /// Simulates the user ending the share from the platform UI.
    pub fn end_capture(&self) {
        if let Some(ended) = self.ended.lock().unwrap().last() {
            ended.cancel();
        }
    }
}

#[async_trait]
impl CaptureProvider for FakeCapture {
    async fn request_display_media(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<LocalStream, CaptureError> {
        assert_eq!(constraints.video.ideal_width, 1920);
        let mut tracks = vec![MediaTrack::vp8("fake")];
        match self.mode {
            CaptureMode::Denied => {
                return Err(CaptureError::PermissionDenied {
                    reason: "user dismissed the picker".into(),
                })
            }
            CaptureMode::WithAudio => tracks.push(MediaTrack::opus("fake")),
            CaptureMode::VideoOnly => {}
        }
        self.track_stops
            .lock()
            .unwrap()
            .extend(tracks.iter().map(MediaTrack::stop_token));
        let stream = LocalStream::new("fake", tracks);
        self.ended.lock().unwrap().push(stream.ended_token());
        Ok(stream)
    }
}

// ── peers ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum PeerOp {
    Created {
        ice_servers: Vec<IceServer>,
        tracks: Vec<TrackKind>,
    },
    SetRemote(String),
    AddCandidate(String),
    CreateAnswer,
    Close,
}

#[derive(Default)]
pub struct FakePeerFactory {
    ops: Arc<StdMutex<Vec<PeerOp>>>,
    rejected: Arc<AtomicUsize>,
    events: StdMutex<Option<mpsc::UnboundedSender<PeerEvent>>>,
}

impl FakePeerFactory {
    pub fn ops(&self) -> Vec<PeerOp> {
        self.ops.lock().unwrap().clone()
    }

    /// Candidates added before a remote description was set.
    pub fn rejected_candidates(&self) -> usize {
        self.rejected.load(Ordering::SeqCst)
    }

    fn emit(&self, event: PeerEvent) {
        if let Some(tx) = self.events.lock().unwrap().as_ref() {
            let _ = tx.send(event);
        }
    }

    pub fn emit_state(&self, state: PeerState) {
        self.emit(PeerEvent::StateChanged(state));
    }

    pub fn emit_local_candidate(&self, line: &str) {
        self.emit(PeerEvent::LocalCandidate(IceCandidate {
            candidate: line.into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }));
    }
}

#[async_trait]
impl PeerFactory for FakePeerFactory {
    async fn create(
        &self,
        ice_servers: Vec<IceServer>,
        stream: &LocalStream,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerSession>, PeerError> {
        let tracks = stream.tracks().iter().map(MediaTrack::kind).collect();
        self.ops.lock().unwrap().push(PeerOp::Created {
            ice_servers,
            tracks,
        });
        *self.events.lock().unwrap() = Some(events);
        Ok(Arc::new(FakePeer {
            ops: self.ops.clone(),
            rejected: self.rejected.clone(),
            remote_set: AtomicBool::new(false),
        }))
    }
}

struct FakePeer {
    ops: Arc<StdMutex<Vec<PeerOp>>>,
    rejected: Arc<AtomicUsize>,
    remote_set: AtomicBool,
}

impl FakePeer {
    fn record(&self, op: PeerOp) {
        self.ops.lock().unwrap().push(op);
    }
}

#[async_trait]
impl PeerSession for FakePeer {
    async fn apply_remote_offer(&self, sdp: &str) -> Result<(), PeerError> {
        self.record(PeerOp::SetRemote(sdp.to_owned()));
        self.remote_set.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn create_local_answer(&self, limits: &EncodingLimits) -> Result<String, PeerError> {
        self.record(PeerOp::CreateAnswer);
        Ok(cap_video_bitrate(
            "v=0\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\na=mid:0\r\n",
            limits.max_bitrate_bps,
        ))
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        if !self.remote_set.load(Ordering::SeqCst) {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(PeerError::Candidate("no remote description".into()));
        }
        self.record(PeerOp::AddCandidate(candidate.candidate));
        Ok(())
    }

    async fn close(&self) {
        self.record(PeerOp::Close);
    }
}
