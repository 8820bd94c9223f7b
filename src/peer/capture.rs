//! Local media: capture collaborator seam, track handles and the silent
//! audio filler.

use crate::config::EncodingLimits;
use crate::errors::CaptureError;
use crate::peer::types::TrackKind;
use crate::utils::random_id;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Opus TOC byte + empty frame: 20 ms of silence
const OPUS_SILENCE_FRAME: [u8; 3] = [0xf8, 0xff, 0xfe];
const OPUS_FRAME: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoConstraints {
    pub ideal_width: u32,
    pub ideal_height: u32,
    pub ideal_frame_rate: u32,
    pub max_bitrate_bps: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub sample_rate: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConstraints {
    pub video: VideoConstraints,
    pub audio: AudioConstraints,
}

impl CaptureConstraints {
    /// 1080p30 display capture, clamped to the encoder caps.
    pub fn for_limits(limits: &EncodingLimits) -> Self {
        Self {
            video: VideoConstraints {
                ideal_width: 1920,
                ideal_height: 1080,
                ideal_frame_rate: limits.max_framerate.min(30),
                max_bitrate_bps: limits.max_bitrate_bps,
            },
            audio: AudioConstraints {
                echo_cancellation: true,
                noise_suppression: true,
                sample_rate: 48_000,
            },
        }
    }
}

/// Platform display capture (screen share prompt, encoder).
///
/// Implementations own the hardware handles behind each track and must stop
/// feeding a track once its stop token is cancelled.
#[async_trait]
pub trait CaptureProvider: Send + Sync {
    async fn request_display_media(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<LocalStream, CaptureError>;
}

/// Capture provider for hosts without a display backend (headless runner).
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedCapture;

#[async_trait]
impl CaptureProvider for UnsupportedCapture {
    async fn request_display_media(
        &self,
        _constraints: &CaptureConstraints,
    ) -> Result<LocalStream, CaptureError> {
        Err(CaptureError::Unsupported {
            reason: "no display capture backend on this host".into(),
        })
    }
}

pub struct MediaTrack {
    kind: TrackKind,
    local: Arc<TrackLocalStaticSample>,
    stop: CancellationToken,
}

impl MediaTrack {
    pub fn new(kind: TrackKind, local: Arc<TrackLocalStaticSample>) -> Self {
        Self {
            kind,
            local,
            stop: CancellationToken::new(),
        }
    }

    /// VP8 sample track; the capture backend writes encoded frames into it.
    pub fn vp8(stream_id: &str) -> Self {
        let local = TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90_000,
                ..Default::default()
            },
            format!("video-{}", random_id()),
            stream_id.to_owned(),
        );
        Self::new(TrackKind::Video, Arc::new(local))
    }

    pub fn opus(stream_id: &str) -> Self {
        let local = TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48_000,
                channels: 2,
                ..Default::default()
            },
            format!("audio-{}", random_id()),
            stream_id.to_owned(),
        );
        Self::new(TrackKind::Audio, Arc::new(local))
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn local(&self) -> Arc<TrackLocalStaticSample> {
        self.local.clone()
    }

    /// Cancelled when the track is stopped; feeders watch it.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }
}

/// An inaudible Opus track so the answer always carries an audio m-line.
pub fn silent_audio_track(stream_id: &str) -> MediaTrack {
    let track = MediaTrack::opus(stream_id);
    let local = track.local();
    let stop = track.stop_token();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(OPUS_FRAME);
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    let sample = Sample {
                        data: Bytes::from_static(&OPUS_SILENCE_FRAME),
                        duration: OPUS_FRAME,
                        ..Default::default()
                    };
                    if let Err(e) = local.write_sample(&sample).await {
                        debug!(error = %e, "silent audio write failed");
                    }
                }
            }
        }
        debug!("silent audio feeder stopped");
    });
    track
}

pub struct LocalStream {
    id: String,
    tracks: Vec<MediaTrack>,
    ended: CancellationToken,
}

impl LocalStream {
    pub fn new(id: impl Into<String>, tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: id.into(),
            tracks,
            ended: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn has_audio(&self) -> bool {
        self.tracks.iter().any(|t| t.kind() == TrackKind::Audio)
    }

    /// Adds a silent audio track when the capture produced none.
    /// Returns true when one was synthesised.
    pub fn ensure_audio_track(&mut self) -> bool {
        if self.has_audio() {
            return false;
        }
        info!(stream = %self.id, "no audio captured, adding silent audio track");
        let track = silent_audio_track(&self.id);
        self.tracks.push(track);
        true
    }

    /// The capture backend cancels this when the user stops sharing.
    pub fn ended_token(&self) -> CancellationToken {
        self.ended.clone()
    }

    pub fn live_tracks(&self) -> usize {
        self.tracks.iter().filter(|t| !t.is_stopped()).count()
    }

    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
        debug!(stream = %self.id, "local tracks stopped");
    }
}

impl Drop for LocalStream {
    fn drop(&mut self) {
        // feeders only exit on their stop token
        if self.live_tracks() > 0 {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraints_follow_limits() {
        let c = CaptureConstraints::for_limits(&EncodingLimits {
            max_bitrate_bps: 1_000_000,
            max_framerate: 24,
        });
        assert_eq!((c.video.ideal_width, c.video.ideal_height), (1920, 1080));
        assert_eq!(c.video.ideal_frame_rate, 24);
        assert!(c.audio.echo_cancellation && c.audio.noise_suppression);

        let c = CaptureConstraints::for_limits(&EncodingLimits::default());
        assert_eq!(c.video.ideal_frame_rate, 30);
    }

    #[tokio::test]
    async fn video_only_stream_gets_silent_audio() {
        let mut stream = LocalStream::new("s", vec![MediaTrack::vp8("s")]);
        assert!(!stream.has_audio());
        assert!(stream.ensure_audio_track());
        assert!(stream.has_audio());
        assert!(!stream.ensure_audio_track());
        assert_eq!(stream.tracks().len(), 2);

        stream.stop();
        assert_eq!(stream.live_tracks(), 0);
    }

    #[tokio::test]
    async fn dropping_a_stream_stops_its_tracks() {
        let mut stream = LocalStream::new("s", vec![MediaTrack::vp8("s")]);
        stream.ensure_audio_track();
        let tokens: Vec<CancellationToken> =
            stream.tracks().iter().map(MediaTrack::stop_token).collect();

        drop(stream);
        assert!(tokens.iter().all(CancellationToken::is_cancelled));
    }
}
