//! H.264 encoder lifecycle on top of a pluggable native codec.
//!
//! ```text
//! CodecCatalog ──select──► Box<dyn Codec> ──Annex-B──► H264Encoder ──AVCC──► EncodedPacket
//!   (tiers)                 start/encode/flush          reframe + config
//! ```
//!
//! The encoder owns the GOP cadence: it asks the codec for an IDR on
//! the first frame and then every `CodecSettings::keyframe_interval`
//! frames. Codec output is rewritten by [`crate::media::h264`] before
//! anything leaves this module.

use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::config::StreamConfig;
use crate::error::VistreamError;
use crate::media::h264::{self, DecoderConfig};
use crate::media::types::RawFrame;

// ── Codec capability ─────────────────────────────────────────────

/// Low-latency settings passed to a codec on start.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CodecSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate_bps: u32,
    /// Frames between forced IDRs.
    pub keyframe_interval: u32,
}

/// Raw codec output for one input frame.
#[derive(Debug, Clone)]
pub struct CodecOutput {
    /// Annex-B access unit.
    pub annex_b: Vec<u8>,
    /// The codec reports this as an intra/IDR picture.
    pub keyframe: bool,
}

/// A native H.264 implementation.
///
/// Implementations must produce Annex-B output without B-frames and
/// expose their parameter sets through [`extradata`](Codec::extradata)
/// once started.
pub trait Codec: Send {
    /// Open the codec.
    fn start(&mut self, settings: &CodecSettings) -> Result<(), VistreamError>;

    /// Encode one frame. `Ok(None)` means the codec produced nothing
    /// for this input.
    fn encode(
        &mut self,
        frame: &RawFrame,
        force_keyframe: bool,
    ) -> Result<Option<CodecOutput>, VistreamError>;

    /// Signal end of stream and drain every buffered access unit.
    fn flush(&mut self) -> Result<Vec<CodecOutput>, VistreamError>;

    /// Parameter sets (Annex-B or AVCC) describing the stream.
    fn extradata(&self) -> &[u8];
}

/// Preference tier of a codec backend. Lower tiers win.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CodecTier {
    /// Tuned software encoder.
    Optimized,
    /// Alternate software encoder.
    Alternate,
    /// Generic fallback.
    Fallback,
}

/// Factory for one codec backend.
pub trait CodecProvider: Send + Sync {
    /// Backend name used in logs.
    fn name(&self) -> &'static str;

    fn tier(&self) -> CodecTier;

    /// Instantiate the codec, or `None` when the backend is unusable
    /// on this host.
    fn create(&self) -> Option<Box<dyn Codec>>;
}

// ── CodecCatalog ─────────────────────────────────────────────────

/// The set of codec backends an app may choose from.
#[derive(Clone, Default)]
pub struct CodecCatalog {
    providers: Vec<std::sync::Arc<dyn CodecProvider>>,
}

impl CodecCatalog {
    /// An empty catalog.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Every backend compiled into this build.
    pub fn builtin() -> Self {
        #[allow(unused_mut)]
        let mut catalog = Self::empty();
        #[cfg(feature = "h264")]
        catalog.register(crate::media::openh264_codec::OpenH264Provider);
        catalog
    }

    /// Add a backend.
    pub fn register<P: CodecProvider + 'static>(&mut self, provider: P) -> &mut Self {
        self.providers.push(std::sync::Arc::new(provider));
        self
    }

    /// Builder-style [`register`](Self::register).
    pub fn with<P: CodecProvider + 'static>(mut self, provider: P) -> Self {
        self.register(provider);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Open the best available backend.
    ///
    /// Providers are tried by tier, registration order breaking ties.
    /// A provider whose `create` or `start` fails is skipped.
    pub fn open(
        &self,
        settings: &CodecSettings,
    ) -> Result<(&'static str, Box<dyn Codec>), VistreamError> {
        let mut ordered: Vec<_> = self.providers.iter().collect();
        ordered.sort_by_key(|p| p.tier());

        let mut tried = Vec::new();
        for provider in ordered {
            tried.push(provider.name());
            let Some(mut codec) = provider.create() else {
                debug!(backend = provider.name(), "codec backend unavailable");
                continue;
            };
            match codec.start(settings) {
                Ok(()) => return Ok((provider.name(), codec)),
                Err(e) => warn!(backend = provider.name(), "codec failed to start: {e}"),
            }
        }

        Err(VistreamError::NoEncoderAvailable {
            tried: if tried.is_empty() {
                "none".into()
            } else {
                tried.join(", ")
            },
        })
    }
}

impl std::fmt::Debug for CodecCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.providers.iter().map(|p| p.name()))
            .finish()
    }
}

// ── EncodedPacket ────────────────────────────────────────────────

/// One compressed access unit ready for broadcast.
#[derive(Debug, Clone)]
pub struct EncodedPacket {
    /// 4-byte length-prefixed NAL units, parameter sets removed.
    pub data: Bytes,
    pub keyframe: bool,
    /// Milliseconds since the encoder started.
    pub timestamp_ms: u64,
}

// ── EncoderState ─────────────────────────────────────────────────

/// Lifecycle of an [`H264Encoder`].
///
/// ```text
///  Uninitialized ──start──► Running ──stop──► Stopped
///        └──────────────────stop──────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncoderState {
    #[default]
    Uninitialized,
    Running,
    Stopped,
}

impl std::fmt::Display for EncoderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "Uninitialized"),
            Self::Running => write!(f, "Running"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

// ── H264Encoder ──────────────────────────────────────────────────

/// Per-app encoder.
///
/// Not `Sync`: the capture loop is its only caller and never calls
/// [`encode`](Self::encode) concurrently.
pub struct H264Encoder {
    catalog: CodecCatalog,
    state: EncoderState,
    codec: Option<Box<dyn Codec>>,
    backend: Option<&'static str>,
    decoder_config: Option<DecoderConfig>,
    settings: Option<CodecSettings>,
    started_at: Option<Instant>,
    frames_since_keyframe: u32,
    last_keyframe: bool,
    last_timestamp_ms: u64,
}

impl H264Encoder {
    pub fn new(catalog: CodecCatalog) -> Self {
        Self {
            catalog,
            state: EncoderState::Uninitialized,
            codec: None,
            backend: None,
            decoder_config: None,
            settings: None,
            started_at: None,
            frames_since_keyframe: 0,
            last_keyframe: false,
            last_timestamp_ms: 0,
        }
    }

    pub fn state(&self) -> EncoderState {
        self.state
    }

    /// Name of the selected backend once running.
    pub fn backend(&self) -> Option<&'static str> {
        self.backend
    }

    /// Derived decoder configuration record, available once running.
    pub fn decoder_config(&self) -> Option<&DecoderConfig> {
        self.decoder_config.as_ref()
    }

    /// Keyframe flag of the most recent packet.
    pub fn last_keyframe(&self) -> bool {
        self.last_keyframe
    }

    /// Timestamp of the most recent packet, in ms since start.
    pub fn last_timestamp_ms(&self) -> u64 {
        self.last_timestamp_ms
    }

    /// Open the best available codec for `config`.
    ///
    /// Valid from: `Uninitialized`.
    pub fn start(&mut self, config: &StreamConfig) -> Result<&DecoderConfig, VistreamError> {
        if self.state != EncoderState::Uninitialized {
            return Err(VistreamError::InvalidState(match self.state {
                EncoderState::Running => "already running",
                _ => "stopped",
            }));
        }
        config.validate()?;

        let settings = CodecSettings {
            width: config.width,
            height: config.height,
            fps: config.fps,
            bitrate_bps: config.bitrate_bps,
            keyframe_interval: config.keyframe_interval(),
        };
        let (backend, codec) = self.catalog.open(&settings)?;

        let decoder_config = DecoderConfig::from_extradata(codec.extradata());
        if decoder_config.degraded {
            warn!(
                backend,
                "codec extradata lacks SPS/PPS; forwarding it raw, viewers may not configure"
            );
        }
        info!(
            backend,
            width = settings.width,
            height = settings.height,
            fps = settings.fps,
            "H.264 encoder started"
        );

        self.codec = Some(codec);
        self.backend = Some(backend);
        self.settings = Some(settings);
        self.started_at = Some(Instant::now());
        self.frames_since_keyframe = 0;
        self.state = EncoderState::Running;
        Ok(self.decoder_config.insert(decoder_config))
    }

    /// Encode one frame.
    ///
    /// `Ok(None)` means no packet this tick.
    pub fn encode(&mut self, frame: &RawFrame) -> Result<Option<EncodedPacket>, VistreamError> {
        let (Some(codec), Some(settings), Some(started_at)) =
            (self.codec.as_mut(), self.settings.as_ref(), self.started_at)
        else {
            return Err(VistreamError::InvalidState(match self.state {
                EncoderState::Stopped => "stopped",
                _ => "not started",
            }));
        };

        if frame.width != settings.width || frame.height != settings.height {
            return Err(VistreamError::InvalidFrame {
                expected: RawFrame::expected_len(settings.width, settings.height, frame.format),
                actual: frame.data.len(),
            });
        }
        frame.validate()?;

        let force_keyframe = self.frames_since_keyframe == 0
            || self.frames_since_keyframe >= settings.keyframe_interval;

        let Some(output) = codec.encode(frame, force_keyframe)? else {
            return Ok(None);
        };

        let data = h264::annex_b_to_length_prefixed(&output.annex_b);
        if data.is_empty() {
            return Ok(None);
        }

        let keyframe = output.keyframe || h264::contains_keyframe(&output.annex_b);
        let timestamp_ms = started_at.elapsed().as_millis() as u64;

        self.frames_since_keyframe = if keyframe {
            1
        } else {
            self.frames_since_keyframe.saturating_add(1)
        };
        self.last_keyframe = keyframe;
        self.last_timestamp_ms = timestamp_ms;

        Ok(Some(EncodedPacket {
            data,
            keyframe,
            timestamp_ms,
        }))
    }

    /// Drain the codec and release it. Idempotent.
    ///
    /// Returns the number of access units drained.
    pub fn stop(&mut self) -> usize {
        if self.state == EncoderState::Stopped {
            return 0;
        }
        self.state = EncoderState::Stopped;

        let Some(mut codec) = self.codec.take() else {
            return 0;
        };
        let drained = match codec.flush() {
            Ok(rest) => rest.len(),
            Err(e) => {
                warn!(backend = ?self.backend, "codec flush failed: {e}");
                0
            }
        };
        debug!(backend = ?self.backend, drained, "H.264 encoder stopped");
        drained
    }
}

impl Drop for H264Encoder {
    fn drop(&mut self) {
        self.stop();
    }
}

// ── Tests ────────────────────────────────────────────────────────
