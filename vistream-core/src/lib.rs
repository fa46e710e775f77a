//! # vistream-core
//!
//! Streams in-process application surfaces to browser viewers as
//! H.264 over WebSocket.
//!
//! This crate contains:
//! - **Media**: `H264Encoder` over pluggable `Codec` backends, Annex-B to
//!   AVCC reframing and the `DecoderConfig` record
//! - **Stream**: `CaptureLoop`, the `BroadcastHub` fan-out with keyframe
//!   cache, `DeliveryPool` and the binary/JSON wire `protocol`
//! - **Input**: the `Surface` seam and `RemoteInputInjector`
//! - **State**: `ControlLock`, the single-controller arbitration
//! - **App**: `AppInstance`, `AppRegistry` and `SessionRouter`
//! - **Error**: `VistreamError`, a `thiserror`-based error hierarchy

pub mod app;
pub mod config;
pub mod error;
pub mod input;
pub mod media;
pub mod state;
pub mod stream;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use app::{
    AppInfo, AppInstance, AppRegistry, Dispatch, RoutedSession, SessionRouter,
    UNKNOWN_APP_CLOSE_CODE,
};
pub use config::StreamConfig;
pub use error::{ErrorKind, VistreamError};
pub use input::{Element, ElementId, InputEvent, MouseButton, RemoteInputInjector, Surface};
pub use media::{
    Codec, CodecCatalog, CodecProvider, CodecTier, DecoderConfig, EncodedPacket, EncoderState,
    H264Encoder, PixelFormat, RawFrame,
};
pub use state::ControlLock;
pub use stream::{
    BroadcastHub, CaptureLoop, ControlMessage, DeliveryPool, LockStatus, MessageSink, Outbound,
    SessionId, TickOutcome,
};
