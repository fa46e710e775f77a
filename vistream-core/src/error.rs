//! Domain-specific error types for the streaming core.
//!
//! All fallible operations return `Result<T, VistreamError>`.
//! Every variant maps onto one [`ErrorKind`] so callers can decide
//! whether a failure is fatal for the app, for one tick, or for one
//! session only.

use thiserror::Error;

// ── ErrorKind ───────────────────────────────────────────────────

/// Coarse classification of a [`VistreamError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The app cannot start (no usable encoder, bad dimensions).
    Configuration,
    /// One capture tick failed; later ticks are unaffected.
    EncodeTransient,
    /// Delivery to one session failed.
    Transport,
    /// Unknown app id or a malformed control message.
    Protocol,
    /// Cooperative shutdown interrupted the work.
    Cancellation,
}

/// The canonical error type for the streaming core.
#[derive(Debug, Error)]
pub enum VistreamError {
    // ── Configuration Errors ─────────────────────────────────────
    /// None of the registered H.264 backends could be opened.
    #[error("no usable H.264 encoder (tried: {tried})")]
    NoEncoderAvailable { tried: String },

    /// A stream parameter is out of range.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    // ── Media Errors ─────────────────────────────────────────────
    /// The codec rejected a frame.
    #[error("encode failed: {0}")]
    Encode(String),

    /// A captured frame does not match the encoder's geometry.
    #[error("invalid frame: expected {expected} bytes, got {actual}")]
    InvalidFrame { expected: usize, actual: usize },

    /// An encoder operation was attempted in the wrong lifecycle state.
    #[error("encoder is {0}")]
    InvalidState(&'static str),

    // ── Transport Errors ─────────────────────────────────────────
    /// Writing to a session's channel failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The IO layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    // ── Protocol Errors ──────────────────────────────────────────
    /// A connection addressed an app id that is not in the catalog.
    #[error("unknown app id: {0:?}")]
    UnknownApp(String),

    /// A control message could not be interpreted.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    // ── Lifecycle Errors ─────────────────────────────────────────
    /// The work was abandoned because shutdown began.
    #[error("cancelled")]
    Cancelled,

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

impl VistreamError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoEncoderAvailable { .. } | Self::Configuration(_) => ErrorKind::Configuration,
            Self::Encode(_)
            | Self::InvalidFrame { .. }
            | Self::InvalidState(_)
            | Self::Other(_) => ErrorKind::EncodeTransient,
            Self::Transport(_) | Self::Connection(_) => ErrorKind::Transport,
            Self::UnknownApp(_) | Self::MalformedMessage(_) | Self::Json(_) => ErrorKind::Protocol,
            Self::Cancelled => ErrorKind::Cancellation,
        }
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for VistreamError {
    fn from(s: String) -> Self {
        VistreamError::Other(s)
    }
}

impl From<&str> for VistreamError {
    fn from(s: &str) -> Self {
        VistreamError::Other(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = VistreamError::UnknownApp("42".into());
        assert!(e.to_string().contains("42"));

        let e = VistreamError::InvalidFrame {
            expected: 1000,
            actual: 500,
        };
        assert!(e.to_string().contains("1000"));
        assert!(e.to_string().contains("500"));
    }

    #[test]
    fn from_string() {
        let e: VistreamError = "something broke".into();
        assert!(matches!(e, VistreamError::Other(_)));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: VistreamError = io_err.into();
        assert!(matches!(e, VistreamError::Connection(_)));
        assert_eq!(e.kind(), ErrorKind::Transport);
    }

    #[test]
    fn kinds_follow_failure_scope() {
        let fatal = VistreamError::NoEncoderAvailable {
            tried: "openh264".into(),
        };
        assert_eq!(fatal.kind(), ErrorKind::Configuration);
        assert_eq!(
            VistreamError::Encode("bad".into()).kind(),
            ErrorKind::EncodeTransient
        );
        assert_eq!(
            VistreamError::MalformedMessage("x".into()).kind(),
            ErrorKind::Protocol
        );
        assert_eq!(VistreamError::Cancelled.kind(), ErrorKind::Cancellation);
    }
}
