//! Viewer wire protocol.
//!
//! Binary messages carry video, text messages carry JSON control.
//!
//! ```text
//! config:  FF | decoder configuration record
//! frame:   keyframe u8 | timestamp_ms u32 BE | AVCC access unit
//! ```
//!
//! Inbound JSON is tagged by `type`: `click {x, y}`, `key {key}`,
//! `lock`, `unlock`. Outbound JSON is `lockStatus {locked, you}`.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::VistreamError;
use crate::media::{DecoderConfig, EncodedPacket};

/// Leading byte of a configuration message.
pub const CONFIG_TAG: u8 = 0xFF;

/// Bytes before the access unit in a frame message.
pub const FRAME_HEADER_LEN: usize = 5;

// ── Outbound ─────────────────────────────────────────────────────

/// A message queued for one session's transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Binary(Bytes),
    Text(String),
}

impl Outbound {
    pub fn len(&self) -> usize {
        match self {
            Outbound::Binary(b) => b.len(),
            Outbound::Text(t) => t.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Binary messages ──────────────────────────────────────────────

/// Build the configuration message sent once to each new session.
pub fn config_message(config: &DecoderConfig) -> Bytes {
    let mut out = BytesMut::with_capacity(1 + config.record.len());
    out.put_u8(CONFIG_TAG);
    out.put_slice(&config.record);
    out.freeze()
}

/// Build the frame message shared by every session.
///
/// The timestamp is truncated to its low 32 bits.
pub fn frame_message(packet: &EncodedPacket) -> Bytes {
    let mut out = BytesMut::with_capacity(FRAME_HEADER_LEN + packet.data.len());
    out.put_u8(u8::from(packet.keyframe));
    out.put_u32(packet.timestamp_ms as u32);
    out.put_slice(&packet.data);
    out.freeze()
}

/// A binary message as a viewer decodes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinaryMessage {
    Config(Bytes),
    Frame {
        keyframe: bool,
        timestamp_ms: u32,
        data: Bytes,
    },
}

impl BinaryMessage {
    /// Parse a binary message.
    pub fn parse(msg: &Bytes) -> Result<Self, VistreamError> {
        match msg.first() {
            None => Err(VistreamError::MalformedMessage("empty binary message".into())),
            Some(&CONFIG_TAG) => Ok(BinaryMessage::Config(msg.slice(1..))),
            Some(&flag) => {
                if msg.len() < FRAME_HEADER_LEN {
                    return Err(VistreamError::MalformedMessage(format!(
                        "frame message of {} bytes",
                        msg.len()
                    )));
                }
                Ok(BinaryMessage::Frame {
                    keyframe: flag & 0x01 == 1,
                    timestamp_ms: u32::from_be_bytes([msg[1], msg[2], msg[3], msg[4]]),
                    data: msg.slice(FRAME_HEADER_LEN..),
                })
            }
        }
    }
}

// ── Control messages ─────────────────────────────────────────────

/// A control message received from a viewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Click { x: i32, y: i32 },
    /// First character of the `key` field.
    Key(char),
    Lock,
    Unlock,
    /// A well-formed message whose `type` is not understood.
    Unknown(String),
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Inbound {
    Click { x: i32, y: i32 },
    Key { key: String },
    Lock,
    Unlock,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
}

impl ControlMessage {
    /// Parse a JSON control message.
    ///
    /// Unknown types parse to [`ControlMessage::Unknown`]; missing or
    /// mistyped fields are a [`VistreamError::MalformedMessage`].
    pub fn parse(text: &str) -> Result<Self, VistreamError> {
        match serde_json::from_str::<Inbound>(text) {
            Ok(Inbound::Click { x, y }) => Ok(ControlMessage::Click { x, y }),
            Ok(Inbound::Key { key }) => key.chars().next().map(ControlMessage::Key).ok_or_else(
                || VistreamError::MalformedMessage("key message with empty key".into()),
            ),
            Ok(Inbound::Lock) => Ok(ControlMessage::Lock),
            Ok(Inbound::Unlock) => Ok(ControlMessage::Unlock),
            Err(e) => {
                let envelope: Envelope = serde_json::from_str(text)
                    .map_err(|_| VistreamError::MalformedMessage(e.to_string()))?;
                match envelope.kind.as_str() {
                    "click" | "key" | "lock" | "unlock" => {
                        Err(VistreamError::MalformedMessage(e.to_string()))
                    }
                    _ => Ok(ControlMessage::Unknown(envelope.kind)),
                }
            }
        }
    }
}

/// Current lock state as seen by one recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename = "lockStatus")]
pub struct LockStatus {
    pub locked: bool,
    /// The recipient holds the lock.
    pub you: bool,
}

impl LockStatus {
    pub fn to_json(&self) -> Result<String, VistreamError> {
        Ok(serde_json::to_string(self)?)
    }
}
