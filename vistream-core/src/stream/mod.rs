//! # stream: capture, fan-out and wire format
//!
//! ```text
//! Surface ──capture──► CaptureLoop ──encode──► H264Encoder
//!                          │
//!                          ▼
//!                    BroadcastHub ──DeliveryPool──► MessageSink × N
//! ```
//!
//! | Module     | Purpose                                          |
//! |------------|--------------------------------------------------|
//! | `capture`  | Periodic tick with drop-on-overlap guard          |
//! | `hub`      | Session map, keyframe cache, per-session guard    |
//! | `pool`     | Tracked tasks for per-session writes              |
//! | `protocol` | Binary frame/config messages, JSON control        |

pub mod capture;
pub mod hub;
pub mod pool;
pub mod protocol;

// ── Re-exports ───────────────────────────────────────────────────

pub use capture::{CaptureLoop, CaptureStatsSnapshot, TickOutcome};
pub use hub::{BroadcastHub, HubStatsSnapshot, MessageSink, SessionId};
pub use pool::DeliveryPool;
pub use protocol::{BinaryMessage, ControlMessage, LockStatus, Outbound};
