//! Per-app capture cadence.
//!
//! ```text
//! interval ──tick──► spawn_blocking(CaptureLoop::tick)
//!                        │ no sessions?      → Idle
//!                        │ capturing already → Skipped
//!                        ▼
//!                    surface.capture ─► encoder.encode ─► hub.broadcast_frame
//! ```
//!
//! The `capturing` flag is the only thing preventing overlap: a tick
//! that finds it set is dropped, never queued. The timer itself never
//! waits for a tick to finish.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use crate::error::VistreamError;
use crate::input::Surface;
use crate::media::{H264Encoder, RawFrame};
use crate::stream::hub::BroadcastHub;

// ── TickOutcome ──────────────────────────────────────────────────

/// What one capture tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nobody is watching; no work done.
    Idle,
    /// A previous tick still holds the capture flag.
    Skipped,
    /// The encoder produced nothing this tick.
    NoPacket,
    /// A packet was handed to the hub.
    Broadcast { keyframe: bool, deliveries: usize },
    /// Capture or encode failed; logged.
    Failed,
    /// Shutdown began; nothing delivered.
    Cancelled,
}

#[derive(Debug, Default)]
struct CaptureStats {
    idle: AtomicU64,
    skipped: AtomicU64,
    empty: AtomicU64,
    broadcast: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of a capture loop's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStatsSnapshot {
    pub idle: u64,
    pub skipped: u64,
    pub empty: u64,
    pub broadcast: u64,
    pub failed: u64,
}

/// Releases the capturing flag on every exit path.
struct Capturing<'a>(&'a AtomicBool);

impl Drop for Capturing<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ── CaptureLoop ──────────────────────────────────────────────────

/// Drives surface → encoder → hub for one app.
pub struct CaptureLoop {
    app_id: String,
    surface: Arc<dyn Surface>,
    encoder: Mutex<H264Encoder>,
    buffer: Mutex<RawFrame>,
    hub: Arc<BroadcastHub>,
    capturing: AtomicBool,
    cancel: CancellationToken,
    stats: CaptureStats,
}

impl CaptureLoop {
    pub fn new(
        app_id: impl Into<String>,
        surface: Arc<dyn Surface>,
        encoder: H264Encoder,
        hub: Arc<BroadcastHub>,
        cancel: CancellationToken,
    ) -> Self {
        let (width, height) = surface.size();
        Self {
            app_id: app_id.into(),
            surface,
            encoder: Mutex::new(encoder),
            buffer: Mutex::new(RawFrame::blank(width, height)),
            hub,
            capturing: AtomicBool::new(false),
            cancel,
            stats: CaptureStats::default(),
        }
    }

    pub fn encoder(&self) -> &Mutex<H264Encoder> {
        &self.encoder
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::Acquire)
    }

    /// Run one tick on the calling thread. Blocking.
    pub fn tick(&self) -> TickOutcome {
        if !self.hub.has_sessions() {
            self.stats.idle.fetch_add(1, Ordering::Relaxed);
            return TickOutcome::Idle;
        }
        if self
            .capturing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.stats.skipped.fetch_add(1, Ordering::Relaxed);
            trace!(app = %self.app_id, "previous tick still running, skipped");
            return TickOutcome::Skipped;
        }
        let _capturing = Capturing(&self.capturing);

        match self.capture_and_encode() {
            Ok(TickOutcome::NoPacket) => {
                self.stats.empty.fetch_add(1, Ordering::Relaxed);
                TickOutcome::NoPacket
            }
            Ok(outcome) => {
                if matches!(outcome, TickOutcome::Broadcast { .. }) {
                    self.stats.broadcast.fetch_add(1, Ordering::Relaxed);
                }
                outcome
            }
            Err(VistreamError::Cancelled) => {
                debug!(app = %self.app_id, "tick abandoned: shutting down");
                TickOutcome::Cancelled
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                error!(app = %self.app_id, "capture tick failed: {e}");
                TickOutcome::Failed
            }
        }
    }

    fn capture_and_encode(&self) -> Result<TickOutcome, VistreamError> {
        if self.cancel.is_cancelled() {
            return Err(VistreamError::Cancelled);
        }

        let packet = {
            let mut frame = self.buffer.lock();
            self.surface.capture(&mut frame)?;
            // The surface may have blocked past shutdown.
            if self.cancel.is_cancelled() {
                return Err(VistreamError::Cancelled);
            }
            self.encoder.lock().encode(&frame)?
        };
        let Some(packet) = packet else {
            return Ok(TickOutcome::NoPacket);
        };

        if self.cancel.is_cancelled() {
            return Err(VistreamError::Cancelled);
        }
        let deliveries = self.hub.broadcast_frame(&packet);
        Ok(TickOutcome::Broadcast {
            keyframe: packet.keyframe,
            deliveries,
        })
    }

    /// Start the periodic timer.
    ///
    /// Each tick runs on the blocking pool; the timer does not await it.
    /// The task ends when the cancellation token fires.
    pub fn spawn_timer(self: &Arc<Self>, initial_delay: Duration, period: Duration) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + initial_delay, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = this.cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let tick = Arc::clone(&this);
                        tokio::task::spawn_blocking(move || tick.tick());
                    }
                }
            }
            debug!(app = %this.app_id, "capture timer stopped");
        })
    }

    /// Wait up to `grace` for an in-flight tick to release the flag.
    pub async fn wait_idle(&self, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;
        while self.is_capturing() {
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        true
    }

    pub fn stats(&self) -> CaptureStatsSnapshot {
        CaptureStatsSnapshot {
            idle: self.stats.idle.load(Ordering::Relaxed),
            skipped: self.stats.skipped.load(Ordering::Relaxed),
            empty: self.stats.empty.load(Ordering::Relaxed),
            broadcast: self.stats.broadcast.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
