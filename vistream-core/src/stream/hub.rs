//! Per-app fan-out of encoded frames to viewer sessions.
//!
//! ```text
//!                    ┌── slot(1): in_flight? ──► pool.spawn(send) ──► sink 1
//! broadcast_frame ───┼── slot(2): busy → drop
//!    │               └── slot(3): in_flight? ──► pool.spawn(send) ──► sink 3
//!    └─ keyframe? ──► cache (replaced, never merged)
//! ```
//!
//! A session whose previous write has not finished misses the frame
//! instead of queueing it: viewers always decode the freshest picture
//! the hub has, and the next keyframe resynchronises anyone who lost
//! a reference frame.
//!
//! New sessions are bootstrapped with the configuration message and the
//! cached keyframe. The in-flight guard stays set during that replay, so
//! no live frame reaches the session before its bootstrap.
//!
//! Control messages are never dropped. Each session queues them in an
//! outbox drained by at most one task at a time, so they arrive in the
//! order they were sent.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use crate::error::VistreamError;
use crate::media::{DecoderConfig, EncodedPacket};
use crate::stream::pool::DeliveryPool;
use crate::stream::protocol::{self, Outbound};

/// Identity of one viewer connection. Never zero.
pub type SessionId = u64;

// ── MessageSink ──────────────────────────────────────────────────

/// The send half of a viewer's transport.
///
/// The hub never calls `send` concurrently for the same session.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send(&self, message: Outbound) -> Result<(), VistreamError>;
}

// ── Session slot ─────────────────────────────────────────────────

struct SessionSlot {
    id: SessionId,
    sink: Arc<dyn MessageSink>,
    /// Set while a frame (or the bootstrap replay) is being written.
    in_flight: AtomicBool,
    /// Serialises physical writes to `sink`.
    send_token: tokio::sync::Mutex<()>,
    outbox: Mutex<Outbox>,
}

/// Pending control messages of one session.
#[derive(Default)]
struct Outbox {
    queue: VecDeque<Outbound>,
    /// A drain task owns the queue until it finds it empty.
    draining: bool,
}

impl SessionSlot {
    fn new(id: SessionId, sink: Arc<dyn MessageSink>) -> Self {
        Self {
            id,
            sink,
            in_flight: AtomicBool::new(true),
            send_token: tokio::sync::Mutex::new(()),
            outbox: Mutex::new(Outbox::default()),
        }
    }

    async fn deliver(&self, message: Outbound) -> Result<(), VistreamError> {
        let _token = self.send_token.lock().await;
        self.sink.send(message).await
    }

    /// Queue a control message. Returns `true` if the caller must start
    /// a drain task.
    fn enqueue(&self, message: Outbound) -> bool {
        let mut outbox = self.outbox.lock();
        outbox.queue.push_back(message);
        !std::mem::replace(&mut outbox.draining, true)
    }

    /// Next queued message, or `None` after releasing the drain role.
    fn next_queued(&self) -> Option<Outbound> {
        let mut outbox = self.outbox.lock();
        let next = outbox.queue.pop_front();
        if next.is_none() {
            outbox.draining = false;
        }
        next
    }
}

/// Clears an in-flight flag when dropped, including on panic.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn same_buffer(a: &Bytes, b: &Bytes) -> bool {
    a.as_ptr() == b.as_ptr() && a.len() == b.len()
}

// ── HubStats ─────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct HubStats {
    frames_broadcast: AtomicU64,
    deliveries_attempted: AtomicU64,
    dropped_busy: AtomicU64,
    delivery_failures: AtomicU64,
    keyframe_replacements: AtomicU64,
}

/// Point-in-time copy of a hub's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStatsSnapshot {
    /// Frames that reached at least the fan-out stage.
    pub frames_broadcast: u64,
    /// Frame writes dispatched to sessions.
    pub deliveries_attempted: u64,
    /// Frame writes skipped because the session was busy.
    pub dropped_busy: u64,
    /// Writes (frames, bootstrap, control) that failed.
    pub delivery_failures: u64,
    pub keyframe_replacements: u64,
}

// ── BroadcastHub ─────────────────────────────────────────────────

/// Fan-out hub owned by one app.
pub struct BroadcastHub {
    app_id: String,
    sessions: RwLock<HashMap<SessionId, Arc<SessionSlot>>>,
    config_message: OnceLock<Bytes>,
    keyframe_message: Arc<RwLock<Option<Bytes>>>,
    pool: DeliveryPool,
    stats: Arc<HubStats>,
    closed: AtomicBool,
}

impl BroadcastHub {
    pub fn new(app_id: impl Into<String>, pool: DeliveryPool) -> Self {
        Self {
            app_id: app_id.into(),
            sessions: RwLock::new(HashMap::new()),
            config_message: OnceLock::new(),
            keyframe_message: Arc::new(RwLock::new(None)),
            pool,
            stats: Arc::new(HubStats::default()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn pool(&self) -> &DeliveryPool {
        &self.pool
    }

    /// Install the configuration message. Only the first call wins.
    pub fn set_decoder_config(&self, config: &DecoderConfig) -> bool {
        if config.record.is_empty() {
            warn!(app = %self.app_id, "empty decoder configuration; new viewers get none");
            return false;
        }
        self.config_message
            .set(protocol::config_message(config))
            .is_ok()
    }

    /// Cached configuration message, `FF`-tagged.
    pub fn config_message(&self) -> Option<Bytes> {
        self.config_message.get().cloned()
    }

    /// Frame message of the most recent keyframe broadcast.
    pub fn cached_keyframe(&self) -> Option<Bytes> {
        self.keyframe_message.read().clone()
    }

    // ── Sessions ─────────────────────────────────────────────────

    /// Register a session and replay the cached configuration and
    /// keyframe to it.
    pub fn add_session(&self, id: SessionId, sink: Arc<dyn MessageSink>) {
        let slot = Arc::new(SessionSlot::new(id, sink));
        if self.sessions.write().insert(id, Arc::clone(&slot)).is_some() {
            warn!(app = %self.app_id, session = id, "session id reused; previous slot replaced");
        }

        let config = self.config_message();
        let keyframes = Arc::clone(&self.keyframe_message);
        let stats = Arc::clone(&self.stats);
        let app = self.app_id.clone();

        self.pool.spawn(async move {
            let _guard = InFlight(&slot.in_flight);

            if let Some(config) = config {
                if let Err(e) = slot.deliver(Outbound::Binary(config)).await {
                    stats.delivery_failures.fetch_add(1, Ordering::Relaxed);
                    debug!(app = %app, session = slot.id, "bootstrap config failed: {e}");
                    return;
                }
            }

            // Re-check after each write: a fresher keyframe may have
            // replaced the cache while the previous one was in transit.
            let mut sent: Option<Bytes> = None;
            loop {
                let current = keyframes.read().clone();
                let Some(keyframe) = current else { break };
                if sent.as_ref().is_some_and(|s| same_buffer(s, &keyframe)) {
                    break;
                }
                if let Err(e) = slot.deliver(Outbound::Binary(keyframe.clone())).await {
                    stats.delivery_failures.fetch_add(1, Ordering::Relaxed);
                    debug!(app = %app, session = slot.id, "bootstrap keyframe failed: {e}");
                    return;
                }
                sent = Some(keyframe);
            }
            trace!(app = %app, session = slot.id, "session bootstrapped");
        });
    }

    /// Unregister a session. Returns whether it was registered.
    pub fn remove_session(&self, id: SessionId) -> bool {
        self.sessions.write().remove(&id).is_some()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn has_sessions(&self) -> bool {
        !self.sessions.read().is_empty()
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self.sessions.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    // ── Delivery ─────────────────────────────────────────────────

    /// Fan one packet out to every idle session.
    ///
    /// Returns the number of deliveries dispatched.
    pub fn broadcast_frame(&self, packet: &EncodedPacket) -> usize {
        if self.closed.load(Ordering::Acquire) {
            return 0;
        }
        let targets: Vec<Arc<SessionSlot>> = self.sessions.read().values().cloned().collect();
        if targets.is_empty() {
            return 0;
        }

        let message = protocol::frame_message(packet);
        self.stats.frames_broadcast.fetch_add(1, Ordering::Relaxed);
        if packet.keyframe {
            *self.keyframe_message.write() = Some(message.clone());
            self.stats
                .keyframe_replacements
                .fetch_add(1, Ordering::Relaxed);
        }

        let mut dispatched = 0;
        for slot in targets {
            if slot
                .in_flight
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                self.stats.dropped_busy.fetch_add(1, Ordering::Relaxed);
                trace!(app = %self.app_id, session = slot.id, "session busy, frame dropped");
                continue;
            }

            dispatched += 1;
            self.stats
                .deliveries_attempted
                .fetch_add(1, Ordering::Relaxed);

            let message = message.clone();
            let stats = Arc::clone(&self.stats);
            let app = self.app_id.clone();
            self.pool.spawn(async move {
                let _guard = InFlight(&slot.in_flight);
                if let Err(e) = slot.deliver(Outbound::Binary(message)).await {
                    stats.delivery_failures.fetch_add(1, Ordering::Relaxed);
                    debug!(app = %app, session = slot.id, "frame delivery failed: {e}");
                }
            });
        }
        dispatched
    }

    /// Send a control message to one session, bypassing the in-flight
    /// guard. Messages to the same session keep their order.
    ///
    /// Returns `false` if the session is not registered.
    pub fn send_to(&self, id: SessionId, message: Outbound) -> bool {
        let Some(slot) = self.sessions.read().get(&id).cloned() else {
            return false;
        };
        if !slot.enqueue(message) {
            return true;
        }
        let stats = Arc::clone(&self.stats);
        let app = self.app_id.clone();
        self.pool.spawn(async move {
            while let Some(message) = slot.next_queued() {
                if let Err(e) = slot.deliver(message).await {
                    stats.delivery_failures.fetch_add(1, Ordering::Relaxed);
                    debug!(app = %app, session = slot.id, "control delivery failed: {e}");
                }
            }
        });
        true
    }

    /// Stop accepting frames. Control messages still go through.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> HubStatsSnapshot {
        HubStatsSnapshot {
            frames_broadcast: self.stats.frames_broadcast.load(Ordering::Relaxed),
            deliveries_attempted: self.stats.deliveries_attempted.load(Ordering::Relaxed),
            dropped_busy: self.stats.dropped_busy.load(Ordering::Relaxed),
            delivery_failures: self.stats.delivery_failures.load(Ordering::Relaxed),
            keyframe_replacements: self.stats.keyframe_replacements.load(Ordering::Relaxed),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Semaphore;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSink {
        received: Mutex<Vec<Outbound>>,
        delay: Option<Duration>,
        fail: bool,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    impl RecordingSink {
        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay: Some(delay),
                ..Self::default()
            })
        }

        fn messages(&self) -> Vec<Outbound> {
            self.received.lock().clone()
        }
    }

    #[async_trait]
    impl MessageSink for RecordingSink {
        async fn send(&self, message: Outbound) -> Result<(), VistreamError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);
            if self.fail {
                return Err(VistreamError::Transport("peer went away".into()));
            }
            self.received.lock().push(message);
            Ok(())
        }
    }

    fn hub() -> BroadcastHub {
        BroadcastHub::new("1", DeliveryPool::current())
    }

    fn packet(keyframe: bool, ts: u64) -> EncodedPacket {
        EncodedPacket {
            data: Bytes::from(vec![0, 0, 0, 2, if keyframe { 0x65 } else { 0x41 }, ts as u8]),
            keyframe,
            timestamp_ms: ts,
        }
    }

    fn config() -> DecoderConfig {
        DecoderConfig {
            record: Bytes::from_static(&[0x01, 0x42, 0x00, 0x1E, 0xFF, 0xE1]),
            degraded: false,
        }
    }

    async fn settle(hub: &BroadcastHub) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while hub.pool().in_flight() > 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("deliveries did not settle");
    }

    // ── Fan-out ──────────────────────────────────────────────────

    #[tokio::test]
    async fn broadcast_without_sessions_is_noop() {
        let hub = hub();
        assert_eq!(hub.broadcast_frame(&packet(true, 1)), 0);
        assert!(hub.cached_keyframe().is_none());
        assert_eq!(hub.stats().frames_broadcast, 0);
    }

    #[tokio::test]
    async fn keyframe_reaches_every_idle_session_once() {
        let hub = hub();
        let sinks: Vec<Arc<RecordingSink>> = (0..3).map(|_| Arc::default()).collect();
        for (i, sink) in sinks.iter().enumerate() {
            hub.add_session(i as u64 + 1, Arc::clone(sink) as Arc<dyn MessageSink>);
        }
        settle(&hub).await;

        let key = packet(true, 10);
        assert_eq!(hub.broadcast_frame(&key), 3);
        settle(&hub).await;

        let stats = hub.stats();
        assert!(stats.deliveries_attempted <= 3);
        assert_eq!(stats.keyframe_replacements, 1);
        let expected = Outbound::Binary(protocol::frame_message(&key));
        for sink in &sinks {
            assert_eq!(sink.messages(), vec![expected.clone()]);
        }
    }

    #[tokio::test]
    async fn cached_keyframe_is_most_recent() {
        let hub = hub();
        hub.add_session(1, Arc::new(RecordingSink::default()));
        settle(&hub).await;

        hub.broadcast_frame(&packet(true, 1));
        settle(&hub).await;
        hub.broadcast_frame(&packet(false, 2));
        settle(&hub).await;
        hub.broadcast_frame(&packet(true, 3));
        settle(&hub).await;

        assert_eq!(
            hub.cached_keyframe(),
            Some(protocol::frame_message(&packet(true, 3)))
        );
        assert_eq!(hub.stats().keyframe_replacements, 2);
    }

    // ── Late joiners ─────────────────────────────────────────────

    #[tokio::test]
    async fn late_joiner_gets_config_then_keyframe() {
        let hub = hub();
        assert!(hub.set_decoder_config(&config()));
        hub.add_session(1, Arc::new(RecordingSink::default()));
        settle(&hub).await;

        let key = packet(true, 5);
        hub.broadcast_frame(&key);
        settle(&hub).await;
        hub.broadcast_frame(&packet(false, 6));
        settle(&hub).await;

        let late = Arc::new(RecordingSink::default());
        hub.add_session(2, Arc::clone(&late) as Arc<dyn MessageSink>);
        // Live frame racing the bootstrap must not overtake it.
        hub.broadcast_frame(&packet(false, 7));
        settle(&hub).await;

        let got = late.messages();
        assert_eq!(
            &got[..2],
            &[
                Outbound::Binary(protocol::config_message(&config())),
                Outbound::Binary(protocol::frame_message(&key)),
            ]
        );
    }

    /// Holds every write until the test hands out a permit.
    struct GatedSink {
        received: Mutex<Vec<Outbound>>,
        gate: Semaphore,
    }

    #[async_trait]
    impl MessageSink for GatedSink {
        async fn send(&self, message: Outbound) -> Result<(), VistreamError> {
            self.received.lock().push(message);
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| VistreamError::Transport(e.to_string()))?;
            permit.forget();
            Ok(())
        }
    }

    #[tokio::test]
    async fn keyframe_cached_during_bootstrap_is_replayed() {
        let hub = hub();
        assert!(hub.set_decoder_config(&config()));
        hub.add_session(1, Arc::new(RecordingSink::default()));
        settle(&hub).await;
        let first = packet(true, 1);
        hub.broadcast_frame(&first);
        settle(&hub).await;

        // Config passes; the first keyframe write blocks.
        let late = Arc::new(GatedSink {
            received: Mutex::new(Vec::new()),
            gate: Semaphore::new(1),
        });
        hub.add_session(2, Arc::clone(&late) as Arc<dyn MessageSink>);
        tokio::time::timeout(Duration::from_secs(2), async {
            while late.received.lock().len() < 2 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("bootstrap did not reach the keyframe");

        let second = packet(true, 2);
        hub.broadcast_frame(&second);
        late.gate.add_permits(8);
        settle(&hub).await;

        assert_eq!(
            *late.received.lock(),
            vec![
                Outbound::Binary(protocol::config_message(&config())),
                Outbound::Binary(protocol::frame_message(&first)),
                Outbound::Binary(protocol::frame_message(&second)),
            ]
        );
        assert_eq!(hub.stats().dropped_busy, 1);
    }

    #[tokio::test]
    async fn joiner_with_empty_cache_gets_nothing() {
        let hub = hub();
        let sink = Arc::new(RecordingSink::default());
        hub.add_session(1, Arc::clone(&sink) as Arc<dyn MessageSink>);
        settle(&hub).await;
        assert!(sink.messages().is_empty());
        // Guard was released: the next frame is delivered.
        assert_eq!(hub.broadcast_frame(&packet(false, 1)), 1);
    }

    #[tokio::test]
    async fn decoder_config_is_set_once() {
        let hub = hub();
        assert!(hub.set_decoder_config(&config()));
        let other = DecoderConfig {
            record: Bytes::from_static(&[0x01, 0x64]),
            degraded: false,
        };
        assert!(!hub.set_decoder_config(&other));
        assert_eq!(
            hub.config_message(),
            Some(protocol::config_message(&config()))
        );
    }

    // ── Backpressure ─────────────────────────────────────────────

    #[tokio::test]
    async fn busy_session_misses_frames() {
        let hub = hub();
        let sink = RecordingSink::slow(Duration::from_millis(100));
        hub.add_session(1, Arc::clone(&sink) as Arc<dyn MessageSink>);
        settle(&hub).await;

        assert_eq!(hub.broadcast_frame(&packet(true, 1)), 1);
        assert_eq!(hub.broadcast_frame(&packet(false, 2)), 0);
        assert_eq!(hub.stats().dropped_busy, 1);
        settle(&hub).await;

        assert_eq!(hub.broadcast_frame(&packet(false, 3)), 1);
        settle(&hub).await;
        assert_eq!(
            sink.messages(),
            vec![
                Outbound::Binary(protocol::frame_message(&packet(true, 1))),
                Outbound::Binary(protocol::frame_message(&packet(false, 3))),
            ]
        );
    }

    #[tokio::test]
    async fn control_messages_bypass_guard_but_not_token() {
        let hub = hub();
        let sink = RecordingSink::slow(Duration::from_millis(20));
        hub.add_session(1, Arc::clone(&sink) as Arc<dyn MessageSink>);
        settle(&hub).await;

        hub.broadcast_frame(&packet(true, 1));
        for i in 0..5 {
            assert!(hub.send_to(1, Outbound::Text(format!("msg {i}"))));
        }
        settle(&hub).await;

        assert_eq!(sink.messages().len(), 6);
        assert_eq!(sink.max_active.load(Ordering::SeqCst), 1);
    }

    /// Yields before recording so concurrent writers would interleave.
    #[derive(Default)]
    struct YieldingSink {
        received: Mutex<Vec<Outbound>>,
    }

    #[async_trait]
    impl MessageSink for YieldingSink {
        async fn send(&self, message: Outbound) -> Result<(), VistreamError> {
            for _ in 0..3 {
                tokio::task::yield_now().await;
            }
            self.received.lock().push(message);
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn control_messages_arrive_in_send_order() {
        for _ in 0..20 {
            let hub = hub();
            let sink = Arc::new(YieldingSink::default());
            hub.add_session(1, Arc::clone(&sink) as Arc<dyn MessageSink>);
            settle(&hub).await;

            let sent: Vec<Outbound> = (0..50).map(|i| Outbound::Text(format!("{i}"))).collect();
            for message in &sent {
                assert!(hub.send_to(1, message.clone()));
            }
            settle(&hub).await;
            assert_eq!(*sink.received.lock(), sent);
        }
    }

    #[tokio::test]
    async fn send_to_unknown_session() {
        let hub = hub();
        assert!(!hub.send_to(99, Outbound::Text("x".into())));
    }

    #[tokio::test]
    async fn failed_delivery_keeps_session_registered() {
        let hub = hub();
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..RecordingSink::default()
        });
        hub.add_session(1, sink);
        settle(&hub).await;

        hub.broadcast_frame(&packet(true, 1));
        settle(&hub).await;
        assert_eq!(hub.stats().delivery_failures, 1);
        assert_eq!(hub.session_count(), 1);
        // Guard cleared after the failure.
        assert_eq!(hub.broadcast_frame(&packet(false, 2)), 1);
    }

    // ── Lifecycle ────────────────────────────────────────────────

    #[tokio::test]
    async fn removed_session_receives_nothing() {
        let hub = hub();
        let sink = Arc::new(RecordingSink::default());
        hub.add_session(1, Arc::clone(&sink) as Arc<dyn MessageSink>);
        settle(&hub).await;
        assert!(hub.remove_session(1));
        assert!(!hub.remove_session(1));

        assert_eq!(hub.broadcast_frame(&packet(true, 1)), 0);
        settle(&hub).await;
        assert!(sink.messages().is_empty());
    }

    #[tokio::test]
    async fn closed_hub_drops_frames() {
        let hub = hub();
        hub.add_session(1, Arc::new(RecordingSink::default()));
        settle(&hub).await;
        hub.close();
        assert_eq!(hub.broadcast_frame(&packet(true, 1)), 0);
        assert!(hub.cached_keyframe().is_none());
    }
}
