//! One streamed application.
//!
//! An `AppInstance` owns everything for its stream and shares nothing
//! with other apps:
//!
//! ```text
//! AppInstance
//!   ├─ CaptureLoop ── H264Encoder, Surface
//!   ├─ BroadcastHub ── sessions, cached config / keyframe
//!   ├─ ControlLock
//!   └─ RemoteInputInjector ── Surface
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::StreamConfig;
use crate::error::VistreamError;
use crate::input::{RemoteInputInjector, Surface};
use crate::media::{CodecCatalog, EncoderState, H264Encoder};
use crate::state::ControlLock;
use crate::stream::capture::CaptureLoop;
use crate::stream::hub::BroadcastHub;
use crate::stream::pool::DeliveryPool;

const ENCODER_STOP_WAIT: Duration = Duration::from_millis(250);

/// Catalog entry: what the listing endpoint shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppInfo {
    pub id: String,
    pub name: String,
}

impl AppInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

// ── AppInstance ──────────────────────────────────────────────────

pub struct AppInstance {
    info: AppInfo,
    config: StreamConfig,
    hub: Arc<BroadcastHub>,
    lock: ControlLock,
    injector: RemoteInputInjector,
    capture: Arc<CaptureLoop>,
    cancel: CancellationToken,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl AppInstance {
    /// Assemble an app. Nothing runs until [`start`](Self::start).
    pub fn new(
        info: AppInfo,
        surface: Arc<dyn Surface>,
        codecs: CodecCatalog,
        config: StreamConfig,
        handle: &Handle,
    ) -> Self {
        let pool = DeliveryPool::new(handle.clone());
        let hub = Arc::new(BroadcastHub::new(info.id.clone(), pool));
        let cancel = CancellationToken::new();
        let injector = RemoteInputInjector::new(&info.id, Arc::clone(&surface), handle);
        let capture = Arc::new(CaptureLoop::new(
            info.id.clone(),
            surface,
            H264Encoder::new(codecs),
            Arc::clone(&hub),
            cancel.clone(),
        ));

        Self {
            info,
            config,
            hub,
            lock: ControlLock::new(),
            injector,
            capture,
            cancel,
            timer: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn info(&self) -> &AppInfo {
        &self.info
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    pub fn lock(&self) -> &ControlLock {
        &self.lock
    }

    pub fn injector(&self) -> &RemoteInputInjector {
        &self.injector
    }

    pub fn capture(&self) -> &Arc<CaptureLoop> {
        &self.capture
    }

    pub fn encoder_state(&self) -> EncoderState {
        self.capture.encoder().lock().state()
    }

    /// Open the encoder, publish its decoder configuration and start
    /// the capture timer.
    ///
    /// Must be called from within the runtime the app was built on.
    pub fn start(&self) -> Result<(), VistreamError> {
        {
            let mut encoder = self.capture.encoder().lock();
            let decoder_config = encoder.start(&self.config)?;
            self.hub.set_decoder_config(decoder_config);
            info!(
                app = %self.info.id,
                name = %self.info.name,
                backend = encoder.backend().unwrap_or("unknown"),
                "app started"
            );
        }

        let timer = self
            .capture
            .spawn_timer(self.config.initial_delay, self.config.capture_interval());
        *self.timer.lock() = Some(timer);
        Ok(())
    }

    /// Stop the timer, wait out an in-flight tick, then flush and
    /// release the encoder. Frames are no longer delivered once this
    /// begins.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.hub.close();

        let timer = self.timer.lock().take();
        if let Some(timer) = timer {
            if let Err(e) = timer.await {
                warn!(app = %self.info.id, "capture timer ended abnormally: {e}");
            }
        }

        if !self.capture.wait_idle(self.config.shutdown_grace).await {
            warn!(
                app = %self.info.id,
                grace = ?self.config.shutdown_grace,
                "capture tick still running after grace period; stopping encoder anyway"
            );
        }

        // A tick stuck in the surface keeps the encoder locked; leave it
        // to be released on drop rather than block shutdown.
        let capture = Arc::clone(&self.capture);
        let drained = tokio::task::spawn_blocking(move || {
            capture
                .encoder()
                .try_lock_for(ENCODER_STOP_WAIT)
                .map(|mut encoder| encoder.stop())
        })
        .await
        .ok()
        .flatten();
        if drained.is_none() {
            warn!(app = %self.info.id, "encoder busy at shutdown; released on drop");
        }

        let capture_stats = self.capture.stats();
        let hub_stats = self.hub.stats();
        info!(
            app = %self.info.id,
            drained = drained.unwrap_or(0),
            frames = hub_stats.frames_broadcast,
            dropped_busy = hub_stats.dropped_busy,
            delivery_failures = hub_stats.delivery_failures,
            skipped_ticks = capture_stats.skipped,
            failed_ticks = capture_stats.failed,
            "app stopped"
        );
    }
}

impl std::fmt::Debug for AppInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppInstance")
            .field("id", &self.info.id)
            .field("name", &self.info.name)
            .field("sessions", &self.hub.session_count())
            .field("controller", &self.lock.owner())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{Element, ElementId, InputEvent};
    use crate::media::RawFrame;

    struct BlankSurface;

    impl Surface for BlankSurface {
        fn size(&self) -> (u32, u32) {
            (16, 16)
        }

        fn capture(&self, _frame: &mut RawFrame) -> Result<(), VistreamError> {
            Ok(())
        }

        fn element_at(&self, _x: i32, _y: i32) -> Option<Element> {
            None
        }

        fn focused(&self) -> Option<Element> {
            None
        }

        fn dispatch(&self, _target: ElementId, _event: InputEvent) {}
    }

    #[tokio::test]
    async fn start_without_codec_fails_and_leaves_app_idle() {
        let app = AppInstance::new(
            AppInfo::new("1", "Test"),
            Arc::new(BlankSurface),
            CodecCatalog::empty(),
            StreamConfig {
                width: 16,
                height: 16,
                ..StreamConfig::default()
            },
            &Handle::current(),
        );
        let err = app.start().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
        assert_eq!(app.encoder_state(), EncoderState::Uninitialized);
        assert!(app.hub().config_message().is_none());

        app.shutdown().await;
        assert_eq!(app.encoder_state(), EncoderState::Stopped);
    }

    #[test]
    fn app_info_serializes_id_and_name() {
        let json = serde_json::to_string(&AppInfo::new("2", "Bouncing Balls 2")).unwrap();
        assert_eq!(json, r#"{"id":"2","name":"Bouncing Balls 2"}"#);
    }
}
