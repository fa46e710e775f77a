//! Streaming service: builds the apps, serves HTTP/WebSocket and stops
//! everything cleanly.
//!
//! | Path            | Description                                  |
//! |-----------------|----------------------------------------------|
//! | `/api/apps`     | JSON list of `{id, name}` in catalog order    |
//! | `/ws/{app_id}`  | Viewer WebSocket for one app                  |

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::{OriginalUri, State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tracing::info;

use vistream_core::{AppInfo, AppInstance, AppRegistry, CodecCatalog, SessionRouter, StreamConfig};

use crate::config::ServerConfig;
use crate::demo::BouncingBalls;
use crate::ws;

// ── HTTP front end ───────────────────────────────────────────────

#[derive(Clone)]
struct AppState {
    router: Arc<SessionRouter>,
}

/// The axum router for a running registry.
pub fn router(sessions: Arc<SessionRouter>) -> Router {
    Router::new()
        .route("/api/apps", get(list_apps))
        .route("/ws/{app_id}", get(handle_websocket))
        .with_state(AppState { router: sessions })
}

async fn list_apps(State(state): State<AppState>) -> Json<Vec<AppInfo>> {
    Json(state.router.registry().list())
}

/// The app id is resolved after the upgrade so an unknown id gets a
/// WebSocket close code rather than an HTTP error.
async fn handle_websocket(
    upgrade: WebSocketUpgrade,
    OriginalUri(uri): OriginalUri,
    State(state): State<AppState>,
) -> Response {
    let path = uri.path().to_string();
    upgrade.on_upgrade(move |socket| ws::serve_socket(socket, path, state.router))
}

/// One demo app per catalog entry, each with its own surface.
pub fn build_apps(config: &ServerConfig, stream: &StreamConfig, handle: &Handle) -> Vec<AppInstance> {
    config
        .apps
        .iter()
        .map(|entry| {
            AppInstance::new(
                AppInfo::new(&entry.id, &entry.name),
                Arc::new(BouncingBalls::new(stream.width, stream.height)),
                CodecCatalog::builtin(),
                stream.clone(),
                handle,
            )
        })
        .collect()
}

// ── StreamingService ─────────────────────────────────────────────

/// The top-level service.
pub struct StreamingService {
    config: ServerConfig,
    running: Arc<AtomicBool>,
}

impl StreamingService {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle for stopping the service from another task.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Run until stopped.
    ///
    /// 1. Starts every configured app; failures are logged and skipped.
    /// 2. Serves the listing endpoint and viewer sockets.
    /// 3. Once `running` becomes `false`, stops accepting connections
    ///    and shuts every app down.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.running.store(true, Ordering::SeqCst);

        let stream = self.config.to_stream_config();
        stream.validate()?;
        let apps = build_apps(&self.config, &stream, &Handle::current());
        let registry = Arc::new(AppRegistry::start_all(apps)?);
        info!(
            apps = registry.len(),
            "{}x{} @ {} fps",
            stream.width,
            stream.height,
            stream.fps
        );

        let app = router(Arc::new(SessionRouter::new(Arc::clone(&registry))));
        let addr = self.config.listen_addr();
        let listener = TcpListener::bind(addr).await?;
        info!("listening on http://{addr}");

        let running = Arc::clone(&self.running);
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { Self::wait_for_stop(&running).await })
            .await?;

        info!("stopping apps");
        registry.shutdown_all().await;
        self.running.store(false, Ordering::SeqCst);
        info!("streaming service stopped");
        Ok(())
    }

    /// Signal the service to stop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Resolves when `running` becomes false.
    async fn wait_for_stop(running: &Arc<AtomicBool>) {
        loop {
            if !running.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
