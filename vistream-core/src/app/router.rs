//! Binds viewer connections to apps and routes their control messages.
//!
//! ```text
//! connect(/ws/2) ──► registry["2"] ──► hub.add_session, lockStatus
//! text ──► ControlMessage ──┬─ click/key ─(controller?)─► injector
//!                           └─ lock/unlock ─► ControlLock ─► lockStatus to all
//! disconnect ──► hub.remove_session, unlock on its behalf
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::app::instance::AppInstance;
use crate::app::registry::AppRegistry;
use crate::error::VistreamError;
use crate::stream::hub::{MessageSink, SessionId};
use crate::stream::protocol::{ControlMessage, LockStatus, Outbound};

/// WebSocket close code sent for an unknown app id.
pub const UNKNOWN_APP_CLOSE_CODE: u16 = 1007;

/// The app id addressed by a request path: its final segment.
pub fn app_id_from_path(path: &str) -> &str {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    path.rsplit('/').next().unwrap_or(path)
}

// ── RoutedSession ────────────────────────────────────────────────

/// A connection bound to its app for its whole lifetime.
#[derive(Debug)]
pub struct RoutedSession {
    id: SessionId,
    app: Arc<AppInstance>,
}

impl RoutedSession {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn app(&self) -> &Arc<AppInstance> {
        &self.app
    }
}

/// What the router did with one control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Forwarded to the injector.
    Injected,
    /// Input from a session that does not hold the lock.
    NotController,
    /// The lock changed hands; everyone was told.
    LockChanged,
    /// Lock or unlock refused; the requester was told the current state.
    LockRefused,
    /// Unknown type or malformed payload.
    Ignored,
}

// ── SessionRouter ────────────────────────────────────────────────

pub struct SessionRouter {
    registry: Arc<AppRegistry>,
    next_session: AtomicU64,
    /// Held while a lock status is read and queued, so a later queue
    /// entry never carries an older state.
    status_order: Mutex<()>,
}

impl SessionRouter {
    pub fn new(registry: Arc<AppRegistry>) -> Self {
        Self {
            registry,
            next_session: AtomicU64::new(1),
            status_order: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &Arc<AppRegistry> {
        &self.registry
    }

    /// Resolve the app from `path` and register a new session with it.
    ///
    /// An unknown app yields [`VistreamError::UnknownApp`]; the caller
    /// closes the connection with [`UNKNOWN_APP_CLOSE_CODE`].
    pub fn connect(
        &self,
        path: &str,
        sink: Arc<dyn MessageSink>,
    ) -> Result<RoutedSession, VistreamError> {
        let app_id = app_id_from_path(path);
        let Some(app) = self.registry.get(app_id).cloned() else {
            warn!(path, "connection for unknown app rejected");
            return Err(VistreamError::UnknownApp(app_id.to_string()));
        };

        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        app.hub().add_session(id, sink);
        self.send_lock_status(&app, id);
        info!(
            app = %app.id(),
            session = id,
            viewers = app.hub().session_count(),
            "viewer connected"
        );
        Ok(RoutedSession { id, app })
    }

    /// Route one inbound text message.
    pub fn handle_text(&self, session: &RoutedSession, text: &str) -> Dispatch {
        let app = &session.app;
        let id = session.id;

        let message = match ControlMessage::parse(text) {
            Ok(m) => m,
            Err(e) => {
                warn!(app = %app.id(), session = id, "ignoring control message: {e}");
                return Dispatch::Ignored;
            }
        };

        match message {
            ControlMessage::Click { x, y } => {
                if !app.lock().is_controller(id) {
                    trace!(app = %app.id(), session = id, "click from non-controller dropped");
                    return Dispatch::NotController;
                }
                app.injector().click(x, y);
                Dispatch::Injected
            }
            ControlMessage::Key(ch) => {
                if !app.lock().is_controller(id) {
                    trace!(app = %app.id(), session = id, "key from non-controller dropped");
                    return Dispatch::NotController;
                }
                app.injector().press(ch);
                Dispatch::Injected
            }
            ControlMessage::Lock => {
                if app.lock().try_lock(id) {
                    info!(app = %app.id(), session = id, "control lock taken");
                    self.broadcast_lock_status(app);
                    Dispatch::LockChanged
                } else {
                    self.send_lock_status(app, id);
                    Dispatch::LockRefused
                }
            }
            ControlMessage::Unlock => {
                if app.lock().unlock(id) {
                    info!(app = %app.id(), session = id, "control lock released");
                    self.broadcast_lock_status(app);
                    Dispatch::LockChanged
                } else {
                    self.send_lock_status(app, id);
                    Dispatch::LockRefused
                }
            }
            ControlMessage::Unknown(kind) => {
                warn!(app = %app.id(), session = id, kind = %kind, "unknown control message type");
                Dispatch::Ignored
            }
        }
    }

    /// Tear a session down, releasing the lock if it held it.
    pub fn disconnect(&self, session: RoutedSession) {
        let RoutedSession { id, app } = session;
        app.hub().remove_session(id);
        if app.lock().unlock(id) {
            info!(app = %app.id(), session = id, "controller left; lock released");
            self.broadcast_lock_status(&app);
        }
        info!(
            app = %app.id(),
            session = id,
            viewers = app.hub().session_count(),
            "viewer disconnected"
        );
    }

    // ── Lock status ──────────────────────────────────────────────

    fn lock_status_for(app: &AppInstance, id: SessionId) -> Option<Outbound> {
        let owner = app.lock().owner();
        let status = LockStatus {
            locked: owner.is_some(),
            you: owner == Some(id),
        };
        match status.to_json() {
            Ok(json) => Some(Outbound::Text(json)),
            Err(e) => {
                warn!(app = %app.id(), "lock status serialisation failed: {e}");
                None
            }
        }
    }

    fn queue_lock_status(app: &AppInstance, id: SessionId) {
        if let Some(message) = Self::lock_status_for(app, id) {
            if !app.hub().send_to(id, message) {
                debug!(app = %app.id(), session = id, "lock status for departed session");
            }
        }
    }

    fn send_lock_status(&self, app: &AppInstance, id: SessionId) {
        let _order = self.status_order.lock();
        Self::queue_lock_status(app, id);
    }

    fn broadcast_lock_status(&self, app: &AppInstance) {
        let _order = self.status_order.lock();
        for id in app.hub().session_ids() {
            Self::queue_lock_status(app, id);
        }
    }
}
