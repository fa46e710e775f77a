//! The fixed set of apps served by this process.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{error, warn};

use crate::app::instance::{AppInfo, AppInstance};
use crate::error::VistreamError;

fn duplicate_id(id: &str) -> VistreamError {
    VistreamError::Configuration(format!("duplicate app id {id:?}"))
}

/// Lookup of apps by id, in catalog order.
#[derive(Debug, Default)]
pub struct AppRegistry {
    apps: Vec<Arc<AppInstance>>,
    by_id: HashMap<String, usize>,
}

impl AppRegistry {
    /// Build a registry from already-started (or never-started) apps.
    ///
    /// Duplicate ids are a configuration error.
    pub fn new(apps: Vec<AppInstance>) -> Result<Self, VistreamError> {
        let mut registry = Self::default();
        for app in apps {
            registry.insert(app)?;
        }
        Ok(registry)
    }

    /// Start every app, keeping only the ones that came up.
    ///
    /// Duplicate ids are rejected before anything starts.
    pub fn start_all(apps: Vec<AppInstance>) -> Result<Self, VistreamError> {
        let mut seen = HashSet::new();
        if let Some(dup) = apps.iter().find(|app| !seen.insert(app.id())) {
            return Err(duplicate_id(dup.id()));
        }

        let mut registry = Self::default();
        for app in apps {
            match app.start() {
                Ok(()) => registry.insert(app)?,
                Err(e) => error!(app = %app.id(), "app failed to start, not serving it: {e}"),
            }
        }
        if registry.is_empty() {
            warn!("no app could be started");
        }
        Ok(registry)
    }

    fn insert(&mut self, app: AppInstance) -> Result<(), VistreamError> {
        if self.by_id.contains_key(app.id()) {
            return Err(duplicate_id(app.id()));
        }
        self.by_id.insert(app.id().to_string(), self.apps.len());
        self.apps.push(Arc::new(app));
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Arc<AppInstance>> {
        self.by_id.get(id).map(|&i| &self.apps[i])
    }

    /// `(id, name)` of every app, in catalog order.
    pub fn list(&self) -> Vec<AppInfo> {
        self.apps.iter().map(|a| a.info().clone()).collect()
    }

    pub fn apps(&self) -> &[Arc<AppInstance>] {
        &self.apps
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    /// Shut every app down concurrently.
    pub async fn shutdown_all(&self) {
        let mut set = JoinSet::new();
        for app in &self.apps {
            let app = Arc::clone(app);
            set.spawn(async move { app.shutdown().await });
        }
        while let Some(res) = set.join_next().await {
            if let Err(e) = res {
                error!("app shutdown task failed: {e}");
            }
        }
    }
}
