//! Configuration for the streaming server.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use vistream_core::StreamConfig;

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Network settings.
    pub network: NetworkConfig,
    /// Stream geometry and cadence, shared by every app.
    pub stream: StreamSection,
    /// Static app catalog.
    pub apps: Vec<AppEntry>,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind the HTTP/WebSocket listener to.
    pub bind_address: IpAddr,
    /// Listener port.
    pub port: u16,
}

/// Stream settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSection {
    pub width: u32,
    pub height: u32,
    /// Capture ticks per second, clamped to 1..=60.
    pub fps: u32,
    /// Target encoder bitrate in kbit/s.
    pub bitrate_kbps: u32,
    /// Delay before the first capture tick.
    pub initial_delay_ms: u64,
    /// How long shutdown waits for an in-flight tick.
    pub shutdown_grace_ms: u64,
}

/// One catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppEntry {
    pub id: String,
    pub name: String,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive, used when `RUST_LOG` is unset.
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            stream: StreamSection::default(),
            apps: (1..=3)
                .map(|i| AppEntry {
                    id: i.to_string(),
                    name: match i {
                        1 => "Bouncing Balls".to_string(),
                        n => format!("Bouncing Balls {n}"),
                    },
                })
                .collect(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8080,
        }
    }
}

impl Default for StreamSection {
    fn default() -> Self {
        let core = StreamConfig::default();
        Self {
            width: core.width,
            height: core.height,
            fps: core.fps,
            bitrate_kbps: core.bitrate_bps / 1000,
            initial_delay_ms: core.initial_delay.as_millis() as u64,
            shutdown_grace_ms: core.shutdown_grace.as_millis() as u64,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ServerConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Render as a TOML document.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.network.bind_address, self.network.port)
    }

    /// Convert stream settings into the core's `StreamConfig`.
    ///
    /// Odd dimensions are rounded down to even (4:2:0 chroma), never
    /// below 2.
    pub fn to_stream_config(&self) -> StreamConfig {
        let even = |v: u32| (v & !1).max(2);
        StreamConfig {
            width: even(self.stream.width),
            height: even(self.stream.height),
            fps: self.stream.fps.clamp(1, 60),
            bitrate_bps: self.stream.bitrate_kbps.max(1).saturating_mul(1000),
            initial_delay: Duration::from_millis(self.stream.initial_delay_ms),
            shutdown_grace: Duration::from_millis(self.stream.shutdown_grace_ms),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
