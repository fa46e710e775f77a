//! Per-app stream parameters.

use std::time::Duration;

use crate::error::VistreamError;

/// Geometry, cadence and lifecycle timings shared by every app.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    /// Frame width in pixels (even).
    pub width: u32,
    /// Frame height in pixels (even).
    pub height: u32,
    /// Capture ticks per second (1..=60).
    pub fps: u32,
    /// Target encoder bitrate in bits per second.
    pub bitrate_bps: u32,
    /// Delay before the first capture tick.
    pub initial_delay: Duration,
    /// How long shutdown waits for an in-flight tick.
    pub shutdown_grace: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 20,
            bitrate_bps: 2_000_000,
            initial_delay: Duration::from_millis(200),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl StreamConfig {
    /// Period of the capture timer.
    pub fn capture_interval(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.fps.max(1)))
    }

    /// Frames between forced keyframes (two seconds of video).
    pub fn keyframe_interval(&self) -> u32 {
        self.fps.max(1) * 2
    }

    /// Reject geometry the encoder cannot handle.
    pub fn validate(&self) -> Result<(), VistreamError> {
        if self.width == 0 || self.height == 0 || self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(VistreamError::Configuration(format!(
                "dimensions must be non-zero and even, got {}x{}",
                self.width, self.height
            )));
        }
        if !(1..=60).contains(&self.fps) {
            return Err(VistreamError::Configuration(format!(
                "fps must be within 1..=60, got {}",
                self.fps
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_catalog_apps() {
        let cfg = StreamConfig::default();
        assert_eq!((cfg.width, cfg.height, cfg.fps), (1280, 720, 20));
        assert_eq!(cfg.capture_interval(), Duration::from_millis(50));
        assert_eq!(cfg.keyframe_interval(), 40);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn odd_dimensions_rejected() {
        let cfg = StreamConfig {
            width: 641,
            ..StreamConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(VistreamError::Configuration(_))
        ));
    }

    #[test]
    fn fps_out_of_range_rejected() {
        let cfg = StreamConfig {
            fps: 0,
            ..StreamConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
