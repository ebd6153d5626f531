//! Application state
//!
//! Holds configuration and the shared stream coordinator

use crate::relay::{RelaySettings, StreamCoordinator};
use std::sync::Arc;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Default upstream camera URL (query `url` overrides per request)
    pub camera_url: Option<String>,
    /// Minimum inter-frame interval in seconds; 0 disables throttling
    pub frame_interval_sec: f64,
    /// Fixed retry interval between camera open attempts
    pub open_retry_sec: f64,
    /// Bounded wait for the exclusive stream lock
    pub lock_wait_sec: f64,
    /// Deadline for the pre-stream connectivity probe
    pub probe_timeout_sec: f64,
    /// Viewer ack silence timeout; 0 disables ack enforcement
    pub ack_timeout_sec: f64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            camera_url: std::env::var("CAMERA_URL").ok().filter(|v| !v.is_empty()),
            frame_interval_sec: env_f64("CAM_FRAME_INTERVAL", 0.0),
            open_retry_sec: env_f64("CAM_OPEN_RETRY_SEC", 1.0),
            lock_wait_sec: env_f64("CAM_LOCK_WAIT_SEC", 5.0),
            probe_timeout_sec: env_f64("CAM_PROBE_TIMEOUT_SEC", 5.0),
            ack_timeout_sec: env_f64("CAM_ACK_TIMEOUT_SEC", 0.0),
        }
    }
}

impl AppConfig {
    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            frame_interval: secs(self.frame_interval_sec),
            // A zero retry interval would spin on a dead camera.
            open_retry_interval: secs(self.open_retry_sec).max(Duration::from_millis(10)),
            lock_wait: secs(self.lock_wait_sec),
            probe_timeout: secs(self.probe_timeout_sec),
            ack_timeout: secs(self.ack_timeout_sec),
        }
    }
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn secs(value: f64) -> Duration {
    if value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::ZERO
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub coordinator: Arc<StreamCoordinator>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let coordinator = Arc::new(StreamCoordinator::new(config.relay_settings()));
        Self {
            config,
            coordinator,
        }
    }
}
