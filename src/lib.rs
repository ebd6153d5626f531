//! camrelay - Single-Viewer Camera Relay
//!
//! Pulls frames from one upstream camera (HTTP MJPEG or RTSP) and
//! re-streams them as a multipart MJPEG feed to exactly one viewer at a
//! time, with session takeover, remote stop/ack control, and liveness
//! reclamation for viewers that vanish silently.
//!
//! ## Architecture (5 components)
//!
//! 1. CameraSource - URL validation, backend fallback, frame transform
//! 2. StreamSession - stop tokens, keyed session table, ack liveness
//! 3. StreamLock - process-wide exclusive camera slot with bounded wait
//! 4. Relay - request lifecycle and multipart frame pump
//! 5. WebAPI - REST endpoints
//!
//! ## Design Principles
//!
//! - One camera-reading loop process-wide, enforced by the lock
//! - Cooperative cancellation only, checked at frame boundaries
//! - Cleanup is unconditional: Drop guards release the slot and the
//!   session entry on every termination path

pub mod camera_source;
pub mod error;
pub mod models;
pub mod relay;
pub mod state;
pub mod stream_lock;
pub mod stream_session;
pub mod web_api;

pub use error::{Error, Result};
pub use state::{AppConfig, AppState};
