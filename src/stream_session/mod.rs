//! StreamSession - Viewer Session Tracking
//!
//! ## Responsibilities
//!
//! - One stop token per streaming attempt (cooperative cancellation)
//! - Client-keyed session table with replace-and-signal-old takeover
//! - Global current-session slot for single-viewer displacement
//! - Ack-based liveness for viewers that vanish without disconnecting

mod registry;
mod token;

pub use registry::SessionRegistry;
pub use token::StopToken;
