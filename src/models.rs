//! Shared models and types for camrelay
//!
//! This module contains types shared across multiple modules
//! to avoid circular dependencies.

use serde::{Deserialize, Serialize};

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub camera_url_configured: bool,
    pub stream_locked: bool,
    pub tracked_sessions: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_client: Option<String>,
}

/// Origin proof payload
///
/// Proves the relay, not the browser, holds the camera connection, without
/// exposing the raw source URL (credentials included) to the viewer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofResponse {
    pub via_backend: bool,
    /// Echoed as supplied; null when the viewer sent no client id
    pub client_id: Option<String>,
    pub request_id: String,
    pub server_time: String,
    pub camera_protocol: String,
    pub camera_host: Option<String>,
    /// Hex SHA-256 of the resolved source URL
    pub camera_signature: String,
}
