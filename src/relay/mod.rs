//! Relay - Stream Orchestration
//!
//! ## Responsibilities
//!
//! - Request lifecycle: signal previous session, bounded lock wait,
//!   connectivity probe, session registration, frame pump
//! - Multipart MJPEG part framing
//! - Unconditional cleanup (lock release + registry compare-and-delete)
//!   on every termination path via a Drop guard

use crate::camera_source::{self, CameraConnection, CameraSource, FrameTransform};
use crate::error::Result;
use crate::stream_lock::{StreamLease, StreamLock};
use crate::stream_session::{SessionRegistry, StopToken};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

/// Multipart boundary between frames
pub const MULTIPART_BOUNDARY: &str = "frame";

/// Timing knobs for the stream lifecycle, sourced from AppConfig.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Minimum time between emitted frames; zero disables throttling
    pub frame_interval: Duration,
    /// Fixed sleep between open attempts (probe and mid-stream reopen)
    pub open_retry_interval: Duration,
    /// Bounded wait for the exclusive camera slot
    pub lock_wait: Duration,
    /// Deadline for the pre-stream connectivity probe
    pub probe_timeout: Duration,
    /// Viewer ack silence timeout; zero disables liveness expiry
    pub ack_timeout: Duration,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            frame_interval: Duration::ZERO,
            open_retry_interval: Duration::from_secs(1),
            lock_wait: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(5),
            ack_timeout: Duration::ZERO,
        }
    }
}

/// A stream that reached the Streaming state.
pub struct ActiveStream {
    /// Resolved session id, echoed to the viewer for later control actions
    pub client_id: String,
    /// Encoded multipart chunks; ends when the relay loop drains
    pub frames: mpsc::Receiver<Bytes>,
}

/// Composes registry, lock, and frame source into the request lifecycle.
///
/// Constructed once per process and shared by handle; the only process-wide
/// mutable state lives inside the registry and the lock.
pub struct StreamCoordinator {
    registry: Arc<SessionRegistry>,
    lock: Arc<StreamLock>,
    settings: RelaySettings,
}

impl StreamCoordinator {
    pub fn new(settings: RelaySettings) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new(settings.ack_timeout)),
            lock: Arc::new(StreamLock::with_timeout(settings.lock_wait)),
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn lock(&self) -> &Arc<StreamLock> {
        &self.lock
    }

    /// Drive the lifecycle up to the Streaming state.
    ///
    /// Errors map to the pre-stream exits: `Busy` when the slot stays held
    /// past the bounded wait, `Unavailable` when the probe exhausts its
    /// deadline (the slot is released before returning). The stop token is
    /// created only after a successful probe, so failed probes leave no
    /// session state behind.
    pub async fn open_stream(
        &self,
        source: CameraSource,
        transform: FrameTransform,
        client: Option<String>,
    ) -> Result<ActiveStream> {
        // Takeover signal first: a reader blocked on the slot we want gets
        // a chance to observe cancellation and release it within the wait.
        self.registry.signal_active();

        let lease = self.lock.acquire().await?;

        if let Err(e) = CameraConnection::probe(
            &source,
            self.settings.probe_timeout,
            self.settings.open_retry_interval,
        )
        .await
        {
            drop(lease);
            return Err(e);
        }

        let requires_ack = client.is_some();
        let client_id = client.unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        let token = self.registry.register(&client_id, requires_ack);

        let (tx, rx) = mpsc::channel(4);
        let worker = RelayWorker {
            settings: self.settings.clone(),
            registry: self.registry.clone(),
            source,
            transform,
            client_id: client_id.clone(),
            token,
            lease,
            tx,
        };
        tokio::spawn(worker.run());

        Ok(ActiveStream {
            client_id,
            frames: rx,
        })
    }
}

/// Owns the camera connection for the duration of one streaming attempt.
struct RelayWorker {
    settings: RelaySettings,
    registry: Arc<SessionRegistry>,
    source: CameraSource,
    transform: FrameTransform,
    client_id: String,
    token: StopToken,
    lease: StreamLease,
    tx: mpsc::Sender<Bytes>,
}

impl RelayWorker {
    async fn run(self) {
        let RelayWorker {
            settings,
            registry,
            source,
            transform,
            client_id,
            token,
            lease,
            tx,
        } = self;

        // Drops on every exit path, panics included: deregisters the
        // session (compare-and-delete), then releases the camera slot.
        let _guard = SessionGuard {
            registry: registry.clone(),
            client_id: client_id.clone(),
            token: token.clone(),
            _lease: lease,
        };

        let mut conn = match CameraConnection::open(&source).await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(
                    client_id = %client_id,
                    error = %e,
                    "Camera open failed after successful probe"
                );
                return;
            }
        };

        tracing::info!(
            client_id = %client_id,
            backend = conn.backend_name(),
            "Streaming started"
        );

        let mut last_emit: Option<Instant> = None;
        loop {
            if token.is_set() {
                tracing::debug!(client_id = %client_id, "Stop token observed");
                break;
            }

            if !settings.frame_interval.is_zero() {
                if let Some(last) = last_emit {
                    let elapsed = last.elapsed();
                    if elapsed < settings.frame_interval {
                        tokio::time::sleep(settings.frame_interval - elapsed).await;
                    }
                }
            }

            let raw = match conn.read_frame().await {
                Some(raw) => raw,
                None => {
                    // Upstream went away with a viewer attached: keep the
                    // session and retry the source until something else
                    // ends the stream.
                    tracing::warn!(client_id = %client_id, "Upstream ended, reopening");
                    match reopen_source(&source, &settings, &registry, &client_id, &token, &tx)
                        .await
                    {
                        Some(next) => {
                            conn = next;
                            continue;
                        }
                        None => break,
                    }
                }
            };

            // Single-frame decode/encode failures are skipped, not fatal.
            let Some(jpeg) = camera_source::process_frame(&raw, &transform) else {
                continue;
            };

            last_emit = Some(Instant::now());
            if tx.send(multipart_chunk(&jpeg)).await.is_err() {
                tracing::debug!(client_id = %client_id, "Viewer disconnected");
                break;
            }

            if registry.is_expired(&client_id, &token) {
                tracing::info!(client_id = %client_id, "Ack timeout, reclaiming stream");
                break;
            }
        }

        tracing::info!(client_id = %client_id, "Streaming ended");
    }
}

/// Mid-stream reopen loop: fixed backoff, no deadline.
///
/// Returns None once the session is cancelled, expired, or the viewer is
/// gone, so a dead camera cannot pin the slot forever.
async fn reopen_source(
    source: &CameraSource,
    settings: &RelaySettings,
    registry: &SessionRegistry,
    client_id: &str,
    token: &StopToken,
    tx: &mpsc::Sender<Bytes>,
) -> Option<CameraConnection> {
    loop {
        if token.is_set() || tx.is_closed() || registry.is_expired(client_id, token) {
            return None;
        }
        match CameraConnection::open(source).await {
            Ok(conn) => return Some(conn),
            Err(e) => {
                tracing::debug!(error = %e, "Reopen attempt failed");
            }
        }
        tokio::time::sleep(settings.open_retry_interval).await;
    }
}

struct SessionGuard {
    registry: Arc<SessionRegistry>,
    client_id: String,
    token: StopToken,
    _lease: StreamLease,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        // Deregister before the lease field drops and frees the slot.
        self.registry.release(&self.client_id, &self.token);
    }
}

/// Frame bytes wrapped as one multipart part.
pub fn multipart_chunk(jpeg: &[u8]) -> Bytes {
    let header = format!(
        "--{MULTIPART_BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        jpeg.len()
    );
    let mut part = Vec::with_capacity(header.len() + jpeg.len() + 2);
    part.extend_from_slice(header.as_bytes());
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    Bytes::from(part)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn test_settings() -> RelaySettings {
        RelaySettings {
            frame_interval: Duration::ZERO,
            open_retry_interval: Duration::from_millis(50),
            lock_wait: Duration::from_millis(100),
            probe_timeout: Duration::from_millis(200),
            ack_timeout: Duration::ZERO,
        }
    }

    #[test]
    fn test_multipart_chunk_framing() {
        let chunk = multipart_chunk(b"JPEGDATA");
        let text = String::from_utf8_lossy(&chunk);

        assert!(text.starts_with("--frame\r\nContent-Type: image/jpeg\r\n"));
        assert!(text.contains("Content-Length: 8\r\n\r\nJPEGDATA"));
        assert!(text.ends_with("\r\n"));
    }

    fn dead_source() -> CameraSource {
        // Bind and drop so the port is guaranteed unoccupied.
        let addr = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        CameraSource::parse(&format!("http://{addr}/video")).unwrap()
    }

    #[tokio::test]
    async fn test_unreachable_probe_releases_lock_and_registers_nothing() {
        let coordinator = StreamCoordinator::new(test_settings());
        let source = dead_source();

        let result = coordinator
            .open_stream(source, FrameTransform::default(), Some("abc".into()))
            .await;

        assert!(matches!(result, Err(Error::Unavailable(_))));
        assert!(!coordinator.lock().is_held());
        assert_eq!(coordinator.registry().session_count(), 0);
    }

    #[tokio::test]
    async fn test_held_lock_yields_busy() {
        let coordinator = StreamCoordinator::new(test_settings());
        let _lease = coordinator.lock().acquire().await.unwrap();

        let result = coordinator
            .open_stream(dead_source(), FrameTransform::default(), None)
            .await;

        assert!(matches!(result, Err(Error::Busy(_))));
        assert_eq!(coordinator.registry().session_count(), 0);
    }
}
