//! Camera connection backends and frame extraction
//!
//! Preferred backend is an ffmpeg child process decoding the source to an
//! MJPEG pipe (handles both RTSP and HTTP upstreams). When ffmpeg is not
//! available or produces nothing, http/https sources fall back to a direct
//! fetch of the camera's own MJPEG feed. Both backends feed the same
//! incremental JPEG scanner, so `read_frame` is backend-agnostic.

use super::CameraSource;
use crate::error::{Error, Result};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};

/// How long open() waits for the first complete frame before declaring the
/// preferred backend unusable.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(4);

const READ_CHUNK: usize = 16 * 1024;

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

enum Backend {
    /// ffmpeg child decoding to an image2pipe/mjpeg stdout pipe.
    /// kill_on_drop guarantees the process dies with the connection.
    Ffmpeg {
        _child: Child,
        stdout: ChildStdout,
    },
    /// Direct HTTP fetch of the camera's MJPEG feed.
    Direct { body: ByteStream },
}

/// One live upstream connection, exclusively owned by a single reading loop.
///
/// The native handle (child process or HTTP response) is released on every
/// exit path when the connection drops.
pub struct CameraConnection {
    backend: Backend,
    scanner: FrameScanner,
    first_frame: Option<Vec<u8>>,
}

impl CameraConnection {
    /// Open the source, preferred backend first.
    pub async fn open(source: &CameraSource) -> Result<Self> {
        match Self::open_ffmpeg(source).await {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                tracing::debug!(
                    url = %source.as_str(),
                    error = %e,
                    "ffmpeg backend unavailable, trying direct fetch"
                );
            }
        }

        if source.is_rtsp() {
            return Err(Error::Unavailable(
                "rtsp source requires the ffmpeg backend".into(),
            ));
        }
        Self::open_direct(source).await
    }

    /// Repeatedly open with a fixed retry interval until the deadline.
    pub async fn open_with_retry(
        source: &CameraSource,
        deadline: Duration,
        retry_interval: Duration,
    ) -> Result<Self> {
        let started = Instant::now();
        loop {
            match Self::open(source).await {
                Ok(conn) => return Ok(conn),
                Err(e) => {
                    if started.elapsed() + retry_interval >= deadline {
                        tracing::warn!(
                            url = %source.as_str(),
                            error = %e,
                            waited_ms = started.elapsed().as_millis(),
                            "Camera open retries exhausted"
                        );
                        return Err(Error::Unavailable(format!(
                            "camera did not answer within {}ms: {e}",
                            deadline.as_millis()
                        )));
                    }
                }
            }
            tokio::time::sleep(retry_interval).await;
        }
    }

    /// Connectivity probe: open and immediately release.
    pub async fn probe(
        source: &CameraSource,
        deadline: Duration,
        retry_interval: Duration,
    ) -> Result<()> {
        Self::open_with_retry(source, deadline, retry_interval)
            .await
            .map(drop)
    }

    async fn open_ffmpeg(source: &CameraSource) -> Result<Self> {
        let mut cmd = Command::new("ffmpeg");
        if source.is_rtsp() {
            cmd.args(["-rtsp_transport", "tcp"]);
        }
        // nobuffer/low_delay keep the internal queue minimal; ffmpeg treats
        // them as hints, so sources that ignore them still work.
        cmd.args(["-fflags", "nobuffer", "-flags", "low_delay"])
            .args(["-i", source.as_str()])
            .args(["-an", "-f", "image2pipe", "-vcodec", "mjpeg", "-q:v", "4"])
            .args(["-loglevel", "error", "-"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Unavailable(format!("ffmpeg spawn failed: {e}")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("ffmpeg stdout missing".into()))?;

        let mut conn = Self {
            backend: Backend::Ffmpeg {
                _child: child,
                stdout,
            },
            scanner: FrameScanner::default(),
            first_frame: None,
        };

        // Opening only counts once the source actually answers with a frame.
        match tokio::time::timeout(HANDSHAKE_TIMEOUT, conn.read_frame()).await {
            Ok(Some(frame)) => {
                conn.first_frame = Some(frame);
                Ok(conn)
            }
            Ok(None) => Err(Error::Unavailable("ffmpeg produced no frames".into())),
            Err(_) => Err(Error::Unavailable(
                "timed out waiting for the first frame".into(),
            )),
        }
    }

    async fn open_direct(source: &CameraSource) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        let resp = client
            .get(source.as_str())
            .send()
            .await
            .map_err(|e| Error::Unavailable(format!("source fetch failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(Error::Unavailable(format!(
                "source returned {}",
                resp.status()
            )));
        }

        tracing::debug!(url = %source.as_str(), "Direct MJPEG fetch connected");
        Ok(Self {
            backend: Backend::Direct {
                body: Box::pin(resp.bytes_stream()),
            },
            scanner: FrameScanner::default(),
            first_frame: None,
        })
    }

    pub fn backend_name(&self) -> &'static str {
        match self.backend {
            Backend::Ffmpeg { .. } => "ffmpeg",
            Backend::Direct { .. } => "direct",
        }
    }

    /// Pull the next raw JPEG frame. None means end of stream.
    ///
    /// The read itself is unbounded by design; cancellation is checked by
    /// the caller at frame boundaries.
    pub async fn read_frame(&mut self) -> Option<Vec<u8>> {
        if let Some(frame) = self.first_frame.take() {
            return Some(frame);
        }

        loop {
            if let Some(frame) = self.scanner.next_frame() {
                return Some(frame);
            }

            match &mut self.backend {
                Backend::Ffmpeg { stdout, .. } => {
                    let mut chunk = [0u8; READ_CHUNK];
                    match stdout.read(&mut chunk).await {
                        Ok(0) => return None,
                        Ok(n) => self.scanner.push(&chunk[..n]),
                        Err(e) => {
                            tracing::debug!(error = %e, "ffmpeg pipe read failed");
                            return None;
                        }
                    }
                }
                Backend::Direct { body } => match body.next().await {
                    Some(Ok(bytes)) => self.scanner.push(&bytes),
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "upstream body read failed");
                        return None;
                    }
                    None => return None,
                },
            }
        }
    }
}

/// Incremental JPEG frame extractor.
///
/// Scans the byte stream for SOI..EOI spans, dropping anything between
/// frames (multipart boundaries, part headers, pipe noise). This makes the
/// reader agnostic to the exact multipart framing the upstream uses.
#[derive(Default)]
struct FrameScanner {
    buf: Vec<u8>,
}

impl FrameScanner {
    fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    fn next_frame(&mut self) -> Option<Vec<u8>> {
        let start = find(&self.buf, &JPEG_SOI)?;
        if start > 0 {
            self.buf.drain(..start);
        }

        let end = find(&self.buf[2..], &JPEG_EOI)? + 2;
        let frame = self.buf[..end + 2].to_vec();
        self.buf.drain(..end + 2);
        Some(frame)
    }
}

fn find(haystack: &[u8], needle: &[u8; 2]) -> Option<usize> {
    haystack.windows(2).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_jpeg(payload: &[u8]) -> Vec<u8> {
        let mut frame = JPEG_SOI.to_vec();
        frame.extend_from_slice(payload);
        frame.extend_from_slice(&JPEG_EOI);
        frame
    }

    #[test]
    fn test_scanner_extracts_frame_between_boundaries() {
        let mut scanner = FrameScanner::default();
        let frame = fake_jpeg(b"payload");

        scanner.push(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
        scanner.push(&frame);
        scanner.push(b"\r\n");

        assert_eq!(scanner.next_frame().unwrap(), frame);
        assert!(scanner.next_frame().is_none());
    }

    #[test]
    fn test_scanner_handles_partial_chunks() {
        let mut scanner = FrameScanner::default();
        let frame = fake_jpeg(b"split across chunks");

        let (head, tail) = frame.split_at(5);
        scanner.push(head);
        assert!(scanner.next_frame().is_none());

        scanner.push(tail);
        assert_eq!(scanner.next_frame().unwrap(), frame);
    }

    #[test]
    fn test_scanner_yields_consecutive_frames() {
        let mut scanner = FrameScanner::default();
        let first = fake_jpeg(b"one");
        let second = fake_jpeg(b"two");

        scanner.push(&first);
        scanner.push(b"garbage");
        scanner.push(&second);

        assert_eq!(scanner.next_frame().unwrap(), first);
        assert_eq!(scanner.next_frame().unwrap(), second);
        assert!(scanner.next_frame().is_none());
    }
}
