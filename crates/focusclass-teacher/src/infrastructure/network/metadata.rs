//! Read-only HTTP metadata endpoint.
//!
//! Serves `GET /session/current` so dashboards and join helpers on the LAN
//! can find the running session without speaking the control protocol.  The
//! handler is a deliberately tiny HTTP/1.1 responder over a plain
//! [`TcpStream`]; it answers exactly one request per connection and closes.
//!
//! The served document is pushed in by the service through a
//! [`watch`](tokio::sync::watch) channel: `Some` while a session is active,
//! `None` otherwise.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use focusclass_core::SessionStatus;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::infrastructure::network::listener::TransportError;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Deadline for the client to finish sending its request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Largest request head we are willing to buffer.
const MAX_REQUEST_BYTES: usize = 4096;

/// Document served at `/session/current`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionMetadata {
    /// Join code students type in.
    pub code: String,
    /// Control endpoint students connect to, `host:port`.
    pub presenter_address: String,
    pub status: SessionStatus,
    pub participant_count: u32,
}

/// Binds the metadata port and spawns the HTTP responder.
///
/// # Errors
///
/// Returns [`TransportError::BindFailed`] when the port cannot be bound.
pub async fn start_metadata_endpoint(
    bind_address: IpAddr,
    port: u16,
    current: watch::Receiver<Option<SessionMetadata>>,
    running: Arc<AtomicBool>,
) -> Result<(SocketAddr, JoinHandle<()>), TransportError> {
    let addr = SocketAddr::new(bind_address, port);
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| TransportError::BindFailed { addr, source })?;
    let local_addr = listener
        .local_addr()
        .map_err(|source| TransportError::BindFailed { addr, source })?;

    info!("metadata endpoint on http://{local_addr}/session/current");
    let task = tokio::spawn(async move {
        while running.load(Ordering::Relaxed) {
            match timeout(ACCEPT_POLL_INTERVAL, listener.accept()).await {
                Ok(Ok((stream, remote_addr))) => {
                    debug!("metadata request from {remote_addr}");
                    let snapshot = current.borrow().clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_request(stream, snapshot).await {
                            debug!("metadata request from {remote_addr} failed: {e}");
                        }
                    });
                }
                Ok(Err(e)) => {
                    warn!("metadata accept failed: {e}");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                Err(_) => {
                    // Poll tick; re-check the running flag.
                }
            }
        }
        info!("metadata endpoint stopped");
    });
    Ok((local_addr, task))
}

/// Reads one request head, answers it, closes the connection.
async fn serve_request(
    mut stream: TcpStream,
    snapshot: Option<SessionMetadata>,
) -> std::io::Result<()> {
    let head = match timeout(REQUEST_TIMEOUT, read_request_head(&mut stream)).await {
        Ok(head) => head?,
        Err(_) => return Ok(()), // client never finished its request
    };

    let (status_line, body) = match parse_request_line(&head) {
        Some(("GET", "/session/current")) => match snapshot {
            Some(metadata) => match serde_json::to_string(&metadata) {
                Ok(body) => ("200 OK", body),
                Err(e) => {
                    warn!("metadata serialization failed: {e}");
                    (
                        "500 Internal Server Error",
                        r#"{"error":"internal error"}"#.to_string(),
                    )
                }
            },
            None => ("404 Not Found", r#"{"error":"no active session"}"#.to_string()),
        },
        Some(("GET", _)) => ("404 Not Found", r#"{"error":"not found"}"#.to_string()),
        Some((_, _)) => (
            "405 Method Not Allowed",
            r#"{"error":"method not allowed"}"#.to_string(),
        ),
        None => ("400 Bad Request", r#"{"error":"bad request"}"#.to_string()),
    };

    let mut response = format!(
        "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n",
        body.len()
    );
    if status_line.starts_with("405") {
        response.push_str("Allow: GET\r\n");
    }
    response.push_str("\r\n");
    response.push_str(&body);

    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

/// Buffers bytes until the blank line that ends the request head.
async fn read_request_head(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut head = Vec::with_capacity(256);
    let mut chunk = [0u8; 512];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        head.extend_from_slice(&chunk[..n]);
        if head.windows(4).any(|w| w == b"\r\n\r\n") || head.len() >= MAX_REQUEST_BYTES {
            break;
        }
    }
    Ok(head)
}

/// Extracts `(method, path)` from the first request line, if it is well
/// formed.
fn parse_request_line(head: &[u8]) -> Option<(&str, &str)> {
    let text = std::str::from_utf8(head).ok()?;
    let line = text.lines().next()?;
    let mut parts = line.split_whitespace();
    let method = parts.next()?;
    let path = parts.next()?;
    parts.next()?; // HTTP version must be present
    Some((method, path))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn sample_metadata() -> SessionMetadata {
        SessionMetadata {
            code: "AB12CD34".to_string(),
            presenter_address: "192.168.10.2:8765".to_string(),
            status: SessionStatus::Active,
            participant_count: 3,
        }
    }

    async fn start(
        snapshot: Option<SessionMetadata>,
    ) -> (SocketAddr, Arc<AtomicBool>, JoinHandle<()>, watch::Sender<Option<SessionMetadata>>) {
        let (tx, rx) = watch::channel(snapshot);
        let running = Arc::new(AtomicBool::new(true));
        let (addr, task) =
            start_metadata_endpoint(IpAddr::V4(Ipv4Addr::LOCALHOST), 0, rx, Arc::clone(&running))
                .await
                .expect("endpoint must bind port 0");
        (addr, running, task, tx)
    }

    async fn raw_request(addr: SocketAddr, request: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        String::from_utf8(response).unwrap()
    }

    fn body_of(response: &str) -> &str {
        response
            .split("\r\n\r\n")
            .nth(1)
            .expect("response must have a body")
    }

    #[test]
    fn test_parse_request_line_extracts_method_and_path() {
        let head = b"GET /session/current HTTP/1.1\r\nHost: x\r\n\r\n";
        assert_eq!(parse_request_line(head), Some(("GET", "/session/current")));
    }

    #[test]
    fn test_parse_request_line_rejects_a_bare_method() {
        assert_eq!(parse_request_line(b"GET\r\n\r\n"), None);
    }

    #[tokio::test]
    async fn test_get_session_current_serves_the_published_document() {
        // Arrange
        let (addr, running, task, _tx) = start(Some(sample_metadata())).await;

        // Act
        let response =
            raw_request(addr, "GET /session/current HTTP/1.1\r\nHost: t\r\n\r\n").await;

        // Assert
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        let parsed: serde_json::Value = serde_json::from_str(body_of(&response)).unwrap();
        assert_eq!(parsed["code"], "AB12CD34");
        assert_eq!(parsed["status"], "active");
        assert_eq!(parsed["participant_count"], 3);
        assert_eq!(parsed["presenter_address"], "192.168.10.2:8765");

        running.store(false, Ordering::Relaxed);
        let _ = task.await;
    }

    #[tokio::test]
    async fn test_get_without_an_active_session_is_404() {
        // Arrange
        let (addr, running, task, _tx) = start(None).await;

        // Act
        let response =
            raw_request(addr, "GET /session/current HTTP/1.1\r\nHost: t\r\n\r\n").await;

        // Assert
        assert!(response.starts_with("HTTP/1.1 404 Not Found"));
        assert_eq!(body_of(&response), r#"{"error":"no active session"}"#);

        running.store(false, Ordering::Relaxed);
        let _ = task.await;
    }

    #[tokio::test]
    async fn test_unknown_path_is_404() {
        // Arrange
        let (addr, running, task, _tx) = start(Some(sample_metadata())).await;

        // Act
        let response = raw_request(addr, "GET /other HTTP/1.1\r\nHost: t\r\n\r\n").await;

        // Assert
        assert!(response.starts_with("HTTP/1.1 404 Not Found"));

        running.store(false, Ordering::Relaxed);
        let _ = task.await;
    }

    #[tokio::test]
    async fn test_post_is_405_with_allow_header() {
        // Arrange
        let (addr, running, task, _tx) = start(Some(sample_metadata())).await;

        // Act
        let response =
            raw_request(addr, "POST /session/current HTTP/1.1\r\nHost: t\r\n\r\n").await;

        // Assert
        assert!(response.starts_with("HTTP/1.1 405 Method Not Allowed"));
        assert!(response.contains("Allow: GET\r\n"));

        running.store(false, Ordering::Relaxed);
        let _ = task.await;
    }

    #[tokio::test]
    async fn test_publishing_a_new_document_changes_the_response() {
        // Arrange
        let (addr, running, task, tx) = start(None).await;

        // Act – the service publishes a session after startup
        tx.send(Some(sample_metadata())).unwrap();
        let response =
            raw_request(addr, "GET /session/current HTTP/1.1\r\nHost: t\r\n\r\n").await;

        // Assert
        assert!(response.starts_with("HTTP/1.1 200 OK"));

        running.store(false, Ordering::Relaxed);
        let _ = task.await;
    }
}
