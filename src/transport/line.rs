//! Newline-delimited TCP transport
//!
//! The identity is written as the first line, which is how most text-based
//! servers (MUDs, telnet lobbies, chat bridges) take a login name. The link is
//! reported ready as soon as that greeting is flushed. Every received line
//! becomes a [`TransportEvent::Message`]; a line matching the kick pattern
//! becomes [`TransportEvent::Kicked`] and ends the link.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

use super::{ConnectParams, ConnectionError, Link, LinkHandle, Transport, TransportEvent};

/// Default pattern for server kick notices
pub const DEFAULT_KICK_PATTERN: &str = r"(?i)^kicked:?\s*(.*)$";

/// Sender name used for lines that carry no `<name>` prefix
pub const SERVER_SENDER: &str = "server";

/// TCP transport speaking one message per line
#[derive(Debug, Clone)]
pub struct LineTransport {
    kick_pattern: Regex,
    write_timeout: Duration,
}

impl LineTransport {
    /// Create a transport with the default kick pattern
    pub fn new() -> Self {
        Self {
            kick_pattern: default_kick_pattern().clone(),
            write_timeout: Duration::from_secs(10),
        }
    }

    /// Override the kick pattern; the first capture group, if any, is the reason
    pub fn with_kick_pattern(mut self, pattern: Regex) -> Self {
        self.kick_pattern = pattern;
        self
    }
}

impl Default for LineTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn default_kick_pattern() -> &'static Regex {
    static KICK_RE: OnceLock<Regex> = OnceLock::new();
    KICK_RE.get_or_init(|| Regex::new(DEFAULT_KICK_PATTERN).expect("Invalid regex pattern"))
}

fn chat_pattern() -> &'static Regex {
    static CHAT_RE: OnceLock<Regex> = OnceLock::new();
    CHAT_RE.get_or_init(|| Regex::new(r"^<([^>]+)>\s?(.*)$").expect("Invalid regex pattern"))
}

/// Split a raw line into `(sender, text)`
fn parse_chat_line(line: &str) -> (String, String) {
    match chat_pattern().captures(line) {
        Some(caps) => (caps[1].to_string(), caps[2].to_string()),
        None => (SERVER_SENDER.to_string(), line.to_string()),
    }
}

#[async_trait]
impl Transport for LineTransport {
    async fn connect(&self, params: ConnectParams) -> Result<Link, ConnectionError> {
        let endpoint = params.endpoint.to_string();
        let stream = TcpStream::connect((params.endpoint.host.as_str(), params.endpoint.port))
            .await
            .map_err(|e| ConnectionError::Refused {
                endpoint: endpoint.clone(),
                reason: e.to_string(),
            })?;
        let _ = stream.set_nodelay(true);
        let (read_half, mut write_half) = stream.into_split();

        write_half
            .write_all(format!("{}\n", params.identity).as_bytes())
            .await?;
        write_half.flush().await?;

        if !params.behavior.is_empty() {
            debug!(behavior = ?params.behavior, "Behaviour toggles are not interpreted by the line transport");
        }

        let (events_tx, events) = mpsc::unbounded_channel();
        let _ = events_tx.send(TransportEvent::Ready);

        let closed = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_loop(
            read_half,
            events_tx.clone(),
            self.kick_pattern.clone(),
            closed.clone(),
        ));

        let handle = LineLink {
            writer: Mutex::new(Some(write_half)),
            events_tx,
            closed,
            reader: std::sync::Mutex::new(Some(reader)),
            write_timeout: self.write_timeout,
        };

        debug!(endpoint = %endpoint, identity = %params.identity, "Line transport connected");
        Ok(Link {
            handle: Arc::new(handle),
            events,
        })
    }
}

async fn read_loop(
    read_half: OwnedReadHalf,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    kick_pattern: Regex,
    closed: Arc<AtomicBool>,
) {
    let mut lines = BufReader::new(read_half).lines();

    let reason = loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim_end_matches('\r');
                if let Some(caps) = kick_pattern.captures(line) {
                    let reason = caps
                        .get(1)
                        .map(|m| m.as_str().trim().to_string())
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| line.to_string());
                    if !closed.swap(true, Ordering::SeqCst) {
                        let _ = events_tx.send(TransportEvent::Kicked { reason });
                    }
                    return;
                }
                let (sender, text) = parse_chat_line(line);
                let _ = events_tx.send(TransportEvent::Message { sender, text });
            }
            Ok(None) => break "connection closed by server".to_string(),
            Err(e) => {
                let _ = events_tx.send(TransportEvent::Error {
                    detail: e.to_string(),
                });
                break format!("read error: {e}");
            }
        }
    };

    if !closed.swap(true, Ordering::SeqCst) {
        let _ = events_tx.send(TransportEvent::Disconnected { reason });
    }
}

struct LineLink {
    writer: Mutex<Option<OwnedWriteHalf>>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    closed: Arc<AtomicBool>,
    reader: std::sync::Mutex<Option<JoinHandle<()>>>,
    write_timeout: Duration,
}

#[async_trait]
impl LinkHandle for LineLink {
    async fn send_message(&self, text: &str) -> Result<(), ConnectionError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(ConnectionError::Closed)?;

        let write = async {
            writer.write_all(text.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        };
        match tokio::time::timeout(self.write_timeout, write).await {
            Ok(result) => result.map_err(ConnectionError::from),
            Err(_) => Err(ConnectionError::Io("write timed out".to_string())),
        }
    }

    async fn close(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }

        let reader = self
            .reader
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(reader) = reader {
            reader.abort();
        }

        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.events_tx.send(TransportEvent::Disconnected {
                reason: "closed by client".to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthMode;
    use crate::transport::Endpoint;
    use std::collections::BTreeMap;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn params(port: u16, identity: &str) -> ConnectParams {
        ConnectParams {
            endpoint: Endpoint {
                host: "127.0.0.1".to_string(),
                port,
                protocol_version: None,
            },
            identity: identity.to_string(),
            secret: None,
            auth_mode: AuthMode::Offline,
            behavior: BTreeMap::new(),
        }
    }

    #[test]
    fn test_parse_chat_line() {
        assert_eq!(
            parse_chat_line("<Steve> hello there"),
            ("Steve".to_string(), "hello there".to_string())
        );
        assert_eq!(
            parse_chat_line("Welcome to the server"),
            ("server".to_string(), "Welcome to the server".to_string())
        );
    }

    #[test]
    fn test_default_kick_pattern() {
        let re = default_kick_pattern();
        let caps = re.captures("Kicked: idle too long").unwrap();
        assert_eq!(&caps[1], "idle too long");
        assert!(re.captures("kicked").is_some());
        assert!(re.captures("<Alex> who kicked the bucket").is_none());
    }

    #[tokio::test]
    async fn test_line_transport_greets_and_reports_messages() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 64];
            let n = socket.read(&mut buf).await.unwrap();
            let greeting = String::from_utf8_lossy(&buf[..n]).to_string();
            socket.write_all(b"<Alex> hi\r\nKicked: afk\n").await.unwrap();
            greeting
        });

        let transport = LineTransport::new();
        let mut link = transport.connect(params(port, "AFK_test01")).await.unwrap();

        assert_eq!(link.events.recv().await, Some(TransportEvent::Ready));
        assert_eq!(
            link.events.recv().await,
            Some(TransportEvent::Message {
                sender: "Alex".to_string(),
                text: "hi".to_string(),
            })
        );
        assert_eq!(
            link.events.recv().await,
            Some(TransportEvent::Kicked {
                reason: "afk".to_string(),
            })
        );

        let greeting = server.await.unwrap();
        assert_eq!(greeting, "AFK_test01\n");
    }

    #[tokio::test]
    async fn test_line_transport_close_reports_disconnect_once() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
            drop(socket);
        });

        let transport = LineTransport::new();
        let mut link = transport.connect(params(port, "beta")).await.unwrap();
        assert_eq!(link.events.recv().await, Some(TransportEvent::Ready));

        link.handle.close().await;
        link.handle.close().await;

        assert_eq!(
            link.events.recv().await,
            Some(TransportEvent::Disconnected {
                reason: "closed by client".to_string(),
            })
        );
        assert!(matches!(
            link.handle.send_message("late").await,
            Err(ConnectionError::Closed)
        ));

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_line_transport_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport = LineTransport::new();
        let err = transport.connect(params(port, "gamma")).await.unwrap_err();
        assert!(matches!(err, ConnectionError::Refused { .. }));
    }
}
