//! Transport boundary
//!
//! The wire protocol is an external collaborator. The core only sees the
//! capability set defined here: open a [`Link`] for an identity, send text on
//! it, close it, and read its ordered [`TransportEvent`] stream.
//!
//! Two implementations ship with the crate:
//!
//! - [`line::LineTransport`] - newline-delimited TCP, used by the binary
//! - [`scripted::ScriptedTransport`] - in-memory peer driven by tests

pub mod line;
pub mod scripted;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::AuthMode;

pub use line::LineTransport;
pub use scripted::{ScriptedOutcome, ScriptedPeer, ScriptedTransport};

// ============================================================================
// Errors
// ============================================================================

/// Transport-level failure to establish or maintain a session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// The remote refused or reset the connection
    #[error("connection refused by {endpoint}: {reason}")]
    Refused { endpoint: String, reason: String },

    /// Establishing the connection took longer than the configured bound
    #[error("connection to {endpoint} timed out after {timeout_ms}ms")]
    Timeout { endpoint: String, timeout_ms: u64 },

    /// The link is already closed
    #[error("link closed")]
    Closed,

    /// Any other I/O failure
    #[error("transport I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ConnectionError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

// ============================================================================
// Connect parameters
// ============================================================================

/// Remote endpoint address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub protocol_version: Option<String>,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Everything a transport needs to open one session
#[derive(Clone)]
pub struct ConnectParams {
    pub endpoint: Endpoint,
    pub identity: String,
    pub secret: Option<String>,
    pub auth_mode: AuthMode,
    /// Opaque behaviour toggles from the `[behavior]` config table
    pub behavior: BTreeMap<String, serde_json::Value>,
}

impl fmt::Debug for ConnectParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectParams")
            .field("endpoint", &self.endpoint)
            .field("identity", &self.identity)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("auth_mode", &self.auth_mode)
            .field("behavior", &self.behavior)
            .finish()
    }
}

// ============================================================================
// Links and events
// ============================================================================

/// Notification produced by a live link, in transport order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Handshake finished, the identity is visible on the server
    Ready,
    /// The connection ended
    Disconnected { reason: String },
    /// The server removed us
    Kicked { reason: String },
    /// Non-terminal error reported by the transport
    Error { detail: String },
    /// A chat-style line from the server or another participant
    Message { sender: String, text: String },
}

/// Outbound half of a live connection
#[async_trait]
pub trait LinkHandle: Send + Sync {
    /// Send one chat-style line
    async fn send_message(&self, text: &str) -> Result<(), ConnectionError>;

    /// Request a graceful close; returns once the close is confirmed
    async fn close(&self);
}

/// A freshly opened connection: the outbound handle plus its event stream
pub struct Link {
    pub handle: Arc<dyn LinkHandle>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link").finish_non_exhaustive()
    }
}

/// Opens links to the remote endpoint
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self, params: ConnectParams) -> Result<Link, ConnectionError>;
}
