//! In-memory transport with a scriptable remote side
//!
//! Each accepted connect produces a [`ScriptedPeer`] that plays the server:
//! it can disconnect or kick the client, push chat lines, and it records what
//! the client sent. An optional responder answers outbound lines, which is
//! how auth exchanges are exercised without a real server.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{ConnectParams, ConnectionError, Link, LinkHandle, Transport, TransportEvent};

/// What the next connect attempt does
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedOutcome {
    /// Accept and report ready immediately
    Accept,
    /// Accept but never report ready (handshake hangs)
    AcceptSilently,
    /// Fail the connect with this reason
    Refuse(String),
    /// Never complete the connect
    Hang,
}

type Responder = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

#[derive(Default)]
struct ScriptState {
    outcomes: VecDeque<ScriptedOutcome>,
    attempts: Vec<String>,
    peers: Vec<ScriptedPeer>,
    responder: Option<Responder>,
}

/// Test transport; clones share the same script and records
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedTransport {
    /// Create a transport that accepts every connect
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue the outcome of a future connect attempt; unqueued attempts accept
    pub fn push_outcome(&self, outcome: ScriptedOutcome) {
        self.lock().outcomes.push_back(outcome);
    }

    /// Answer every outbound line with the responder's reply, if any
    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.lock().responder = Some(Arc::new(responder));
    }

    /// Number of connect attempts, accepted or not
    pub fn connect_count(&self) -> usize {
        self.lock().attempts.len()
    }

    /// Identities of every connect attempt, in order
    pub fn identities(&self) -> Vec<String> {
        self.lock().attempts.clone()
    }

    /// Peers of accepted connections, in order
    pub fn peers(&self) -> Vec<ScriptedPeer> {
        self.lock().peers.clone()
    }

    /// Peer of the n-th accepted connection
    pub fn peer(&self, index: usize) -> Option<ScriptedPeer> {
        self.lock().peers.get(index).cloned()
    }

    /// Most recently accepted peer
    pub fn last_peer(&self) -> Option<ScriptedPeer> {
        self.lock().peers.last().cloned()
    }

    /// Number of links the client closed
    pub fn close_count(&self) -> usize {
        self.lock().peers.iter().filter(|p| p.closed_by_client()).count()
    }

    /// Number of accepted links not yet closed from either side
    pub fn open_count(&self) -> usize {
        self.lock().peers.iter().filter(|p| !p.is_closed()).count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&self, params: ConnectParams) -> Result<Link, ConnectionError> {
        let (outcome, responder) = {
            let mut state = self.lock();
            state.attempts.push(params.identity.clone());
            let outcome = state
                .outcomes
                .pop_front()
                .unwrap_or(ScriptedOutcome::Accept);
            (outcome, state.responder.clone())
        };

        match &outcome {
            ScriptedOutcome::Refuse(reason) => {
                return Err(ConnectionError::Refused {
                    endpoint: params.endpoint.to_string(),
                    reason: reason.clone(),
                });
            }
            ScriptedOutcome::Hang => std::future::pending::<()>().await,
            ScriptedOutcome::Accept | ScriptedOutcome::AcceptSilently => {}
        }

        let (events_tx, events) = mpsc::unbounded_channel();
        let peer = ScriptedPeer {
            inner: Arc::new(PeerInner {
                identity: params.identity.clone(),
                events_tx,
                sent: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
                closed_by_client: AtomicBool::new(false),
                responder,
            }),
        };
        if outcome == ScriptedOutcome::Accept {
            peer.emit(TransportEvent::Ready);
        }
        self.lock().peers.push(peer.clone());

        Ok(Link {
            handle: Arc::new(peer),
            events,
        })
    }
}

struct PeerInner {
    identity: String,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    sent: Mutex<Vec<String>>,
    closed: AtomicBool,
    closed_by_client: AtomicBool,
    responder: Option<Responder>,
}

/// Server side of one scripted connection
#[derive(Clone)]
pub struct ScriptedPeer {
    inner: Arc<PeerInner>,
}

impl ScriptedPeer {
    fn emit(&self, event: TransportEvent) {
        let _ = self.inner.events_tx.send(event);
    }

    /// Identity the client connected with
    pub fn identity(&self) -> &str {
        &self.inner.identity
    }

    /// Report handshake completion (for peers accepted silently)
    pub fn ready(&self) {
        if !self.is_closed() {
            self.emit(TransportEvent::Ready);
        }
    }

    /// Drop the connection from the server side
    pub fn disconnect(&self, reason: &str) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            self.emit(TransportEvent::Disconnected {
                reason: reason.to_string(),
            });
        }
    }

    /// Kick the client
    pub fn kick(&self, reason: &str) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            self.emit(TransportEvent::Kicked {
                reason: reason.to_string(),
            });
        }
    }

    /// Report a non-terminal transport error
    pub fn error(&self, detail: &str) {
        self.emit(TransportEvent::Error {
            detail: detail.to_string(),
        });
    }

    /// Deliver a chat line to the client
    pub fn say(&self, sender: &str, text: &str) {
        self.emit(TransportEvent::Message {
            sender: sender.to_string(),
            text: text.to_string(),
        });
    }

    /// Lines the client sent on this link
    pub fn sent(&self) -> Vec<String> {
        self.inner
            .sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Whether the link is closed from either side
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Whether the client closed the link
    pub fn closed_by_client(&self) -> bool {
        self.inner.closed_by_client.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LinkHandle for ScriptedPeer {
    async fn send_message(&self, text: &str) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        self.inner
            .sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(text.to_string());

        if let Some(reply) = self.inner.responder.as_ref().and_then(|r| r(text)) {
            self.say(super::line::SERVER_SENDER, &reply);
        }
        Ok(())
    }

    async fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            self.inner.closed_by_client.store(true, Ordering::SeqCst);
            self.emit(TransportEvent::Disconnected {
                reason: "closed by client".to_string(),
            });
        }
    }
}
