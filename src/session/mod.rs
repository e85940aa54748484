//! Session manager
//!
//! Owns the single connection slot. [`SessionManager::start`] registers a new
//! handle and opens the connection in a spawned task; everything the spawned
//! tasks learn comes back as a [`Notice`] on one ordered channel, which the
//! owner feeds to [`SessionManager::process`]. Processing turns notices of the
//! current handle into [`SessionEvent`]s and drops notices of handles that are
//! no longer current, so a late result from a replaced session never touches
//! the live one.
//!
//! The manager reports lifecycle events but never decides what to do about
//! them; reconnect and rotation policy live in the scheduler.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::auth::{AuthOutcome, AuthSequencer, ReplySlot};
use crate::transport::{ConnectParams, ConnectionError, Link, LinkHandle, Transport, TransportEvent};

// ============================================================================
// Types
// ============================================================================

/// Identity of one session handle; never reused within a process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Numeric value
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle status of a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Connecting,
    Ready,
    Ending,
    Ended,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Ending => "ending",
            Self::Ended => "ended",
        };
        write!(f, "{s}")
    }
}

/// Session timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Bound on connection establishment
    pub connect_timeout: Duration,
    /// Bound on waiting for a graceful close
    pub close_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            close_timeout: Duration::from_secs(5),
        }
    }
}

/// Lifecycle event of the current session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Handshake complete
    Ready { id: SessionId },
    /// The session ended (disconnect or failed connect); the slot is free
    Ended { id: SessionId, reason: String },
    /// The server removed the session; the slot is free
    Kicked { id: SessionId, reason: String },
    /// Non-terminal error; the session is still current
    Error { id: SessionId, detail: String },
}

/// Session start rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// A handle is already current
    #[error("session {current} ({identity}) is still active")]
    Duplicate { current: SessionId, identity: String },
}

/// Message from a session task to the manager's owner
#[derive(Debug)]
pub struct Notice {
    id: SessionId,
    kind: NoticeKind,
}

#[derive(Debug)]
enum NoticeKind {
    Established(Link),
    ConnectFailed(ConnectionError),
    Transport(TransportEvent),
}

impl Notice {
    /// Session the notice belongs to
    pub fn session_id(&self) -> SessionId {
        self.id
    }
}

// ============================================================================
// Handle
// ============================================================================

struct SessionHandle {
    id: SessionId,
    identity: String,
    status: SessionStatus,
    link: Option<Arc<dyn LinkHandle>>,
    replies: ReplySlot,
    pump_task: Option<JoinHandle<()>>,
    auth_task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    fn release(&mut self) {
        if let Some(task) = self.pump_task.take() {
            task.abort();
        }
        if let Some(task) = self.auth_task.take() {
            task.abort();
        }
        self.replies.cancel();
        self.status = SessionStatus::Ended;
    }
}

// ============================================================================
// Manager
// ============================================================================

/// Owns at most one live session
pub struct SessionManager {
    transport: Arc<dyn Transport>,
    template: ConnectParams,
    options: SessionOptions,
    current: Option<SessionHandle>,
    next_id: u64,
    notice_tx: mpsc::UnboundedSender<Notice>,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("endpoint", &self.template.endpoint)
            .field("options", &self.options)
            .field("current", &self.current.as_ref().map(|h| (h.id, h.status)))
            .finish()
    }
}

impl SessionManager {
    /// Create a manager and the receiver its notices arrive on
    ///
    /// `template` supplies everything but the identity of each connect.
    pub fn new(
        transport: Arc<dyn Transport>,
        template: ConnectParams,
        options: SessionOptions,
    ) -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        let manager = Self {
            transport,
            template,
            options,
            current: None,
            next_id: 1,
            notice_tx,
        };
        (manager, notice_rx)
    }

    /// Whether a handle is current
    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }

    /// Id of the current handle
    pub fn current_id(&self) -> Option<SessionId> {
        self.current.as_ref().map(|h| h.id)
    }

    /// Status of the current handle
    pub fn current_status(&self) -> Option<SessionStatus> {
        self.current.as_ref().map(|h| h.status)
    }

    /// Identity of the current handle
    pub fn current_identity(&self) -> Option<&str> {
        self.current.as_ref().map(|h| h.identity.as_str())
    }

    /// Open a session for `identity`
    ///
    /// Fails without side effects if a handle is already current.
    pub fn start(&mut self, identity: &str) -> Result<SessionId, SessionError> {
        if let Some(current) = &self.current {
            tracing::error!(
                current = %current.id,
                current_identity = %current.identity,
                requested = %identity,
                "Refusing to start a second session"
            );
            return Err(SessionError::Duplicate {
                current: current.id,
                identity: current.identity.clone(),
            });
        }

        let id = SessionId::new(self.next_id);
        self.next_id += 1;

        let params = ConnectParams {
            identity: identity.to_string(),
            ..self.template.clone()
        };
        tokio::spawn(connect_task(
            id,
            Arc::clone(&self.transport),
            params,
            self.options.connect_timeout,
            self.notice_tx.clone(),
        ));

        self.current = Some(SessionHandle {
            id,
            identity: identity.to_string(),
            status: SessionStatus::Connecting,
            link: None,
            replies: ReplySlot::new(),
            pump_task: None,
            auth_task: None,
        });

        tracing::info!(session = %id, identity = %identity, endpoint = %self.template.endpoint, "Session starting");
        Ok(id)
    }

    /// Gracefully end the current session, if any
    ///
    /// Waits at most the close timeout for the transport to confirm, then
    /// clears the slot either way.
    pub async fn stop(&mut self) {
        let Some(handle) = self.current.as_mut() else {
            return;
        };
        handle.status = SessionStatus::Ending;
        let id = handle.id;
        let link = handle.link.clone();

        if let Some(link) = link {
            if tokio::time::timeout(self.options.close_timeout, link.close())
                .await
                .is_err()
            {
                tracing::warn!(
                    session = %id,
                    timeout_ms = self.options.close_timeout.as_millis() as u64,
                    "Graceful close timed out"
                );
            }
        }

        self.clear(id, "stopped");
    }

    /// Attach the auth exchange to session `id`; returns whether it started
    pub fn begin_auth(&mut self, id: SessionId, sequencer: &AuthSequencer) -> bool {
        let Some(handle) = self.current.as_mut().filter(|h| h.id == id) else {
            return false;
        };
        let Some(link) = handle.link.clone() else {
            return false;
        };
        if let Some(previous) = handle.auth_task.take() {
            previous.abort();
        }

        let sequencer = sequencer.clone();
        let replies = handle.replies.clone();
        let identity = handle.identity.clone();
        handle.auth_task = Some(tokio::spawn(async move {
            match sequencer.run(link, replies).await {
                Ok(AuthOutcome::LoggedIn) => {
                    tracing::info!(session = %id, identity = %identity, "Authenticated")
                }
                Ok(AuthOutcome::AlreadyLoggedIn) => {
                    tracing::info!(session = %id, identity = %identity, "Already authenticated")
                }
                Err(e) => tracing::warn!(
                    session = %id,
                    identity = %identity,
                    error = %e,
                    "Auth sequence failed; session stays connected unauthenticated"
                ),
            }
        }));
        true
    }

    /// Apply a notice; returns the lifecycle event it produced, if any
    pub fn process(&mut self, notice: Notice) -> Option<SessionEvent> {
        let id = notice.id;
        let is_current = self.current_id() == Some(id);

        match notice.kind {
            NoticeKind::Established(link) => {
                if !is_current {
                    tracing::debug!(session = %id, "Discarding connection of a replaced session");
                    tokio::spawn(async move { link.handle.close().await });
                    return None;
                }
                self.attach(id, link);
                None
            }
            NoticeKind::ConnectFailed(error) => {
                if !is_current {
                    tracing::debug!(session = %id, error = %error, "Ignoring connect failure of a replaced session");
                    return None;
                }
                tracing::warn!(session = %id, error = %error, "Connect failed");
                self.clear(id, "connect failed");
                Some(SessionEvent::Ended {
                    id,
                    reason: format!("connect failed: {error}"),
                })
            }
            NoticeKind::Transport(event) => {
                if !is_current {
                    tracing::debug!(session = %id, event = ?event, "Dropping stale session event");
                    return None;
                }
                self.on_transport_event(id, event)
            }
        }
    }

    fn attach(&mut self, id: SessionId, link: Link) {
        let Some(handle) = self.current.as_mut() else {
            return;
        };
        let Link { handle: link_handle, events } = link;
        handle.link = Some(link_handle);
        handle.pump_task = Some(tokio::spawn(pump_task(
            id,
            events,
            handle.replies.clone(),
            self.notice_tx.clone(),
        )));
        tracing::debug!(session = %id, "Connection established");
    }

    fn on_transport_event(&mut self, id: SessionId, event: TransportEvent) -> Option<SessionEvent> {
        match event {
            TransportEvent::Ready => {
                let handle = self.current.as_mut()?;
                handle.status = SessionStatus::Ready;
                tracing::info!(session = %id, identity = %handle.identity, "Session ready");
                Some(SessionEvent::Ready { id })
            }
            TransportEvent::Disconnected { reason } => {
                tracing::info!(session = %id, reason = %reason, "Session ended");
                self.clear(id, "disconnected");
                Some(SessionEvent::Ended { id, reason })
            }
            TransportEvent::Kicked { reason } => {
                tracing::warn!(session = %id, reason = %reason, "Session kicked");
                self.clear(id, "kicked");
                Some(SessionEvent::Kicked { id, reason })
            }
            TransportEvent::Error { detail } => {
                tracing::warn!(session = %id, detail = %detail, "Session error");
                Some(SessionEvent::Error { id, detail })
            }
            // Chat lines stay in the pump
            TransportEvent::Message { .. } => None,
        }
    }

    /// Release the handle if `id` is still current; repeated calls are no-ops
    fn clear(&mut self, id: SessionId, cause: &str) {
        if self.current_id() != Some(id) {
            return;
        }
        if let Some(mut handle) = self.current.take() {
            handle.release();
            tracing::debug!(session = %id, identity = %handle.identity, cause = cause, "Session slot cleared");
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Some(handle) = self.current.as_mut() {
            handle.release();
        }
    }
}

// ============================================================================
// Session tasks
// ============================================================================

async fn connect_task(
    id: SessionId,
    transport: Arc<dyn Transport>,
    params: ConnectParams,
    connect_timeout: Duration,
    notice_tx: mpsc::UnboundedSender<Notice>,
) {
    let endpoint = params.endpoint.to_string();
    let kind = match tokio::time::timeout(connect_timeout, transport.connect(params)).await {
        Ok(Ok(link)) => NoticeKind::Established(link),
        Ok(Err(error)) => NoticeKind::ConnectFailed(error),
        Err(_) => NoticeKind::ConnectFailed(ConnectionError::Timeout {
            endpoint,
            timeout_ms: connect_timeout.as_millis() as u64,
        }),
    };

    if let Err(mpsc::error::SendError(notice)) = notice_tx.send(Notice { id, kind }) {
        // Nobody is listening any more; do not leak the connection
        if let NoticeKind::Established(link) = notice.kind {
            link.handle.close().await;
        }
    }
}

async fn pump_task(
    id: SessionId,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    replies: ReplySlot,
    notice_tx: mpsc::UnboundedSender<Notice>,
) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Message { sender, text } => {
                if !replies.offer(&text) {
                    tracing::trace!(session = %id, sender = %sender, text = %text, "Chat");
                }
            }
            other => {
                let terminal = matches!(
                    other,
                    TransportEvent::Disconnected { .. } | TransportEvent::Kicked { .. }
                );
                let notice = Notice {
                    id,
                    kind: NoticeKind::Transport(other),
                };
                if notice_tx.send(notice).is_err() || terminal {
                    return;
                }
            }
        }
    }

    let _ = notice_tx.send(Notice {
        id,
        kind: NoticeKind::Transport(TransportEvent::Disconnected {
            reason: "event stream closed".to_string(),
        }),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StepConfig;
    use crate::config::AuthMode;
    use crate::transport::{Endpoint, ScriptedOutcome, ScriptedTransport};
    use std::collections::BTreeMap;

    fn template() -> ConnectParams {
        ConnectParams {
            endpoint: Endpoint {
                host: "localhost".to_string(),
                port: 25565,
                protocol_version: None,
            },
            identity: String::new(),
            secret: None,
            auth_mode: AuthMode::Offline,
            behavior: BTreeMap::new(),
        }
    }

    fn manager(
        transport: &ScriptedTransport,
    ) -> (SessionManager, mpsc::UnboundedReceiver<Notice>) {
        SessionManager::new(
            Arc::new(transport.clone()),
            template(),
            SessionOptions {
                connect_timeout: Duration::from_millis(1_000),
                close_timeout: Duration::from_millis(500),
            },
        )
    }

    /// Feed notices until one produces an event
    async fn next_event(
        manager: &mut SessionManager,
        notices: &mut mpsc::UnboundedReceiver<Notice>,
    ) -> SessionEvent {
        loop {
            let notice = notices.recv().await.unwrap();
            if let Some(event) = manager.process(notice) {
                return event;
            }
        }
    }

    #[tokio::test]
    async fn test_start_reaches_ready() {
        let transport = ScriptedTransport::new();
        let (mut manager, mut notices) = manager(&transport);

        let id = manager.start("alpha").unwrap();
        assert_eq!(manager.current_status(), Some(SessionStatus::Connecting));
        assert_eq!(manager.current_identity(), Some("alpha"));

        assert_eq!(next_event(&mut manager, &mut notices).await, SessionEvent::Ready { id });
        assert_eq!(manager.current_status(), Some(SessionStatus::Ready));
        assert_eq!(transport.identities(), vec!["alpha"]);
    }

    #[tokio::test]
    async fn test_duplicate_start_is_rejected_without_side_effects() {
        let transport = ScriptedTransport::new();
        let (mut manager, mut notices) = manager(&transport);

        let id = manager.start("alpha").unwrap();
        next_event(&mut manager, &mut notices).await;

        let err = manager.start("beta").unwrap_err();
        assert_eq!(
            err,
            SessionError::Duplicate {
                current: id,
                identity: "alpha".to_string()
            }
        );
        assert_eq!(manager.current_id(), Some(id));
        assert_eq!(manager.current_status(), Some(SessionStatus::Ready));
        tokio::task::yield_now().await;
        assert_eq!(transport.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_stop_closes_and_clears() {
        let transport = ScriptedTransport::new();
        let (mut manager, mut notices) = manager(&transport);

        let id = manager.start("alpha").unwrap();
        next_event(&mut manager, &mut notices).await;

        manager.stop().await;
        assert!(!manager.is_active());
        assert_eq!(transport.close_count(), 1);

        // The close confirmation arrives after the slot is free and is stale
        while let Ok(notice) = notices.try_recv() {
            assert_eq!(notice.session_id(), id);
            assert_eq!(manager.process(notice), None);
        }

        // Stopping again is a no-op
        manager.stop().await;
        assert_eq!(transport.close_count(), 1);
    }

    #[tokio::test]
    async fn test_remote_disconnect_frees_slot() {
        let transport = ScriptedTransport::new();
        let (mut manager, mut notices) = manager(&transport);

        let first = manager.start("alpha").unwrap();
        next_event(&mut manager, &mut notices).await;

        transport.last_peer().unwrap().kick("afk");
        assert_eq!(
            next_event(&mut manager, &mut notices).await,
            SessionEvent::Kicked {
                id: first,
                reason: "afk".to_string()
            }
        );
        assert!(!manager.is_active());

        let second = manager.start("alpha").unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_error_event_keeps_session() {
        let transport = ScriptedTransport::new();
        let (mut manager, mut notices) = manager(&transport);

        let id = manager.start("alpha").unwrap();
        next_event(&mut manager, &mut notices).await;

        transport.last_peer().unwrap().error("bad packet");
        assert_eq!(
            next_event(&mut manager, &mut notices).await,
            SessionEvent::Error {
                id,
                detail: "bad packet".to_string()
            }
        );
        assert_eq!(manager.current_status(), Some(SessionStatus::Ready));
    }

    #[tokio::test]
    async fn test_chat_lines_never_reach_the_manager() {
        let transport = ScriptedTransport::new();
        let (mut manager, mut notices) = manager(&transport);

        let id = manager.start("alpha").unwrap();
        next_event(&mut manager, &mut notices).await;

        let peer = transport.last_peer().unwrap();
        peer.say("alice", "hello");
        peer.error("after chat");

        // The chat line is consumed in the pump, so the error is the next notice
        let notice = notices.recv().await.unwrap();
        assert!(matches!(
            notice.kind,
            NoticeKind::Transport(TransportEvent::Error { .. })
        ));
        assert_eq!(
            manager.process(notice),
            Some(SessionEvent::Error {
                id,
                detail: "after chat".to_string()
            })
        );
        assert_eq!(manager.current_status(), Some(SessionStatus::Ready));
    }

    #[tokio::test]
    async fn test_stale_connect_result_is_closed() {
        let transport = ScriptedTransport::new();
        let (mut manager, mut notices) = manager(&transport);

        manager.start("alpha").unwrap();
        // Stop before the connect result is processed
        manager.stop().await;
        assert!(!manager.is_active());

        let notice = notices.recv().await.unwrap();
        assert_eq!(manager.process(notice), None);
        for _ in 0..10 {
            if transport.close_count() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(transport.close_count(), 1);
        assert!(!manager.is_active());
    }

    #[tokio::test]
    async fn test_refused_connect_ends_session() {
        let transport = ScriptedTransport::new();
        transport.push_outcome(ScriptedOutcome::Refuse("whitelist".to_string()));
        let (mut manager, mut notices) = manager(&transport);

        let id = manager.start("alpha").unwrap();
        match next_event(&mut manager, &mut notices).await {
            SessionEvent::Ended { id: ended, reason } => {
                assert_eq!(ended, id);
                assert!(reason.starts_with("connect failed"));
                assert!(reason.contains("whitelist"));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(!manager.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout() {
        let transport = ScriptedTransport::new();
        transport.push_outcome(ScriptedOutcome::Hang);
        let (mut manager, mut notices) = manager(&transport);

        let id = manager.start("alpha").unwrap();
        assert_eq!(
            next_event(&mut manager, &mut notices).await,
            SessionEvent::Ended {
                id,
                reason: "connect failed: connection to localhost:25565 timed out after 1000ms"
                    .to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_auth_runs_on_current_session() {
        let transport = ScriptedTransport::new();
        transport.set_responder(|line| {
            if line.starts_with("/register") {
                Some("Successfully registered!".to_string())
            } else {
                Some("Successful login!".to_string())
            }
        });
        let (mut manager, mut notices) = manager(&transport);
        let sequencer = AuthSequencer::new(
            &StepConfig::default_register(),
            &StepConfig::default_login(),
            "pw".to_string(),
            Duration::from_secs(1),
        )
        .unwrap();

        let id = manager.start("alpha").unwrap();
        assert!(!manager.begin_auth(id, &sequencer));
        next_event(&mut manager, &mut notices).await;
        assert!(manager.begin_auth(id, &sequencer));

        let peer = transport.last_peer().unwrap();
        for _ in 0..50 {
            if peer.sent().len() == 2 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(peer.sent(), vec!["/register pw pw", "/login pw"]);
    }
}
