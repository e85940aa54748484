//! Scheduler state machine
//!
//! `Idle -> Starting -> Active -> Rotating -> Starting -> ...`
//!
//! The [`Scheduler`] is an actor. [`Scheduler::run`] consumes it and drives a
//! single `select!` loop over, in priority order, the shutdown future, session
//! notices, the rotation deadline and the queued-start deadline. Each handler
//! runs to completion before the next input is taken, so state is never
//! observed half-updated. Because a session notice wins a tie against the
//! rotation deadline, and notices of replaced sessions are dropped by the
//! session manager, a rotation and an unexpected disconnect arriving together
//! always produce exactly one restart.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use super::timer::RotationTimer;
use crate::auth::AuthSequencer;
use crate::identity::IdentityProvider;
use crate::session::{
    Notice, SessionEvent, SessionId, SessionManager, SessionOptions, SessionStatus,
};
use crate::transport::{ConnectParams, Transport};
use crate::utils::backoff::Backoff;
use crate::utils::format_duration;

// ============================================================================
// Configuration
// ============================================================================

/// What to do after an unexpected disconnect
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Reconnect at all
    pub enabled: bool,
    /// Delay per consecutive failure
    pub backoff: Backoff,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            backoff: Backoff::default(),
        }
    }
}

/// Scheduler settings
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Rotate identities on a timer
    pub rotation_enabled: bool,
    /// Time between rotations
    pub interval: Duration,
    /// Pause between closing the old session and starting the rotated one
    pub settle: Duration,
    /// Identity used when rotation does not supply one
    pub default_identity: Option<String>,
    /// Reconnect behaviour
    pub reconnect: ReconnectPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            rotation_enabled: false,
            interval: Duration::from_millis(crate::config::DEFAULT_ROTATION_INTERVAL_MS),
            settle: Duration::from_secs(2),
            default_identity: None,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

// ============================================================================
// Status
// ============================================================================

/// Scheduler phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    /// No session and nothing queued
    #[default]
    Idle,
    /// A session is connecting or a (re)start is queued
    Starting,
    /// The session is ready
    Active,
    /// The old session is being replaced
    Rotating,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Active => "active",
            Self::Rotating => "rotating",
        };
        write!(f, "{s}")
    }
}

/// Snapshot published after every handled input
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStatus {
    pub phase: Phase,
    /// Identity of the most recent start
    pub identity: Option<String>,
    pub timer_active: bool,
    pub pending_rotation: bool,
    pub start_queued: bool,
    pub session_id: Option<SessionId>,
    pub session_status: Option<SessionStatus>,
    /// Consecutive failed attempts since the last ready
    pub failures: u32,
    pub starts: u64,
    pub rotations: u64,
    pub reconnects: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StartReason {
    Initial,
    Rotation,
    Reconnect,
}

impl fmt::Display for StartReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initial => "initial",
            Self::Rotation => "rotation",
            Self::Reconnect => "reconnect",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug)]
struct QueuedStart {
    identity: String,
    reason: StartReason,
    due: Instant,
}

// ============================================================================
// Scheduler
// ============================================================================

/// Reconnect/rotation scheduler; owns the session manager
pub struct Scheduler {
    config: SchedulerConfig,
    provider: IdentityProvider,
    sessions: SessionManager,
    notices: mpsc::UnboundedReceiver<Notice>,
    auth: Option<AuthSequencer>,

    phase: Phase,
    identity: Option<String>,
    timer: RotationTimer,
    pending_rotation: bool,
    queued: Option<QueuedStart>,
    failures: u32,

    starts: u64,
    rotations: u64,
    reconnects: u64,
    status_tx: watch::Sender<SchedulerStatus>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Create a scheduler that opens sessions through `transport`
    pub fn new(
        config: SchedulerConfig,
        provider: IdentityProvider,
        transport: Arc<dyn Transport>,
        template: ConnectParams,
        options: SessionOptions,
    ) -> Self {
        let (sessions, notices) = SessionManager::new(transport, template, options);
        let timer = RotationTimer::new(config.interval);
        let (status_tx, _) = watch::channel(SchedulerStatus::default());

        Self {
            config,
            provider,
            sessions,
            notices,
            auth: None,
            phase: Phase::Idle,
            identity: None,
            timer,
            pending_rotation: false,
            queued: None,
            failures: 0,
            starts: 0,
            rotations: 0,
            reconnects: 0,
            status_tx,
        }
    }

    /// Run the auth exchange after every ready
    pub fn with_auth(mut self, sequencer: Option<AuthSequencer>) -> Self {
        self.auth = sequencer;
        self
    }

    /// Watch the published status
    pub fn subscribe(&self) -> watch::Receiver<SchedulerStatus> {
        self.status_tx.subscribe()
    }

    /// Current status snapshot
    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            phase: self.phase,
            identity: self.identity.clone(),
            timer_active: self.timer.is_armed(),
            pending_rotation: self.pending_rotation,
            start_queued: self.queued.is_some(),
            session_id: self.sessions.current_id(),
            session_status: self.sessions.current_status(),
            failures: self.failures,
            starts: self.starts,
            rotations: self.rotations,
            reconnects: self.reconnects,
        }
    }

    /// Run until `shutdown` completes; returns the final status
    ///
    /// Taking `self` by value means a scheduler can only ever be started once.
    pub async fn run<F>(mut self, shutdown: F) -> SchedulerStatus
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        tracing::info!(
            rotation = self.config.rotation_enabled,
            interval = %format_duration(self.config.interval),
            reconnect = self.config.reconnect.enabled,
            "Scheduler started"
        );
        self.begin();

        loop {
            self.publish();
            let rotation_due = self.timer.deadline();
            let start_due = self.queued.as_ref().map(|q| q.due);

            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    tracing::info!(phase = %self.phase, "Shutdown requested");
                    break;
                }
                Some(notice) = self.notices.recv() => self.on_notice(notice),
                _ = sleep_until_opt(rotation_due) => self.on_rotation_due().await,
                _ = sleep_until_opt(start_due) => self.on_start_due(),
            }
        }

        self.shutdown().await;
        self.status()
    }

    fn publish(&self) {
        let snapshot = self.status();
        self.status_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }

    // ------------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------------

    fn begin(&mut self) {
        match self.initial_identity() {
            Some(identity) => self.launch(identity, StartReason::Initial),
            None => tracing::error!("No identity available; staying idle"),
        }
    }

    fn initial_identity(&mut self) -> Option<String> {
        if self.config.rotation_enabled {
            if self.provider.is_pool() {
                match self.provider.next() {
                    Ok(identity) => return Some(identity),
                    Err(e) => tracing::warn!(error = %e, "Using the default identity"),
                }
            } else if self.config.default_identity.is_none() {
                return self.provider.next().ok();
            }
        }
        self.config.default_identity.clone()
    }

    fn launch(&mut self, identity: String, reason: StartReason) {
        match self.sessions.start(&identity) {
            Ok(id) => {
                self.starts += 1;
                match reason {
                    StartReason::Rotation => self.pending_rotation = false,
                    StartReason::Reconnect => self.reconnects += 1,
                    StartReason::Initial => {}
                }
                self.phase = Phase::Starting;
                tracing::debug!(session = %id, identity = %identity, reason = %reason, "Start issued");
                self.identity = Some(identity);
            }
            Err(e) => {
                tracing::error!(error = %e, identity = %identity, reason = %reason, "Start rejected");
            }
        }
    }

    fn queue_start(&mut self, identity: String, reason: StartReason, delay: Duration) {
        self.queued = Some(QueuedStart {
            identity,
            reason,
            due: Instant::now() + delay,
        });
    }

    fn on_notice(&mut self, notice: Notice) {
        let Some(event) = self.sessions.process(notice) else {
            return;
        };

        match event {
            SessionEvent::Ready { id } => self.on_ready(id),
            SessionEvent::Ended { id, reason } => self.on_session_lost(id, &reason),
            SessionEvent::Kicked { id, reason } => {
                self.on_session_lost(id, &format!("kicked: {reason}"))
            }
            SessionEvent::Error { id, detail } => {
                tracing::debug!(session = %id, detail = %detail, phase = %self.phase, "Session error, no transition");
            }
        }
    }

    fn on_ready(&mut self, id: SessionId) {
        self.phase = Phase::Active;
        self.failures = 0;

        if self.config.rotation_enabled && self.timer.arm(Instant::now()) {
            tracing::info!(
                interval = %format_duration(self.timer.period()),
                "Rotation timer armed"
            );
        }

        if let Some(sequencer) = &self.auth {
            self.sessions.begin_auth(id, sequencer);
        }
    }

    fn on_session_lost(&mut self, id: SessionId, reason: &str) {
        if !self.config.reconnect.enabled {
            self.phase = Phase::Idle;
            if self.config.rotation_enabled {
                // A session that was never ready left the timer unarmed
                if self.timer.arm(Instant::now()) {
                    tracing::info!(
                        interval = %format_duration(self.timer.period()),
                        "Rotation timer armed"
                    );
                }
                tracing::warn!(session = %id, reason = %reason, "Session lost; auto-reconnect disabled, offline until the next rotation");
            } else {
                tracing::warn!(session = %id, reason = %reason, "Session lost; auto-reconnect disabled, staying offline");
            }
            return;
        }

        self.failures = self.failures.saturating_add(1);
        self.phase = Phase::Starting;

        if let Some(queued) = &self.queued {
            tracing::debug!(session = %id, queued = %queued.identity, "Start already queued; not queueing another");
            return;
        }
        let Some(identity) = self.identity.clone() else {
            self.phase = Phase::Idle;
            return;
        };

        let delay = self.config.reconnect.backoff.delay_for(self.failures);
        tracing::info!(
            session = %id,
            reason = %reason,
            identity = %identity,
            attempt = self.failures,
            delay = %format_duration(delay),
            "Session lost; reconnect queued"
        );
        self.queue_start(identity, StartReason::Reconnect, delay);
    }

    async fn on_rotation_due(&mut self) {
        self.timer.fire(Instant::now());

        // Offline after a disconnect with reconnect disabled: a tick brings us back
        let resuming = self.phase == Phase::Idle
            && !self.config.reconnect.enabled
            && !self.sessions.is_active()
            && self.identity.is_some();

        if !self.config.rotation_enabled || (self.phase != Phase::Active && !resuming) {
            tracing::debug!(phase = %self.phase, "Rotation tick ignored");
            return;
        }
        if self.pending_rotation {
            tracing::debug!("Rotation already in flight; tick ignored");
            return;
        }

        let next = match self.provider.next() {
            Ok(next) => next,
            Err(e) => {
                tracing::warn!(error = %e, identity = ?self.identity, "Rotation skipped; keeping the current identity");
                return;
            }
        };

        self.pending_rotation = true;
        self.phase = Phase::Rotating;
        self.rotations += 1;
        tracing::info!(from = ?self.identity, to = %next, "Rotating identity");
        self.publish();

        self.sessions.stop().await;
        self.queue_start(next, StartReason::Rotation, self.config.settle);
    }

    fn on_start_due(&mut self) {
        if let Some(queued) = self.queued.take() {
            self.launch(queued.identity, queued.reason);
        }
    }

    async fn shutdown(&mut self) {
        if self.timer.disarm() {
            tracing::debug!("Rotation timer disarmed");
        }
        if let Some(queued) = self.queued.take() {
            tracing::debug!(identity = %queued.identity, reason = %queued.reason, "Queued start dropped");
        }
        self.pending_rotation = false;
        self.sessions.stop().await;
        self.phase = Phase::Idle;
        self.publish();
        tracing::info!(
            starts = self.starts,
            rotations = self.rotations,
            reconnects = self.reconnects,
            "Scheduler stopped"
        );
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthMode;
    use crate::identity::names::{NameGenerator, NameStyle};
    use crate::storage::RotationStateStore;
    use crate::transport::{Endpoint, ScriptedTransport};
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

    fn scheduler(config: SchedulerConfig, provider: IdentityProvider) -> Scheduler {
        Scheduler::new(
            config,
            provider,
            Arc::new(ScriptedTransport::new()),
            template(),
            SessionOptions::default(),
        )
    }

    fn pool(names: &[&str]) -> IdentityProvider {
        IdentityProvider::pool(
            names.iter().map(|s| s.to_string()).collect(),
            RotationStateStore::in_memory(),
        )
    }

    #[tokio::test]
    async fn test_initial_identity_from_pool() {
        let config = SchedulerConfig {
            rotation_enabled: true,
            default_identity: Some("Fallback".to_string()),
            ..Default::default()
        };
        let mut scheduler = scheduler(config, pool(&["alpha", "beta"]));
        assert_eq!(scheduler.initial_identity().as_deref(), Some("alpha"));
    }

    #[tokio::test]
    async fn test_initial_identity_defaults_without_rotation() {
        let config = SchedulerConfig {
            rotation_enabled: false,
            default_identity: Some("Fallback".to_string()),
            ..Default::default()
        };
        let mut scheduler = scheduler(config, pool(&["alpha"]));
        assert_eq!(scheduler.initial_identity().as_deref(), Some("Fallback"));
    }

    #[tokio::test]
    async fn test_initial_identity_empty_pool_uses_default() {
        let config = SchedulerConfig {
            rotation_enabled: true,
            default_identity: Some("Fallback".to_string()),
            ..Default::default()
        };
        let mut scheduler = scheduler(config, pool(&[]));
        assert_eq!(scheduler.initial_identity().as_deref(), Some("Fallback"));
    }

    #[tokio::test]
    async fn test_initial_identity_synthetic() {
        let config = SchedulerConfig {
            rotation_enabled: true,
            ..Default::default()
        };
        let generator = NameGenerator::seeded(NameStyle::Suffix, 9);
        let expected = generator.clone().generate();
        let mut scheduler = scheduler(config, IdentityProvider::synthetic(generator));
        assert_eq!(scheduler.initial_identity(), Some(expected));

        let config = SchedulerConfig {
            rotation_enabled: true,
            default_identity: Some("Fallback".to_string()),
            ..Default::default()
        };
        let mut scheduler = scheduler_with(config);
        assert_eq!(scheduler.initial_identity().as_deref(), Some("Fallback"));
    }

    fn scheduler_with(config: SchedulerConfig) -> Scheduler {
        scheduler(
            config,
            IdentityProvider::synthetic(NameGenerator::seeded(NameStyle::Composite, 1)),
        )
    }

    #[tokio::test]
    async fn test_fresh_status() {
        let scheduler = scheduler_with(SchedulerConfig::default());
        let status = scheduler.status();
        assert_eq!(status.phase, Phase::Idle);
        assert!(!status.timer_active);
        assert!(!status.pending_rotation);
        assert_eq!(status.session_id, None);
        assert_eq!(*scheduler.subscribe().borrow(), SchedulerStatus::default());
    }
}
