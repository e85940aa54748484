//! Post-connect register/login exchange
//!
//! Right after a session becomes ready the [`AuthSequencer`] sends the
//! register command and waits for a classified reply. On success (or when the
//! identity is already registered) it sends the login command and classifies
//! that reply too. A failure at either step leaves the session connected but
//! unauthenticated; the caller logs it and carries on.

pub mod reply;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::transport::{ConnectionError, LinkHandle};

pub use reply::{ReplyOutcome, ReplySlot, ResponseClassifier, SlotBusy, StepConfig};

/// Which step of the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStep {
    Register,
    Login,
}

impl std::fmt::Display for AuthStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Register => write!(f, "register"),
            Self::Login => write!(f, "login"),
        }
    }
}

/// Auth exchange failure; the session stays connected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthSequenceError {
    /// No classifiable reply in time
    #[error("{step} failed: timeout")]
    Timeout { step: AuthStep },

    /// The server rejected the step
    #[error("{step} failed: {reason}")]
    Rejected { step: AuthStep, reason: String },

    /// The request could not be sent
    #[error("{step} request not sent: {source}")]
    Send {
        step: AuthStep,
        #[source]
        source: ConnectionError,
    },

    /// Another expectation is outstanding on this session
    #[error("{step} not attempted: a reply is already pending")]
    SlotBusy { step: AuthStep },

    /// The session went away while waiting
    #[error("{step} abandoned: session closed")]
    SessionClosed { step: AuthStep },
}

/// Result of a completed exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Login confirmed
    LoggedIn,
    /// The server said the identity is already logged in
    AlreadyLoggedIn,
}

#[derive(Debug, Clone)]
struct Step {
    kind: AuthStep,
    command: String,
    classifier: Arc<ResponseClassifier>,
}

/// Runs the register-then-login exchange on one session
#[derive(Debug, Clone)]
pub struct AuthSequencer {
    register: Step,
    login: Step,
    timeout: Duration,
}

impl AuthSequencer {
    /// Compile both steps and render their commands with `secret`
    pub fn new(
        register: &StepConfig,
        login: &StepConfig,
        secret: String,
        timeout: Duration,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            register: Step {
                kind: AuthStep::Register,
                command: register.render(&secret),
                classifier: Arc::new(ResponseClassifier::compile(register)?),
            },
            login: Step {
                kind: AuthStep::Login,
                command: login.render(&secret),
                classifier: Arc::new(ResponseClassifier::compile(login)?),
            },
            timeout,
        })
    }

    /// Per-step reply timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run the exchange over `link`, correlating replies through `slot`
    pub async fn run(
        &self,
        link: Arc<dyn LinkHandle>,
        slot: ReplySlot,
    ) -> Result<AuthOutcome, AuthSequenceError> {
        match self.exchange(&self.register, link.as_ref(), &slot).await? {
            ReplyOutcome::Success => tracing::info!("Registration accepted"),
            ReplyOutcome::AlreadyDone => tracing::debug!("Identity already registered"),
            ReplyOutcome::Failure(reason) => {
                return Err(AuthSequenceError::Rejected {
                    step: AuthStep::Register,
                    reason,
                })
            }
        }

        match self.exchange(&self.login, link.as_ref(), &slot).await? {
            ReplyOutcome::Success => Ok(AuthOutcome::LoggedIn),
            ReplyOutcome::AlreadyDone => Ok(AuthOutcome::AlreadyLoggedIn),
            ReplyOutcome::Failure(reason) => Err(AuthSequenceError::Rejected {
                step: AuthStep::Login,
                reason,
            }),
        }
    }

    async fn exchange(
        &self,
        step: &Step,
        link: &dyn LinkHandle,
        slot: &ReplySlot,
    ) -> Result<ReplyOutcome, AuthSequenceError> {
        // Install the expectation before sending so a fast reply is not missed
        let reply_rx = slot
            .expect(Arc::clone(&step.classifier))
            .map_err(|SlotBusy| AuthSequenceError::SlotBusy { step: step.kind })?;

        if let Err(source) = link.send_message(&step.command).await {
            slot.cancel();
            return Err(AuthSequenceError::Send {
                step: step.kind,
                source,
            });
        }
        tracing::debug!(step = %step.kind, "Auth request sent");

        match tokio::time::timeout(self.timeout, reply_rx).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => Err(AuthSequenceError::SessionClosed { step: step.kind }),
            Err(_) => {
                slot.cancel();
                Err(AuthSequenceError::Timeout { step: step.kind })
            }
        }
    }
}
