//! Pending-reply slot and response classification
//!
//! A session has one [`ReplySlot`]. A caller that expects a classified
//! response installs an expectation, then sends its request; incoming chat
//! lines are offered to the slot, and the first line the expectation's
//! classifier recognises completes it. Lines it does not recognise (ordinary
//! chat) pass through untouched.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;

/// Classified outcome of one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// The request succeeded
    Success,
    /// Nothing to do, already registered / logged in
    AlreadyDone,
    /// The server rejected the request
    Failure(String),
}

/// Configuration of one request/response step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepConfig {
    /// Request template; `{secret}` is replaced with the configured secret
    pub command: String,

    /// Patterns meaning success
    #[serde(default)]
    pub success: Vec<String>,

    /// Patterns meaning the step was already done
    #[serde(default)]
    pub already: Vec<String>,

    /// Patterns meaning failure
    #[serde(default)]
    pub failure: Vec<String>,
}

impl StepConfig {
    /// AuthMe-style registration defaults
    pub fn default_register() -> Self {
        Self {
            command: "/register {secret} {secret}".to_string(),
            success: vec![
                r"(?i)successfully registered".to_string(),
                r"(?i)registration (was )?successful".to_string(),
            ],
            already: vec![
                r"(?i)already registered".to_string(),
                r"(?i)please log ?in".to_string(),
            ],
            failure: vec![
                r"(?i)registration (is )?disabled".to_string(),
                r"(?i)(password|passwords) (do not|don't) match".to_string(),
                r"(?i)error".to_string(),
            ],
        }
    }

    /// AuthMe-style login defaults
    pub fn default_login() -> Self {
        Self {
            command: "/login {secret}".to_string(),
            success: vec![
                r"(?i)successful(ly)? log(ged)? ?in".to_string(),
                r"(?i)login successful".to_string(),
            ],
            already: vec![r"(?i)already logged in".to_string()],
            failure: vec![
                r"(?i)wrong password".to_string(),
                r"(?i)incorrect password".to_string(),
                r"(?i)not registered".to_string(),
            ],
        }
    }

    /// Render the command with the secret filled in
    pub fn render(&self, secret: &str) -> String {
        self.command.replace("{secret}", secret)
    }
}

/// Compiled classifier for one step
#[derive(Debug, Clone)]
pub struct ResponseClassifier {
    success: Vec<Regex>,
    already: Vec<Regex>,
    failure: Vec<Regex>,
}

impl ResponseClassifier {
    /// Compile the patterns of a step
    pub fn compile(step: &StepConfig) -> Result<Self, regex::Error> {
        let compile_all = |patterns: &[String]| -> Result<Vec<Regex>, regex::Error> {
            patterns.iter().map(|p| Regex::new(p)).collect()
        };

        Ok(Self {
            success: compile_all(&step.success)?,
            already: compile_all(&step.already)?,
            failure: compile_all(&step.failure)?,
        })
    }

    /// Classify a line; `None` means the line is unrelated
    ///
    /// Already-done patterns are tried first, then failure, then success.
    pub fn classify(&self, text: &str) -> Option<ReplyOutcome> {
        if self.already.iter().any(|re| re.is_match(text)) {
            return Some(ReplyOutcome::AlreadyDone);
        }
        if self.failure.iter().any(|re| re.is_match(text)) {
            return Some(ReplyOutcome::Failure(text.to_string()));
        }
        if self.success.iter().any(|re| re.is_match(text)) {
            return Some(ReplyOutcome::Success);
        }
        None
    }
}

struct Expectation {
    classifier: Arc<ResponseClassifier>,
    reply_tx: oneshot::Sender<ReplyOutcome>,
}

/// The slot already holds an expectation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotBusy;

/// At most one outstanding classified-response expectation per session
#[derive(Clone, Default)]
pub struct ReplySlot {
    pending: Arc<Mutex<Option<Expectation>>>,
}

impl std::fmt::Debug for ReplySlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplySlot")
            .field("pending", &self.is_pending())
            .finish()
    }
}

impl ReplySlot {
    /// Create an empty slot
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Expectation>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Install an expectation; fails if one is already outstanding
    pub fn expect(
        &self,
        classifier: Arc<ResponseClassifier>,
    ) -> Result<oneshot::Receiver<ReplyOutcome>, SlotBusy> {
        let mut pending = self.lock();
        if pending.as_ref().is_some_and(|e| !e.reply_tx.is_closed()) {
            return Err(SlotBusy);
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        *pending = Some(Expectation {
            classifier,
            reply_tx,
        });
        Ok(reply_rx)
    }

    /// Offer an incoming line; returns `true` if it completed the expectation
    pub fn offer(&self, text: &str) -> bool {
        let mut pending = self.lock();
        let Some(outcome) = pending.as_ref().and_then(|e| e.classifier.classify(text)) else {
            return false;
        };
        match pending.take() {
            Some(expectation) => expectation.reply_tx.send(outcome).is_ok(),
            None => false,
        }
    }

    /// Drop any outstanding expectation
    pub fn cancel(&self) {
        self.lock().take();
    }

    /// Whether an expectation is outstanding
    pub fn is_pending(&self) -> bool {
        self.lock().as_ref().is_some_and(|e| !e.reply_tx.is_closed())
    }
}
