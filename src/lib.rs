//! afk-rotator - keep one client session online and rotate its identity
//!
//! Maintains a single long-lived connection to a remote server, reconnects it
//! after disconnects with backoff, and periodically swaps the visible identity
//! for the next one from a pool (or a freshly generated name) without ever
//! running two sessions at once.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration loading, env overrides and validation
//! - [`identity`] - Pool round-robin and synthetic name generation
//! - [`storage`] - Durable rotation cursor
//! - [`transport`] - Wire boundary, line TCP transport and a scripted test double
//! - [`session`] - The single session slot and its lifecycle events
//! - [`auth`] - Post-connect register/login exchange
//! - [`scheduler`] - Reconnect/rotation state machine
//! - [`health`] - Liveness HTTP endpoint
//! - [`error`] - Unified error type
//! - [`utils`] - Backoff and formatting helpers
//!
//! # Example
//!
//! ```no_run
//! use afk_rotator::prelude::*;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(Path::new("config.toml"))?;
//!     let provider = IdentityProvider::synthetic(config.name_generator());
//!     let scheduler = Scheduler::new(
//!         config.scheduler_config(),
//!         provider,
//!         Arc::new(LineTransport::new()),
//!         config.connect_template(),
//!         config.session_options(),
//!     );
//!     scheduler.run(async { let _ = tokio::signal::ctrl_c().await; }).await;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod health;
pub mod identity;
pub mod scheduler;
pub mod session;
pub mod storage;
pub mod transport;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::auth::AuthSequencer;
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorCategory, Result, RotatorErrorTrait};
    pub use crate::identity::IdentityProvider;
    pub use crate::scheduler::{Phase, Scheduler, SchedulerStatus};
    pub use crate::storage::RotationStateStore;
    pub use crate::transport::{LineTransport, Transport};
}

// Direct re-exports for convenience
pub use scheduler::{Phase, Scheduler, SchedulerStatus};
