//! Reconnect and identity-rotation scheduling
//!
//! The scheduler decides when the current session ends and when, and under
//! which identity, the next one starts. It owns the [`SessionManager`]
//! outright and reacts to one input at a time:
//!
//! ```text
//!            ready              timer (Active only)
//!  Starting --------> Active ---------------------> Rotating
//!     ^                 |                              |
//!     |   disconnect /  |         stop + settle        |
//!     +---- kicked -----+<-----------------------------+
//!        (backoff)              queued start
//! ```
//!
//! # Modules
//!
//! - [`machine`] - the actor loop and transitions
//! - [`timer`] - idempotent periodic rotation deadline
//!
//! # Example
//!
//! ```no_run
//! use afk_rotator::config::Config;
//! use afk_rotator::identity::IdentityProvider;
//! use afk_rotator::scheduler::Scheduler;
//! use afk_rotator::storage::RotationStateStore;
//! use afk_rotator::transport::LineTransport;
//! use std::sync::Arc;
//!
//! # async fn example(config: Config) {
//! let provider = IdentityProvider::pool(
//!     vec!["alpha".into(), "beta".into()],
//!     RotationStateStore::in_memory(),
//! );
//! let scheduler = Scheduler::new(
//!     config.scheduler_config(),
//!     provider,
//!     Arc::new(LineTransport::new()),
//!     config.connect_template(),
//!     config.session_options(),
//! );
//! let status = scheduler.subscribe();
//! scheduler.run(async { let _ = tokio::signal::ctrl_c().await; }).await;
//! println!("{:?}", status.borrow().phase);
//! # }
//! ```
//!
//! [`SessionManager`]: crate::session::SessionManager

pub mod machine;
pub mod timer;

pub use machine::{Phase, ReconnectPolicy, Scheduler, SchedulerConfig, SchedulerStatus};
pub use timer::RotationTimer;
