//! Durable storage
//!
//! The only durable data is the rotation cursor; see [`state`].

pub mod state;

pub use state::{PersistenceError, RotationState, RotationStateStore};
