//! Identity provider
//!
//! Produces the identity for the next session. In pool mode the provider walks
//! a configured list round-robin and persists its cursor before returning each
//! identity, so a crash between advance and use skips forward at most once and
//! never hands out the same identity twice in a row. In synthetic mode it
//! generates names from a [`names::NameGenerator`].

pub mod names;

use thiserror::Error;

use crate::storage::{RotationState, RotationStateStore};
use names::NameGenerator;

/// Pool mode was asked for an identity but the pool is empty
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("identity pool is empty; rotation is not possible")]
pub struct EmptyPoolError;

/// Where identities come from
#[derive(Debug)]
enum Source {
    Pool {
        pool: Vec<String>,
        store: RotationStateStore,
        state: RotationState,
    },
    Synthetic(NameGenerator),
}

/// Yields the next identity to use
#[derive(Debug)]
pub struct IdentityProvider {
    source: Source,
}

impl IdentityProvider {
    /// Round-robin over `pool`, resuming from the cursor in `store`
    pub fn pool(pool: Vec<String>, store: RotationStateStore) -> Self {
        let mut state = store.load();
        if !pool.is_empty() && !state.is_in_range(pool.len()) {
            tracing::warn!(
                last_index = state.last_index,
                pool_len = pool.len(),
                "Persisted rotation cursor out of range for the pool, resetting"
            );
            state = RotationState::default();
        }

        Self {
            source: Source::Pool { pool, store, state },
        }
    }

    /// Generate identities with `generator`
    pub fn synthetic(generator: NameGenerator) -> Self {
        Self {
            source: Source::Synthetic(generator),
        }
    }

    /// Whether this provider walks a pool
    pub fn is_pool(&self) -> bool {
        matches!(self.source, Source::Pool { .. })
    }

    /// Whether a call to [`next`](Self::next) can succeed
    pub fn can_rotate(&self) -> bool {
        match &self.source {
            Source::Pool { pool, .. } => !pool.is_empty(),
            Source::Synthetic(_) => true,
        }
    }

    /// Produce the next identity
    ///
    /// In pool mode the advanced cursor is persisted before returning.
    pub fn next(&mut self) -> Result<String, EmptyPoolError> {
        match &mut self.source {
            Source::Pool { pool, store, state } => {
                if pool.is_empty() {
                    return Err(EmptyPoolError);
                }
                let index = state.advance(pool.len());
                let identity = pool[index].clone();
                state.last_identity = Some(identity.clone());
                store.save(state);

                tracing::debug!(index = index, identity = %identity, "Advanced identity pool");
                Ok(identity)
            }
            Source::Synthetic(generator) => {
                let identity = generator.generate();
                tracing::debug!(identity = %identity, style = %generator.style(), "Generated identity");
                Ok(identity)
            }
        }
    }

    /// Pool identity the next call would return, without advancing
    pub fn peek_pool_next(&self) -> Option<&str> {
        match &self.source {
            Source::Pool { pool, state, .. } => state
                .peek_next(pool.len())
                .map(|index| pool[index].as_str()),
            Source::Synthetic(_) => None,
        }
    }

    /// Current pool cursor (pool mode only)
    pub fn cursor(&self) -> Option<&RotationState> {
        match &self.source {
            Source::Pool { state, .. } => Some(state),
            Source::Synthetic(_) => None,
        }
    }
}
