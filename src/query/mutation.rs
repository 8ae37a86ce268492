//! Optimistic mutations with snapshot rollback.
//!
//! [`OptimisticMutation`] writes a provisional value into the cache before the
//! real request completes, so subscribers see the change immediately:
//!
//! 1. Background fetches for the key are cancelled so they cannot overwrite the
//!    provisional value
//! 2. The current entry is captured as the rollback snapshot
//! 3. The optimistic value is written
//! 4. The request runs inside the returned [`Command`]
//! 5. On success the key is invalidated, because only a refetch knows the
//!    authoritative value; on failure the snapshot is put back exactly
//!
//! Only one mutation per key may be in flight. A second `mutate` for the same
//! key is rejected with [`MutationError::InProgress`] instead of being queued.
//!
//! # Example
//!
//! ```rust,ignore
//! use optimistic_query::prelude::*;
//! use optimistic_query::query::{append_optimistic, OptimisticMutation};
//!
//! let add_hero = OptimisticMutation::new(
//!     "super-heroes",
//!     query_client.clone(),
//!     |hero: Hero| Box::pin(async move { api.add_hero(hero).await }),
//!     append_optimistic,
//! );
//!
//! fn update(&mut self, msg: Message) -> Command<Message> {
//!     match msg {
//!         Message::AddHero(hero) => {
//!             match self.add_hero.mutate(hero, Message::HeroAdded, Message::AddFailed) {
//!                 Ok(cmd) => cmd,
//!                 Err(busy) => Command::future(async move { Message::Busy(busy) }),
//!             }
//!         }
//!         _ => Command::none(),
//!     }
//! }
//! ```

use std::sync::Arc;

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::command::Command;

use super::cache::{AnyValue, CacheEntry};
use super::client::{QueryClient, QueryError};
use super::key::QueryKey;

type Mutator<I, O> = Arc<dyn Fn(I) -> BoxFuture<'static, Result<O, QueryError>> + Send + Sync>;
type Updater<I, V> = Arc<dyn Fn(Option<&V>, &I) -> V + Send + Sync>;

/// Error returned when a mutation cannot start.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MutationError {
    #[error("Mutation already in progress for {0}")]
    InProgress(QueryKey),
}

/// The state of a mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationState<T> {
    /// No mutation has run yet.
    Idle,
    /// A mutation is in flight and its optimistic value is in the cache.
    Mutating,
    /// The last mutation succeeded with a result.
    Success(T),
    /// The last mutation failed, or its command was dropped, and was rolled back.
    Error(QueryError),
}

/// A mutation result containing the current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationResult<T> {
    /// The current state of the mutation.
    pub state: MutationState<T>,
}

impl<T> MutationResult<T> {
    /// Returns the result data if the mutation succeeded, otherwise `None`.
    pub const fn data(&self) -> Option<&T> {
        match &self.state {
            MutationState::Success(data) => Some(data),
            _ => None,
        }
    }

    /// Returns the error if the mutation failed, otherwise `None`.
    pub const fn error(&self) -> Option<&QueryError> {
        match &self.state {
            MutationState::Error(error) => Some(error),
            _ => None,
        }
    }

    /// Returns `true` if a mutation is in flight.
    pub const fn is_mutating(&self) -> bool {
        matches!(self.state, MutationState::Mutating)
    }

    /// Returns `true` if the mutation succeeded.
    pub const fn is_success(&self) -> bool {
        matches!(self.state, MutationState::Success(_))
    }

    /// Returns `true` if the mutation failed.
    pub const fn is_error(&self) -> bool {
        matches!(self.state, MutationState::Error(_))
    }
}

/// Coordinates optimistic writes against one cache key.
///
/// Cloning yields a handle to the same coordinator and state.
pub struct OptimisticMutation<I, V, O> {
    key: QueryKey,
    client: Arc<QueryClient>,
    mutator: Mutator<I, O>,
    updater: Updater<I, V>,
    state: Arc<watch::Sender<MutationState<O>>>,
}

impl<I, V, O> Clone for OptimisticMutation<I, V, O> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            client: self.client.clone(),
            mutator: self.mutator.clone(),
            updater: self.updater.clone(),
            state: self.state.clone(),
        }
    }
}

impl<I, V, O> OptimisticMutation<I, V, O>
where
    I: Send + 'static,
    V: Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    /// Creates a coordinator for `key`.
    ///
    /// # Arguments
    ///
    /// * `key` - The cache key the mutation writes to
    /// * `client` - The query client owning the cache
    /// * `mutator` - Performs the real request; never retried
    /// * `updater` - Computes the optimistic value from the current value and
    ///   the input; must be pure
    pub fn new<M, U>(
        key: impl Into<QueryKey>,
        client: Arc<QueryClient>,
        mutator: M,
        updater: U,
    ) -> Self
    where
        M: Fn(I) -> BoxFuture<'static, Result<O, QueryError>> + Send + Sync + 'static,
        U: Fn(Option<&V>, &I) -> V + Send + Sync + 'static,
    {
        let (state, _) = watch::channel(MutationState::Idle);
        Self {
            key: key.into(),
            client,
            mutator: Arc::new(mutator),
            updater: Arc::new(updater),
            state: Arc::new(state),
        }
    }

    /// The key this mutation writes to.
    pub const fn key(&self) -> &QueryKey {
        &self.key
    }

    /// Returns the current state.
    pub fn state(&self) -> MutationResult<O> {
        MutationResult {
            state: self.state.borrow().clone(),
        }
    }

    /// Watches state transitions.
    pub fn watch(&self) -> watch::Receiver<MutationState<O>> {
        self.state.subscribe()
    }

    /// Returns `true` while any mutation holds this coordinator's key.
    pub fn is_mutating(&self) -> bool {
        self.client.is_mutating(&self.key)
    }

    /// Starts a mutation.
    ///
    /// The optimistic value is in the cache when this returns. The request runs
    /// when the returned command is driven, and the command yields exactly one
    /// message: `on_success(output)` or `on_error(error)`.
    ///
    /// Dropping the command before it settles rolls the cache back as if the
    /// request had failed with [`QueryError::Cancelled`]. No message is produced.
    ///
    /// The snapshot covers whatever the key holds, so a value cached under
    /// another type is put back as it was.
    ///
    /// # Errors
    ///
    /// Returns [`MutationError::InProgress`] without touching the cache if a
    /// mutation for the same key has not settled yet.
    pub fn mutate<Msg, S, E>(
        &self,
        input: I,
        on_success: S,
        on_error: E,
    ) -> Result<Command<Msg>, MutationError>
    where
        Msg: Send + 'static,
        S: FnOnce(O) -> Msg + Send + 'static,
        E: FnOnce(QueryError) -> Msg + Send + 'static,
    {
        if !self.client.begin_mutation(&self.key) {
            debug!(key = %self.key, "mutation rejected: already in progress");
            return Err(MutationError::InProgress(self.key.clone()));
        }

        self.state.send_replace(MutationState::Mutating);
        self.client.cancel_in_flight(&self.key);

        let pending = PendingMutation {
            key: self.key.clone(),
            client: self.client.clone(),
            snapshot: self.client.snapshot(&self.key),
            state: self.state.clone(),
            settled: false,
        };

        let updater = self.updater.clone();
        self.client
            .set_query_data(&self.key, |old: Option<&V>| Some(updater(old, &input)));
        debug!(key = %self.key, "optimistic value written");

        let mutator = self.mutator.clone();
        Ok(Command::future(async move {
            let mut pending = pending;
            match mutator(input).await {
                Ok(output) => {
                    pending.state.send_replace(MutationState::Success(output.clone()));
                    let msg = on_success(output);
                    pending.commit();
                    msg
                }
                Err(error) => {
                    warn!(key = %pending.key, error = %error, "mutation failed, rolling back");
                    pending.rollback(error.clone());
                    on_error(error)
                }
            }
        }))
    }
}

/// The rollback target of an in-flight mutation.
///
/// Holds the single-flight slot for its key until settled. Dropping it
/// unsettled rolls back.
struct PendingMutation<O> {
    key: QueryKey,
    client: Arc<QueryClient>,
    snapshot: Option<CacheEntry<AnyValue>>,
    state: Arc<watch::Sender<MutationState<O>>>,
    settled: bool,
}

impl<O> PendingMutation<O> {
    /// Releases the key and invalidates it so the authoritative value is
    /// refetched.
    fn commit(&mut self) {
        self.settled = true;
        self.snapshot = None;
        self.client.end_mutation(&self.key);
        self.client.invalidate(&self.key);
        debug!(key = %self.key, "mutation settled");
    }

    /// Records the failure, puts the snapshot back and releases the key.
    fn rollback(&mut self, error: QueryError) {
        self.settled = true;
        self.state.send_replace(MutationState::Error(error));
        self.client.restore(&self.key, self.snapshot.take());
        self.client.end_mutation(&self.key);
    }
}

impl<O> Drop for PendingMutation<O> {
    fn drop(&mut self) {
        if !self.settled {
            warn!(key = %self.key, "mutation dropped before settling, rolling back");
            self.rollback(QueryError::Cancelled);
        }
    }
}
