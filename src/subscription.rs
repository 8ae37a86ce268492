//! Long-lived observers of the query cache.
//!
//! A [`SubscriptionSource`] describes a stream of values together with a stable
//! identity, so that an event loop can tell whether a subscription it is already
//! running is the same one it is being asked to run again. [`spawn`] drives a
//! source on the tokio runtime and returns a [`Handle`] for cancellation.

use std::any::TypeId;
use std::hash::{DefaultHasher, Hash, Hasher};

use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Identity of a subscription: its concrete type plus a hash of its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId {
    type_id: TypeId,
    hash: u64,
}

impl SubscriptionId {
    /// Creates an id for source type `T` with the given parameter hash.
    #[must_use]
    pub fn of<T: 'static>(hash: u64) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            hash,
        }
    }

    /// Creates an id by hashing `value` for source type `T`.
    #[must_use]
    pub fn hashed<T: 'static>(value: &impl Hash) -> Self {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        Self::of::<T>(hasher.finish())
    }
}

/// A source of values that can be subscribed to.
pub trait SubscriptionSource: Send {
    /// The type of value produced.
    type Output: Send + 'static;

    /// Creates the stream of values. Each call starts an independent stream.
    fn stream(&self) -> BoxStream<'static, Self::Output>;

    /// Stable identity of this source.
    fn id(&self) -> SubscriptionId;
}

/// Handle for a running subscription task.
#[derive(Debug)]
pub struct Handle {
    id: SubscriptionId,
    token: CancellationToken,
    join: JoinHandle<()>,
}

impl Handle {
    /// The id of the source this handle drives.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Returns `true` once the underlying stream has ended or been cancelled.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Cancel the subscription and wait for task completion.
    pub async fn cancel(self) {
        self.token.cancel();
        let _ = self.join.await;
    }
}

/// Spawns `source` on the current tokio runtime, calling `callback` for every
/// value until the stream ends or the returned handle is cancelled.
pub fn spawn<S, F>(source: &S, mut callback: F) -> Handle
where
    S: SubscriptionSource,
    F: FnMut(S::Output) + Send + 'static,
{
    let id = source.id();
    let token = CancellationToken::new();
    let mut stream = source.stream();
    let cancelled = token.clone();

    let join = tokio::spawn(async move {
        loop {
            tokio::select! {
                () = cancelled.cancelled() => break,
                next = stream.next() => match next {
                    Some(value) => callback(value),
                    None => break,
                },
            }
        }
    });

    Handle { id, token, join }
}
