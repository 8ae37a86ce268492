//! Controllable transport for tests.
//!
//! [`MockTransport`] stands in for the network: every request it receives is
//! parked until the test resolves or rejects it. That makes the window between
//! an optimistic write and its settlement observable without timers.
//!
//! ```
//! use optimistic_query::query::mock::MockTransport;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let transport = MockTransport::<&str, u32>::new();
//! let request = (transport.handler())("hello");
//!
//! let answer = tokio::spawn(request);
//! let call = transport.next_call().await.unwrap();
//! assert_eq!(call.input, "hello");
//! call.resolve(7);
//!
//! assert_eq!(answer.await.unwrap(), Ok(7));
//! # }
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::{Mutex, mpsc, oneshot};

use super::client::QueryError;

/// A request waiting for the test to answer it.
pub struct PendingCall<I, O> {
    /// The request input.
    pub input: I,
    reply: oneshot::Sender<Result<O, QueryError>>,
}

impl<I, O> PendingCall<I, O> {
    /// Completes the request successfully.
    pub fn resolve(self, output: O) {
        let _ = self.reply.send(Ok(output));
    }

    /// Fails the request.
    pub fn reject(self, error: QueryError) {
        let _ = self.reply.send(Err(error));
    }
}

impl<I: fmt::Debug, O> fmt::Debug for PendingCall<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCall")
            .field("input", &self.input)
            .finish_non_exhaustive()
    }
}

/// A transport whose requests are answered by the test.
///
/// Clones share the same request queue.
pub struct MockTransport<I, O> {
    sender: mpsc::UnboundedSender<PendingCall<I, O>>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<PendingCall<I, O>>>>,
    calls: Arc<AtomicUsize>,
}

impl<I, O> Clone for MockTransport<I, O> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
            calls: self.calls.clone(),
        }
    }
}

impl<I, O> Default for MockTransport<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<I, O> MockTransport<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Creates a transport with an empty request queue.
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Returns a request function suitable for a query fetcher or mutator.
    ///
    /// A request whose [`PendingCall`] is dropped unanswered fails with
    /// [`QueryError::NetworkError`].
    pub fn handler(
        &self,
    ) -> impl Fn(I) -> BoxFuture<'static, Result<O, QueryError>> + Send + Sync + 'static {
        let sender = self.sender.clone();
        let calls = self.calls.clone();
        move |input| {
            calls.fetch_add(1, Ordering::SeqCst);
            let (reply, response) = oneshot::channel();
            let queued = sender.send(PendingCall { input, reply });
            async move {
                queued.map_err(|_| QueryError::NetworkError("transport closed".to_string()))?;
                response.await.unwrap_or_else(|_| {
                    Err(QueryError::NetworkError("request dropped".to_string()))
                })
            }
            .boxed()
        }
    }

    /// Waits for the next request.
    pub async fn next_call(&self) -> Option<PendingCall<I, O>> {
        self.receiver.lock().await.recv().await
    }

    /// Returns the next request if one is already queued.
    pub fn try_next_call(&self) -> Option<PendingCall<I, O>> {
        self.receiver.try_lock().ok()?.try_recv().ok()
    }

    /// Number of requests made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}
