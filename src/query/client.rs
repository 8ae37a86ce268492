//! The keyed query cache.
//!
//! [`QueryClient`] owns every cached value and is the only thing that writes to
//! it. Queries read from it and fetch into it, mutations write optimistic
//! values into it and roll them back. Each write, removal and invalidation is
//! broadcast as a [`CacheEvent`], which is how active [`Query`] subscriptions
//! stay in sync.
//!
//! # Example
//!
//! ```
//! use optimistic_query::query::{QueryClient, QueryKey};
//!
//! let client = QueryClient::new();
//! client.set_query_data("super-heroes", |_: Option<&Vec<u64>>| Some(vec![1, 2]));
//! client.set_query_data("super-heroes", |old: Option<&Vec<u64>>| {
//!     old.map(|ids| ids.iter().chain([&3]).copied().collect())
//! });
//!
//! assert_eq!(
//!     client.get_query_data::<Vec<u64>>(QueryKey::from("super-heroes")),
//!     Some(vec![1, 2, 3])
//! );
//!
//! client.invalidate("super-heroes");
//! assert!(client.get_entry::<Vec<u64>>("super-heroes").unwrap().is_stale);
//! ```
//!
//! [`Query`]: super::Query

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::command::Command;
use crate::subscription::{self, Handle};

use super::cache::{AnyValue, CacheEntry};
use super::config::QueryConfig;
use super::key::QueryKey;
use super::observer::{Query, QueryResult};

/// Error type for fetch and mutation requests.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("Fetch failed: {0}")]
    FetchError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    /// The request was abandoned before it settled.
    #[error("Request cancelled")]
    Cancelled,
}

/// What happened to a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEventKind {
    /// A new value was written.
    Updated,
    /// The entry was removed.
    Removed,
    /// The entry was marked stale and should be refetched.
    Invalidated,
}

/// Notification broadcast by [`QueryClient`] on every cache change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEvent {
    pub key: QueryKey,
    pub kind: CacheEventKind,
    /// Revision of the write that caused the event; zero for invalidations.
    pub revision: u64,
}

/// Result of [`QueryClient::fetch_query`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome<T> {
    /// The fetch completed and its value was written to the cache.
    Fetched(T),
    /// The fetch was cancelled; its result, if any, was discarded.
    Cancelled,
}

#[derive(Debug)]
struct Slot {
    entry: CacheEntry<AnyValue>,
    revision: u64,
}

/// The parent cancellation token of the fetches running for one key, and how
/// many of them there are.
#[derive(Debug, Default)]
struct InFlight {
    token: CancellationToken,
    fetchers: usize,
}

/// Unregisters a fetch from its key's [`InFlight`] entry when the fetch ends,
/// however it ends. The entry is dropped with its last fetch.
struct FetchGuard<'a> {
    fetches: &'a DashMap<QueryKey, InFlight>,
    key: QueryKey,
    token: CancellationToken,
}

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        // A cancelled token belongs to an entry cancel_in_flight already removed
        if let Entry::Occupied(mut occupied) = self.fetches.entry(self.key.clone())
            && !self.token.is_cancelled()
        {
            let in_flight = occupied.get_mut();
            in_flight.fetchers = in_flight.fetchers.saturating_sub(1);
            if in_flight.fetchers == 0 {
                occupied.remove();
            }
        }
    }
}

/// A client for managing the query cache, invalidation and cancellation.
///
/// Cloning is cheap and every clone shares the same cache. Components that need
/// the cache receive a handle explicitly, usually as an `Arc<QueryClient>`.
///
/// # Example
///
/// ```rust
/// use optimistic_query::query::{QueryClient, QueryConfig};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let config = QueryConfig::new(
///     Duration::from_secs(30),  // stale_time
///     Duration::from_secs(300), // cache_time
/// );
///
/// let client = Arc::new(QueryClient::with_config(config));
/// ```
#[derive(Debug, Clone)]
pub struct QueryClient {
    cache: Arc<DashMap<QueryKey, Slot>>,
    fetches: Arc<DashMap<QueryKey, InFlight>>,
    mutations: Arc<DashSet<QueryKey>>,
    revision: Arc<AtomicU64>,
    events: broadcast::Sender<CacheEvent>,
    config: QueryConfig,
}

impl QueryClient {
    /// Creates a new query client with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(QueryConfig::default())
    }

    /// Creates a new query client with the given configuration.
    #[must_use]
    pub fn with_config(config: QueryConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            cache: Arc::new(DashMap::new()),
            fetches: Arc::new(DashMap::new()),
            mutations: Arc::new(DashSet::new()),
            revision: Arc::new(AtomicU64::new(0)),
            events,
            config,
        }
    }

    /// Gets the query configuration.
    #[must_use]
    pub const fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Returns the cached value for `key`.
    ///
    /// A value cached under a different type reads as absent.
    pub fn get_query_data<T>(&self, key: impl Into<QueryKey>) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.get_entry(key).map(|entry| entry.data)
    }

    /// Returns the cached entry for `key`, including its fetch metadata.
    pub fn get_entry<T>(&self, key: impl Into<QueryKey>) -> Option<CacheEntry<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.read(&key.into()).map(|(entry, _)| entry)
    }

    pub(crate) fn read<T>(&self, key: &QueryKey) -> Option<(CacheEntry<T>, u64)>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.cache
            .get(key)
            .and_then(|slot| slot.entry.downcast::<T>().map(|e| (e, slot.revision)))
    }

    /// Atomically replaces the entry for `key` with `updater(old)`.
    ///
    /// Returning `None` from the updater removes the entry. The updater runs
    /// while the entry is locked and must not call back into the client.
    pub fn set_query_data<T, F>(&self, key: impl Into<QueryKey>, updater: F)
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(Option<&T>) -> Option<T>,
    {
        self.write(key.into(), |old| updater(old).map(CacheEntry::new));
    }

    /// Captures the entry for `key` whatever type it holds.
    pub(crate) fn snapshot(&self, key: &QueryKey) -> Option<CacheEntry<AnyValue>> {
        self.cache.get(key).map(|slot| slot.entry.clone())
    }

    /// Puts `snapshot` back exactly as captured, or removes the entry when the
    /// snapshot is absent.
    pub(crate) fn restore(&self, key: &QueryKey, snapshot: Option<CacheEntry<AnyValue>>) {
        let (kind, revision) = match (self.cache.entry(key.clone()), snapshot) {
            (Entry::Occupied(mut occupied), Some(entry)) => {
                let revision = self.next_revision();
                occupied.insert(Slot { entry, revision });
                (CacheEventKind::Updated, revision)
            }
            (Entry::Occupied(occupied), None) => {
                occupied.remove();
                (CacheEventKind::Removed, self.next_revision())
            }
            (Entry::Vacant(vacant), Some(entry)) => {
                let revision = self.next_revision();
                vacant.insert(Slot { entry, revision });
                (CacheEventKind::Updated, revision)
            }
            (Entry::Vacant(_), None) => return,
        };

        debug!(key = %key, ?kind, revision, "snapshot restored");
        self.emit(key.clone(), kind, revision);
    }

    /// Applies `updater` to the entry for `key` and broadcasts the change.
    /// Returns the revision of the write, or `None` if nothing changed.
    pub(crate) fn write<T, F>(&self, key: QueryKey, updater: F) -> Option<u64>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(Option<&T>) -> Option<CacheEntry<T>>,
    {
        let (kind, revision) = match self.cache.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let next = updater(occupied.get().entry.data.downcast_ref::<T>());
                match next {
                    Some(entry) => {
                        let revision = self.next_revision();
                        occupied.insert(Slot {
                            entry: entry.erase(),
                            revision,
                        });
                        (CacheEventKind::Updated, revision)
                    }
                    None => {
                        occupied.remove();
                        (CacheEventKind::Removed, self.next_revision())
                    }
                }
            }
            Entry::Vacant(vacant) => {
                let entry = updater(None)?;
                let revision = self.next_revision();
                vacant.insert(Slot {
                    entry: entry.erase(),
                    revision,
                });
                (CacheEventKind::Updated, revision)
            }
        };

        debug!(key = %key, ?kind, revision, "cache write");
        self.emit(key, kind, revision);
        Some(revision)
    }

    /// Marks the entry for `key` stale and notifies active queries, which
    /// refetch in the background. The cached value itself is left untouched.
    pub fn invalidate(&self, key: impl Into<QueryKey>) {
        let key = key.into();
        if let Some(mut slot) = self.cache.get_mut(&key) {
            slot.entry.mark_stale();
        }
        debug!(key = %key, "invalidating query");
        self.emit(key, CacheEventKind::Invalidated, 0);
    }

    /// Invalidates every cached key starting with `prefix`. Returns how many
    /// keys were invalidated.
    pub fn invalidate_prefix(&self, prefix: impl Into<QueryKey>) -> usize {
        let prefix = prefix.into();
        let keys: Vec<QueryKey> = self
            .cache
            .iter()
            .filter(|slot| slot.key().starts_with(&prefix))
            .map(|slot| slot.key().clone())
            .collect();

        for key in &keys {
            self.invalidate(key);
        }
        keys.len()
    }

    /// Returns a `Command` that invalidates `key` when driven.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// fn update(&mut self, msg: Message) -> Command<Message> {
    ///     match msg {
    ///         Message::HeroAdded => self.query_client.invalidate_command("super-heroes"),
    ///     }
    /// }
    /// ```
    pub fn invalidate_command<Msg>(&self, key: impl Into<QueryKey>) -> Command<Msg>
    where
        Msg: Send + 'static,
    {
        let client = self.clone();
        let key = key.into();
        Command::effect(async move { client.invalidate(key) })
    }

    /// Cancels every fetch currently running for `key`. Results they deliver
    /// afterwards are discarded instead of written to the cache.
    pub fn cancel_in_flight(&self, key: impl Into<QueryKey>) {
        let key = key.into();
        // Cancelled under the entry lock, so a token is cancelled exactly when
        // its entry is gone
        if let Entry::Occupied(occupied) = self.fetches.entry(key.clone()) {
            debug!(key = %key, fetchers = occupied.get().fetchers, "cancelling in-flight fetch");
            occupied.get().token.cancel();
            occupied.remove();
        }
    }

    /// Runs `fetcher` and writes its value to the cache under `key`, unless
    /// [`cancel_in_flight`](Self::cancel_in_flight) is called for `key` first.
    pub async fn fetch_query<T, F, Fut>(
        &self,
        key: impl Into<QueryKey>,
        fetcher: F,
    ) -> Result<FetchOutcome<T>, QueryError>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, QueryError>>,
    {
        let outcome = self.fetch_revision(key.into(), fetcher).await?;
        Ok(match outcome {
            Some((data, _)) => FetchOutcome::Fetched(data),
            None => FetchOutcome::Cancelled,
        })
    }

    pub(crate) async fn fetch_revision<T, F, Fut>(
        &self,
        key: QueryKey,
        fetcher: F,
    ) -> Result<Option<(T, u64)>, QueryError>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, QueryError>>,
    {
        self.fetch_merged(key, fetcher, |_: Option<&T>, data| data).await
    }

    /// Runs `fetcher` under the key's cancellation token and folds its result
    /// into the cached value with `merge`. Returns the merged value and the
    /// revision of the write, or `None` if the fetch was cancelled.
    pub(crate) async fn fetch_merged<T, R, F, Fut, M>(
        &self,
        key: QueryKey,
        fetcher: F,
        merge: M,
    ) -> Result<Option<(T, u64)>, QueryError>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, QueryError>>,
        M: FnOnce(Option<&T>, R) -> T,
    {
        let token = {
            let mut in_flight = self.fetches.entry(key.clone()).or_default();
            in_flight.fetchers += 1;
            in_flight.token.child_token()
        };
        let guard = FetchGuard {
            fetches: &self.fetches,
            key,
            token,
        };

        debug!(key = %guard.key, "fetching");
        let fetched = tokio::select! {
            () = guard.token.cancelled() => None,
            result = fetcher() => Some(result?),
        };

        match fetched {
            Some(fetched) if !guard.token.is_cancelled() => {
                let mut merged = None;
                let revision = self.write(guard.key.clone(), |old: Option<&T>| {
                    let value = merge(old, fetched);
                    merged = Some(value.clone());
                    Some(CacheEntry::new(value))
                });
                Ok(merged.zip(revision))
            }
            _ => {
                debug!(key = %guard.key, "discarding cancelled fetch");
                Ok(None)
            }
        }
    }

    /// Removes entries older than the configured `cache_time`. Entries with a
    /// mutation in progress are kept. Returns how many entries were removed.
    pub fn collect_garbage(&self) -> usize {
        let cache_time = self.config.cache_time;
        let mut removed = Vec::new();
        self.cache.retain(|key, slot| {
            let keep = self.mutations.contains(key) || !slot.entry.should_gc(cache_time);
            if !keep {
                removed.push(key.clone());
            }
            keep
        });

        for key in &removed {
            debug!(key = %key, "collected expired entry");
            let revision = self.next_revision();
            self.emit(key.clone(), CacheEventKind::Removed, revision);
        }
        removed.len()
    }

    /// Subscribes to every cache event.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    /// Runs a [`Query`] for `key` in the background, calling `callback` with
    /// every result until the returned handle is cancelled.
    pub fn subscribe<V, F, C>(
        self: &Arc<Self>,
        key: impl Into<QueryKey>,
        fetcher: F,
        callback: C,
    ) -> Handle
    where
        V: Clone + Send + Sync + 'static,
        F: Fn() -> BoxFuture<'static, Result<V, QueryError>> + Send + Sync + 'static,
        C: FnMut(QueryResult<V>) + Send + 'static,
    {
        let query = Query::new(key, fetcher, Arc::clone(self));
        subscription::spawn(&query, callback)
    }

    /// Returns `true` if a mutation currently holds `key`.
    pub fn is_mutating(&self, key: impl Into<QueryKey>) -> bool {
        self.mutations.contains(&key.into())
    }

    /// Claims the single-flight slot for `key`. Returns `false` if it is taken.
    pub(crate) fn begin_mutation(&self, key: &QueryKey) -> bool {
        self.mutations.insert(key.clone())
    }

    pub(crate) fn end_mutation(&self, key: &QueryKey) {
        self.mutations.remove(key);
    }

    fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn emit(&self, key: QueryKey, kind: CacheEventKind, revision: u64) {
        // No receivers is fine: nobody is watching this key.
        let _ = self.events.send(CacheEvent {
            key,
            kind,
            revision,
        });
    }
}

impl Default for QueryClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn recv_now(rx: &mut broadcast::Receiver<CacheEvent>) -> Option<CacheEvent> {
        rx.try_recv().ok()
    }

    #[test]
    fn test_query_client_new() {
        let client = QueryClient::new();
        assert_eq!(client.cache.len(), 0);
        assert_eq!(client.config().stale_time, Duration::from_secs(0));
    }

    #[test]
    fn test_query_error_display() {
        let err = QueryError::FetchError("test error".to_string());
        assert_eq!(err.to_string(), "Fetch failed: test error");

        let err = QueryError::NetworkError("network error".to_string());
        assert_eq!(err.to_string(), "Network error: network error");
        assert_eq!(QueryError::Cancelled.to_string(), "Request cancelled");
    }

    #[test]
    fn test_set_and_get() {
        let client = QueryClient::new();
        assert!(client.get_query_data::<i32>("key1").is_none());

        client.set_query_data("key1", |_: Option<&i32>| Some(42));
        assert_eq!(client.get_query_data::<i32>("key1"), Some(42));

        client.set_query_data("key1", |old: Option<&i32>| old.map(|n| n + 1));
        assert_eq!(client.get_query_data::<i32>("key1"), Some(43));

        // Wrong type reads as absent
        assert!(client.get_query_data::<String>("key1").is_none());
    }

    #[test]
    fn test_set_none_removes_entry() {
        let client = QueryClient::new();
        client.set_query_data("key1", |_: Option<&i32>| Some(1));
        let mut rx = client.events();

        client.set_query_data("key1", |_: Option<&i32>| None);
        assert!(client.get_query_data::<i32>("key1").is_none());

        let event = recv_now(&mut rx).expect("removal event");
        assert_eq!(event.kind, CacheEventKind::Removed);

        // Removing an absent entry is silent
        client.set_query_data("key1", |_: Option<&i32>| None);
        assert!(recv_now(&mut rx).is_none());
    }

    #[test]
    fn test_invalidate_marks_stale_and_is_idempotent() {
        let client = QueryClient::new();
        client.set_query_data("heroes", |_: Option<&Vec<u32>>| Some(vec![1, 2]));
        let mut rx = client.events();

        client.invalidate("heroes");
        client.invalidate("heroes");

        let entry = client.get_entry::<Vec<u32>>("heroes").expect("entry");
        assert!(entry.is_stale);
        assert_eq!(entry.data, vec![1, 2]);

        for _ in 0..2 {
            let event = recv_now(&mut rx).expect("invalidation event");
            assert_eq!(event.key, QueryKey::from("heroes"));
            assert_eq!(event.kind, CacheEventKind::Invalidated);
        }
    }

    #[test]
    fn test_invalidate_nonexistent_key_still_broadcasts() {
        let client = QueryClient::new();
        let mut rx = client.events();
        client.invalidate("nonexistent");

        let event = recv_now(&mut rx).expect("invalidation event");
        assert_eq!(event.key, QueryKey::from("nonexistent"));
    }

    #[test]
    fn test_invalidate_prefix() {
        let client = QueryClient::new();
        client.set_query_data(("super-hero", 1), |_: Option<&u8>| Some(1));
        client.set_query_data(("super-hero", 2), |_: Option<&u8>| Some(2));
        client.set_query_data("super-heroes", |_: Option<&u8>| Some(0));

        assert_eq!(client.invalidate_prefix("super-hero"), 2);
        assert!(client.get_entry::<u8>(("super-hero", 1)).unwrap().is_stale);
        assert!(!client.get_entry::<u8>("super-heroes").unwrap().is_stale);
    }

    #[tokio::test]
    async fn test_invalidate_command_is_lazy() {
        let client = QueryClient::new();
        let mut rx = client.events();

        let cmd: Command<()> = client.invalidate_command("test-key");
        assert!(recv_now(&mut rx).is_none());

        assert!(cmd.collect().await.is_empty());
        let event = recv_now(&mut rx).expect("invalidation event");
        assert_eq!(event.key, QueryKey::from("test-key"));
    }

    #[tokio::test]
    async fn test_fetch_query_writes_cache() {
        let client = QueryClient::new();
        let outcome = client
            .fetch_query("numbers", || async { Ok::<_, QueryError>(vec![1, 2, 3]) })
            .await;

        assert_eq!(outcome, Ok(FetchOutcome::Fetched(vec![1, 2, 3])));
        assert_eq!(client.get_query_data::<Vec<i32>>("numbers"), Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn test_fetch_query_error_leaves_cache() {
        let client = QueryClient::new();
        client.set_query_data("numbers", |_: Option<&i32>| Some(1));

        let outcome = client
            .fetch_query("numbers", || async {
                Err::<i32, _>(QueryError::NetworkError("down".to_string()))
            })
            .await;

        assert_eq!(outcome, Err(QueryError::NetworkError("down".to_string())));
        assert_eq!(client.get_query_data::<i32>("numbers"), Some(1));
    }

    #[tokio::test]
    async fn test_cancelled_fetch_is_discarded() {
        let client = QueryClient::new();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let fetching = client.clone();
        let task = tokio::spawn(async move {
            fetching
                .fetch_query("heroes", || async move {
                    let _ = release_rx.await;
                    Ok::<_, QueryError>("from server".to_string())
                })
                .await
        });

        // Let the fetch register its token
        while client.fetches.is_empty() {
            tokio::task::yield_now().await;
        }

        client.cancel_in_flight("heroes");
        client.set_query_data("heroes", |_: Option<&String>| Some("optimistic".to_string()));
        let _ = release_tx.send(());

        let outcome = task.await.expect("fetch task");
        assert_eq!(outcome, Ok(FetchOutcome::Cancelled));
        assert!(client.fetches.is_empty());
        assert_eq!(
            client.get_query_data::<String>("heroes"),
            Some("optimistic".to_string())
        );
    }

    #[tokio::test]
    async fn test_finished_fetches_release_their_tokens() {
        let client = QueryClient::with_config(QueryConfig::new(
            Duration::from_secs(0),
            Duration::from_millis(5),
        ));

        for id in 0..3u64 {
            let outcome = client
                .fetch_query(("super-hero", id), || async move { Ok::<_, QueryError>(id) })
                .await;
            assert_eq!(outcome, Ok(FetchOutcome::Fetched(id)));
        }
        let failed = client
            .fetch_query("broken", || async {
                Err::<u64, _>(QueryError::NetworkError("down".to_string()))
            })
            .await;
        assert!(failed.is_err());
        assert!(client.fetches.is_empty());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(client.collect_garbage(), 3);
        assert!(client.fetches.is_empty());
        assert!(client.cache.is_empty());
    }

    #[tokio::test]
    async fn test_overlapping_fetches_share_one_token() {
        let client = QueryClient::new();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let fetching = client.clone();
        let slow = tokio::spawn(async move {
            fetching
                .fetch_query("heroes", || async move {
                    let _ = release_rx.await;
                    Ok::<_, QueryError>(1)
                })
                .await
        });
        while client.fetches.is_empty() {
            tokio::task::yield_now().await;
        }

        let fast = client.fetch_query("heroes", || async { Ok::<_, QueryError>(2) }).await;
        assert_eq!(fast, Ok(FetchOutcome::Fetched(2)));
        // The slow fetch still holds the entry
        assert_eq!(client.fetches.get(&QueryKey::from("heroes")).map(|f| f.fetchers), Some(1));

        let _ = release_tx.send(());
        assert_eq!(slow.await.expect("fetch task"), Ok(FetchOutcome::Fetched(1)));
        assert!(client.fetches.is_empty());
    }

    #[tokio::test]
    async fn test_dropped_fetch_releases_its_token() {
        let client = QueryClient::new();
        let never = futures::future::pending::<Result<u8, QueryError>>;
        let fetch = client.fetch_query("heroes", never);
        let timed_out = tokio::time::timeout(Duration::from_millis(10), fetch).await;

        assert!(timed_out.is_err());
        assert!(client.fetches.is_empty());
    }

    #[test]
    fn test_cancel_without_fetch_is_noop() {
        let client = QueryClient::new();
        client.cancel_in_flight("idle");
        assert!(client.fetches.is_empty());
    }

    #[test]
    fn test_collect_garbage() {
        let client = QueryClient::with_config(QueryConfig::new(
            Duration::from_secs(0),
            Duration::from_millis(5),
        ));
        client.set_query_data("old", |_: Option<&i32>| Some(1));
        client.set_query_data("held", |_: Option<&i32>| Some(2));
        assert!(client.begin_mutation(&QueryKey::from("held")));

        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(client.collect_garbage(), 1);
        assert!(client.get_query_data::<i32>("old").is_none());
        assert_eq!(client.get_query_data::<i32>("held"), Some(2));
    }

    #[test]
    fn test_mutation_slot() {
        let client = QueryClient::new();
        let key = QueryKey::from("heroes");
        assert!(client.begin_mutation(&key));
        assert!(client.is_mutating("heroes"));
        assert!(!client.begin_mutation(&key));

        client.end_mutation(&key);
        assert!(!client.is_mutating("heroes"));
    }

    #[test]
    fn test_restore_exact_snapshot() {
        let client = QueryClient::new();
        let key = QueryKey::from("heroes");
        client.set_query_data("heroes", |_: Option<&i32>| Some(1));
        client.invalidate("heroes");
        let before = client.get_entry::<i32>("heroes");
        let snapshot = client.snapshot(&key);

        client.set_query_data("heroes", |_: Option<&i32>| Some(2));
        client.restore(&key, snapshot);
        assert_eq!(client.get_entry::<i32>("heroes"), before);

        let mut rx = client.events();
        client.restore(&key, None);
        assert!(client.get_entry::<i32>("heroes").is_none());
        assert_eq!(recv_now(&mut rx).map(|e| e.kind), Some(CacheEventKind::Removed));

        // Restoring absence over absence is silent
        client.restore(&key, None);
        assert!(recv_now(&mut rx).is_none());
    }

    #[test]
    fn test_restore_keeps_value_of_another_type() {
        let client = QueryClient::new();
        let key = QueryKey::from("count");
        client.set_query_data("count", |_: Option<&String>| Some("kept".to_string()));
        let snapshot = client.snapshot(&key);

        client.set_query_data("count", |_: Option<&i32>| Some(5));
        assert!(client.get_query_data::<String>("count").is_none());

        client.restore(&key, snapshot);
        assert_eq!(client.get_query_data::<String>("count"), Some("kept".to_string()));
        assert!(client.get_query_data::<i32>("count").is_none());
    }
}
