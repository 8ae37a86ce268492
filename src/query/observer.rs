//! Query subscriptions: observers of one cache key.
//!
//! A [`Query`] is a [`SubscriptionSource`] that keeps its subscriber in sync
//! with the cache entry for its key:
//!
//! 1. If cached data exists, it's immediately emitted
//! 2. If data is stale or missing, a fetch is triggered
//! 3. Every write to the key (fetches, optimistic updates, rollbacks) is emitted
//! 4. When the key is invalidated, the query refetches in the background
//!
//! A query built with [`Query::enabled`]`(false)` never fetches. It still
//! emits whatever the cache holds, and [`QueryState::Idle`] while it holds
//! nothing. Dependent queries use this to wait for the data they need:
//!
//! ```rust,ignore
//! let channel_id = client
//!     .get_query_data::<User>(("user", email))
//!     .and_then(|user| user.channel_id);
//!
//! let channel = Query::new(("channel", channel_id.unwrap_or_default()), fetch_channel, client)
//!     .enabled(channel_id.is_some());
//! ```
//!
//! The subscription starts listening for cache events when its stream is
//! created, so writes made between subscribing and the first poll are not lost.

use std::sync::Arc;

use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, trace};

use crate::subscription::{SubscriptionId, SubscriptionSource};

use super::cache::CacheEntry;
use super::client::{CacheEvent, CacheEventKind, QueryClient, QueryError};
use super::key::QueryKey;

type Fetcher<V> = Arc<dyn Fn() -> BoxFuture<'static, Result<V, QueryError>> + Send + Sync>;
type InitialData<V> = Arc<dyn Fn(&QueryClient) -> Option<V> + Send + Sync>;

/// The state of a query result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryState<T> {
    /// Query is disabled and nothing is cached for it.
    Idle,
    /// Query is loading (fetching data).
    Loading,
    /// Query succeeded with data.
    Success {
        /// The data returned by the query.
        data: T,
        /// Whether the data is stale and should be refetched.
        is_stale: bool,
    },
    /// Query failed with an error.
    Error(String),
}

/// A query result containing the current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResult<T> {
    /// The current state of the query.
    pub state: QueryState<T>,
}

impl<T> QueryResult<T> {
    const fn new(state: QueryState<T>) -> Self {
        Self { state }
    }

    /// Returns the data if the query succeeded, otherwise `None`.
    pub const fn data(&self) -> Option<&T> {
        match &self.state {
            QueryState::Success { data, .. } => Some(data),
            _ => None,
        }
    }

    /// Returns the error message if the query failed.
    pub fn error(&self) -> Option<&str> {
        match &self.state {
            QueryState::Error(message) => Some(message.as_str()),
            _ => None,
        }
    }

    /// Returns `true` if the query is disabled and has no data.
    pub const fn is_idle(&self) -> bool {
        matches!(self.state, QueryState::Idle)
    }

    /// Returns `true` if the query is currently loading.
    pub const fn is_loading(&self) -> bool {
        matches!(self.state, QueryState::Loading)
    }

    /// Returns `true` if the query succeeded.
    pub const fn is_success(&self) -> bool {
        matches!(self.state, QueryState::Success { .. })
    }

    /// Returns `true` if the query failed.
    pub const fn is_error(&self) -> bool {
        matches!(self.state, QueryState::Error(_))
    }

    /// Returns `true` if the query data is stale.
    pub const fn is_stale(&self) -> bool {
        matches!(self.state, QueryState::Success { is_stale: true, .. })
    }
}

/// A query subscription that monitors and fetches data with caching.
///
/// # Example
///
/// ```rust,ignore
/// use optimistic_query::query::{Query, QueryClient};
/// use std::sync::Arc;
///
/// let client = Arc::new(QueryClient::new());
///
/// let query = Query::new(
///     "super-heroes",
///     || Box::pin(async { fetch_heroes().await }),
///     client.clone(),
/// );
/// ```
pub struct Query<V> {
    key: QueryKey,
    fetcher: Fetcher<V>,
    initial_data: Option<InitialData<V>>,
    enabled: bool,
    client: Arc<QueryClient>,
}

impl<V> Query<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates a new query with the given key, fetcher, and client.
    ///
    /// # Arguments
    ///
    /// * `key` - Identifies the cached result set
    /// * `fetcher` - An async function that fetches the data
    /// * `client` - The query client owning the cache
    pub fn new<F>(key: impl Into<QueryKey>, fetcher: F, client: Arc<QueryClient>) -> Self
    where
        F: Fn() -> BoxFuture<'static, Result<V, QueryError>> + Send + Sync + 'static,
    {
        Self {
            key: key.into(),
            fetcher: Arc::new(fetcher),
            initial_data: None,
            enabled: true,
            client,
        }
    }

    /// Seeds a missing entry from data already in the cache.
    ///
    /// When the key has no cached value, `derive` is called with the client; if
    /// it returns `Some`, that value is cached and emitted as fresh data and no
    /// fetch is made. A typical use is populating a detail view from a list:
    ///
    /// ```rust,ignore
    /// Query::new(("super-hero", id), fetch_hero(id), client.clone())
    ///     .initial_data(move |client| {
    ///         client
    ///             .get_query_data::<Listing<Hero>>("super-heroes")?
    ///             .find(id)
    ///             .cloned()
    ///     })
    /// ```
    #[must_use]
    pub fn initial_data<F>(mut self, derive: F) -> Self
    where
        F: Fn(&QueryClient) -> Option<V> + Send + Sync + 'static,
    {
        self.initial_data = Some(Arc::new(derive));
        self
    }

    /// Turns fetching on or off. Queries are enabled by default.
    ///
    /// A disabled query makes no requests: missing data is reported as
    /// [`QueryState::Idle`] and invalidation only marks cached data stale.
    /// Writes to the key are still emitted. The flag is part of the
    /// subscription id, so a query re-declared with `enabled(true)` replaces
    /// the disabled one and fetches.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// The key this query observes.
    pub const fn key(&self) -> &QueryKey {
        &self.key
    }
}

impl<V> SubscriptionSource for Query<V>
where
    V: Clone + Send + Sync + 'static,
{
    type Output = QueryResult<V>;

    fn stream(&self) -> BoxStream<'static, Self::Output> {
        let observer = Observer {
            key: self.key.clone(),
            fetcher: self.fetcher.clone(),
            initial_data: self.initial_data.clone(),
            enabled: self.enabled,
            rx: self.client.events(),
            client: self.client.clone(),
            last_revision: 0,
        };

        stream::unfold((observer, Phase::Initial), |(mut observer, phase)| async move {
            let (result, next) = observer.step(phase).await?;
            Some((result, (observer, next)))
        })
        .boxed()
    }

    fn id(&self) -> SubscriptionId {
        SubscriptionId::hashed::<Self>(&(&self.key, self.enabled))
    }
}

/// Internal state machine for the Query subscription.
enum Phase {
    Initial,
    Fetching,
    Watching,
}

struct Observer<V> {
    key: QueryKey,
    fetcher: Fetcher<V>,
    initial_data: Option<InitialData<V>>,
    enabled: bool,
    client: Arc<QueryClient>,
    rx: broadcast::Receiver<CacheEvent>,
    /// Revision of the last cache write emitted, so echoes are skipped.
    last_revision: u64,
}

impl<V> Observer<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Advances until there is a result to emit. `None` ends the stream.
    async fn step(&mut self, mut phase: Phase) -> Option<(QueryResult<V>, Phase)> {
        loop {
            phase = match phase {
                Phase::Initial => return Some(self.start()),
                Phase::Fetching => match self.fetch().await {
                    Some(emitted) => return Some(emitted),
                    None => Phase::Watching,
                },
                Phase::Watching => return self.watch().await,
            };
        }
    }

    fn start(&mut self) -> (QueryResult<V>, Phase) {
        let stale_time = self.client.config().stale_time;
        if let Some((mut cached, revision)) = self.client.read::<V>(&self.key) {
            self.last_revision = revision;
            if cached.check_staleness(stale_time) {
                return self.refresh(Some(cached.data));
            }
            return (success(cached.data, false), Phase::Watching);
        }

        if let Some(derive) = &self.initial_data
            && let Some(data) = derive(self.client.as_ref())
        {
            debug!(key = %self.key, "seeded from initial data");
            let value = data.clone();
            if let Some(revision) = self
                .client
                .write(self.key.clone(), move |_: Option<&V>| Some(CacheEntry::new(value)))
            {
                self.last_revision = revision;
            }
            return (success(data, false), Phase::Watching);
        }

        self.refresh(None)
    }

    /// Reports `stale` data, or the lack of it, and refetches if enabled.
    fn refresh(&self, stale: Option<V>) -> (QueryResult<V>, Phase) {
        let result = match stale {
            Some(data) => success(data, true),
            None if self.enabled => QueryResult::new(QueryState::Loading),
            None => QueryResult::new(QueryState::Idle),
        };
        let next = if self.enabled {
            Phase::Fetching
        } else {
            Phase::Watching
        };
        (result, next)
    }

    /// Fetches into the cache. `None` means the fetch was cancelled and there
    /// is nothing to emit.
    async fn fetch(&mut self) -> Option<(QueryResult<V>, Phase)> {
        let fetcher = self.fetcher.clone();
        match self
            .client
            .fetch_revision(self.key.clone(), move || fetcher())
            .await
        {
            Ok(Some((data, revision))) => {
                self.last_revision = revision;
                Some((success(data, false), Phase::Watching))
            }
            Ok(None) => None,
            Err(e) => {
                debug!(key = %self.key, error = %e, "query fetch failed");
                Some((
                    QueryResult::new(QueryState::Error(e.to_string())),
                    Phase::Watching,
                ))
            }
        }
    }

    async fn watch(&mut self) -> Option<(QueryResult<V>, Phase)> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.key != self.key => {}
                Ok(event) => match event.kind {
                    CacheEventKind::Updated => {
                        if event.revision > self.last_revision
                            && let Some(emitted) = self.emit_cached()
                        {
                            return Some((emitted, Phase::Watching));
                        }
                    }
                    CacheEventKind::Removed => {
                        self.last_revision = event.revision;
                        return Some(self.refresh(None));
                    }
                    CacheEventKind::Invalidated => {
                        trace!(key = %self.key, "refetching after invalidation");
                        let stale = self.client.get_entry::<V>(&self.key).map(|e| e.data);
                        return Some(self.refresh(stale));
                    }
                },
                Err(RecvError::Lagged(skipped)) => {
                    debug!(key = %self.key, skipped, "query lagged behind cache events");
                    if let Some(resynced) = self.resync() {
                        return Some(resynced);
                    }
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Catches up with the cache after missed events. A removal or
    /// invalidation among them shows up as a missing or stale entry.
    fn resync(&mut self) -> Option<(QueryResult<V>, Phase)> {
        match self.client.read::<V>(&self.key) {
            None => Some(self.refresh(None)),
            Some((entry, revision)) if entry.is_stale => {
                self.last_revision = revision;
                Some(self.refresh(Some(entry.data)))
            }
            Some(_) => self.emit_cached().map(|emitted| (emitted, Phase::Watching)),
        }
    }

    /// Emits the current cache entry if it is newer than the last one emitted.
    fn emit_cached(&mut self) -> Option<QueryResult<V>> {
        let (entry, revision) = self.client.read::<V>(&self.key)?;
        if revision <= self.last_revision {
            return None;
        }
        self.last_revision = revision;
        Some(success(entry.data, entry.is_stale))
    }
}

const fn success<V>(data: V, is_stale: bool) -> QueryResult<V> {
    QueryResult::new(QueryState::Success { data, is_stale })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::query::QueryConfig;

    async fn next<V>(stream: &mut BoxStream<'static, QueryResult<V>>) -> QueryResult<V> {
        tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("query should emit within timeout")
            .expect("query stream should not end")
    }

    fn counting_fetcher(
        calls: Arc<AtomicUsize>,
        value: i32,
    ) -> impl Fn() -> BoxFuture<'static, Result<i32, QueryError>> + Send + Sync + 'static {
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            let fut: BoxFuture<'static, Result<i32, QueryError>> =
                Box::pin(async move { Ok(value) });
            fut
        }
    }

    #[test]
    fn test_query_result_predicates() {
        let loading: QueryResult<i32> = QueryResult::new(QueryState::Loading);
        assert!(loading.is_loading());
        assert!(!loading.is_success());
        assert!(QueryResult::<i32>::new(QueryState::Idle).is_idle());
        assert_eq!(loading.data(), None);

        let stale = success(42, true);
        assert!(stale.is_success());
        assert!(stale.is_stale());
        assert_eq!(stale.data(), Some(&42));

        let error: QueryResult<i32> = QueryResult::new(QueryState::Error("boom".to_string()));
        assert!(error.is_error());
        assert!(!error.is_idle());
        assert_eq!(error.error(), Some("boom"));
        assert!(!error.is_stale());
    }

    #[test]
    fn test_query_id_depends_on_key_and_type() {
        let client = Arc::new(QueryClient::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let a = Query::new("user-123", counting_fetcher(calls.clone(), 1), client.clone());
        let b = Query::new("user-123", counting_fetcher(calls.clone(), 2), client.clone());
        let c = Query::new("user-456", counting_fetcher(calls, 1), client.clone());
        let d = Query::new(
            "user-123",
            || Box::pin(async { Ok::<_, QueryError>("text".to_string()) }),
            client,
        );

        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
        assert_ne!(a.id(), d.id());

        let disabled = Query::new("user-123", counting_fetcher(Arc::default(), 1), client_of(&a))
            .enabled(false);
        assert_ne!(a.id(), disabled.id());
    }

    fn client_of<V>(query: &Query<V>) -> Arc<QueryClient> {
        query.client.clone()
    }

    #[tokio::test]
    async fn test_missing_data_loads_then_fetches() {
        let client = Arc::new(QueryClient::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let query = Query::new("numbers", counting_fetcher(calls.clone(), 7), client.clone());

        let mut stream = query.stream();
        assert!(next(&mut stream).await.is_loading());
        assert_eq!(next(&mut stream).await, success(7, false));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.get_query_data::<i32>("numbers"), Some(7));
    }

    #[tokio::test]
    async fn test_fresh_cache_skips_fetch() {
        let client = Arc::new(QueryClient::with_config(QueryConfig::new(
            Duration::from_secs(60),
            Duration::from_secs(300),
        )));
        client.set_query_data("numbers", |_: Option<&i32>| Some(3));
        let calls = Arc::new(AtomicUsize::new(0));
        let query = Query::new("numbers", counting_fetcher(calls.clone(), 9), client);

        let mut stream = query.stream();
        assert_eq!(next(&mut stream).await, success(3, false));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stale_cache_emits_then_refetches() {
        let client = Arc::new(QueryClient::new());
        client.set_query_data("numbers", |_: Option<&i32>| Some(3));
        let calls = Arc::new(AtomicUsize::new(0));
        let query = Query::new("numbers", counting_fetcher(calls.clone(), 9), client);

        tokio::time::sleep(Duration::from_millis(2)).await;
        let mut stream = query.stream();
        assert_eq!(next(&mut stream).await, success(3, true));
        assert_eq!(next(&mut stream).await, success(9, false));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_external_writes_are_emitted() {
        let client = Arc::new(QueryClient::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let query = Query::new("numbers", counting_fetcher(calls, 1), client.clone());

        let mut stream = query.stream();
        next(&mut stream).await; // Loading
        next(&mut stream).await; // fetched

        client.set_query_data("numbers", |old: Option<&i32>| old.map(|n| n + 10));
        client.set_query_data("other", |_: Option<&i32>| Some(0));
        assert_eq!(next(&mut stream).await, success(11, false));
    }

    #[tokio::test]
    async fn test_invalidation_triggers_refetch() {
        let client = Arc::new(QueryClient::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let query = Query::new("numbers", counting_fetcher(calls.clone(), 5), client.clone());

        let mut stream = query.stream();
        next(&mut stream).await; // Loading
        next(&mut stream).await; // fetched

        client.invalidate("numbers");
        assert_eq!(next(&mut stream).await, success(5, true));
        assert_eq!(next(&mut stream).await, success(5, false));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fetch_error_is_emitted() {
        let client = Arc::new(QueryClient::new());
        let query = Query::new(
            "numbers",
            || Box::pin(async { Err::<i32, _>(QueryError::FetchError("404".to_string())) }),
            client,
        );

        let mut stream = query.stream();
        next(&mut stream).await; // Loading
        let result = next(&mut stream).await;
        assert_eq!(result.error(), Some("Fetch failed: 404"));
    }

    #[tokio::test]
    async fn test_initial_data_skips_fetch() {
        let client = Arc::new(QueryClient::new());
        client.set_query_data("super-heroes", |_: Option<&Vec<i32>>| Some(vec![10, 20]));
        let calls = Arc::new(AtomicUsize::new(0));

        let fetcher = counting_fetcher(calls.clone(), 0);
        let query = Query::new(("super-hero", 2), fetcher, client.clone()).initial_data(|client| {
            client
                .get_query_data::<Vec<i32>>("super-heroes")?
                .get(1)
                .copied()
        });

        let mut stream = query.stream();
        assert_eq!(next(&mut stream).await, success(20, false));
        assert_eq!(client.get_query_data::<i32>(("super-hero", 2)), Some(20));

        // The seeding write is not echoed back
        let pending = tokio::time::timeout(Duration::from_millis(50), stream.next()).await;
        assert!(pending.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_initial_data_miss_falls_back_to_fetch() {
        let client = Arc::new(QueryClient::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let query = Query::new(("super-hero", 9), counting_fetcher(calls.clone(), 90), client)
            .initial_data(|_| None);

        let mut stream = query.stream();
        assert!(next(&mut stream).await.is_loading());
        assert_eq!(next(&mut stream).await, success(90, false));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disabled_query_never_fetches() {
        let client = Arc::new(QueryClient::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let query = Query::new(("channel", 0), counting_fetcher(calls.clone(), 4), client.clone())
            .enabled(false);

        let mut stream = query.stream();
        assert!(next(&mut stream).await.is_idle());

        // Writes are still observed, invalidation does not fetch
        client.set_query_data(("channel", 0), |_: Option<&i32>| Some(1));
        assert_eq!(next(&mut stream).await, success(1, false));
        client.invalidate(("channel", 0));
        assert_eq!(next(&mut stream).await, success(1, true));

        let pending = tokio::time::timeout(Duration::from_millis(50), stream.next()).await;
        assert!(pending.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dependent_query_fetches_once_enabled() {
        let client = Arc::new(QueryClient::new());
        let channel = |client: &Arc<QueryClient>, calls: &Arc<AtomicUsize>| {
            let channel_id = client.get_query_data::<i32>(("user", "a@b.c"));
            Query::new(
                ("channel", channel_id.unwrap_or_default()),
                counting_fetcher(calls.clone(), 70),
                client.clone(),
            )
            .enabled(channel_id.is_some())
        };
        let calls = Arc::new(AtomicUsize::new(0));

        let mut waiting = channel(&client, &calls).stream();
        assert!(next(&mut waiting).await.is_idle());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let fetch_user = counting_fetcher(Arc::default(), 7);
        let mut user = Query::new(("user", "a@b.c"), fetch_user, client.clone()).stream();
        next(&mut user).await; // Loading
        assert_eq!(next(&mut user).await, success(7, false));

        let mut ready = channel(&client, &calls).stream();
        assert!(next(&mut ready).await.is_loading());
        assert_eq!(next(&mut ready).await, success(70, false));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.get_query_data::<i32>(("channel", 7)), Some(70));
    }

    #[tokio::test]
    async fn test_lagged_query_refetches_after_missed_removal() {
        let client = Arc::new(QueryClient::with_config(
            QueryConfig::default().with_event_capacity(1),
        ));
        let calls = Arc::new(AtomicUsize::new(0));
        let query = Query::new("numbers", counting_fetcher(calls.clone(), 3), client.clone());

        let mut stream = query.stream();
        next(&mut stream).await; // Loading
        assert_eq!(next(&mut stream).await, success(3, false));

        // The removal is pushed out of the channel before the query sees it
        client.set_query_data("numbers", |_: Option<&i32>| None);
        client.set_query_data("other", |_: Option<&i32>| Some(1));
        client.set_query_data("other", |_: Option<&i32>| Some(2));

        assert!(next(&mut stream).await.is_loading());
        assert_eq!(next(&mut stream).await, success(3, false));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_lagged_query_refetches_after_missed_invalidation() {
        let client = Arc::new(QueryClient::with_config(
            QueryConfig::default().with_event_capacity(1),
        ));
        let calls = Arc::new(AtomicUsize::new(0));
        let query = Query::new("numbers", counting_fetcher(calls.clone(), 3), client.clone());

        let mut stream = query.stream();
        next(&mut stream).await; // Loading
        next(&mut stream).await; // fetched

        client.invalidate("numbers");
        client.invalidate("other");
        client.invalidate("other");

        assert_eq!(next(&mut stream).await, success(3, true));
        assert_eq!(next(&mut stream).await, success(3, false));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
