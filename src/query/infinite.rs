//! Paginated queries that accumulate pages under one key.
//!
//! An [`InfiniteQuery`] caches a [`Pages`] value: every page loaded so far
//! together with the parameter it was fetched with. The next parameter is
//! derived from the pages already loaded, so the caller only says how to
//! fetch one page and how to find the next one.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use futures::FutureExt;
//! use optimistic_query::query::{InfiniteQuery, QueryClient, QueryError};
//!
//! # futures::executor::block_on(async {
//! let client = Arc::new(QueryClient::new());
//! let colors = InfiniteQuery::new(
//!     "colors",
//!     1u32,
//!     |page: u32| async move { Ok::<_, QueryError>(vec![page * 2 - 1, page * 2]) }.boxed(),
//!     |_last: &Vec<u32>, pages: &[Vec<u32>]| {
//!         (pages.len() < 4).then(|| pages.len() as u32 + 1)
//!     },
//!     client,
//! );
//!
//! while colors.has_next_page() {
//!     colors.fetch_next_page().await?;
//! }
//! assert_eq!(colors.pages().map(|p| p.pages.len()), Some(4));
//! # Ok::<_, QueryError>(())
//! # }).unwrap();
//! ```

use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::debug;

use super::client::{FetchOutcome, QueryClient, QueryError};
use super::key::QueryKey;
use super::observer::Query;

type PageFetcher<P, V> = Arc<dyn Fn(P) -> BoxFuture<'static, Result<V, QueryError>> + Send + Sync>;
type NextPageParamFn<P, V> = dyn Fn(&V, &[V]) -> Option<P> + Send + Sync;

/// The pages loaded by an [`InfiniteQuery`], in load order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pages<P, V> {
    pub pages: Vec<V>,
    /// The parameter each page was fetched with.
    pub params: Vec<P>,
}

impl<P, V> Default for Pages<P, V> {
    fn default() -> Self {
        Self {
            pages: Vec::new(),
            params: Vec::new(),
        }
    }
}

impl<P, V> Pages<P, V> {
    /// Number of pages loaded.
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Iterates over the items of every page.
    pub fn items<'a, T: 'a>(&'a self) -> impl Iterator<Item = &'a T>
    where
        &'a V: IntoIterator<Item = &'a T>,
    {
        self.pages.iter().flatten()
    }

    fn push(&mut self, param: P, page: V) {
        self.params.push(param);
        self.pages.push(page);
    }

    fn next_param(&self, next_page_param: &NextPageParamFn<P, V>) -> Option<P> {
        let last = self.pages.last()?;
        next_page_param(last, &self.pages)
    }
}

/// A query whose value grows one page at a time.
pub struct InfiniteQuery<P, V> {
    key: QueryKey,
    initial_param: P,
    fetch_page: PageFetcher<P, V>,
    next_page_param: Arc<NextPageParamFn<P, V>>,
    client: Arc<QueryClient>,
}

impl<P, V> Clone for InfiniteQuery<P, V>
where
    P: Clone,
{
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            initial_param: self.initial_param.clone(),
            fetch_page: self.fetch_page.clone(),
            next_page_param: self.next_page_param.clone(),
            client: self.client.clone(),
        }
    }
}

impl<P, V> InfiniteQuery<P, V>
where
    P: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates an infinite query.
    ///
    /// # Arguments
    ///
    /// * `key` - The cache key holding the accumulated [`Pages`]
    /// * `initial_param` - The parameter of the first page
    /// * `fetch_page` - Fetches the page for a parameter
    /// * `next_page_param` - Given the last page and all pages, returns the
    ///   parameter of the next page, or `None` when there are no more
    /// * `client` - The query client owning the cache
    pub fn new<F, N>(
        key: impl Into<QueryKey>,
        initial_param: P,
        fetch_page: F,
        next_page_param: N,
        client: Arc<QueryClient>,
    ) -> Self
    where
        F: Fn(P) -> BoxFuture<'static, Result<V, QueryError>> + Send + Sync + 'static,
        N: Fn(&V, &[V]) -> Option<P> + Send + Sync + 'static,
    {
        Self {
            key: key.into(),
            initial_param,
            fetch_page: Arc::new(fetch_page),
            next_page_param: Arc::new(next_page_param),
            client,
        }
    }

    /// The key the pages are cached under.
    pub const fn key(&self) -> &QueryKey {
        &self.key
    }

    /// Returns the pages loaded so far.
    pub fn pages(&self) -> Option<Pages<P, V>> {
        self.client.get_query_data(&self.key)
    }

    /// Returns `true` if [`fetch_next_page`](Self::fetch_next_page) would make
    /// a request. Always `true` before the first page is loaded.
    pub fn has_next_page(&self) -> bool {
        match self.pages() {
            Some(pages) => pages.next_param(self.next_page_param.as_ref()).is_some(),
            None => true,
        }
    }

    /// Fetches the next page and appends it to the cached pages.
    ///
    /// Loads the first page when nothing is cached. When there is no next
    /// page the cached pages are returned without a request. Like any fetch,
    /// it is discarded if [`QueryClient::cancel_in_flight`] runs for the key
    /// first.
    pub async fn fetch_next_page(&self) -> Result<FetchOutcome<Pages<P, V>>, QueryError> {
        let param = match self.pages() {
            None => self.initial_param.clone(),
            Some(pages) => match pages.next_param(self.next_page_param.as_ref()) {
                Some(param) => param,
                None => {
                    debug!(key = %self.key, "no next page");
                    return Ok(FetchOutcome::Fetched(pages));
                }
            },
        };

        let fetch_page = self.fetch_page.clone();
        let request = param.clone();
        let merged = self
            .client
            .fetch_merged(
                self.key.clone(),
                move || fetch_page(request),
                move |old: Option<&Pages<P, V>>, page| {
                    let mut pages = old.cloned().unwrap_or_default();
                    pages.push(param, page);
                    pages
                },
            )
            .await?;

        Ok(match merged {
            Some((pages, _)) => {
                debug!(key = %self.key, pages = pages.len(), "page loaded");
                FetchOutcome::Fetched(pages)
            }
            None => FetchOutcome::Cancelled,
        })
    }

    /// Returns a [`Query`] observing the pages.
    ///
    /// When it refetches, the query reloads as many pages as are cached,
    /// starting again from the initial parameter.
    pub fn query(&self) -> Query<Pages<P, V>> {
        let this = self.clone();
        Query::new(self.key.clone(), move || this.clone().reload().boxed(), self.client.clone())
    }

    async fn reload(self) -> Result<Pages<P, V>, QueryError> {
        let loaded = self.pages().map_or(1, |pages| pages.len().max(1));
        let mut pages = Pages::default();
        let mut param = self.initial_param.clone();
        loop {
            let page = (self.fetch_page)(param.clone()).await?;
            pages.push(param, page);
            if pages.len() >= loaded {
                break;
            }
            match pages.next_param(self.next_page_param.as_ref()) {
                Some(next) => param = next,
                None => break,
            }
        }
        Ok(pages)
    }
}
