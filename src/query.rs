//! Keyed query cache and optimistic mutations.
//!
//! This module provides a cache of fetched results, subscription-based queries
//! that keep observers in sync with it, and mutations that update it
//! optimistically, similar to SWR or TanStack Query.
//!
//! # Features
//!
//! - **Queries**: Subscription-based data fetching with caching and background refetching
//! - **Dependent queries**: Queries that stay idle until the data they need is available
//! - **Infinite queries**: Paginated results accumulated page by page under one key
//! - **Optimistic mutations**: Provisional cache writes with exact rollback on failure
//! - **Cache management**: Invalidation, cancellation of in-flight fetches, garbage collection
//!
//! # Example
//!
//! ```rust,ignore
//! use optimistic_query::prelude::*;
//! use optimistic_query::query::{append_optimistic, OptimisticMutation, QueryClient};
//! use std::sync::Arc;
//!
//! let client = Arc::new(QueryClient::new());
//!
//! let heroes = client.subscribe("super-heroes", fetch_heroes, |result| {
//!     if let Some(listing) = result.data() {
//!         render(listing);
//!     }
//! });
//!
//! let add_hero =
//!     OptimisticMutation::new("super-heroes", client.clone(), add_hero, append_optimistic);
//! let cmd = add_hero.mutate(hero, Message::HeroAdded, Message::AddFailed)?;
//! ```

mod cache;
mod client;
mod config;
mod infinite;
mod key;
mod listing;
pub mod mock;
mod mutation;
mod observer;

// Re-export main types
pub use cache::CacheEntry;
pub use client::{CacheEvent, CacheEventKind, FetchOutcome, QueryClient, QueryError};
pub use config::QueryConfig;
pub use infinite::{InfiniteQuery, Pages};
pub use key::QueryKey;
pub use listing::{Identified, Listing, append_optimistic};
pub use mutation::{MutationError, MutationResult, MutationState, OptimisticMutation};
pub use observer::{Query, QueryResult, QueryState};
