//! # optimistic-query - keyed query cache with optimistic mutations
//!
//! A client-side data cache in the style of TanStack Query, built around one
//! consistency protocol: an **optimistic mutation** writes its expected result
//! into the cache before the real request completes, restores the exact
//! pre-mutation snapshot if the request fails, and invalidates the key if it
//! succeeds so the authoritative value is refetched.
//!
//! ## Core Components
//!
//! - [`QueryClient`](query::QueryClient): The keyed cache with get/set/invalidate/cancel
//! - [`Query`](query::Query): A subscription that keeps an observer in sync with one key
//! - [`OptimisticMutation`](query::OptimisticMutation): The mutation coordinator
//! - [`Command`](command::Command): Lazily executed side effects producing messages
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use futures::FutureExt;
//! use optimistic_query::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let client = Arc::new(QueryClient::new());
//! client.set_query_data("count", |_: Option<&i32>| Some(1));
//!
//! let increment = OptimisticMutation::new(
//!     "count",
//!     client.clone(),
//!     |by: i32| {
//!         async move { Err::<(), _>(QueryError::NetworkError(format!("lost +{by}"))) }.boxed()
//!     },
//!     |old: Option<&i32>, by: &i32| old.copied().unwrap_or(0) + by,
//! );
//!
//! let cmd = increment.mutate(1, |()| "saved", |_| "rolled back").unwrap();
//! assert_eq!(client.get_query_data::<i32>("count"), Some(2)); // optimistic
//!
//! assert_eq!(cmd.collect().await, vec!["rolled back"]);
//! assert_eq!(client.get_query_data::<i32>("count"), Some(1)); // restored
//! # }
//! ```
//!
//! ## Logging
//!
//! Cache writes, invalidations, cancellations and mutation transitions are
//! reported through [`tracing`]. The crate never installs a subscriber.

pub mod command;
pub mod prelude;
pub mod query;
pub mod subscription;

pub use command::Command;
