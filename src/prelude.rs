//! Prelude module for convenient imports.
//!
//! ```
//! use optimistic_query::prelude::*;
//! ```
//!
//! # What's included
//!
//! - [`Command`] - For performing side effects
//! - [`SubscriptionSource`] - For observing the cache
//! - [`QueryClient`], [`Query`], [`InfiniteQuery`], [`OptimisticMutation`] and their
//!   result types

pub use crate::command::Command;
pub use crate::query::{
    InfiniteQuery, MutationError, MutationState, OptimisticMutation, Query, QueryClient,
    QueryError, QueryKey, QueryResult, QueryState,
};
pub use crate::subscription::{Handle, SubscriptionSource};
