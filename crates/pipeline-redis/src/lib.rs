//! Pipeline Redis Data Layer
//!
//! Async Redis persistence for cards, preferences, auth sessions and
//! per-context scalar storage, plus the store adapters the board consumes.

pub mod client;
pub mod queries;
pub mod store;

pub use client::{init_pool, RedisError, RedisPool, RedisResult};
pub use store::{AuthEvents, RedisAuthService, RedisCardStore, RedisLocalStorage, RedisPreferenceStore};
