//! Route handlers.

pub mod analytics;
pub mod board;
pub mod internal;
pub mod preferences;
pub mod session;
