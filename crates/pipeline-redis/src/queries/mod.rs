//! Redis query implementations.

pub mod cards;
pub mod local;
pub mod preferences;
pub mod sessions;

/// Key prefix shared by every record.
pub const PREFIX: &str = "crm";
