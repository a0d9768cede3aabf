//! Pipeline Core Library
//!
//! Domain models and business logic for the CRM sales-pipeline board.

pub mod analytics;
pub mod board;
pub mod config;
pub mod error;
pub mod format;
pub mod memory;
pub mod notifier;
pub mod notify;
pub mod preferences;
pub mod service;
pub mod session;

pub use config::PipelineConfig;
pub use error::{PipelineError, PipelineResult, ServiceError, ServiceResult};
