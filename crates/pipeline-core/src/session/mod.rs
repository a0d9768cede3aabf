//! Session access control for the board.

pub mod guard;

pub use guard::SessionGuard;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Sessions older than this are expired regardless of the auth service.
pub const MAX_SESSION_AGE_HOURS: i64 = 8;

/// Local storage key for the session start timestamp.
pub const SESSION_START_KEY: &str = "crm_session_start";

/// Where unauthenticated users are sent.
pub const DEFAULT_SIGN_IN_PATH: &str = "/login";

/// An authenticated browsing session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    pub started_at: DateTime<Utc>,
}

impl Session {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.started_at
    }
}

/// Guard lifecycle as seen by presentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum GuardState {
    Checking,
    Authorized { session: Session },
    Unauthorized { redirect_to: String },
}

impl GuardState {
    pub fn is_authorized(&self) -> bool {
        matches!(self, Self::Authorized { .. })
    }
}

/// Tunables for the guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardSettings {
    pub max_age: Duration,
    pub sign_in_path: String,
    pub storage_key: String,
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self {
            max_age: Duration::hours(MAX_SESSION_AGE_HOURS),
            sign_in_path: DEFAULT_SIGN_IN_PATH.to_string(),
            storage_key: SESSION_START_KEY.to_string(),
        }
    }
}
