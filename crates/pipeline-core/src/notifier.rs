//! Tells a running web server about writes made by another process.
//!
//! The server turns each notification into a change event, so its board
//! reloads and connected clients refresh. Delivery is best effort: if no
//! server is listening the write still stands.

use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::PipelineConfig;

/// Header carrying the shared secret on `/internal/notify`.
pub const NOTIFY_TOKEN_HEADER: &str = "x-notify-token";

const NOTIFY_PATH: &str = "/internal/notify";

/// Posts data-change notifications to the web server.
#[derive(Clone)]
pub struct WebNotifier {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl WebNotifier {
    pub fn new(base_url: &str, token: Option<&str>) -> Self {
        debug!(base_url = %base_url, "WebNotifier initialized");
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(2))
                .no_proxy()
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(str::to_string),
        }
    }

    /// Notifier for the server described by `config.web`.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(&config.web.base_url(), config.web.notify_token.as_deref())
    }

    pub fn endpoint(&self) -> String {
        format!("{}{}", self.base_url, NOTIFY_PATH)
    }

    /// Cards were added, moved or removed. Returns whether the server took it.
    pub async fn notify_board_refresh(&self) -> bool {
        self.send(board_refresh_payload(), "board refresh").await
    }

    /// A user's stored preferences changed.
    pub async fn notify_preferences_changed(&self, user_id: &str) -> bool {
        self.send(preferences_changed_payload(user_id), "preferences")
            .await
    }

    async fn send(&self, payload: Value, what: &'static str) -> bool {
        let url = self.endpoint();
        debug!(url = %url, what, "Sending change notification");

        let mut request = self.client.post(&url).json(&payload);
        if let Some(token) = &self.token {
            request = request.header(NOTIFY_TOKEN_HEADER, token.as_str());
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                debug!(what, "Change notification delivered");
                true
            }
            Ok(response) => {
                warn!(what, status_code = %response.status(), "Change notification refused");
                false
            }
            Err(e) => {
                // Usually just means `pipeline serve` is not running.
                debug!(what, error = %e, url = %url, "Change notification not delivered");
                false
            }
        }
    }
}

pub fn board_refresh_payload() -> Value {
    json!({ "type": "BoardRefresh" })
}

pub fn preferences_changed_payload(user_id: &str) -> Value {
    json!({ "type": "PreferencesChanged", "data": { "user_id": user_id } })
}
