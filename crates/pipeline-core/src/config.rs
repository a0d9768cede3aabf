//! Configuration loaded from `pipeline.toml`.
//!
//! Every field has a default, so a missing file or a partial file is fine.
//! Environment variables override the file; CLI flags override both.
//!
//! ```toml
//! redis_url = "redis://127.0.0.1:6379"
//!
//! [web]
//! host = "127.0.0.1"
//! port = 3040
//! notify_token = "change-me"
//!
//! [session]
//! max_age_hours = 8
//! sign_in_path = "/login"
//!
//! [board]
//! won_stage = "won"
//! write_timeout_secs = 15
//!
//! [[board.stages]]
//! id = "lead"
//! title = "Lead"
//!
//! [[board.stages]]
//! id = "won"
//! title = "Closed Won"
//! kind = "won"
//! ```

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

use crate::board::{default_stages, Stage, StageKind};
use crate::error::{PipelineError, PipelineResult};
use crate::session::{GuardSettings, DEFAULT_SIGN_IN_PATH, MAX_SESSION_AGE_HOURS, SESSION_START_KEY};

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_PORT: u16 = 3040;
pub const DEFAULT_WRITE_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub redis_url: String,
    pub web: WebConfig,
    pub session: SessionConfig,
    pub board: BoardConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
    /// Shared secret required on `/internal/notify` when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notify_token: Option<String>,
}

impl WebConfig {
    /// Base URL local tools use to reach the server.
    pub fn base_url(&self) -> String {
        let host = match self.host.as_str() {
            "0.0.0.0" | "::" => "127.0.0.1",
            other => other,
        };
        format!("http://{}:{}", host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub max_age_hours: i64,
    pub sign_in_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    pub stages: Vec<Stage>,
    pub won_stage: String,
    /// 0 disables the timeout.
    pub write_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            redis_url: DEFAULT_REDIS_URL.to_string(),
            web: WebConfig::default(),
            session: SessionConfig::default(),
            board: BoardConfig::default(),
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            notify_token: None,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_age_hours: MAX_SESSION_AGE_HOURS,
            sign_in_path: DEFAULT_SIGN_IN_PATH.to_string(),
        }
    }
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            stages: default_stages(),
            won_stage: "won".to_string(),
            write_timeout_secs: DEFAULT_WRITE_TIMEOUT_SECS,
        }
    }
}

impl PipelineConfig {
    /// Load from `path` if it exists, then apply environment overrides.
    pub fn load(path: &Path) -> PipelineResult<Self> {
        let mut config = if path.exists() {
            debug!(path = %path.display(), "Loading config file");
            let content = std::fs::read_to_string(path)?;
            Self::from_toml(&content)?
        } else {
            debug!(path = %path.display(), "No config file, using defaults");
            Self::default()
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> PipelineResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// `REDIS_URL`, `PIPELINE_PORT`, `PIPELINE_SIGN_IN_PATH`, `PIPELINE_NOTIFY_TOKEN`.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("REDIS_URL") {
            self.redis_url = url;
        }
        if let Some(port) = std::env::var("PIPELINE_PORT").ok().and_then(|p| p.parse().ok()) {
            self.web.port = port;
        }
        if let Ok(path) = std::env::var("PIPELINE_SIGN_IN_PATH") {
            self.session.sign_in_path = path;
        }
        if let Ok(token) = std::env::var("PIPELINE_NOTIFY_TOKEN") {
            self.web.notify_token = Some(token).filter(|t| !t.is_empty());
        }
    }

    pub fn validate(&self) -> PipelineResult<()> {
        let stages = &self.board.stages;
        if stages.is_empty() {
            return Err(PipelineError::config("board.stages must not be empty"));
        }
        let mut ids = HashSet::new();
        for stage in stages {
            if !ids.insert(stage.id.as_str()) {
                return Err(PipelineError::config(format!("duplicate stage id '{}'", stage.id)));
            }
        }
        match stages.iter().find(|s| s.id == self.board.won_stage) {
            Some(stage) if stage.kind == StageKind::Won => {}
            Some(_) => {
                return Err(PipelineError::config(format!(
                    "won_stage '{}' must have kind = \"won\"",
                    self.board.won_stage
                )))
            }
            None => {
                return Err(PipelineError::config(format!(
                    "won_stage '{}' is not one of the board stages",
                    self.board.won_stage
                )))
            }
        }
        if self.session.max_age_hours <= 0 {
            return Err(PipelineError::config("session.max_age_hours must be positive"));
        }
        Ok(())
    }

    pub fn guard_settings(&self) -> GuardSettings {
        GuardSettings {
            max_age: Duration::hours(self.session.max_age_hours),
            sign_in_path: self.session.sign_in_path.clone(),
            storage_key: SESSION_START_KEY.to_string(),
        }
    }

    pub fn write_timeout(&self) -> Option<std::time::Duration> {
        match self.board.write_timeout_secs {
            0 => None,
            secs => Some(std::time::Duration::from_secs(secs)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.guard_settings(), GuardSettings::default());
        assert_eq!(config.write_timeout(), Some(std::time::Duration::from_secs(15)));
    }

    #[test]
    fn test_partial_toml() {
        let config = PipelineConfig::from_toml(
            r#"
            [web]
            port = 8080

            [board]
            write_timeout_secs = 0
            "#,
        )
        .unwrap();
        assert_eq!(config.web.port, 8080);
        assert_eq!(config.web.host, "127.0.0.1");
        assert_eq!(config.write_timeout(), None);
        assert_eq!(config.board.stages.len(), 6);
    }

    #[test]
    fn test_custom_stages() {
        let config = PipelineConfig::from_toml(
            r#"
            [board]
            won_stage = "signed"

            [[board.stages]]
            id = "intro"
            title = "Intro call"

            [[board.stages]]
            id = "signed"
            title = "Signed"
            kind = "won"
            "#,
        )
        .unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.board.stages[0].kind, StageKind::Open);
    }

    #[test]
    fn test_won_stage_must_exist() {
        let mut config = PipelineConfig::default();
        config.board.won_stage = "closed".to_string();
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));

        config.board.won_stage = "lead".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = PipelineConfig::load(Path::new("/nonexistent/pipeline.toml")).unwrap();
        assert_eq!(config.board.won_stage, "won");
    }

    #[test]
    fn test_notify_token_and_base_url() {
        let config = PipelineConfig::from_toml(
            r#"
            [web]
            host = "0.0.0.0"
            port = 9000
            notify_token = "s3cret"
            "#,
        )
        .unwrap();
        assert_eq!(config.web.notify_token.as_deref(), Some("s3cret"));
        assert_eq!(config.web.base_url(), "http://127.0.0.1:9000");
        assert_eq!(PipelineConfig::default().web.notify_token, None);
    }
}
