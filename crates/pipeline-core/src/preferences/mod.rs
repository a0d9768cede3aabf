//! Per-user display preferences and their live sync.

pub mod sync;

pub use sync::{PreferenceState, PreferenceSync};

use serde::{Deserialize, Serialize};

/// Default date pattern (date-fns tokens).
pub const DEFAULT_DATE_FORMAT: &str = "dd MMM yyyy";
pub const DEFAULT_ITEMS_PER_PAGE: u32 = 25;
pub const DEFAULT_THEME: &str = "system";

/// How list pages open by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ListView {
    #[default]
    Table,
    Kanban,
}

impl ListView {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "table" => Some(Self::Table),
            "kanban" => Some(Self::Kanban),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::Kanban => "kanban",
        }
    }
}

/// Display configuration for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    pub date_format: String,
    pub default_view: ListView,
    pub items_per_page: u32,
    pub notifications_enabled: bool,
    pub theme: String,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            date_format: DEFAULT_DATE_FORMAT.to_string(),
            default_view: ListView::Table,
            items_per_page: DEFAULT_ITEMS_PER_PAGE,
            notifications_enabled: true,
            theme: DEFAULT_THEME.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tuple() {
        let prefs = Preferences::default();
        assert_eq!(
            (
                prefs.date_format.as_str(),
                prefs.default_view.as_str(),
                prefs.items_per_page,
                prefs.notifications_enabled,
                prefs.theme.as_str()
            ),
            ("dd MMM yyyy", "table", 25, true, "system")
        );
    }

    #[test]
    fn test_serde_shape() {
        let json = serde_json::to_value(Preferences::default()).unwrap();
        assert_eq!(json["default_view"], "table");
        assert_eq!(json["items_per_page"], 25);
    }

    #[test]
    fn test_list_view_from_str() {
        assert_eq!(ListView::from_str("Kanban"), Some(ListView::Kanban));
        assert_eq!(ListView::from_str("grid"), None);
    }
}
