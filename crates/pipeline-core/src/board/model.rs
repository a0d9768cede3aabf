//! Board domain models for the sales pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{PipelineError, PipelineResult};

/// A deal on the pipeline board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub id: String,
    pub name: String,
    pub deal_type: DealType,
    pub value: f64,
    pub probability: u8,
    pub stage: String,
    pub contact_name: Option<String>,
    pub company: Option<String>,
    #[serde(default)]
    pub days_in_stage: u32,
    /// Index within the stage. Used to order cards on load; the board keeps
    /// it in step with on-screen order after every move.
    #[serde(default)]
    pub position: u32,
}

impl Card {
    /// Check value and probability bounds.
    pub fn validate(&self) -> PipelineResult<()> {
        if self.probability > 100 {
            return Err(PipelineError::invalid_card(
                &self.id,
                format!("probability {} is outside 0-100", self.probability),
            ));
        }
        if !self.value.is_finite() || self.value < 0.0 {
            return Err(PipelineError::invalid_card(
                &self.id,
                format!("value {} must be a non-negative amount", self.value),
            ));
        }
        Ok(())
    }
}

/// Engagement type sold to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DealType {
    Assessment,
    Pilot,
    Integration,
}

impl DealType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "assessment" => Some(Self::Assessment),
            "pilot" => Some(Self::Pilot),
            "integration" => Some(Self::Integration),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assessment => "assessment",
            Self::Pilot => "pilot",
            Self::Integration => "integration",
        }
    }
}

/// Whether a stage is still in play or closes the deal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    #[default]
    Open,
    Won,
    Lost,
}

impl StageKind {
    pub fn is_closed(&self) -> bool {
        !matches!(self, Self::Open)
    }
}

/// Definition of one pipeline stage, in board order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub kind: StageKind,
}

impl Stage {
    pub fn new(id: &str, title: &str, kind: StageKind) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            kind,
        }
    }
}

/// A stage column holding an ordered sequence of card ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub id: String,
    pub title: String,
    pub kind: StageKind,
    pub card_ids: Vec<String>,
}

impl Column {
    pub fn from_stage(stage: &Stage) -> Self {
        Self {
            id: stage.id.clone(),
            title: stage.title.clone(),
            kind: stage.kind,
            card_ids: Vec::new(),
        }
    }
}

/// Read-only view of the board handed to rendering and analytics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardSnapshot {
    pub columns: Vec<Column>,
    pub cards: BTreeMap<String, Card>,
}

impl BoardSnapshot {
    pub fn column(&self, column_id: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.id == column_id)
    }

    pub fn card(&self, card_id: &str) -> Option<&Card> {
        self.cards.get(card_id)
    }

    /// Cards of one column in on-screen order.
    pub fn cards_in(&self, column_id: &str) -> Vec<&Card> {
        self.column(column_id)
            .map(|col| col.card_ids.iter().filter_map(|id| self.cards.get(id)).collect())
            .unwrap_or_default()
    }

    /// Verify that every card sits in exactly one column and that the
    /// column matches the card's stage.
    pub fn check_integrity(&self) -> Result<(), String> {
        let mut seen = std::collections::BTreeSet::new();
        for col in &self.columns {
            for id in &col.card_ids {
                if !seen.insert(id.as_str()) {
                    return Err(format!("card '{}' appears more than once", id));
                }
                match self.cards.get(id) {
                    Some(card) if card.stage == col.id => {}
                    Some(card) => {
                        return Err(format!(
                            "card '{}' has stage '{}' but sits in column '{}'",
                            id, card.stage, col.id
                        ))
                    }
                    None => return Err(format!("column '{}' lists unknown card '{}'", col.id, id)),
                }
            }
        }
        if seen.len() != self.cards.len() {
            return Err(format!(
                "{} cards known but {} placed in columns",
                self.cards.len(),
                seen.len()
            ));
        }
        Ok(())
    }

    /// Cards in canonical column order, top to bottom.
    pub fn ordered_cards(&self) -> Vec<&Card> {
        self.columns
            .iter()
            .flat_map(|col| col.card_ids.iter())
            .filter_map(|id| self.cards.get(id))
            .collect()
    }
}

/// Local drag interaction state, layered above `move_card`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", content = "card_id", rename_all = "snake_case")]
pub enum DragState {
    #[default]
    Idle,
    Dragging(String),
}

/// Default stage definitions for a consulting sales funnel.
pub const DEFAULT_STAGES: &[(&str, &str, StageKind)] = &[
    ("lead", "Lead", StageKind::Open),
    ("qualified", "Qualified", StageKind::Open),
    ("proposal", "Proposal", StageKind::Open),
    ("negotiation", "Negotiation", StageKind::Open),
    ("won", "Closed Won", StageKind::Won),
    ("lost", "Closed Lost", StageKind::Lost),
];

/// Build the default stage list.
pub fn default_stages() -> Vec<Stage> {
    DEFAULT_STAGES
        .iter()
        .map(|(id, title, kind)| Stage::new(id, title, *kind))
        .collect()
}
