//! The result of a run
//!
//! A [`CompletionRecord`] is what the UI renders after a run: "ready" with
//! the hand-add comment, "canceled" with partial consumption, or an error
//! box carrying the error code.

use crate::error::BerryError;
use crate::hardware::PinAddress;
use crate::recipe::{HandAdd, PlanKind};
use crate::store::ConsumptionMap;
use crate::types::{IngredientId, RecipeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Finished,
    Canceled,
    Error,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Finished => write!(f, "FINISHED"),
            RunStatus::Canceled => write!(f, "CANCELED"),
            RunStatus::Error => write!(f, "ERROR"),
        }
    }
}

/// Non-fatal problem during a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunWarning {
    /// Pins that could not be closed
    CloseFailed { pins: Vec<PinAddress> },
    /// An observer callback panicked and was disabled
    ObserverPanicked { callback: String },
}

impl std::fmt::Display for RunWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunWarning::CloseFailed { pins } => {
                write!(f, "{}", BerryError::CloseFailed(pins.clone()))
            }
            RunWarning::ObserverPanicked { callback } => {
                write!(f, "Observer panicked in {}", callback)
            }
        }
    }
}

/// Requested and delivered volume of one ingredient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngredientConsumption {
    pub ingredient_id: IngredientId,
    pub ingredient_name: String,
    pub requested: f64,
    pub delivered: f64,
}

/// Outcome of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub status: RunStatus,
    pub kind: PlanKind,
    pub recipe_id: Option<RecipeId>,
    pub name: String,
    pub virgin: bool,
    pub per_ingredient: Vec<IngredientConsumption>,
    /// Wall time of the run in seconds
    pub elapsed_s: f64,
    /// Planned time of the run in seconds
    pub planned_s: f64,
    pub warnings: Vec<RunWarning>,
    pub hand_adds: Vec<HandAdd>,
    pub comment_text: String,
    /// Error code for runs that ended in ERROR
    pub error_code: Option<String>,
    /// Error message for runs that ended in ERROR
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl CompletionRecord {
    /// Delivered volume per ingredient, skipping ingredients that got nothing
    pub fn consumption_map(&self) -> ConsumptionMap {
        let mut map = ConsumptionMap::new();
        for entry in self.per_ingredient.iter().filter(|e| e.delivered > 0.0) {
            *map.entry(entry.ingredient_id).or_insert(0.0) += entry.delivered;
        }
        map
    }

    /// Delivered volume of one ingredient
    pub fn delivered(&self, ingredient_id: IngredientId) -> f64 {
        self.per_ingredient
            .iter()
            .filter(|e| e.ingredient_id == ingredient_id)
            .map(|e| e.delivered)
            .sum()
    }

    pub fn total_delivered(&self) -> f64 {
        self.per_ingredient.iter().map(|e| e.delivered).sum()
    }

    /// Mark the run as failed with `error`
    pub fn fail(&mut self, error: &BerryError) {
        self.status = RunStatus::Error;
        self.error_code = Some(error.code().to_string());
        self.error = Some(error.to_string());
    }

    pub fn is_finished(&self) -> bool {
        self.status == RunStatus::Finished
    }
}
