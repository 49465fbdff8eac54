//! Error handling for the CocktailBerry engine
//!
//! This module defines the error taxonomy of the preparation engine and a
//! Result alias for use throughout the crate.
//!
//! Every variant maps to a stable code (see [`BerryError::code`]) which the
//! surrounding UI shows in its error box instead of a trace.

use crate::hardware::PinAddress;
use thiserror::Error;

/// Main error type for CocktailBerry operations
#[derive(Error, Debug)]
pub enum BerryError {
    /// A machine ingredient of the recipe is not mounted on any bottle slot
    #[error("No bottle is mounted for ingredient '{ingredient_name}' (id {ingredient_id})")]
    NoBottleForIngredient {
        ingredient_id: u32,
        ingredient_name: String,
    },

    /// The recipe asks for more hand-added ingredients than allowed
    #[error("Recipe needs {count} hand ingredients, at most {max} are allowed")]
    TooManyHandIngredients { count: usize, max: usize },

    /// A bottle holds less than the tolerated share of the required amount
    #[error("Not enough '{ingredient_name}' left: {have:.0} ml available, {need:.0} ml needed")]
    InsufficientLevel {
        ingredient_id: u32,
        ingredient_name: String,
        have: f64,
        need: f64,
    },

    /// The recipe cannot be made in the requested form
    #[error("Recipe not possible: {0}")]
    RecipeNotPossible(String),

    /// Another pump-driving run is in flight
    #[error("Another preparation is already running")]
    Busy,

    /// The pin driver refused to open a pin
    #[error("Failed to open pin {pin}: {reason}")]
    OpenFailed { pin: PinAddress, reason: String },

    /// The pin driver failed to close one or more pins
    #[error("Failed to close pins: {}", join_pins(.0))]
    CloseFailed(Vec<PinAddress>),

    /// Writing consumption back to the store failed
    #[error("Commit failed: {0}")]
    CommitFailed(String),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors raised by a pin backend or I2C bus
    #[error("Hardware error: {0}")]
    Hardware(String),

    /// Errors related to the recipe/bottle store
    #[error("Store error: {0}")]
    Store(String),

    /// The worker thread running a preparation died
    #[error("Worker error: {0}")]
    Worker(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<BerryError>,
    },
}

fn join_pins(pins: &[PinAddress]) -> String {
    pins.iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl BerryError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        BerryError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Stable variant name shown to users
    pub fn code(&self) -> &'static str {
        match self {
            BerryError::NoBottleForIngredient { .. } => "NO_BOTTLE_FOR_INGREDIENT",
            BerryError::TooManyHandIngredients { .. } => "TOO_MANY_HAND_INGREDIENTS",
            BerryError::InsufficientLevel { .. } => "INSUFFICIENT_LEVEL",
            BerryError::RecipeNotPossible(_) => "RECIPE_NOT_POSSIBLE",
            BerryError::Busy => "BUSY",
            BerryError::OpenFailed { .. } => "OPEN_FAILED",
            BerryError::CloseFailed(_) => "CLOSE_FAILED",
            BerryError::CommitFailed(_) => "COMMIT_FAILED",
            BerryError::Config(_) => "CONFIG",
            BerryError::Hardware(_) => "HARDWARE",
            BerryError::Store(_) => "STORE",
            BerryError::Worker(_) => "WORKER",
            BerryError::Io(_) => "IO",
            BerryError::Serialization(_) => "SERIALIZATION",
            BerryError::WithContext { source, .. } => source.code(),
        }
    }

    /// Whether this error was raised before any pump was touched
    pub fn is_validation(&self) -> bool {
        matches!(
            self.code(),
            "NO_BOTTLE_FOR_INGREDIENT"
                | "TOO_MANY_HAND_INGREDIENTS"
                | "INSUFFICIENT_LEVEL"
                | "RECIPE_NOT_POSSIBLE"
        )
    }
}

/// Result type alias for CocktailBerry operations
pub type Result<T> = std::result::Result<T, BerryError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}
