//! Progress and status broadcasting
//!
//! The engine owns the only [`StatusWriter`]; any number of
//! [`StatusReader`]s (GUI poller, API, LED controller) read the status
//! without locking. State and progress are atomics; the message sits behind
//! an `RwLock` and may be one update behind the state.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Lifecycle state of the machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum CocktailState {
    Idle = 0,
    Validating = 1,
    InProgress = 2,
    Canceled = 3,
    Finished = 4,
    Error = 5,
}

impl CocktailState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => CocktailState::Validating,
            2 => CocktailState::InProgress,
            3 => CocktailState::Canceled,
            4 => CocktailState::Finished,
            5 => CocktailState::Error,
            _ => CocktailState::Idle,
        }
    }

    /// Whether the state ends a run and waits for acknowledgement
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CocktailState::Canceled | CocktailState::Finished | CocktailState::Error
        )
    }
}

impl std::fmt::Display for CocktailState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CocktailState::Idle => "IDLE",
            CocktailState::Validating => "VALIDATING",
            CocktailState::InProgress => "IN_PROGRESS",
            CocktailState::Canceled => "CANCELED",
            CocktailState::Finished => "FINISHED",
            CocktailState::Error => "ERROR",
        };
        write!(f, "{}", name)
    }
}

/// Snapshot of the status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CocktailStatus {
    pub state: CocktailState,
    /// Percent done (0..=100)
    pub progress: u8,
    pub message: String,
}

#[derive(Debug)]
struct StatusCell {
    state: AtomicU8,
    progress: AtomicU8,
    message: RwLock<String>,
}

/// Write side of the status, held by the engine only
#[derive(Debug)]
pub struct StatusWriter {
    cell: Arc<StatusCell>,
}

impl StatusWriter {
    /// Create an idle status
    pub fn new() -> Self {
        Self {
            cell: Arc::new(StatusCell {
                state: AtomicU8::new(CocktailState::Idle as u8),
                progress: AtomicU8::new(0),
                message: RwLock::new(String::new()),
            }),
        }
    }

    /// Create a reader of this status
    pub fn reader(&self) -> StatusReader {
        StatusReader {
            cell: Arc::clone(&self.cell),
        }
    }

    /// Switch state; the message is written before the state
    pub fn set_state(&self, state: CocktailState, message: impl Into<String>) {
        *self
            .cell
            .message
            .write()
            .unwrap_or_else(PoisonError::into_inner) = message.into();
        self.cell.state.store(state as u8, Ordering::Release);
    }

    /// Start a new run at zero progress
    pub fn begin(&self, state: CocktailState, message: impl Into<String>) {
        self.cell.progress.store(0, Ordering::Release);
        self.set_state(state, message);
    }

    /// Raise progress; lower values are ignored
    pub fn set_progress(&self, progress: u8) {
        self.cell
            .progress
            .fetch_max(progress.min(100), Ordering::AcqRel);
    }

    /// Current state as seen by readers
    pub fn state(&self) -> CocktailState {
        CocktailState::from_u8(self.cell.state.load(Ordering::Acquire))
    }
}

impl Default for StatusWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Read side of the status
#[derive(Debug, Clone)]
pub struct StatusReader {
    cell: Arc<StatusCell>,
}

impl StatusReader {
    pub fn state(&self) -> CocktailState {
        CocktailState::from_u8(self.cell.state.load(Ordering::Acquire))
    }

    pub fn progress(&self) -> u8 {
        self.cell.progress.load(Ordering::Acquire)
    }

    pub fn message(&self) -> String {
        self.cell
            .message
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn snapshot(&self) -> CocktailStatus {
        CocktailStatus {
            state: self.state(),
            progress: self.progress(),
            message: self.message(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_only_rises() {
        let writer = StatusWriter::new();
        let reader = writer.reader();
        writer.begin(CocktailState::InProgress, "Preparing");
        writer.set_progress(40);
        writer.set_progress(20);
        writer.set_progress(250);
        assert_eq!(reader.progress(), 100);

        writer.begin(CocktailState::Validating, "Next");
        assert_eq!(reader.progress(), 0);
    }

    #[test]
    fn test_readers_see_state_and_message() {
        let writer = StatusWriter::new();
        let reader = writer.reader();
        let other = reader.clone();
        assert_eq!(reader.state(), CocktailState::Idle);

        writer.set_state(CocktailState::Finished, "Cuba Libre ready");
        let snapshot = other.snapshot();
        assert_eq!(snapshot.state, CocktailState::Finished);
        assert_eq!(snapshot.message, "Cuba Libre ready");
        assert!(snapshot.state.is_terminal());
    }

    #[test]
    fn test_state_round_trips_through_u8() {
        for state in [
            CocktailState::Idle,
            CocktailState::Validating,
            CocktailState::InProgress,
            CocktailState::Canceled,
            CocktailState::Finished,
            CocktailState::Error,
        ] {
            assert_eq!(CocktailState::from_u8(state as u8), state);
        }
        assert_eq!(CocktailState::InProgress.to_string(), "IN_PROGRESS");
    }
}
