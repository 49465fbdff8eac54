//! Async entry point
//!
//! The engine never runs on an async runtime; this moves a whole
//! preparation onto tokio's blocking pool so async callers can await it.

use super::{CompletionRecord, Engine, Observer, PreparationRequest};
use crate::error::{BerryError, Result};
use std::sync::Arc;

/// Prepare a cocktail on the blocking pool and await the record
pub async fn prepare_blocking(
    engine: Arc<Engine>,
    request: PreparationRequest,
    mut observer: Box<dyn Observer>,
) -> Result<CompletionRecord> {
    tokio::task::spawn_blocking(move || engine.prepare(&request, observer.as_mut()))
        .await
        .map_err(|e| BerryError::Worker(format!("Preparation task failed: {}", e)))?
}
