//! Writing a run back to the store

use super::record::{CompletionRecord, RunStatus};
use crate::error::BerryError;
use crate::store::Store;

/// Commit the consumption of `record` if its run commits at all
///
/// Only preparations of a stored recipe that ended FINISHED or CANCELED are
/// committed. A failing store turns the record into an ERROR record carrying
/// `COMMIT_FAILED`; the measured consumption stays in the record.
pub(crate) fn commit(store: &dyn Store, record: &mut CompletionRecord) {
    if !record.kind.commits() || record.status == RunStatus::Error {
        return;
    }
    let Some(recipe_id) = record.recipe_id else {
        return;
    };

    let consumption = record.consumption_map();
    let finished = record.status == RunStatus::Finished;
    match store.commit_run(&consumption, recipe_id, record.virgin, finished) {
        Ok(()) => tracing::debug!(
            "Committed {} ingredients of '{}' (finished: {})",
            consumption.len(),
            record.name,
            finished
        ),
        Err(e) => {
            let error = BerryError::CommitFailed(e.to_string());
            tracing::error!("{}", error);
            record.fail(&error);
        }
    }
}
