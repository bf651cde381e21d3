//! Run-wide progress accounting shared by all three engines.

use serde::Serialize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// One record that could not be processed.
#[derive(Clone, Debug, Serialize)]
pub struct RecordFailure {
    pub record_id: String,
    pub error: String,
}

/// Mutable counters accumulated across every collection of a run.
///
/// `processed == succeeded + failed + skipped` holds at the end of each
/// batch. `last_processed_id` is the pagination cursor and advances for
/// skipped and failed records too, so a resumed run always terminates.
#[derive(Clone, Debug, Default, Serialize)]
pub struct EngineProgress {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    pub last_processed_id: Option<String>,
    pub status: EngineStatus,
    pub errors: Vec<RecordFailure>,
}

impl EngineProgress {
    pub(crate) fn in_progress() -> Self {
        Self {
            status: EngineStatus::InProgress,
            ..Default::default()
        }
    }

    pub(crate) fn record_failure(&mut self, record_id: impl Into<String>, error: impl ToString) {
        self.errors.push(RecordFailure {
            record_id: record_id.into(),
            error: error.to_string(),
        });
    }
}
