//! Per-message outcomes collected while writing an archive.

use serde::Serialize;

/// Where a per-message failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    /// The message could not be retrieved; no entry was written.
    Fetch,
    /// The entry was started but its body is incomplete (zero-padded).
    Write,
}

/// What happened to one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum MessageOutcome {
    Written {
        thread_id: u64,
        unique_id: String,
        entry_path: String,
        size: u64,
    },
    Failed {
        thread_id: u64,
        unique_id: String,
        stage: FailureStage,
        reason: String,
    },
}

impl MessageOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, Self::Written { .. })
    }
}

/// Summary of one archive run, in processing order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveReport {
    /// Threads that produced a directory entry.
    pub threads_written: usize,
    /// Threads skipped because they had no messages.
    pub empty_threads: Vec<u64>,
    pub outcomes: Vec<MessageOutcome>,
}

impl ArchiveReport {
    pub(crate) fn record(&mut self, outcome: MessageOutcome) {
        self.outcomes.push(outcome);
    }

    /// Messages written completely.
    pub fn written_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_written()).count()
    }

    /// Total body bytes of completely written messages.
    pub fn written_bytes(&self) -> u64 {
        self.outcomes
            .iter()
            .map(|o| match o {
                MessageOutcome::Written { size, .. } => *size,
                MessageOutcome::Failed { .. } => 0,
            })
            .sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = &MessageOutcome> {
        self.outcomes.iter().filter(|o| !o.is_written())
    }

    /// Unique ids of failed messages, with the stage that failed.
    pub fn failed_ids(&self) -> Vec<(&str, FailureStage)> {
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                MessageOutcome::Failed {
                    unique_id, stage, ..
                } => Some((unique_id.as_str(), *stage)),
                MessageOutcome::Written { .. } => None,
            })
            .collect()
    }
}
