//! Message sources: the fetch interface consumed by the archiver, and the
//! Gmail Takeout MBOX implementation of it.

pub mod mbox;

use crate::error::Result;
use crate::model::message::{MessageBlob, MessageSummary};

/// Resolves a [`MessageSummary`] into a [`MessageBlob`] just before it is archived.
///
/// Called once per message, sequentially. Any error is treated by the archiver
/// as a per-message failure: the message is skipped and archiving continues.
pub trait MessageFetcher {
    fn fetch(&mut self, summary: &MessageSummary) -> Result<MessageBlob>;
}

impl<F> MessageFetcher for F
where
    F: FnMut(&MessageSummary) -> Result<MessageBlob>,
{
    fn fetch(&mut self, summary: &MessageSummary) -> Result<MessageBlob> {
        self(summary)
    }
}

/// Optional filters applied while building a thread index.
///
/// Empty and whitespace-only values are treated as absent.
#[derive(Debug, Clone, Default)]
pub struct SourceFilter {
    /// Only keep messages carrying this Gmail label (case-insensitive).
    pub label: Option<String>,
}

impl SourceFilter {
    pub fn with_label(label: Option<&str>) -> Self {
        Self {
            label: normalize_filter(label),
        }
    }

    /// Whether a message with the given labels passes the filter.
    pub fn matches(&self, labels: &[String]) -> bool {
        match self.label.as_deref().and_then(|l| normalize_filter(Some(l))) {
            None => true,
            Some(wanted) => labels.iter().any(|l| l.trim().eq_ignore_ascii_case(&wanted)),
        }
    }
}

/// Single rule for optional text filters: blank means "not set".
pub fn normalize_filter(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
