//! Messages ready for archival, and the summaries used to fetch them lazily.

use std::fmt;
use std::io::{self, Write};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::naming;

/// Writes a message's serialized bytes into an archive sink.
///
/// Invoked at most once, after the tar header for the message has been written.
pub type StreamWriter = Box<dyn FnOnce(&mut dyn Write) -> io::Result<()> + Send>;

/// `strftime` format of the date segment used in `.eml` file names.
pub const DATE_SEGMENT_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// The single content representation of a [`MessageBlob`].
pub enum MessageContent {
    /// The full message held in memory.
    Buffered(Vec<u8>),
    /// A deferred writer producing exactly `MessageBlob::size` bytes.
    Streamed(StreamWriter),
    /// No content was available; archived as a zero-length entry.
    Empty,
}

impl fmt::Debug for MessageContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffered(bytes) => write!(f, "Buffered({} bytes)", bytes.len()),
            Self::Streamed(_) => f.write_str("Streamed(..)"),
            Self::Empty => f.write_str("Empty"),
        }
    }
}

/// One email ready to be written into an archive.
#[derive(Debug)]
pub struct MessageBlob {
    /// Stable identifier (IMAP UID, Gmail message id, or source offset).
    pub unique_id: String,
    pub subject: String,
    pub sender: String,
    pub recipient: String,
    /// Date used for the entry mtime and the file-name date segment.
    pub date: DateTime<Utc>,
    size: u64,
    content: MessageContent,
}

impl MessageBlob {
    /// Build a blob from bytes already in memory.
    pub fn buffered(unique_id: impl Into<String>, date: DateTime<Utc>, bytes: Vec<u8>) -> Self {
        Self::with_content(
            unique_id.into(),
            date,
            bytes.len() as u64,
            MessageContent::Buffered(bytes),
        )
    }

    /// Build a blob whose `size` bytes are produced later by `writer`.
    pub fn streamed<F>(unique_id: impl Into<String>, date: DateTime<Utc>, size: u64, writer: F) -> Self
    where
        F: FnOnce(&mut dyn Write) -> io::Result<()> + Send + 'static,
    {
        Self::with_content(
            unique_id.into(),
            date,
            size,
            MessageContent::Streamed(Box::new(writer)),
        )
    }

    /// Build a blob for a message whose content could not be obtained.
    pub fn empty(unique_id: impl Into<String>, date: DateTime<Utc>) -> Self {
        Self::with_content(unique_id.into(), date, 0, MessageContent::Empty)
    }

    fn with_content(unique_id: String, date: DateTime<Utc>, size: u64, content: MessageContent) -> Self {
        Self {
            unique_id,
            subject: String::new(),
            sender: String::new(),
            recipient: String::new(),
            date,
            size,
            content,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = sender.into();
        self
    }

    pub fn with_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = recipient.into();
        self
    }

    /// Byte length of the serialized message.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Whether the content is produced by a deferred writer.
    pub fn is_streaming(&self) -> bool {
        matches!(self.content, MessageContent::Streamed(_))
    }

    pub fn content(&self) -> &MessageContent {
        &self.content
    }

    /// Consume the blob, yielding its content.
    pub fn into_content(self) -> MessageContent {
        self.content
    }

    /// UTC date formatted for file names, e.g. `2024-12-31_23-59-59`.
    pub fn date_segment(&self) -> String {
        self.date.format(DATE_SEGMENT_FORMAT).to_string()
    }

    /// Archive file name derived from the metadata; never stored.
    pub fn file_name(&self) -> String {
        let sender = (!self.sender.is_empty()).then_some(self.sender.as_str());
        naming::build_message_file_name(
            &self.unique_id,
            Some(self.subject.as_str()),
            &self.date_segment(),
            sender,
        )
    }
}

/// Lightweight handle for a message that has not been fetched yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageSummary {
    pub unique_id: String,
    pub subject: Option<String>,
    pub sender: Option<String>,
    pub recipient: Option<String>,
    pub date: Option<DateTime<Utc>>,
    /// Expected byte length of the serialized message.
    pub size_hint: u64,
    /// Source-specific position: byte offset for MBOX, UID for IMAP.
    pub locator: u64,
}

impl MessageSummary {
    pub fn new(unique_id: impl Into<String>, locator: u64, size_hint: u64) -> Self {
        Self {
            unique_id: unique_id.into(),
            subject: None,
            sender: None,
            recipient: None,
            date: None,
            size_hint,
            locator,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 59).unwrap()
    }

    #[test]
    fn test_buffered_size_matches_bytes() {
        let blob = MessageBlob::buffered("1", date(), b"Subject: x\r\n\r\nbody".to_vec());
        assert_eq!(blob.size(), 18);
        assert!(!blob.is_streaming());
    }

    #[test]
    fn test_streamed_blob_is_streaming() {
        let blob = MessageBlob::streamed("2", date(), 5, |sink| sink.write_all(b"hello"));
        assert!(blob.is_streaming());
        assert_eq!(blob.size(), 5);

        let MessageContent::Streamed(writer) = blob.into_content() else {
            panic!("expected streamed content");
        };
        let mut out = Vec::new();
        writer(&mut out).unwrap();
        assert_eq!(out, b"hello");
    }

    #[test]
    fn test_empty_blob() {
        let blob = MessageBlob::empty("3", date());
        assert_eq!(blob.size(), 0);
        assert!(matches!(blob.content(), MessageContent::Empty));
    }

    #[test]
    fn test_file_name_is_derived() {
        let blob = MessageBlob::buffered("55", date(), Vec::new())
            .with_subject("Status")
            .with_sender("Ops Team <ops@example.com>");
        assert_eq!(blob.date_segment(), "2024-12-31_23-59-59");
        assert_eq!(blob.file_name(), "55_2024-12-31_23-59-59_Ops Team_Status.eml");

        let blob = MessageBlob::buffered("56", date(), Vec::new());
        assert_eq!(blob.file_name(), "56_2024-12-31_23-59-59.eml");
    }
}
