//! Gmail Takeout MBOX as a message source.
//!
//! The file is scanned once for headers only; thread groups are built from
//! Gmail's `X-GM-THRID` header (or a hash of the conversation root when it is
//! missing). Bodies are read again, one message at a time, by [`MboxFetcher`].

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use chrono::DateTime;
use mail_parser::{Addr, HeaderValue, Message, MessageParser};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{ArchiveError, Result};
use crate::model::address::EmailAddress;
use crate::model::message::{MessageBlob, MessageSummary};
use crate::model::thread::Threads;
use crate::source::{MessageFetcher, SourceFilter};

/// Size of the scan buffer.
const READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Bytes scanned between progress callbacks.
const PROGRESS_INTERVAL: u64 = 4 * 1024 * 1024;

/// Headers above this size are cut off; real header blocks are far smaller.
const MAX_HEADER_BYTES: usize = 256 * 1024;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Byte range of one message found by [`MboxScanner`].
#[derive(Debug, Clone, Copy)]
pub struct RawMessage<'a> {
    /// Offset of the `From ` separator line.
    pub separator_offset: u64,
    /// Offset of the RFC 5322 message, just after the separator line.
    pub offset: u64,
    /// Length of the RFC 5322 message (headers and body).
    pub len: u64,
    /// Header block, without the separator line.
    pub headers: &'a [u8],
}

/// Streaming, header-only MBOX scanner.
///
/// Tolerates CRLF line endings, a UTF-8 BOM, truncated trailing messages and
/// `From ` separators that are not preceded by a blank line (logged).
pub struct MboxScanner {
    path: PathBuf,
    file_size: u64,
}

impl MboxScanner {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = std::fs::metadata(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                ArchiveError::FileNotFound(path.clone())
            } else {
                ArchiveError::io(&path, e)
            }
        })?;
        Ok(Self {
            path,
            file_size: metadata.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Scan the file, calling `on_message` for every message in order.
    ///
    /// Returning `false` from the callback stops the scan. Returns the number
    /// of messages delivered. A non-empty file that does not start with a
    /// `From ` line is rejected as [`ArchiveError::InvalidMbox`].
    pub fn scan(
        &self,
        on_message: &mut dyn FnMut(RawMessage<'_>) -> bool,
        progress: Option<&dyn Fn(u64, u64)>,
    ) -> Result<u64> {
        if self.file_size == 0 {
            return Ok(0);
        }

        let file = File::open(&self.path).map_err(|e| ArchiveError::io(&self.path, e))?;
        let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);

        let mut count: u64 = 0;
        let mut offset: u64 = 0;
        let mut last_progress: u64 = 0;
        let mut line: Vec<u8> = Vec::with_capacity(4096);
        let mut current: Option<PendingMessage> = None;
        let mut prev_blank_len: Option<u64> = None;
        let mut first_line = true;

        loop {
            line.clear();
            let line_len = {
                let buf = reader
                    .fill_buf()
                    .map_err(|e| ArchiveError::io(&self.path, e))?;
                if buf.is_empty() {
                    break;
                }
                let consume = buf
                    .iter()
                    .position(|&b| b == b'\n')
                    .map_or(buf.len(), |pos| pos + 1);
                line.extend_from_slice(&buf[..consume]);
                reader.consume(consume);
                consume as u64
            };

            if is_separator(&line) {
                if !first_line && prev_blank_len.is_none() {
                    warn!(offset, "Found 'From ' separator without preceding blank line");
                }
                if let Some(pending) = current.take() {
                    // The blank line before a separator belongs to the mbox framing.
                    let end = offset - prev_blank_len.unwrap_or(0);
                    if !pending.emit(end, on_message) {
                        return Ok(count);
                    }
                    count += 1;
                }
                current = Some(PendingMessage::new(offset, line_len));
            } else if first_line {
                return Err(ArchiveError::InvalidMbox(self.path.clone()));
            } else if let Some(pending) = current.as_mut() {
                pending.push_line(&line);
            }

            prev_blank_len = is_blank_line(&line).then_some(line_len);
            first_line = false;
            offset += line_len;

            if let Some(cb) = progress {
                if offset - last_progress >= PROGRESS_INTERVAL {
                    cb(offset, self.file_size);
                    last_progress = offset;
                }
            }
        }

        if let Some(pending) = current.take() {
            if pending.emit(offset, on_message) {
                count += 1;
            }
        }

        if let Some(cb) = progress {
            cb(self.file_size, self.file_size);
        }

        Ok(count)
    }
}

/// Message being accumulated by the scanner.
struct PendingMessage {
    separator_offset: u64,
    offset: u64,
    headers: Vec<u8>,
    in_headers: bool,
}

impl PendingMessage {
    fn new(separator_offset: u64, separator_len: u64) -> Self {
        Self {
            separator_offset,
            offset: separator_offset + separator_len,
            headers: Vec::with_capacity(16 * 1024),
            in_headers: true,
        }
    }

    fn push_line(&mut self, line: &[u8]) {
        if !self.in_headers {
            return;
        }
        if is_blank_line(line) {
            self.in_headers = false;
        } else if self.headers.len() + line.len() <= MAX_HEADER_BYTES {
            self.headers.extend_from_slice(line);
        }
    }

    fn emit(self, end: u64, on_message: &mut dyn FnMut(RawMessage<'_>) -> bool) -> bool {
        on_message(RawMessage {
            separator_offset: self.separator_offset,
            offset: self.offset,
            len: end.saturating_sub(self.offset),
            headers: &self.headers,
        })
    }
}

fn is_separator(line: &[u8]) -> bool {
    line.strip_prefix(UTF8_BOM).unwrap_or(line).starts_with(b"From ")
}

fn is_blank_line(line: &[u8]) -> bool {
    line.iter()
        .all(|&b| b == b'\n' || b == b'\r' || b == b' ' || b == b'\t')
}

/// Scan `path` and group every message passing `filter` by thread.
///
/// Threads are ordered by first appearance in the file, messages by file order.
pub fn build_thread_index(
    path: &Path,
    filter: &SourceFilter,
    progress: Option<&dyn Fn(u64, u64)>,
) -> Result<Threads<MessageSummary>> {
    let scanner = MboxScanner::new(path)?;
    let parser = MessageParser::default();
    let mut threads = Threads::new();
    let mut filtered: u64 = 0;

    let scanned = scanner.scan(
        &mut |raw| {
            let Some(message) = parser.parse(raw.headers) else {
                warn!(offset = raw.offset, "Unparseable message headers, skipping");
                return true;
            };
            if !filter.matches(&gmail_labels(&message)) {
                filtered += 1;
                return true;
            }
            let thread_id = thread_id_of(&message, raw.offset);
            threads.push(thread_id, summarize(&message, &raw));
            true
        },
        progress,
    )?;

    info!(
        path = %path.display(),
        messages = scanned,
        filtered,
        threads = threads.len(),
        "Built thread index"
    );
    Ok(threads)
}

fn summarize(message: &Message<'_>, raw: &RawMessage<'_>) -> MessageSummary {
    let unique_id = message
        .message_id()
        .map(str::to_string)
        .unwrap_or_else(|| raw.separator_offset.to_string());

    let mut summary = MessageSummary::new(unique_id, raw.offset, raw.len);
    summary.subject = message.subject().map(str::to_string);
    summary.sender = message.from().and_then(|a| a.first()).map(format_addr);
    summary.recipient = message.to().and_then(|a| a.first()).map(format_addr);
    summary.date = message
        .date()
        .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0));
    summary
}

fn format_addr(addr: &Addr<'_>) -> String {
    EmailAddress::new(
        addr.name().unwrap_or_default(),
        addr.address().unwrap_or_default(),
    )
    .display()
}

/// Gmail labels from `X-Gmail-Labels`, comma separated.
fn gmail_labels(message: &Message<'_>) -> Vec<String> {
    header_text(message, "X-Gmail-Labels")
        .map(|value| {
            value
                .split(',')
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Thread id: Gmail's `X-GM-THRID`, else a hash of the conversation root.
fn thread_id_of(message: &Message<'_>, offset: u64) -> u64 {
    if let Some(id) = header_text(message, "X-GM-THRID").and_then(|v| v.trim().parse().ok()) {
        return id;
    }

    let root = first_id(message.references())
        .or_else(|| first_id(message.in_reply_to()))
        .or_else(|| message.message_id().map(str::to_string))
        .unwrap_or_else(|| format!("offset:{offset}"));
    hash_thread_root(&root)
}

fn hash_thread_root(root: &str) -> u64 {
    let digest = Sha256::digest(root.trim().as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

fn first_id(value: &HeaderValue<'_>) -> Option<String> {
    match value {
        HeaderValue::Text(id) => Some(id.to_string()),
        HeaderValue::TextList(ids) => ids.first().map(|id| id.to_string()),
        _ => None,
    }
}

fn header_text<'m>(message: &'m Message<'_>, name: &str) -> Option<&'m str> {
    message
        .headers()
        .iter()
        .find(|h| h.name().eq_ignore_ascii_case(name))
        .and_then(|h| h.value().as_text())
}

/// Loads messages from the MBOX they were indexed from.
///
/// Messages larger than `max_message_size_mb` become streamed blobs that copy
/// straight from the file into the archive; smaller ones are read into memory.
pub struct MboxFetcher {
    path: PathBuf,
    stream_threshold: u64,
}

impl MboxFetcher {
    pub fn new(path: impl Into<PathBuf>, max_message_size_mb: u32) -> Self {
        Self {
            path: path.into(),
            stream_threshold: u64::from(max_message_size_mb) * BYTES_PER_MB,
        }
    }

    fn read_buffered(&self, offset: u64, len: u64) -> io::Result<Vec<u8>> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = Vec::with_capacity(usize::try_from(len).unwrap_or(0));
        file.take(len).read_to_end(&mut buffer)?;
        if (buffer.len() as u64) < len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("expected {len} bytes, file ended after {}", buffer.len()),
            ));
        }
        Ok(buffer)
    }
}

impl MessageFetcher for MboxFetcher {
    fn fetch(&mut self, summary: &MessageSummary) -> Result<MessageBlob> {
        let date = summary.date.unwrap_or_default();
        let offset = summary.locator;
        let size = summary.size_hint;

        let blob = if size > self.stream_threshold {
            debug!(unique_id = %summary.unique_id, size, "Streaming large message");
            let path = self.path.clone();
            MessageBlob::streamed(summary.unique_id.clone(), date, size, move |sink| {
                let mut file = File::open(&path)?;
                file.seek(SeekFrom::Start(offset))?;
                io::copy(&mut BufReader::new(file).take(size), sink)?;
                Ok(())
            })
        } else {
            let bytes = self
                .read_buffered(offset, size)
                .map_err(|e| ArchiveError::Fetch {
                    unique_id: summary.unique_id.clone(),
                    reason: e.to_string(),
                })?;
            MessageBlob::buffered(summary.unique_id.clone(), date, bytes)
        };

        Ok(blob
            .with_subject(summary.subject.clone().unwrap_or_default())
            .with_sender(summary.sender.clone().unwrap_or_default())
            .with_recipient(summary.recipient.clone().unwrap_or_default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::message::MessageContent;
    use std::io::Write;

    const SAMPLE: &str = "From 1001@xxx Mon Jan 01 00:00:00 2024\r\n\
X-GM-THRID: 1700000000000000001\r\n\
X-Gmail-Labels: Inbox,Important\r\n\
Message-ID: <a@example.com>\r\n\
From: Ana <ana@example.com>\r\n\
To: bob@example.com\r\n\
Subject: Budget\r\n\
Date: Mon, 01 Jan 2024 10:00:00 +0000\r\n\
\r\n\
First body\r\n\
\r\n\
From 1002@xxx Mon Jan 01 00:00:00 2024\r\n\
X-GM-THRID: 1700000000000000002\r\n\
X-Gmail-Labels: Spam\r\n\
Message-ID: <b@example.com>\r\n\
Subject: Offer\r\n\
\r\n\
Buy now\r\n\
\r\n\
From 1003@xxx Mon Jan 01 00:00:00 2024\r\n\
X-GM-THRID: 1700000000000000001\r\n\
X-Gmail-Labels: Inbox\r\n\
Message-ID: <c@example.com>\r\n\
In-Reply-To: <a@example.com>\r\n\
Subject: Re: Budget\r\n\
\r\n\
Reply body\r\n";

    fn write_mbox(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_separator_and_blank_lines() {
        assert!(is_separator(b"From a@b Thu Jan 01 00:00:00 2024\n"));
        assert!(is_separator(b"\xEF\xBB\xBFFrom a@b\n"));
        assert!(!is_separator(b">From a@b\n"));
        assert!(!is_separator(b"from a@b\n"));
        assert!(is_blank_line(b"\r\n"));
        assert!(!is_blank_line(b"x\n"));
    }

    #[test]
    fn test_scan_ranges_exclude_framing() {
        let file = write_mbox(SAMPLE);
        let scanner = MboxScanner::new(file.path()).unwrap();
        let mut ranges = Vec::new();
        let count = scanner
            .scan(
                &mut |raw| {
                    ranges.push((raw.offset, raw.len));
                    true
                },
                None,
            )
            .unwrap();
        assert_eq!(count, 3);

        let data = SAMPLE.as_bytes();
        let (offset, len) = ranges[0];
        let first = &data[offset as usize..(offset + len) as usize];
        assert!(first.starts_with(b"X-GM-THRID"));
        assert!(first.ends_with(b"First body\r\n"));

        let (offset, len) = ranges[2];
        assert_eq!((offset + len) as usize, data.len());
    }

    #[test]
    fn test_scan_stops_when_asked() {
        let file = write_mbox(SAMPLE);
        let scanner = MboxScanner::new(file.path()).unwrap();
        let count = scanner.scan(&mut |_| false, None).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_not_an_mbox() {
        let file = write_mbox("Subject: hello\n\nbody\n");
        let scanner = MboxScanner::new(file.path()).unwrap();
        assert!(matches!(
            scanner.scan(&mut |_| true, None),
            Err(ArchiveError::InvalidMbox(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            MboxScanner::new("/definitely/not/here.mbox"),
            Err(ArchiveError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_index_groups_by_gmail_thread() {
        let file = write_mbox(SAMPLE);
        let threads = build_thread_index(file.path(), &SourceFilter::default(), None).unwrap();

        assert_eq!(threads.len(), 2);
        let ids: Vec<u64> = threads.iter().map(|g| g.thread_id).collect();
        assert_eq!(ids, vec![1700000000000000001, 1700000000000000002]);

        let budget = threads.get(1700000000000000001).unwrap();
        assert_eq!(budget.len(), 2);
        assert_eq!(budget[0].subject.as_deref(), Some("Budget"));
        assert_eq!(budget[0].sender.as_deref(), Some("Ana <ana@example.com>"));
        assert_eq!(budget[0].recipient.as_deref(), Some("bob@example.com"));
        assert_eq!(budget[0].unique_id, "a@example.com");
        assert!(budget[0].date.is_some());
        assert_eq!(budget[1].subject.as_deref(), Some("Re: Budget"));
    }

    #[test]
    fn test_label_filter() {
        let file = write_mbox(SAMPLE);
        let filter = SourceFilter::with_label(Some("spam"));
        let threads = build_thread_index(file.path(), &filter, None).unwrap();
        assert_eq!(threads.len(), 1);
        assert_eq!(threads.message_count(), 1);

        let blank = SourceFilter::with_label(Some("   "));
        let threads = build_thread_index(file.path(), &blank, None).unwrap();
        assert_eq!(threads.message_count(), 3);
    }

    #[test]
    fn test_fallback_thread_id_follows_root() {
        let mbox = "From x\n\
Message-ID: <root@x>\n\
Subject: Start\n\
\n\
one\n\
\n\
From x\n\
Message-ID: <reply@x>\n\
References: <root@x> <mid@x>\n\
Subject: Re: Start\n\
\n\
two\n";
        let file = write_mbox(mbox);
        let threads = build_thread_index(file.path(), &SourceFilter::default(), None).unwrap();
        assert_eq!(threads.len(), 1);
        assert_eq!(threads.message_count(), 2);
        assert_eq!(threads.iter().next().unwrap().thread_id, hash_thread_root("root@x"));
    }

    #[test]
    fn test_fetch_buffered_and_streamed() {
        let file = write_mbox(SAMPLE);
        let threads = build_thread_index(file.path(), &SourceFilter::default(), None).unwrap();
        let summary = &threads.get(1700000000000000001).unwrap()[0];

        let mut fetcher = MboxFetcher::new(file.path(), 10);
        let blob = fetcher.fetch(summary).unwrap();
        assert!(!blob.is_streaming());
        assert_eq!(blob.subject, "Budget");
        let MessageContent::Buffered(bytes) = blob.into_content() else {
            panic!("expected buffered content");
        };
        assert!(bytes.starts_with(b"X-GM-THRID"));
        assert_eq!(bytes.len() as u64, summary.size_hint);

        let mut fetcher = MboxFetcher {
            path: file.path().to_path_buf(),
            stream_threshold: 8,
        };
        let blob = fetcher.fetch(summary).unwrap();
        assert!(blob.is_streaming());
        assert_eq!(blob.size(), summary.size_hint);
        let MessageContent::Streamed(writer) = blob.into_content() else {
            panic!("expected streamed content");
        };
        let mut out = Vec::new();
        writer(&mut out).unwrap();
        assert_eq!(out, bytes);
    }

    #[test]
    fn test_fetch_past_end_fails() {
        let file = write_mbox(SAMPLE);
        let mut fetcher = MboxFetcher::new(file.path(), 10);
        let summary = MessageSummary::new("ghost", SAMPLE.len() as u64 - 4, 100);
        assert!(matches!(
            fetcher.fetch(&summary),
            Err(ArchiveError::Fetch { .. })
        ));
    }
}
