//! Serializes thread groups into a USTAR byte stream.
//!
//! Layout per thread: one directory entry `{thread dir}/`, then one regular
//! file entry `{thread dir}/{message}.eml` per message, in input order.
//! Failures confined to a single message never abort the archive.

use std::io::{self, Read, Write};

use chrono::Utc;
use tar::{Builder, EntryType, Header};
use tracing::{debug, info, warn};

use crate::archive::report::{ArchiveReport, FailureStage, MessageOutcome};
use crate::model::message::{MessageBlob, MessageContent, MessageSummary, StreamWriter};
use crate::model::thread::Threads;
use crate::naming::build_thread_directory_name;
use crate::source::MessageFetcher;

const BLOCK_SIZE: u64 = 512;
const DIR_MODE: u32 = 0o755;
const FILE_MODE: u32 = 0o644;
const BYTES_PER_MB: u64 = 1024 * 1024;

/// Writes thread groups into a tar stream over `W`.
///
/// The sink is flushed after each `write_threads*` call but never closed;
/// [`TarWriter::finish`] appends the end-of-archive marker and hands the sink
/// back to the caller.
pub struct TarWriter<W: Write> {
    builder: Builder<W>,
}

impl<W: Write> TarWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            builder: Builder::new(sink),
        }
    }

    /// Archive fully materialized messages.
    pub fn write_threads(&mut self, threads: Threads<MessageBlob>) -> io::Result<ArchiveReport> {
        let mut report = ArchiveReport::default();

        for group in threads {
            let thread_id = group.thread_id;
            let Some(first) = group.messages.first() else {
                skip_empty_thread(thread_id, &mut report);
                continue;
            };

            let dir = build_thread_directory_name(thread_id, Some(first.subject.as_str()));
            self.append_directory(&dir, first.date.timestamp())?;
            report.threads_written += 1;

            for blob in group.messages {
                let outcome = self.append_message(thread_id, &dir, blob)?;
                report.record(outcome);
            }
        }

        self.flush()?;
        Ok(report)
    }

    /// Archive messages fetched one at a time through `fetcher`.
    ///
    /// A message that cannot be fetched is logged, recorded and skipped. After
    /// a message larger than half of `max_message_size_mb`, the sink is
    /// flushed before the next fetch so encoder buffers do not pile up.
    pub fn write_threads_streaming(
        &mut self,
        threads: &Threads<MessageSummary>,
        fetcher: &mut dyn MessageFetcher,
        max_message_size_mb: u32,
    ) -> io::Result<ArchiveReport> {
        let release_threshold = u64::from(max_message_size_mb) * BYTES_PER_MB / 2;
        let mut report = ArchiveReport::default();

        for group in threads {
            let thread_id = group.thread_id;
            let Some(first) = group.messages.first() else {
                skip_empty_thread(thread_id, &mut report);
                continue;
            };

            let dir = build_thread_directory_name(thread_id, first.subject.as_deref());
            let mtime = first.date.unwrap_or_else(Utc::now).timestamp();
            self.append_directory(&dir, mtime)?;
            report.threads_written += 1;

            for summary in &group.messages {
                let blob = match fetcher.fetch(summary) {
                    Ok(blob) => blob,
                    Err(e) => {
                        warn!(
                            thread_id,
                            unique_id = %summary.unique_id,
                            error = %e,
                            "Failed to fetch message, skipping"
                        );
                        report.record(MessageOutcome::Failed {
                            thread_id,
                            unique_id: summary.unique_id.clone(),
                            stage: FailureStage::Fetch,
                            reason: e.to_string(),
                        });
                        continue;
                    }
                };

                let size = blob.size();
                let outcome = self.append_message(thread_id, &dir, blob)?;
                report.record(outcome);

                if size > release_threshold {
                    self.flush()?;
                    debug!(
                        unique_id = %summary.unique_id,
                        size,
                        "Released large message before next fetch"
                    );
                }
            }
        }

        self.flush()?;
        Ok(report)
    }

    /// Write the end-of-archive marker and return the sink.
    pub fn finish(self) -> io::Result<W> {
        self.builder.into_inner()
    }

    fn flush(&mut self) -> io::Result<()> {
        self.builder.get_mut().flush()
    }

    fn append_directory(&mut self, name: &str, mtime: i64) -> io::Result<()> {
        let mut header = Header::new_ustar();
        header.set_entry_type(EntryType::Directory);
        header.set_size(0);
        header.set_mode(DIR_MODE);
        header.set_mtime(clamp_mtime(mtime));
        self.builder
            .append_data(&mut header, format!("{name}/"), io::empty())
    }

    /// Append one message. `Err` means the sink itself failed; a bad message
    /// body comes back as a `Failed` outcome.
    fn append_message(
        &mut self,
        thread_id: u64,
        dir: &str,
        blob: MessageBlob,
    ) -> io::Result<MessageOutcome> {
        let entry_path = format!("{dir}/{}", blob.file_name());
        let unique_id = blob.unique_id.clone();
        let size = blob.size();

        let mut header = Header::new_ustar();
        header.set_entry_type(EntryType::Regular);
        header.set_size(size);
        header.set_mode(FILE_MODE);
        header.set_mtime(clamp_mtime(blob.date.timestamp()));

        let body = match blob.into_content() {
            MessageContent::Buffered(bytes) => {
                self.builder
                    .append_data(&mut header, &entry_path, bytes.as_slice())?;
                Ok(())
            }
            MessageContent::Empty => {
                self.builder
                    .append_data(&mut header, &entry_path, io::empty())?;
                Ok(())
            }
            MessageContent::Streamed(writer) => {
                self.append_streamed(&mut header, &entry_path, size, writer)?
            }
        };

        Ok(match body {
            Ok(()) => MessageOutcome::Written {
                thread_id,
                unique_id,
                entry_path,
                size,
            },
            Err(reason) => {
                warn!(
                    thread_id,
                    unique_id = %unique_id,
                    entry = %entry_path,
                    reason = %reason,
                    "Message body incomplete, entry zero-padded"
                );
                MessageOutcome::Failed {
                    thread_id,
                    unique_id,
                    stage: FailureStage::Write,
                    reason,
                }
            }
        })
    }

    /// Write the header, run the writer against a size-bounded view of the
    /// sink, then pad the entry to its declared size.
    fn append_streamed(
        &mut self,
        header: &mut Header,
        path: &str,
        size: u64,
        writer: StreamWriter,
    ) -> io::Result<std::result::Result<(), String>> {
        header.set_path(path)?;
        header.set_cksum();
        self.builder.append(header, io::empty())?;

        let mut body = EntryBody::new(self.builder.get_mut(), size);
        let result = writer(&mut body);
        let written = body.written;
        if let Some(e) = body.sink_error.take() {
            return Err(e);
        }

        pad_entry(self.builder.get_mut(), size, written)?;

        Ok(match result {
            Ok(()) if written == size => Ok(()),
            Ok(()) => Err(format!("stream ended after {written} of {size} bytes")),
            Err(e) => Err(e.to_string()),
        })
    }
}

fn skip_empty_thread(thread_id: u64, report: &mut ArchiveReport) {
    info!(thread_id, "Thread has no messages, skipping");
    report.empty_threads.push(thread_id);
}

fn clamp_mtime(timestamp: i64) -> u64 {
    u64::try_from(timestamp).unwrap_or(0)
}

/// Zero-fill the rest of the declared body, then the 512-byte block remainder.
fn pad_entry<W: Write>(sink: &mut W, size: u64, written: u64) -> io::Result<()> {
    let missing = size.saturating_sub(written);
    let block_pad = (BLOCK_SIZE - size % BLOCK_SIZE) % BLOCK_SIZE;
    io::copy(&mut io::repeat(0).take(missing + block_pad), sink)?;
    Ok(())
}

/// Bounded view of the tar sink handed to streaming writers.
///
/// Refuses bytes past the declared size, and remembers whether an error came
/// from the sink (fatal) rather than from the writer (per-message).
struct EntryBody<'a, W: Write> {
    sink: &'a mut W,
    limit: u64,
    written: u64,
    sink_error: Option<io::Error>,
}

impl<'a, W: Write> EntryBody<'a, W> {
    fn new(sink: &'a mut W, limit: u64) -> Self {
        Self {
            sink,
            limit,
            written: 0,
            sink_error: None,
        }
    }

    fn sink_failed(&mut self, e: io::Error) -> io::Error {
        if e.kind() == io::ErrorKind::Interrupted {
            return e;
        }
        let echo = io::Error::new(e.kind(), e.to_string());
        self.sink_error = Some(e);
        echo
    }
}

impl<W: Write> Write for EntryBody<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let remaining = self.limit - self.written;
        if remaining == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("message body exceeds its declared size of {} bytes", self.limit),
            ));
        }

        let len = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        match self.sink.write(&buf[..len]) {
            Ok(n) => {
                self.written += n as u64;
                Ok(n)
            }
            Err(e) => Err(self.sink_failed(e)),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.sink.flush() {
            Ok(()) => Ok(()),
            Err(e) => Err(self.sink_failed(e)),
        }
    }
}
