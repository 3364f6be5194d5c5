//! Line-oriented output capture with a hard byte budget.
//!
//! Runaway scripts can print without end, so every stream is capped. Bytes
//! past the cap are still read from the pipe (otherwise the child blocks on a
//! full pipe) but thrown away, and the capture is flagged as truncated.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

use crate::types::{CapturedOutput, OutputLine};

const READ_CHUNK: usize = 8 * 1024;

/// Accumulates one stream, splitting on `\n` and stamping each line with the
/// offset at which its first byte arrived.
#[derive(Debug)]
pub struct StreamCapture {
    origin: Instant,
    cap: usize,
    stored: usize,
    truncated: bool,
    lines: Vec<OutputLine>,
    partial: Vec<u8>,
    partial_offset: Option<Duration>,
}

impl StreamCapture {
    pub fn new(origin: Instant, cap: usize) -> Self {
        Self {
            origin,
            cap,
            stored: 0,
            truncated: false,
            lines: Vec::new(),
            partial: Vec::new(),
            partial_offset: None,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        let now = self.origin.elapsed();
        self.push_at(chunk, now);
    }

    /// Like [`push`](Self::push) with an explicit arrival offset.
    pub fn push_at(&mut self, chunk: &[u8], offset: Duration) {
        let mut rest = chunk;
        while !rest.is_empty() && !self.truncated {
            match rest.iter().position(|b| *b == b'\n') {
                Some(i) => {
                    self.append(&rest[..i], offset);
                    self.end_line(offset);
                    rest = &rest[i + 1..];
                }
                None => {
                    self.append(rest, offset);
                    rest = &[];
                }
            }
        }
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Flush any trailing partial line and return the capture.
    pub fn finish(mut self) -> CapturedOutput {
        if !self.partial.is_empty() {
            self.flush_partial(self.origin.elapsed());
        }
        CapturedOutput {
            lines: self.lines,
            bytes: self.stored,
            truncated: self.truncated,
        }
    }

    /// Snapshot without consuming (used when a reader task is abandoned).
    pub fn snapshot(&self) -> CapturedOutput {
        let mut lines = self.lines.clone();
        if !self.partial.is_empty() {
            lines.push(self.partial_line(self.origin.elapsed()));
        }
        CapturedOutput {
            lines,
            bytes: self.stored,
            truncated: self.truncated,
        }
    }

    fn append(&mut self, bytes: &[u8], offset: Duration) {
        if bytes.is_empty() {
            return;
        }
        if self.partial_offset.is_none() {
            self.partial_offset = Some(offset);
        }
        let room = self.cap.saturating_sub(self.stored);
        let take = bytes.len().min(room);
        self.partial.extend_from_slice(&bytes[..take]);
        self.stored += take;
        if take < bytes.len() {
            self.truncated = true;
        }
    }

    fn end_line(&mut self, offset: Duration) {
        if self.truncated {
            return;
        }
        if self.stored >= self.cap {
            self.truncated = true;
            return;
        }
        // the newline itself counts against the budget
        self.stored += 1;
        self.flush_partial(offset);
    }

    fn flush_partial(&mut self, offset: Duration) {
        let line = self.partial_line(offset);
        self.lines.push(line);
        self.partial.clear();
        self.partial_offset = None;
    }

    fn partial_line(&self, fallback: Duration) -> OutputLine {
        let offset = self.partial_offset.unwrap_or(fallback);
        let raw = self.partial.strip_suffix(b"\r").unwrap_or(&self.partial);
        OutputLine {
            offset_ms: offset.as_millis() as u64,
            text: strip_text(raw),
        }
    }
}

/// Read `reader` to EOF into the shared capture.
pub async fn drain<R>(mut reader: R, capture: Arc<Mutex<StreamCapture>>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => capture
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(&buf[..n]),
            Err(e) => {
                debug!(error = %e, "output pipe read failed");
                break;
            }
        }
    }
}

/// Strip ANSI escape codes and convert bytes to a UTF-8 string.
fn strip_text(raw: &[u8]) -> String {
    let clean = strip_ansi_escapes::strip(raw);
    String::from_utf8_lossy(&clean).into_owned()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn capture(cap: usize) -> StreamCapture {
        StreamCapture::new(Instant::now(), cap)
    }

    #[test]
    fn splits_lines_across_chunks() {
        let mut c = capture(1024);
        c.push_at(b"hel", Duration::from_millis(3));
        c.push_at(b"lo\nwor", Duration::from_millis(7));
        c.push_at(b"ld\n", Duration::from_millis(9));
        let out = c.finish();

        assert_eq!(out.lines.len(), 2);
        assert_eq!(out.lines[0].text, "hello");
        // stamped when the first byte of the line arrived
        assert_eq!(out.lines[0].offset_ms, 3);
        assert_eq!(out.lines[1].text, "world");
        assert_eq!(out.lines[1].offset_ms, 7);
        assert!(!out.truncated);
        assert_eq!(out.bytes, 12);
    }

    #[test]
    fn trailing_partial_line_is_kept() {
        let mut c = capture(1024);
        c.push(b"no newline at end");
        let out = c.finish();
        assert_eq!(out.lines.len(), 1);
        assert_eq!(out.lines[0].text, "no newline at end");
    }

    #[test]
    fn empty_lines_are_preserved() {
        let mut c = capture(1024);
        c.push(b"a\n\nb\n");
        let out = c.finish();
        let texts: Vec<_> = out.lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "", "b"]);
    }

    #[test]
    fn cap_truncates_and_flags() {
        let mut c = capture(10);
        c.push(b"0123456789ABCDEF\nmore\n");
        assert!(c.is_truncated());
        let out = c.finish();
        assert!(out.truncated);
        assert_eq!(out.bytes, 10);
        assert_eq!(out.lines.len(), 1);
        assert_eq!(out.lines[0].text, "0123456789");
    }

    #[test]
    fn newlines_count_against_budget() {
        let mut c = capture(4);
        c.push(b"\n\n\n\n\n\n\n\n");
        let out = c.finish();
        assert!(out.truncated);
        assert_eq!(out.lines.len(), 4);
    }

    #[test]
    fn ansi_codes_and_crlf_are_stripped() {
        let mut c = capture(1024);
        c.push(b"\x1b[32mgreen\x1b[0m\r\n");
        let out = c.finish();
        assert_eq!(out.lines[0].text, "green");
    }

    #[test]
    fn snapshot_includes_partial_without_consuming() {
        let mut c = capture(1024);
        c.push(b"done\npart");
        let snap = c.snapshot();
        assert_eq!(snap.lines.len(), 2);
        assert_eq!(snap.lines[1].text, "part");
        c.push(b"ial\n");
        assert_eq!(c.finish().lines[1].text, "partial");
    }

    #[tokio::test]
    async fn drain_reads_until_eof() {
        let data: &[u8] = b"one\ntwo\nthree";
        let shared = Arc::new(Mutex::new(capture(1024)));
        drain(data, Arc::clone(&shared)).await;
        let out = Arc::try_unwrap(shared).unwrap().into_inner().unwrap().finish();
        assert_eq!(out.plain(), "one\ntwo\nthree");
    }
}
