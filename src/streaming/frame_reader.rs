use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use std::collections::VecDeque;
use std::fmt::Display;

use crate::error::StreamError;

/// Separator between two frames on the wire.
const FRAME_DELIMITER: &str = "\n\n";

// ==================================================================================================
// Frame splitting
// ==================================================================================================

/// Incremental UTF-8 decoder plus frame splitter.
///
/// Bytes of a multi-byte character split across two reads are held back until the
/// character is complete. `\r\n` and lone `\r` line endings are normalized to `\n`.
/// Decoded text that does not yet end in a delimiter is held back until the next read.
#[derive(Debug, Default)]
pub struct FrameSplitter {
    /// Undecoded tail of the last read (an incomplete UTF-8 sequence)
    pending_bytes: Vec<u8>,
    /// Decoded text not yet terminated by a delimiter
    text: String,
    /// Prefix of `text` already searched for a delimiter
    scanned: usize,
    /// Last read ended in `\r`; its meaning depends on the next character
    pending_cr: bool,
}

impl FrameSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one read's worth of bytes and return every frame it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.decode(chunk);

        let mut frames = Vec::new();
        // A delimiter may straddle the old end, so back up by one byte
        let mut from = self.scanned.saturating_sub(FRAME_DELIMITER.len() - 1);
        while let Some(pos) = find_delimiter(&self.text, from) {
            frames.push(self.text[..pos].to_string());
            self.text.drain(..pos + FRAME_DELIMITER.len());
            from = 0;
        }
        self.scanned = self.text.len();
        frames
    }

    /// Flush whatever is left once the byte stream has ended.
    ///
    /// Returns the undelimited remainder if it has any non-blank content.
    pub fn finish(&mut self) -> Option<String> {
        if !self.pending_bytes.is_empty() {
            tracing::debug!(
                "Flushing {} trailing bytes of an incomplete UTF-8 sequence",
                self.pending_bytes.len()
            );
            let tail = String::from_utf8_lossy(&self.pending_bytes).into_owned();
            self.push_text(&tail);
            self.pending_bytes.clear();
        }
        if std::mem::take(&mut self.pending_cr) {
            self.text.push('\n');
        }

        self.scanned = 0;
        let rest = std::mem::take(&mut self.text);
        if rest.trim().is_empty() {
            None
        } else {
            Some(rest)
        }
    }

    fn decode(&mut self, chunk: &[u8]) {
        let mut bytes = std::mem::take(&mut self.pending_bytes);
        bytes.extend_from_slice(chunk);

        let mut start = 0;
        loop {
            match std::str::from_utf8(&bytes[start..]) {
                Ok(text) => {
                    self.push_text(text);
                    start = bytes.len();
                    break;
                }
                Err(e) => {
                    let valid_end = start + e.valid_up_to();
                    self.push_text(&String::from_utf8_lossy(&bytes[start..valid_end]));

                    match e.error_len() {
                        // Invalid sequence in the middle: replace it and keep going
                        Some(len) => {
                            self.push_text("\u{FFFD}");
                            start = valid_end + len;
                        }
                        // Incomplete sequence at the end: wait for the next read
                        None => {
                            start = valid_end;
                            break;
                        }
                    }
                }
            }
        }

        bytes.drain(..start);
        self.pending_bytes = bytes;
    }

    fn push_text(&mut self, text: &str) {
        for c in text.chars() {
            if std::mem::take(&mut self.pending_cr) {
                self.text.push('\n');
                if c == '\n' {
                    continue;
                }
            }
            if c == '\r' {
                self.pending_cr = true;
            } else {
                self.text.push(c);
            }
        }
    }
}

/// Byte offset of the first delimiter at or after `from`.
fn find_delimiter(text: &str, from: usize) -> Option<usize> {
    let delimiter = FRAME_DELIMITER.as_bytes();
    text.as_bytes()
        .get(from..)?
        .windows(delimiter.len())
        .position(|window| window == delimiter)
        .map(|pos| from + pos)
}

// ==================================================================================================
// Frame reader
// ==================================================================================================

/// Pulls bytes from a byte stream and yields complete frames.
///
/// Exactly one read of the underlying stream is outstanding at a time, and only when the
/// caller asks for the next frame. The byte stream is released as soon as it ends, fails,
/// or the reader is dropped, whichever comes first.
pub struct FrameReader<S> {
    inner: Option<S>,
    splitter: FrameSplitter,
    ready: VecDeque<String>,
}

impl<S, E> FrameReader<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    pub fn new(inner: S) -> Self {
        Self {
            inner: Some(inner),
            splitter: FrameSplitter::new(),
            ready: VecDeque::new(),
        }
    }

    /// Next complete frame, or `None` once the byte stream is exhausted.
    ///
    /// A read failure is returned once; the reader is released and finished after it.
    pub async fn next_frame(&mut self) -> Option<Result<String, StreamError>> {
        loop {
            if let Some(frame) = self.ready.pop_front() {
                return Some(Ok(frame));
            }

            let inner = self.inner.as_mut()?;
            match inner.next().await {
                Some(Ok(chunk)) => {
                    tracing::trace!("Read {} bytes from stream", chunk.len());
                    self.ready.extend(self.splitter.push(&chunk));
                }
                Some(Err(e)) => {
                    self.release();
                    return Some(Err(StreamError::Read(e.to_string())));
                }
                None => {
                    self.release();
                    if let Some(rest) = self.splitter.finish() {
                        tracing::debug!("Stream ended without a trailing delimiter");
                        self.ready.push_back(rest);
                    }
                }
            }
        }
    }

    /// Whether the underlying byte stream is still held.
    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    /// Turn the reader into a lazy stream of frames.
    pub fn into_stream(self) -> impl Stream<Item = Result<String, StreamError>> {
        futures::stream::unfold(self, |mut reader| async move {
            let frame = reader.next_frame().await?;
            Some((frame, reader))
        })
    }
}

impl<S> FrameReader<S> {
    fn release(&mut self) {
        if self.inner.take().is_some() {
            tracing::debug!("Released byte stream");
        }
    }
}

impl<S> Drop for FrameReader<S> {
    fn drop(&mut self) {
        if self.inner.is_some() {
            tracing::debug!("Frame reader dropped before end of stream, releasing byte stream");
        }
        self.release();
    }
}
