// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Newline-framed reader for files that are still being written.
//!
//! A writer appending to a trace can be caught mid-line. `LineReader` only
//! yields newline-terminated lines; a trailing partial line stays buffered
//! across end-of-input and is completed by the bytes of a later read.

use tokio::io::{AsyncRead, AsyncReadExt};

const CHUNK_SIZE: usize = 8 * 1024;

/// Yields complete lines from an async byte source.
pub struct LineReader<R> {
    inner: R,
    pending: Vec<u8>,
    /// Bytes of `pending` already searched for a newline.
    scanned: usize,
    chunk: Box<[u8]>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    /// Wrap a byte source.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            pending: Vec::new(),
            scanned: 0,
            chunk: vec![0u8; CHUNK_SIZE].into_boxed_slice(),
        }
    }

    /// Read the next complete line, without its terminator.
    ///
    /// Returns `Ok(None)` at end of input; any partial line read so far is
    /// kept for the next call.
    pub async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        loop {
            if let Some(line) = self.take_line() {
                return Ok(Some(line));
            }
            let n = self.inner.read(&mut self.chunk).await?;
            if n == 0 {
                return Ok(None);
            }
            self.pending.extend_from_slice(&self.chunk[..n]);
        }
    }

    /// Bytes buffered after the last complete line.
    pub fn partial(&self) -> &[u8] {
        &self.pending
    }

    /// Take the unterminated remainder once the source is known to be closed.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        self.scanned = 0;
        let rest = std::mem::take(&mut self.pending);
        Some(decode(&rest))
    }

    fn take_line(&mut self) -> Option<String> {
        let offset = self.pending[self.scanned..]
            .iter()
            .position(|&b| b == b'\n');
        match offset {
            Some(offset) => {
                let end = self.scanned + offset;
                let line: Vec<u8> = self.pending.drain(..=end).collect();
                self.scanned = 0;
                Some(decode(&line[..end]))
            }
            None => {
                self.scanned = self.pending.len();
                None
            }
        }
    }
}

fn decode(bytes: &[u8]) -> String {
    let line = String::from_utf8_lossy(bytes);
    line.strip_suffix('\r').unwrap_or(&line).to_string()
}
