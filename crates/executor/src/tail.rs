// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ring buffer capturing the last bytes of an executor's stderr.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::Write;
use std::sync::Arc;

/// Default tail capacity appended to executor errors.
pub const DEFAULT_TAIL_BYTES: usize = 4096;

/// Shared handle onto the captured tail. The scheduler keeps one clone
/// while the wrapping [`TailWriter`] travels into the executor.
#[derive(Clone)]
pub struct TailBuf {
    inner: Arc<Mutex<VecDeque<u8>>>,
    cap: usize,
}

impl TailBuf {
    pub fn new(cap: usize) -> Self {
        Self { inner: Arc::new(Mutex::new(VecDeque::with_capacity(cap.min(4096)))), cap }
    }

    fn push(&self, data: &[u8]) {
        let mut buf = self.inner.lock();
        for &b in data {
            if buf.len() == self.cap {
                buf.pop_front();
            }
            buf.push_back(b);
        }
    }

    /// Captured bytes as lossy UTF-8, trimmed.
    pub fn contents(&self) -> String {
        let buf = self.inner.lock();
        let (a, b) = buf.as_slices();
        let mut bytes = Vec::with_capacity(buf.len());
        bytes.extend_from_slice(a);
        bytes.extend_from_slice(b);
        String::from_utf8_lossy(&bytes).trim().to_string()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Append the tail to an error message for diagnosis.
    pub fn annotate(&self, message: &str) -> String {
        let tail = self.contents();
        if tail.is_empty() {
            message.to_string()
        } else {
            format!("{message}\nstderr tail:\n{tail}")
        }
    }
}

impl Default for TailBuf {
    fn default() -> Self {
        Self::new(DEFAULT_TAIL_BYTES)
    }
}

/// Writer wrapper that tees everything into a [`TailBuf`].
pub struct TailWriter<W: Write> {
    inner: W,
    buf: TailBuf,
}

impl<W: Write> TailWriter<W> {
    pub fn new(inner: W, buf: TailBuf) -> Self {
        Self { inner, buf }
    }
}

impl<W: Write> Write for TailWriter<W> {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(data)?;
        self.buf.push(&data[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
#[path = "tail_tests.rs"]
mod tail_tests;
