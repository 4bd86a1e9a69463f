// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Demultiplexer for the engine's header-framed log stream.
//!
//! Frames are `[stream_type, 0, 0, 0, len_be_u32, payload]`; stream type
//! 1 is stdout, 2 is stderr. Frames may arrive split across reads, so the
//! demuxer buffers partial input between `feed` calls.

use crate::runtime::LogSink;

const HEADER_LEN: usize = 8;
const STREAM_STDERR: u8 = 2;

#[derive(Default)]
pub struct StreamDemuxer {
    buf: Vec<u8>,
}

impl StreamDemuxer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; complete frames are forwarded to the sink,
    /// partial trailing data is retained.
    pub fn feed(&mut self, chunk: &[u8], sink: &mut dyn LogSink) -> std::io::Result<()> {
        self.buf.extend_from_slice(chunk);
        let mut offset = 0usize;
        while self.buf.len() - offset >= HEADER_LEN {
            let header = &self.buf[offset..offset + HEADER_LEN];
            let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
            if self.buf.len() - offset < HEADER_LEN + len {
                break;
            }
            let payload = &self.buf[offset + HEADER_LEN..offset + HEADER_LEN + len];
            if header[0] == STREAM_STDERR {
                sink.stderr_chunk(payload)?;
            } else {
                sink.stdout_chunk(payload)?;
            }
            offset += HEADER_LEN + len;
        }
        self.buf.drain(..offset);
        Ok(())
    }

    /// Bytes still waiting for the rest of their frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
#[path = "demux_tests.rs"]
mod demux_tests;
