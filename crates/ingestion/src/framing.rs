//! FrameDecoder - splits the source byte stream into frames
//!
//! Transport-independent: TCP reads and UDP datagrams are both pushed in
//! arbitrary chunks, complete frames come out in arrival order.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use contracts::Framing;
use tracing::trace;

use crate::error::FrameError;

const LENGTH_PREFIX_LEN: usize = 4;

/// Incremental frame decoder
#[derive(Debug)]
pub struct FrameDecoder {
    framing: Framing,
    max_frame_len: usize,
    buf: BytesMut,
    /// Newline framing: skipping an oversized frame up to its delimiter
    discarding: bool,
    /// Length-prefixed framing: payload bytes of an oversized frame still to skip
    skip_remaining: usize,
}

impl FrameDecoder {
    pub fn new(framing: Framing, max_frame_len: usize) -> Self {
        Self {
            framing,
            max_frame_len,
            buf: BytesMut::with_capacity(4096),
            discarding: false,
            skip_remaining: 0,
        }
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Bytes buffered but not yet emitted as a frame
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Append received bytes
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Next complete frame, if any
    ///
    /// An oversized frame is reported once as `Err` and its bytes are skipped.
    pub fn next_frame(&mut self) -> Option<Result<Bytes, FrameError>> {
        match self.framing {
            Framing::Newline => self.next_line(),
            Framing::LengthPrefixed => self.next_prefixed(),
        }
    }

    /// Push `data` and drain every frame it completes
    pub fn decode(&mut self, data: &[u8]) -> Vec<Result<Bytes, FrameError>> {
        self.push(data);
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame() {
            frames.push(frame);
        }
        frames
    }

    /// Flush a trailing unterminated frame
    ///
    /// Used at datagram boundaries, where the last line may lack its LF. A
    /// partial length-prefixed frame cannot be completed and is dropped.
    pub fn finish(&mut self) -> Option<Result<Bytes, FrameError>> {
        let pending = self.buf.split();
        let discarding = std::mem::take(&mut self.discarding);
        self.skip_remaining = 0;

        match self.framing {
            Framing::Newline if !discarding => {
                let line = trim_line(pending);
                if line.is_empty() {
                    None
                } else if line.len() > self.max_frame_len {
                    Some(Err(FrameError::Oversized {
                        len: line.len(),
                        max: self.max_frame_len,
                    }))
                } else {
                    Some(Ok(line.freeze()))
                }
            }
            _ => {
                if !pending.is_empty() {
                    trace!(bytes = pending.len(), "dropping incomplete frame");
                }
                None
            }
        }
    }

    /// Drop all buffered state (new session)
    pub fn reset(&mut self) {
        self.buf.clear();
        self.discarding = false;
        self.skip_remaining = 0;
    }

    fn next_line(&mut self) -> Option<Result<Bytes, FrameError>> {
        loop {
            let newline = self.buf.iter().position(|b| *b == b'\n');

            if self.discarding {
                match newline {
                    Some(pos) => {
                        self.buf.advance(pos + 1);
                        self.discarding = false;
                        continue;
                    }
                    None => {
                        self.buf.clear();
                        return None;
                    }
                }
            }

            match newline {
                Some(pos) => {
                    let line = trim_line(self.buf.split_to(pos + 1));
                    if line.is_empty() {
                        continue;
                    }
                    if line.len() > self.max_frame_len {
                        return Some(Err(FrameError::Oversized {
                            len: line.len(),
                            max: self.max_frame_len,
                        }));
                    }
                    return Some(Ok(line.freeze()));
                }
                None if self.buf.len() > self.max_frame_len => {
                    let len = self.buf.len();
                    self.buf.clear();
                    self.discarding = true;
                    return Some(Err(FrameError::Oversized {
                        len,
                        max: self.max_frame_len,
                    }));
                }
                None => return None,
            }
        }
    }

    fn next_prefixed(&mut self) -> Option<Result<Bytes, FrameError>> {
        loop {
            if self.skip_remaining > 0 {
                let n = self.skip_remaining.min(self.buf.len());
                self.buf.advance(n);
                self.skip_remaining -= n;
                if self.skip_remaining > 0 {
                    return None;
                }
            }

            if self.buf.len() < LENGTH_PREFIX_LEN {
                return None;
            }

            let len = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]])
                as usize;

            if len > self.max_frame_len {
                self.buf.advance(LENGTH_PREFIX_LEN);
                self.skip_remaining = len;
                return Some(Err(FrameError::Oversized {
                    len,
                    max: self.max_frame_len,
                }));
            }

            if self.buf.len() < LENGTH_PREFIX_LEN + len {
                return None;
            }

            self.buf.advance(LENGTH_PREFIX_LEN);
            let frame = self.buf.split_to(len).freeze();
            if frame.is_empty() {
                continue;
            }
            return Some(Ok(frame));
        }
    }
}

/// Strip the LF and an optional CR
fn trim_line(mut line: BytesMut) -> BytesMut {
    if line.last() == Some(&b'\n') {
        line.truncate(line.len() - 1);
    }
    if line.last() == Some(&b'\r') {
        line.truncate(line.len() - 1);
    }
    line
}

/// Wrap `payload` for transmission with the given framing
pub fn encode_frame(framing: Framing, payload: &[u8]) -> Bytes {
    match framing {
        Framing::Newline => {
            let mut out = BytesMut::with_capacity(payload.len() + 1);
            out.extend_from_slice(payload);
            out.put_u8(b'\n');
            out.freeze()
        }
        Framing::LengthPrefixed => {
            let mut out = BytesMut::with_capacity(payload.len() + LENGTH_PREFIX_LEN);
            out.put_u32(payload.len() as u32);
            out.extend_from_slice(payload);
            out.freeze()
        }
    }
}
