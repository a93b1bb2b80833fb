//! Buffered reader shared by every decoding step of a connection.
//!
//! The receiver owns the stream and a small fixed buffer. Bytes that arrive
//! beyond what a caller asked for stay in `buf[start..end]` and are handed
//! out before the stream is touched again, so one connection never needs
//! more than `capacity` bytes of read-ahead no matter how large a frame is.
//!
//! The buffer is linear, not circular: once `start == end` both cursors go
//! back to zero before the next receive.

use crate::config::RECEIVER_BUFFER_LEN;
use memchr::memchr;
use std::io::{self, ErrorKind, Read};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReceiveError {
    /// The stream ended before the request could be satisfied
    #[error("end of stream")]
    Eof,

    /// `read_until` ran out of destination space before seeing the delimiter
    #[error("destination too small for delimited field")]
    TooSmall,

    #[error("receive failed: {0}")]
    Io(#[from] io::Error),
}

/// Per-connection buffered reader
///
/// Invariant: `start <= end <= buf.len()`.
pub struct Receiver<R> {
    stream: R,
    buf: Box<[u8]>,
    start: usize,
    end: usize,
}

impl<R: Read> Receiver<R> {
    pub fn new(stream: R) -> Self {
        Self::with_capacity(RECEIVER_BUFFER_LEN, stream)
    }

    pub fn with_capacity(capacity: usize, stream: R) -> Self {
        assert!(capacity > 0, "receiver capacity must be non-zero");
        Self {
            stream,
            buf: vec![0u8; capacity].into_boxed_slice(),
            start: 0,
            end: 0,
        }
    }

    /// Fill `dst` completely.
    ///
    /// Buffered bytes are delivered first. Short requests go through the
    /// internal buffer and keep any surplus for the next call; requests at
    /// least as large as the buffer are read straight into `dst`.
    pub fn read_exact(&mut self, dst: &mut [u8]) -> Result<(), ReceiveError> {
        if dst.is_empty() {
            return Ok(());
        }

        let mut filled = self.drain_into(dst);
        if filled == dst.len() {
            return Ok(());
        }

        if dst.len() - filled < self.buf.len() {
            while filled < dst.len() {
                self.fill()?;
                filled += self.drain_into(&mut dst[filled..]);
            }
        } else {
            while filled < dst.len() {
                filled += recv(&mut self.stream, &mut dst[filled..])?;
            }
        }

        Ok(())
    }

    /// Copy bytes into `dst` up to (not including) `delimiter`, consuming the
    /// delimiter. Returns the number of bytes written.
    ///
    /// A field that exactly fills `dst` is accepted when the delimiter comes
    /// next, whether or not it is already buffered. A longer field yields
    /// [`ReceiveError::TooSmall`]; the stream position is then unspecified
    /// and the caller is expected to abandon the frame.
    pub fn read_until(&mut self, delimiter: u8, dst: &mut [u8]) -> Result<usize, ReceiveError> {
        let mut written = 0;

        loop {
            let pending = &self.buf[self.start..self.end];
            let (take, found) = match memchr(delimiter, pending) {
                Some(pos) => (pos, true),
                None => (pending.len(), false),
            };

            if written + take > dst.len() {
                return Err(ReceiveError::TooSmall);
            }
            dst[written..written + take].copy_from_slice(&pending[..take]);
            written += take;

            if found {
                self.consume(take + 1);
                return Ok(written);
            }

            self.consume(take);
            self.fill()?;
        }
    }

    /// Bytes already received but not yet handed out
    pub fn buffered(&self) -> usize {
        self.end - self.start
    }

    pub fn get_ref(&self) -> &R {
        &self.stream
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.stream
    }

    /// Copy as much buffered data as fits into `dst`
    fn drain_into(&mut self, dst: &mut [u8]) -> usize {
        let n = self.buffered().min(dst.len());
        dst[..n].copy_from_slice(&self.buf[self.start..self.start + n]);
        self.consume(n);
        n
    }

    fn consume(&mut self, n: usize) {
        debug_assert!(self.start + n <= self.end);
        self.start += n;
        if self.start == self.end {
            self.start = 0;
            self.end = 0;
        }
    }

    /// One best-effort receive into the (empty) internal buffer
    fn fill(&mut self) -> Result<(), ReceiveError> {
        debug_assert_eq!(self.buffered(), 0);
        let n = recv(&mut self.stream, &mut self.buf)?;
        self.start = 0;
        self.end = n;
        Ok(())
    }
}

/// A single receive call. Zero bytes means the peer is gone.
fn recv<R: Read>(stream: &mut R, buf: &mut [u8]) -> Result<usize, ReceiveError> {
    loop {
        match stream.read(buf) {
            Ok(0) => return Err(ReceiveError::Eof),
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(ReceiveError::Io(e)),
        }
    }
}
