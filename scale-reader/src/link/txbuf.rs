//! Outgoing buffer for the TCP link.

use super::SendError;
use std::io;

/// Size of the internal buffer.
const TXBUF_SIZE: usize = 4096;

/// Holds bytes that could not be written to the socket right away, either
/// because the connection is still being established or because the kernel
/// buffer is full. Data is always taken whole or not at all.
pub struct TxBuf {
    /// Internal buffer. Valid data (possibly none) is
    /// in a slice delimited by `start` and `end`.
    buf: Box<[u8; TXBUF_SIZE]>,
    /// Start offset of valid data in `buf`.
    start: usize,
    /// End offset of valid data in `buf`.
    end: usize,
}

impl TxBuf {
    pub fn new() -> TxBuf {
        TxBuf {
            buf: Box::new([0; TXBUF_SIZE]),
            start: 0,
            end: 0,
        }
    }

    pub fn empty(&self) -> bool {
        self.start == self.end
    }

    /// Returns the amount of data contained in this buffer, in bytes.
    pub fn size(&self) -> usize {
        self.end - self.start
    }

    pub fn data(&self) -> &[u8] {
        &self.buf[self.start..self.end]
    }

    /// Discards up to `len` bytes off the beginning of the contained data.
    fn consume(&mut self, len: usize) {
        self.start += std::cmp::min(len, self.size());
        if self.empty() {
            self.start = 0;
            self.end = 0;
        }
    }

    /// Moves the data internally to the start of the buffer.
    fn compact(&mut self) {
        if self.start != 0 {
            let len = self.size();
            self.buf.copy_within(self.start..self.end, 0);
            self.start = 0;
            self.end = len;
        }
    }

    /// Appends `data` if all of it fits, otherwise leaves the buffer untouched
    /// and returns `SendError::Full`.
    pub fn add_data(&mut self, data: &[u8]) -> Result<(), SendError> {
        self.compact();
        if data.len() > TXBUF_SIZE - self.end {
            return Err(SendError::Full);
        }
        self.buf[self.end..self.end + data.len()].copy_from_slice(data);
        self.end += data.len();
        Ok(())
    }

    /// Sends as much of the contained data as possible to an object implementing `io::Write`.
    /// Returns `SendError::MustDrain` while data remains.
    pub fn drain<T: io::Write>(&mut self, writer: &mut T) -> Result<(), SendError> {
        while !self.empty() {
            match writer.write(self.data()) {
                Ok(0) => return Err(SendError::Disconnected),
                Ok(size) => self.consume(size),
                Err(e) => match e.kind() {
                    io::ErrorKind::WouldBlock | io::ErrorKind::NotConnected => {
                        return Err(SendError::MustDrain);
                    }
                    io::ErrorKind::Interrupted => {}
                    _ => return Err(SendError::IO(e)),
                },
            }
        }
        Ok(())
    }
}
