//! TCP stream
//!
//! Wraps a non-blocking `mio` TCP stream. Received bytes are handed out one
//! read at a time, exactly as the kernel delivers them: a chunk may hold part
//! of a reading, or several readings back to back.

use super::{txbuf::TxBuf, RecvError, SendError};
use mio::net::TcpStream;
use std::io;
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr};

/// Largest chunk returned by a single `recv`.
const CHUNK_SIZE: usize = 4096;

pub struct Stream {
    /// Underlying stream
    stream: TcpStream,
    /// Scratch space for reads.
    rxbuf: Box<[u8; CHUNK_SIZE]>,
    /// Outgoing data not yet accepted by the socket.
    txbuf: TxBuf,
}

impl Stream {
    /// Takes ownership of a MIO `TcpStream` and constructs a `Stream` over it.
    pub fn from_stream(stream: TcpStream) -> Stream {
        Stream {
            stream,
            rxbuf: Box::new([0; CHUNK_SIZE]),
            txbuf: TxBuf::new(),
        }
    }

    /// Starts a non-blocking connection attempt to `address`. Completion is
    /// signaled by the stream becoming writable, see `finish_connect`.
    pub fn connect(address: SocketAddr) -> io::Result<Stream> {
        Ok(Stream::from_stream(TcpStream::connect(address)?))
    }

    /// Checks the outcome of a pending connection after a readiness event.
    /// Returns `Ok(Some(peer))` once established, `Ok(None)` if still in
    /// progress, or the error that made the attempt fail.
    pub fn finish_connect(&self) -> io::Result<Option<SocketAddr>> {
        if let Some(err) = self.stream.take_error()? {
            return Err(err);
        }
        match self.stream.peer_addr() {
            Ok(peer) => Ok(Some(peer)),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Returns the next chunk of received bytes without blocking.
    pub fn recv(&mut self) -> Result<Vec<u8>, RecvError> {
        loop {
            match self.stream.read(&mut self.rxbuf[..]) {
                Ok(0) => return Err(RecvError::Disconnected),
                Ok(size) => return Ok(self.rxbuf[..size].to_vec()),
                Err(e) => match e.kind() {
                    io::ErrorKind::WouldBlock => return Err(RecvError::NotReady),
                    io::ErrorKind::Interrupted => continue,
                    _ => return Err(RecvError::IO(e)),
                },
            }
        }
    }

    /// Queues `data` and writes out as much as the socket accepts. Returns
    /// `SendError::MustDrain` if some of it is still pending.
    pub fn send(&mut self, data: &[u8]) -> Result<(), SendError> {
        self.txbuf.add_data(data)?;
        self.drain()
    }

    pub fn drain(&mut self) -> Result<(), SendError> {
        self.txbuf.drain(&mut self.stream)
    }

    /// Best effort flush of pending data, then shuts down both directions.
    pub fn shutdown(&mut self) {
        let _ = self.drain();
        let _ = self.stream.flush();
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

impl mio::event::Source for Stream {
    fn register(
        &mut self,
        registry: &mio::Registry,
        token: mio::Token,
        interests: mio::Interest,
    ) -> io::Result<()> {
        self.stream.register(registry, token, interests)
    }

    fn reregister(
        &mut self,
        registry: &mio::Registry,
        token: mio::Token,
        interests: mio::Interest,
    ) -> io::Result<()> {
        self.stream.reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &mio::Registry) -> io::Result<()> {
        self.stream.deregister(registry)
    }
}
