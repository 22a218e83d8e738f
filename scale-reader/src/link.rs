//! Scale link
//!
//! A `Link` owns the single outbound TCP connection to a scale. The socket is
//! driven by a dedicated thread running a `mio` event loop, and everything
//! that happens on it is reported as an `Event` through an owned callback.
//! The callback usually feeds a crossbeam channel (see `rx_to_channel`), so
//! that a single consumer sees the events strictly in order:
//!
//! - `Connected` first, exactly once, if the connection is established;
//! - one `Data` per read, in the order the bytes arrived;
//! - `Closed` last, at most once, and only for an established connection;
//! - `Error` whenever the transport fails. A failed connection attempt
//!   produces only an `Error`.
//!
//! Nothing is retried. Once the thread exits, the callback is dropped and a
//! channel fed by it disconnects.

mod tcp;
mod txbuf;

use crate::config::ScaleConfig;
use crossbeam::channel;
use mio::Interest;
use std::io;
use std::net::SocketAddr;
use std::thread;
use thiserror::Error;

/// Something that happened on the link.
#[derive(Debug)]
pub enum Event {
    /// The connection to the given peer was established.
    Connected(SocketAddr),
    /// Bytes delivered by a single read. Chunk boundaries carry no meaning.
    Data(Vec<u8>),
    /// The established connection is gone, whoever closed it.
    Closed,
    /// Transport failure.
    Error(LinkError),
}

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("cannot resolve {target}: {source}")]
    Resolve {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("connect {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("outgoing buffer full, dropped {0} bytes")]
    Overflow(usize),

    #[error("{0}")]
    Io(#[from] io::Error),
}

/// Possible errors when receiving from the socket.
#[derive(Debug)]
pub(crate) enum RecvError {
    /// No data available at this time.
    NotReady,
    /// The peer closed the connection.
    Disconnected,
    /// Low level IO error.
    IO(io::Error),
}

/// Possible errors when sending to a `Link`
#[derive(Debug)]
pub enum SendError {
    /// Data was queued but not fully written yet. Internal to the link thread.
    MustDrain,
    /// The outgoing buffer cannot take the data.
    Full,
    /// The link thread is gone.
    Disconnected,
    /// Issue with the underlying IO operation.
    IO(io::Error),
}

impl From<SendError> for LinkError {
    fn from(err: SendError) -> LinkError {
        match err {
            SendError::IO(e) => LinkError::Io(e),
            // Full is reported by the send path with the dropped length.
            SendError::Full | SendError::MustDrain | SendError::Disconnected => {
                LinkError::Io(io::Error::from(io::ErrorKind::BrokenPipe))
            }
        }
    }
}

/// Requests from the `Link` handle to its thread.
enum Control {
    Send(Vec<u8>),
    Close,
}

const WAKER: mio::Token = mio::Token(0);
const STREAM: mio::Token = mio::Token(1);

/// Default size of the event channel returned by `rx_channel`.
static DEFAULT_RX_CHANNEL_SIZE: usize = 64;

/// Handle to the link thread. Dropping it closes the connection.
pub struct Link {
    tx: Option<channel::Sender<Control>>,
    waker: mio::Waker,
}

impl Link {
    /// Method running the link thread event loop. It resolves and connects,
    /// then bridges `mio` readiness to the rx callback and the control
    /// channel to the socket.
    fn io_thread<RxCallbackT: Fn(Event) -> io::Result<()>>(
        config: ScaleConfig,
        mut poll: mio::Poll,
        rx: RxCallbackT,
        ctl: channel::Receiver<Control>,
    ) {
        use crossbeam::channel::TryRecvError;

        let addr = match config.resolve() {
            Ok(addr) => addr,
            Err(source) => {
                let _ = rx(Event::Error(LinkError::Resolve {
                    target: config.to_string(),
                    source,
                }));
                return;
            }
        };

        let mut stream = match tcp::Stream::connect(addr) {
            Ok(stream) => stream,
            Err(source) => {
                let _ = rx(Event::Error(LinkError::Connect { addr, source }));
                return;
            }
        };

        if let Err(e) =
            poll.registry()
                .register(&mut stream, STREAM, Interest::READABLE | Interest::WRITABLE)
        {
            let _ = rx(Event::Error(LinkError::Io(e)));
            return;
        }

        let mut events = mio::Events::with_capacity(8);
        let mut established = false;
        let mut needs_draining = false;

        'ioloop: loop {
            if let Err(e) = poll.poll(&mut events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                let _ = rx(Event::Error(LinkError::Io(e)));
                break 'ioloop;
            }

            let mut check_ctl = false;

            for event in events.iter() {
                match event.token() {
                    WAKER => {
                        check_ctl = true;
                    }
                    STREAM => {
                        if !established {
                            match stream.finish_connect() {
                                Ok(Some(peer)) => {
                                    established = true;
                                    if rx(Event::Connected(peer)).is_err() {
                                        break 'ioloop;
                                    }
                                    // Data sent while connecting is still queued.
                                    needs_draining = match stream.drain() {
                                        Ok(()) => false,
                                        Err(SendError::MustDrain) => true,
                                        Err(e) => {
                                            let _ = rx(Event::Error(e.into()));
                                            break 'ioloop;
                                        }
                                    };
                                    if let Err(e) =
                                        set_interest(&poll, &mut stream, needs_draining)
                                    {
                                        let _ = rx(Event::Error(LinkError::Io(e)));
                                        break 'ioloop;
                                    }
                                }
                                Ok(None) => {
                                    // Spurious wakeup, still connecting.
                                    continue;
                                }
                                Err(source) => {
                                    let _ = rx(Event::Error(LinkError::Connect { addr, source }));
                                    break 'ioloop;
                                }
                            }
                        } else if event.is_writable() && needs_draining {
                            match stream.drain() {
                                Ok(()) => {
                                    needs_draining = false;
                                    if let Err(e) = set_interest(&poll, &mut stream, false) {
                                        let _ = rx(Event::Error(LinkError::Io(e)));
                                        break 'ioloop;
                                    }
                                }
                                Err(SendError::MustDrain) => {
                                    // Must keep trying, do nothing
                                }
                                Err(e) => {
                                    let _ = rx(Event::Error(e.into()));
                                    break 'ioloop;
                                }
                            }
                        }

                        // Readiness is edge triggered: read until the socket runs dry.
                        loop {
                            match stream.recv() {
                                Ok(chunk) => {
                                    if rx(Event::Data(chunk)).is_err() {
                                        break 'ioloop;
                                    }
                                }
                                Err(RecvError::NotReady) => {
                                    break;
                                }
                                Err(RecvError::Disconnected) => {
                                    break 'ioloop;
                                }
                                Err(RecvError::IO(e)) => {
                                    let _ = rx(Event::Error(LinkError::Io(e)));
                                    break 'ioloop;
                                }
                            }
                        }
                    }
                    mio::Token(_) => {}
                }
            }

            if check_ctl {
                loop {
                    match ctl.try_recv() {
                        Ok(Control::Send(data)) => match stream.send(&data) {
                            Ok(()) => {}
                            Err(SendError::MustDrain) => {
                                // Before the connection is up, draining starts once
                                // it is established.
                                if established && !needs_draining {
                                    needs_draining = true;
                                    if let Err(e) = set_interest(&poll, &mut stream, true) {
                                        let _ = rx(Event::Error(LinkError::Io(e)));
                                        break 'ioloop;
                                    }
                                }
                            }
                            Err(SendError::Full) => {
                                if rx(Event::Error(LinkError::Overflow(data.len()))).is_err() {
                                    break 'ioloop;
                                }
                            }
                            Err(e) => {
                                let _ = rx(Event::Error(e.into()));
                                break 'ioloop;
                            }
                        },
                        Ok(Control::Close) | Err(TryRecvError::Disconnected) => {
                            break 'ioloop;
                        }
                        Err(TryRecvError::Empty) => {
                            break;
                        }
                    }
                }
            }
        }

        if established {
            stream.shutdown();
            let _ = rx(Event::Closed);
        }
    }

    /// Starts connecting to the scale described by `config`, reporting
    /// events to `rx`. Resolution and the connection attempt itself happen on
    /// the link thread, so this never blocks on the network; their failures
    /// arrive as `Event::Error`. The returned error covers only local setup.
    ///
    /// The RX callback is called from the link thread. If it returns an
    /// `Err()`, the link is closed.
    pub fn connect<RXT: Fn(Event) -> io::Result<()> + Send + 'static>(
        config: &ScaleConfig,
        rx: RXT,
    ) -> io::Result<Link> {
        let (tx, ctl) = channel::bounded::<Control>(32);
        let poll = mio::Poll::new()?;
        let waker = mio::Waker::new(poll.registry(), WAKER)?;
        let config = config.clone();
        thread::Builder::new()
            .name("scale-link".to_string())
            .spawn(move || Link::io_thread(config, poll, rx, ctl))?;
        Ok(Link {
            tx: Some(tx),
            waker,
        })
    }

    /// Creates a sender/receiver pair to be used with `rx_to_channel`:
    /// ```no_run
    /// # use scale_reader::{Link, ScaleConfig};
    /// # let config = ScaleConfig::default();
    /// let (rx_send, events) = Link::rx_channel();
    /// let _link = Link::connect(&config, Link::rx_to_channel(rx_send)).unwrap();
    /// for event in events.iter() {
    ///     println!("{:?}", event);
    /// }
    /// ```
    pub fn rx_channel() -> (channel::Sender<Event>, channel::Receiver<Event>) {
        Link::rx_channel_custom(DEFAULT_RX_CHANNEL_SIZE)
    }

    /// Same as `rx_channel`, but with user specified size.
    pub fn rx_channel_custom(size: usize) -> (channel::Sender<Event>, channel::Receiver<Event>) {
        channel::bounded::<Event>(size)
    }

    /// Returns a RX callback which forwards events to a channel (see
    /// `rx_channel`). Events are never dropped: when the channel is full the
    /// link thread waits for the consumer.
    pub fn rx_to_channel(rx_send: channel::Sender<Event>) -> impl Fn(Event) -> io::Result<()> {
        move |event| {
            rx_send
                .send(event)
                .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))
        }
    }

    /// Queues raw bytes to be written to the scale. Bytes sent before the
    /// connection is established go out as soon as it is.
    pub fn send(&self, data: Vec<u8>) -> Result<(), SendError> {
        let tx = self.tx.as_ref().ok_or(SendError::Disconnected)?;
        tx.send(Control::Send(data))
            .map_err(|_| SendError::Disconnected)?;
        self.waker.wake().map_err(SendError::IO)
    }

    /// Attempts to queue raw bytes without blocking.
    pub fn try_send(&self, data: Vec<u8>) -> Result<(), SendError> {
        use crossbeam::channel::TrySendError;
        let tx = self.tx.as_ref().ok_or(SendError::Disconnected)?;
        match tx.try_send(Control::Send(data)) {
            Ok(()) => self.waker.wake().map_err(SendError::IO),
            Err(TrySendError::Full(_)) => Err(SendError::Full),
            Err(TrySendError::Disconnected(_)) => Err(SendError::Disconnected),
        }
    }

    /// Requests a local close. If the connection was established, `Closed`
    /// follows once the link thread has shut the socket down.
    pub fn close(&self) {
        if let Some(tx) = self.tx.as_ref() {
            if tx.send(Control::Close).is_ok() {
                let _ = self.waker.wake();
            }
        }
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        // Disconnecting the control channel stops the thread once it wakes up.
        drop(self.tx.take());
        let _ = self.waker.wake();
    }
}

fn set_interest(poll: &mio::Poll, stream: &mut tcp::Stream, draining: bool) -> io::Result<()> {
    let interest = if draining {
        Interest::READABLE | Interest::WRITABLE
    } else {
        Interest::READABLE
    };
    poll.registry().reregister(stream, STREAM, interest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_failures_map_to_broken_pipe() {
        for err in [SendError::Full, SendError::MustDrain, SendError::Disconnected] {
            match LinkError::from(err) {
                LinkError::Io(e) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn io_send_failure_keeps_its_kind() {
        let err = SendError::IO(io::Error::from(io::ErrorKind::ConnectionReset));
        match LinkError::from(err) {
            LinkError::Io(e) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn overflow_reports_dropped_length() {
        assert_eq!(
            LinkError::Overflow(5).to_string(),
            "outgoing buffer full, dropped 5 bytes"
        );
    }
}
