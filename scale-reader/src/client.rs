//! Scale reader client
//!
//! `Client` owns a `Link` and its event channel, and dispatches every event
//! to a `Handler` on the thread calling `run`. Handlers therefore never run
//! concurrently, and they see the link's ordering unchanged.

use crate::config::ScaleConfig;
use crate::link::{Event, Link, LinkError};
use crate::text;
use crossbeam::channel;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

/// Receives what happens on a scale connection.
pub trait Handler {
    /// The connection is up. Called once, before any reading.
    fn connected(&mut self, peer: SocketAddr);

    /// One received chunk, decoded and trimmed. Not necessarily a whole
    /// reading, and possibly empty if the chunk was only whitespace.
    fn reading(&mut self, text: &str);

    /// The connection is closed. Called at most once.
    fn closed(&mut self);

    fn error(&mut self, err: &LinkError);
}

pub struct Client {
    config: ScaleConfig,
    link: Link,
    events: channel::Receiver<Event>,
    closing: bool,
}

impl Client {
    /// Starts connecting to the scale. Connection success or failure is
    /// reported later to the handler passed to `run`.
    pub fn connect(config: ScaleConfig) -> io::Result<Client> {
        let (rx_send, events) = Link::rx_channel();
        let link = Link::connect(&config, Link::rx_to_channel(rx_send))?;
        Ok(Client {
            config,
            link,
            events,
            closing: false,
        })
    }

    pub fn config(&self) -> &ScaleConfig {
        &self.config
    }

    /// Requests a local close. The handler still gets `closed` from `run`.
    pub fn close(&mut self) {
        self.closing = true;
        self.link.close();
    }

    /// Dispatches events until the link is finished: after `closed`, or after
    /// the `error` of a failed connection attempt.
    pub fn run<H: Handler + ?Sized>(&mut self, handler: &mut H) {
        while let Ok(event) = self.events.recv() {
            self.dispatch(event, handler);
        }
    }

    /// Dispatches at most one event, waiting up to `timeout` for it. Returns
    /// `false` once the link is finished and no events remain.
    pub fn run_once<H: Handler + ?Sized>(&mut self, handler: &mut H, timeout: Duration) -> bool {
        match self.events.recv_timeout(timeout) {
            Ok(event) => {
                self.dispatch(event, handler);
                true
            }
            Err(channel::RecvTimeoutError::Timeout) => true,
            Err(channel::RecvTimeoutError::Disconnected) => false,
        }
    }

    fn dispatch<H: Handler + ?Sized>(&mut self, event: Event, handler: &mut H) {
        match event {
            Event::Connected(peer) => {
                handler.connected(peer);
                if let Some(command) = self.config.command_bytes() {
                    // Only fails if the link thread is gone, and then it has
                    // already reported why.
                    let _ = self.link.send(command);
                }
            }
            Event::Data(chunk) => {
                let text = text::decode_chunk(&chunk);
                handler.reading(&text);
                if self.config.disconnect_after_first && !self.closing && !text.is_empty() {
                    self.close();
                }
            }
            Event::Closed => handler.closed(),
            Event::Error(err) => handler.error(&err),
        }
    }
}
