pub mod client;
pub mod config;
pub mod link;
pub mod text;

pub use client::{Client, Handler};
pub use config::{AddrFamily, ConfigError, ScaleConfig};
pub use link::{Event, Link, LinkError, SendError};
