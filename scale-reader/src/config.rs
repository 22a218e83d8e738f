//! Scale configuration
//!
//! `ScaleConfig` describes which scale to connect to and how to talk to it
//! once connected. It is validated when constructed, so a `Client` never
//! sees an empty host or a zero port.

use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::str::FromStr;
use thiserror::Error;

/// Host used when none is given.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// TCP port the scale firmware listens on by default.
pub const DEFAULT_PORT: u16 = 9000;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid host '{0}'")]
    InvalidHost(String),

    #[error("invalid port '{0}' (must be 1-65535)")]
    InvalidPort(String),

    #[error("invalid address family '{0}' (expected v4, v6 or either)")]
    InvalidFamily(String),
}

/// In special cases where the default that gets picked when resolving an address
/// does not work, this allows to force using either IPv4 or IPv6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddrFamily {
    V4,
    V6,
    #[default]
    Either,
}

impl FromStr for AddrFamily {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<AddrFamily, ConfigError> {
        match s.to_ascii_lowercase().as_str() {
            "v4" | "ipv4" | "4" => Ok(AddrFamily::V4),
            "v6" | "ipv6" | "6" => Ok(AddrFamily::V6),
            "either" | "any" => Ok(AddrFamily::Either),
            _ => Err(ConfigError::InvalidFamily(s.to_string())),
        }
    }
}

impl fmt::Display for AddrFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddrFamily::V4 => write!(f, "IPv4"),
            AddrFamily::V6 => write!(f, "IPv6"),
            AddrFamily::Either => write!(f, "IP"),
        }
    }
}

/// Connection parameters for a single scale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaleConfig {
    host: String,
    port: u16,
    /// Command written once right after connecting, followed by a carriage
    /// return. Scales already in continuous mode need none.
    pub command: Option<String>,
    /// Address family restriction applied during resolution.
    pub family: AddrFamily,
    /// Close the connection after the first non-empty reading.
    pub disconnect_after_first: bool,
}

impl Default for ScaleConfig {
    fn default() -> ScaleConfig {
        ScaleConfig {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            command: None,
            family: AddrFamily::Either,
            disconnect_after_first: false,
        }
    }
}

impl ScaleConfig {
    /// Returns a config for `host:port` with everything else defaulted.
    pub fn new(host: &str, port: u16) -> Result<ScaleConfig, ConfigError> {
        let mut config = ScaleConfig::default();
        config.set_host(host)?;
        config.set_port(port)?;
        Ok(config)
    }

    /// Parses a target of the form `host`, `host:port`, `[v6addr]:port` or a bare
    /// IPv6 address. A missing port falls back to `DEFAULT_PORT`.
    pub fn from_target(target: &str) -> Result<ScaleConfig, ConfigError> {
        let (host, port) = split_target(target)?;
        ScaleConfig::new(host, port.unwrap_or(DEFAULT_PORT))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn set_host(&mut self, host: &str) -> Result<(), ConfigError> {
        if !valid_host(host) {
            return Err(ConfigError::InvalidHost(host.to_string()));
        }
        self.host = host.to_string();
        Ok(())
    }

    pub fn set_port(&mut self, port: u16) -> Result<(), ConfigError> {
        if port == 0 {
            return Err(ConfigError::InvalidPort(port.to_string()));
        }
        self.port = port;
        Ok(())
    }

    /// Applies a `host[:port]` target on top of this config, keeping the
    /// current port if the target has none.
    pub fn set_target(&mut self, target: &str) -> Result<(), ConfigError> {
        let (host, port) = split_target(target)?;
        self.set_host(host)?;
        if let Some(port) = port {
            self.set_port(port)?;
        }
        Ok(())
    }

    /// Bytes of the activation command as they go on the wire, if any.
    pub fn command_bytes(&self) -> Option<Vec<u8>> {
        self.command.as_ref().map(|cmd| {
            let mut raw = Vec::with_capacity(cmd.len() + 1);
            raw.extend_from_slice(cmd.as_bytes());
            raw.push(b'\r');
            raw
        })
    }

    /// Resolves the configured host to a single socket address, honoring the
    /// address family restriction.
    pub fn resolve(&self) -> io::Result<SocketAddr> {
        let iter = (self.host.as_str(), self.port).to_socket_addrs()?;
        for sa in iter {
            match sa {
                SocketAddr::V4(_) => {
                    if let AddrFamily::V6 = self.family {
                        continue;
                    }
                }
                SocketAddr::V6(_) => {
                    if let AddrFamily::V4 = self.family {
                        continue;
                    }
                }
            }
            return Ok(sa);
        }
        Err(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("no {} address found for {}", self.family, self.host),
        ))
    }
}

impl fmt::Display for ScaleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

fn parse_port(port: &str) -> Result<u16, ConfigError> {
    match port.parse::<u16>() {
        Ok(p) if p != 0 => Ok(p),
        _ => Err(ConfigError::InvalidPort(port.to_string())),
    }
}

fn split_target(target: &str) -> Result<(&str, Option<u16>), ConfigError> {
    let target = target.trim();
    if let Some(rest) = target.strip_prefix('[') {
        // [v6addr] or [v6addr]:port
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| ConfigError::InvalidHost(target.to_string()))?;
        return match tail {
            "" => Ok((host, None)),
            _ => match tail.strip_prefix(':') {
                Some(port) => Ok((host, Some(parse_port(port)?))),
                None => Err(ConfigError::InvalidHost(target.to_string())),
            },
        };
    }
    if target.parse::<IpAddr>().is_ok() {
        // Covers bare IPv6 addresses, which contain colons of their own.
        return Ok((target, None));
    }
    match target.rsplit_once(':') {
        Some((host, port)) => Ok((host, Some(parse_port(port)?))),
        None => Ok((target, None)),
    }
}

/// Accepts IP literals and RFC 1123 host names.
fn valid_host(host: &str) -> bool {
    if host.parse::<IpAddr>().is_ok() {
        return true;
    }
    let name = host.strip_suffix('.').unwrap_or(host);
    if name.is_empty() || name.len() > 253 {
        return false;
    }
    name.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_local_scale() {
        let config = ScaleConfig::default();
        assert_eq!(config.host(), DEFAULT_HOST);
        assert_eq!(config.port(), DEFAULT_PORT);
        assert!(config.command.is_none());
        assert!(!config.disconnect_after_first);
    }

    #[test]
    fn rejects_port_zero() {
        assert!(matches!(
            ScaleConfig::new("10.0.0.1", 0),
            Err(ConfigError::InvalidPort(_))
        ));
        assert!(matches!(
            ScaleConfig::from_target("10.0.0.1:0"),
            Err(ConfigError::InvalidPort(_))
        ));
        assert!(matches!(
            ScaleConfig::from_target("10.0.0.1:70000"),
            Err(ConfigError::InvalidPort(_))
        ));
    }

    #[test]
    fn rejects_malformed_hosts() {
        for host in ["", "has space", "-lead.example", "trail-.example", "a..b", "bad_char"] {
            assert!(
                matches!(ScaleConfig::new(host, 9000), Err(ConfigError::InvalidHost(_))),
                "{:?} should be rejected",
                host
            );
        }
    }

    #[test]
    fn accepts_ip_literals_and_names() {
        for host in ["10.128.32.144", "::1", "scale-01.plant.local", "localhost"] {
            assert!(ScaleConfig::new(host, 9000).is_ok(), "{:?} should be accepted", host);
        }
    }

    #[test]
    fn parses_targets() {
        let c = ScaleConfig::from_target("10.128.32.144:9001").unwrap();
        assert_eq!((c.host(), c.port()), ("10.128.32.144", 9001));

        let c = ScaleConfig::from_target("scale.local").unwrap();
        assert_eq!((c.host(), c.port()), ("scale.local", DEFAULT_PORT));

        let c = ScaleConfig::from_target("[fe80::1]:4001").unwrap();
        assert_eq!((c.host(), c.port()), ("fe80::1", 4001));

        let c = ScaleConfig::from_target("fe80::1").unwrap();
        assert_eq!((c.host(), c.port()), ("fe80::1", DEFAULT_PORT));
        assert_eq!(c.to_string(), "[fe80::1]:9000");
    }

    #[test]
    fn set_target_keeps_port_when_missing() {
        let mut c = ScaleConfig::new("10.0.0.1", 4001).unwrap();
        c.set_target("10.0.0.2").unwrap();
        assert_eq!((c.host(), c.port()), ("10.0.0.2", 4001));
        c.set_target("10.0.0.3:4002").unwrap();
        assert_eq!((c.host(), c.port()), ("10.0.0.3", 4002));
    }

    #[test]
    fn command_is_terminated_with_cr() {
        let mut c = ScaleConfig::default();
        assert_eq!(c.command_bytes(), None);
        c.command = Some("P".to_string());
        assert_eq!(c.command_bytes(), Some(b"P\r".to_vec()));
    }

    #[test]
    fn resolve_honors_family() {
        let mut c = ScaleConfig::new("127.0.0.1", 9000).unwrap();
        assert!(c.resolve().unwrap().is_ipv4());
        c.family = AddrFamily::V6;
        assert!(c.resolve().is_err());
    }

    #[test]
    fn parses_family() {
        assert_eq!("v4".parse::<AddrFamily>().unwrap(), AddrFamily::V4);
        assert_eq!("IPv6".parse::<AddrFamily>().unwrap(), AddrFamily::V6);
        assert_eq!("either".parse::<AddrFamily>().unwrap(), AddrFamily::Either);
        assert!("v5".parse::<AddrFamily>().is_err());
    }
}
