use getopts::{Matches, Options};
use scale_reader::{AddrFamily, Handler, LinkError, ScaleConfig};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;

#[doc(hidden)]
pub use chrono;

/// Default timestamp prefix for console lines.
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%T%.3f ";

/// Prints a line to stdout prefixed with the current local time in format `tf`.
#[macro_export]
macro_rules! log {
    ($tf:expr, $msg:expr) => {{
        println!("{}{}", $crate::chrono::Local::now().format(&$tf), $msg);
    }};
    ($tf:expr, $f:expr, $($a:tt)*) => {{
        $crate::log!($tf, format!($f, $($a)*));
    }};
}

/// Same as `log!`, on stderr.
#[macro_export]
macro_rules! elog {
    ($tf:expr, $msg:expr) => {{
        eprintln!("{}{}", $crate::chrono::Local::now().format(&$tf), $msg);
    }};
    ($tf:expr, $f:expr, $($a:tt)*) => {{
        $crate::elog!($tf, format!($f, $($a)*));
    }};
}

/// Contents of a YAML configuration file. Every key is optional, command line
/// options take precedence.
///
/// ```yaml
/// host: 10.128.32.144
/// port: 9000
/// command: P
/// family: v4
/// once: false
/// timestamp_format: "%F %T "
/// ```
#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub command: Option<String>,
    pub family: Option<String>,
    pub once: Option<bool>,
    pub timestamp_format: Option<String>,
}

impl ConfigFile {
    pub fn parse(yaml: &str) -> Result<ConfigFile, String> {
        if yaml.trim().is_empty() {
            return Ok(ConfigFile::default());
        }
        serde_yaml::from_str(yaml).map_err(|e| e.to_string())
    }

    pub fn load(path: &Path) -> Result<ConfigFile, String> {
        let yaml = fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
        ConfigFile::parse(&yaml).map_err(|e| format!("invalid config {}: {}", path.display(), e))
    }

    /// Applies the keys present in this file on top of `config`.
    pub fn apply(&self, config: &mut ScaleConfig) -> Result<(), String> {
        if let Some(host) = &self.host {
            config.set_host(host).map_err(|e| e.to_string())?;
        }
        if let Some(port) = self.port {
            config.set_port(port).map_err(|e| e.to_string())?;
        }
        if let Some(command) = &self.command {
            config.command = Some(command.clone());
        }
        if let Some(family) = &self.family {
            config.family = family.parse::<AddrFamily>().map_err(|e| e.to_string())?;
        }
        if let Some(once) = self.once {
            config.disconnect_after_first = once;
        }
        Ok(())
    }
}

/// Everything needed to run a reader, after merging defaults, the config file
/// and the command line.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub config: ScaleConfig,
    pub timestamp_format: String,
}

pub fn reader_opts() -> Options {
    let mut opts = Options::new();
    opts.optopt("f", "config", "YAML configuration file", "path");
    opts.optopt(
        "c",
        "command",
        "Command sent once after connecting, terminated by CR (default: none)",
        "cmd",
    );
    opts.optopt("t", "", "Timestamp format (default '%T%.3f ')", "fmt");
    opts.optflag("4", "", "Connect over IPv4 only");
    opts.optflag("6", "", "Connect over IPv6 only");
    opts.optflag("", "once", "Disconnect after the first reading");
    opts.optflag("h", "help", "Print this help");
    opts
}

pub fn reader_usage(opts: &Options, program: &str) -> String {
    let brief = format!(
        "Usage: {} [-f config] [-c cmd] [-t fmt] [-4|-6] [--once] [host[:port]]",
        program
    );
    opts.usage(&brief)
}

/// Builds the reader settings from parsed options. The free argument, if any,
/// is the scale address as `host[:port]`.
pub fn reader_settings(matches: &Matches) -> Result<Settings, String> {
    let file = match matches.opt_str("f") {
        Some(path) => ConfigFile::load(Path::new(&path))?,
        None => ConfigFile::default(),
    };

    let mut config = ScaleConfig::default();
    file.apply(&mut config)?;

    match matches.free.len() {
        0 => {}
        1 => config
            .set_target(&matches.free[0])
            .map_err(|e| e.to_string())?,
        _ => return Err("only a single scale is supported".to_string()),
    }

    if let Some(command) = matches.opt_str("c") {
        config.command = Some(command);
    }

    match (matches.opt_present("4"), matches.opt_present("6")) {
        (true, true) => return Err("-4 and -6 are mutually exclusive".to_string()),
        (true, false) => config.family = AddrFamily::V4,
        (false, true) => config.family = AddrFamily::V6,
        (false, false) => {}
    }

    if matches.opt_present("once") {
        config.disconnect_after_first = true;
    }

    let timestamp_format = matches
        .opt_str("t")
        .or(file.timestamp_format)
        .unwrap_or_else(|| DEFAULT_TIMESTAMP_FORMAT.to_string());

    Ok(Settings {
        config,
        timestamp_format,
    })
}

/// Handler printing every event as a timestamped console line.
pub struct ConsoleHandler {
    tf: String,
}

impl ConsoleHandler {
    pub fn new(tf: &str) -> ConsoleHandler {
        ConsoleHandler { tf: tf.to_string() }
    }
}

impl Handler for ConsoleHandler {
    fn connected(&mut self, peer: SocketAddr) {
        log!(self.tf, "Connected to scale at {}", peer);
    }

    fn reading(&mut self, text: &str) {
        log!(self.tf, text);
    }

    fn closed(&mut self) {
        log!(self.tf, "Connection closed");
    }

    fn error(&mut self, err: &LinkError) {
        elog!(self.tf, "Connection error: {}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scale_reader::config::{DEFAULT_HOST, DEFAULT_PORT};

    fn settings(args: &[&str]) -> Result<Settings, String> {
        let matches = reader_opts()
            .parse(args)
            .map_err(|e| e.to_string())?;
        reader_settings(&matches)
    }

    #[test]
    fn defaults_without_arguments() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.config.host(), DEFAULT_HOST);
        assert_eq!(s.config.port(), DEFAULT_PORT);
        assert_eq!(s.config.command, None);
        assert_eq!(s.timestamp_format, DEFAULT_TIMESTAMP_FORMAT);
    }

    #[test]
    fn command_line_target_and_flags() {
        let s = settings(&["-c", "P", "-4", "--once", "-t", "%F ", "10.128.32.144:9001"]).unwrap();
        assert_eq!(s.config.host(), "10.128.32.144");
        assert_eq!(s.config.port(), 9001);
        assert_eq!(s.config.command_bytes(), Some(b"P\r".to_vec()));
        assert_eq!(s.config.family, AddrFamily::V4);
        assert!(s.config.disconnect_after_first);
        assert_eq!(s.timestamp_format, "%F ");
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(settings(&["10.0.0.1:0"]).is_err());
        assert!(settings(&["a", "b"]).is_err());
        assert!(settings(&["-4", "-6"]).is_err());
        assert!(settings(&["-f", "/nonexistent/scale.yaml"]).is_err());
    }

    #[test]
    fn parses_config_file() {
        let file = ConfigFile::parse(
            "host: scale-01.local\nport: 4001\ncommand: SI\nfamily: v6\nonce: true\n",
        )
        .unwrap();
        let mut config = ScaleConfig::default();
        file.apply(&mut config).unwrap();
        assert_eq!(config.host(), "scale-01.local");
        assert_eq!(config.port(), 4001);
        assert_eq!(config.command.as_deref(), Some("SI"));
        assert_eq!(config.family, AddrFamily::V6);
        assert!(config.disconnect_after_first);

        assert_eq!(ConfigFile::parse("").unwrap(), ConfigFile::default());
        assert!(ConfigFile::parse("hots: typo\n").is_err());

        let bad_port = ConfigFile::parse("port: 0\n").unwrap();
        assert!(bad_port.apply(&mut ScaleConfig::default()).is_err());
    }

    #[test]
    fn command_line_overrides_config_file() {
        let path = std::env::temp_dir().join(format!("scale-reader-{}.yaml", std::process::id()));
        fs::write(&path, "host: 10.0.0.5\nport: 4001\ntimestamp_format: \"%T \"\n").unwrap();
        let path_str = path.to_str().unwrap().to_string();

        let s = settings(&["-f", &path_str]).unwrap();
        assert_eq!((s.config.host(), s.config.port()), ("10.0.0.5", 4001));
        assert_eq!(s.timestamp_format, "%T ");

        // A target without a port keeps the port from the file.
        let s = settings(&["-f", &path_str, "10.0.0.6"]).unwrap();
        assert_eq!((s.config.host(), s.config.port()), ("10.0.0.6", 4001));

        fs::remove_file(&path).unwrap();
    }
}
