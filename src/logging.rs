//! Log sink selection.
//!
//! Components log through `tracing` macros. The binary decides once, from the
//! configuration, where those events end up: the console, a file, or syslog.

use std::io::{self, Write};
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{Level, Metadata};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::FmtSubscriber;

use crate::config::Config;
use crate::error::BlockyError;

/// Where the syslog daemon listens
const SYSLOG_SOCKET: &str = "/dev/log";

/// Tag prepended to syslog messages
const SYSLOG_IDENT: &str = "blocky";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogType {
    Syslog,
    File,
    Console,
}

impl FromStr for LogType {
    type Err = BlockyError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "syslog" => Ok(LogType::Syslog),
            "file" => Ok(LogType::File),
            "console" | "stderr" => Ok(LogType::Console),
            _ => Err(BlockyError::InvalidLogType(s.to_string())),
        }
    }
}

/// Parse a level name. Accepts the usual aliases (`warning`, `critical`).
pub fn parse_level(s: &str) -> std::result::Result<Level, BlockyError> {
    match s.trim().to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" | "critical" | "fatal" => Ok(Level::ERROR),
        _ => Err(BlockyError::InvalidLogLevel(s.to_string())),
    }
}

/// Syslog facilities (RFC 3164 numbering).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facility {
    Kern = 0,
    User = 1,
    Mail = 2,
    Daemon = 3,
    Auth = 4,
    Syslog = 5,
    Lpr = 6,
    News = 7,
    Uucp = 8,
    Cron = 9,
    Authpriv = 10,
    Ftp = 11,
    Local0 = 16,
    Local1 = 17,
    Local2 = 18,
    Local3 = 19,
    Local4 = 20,
    Local5 = 21,
    Local6 = 22,
    Local7 = 23,
}

impl FromStr for Facility {
    type Err = BlockyError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let name = s.trim().to_lowercase();
        let name = name.strip_prefix("log_").unwrap_or(&name);
        Ok(match name {
            "kern" => Facility::Kern,
            "user" => Facility::User,
            "mail" => Facility::Mail,
            "daemon" => Facility::Daemon,
            "auth" | "security" => Facility::Auth,
            "syslog" => Facility::Syslog,
            "lpr" => Facility::Lpr,
            "news" => Facility::News,
            "uucp" => Facility::Uucp,
            "cron" => Facility::Cron,
            "authpriv" => Facility::Authpriv,
            "ftp" => Facility::Ftp,
            "local0" => Facility::Local0,
            "local1" => Facility::Local1,
            "local2" => Facility::Local2,
            "local3" => Facility::Local3,
            "local4" => Facility::Local4,
            "local5" => Facility::Local5,
            "local6" => Facility::Local6,
            "local7" => Facility::Local7,
            _ => return Err(BlockyError::InvalidLogFacility(s.to_string())),
        })
    }
}

/// Validated logging settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub level: Level,
    pub kind: LogType,
    pub facility: Facility,
    pub path: PathBuf,
}

impl LogConfig {
    pub fn from_config(config: &Config) -> std::result::Result<Self, BlockyError> {
        let level = parse_level(&config.log_level)?;
        let kind: LogType = config.log_type.parse()?;
        let facility: Facility = config.log_facility.parse()?;

        let path = config.log_path.trim();
        if kind == LogType::File && path.is_empty() {
            return Err(BlockyError::LogPathUnset(config.log_path.clone()));
        }

        Ok(Self {
            level,
            kind,
            facility,
            path: PathBuf::from(path),
        })
    }
}

/// Install the global subscriber for `config`.
pub fn init(config: &LogConfig) -> Result<()> {
    let builder = FmtSubscriber::builder()
        .with_max_level(config.level)
        .with_target(false)
        .with_thread_ids(false);

    match config.kind {
        LogType::Console => {
            let subscriber = builder.with_writer(io::stderr).finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogType::File => {
            let appender = file_appender(&config.path)?;
            let subscriber = builder.with_ansi(false).with_writer(appender).finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogType::Syslog => {
            let writer = SyslogMakeWriter::connect(config.facility)?;
            let subscriber = builder
                .with_ansi(false)
                .without_time()
                .with_level(false)
                .with_writer(writer)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}

fn file_appender(path: &Path) -> Result<RollingFileAppender> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let file_name = path
        .file_name()
        .with_context(|| format!("log_path {} has no file name", path.display()))?;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name.to_string_lossy())
        .build(dir)
        .with_context(|| format!("Failed to open log file {}", path.display()))
}

/// Syslog severity for a tracing level.
fn severity(level: &Level) -> u8 {
    match *level {
        Level::ERROR => 3,
        Level::WARN => 4,
        Level::INFO => 6,
        Level::DEBUG | Level::TRACE => 7,
    }
}

/// Sends one RFC 3164 datagram per event to the local syslog socket.
#[derive(Clone)]
pub struct SyslogMakeWriter {
    socket: Arc<UnixDatagram>,
    path: Arc<PathBuf>,
    facility: Facility,
    pid: u32,
}

impl SyslogMakeWriter {
    pub fn connect(facility: Facility) -> Result<Self> {
        Self::connect_to(Path::new(SYSLOG_SOCKET), facility)
    }

    pub fn connect_to(socket_path: &Path, facility: Facility) -> Result<Self> {
        let socket = UnixDatagram::unbound().context("Failed to create syslog socket")?;
        socket
            .connect(socket_path)
            .with_context(|| format!("Failed to connect to syslog at {}", socket_path.display()))?;
        Ok(Self {
            socket: Arc::new(socket),
            path: Arc::new(socket_path.to_path_buf()),
            facility,
            pid: std::process::id(),
        })
    }

    fn writer(&self, level: &Level) -> SyslogWriter {
        let priority = (self.facility as u8) * 8 + severity(level);
        SyslogWriter {
            socket: Arc::clone(&self.socket),
            path: Arc::clone(&self.path),
            header: format!("<{}>{}[{}]: ", priority, SYSLOG_IDENT, self.pid),
            buf: Vec::new(),
        }
    }
}

impl<'a> MakeWriter<'a> for SyslogMakeWriter {
    type Writer = SyslogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.writer(&Level::INFO)
    }

    fn make_writer_for(&'a self, meta: &Metadata<'_>) -> Self::Writer {
        self.writer(meta.level())
    }
}

/// Buffers one formatted event; the datagram is sent on drop.
pub struct SyslogWriter {
    socket: Arc<UnixDatagram>,
    path: Arc<PathBuf>,
    header: String,
    buf: Vec<u8>,
}

impl SyslogWriter {
    fn message(&self) -> Vec<u8> {
        let body = String::from_utf8_lossy(&self.buf);
        format!("{}{}", self.header, body.trim_end()).into_bytes()
    }
}

impl Write for SyslogWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for SyslogWriter {
    fn drop(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        let message = self.message();
        if self.socket.send(&message).is_ok() {
            return;
        }
        // The syslog daemon may have been restarted with a new socket
        if self.socket.connect(self.path.as_path()).is_ok() {
            // Nowhere left to report a failing log sink
            let _ = self.socket.send(&message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_with(log_type: &str, level: &str, facility: &str, path: &str) -> Config {
        let yaml = format!(
            "table: filter\nchain: FORWARD\ncheck_every: 5\ndomains: [a.example]\nipset: blk\n\
             pidfile: /run/blocky.pid\nlog_level: {}\nlog_type: {}\nlog_facility: {}\nlog_path: \"{}\"\n",
            level, log_type, facility, path
        );
        Config::from_yaml(&yaml).unwrap()
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("INFO").unwrap(), Level::INFO);
        assert_eq!(parse_level(" warning ").unwrap(), Level::WARN);
        assert_eq!(parse_level("critical").unwrap(), Level::ERROR);
        assert!(matches!(parse_level("loud"), Err(BlockyError::InvalidLogLevel(_))));
    }

    #[test]
    fn test_parse_log_type() {
        assert_eq!("Syslog".parse::<LogType>().unwrap(), LogType::Syslog);
        assert_eq!("file".parse::<LogType>().unwrap(), LogType::File);
        assert_eq!("console".parse::<LogType>().unwrap(), LogType::Console);
        assert!(matches!("journal".parse::<LogType>(), Err(BlockyError::InvalidLogType(_))));
    }

    #[test]
    fn test_parse_facility() {
        assert_eq!("daemon".parse::<Facility>().unwrap(), Facility::Daemon);
        assert_eq!("LOG_LOCAL3".parse::<Facility>().unwrap(), Facility::Local3);
        assert!(matches!("local9".parse::<Facility>(), Err(BlockyError::InvalidLogFacility(_))));
    }

    #[test]
    fn test_log_config_file_requires_path() {
        let config = config_with("file", "info", "daemon", "  ");
        let err = LogConfig::from_config(&config).unwrap_err();
        assert!(matches!(err, BlockyError::LogPathUnset(_)));
        assert_eq!(err.exit_code(), 10);
    }

    #[test]
    fn test_log_config_syslog() {
        let config = config_with("syslog", "debug", "local0", "");
        let log = LogConfig::from_config(&config).unwrap();
        assert_eq!(log.kind, LogType::Syslog);
        assert_eq!(log.level, Level::DEBUG);
        assert_eq!(log.facility, Facility::Local0);
    }

    #[test]
    fn test_log_config_errors_in_order() {
        let config = config_with("nowhere", "noisy", "daemon", "/tmp/x");
        // The level is checked first
        assert!(matches!(
            LogConfig::from_config(&config),
            Err(BlockyError::InvalidLogLevel(_))
        ));
    }

    #[test]
    fn test_severity_mapping() {
        assert_eq!(severity(&Level::ERROR), 3);
        assert_eq!(severity(&Level::WARN), 4);
        assert_eq!(severity(&Level::INFO), 6);
        assert_eq!(severity(&Level::TRACE), 7);
    }

    #[test]
    fn test_syslog_writer_sends_one_datagram_per_event() {
        let dir = TempDir::new().unwrap();
        let socket_path = dir.path().join("log.sock");
        let server = UnixDatagram::bind(&socket_path).unwrap();

        let make = SyslogMakeWriter::connect_to(&socket_path, Facility::Daemon).unwrap();
        {
            let mut writer = make.writer(&Level::WARN);
            writer.write_all(b"Updating ipset ").unwrap();
            writer.write_all(b"blocky\n").unwrap();
        }

        let mut buf = [0u8; 256];
        let n = server.recv(&mut buf).unwrap();
        let received = String::from_utf8_lossy(&buf[..n]);
        // daemon (3) * 8 + warning (4)
        assert_eq!(
            received,
            format!("<28>blocky[{}]: Updating ipset blocky", std::process::id())
        );
    }

    #[test]
    fn test_syslog_writer_reconnects_after_daemon_restart() {
        let dir = TempDir::new().unwrap();
        let socket_path = dir.path().join("log.sock");
        let first = UnixDatagram::bind(&socket_path).unwrap();
        let make = SyslogMakeWriter::connect_to(&socket_path, Facility::Local0).unwrap();

        drop(first);
        std::fs::remove_file(&socket_path).unwrap();
        let restarted = UnixDatagram::bind(&socket_path).unwrap();

        {
            let mut writer = make.writer(&Level::INFO);
            writer.write_all(b"still here\n").unwrap();
        }

        restarted
            .set_read_timeout(Some(std::time::Duration::from_secs(2)))
            .unwrap();
        let mut buf = [0u8; 256];
        let n = restarted.recv(&mut buf).unwrap();
        let received = String::from_utf8_lossy(&buf[..n]);
        // local0 (16) * 8 + info (6)
        assert!(received.starts_with("<134>blocky["), "{}", received);
        assert!(received.ends_with("still here"));
    }

    #[test]
    fn test_file_appender_creates_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs").join("blocky.log");
        let mut appender = file_appender(&path).unwrap();
        appender.write_all(b"hello\n").unwrap();
        appender.flush().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello\n");
    }
}
