//! Configuration management for blocky.
//!
//! The YAML file is read into [`Config`]. Startup checks turn it into the
//! validated [`Settings`] the engine runs with.

use serde::{Deserialize, Deserializer, Serialize};
use std::io::ErrorKind;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{BlockyError, Result};
use crate::fs_abstraction::{real_fs, FileSystem};
use crate::validation::{validate_ipv4, validate_set_name};

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/blocky/config.yaml";

/// Name of the ipset holding the whitelisted local addresses
pub const WHITELIST_SET_NAME: &str = "blocky_local_ip_whitelist";

fn default_log_facility() -> String {
    "daemon".to_string()
}

fn default_rule_pos() -> String {
    "0".to_string()
}

fn default_log_path() -> String {
    "/var/log/blocky.log".to_string()
}

/// Main configuration structure, as written in the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// iptables table (filter, nat, mangle, raw, security)
    pub table: String,

    /// Chain inside `table` receiving the two rules
    pub chain: String,

    /// Poll interval in seconds, kept as written until the startup checks
    #[serde(deserialize_with = "deserialize_scalar")]
    pub check_every: String,

    /// Domains whose addresses are blocked
    #[serde(deserialize_with = "deserialize_list")]
    pub domains: Vec<String>,

    /// Name of the blocklist ipset
    pub ipset: String,

    /// Pidfile path
    pub pidfile: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Log destination (syslog, file, console)
    pub log_type: String,

    /// Syslog facility, used with `log_type: syslog`
    #[serde(default = "default_log_facility")]
    pub log_facility: String,

    /// Log file, used with `log_type: file`
    #[serde(default = "default_log_path")]
    pub log_path: String,

    /// Insertion offset of the whitelist rule in the chain (block rule goes right after)
    #[serde(default = "default_rule_pos", deserialize_with = "deserialize_scalar")]
    pub rule_pos: String,

    /// Local addresses that are always accepted
    #[serde(default, deserialize_with = "deserialize_list")]
    pub whitelist_local_ips: Vec<String>,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load_with(real_fs(), path.as_ref())
    }

    /// Load configuration, reading files through `fs`.
    ///
    /// List values of the form `@/some/file` are replaced by the file's lines.
    pub fn load_with(fs: &dyn FileSystem, path: &Path) -> Result<Self> {
        let content = fs.read_to_string(path).map_err(|e| {
            BlockyError::ConfigMissing(format!("{}: {}", path.display(), e))
        })?;
        let mut config = Self::from_yaml(&content)?;

        config.domains = expand_file_reference(fs, &config.domains)?;
        config.whitelist_local_ips = expand_file_reference(fs, &config.whitelist_local_ips)?;

        config.validate()?;
        Ok(config)
    }

    /// Parse YAML without expanding `@file` references or validating.
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| BlockyError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate values that can be checked without looking at the system.
    ///
    /// The poll interval and rule position are checked by the startup checks,
    /// which report them with their own exit codes.
    pub fn validate(&self) -> Result<()> {
        for (key, value) in [("table", &self.table), ("chain", &self.chain)] {
            if value.trim().is_empty() || value.contains(char::is_whitespace) {
                return Err(BlockyError::Config(format!(
                    "Invalid {} setting '{}'",
                    key, value
                )));
            }
        }

        validate_set_name(&self.ipset)?;
        if self.ipset == WHITELIST_SET_NAME {
            return Err(BlockyError::Config(format!(
                "ipset name '{}' is reserved for the local whitelist",
                WHITELIST_SET_NAME
            )));
        }

        self.whitelist_addresses()?;
        Ok(())
    }

    /// Parsed whitelist entries.
    pub fn whitelist_addresses(&self) -> Result<Vec<Ipv4Addr>> {
        self.whitelist_local_ips
            .iter()
            .map(|ip| validate_ipv4(ip))
            .collect()
    }
}

/// Validated settings the engine runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub table: String,
    pub chain: String,
    pub blocklist_set: String,
    pub domains: Vec<String>,
    pub whitelist: Vec<Ipv4Addr>,
    pub poll_interval: Duration,
    /// 0-based offset of the whitelist rule in the chain
    pub rule_position: usize,
    pub pidfile: PathBuf,
}

/// Read any YAML value as text. Numbers and quoted numbers both work; the
/// startup checks decide whether the text is acceptable.
fn deserialize_scalar<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_yaml::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_yaml::Value::Null => String::new(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::String(s) => s,
        other => serde_yaml::to_string(&other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    })
}

/// Accept a YAML sequence or a comma separated string.
fn deserialize_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ListOrString {
        List(Vec<String>),
        Text(String),
    }

    let raw = match Option::<ListOrString>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(ListOrString::List(items)) => items,
        Some(ListOrString::Text(text)) => parse_comma_separated(&text),
    };
    Ok(raw
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

/// Split a comma separated value, trimming entries and dropping empty ones.
pub fn parse_comma_separated(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|x| !x.is_empty())
        .map(str::to_string)
        .collect()
}

/// Replace a single `@/path` entry with the non-comment lines of that file.
fn expand_file_reference(fs: &dyn FileSystem, values: &[String]) -> Result<Vec<String>> {
    let [single] = values else {
        return Ok(values.to_vec());
    };
    let Some(file) = single.strip_prefix('@').map(str::trim) else {
        return Ok(values.to_vec());
    };
    if file.is_empty() {
        return Err(BlockyError::Config("Empty file reference '@'".to_string()));
    }

    let path = Path::new(file);
    tracing::info!("Reading values from file {}", path.display());
    let content = fs.read_to_string(path).map_err(|e| {
        let reason = if e.kind() == ErrorKind::NotFound {
            "file not found".to_string()
        } else {
            e.to_string()
        };
        BlockyError::Config(format!("Cannot read {}: {}", path.display(), reason))
    })?;

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs_abstraction::{MockFileSystem, RealFileSystem};
    use tempfile::TempDir;

    const MINIMAL: &str = r#"
table: filter
chain: FORWARD
check_every: 60
domains: [youtube.com, www.youtube.com]
ipset: blocky_blacklist
pidfile: /run/blocky.pid
log_level: info
log_type: syslog
"#;

    fn write_config(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_minimal_config_with_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(write_config(&dir, MINIMAL)).unwrap();

        assert_eq!(config.table, "filter");
        assert_eq!(config.chain, "FORWARD");
        assert_eq!(config.check_every, "60");
        assert_eq!(config.domains, vec!["youtube.com", "www.youtube.com"]);
        assert_eq!(config.ipset, "blocky_blacklist");
        assert_eq!(config.log_facility, "daemon");
        assert_eq!(config.log_path, "/var/log/blocky.log");
        assert_eq!(config.rule_pos, "0");
        assert!(config.whitelist_local_ips.is_empty());
    }

    #[test]
    fn test_comma_separated_strings() {
        let yaml = format!(
            "{}whitelist_local_ips: \"192.168.1.10, 192.168.1.11,\"\n",
            MINIMAL.replace(
                "domains: [youtube.com, www.youtube.com]",
                "domains: \"a.example, b.example ,, c.example\""
            )
        );
        let config = Config::from_yaml(&yaml).unwrap();
        assert_eq!(config.domains, vec!["a.example", "b.example", "c.example"]);
        assert_eq!(
            config.whitelist_addresses().unwrap(),
            vec![Ipv4Addr::new(192, 168, 1, 10), Ipv4Addr::new(192, 168, 1, 11)]
        );
    }

    #[test]
    fn test_domains_from_file() {
        let dir = TempDir::new().unwrap();
        let list = dir.path().join("domains.txt");
        std::fs::write(&list, "# video\nyoutube.com\n\n  googlevideo.com  \n#end\n").unwrap();

        let yaml = MINIMAL.replace(
            "domains: [youtube.com, www.youtube.com]",
            &format!("domains: \"@{}\"", list.display()),
        );
        let config = Config::load(write_config(&dir, &yaml)).unwrap();
        assert_eq!(config.domains, vec!["youtube.com", "googlevideo.com"]);
    }

    #[test]
    fn test_file_reference_through_mock_fs() {
        let mut fs = MockFileSystem::new();
        fs.expect_read_to_string()
            .withf(|p| p == Path::new("/etc/blocky/config.yaml"))
            .returning(|_| {
                Ok(MINIMAL.replace(
                    "domains: [youtube.com, www.youtube.com]",
                    "domains: \"@/etc/blocky/domains\"",
                ))
            });
        fs.expect_read_to_string()
            .withf(|p| p == Path::new("/etc/blocky/domains"))
            .returning(|_| Ok("one.example\ntwo.example\n".to_string()));

        let config = Config::load_with(&fs, Path::new(DEFAULT_CONFIG_PATH)).unwrap();
        assert_eq!(config.domains, vec!["one.example", "two.example"]);
    }

    #[test]
    fn test_missing_referenced_file() {
        let yaml = MINIMAL.replace(
            "domains: [youtube.com, www.youtube.com]",
            "domains: \"@/nonexistent/blocky/domains\"",
        );
        let dir = TempDir::new().unwrap();
        let err = Config::load_with(&RealFileSystem, &write_config(&dir, &yaml)).unwrap_err();
        assert!(matches!(err, BlockyError::Config(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_missing_config_file() {
        let dir = TempDir::new().unwrap();
        let err = Config::load(dir.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(err, BlockyError::ConfigMissing(_)));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_missing_mandatory_field() {
        let yaml = MINIMAL.replace("ipset: blocky_blacklist\n", "");
        let err = Config::from_yaml(&yaml).unwrap_err();
        assert!(matches!(err, BlockyError::Config(_)));
        assert!(err.to_string().contains("ipset"));
    }

    #[test]
    fn test_non_integer_check_every_is_left_to_startup_checks() {
        let yaml = MINIMAL.replace("check_every: 60", "check_every: soon");
        let config = Config::from_yaml(&yaml).unwrap();
        assert_eq!(config.check_every, "soon");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_quoted_numbers() {
        let yaml = format!(
            "{}rule_pos: \"2\"\n",
            MINIMAL.replace("check_every: 60", "check_every: \"30\"")
        );
        let config = Config::from_yaml(&yaml).unwrap();
        assert_eq!(config.check_every, "30");
        assert_eq!(config.rule_pos, "2");
    }

    #[test]
    fn test_non_integer_rule_pos_is_left_to_startup_checks() {
        let yaml = format!("{}rule_pos: first\n", MINIMAL);
        let config = Config::from_yaml(&yaml).unwrap();
        assert_eq!(config.rule_pos, "first");
    }

    #[test]
    fn test_invalid_whitelist_entry() {
        let yaml = format!("{}whitelist_local_ips: [10.0.0.1, not-an-ip]\n", MINIMAL);
        let config = Config::from_yaml(&yaml).unwrap();
        assert!(matches!(config.validate(), Err(BlockyError::Config(_))));
    }

    #[test]
    fn test_reserved_set_name() {
        let yaml = MINIMAL.replace("ipset: blocky_blacklist", "ipset: blocky_local_ip_whitelist");
        let config = Config::from_yaml(&yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_chain_with_whitespace_rejected() {
        let yaml = MINIMAL.replace("chain: FORWARD", "chain: \"FOR WARD\"");
        let config = Config::from_yaml(&yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_comma_separated() {
        assert_eq!(parse_comma_separated(" a, b ,c "), vec!["a", "b", "c"]);
        assert!(parse_comma_separated("").is_empty());
        assert!(parse_comma_separated(" , ").is_empty());
    }
}
