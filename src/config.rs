//! Node configuration
//!
//! Values are layered, later sources winning: built-in defaults, then a TOML
//! file, then `PROBE_NODE_*` environment variables, then `run --sid`. The
//! file is either given with `--config` or found on the search path.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

const APP_DIR: &str = "probe-node";
const FILE_NAME: &str = "node.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub node: NodeSettings,
    pub coordinator: CoordinatorSettings,
    pub probe: ProbeSettings,
    pub status: StatusSettings,
    pub logging: LoggingSettings,
}

/// Identity stamped on every outgoing message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSettings {
    /// `sid`; optional here, but `run` refuses to start without a non-zero one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid: Option<u64>,

    /// `type`
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorSettings {
    /// `ws://` or `wss://` endpoint
    pub url: String,

    /// Wait before every redial, whether the dial failed or a session ended
    pub reconnect_interval_ms: u64,

    /// Budget for TCP connect plus the WebSocket handshake
    pub connect_timeout_ms: u64,

    pub heartbeat_interval_ms: u64,
}

/// ICMP echo parameters for `ping`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    pub count: u16,
    pub payload_size: usize,

    /// How long to wait for each reply
    pub timeout_ms: u64,

    /// Pause between consecutive echoes
    pub interval_ms: u64,
}

/// Local HTTP endpoint read by `info`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusSettings {
    pub url: String,
    pub username: String,
    pub password: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// One of trace, debug, info, warn, error
    pub level: String,

    /// Rolling log file; console only when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Below 10 the file rotates hourly instead of daily
    pub max_file_size_mb: u64,

    pub max_files: u32,
    pub json_format: bool,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            sid: None,
            role: "node".into(),
        }
    }
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/ws".into(),
            reconnect_interval_ms: 5_000,
            connect_timeout_ms: 30_000,
            heartbeat_interval_ms: 30_000,
        }
    }
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            count: 3,
            payload_size: 548,
            timeout_ms: 2_000,
            interval_ms: 1_000,
        }
    }
}

impl Default for StatusSettings {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:37549/api/serverinfo".into(),
            username: "admin".into(),
            password: "SQML".into(),
            timeout_ms: 6_000,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file: None,
            max_file_size_mb: 100,
            max_files: 5,
            json_format: false,
        }
    }
}

impl CoordinatorSettings {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

impl NodeConfig {
    /// Defaults, then the file (if any), then env overrides; validated
    pub fn load(explicit: Option<&str>) -> Result<Self> {
        let mut config = match locate(explicit)? {
            Some(path) => {
                let config = Self::read(&path)?;
                info!(path = %path.display(), "Configuration loaded from file");
                config
            }
            None => {
                debug!("No configuration file found, using defaults");
                Self::default()
            }
        };

        config.apply_env(|key| std::env::var(key).ok());
        if let Some(file) = config.logging.file.take() {
            config.logging.file = Some(expand_path(&file));
        }
        config.validate()?;
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| Error::IoRead {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|e| Error::ConfigParse {
            message: format!("{}: {}", path.display(), e.message()),
            source: Some(e),
        })
    }

    /// Overlay `PROBE_NODE_*` values; unparseable numbers are ignored
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let text = |key: &str, slot: &mut String| {
            if let Some(value) = lookup(key) {
                *slot = value;
            }
        };
        text("PROBE_NODE_ROLE", &mut self.node.role);
        text("PROBE_NODE_COORDINATOR_URL", &mut self.coordinator.url);
        text("PROBE_NODE_STATUS_URL", &mut self.status.url);
        text("PROBE_NODE_STATUS_USERNAME", &mut self.status.username);
        text("PROBE_NODE_STATUS_PASSWORD", &mut self.status.password);
        text("PROBE_NODE_LOG_LEVEL", &mut self.logging.level);

        let c = &mut self.coordinator;
        set_parsed(&lookup, "PROBE_NODE_RECONNECT_INTERVAL_MS", &mut c.reconnect_interval_ms);
        set_parsed(&lookup, "PROBE_NODE_CONNECT_TIMEOUT_MS", &mut c.connect_timeout_ms);
        set_parsed(&lookup, "PROBE_NODE_HEARTBEAT_INTERVAL_MS", &mut c.heartbeat_interval_ms);
        set_parsed(&lookup, "PROBE_NODE_PROBE_COUNT", &mut self.probe.count);
        set_parsed(&lookup, "PROBE_NODE_PROBE_TIMEOUT_MS", &mut self.probe.timeout_ms);
        set_parsed(&lookup, "PROBE_NODE_STATUS_TIMEOUT_MS", &mut self.status.timeout_ms);

        if let Some(sid) = lookup("PROBE_NODE_SID").and_then(|v| v.parse().ok()) {
            self.node.sid = Some(sid);
        }
        if let Some(file) = lookup("PROBE_NODE_LOG_FILE") {
            self.logging.file = Some(file);
        }
        if let Some(json) = lookup("PROBE_NODE_LOG_JSON") {
            self.logging.json_format = json == "1" || json.eq_ignore_ascii_case("true");
        }
    }

    /// Range and scheme checks
    ///
    /// `node.sid` is left to [`NodeConfig::session_id`] so that `config show`
    /// and `config validate` work on files without one.
    pub fn validate(&self) -> Result<()> {
        let coordinator = &self.coordinator;
        let scheme_ok = |url: &str, schemes: &[&str]| schemes.iter().any(|s| url.starts_with(s));

        check(
            scheme_ok(&coordinator.url, &["ws://", "wss://"]),
            "coordinator.url",
            || format!("Coordinator URL must start with ws:// or wss://, got '{}'", coordinator.url),
        )?;
        check(coordinator.reconnect_interval_ms > 0, "coordinator.reconnect_interval_ms", || {
            "reconnect_interval_ms must be greater than 0".into()
        })?;
        check(coordinator.connect_timeout_ms > 0, "coordinator.connect_timeout_ms", || {
            "connect_timeout_ms must be greater than 0".into()
        })?;
        check(coordinator.heartbeat_interval_ms > 0, "coordinator.heartbeat_interval_ms", || {
            "heartbeat_interval_ms must be greater than 0".into()
        })?;
        check(!self.node.role.is_empty(), "node.role", || "role cannot be empty".into())?;
        check(self.probe.count > 0, "probe.count", || "probe count must be at least 1".into())?;
        check(self.probe.timeout_ms > 0, "probe.timeout_ms", || {
            "probe timeout_ms must be greater than 0".into()
        })?;
        check(self.probe.payload_size <= MAX_PAYLOAD, "probe.payload_size", || {
            format!("payload_size must not exceed {} bytes", MAX_PAYLOAD)
        })?;
        check(
            scheme_ok(&self.status.url, &["http://", "https://"]),
            "status.url",
            || format!("Status URL must start with http:// or https://, got '{}'", self.status.url),
        )?;
        check(self.status.timeout_ms > 0, "status.timeout_ms", || {
            "timeout_ms must be greater than 0".into()
        })?;
        check(
            LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()),
            "logging.level",
            || format!("Unknown log level '{}', expected one of {}", self.logging.level, LOG_LEVELS.join(", ")),
        )
    }

    /// The session id as sent on the wire; errors when unset or zero
    pub fn session_id(&self) -> Result<String> {
        match self.node.sid {
            Some(sid) if sid > 0 => Ok(sid.to_string()),
            _ => Err(Error::config_field_invalid(
                "node.sid",
                "session id must be a positive integer (e.g. --sid=7)",
            )),
        }
    }
}

const MAX_PAYLOAD: usize = 65_500;
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

fn check(ok: bool, field: &str, message: impl FnOnce() -> String) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(Error::config_field_invalid(field, message()))
    }
}

fn set_parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    if let Some(value) = lookup(key).and_then(|v| v.parse().ok()) {
        *slot = value;
    }
}

fn expand_path(path: &str) -> String {
    match shellexpand::full(path) {
        Ok(expanded) => expanded.into_owned(),
        Err(_) => path.to_string(),
    }
}

/// Places searched when `--config` is absent, most specific first
fn search_path() -> Vec<PathBuf> {
    let mut candidates = vec![PathBuf::from(format!("{}.toml", APP_DIR))];
    candidates.extend(dirs::config_dir().map(|dir| dir.join(APP_DIR).join(FILE_NAME)));
    candidates.extend(dirs::home_dir().map(|dir| dir.join(format!(".{}", APP_DIR)).join(FILE_NAME)));
    candidates.push(Path::new("/etc").join(APP_DIR).join(FILE_NAME));
    candidates
}

/// An explicit path has to exist; otherwise the first hit on the search path
fn locate(explicit: Option<&str>) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        let path = PathBuf::from(expand_path(path));
        return if path.is_file() {
            Ok(Some(path))
        } else {
            Err(Error::ConfigNotFound { path })
        };
    }

    let found = search_path().into_iter().find(|path| path.is_file());
    if let Some(path) = &found {
        debug!(path = %path.display(), "Found configuration file");
    }
    Ok(found)
}

/// Write the commented template for `config init`, returning where it went
pub fn init_config(path: Option<&str>, force: bool) -> Result<PathBuf> {
    let target = match path {
        Some(path) => PathBuf::from(expand_path(path)),
        None => dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join(FILE_NAME),
    };

    if target.exists() && !force {
        return Err(Error::config_validation(format!(
            "{} already exists; pass --force to replace it",
            target.display()
        )));
    }

    let write_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| Error::IoWrite { path, source }
    };
    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(write_err(parent))?;
    }
    fs::write(&target, TEMPLATE).map_err(write_err(&target))?;

    Ok(target)
}

const TEMPLATE: &str = r#"# probe-node

[node]
# Required before `run` will connect; usually passed as --sid instead
# sid = 7
role = "node"

[coordinator]
url = "ws://127.0.0.1:8080/ws"
# Wait before each redial, forever
reconnect_interval_ms = 5000
connect_timeout_ms = 30000
heartbeat_interval_ms = 30000

[probe]
# ICMP echoes per ping command and their size
count = 3
payload_size = 548
timeout_ms = 2000
interval_ms = 1000

[status]
# Queried with HTTP Basic auth by the info command
url = "http://127.0.0.1:37549/api/serverinfo"
username = "admin"
password = "SQML"
timeout_ms = 6000

[logging]
# trace | debug | info | warn | error
level = "info"
# file = "~/.probe-node/logs/node.log"
max_file_size_mb = 100
max_files = 5
json_format = false
"#;
