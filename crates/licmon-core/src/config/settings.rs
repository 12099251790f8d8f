use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::notify::ChannelKind;

/// Environment variable overriding the data directory
pub const DATA_DIR_ENV: &str = "LICMON_DATA_DIR";

/// Shortest accepted poll interval in seconds
pub const MIN_INTERVAL_SECS: u64 = 60;

/// Poller lock used when `poller.lock_path` is unset. Fixed so that every
/// instance on the host competes for the same file whatever its environment.
pub const DEFAULT_LOCK_PATH: &str = "/tmp/licmon/poller.lock";

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Aruba license usage monitor")]
pub struct Config {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Poll interval in seconds
    #[arg(short = 'i', long, global = true)]
    pub interval: Option<u64>,

    /// Directory for snapshots, thresholds and the dispatch log
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Host-wide poller lock file
    #[arg(long, global = true)]
    pub lock_path: Option<PathBuf>,

    /// Subcommand (defaults to `run`)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Subcommands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Poll on schedule until interrupted
    Run,
    /// Run one cycle now and print the snapshot
    Fetch,
    /// Print stored snapshots, newest first
    History {
        /// Number of snapshots to show
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },
    /// Print the latest snapshot summary and thresholds
    Status,
    /// Send a test alert through one channel
    TestAlert {
        /// Entity (client hostname) named in the alert
        entity: String,
        /// Channel to use
        #[arg(long, value_enum)]
        channel: ChannelKind,
    },
}

impl Config {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// The selected subcommand, `run` when none was given
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run)
    }
}

/// Application settings (from config file)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Appliance connection
    #[serde(default)]
    pub appliance: ApplianceSettings,

    /// Scheduler settings
    #[serde(default)]
    pub poller: PollerSettings,

    /// On-disk locations
    #[serde(default)]
    pub storage: StorageSettings,

    /// Mail relay
    #[serde(default)]
    pub smtp: SmtpSettings,

    /// Syslog relay
    #[serde(default)]
    pub syslog: SyslogSettings,

    /// Alert behaviour
    #[serde(default)]
    pub notifications: NotificationSettings,
}

/// Appliance (mobility conductor) connection settings
#[derive(Clone, Serialize, Deserialize)]
pub struct ApplianceSettings {
    /// Host name or address
    #[serde(default)]
    pub host: String,

    /// REST API port
    #[serde(default = "default_appliance_port")]
    pub port: u16,

    /// Management user
    #[serde(default)]
    pub username: String,

    /// Management password
    #[serde(default)]
    pub password: String,

    /// Verify the appliance certificate
    #[serde(default)]
    pub verify_tls: bool,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Commands run each cycle; the first is required
    #[serde(default = "default_commands")]
    pub commands: Vec<String>,
}

fn default_appliance_port() -> u16 {
    4343
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_commands() -> Vec<String> {
    vec![
        "show license-usage".to_string(),
        "show license summary".to_string(),
    ]
}

impl Default for ApplianceSettings {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_appliance_port(),
            username: String::new(),
            password: String::new(),
            verify_tls: false,
            timeout_secs: default_timeout_secs(),
            commands: default_commands(),
        }
    }
}

impl std::fmt::Debug for ApplianceSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplianceSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("verify_tls", &self.verify_tls)
            .field("timeout_secs", &self.timeout_secs)
            .field("commands", &self.commands)
            .finish()
    }
}

impl ApplianceSettings {
    /// Request timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// Scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerSettings {
    /// Seconds between scheduled cycles
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Lock file shared by every instance of one deployment
    #[serde(default)]
    pub lock_path: Option<PathBuf>,

    /// Run a cycle as soon as polling starts
    #[serde(default = "default_run_on_start")]
    pub run_on_start: bool,
}

fn default_interval_secs() -> u64 {
    86_400
}

fn default_run_on_start() -> bool {
    true
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            lock_path: None,
            run_on_start: default_run_on_start(),
        }
    }
}

/// Storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Data directory (defaults to the platform data dir)
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Dispatch log size before rotation
    #[serde(default = "default_dispatch_log_max_bytes")]
    pub dispatch_log_max_bytes: u64,
}

/// Default dispatch log max size (10MB)
fn default_dispatch_log_max_bytes() -> u64 {
    10_485_760
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: None,
            dispatch_log_max_bytes: default_dispatch_log_max_bytes(),
        }
    }
}

/// Mail relay settings
#[derive(Clone, Serialize, Deserialize)]
pub struct SmtpSettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub host: String,

    /// 465 for implicit TLS, anything else uses STARTTLS
    #[serde(default = "default_smtp_port")]
    pub port: u16,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub from: String,

    #[serde(default)]
    pub to: Vec<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_smtp_port() -> u16 {
    587
}

impl Default for SmtpSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            host: String::new(),
            port: default_smtp_port(),
            username: None,
            password: None,
            from: String::new(),
            to: Vec::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl std::fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("enabled", &self.enabled)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("from", &self.from)
            .field("to", &self.to)
            .finish()
    }
}

/// Syslog relay settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyslogSettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub host: String,

    #[serde(default = "default_syslog_port")]
    pub port: u16,

    /// Socket write timeout
    #[serde(default = "default_syslog_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_syslog_port() -> u16 {
    514
}

fn default_syslog_timeout_secs() -> u64 {
    5
}

impl Default for SyslogSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            host: String::new(),
            port: default_syslog_port(),
            timeout_secs: default_syslog_timeout_secs(),
        }
    }
}

impl SyslogSettings {
    /// Write timeout, at least one second
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// Alert behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationSettings {
    /// Seconds before an unchanged alert is sent again
    #[serde(default = "default_renotify_secs")]
    pub renotify_secs: u64,

    /// Send a usage report after every successful cycle
    #[serde(default)]
    pub usage_report: bool,
}

fn default_renotify_secs() -> u64 {
    86_400
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            renotify_secs: default_renotify_secs(),
            usage_report: false,
        }
    }
}

impl Settings {
    /// Load settings from config file or use defaults.
    ///
    /// `LICMON_DATA_DIR` overrides the file's data directory.
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        let mut settings = Self::load_file(path)?;
        settings.apply_env();
        Ok(settings)
    }

    fn load_file(path: Option<&PathBuf>) -> Result<Self> {
        // Try custom path first
        if let Some(p) = path {
            if p.exists() {
                return Self::from_file(p);
            }
            bail!("Config file not found: {:?}", p);
        }

        let default_paths = [
            dirs::config_dir().map(|p| p.join("licmon/config.toml")),
            dirs::home_dir().map(|p| p.join(".config/licmon/config.toml")),
            dirs::home_dir().map(|p| p.join(".licmon.toml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                return Self::from_file(path);
            }
        }

        Ok(Self::default())
    }

    fn from_file(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Apply environment overrides
    pub fn apply_env(&mut self) {
        if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|v| !v.is_empty()) {
            self.storage.data_dir = Some(PathBuf::from(dir));
        }
    }

    /// Merge CLI config into settings (CLI takes precedence)
    pub fn merge_cli(&mut self, cli: &Config) {
        if let Some(interval) = cli.interval {
            self.poller.interval_secs = interval;
        }
        if let Some(dir) = &cli.data_dir {
            self.storage.data_dir = Some(dir.clone());
        }
        if let Some(lock_path) = &cli.lock_path {
            self.poller.lock_path = Some(lock_path.clone());
        }
    }

    /// Validate and normalize settings values
    pub fn validate(&mut self) {
        if self.poller.interval_secs < MIN_INTERVAL_SECS {
            self.poller.interval_secs = MIN_INTERVAL_SECS;
        }
        if self.appliance.commands.is_empty() {
            self.appliance.commands = default_commands();
        }
    }

    /// Fail unless enough is configured to reach the appliance
    pub fn require_appliance(&self) -> Result<()> {
        if self.appliance.host.trim().is_empty() {
            bail!("appliance.host is not set");
        }
        if self.appliance.username.is_empty() {
            bail!("appliance.username is not set");
        }
        Ok(())
    }

    /// Data directory: configured, then the platform data dir
    pub fn data_dir(&self) -> PathBuf {
        self.storage.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("licmon")
        })
    }

    /// Directory holding one JSON file per snapshot
    pub fn snapshot_dir(&self) -> PathBuf {
        self.data_dir().join("snapshots")
    }

    /// Threshold configuration file
    pub fn thresholds_path(&self) -> PathBuf {
        self.data_dir().join(crate::store::ThresholdFile::FILE_NAME)
    }

    /// Poll interval saved by the facade
    pub fn interval_path(&self) -> PathBuf {
        self.data_dir().join(crate::store::IntervalFile::FILE_NAME)
    }

    /// NDJSON dispatch log
    pub fn dispatch_log_path(&self) -> PathBuf {
        self.data_dir().join(crate::notify::DISPATCH_LOG_FILE)
    }

    /// Poller lock: configured, else [`DEFAULT_LOCK_PATH`]
    pub fn lock_path(&self) -> PathBuf {
        self.poller
            .lock_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOCK_PATH))
    }
}
