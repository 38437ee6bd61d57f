//! DutyRelay configuration system.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{RelayError, Result};
use crate::types::{DeliveryConfig, TransportKind};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub oncall: OnCallConfig,
    #[serde(default)]
    pub templates: TemplateConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub schedules: Vec<ScheduleConfig>,
}

impl RelayConfig {
    /// Load config from the default path (~/.dutyrelay/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RelayError::Config(format!("Failed to read config {}: {e}", path.display())))?;
        Self::parse(&content)
    }

    /// Parse config from TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| RelayError::Config(format!("Failed to parse config: {e}")))
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the DutyRelay home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".dutyrelay")
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.dispatcher.queue_capacity == 0 {
            return Err(RelayError::config("dispatcher.queue_capacity must be > 0"));
        }
        if self.dispatcher.workers == 0 {
            return Err(RelayError::config("dispatcher.workers must be > 0"));
        }
        if self.audit.buffer_capacity == 0 {
            return Err(RelayError::config("audit.buffer_capacity must be > 0"));
        }
        if self.poller.interval_secs == 0 {
            return Err(RelayError::config("poller.interval_secs must be > 0"));
        }
        if self.poller.fetch_timeout_secs == 0 {
            return Err(RelayError::config("poller.fetch_timeout_secs must be > 0"));
        }
        if self.dispatcher.delivery_timeout_secs == 0 {
            return Err(RelayError::config("dispatcher.delivery_timeout_secs must be > 0"));
        }
        if self.identity.lookup_timeout_secs == 0 {
            return Err(RelayError::config("identity.lookup_timeout_secs must be > 0"));
        }
        if self.transport.kind == "rest" && self.transport.base_url.is_empty() {
            return Err(RelayError::config("transport.base_url is required for kind = \"rest\""));
        }

        let mut seen = HashSet::new();
        for schedule in &self.schedules {
            if schedule.name.is_empty() {
                return Err(RelayError::config("schedule name must not be empty"));
            }
            if !seen.insert(schedule.name.as_str()) {
                return Err(RelayError::Config(format!("duplicate schedule '{}'", schedule.name)));
            }
            if schedule.transport == TransportKind::Callback
                && schedule.callback_url.as_deref().is_none_or(str::is_empty)
            {
                return Err(RelayError::Config(format!(
                    "schedule '{}' uses callback transport but has no callback_url",
                    schedule.name
                )));
            }
        }
        Ok(())
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Answer rejected `/make_call` and `/send_sms` requests with `200` and
    /// the `{"error": code}` body instead of a 4xx/5xx status. Callers that
    /// only read the body (as Grafana OnCall does) see no difference.
    #[serde(default)]
    pub errors_as_ok: bool,
}

fn default_host() -> String { "127.0.0.1".into() }
fn default_port() -> u16 { 8880 }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            errors_as_ok: false,
        }
    }
}

/// Roster polling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
}

fn bool_true() -> bool { true }
fn default_poll_interval() -> u64 { 120 }
fn default_fetch_timeout() -> u64 { 10 }

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_poll_interval(),
            fetch_timeout_secs: default_fetch_timeout(),
        }
    }
}

/// Notification dispatcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_delivery_timeout")]
    pub delivery_timeout_secs: u64,
}

fn default_queue_capacity() -> usize { 1024 }
fn default_workers() -> usize { 8 }
fn default_delivery_timeout() -> u64 { 15 }

impl DispatcherConfig {
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs)
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            workers: default_workers(),
            delivery_timeout_secs: default_delivery_timeout(),
        }
    }
}

/// Audit log configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_audit_db")]
    pub db_path: String,
    #[serde(default = "default_audit_buffer")]
    pub buffer_capacity: usize,
    #[serde(default = "default_flush_grace")]
    pub flush_grace_secs: u64,
}

fn default_audit_db() -> String { "~/.dutyrelay/events.db".into() }
fn default_audit_buffer() -> usize { 10_000 }
fn default_flush_grace() -> u64 { 5 }

impl AuditConfig {
    pub fn db_path(&self) -> PathBuf {
        expand_path(&self.db_path)
    }

    pub fn flush_grace(&self) -> Duration {
        Duration::from_secs(self.flush_grace_secs)
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            db_path: default_audit_db(),
            buffer_capacity: default_audit_buffer(),
            flush_grace_secs: default_flush_grace(),
        }
    }
}

/// User directory and fallback cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_directory_db")]
    pub directory_db_path: String,
    #[serde(default = "default_lookup_timeout")]
    pub lookup_timeout_secs: u64,
    /// Maximum age of fallback cache entries; unset keeps entries forever.
    #[serde(default)]
    pub cache_max_age_secs: Option<u64>,
}

fn default_directory_db() -> String { "~/.dutyrelay/users.db".into() }
fn default_lookup_timeout() -> u64 { 5 }

impl IdentityConfig {
    pub fn directory_db_path(&self) -> PathBuf {
        expand_path(&self.directory_db_path)
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout_secs)
    }

    pub fn cache_max_age(&self) -> Option<Duration> {
        self.cache_max_age_secs.map(Duration::from_secs)
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            directory_db_path: default_directory_db(),
            lookup_timeout_secs: default_lookup_timeout(),
            cache_max_age_secs: None,
        }
    }
}

/// OnCall API (schedule source) configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OnCallConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub token: String,
}

/// Texts for duty transition notifications. `{schedule}` is replaced by the schedule name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateConfig {
    #[serde(default = "default_start_title")]
    pub start_title: String,
    #[serde(default = "default_start")]
    pub start: String,
    #[serde(default = "default_end_title")]
    pub end_title: String,
    #[serde(default = "default_end")]
    pub end: String,
}

fn default_start_title() -> String { "Duty started".into() }
fn default_start() -> String { "Duty rotation: you are now on call for {schedule}".into() }
fn default_end_title() -> String { "Duty ended".into() }
fn default_end() -> String { "Your duty on {schedule} has ended".into() }

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            start_title: default_start_title(),
            start: default_start(),
            end_title: default_end_title(),
            end: default_end(),
        }
    }
}

/// Outbound transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// "log" (text output only) or "rest".
    #[serde(default = "default_transport_kind")]
    pub kind: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub token: String,
}

fn default_transport_kind() -> String { "log".into() }

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: default_transport_kind(),
            base_url: String::new(),
            token: String::new(),
        }
    }
}

/// One tracked schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub name: String,
    /// Schedule id at the source; falls back to `name` when unset.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default = "default_schedule_transport")]
    pub transport: TransportKind,
    #[serde(default)]
    pub callback_url: Option<String>,
    /// An empty roster is reported as an error instead of being diffed.
    #[serde(default = "bool_true")]
    pub expect_members: bool,
}

fn default_schedule_transport() -> TransportKind { TransportKind::Sms }

impl ScheduleConfig {
    pub fn new(name: &str, transport: TransportKind) -> Self {
        Self {
            name: name.to_string(),
            id: None,
            transport,
            callback_url: None,
            expect_members: true,
        }
    }

    pub fn with_callback(mut self, url: &str) -> Self {
        self.transport = TransportKind::Callback;
        self.callback_url = Some(url.to_string());
        self
    }

    pub fn source_id(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.name)
    }

    pub fn delivery(&self) -> DeliveryConfig {
        DeliveryConfig {
            transport: self.transport,
            callback_url: self.callback_url.clone(),
        }
    }
}

/// Expand `~` in a configured path.
pub fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}
