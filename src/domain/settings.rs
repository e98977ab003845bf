use crate::infrastructure::bluetooth::protocol;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

/// How the queue learns that the lamp handled a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum AckMode {
    /// Subscribe around each write and wait for the status notification
    Notify {
        #[serde(default = "default_ack_timeout_ms")]
        timeout_ms: u64,
    },
    /// No notifications; a successful write counts and the next frame waits
    FixedDelay {
        #[serde(default = "default_command_delay_ms")]
        delay_ms: u64,
    },
}

impl AckMode {
    /// Longest a single frame holds the link after its write
    pub fn frame_wait(&self) -> Duration {
        match *self {
            Self::Notify { timeout_ms } => Duration::from_millis(timeout_ms),
            Self::FixedDelay { delay_ms } => Duration::from_millis(delay_ms),
        }
    }
}

impl Default for AckMode {
    fn default() -> Self {
        Self::Notify {
            timeout_ms: default_ack_timeout_ms(),
        }
    }
}

/// When the light state follows a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatePolicy {
    /// At submit, before the lamp saw the frame
    Optimistic,
    /// When the lamp acknowledged the frame
    #[default]
    Confirmed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LampSettings {
    #[serde(default = "default_service_uuid")]
    pub service_uuid: String,
    #[serde(default = "default_command_uuid")]
    pub command_char_uuid: String,
    /// The lamp drops idle links on its own after ~8 s
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default)]
    pub ack: AckMode,
    #[serde(default)]
    pub state_policy: StatePolicy,
}

impl Default for LampSettings {
    fn default() -> Self {
        Self {
            service_uuid: default_service_uuid(),
            command_char_uuid: default_command_uuid(),
            idle_timeout_ms: default_idle_timeout_ms(),
            retry_backoff_ms: default_retry_backoff_ms(),
            max_retries: default_max_retries(),
            settle_delay_ms: default_settle_delay_ms(),
            ack: AckMode::default(),
            state_policy: StatePolicy::default(),
        }
    }
}

impl LampSettings {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudSettings {
    #[serde(default = "default_cloud_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_token: String,
    #[serde(default = "default_cloud_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for CloudSettings {
    fn default() -> Self {
        Self {
            base_url: default_cloud_base_url(),
            api_token: String::new(),
            timeout_ms: default_cloud_timeout_ms(),
        }
    }
}

impl CloudSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub lamp: LampSettings,
    #[serde(default)]
    pub cloud: CloudSettings,
    #[serde(default)]
    pub known_lamps: Vec<String>,

    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "smart_lamp".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}
fn default_service_uuid() -> String {
    protocol::SERVICE_UUID.hyphenated().to_string()
}
fn default_command_uuid() -> String {
    protocol::COMMAND_CHAR_UUID.hyphenated().to_string()
}
fn default_idle_timeout_ms() -> u64 {
    4000
}
fn default_retry_backoff_ms() -> u64 {
    500
}
fn default_max_retries() -> u32 {
    4
}
fn default_settle_delay_ms() -> u64 {
    500
}
fn default_ack_timeout_ms() -> u64 {
    1000
}
fn default_command_delay_ms() -> u64 {
    250
}
fn default_cloud_base_url() -> String {
    "https://cloud.luke-roberts.com/api/v1".to_string()
}
fn default_cloud_timeout_ms() -> u64 {
    2500
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::from_path(settings_path))
    }

    /// Load from `path`, falling back to defaults when it is missing or unreadable
    pub fn from_path(settings_path: PathBuf) -> Self {
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::debug!("Using default settings ({}): {}", settings_path.display(), e);
                Settings::default()
            }
        };

        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("smart-lamp-link");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn add_known_lamp(&mut self, id: &str) -> anyhow::Result<()> {
        if !self.settings.known_lamps.iter().any(|known| known == id) {
            self.settings.known_lamps.push(id.to_string());
            self.save()?;
        }
        Ok(())
    }
}
