//! Configuration file management.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strata_sync::reader::{last_id_count, next_id_count, CountTransform, ReadMode};

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Node endpoint and the watched collection.
    #[serde(default)]
    pub node: NodeConfig,
    /// Remote profile store.
    #[serde(default)]
    pub profile: ProfileConfig,
    /// Transaction history.
    #[serde(default)]
    pub ledger: LedgerSettings,
    /// Collection refresh timer.
    #[serde(default)]
    pub refresh: RefreshConfig,
    /// Storage settings.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Advanced settings.
    #[serde(default)]
    pub advanced: AdvancedConfig,
}

/// How the collection's count accessor should be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountSemantics {
    /// The accessor returns the next id to assign.
    NextId,
    /// The accessor returns the last assigned id.
    LastId,
}

impl CountSemantics {
    pub fn transform(self) -> CountTransform {
        match self {
            CountSemantics::NextId => std::sync::Arc::new(next_id_count),
            CountSemantics::LastId => std::sync::Arc::new(last_id_count),
        }
    }
}

/// Item read strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadModeSetting {
    Sequential,
    Batched,
}

impl From<ReadModeSetting> for ReadMode {
    fn from(setting: ReadModeSetting) -> Self {
        match setting {
            ReadModeSetting::Sequential => ReadMode::Sequential,
            ReadModeSetting::Batched => ReadMode::Batched,
        }
    }
}

/// Node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// JSON-RPC gateway URL.
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Course marketplace contract. Empty = no collection is watched.
    #[serde(default)]
    pub collection_address: String,
    #[serde(default = "default_count_function")]
    pub count_function: String,
    #[serde(default = "default_item_function")]
    pub item_function: String,
    #[serde(default = "default_start_index")]
    pub start_index: u64,
    /// The marketplace's `nextCourseId` actually reports the last id.
    #[serde(default = "default_count_semantics")]
    pub count_semantics: CountSemantics,
    #[serde(default = "default_read_mode")]
    pub read_mode: ReadModeSetting,
    #[serde(default = "default_true")]
    pub skip_failure: bool,
    /// ERC-20 token whose `balanceOf(account)` is tracked. Empty = off.
    #[serde(default)]
    pub balance_token_address: String,
    #[serde(default = "default_token_decimals")]
    pub token_decimals: u32,
    /// Confirmations awaited per submitted transaction.
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
}

/// Remote profile store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    #[serde(default = "default_profile_url")]
    pub base_url: String,
    #[serde(default = "default_profile_prefix")]
    pub key_prefix: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Transaction history configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSettings {
    #[serde(default = "default_ledger_prefix")]
    pub key_prefix: String,
    /// Entries kept per account.
    #[serde(default = "default_max_history")]
    pub max_history: usize,
}

/// Refresh timer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Refresh once at startup instead of waiting for the first tick.
    #[serde(default = "default_true")]
    pub immediate: bool,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    /// Data directory. Empty = platform default.
    #[serde(default)]
    pub data_dir: String,
}

/// Advanced configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvancedConfig {
    /// Log level: "debug" | "info" | "warn" | "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Event bus buffer per subscriber.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

// Default value functions

fn default_rpc_url() -> String {
    "http://localhost:8545".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_count_function() -> String {
    "nextCourseId".to_string()
}

fn default_item_function() -> String {
    "getCourse".to_string()
}

fn default_start_index() -> u64 {
    strata_types::DEFAULT_START_INDEX
}

fn default_count_semantics() -> CountSemantics {
    CountSemantics::LastId
}

fn default_read_mode() -> ReadModeSetting {
    ReadModeSetting::Batched
}

fn default_true() -> bool {
    true
}

fn default_token_decimals() -> u32 {
    18
}

fn default_confirmations() -> u64 {
    strata_types::DEFAULT_CONFIRMATIONS
}

fn default_profile_url() -> String {
    "http://localhost:8787".to_string()
}

fn default_profile_prefix() -> String {
    strata_types::DEFAULT_PROFILE_PREFIX.to_string()
}

fn default_ledger_prefix() -> String {
    strata_types::DEFAULT_LEDGER_PREFIX.to_string()
}

fn default_max_history() -> usize {
    strata_types::DEFAULT_MAX_HISTORY
}

fn default_interval_ms() -> u64 {
    30_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_event_buffer() -> usize {
    1000
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            timeout_secs: default_timeout_secs(),
            collection_address: String::new(),
            count_function: default_count_function(),
            item_function: default_item_function(),
            start_index: default_start_index(),
            count_semantics: default_count_semantics(),
            read_mode: default_read_mode(),
            skip_failure: true,
            balance_token_address: String::new(),
            token_decimals: default_token_decimals(),
            confirmations: default_confirmations(),
        }
    }
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            base_url: default_profile_url(),
            key_prefix: default_profile_prefix(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            key_prefix: default_ledger_prefix(),
            max_history: default_max_history(),
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: default_interval_ms(),
            immediate: true,
        }
    }
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl RefreshConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl DaemonConfig {
    /// Load configuration from the default config file location.
    ///
    /// Falls back to defaults if file does not exist.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: DaemonConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Get the data directory path.
    pub fn data_dir(&self) -> PathBuf {
        if self.storage.data_dir.is_empty() {
            Self::default_data_dir()
        } else {
            PathBuf::from(&self.storage.data_dir)
        }
    }

    /// Get the config file path.
    fn config_path() -> PathBuf {
        Self::default_data_dir().join("config.toml")
    }

    /// Platform-specific default data directory.
    fn default_data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("STRATA_DATA_DIR") {
            return PathBuf::from(dir);
        }
        #[cfg(target_os = "macos")]
        {
            dirs_fallback("Library/Application Support/Strata")
        }
        #[cfg(target_os = "windows")]
        {
            dirs_fallback("Strata")
        }
        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        {
            dirs_fallback(".strata")
        }
    }
}

/// Fallback home directory resolution.
fn dirs_fallback(subpath: &str) -> PathBuf {
    std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(subpath))
        .unwrap_or_else(|_| PathBuf::from("/tmp/strata"))
}
