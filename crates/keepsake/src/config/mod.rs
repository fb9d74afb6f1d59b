use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::conflict::ConflictConfig;
use crate::error::{KeepsakeError, Result};
use crate::extraction::ExtractionConfig;
use crate::lifecycle::compaction::CompactionConfig;
use crate::lifecycle::decay::DecayConfig;
use crate::manager::{ContextConfig, RecallConfig};
use crate::memory::scorer::ScoringConfig;

/// Main configuration structure for keepsake
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    /// Where memories and entities are persisted
    #[serde(default)]
    pub storage: StorageConfig,
    /// Embedding provider configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// LLM used for extraction fallback and summaries
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub conflict: ConflictConfig,
    #[serde(default)]
    pub decay: DecayConfig,
    #[serde(default)]
    pub compaction: CompactionConfig,
    #[serde(default)]
    pub recall: RecallConfig,
    #[serde(default)]
    pub context: ContextConfig,
    /// Recent conversation window
    #[serde(default)]
    pub buffer: BufferConfig,
    /// Background maintenance intervals
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Lease provider for scheduled jobs
    #[serde(default)]
    pub lock: LockConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// LanceDB tables under `data_dir`
    #[default]
    Lance,
    /// Process-local maps, lost on exit
    Memory,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Base directory for all storage data
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".keepsake"))
        .unwrap_or_else(|| PathBuf::from(".keepsake"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    /// Local multilingual model via fastembed
    #[default]
    Fastembed,
    /// OpenAI-compatible `/embeddings` endpoint
    Remote,
    /// No embeddings; recall falls back to lexical matching
    None,
}

/// Embedding model configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: EmbeddingProviderKind,
    /// Remote endpoint base URL
    #[serde(default)]
    pub api_url: String,
    /// Environment variable name for the remote API key
    #[serde(default = "default_embedding_api_key_env")]
    pub api_key_env: String,
    /// Remote model identifier
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Embedding dimension size
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,
    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// LRU entries keyed by content hash; 0 disables the cache
    #[serde(default = "default_embedding_cache_size")]
    pub cache_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::default(),
            api_url: String::new(),
            api_key_env: default_embedding_api_key_env(),
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            cache_size: default_embedding_cache_size(),
        }
    }
}

fn default_embedding_api_key_env() -> String {
    "EMBEDDING_API_KEY".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimension() -> usize {
    384
}

fn default_embedding_cache_size() -> usize {
    1024
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

/// Remote LLM configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// Enable LLM extraction fallback and summaries
    #[serde(default)]
    pub enabled: bool,
    /// API endpoint base URL
    #[serde(default)]
    pub api_url: String,
    /// Environment variable name for API key
    #[serde(default = "default_llm_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: u32,
    /// Consecutive failures before the circuit opens
    #[serde(default = "default_breaker_threshold")]
    pub breaker_threshold: u32,
    /// Seconds the circuit stays open before a trial call
    #[serde(default = "default_breaker_cooldown_secs")]
    pub breaker_cooldown_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_url: String::new(),
            api_key_env: default_llm_api_key_env(),
            model: default_llm_model(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            temperature: default_llm_temperature(),
            max_tokens: default_llm_max_tokens(),
            breaker_threshold: default_breaker_threshold(),
            breaker_cooldown_secs: default_breaker_cooldown_secs(),
        }
    }
}

fn default_llm_api_key_env() -> String {
    "LLM_API_KEY".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_llm_temperature() -> f32 {
    0.2
}

fn default_llm_max_tokens() -> u32 {
    1024
}

fn default_breaker_threshold() -> u32 {
    5
}

fn default_breaker_cooldown_secs() -> u64 {
    60
}

/// Conversation buffer configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BufferConfig {
    /// Maximum number of conversation turns to buffer
    #[serde(default = "default_buffer_max_turns")]
    pub max_turns: usize,
    /// Maximum tokens kept in the buffer
    #[serde(default = "default_buffer_max_tokens")]
    pub max_tokens: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_turns: default_buffer_max_turns(),
            max_tokens: default_buffer_max_tokens(),
        }
    }
}

fn default_buffer_max_turns() -> usize {
    10
}

fn default_buffer_max_tokens() -> usize {
    8000
}

/// Background maintenance configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_scheduler_enabled")]
    pub enabled: bool,
    #[serde(default = "default_decay_interval_secs")]
    pub decay_interval_secs: u64,
    #[serde(default = "default_compaction_interval_secs")]
    pub compaction_interval_secs: u64,
    #[serde(default = "default_backfill_interval_secs")]
    pub backfill_interval_secs: u64,
    /// Memories vectored per backfill pass
    #[serde(default = "default_backfill_batch")]
    pub backfill_batch: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_scheduler_enabled(),
            decay_interval_secs: default_decay_interval_secs(),
            compaction_interval_secs: default_compaction_interval_secs(),
            backfill_interval_secs: default_backfill_interval_secs(),
            backfill_batch: default_backfill_batch(),
        }
    }
}

fn default_scheduler_enabled() -> bool {
    true
}

fn default_decay_interval_secs() -> u64 {
    86_400
}

fn default_compaction_interval_secs() -> u64 {
    21_600
}

fn default_backfill_interval_secs() -> u64 {
    3_600
}

fn default_backfill_batch() -> usize {
    100
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LockProviderKind {
    /// Single-process lock table
    #[default]
    Memory,
    /// Lease files in a shared directory
    File,
}

/// Lock provider configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct LockConfig {
    #[serde(default)]
    pub provider: LockProviderKind,
    /// Lease directory for the file provider, defaults to `<data_dir>/locks`
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Config {
    /// Parse a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| KeepsakeError::Config(format!("Failed to parse config: {e}")))
    }

    pub fn lock_dir(&self) -> PathBuf {
        self.lock
            .dir
            .clone()
            .unwrap_or_else(|| self.storage.data_dir.join("locks"))
    }
}

/// Load configuration from an explicit path or the default search locations.
///
/// Search order: `~/.keepsake/config.toml`, `<config_dir>/keepsake/config.toml`,
/// `./config.toml`. Falls back to defaults when none exists.
pub fn load_config(config_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = config_path {
        tracing::info!("Loading config from: {}", path.display());
        return read_config(path);
    }

    let default_paths = [
        dirs::home_dir().map(|h| h.join(".keepsake").join("config.toml")),
        dirs::config_dir().map(|c| c.join("keepsake").join("config.toml")),
        Some(PathBuf::from("config.toml")),
    ];

    for path in default_paths.iter().flatten() {
        if path.exists() {
            tracing::info!("Loading config from: {}", path.display());
            return read_config(path);
        }
    }

    tracing::info!("No config file found, using defaults");
    Ok(Config::default())
}

fn read_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        KeepsakeError::Config(format!(
            "Failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;
    Config::from_toml(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::MemoryType;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.storage.backend, StorageBackend::Lance);
        assert_eq!(config.embedding.provider, EmbeddingProviderKind::Fastembed);
        assert_eq!(config.embedding.dimension, 384);
        assert_eq!(config.embedding.cache_size, 1024);
        assert!(!config.llm.enabled);
        assert_eq!(config.llm.api_key_env, "LLM_API_KEY");
        assert_eq!(config.llm.breaker_threshold, 5);
        assert_eq!(config.buffer.max_turns, 10);
        assert_eq!(config.scheduler.decay_interval_secs, 86_400);
        assert_eq!(config.lock.provider, LockProviderKind::Memory);
        assert_eq!(config.extraction.llm_fallback_threshold, 2);
        assert_eq!(config.decay.lock_ttl_secs, 600);
        assert_eq!(config.compaction.owner_threshold, 500);
        assert_eq!(config.recall.min_similarity, 0.5);
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_str = r#"
[storage]
backend = "memory"
data_dir = "/tmp/keepsake"

[embedding]
provider = "remote"
api_url = "https://api.openai.com/v1"
model = "text-embedding-3-small"
dimension = 1536
cache_size = 0

[llm]
enabled = true
api_url = "https://api.openai.com/v1"
model = "gpt-4o"
timeout_secs = 10

[scoring]
decay_lambda = 0.02

[scoring.type_base]
fact = 0.65

[decay]
enabled = false
archive_after_days = 90

[compaction]
dedup_threshold = 0.95

[scheduler]
decay_interval_secs = 3600

[lock]
provider = "file"
dir = "/tmp/keepsake-locks"
"#;

        let config = Config::from_toml(toml_str).expect("Failed to parse TOML");

        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.storage.data_dir, PathBuf::from("/tmp/keepsake"));

        assert_eq!(config.embedding.provider, EmbeddingProviderKind::Remote);
        assert_eq!(config.embedding.dimension, 1536);
        assert_eq!(config.embedding.cache_size, 0);
        assert_eq!(config.embedding.api_key_env, "EMBEDDING_API_KEY");

        assert!(config.llm.enabled);
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.llm.timeout_secs, 10);
        assert_eq!(config.llm.max_retries, 3);

        assert!((config.scoring.decay_lambda - 0.02).abs() < f32::EPSILON);
        assert_eq!(config.scoring.type_base.get(MemoryType::Fact), Some(0.65));
        // untouched fields in a partial table keep their defaults
        assert_eq!(config.scoring.type_base.get(MemoryType::Decision), Some(0.8));
        assert_eq!(config.scoring.importance_weight, 0.4);

        assert!(!config.decay.enabled);
        assert_eq!(config.decay.archive_after_days, 90);
        assert_eq!(config.decay.delete_after_days, 365);
        assert!((config.compaction.dedup_threshold - 0.95).abs() < f32::EPSILON);
        assert_eq!(config.scheduler.decay_interval_secs, 3600);
        assert_eq!(config.lock.provider, LockProviderKind::File);
        assert_eq!(config.lock_dir(), PathBuf::from("/tmp/keepsake-locks"));
    }

    #[test]
    fn test_toml_partial_deserialization() {
        let toml_str = r#"
[llm]
api_url = "https://api.example.com"
"#;

        let config = Config::from_toml(toml_str).expect("Failed to parse partial TOML");

        assert!(!config.llm.enabled);
        assert_eq!(config.llm.api_url, "https://api.example.com");
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.storage.backend, StorageBackend::Lance);
    }

    #[test]
    fn test_lock_dir_defaults_under_data_dir() {
        let toml_str = r#"
[storage]
data_dir = "/var/lib/keepsake"
"#;
        let config = Config::from_toml(toml_str).unwrap();
        assert_eq!(config.lock_dir(), PathBuf::from("/var/lib/keepsake/locks"));
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = Config::from_toml("[storage\nbackend = 1").unwrap_err();
        assert!(matches!(err, KeepsakeError::Config(_)));
    }

    #[test]
    fn test_load_config_from_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[buffer]\nmax_turns = 4\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.buffer.max_turns, 4);
        assert_eq!(config.buffer.max_tokens, 8000);
    }

    #[test]
    fn test_load_config_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_config(Some(&dir.path().join("absent.toml")));
        assert!(matches!(result, Err(KeepsakeError::Config(_))));
    }

    #[test]
    fn test_default_config_serializes() {
        let rendered = toml::to_string_pretty(&Config::default()).unwrap();
        assert!(rendered.contains("[storage]"));
        assert!(rendered.contains("decay_lambda"));
    }
}
