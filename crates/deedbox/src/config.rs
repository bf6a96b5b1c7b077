//! TOML configuration.
//!
//! Every section except `[sync]`, `[remote]` and `[db]` has defaults, so a
//! minimal file only names where documents, the manifest and the chunk
//! database live. Secrets are never stored here: each credential is read
//! from the environment variable the config names.

use anyhow::{bail, Context, Result};
use deedbox_core::chunk::ChunkConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub sync: SyncConfig,
    pub remote: RemoteConfig,
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    pub local_root: PathBuf,
    pub manifest_path: PathBuf,
    pub status_path: PathBuf,
    #[serde(default)]
    pub lock_path: Option<PathBuf>,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_sync_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default = "default_true")]
    pub index_after_sync: bool,
    #[serde(default)]
    pub interval_secs: Option<u64>,
}

impl SyncConfig {
    /// Lock file guarding the manifest; `<manifest_path>.lock` unless set.
    pub fn lock_path(&self) -> PathBuf {
        self.lock_path.clone().unwrap_or_else(|| {
            let mut p = self.manifest_path.clone().into_os_string();
            p.push(".lock");
            PathBuf::from(p)
        })
    }
}

fn default_concurrency() -> usize {
    4
}
fn default_sync_timeout_secs() -> u64 {
    60
}
fn default_include_globs() -> Vec<String> {
    ["pdf", "txt", "md", "docx", "doc"]
        .iter()
        .map(|ext| format!("**/*.{}", ext))
        .collect()
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    /// `dropbox` or `filesystem`.
    pub provider: String,
    /// Remote folder (Dropbox) or mirror directory (filesystem).
    #[serde(default)]
    pub root: String,
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

fn default_token_env() -> String {
    "DROPBOX_ACCESS_TOKEN".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
    #[serde(default = "default_boundary_tolerance")]
    pub boundary_tolerance_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap(),
            boundary_tolerance_tokens: default_boundary_tolerance(),
        }
    }
}

impl ChunkingConfig {
    pub fn to_chunk_config(&self) -> ChunkConfig {
        ChunkConfig::from_tokens(
            self.max_tokens,
            self.overlap_tokens,
            self.boundary_tolerance_tokens,
        )
    }
}

fn default_max_tokens() -> usize {
    300
}
fn default_overlap() -> usize {
    50
}
fn default_boundary_tolerance() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_top_k: default_top_k(),
            max_top_k: default_max_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_max_top_k() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for Ollama (default `http://localhost:11434`).
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout_secs(),
            url: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_embedding_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    3
}
fn default_embedding_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// `runpod` or `extractive`.
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_generation_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_generation_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            url: None,
            api_key_env: default_generation_key_env(),
            max_tokens: default_generation_max_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            timeout_secs: default_generation_timeout_secs(),
        }
    }
}

fn default_generation_provider() -> String {
    "extractive".to_string()
}
fn default_generation_key_env() -> String {
    "RUNPOD_API_KEY".to_string()
}
fn default_generation_max_tokens() -> u32 {
    512
}
fn default_temperature() -> f32 {
    0.7
}
fn default_top_p() -> f32 {
    0.9
}
fn default_generation_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_tokens_env")]
    pub tokens_env: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            tokens_env: default_tokens_env(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}
fn default_tokens_env() -> String {
    "DEEDBOX_API_TOKENS".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}

fn default_filter() -> String {
    "info".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate a config from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == 0 {
        bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        bail!("chunking.overlap_tokens must be smaller than chunking.max_tokens");
    }

    if config.retrieval.default_top_k < 1 {
        bail!("retrieval.default_top_k must be >= 1");
    }
    if config.retrieval.default_top_k > config.retrieval.max_top_k {
        bail!("retrieval.default_top_k must not exceed retrieval.max_top_k");
    }

    if config.sync.concurrency == 0 {
        bail!("sync.concurrency must be > 0");
    }
    if config.sync.timeout_secs == 0 {
        bail!("sync.timeout_secs must be > 0");
    }
    if config.sync.interval_secs == Some(0) {
        bail!("sync.interval_secs must be > 0 when set");
    }

    match config.remote.provider.as_str() {
        "dropbox" | "filesystem" => {}
        other => bail!(
            "Unknown remote provider: '{}'. Must be dropbox or filesystem.",
            other
        ),
    }
    if config.remote.provider == "filesystem" && config.remote.root.is_empty() {
        bail!("remote.root must name the mirror directory when provider is 'filesystem'");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
    }

    match config.generation.provider.as_str() {
        "extractive" => {}
        "runpod" => {
            if config.generation.url.is_none() {
                bail!("generation.url must be specified when provider is 'runpod'");
            }
        }
        other => bail!(
            "Unknown generation provider: '{}'. Must be runpod or extractive.",
            other
        ),
    }

    Ok(())
}
