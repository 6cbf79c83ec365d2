use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use knowledge_harness_core::chunk::ChunkParams;
use knowledge_harness_core::context::ContextOptions;
use knowledge_harness_core::filter::{FilterSettings, Preset};
use knowledge_harness_core::retrieval::RetrievalParams;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
    #[serde(default = "default_boundary_radius")]
    pub boundary_radius: usize,
    #[serde(default = "default_true")]
    pub respect_boundaries: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
            boundary_radius: default_boundary_radius(),
            respect_boundaries: true,
        }
    }
}

impl ChunkingConfig {
    pub fn params(&self) -> ChunkParams {
        ChunkParams {
            chunk_size: self.chunk_size,
            overlap: self.overlap,
            boundary_radius: self.boundary_radius,
            respect_boundaries: self.respect_boundaries,
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_overlap() -> usize {
    200
}
fn default_boundary_radius() -> usize {
    100
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilterConfig {
    #[serde(default = "default_preset")]
    pub preset: String,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub ignore: Vec<String>,
    #[serde(default = "default_ignore_file")]
    pub ignore_file: String,
    #[serde(default)]
    pub min_size: Option<u64>,
    #[serde(default)]
    pub max_size: Option<u64>,
    #[serde(default)]
    pub sensitive_scan: Option<bool>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            preset: default_preset(),
            include: Vec::new(),
            ignore: Vec::new(),
            ignore_file: default_ignore_file(),
            min_size: None,
            max_size: None,
            sensitive_scan: None,
        }
    }
}

impl FilterConfig {
    /// Filter settings, optionally overriding the configured preset.
    pub fn settings(&self, preset_override: Option<Preset>) -> Result<FilterSettings> {
        let preset = match preset_override {
            Some(p) => p,
            None => self
                .preset
                .parse::<Preset>()
                .map_err(|e| anyhow::anyhow!("filter.preset: {}", e))?,
        };
        Ok(FilterSettings {
            preset: Some(preset),
            include: self.include.clone(),
            ignore: self.ignore.clone(),
            min_size: self.min_size,
            max_size: self.max_size,
            sensitive_scan: self.sensitive_scan,
        })
    }
}

fn default_preset() -> String {
    "auto".to_string()
}
fn default_ignore_file() -> String {
    ".knowledgeignore".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
    #[serde(default = "default_context_chunks")]
    pub context_chunks: usize,
    #[serde(default = "default_context_max_chunks")]
    pub context_max_chunks: usize,
    #[serde(default = "default_context_char_budget")]
    pub context_char_budget: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_top_k: default_max_top_k(),
            candidate_multiplier: default_candidate_multiplier(),
            context_chunks: default_context_chunks(),
            context_max_chunks: default_context_max_chunks(),
            context_char_budget: default_context_char_budget(),
        }
    }
}

impl RetrievalConfig {
    pub fn context_options(&self) -> ContextOptions {
        ContextOptions {
            max_chunks: self.context_chunks,
            ceiling: self.context_max_chunks,
            char_budget: self.context_char_budget,
        }
    }
}

fn default_top_k() -> usize {
    10
}
fn default_max_top_k() -> usize {
    50
}
fn default_candidate_multiplier() -> usize {
    3
}
fn default_context_chunks() -> usize {
    5
}
fn default_context_max_chunks() -> usize {
    20
}
fn default_context_char_budget() -> usize {
    50_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the provider API. Defaults per provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    100
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

const PROVIDERS: &[&str] = &["disabled", "openai", "openrouter", "ollama", "hash", "local"];

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// Configured dimensionality, or the known size of the configured model.
    pub fn resolved_dims(&self) -> Option<usize> {
        self.dims.or_else(|| {
            self.model
                .as_deref()
                .and_then(crate::embedding::known_model_dims)
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexingConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

fn default_workers() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

impl Config {
    pub fn retrieval_params(&self) -> RetrievalParams {
        RetrievalParams {
            top_k: self.retrieval.top_k,
            max_top_k: self.retrieval.max_top_k,
            candidate_multiplier: self.retrieval.candidate_multiplier,
            batch_size: self.embedding.batch_size,
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.chunk_size {
        anyhow::bail!(
            "chunking.overlap ({}) must be smaller than chunking.chunk_size ({})",
            config.chunking.overlap,
            config.chunking.chunk_size
        );
    }

    // Validate filter
    config.filter.settings(None)?;

    // Validate retrieval
    let r = &config.retrieval;
    if r.top_k < 1 || r.top_k > r.max_top_k {
        anyhow::bail!(
            "retrieval.top_k must be in [1, retrieval.max_top_k = {}]",
            r.max_top_k
        );
    }
    if r.candidate_multiplier < 1 {
        anyhow::bail!("retrieval.candidate_multiplier must be >= 1");
    }
    if r.context_chunks > r.context_max_chunks {
        anyhow::bail!(
            "retrieval.context_chunks ({}) must not exceed retrieval.context_max_chunks ({})",
            r.context_chunks,
            r.context_max_chunks
        );
    }

    if config.indexing.workers < 1 {
        anyhow::bail!("indexing.workers must be >= 1");
    }

    // Validate embedding
    let e = &config.embedding;
    if !PROVIDERS.contains(&e.provider.as_str()) {
        anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be one of: {}.",
            e.provider,
            PROVIDERS.join(", ")
        );
    }
    if e.batch_size < 1 {
        anyhow::bail!("embedding.batch_size must be >= 1");
    }
    if e.is_enabled() {
        if e.provider != "hash" && e.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                e.provider
            );
        }
        if e.resolved_dims().unwrap_or(0) == 0 {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                e.provider
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_text: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_text)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_defaults() {
        let config = parse("[db]\npath = \"kh.sqlite\"\n").unwrap();
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.overlap, 200);
        assert_eq!(config.filter.preset, "auto");
        assert_eq!(config.filter.ignore_file, ".knowledgeignore");
        assert_eq!(config.retrieval.top_k, 10);
        assert_eq!(config.retrieval.context_char_budget, 50_000);
        assert_eq!(config.embedding.batch_size, 100);
        assert_eq!(config.indexing.workers, 4);
        assert_eq!(config.server.bind, "127.0.0.1:7341");
        assert!(!config.embedding.is_enabled());
    }

    #[test]
    fn test_rejects_overlap_not_below_size() {
        let err = parse("[db]\npath = \"x\"\n[chunking]\nchunk_size = 100\noverlap = 100\n")
            .unwrap_err();
        assert!(err.to_string().contains("chunking.overlap"));
    }

    #[test]
    fn test_rejects_unknown_preset_and_provider() {
        assert!(parse("[db]\npath = \"x\"\n[filter]\npreset = \"loose\"\n").is_err());
        assert!(parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"magic\"\n").is_err());
    }

    #[test]
    fn test_embedding_requirements() {
        assert!(parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"hash\"\ndims = 64\n").is_ok());
        assert!(parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"hash\"\n").is_err());
        assert!(parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\ndims = 8\n").is_err());
        let known = parse(
            "[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-3-small\"\n",
        )
        .unwrap();
        assert_eq!(known.embedding.resolved_dims(), Some(1536));
    }

    #[test]
    fn test_top_k_bounds() {
        assert!(parse("[db]\npath = \"x\"\n[retrieval]\ntop_k = 0\n").is_err());
        assert!(parse("[db]\npath = \"x\"\n[retrieval]\ntop_k = 60\n").is_err());
        assert!(parse("[db]\npath = \"x\"\n[retrieval]\ncontext_chunks = 30\n").is_err());
    }
}
