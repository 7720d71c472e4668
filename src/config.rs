//! TOML configuration.
//!
//! Every section except `[db]` is optional and falls back to defaults.
//! [`load_config`] parses the file and validates ranges and provider
//! names, failing with a message that names the offending key.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use jedai_core::chunk::ChunkerConfig;
use jedai_core::search::SearchParams;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub materials: Option<MaterialsConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap_ratio")]
    pub overlap_ratio: f64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_ratio: default_overlap_ratio(),
        }
    }
}

impl ChunkingConfig {
    pub fn to_chunker(&self) -> ChunkerConfig {
        ChunkerConfig {
            max_tokens: self.max_tokens,
            overlap_ratio: self.overlap_ratio,
        }
    }
}

fn default_max_tokens() -> usize {
    125
}
fn default_overlap_ratio() -> f64 {
    0.2
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub default_k: i64,
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f64,
    #[serde(default)]
    pub min_score: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: default_k(),
            hybrid_alpha: default_hybrid_alpha(),
            min_score: 0.0,
        }
    }
}

impl RetrievalConfig {
    pub fn to_params(&self) -> SearchParams {
        SearchParams {
            hybrid_alpha: self.hybrid_alpha,
            min_score: self.min_score,
        }
    }
}

fn default_k() -> i64 {
    5
}
fn default_hybrid_alpha() -> f64 {
    0.5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for Ollama (default `http://localhost:11434`).
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

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// Remote providers need an explicit model and dimensionality.
    fn is_remote(&self) -> bool {
        matches!(self.provider.as_str(), "openai" | "ollama")
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

/// Chat model used by the answer synthesizer.
#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// OpenAI-compatible base URL; `/chat/completions` is appended.
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    /// Character budget for course excerpts in one prompt.
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            base_url: default_llm_base_url(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            max_tokens: None,
            max_retries: default_llm_retries(),
            timeout_secs: default_llm_timeout_secs(),
            max_context_chars: default_max_context_chars(),
        }
    }
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_temperature() -> f64 {
    0.3
}
fn default_llm_retries() -> u32 {
    3
}
fn default_llm_timeout_secs() -> u64 {
    60
}
fn default_max_context_chars() -> usize {
    12_000
}

/// Where course materials live on disk.
#[derive(Debug, Deserialize, Clone)]
pub struct MaterialsConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    ["**/*.pdf", "**/*.pptx", "**/*.md", "**/*.markdown", "**/*.txt"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == 0 {
        bail!("chunking.max_tokens must be > 0");
    }
    if !(0.0..=0.9).contains(&config.chunking.overlap_ratio) {
        bail!("chunking.overlap_ratio must be in [0.0, 0.9]");
    }

    if config.retrieval.default_k < 1 {
        bail!("retrieval.default_k must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.hybrid_alpha) {
        bail!("retrieval.hybrid_alpha must be in [0.0, 1.0]");
    }
    if !(0.0..=1.0).contains(&config.retrieval.min_score) {
        bail!("retrieval.min_score must be in [0.0, 1.0]");
    }

    let embedding = &config.embedding;
    match embedding.provider.as_str() {
        "disabled" | "hashing" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, hashing, openai, or ollama.",
            other
        ),
    }
    if embedding.dims == Some(0) {
        bail!("embedding.dims must be > 0");
    }
    if embedding.is_remote() {
        if embedding.dims.is_none() {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                embedding.provider
            );
        }
        if embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                embedding.provider
            );
        }
    }
    if embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    let llm = &config.llm;
    match llm.provider.as_str() {
        "disabled" => {}
        "openai" => {
            if llm.model.is_none() {
                bail!("llm.model must be specified when provider is 'openai'");
            }
        }
        other => bail!(
            "Unknown llm provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if !(0.0..=2.0).contains(&llm.temperature) {
        bail!("llm.temperature must be in [0.0, 2.0]");
    }
    if llm.timeout_secs == 0 {
        bail!("llm.timeout_secs must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse("[db]\npath = \"./data/jedai.sqlite\"\n").unwrap();
        assert_eq!(config.chunking.max_tokens, 125);
        assert_eq!(config.retrieval.default_k, 5);
        assert_eq!(config.retrieval.min_score, 0.0);
        assert!(!config.embedding.is_enabled());
        assert_eq!(config.llm.provider, "disabled");
        assert_eq!(config.llm.timeout_secs, 60);
        assert!(config.materials.is_none());
    }

    #[test]
    fn rejects_out_of_range_values() {
        let base = "[db]\npath = \"x.sqlite\"\n";
        for extra in [
            "[chunking]\nmax_tokens = 0\n",
            "[chunking]\noverlap_ratio = 0.95\n",
            "[retrieval]\ndefault_k = 0\n",
            "[retrieval]\nhybrid_alpha = 1.5\n",
            "[retrieval]\nmin_score = -0.1\n",
            "[embedding]\nprovider = \"magic\"\n",
            "[embedding]\nprovider = \"openai\"\nmodel = \"m\"\n",
            "[llm]\nprovider = \"openai\"\n",
            "[llm]\nprovider = \"carrier-pigeon\"\n",
        ] {
            assert!(
                parse(&format!("{}{}", base, extra)).is_err(),
                "accepted: {}",
                extra
            );
        }
    }

    #[test]
    fn hashing_provider_needs_no_model() {
        let config = parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"hashing\"\n").unwrap();
        assert!(config.embedding.is_enabled());
    }

    #[test]
    fn materials_default_globs_cover_every_kind() {
        let config = parse("[db]\npath = \"x\"\n[materials]\nroot = \"./course\"\n").unwrap();
        let globs = config.materials.unwrap().include_globs;
        assert!(globs.contains(&"**/*.pptx".to_string()));
        assert!(globs.contains(&"**/*.pdf".to_string()));
    }
}
