use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub source: SourceConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Chunk sizing, counted in characters. The unit is fixed per deployment;
/// `overlap_chars` worth of trailing content is carried into the next
/// chunk's head to preserve cross-boundary context.
#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    1600
}
fn default_overlap_chars() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"openai"` (any OpenAI-compatible endpoint) or `"disabled"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Similarity metric the model was trained for: `"cosine"` or `"dot"`.
    /// Must match the vector collection's metric; validated at setup.
    #[serde(default = "default_metric")]
    pub metric: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Hard input bound per text. Longer inputs fail with ContentTooLarge
    /// rather than being truncated by the client.
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_openai_base_url(),
            model: None,
            dims: None,
            metric: default_metric(),
            batch_size: default_batch_size(),
            max_input_chars: default_max_input_chars(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            api_key_env: default_api_key_env(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// `"openai"` (any OpenAI-compatible chat endpoint) or `"disabled"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Hard prompt bound; an assembled prompt above this fails with
    /// ContentTooLarge instead of being truncated.
    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_openai_base_url(),
            model: None,
            max_tokens: None,
            temperature: None,
            max_prompt_chars: default_max_prompt_chars(),
            max_retries: default_max_retries(),
            timeout_secs: default_generation_timeout_secs(),
            api_key_env: default_api_key_env(),
        }
    }
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Results scoring below this are dropped so answers are never grounded
    /// on irrelevant fragments. Zero surviving results is a normal outcome.
    #[serde(default = "default_min_score")]
    pub min_score: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_score: default_min_score(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PromptConfig {
    /// Maximum total characters of fragment text included in a prompt.
    #[serde(default = "default_context_budget_chars")]
    pub context_budget_chars: usize,
    /// What to do when retrieval returns nothing: `"refuse"` returns a fixed
    /// answer without calling the generator; `"ungrounded"` generates without
    /// context and marks the response accordingly.
    #[serde(default = "default_no_context_policy")]
    pub no_context_policy: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            context_budget_chars: default_context_budget_chars(),
            no_context_policy: default_no_context_policy(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// `"sqlite"` (vectors in the registry database) or `"memory"`.
    #[serde(default = "default_store_backend")]
    pub backend: String,
    #[serde(default = "default_collection")]
    pub collection: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            collection: default_collection(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Per-request ceiling covering the whole retrieve → generate sequence.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Worker tasks draining the ingestion queue.
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_depth: default_queue_depth(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourceConfig {
    pub filesystem: Option<FilesystemSourceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilesystemSourceConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_openai_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_metric() -> String {
    "cosine".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_input_chars() -> usize {
    32_000
}
fn default_max_retries() -> u32 {
    4
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_max_prompt_chars() -> usize {
    48_000
}
fn default_generation_timeout_secs() -> u64 {
    60
}
fn default_top_k() -> usize {
    8
}
fn default_min_score() -> f32 {
    0.25
}
fn default_context_budget_chars() -> usize {
    6_000
}
fn default_no_context_policy() -> String {
    "refuse".to_string()
}
fn default_store_backend() -> String {
    "sqlite".to_string()
}
fn default_collection() -> String {
    "main".to_string()
}
fn default_bind() -> String {
    "127.0.0.1:7431".to_string()
}
fn default_request_timeout_secs() -> u64 {
    60
}
fn default_workers() -> usize {
    4
}
fn default_queue_depth() -> usize {
    256
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Reject invalid configurations at load time, never at request time.
fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_chars == 0 {
        anyhow::bail!("chunking.max_chars must be > 0");
    }
    if config.chunking.overlap_chars >= config.chunking.max_chars {
        anyhow::bail!(
            "chunking.overlap_chars ({}) must be < chunking.max_chars ({})",
            config.chunking.overlap_chars,
            config.chunking.max_chars
        );
    }

    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    if config.prompt.context_budget_chars == 0 {
        anyhow::bail!("prompt.context_budget_chars must be > 0");
    }
    match config.prompt.no_context_policy.as_str() {
        "refuse" | "ungrounded" => {}
        other => anyhow::bail!(
            "Unknown prompt.no_context_policy: '{}'. Must be refuse or ungrounded.",
            other
        ),
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    match config.embedding.metric.as_str() {
        "cosine" | "dot" => {}
        other => anyhow::bail!("Unknown embedding.metric: '{}'. Must be cosine or dot.", other),
    }

    match config.generation.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if config.generation.is_enabled() && config.generation.model.is_none() {
        anyhow::bail!(
            "generation.model must be specified when provider is '{}'",
            config.generation.provider
        );
    }

    match config.store.backend.as_str() {
        "sqlite" | "memory" => {}
        other => anyhow::bail!("Unknown store.backend: '{}'. Must be sqlite or memory.", other),
    }

    if config.ingest.workers == 0 {
        anyhow::bail!("ingest.workers must be >= 1");
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
    fn test_minimal_config_uses_defaults() {
        let config = parse("[db]\npath = \"data/ragline.sqlite\"\n").unwrap();
        assert_eq!(config.chunking.max_chars, 1600);
        assert_eq!(config.chunking.overlap_chars, 200);
        assert_eq!(config.retrieval.top_k, 8);
        assert_eq!(config.prompt.no_context_policy, "refuse");
        assert_eq!(config.store.backend, "sqlite");
        assert!(!config.embedding.is_enabled());
    }

    #[test]
    fn test_overlap_must_be_less_than_max() {
        let err = parse(
            "[db]\npath = \"x.sqlite\"\n[chunking]\nmax_chars = 100\noverlap_chars = 100\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("overlap_chars"));
    }

    #[test]
    fn test_enabled_embedding_requires_model_and_dims() {
        let err = parse("[db]\npath = \"x.sqlite\"\n[embedding]\nprovider = \"openai\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("embedding.model"));
    }

    #[test]
    fn test_unknown_metric_rejected() {
        let err = parse(
            "[db]\npath = \"x.sqlite\"\n[embedding]\nprovider = \"openai\"\nmodel = \"m\"\ndims = 4\nmetric = \"euclidean\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("metric"));
    }

    #[test]
    fn test_unknown_policy_rejected() {
        let err = parse(
            "[db]\npath = \"x.sqlite\"\n[prompt]\nno_context_policy = \"improvise\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("no_context_policy"));
    }

    #[test]
    fn test_zero_top_k_rejected() {
        let err =
            parse("[db]\npath = \"x.sqlite\"\n[retrieval]\ntop_k = 0\n").unwrap_err();
        assert!(err.to_string().contains("top_k"));
    }
}
