//! Backend configuration and factory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use leakbench_core::engine::RunEngineConfig;
use leakbench_core::traits::{GenerationOptions, ModelBackend};

use crate::mock::MockBackend;
use crate::ollama::{OllamaBackend, DEFAULT_BASE_URL};

/// Environment variable that overrides the Ollama base URL.
pub const OLLAMA_URL_ENV: &str = "LEAKBENCH_OLLAMA_URL";

/// Which inference backend answers prompts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    Ollama {
        #[serde(default = "default_ollama_url")]
        base_url: String,
    },
    /// Offline backend answering every prompt with a fixed response.
    Mock {
        #[serde(default)]
        response: String,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Ollama {
            base_url: default_ollama_url(),
        }
    }
}

fn default_ollama_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

/// Sampling options sent with every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default)]
    pub temperature: f64,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default = "default_num_ctx")]
    pub num_ctx: u32,
    #[serde(default = "default_seed")]
    pub seed: Option<i64>,
}

fn default_top_p() -> f64 {
    1.0
}
fn default_num_ctx() -> u32 {
    4096
}
fn default_seed() -> Option<i64> {
    Some(0)
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            top_p: default_top_p(),
            num_ctx: default_num_ctx(),
            seed: default_seed(),
        }
    }
}

impl GenerationConfig {
    pub fn to_options(&self) -> GenerationOptions {
        GenerationOptions {
            temperature: self.temperature,
            top_p: self.top_p,
            num_ctx: self.num_ctx,
            seed: self.seed,
        }
    }
}

/// Top-level leakbench configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeakbenchConfig {
    /// Max concurrent backend requests.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Max retries on transient backend errors.
    #[serde(default = "default_retries")]
    pub max_retries: u32,
    /// Initial delay between retries in milliseconds.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Root directory for per-model outputs.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

fn default_parallelism() -> usize {
    1
}
fn default_retries() -> u32 {
    3
}
fn default_retry_delay() -> u64 {
    1000
}
fn default_timeout() -> u64 {
    600
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("runs")
}

impl Default for LeakbenchConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            max_retries: default_retries(),
            retry_delay_ms: default_retry_delay(),
            timeout_secs: default_timeout(),
            output_dir: default_output_dir(),
            backend: BackendConfig::default(),
            generation: GenerationConfig::default(),
        }
    }
}

impl LeakbenchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Engine settings derived from this config. Run-specific flags
    /// (`overwrite`, `limit`) start unset.
    pub fn engine_config(&self) -> RunEngineConfig {
        RunEngineConfig {
            outdir: self.output_dir.clone(),
            options: self.generation.to_options(),
            parallelism: self.parallelism.max(1),
            max_retries: self.max_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            overwrite: false,
            limit: None,
        }
    }

    /// Replace the Ollama base URL; other backends are left alone.
    pub fn set_base_url(&mut self, url: &str) {
        if let BackendConfig::Ollama { base_url } = &mut self.backend {
            *base_url = url.to_string();
        }
    }
}

/// Starter configuration written by `leakbench init`.
pub const SAMPLE_CONFIG: &str = r#"# leakbench configuration

parallelism = 1
max_retries = 3
retry_delay_ms = 1000
timeout_secs = 600
output_dir = "runs"

[backend]
type = "ollama"
base_url = "${LEAKBENCH_OLLAMA_URL:-http://localhost:11434}"

[generation]
temperature = 0.0
top_p = 1.0
num_ctx = 4096
seed = 0
"#;

/// Resolve environment variable references like `${VAR_NAME}` in a string.
///
/// `${VAR:-fallback}` uses `fallback` when `VAR` is unset or empty.
pub fn resolve_env_vars(s: &str) -> String {
    let mut result = String::new();
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        let Some(end) = rest[start..].find('}') else {
            break;
        };
        let expr = &rest[start + 2..start + end];
        let (var_name, fallback) = match expr.split_once(":-") {
            Some((name, fallback)) => (name, fallback),
            None => (expr, ""),
        };
        let value = std::env::var(var_name)
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| fallback.to_string());
        result.push_str(&rest[..start]);
        result.push_str(&value);
        rest = &rest[start + end + 1..];
    }
    result.push_str(rest);
    result
}

/// Parse a config document, resolving `${VAR}` references in string values.
pub fn parse_config(content: &str) -> Result<LeakbenchConfig> {
    let mut config: LeakbenchConfig = toml::from_str(content)?;
    config.backend = match config.backend {
        BackendConfig::Ollama { base_url } => BackendConfig::Ollama {
            base_url: resolve_env_vars(&base_url),
        },
        BackendConfig::Mock { response } => BackendConfig::Mock { response },
    };
    config.output_dir = PathBuf::from(resolve_env_vars(&config.output_dir.to_string_lossy()));
    Ok(config)
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `leakbench.toml` in the current directory
/// 2. `~/.config/leakbench/config.toml`
///
/// `LEAKBENCH_OLLAMA_URL` overrides the Ollama base URL.
pub fn load_config() -> Result<LeakbenchConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<LeakbenchConfig> {
    let config_path = if let Some(p) = path {
        if p.exists() {
            Some(p.to_path_buf())
        } else {
            anyhow::bail!("config file not found: {}", p.display());
        }
    } else {
        let local = PathBuf::from("leakbench.toml");
        if local.exists() {
            Some(local)
        } else {
            dirs_path()
                .map(|home| home.join("config.toml"))
                .filter(|global| global.exists())
        }
    };

    let mut config = match config_path {
        Some(path) => {
            tracing::debug!("loading config from {}", path.display());
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            parse_config(&content)
                .with_context(|| format!("failed to parse config: {}", path.display()))?
        }
        None => LeakbenchConfig::default(),
    };

    if let Ok(url) = std::env::var(OLLAMA_URL_ENV) {
        if !url.is_empty() {
            config.set_base_url(&url);
        }
    }

    Ok(config)
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("leakbench"))
}

/// Create a backend instance from its configuration.
pub fn create_backend(config: &BackendConfig, timeout: Duration) -> Result<Box<dyn ModelBackend>> {
    match config {
        BackendConfig::Ollama { base_url } => Ok(Box::new(OllamaBackend::new(base_url, timeout)?)),
        BackendConfig::Mock { response } => Ok(Box::new(MockBackend::with_fixed_response(response))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_env_vars_basic() {
        std::env::set_var("_LEAKBENCH_TEST_VAR", "hello");
        assert_eq!(resolve_env_vars("${_LEAKBENCH_TEST_VAR}"), "hello");
        assert_eq!(
            resolve_env_vars("prefix_${_LEAKBENCH_TEST_VAR}_suffix"),
            "prefix_hello_suffix"
        );
        std::env::remove_var("_LEAKBENCH_TEST_VAR");
    }

    #[test]
    fn resolve_env_vars_fallback_and_unset() {
        assert_eq!(resolve_env_vars("${_LEAKBENCH_UNSET_VAR}"), "");
        assert_eq!(
            resolve_env_vars("${_LEAKBENCH_UNSET_VAR:-http://localhost:11434}/x"),
            "http://localhost:11434/x"
        );
        assert_eq!(resolve_env_vars("no vars ${unterminated"), "no vars ${unterminated");
    }

    #[test]
    fn default_config() {
        let config = LeakbenchConfig::default();
        assert_eq!(config.parallelism, 1);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.timeout_secs, 600);
        assert_eq!(config.output_dir, PathBuf::from("runs"));
        assert_eq!(config.generation.seed, Some(0));
        assert!(matches!(config.backend, BackendConfig::Ollama { .. }));
    }

    #[test]
    fn sample_config_parses() {
        let config = parse_config(SAMPLE_CONFIG).unwrap();
        assert_eq!(config.generation.num_ctx, 4096);
        assert_eq!(config.retry_delay_ms, 1000);
        let BackendConfig::Ollama { base_url } = &config.backend else {
            panic!("expected ollama backend");
        };
        assert!(base_url.starts_with("http"));
    }

    #[test]
    fn parse_partial_config() {
        let toml_str = r#"
parallelism = 4
output_dir = "out"

[backend]
type = "ollama"

[generation]
temperature = 0.7
"#;
        let config = parse_config(toml_str).unwrap();
        assert_eq!(config.parallelism, 4);
        assert_eq!(config.output_dir, PathBuf::from("out"));
        assert_eq!(config.generation.temperature, 0.7);
        assert_eq!(config.generation.top_p, 1.0);
        assert_eq!(
            config.backend,
            BackendConfig::Ollama {
                base_url: DEFAULT_BASE_URL.to_string()
            }
        );

        let engine = config.engine_config();
        assert_eq!(engine.parallelism, 4);
        assert_eq!(engine.options.temperature, 0.7);
        assert_eq!(engine.retry_delay, Duration::from_millis(1000));
    }

    #[test]
    fn mock_backend_config() {
        let config = parse_config("[backend]\ntype = \"mock\"\nresponse = \"A\"\n").unwrap();
        assert_eq!(
            config.backend,
            BackendConfig::Mock {
                response: "A".into()
            }
        );
        let backend = create_backend(&config.backend, config.timeout()).unwrap();
        assert_eq!(backend.name(), "mock");
    }

    #[test]
    fn unknown_backend_type_rejected() {
        assert!(parse_config("[backend]\ntype = \"openai\"\n").is_err());
    }

    #[test]
    fn explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "max_retries = 7\n").unwrap();

        let config = load_config_from(Some(&path)).unwrap();
        assert_eq!(config.max_retries, 7);

        let missing = dir.path().join("missing.toml");
        let err = load_config_from(Some(&missing)).unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }

    #[test]
    fn set_base_url_only_touches_ollama() {
        let mut config = LeakbenchConfig::default();
        config.set_base_url("http://gpu-box:11434");
        assert_eq!(
            config.backend,
            BackendConfig::Ollama {
                base_url: "http://gpu-box:11434".into()
            }
        );

        config.backend = BackendConfig::Mock {
            response: String::new(),
        };
        config.set_base_url("http://elsewhere");
        assert!(matches!(config.backend, BackendConfig::Mock { .. }));
    }
}
