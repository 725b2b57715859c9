use std::env;
use std::path::PathBuf;

/// Which embedding backend the semantic tool index uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedderMode {
    /// ONNX bi-encoder loaded from `EMBEDDING_MODEL_PATH`.
    Onnx,
    /// Deterministic feature-hashing embedder, no model files needed.
    Hashing,
    /// ONNX when the model and tokenizer files exist, hashing otherwise.
    Auto,
}

impl EmbedderMode {
    pub fn from_env() -> Self {
        match env::var("TOOLHUB_EMBEDDER")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "onnx" | "model" | "bi-encoder" => Self::Onnx,
            "hashing" | "hash" | "lexical" => Self::Hashing,
            _ => Self::Auto,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
    /// Root that relative paths in file, shell and storage capabilities resolve against.
    pub workspace_dir: PathBuf,
    /// Directory holding route handler scripts for the path router.
    pub routes_dir: PathBuf,
    /// When set, a route sub-server is started on this port at boot.
    pub routes_port: Option<u16>,
    /// Interpreter used to execute route handler scripts.
    pub route_interpreter: String,
    /// File extension of route handler scripts (without the dot).
    pub route_extension: String,
    pub route_timeout_secs: u64,
    /// Wall-clock limit for shell and python subprocess capabilities.
    pub shell_timeout_secs: u64,
    pub kv_default_path: PathBuf,
    pub embedder_mode: EmbedderMode,
    pub embedding_model_path: PathBuf,
    pub embedding_tokenizer_path: PathBuf,
    pub embedding_dim: usize,
    pub embedding_max_length: usize,
    /// Optional override for the ONNX session pool size. If None, uses CPU count.
    pub embedding_pool_size: Option<usize>,
    /// Binary snapshot of the tool embedding matrix.
    pub embeddings_cache_path: PathBuf,
    pub default_search_limit: usize,
    pub max_search_limit: usize,
    pub hcloud_token: Option<String>,
    pub hcloud_api_url: String,
    pub jupyter_url: String,
    pub jupyter_token: Option<String>,
    pub resend_api_key: Option<String>,
    pub resend_api_url: String,
    pub fetch_timeout_secs: u64,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()?,
            shutdown_timeout_secs: env::var("SHUTDOWN_TIMEOUT")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,
            workspace_dir: PathBuf::from(
                env::var("WORKSPACE_DIR").unwrap_or_else(|_| ".".to_string()),
            ),
            routes_dir: PathBuf::from(
                env::var("ROUTES_DIR").unwrap_or_else(|_| "./routes".to_string()),
            ),
            routes_port: match env::var("ROUTES_PORT") {
                Ok(port) => Some(port.parse()?),
                Err(_) => None,
            },
            route_interpreter: env::var("ROUTE_INTERPRETER")
                .unwrap_or_else(|_| "python3".to_string()),
            route_extension: env::var("ROUTE_EXTENSION")
                .map(|ext| ext.trim_start_matches('.').to_string())
                .unwrap_or_else(|_| "py".to_string()),
            route_timeout_secs: env::var("ROUTE_TIMEOUT")
                .unwrap_or_else(|_| "30".to_string())
                .parse()?,
            shell_timeout_secs: env::var("SHELL_TIMEOUT")
                .unwrap_or_else(|_| "30".to_string())
                .parse()?,
            kv_default_path: PathBuf::from(
                env::var("KV_DEFAULT_PATH").unwrap_or_else(|_| "kv.db".to_string()),
            ),
            embedder_mode: EmbedderMode::from_env(),
            embedding_model_path: PathBuf::from(
                env::var("EMBEDDING_MODEL_PATH")
                    .unwrap_or_else(|_| "./models/model.onnx".to_string()),
            ),
            embedding_tokenizer_path: PathBuf::from(
                env::var("EMBEDDING_TOKENIZER_PATH")
                    .unwrap_or_else(|_| "./models/tokenizer.json".to_string()),
            ),
            embedding_dim: env::var("EMBEDDING_DIM")
                .unwrap_or_else(|_| "384".to_string())
                .parse()?,
            embedding_max_length: env::var("EMBEDDING_MAX_LENGTH")
                .unwrap_or_else(|_| "256".to_string())
                .parse()?,
            embedding_pool_size: env::var("EMBEDDING_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok()),
            embeddings_cache_path: PathBuf::from(
                env::var("EMBEDDINGS_CACHE_PATH")
                    .unwrap_or_else(|_| ".toolhub/embeddings.bin".to_string()),
            ),
            default_search_limit: positive(
                "DEFAULT_SEARCH_LIMIT",
                &env::var("DEFAULT_SEARCH_LIMIT").unwrap_or_else(|_| "5".to_string()),
            )?,
            max_search_limit: positive(
                "MAX_SEARCH_LIMIT",
                &env::var("MAX_SEARCH_LIMIT").unwrap_or_else(|_| "50".to_string()),
            )?,
            hcloud_token: non_empty_var("HCLOUD_TOKEN"),
            hcloud_api_url: env::var("HCLOUD_API_URL")
                .unwrap_or_else(|_| "https://api.hetzner.cloud/v1".to_string()),
            jupyter_url: env::var("JUPYTER_URL")
                .unwrap_or_else(|_| "http://localhost:8888".to_string()),
            jupyter_token: non_empty_var("JUPYTER_TOKEN"),
            resend_api_key: non_empty_var("RESEND_API_KEY"),
            resend_api_url: env::var("RESEND_API_URL")
                .unwrap_or_else(|_| "https://api.resend.com".to_string()),
            fetch_timeout_secs: env::var("FETCH_TIMEOUT")
                .unwrap_or_else(|_| "30".to_string())
                .parse()?,
        })
    }

    /// Configuration rooted at `workspace` with no credentials and the hashing
    /// embedder. Used by tests and embedding applications.
    pub fn for_workspace(workspace: impl Into<PathBuf>) -> Self {
        let workspace = workspace.into();
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            shutdown_timeout_secs: 0,
            routes_dir: workspace.join("routes"),
            routes_port: None,
            route_interpreter: "sh".to_string(),
            route_extension: "sh".to_string(),
            route_timeout_secs: 10,
            shell_timeout_secs: 30,
            kv_default_path: PathBuf::from("kv.db"),
            embedder_mode: EmbedderMode::Hashing,
            embedding_model_path: workspace.join("models/model.onnx"),
            embedding_tokenizer_path: workspace.join("models/tokenizer.json"),
            embedding_dim: 384,
            embedding_max_length: 256,
            embedding_pool_size: Some(1),
            embeddings_cache_path: workspace.join(".toolhub/embeddings.bin"),
            default_search_limit: 5,
            max_search_limit: 50,
            hcloud_token: None,
            hcloud_api_url: "https://api.hetzner.cloud/v1".to_string(),
            jupyter_url: "http://localhost:8888".to_string(),
            jupyter_token: None,
            resend_api_key: None,
            resend_api_url: "https://api.resend.com".to_string(),
            fetch_timeout_secs: 30,
            workspace_dir: workspace,
        }
    }

    /// Resolve a caller-supplied path against the workspace directory.
    /// Absolute paths are returned unchanged.
    pub fn resolve_path(&self, path: impl AsRef<std::path::Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace_dir.join(path)
        }
    }

    /// Whether the ONNX embedder should be loaded for the current mode.
    pub fn use_onnx_embedder(&self) -> bool {
        match self.embedder_mode {
            EmbedderMode::Onnx => true,
            EmbedderMode::Hashing => false,
            EmbedderMode::Auto => {
                self.embedding_model_path.exists() && self.embedding_tokenizer_path.exists()
            }
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn positive(name: &str, raw: &str) -> anyhow::Result<usize> {
    let value: usize = raw.trim().parse()?;
    if value == 0 {
        anyhow::bail!("{} must be at least 1", name);
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_path_relative_and_absolute() {
        let config = Config::for_workspace("/srv/work");
        assert_eq!(config.resolve_path("a/b.txt"), PathBuf::from("/srv/work/a/b.txt"));
        assert_eq!(config.resolve_path("/etc/hosts"), PathBuf::from("/etc/hosts"));
    }

    #[test]
    fn test_workspace_config_uses_hashing_embedder() {
        let config = Config::for_workspace("/tmp/none");
        assert_eq!(config.embedder_mode, EmbedderMode::Hashing);
        assert!(!config.use_onnx_embedder());
        assert_eq!(config.routes_dir, PathBuf::from("/tmp/none/routes"));
    }

    #[test]
    fn test_search_limits_must_be_positive() {
        assert_eq!(positive("MAX_SEARCH_LIMIT", "50").unwrap(), 50);
        let err = positive("MAX_SEARCH_LIMIT", "0").unwrap_err();
        assert!(err.to_string().contains("MAX_SEARCH_LIMIT"));
        assert!(positive("MAX_SEARCH_LIMIT", "-3").is_err());
    }
}
