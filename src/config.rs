use std::path::PathBuf;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "llama3.2";
const DEFAULT_PROJECTS_ROOT: &str = "projects";

/// Settings for the upstream AI provider, passed explicitly into every
/// invocation instead of being read from ambient state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OLLAMA_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub projects_root: PathBuf,
    pub upstream: UpstreamConfig,
}

impl AppConfig {
    /// Reads configuration from the process environment, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let port = lookup("PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        let projects_root = lookup("PROJECTS_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PROJECTS_ROOT));
        let upstream = UpstreamConfig {
            base_url: lookup("OLLAMA_API_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OLLAMA_BASE_URL.to_string()),
            model: lookup("OLLAMA_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_key: lookup("UPSTREAM_API_KEY").filter(|k| !k.trim().is_empty()),
        };
        Self { port, projects_root, upstream }
    }
}

/// Where the CLI client finds the chat server.
pub fn server_url_from_env() -> String {
    std::env::var("CHAT_SERVER_URL").unwrap_or_else(|_| format!("http://localhost:{DEFAULT_PORT}"))
}
