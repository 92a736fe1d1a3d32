use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Keep-alive floor for idle connections; research answers can take minutes.
pub const MIN_KEEP_ALIVE: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineBackend {
    /// The `claude` CLI in stream-json mode with web tools.
    #[default]
    Claude,
    /// A local Ollama server over its chat API.
    Ollama,
}

impl EngineBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Ollama => "ollama",
        }
    }
}

impl fmt::Display for EngineBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "claude" => Ok(Self::Claude),
            "ollama" => Ok(Self::Ollama),
            other => Err(format!("unknown backend {other:?} (expected claude or ollama)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Service configuration.
/// Each key is read from the process environment, then `.env`, then defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub web_bind: String,
    pub web_port: u16,
    pub keep_alive: Duration,

    pub backend: EngineBackend,
    pub model: String,
    pub claude_bin: String,
    pub claude_workdir: PathBuf,
    pub ollama_url: String,
    pub ollama_model: String,

    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_map(&HashMap::new())
    }
}

impl Config {
    pub fn from_env() -> Self {
        let dotenv = parse_dotenv(Path::new(".env"));
        Self::resolve(|key| std::env::var(key).ok().or_else(|| dotenv.get(key).cloned()))
    }

    /// Build from a key/value map only, ignoring the process environment.
    pub fn from_map(values: &HashMap<String, String>) -> Self {
        Self::resolve(|key| values.get(key).cloned())
    }

    fn resolve(get: impl Fn(&str) -> Option<String>) -> Self {
        let get_str = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let keep_alive_s: u64 = get("KEEP_ALIVE_S")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(MIN_KEEP_ALIVE.as_secs());

        let backend = match get("BACKEND") {
            Some(raw) => raw.parse().unwrap_or_else(|e: String| {
                tracing::warn!("{e}; falling back to claude");
                EngineBackend::Claude
            }),
            None => EngineBackend::default(),
        };

        let log_format = match get("LOG_FORMAT").as_deref().map(str::trim) {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Self {
            web_bind: get_str("WEB_BIND", "0.0.0.0"),
            web_port: get("WEB_PORT").and_then(|v| v.trim().parse().ok()).unwrap_or(8000),
            keep_alive: Duration::from_secs(keep_alive_s).max(MIN_KEEP_ALIVE),
            backend,
            model: get_str("MODEL", "sonnet"),
            claude_bin: get_str("CLAUDE_BIN", "claude"),
            claude_workdir: resolve_tilde(&get_str("CLAUDE_WORKDIR", "/tmp/nyaya")),
            ollama_url: get_str("OLLAMA_URL", "http://localhost:11434"),
            ollama_model: get_str("OLLAMA_MODEL", "llama3.1"),
            log_format,
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.web_bind, self.web_port)
    }
}

/// Parse `KEY=VALUE` lines; blank lines and `#` comments are skipped and a
/// missing file yields an empty map.
pub fn parse_dotenv(path: &Path) -> HashMap<String, String> {
    let mut map = HashMap::new();
    let Ok(contents) = std::fs::read_to_string(path) else {
        return map;
    };
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        if let Some((k, v)) = line.split_once('=') {
            let v = v.trim();
            let v = v
                .strip_prefix('"')
                .and_then(|s| s.strip_suffix('"'))
                .unwrap_or(v);
            map.insert(k.trim().to_string(), v.to_string());
        }
    }
    map
}

fn resolve_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return Path::new(&home).join(rest);
        }
    }
    PathBuf::from(path)
}
