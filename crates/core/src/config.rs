use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

/// Where reuse candidates come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalKind {
    /// Corpus file loaded at startup, scanned in process.
    Local,
    /// Corpus streamed from a URL per request.
    Remote,
    /// Hosted vector index.
    Hosted,
}

impl RetrievalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
            Self::Hosted => "hosted",
        }
    }
}

impl FromStr for RetrievalKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            "hosted" => Ok(Self::Hosted),
            other => Err(format!("unknown retrieval kind: {other}")),
        }
    }
}

/// Service parameters. Read from `COPYDESK_*` environment variables; any key
/// that is missing or fails to parse keeps its default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceCfg {
    // listener
    pub port: u16,
    pub shutdown_timeout_secs: u64,

    // retrieval
    pub retrieval: RetrievalKind,
    pub corpus_path: PathBuf,
    pub corpus_url: Option<String>,
    pub index_host: Option<String>,
    pub index_api_key: Option<String>,
    pub index_namespace: Option<String>,
    pub reuse_k: usize,

    // generation
    pub max_new_suggestions: usize,
    pub temperature: f32,
    pub max_tokens: u32,

    // upstream calls
    pub request_timeout_secs: u64,
}

impl Default for ServiceCfg {
    fn default() -> Self {
        Self {
            port: 3000,
            shutdown_timeout_secs: 15,
            retrieval: RetrievalKind::Local,
            corpus_path: PathBuf::from("embedding.json"),
            corpus_url: None,
            index_host: None,
            index_api_key: None,
            index_namespace: None,
            reuse_k: 10,
            max_new_suggestions: 10,
            temperature: 0.5,
            max_tokens: 1024,
            request_timeout_secs: 60,
        }
    }
}

impl ServiceCfg {
    /// Load from the process environment.
    pub fn from_env() -> Self {
        let map: HashMap<String, String> = std::env::vars().collect();
        Self::from_map(&map)
    }

    pub fn from_map(m: &HashMap<String, String>) -> Self {
        let d = Self::default();
        // Bare PORT is what most hosting platforms set.
        let port = get_or(m, "PORT", d.port);
        Self {
            port: get_or(m, "COPYDESK_PORT", port),
            shutdown_timeout_secs: get_or(m, "COPYDESK_SHUTDOWN_TIMEOUT_SECS", d.shutdown_timeout_secs),
            retrieval: get_or(m, "COPYDESK_RETRIEVAL", d.retrieval),
            corpus_path: get_or(m, "COPYDESK_CORPUS_PATH", d.corpus_path),
            corpus_url: get_opt(m, "COPYDESK_CORPUS_URL"),
            index_host: get_opt(m, "COPYDESK_INDEX_HOST"),
            index_api_key: get_opt(m, "COPYDESK_INDEX_API_KEY"),
            index_namespace: get_opt(m, "COPYDESK_INDEX_NAMESPACE"),
            reuse_k: get_or(m, "COPYDESK_REUSE_K", d.reuse_k).max(1),
            max_new_suggestions: get_or(m, "COPYDESK_MAX_NEW_SUGGESTIONS", d.max_new_suggestions).max(1),
            temperature: get_or(m, "COPYDESK_TEMPERATURE", d.temperature),
            max_tokens: get_or(m, "COPYDESK_MAX_TOKENS", d.max_tokens),
            request_timeout_secs: get_or(m, "COPYDESK_REQUEST_TIMEOUT_SECS", d.request_timeout_secs),
        }
    }

    /// Effective settings for startup logging. Secrets are masked.
    pub fn to_entries(&self) -> Vec<(&'static str, String)> {
        fn opt(v: &Option<String>) -> String {
            v.clone().unwrap_or_else(|| "-".into())
        }
        vec![
            ("port", self.port.to_string()),
            ("shutdown_timeout_secs", self.shutdown_timeout_secs.to_string()),
            ("retrieval", self.retrieval.as_str().to_owned()),
            ("corpus_path", self.corpus_path.display().to_string()),
            ("corpus_url", opt(&self.corpus_url)),
            ("index_host", opt(&self.index_host)),
            ("index_api_key", self.index_api_key.as_ref().map_or("-", |_| "***").to_owned()),
            ("index_namespace", opt(&self.index_namespace)),
            ("reuse_k", self.reuse_k.to_string()),
            ("max_new_suggestions", self.max_new_suggestions.to_string()),
            ("temperature", self.temperature.to_string()),
            ("max_tokens", self.max_tokens.to_string()),
            ("request_timeout_secs", self.request_timeout_secs.to_string()),
        ]
    }
}

fn get_or<T: FromStr>(map: &HashMap<String, String>, key: &str, default: T) -> T {
    map.get(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn get_opt(map: &HashMap<String, String>, key: &str) -> Option<String> {
    map.get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}
