//! Configuration types.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::{LlmBackend, LlmConfig};
use crate::workflow::create_capability::DEFAULT_MAX_REJECTIONS;
use crate::workflow::engine::DEFAULT_MAX_STEPS;

/// Capability invoked when the backend selects nothing.
pub const DEFAULT_FALLBACK: &str = "answer_question";

/// Tags offered on a turn that names none.
pub const DEFAULT_TAGS: &[&str] = &["triage", "agent", "money", "math"];

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct HiveConfig {
    pub llm: LlmConfig,
    /// Generated capabilities and the dependency manifest live here.
    pub workspace_dir: PathBuf,
    /// Sandbox root for `read_file` / `write_file`.
    pub files_dir: PathBuf,
    pub http_addr: SocketAddr,
    /// Suspended sessions, unclaimed streams and idle threads older than this are reaped.
    pub session_ttl: Duration,
    pub reaper_interval: Duration,
    pub max_rejections: u32,
    pub max_steps: usize,
    pub default_tags: Vec<String>,
    /// `None` answers directly with the backend's reply.
    pub fallback: Option<String>,
    /// Daily rolling log files are written here when set.
    pub log_dir: Option<PathBuf>,
}

impl HiveConfig {
    /// Read configuration from `HIVE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let backend: LlmBackend = env_or("HIVE_LLM_BACKEND", "anthropic").parse()?;
        let api_key = std::env::var(backend.api_key_var())
            .map_err(|_| ConfigError::MissingEnvVar(backend.api_key_var().to_string()))?;
        let model = env_or("HIVE_MODEL", backend.default_model());

        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        let workspace_dir = std::env::var("HIVE_WORKSPACE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(&home).join(".hive-mind/workspace"));
        let files_dir = std::env::var("HIVE_FILES_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| workspace_dir.join("files"));

        let port: u16 = parse_env("HIVE_HTTP_PORT", 8080)?;
        let http_addr = match std::env::var("HIVE_HTTP_ADDR") {
            Ok(raw) => raw.parse().map_err(|e| ConfigError::InvalidValue {
                key: "HIVE_HTTP_ADDR".to_string(),
                message: format!("{e}"),
            })?,
            Err(_) => SocketAddr::from(([127, 0, 0, 1], port)),
        };

        let fallback = match std::env::var("HIVE_FALLBACK") {
            Ok(name) if name.trim().is_empty() || name.trim() == "none" => None,
            Ok(name) => Some(name.trim().to_string()),
            Err(_) => Some(DEFAULT_FALLBACK.to_string()),
        };

        Ok(Self {
            llm: LlmConfig {
                backend,
                api_key: SecretString::from(api_key),
                model,
            },
            workspace_dir,
            files_dir,
            http_addr,
            session_ttl: Duration::from_secs(parse_env("HIVE_SESSION_TTL_SECS", 3600)?),
            reaper_interval: Duration::from_secs(parse_env("HIVE_REAPER_INTERVAL_SECS", 60)?),
            max_rejections: parse_env("HIVE_MAX_REJECTIONS", DEFAULT_MAX_REJECTIONS)?,
            max_steps: parse_env("HIVE_MAX_STEPS", DEFAULT_MAX_STEPS)?,
            default_tags: std::env::var("HIVE_DEFAULT_TAGS")
                .map(|raw| parse_tags(&raw))
                .unwrap_or_else(|_| DEFAULT_TAGS.iter().map(|t| t.to_string()).collect()),
            fallback,
            log_dir: std::env::var("HIVE_LOG_DIR").ok().map(PathBuf::from),
        })
    }
}

/// Split a comma-separated tag list, dropping blanks.
pub fn parse_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{raw}': {e}"),
        }),
        Err(_) => Ok(default),
    }
}
