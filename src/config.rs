//! Configuration from environment variables

use crate::llm::{DecodingConfig, ToolName, DEFAULT_BASE_URL, DEFAULT_LOCAL_BASE_URL, DEFAULT_MODEL};
use crate::media::DEFAULT_IMAGE_MODEL;
use crate::probe::DEFAULT_PROBE_TIMEOUT;
use crate::state_machine::state::DEFAULT_MAX_TOOL_ROUNDS;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 8000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("unknown tool in ENABLED_TOOLS: {0}")]
    UnknownTool(String),
}

/// `OpenAI`-compatible remote endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub stream: bool,
}

/// Local inference server; absent unless `LOCAL_MODEL` is set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalConfig {
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaConfig {
    pub fal_key: Option<String>,
    pub image_model: String,
    pub video_model: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub remote: RemoteConfig,
    /// Prompt gateway used when no remote API key is configured
    pub gateway_url: Option<String>,
    pub local: Option<LocalConfig>,
    pub media: MediaConfig,
    pub decoding: DecodingConfig,
    pub enabled_tools: Vec<ToolName>,
    pub probe_timeout: Duration,
    pub max_tool_rounds: u32,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source; empty values count as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let remote = RemoteConfig {
            api_key: var("REMOTE_API_KEY").or_else(|| var("GROQ_API_KEY")),
            base_url: var("REMOTE_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: var("REMOTE_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            stream: parse_var("REMOTE_STREAM", var("REMOTE_STREAM"), true)?,
        };

        let local = var("LOCAL_MODEL").map(|model| LocalConfig {
            base_url: var("LOCAL_BASE_URL").unwrap_or_else(|| DEFAULT_LOCAL_BASE_URL.to_string()),
            model,
        });

        let media = MediaConfig {
            fal_key: var("FAL_KEY"),
            image_model: var("FAL_IMAGE_MODEL").unwrap_or_else(|| DEFAULT_IMAGE_MODEL.to_string()),
            video_model: var("FAL_VIDEO_MODEL"),
        };

        let defaults = DecodingConfig::default();
        let decoding = DecodingConfig {
            temperature: parse_var("DECODE_TEMPERATURE", var("DECODE_TEMPERATURE"), defaults.temperature)?,
            top_p: parse_var("DECODE_TOP_P", var("DECODE_TOP_P"), defaults.top_p)?,
            max_tokens: match var("DECODE_MAX_TOKENS") {
                Some(raw) => Some(parse_value("DECODE_MAX_TOKENS", &raw)?),
                None => defaults.max_tokens,
            },
        };
        if !(0.0..=1.0).contains(&decoding.top_p) {
            return Err(ConfigError::Invalid {
                var: "DECODE_TOP_P",
                value: decoding.top_p.to_string(),
                reason: "must be within [0, 1]".to_string(),
            });
        }

        let enabled_tools = match var("ENABLED_TOOLS") {
            Some(raw) => parse_tools(&raw)?,
            None => ToolName::ALL.to_vec(),
        };

        let probe_secs = parse_var(
            "PROBE_TIMEOUT_SECS",
            var("PROBE_TIMEOUT_SECS"),
            DEFAULT_PROBE_TIMEOUT.as_secs(),
        )?;

        Ok(Self {
            remote,
            gateway_url: var("GATEWAY_URL"),
            local,
            media,
            decoding,
            enabled_tools,
            probe_timeout: Duration::from_secs(probe_secs),
            max_tool_rounds: parse_var("MAX_TOOL_ROUNDS", var("MAX_TOOL_ROUNDS"), DEFAULT_MAX_TOOL_ROUNDS)?,
            port: parse_var("HYBRID_CHAT_PORT", var("HYBRID_CHAT_PORT"), DEFAULT_PORT)?,
        })
    }

    /// Whether any remote backend is configured
    pub fn has_remote(&self) -> bool {
        self.remote.api_key.is_some() || self.gateway_url.is_some()
    }
}

fn parse_value<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        var: name,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn parse_var<T>(name: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(raw) => parse_value(name, &raw),
        None => Ok(default),
    }
}

fn parse_tools(raw: &str) -> Result<Vec<ToolName>, ConfigError> {
    let mut tools = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        let tool = ToolName::from_wire(name).ok_or_else(|| ConfigError::UnknownTool(name.to_string()))?;
        if !tools.contains(&tool) {
            tools.push(tool);
        }
    }
    Ok(tools)
}
