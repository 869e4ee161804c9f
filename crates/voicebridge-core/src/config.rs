//! Configuration loading and validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level voice gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pbx: Option<PbxConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_service: Option<AgentServiceConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub vad: Option<VadConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentence: Option<SentenceConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistence: Option<PersistenceConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin: Option<AdminConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

/// PBX-facing framed-socket relay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PbxConfig {
    #[serde(default = "default_pbx_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,
}

fn default_pbx_port() -> u16 {
    9092
}

impl Default for PbxConfig {
    fn default() -> Self {
        Self {
            port: default_pbx_port(),
            bind: None,
        }
    }
}

/// Remote conversational-agent service connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentServiceConfig {
    /// Base WebSocket URL, e.g. "wss://agent.example.com/ws". The session id
    /// is appended as a path segment: `<url>/<session_id>`.
    pub url: String,

    /// Keepalive ping interval, in seconds.
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,

    /// Connect timeout, in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_ping_interval_secs() -> u64 {
    20
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

/// VAD, endpointing, and barge-in tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadConfig {
    #[serde(default = "default_speech_threshold")]
    pub speech_threshold: f64,

    #[serde(default = "default_silence_timeout_ms")]
    pub silence_timeout_ms: u64,

    #[serde(default = "default_min_speech_duration_ms")]
    pub min_speech_duration_ms: u64,

    #[serde(default = "default_min_bargein_speech_chunks")]
    pub min_bargein_speech_chunks: u32,

    #[serde(default = "default_min_audio_energy")]
    pub min_audio_energy: f64,

    #[serde(default = "default_preemphasis_alpha")]
    pub preemphasis_alpha: f64,
}

fn default_speech_threshold() -> f64 {
    0.45
}
fn default_silence_timeout_ms() -> u64 {
    1500
}
fn default_min_speech_duration_ms() -> u64 {
    300
}
fn default_min_bargein_speech_chunks() -> u32 {
    3
}
fn default_min_audio_energy() -> f64 {
    0.001
}
fn default_preemphasis_alpha() -> f64 {
    0.95
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            speech_threshold: default_speech_threshold(),
            silence_timeout_ms: default_silence_timeout_ms(),
            min_speech_duration_ms: default_min_speech_duration_ms(),
            min_bargein_speech_chunks: default_min_bargein_speech_chunks(),
            min_audio_energy: default_min_audio_energy(),
            preemphasis_alpha: default_preemphasis_alpha(),
        }
    }
}

/// Sentence segmenter tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentenceConfig {
    #[serde(default = "default_min_words")]
    pub min_words: usize,
}

fn default_min_words() -> usize {
    10
}

impl Default for SentenceConfig {
    fn default() -> Self {
        Self {
            min_words: default_min_words(),
        }
    }
}

/// Call-record persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

/// HTTP admin surface settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_admin_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,
}

fn default_admin_port() -> u16 {
    8089
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            port: default_admin_port(),
            bind: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "voicebridge_relay=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").unwrap();
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    /// Missing files yield a default configuration.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(crate::error::VoiceGatewayError::Io)?;
        let substituted = substitute_env_vars(&raw);

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| crate::error::VoiceGatewayError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Default config file path: `~/.voicebridge/config.json`.
    pub fn config_path() -> PathBuf {
        data_dir().join("config.json")
    }

    pub fn pbx_port(&self) -> u16 {
        self.pbx.as_ref().map(|p| p.port).unwrap_or(default_pbx_port())
    }

    pub fn pbx_bind(&self) -> String {
        self.pbx
            .as_ref()
            .and_then(|p| p.bind.clone())
            .unwrap_or_else(|| "0.0.0.0".to_string())
    }

    pub fn admin_port(&self) -> u16 {
        self.admin.as_ref().map(|a| a.port).unwrap_or(default_admin_port())
    }

    pub fn admin_bind(&self) -> String {
        self.admin
            .as_ref()
            .and_then(|a| a.bind.clone())
            .unwrap_or_else(|| "0.0.0.0".to_string())
    }

    pub fn agent_service_url(&self) -> Option<&str> {
        self.agent_service.as_ref().map(|a| a.url.as_str())
    }

    pub fn vad(&self) -> VadConfig {
        self.vad.clone().unwrap_or_default()
    }

    pub fn sentence(&self) -> SentenceConfig {
        self.sentence.clone().unwrap_or_default()
    }

    pub fn persistence_dir(&self) -> PathBuf {
        self.persistence
            .as_ref()
            .and_then(|p| p.dir.as_ref())
            .map(|d| PathBuf::from(shellexpand::tilde(d).as_ref()))
            .unwrap_or_else(|| data_dir().join("calls"))
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        match &self.agent_service {
            Some(svc) if svc.url.is_empty() => {
                errors.push("agent_service.url is empty".to_string());
            }
            None => {
                warnings.push("agent_service not configured; relay will have nothing to talk to".to_string());
            }
            _ => {}
        }

        if self.pbx_port() == 0 {
            errors.push("pbx.port cannot be 0".to_string());
        }
        if self.admin_port() == 0 {
            errors.push("admin.port cannot be 0".to_string());
        }

        (warnings, errors)
    }

    /// Save config to a file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Get a config value by dotted path (e.g. "pbx.port").
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// Set a config value by dotted path, creating intermediate objects as
    /// needed, and re-parse the result back into a typed `Config`.
    pub fn set_path(&mut self, path: &str, value: serde_json::Value) -> crate::error::Result<()> {
        let mut json = serde_json::to_value(&*self)?;
        let segments: Vec<&str> = path.split('.').collect();

        let mut current = &mut json;
        for segment in &segments[..segments.len() - 1] {
            if !current.is_object() {
                *current = serde_json::json!({});
            }
            current = current
                .as_object_mut()
                .expect("just coerced to object")
                .entry(segment.to_string())
                .or_insert_with(|| serde_json::json!({}));
        }
        if let Some(obj) = current.as_object_mut() {
            obj.insert(segments[segments.len() - 1].to_string(), value);
        }

        *self = serde_json::from_value(json)?;
        Ok(())
    }
}

/// Base directory for voice gateway data: `~/.voicebridge/`.
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".voicebridge")
}
