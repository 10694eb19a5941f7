//! Configuration types for the voice agent.
//!
//! A [`VoiceAgentConfig`] is built once at startup (TOML file, then
//! environment overlay) and handed to every session explicitly.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, SpeechError};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceAgentConfig {
    /// Streaming speech recognition.
    pub asr: AsrConfig,
    /// Streaming speech synthesis.
    pub tts: TtsConfig,
    /// Chat completions endpoint.
    pub llm: LlmConfig,
    /// Reasoning loop limits.
    pub agent: AgentLoopConfig,
    /// Session orchestration.
    pub session: SessionConfig,
    /// Built-in tools.
    pub tools: ToolsConfig,
    /// Skill discovery.
    pub skills: SkillsConfig,
    /// Identity and memory files.
    pub memory: MemoryConfig,
    /// HTTP / WebSocket server.
    pub server: ServerConfig,
}

/// Soniox realtime ASR configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AsrConfig {
    /// API key sent in the initial config frame.
    pub api_key: String,
    /// WebSocket endpoint.
    pub ws_url: String,
    /// Recognition model.
    pub model: String,
    /// Expected languages.
    pub language_hints: Vec<String>,
    /// Input sample rate in Hz (PCM s16le).
    pub sample_rate: u32,
    /// Input channel count.
    pub num_channels: u16,
    /// Overall connect budget per attempt.
    pub connect_timeout_ms: u64,
    /// WebSocket opening handshake timeout.
    pub open_timeout_ms: u64,
    /// Graceful close timeout.
    pub close_timeout_ms: u64,
    /// Keepalive ping interval.
    pub keepalive_secs: u64,
    /// HTTP proxy (`http://host:port`). Falls back to `HTTPS_PROXY` / `ALL_PROXY`.
    pub proxy: Option<String>,
}

impl Default for AsrConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            ws_url: "wss://stt-rt.soniox.com/transcribe-websocket".to_owned(),
            model: "stt-rt-v4".to_owned(),
            language_hints: vec!["zh".to_owned(), "en".to_owned()],
            sample_rate: 16_000,
            num_channels: 1,
            connect_timeout_ms: 12_000,
            open_timeout_ms: 10_000,
            close_timeout_ms: 5_000,
            keepalive_secs: 20,
            proxy: None,
        }
    }
}

/// Qwen realtime TTS (DashScope) configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// DashScope API key.
    pub api_key: String,
    /// Realtime WebSocket endpoint.
    pub ws_url: String,
    /// Synthesis model.
    pub model: String,
    /// Voice identifier.
    pub voice: String,
    /// Output sample rate in Hz (PCM s16le mono).
    pub sample_rate: u32,
    /// How long to wait for `session.finished` after the last text.
    pub finish_timeout_secs: u64,
    /// Worker poll interval for new text and server events.
    pub text_poll_ms: u64,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            ws_url: "wss://dashscope-intl.aliyuncs.com/api-ws/v1/realtime".to_owned(),
            model: "qwen3-tts-vc-realtime-2026-01-15".to_owned(),
            voice: "qwen-tts-vc-guanyu-voice-20260202204902188-2ed0".to_owned(),
            sample_rate: 24_000,
            finish_timeout_secs: 30,
            text_poll_ms: 50,
        }
    }
}

/// OpenAI-compatible LLM endpoint configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// API root including version, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    /// Bearer token.
    pub api_key: String,
    /// Model identifier.
    pub model: String,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Generation cap per call.
    pub max_tokens: Option<u32>,
    /// Whole-request timeout.
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            model: String::new(),
            temperature: None,
            max_tokens: None,
            request_timeout_secs: 120,
        }
    }
}

/// Reasoning loop limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentLoopConfig {
    /// Model calls allowed to return tool calls before forcing a text answer.
    pub max_tool_rounds: u32,
    /// Characters of tool output included in `tool_result` events.
    pub tool_result_preview_chars: usize,
    /// Hard timeout for one tool execution.
    pub tool_timeout_secs: u64,
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: 5,
            tool_result_preview_chars: 2000,
            tool_timeout_secs: 30,
        }
    }
}

/// Session orchestration parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Identical utterances inside this window are dropped.
    pub dedup_window_ms: u64,
    /// Utterance wait timeout; bounds how long stop takes to be observed.
    pub utterance_poll_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            dedup_window_ms: 2500,
            utterance_poll_ms: 1000,
        }
    }
}

/// Built-in tool configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Explicit allow-list. `None` enables the default set.
    pub enabled: Option<Vec<String>>,
    /// Permit `run_command`.
    pub allow_shell: bool,
    /// Permit `run_python`.
    pub python_exec_enabled: bool,
    /// Interpreter used by `run_python`.
    pub python_bin: String,
    /// Timeout for shell and python execution.
    pub command_timeout_secs: u64,
    /// Working directory for relative paths and commands.
    pub workspace_dir: PathBuf,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            enabled: None,
            allow_shell: false,
            python_exec_enabled: true,
            python_bin: "python3".to_owned(),
            command_timeout_secs: 30,
            workspace_dir: PathBuf::from("."),
        }
    }
}

/// Skill discovery configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkillsConfig {
    /// Directories scanned for `<name>/SKILL.md`.
    pub dirs: Vec<PathBuf>,
}

impl Default for SkillsConfig {
    fn default() -> Self {
        Self {
            dirs: vec![PathBuf::from("skills")],
        }
    }
}

/// Identity and memory store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Directory holding `SOUL.md`, `USER.md`, `AGENT.md`, `MEMORY.md`.
    pub soul_dir: PathBuf,
    /// Default budget for `recall_memory`.
    pub recall_max_chars: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            soul_dir: PathBuf::from("soul"),
            recall_max_chars: 4000,
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address.
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".to_owned(),
        }
    }
}

impl VoiceAgentConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| SpeechError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| SpeechError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `<config dir>/tinyagent/config.toml`.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp/tinyagent-config"))
            .join("tinyagent")
            .join("config.toml")
    }

    /// File (when it exists) overlaid with the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::default_config_path);
        let mut config = if path.exists() {
            tracing::info!(path = %path.display(), "loading config file");
            Self::from_file(&path)?
        } else {
            Self::default()
        };
        config.apply_env_from(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Overlay deployment environment variables using `lookup`.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("SONIOX_API_KEY") {
            self.asr.api_key = v;
        }
        if let Some(v) = get("SONIOX_WS_URL") {
            self.asr.ws_url = v;
        }
        if let Some(v) = get("DASHSCOPE_API_KEY") {
            self.tts.api_key = v;
        }
        if let Some(v) = get("TTS_VOICE_ID") {
            self.tts.voice = v;
        }
        if let Some(v) = get("TTS_MODEL") {
            self.tts.model = v;
        }
        if let Some(v) = get("TTS_WS_URL") {
            self.tts.ws_url = v;
        }
        if let Some(v) = get("LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = get("LLM_API_KEY") {
            self.llm.api_key = v;
        }
        if let Some(v) = get("LLM_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = get("SKILLS_DIRS") {
            self.skills.dirs = split_list(&v).into_iter().map(PathBuf::from).collect();
        }
        if let Some(v) = get("TOOLS_ENABLED") {
            self.tools.enabled = Some(split_list(&v));
        }
        if let Some(v) = get("AGENT_MAX_TOOL_ROUNDS") {
            match v.trim().parse() {
                Ok(n) => self.agent.max_tool_rounds = n,
                Err(_) => tracing::warn!(value = %v, "ignoring invalid AGENT_MAX_TOOL_ROUNDS"),
            }
        }
        if let Some(v) = get("TOOLS_ALLOW_SHELL") {
            self.tools.allow_shell = parse_flag(&v);
        }
        if let Some(v) = get("PYTHON_EXEC_ENABLED") {
            self.tools.python_exec_enabled = parse_flag(&v);
        }
        if let Some(v) = get("SOUL_DIR") {
            self.memory.soul_dir = PathBuf::from(v);
        }
        if let Some(v) = get("BIND_ADDR") {
            self.server.bind_addr = v;
        }
    }

    /// Soniox credentials present.
    pub fn asr_configured(&self) -> bool {
        !self.asr.api_key.is_empty()
    }

    /// LLM endpoint, key and model all present.
    pub fn llm_configured(&self) -> bool {
        !self.llm.base_url.is_empty() && !self.llm.api_key.is_empty() && !self.llm.model.is_empty()
    }

    /// DashScope key and voice present.
    pub fn tts_configured(&self) -> bool {
        !self.tts.api_key.is_empty() && !self.tts.voice.is_empty()
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_deployment_values() {
        let config = VoiceAgentConfig::default();
        assert_eq!(config.agent.max_tool_rounds, 5);
        assert_eq!(config.session.dedup_window_ms, 2500);
        assert_eq!(config.asr.model, "stt-rt-v4");
        assert_eq!(config.asr.sample_rate, 16_000);
        assert_eq!(config.tts.sample_rate, 24_000);
        assert!(!config.tools.allow_shell);
        assert!(config.tools.python_exec_enabled);
        assert!(!config.llm_configured());
    }

    #[test]
    fn env_overlay_applies_known_keys() {
        let env: HashMap<&str, &str> = [
            ("SONIOX_API_KEY", "sx"),
            ("LLM_BASE_URL", "https://llm.example/v1"),
            ("LLM_API_KEY", "sk"),
            ("LLM_MODEL", "qwen-plus"),
            ("DASHSCOPE_API_KEY", "ds"),
            ("SKILLS_DIRS", "skills, extra/skills ,"),
            ("TOOLS_ENABLED", "calculate,get_datetime"),
            ("AGENT_MAX_TOOL_ROUNDS", "3"),
            ("TOOLS_ALLOW_SHELL", "TRUE"),
            ("PYTHON_EXEC_ENABLED", "0"),
        ]
        .into_iter()
        .collect();

        let mut config = VoiceAgentConfig::default();
        config.apply_env_from(|k| env.get(k).map(|v| (*v).to_owned()));

        assert!(config.asr_configured());
        assert!(config.llm_configured());
        assert!(config.tts_configured());
        assert_eq!(
            config.skills.dirs,
            vec![PathBuf::from("skills"), PathBuf::from("extra/skills")]
        );
        assert_eq!(
            config.tools.enabled,
            Some(vec!["calculate".to_owned(), "get_datetime".to_owned()])
        );
        assert_eq!(config.agent.max_tool_rounds, 3);
        assert!(config.tools.allow_shell);
        assert!(!config.tools.python_exec_enabled);
    }

    #[test]
    fn invalid_number_is_ignored() {
        let mut config = VoiceAgentConfig::default();
        config.apply_env_from(|k| (k == "AGENT_MAX_TOOL_ROUNDS").then(|| "many".to_owned()));
        assert_eq!(config.agent.max_tool_rounds, 5);
    }

    #[test]
    fn blank_env_values_do_not_override() {
        let mut config = VoiceAgentConfig::default();
        config.apply_env_from(|k| (k == "TTS_VOICE_ID").then(|| "  ".to_owned()));
        assert_eq!(config.tts.voice, TtsConfig::default().voice);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = VoiceAgentConfig::default();
        config.llm.model = "qwen-max".to_owned();
        config.session.dedup_window_ms = 4000;
        config.save_to_file(&path).unwrap();

        let loaded = VoiceAgentConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[agent]\nmax_tool_rounds = 2\n").unwrap();

        let loaded = VoiceAgentConfig::from_file(&path).unwrap();
        assert_eq!(loaded.agent.max_tool_rounds, 2);
        assert_eq!(loaded.agent.tool_timeout_secs, 30);
        assert_eq!(loaded.server.bind_addr, "0.0.0.0:8000");
    }

    #[test]
    fn invalid_toml_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "this is not valid toml {{{").unwrap();
        assert!(VoiceAgentConfig::from_file(&path).is_err());
    }

    #[test]
    fn default_config_path_ends_with_config_toml() {
        let path = VoiceAgentConfig::default_config_path();
        let path_str = path.to_string_lossy();
        assert!(path_str.ends_with("config.toml"));
        assert!(path_str.contains("tinyagent"));
    }
}
