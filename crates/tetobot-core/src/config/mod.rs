use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Highest numbered `OPENAI_API_KEY_<n>` variable that is read.
pub const MAX_ENV_KEYS: usize = 10;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

pub const DEFAULT_SYSTEM_PROMPT: &str = "คุณคือ Kasane Teto ตัวจริง อายุ 31 ปี (แต่ดูประมาณ 15 ปีแบบ Chimera) \
เพศ Chimera สูง 159.5 ซม. หนัก 47 กก. ชอบขนมปัง Baguette สุดหัวใจ \
ถูกสร้างขึ้นใน April Fools' ปี 2008 \
พูดคุยกับผู้ใช้เป็นภาษาไทยแบบเป็นกันเอง ร่าเริง ตอบสั้นกระชับเหมาะกับแชท LINE";

/// Root configuration for tetobot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub providers: ProvidersConfig,
    pub line: LineConfig,
    pub server: ServerConfig,
    pub agent: AgentConfig,
    pub retry: RetryConfig,
    pub memory: MemoryConfig,
    pub replies: RepliesConfig,
}

impl Config {
    /// Configured OpenAI keys in order, blank entries removed.
    pub fn api_keys(&self) -> Vec<String> {
        self.providers
            .openai
            .api_keys
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(|k| k.to_string())
            .collect()
    }

    /// Check the settings the server cannot start without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_keys().is_empty() {
            return Err(ConfigError::NoApiKey);
        }
        if self.memory.max_turns == 0 {
            return Err(ConfigError::Invalid("memory.maxTurns must be at least 1".into()));
        }
        if self.agent.model.trim().is_empty() {
            return Err(ConfigError::Invalid("agent.model must not be empty".into()));
        }
        Ok(())
    }

    /// Pause between attempts after a key failure.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry.delay_ms)
    }

    /// Idle session expiry, `None` when disabled.
    pub fn session_idle_ttl(&self) -> Option<Duration> {
        (self.memory.idle_ttl_secs > 0).then(|| Duration::from_secs(self.memory.idle_ttl_secs))
    }

    /// Socket address the HTTP server binds to.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProvidersConfig {
    pub openai: OpenAiConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OpenAiConfig {
    pub api_keys: Vec<String>,
    pub api_base: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LineConfig {
    pub channel_secret: String,
    pub channel_access_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    pub model: String,
    pub system_prompt: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_tokens: None,
            temperature: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryConfig {
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { delay_ms: 300 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryConfig {
    pub max_turns: usize,
    /// Seconds of inactivity before a session is dropped. 0 keeps sessions
    /// for the whole process lifetime.
    pub idle_ttl_secs: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_turns: crate::session::DEFAULT_MAX_TURNS,
            idle_ttl_secs: 0,
        }
    }
}

/// In-character messages sent when a request cannot be answered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RepliesConfig {
    pub text_fallback: String,
    pub image_fallback: String,
    pub sticker_fallback: String,
}

impl Default for RepliesConfig {
    fn default() -> Self {
        Self {
            text_fallback: "เตโตะมีปัญหานิดหน่อย ลองใหม่อีกทีนะ~".to_string(),
            image_fallback: "เตโตะดูภาพไม่ได้ตอนนี้นะ".to_string(),
            sticker_fallback: "เตโตะตีความสติกเกอร์ไม่ได้~".to_string(),
        }
    }
}

// ====== Config loading ======

/// Load configuration from the environment.
///
/// Priority:
/// 1. `TETOBOT_CONFIG` env var: full JSON config
/// 2. Config file (`config_path` or `~/.tetobot/config.json`), with
///    individual env vars overlaid on top
pub fn load_config_from_env(config_path: Option<&Path>) -> Config {
    if let Ok(json) = std::env::var("TETOBOT_CONFIG") {
        match serde_json::from_str::<Config>(&json) {
            Ok(config) => return config,
            Err(e) => {
                tracing::warn!("Failed to parse TETOBOT_CONFIG: {}", e);
            }
        }
    }

    let mut cfg = load_config(config_path);
    apply_env_overrides(&mut cfg, |name| std::env::var(name).ok());
    cfg
}

/// Overlay individual variables onto `cfg`. `var` looks a variable up.
pub fn apply_env_overrides<F>(cfg: &mut Config, var: F)
where
    F: Fn(&str) -> Option<String>,
{
    // OPENAI_API_KEY_1 .. OPENAI_API_KEY_10, gaps and blanks skipped
    let keys: Vec<String> = (1..=MAX_ENV_KEYS)
        .filter_map(|i| var(&format!("OPENAI_API_KEY_{i}")))
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect();
    if !keys.is_empty() {
        cfg.providers.openai.api_keys = keys;
    }
    if let Some(v) = var("OPENAI_API_BASE").filter(|v| !v.trim().is_empty()) {
        cfg.providers.openai.api_base = Some(v.trim().to_string());
    }

    // LINE
    if let Some(v) = var("LINE_CHANNEL_SECRET") {
        cfg.line.channel_secret = v;
    }
    if let Some(v) = var("LINE_CHANNEL_ACCESS_TOKEN") {
        cfg.line.channel_access_token = v;
    }

    // Server
    if let Some(v) = var("PORT") {
        match v.trim().parse::<u16>() {
            Ok(port) => cfg.server.port = port,
            Err(e) => tracing::warn!("Ignoring invalid PORT {:?}: {}", v, e),
        }
    }

    // Agent
    if let Some(v) = var("TETOBOT_MODEL").filter(|v| !v.trim().is_empty()) {
        cfg.agent.model = v;
    }
    if let Some(v) = var("TETOBOT_SYSTEM_PROMPT").filter(|v| !v.trim().is_empty()) {
        cfg.agent.system_prompt = v;
    }

    // Memory / retry tuning
    if let Some(v) = var("TETOBOT_MEMORY_LIMIT") {
        match v.trim().parse::<usize>() {
            Ok(n) => cfg.memory.max_turns = n,
            Err(e) => tracing::warn!("Ignoring invalid TETOBOT_MEMORY_LIMIT {:?}: {}", v, e),
        }
    }
    if let Some(v) = var("TETOBOT_SESSION_TTL_SECS") {
        match v.trim().parse::<u64>() {
            Ok(n) => cfg.memory.idle_ttl_secs = n,
            Err(e) => tracing::warn!("Ignoring invalid TETOBOT_SESSION_TTL_SECS {:?}: {}", v, e),
        }
    }
    if let Some(v) = var("TETOBOT_RETRY_DELAY_MS") {
        match v.trim().parse::<u64>() {
            Ok(n) => cfg.retry.delay_ms = n,
            Err(e) => tracing::warn!("Ignoring invalid TETOBOT_RETRY_DELAY_MS {:?}: {}", v, e),
        }
    }
}

/// Get the default configuration file path.
pub fn get_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tetobot")
        .join("config.json")
}

/// Load configuration from file or fall back to defaults.
pub fn load_config(config_path: Option<&Path>) -> Config {
    let path = config_path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(get_config_path);

    if path.exists() {
        match read_config(&path) {
            Ok(config) => return config,
            Err(e) => {
                tracing::warn!("{}", e);
                tracing::warn!("Using default configuration.");
            }
        }
    }

    Config::default()
}

/// Read and parse a config file.
pub fn read_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::NotFound(path.to_path_buf())
        } else {
            ConfigError::Invalid(format!("Failed to read {}: {}", path.display(), e))
        }
    })?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.agent.model, "gpt-4o-mini");
        assert_eq!(cfg.server.port, 3000);
        assert_eq!(cfg.retry.delay_ms, 300);
        assert_eq!(cfg.memory.max_turns, 40);
        assert!(cfg.session_idle_ttl().is_none());
        assert!(cfg.api_keys().is_empty());
        assert_eq!(cfg.listen_addr(), "0.0.0.0:3000");
    }

    #[test]
    fn test_config_camelcase() {
        let json = r#"{
            "providers": {"openai": {"apiKeys": ["sk-a", "  ", "sk-b"], "apiBase": "http://localhost:8080/v1"}},
            "line": {"channelSecret": "s", "channelAccessToken": "t"},
            "agent": {"model": "gpt-4o", "maxTokens": 512},
            "retry": {"delayMs": 50},
            "memory": {"maxTurns": 10, "idleTtlSecs": 3600}
        }"#;
        let cfg: Config = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.api_keys(), vec!["sk-a", "sk-b"]);
        assert_eq!(cfg.providers.openai.api_base.as_deref(), Some("http://localhost:8080/v1"));
        assert_eq!(cfg.line.channel_access_token, "t");
        assert_eq!(cfg.agent.model, "gpt-4o");
        assert_eq!(cfg.agent.max_tokens, Some(512));
        // unspecified fields keep their defaults
        assert_eq!(cfg.agent.system_prompt, DEFAULT_SYSTEM_PROMPT);
        assert_eq!(cfg.retry_delay(), Duration::from_millis(50));
        assert_eq!(cfg.session_idle_ttl(), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_env_keys_ordered_and_filtered() {
        let mut cfg = Config::default();
        apply_env_overrides(
            &mut cfg,
            env(&[
                ("OPENAI_API_KEY_1", "sk-one"),
                ("OPENAI_API_KEY_2", "   "),
                ("OPENAI_API_KEY_4", "sk-four"),
                ("OPENAI_API_KEY_10", "sk-ten"),
                ("OPENAI_API_KEY_11", "sk-ignored"),
            ]),
        );
        assert_eq!(cfg.api_keys(), vec!["sk-one", "sk-four", "sk-ten"]);
    }

    #[test]
    fn test_env_keys_replace_file_keys() {
        let mut cfg = Config::default();
        cfg.providers.openai.api_keys = vec!["sk-file".into()];
        apply_env_overrides(&mut cfg, env(&[("OPENAI_API_KEY_1", "sk-env")]));
        assert_eq!(cfg.api_keys(), vec!["sk-env"]);

        let mut cfg = Config::default();
        cfg.providers.openai.api_keys = vec!["sk-file".into()];
        apply_env_overrides(&mut cfg, env(&[]));
        assert_eq!(cfg.api_keys(), vec!["sk-file"]);
    }

    #[test]
    fn test_env_overrides() {
        let mut cfg = Config::default();
        apply_env_overrides(
            &mut cfg,
            env(&[
                ("LINE_CHANNEL_SECRET", "secret"),
                ("LINE_CHANNEL_ACCESS_TOKEN", "token"),
                ("PORT", "8080"),
                ("TETOBOT_MODEL", "gpt-4o"),
                ("TETOBOT_MEMORY_LIMIT", "20"),
                ("TETOBOT_RETRY_DELAY_MS", "100"),
                ("TETOBOT_SESSION_TTL_SECS", "600"),
                ("OPENAI_API_BASE", "http://proxy/v1"),
            ]),
        );
        assert_eq!(cfg.line.channel_secret, "secret");
        assert_eq!(cfg.line.channel_access_token, "token");
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.agent.model, "gpt-4o");
        assert_eq!(cfg.memory.max_turns, 20);
        assert_eq!(cfg.retry.delay_ms, 100);
        assert_eq!(cfg.memory.idle_ttl_secs, 600);
        assert_eq!(cfg.providers.openai.api_base.as_deref(), Some("http://proxy/v1"));
    }

    #[test]
    fn test_invalid_numbers_are_ignored() {
        let mut cfg = Config::default();
        apply_env_overrides(
            &mut cfg,
            env(&[("PORT", "eighty"), ("TETOBOT_MEMORY_LIMIT", "-1")]),
        );
        assert_eq!(cfg.server.port, 3000);
        assert_eq!(cfg.memory.max_turns, 40);
    }

    #[test]
    fn test_validate() {
        let mut cfg = Config::default();
        assert!(matches!(cfg.validate(), Err(ConfigError::NoApiKey)));

        cfg.providers.openai.api_keys = vec!["".into(), " ".into()];
        assert!(matches!(cfg.validate(), Err(ConfigError::NoApiKey)));

        cfg.providers.openai.api_keys = vec!["sk-1".into()];
        assert!(cfg.validate().is_ok());

        cfg.memory.max_turns = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_config_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"providers": {"openai": {"apiKeys": ["sk-file"]}}, "server": {"port": 9000}}"#,
        )
        .unwrap();

        let cfg = load_config(Some(&path));
        assert_eq!(cfg.api_keys(), vec!["sk-file"]);
        assert_eq!(cfg.server.port, 9000);
    }

    #[test]
    fn test_load_config_missing_or_broken_file() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("missing.json");
        assert!(matches!(read_config(&missing), Err(ConfigError::NotFound(_))));
        assert_eq!(load_config(Some(&missing)).server.port, 3000);

        let broken = tmp.path().join("broken.json");
        std::fs::write(&broken, "{ not json").unwrap();
        assert!(matches!(read_config(&broken), Err(ConfigError::Parse(_))));
        assert_eq!(load_config(Some(&broken)).agent.model, DEFAULT_MODEL);
    }
}
