use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::relay::facts::DEFAULT_SPARQL_ENDPOINT;
use crate::relay::language::{Language, LanguageRule};
use crate::relay::{Detectors, ModelSettings, RelaySettings, ReplyLimits};
use crate::storage::{SessionPolicy, SqliteStore};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub quota: QuotaConfig,
    pub reply: ReplyConfig,
    pub store: StoreConfig,
    pub facts: FactsConfig,
    pub detection: DetectionConfig,
    pub logging: LoggingConfig,
    pub transcripts: TranscriptConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8081,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub base_url: String,
    /// Usually supplied through OPENAI_API_KEY rather than the file
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        let defaults = ModelSettings::default();
        Self {
            base_url: defaults.base_url,
            api_key: None,
            model: defaults.model,
            temperature: defaults.temperature,
            max_tokens: defaults.max_tokens,
            timeout_secs: defaults.timeout_secs,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    pub daily_limit: i64,
    pub history_cap: usize,
    pub context_turns: usize,
    pub usage_ttl_hours: i64,
    pub name_ttl_days: i64,
    pub history_ttl_days: i64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            daily_limit: 3,
            history_cap: 12,
            context_turns: 10,
            usage_ttl_hours: 48,
            name_ttl_days: 30,
            history_ttl_days: 7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplyConfig {
    pub max_lines: usize,
    pub max_chars: usize,
}

impl Default for ReplyConfig {
    fn default() -> Self {
        let limits = ReplyLimits::default();
        Self {
            max_lines: limits.max_lines,
            max_chars: limits.max_chars,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Sqlite,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "sqlite" => Ok(StoreBackend::Sqlite),
            other => anyhow::bail!("unknown store backend: {}", other),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub path: Option<PathBuf>,
    pub purge_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            path: None,
            purge_interval_secs: 600,
        }
    }
}

impl StoreConfig {
    pub fn sqlite_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(SqliteStore::default_path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FactsConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl Default for FactsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: DEFAULT_SPARQL_ENDPOINT.to_string(),
            timeout_secs: 5,
        }
    }
}

/// Extra detection rules, tried after the built-in ones
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub name_patterns: Vec<NamePatternConfig>,
    pub language_rules: Vec<LanguageRuleConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamePatternConfig {
    /// Regex whose first capture group is the name
    pub pattern: String,
    pub language: Language,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageRuleConfig {
    pub language: Language,
    #[serde(default)]
    pub characters: String,
    #[serde(default)]
    pub words: Vec<String>,
    #[serde(default = "default_min_hits")]
    pub min_hits: usize,
}

fn default_min_hits() -> usize {
    2
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: Option<PathBuf>,
}

impl LoggingConfig {
    pub fn log_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("pulse")
                .join("logs")
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptConfig {
    pub enabled: bool,
    pub dir: Option<PathBuf>,
    pub retention_days: u64,
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: None,
            retention_days: 30,
        }
    }
}

impl Config {
    /// Defaults, then the config file, then environment (including `.env`)
    pub fn load() -> Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!("Loaded environment from {:?}", path);
        }

        let mut config = match Self::config_path() {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn config_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("PULSE_CONFIG") {
            return Some(PathBuf::from(path));
        }

        dirs::config_dir()
            .map(|dir| dir.join("pulse").join("config.toml"))
            .filter(|path| path.exists())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Override fields from environment variables
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        fn parsed<T: FromStr>(key: &str, raw: String) -> Result<T>
        where
            T::Err: std::fmt::Display,
        {
            raw.trim()
                .parse::<T>()
                .map_err(|e| anyhow::anyhow!("{} has an invalid value {:?}: {}", key, raw, e))
        }

        if let Some(v) = var("PORT") {
            self.server.port = parsed("PORT", v)?;
        }
        if let Some(v) = var("PULSE_HOST") {
            self.server.host = v;
        }
        if let Some(v) = var("OPENAI_API_KEY") {
            self.model.api_key = Some(v).filter(|k| !k.trim().is_empty());
        }
        if let Some(v) = var("OPENAI_BASE_URL") {
            self.model.base_url = v;
        }
        if let Some(v) = var("PULSE_MODEL") {
            self.model.model = v;
        }
        if let Some(v) = var("PULSE_DAILY_LIMIT") {
            self.quota.daily_limit = parsed("PULSE_DAILY_LIMIT", v)?;
        }
        if let Some(v) = var("PULSE_STORE") {
            self.store.backend = parsed("PULSE_STORE", v)?;
        }
        if let Some(v) = var("PULSE_DB_PATH") {
            self.store.path = Some(PathBuf::from(v));
        }
        if let Some(v) = var("PULSE_FACT_LOOKUP") {
            self.facts.enabled = parsed("PULSE_FACT_LOOKUP", v)?;
        }
        if let Some(v) = var("PULSE_LOG_DIR") {
            self.logging.dir = Some(PathBuf::from(v));
        }
        if let Some(v) = var("PULSE_TRANSCRIPTS") {
            self.transcripts.enabled = parsed("PULSE_TRANSCRIPTS", v)?;
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.server.host, self.server.port))
    }

    pub fn session_policy(&self) -> SessionPolicy {
        SessionPolicy {
            daily_limit: self.quota.daily_limit.max(0),
            history_cap: self.quota.history_cap.max(1),
            usage_ttl: chrono::Duration::hours(self.quota.usage_ttl_hours),
            name_ttl: chrono::Duration::days(self.quota.name_ttl_days),
            history_ttl: chrono::Duration::days(self.quota.history_ttl_days),
        }
    }

    pub fn model_settings(&self) -> ModelSettings {
        ModelSettings {
            base_url: self.model.base_url.clone(),
            api_key: self.model.api_key.clone(),
            model: self.model.model.clone(),
            temperature: self.model.temperature,
            max_tokens: self.model.max_tokens,
            timeout_secs: self.model.timeout_secs,
        }
    }

    /// Built-in detectors extended with the configured rules
    pub fn detectors(&self) -> Result<Detectors> {
        let mut detectors = Detectors::default();

        for entry in &self.detection.name_patterns {
            let regex = Regex::new(&entry.pattern)
                .with_context(|| format!("invalid name pattern {:?}", entry.pattern))?;
            if regex.captures_len() < 2 {
                anyhow::bail!("name pattern {:?} has no capture group", entry.pattern);
            }
            detectors.names = detectors.names.with_pattern(regex, entry.language);
        }

        for rule in &self.detection.language_rules {
            if !rule.characters.is_empty() {
                detectors.language = detectors.language.with_rule(
                    LanguageRule::Characters(rule.characters.to_lowercase()),
                    rule.language,
                );
            }
            if !rule.words.is_empty() {
                let words: Vec<&str> = rule.words.iter().map(String::as_str).collect();
                detectors.language = detectors
                    .language
                    .with_rule(LanguageRule::word_hits(&words, rule.min_hits.max(1)), rule.language);
            }
        }

        Ok(detectors)
    }

    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            // The current message must always reach the model
            context_turns: self.quota.context_turns.max(1),
            reply_limits: ReplyLimits {
                max_lines: self.reply.max_lines,
                max_chars: self.reply.max_chars,
            },
        }
    }
}
