use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_BIND: &str = "0.0.0.0";
/// Shipped salt value — refused outside development mode.
pub const PLACEHOLDER_SALT: &str = "default-salt-CHANGE-IN-PRODUCTION";
pub const MIN_SALT_LEN: usize = 32;

/// Deployment environment. Selects dev-only shortcuts such as the webhook
/// signature skip; everything else behaves identically across environments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
    Test,
}

impl Environment {
    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
            Environment::Test => "test",
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "development" => Ok(Environment::Development),
            "production" => Ok(Environment::Production),
            "test" => Ok(Environment::Test),
            other => Err(format!("unknown environment: {other}")),
        }
    }
}

/// Top-level config (charla.toml + CHARLA_* env overrides + the deploy
/// variables listed in the operations runbook).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CharlaConfig {
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub twilio: TwilioConfig,
    #[serde(default)]
    pub anthropic: AnthropicConfig,
    #[serde(default)]
    pub privacy: PrivacyConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Trust a single upstream proxy for client-IP and scheme extraction.
    #[serde(default)]
    pub trust_proxy: bool,
    /// CORS whitelist; empty means no browser origins are allowed.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            trust_proxy: false,
            allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite path, with or without a `sqlite://` prefix.
    #[serde(default = "default_db_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_db_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RedisConfig {
    /// Key-value store DSN. `None` falls back to the in-process store,
    /// which is only acceptable in development.
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TwilioConfig {
    #[serde(default)]
    pub account_sid: String,
    /// Shared secret for webhook signature verification.
    #[serde(default)]
    pub auth_token: String,
    /// Sender address, `whatsapp:+...` form.
    #[serde(default)]
    pub phone_number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_anthropic_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Maximum output tokens per completion.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Overrides the built-in Spanish assistant prompt when set.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_anthropic_base_url(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivacyConfig {
    #[serde(default = "default_salt")]
    pub hash_salt: String,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            hash_salt: default_salt(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Per-phone ceiling within `window_seconds`.
    #[serde(default = "default_phone_limit")]
    pub max_requests: u32,
    #[serde(default = "default_window")]
    pub window_seconds: u64,
    /// Per-client-IP ceiling within `ip_window_seconds`.
    #[serde(default = "default_ip_limit")]
    pub max_ip_requests: u32,
    #[serde(default = "default_window")]
    pub ip_window_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_phone_limit(),
            window_seconds: default_window(),
            max_ip_requests: default_ip_limit(),
            ip_window_seconds: default_window(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_db_url() -> String {
    "charla.db".to_string()
}
fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_model() -> String {
    "claude-sonnet-4-5".to_string()
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_temperature() -> f32 {
    0.7
}
fn default_salt() -> String {
    PLACEHOLDER_SALT.to_string()
}
fn default_phone_limit() -> u32 {
    10
}
fn default_ip_limit() -> u32 {
    30
}
fn default_window() -> u64 {
    60
}

impl CharlaConfig {
    /// Load config from a TOML file with CHARLA_* env overrides, then apply
    /// the well-known deploy variables (`DATABASE_URL`, `TWILIO_AUTH_TOKEN`,
    /// ...) on top.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path.unwrap_or("charla.toml");

        let mut config: CharlaConfig = Figment::from(Serialized::defaults(CharlaConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("CHARLA_").split("__"))
            .extract()
            .map_err(|e| CoreError::Config(e.to_string()))?;

        config.apply_deploy_env();
        Ok(config)
    }

    /// Overlay the flat environment variables used by deployments.
    pub fn apply_deploy_env(&mut self) {
        if let Some(v) = env_var("NODE_ENV").or_else(|| env_var("CHARLA_ENV")) {
            if let Ok(e) = v.parse() {
                self.environment = e;
            }
        }
        if let Some(v) = env_var("PORT").and_then(|v| v.parse().ok()) {
            self.server.port = v;
        }
        if let Some(v) = env_var("DATABASE_URL") {
            self.database.url = v;
        }
        if let Some(v) = env_var("REDIS_URL") {
            self.redis.url = Some(v);
        }
        if let Some(v) = env_var("TWILIO_ACCOUNT_SID") {
            self.twilio.account_sid = v;
        }
        if let Some(v) = env_var("TWILIO_AUTH_TOKEN") {
            self.twilio.auth_token = v;
        }
        if let Some(v) = env_var("TWILIO_PHONE_NUMBER") {
            self.twilio.phone_number = v;
        }
        if let Some(v) = env_var("ANTHROPIC_API_KEY") {
            self.anthropic.api_key = v;
        }
        if let Some(v) = env_var("PRIVACY_HASH_SALT") {
            self.privacy.hash_salt = v;
        }
        if let Some(v) = env_var("ALLOWED_ORIGINS") {
            self.server.allowed_origins = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(v) = env_var("TRUST_PROXY") {
            self.server.trust_proxy = v == "true";
        }
        if let Some(v) = env_var("RATE_LIMIT_MAX_REQUESTS").and_then(|v| v.parse().ok()) {
            self.rate_limit.max_requests = v;
        }
        if let Some(v) = env_var("RATE_LIMIT_WINDOW_SECONDS").and_then(|v| v.parse().ok()) {
            self.rate_limit.window_seconds = v;
        }
        if let Some(v) = env_var("RATE_LIMIT_MAX_IP_REQUESTS").and_then(|v| v.parse().ok()) {
            self.rate_limit.max_ip_requests = v;
        }
        if let Some(v) = env_var("RATE_LIMIT_IP_WINDOW_SECONDS").and_then(|v| v.parse().ok()) {
            self.rate_limit.ip_window_seconds = v;
        }
    }

    /// Refuse to start with credentials or salts that are only acceptable
    /// on a developer machine.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.environment.is_development() {
            return Ok(());
        }
        if self.privacy.hash_salt == PLACEHOLDER_SALT {
            return Err(CoreError::Config(
                "PRIVACY_HASH_SALT must be set outside development".to_string(),
            ));
        }
        if self.privacy.hash_salt.len() < MIN_SALT_LEN {
            return Err(CoreError::Config(format!(
                "PRIVACY_HASH_SALT must be at least {MIN_SALT_LEN} characters"
            )));
        }
        if self.twilio.auth_token.is_empty() {
            return Err(CoreError::Config(
                "TWILIO_AUTH_TOKEN is required outside development".to_string(),
            ));
        }
        if self.anthropic.api_key.is_empty() {
            return Err(CoreError::Config(
                "ANTHROPIC_API_KEY is required outside development".to_string(),
            ));
        }
        if self.environment == Environment::Production && self.redis.url.is_none() {
            return Err(CoreError::Config(
                "REDIS_URL is required in production".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}
