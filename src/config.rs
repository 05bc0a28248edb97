//! Process configuration
//!
//! Everything is read once from the environment (after `.env` is loaded)
//! and passed down explicitly. A missing provider key disables that
//! provider instead of failing startup.

use crate::error::ChatError;
use crate::Result;
use std::env;
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_MAX_TOOL_ITERATIONS: u32 = 8;
pub const DEFAULT_MODEL_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_STOCKS_DB_URL: &str = "sqlite://stocks.db";
pub const DEFAULT_API_PORT: u16 = 8080;

/// Hosted chat-completion providers reachable through the OpenAI wire format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Gemini,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [
        ProviderKind::OpenAi,
        ProviderKind::Anthropic,
        ProviderKind::Gemini,
    ];

    pub fn key_var(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OPENAI_API_KEY",
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
            ProviderKind::Gemini => "GOOGLE_API_KEY",
        }
    }

    pub fn base_url(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "https://api.openai.com/v1/",
            ProviderKind::Anthropic => "https://api.anthropic.com/v1/",
            ProviderKind::Gemini => "https://generativelanguage.googleapis.com/v1beta/openai/",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "gpt-4.1-mini",
            ProviderKind::Anthropic => "claude-3-5-haiku-latest",
            ProviderKind::Gemini => "gemini-2.0-flash",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "openai" | "gpt" => Some(ProviderKind::OpenAi),
            "anthropic" | "claude" => Some(ProviderKind::Anthropic),
            "gemini" | "google" => Some(ProviderKind::Gemini),
            _ => None,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Gemini => "gemini",
        };
        f.write_str(s)
    }
}

#[derive(Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("api_key", &key_prefix(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

#[derive(Clone)]
pub struct BasicAuth {
    pub user: String,
    pub password: String,
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Enabled providers, in preference order
    pub providers: Vec<ProviderConfig>,
    pub default_provider: Option<ProviderKind>,
    pub max_tool_iterations: u32,
    pub model_timeout: Duration,
    /// `None` selects the in-memory store
    pub stocks_db_url: Option<String>,
    pub seed_example_prices: bool,
    pub allow_price_updates: bool,
    pub enable_media: bool,
    pub api_port: u16,
    pub basic_auth: Option<BasicAuth>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            providers: vec![],
            default_provider: None,
            max_tool_iterations: DEFAULT_MAX_TOOL_ITERATIONS,
            model_timeout: Duration::from_secs(DEFAULT_MODEL_TIMEOUT_SECS),
            stocks_db_url: None,
            seed_example_prices: true,
            allow_price_updates: false,
            enable_media: false,
            api_port: DEFAULT_API_PORT,
            basic_auth: None,
        }
    }
}

impl ChatConfig {
    /// Load `.env` (if present) and read the process environment
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from any variable source; used directly by tests
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let model_override = get("CHAT_MODEL");

        let mut providers = Vec::new();
        for kind in ProviderKind::ALL {
            match get(kind.key_var()) {
                Some(api_key) => {
                    info!(
                        provider = %kind,
                        "{} exists and begins {}",
                        kind.key_var(),
                        key_prefix(&api_key)
                    );
                    providers.push(ProviderConfig {
                        kind,
                        api_key,
                        base_url: kind.base_url().to_string(),
                        model: kind.default_model().to_string(),
                    });
                }
                None => info!(provider = %kind, "{} not set", kind.key_var()),
            }
        }

        let default_provider = match get("CHAT_PROVIDER") {
            Some(name) => {
                let kind = ProviderKind::parse(&name).ok_or_else(|| {
                    ChatError::ConfigError(format!("Unknown CHAT_PROVIDER: {}", name))
                })?;
                if providers.iter().any(|p| p.kind == kind) {
                    Some(kind)
                } else {
                    warn!(
                        provider = %kind,
                        "CHAT_PROVIDER has no API key configured, using first available provider"
                    );
                    providers.first().map(|p| p.kind)
                }
            }
            None => providers.first().map(|p| p.kind),
        };

        if let (Some(model), Some(kind)) = (model_override, default_provider) {
            if let Some(provider) = providers.iter_mut().find(|p| p.kind == kind) {
                provider.model = model;
            }
        }

        let max_tool_iterations = parse_or(
            get("MAX_TOOL_ITERATIONS"),
            DEFAULT_MAX_TOOL_ITERATIONS,
            "MAX_TOOL_ITERATIONS",
        )?;
        let timeout_secs = parse_or(
            get("MODEL_TIMEOUT_SECS"),
            DEFAULT_MODEL_TIMEOUT_SECS,
            "MODEL_TIMEOUT_SECS",
        )?;
        let api_port = parse_or(
            get("PORT").or_else(|| get("API_PORT")),
            DEFAULT_API_PORT,
            "PORT",
        )?;

        let stocks_db_url = match get("STOCKS_DB_URL") {
            Some(url) if url.eq_ignore_ascii_case("memory") => None,
            Some(url) => Some(url),
            None => Some(DEFAULT_STOCKS_DB_URL.to_string()),
        };

        let basic_auth = match (get("CHAT_AUTH_USER"), get("CHAT_AUTH_PASSWORD")) {
            (Some(user), Some(password)) => Some(BasicAuth { user, password }),
            (None, None) => None,
            _ => {
                return Err(ChatError::ConfigError(
                    "CHAT_AUTH_USER and CHAT_AUTH_PASSWORD must be set together".to_string(),
                ))
            }
        };

        Ok(Self {
            providers,
            default_provider,
            max_tool_iterations,
            model_timeout: Duration::from_secs(timeout_secs),
            stocks_db_url,
            seed_example_prices: parse_flag(get("SEED_EXAMPLE_PRICES"), true),
            allow_price_updates: parse_flag(get("ALLOW_PRICE_UPDATES"), false),
            enable_media: parse_flag(get("ENABLE_MEDIA"), true),
            api_port,
            basic_auth,
        })
    }

    pub fn provider(&self, kind: ProviderKind) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.kind == kind)
    }

    pub fn default_provider_config(&self) -> Option<&ProviderConfig> {
        self.default_provider.and_then(|kind| self.provider(kind))
    }

    /// Media enrichment needs an OpenAI key
    pub fn media_provider(&self) -> Option<&ProviderConfig> {
        if self.enable_media {
            self.provider(ProviderKind::OpenAi)
        } else {
            None
        }
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T, name: &str) -> Result<T> {
    match value {
        Some(raw) => raw
            .parse()
            .map_err(|_| ChatError::ConfigError(format!("{} is not valid: {}", name, raw))),
        None => Ok(default),
    }
}

fn parse_flag(value: Option<String>, default: bool) -> bool {
    match value.as_deref().map(str::to_lowercase).as_deref() {
        Some("1") | Some("true") | Some("yes") | Some("on") => true,
        Some("0") | Some("false") | Some("no") | Some("off") => false,
        _ => default,
    }
}

/// First eight characters of a key, for logs
pub fn key_prefix(key: &str) -> String {
    key.chars().take(8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<ChatConfig> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ChatConfig::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn test_defaults_without_keys() {
        let config = config_from(&[]).unwrap();
        assert!(config.providers.is_empty());
        assert!(config.default_provider.is_none());
        assert_eq!(config.max_tool_iterations, 8);
        assert_eq!(config.stocks_db_url.as_deref(), Some(DEFAULT_STOCKS_DB_URL));
        assert!(config.media_provider().is_none());
    }

    #[test]
    fn test_missing_key_disables_provider() {
        let config = config_from(&[("GOOGLE_API_KEY", "AIzaSy-test")]).unwrap();
        assert_eq!(config.providers.len(), 1);
        assert_eq!(config.default_provider, Some(ProviderKind::Gemini));
        assert!(config.provider(ProviderKind::OpenAi).is_none());
    }

    #[test]
    fn test_model_override_and_provider_choice() {
        let config = config_from(&[
            ("OPENAI_API_KEY", "sk-proj-abcdefgh"),
            ("ANTHROPIC_API_KEY", "sk-ant-123456"),
            ("CHAT_PROVIDER", "claude"),
            ("CHAT_MODEL", "claude-sonnet"),
        ])
        .unwrap();

        let provider = config.default_provider_config().unwrap();
        assert_eq!(provider.kind, ProviderKind::Anthropic);
        assert_eq!(provider.model, "claude-sonnet");
        assert_eq!(
            config.provider(ProviderKind::OpenAi).unwrap().model,
            "gpt-4.1-mini"
        );
    }

    #[test]
    fn test_invalid_numbers_are_config_errors() {
        let result = config_from(&[("MAX_TOOL_ITERATIONS", "lots")]);
        assert!(matches!(result, Err(ChatError::ConfigError(_))));
    }

    #[test]
    fn test_memory_store_and_flags() {
        let config = config_from(&[
            ("STOCKS_DB_URL", "memory"),
            ("ALLOW_PRICE_UPDATES", "yes"),
            ("SEED_EXAMPLE_PRICES", "off"),
        ])
        .unwrap();
        assert!(config.stocks_db_url.is_none());
        assert!(config.allow_price_updates);
        assert!(!config.seed_example_prices);
    }

    #[test]
    fn test_auth_requires_both_parts() {
        assert!(config_from(&[("CHAT_AUTH_USER", "ed")]).is_err());
        let config = config_from(&[
            ("CHAT_AUTH_USER", "ed"),
            ("CHAT_AUTH_PASSWORD", "bananas"),
        ])
        .unwrap();
        assert_eq!(config.basic_auth.unwrap().user, "ed");
    }

    #[test]
    fn test_debug_does_not_leak_key() {
        let config = config_from(&[("OPENAI_API_KEY", "sk-proj-secret-value")]).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("secret-value"));
    }
}
