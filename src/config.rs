use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::archiver::monolith::MonolithConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("failed to parse {name} as boolean: {value}")]
    ParseBool { name: String, value: String },
}

/// Proxy used for every browser session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub server: String,
    pub bypass: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxyConfig {
    /// Username/password pair when both are configured.
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) => Some((user, pass)),
            _ => None,
        }
    }
}

/// Application configuration.
///
/// Built once at startup and shared behind an `Arc`; nothing below reads the
/// environment directly.
#[derive(Debug, Clone)]
pub struct Config {
    // Storage
    pub database_path: PathBuf,
    pub storage_dir: PathBuf,

    // Preservation
    pub disable_preservation: bool,
    pub browser_timeout: Duration,
    pub max_file_size_mb: u64,

    // Browser
    pub proxy: Option<ProxyConfig>,
    pub browser_ws_url: Option<String>,
    pub browser_executable_path: Option<String>,
    pub ignore_https_errors: bool,

    // Captcha solving backend
    pub captcha_solver_url: Option<String>,

    // AI tagging providers
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub azure_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub openrouter_api_key: Option<String>,
    pub ollama_endpoint_url: Option<String>,
    pub ai_model: String,

    // Monolith
    pub monolith_path: String,
    pub monolith_timeout: Duration,
    pub monolith_include_js: bool,

    // Wayback Machine
    pub wayback_base_url: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if an environment variable is present but invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let proxy = optional_env("PROXY").map(|server| ProxyConfig {
            server,
            bypass: optional_env("PROXY_BYPASS"),
            username: optional_env("PROXY_USERNAME"),
            password: optional_env("PROXY_PASSWORD"),
        });

        Ok(Self {
            // Storage
            database_path: PathBuf::from(env_or_default("DATABASE_PATH", "./data/links.sqlite")),
            storage_dir: PathBuf::from(env_or_default("STORAGE_DIR", "./data")),

            // Preservation
            disable_preservation: parse_env_bool("DISABLE_PRESERVATION", false)?,
            browser_timeout: Duration::from_secs(
                parse_env_u64("BROWSER_TIMEOUT", 5)?.saturating_mul(60),
            ),
            max_file_size_mb: parse_env_u64("MAX_FILE_SIZE_MB", 30)?,

            // Browser
            proxy,
            browser_ws_url: optional_env("BROWSER_WS_URL"),
            browser_executable_path: optional_env("BROWSER_EXECUTABLE_PATH"),
            ignore_https_errors: parse_env_bool("IGNORE_HTTPS_ERRORS", false)?,

            // Captcha solving backend
            captcha_solver_url: optional_env("CAPTCHA_SOLVER_URL"),

            // AI tagging providers
            openai_api_key: optional_env("OPENAI_API_KEY"),
            openai_base_url: env_or_default("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            azure_api_key: optional_env("AZURE_API_KEY"),
            anthropic_api_key: optional_env("ANTHROPIC_API_KEY"),
            openrouter_api_key: optional_env("OPENROUTER_API_KEY"),
            ollama_endpoint_url: optional_env("OLLAMA_ENDPOINT_URL"),
            ai_model: env_or_default("AI_MODEL", "gpt-4o-mini"),

            // Monolith
            monolith_path: env_or_default("MONOLITH_PATH", "monolith"),
            monolith_timeout: Duration::from_secs(parse_env_u64("MONOLITH_TIMEOUT_SECS", 120)?),
            monolith_include_js: parse_env_bool("MONOLITH_INCLUDE_JS", false)?,

            // Wayback Machine
            wayback_base_url: env_or_default("WAYBACK_BASE_URL", "https://web.archive.org"),
        })
    }

    /// Configuration with every external service switched off.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            database_path: PathBuf::from("./data/test.sqlite"),
            storage_dir: PathBuf::from("./data/test"),
            disable_preservation: false,
            browser_timeout: Duration::from_secs(5 * 60),
            max_file_size_mb: 30,
            proxy: None,
            browser_ws_url: None,
            browser_executable_path: None,
            ignore_https_errors: false,
            captcha_solver_url: None,
            openai_api_key: None,
            openai_base_url: "https://api.openai.com/v1".to_string(),
            azure_api_key: None,
            anthropic_api_key: None,
            openrouter_api_key: None,
            ollama_endpoint_url: None,
            ai_model: "gpt-4o-mini".to_string(),
            monolith_path: "monolith".to_string(),
            monolith_timeout: Duration::from_secs(120),
            monolith_include_js: false,
            wayback_base_url: "https://web.archive.org".to_string(),
        }
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.browser_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "BROWSER_TIMEOUT".to_string(),
                message: "must be at least 1 minute".to_string(),
            });
        }
        if self.max_file_size_mb == 0 {
            return Err(ConfigError::InvalidValue {
                name: "MAX_FILE_SIZE_MB".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.browser_ws_url.is_some() && self.browser_executable_path.is_some() {
            return Err(ConfigError::InvalidValue {
                name: "BROWSER_EXECUTABLE_PATH".to_string(),
                message: "cannot be combined with BROWSER_WS_URL".to_string(),
            });
        }
        if let Some(ref proxy) = self.proxy {
            if proxy.username.is_some() != proxy.password.is_some() {
                return Err(ConfigError::InvalidValue {
                    name: "PROXY_USERNAME".to_string(),
                    message: "PROXY_USERNAME and PROXY_PASSWORD must be set together".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Whether at least one AI provider credential is configured.
    #[must_use]
    pub fn has_ai_provider(&self) -> bool {
        self.openai_api_key.is_some()
            || self.azure_api_key.is_some()
            || self.anthropic_api_key.is_some()
            || self.openrouter_api_key.is_some()
            || self.ollama_endpoint_url.is_some()
    }

    /// Largest resource the header probe accepts, in bytes.
    #[must_use]
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }

    #[must_use]
    pub fn monolith_config(&self) -> MonolithConfig {
        MonolithConfig {
            path: self.monolith_path.clone(),
            timeout: self.monolith_timeout,
            include_js: self.monolith_include_js,
        }
    }
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_bool(name: &str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => parse_bool(name, &val),
        _ => Ok(default),
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::ParseBool {
            name: name.to_string(),
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("X", "TRUE").unwrap());
        assert!(parse_bool("X", "on").unwrap());
        assert!(!parse_bool("X", "0").unwrap());
        assert!(parse_bool("X", "maybe").is_err());
    }

    #[test]
    fn test_parse_bool_default() {
        assert!(parse_env_bool("LINK_PRESERVER_NONEXISTENT_VAR", true).unwrap());
        assert!(!parse_env_bool("LINK_PRESERVER_NONEXISTENT_VAR", false).unwrap());
    }

    #[test]
    #[serial]
    fn test_browser_timeout_is_minutes() {
        std::env::set_var("BROWSER_TIMEOUT", "2");
        let config = Config::from_env().unwrap();
        std::env::remove_var("BROWSER_TIMEOUT");
        assert_eq!(config.browser_timeout, Duration::from_secs(120));
    }

    #[test]
    #[serial]
    fn test_huge_browser_timeout_saturates() {
        std::env::set_var("BROWSER_TIMEOUT", u64::MAX.to_string());
        let config = Config::from_env();
        std::env::remove_var("BROWSER_TIMEOUT");

        let config = config.unwrap();
        assert_eq!(config.browser_timeout, Duration::from_secs(u64::MAX));
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_proxy_from_env() {
        std::env::set_var("PROXY", "http://proxy.local:3128");
        std::env::set_var("PROXY_BYPASS", "localhost");
        let config = Config::from_env().unwrap();
        std::env::remove_var("PROXY");
        std::env::remove_var("PROXY_BYPASS");

        let proxy = config.proxy.expect("proxy should be configured");
        assert_eq!(proxy.server, "http://proxy.local:3128");
        assert_eq!(proxy.bypass.as_deref(), Some("localhost"));
        assert!(proxy.credentials().is_none());
    }

    #[test]
    fn test_has_ai_provider() {
        let mut config = Config::for_testing();
        assert!(!config.has_ai_provider());
        config.anthropic_api_key = Some("key".to_string());
        assert!(config.has_ai_provider());
    }

    #[test]
    fn test_validate_rejects_remote_and_local_browser() {
        let config = Config {
            browser_ws_url: Some("ws://browser:3000".to_string()),
            browser_executable_path: Some("/usr/bin/chromium".to_string()),
            ..Config::for_testing()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_half_proxy_credentials() {
        let config = Config {
            proxy: Some(ProxyConfig {
                server: "http://proxy:8080".to_string(),
                bypass: None,
                username: Some("user".to_string()),
                password: None,
            }),
            ..Config::for_testing()
        };
        assert!(config.validate().is_err());
        assert!(Config::for_testing().validate().is_ok());
    }
}
