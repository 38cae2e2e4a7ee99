//! Environment configuration for both services
//!
//! Both loaders take a lookup function instead of reading the process
//! environment directly, so tests can supply values from a map:
//!
//! ```ignore
//! let config = GatewayConfig::from_env(|key| std::env::var(key).ok())?;
//! ```

use std::str::FromStr;
use std::time::Duration;

use axum::http::{HeaderValue, Method};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::agent::AgentConfig;
use crate::llm::anthropic::{DEFAULT_ANTHROPIC_MODEL, DEFAULT_ANTHROPIC_URL};
use crate::llm::ollama::{DEFAULT_OLLAMA_MODEL, DEFAULT_OLLAMA_URL};
use crate::memory::MemoryConfig;
use crate::sandbox::{ResourceLimits, SandboxConfig};
use crate::tools::weather::DEFAULT_WEATHER_API_URL;

/// Origins of the chat frontends allowed to call the gateway
pub const DEFAULT_ALLOWED_ORIGINS: &[&str] = &[
    "https://ai-agent-chat-bot.vercel.app",
    "https://aiagent-chatbot.onrender.com",
    "http://localhost:3000",
    "http://localhost:3001",
    "http://localhost:5173",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid { key: &'static str, value: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "{} must be set", key),
            ConfigError::Invalid { key, value } => write!(f, "Invalid value for {}: {:?}", key, value),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Reads typed values through a lookup function; blank values count as unset
struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn string_or(&self, key: &str, default: &str) -> String {
        self.string(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T: FromStr>(&self, key: &'static str, default: T) -> Result<T, ConfigError> {
        match self.string(key) {
            None => Ok(default),
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid { key, value }),
        }
    }

    /// Non-negative, finite rate
    fn rate(&self, key: &'static str, default: f64) -> Result<f64, ConfigError> {
        let rate: f64 = self.parse(key, default)?;
        if rate.is_finite() && rate >= 0.0 {
            Ok(rate)
        } else {
            Err(ConfigError::Invalid {
                key,
                value: self.string(key).unwrap_or_default(),
            })
        }
    }

    fn json_logs(&self) -> bool {
        self.string("LOG_FORMAT")
            .map(|v| v.trim().eq_ignore_ascii_case("json"))
            .unwrap_or(false)
    }

    fn flag(&self, key: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.string(key) {
            None => Ok(default),
            Some(value) => match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::Invalid { key, value }),
            },
        }
    }
}

/// Which CORS origins a service admits
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedOrigins {
    Any,
    List(Vec<String>),
}

impl AllowedOrigins {
    /// `*` means any origin, otherwise a comma-separated list
    fn parse(value: &str) -> Self {
        if value.trim() == "*" {
            return AllowedOrigins::Any;
        }
        AllowedOrigins::List(
            value
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect(),
        )
    }

    pub fn cors_layer(&self) -> CorsLayer {
        let layer = CorsLayer::new()
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([
                axum::http::header::CONTENT_TYPE,
                axum::http::header::AUTHORIZATION,
            ]);

        match self {
            AllowedOrigins::Any => layer.allow_origin(Any),
            AllowedOrigins::List(origins) => {
                let origins: Vec<HeaderValue> =
                    origins.iter().filter_map(|o| o.parse().ok()).collect();
                layer
                    .allow_origin(AllowOrigin::list(origins))
                    .allow_credentials(true)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmProvider {
    Anthropic { api_key: String, base_url: String },
    Ollama { base_url: String },
}

/// Configuration of the `agentvisor` gateway
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub port: u16,
    pub provider: LlmProvider,
    pub model: String,
    pub weather_api_key: Option<String>,
    pub weather_api_url: String,
    pub executor_url: Option<String>,
    pub agent: AgentConfig,
    pub memory: MemoryConfig,
    pub rate_limit_burst: u64,
    pub rate_limit_per_sec: f64,
    pub allowed_origins: AllowedOrigins,
    /// Include error details in 500 responses
    pub development: bool,
    pub otlp_endpoint: Option<String>,
    /// `LOG_FORMAT=json`
    pub json_logs: bool,
}

impl GatewayConfig {
    pub fn from_env(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env { lookup };

        let provider_name = env.string_or("LLM_PROVIDER", "anthropic").to_ascii_lowercase();
        let (provider, default_model) = match provider_name.as_str() {
            "anthropic" => (
                LlmProvider::Anthropic {
                    api_key: env
                        .string("ANTHROPIC_API_KEY")
                        .ok_or(ConfigError::Missing("ANTHROPIC_API_KEY"))?,
                    base_url: env.string_or("ANTHROPIC_BASE_URL", DEFAULT_ANTHROPIC_URL),
                },
                DEFAULT_ANTHROPIC_MODEL,
            ),
            "ollama" => (
                LlmProvider::Ollama {
                    base_url: env.string_or("OLLAMA_URL", DEFAULT_OLLAMA_URL),
                },
                DEFAULT_OLLAMA_MODEL,
            ),
            _ => {
                return Err(ConfigError::Invalid {
                    key: "LLM_PROVIDER",
                    value: provider_name,
                })
            }
        };

        let defaults = AgentConfig::default();
        let agent = AgentConfig {
            max_tool_rounds: env.parse("AGENT_MAX_TOOL_ROUNDS", defaults.max_tool_rounds)?,
            ..defaults
        };

        let memory_defaults = MemoryConfig::default();
        let memory = MemoryConfig {
            max_threads: env.parse("MEMORY_MAX_THREADS", memory_defaults.max_threads)?,
            idle_ttl: Duration::from_secs(
                env.parse("MEMORY_IDLE_TTL_SECS", memory_defaults.idle_ttl.as_secs())?,
            ),
        };

        Ok(Self {
            port: env.parse("PORT", 3001)?,
            provider,
            model: env.string_or("LLM_MODEL", default_model),
            weather_api_key: env.string("WEATHER_API_KEY"),
            weather_api_url: env.string_or("WEATHER_API_URL", DEFAULT_WEATHER_API_URL),
            executor_url: env.string("EXECUTOR_URL"),
            agent,
            memory,
            rate_limit_burst: env.parse("RATE_LIMIT_BURST", 50)?,
            rate_limit_per_sec: env.rate("RATE_LIMIT_PER_SEC", 10.0)?,
            allowed_origins: env
                .string("CORS_ALLOWED_ORIGINS")
                .map(|v| AllowedOrigins::parse(&v))
                .unwrap_or_else(|| {
                    AllowedOrigins::List(DEFAULT_ALLOWED_ORIGINS.iter().map(|o| o.to_string()).collect())
                }),
            development: env.string_or("APP_ENV", "production").eq_ignore_ascii_case("development"),
            otlp_endpoint: env.string("OTEL_EXPORTER_OTLP_ENDPOINT"),
            json_logs: env.json_logs(),
        })
    }
}

/// Configuration of the `executor` service
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub port: u16,
    pub sandbox: SandboxConfig,
    pub max_concurrent: usize,
    pub allowed_origins: AllowedOrigins,
    pub otlp_endpoint: Option<String>,
    pub json_logs: bool,
}

impl ExecutorConfig {
    pub fn from_env(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env { lookup };
        let defaults = ResourceLimits::default();

        let limits = ResourceLimits {
            timeout: Duration::from_millis(
                env.parse("SANDBOX_TIMEOUT_MS", defaults.timeout.as_millis() as u64)?,
            ),
            memory_mb: env.parse("SANDBOX_MEMORY_MB", defaults.memory_mb)?,
            cpu_secs: env.parse("SANDBOX_CPU_SECS", defaults.cpu_secs)?,
            max_output_bytes: env.parse("SANDBOX_MAX_OUTPUT_BYTES", defaults.max_output_bytes)?,
            ..defaults
        };

        Ok(Self {
            port: env.parse("PORT", 3000)?,
            sandbox: SandboxConfig {
                node_bin: env.string_or("NODE_BIN", "node"),
                limits,
                node_permissions: env.flag("SANDBOX_NODE_PERMISSIONS", true)?,
                use_cgroups: env.flag("SANDBOX_CGROUPS", false)?,
            },
            max_concurrent: env.parse("SANDBOX_MAX_CONCURRENT", 8)?,
            allowed_origins: env
                .string("CORS_ALLOWED_ORIGINS")
                .map(|v| AllowedOrigins::parse(&v))
                .unwrap_or(AllowedOrigins::Any),
            otlp_endpoint: env.string("OTEL_EXPORTER_OTLP_ENDPOINT"),
            json_logs: env.json_logs(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_gateway_defaults() {
        let config = GatewayConfig::from_env(lookup(&[("ANTHROPIC_API_KEY", "sk-test")])).unwrap();
        assert_eq!(config.port, 3001);
        assert_eq!(config.model, "claude-3-haiku-20240307");
        assert_eq!(config.agent.max_tool_rounds, 10);
        assert_eq!(config.memory.max_threads, 1000);
        assert_eq!(config.rate_limit_burst, 50);
        assert!(config.executor_url.is_none());
        assert!(!config.development);
        assert_eq!(
            config.allowed_origins,
            AllowedOrigins::List(DEFAULT_ALLOWED_ORIGINS.iter().map(|o| o.to_string()).collect())
        );
    }

    #[test]
    fn test_anthropic_requires_key() {
        let err = GatewayConfig::from_env(lookup(&[])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("ANTHROPIC_API_KEY"));
    }

    #[test]
    fn test_ollama_provider() {
        let config = GatewayConfig::from_env(lookup(&[
            ("LLM_PROVIDER", "ollama"),
            ("AGENT_MAX_TOOL_ROUNDS", "4"),
            ("APP_ENV", "development"),
        ]))
        .unwrap();
        assert_eq!(
            config.provider,
            LlmProvider::Ollama {
                base_url: "http://localhost:11434".to_string()
            }
        );
        assert_eq!(config.model, "qwen3");
        assert_eq!(config.agent.max_tool_rounds, 4);
        assert!(config.development);
    }

    #[test]
    fn test_invalid_number() {
        let err = GatewayConfig::from_env(lookup(&[
            ("ANTHROPIC_API_KEY", "sk-test"),
            ("PORT", "eighty"),
        ]))
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "PORT",
                value: "eighty".to_string()
            }
        );
    }

    #[test]
    fn test_invalid_rate_limit() {
        for value in ["inf", "NaN", "-1", "1e400"] {
            let err = GatewayConfig::from_env(lookup(&[
                ("ANTHROPIC_API_KEY", "sk-test"),
                ("RATE_LIMIT_PER_SEC", value),
            ]))
            .unwrap_err();
            assert_eq!(
                err,
                ConfigError::Invalid {
                    key: "RATE_LIMIT_PER_SEC",
                    value: value.to_string()
                }
            );
        }

        let config = GatewayConfig::from_env(lookup(&[
            ("ANTHROPIC_API_KEY", "sk-test"),
            ("RATE_LIMIT_PER_SEC", "0.5"),
        ]))
        .unwrap();
        assert_eq!(config.rate_limit_per_sec, 0.5);
    }

    #[test]
    fn test_executor_config() {
        let config = ExecutorConfig::from_env(lookup(&[
            ("SANDBOX_TIMEOUT_MS", "2500"),
            ("SANDBOX_CGROUPS", "true"),
            ("CORS_ALLOWED_ORIGINS", "http://a.test, http://b.test"),
        ]))
        .unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.sandbox.limits.timeout, Duration::from_millis(2500));
        assert_eq!(config.sandbox.limits.memory_mb, 128);
        assert!(config.sandbox.use_cgroups);
        assert!(config.sandbox.node_permissions);
        assert_eq!(config.max_concurrent, 8);
        assert_eq!(
            config.allowed_origins,
            AllowedOrigins::List(vec!["http://a.test".into(), "http://b.test".into()])
        );
    }

    #[test]
    fn test_invalid_flag() {
        let err = ExecutorConfig::from_env(lookup(&[("SANDBOX_CGROUPS", "maybe")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "SANDBOX_CGROUPS", .. }));
    }

    #[test]
    fn test_wildcard_origins() {
        assert_eq!(AllowedOrigins::parse("*"), AllowedOrigins::Any);
    }

    #[test]
    fn test_log_format() {
        let text = ExecutorConfig::from_env(lookup(&[])).unwrap();
        assert!(!text.json_logs);
        let json = ExecutorConfig::from_env(lookup(&[("LOG_FORMAT", "JSON")])).unwrap();
        assert!(json.json_logs);
    }
}
