//! Application configuration, shared read-only with every call context.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8000;

/// Package identity reported by the health check and the web root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct About {
    pub name: String,
    pub description: String,
    pub version: String,
}

impl Default for About {
    fn default() -> Self {
        Self {
            name: "apiary".into(),
            description: "Apiary RPC application".into(),
            version: "0.1.0".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    #[default]
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(format!("unknown environment: {other}")),
        }
    }
}

/// Per-level logging switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggerConfig {
    pub debug: bool,
    pub log: bool,
    pub info: bool,
    pub warn: bool,
    pub error: bool,
}

impl LoggerConfig {
    /// Debug output is only on in development.
    pub fn for_environment(environment: Environment) -> Self {
        let development = environment == Environment::Development;
        Self {
            debug: development,
            log: development,
            info: true,
            warn: true,
            error: true,
        }
    }

    /// Most verbose enabled level, as a tracing filter directive.
    pub fn filter_directive(&self) -> &'static str {
        if self.debug || self.log {
            "debug"
        } else if self.info {
            "info"
        } else if self.warn {
            "warn"
        } else if self.error {
            "error"
        } else {
            "off"
        }
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self::for_environment(Environment::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.into(),
            port: DEFAULT_PORT,
        }
    }
}

/// Frozen application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub about: About,
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub logger: LoggerConfig,
    pub domain: String,
    #[serde(default)]
    pub server: ServerConfig,
    /// Application-specific keys.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Config {
    pub fn new(about: About, environment: Environment) -> Self {
        Self {
            about,
            environment,
            logger: LoggerConfig::for_environment(environment),
            domain: resolve_domain(None),
            server: ServerConfig::default(),
            extra: Map::new(),
        }
    }

    pub fn with_server(mut self, host: impl Into<String>, port: u16) -> Self {
        self.server = ServerConfig {
            host: host.into(),
            port,
        };
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(About::default(), Environment::default())
    }
}

/// Public base URL: the `PORT`-derived localhost URL, or the default one.
pub fn resolve_domain(port: Option<u16>) -> String {
    format!("http://localhost:{}", port.unwrap_or(DEFAULT_PORT))
}
