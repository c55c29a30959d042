use std::{env, fmt, str::FromStr, time::Duration};

use log::{info, warn};

/// Local-development origins allowed by CORS when nothing else is configured
pub const DEV_ORIGINS: [&str; 3] = [
    "http://localhost:3000",
    "http://127.0.0.1:5500",
    "http://localhost:5500",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl FromStr for Environment {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "production" | "prod" => Ok(Environment::Production),
            // anything else is treated as development
            _ => Ok(Environment::Development),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

/// Proxy relay server configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,

    /// Destination used when a submission does not carry its own `scriptUrl`
    pub destination_url: Option<String>,

    pub environment: Environment,
    pub cors_origins: Vec<String>,

    /// Bound on the forward call to the destination
    pub forward_timeout: Duration,

    /// Bound on the connectivity test GET
    pub test_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "0.0.0.0".to_string(),
            port: 3000,
            destination_url: None,
            environment: Environment::Development,
            cors_origins: DEV_ORIGINS.iter().map(|o| o.to_string()).collect(),
            forward_timeout: Duration::from_secs(30),
            test_timeout: Duration::from_secs(15),
        }
    }
}

impl Config {
    /// Load `.env` (if present) and then read the process environment
    pub fn load() -> Self {
        if dotenvy::dotenv().is_ok() {
            info!("Loaded variables from .env");
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from any key lookup; missing or invalid values
    /// fall back to the defaults with a warning.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let environment = lookup("NODE_ENV")
            .or_else(|| lookup("APP_ENV"))
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.environment);

        let cors_origins = match lookup("CORS_ORIGINS") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect(),
            None if environment == Environment::Production => {
                warn!("CORS_ORIGINS not set in production, cross-origin requests will be refused");
                Vec::new()
            }
            None => defaults.cors_origins,
        };

        Config {
            host: lookup("HOST")
                .filter(|h| !h.trim().is_empty())
                .unwrap_or(defaults.host),
            port: parse_or(&lookup, "PORT", defaults.port),
            destination_url: lookup("GOOGLE_SCRIPT_URL").filter(|u| !u.trim().is_empty()),
            environment,
            cors_origins,
            forward_timeout: Duration::from_secs(parse_or(
                &lookup,
                "FORWARD_TIMEOUT_SECS",
                defaults.forward_timeout.as_secs(),
            )),
            test_timeout: Duration::from_secs(parse_or(
                &lookup,
                "TEST_TIMEOUT_SECS",
                defaults.test_timeout.as_secs(),
            )),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Raw error text is only handed back to callers in development
    pub fn exposes_details(&self) -> bool {
        self.environment == Environment::Development
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + fmt::Display + Copy,
    T::Err: fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|e| {
            warn!("Invalid {key} value {raw:?}: {e}, using default {default}");
            default
        }),
        None => default,
    }
}
