use axum::http::HeaderValue;
use manimai_worker::config::ConfigError;

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// Pipeline settings live in [`manimai_worker::config::WorkerConfig`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// How long shutdown waits for running jobs to stop (default: `30`).
    pub shutdown_timeout_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                    |
    /// |------------------------|----------------------------|
    /// | `HOST`                 | `0.0.0.0`                  |
    /// | `PORT`                 | `3000`                     |
    /// | `CORS_ORIGINS`         | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                       |
    /// | `SHUTDOWN_TIMEOUT_SECS`| `30`                       |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let host = var("HOST", "0.0.0.0");
        let port = parse(&var("PORT", "3000"), "PORT", "a port number")?;

        let cors_origins: Vec<String> = var("CORS_ORIGINS", "http://localhost:5173")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if let Some(bad) = cors_origins
            .iter()
            .find(|o| o.parse::<HeaderValue>().is_err())
        {
            return Err(ConfigError::Invalid {
                var: "CORS_ORIGINS",
                expected: "comma-separated origins",
                value: bad.clone(),
            });
        }

        let request_timeout_secs = parse(
            &var("REQUEST_TIMEOUT_SECS", "30"),
            "REQUEST_TIMEOUT_SECS",
            "a whole number of seconds",
        )?;
        let shutdown_timeout_secs = parse(
            &var("SHUTDOWN_TIMEOUT_SECS", "30"),
            "SHUTDOWN_TIMEOUT_SECS",
            "a whole number of seconds",
        )?;

        Ok(Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
        })
    }
}

fn parse<T: std::str::FromStr>(
    value: &str,
    var: &'static str,
    expected: &'static str,
) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        var,
        expected,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn load(pairs: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.cors_origins, ["http://localhost:5173"]);
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn cors_origins_are_split() {
        let config = load(&[("CORS_ORIGINS", "http://a.test, http://b.test,")]).unwrap();
        assert_eq!(config.cors_origins, ["http://a.test", "http://b.test"]);
    }

    #[test]
    fn bad_port_is_rejected() {
        assert_matches!(
            load(&[("PORT", "70000")]),
            Err(ConfigError::Invalid { var: "PORT", .. })
        );
    }
}
