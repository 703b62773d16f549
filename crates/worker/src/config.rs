use std::path::PathBuf;
use std::time::Duration;

use manimai_llm::settings::{
    DEFAULT_DEEPSEEK_BASE_URL, DEFAULT_DEEPSEEK_MODEL, DEFAULT_GEMINI_MODEL, DEFAULT_TEMPERATURE,
};
use manimai_llm::{build_provider, LlmSettings, ProviderError};
use manimai_llm::gemini::DEFAULT_GEMINI_BASE_URL;
use manimai_pipeline::generator::Generator;
use manimai_pipeline::manim::ManimConfig;
use manimai_pipeline::sandbox::{SandboxLimits, MAX_OUTPUT_BYTES};

/// A malformed configuration value.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be {expected}, got '{value}'")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Pipeline configuration loaded from environment variables.
///
/// Shared by the headless worker and the API server, which embeds the
/// scheduler.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    /// Root for render directories (`{data_dir}/jobs/...`).
    pub data_dir: PathBuf,
    /// Maximum number of workspaces rendering at once.
    pub pool_size: usize,
    pub generation_timeout: Duration,
    pub render_timeout: Duration,
    pub cancel_grace: Duration,
    pub render_memory_limit_bytes: Option<u64>,
    pub manim_command: Vec<String>,
    pub ffprobe_bin: String,
    pub llm: LlmSettings,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default                              |
    /// |---------------------------|--------------------------------------|
    /// | `DATABASE_URL`            | `sqlite://data/manimai.db?mode=rwc`  |
    /// | `DATA_DIR`                | `data`                               |
    /// | `WORKER_POOL_SIZE`        | `2`                                  |
    /// | `GENERATION_TIMEOUT_SECS` | `60`                                 |
    /// | `RENDER_TIMEOUT_SECS`     | `600`                                |
    /// | `CANCEL_GRACE_SECS`       | `5`                                  |
    /// | `RENDER_MEMORY_LIMIT_MB`  | unset                                |
    /// | `MANIM_BIN`               | `manim`                              |
    /// | `FFPROBE_BIN`             | `ffprobe`                            |
    /// | `LLM_PROVIDER`            | `deepseek`                           |
    /// | `DEEPSEEK_API_KEY`        | empty                                |
    /// | `DEEPSEEK_BASE_URL`       | `https://api.deepseek.com`           |
    /// | `DEEPSEEK_MODEL`          | `deepseek-chat`                      |
    /// | `GEMINI_API_KEY`          | empty                                |
    /// | `GEMINI_BASE_URL`         | `https://generativelanguage.googleapis.com` |
    /// | `GEMINI_MODEL`            | `gemini-1.5-flash`                   |
    /// | `LLM_TEMPERATURE`         | `0.2`                                |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let pool_size: usize = parse(&var("WORKER_POOL_SIZE", "2"), "WORKER_POOL_SIZE", "a positive integer")?;
        if pool_size == 0 {
            return Err(ConfigError::Invalid {
                var: "WORKER_POOL_SIZE",
                expected: "a positive integer",
                value: "0".to_string(),
            });
        }

        let secs = |key: &'static str, default: &str| -> Result<Duration, ConfigError> {
            parse::<u64>(&var(key, default), key, "a whole number of seconds").map(Duration::from_secs)
        };

        let render_memory_limit_bytes = match lookup("RENDER_MEMORY_LIMIT_MB").filter(|v| !v.trim().is_empty()) {
            Some(mb) => Some(
                parse::<u64>(&mb, "RENDER_MEMORY_LIMIT_MB", "a size in megabytes")?.saturating_mul(1024 * 1024),
            ),
            None => None,
        };

        let manim_command = ManimConfig::parse_command(&var("MANIM_BIN", "manim"));

        let llm = LlmSettings {
            provider: var("LLM_PROVIDER", "deepseek").parse()?,
            deepseek_api_key: var("DEEPSEEK_API_KEY", ""),
            deepseek_base_url: var("DEEPSEEK_BASE_URL", DEFAULT_DEEPSEEK_BASE_URL),
            deepseek_model: var("DEEPSEEK_MODEL", DEFAULT_DEEPSEEK_MODEL),
            gemini_api_key: var("GEMINI_API_KEY", ""),
            gemini_base_url: var("GEMINI_BASE_URL", DEFAULT_GEMINI_BASE_URL),
            gemini_model: var("GEMINI_MODEL", DEFAULT_GEMINI_MODEL),
            temperature: parse(
                &var("LLM_TEMPERATURE", &DEFAULT_TEMPERATURE.to_string()),
                "LLM_TEMPERATURE",
                "a number",
            )?,
            request_timeout: secs("GENERATION_TIMEOUT_SECS", "60")?,
        };

        Ok(Self {
            database_url: var("DATABASE_URL", "sqlite://data/manimai.db?mode=rwc"),
            data_dir: PathBuf::from(var("DATA_DIR", "data")),
            pool_size,
            generation_timeout: secs("GENERATION_TIMEOUT_SECS", "60")?,
            render_timeout: secs("RENDER_TIMEOUT_SECS", "600")?,
            cancel_grace: secs("CANCEL_GRACE_SECS", "5")?,
            render_memory_limit_bytes,
            manim_command,
            ffprobe_bin: var("FFPROBE_BIN", "ffprobe"),
            llm,
        })
    }

    pub fn jobs_dir(&self) -> PathBuf {
        self.data_dir.join("jobs")
    }

    pub fn manim_config(&self) -> ManimConfig {
        ManimConfig {
            command: self.manim_command.clone(),
            ffprobe_bin: self.ffprobe_bin.clone(),
            jobs_dir: self.jobs_dir(),
            limits: SandboxLimits {
                timeout: self.render_timeout,
                cancel_grace: self.cancel_grace,
                memory_limit_bytes: self.render_memory_limit_bytes,
                max_output_bytes: MAX_OUTPUT_BYTES,
            },
        }
    }

    /// Generator for the configured provider. Fails when its API key is
    /// missing.
    pub fn build_generator(&self) -> Result<Generator, ConfigError> {
        let provider = build_provider(&self.llm)?;
        Ok(Generator::new(provider, self.generation_timeout).with_temperature(self.llm.temperature))
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
