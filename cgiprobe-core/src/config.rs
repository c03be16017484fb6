use crate::environment::EnvironmentSnapshot;
use anyhow::{anyhow, Context, Result};
use std::str::FromStr;

pub const ENV_MAX_BODY_BYTES: &str = "CGIPROBE_MAX_BODY_BYTES";
pub const ENV_LENGTH_POLICY: &str = "CGIPROBE_LENGTH_POLICY";
pub const ENV_STRESS_BLOCK_BYTES: &str = "CGIPROBE_STRESS_BLOCK_BYTES";
pub const ENV_LOG: &str = "CGIPROBE_LOG";

/// Smallest stress block: one full repetition of the pattern.
pub const MIN_STRESS_BLOCK_BYTES: usize = 16;

/// How to treat a request body shorter than its declared `CONTENT_LENGTH`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LengthPolicy {
    /// Decode whatever arrived and log a warning.
    #[default]
    Lenient,
    /// Report the body as truncated.
    Strict,
}

impl FromStr for LengthPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lenient" => Ok(Self::Lenient),
            "strict" => Ok(Self::Strict),
            other => Err(anyhow!(
                "invalid length policy '{}': expected 'lenient' or 'strict'",
                other
            )),
        }
    }
}

/// Probe tunables, read from the environment snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeConfig {
    /// Maximum request body size accepted by the decoders (bytes).
    pub max_body_bytes: u64,

    pub length_policy: LengthPolicy,

    /// Size of one block emitted by the output stress generator, excluding
    /// the trailing newline (bytes).
    pub stress_block_bytes: usize,

    /// `tracing` filter directive for the stderr log.
    pub log_filter: String,
}

fn default_max_body_bytes() -> u64 {
    33_554_432 // 32 MiB
}

fn default_stress_block_bytes() -> usize {
    67_108_864 // 64 MiB
}

fn default_log_filter() -> String {
    "warn".to_string()
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: default_max_body_bytes(),
            length_policy: LengthPolicy::default(),
            stress_block_bytes: default_stress_block_bytes(),
            log_filter: default_log_filter(),
        }
    }
}

impl ProbeConfig {
    pub fn from_env(env: &EnvironmentSnapshot) -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(raw) = env.get_non_empty(ENV_MAX_BODY_BYTES) {
            cfg.max_body_bytes = parse_number(ENV_MAX_BODY_BYTES, raw)?;
        }
        if let Some(raw) = env.get_non_empty(ENV_LENGTH_POLICY) {
            cfg.length_policy = raw
                .parse()
                .with_context(|| format!("{} is invalid", ENV_LENGTH_POLICY))?;
        }
        if let Some(raw) = env.get_non_empty(ENV_STRESS_BLOCK_BYTES) {
            cfg.stress_block_bytes = parse_number(ENV_STRESS_BLOCK_BYTES, raw)?;
        }
        if let Some(raw) = env.get_non_empty(ENV_LOG) {
            cfg.log_filter = raw.trim().to_string();
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_body_bytes == 0 {
            return Err(anyhow!("{} must be >= 1", ENV_MAX_BODY_BYTES));
        }
        if self.stress_block_bytes < MIN_STRESS_BLOCK_BYTES {
            return Err(anyhow!(
                "{} must be >= {}",
                ENV_STRESS_BLOCK_BYTES,
                MIN_STRESS_BLOCK_BYTES
            ));
        }
        Ok(())
    }
}

fn parse_number<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse::<T>()
        .with_context(|| format!("{} must be an unsigned integer, got '{}'", key, raw))
}
