use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::ConfigError;

pub const API_KEY_VAR: &str = "HARVARD_API_KEY";
pub const DB_PATH_VAR: &str = "ARTIFACTS_DB";
pub const DEFAULT_BASE_URL: &str = "https://api.harvardartmuseums.org/object";
pub const DEFAULT_DB_PATH: &str = "artifacts.db";
pub const ENV_FILE: &str = ".env";

/// Pagination and throttling knobs for one fetch.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub page_size: u32,
    /// Pause after every successful page.
    pub page_pause: Duration,
    /// Total attempts per page while the endpoint answers 429.
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub request_timeout: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            page_size: 100,
            page_pause: Duration::from_millis(200),
            max_attempts: 5,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
            request_timeout: Duration::from_secs(20),
        }
    }
}

impl FetchSettings {
    /// Delay before retrying after the given (0-indexed) rate-limited attempt.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.backoff_base
            .checked_mul(factor)
            .map_or(self.backoff_cap, |d| d.min(self.backoff_cap))
    }
}

/// Resolves the API key: explicit value (flag or environment, already merged
/// by the CLI parser) first, then the `.env` file. Blank values count as absent.
pub fn resolve_api_key(explicit: Option<&str>, env_file: &Path) -> Result<String, ConfigError> {
    // 1. Flag or environment variable
    if let Some(key) = explicit.map(str::trim).filter(|k| !k.is_empty()) {
        return Ok(key.to_string());
    }

    // 2. Fall back to .env in the working directory
    if env_file.exists() {
        if let Some(key) = read_env_value(env_file, API_KEY_VAR)? {
            info!("Loaded API key from {}", env_file.display());
            return Ok(key);
        }
    }

    Err(ConfigError::MissingApiKey)
}

/// Reads one `KEY=VALUE` entry from a dotenv-style file.
fn read_env_value(path: &Path, wanted: &str) -> Result<Option<String>, ConfigError> {
    let reader = BufReader::new(File::open(path)?);

    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            if key.trim() == wanted {
                let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
                if value.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(value.to_string()));
            }
        }
    }

    Ok(None)
}

/// Writes the API key into the `.env` file, replacing an existing entry and
/// keeping every other line.
pub fn save_api_key(path: &Path, key: &str) -> Result<(), ConfigError> {
    let existing = if path.exists() {
        fs::read_to_string(path)?
    } else {
        String::new()
    };

    let mut file = File::create(path)?;
    for line in existing.lines() {
        let is_key_line = line
            .split_once('=')
            .is_some_and(|(k, _)| k.trim() == API_KEY_VAR);
        if !is_key_line {
            writeln!(file, "{}", line)?;
        }
    }
    writeln!(file, "{}={}", API_KEY_VAR, key)?;
    debug!("Saved API key to {}", path.display());
    Ok(())
}
