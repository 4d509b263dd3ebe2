// Runtime settings. Credentials and endpoints come from the environment
// (optionally primed from a `.env` file) so nothing secret lives in code.

use crate::errors::{AppError, AppResult};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_TYPEFULLY_BASE_URL: &str = "https://api.typefully.com";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 120;
const DEFAULT_POLL_ATTEMPTS: u32 = 30;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Everything the clients need to talk to the image model and the
/// scheduling service.
#[derive(Debug, Clone)]
pub struct Settings {
    pub gemini_api_key: String,
    pub gemini_base_url: String,
    pub typefully_api_key: String,
    pub typefully_base_url: String,
    pub social_set_id: String,
    /// Appended to every image prompt when set.
    pub image_style: Option<String>,
    pub http_timeout: Duration,
    pub poll_attempts: u32,
    pub poll_interval: Duration,
    /// Where the temporary upload copy is written. System temp dir if unset.
    pub scratch_dir: Option<PathBuf>,
}

impl Settings {
    /// Read settings from the process environment. Missing required keys
    /// are collected and reported together.
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` but with an injectable lookup, used by tests.
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut invalid = Vec::new();

        let settings = Settings {
            gemini_api_key: get("GEMINI_API_KEY")
                .or_else(|| get("NANO_BANANA_API_KEY"))
                .unwrap_or_default(),
            gemini_base_url: get("GEMINI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.into()),
            typefully_api_key: get("TYPEFULLY_API_KEY").unwrap_or_default(),
            typefully_base_url: get("TYPEFULLY_BASE_URL")
                .unwrap_or_else(|| DEFAULT_TYPEFULLY_BASE_URL.into()),
            social_set_id: get("TYPEFULLY_SOCIAL_SET_ID").unwrap_or_default(),
            image_style: get("IMAGE_STYLE"),
            http_timeout: Duration::from_secs(parse_number(
                "HTTP_TIMEOUT_SECS",
                get("HTTP_TIMEOUT_SECS"),
                DEFAULT_HTTP_TIMEOUT_SECS,
                &mut invalid,
            )),
            poll_attempts: parse_number(
                "MEDIA_POLL_ATTEMPTS",
                get("MEDIA_POLL_ATTEMPTS"),
                DEFAULT_POLL_ATTEMPTS,
                &mut invalid,
            ),
            poll_interval: Duration::from_millis(parse_number(
                "MEDIA_POLL_INTERVAL_MS",
                get("MEDIA_POLL_INTERVAL_MS"),
                DEFAULT_POLL_INTERVAL_MS,
                &mut invalid,
            )),
            scratch_dir: None,
        };

        settings.check(invalid)?;
        Ok(settings)
    }

    /// Check that every required value is present and usable.
    pub fn validate(&self) -> AppResult<()> {
        self.check(Vec::new())
    }

    /// Report missing keys and `invalid` values together in one error.
    fn check(&self, mut invalid: Vec<String>) -> AppResult<()> {
        let mut missing = Vec::new();
        if self.gemini_api_key.is_empty() {
            missing.push("GEMINI_API_KEY");
        }
        if self.typefully_api_key.is_empty() {
            missing.push("TYPEFULLY_API_KEY");
        }
        if self.social_set_id.is_empty() {
            missing.push("TYPEFULLY_SOCIAL_SET_ID");
        }
        if self.poll_attempts == 0 {
            invalid.push("MEDIA_POLL_ATTEMPTS (must be at least 1)".to_string());
        }

        let mut problems = Vec::new();
        if !missing.is_empty() {
            problems.push(format!("missing required settings: {}", missing.join(", ")));
        }
        if !invalid.is_empty() {
            problems.push(format!("invalid settings: {}", invalid.join(", ")));
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(AppError::Config(problems.join("; ")))
        }
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }
}

/// Parse `raw`, falling back to `default`. Unparseable values are recorded
/// in `invalid` so they are reported alongside any missing keys.
fn parse_number<T: std::str::FromStr>(
    key: &str,
    raw: Option<String>,
    default: T,
    invalid: &mut Vec<String>,
) -> T {
    match raw {
        None => default,
        Some(v) => v.parse().unwrap_or_else(|_| {
            invalid.push(format!("{} ('{}' is not a number)", key, v));
            default
        }),
    }
}

/// Load environment files before settings are read. An explicit file must
/// exist; otherwise `./.env` and then the per-user config file are tried.
/// Returns the file that was loaded, if any. Logging is usually not set up
/// yet when this runs, so the caller reports it.
pub fn load_env_files(explicit: Option<&Path>) -> AppResult<Option<PathBuf>> {
    if let Some(path) = explicit {
        dotenvy::from_path(path).map_err(|e| env_file_error(path, e))?;
        return Ok(Some(path.to_path_buf()));
    }
    load_first_env_file(&[Some(PathBuf::from(".env")), user_env_file()])
}

/// Load the first candidate that exists. A candidate that exists but cannot
/// be parsed stops the search with an error.
fn load_first_env_file(candidates: &[Option<PathBuf>]) -> AppResult<Option<PathBuf>> {
    for path in candidates.iter().flatten() {
        match dotenvy::from_path(path) {
            Ok(()) => return Ok(Some(path.clone())),
            Err(e) if e.not_found() => continue,
            Err(e) => return Err(env_file_error(path, e)),
        }
    }
    Ok(None)
}

fn env_file_error(path: &Path, e: dotenvy::Error) -> AppError {
    AppError::Config(format!("cannot load env file {}: {}", path.display(), e))
}

/// `<config dir>/socialpost/config.env`, e.g. `~/.config/socialpost/config.env`.
pub fn user_env_file() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("socialpost").join("config.env"))
}

#[cfg(test)]
pub(crate) fn test_settings(gemini_base_url: &str, typefully_base_url: &str) -> Settings {
    let pairs = [
        ("GEMINI_API_KEY", "g-key".to_string()),
        ("GEMINI_BASE_URL", gemini_base_url.to_string()),
        ("TYPEFULLY_API_KEY", "t-key".to_string()),
        ("TYPEFULLY_BASE_URL", typefully_base_url.to_string()),
        ("TYPEFULLY_SOCIAL_SET_ID", "273".to_string()),
        ("MEDIA_POLL_INTERVAL_MS", "0".to_string()),
    ];
    Settings::from_lookup(|key| {
        pairs
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.clone())
    })
    .expect("test settings are complete")
}
