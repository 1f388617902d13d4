//! Pipeline configuration.
//!
//! Configuration is an explicit, immutable value constructed once at startup
//! and passed to the services that need it. Nothing reads the environment
//! after [`Config::from_env`] returns, and there is no ambient global.
//!
//! All variables are optional; unset or blank values keep the defaults.
//!
//! | Variable | Meaning |
//! |----------|---------|
//! | `BINDERY_API_URL` | Base URL workers call back to |
//! | `BINDERY_CDN_URL` | Public base URL of the artifact store |
//! | `BINDERY_CDN_BUCKET` | Artifact bucket name (rides in worker payloads) |
//! | `BINDERY_SITE_BUCKET` | Published site bucket name |
//! | `BINDERY_FUNCTION_PREFIX` | Worker function name prefix |
//! | `BINDERY_DEPLOY_FUNCTION` | Deploy re-trigger function name |
//! | `BINDERY_WAIT_FOR_LINTERS` | Whether submission waits for lint results |
//! | `BINDERY_LINTER_WAIT_TIMEOUT_SECS` | Lint rendezvous timeout |
//! | `BINDERY_SWEEP_MAX_AGE_SECS` | Deploy sweep freshness window |
//! | `BINDERY_LOG_FORMAT` | `json` or `pretty` |

use crate::error::{Error, Result};
use crate::observability::LogFormat;

/// Immutable pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Base URL workers post their completion callbacks to.
    pub api_url: String,
    /// Public base URL under which artifact-store keys are reachable.
    pub cdn_url: String,
    /// Artifact bucket name, passed through to workers in dispatch payloads.
    pub cdn_bucket: String,
    /// Bucket name of the published site.
    pub site_bucket: String,
    /// Prefix namespacing the worker functions this deployment owns.
    pub function_prefix: String,
    /// Function name the deploy sweep re-invokes.
    pub deploy_function: String,
    /// Whether a submission waits for linter completions before returning.
    pub wait_for_linters: bool,
    /// How long the lint rendezvous waits, in seconds.
    pub linter_wait_timeout_secs: u64,
    /// Build logs modified within this window are skipped by the deploy
    /// sweep, in seconds.
    pub sweep_max_age_secs: u64,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8080".to_string(),
            cdn_url: "http://localhost:8080/cdn".to_string(),
            cdn_bucket: "bindery-artifacts".to_string(),
            site_bucket: "bindery-site".to_string(),
            function_prefix: "bindery_".to_string(),
            deploy_function: "bindery_deploy".to_string(),
            wait_for_linters: true,
            linter_wait_timeout_secs: 120,
            sweep_max_age_secs: 86_400,
            log_format: LogFormat::default(),
        }
    }
}

impl Config {
    /// Builds a configuration from the environment, starting from defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] naming the offending variable when a
    /// value fails to parse.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = env_string("BINDERY_API_URL") {
            config.api_url = v;
        }
        if let Some(v) = env_string("BINDERY_CDN_URL") {
            config.cdn_url = v;
        }
        if let Some(v) = env_string("BINDERY_CDN_BUCKET") {
            config.cdn_bucket = v;
        }
        if let Some(v) = env_string("BINDERY_SITE_BUCKET") {
            config.site_bucket = v;
        }
        if let Some(v) = env_string("BINDERY_FUNCTION_PREFIX") {
            config.function_prefix = v;
        }
        if let Some(v) = env_string("BINDERY_DEPLOY_FUNCTION") {
            config.deploy_function = v;
        }
        if let Some(v) = env_bool("BINDERY_WAIT_FOR_LINTERS")? {
            config.wait_for_linters = v;
        }
        if let Some(v) = env_u64("BINDERY_LINTER_WAIT_TIMEOUT_SECS")? {
            config.linter_wait_timeout_secs = v;
        }
        if let Some(v) = env_u64("BINDERY_SWEEP_MAX_AGE_SECS")? {
            config.sweep_max_age_secs = v;
        }
        if let Some(v) = env_string("BINDERY_LOG_FORMAT") {
            config.log_format = parse_log_format(&v)?;
        }

        Ok(config)
    }

    /// Returns the worker function name for a converter module.
    #[must_use]
    pub fn convert_function(&self, module: &str) -> String {
        format!("{}convert_{module}", self.function_prefix)
    }

    /// Returns the worker function name for a linter module.
    #[must_use]
    pub fn lint_function(&self, module: &str) -> String {
        format!("{}lint_{module}", self.function_prefix)
    }

    /// Returns the URL converter workers post their completion to.
    #[must_use]
    pub fn converter_callback_url(&self) -> String {
        format!("{}/callback/converter", self.api_url)
    }

    /// Returns the URL linter workers post their completion to.
    #[must_use]
    pub fn linter_callback_url(&self) -> String {
        format!("{}/callback/linter", self.api_url)
    }

    /// Returns the public URL of an artifact-store key.
    #[must_use]
    pub fn output_url(&self, cdn_file: &str) -> String {
        format!("{}/{cdn_file}", self.cdn_url)
    }

    /// Returns the lint rendezvous timeout as a duration.
    #[must_use]
    pub fn linter_wait_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.linter_wait_timeout_secs)
    }

    /// Returns the deploy sweep freshness window as a duration.
    #[must_use]
    pub fn sweep_max_age(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.sweep_max_age_secs).unwrap_or(i64::MAX))
    }
}

/// Reads a string variable, treating unset or blank as absent.
fn env_string(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Err(_) => None,
    }
}

/// Reads a u64 variable.
fn env_u64(name: &str) -> Result<Option<u64>> {
    match env_string(name) {
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|e| Error::InvalidInput(format!("{name} must be a u64: {e}"))),
        None => Ok(None),
    }
}

/// Reads a boolean variable.
fn env_bool(name: &str) -> Result<Option<bool>> {
    match env_string(name) {
        Some(value) => parse_bool(&value)
            .map(Some)
            .ok_or_else(|| Error::InvalidInput(format!("{name} must be a boolean: '{value}'"))),
        None => Ok(None),
    }
}

/// Parses common boolean spellings.
fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Some(true),
        "false" | "0" | "no" | "n" => Some(false),
        _ => None,
    }
}

fn parse_log_format(value: &str) -> Result<LogFormat> {
    match value.to_ascii_lowercase().as_str() {
        "json" => Ok(LogFormat::Json),
        "pretty" => Ok(LogFormat::Pretty),
        other => Err(Error::InvalidInput(format!(
            "BINDERY_LOG_FORMAT must be 'json' or 'pretty': '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_consistent() {
        let config = Config::default();
        assert_eq!(config.function_prefix, "bindery_");
        assert_eq!(config.deploy_function, "bindery_deploy");
        assert!(config.wait_for_linters);
        assert_eq!(config.linter_wait_timeout_secs, 120);
        assert_eq!(config.sweep_max_age_secs, 86_400);
    }

    #[test]
    fn function_names_are_prefixed() {
        let config = Config::default();
        assert_eq!(config.convert_function("md2html"), "bindery_convert_md2html");
        assert_eq!(config.lint_function("usfm"), "bindery_lint_usfm");
    }

    #[test]
    fn callback_urls_extend_the_api_base() {
        let config = Config {
            api_url: "https://api.example.test".to_string(),
            ..Config::default()
        };
        assert_eq!(
            config.converter_callback_url(),
            "https://api.example.test/callback/converter"
        );
        assert_eq!(
            config.linter_callback_url(),
            "https://api.example.test/callback/linter"
        );
    }

    #[test]
    fn output_url_joins_cdn_base_and_key() {
        let config = Config {
            cdn_url: "https://cdn.example.test".to_string(),
            ..Config::default()
        };
        assert_eq!(
            config.output_url("jobs/01H/output/"),
            "https://cdn.example.test/jobs/01H/output/"
        );
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        for yes in ["true", "TRUE", "1", "yes", "Y"] {
            assert_eq!(parse_bool(yes), Some(true), "{yes}");
        }
        for no in ["false", "0", "no", "N"] {
            assert_eq!(parse_bool(no), Some(false), "{no}");
        }
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn log_format_parses_known_values() {
        assert_eq!(parse_log_format("json").ok(), Some(LogFormat::Json));
        assert_eq!(parse_log_format("PRETTY").ok(), Some(LogFormat::Pretty));
        assert!(parse_log_format("loud").is_err());
    }

    #[test]
    fn durations_derive_from_seconds() {
        let config = Config::default();
        assert_eq!(config.linter_wait_timeout().as_secs(), 120);
        assert_eq!(config.sweep_max_age(), chrono::Duration::days(1));
    }
}
