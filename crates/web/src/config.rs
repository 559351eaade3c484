use serde::Deserialize;

use crate::error::Error;

/// Application configuration the dispatch core reads.
///
/// Every field has a workable default so tests and examples can start from
/// `AppConfig::default()` and override only what they care about.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Shown on generated error pages.
    pub app_name: String,
    /// HMAC key for session and validation cookies.
    pub secret: String,
    /// Development mode: error pages include diagnostic detail.
    pub dev_mode: bool,
    /// Prefix for every cookie the framework writes.
    pub cookie_prefix: String,
    /// Session lifetime; None means a browser-session cookie without expiry.
    pub session_expire_seconds: Option<i64>,
    /// Upper bound on a buffered multipart body.
    pub multipart_max_size: u64,
    /// Fallback locale for message lookup.
    pub default_language: String,
    /// Formats tried by the datetime binder, most specific first.
    pub datetime_formats: Vec<String>,
    /// Format tried by the date binder.
    pub date_format: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_name: "tiller application".to_string(),
            secret: String::new(),
            dev_mode: false,
            cookie_prefix: "TILLER".to_string(),
            session_expire_seconds: Some(30 * 24 * 60 * 60),
            multipart_max_size: 32 * 1024 * 1024,
            default_language: "en".to_string(),
            datetime_formats: vec!["%Y-%m-%d %H:%M".to_string(), "%Y-%m-%dT%H:%M".to_string()],
            date_format: "%Y-%m-%d".to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_json(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn cookie_name(&self, suffix: &str) -> String {
        format!("{}_{}", self.cookie_prefix, suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config = AppConfig::from_json(r#"{"secret":"s3cr3t","dev_mode":true}"#).unwrap();
        assert_eq!(config.secret, "s3cr3t");
        assert!(config.dev_mode);
        assert_eq!(config.cookie_prefix, "TILLER");
        assert_eq!(config.cookie_name("SESSION"), "TILLER_SESSION");
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        assert!(matches!(AppConfig::from_json("{nope"), Err(Error::Config(_))));
    }
}
