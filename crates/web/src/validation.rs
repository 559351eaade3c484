//! Request validation.
//!
//! Actions record field errors on the context's [`Validation`] instead of
//! returning early. The typical flow on failure is: call
//! [`Validation::keep`], flash a message, and redirect back to the form.
//! The validation stage then carries the errors across the redirect in a
//! cookie so the form can re-render them.

use http::header;
use regex::Regex;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::controller::Context;
use crate::filter::{Chain, Stage, names};
use crate::util::{cookie_value, escape_cookie, unescape};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub key: String,
    pub message: String,
}

#[derive(Debug, Default, Clone)]
pub struct Validation {
    errors: Vec<ValidationError>,
    keep: bool,
}

impl Validation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, key: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError { key: key.into(), message: message.into() });
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    /// First error recorded for a field, if any.
    pub fn error_for(&self, key: &str) -> Option<&str> {
        self.errors.iter().find(|e| e.key == key).map(|e| e.message.as_str())
    }

    /// Ask the validation stage to carry the errors to the next request.
    pub fn keep(&mut self) {
        self.keep = true;
    }

    pub fn required(&mut self, key: &str, value: &str) -> bool {
        let ok = !value.trim().is_empty();
        if !ok {
            self.error(key, "Required");
        }
        ok
    }

    pub fn min_length(&mut self, key: &str, value: &str, min: usize) -> bool {
        let ok = value.chars().count() >= min;
        if !ok {
            self.error(key, format!("Minimum length is {min}"));
        }
        ok
    }

    pub fn max_length(&mut self, key: &str, value: &str, max: usize) -> bool {
        let ok = value.chars().count() <= max;
        if !ok {
            self.error(key, format!("Maximum length is {max}"));
        }
        ok
    }

    pub fn range(&mut self, key: &str, value: i64, min: i64, max: i64) -> bool {
        let ok = (min..=max).contains(&value);
        if !ok {
            self.error(key, format!("Must be between {min} and {max}"));
        }
        ok
    }

    pub fn matches(&mut self, key: &str, value: &str, pattern: &Regex, message: &str) -> bool {
        let ok = pattern.is_match(value);
        if !ok {
            self.error(key, message);
        }
        ok
    }

    fn restore(&mut self, raw: &str) {
        if let Ok(pairs) = serde_urlencoded::from_str::<Vec<(String, String)>>(raw) {
            self.errors = pairs.into_iter().map(|(key, message)| ValidationError { key, message }).collect();
        }
    }

    fn encode(&self) -> String {
        let pairs: Vec<(&str, &str)> = self.errors.iter().map(|e| (e.key.as_str(), e.message.as_str())).collect();
        serde_urlencoded::to_string(&pairs).unwrap_or_default()
    }
}

/// Restores kept errors from the previous request and persists newly kept
/// ones, mirroring the flash stage.
pub struct ValidationStage {
    config: Arc<AppConfig>,
}

impl ValidationStage {
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self { config }
    }
}

impl Stage for ValidationStage {
    fn name(&self) -> &'static str {
        names::VALIDATION
    }

    fn apply(&self, ctx: &mut Context, chain: Chain<'_>) {
        let cookie_name = self.config.cookie_name("ERRORS");
        let raw = ctx.request.header(header::COOKIE).and_then(|h| cookie_value(h, &cookie_name)).map(str::to_string);
        let had_cookie = raw.is_some();
        if let Some(raw) = raw {
            ctx.validation.restore(&unescape(&raw));
        }

        chain.next(ctx);

        if ctx.validation.keep && ctx.validation.has_errors() {
            let value = escape_cookie(&ctx.validation.encode());
            ctx.response.add_cookie(&format!("{cookie_name}={value}; Path=/; HttpOnly"));
        } else if had_cookie {
            ctx.response.add_cookie(&format!("{cookie_name}=; Path=/; Max-Age=0"));
        }
    }
}
