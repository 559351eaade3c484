//! Message localization.
//!
//! A [`Messages`] table maps locale and key to display text, with fallback
//! to the application's default locale. The i18n stage resolves the
//! request locale from a preference cookie first, then the first entry of
//! `Accept-Language`, then the configured default.

use http::header;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::controller::Context;
use crate::filter::{Chain, Stage, names};
use crate::util::cookie_value;

#[derive(Debug, Default)]
pub struct Messages {
    default_locale: String,
    tables: HashMap<String, HashMap<String, String>>,
}

impl Messages {
    pub fn new(default_locale: impl Into<String>) -> Self {
        Self { default_locale: default_locale.into(), tables: HashMap::new() }
    }

    pub fn add(&mut self, locale: &str, key: impl Into<String>, message: impl Into<String>) {
        self.tables.entry(locale.to_string()).or_default().insert(key.into(), message.into());
    }

    /// Look up a key, trying the requested locale, its language part
    /// (`de` for `de-AT`), then the default locale.
    pub fn lookup(&self, locale: &str, key: &str) -> Option<String> {
        let in_table = |locale: &str| self.tables.get(locale).and_then(|t| t.get(key));
        in_table(locale)
            .or_else(|| locale.split_once('-').and_then(|(language, _)| in_table(language)))
            .or_else(|| in_table(&self.default_locale))
            .cloned()
    }
}

/// Resolves the request locale and installs the message table on the
/// context.
pub struct I18nStage {
    config: Arc<AppConfig>,
    messages: Arc<Messages>,
}

impl I18nStage {
    pub fn new(config: Arc<AppConfig>, messages: Arc<Messages>) -> Self {
        Self { config, messages }
    }

    fn resolve_locale(&self, ctx: &Context) -> String {
        let cookie_name = self.config.cookie_name("LANG");
        if let Some(locale) = ctx.request.header(header::COOKIE).and_then(|h| cookie_value(h, &cookie_name)) {
            if !locale.is_empty() {
                return locale.to_string();
            }
        }
        if let Some(accept) = ctx.request.header(header::ACCEPT_LANGUAGE) {
            let first = accept.split(',').next().unwrap_or("").split(';').next().unwrap_or("").trim();
            if !first.is_empty() && first != "*" {
                return first.to_string();
            }
        }
        self.config.default_language.clone()
    }
}

impl Stage for I18nStage {
    fn name(&self) -> &'static str {
        names::I18N
    }

    fn apply(&self, ctx: &mut Context, chain: Chain<'_>) {
        ctx.locale = self.resolve_locale(ctx);
        ctx.set_messages(Arc::clone(&self.messages));
        chain.next(ctx);
    }
}
