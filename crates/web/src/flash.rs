//! Flash messages: state that survives exactly one redirect.
//!
//! Whatever an action puts into the outgoing flash is written to a cookie
//! and shows up in the next request's incoming flash, after which the
//! cookie is cleared. Unlike the session cookie the flash is not signed;
//! it only ever carries display text.

use http::header;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::controller::Context;
use crate::filter::{Chain, Stage, names};
use crate::util::{cookie_value, escape_cookie, unescape};

#[derive(Debug, Default, Clone)]
pub struct Flash {
    /// Messages restored from the previous request.
    data: BTreeMap<String, String>,
    /// Messages to deliver to the next request.
    out: BTreeMap<String, String>,
}

impl Flash {
    pub fn new() -> Self {
        Self::default()
    }

    /// A message left by the previous request.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.out.insert(key.into(), value.into());
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.set("error", message);
    }

    pub fn success(&mut self, message: impl Into<String>) {
        self.set("success", message);
    }

    pub fn incoming(&self) -> &BTreeMap<String, String> {
        &self.data
    }

    fn restore(&mut self, raw: &str) {
        if let Ok(pairs) = serde_urlencoded::from_str::<Vec<(String, String)>>(raw) {
            self.data = pairs.into_iter().collect();
        }
    }

    fn encode_out(&self) -> String {
        let pairs: Vec<(&String, &String)> = self.out.iter().collect();
        serde_urlencoded::to_string(&pairs).unwrap_or_default()
    }
}

/// Restores the incoming flash, then writes or clears the cookie on the
/// way out.
pub struct FlashStage {
    config: Arc<AppConfig>,
}

impl FlashStage {
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self { config }
    }
}

impl Stage for FlashStage {
    fn name(&self) -> &'static str {
        names::FLASH
    }

    fn apply(&self, ctx: &mut Context, chain: Chain<'_>) {
        let cookie_name = self.config.cookie_name("FLASH");
        let raw = ctx.request.header(header::COOKIE).and_then(|h| cookie_value(h, &cookie_name)).map(str::to_string);
        let had_cookie = raw.is_some();
        if let Some(raw) = raw {
            ctx.flash.restore(&unescape(&raw));
        }

        chain.next(ctx);

        if !ctx.flash.out.is_empty() {
            let value = escape_cookie(&ctx.flash.encode_out());
            ctx.response.add_cookie(&format!("{cookie_name}={value}; Path=/; HttpOnly"));
        } else if had_cookie {
            ctx.response.add_cookie(&format!("{cookie_name}=; Path=/; Max-Age=0"));
        }
    }
}
