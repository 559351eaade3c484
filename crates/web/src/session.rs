//! The signed-cookie session.
//!
//! Session state lives entirely in a cookie: `sig.payload`, both halves
//! base64url, where `sig` is an HMAC-SHA256 over the payload and the
//! payload is the urlencoded, key-sorted session map. A cookie that fails
//! verification, for any reason, decodes to an empty session rather than an
//! error; verification is constant time.
//!
//! Expiry rides inside the payload under a reserved key, so a client
//! cannot stretch its own deadline without breaking the signature.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use hmac::{Hmac, Mac};
use http::header;
use sha2::Sha256;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

use crate::config::AppConfig;
use crate::controller::Context;
use crate::filter::{Chain, Stage, names};
use crate::util::cookie_value;

type HmacSha256 = Hmac<Sha256>;

/// Reserved key carrying the expiry deadline, unix seconds.
const TIMESTAMP_KEY: &str = "_TS";

#[derive(Debug, Default, Clone)]
pub struct Session {
    data: BTreeMap<String, String>,
    dirty: bool,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.data.insert(key.into(), value.into());
        self.dirty = true;
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let removed = self.data.remove(key);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    pub fn clear(&mut self) {
        if !self.data.is_empty() {
            self.dirty = true;
        }
        self.data.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.data.iter().all(|(k, _)| k == TIMESTAMP_KEY)
    }

    /// Whether the session changed during this request and needs writing.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Serialize and sign.
    pub fn encode(&self, secret: &[u8]) -> String {
        let pairs: Vec<(&String, &String)> = self.data.iter().collect();
        let payload = serde_urlencoded::to_string(&pairs).unwrap_or_default();
        let mut mac = HmacSha256::new_from_slice(secret).expect("hmac accepts any key length");
        mac.update(payload.as_bytes());
        let sig = mac.finalize().into_bytes();
        format!("{}.{}", URL_SAFE_NO_PAD.encode(sig), URL_SAFE_NO_PAD.encode(payload))
    }

    /// Verify and deserialize. Anything invalid, tampered, or expired is an
    /// empty session.
    pub fn decode(secret: &[u8], raw: &str) -> Self {
        let Some((sig, payload)) = raw.split_once('.') else { return Self::new() };
        let (Ok(sig), Ok(payload)) = (URL_SAFE_NO_PAD.decode(sig), URL_SAFE_NO_PAD.decode(payload)) else {
            return Self::new();
        };

        let Ok(mut mac) = HmacSha256::new_from_slice(secret) else { return Self::new() };
        mac.update(&payload);
        if mac.verify_slice(&sig).is_err() {
            warn!("session cookie failed signature verification");
            return Self::new();
        }

        let Ok(pairs) = serde_urlencoded::from_bytes::<Vec<(String, String)>>(&payload) else {
            return Self::new();
        };
        let data: BTreeMap<String, String> = pairs.into_iter().collect();

        if let Some(deadline) = data.get(TIMESTAMP_KEY) {
            let expired = deadline.parse::<i64>().map(|ts| ts < Utc::now().timestamp()).unwrap_or(true);
            if expired {
                return Self::new();
            }
        }

        Self { data, dirty: false }
    }

    fn stamp_expiry(&mut self, ttl_seconds: i64) {
        self.data.insert(TIMESTAMP_KEY.to_string(), (Utc::now().timestamp() + ttl_seconds).to_string());
    }
}

/// Restores the session before the rest of the chain runs and writes the
/// cookie back afterwards, but only when something changed.
pub struct SessionStage {
    config: Arc<AppConfig>,
}

impl SessionStage {
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self { config }
    }
}

impl Stage for SessionStage {
    fn name(&self) -> &'static str {
        names::SESSION
    }

    fn apply(&self, ctx: &mut Context, chain: Chain<'_>) {
        let cookie_name = self.config.cookie_name("SESSION");
        let raw = ctx.request.header(header::COOKIE).and_then(|h| cookie_value(h, &cookie_name)).map(str::to_string);
        if let Some(raw) = raw {
            ctx.session = Session::decode(self.config.secret.as_bytes(), &raw);
        }

        chain.next(ctx);

        if ctx.session.is_dirty() {
            let mut cookie_attrs = String::from("; Path=/; HttpOnly");
            if let Some(ttl) = self.config.session_expire_seconds {
                ctx.session.stamp_expiry(ttl);
                cookie_attrs.push_str(&format!("; Max-Age={ttl}"));
            }
            let value = ctx.session.encode(self.config.secret.as_bytes());
            ctx.response.add_cookie(&format!("{cookie_name}={value}{cookie_attrs}"));
        }
    }
}
