//! The stage chain.
//!
//! Dispatch is an ordered list of [`Stage`]s. Each stage receives the
//! context and the remainder of the chain; it either calls [`Chain::next`]
//! or short-circuits by setting a reply and returning. Stages are
//! identified by stable name strings, which is how per-action overrides
//! splice replacements in without caring about concrete types.
//!
//! The generic stages live here: the panic guard at the head of every
//! chain, the HTTP method override, and parameter decoding. Stages tied to
//! a specific concern live with that concern.

use http::{Method, StatusCode};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::error;

use crate::controller::Context;
use crate::result::Reply;

/// Well-known stage names, usable as splice targets.
pub mod names {
    pub const PANIC_GUARD: &str = "panic-guard";
    pub const METHOD_OVERRIDE: &str = "method-override";
    pub const ROUTER: &str = "router";
    pub const FILTER_CONFIG: &str = "filter-config";
    pub const PARAMS: &str = "params";
    pub const SESSION: &str = "session";
    pub const FLASH: &str = "flash";
    pub const VALIDATION: &str = "validation";
    pub const I18N: &str = "i18n";
    pub const INTERCEPTORS: &str = "interceptors";
    pub const INVOKER: &str = "invoker";
}

/// One link of the dispatch chain.
pub trait Stage: Send + Sync {
    /// Stable identifier, used for logging and for splicing overrides.
    fn name(&self) -> &'static str;

    fn apply(&self, ctx: &mut Context, chain: Chain<'_>);
}

/// The not-yet-run remainder of the chain.
#[derive(Clone, Copy)]
pub struct Chain<'a> {
    stages: &'a [Arc<dyn Stage>],
}

impl<'a> Chain<'a> {
    pub fn new(stages: &'a [Arc<dyn Stage>]) -> Self {
        Self { stages }
    }

    /// Run the next stage, handing it the rest of the chain. Past the end
    /// this is a no-op; the terminal stage simply never calls it.
    pub fn next(self, ctx: &mut Context) {
        if let Some((stage, rest)) = self.stages.split_first() {
            stage.apply(ctx, Chain { stages: rest });
        }
    }
}

/// Head of every chain: converts a panic anywhere downstream into a 500
/// reply so the worker survives.
pub struct PanicGuard;

impl Stage for PanicGuard {
    fn name(&self) -> &'static str {
        names::PANIC_GUARD
    }

    fn apply(&self, ctx: &mut Context, chain: Chain<'_>) {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| chain.next(ctx))) {
            let detail = panic_message(&*panic);
            error!(action = ctx.action(), panic = %detail, "request handler panicked");
            ctx.result = Some(Reply::server_error("The application raised a panic", Some(detail)));
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "opaque panic payload".to_string()
    }
}

/// Lets HTML forms express PUT, PATCH, and DELETE through a hidden
/// `_method` field on a POST.
pub struct MethodOverride;

impl MethodOverride {
    const FIELD: &'static str = "_method";
}

impl Stage for MethodOverride {
    fn name(&self) -> &'static str {
        names::METHOD_OVERRIDE
    }

    fn apply(&self, ctx: &mut Context, chain: Chain<'_>) {
        if ctx.request.method() == Method::POST && ctx.request.is_form_urlencoded() {
            let field = serde_urlencoded::from_bytes::<Vec<(String, String)>>(ctx.request.body())
                .ok()
                .and_then(|pairs| pairs.into_iter().find(|(name, _)| name == Self::FIELD));
            if let Some((_, value)) = field {
                let method = value.to_ascii_uppercase().parse::<Method>().ok();
                match method {
                    Some(m) if [Method::POST, Method::PUT, Method::PATCH, Method::DELETE].contains(&m) => {
                        ctx.request.set_method(m);
                    }
                    _ => {
                        ctx.result = Some(Reply::Status(StatusCode::METHOD_NOT_ALLOWED));
                        return;
                    }
                }
            }
        }
        chain.next(ctx);
    }
}

/// Decodes query string and body into the parameter bag.
pub struct ParamsStage;

impl Stage for ParamsStage {
    fn name(&self) -> &'static str {
        names::PARAMS
    }

    fn apply(&self, ctx: &mut Context, chain: Chain<'_>) {
        let Context { params, request, .. } = ctx;
        params.parse(request);
        chain.next(ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    struct Tag(&'static str, &'static Mutex<Vec<&'static str>>);
    use std::sync::Mutex;

    impl Stage for Tag {
        fn name(&self) -> &'static str {
            self.0
        }

        fn apply(&self, ctx: &mut Context, chain: Chain<'_>) {
            self.1.lock().unwrap().push(self.0);
            chain.next(ctx);
        }
    }

    #[test]
    fn stages_run_in_order() {
        static ORDER: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());
        let stages: Vec<Arc<dyn Stage>> = vec![Arc::new(Tag("a", &ORDER)), Arc::new(Tag("b", &ORDER))];
        let mut ctx = Context::for_tests();
        Chain::new(&stages).next(&mut ctx);
        assert_eq!(*ORDER.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn panic_guard_turns_panics_into_error_replies() {
        struct Exploding;
        impl Stage for Exploding {
            fn name(&self) -> &'static str {
                "exploding"
            }
            fn apply(&self, _ctx: &mut Context, _chain: Chain<'_>) {
                panic!("the database is on fire");
            }
        }

        let stages: Vec<Arc<dyn Stage>> = vec![Arc::new(PanicGuard), Arc::new(Exploding)];
        let mut ctx = Context::for_tests();
        Chain::new(&stages).next(&mut ctx);

        let Some(Reply::Error { detail, .. }) = ctx.result else { panic!("expected an error reply") };
        assert_eq!(detail.as_deref(), Some("the database is on fire"));
    }

    fn post(body: &'static str) -> Context {
        let request = http::Request::builder()
            .method(Method::POST)
            .uri("/hotels/3")
            .header(http::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Bytes::from_static(body.as_bytes()))
            .unwrap();
        Context::new(request.into())
    }

    #[test]
    fn method_override_rewrites_the_verb() {
        let mut ctx = post("_method=delete&confirm=yes");
        MethodOverride.apply(&mut ctx, Chain::new(&[]));
        assert_eq!(ctx.request.method(), Method::DELETE);
        assert!(ctx.result.is_none());
    }

    #[test]
    fn unknown_override_is_rejected() {
        let mut ctx = post("_method=BREW");
        MethodOverride.apply(&mut ctx, Chain::new(&[]));
        assert_eq!(ctx.request.method(), Method::POST);
        assert_eq!(ctx.result, Some(Reply::Status(StatusCode::METHOD_NOT_ALLOWED)));
    }

    #[test]
    fn plain_posts_pass_through() {
        let mut ctx = post("name=rob");
        MethodOverride.apply(&mut ctx, Chain::new(&[]));
        assert_eq!(ctx.request.method(), Method::POST);
    }
}
