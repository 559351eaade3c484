//! Interceptors: cross-cutting callbacks around action invocation.
//!
//! Two sources feed this stage. Controllers carry their own lifecycle
//! hooks, mixins already merged in, and applications register
//! [`Interceptors`] that target every controller or one by name. Execution
//! order per request:
//!
//! 1. before: controller hooks, then registered interceptors; the first
//!    one returning a reply skips the action entirely
//! 2. the rest of the chain (the invoker)
//! 3. after: registered interceptors, then controller hooks; each may
//!    substitute the reply, the last one wins
//! 4. finally hooks and interceptors, always, even after a panic
//!
//! A panic below this stage is caught here: panic hooks get a chance to
//! substitute a reply, otherwise a 500 error reply is installed.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::error;

use crate::controller::Context;
use crate::filter::{Chain, Stage, names, panic_message};
use crate::registry::Hook;
use crate::result::Reply;

/// The point in the action lifecycle an interceptor attaches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum When {
    Before,
    After,
    Panic,
    Finally,
}

/// Which controllers an interceptor applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    All,
    Controller(String),
}

impl Target {
    fn applies_to(&self, controller: &str) -> bool {
        match self {
            Self::All => true,
            Self::Controller(name) => name.eq_ignore_ascii_case(controller),
        }
    }
}

struct Interceptor {
    when: When,
    target: Target,
    func: Hook,
}

/// Registered interceptors, kept in registration order.
#[derive(Default)]
pub struct Interceptors {
    list: Vec<Interceptor>,
}

impl Interceptors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        when: When,
        target: Target,
        func: impl Fn(&mut Context) -> Option<Reply> + Send + Sync + 'static,
    ) {
        self.list.push(Interceptor { when, target, func: Arc::new(func) });
    }

    fn matching(&self, when: When, controller: &str) -> Vec<Hook> {
        self.list
            .iter()
            .filter(|i| i.when == when && i.target.applies_to(controller))
            .map(|i| Arc::clone(&i.func))
            .collect()
    }
}

/// Runs hooks and interceptors around the rest of the chain.
pub struct InterceptorStage {
    interceptors: Arc<Interceptors>,
}

impl InterceptorStage {
    pub fn new(interceptors: Arc<Interceptors>) -> Self {
        Self { interceptors }
    }

    /// `(hooks, interceptors)` for one lifecycle point.
    fn collect(&self, ctx: &Context, when: When) -> (Vec<Hook>, Vec<Hook>) {
        let Some(controller) = ctx.controller() else { return (Vec::new(), Vec::new()) };
        let hooks = controller.hooks();
        let own = match when {
            When::Before => hooks.before.clone(),
            When::After => hooks.after.clone(),
            When::Panic => hooks.panic.clone(),
            When::Finally => hooks.finally.clone(),
        };
        (own, self.interceptors.matching(when, controller.name()))
    }
}

impl Stage for InterceptorStage {
    fn name(&self) -> &'static str {
        names::INTERCEPTORS
    }

    fn apply(&self, ctx: &mut Context, chain: Chain<'_>) {
        let (before_hooks, before_interceptors) = self.collect(ctx, When::Before);
        let (after_hooks, after_interceptors) = self.collect(ctx, When::After);

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let mut skipped = false;
            for hook in before_hooks.iter().chain(&before_interceptors) {
                if let Some(reply) = hook(ctx) {
                    ctx.result = Some(reply);
                    skipped = true;
                    break;
                }
            }

            if !skipped {
                chain.next(ctx);
            }

            for hook in after_interceptors.iter().chain(&after_hooks) {
                if let Some(reply) = hook(ctx) {
                    ctx.result = Some(reply);
                }
            }
        }));

        if let Err(panic) = outcome {
            let detail = panic_message(&*panic);
            error!(action = ctx.action(), panic = %detail, "action panicked");

            let (panic_hooks, panic_interceptors) = self.collect(ctx, When::Panic);
            let mut substituted = false;
            for hook in panic_hooks.iter().chain(&panic_interceptors) {
                if let Some(reply) = hook(ctx) {
                    ctx.result = Some(reply);
                    substituted = true;
                }
            }
            if !substituted {
                ctx.result = Some(Reply::server_error("The application raised a panic", Some(detail)));
            }
        }

        let (finally_hooks, finally_interceptors) = self.collect(ctx, When::Finally);
        for hook in finally_hooks.iter().chain(&finally_interceptors) {
            if let Some(reply) = hook(ctx) {
                ctx.result = Some(reply);
            }
        }
    }
}
