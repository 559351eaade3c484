//! The terminal stage: invoking the resolved action.

use tracing::warn;

use crate::controller::Context;
use crate::filter::{Chain, Stage, names};
use crate::result::Reply;

/// Calls the routed action method. Always the last stage; it never calls
/// the (empty) remainder of the chain.
pub struct InvokerStage;

impl Stage for InvokerStage {
    fn name(&self) -> &'static str {
        names::INVOKER
    }

    fn apply(&self, ctx: &mut Context, _chain: Chain<'_>) {
        if ctx.result.is_some() {
            return;
        }

        let Some(method) = ctx.method_descriptor().cloned() else {
            warn!("invoker reached without a resolved action");
            ctx.result = Some(Reply::not_found("No action resolved for this request"));
            return;
        };

        if let Some(reply) = method.invoke(ctx) {
            ctx.result = Some(reply);
        } else if ctx.result.is_none() {
            warn!(action = ctx.action(), "action finished without producing a reply");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ControllerBuilder;
    use std::sync::Arc;

    fn ctx_for(action: &str, handler: impl Fn(&mut Context) -> Option<Reply> + Send + Sync + 'static) -> Context {
        let descriptor = ControllerBuilder::new("Hotels").method_with_args("Show", &["id"], handler).build();
        let mut ctx = Context::for_tests();
        let controller = Arc::new(descriptor);
        let method = Arc::clone(controller.method("Show").unwrap());
        ctx.set_resolution(controller, method, action);
        ctx
    }

    #[test]
    fn invokes_the_action_with_bound_arguments() {
        let mut ctx = ctx_for("Hotels.Show", |ctx| {
            let id: i64 = ctx.bind("id");
            Some(Reply::text(format!("hotel {id}")))
        });
        ctx.params.route.insert("id".to_string(), vec!["3".to_string()]);
        ctx.params.recalculate();

        InvokerStage.apply(&mut ctx, Chain::new(&[]));
        assert_eq!(ctx.result, Some(Reply::text("hotel 3")));
    }

    #[test]
    fn existing_reply_is_left_alone() {
        let mut ctx = ctx_for("Hotels.Show", |_| Some(Reply::text("should not run")));
        ctx.result = Some(Reply::redirect("/login"));

        InvokerStage.apply(&mut ctx, Chain::new(&[]));
        assert_eq!(ctx.result, Some(Reply::redirect("/login")));
    }

    #[test]
    fn unresolved_action_is_not_found() {
        let mut ctx = Context::for_tests();
        InvokerStage.apply(&mut ctx, Chain::new(&[]));
        assert!(matches!(ctx.result, Some(Reply::NotFound(_))));
    }
}
