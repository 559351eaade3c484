//! The controller registry.
//!
//! Controllers are registered as explicit descriptors: a name, a set of
//! action methods with their declared argument names, and lifecycle hooks.
//! Lookup is case insensitive, matching how actions are written in route
//! tables.
//!
//! Shared behavior is composed with mixins. A mixin contributes a
//! [`HookSet`]; its before hooks run ahead of the controller's own, while
//! after, panic, and finally hooks run controller-first.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::error;

use crate::controller::Context;
use crate::result::Reply;

/// An action handler. Returning `None` leaves any reply already present on
/// the context in place.
pub type Handler = Arc<dyn Fn(&mut Context) -> Option<Reply> + Send + Sync>;

/// A lifecycle hook, same shape as a handler. A before hook returning
/// `Some` short-circuits the action.
pub type Hook = Arc<dyn Fn(&mut Context) -> Option<Reply> + Send + Sync>;

/// Lifecycle hooks for one controller or mixin.
#[derive(Default, Clone)]
pub struct HookSet {
    pub before: Vec<Hook>,
    pub after: Vec<Hook>,
    pub panic: Vec<Hook>,
    pub finally: Vec<Hook>,
}

impl HookSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn before(mut self, hook: impl Fn(&mut Context) -> Option<Reply> + Send + Sync + 'static) -> Self {
        self.before.push(Arc::new(hook));
        self
    }

    pub fn after(mut self, hook: impl Fn(&mut Context) -> Option<Reply> + Send + Sync + 'static) -> Self {
        self.after.push(Arc::new(hook));
        self
    }

    pub fn panic(mut self, hook: impl Fn(&mut Context) -> Option<Reply> + Send + Sync + 'static) -> Self {
        self.panic.push(Arc::new(hook));
        self
    }

    pub fn finally(mut self, hook: impl Fn(&mut Context) -> Option<Reply> + Send + Sync + 'static) -> Self {
        self.finally.push(Arc::new(hook));
        self
    }

    /// Merge a mixin's hooks into this set.
    fn absorb(&mut self, mixin: HookSet) {
        // mixin before hooks run first, everything else controller-first
        let own_before = std::mem::take(&mut self.before);
        self.before = mixin.before;
        self.before.extend(own_before);
        self.after.extend(mixin.after);
        self.panic.extend(mixin.panic);
        self.finally.extend(mixin.finally);
    }
}

/// One action method of a controller.
#[derive(Clone)]
pub struct MethodDescriptor {
    name: String,
    lower_name: String,
    args: Vec<String>,
    handler: Handler,
}

impl MethodDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared argument names, in declaration order. Fixed route arguments
    /// are assigned positionally against this list.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn invoke(&self, ctx: &mut Context) -> Option<Reply> {
        (self.handler)(ctx)
    }
}

impl std::fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodDescriptor").field("name", &self.name).field("args", &self.args).finish()
    }
}

/// A registered controller: its methods plus the hooks that wrap every
/// action, mixins already merged in.
pub struct ControllerDescriptor {
    name: String,
    methods: Vec<Arc<MethodDescriptor>>,
    hooks: HookSet,
}

impl ControllerDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hooks(&self) -> &HookSet {
        &self.hooks
    }

    pub fn method(&self, name: &str) -> Option<&Arc<MethodDescriptor>> {
        self.methods.iter().find(|m| m.lower_name == name.to_ascii_lowercase())
    }
}

impl std::fmt::Debug for ControllerDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerDescriptor")
            .field("name", &self.name)
            .field("methods", &self.methods)
            .finish()
    }
}

/// Fluent construction of a [`ControllerDescriptor`].
pub struct ControllerBuilder {
    name: String,
    methods: Vec<Arc<MethodDescriptor>>,
    hooks: HookSet,
    mixins: Vec<HookSet>,
}

impl ControllerBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), methods: Vec::new(), hooks: HookSet::new(), mixins: Vec::new() }
    }

    pub fn method(self, name: &str, handler: impl Fn(&mut Context) -> Option<Reply> + Send + Sync + 'static) -> Self {
        self.method_with_args(name, &[], handler)
    }

    pub fn method_with_args(
        mut self,
        name: &str,
        args: &[&str],
        handler: impl Fn(&mut Context) -> Option<Reply> + Send + Sync + 'static,
    ) -> Self {
        self.methods.push(Arc::new(MethodDescriptor {
            name: name.to_string(),
            lower_name: name.to_ascii_lowercase(),
            args: args.iter().map(|a| a.to_string()).collect(),
            handler: Arc::new(handler),
        }));
        self
    }

    pub fn before(mut self, hook: impl Fn(&mut Context) -> Option<Reply> + Send + Sync + 'static) -> Self {
        self.hooks.before.push(Arc::new(hook));
        self
    }

    pub fn after(mut self, hook: impl Fn(&mut Context) -> Option<Reply> + Send + Sync + 'static) -> Self {
        self.hooks.after.push(Arc::new(hook));
        self
    }

    pub fn panic(mut self, hook: impl Fn(&mut Context) -> Option<Reply> + Send + Sync + 'static) -> Self {
        self.hooks.panic.push(Arc::new(hook));
        self
    }

    pub fn finally(mut self, hook: impl Fn(&mut Context) -> Option<Reply> + Send + Sync + 'static) -> Self {
        self.hooks.finally.push(Arc::new(hook));
        self
    }

    /// Compose a mixin's hooks into the controller.
    pub fn mixin(mut self, hooks: HookSet) -> Self {
        self.mixins.push(hooks);
        self
    }

    pub fn build(self) -> ControllerDescriptor {
        let mut hooks = self.hooks;
        for mixin in self.mixins {
            hooks.absorb(mixin);
        }
        ControllerDescriptor { name: self.name, methods: self.methods, hooks }
    }
}

/// All controllers an application registered, keyed case-insensitively.
#[derive(Default)]
pub struct ControllerRegistry {
    controllers: HashMap<String, Arc<ControllerDescriptor>>,
}

impl ControllerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a controller. A duplicate name is logged and ignored; the
    /// first registration wins.
    pub fn register(&mut self, descriptor: ControllerDescriptor) {
        let key = descriptor.name.to_ascii_lowercase();
        if self.controllers.contains_key(&key) {
            error!(controller = %descriptor.name, "controller registered twice, keeping the first");
            return;
        }
        self.controllers.insert(key, Arc::new(descriptor));
    }

    pub fn controller(&self, name: &str) -> Option<&Arc<ControllerDescriptor>> {
        self.controllers.get(&name.to_ascii_lowercase())
    }

    /// Resolve `Controller.Method`, both halves case insensitive.
    pub fn method(&self, controller: &str, method: &str) -> Option<(Arc<ControllerDescriptor>, Arc<MethodDescriptor>)> {
        let descriptor = self.controller(controller)?;
        let method = descriptor.method(method)?;
        Some((Arc::clone(descriptor), Arc::clone(method)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::Reply;

    fn sample_registry() -> ControllerRegistry {
        let mut registry = ControllerRegistry::new();
        registry.register(
            ControllerBuilder::new("Hotels")
                .method_with_args("Show", &["id"], |_| Some(Reply::text("shown")))
                .method("Index", |_| Some(Reply::text("index")))
                .build(),
        );
        registry
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let registry = sample_registry();
        assert!(registry.method("hotels", "show").is_some());
        assert!(registry.method("HOTELS", "SHOW").is_some());
        assert!(registry.method("Hotels", "Missing").is_none());
        assert!(registry.method("Missing", "Show").is_none());
    }

    #[test]
    fn first_registration_wins() {
        let mut registry = sample_registry();
        registry.register(ControllerBuilder::new("hotels").method("Other", |_| None).build());
        assert!(registry.method("Hotels", "Show").is_some());
        assert!(registry.method("Hotels", "Other").is_none());
    }

    #[test]
    fn method_args_keep_declaration_order() {
        let registry = sample_registry();
        let (_, method) = registry.method("Hotels", "Show").unwrap();
        assert_eq!(method.args(), &["id".to_string()]);
    }

    #[test]
    fn mixin_before_hooks_lead_own_after_hooks_trail() {
        use std::sync::Mutex;
        let order = Arc::new(Mutex::new(Vec::new()));

        let push = |order: &Arc<Mutex<Vec<&'static str>>>, tag: &'static str| {
            let order = Arc::clone(order);
            move |_: &mut Context| {
                order.lock().unwrap().push(tag);
                None
            }
        };

        let mixin = HookSet::new().before(push(&order, "mixin-before")).after(push(&order, "mixin-after"));
        let descriptor = ControllerBuilder::new("C")
            .before(push(&order, "own-before"))
            .after(push(&order, "own-after"))
            .mixin(mixin)
            .build();

        let mut ctx = Context::for_tests();
        for hook in &descriptor.hooks().before {
            hook(&mut ctx);
        }
        for hook in &descriptor.hooks().after {
            hook(&mut ctx);
        }
        assert_eq!(*order.lock().unwrap(), vec!["mixin-before", "own-before", "own-after", "mixin-after"]);
    }
}
