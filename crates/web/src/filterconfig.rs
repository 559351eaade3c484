//! Per-controller and per-action chain overrides.
//!
//! Some endpoints want a different stage chain than the application
//! default: a raw upload endpoint may drop the params stage, an API
//! controller may drop sessions. Overrides are recorded against
//! `"Controller"` or `"Controller.Method"` keys and splice stages by their
//! stable names, so a replacement stage slots in wherever its target sits.
//!
//! At build time the recorded operations are replayed over a copy of the
//! default tail (everything after the configuring stage). A
//! controller-wide operation also touches every action override of that
//! controller recorded so far; more specific keys win at request time.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::controller::Context;
use crate::error::Error;
use crate::filter::{Chain, Stage, names};

/// Where to splice relative to the target stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplicePoint {
    Before,
    After,
}

enum Op {
    Append(Arc<dyn Stage>),
    Remove(String),
    Insert(Arc<dyn Stage>, SplicePoint, String),
}

/// Records override operations for later replay. Keys are
/// case-insensitive `"Controller"` or `"Controller.Method"` strings.
#[derive(Default)]
pub struct FilterConfigurator {
    ops: Vec<(String, Op)>,
}

impl FilterConfigurator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Append a stage immediately before the terminal stage of the chain.
    pub fn add(&mut self, key: &str, stage: Arc<dyn Stage>) -> &mut Self {
        self.ops.push((key.to_ascii_lowercase(), Op::Append(stage)));
        self
    }

    /// Drop the stage with the given name from the chain.
    pub fn remove(&mut self, key: &str, stage_name: &str) -> &mut Self {
        self.ops.push((key.to_ascii_lowercase(), Op::Remove(stage_name.to_string())));
        self
    }

    /// Splice a stage in next to a named target.
    pub fn insert(&mut self, key: &str, stage: Arc<dyn Stage>, point: SplicePoint, target: &str) -> &mut Self {
        self.ops.push((key.to_ascii_lowercase(), Op::Insert(stage, point, target.to_string())));
        self
    }

    /// Replay the recorded operations over the default tail, producing the
    /// per-key chains the configuring stage dispatches to.
    pub(crate) fn build_overrides(
        &self,
        default_tail: &[Arc<dyn Stage>],
    ) -> Result<HashMap<String, Vec<Arc<dyn Stage>>>, Error> {
        let mut overrides: HashMap<String, Vec<Arc<dyn Stage>>> = HashMap::new();

        for (key, op) in &self.ops {
            if !overrides.contains_key(key) {
                // an action override starts from its controller's chain
                // when one exists, otherwise from the default tail
                let base = key
                    .split_once('.')
                    .and_then(|(controller, _)| overrides.get(controller))
                    .map(Vec::clone)
                    .unwrap_or_else(|| default_tail.to_vec());
                overrides.insert(key.clone(), base);
            }

            let mut touched: Vec<String> = vec![key.clone()];
            if !key.contains('.') {
                let action_prefix = format!("{key}.");
                touched.extend(overrides.keys().filter(|k| k.starts_with(&action_prefix)).cloned());
            }

            for touched_key in touched {
                let chain = overrides.get_mut(&touched_key).unwrap_or_else(|| unreachable!());
                apply_op(chain, op, &touched_key)?;
            }
        }

        Ok(overrides)
    }
}

fn apply_op(chain: &mut Vec<Arc<dyn Stage>>, op: &Op, key: &str) -> Result<(), Error> {
    let position = |chain: &[Arc<dyn Stage>], name: &str| chain.iter().position(|s| s.name() == name);
    match op {
        Op::Append(stage) => {
            let at = chain.len().saturating_sub(1);
            chain.insert(at, Arc::clone(stage));
        }
        Op::Remove(name) => {
            let at = position(chain, name)
                .ok_or_else(|| Error::Config(format!("no stage named {name:?} in the chain for {key:?}")))?;
            chain.remove(at);
        }
        Op::Insert(stage, point, target) => {
            let at = position(chain, target)
                .ok_or_else(|| Error::Config(format!("no stage named {target:?} in the chain for {key:?}")))?;
            let at = match point {
                SplicePoint::Before => at,
                SplicePoint::After => at + 1,
            };
            chain.insert(at, Arc::clone(stage));
        }
    }
    Ok(())
}

/// Dispatches to an override chain when the routed action has one, most
/// specific key first.
pub struct ConfiguringStage {
    overrides: Arc<HashMap<String, Vec<Arc<dyn Stage>>>>,
}

impl ConfiguringStage {
    pub fn new(overrides: Arc<HashMap<String, Vec<Arc<dyn Stage>>>>) -> Self {
        Self { overrides }
    }
}

impl Stage for ConfiguringStage {
    fn name(&self) -> &'static str {
        names::FILTER_CONFIG
    }

    fn apply(&self, ctx: &mut Context, chain: Chain<'_>) {
        let action = ctx.action().to_ascii_lowercase();
        let controller = action.split_once('.').map(|(c, _)| c.to_string()).unwrap_or_default();

        match self.overrides.get(&action).or_else(|| self.overrides.get(&controller)) {
            Some(spliced) => {
                debug!(action = ctx.action(), "using an overridden stage chain");
                Chain::new(spliced).next(ctx);
            }
            None => chain.next(ctx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::Reply;
    use std::sync::Mutex;

    struct Tag(&'static str, Arc<Mutex<Vec<&'static str>>>);
    impl Stage for Tag {
        fn name(&self) -> &'static str {
            self.0
        }
        fn apply(&self, ctx: &mut Context, chain: Chain<'_>) {
            self.1.lock().unwrap().push(self.0);
            chain.next(ctx);
        }
    }

    struct Terminal(Arc<Mutex<Vec<&'static str>>>);
    impl Stage for Terminal {
        fn name(&self) -> &'static str {
            "terminal"
        }
        fn apply(&self, ctx: &mut Context, _chain: Chain<'_>) {
            self.0.lock().unwrap().push("terminal");
            ctx.result = Some(Reply::text("done"));
        }
    }

    fn tail(order: &Arc<Mutex<Vec<&'static str>>>) -> Vec<Arc<dyn Stage>> {
        vec![
            Arc::new(Tag("alpha", Arc::clone(order))),
            Arc::new(Tag("beta", Arc::clone(order))),
            Arc::new(Terminal(Arc::clone(order))),
        ]
    }

    fn run_for(action: &str, stage: &ConfiguringStage, default_tail: &[Arc<dyn Stage>]) -> Context {
        let mut ctx = Context::for_tests();
        if !action.is_empty() {
            let descriptor = crate::registry::ControllerBuilder::new("X").method("Y", |_| None).build();
            let controller = Arc::new(descriptor);
            let method = Arc::clone(controller.method("Y").unwrap());
            ctx.set_resolution(controller, method, action);
        }
        stage.apply(&mut ctx, Chain::new(default_tail));
        ctx
    }

    #[test]
    fn remove_and_insert_reshape_the_chain() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let default_tail = tail(&order);

        let mut config = FilterConfigurator::new();
        config.remove("Hotels.Upload", "beta");
        config.insert("Hotels.Upload", Arc::new(Tag("gamma", Arc::clone(&order))), SplicePoint::After, "alpha");

        let overrides = config.build_overrides(&default_tail).unwrap();
        let stage = ConfiguringStage::new(Arc::new(overrides));

        run_for("Hotels.Upload", &stage, &default_tail);
        assert_eq!(*order.lock().unwrap(), vec!["alpha", "gamma", "terminal"]);

        order.lock().unwrap().clear();
        run_for("Hotels.Show", &stage, &default_tail);
        assert_eq!(*order.lock().unwrap(), vec!["alpha", "beta", "terminal"]);
    }

    #[test]
    fn append_lands_before_the_terminal_stage() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let default_tail = tail(&order);

        let mut config = FilterConfigurator::new();
        config.add("Hotels", Arc::new(Tag("audit", Arc::clone(&order))));
        let overrides = config.build_overrides(&default_tail).unwrap();
        let stage = ConfiguringStage::new(Arc::new(overrides));

        run_for("Hotels.Show", &stage, &default_tail);
        assert_eq!(*order.lock().unwrap(), vec!["alpha", "beta", "audit", "terminal"]);
    }

    #[test]
    fn controller_ops_touch_existing_action_overrides() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let default_tail = tail(&order);

        let mut config = FilterConfigurator::new();
        config.insert("Hotels.Upload", Arc::new(Tag("gamma", Arc::clone(&order))), SplicePoint::After, "beta");
        config.remove("Hotels", "alpha");

        let overrides = config.build_overrides(&default_tail).unwrap();
        let stage = ConfiguringStage::new(Arc::new(overrides));

        run_for("Hotels.Upload", &stage, &default_tail);
        assert_eq!(*order.lock().unwrap(), vec!["beta", "gamma", "terminal"]);

        order.lock().unwrap().clear();
        run_for("Hotels.Show", &stage, &default_tail);
        assert_eq!(*order.lock().unwrap(), vec!["beta", "terminal"]);
    }

    #[test]
    fn action_override_beats_controller_override() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let default_tail = tail(&order);

        let mut config = FilterConfigurator::new();
        config.remove("Hotels", "beta");
        config.remove("Hotels.Upload", "alpha");

        let overrides = config.build_overrides(&default_tail).unwrap();
        let stage = ConfiguringStage::new(Arc::new(overrides));

        // The action key exists, so the controller-wide chain never runs.
        run_for("Hotels.Upload", &stage, &default_tail);
        assert_eq!(*order.lock().unwrap(), vec!["terminal"]);

        order.lock().unwrap().clear();
        run_for("Hotels.Show", &stage, &default_tail);
        assert_eq!(*order.lock().unwrap(), vec!["alpha", "terminal"]);
    }

    #[test]
    fn missing_splice_target_is_a_config_error() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let default_tail = tail(&order);

        let mut config = FilterConfigurator::new();
        config.remove("Hotels", "no-such-stage");
        assert!(matches!(config.build_overrides(&default_tail), Err(Error::Config(_))));
    }

    #[test]
    fn keys_are_case_insensitive() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let default_tail = tail(&order);

        let mut config = FilterConfigurator::new();
        config.remove("HOTELS", "beta");
        let overrides = config.build_overrides(&default_tail).unwrap();
        let stage = ConfiguringStage::new(Arc::new(overrides));

        run_for("hotels.show", &stage, &default_tail);
        assert_eq!(*order.lock().unwrap(), vec!["alpha", "terminal"]);
    }
}
