//! The route table: parsing, ordered matching, and reverse lookup.
//!
//! Tables are plain text, one route per line:
//!
//! ```text
//! # comment
//! GET     /hotels/{id}          Hotels.Show
//! POST    /hotels/{id}/book     Hotels.Book
//! GET     /about                Pages.Show          ("about")
//! module:admin
//! *       /reports              module:reports
//! GET     /{controller}/{method}  {controller}.{method}
//! ```
//!
//! Matching walks the table top to bottom and takes the first route that
//! accepts the request. A `module:` line splices another table in place,
//! optionally under a path prefix.

use arc_swap::ArcSwap;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, warn};

use crate::controller::Context;
use crate::error::Error;
use crate::filter::{Chain, Stage, names};
use crate::registry::ControllerRegistry;
use crate::result::Reply;
use crate::route::{ActionDefinition, Route, RouteMatch};

static ROUTE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(GET|POST|PUT|DELETE|PATCH|OPTIONS|HEAD|\*)\s+(\S+)\s+([^\s(]+)\s*(?:\((.*)\))?$").unwrap()
});

static MODULE_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:\*\s+(\S+)\s+)?module:([\w-]+)$").unwrap());

/// An ordered, immutable route table. Applications swap a whole table at
/// once rather than mutating one in place.
#[derive(Debug, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    /// Parse a table from text. `source` labels errors; `modules` supplies
    /// the tables `module:` lines splice in.
    pub fn parse(source: &str, text: &str, modules: &HashMap<String, String>) -> Result<Self, Error> {
        let mut routes = Vec::new();
        parse_into(source, text, "", modules, &mut routes)?;
        info!(source, routes = routes.len(), "route table compiled");
        Ok(Self { routes })
    }

    /// Parse a table from a file on disk.
    pub fn load(path: &std::path::Path, modules: &HashMap<String, String>) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::RoutesIo { path: path.display().to_string(), source: e })?;
        Self::parse(&path.display().to_string(), &text, modules)
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Match a request line against the table, first match wins.
    pub fn route(&self, method: &str, path: &str) -> RouteMatch {
        self.routes
            .iter()
            .find_map(|route| route.matches(method, path))
            .unwrap_or(RouteMatch::NotFound)
    }

    /// Build a URL for an action, walking the table in order and taking the
    /// first route that can express it with the given arguments.
    pub fn reverse(&self, action: &str, args: &BTreeMap<String, String>) -> Option<ActionDefinition> {
        self.routes.iter().find_map(|route| route.reverse(action, args))
    }

    /// Check that every literal action in the table resolves against the
    /// registry. Routes with action captures can only be checked at request
    /// time, so they are skipped here.
    pub fn validate(&self, registry: &ControllerRegistry) -> Result<(), Error> {
        for route in &self.routes {
            if !route.is_static_action() {
                continue;
            }
            let Some((controller, method)) = route.action.split_once('.') else {
                return Err(Error::route(format!("malformed action {:?}", route.action), &route.source, route.line));
            };
            if registry.method(controller, method).is_none() {
                return Err(Error::route(
                    format!("action {:?} is not a registered controller method", route.action),
                    &route.source,
                    route.line,
                ));
            }
        }
        Ok(())
    }
}

fn parse_into(
    source: &str,
    text: &str,
    prefix: &str,
    modules: &HashMap<String, String>,
    routes: &mut Vec<Route>,
) -> Result<(), Error> {
    for (index, raw_line) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(caps) = MODULE_LINE.captures(line) {
            let name = &caps[2];
            let module_prefix = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            let Some(module_text) = modules.get(name) else {
                return Err(Error::route(format!("unknown module {name:?}"), source, line_no));
            };
            let joined = join_prefix(prefix, module_prefix);
            parse_into(&format!("{source}:{name}"), module_text, &joined, modules, routes)?;
            continue;
        }

        let Some(caps) = ROUTE_LINE.captures(line) else {
            return Err(Error::route(format!("unrecognized route line {line:?}"), source, line_no));
        };

        let method = &caps[1];
        let path = join_prefix(prefix, &caps[2]);
        let action = &caps[3];
        let fixed_args = caps.get(4).map(|m| parse_fixed_args(m.as_str())).unwrap_or_default();

        routes.push(Route::compile(method, &path, action, fixed_args, source, line_no)?);
    }
    Ok(())
}

fn join_prefix(prefix: &str, path: &str) -> String {
    if prefix.is_empty() {
        return path.to_string();
    }
    let prefix = prefix.trim_end_matches('/');
    if path == "/" { format!("{prefix}/") } else { format!("{prefix}{path}") }
}

/// Parse the fixed-argument list of a route line: comma separated, each
/// value optionally double quoted.
fn parse_fixed_args(raw: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => quoted = !quoted,
            '\\' if quoted => {
                if let Some(&next) = chars.peek() {
                    current.push(next);
                    chars.next();
                }
            }
            ',' if !quoted => {
                args.push(std::mem::take(&mut current).trim().to_string());
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() || !args.is_empty() || !raw.trim().is_empty() {
        args.push(current.trim().to_string());
    }
    args
}

/// Resolves the request against the current route table and records the
/// decision on the context.
///
/// The table lives behind an [`ArcSwap`](arc_swap::ArcSwap) so it can be
/// replaced wholesale while requests are in flight; a request keeps the
/// table it started with.
pub struct RouterStage {
    table: Arc<ArcSwap<Router>>,
    registry: Arc<ControllerRegistry>,
}

impl RouterStage {
    pub fn new(table: Arc<ArcSwap<Router>>, registry: Arc<ControllerRegistry>) -> Self {
        Self { table, registry }
    }
}

impl Stage for RouterStage {
    fn name(&self) -> &'static str {
        names::ROUTER
    }

    fn apply(&self, ctx: &mut Context, chain: Chain<'_>) {
        let table = self.table.load();
        let method = ctx.request.method().as_str().to_string();
        let path = ctx.request.path().to_string();

        let RouteMatch::Action { controller, method: action_method, params, fixed, action } =
            table.route(&method, &path)
        else {
            ctx.result = Some(Reply::not_found(format!("No route matched {method} {path}")));
            return;
        };

        let Some((descriptor, method_descriptor)) = self.registry.method(&controller, &action_method) else {
            warn!(action = %action, "routed action is not registered");
            ctx.result = Some(Reply::not_found(format!("No action {action} is registered")));
            return;
        };

        ctx.params.route = params;
        let arg_names = method_descriptor.args();
        if fixed.len() > arg_names.len() {
            warn!(action = %action, "route supplies more fixed parameters than the action declares");
        }
        for (name, value) in arg_names.iter().zip(fixed) {
            ctx.params.fixed.insert(name.clone(), vec![value]);
        }

        ctx.set_resolution(descriptor, method_descriptor, action);
        chain.next(ctx);
    }
}
