//! A single route: compilation, forward matching, and reverse lookup.
//!
//! A route line pairs an HTTP method and a path template with an action.
//! Path segments may capture, `{id}` matching one segment or `{<[0-9]+>id}`
//! constraining the capture with a custom pattern. The action is usually a
//! literal `Controller.Method`, but may itself use captured names, as in
//! `GET /{controller}/{method}  {controller}.{method}`.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use tracing::error;

use crate::error::Error;
use crate::params::Values;
use crate::util::{escape_path_segment, unescape};

/// `{name}` or `{<pattern>name}` inside a path or action template.
static CAPTURE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{(?:<([^>]+)>)?([a-zA-Z_][a-zA-Z0-9_]*)\}").unwrap());

/// The action name a route uses to force a not-found response.
pub const NOT_FOUND_ACTION: &str = "404";

#[derive(Debug, Clone)]
struct PathCapture {
    name: String,
    /// Anchored constraint for reverse lookup; `None` for the default
    /// one-segment capture.
    constraint: Option<Regex>,
}

/// One compiled entry of the route table.
#[derive(Debug, Clone)]
pub struct Route {
    pub method: String,
    pub path: String,
    pub action: String,
    pub fixed_args: Vec<String>,
    /// Location in the routes file, for error reporting.
    pub source: String,
    pub line: usize,

    path_pattern: Regex,
    captures: Vec<PathCapture>,
    /// Set when the action template itself contains captures.
    action_pattern: Option<Regex>,
}

/// The outcome of matching one request against the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteMatch {
    /// Either no route matched or a `404` route did.
    NotFound,
    Action {
        controller: String,
        method: String,
        /// Path captures, keyed by capture name.
        params: Values,
        /// Fixed arguments from the route line, in declaration order.
        fixed: Vec<String>,
        /// The resolved `Controller.Method` string.
        action: String,
    },
}

/// A reverse-routing result: enough to render a link or an HTML form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionDefinition {
    pub url: String,
    pub method: String,
    /// True when the route accepts any method; callers typically render a
    /// GET link for these.
    pub star: bool,
    pub action: String,
    pub args: BTreeMap<String, String>,
}

impl Route {
    /// Compile a route line. `source` and `line` locate it for errors.
    pub fn compile(
        method: &str,
        path: &str,
        action: &str,
        fixed_args: Vec<String>,
        source: &str,
        line: usize,
    ) -> Result<Self, Error> {
        if !path.starts_with('/') {
            return Err(Error::route(format!("path must be absolute: {path:?}"), source, line));
        }
        let (path_pattern, captures) = compile_path(path, source, line)?;
        let action_pattern = compile_action(action, &captures, source, line)?;

        Ok(Self {
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
            action: action.to_string(),
            fixed_args,
            source: source.to_string(),
            line,
            path_pattern,
            captures,
            action_pattern,
        })
    }

    /// Names captured by the path template, in order of appearance.
    pub fn capture_names(&self) -> impl Iterator<Item = &str> {
        self.captures.iter().map(|c| c.name.as_str())
    }

    /// Whether the action is a literal `Controller.Method` with no captures.
    pub fn is_static_action(&self) -> bool {
        self.action_pattern.is_none() && self.action != NOT_FOUND_ACTION
    }

    fn accepts_method(&self, method: &str) -> bool {
        self.method == "*" || self.method == method || (method == "HEAD" && self.method == "GET")
    }

    /// Try this route against a request line. `None` means the next route
    /// should be consulted.
    pub fn matches(&self, method: &str, path: &str) -> Option<RouteMatch> {
        if !self.accepts_method(&method.to_ascii_uppercase()) {
            return None;
        }
        let found = self.path_pattern.captures(path)?;

        if self.action == NOT_FOUND_ACTION {
            return Some(RouteMatch::NotFound);
        }

        let mut params = Values::new();
        for capture in &self.captures {
            if let Some(value) = found.name(&capture.name) {
                params.insert(capture.name.clone(), vec![unescape(value.as_str())]);
            }
        }

        let action = CAPTURE.replace_all(&self.action, |caps: &regex::Captures<'_>| {
            params.get(&caps[2]).and_then(|v| v.first()).cloned().unwrap_or_default()
        });

        let Some((controller, action_method)) = split_action(&action) else {
            error!(action = %action, source = %self.source, line = self.line, "route resolved to a malformed action");
            return None;
        };

        Some(RouteMatch::Action {
            controller: controller.to_string(),
            method: action_method.to_string(),
            params,
            fixed: self.fixed_args.clone(),
            action: action.into_owned(),
        })
    }

    /// Try to build a URL for `action` from this route. `None` means the
    /// route cannot express the action or the arguments do not satisfy its
    /// constraints.
    pub fn reverse(&self, action: &str, args: &BTreeMap<String, String>) -> Option<ActionDefinition> {
        if self.action == NOT_FOUND_ACTION {
            return None;
        }

        let mut merged = args.clone();
        match &self.action_pattern {
            None => {
                if !self.action.eq_ignore_ascii_case(action) {
                    return None;
                }
            }
            Some(pattern) => {
                let caps = pattern.captures(action)?;
                for name in pattern.capture_names().flatten() {
                    if let Some(value) = caps.name(name) {
                        merged.insert(name.to_string(), value.as_str().to_string());
                    }
                }
            }
        }

        // Every path capture needs a satisfying argument.
        for capture in &self.captures {
            let value = merged.get(&capture.name)?;
            if let Some(constraint) = &capture.constraint {
                if !constraint.is_match(value) {
                    return None;
                }
            }
        }

        let mut url = CAPTURE
            .replace_all(&self.path, |caps: &regex::Captures<'_>| {
                merged.get(&caps[2]).map(|v| escape_path_segment(v)).unwrap_or_default()
            })
            .into_owned();
        for capture in &self.captures {
            merged.remove(&capture.name);
        }

        // Arguments the path did not consume go into the query string.
        if !merged.is_empty() {
            let query = serde_urlencoded::to_string(merged.iter().collect::<Vec<_>>()).unwrap_or_default();
            if !query.is_empty() {
                url.push('?');
                url.push_str(&query);
            }
        }

        let star = self.method == "*";
        Some(ActionDefinition {
            url,
            method: if star { "GET".to_string() } else { self.method.clone() },
            star,
            action: action.to_string(),
            args: args.clone(),
        })
    }
}

fn split_action(action: &str) -> Option<(&str, &str)> {
    let mut parts = action.splitn(2, '.');
    let controller = parts.next()?;
    let method = parts.next()?;
    if controller.is_empty() || method.is_empty() || method.contains('.') {
        return None;
    }
    Some((controller, method))
}

fn compile_path(path: &str, source: &str, line: usize) -> Result<(Regex, Vec<PathCapture>), Error> {
    let mut pattern = String::from("^");
    let mut captures = Vec::new();
    let mut last = 0;

    for caps in CAPTURE.captures_iter(path) {
        let whole = caps.get(0).unwrap();
        pattern.push_str(&regex::escape(&path[last..whole.start()]));
        last = whole.end();

        let name = caps[2].to_string();
        if captures.iter().any(|c: &PathCapture| c.name == name) {
            return Err(Error::route(format!("duplicate capture {name:?} in path"), source, line));
        }

        let (fragment, constraint) = match caps.get(1) {
            Some(custom) => {
                let custom = custom.as_str();
                let constraint = Regex::new(&format!("^(?:{custom})$"))
                    .map_err(|e| Error::route(format!("invalid pattern for capture {name:?}: {e}"), source, line))?;
                (custom.to_string(), Some(constraint))
            }
            None => ("[^/]+".to_string(), None),
        };
        pattern.push_str(&format!("(?P<{name}>{fragment})"));
        captures.push(PathCapture { name, constraint });
    }

    pattern.push_str(&regex::escape(&path[last..]));
    pattern.push('$');

    let path_pattern =
        Regex::new(&pattern).map_err(|e| Error::route(format!("invalid path template: {e}"), source, line))?;
    Ok((path_pattern, captures))
}

fn compile_action(
    action: &str,
    captures: &[PathCapture],
    source: &str,
    line: usize,
) -> Result<Option<Regex>, Error> {
    if !CAPTURE.is_match(action) {
        return Ok(None);
    }

    let mut pattern = String::from("^");
    let mut last = 0;
    for caps in CAPTURE.captures_iter(action) {
        let whole = caps.get(0).unwrap();
        let name = &caps[2];
        if !captures.iter().any(|c| c.name == name) {
            return Err(Error::route(format!("action references {name:?}, which the path does not capture"), source, line));
        }
        pattern.push_str(&regex::escape(&action[last..whole.start()]));
        pattern.push_str(&format!("(?P<{name}>[^.]+)"));
        last = whole.end();
    }
    pattern.push_str(&regex::escape(&action[last..]));
    pattern.push('$');

    let action_pattern =
        Regex::new(&pattern).map_err(|e| Error::route(format!("invalid action template: {e}"), source, line))?;
    Ok(Some(action_pattern))
}
