//! The per-request context.
//!
//! One [`Context`] travels through the whole stage chain. It carries the
//! request, the parameter bag, session, flash, validation state, and the
//! eventual [`Reply`]. Actions and hooks receive a mutable borrow of it;
//! there is no hidden per-controller state anywhere else.

use http::{HeaderMap, HeaderValue, StatusCode, header};
use std::sync::Arc;
use tiller_http::Request;
use tracing::warn;

use crate::binder::FromParams;
use crate::flash::Flash;
use crate::i18n::Messages;
use crate::params::Params;
use crate::registry::{ControllerDescriptor, MethodDescriptor};
use crate::result::Reply;
use crate::session::Session;
use crate::validation::Validation;

/// Response fields stages can set before a reply is rendered. They are
/// merged over the rendered reply, so an explicit status or header here
/// wins.
#[derive(Debug, Default)]
pub struct ResponseState {
    pub status: Option<StatusCode>,
    pub headers: HeaderMap,
}

impl ResponseState {
    pub fn set_header(&mut self, name: header::HeaderName, value: &str) {
        match HeaderValue::from_str(value) {
            Ok(value) => {
                self.headers.insert(name, value);
            }
            Err(_) => warn!(header = %name, "dropping header with invalid value"),
        }
    }

    /// Append a `Set-Cookie` header.
    pub fn add_cookie(&mut self, cookie: &str) {
        match HeaderValue::from_str(cookie) {
            Ok(value) => {
                self.headers.append(header::SET_COOKIE, value);
            }
            Err(_) => warn!("dropping cookie with invalid value"),
        }
    }
}

pub struct Context {
    pub request: Request,
    pub response: ResponseState,
    pub params: Params,
    pub session: Session,
    pub flash: Flash,
    pub validation: Validation,
    /// Locale resolved for this request; empty until the i18n stage ran.
    pub locale: String,
    /// The reply to render. Stages short-circuit by setting it.
    pub result: Option<Reply>,

    action: String,
    controller: Option<Arc<ControllerDescriptor>>,
    method: Option<Arc<MethodDescriptor>>,
    messages: Option<Arc<Messages>>,
}

impl Context {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            response: ResponseState::default(),
            params: Params::new(),
            session: Session::new(),
            flash: Flash::new(),
            validation: Validation::new(),
            locale: String::new(),
            result: None,
            action: String::new(),
            controller: None,
            method: None,
            messages: None,
        }
    }

    /// The resolved `Controller.Method`, empty until routing happened.
    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn controller(&self) -> Option<&Arc<ControllerDescriptor>> {
        self.controller.as_ref()
    }

    pub fn method_descriptor(&self) -> Option<&Arc<MethodDescriptor>> {
        self.method.as_ref()
    }

    /// Record the routing decision. Called by the router stage once per
    /// request.
    pub fn set_resolution(
        &mut self,
        controller: Arc<ControllerDescriptor>,
        method: Arc<MethodDescriptor>,
        action: impl Into<String>,
    ) {
        self.action = action.into();
        self.controller = Some(controller);
        self.method = Some(method);
    }

    /// Bind an action argument from the parameter bag.
    pub fn bind<T: FromParams>(&self, name: &str) -> T {
        self.params.bind(name)
    }

    pub(crate) fn set_messages(&mut self, messages: Arc<Messages>) {
        self.messages = Some(messages);
    }

    /// Look up a localized message for the request's locale. Without an
    /// installed message table the key itself comes back.
    pub fn message(&self, key: &str) -> String {
        self.messages
            .as_ref()
            .and_then(|m| m.lookup(&self.locale, key))
            .unwrap_or_else(|| key.to_string())
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        let request = http::Request::builder().uri("/").body(bytes::Bytes::new()).unwrap();
        Self::new(request.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_state_collects_cookies() {
        let mut state = ResponseState::default();
        state.add_cookie("A=1; Path=/");
        state.add_cookie("B=2; Path=/");
        let cookies: Vec<_> = state.headers.get_all(header::SET_COOKIE).iter().collect();
        assert_eq!(cookies.len(), 2);
    }

    #[test]
    fn message_falls_back_to_the_key() {
        let ctx = Context::for_tests();
        assert_eq!(ctx.message("greeting"), "greeting");
    }

    #[test]
    fn bind_reads_the_parameter_bag() {
        let mut ctx = Context::for_tests();
        ctx.params.route.insert("id".to_string(), vec!["7".to_string()]);
        ctx.params.recalculate();
        assert_eq!(ctx.bind::<i32>("id"), 7);
    }
}
