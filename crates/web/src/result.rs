//! Action results.
//!
//! An action finishes by producing a [`Reply`], an explicit value describing
//! the response. Stages inspect and replace replies freely; nothing in the
//! dispatch path is communicated by panicking.

use bytes::Bytes;
use http::{HeaderValue, Response, StatusCode, header};
use serde::Serialize;
use tiller_http::ResponseBody;
use tracing::error;

use crate::template::{TemplateLoader, error_page, not_found_page};

/// What an action (or a short-circuiting stage) decided to send back.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Text(String),
    Html(String),
    /// Pre-serialized JSON.
    Json(String),
    Binary { content: Bytes, content_type: String },
    /// A view rendered through the installed [`TemplateLoader`].
    View { name: String, args: serde_json::Map<String, serde_json::Value> },
    /// 302 to the given location.
    Redirect(String),
    /// A bare status with an empty body.
    Status(StatusCode),
    NotFound(String),
    /// A server error page. `detail` is shown in development mode only.
    Error { title: String, description: String, detail: Option<String> },
}

impl Reply {
    pub fn text(body: impl Into<String>) -> Self {
        Self::Text(body.into())
    }

    pub fn html(body: impl Into<String>) -> Self {
        Self::Html(body.into())
    }

    /// Serialize a value to JSON now; a serialization failure becomes an
    /// error reply instead of a panic.
    pub fn json<T: Serialize>(value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(body) => Self::Json(body),
            Err(e) => {
                error!(cause = %e, "error serializing a json reply");
                Self::server_error("Serialization failed", Some(e.to_string()))
            }
        }
    }

    pub fn binary(content: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self::Binary { content: content.into(), content_type: content_type.into() }
    }

    pub fn view(name: impl Into<String>, args: serde_json::Map<String, serde_json::Value>) -> Self {
        Self::View { name: name.into(), args }
    }

    pub fn redirect(location: impl Into<String>) -> Self {
        Self::Redirect(location.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn server_error(description: impl Into<String>, detail: Option<String>) -> Self {
        Self::Error { title: "Application error".to_string(), description: description.into(), detail }
    }

    /// Render into a transport response. `dev_mode` reveals error detail;
    /// `templates` serves [`Reply::View`].
    pub fn into_response(self, dev_mode: bool, templates: Option<&dyn TemplateLoader>) -> Response<ResponseBody> {
        match self {
            Self::Text(body) => build(StatusCode::OK, mime::TEXT_PLAIN_UTF_8.as_ref(), body.into()),
            Self::Html(body) => build(StatusCode::OK, mime::TEXT_HTML_UTF_8.as_ref(), body.into()),
            Self::Json(body) => build(StatusCode::OK, mime::APPLICATION_JSON.as_ref(), body.into()),
            Self::Binary { content, content_type } => build(StatusCode::OK, &content_type, content.into()),
            Self::View { name, args } => render_view(&name, &args, dev_mode, templates),
            Self::Redirect(location) => {
                let mut response = build(StatusCode::FOUND, mime::TEXT_HTML_UTF_8.as_ref(), ResponseBody::empty());
                match HeaderValue::from_str(&location) {
                    Ok(value) => {
                        response.headers_mut().insert(header::LOCATION, value);
                        response
                    }
                    Err(_) => {
                        error!(location, "redirect location is not a valid header value");
                        Self::server_error("Invalid redirect", Some(location)).into_response(dev_mode, templates)
                    }
                }
            }
            Self::Status(status) => build(status, mime::TEXT_PLAIN_UTF_8.as_ref(), ResponseBody::empty()),
            Self::NotFound(message) => {
                build(StatusCode::NOT_FOUND, mime::TEXT_HTML_UTF_8.as_ref(), not_found_page(&message).into())
            }
            Self::Error { title, description, detail } => {
                let detail = if dev_mode { detail.as_deref() } else { None };
                build(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    mime::TEXT_HTML_UTF_8.as_ref(),
                    error_page(&title, &description, detail).into(),
                )
            }
        }
    }
}

fn render_view(
    name: &str,
    args: &serde_json::Map<String, serde_json::Value>,
    dev_mode: bool,
    templates: Option<&dyn TemplateLoader>,
) -> Response<ResponseBody> {
    let Some(loader) = templates else {
        error!(view = name, "view reply without a template loader installed");
        return Reply::server_error("No template engine installed", None).into_response(dev_mode, None);
    };
    let Some(template) = loader.template(name) else {
        error!(view = name, "template not found");
        return Reply::server_error(format!("Template {name} not found"), None).into_response(dev_mode, None);
    };
    match template.render(args) {
        Ok(body) => build(StatusCode::OK, mime::TEXT_HTML_UTF_8.as_ref(), body.into()),
        Err(e) => {
            error!(view = name, cause = %e, "error rendering template");
            Reply::server_error(format!("Error rendering {name}"), Some(e.to_string())).into_response(dev_mode, None)
        }
    }
}

fn build(status: StatusCode, content_type: &str, body: ResponseBody) -> Response<ResponseBody> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    if let Ok(value) = HeaderValue::from_str(content_type) {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    response
}
