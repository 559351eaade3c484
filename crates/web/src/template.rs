//! The template seam.
//!
//! The dispatch core never renders views itself. It depends on two traits:
//! a [`Template`] that can render itself from JSON-shaped arguments, and a
//! [`TemplateLoader`] that resolves view names. Applications plug in any
//! engine behind them.
//!
//! The built-in error and not-found pages live here too, so the core can
//! always produce a readable response without an engine installed.

use serde_json::{Map, Value};
use std::sync::Arc;

pub type RenderError = Box<dyn std::error::Error + Send + Sync>;

/// One loaded view.
pub trait Template: Send + Sync {
    fn name(&self) -> &str;
    fn render(&self, args: &Map<String, Value>) -> Result<String, RenderError>;
}

/// Resolves view names for [`crate::Reply::View`] replies.
pub trait TemplateLoader: Send + Sync {
    fn template(&self, name: &str) -> Option<Arc<dyn Template>>;
}

pub fn html_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// The built-in 500 page. `detail` is only rendered in development mode.
pub(crate) fn error_page(title: &str, description: &str, detail: Option<&str>) -> String {
    let mut body = format!(
        "<!DOCTYPE html>\n<html><head><title>{title}</title></head><body>\n<h1>{title}</h1>\n<p>{description}</p>\n",
        title = html_escape(title),
        description = html_escape(description),
    );
    if let Some(detail) = detail {
        body.push_str(&format!("<pre>{}</pre>\n", html_escape(detail)));
    }
    body.push_str("</body></html>\n");
    body
}

pub(crate) fn not_found_page(message: &str) -> String {
    error_page("Not Found", message, None)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escaping_covers_markup_characters() {
        assert_eq!(html_escape("<b>\"a\" & 'b'</b>"), "&lt;b&gt;&quot;a&quot; &amp; &#39;b&#39;&lt;/b&gt;");
    }

    #[test]
    fn error_page_hides_detail_unless_given() {
        let page = error_page("Oops", "it broke", None);
        assert!(page.contains("<h1>Oops</h1>"));
        assert!(!page.contains("<pre>"));

        let page = error_page("Oops", "it broke", Some("stack <trace>"));
        assert!(page.contains("<pre>stack &lt;trace&gt;</pre>"));
    }
}
