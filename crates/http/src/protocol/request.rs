//! The request envelope handed to the dispatch core.
//!
//! Wraps the parsed head (`http::Request<()>`) together with the buffered
//! body, the peer address, and any multipart payload the adapter decoded
//! before dispatch. The dispatch core never touches the wire; everything it
//! needs is materialized here.

use bytes::Bytes;
use http::request::Parts;
use http::{HeaderMap, Method, Uri, Version};
use std::net::SocketAddr;
use std::str::FromStr;

use crate::upload::FormPayload;

#[derive(Debug)]
pub struct Request {
    head: http::Request<()>,
    remote_addr: Option<SocketAddr>,
    body: Bytes,
    form: Option<FormPayload>,
}

impl Request {
    pub fn new(head: http::Request<()>, body: Bytes) -> Self {
        Self { head, remote_addr: None, body, form: None }
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Attach a decoded multipart payload. Called by the transport adapter
    /// before dispatch; the core only ever reads it.
    pub fn with_form(mut self, form: FormPayload) -> Self {
        self.form = Some(form);
        self
    }

    pub fn method(&self) -> &Method {
        self.head.method()
    }

    /// Replaces the request method. Used by the method-override stage.
    pub fn set_method(&mut self, method: Method) {
        *self.head.method_mut() = method;
    }

    pub fn uri(&self) -> &Uri {
        self.head.uri()
    }

    pub fn path(&self) -> &str {
        self.head.uri().path()
    }

    pub fn query(&self) -> Option<&str> {
        self.head.uri().query()
    }

    pub fn version(&self) -> Version {
        self.head.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.head.headers()
    }

    /// A single header value as utf-8, or None when absent or non-textual.
    pub fn header(&self, name: impl http::header::AsHeaderName) -> Option<&str> {
        self.head.headers().get(name).and_then(|v| v.to_str().ok())
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn form(&self) -> Option<&FormPayload> {
        self.form.as_ref()
    }

    /// The essence of the Content-Type header, with parameters stripped.
    pub fn content_type(&self) -> Option<mime::Mime> {
        self.header(http::header::CONTENT_TYPE).and_then(|value| mime::Mime::from_str(value).ok())
    }

    pub fn is_form_urlencoded(&self) -> bool {
        self.content_type()
            .map(|m| m.type_() == mime::APPLICATION && m.subtype() == mime::WWW_FORM_URLENCODED)
            .unwrap_or(false)
    }

    pub fn is_multipart(&self) -> bool {
        self.content_type().map(|m| m.type_() == mime::MULTIPART && m.subtype() == mime::FORM_DATA).unwrap_or(false)
    }

    pub fn is_json(&self) -> bool {
        self.content_type().map(|m| m.subtype() == mime::JSON || m.suffix() == Some(mime::JSON)).unwrap_or(false)
    }
}

impl From<Parts> for Request {
    fn from(parts: Parts) -> Self {
        Self::new(http::Request::from_parts(parts, ()), Bytes::new())
    }
}

impl From<http::Request<Bytes>> for Request {
    fn from(req: http::Request<Bytes>) -> Self {
        let (parts, body) = req.into_parts();
        Self::new(http::Request::from_parts(parts, ()), body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(content_type: &str) -> Request {
        http::Request::builder()
            .method(Method::POST)
            .uri("/hotels/3?from=paris")
            .header(http::header::CONTENT_TYPE, content_type)
            .body(Bytes::from_static(b"a=1"))
            .unwrap()
            .into()
    }

    #[test]
    fn content_type_classification() {
        assert!(request("application/x-www-form-urlencoded").is_form_urlencoded());
        assert!(request("application/x-www-form-urlencoded; charset=utf-8").is_form_urlencoded());
        assert!(request("multipart/form-data; boundary=xyz").is_multipart());
        assert!(request("application/json").is_json());
        assert!(request("text/json").is_json());
        assert!(!request("text/plain").is_form_urlencoded());
    }

    #[test]
    fn path_and_query() {
        let req = request("text/plain");
        assert_eq!(req.path(), "/hotels/3");
        assert_eq!(req.query(), Some("from=paris"));
        assert_eq!(req.body().as_ref(), b"a=1");
        assert!(req.form().is_none());
    }
}
