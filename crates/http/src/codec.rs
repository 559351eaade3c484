//! Sans-io request/response codec for the dev server.
//!
//! Decoding works against a growable buffer: feed bytes, call
//! [`decode_request`], get back a full [`Request`] once the head and the
//! content-length body have both arrived. Chunked bodies are not supported;
//! this codec backs the development harness only.

use bytes::{BufMut, Bytes, BytesMut};
use http::{HeaderValue, Response, StatusCode, Version, header};
use std::io::Write;

use crate::protocol::{ParseError, Request, ResponseBody};

const MAX_HEADERS: usize = 64;
const MAX_HEADER_SIZE: usize = 16 * 1024;

/// Try to decode one request from `buf`, consuming its bytes on success.
///
/// Returns `Ok(None)` when more input is needed.
pub fn decode_request(buf: &mut BytesMut) -> Result<Option<Request>, ParseError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Request::new(&mut headers);

    let header_len = match parsed.parse(buf) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => {
            if buf.len() > MAX_HEADER_SIZE {
                return Err(ParseError::too_large_header(buf.len(), MAX_HEADER_SIZE));
            }
            return Ok(None);
        }
        Err(e) => return Err(ParseError::invalid_header(e.to_string())),
    };

    let method = parsed.method.ok_or(ParseError::InvalidMethod)?;
    let path = parsed.path.ok_or(ParseError::InvalidUri)?;
    let version = match parsed.version {
        Some(1) => Version::HTTP_11,
        Some(0) => Version::HTTP_10,
        v => return Err(ParseError::InvalidVersion(v)),
    };

    let mut builder = http::Request::builder().method(method).uri(path).version(version);
    if let Some(headers_mut) = builder.headers_mut() {
        headers_mut.reserve(parsed.headers.len());
    }
    for h in parsed.headers.iter() {
        builder = builder.header(h.name, h.value);
    }
    let head = builder.body(()).map_err(|e| ParseError::invalid_header(e.to_string()))?;

    let content_length = match head.headers().get(header::CONTENT_LENGTH) {
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .ok_or_else(|| ParseError::invalid_content_length(format!("{value:?}")))?,
        None => 0,
    };

    if buf.len() < header_len + content_length {
        return Ok(None);
    }

    let _head_bytes = buf.split_to(header_len);
    let body: Bytes = buf.split_to(content_length).freeze();

    Ok(Some(Request::new(head, body)))
}

/// Serialize a response head plus buffered body into `dst`.
///
/// Sets Content-Length from the body and stamps a Date header when the
/// application did not provide one.
pub fn encode_response(response: &Response<ResponseBody>, dst: &mut BytesMut) {
    dst.reserve(512 + response.body().len());

    let status = response.status();
    let _ = write!(
        FastWrite(dst),
        "HTTP/1.1 {} {}\r\n",
        status.as_str(),
        status.canonical_reason().unwrap_or("Unknown")
    );

    for (name, value) in response.headers().iter() {
        if name == header::CONTENT_LENGTH {
            continue;
        }
        dst.put_slice(name.as_ref());
        dst.put_slice(b": ");
        dst.put_slice(value.as_ref());
        dst.put_slice(b"\r\n");
    }

    if !response.headers().contains_key(header::DATE) {
        let mut buf = faf_http_date::get_date_buff_no_key();
        faf_http_date::get_date_no_key(&mut buf);
        dst.put_slice(b"date: ");
        dst.put_slice(&buf);
        dst.put_slice(b"\r\n");
    }

    let _ = write!(FastWrite(dst), "content-length: {}\r\n\r\n", response.body().len());
    dst.put_slice(response.body().as_bytes());
}

/// Build a bare error response for protocol-level failures.
pub fn error_response(status: StatusCode) -> Response<ResponseBody> {
    let mut response = Response::new(ResponseBody::empty());
    *response.status_mut() = status;
    response.headers_mut().insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

struct FastWrite<'a>(&'a mut BytesMut);

impl Write for FastWrite<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;
    use indoc::indoc;

    fn crlf(s: &str) -> BytesMut {
        BytesMut::from(s.replace('\n', "\r\n").as_bytes())
    }

    #[test]
    fn decodes_get_without_body() {
        let mut buf = crlf(indoc! {"
            GET /hotels/3?from=cdg HTTP/1.1
            Host: 127.0.0.1:8080
            Accept: */*

        "});

        let request = decode_request(&mut buf).unwrap().unwrap();
        assert_eq!(request.method(), &Method::GET);
        assert_eq!(request.path(), "/hotels/3");
        assert_eq!(request.query(), Some("from=cdg"));
        assert_eq!(request.header(header::HOST), Some("127.0.0.1:8080"));
        assert!(request.body().is_empty());
        assert!(buf.is_empty());
    }

    #[test]
    fn waits_for_full_body() {
        let mut buf = crlf(indoc! {"
            POST /login HTTP/1.1
            Content-Type: application/x-www-form-urlencoded
            Content-Length: 9

            user="});

        assert!(decode_request(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"rob2");
        let request = decode_request(&mut buf).unwrap().unwrap();
        assert_eq!(request.body().as_ref(), b"user=rob2");
    }

    #[test]
    fn rejects_garbage() {
        let mut buf = BytesMut::from(&b"\x00\x01 not http\r\n\r\n"[..]);
        assert!(decode_request(&mut buf).is_err());
    }

    #[test]
    fn rejects_bad_content_length() {
        let mut buf = crlf(indoc! {"
            POST /x HTTP/1.1
            Content-Length: banana

        "});
        assert!(matches!(decode_request(&mut buf), Err(ParseError::InvalidContentLength { .. })));
    }

    #[test]
    fn encodes_response_with_length_and_date() {
        let mut response = Response::new(ResponseBody::from("hello"));
        response.headers_mut().insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));

        let mut dst = BytesMut::new();
        encode_response(&response, &mut dst);
        let text = String::from_utf8_lossy(&dst).to_string();

        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("content-length: 5\r\n"));
        assert!(text.contains("content-type: text/plain\r\n"));
        assert!(text.to_ascii_lowercase().contains("date: "));
        assert!(text.ends_with("\r\n\r\nhello"));
    }
}
