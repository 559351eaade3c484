use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};

/// Everything that cannot appear raw inside one path segment.
pub const PATH_SEGMENT: &AsciiSet =
    &CONTROLS.add(b' ').add(b'"').add(b'<').add(b'>').add(b'`').add(b'#').add(b'?').add(b'{').add(b'}').add(b'/').add(b'%');

/// Escape set for cookie payloads: conservative, survives `Set-Cookie` rules.
pub const COOKIE_VALUE: &AsciiSet =
    &CONTROLS.add(b' ').add(b'"').add(b',').add(b';').add(b'\\').add(b'%').add(b'=');

pub fn escape_path_segment(value: &str) -> String {
    utf8_percent_encode(value, PATH_SEGMENT).to_string()
}

pub fn escape_cookie(value: &str) -> String {
    utf8_percent_encode(value, COOKIE_VALUE).to_string()
}

pub fn unescape(value: &str) -> String {
    percent_decode_str(value).decode_utf8_lossy().into_owned()
}

/// Pull one cookie out of a `Cookie:` request header value.
pub fn cookie_value<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header.split(';').map(str::trim).find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        if key == name { Some(value) } else { None }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_segment_escaping() {
        assert_eq!(escape_path_segment("plain-Value_1.2"), "plain-Value_1.2");
        assert_eq!(escape_path_segment("a/b c"), "a%2Fb%20c");
        assert_eq!(escape_path_segment("x?y#z"), "x%3Fy%23z");
    }

    #[test]
    fn cookie_round_trip() {
        let raw = "hello world;=,";
        assert_eq!(unescape(&escape_cookie(raw)), raw);
    }

    #[test]
    fn cookie_header_lookup() {
        let header = "A=1; TILLER_SESSION=abc.def; B=2";
        assert_eq!(cookie_value(header, "TILLER_SESSION"), Some("abc.def"));
        assert_eq!(cookie_value(header, "A"), Some("1"));
        assert_eq!(cookie_value(header, "MISSING"), None);
    }
}
