//! The per-request parameter bag.
//!
//! One request's worth of decoded input: query string, form body, multipart
//! values and files, route captures, and fixed route arguments, merged into
//! a single layered view. The bag also owns any temp files created while
//! binding uploads; they are removed when the bag is dropped or reset, on
//! every exit path including unwinds.

use bytes::Bytes;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tiller_http::{Request, UploadedFile};
use tracing::warn;

use crate::binder::{DateFormats, FromParams};

/// Key to ordered values; repeated keys keep every value in arrival order.
pub type Values = BTreeMap<String, Vec<String>>;

#[derive(Default)]
pub struct Params {
    /// Parameters from the query string, e.g. `/index?limit=10`.
    pub query: Values,
    /// Parameters from an urlencoded or multipart request body.
    pub form: Values,
    /// Captures extracted by the router, e.g. `/customers/{id}`.
    pub route: Values,
    /// Fixed route arguments, mapped to argument names by the router.
    pub fixed: Values,
    /// Files uploaded in a multipart form, keyed by field name.
    pub files: HashMap<String, Vec<UploadedFile>>,
    /// Raw JSON body, when the request carried one.
    pub json: Option<Bytes>,

    /// Formats the chrono binders try, installed per pipeline.
    pub(crate) date_formats: Arc<DateFormats>,

    values: Values,
    temp_files: RefCell<Vec<NamedTempFile>>,
}

impl std::fmt::Debug for Params {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Params").field("values", &self.values).field("files", &self.files.keys()).finish()
    }
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the request's query string and body into the bag, then refresh
    /// the merged view. Malformed input is logged and skipped, never fatal.
    pub fn parse(&mut self, request: &Request) {
        if let Some(query) = request.query() {
            match serde_urlencoded::from_str::<Vec<(String, String)>>(query) {
                Ok(pairs) => append_pairs(&mut self.query, pairs),
                Err(e) => warn!(cause = %e, "error parsing query string"),
            }
        }

        if request.is_form_urlencoded() {
            match serde_urlencoded::from_bytes::<Vec<(String, String)>>(request.body()) {
                Ok(pairs) => append_pairs(&mut self.form, pairs),
                Err(e) => warn!(cause = %e, "error parsing request body"),
            }
        } else if request.is_multipart() {
            if let Some(payload) = request.form() {
                for (name, value) in payload.values() {
                    self.form.entry(name.clone()).or_default().push(value.clone());
                }
                self.files = payload.files().clone();
            }
        } else if request.is_json() && !request.body().is_empty() {
            self.json = Some(request.body().clone());
        }

        self.recalculate();
    }

    /// Rebuild the merged view. Layering: query first, form values appended
    /// to the same keys, route captures overwrite, fixed args overwrite.
    pub fn recalculate(&mut self) {
        let mut values = Values::new();
        for (k, v) in &self.query {
            values.entry(k.clone()).or_default().extend(v.iter().cloned());
        }
        for (k, v) in &self.form {
            values.entry(k.clone()).or_default().extend(v.iter().cloned());
        }
        for (k, v) in &self.route {
            values.insert(k.clone(), v.clone());
        }
        for (k, v) in &self.fixed {
            values.insert(k.clone(), v.clone());
        }
        self.values = values;
    }

    /// The merged key/value view; refresh with [`Params::recalculate`] after
    /// mutating a source map.
    pub fn values(&self) -> &Values {
        &self.values
    }

    pub fn all(&self, name: &str) -> &[String] {
        self.values.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn first(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(|v| v.first()).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Convert the named parameter to the requested type through the binder.
    /// Unparsable input degrades to the type's zero value.
    pub fn bind<T: FromParams>(&self, name: &str) -> T {
        T::bind(self, name)
    }

    /// Deserialize a JSON request body into a struct target. `None` when
    /// the request carried no JSON body or the body does not parse; a parse
    /// failure is logged, never raised, matching the binder's discipline.
    pub fn bind_json<T: serde::de::DeserializeOwned>(&self) -> Option<T> {
        let body = self.json.as_ref()?;
        match serde_json::from_slice(body) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(cause = %e, "error binding the json body");
                None
            }
        }
    }

    /// The first file uploaded under a field name.
    pub fn file(&self, name: &str) -> Option<&UploadedFile> {
        self.files.get(name).and_then(|files| files.first())
    }

    pub fn files_for(&self, name: &str) -> &[UploadedFile] {
        self.files.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Spill an upload to a temp file and hand back an open handle. The
    /// backing file is owned by the bag and removed when the request ends.
    pub fn spill_file(&self, name: &str) -> Option<std::fs::File> {
        let upload = self.file(name)?;
        match upload.spill().and_then(|temp| temp.reopen().map(|handle| (temp, handle))) {
            Ok((temp, handle)) => {
                self.register_temp_file(temp);
                Some(handle)
            }
            Err(e) => {
                warn!(name, cause = %e, "error spilling upload to disk");
                None
            }
        }
    }

    /// Adopt a temp file so it outlives binding but not the request.
    pub fn register_temp_file(&self, file: NamedTempFile) {
        self.temp_files.borrow_mut().push(file);
    }

    #[cfg(test)]
    pub(crate) fn temp_file_count(&self) -> usize {
        self.temp_files.borrow().len()
    }

    /// Clear everything, dropping (and thereby deleting) temp files.
    pub fn reset(&mut self) {
        self.query.clear();
        self.form.clear();
        self.route.clear();
        self.fixed.clear();
        self.files.clear();
        self.json = None;
        self.values.clear();
        self.temp_files.borrow_mut().clear();
    }
}

fn append_pairs(target: &mut Values, pairs: Vec<(String, String)>) {
    for (name, value) in pairs {
        target.entry(name).or_default().push(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    fn form_request(body: &'static str) -> Request {
        http::Request::builder()
            .method(Method::POST)
            .uri("/hotels?limit=10&tag=a&tag=b")
            .header(http::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Bytes::from_static(body.as_bytes()))
            .unwrap()
            .into()
    }

    #[test]
    fn query_and_form_share_the_bag() {
        let mut params = Params::new();
        params.parse(&form_request("name=rob&tag=c"));

        assert_eq!(params.first("limit"), Some("10"));
        assert_eq!(params.first("name"), Some("rob"));
        // form values append after the query values with the same key
        assert_eq!(params.all("tag"), &["a", "b", "c"]);
    }

    #[test]
    fn route_captures_overwrite() {
        let mut params = Params::new();
        params.parse(&form_request("id=form-id"));
        params.route.insert("id".to_string(), vec!["route-id".to_string()]);
        params.recalculate();

        assert_eq!(params.all("id"), &["route-id"]);
    }

    #[test]
    fn fixed_args_overwrite_route() {
        let mut params = Params::new();
        params.route.insert("id".to_string(), vec!["route-id".to_string()]);
        params.fixed.insert("id".to_string(), vec!["fixed-id".to_string()]);
        params.recalculate();

        assert_eq!(params.all("id"), &["fixed-id"]);
    }

    #[test]
    fn json_body_kept_raw() {
        let request: Request = http::Request::builder()
            .method(Method::POST)
            .uri("/api")
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Bytes::from_static(b"{\"a\":1}"))
            .unwrap()
            .into();

        let mut params = Params::new();
        params.parse(&request);
        assert_eq!(params.json.as_deref(), Some(&b"{\"a\":1}"[..]));
        assert!(params.values().is_empty());
    }

    #[test]
    fn json_body_binds_into_a_struct() {
        #[derive(serde::Deserialize, PartialEq, Debug)]
        struct Booking {
            hotel_id: u64,
            nights: u32,
        }

        let request: Request = http::Request::builder()
            .method(Method::POST)
            .uri("/bookings")
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Bytes::from_static(b"{\"hotel_id\":3,\"nights\":2}"))
            .unwrap()
            .into();

        let mut params = Params::new();
        params.parse(&request);
        assert_eq!(params.bind_json(), Some(Booking { hotel_id: 3, nights: 2 }));

        params.json = Some(Bytes::from_static(b"not json"));
        assert_eq!(params.bind_json::<Booking>(), None);

        params.json = None;
        assert_eq!(params.bind_json::<Booking>(), None);
    }

    #[test]
    fn spilled_uploads_are_tracked_by_the_bag() {
        use std::io::Read;

        let mut params = Params::new();
        params.files.insert(
            "photo".to_string(),
            vec![UploadedFile::new("photo", Some("a.png".to_string()), None, Bytes::from_static(b"abc"))],
        );

        let mut handle = params.spill_file("photo").unwrap();
        let mut content = String::new();
        handle.read_to_string(&mut content).unwrap();
        assert_eq!(content, "abc");
        assert_eq!(params.temp_file_count(), 1);

        assert!(params.spill_file("missing").is_none());
    }

    #[test]
    fn reset_drops_temp_files() {
        let params = Params::new();
        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_path_buf();
        params.register_temp_file(file);
        assert!(path.exists());

        let mut params = params;
        params.reset();
        assert!(!path.exists());
    }
}
