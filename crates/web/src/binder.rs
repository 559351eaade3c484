//! Conversion between request parameters and Rust values.
//!
//! [`FromParams`] turns the string-typed parameter bag into typed action
//! arguments; [`IntoParams`] goes the other way for reverse routing. Binding
//! never fails: input that cannot be converted degrades to the type's zero
//! value with a warning, so an action always receives every argument it
//! declares.
//!
//! Collections use a bracketed key convention. `arr[2]=x` addresses slot 2
//! of a vector, `arr[]=x` appends in encounter order, `m[red]=x` addresses a
//! map entry, and `user.name=x` addresses a struct field. The conventions
//! compose, so `books[0].author` binds a field of the first vector element.

use bytes::Bytes;
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use tracing::warn;

use crate::params::Params;

/// The formats the chrono binders try, carried per request on the params
/// bag so pipelines with different configurations stay isolated.
#[derive(Debug, Clone)]
pub(crate) struct DateFormats {
    pub(crate) date: String,
    pub(crate) datetimes: Vec<String>,
}

impl Default for DateFormats {
    fn default() -> Self {
        Self {
            date: "%Y-%m-%d".to_string(),
            datetimes: vec!["%Y-%m-%d %H:%M".to_string(), "%Y-%m-%dT%H:%M".to_string()],
        }
    }
}

/// A type an action argument can be bound to.
pub trait FromParams: Sized {
    /// Bind from every parameter addressing `name`, including bracketed and
    /// dotted sub-keys.
    fn bind(params: &Params, name: &str) -> Self;

    /// Bind from a single raw value, used for unindexed collection entries
    /// and map keys. `params` supplies per-request context such as the
    /// configured date formats.
    fn bind_value(params: &Params, raw: &str) -> Self {
        let mut single = Params::new();
        single.date_formats = std::sync::Arc::clone(&params.date_formats);
        single.query.insert("value".to_string(), vec![raw.to_string()]);
        single.recalculate();
        Self::bind(&single, "value")
    }
}

/// A type reverse routing can flatten back into parameters.
pub trait IntoParams {
    fn unbind(&self, out: &mut BTreeMap<String, String>, name: &str);
}

/// Flatten one value into a fresh parameter map.
pub fn unbind<T: IntoParams + ?Sized>(value: &T, name: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    value.unbind(&mut out, name);
    out
}

/// Bind one field of a manually implemented struct binder.
pub fn bind_field<T: FromParams>(params: &Params, base: &str, field: &str) -> T {
    T::bind(params, &format!("{base}.{field}"))
}

macro_rules! numeric_from_params {
    ($($ty:ty),*) => {$(
        impl FromParams for $ty {
            fn bind(params: &Params, name: &str) -> Self {
                match params.first(name) {
                    None | Some("") => <$ty>::default(),
                    Some(raw) => raw.parse().unwrap_or_else(|_| {
                        warn!(name, value = raw, "unparsable numeric parameter, binding zero");
                        <$ty>::default()
                    }),
                }
            }
        }

        impl IntoParams for $ty {
            fn unbind(&self, out: &mut BTreeMap<String, String>, name: &str) {
                out.insert(name.to_string(), self.to_string());
            }
        }
    )*};
}

numeric_from_params!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64);

impl FromParams for bool {
    fn bind(params: &Params, name: &str) -> Self {
        let raw = params.first(name).unwrap_or("").to_ascii_lowercase();
        matches!(raw.as_str(), "true" | "on" | "1")
    }
}

impl IntoParams for bool {
    fn unbind(&self, out: &mut BTreeMap<String, String>, name: &str) {
        out.insert(name.to_string(), self.to_string());
    }
}

impl FromParams for String {
    fn bind(params: &Params, name: &str) -> Self {
        params.first(name).unwrap_or("").to_string()
    }
}

impl IntoParams for String {
    fn unbind(&self, out: &mut BTreeMap<String, String>, name: &str) {
        out.insert(name.to_string(), self.clone());
    }
}

impl IntoParams for str {
    fn unbind(&self, out: &mut BTreeMap<String, String>, name: &str) {
        out.insert(name.to_string(), self.to_string());
    }
}

impl FromParams for NaiveDateTime {
    fn bind(params: &Params, name: &str) -> Self {
        let Some(raw) = params.first(name) else { return NaiveDateTime::default() };
        let formats = &params.date_formats;
        for format in &formats.datetimes {
            if let Ok(value) = NaiveDateTime::parse_from_str(raw, format) {
                return value;
            }
        }
        if let Ok(date) = NaiveDate::parse_from_str(raw, &formats.date) {
            return date.and_hms_opt(0, 0, 0).unwrap_or_default();
        }
        warn!(name, value = raw, "unparsable datetime parameter, binding zero");
        NaiveDateTime::default()
    }
}

impl IntoParams for NaiveDateTime {
    fn unbind(&self, out: &mut BTreeMap<String, String>, name: &str) {
        let formats = DateFormats::default();
        let format = formats.datetimes.first().map(String::as_str).unwrap_or("%Y-%m-%d %H:%M");
        out.insert(name.to_string(), self.format(format).to_string());
    }
}

impl FromParams for NaiveDate {
    fn bind(params: &Params, name: &str) -> Self {
        let Some(raw) = params.first(name) else { return NaiveDate::default() };
        let formats = &params.date_formats;
        NaiveDate::parse_from_str(raw, &formats.date).unwrap_or_else(|_| {
            warn!(name, value = raw, "unparsable date parameter, binding zero");
            NaiveDate::default()
        })
    }
}

impl IntoParams for NaiveDate {
    fn unbind(&self, out: &mut BTreeMap<String, String>, name: &str) {
        let formats = DateFormats::default();
        out.insert(name.to_string(), self.format(&formats.date).to_string());
    }
}

/// `Some` when any parameter addresses the name, `None` otherwise. This is
/// how an action distinguishes "absent" from "present but zero".
impl<T: FromParams> FromParams for Option<T> {
    fn bind(params: &Params, name: &str) -> Self {
        if addresses(params, name) { Some(T::bind(params, name)) } else { None }
    }
}

impl<T: IntoParams> IntoParams for Option<T> {
    fn unbind(&self, out: &mut BTreeMap<String, String>, name: &str) {
        if let Some(value) = self {
            value.unbind(out, name);
        }
    }
}

/// Indexed entries (`name[2]`) fix slots, sized to the highest index plus
/// one with gaps bound to zero values. Unindexed entries (`name[]`) append
/// afterwards in encounter order.
impl<T: FromParams> FromParams for Vec<T> {
    fn bind(params: &Params, name: &str) -> Self {
        let prefix = format!("{name}[");
        let mut max_index: Option<usize> = None;
        let mut has_unindexed = false;

        for key in params.values().keys() {
            let Some(rest) = key.strip_prefix(&prefix) else { continue };
            let Some(close) = rest.find(']') else { continue };
            let index = &rest[..close];
            if index.is_empty() {
                has_unindexed = true;
            } else if let Ok(index) = index.parse::<usize>() {
                max_index = Some(max_index.map_or(index, |m| m.max(index)));
            } else {
                warn!(name, key, "non-numeric index in parameter key, skipping");
            }
        }

        let mut out = Vec::new();
        if let Some(max_index) = max_index {
            for i in 0..=max_index {
                out.push(T::bind(params, &format!("{name}[{i}]")));
            }
        }
        if has_unindexed {
            for raw in params.all(&format!("{name}[]")) {
                out.push(T::bind_value(params, raw));
            }
        }
        out
    }
}

impl<T: IntoParams> IntoParams for Vec<T> {
    fn unbind(&self, out: &mut BTreeMap<String, String>, name: &str) {
        for (i, value) in self.iter().enumerate() {
            value.unbind(out, &format!("{name}[{i}]"));
        }
    }
}

impl<K, V> FromParams for HashMap<K, V>
where
    K: FromParams + Eq + Hash,
    V: FromParams,
{
    fn bind(params: &Params, name: &str) -> Self {
        let prefix = format!("{name}[");
        let mut out = HashMap::new();
        let mut seen = Vec::new();

        for key in params.values().keys() {
            let Some(rest) = key.strip_prefix(&prefix) else { continue };
            let Some(close) = rest.find(']') else { continue };
            let entry = &rest[..close];
            if entry.is_empty() || seen.iter().any(|s| s == entry) {
                continue;
            }
            seen.push(entry.to_string());
            out.insert(K::bind_value(params, entry), V::bind(params, &format!("{name}[{entry}]")));
        }
        out
    }
}

impl<K, V> IntoParams for HashMap<K, V>
where
    K: std::fmt::Display,
    V: IntoParams,
{
    fn unbind(&self, out: &mut BTreeMap<String, String>, name: &str) {
        for (key, value) in self {
            value.unbind(out, &format!("{name}[{key}]"));
        }
    }
}

/// The raw content of an uploaded file, or empty when none was sent.
/// Uploads with handles or spilled to disk go through [`Params::file`] and
/// [`Params::spill_file`] instead.
impl FromParams for Bytes {
    fn bind(params: &Params, name: &str) -> Self {
        params.file(name).map(|f| f.content().clone()).unwrap_or_default()
    }
}

/// Whether any parameter key addresses `name` directly or through a
/// bracketed or dotted sub-key, or a file was uploaded under it.
fn addresses(params: &Params, name: &str) -> bool {
    if params.contains(name) || params.files.contains_key(name) {
        return true;
    }
    let bracket = format!("{name}[");
    let dot = format!("{name}.");
    params.values().keys().any(|k| k.starts_with(&bracket) || k.starts_with(&dot))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params_from(pairs: &[(&str, &str)]) -> Params {
        let mut params = Params::new();
        for (name, value) in pairs {
            params.query.entry(name.to_string()).or_default().push(value.to_string());
        }
        params.recalculate();
        params
    }

    #[test]
    fn numeric_binding_degrades_to_zero() {
        let params = params_from(&[("ok", "42"), ("bad", "forty-two")]);
        assert_eq!(i32::bind(&params, "ok"), 42);
        assert_eq!(i32::bind(&params, "bad"), 0);
        assert_eq!(u64::bind(&params, "missing"), 0);
        assert_eq!(f64::bind(&params, "ok"), 42.0);
    }

    #[test]
    fn bool_binding_is_permissive() {
        let params = params_from(&[("a", "true"), ("b", "ON"), ("c", "1"), ("d", "false"), ("e", "yes")]);
        assert!(bool::bind(&params, "a"));
        assert!(bool::bind(&params, "b"));
        assert!(bool::bind(&params, "c"));
        assert!(!bool::bind(&params, "d"));
        assert!(!bool::bind(&params, "e"));
        assert!(!bool::bind(&params, "missing"));
    }

    #[test]
    fn indexed_slice_reserves_slots_and_zeroes_gaps() {
        let params = params_from(&[("arr[0]", "1"), ("arr[1]", "2"), ("arr[3]", "3")]);
        assert_eq!(Vec::<i32>::bind(&params, "arr"), vec![1, 2, 0, 3]);
    }

    #[test]
    fn unindexed_slice_appends_in_encounter_order() {
        let params = params_from(&[("ul[]", "7"), ("ul[]", "5"), ("ul[]", "9")]);
        assert_eq!(Vec::<i32>::bind(&params, "ul"), vec![7, 5, 9]);
    }

    #[test]
    fn mixed_slice_puts_unindexed_after_indexed() {
        let params = params_from(&[("m[]", "a"), ("m[1]", "b")]);
        assert_eq!(Vec::<String>::bind(&params, "m"), vec!["", "b", "a"]);
    }

    #[test]
    fn map_binding_by_bracketed_key() {
        let params = params_from(&[("scores[red]", "3"), ("scores[blue]", "5")]);
        let scores = HashMap::<String, i32>::bind(&params, "scores");
        assert_eq!(scores.get("red"), Some(&3));
        assert_eq!(scores.get("blue"), Some(&5));
    }

    #[test]
    fn option_distinguishes_absent_from_zero() {
        let params = params_from(&[("present", ""), ("n", "0")]);
        assert_eq!(Option::<String>::bind(&params, "present"), Some(String::new()));
        assert_eq!(Option::<i32>::bind(&params, "n"), Some(0));
        assert_eq!(Option::<i32>::bind(&params, "missing"), None);
    }

    #[test]
    fn option_sees_bracketed_sub_keys() {
        let params = params_from(&[("tags[]", "a")]);
        assert_eq!(Option::<Vec<String>>::bind(&params, "tags"), Some(vec!["a".to_string()]));
    }

    #[test]
    fn datetime_tries_each_configured_format() {
        let params = params_from(&[("space", "2011-01-15 09:30"), ("t", "2011-01-15T09:30"), ("date", "2011-01-15")]);
        let expected = NaiveDate::from_ymd_opt(2011, 1, 15).unwrap().and_hms_opt(9, 30, 0).unwrap();
        assert_eq!(NaiveDateTime::bind(&params, "space"), expected);
        assert_eq!(NaiveDateTime::bind(&params, "t"), expected);
        assert_eq!(NaiveDate::bind(&params, "date"), NaiveDate::from_ymd_opt(2011, 1, 15).unwrap());
        assert_eq!(
            NaiveDateTime::bind(&params, "date"),
            NaiveDate::from_ymd_opt(2011, 1, 15).unwrap().and_hms_opt(0, 0, 0).unwrap()
        );
    }

    #[test]
    fn date_formats_are_scoped_to_the_bag() {
        let mut european = params_from(&[("date", "15/01/2011"), ("dates[]", "16/01/2011")]);
        european.date_formats = std::sync::Arc::new(DateFormats {
            date: "%d/%m/%Y".to_string(),
            datetimes: vec!["%d/%m/%Y %H:%M".to_string()],
        });
        assert_eq!(NaiveDate::bind(&european, "date"), NaiveDate::from_ymd_opt(2011, 1, 15).unwrap());
        assert_eq!(
            Vec::<NaiveDate>::bind(&european, "dates"),
            vec![NaiveDate::from_ymd_opt(2011, 1, 16).unwrap()]
        );

        // A second bag with default formats is untouched by the first.
        let iso = params_from(&[("date", "2011-01-15")]);
        assert_eq!(NaiveDate::bind(&iso, "date"), NaiveDate::from_ymd_opt(2011, 1, 15).unwrap());
    }

    #[test]
    fn struct_fields_via_bind_field() {
        struct Hotel {
            id: i32,
            name: String,
        }
        impl FromParams for Hotel {
            fn bind(params: &Params, name: &str) -> Self {
                Self {
                    id: bind_field(params, name, "id"),
                    name: bind_field(params, name, "name"),
                }
            }
        }

        let params = params_from(&[("hotel.id", "7"), ("hotel.name", "Marriott")]);
        let hotel = Hotel::bind(&params, "hotel");
        assert_eq!(hotel.id, 7);
        assert_eq!(hotel.name, "Marriott");
    }

    #[test]
    fn slice_of_structs_composes() {
        let params = params_from(&[("xs[0].a", "1"), ("xs[1].a", "2")]);
        struct X {
            a: i32,
        }
        impl FromParams for X {
            fn bind(params: &Params, name: &str) -> Self {
                Self { a: bind_field(params, name, "a") }
            }
        }
        let xs = Vec::<X>::bind(&params, "xs");
        assert_eq!(xs.iter().map(|x| x.a).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn unbind_round_trip_for_collections() {
        let out = unbind(&vec![3i32, 5], "arr");
        assert_eq!(out.get("arr[0]").map(String::as_str), Some("3"));
        assert_eq!(out.get("arr[1]").map(String::as_str), Some("5"));

        let out = unbind(&Some(7i32), "n");
        assert_eq!(out.get("n").map(String::as_str), Some("7"));
        assert!(unbind(&None::<i32>, "n").is_empty());
    }

    #[test]
    fn upload_content_binds_as_bytes() {
        use tiller_http::UploadedFile;

        let mut params = Params::new();
        params.files.insert(
            "photo".to_string(),
            vec![UploadedFile::new("photo", Some("a.png".to_string()), None, Bytes::from_static(b"abc"))],
        );
        params.recalculate();

        assert_eq!(Bytes::bind(&params, "photo"), Bytes::from_static(b"abc"));
        assert_eq!(Bytes::bind(&params, "missing"), Bytes::new());
        // the presence check sees the upload even without a value key
        assert!(Option::<Bytes>::bind(&params, "photo").is_some());
    }
}
