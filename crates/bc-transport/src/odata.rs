//! OData addressing helpers
//!
//! Primary-key segments (`orders(no='SADV000')`) and `$filter` expressions.
//! Dates and GUIDs are OData literals and go unquoted; every other string is
//! single-quoted with embedded quotes doubled.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::descriptor::QueryParams;
use crate::error::{Error, Result};

/// Query parameter carrying a filter expression.
pub const FILTER_PARAM: &str = "$filter";

/// True for RFC 3339 timestamps, `YYYY-MM-DD` dates, and naive date-times.
pub fn is_date_like(value: &str) -> bool {
    DateTime::parse_from_rfc3339(value).is_ok()
        || NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
        || NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        || NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f").is_ok()
}

/// True only for the hyphenated 8-4-4-4-12 form.
pub fn is_uuid(value: &str) -> bool {
    value.len() == 36 && Uuid::try_parse(value).is_ok()
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn literal(value: &Value, unquoted: impl Fn(&str) -> bool) -> String {
    match value {
        Value::String(s) if unquoted(s) => s.clone(),
        Value::String(s) => quote(s),
        other => other.to_string(),
    }
}

/// Render `field=value` pairs for a keyed resource address.
///
/// Every key field must be present and non-null in `payload`.
pub fn primary_key_segment(payload: &Value, fields: &[String]) -> Result<String> {
    if fields.is_empty() {
        return Err(Error::Configuration(
            "primary key must name at least one field".into(),
        ));
    }
    let mut parts = Vec::with_capacity(fields.len());
    for field in fields {
        let value = payload
            .get(field)
            .filter(|v| !v.is_null())
            .ok_or_else(|| {
                Error::Configuration(format!("payload is missing primary key field '{field}'"))
            })?;
        let rendered = literal(value, |s| is_uuid(s) || is_date_like(s));
        parts.push(format!("{field}={rendered}"));
    }
    Ok(parts.join(","))
}

/// `endpoint(segment)`.
pub fn resource_url(endpoint: &str, segment: &str) -> String {
    format!("{endpoint}({segment})")
}

/// Remove key fields from an object payload; other payloads are untouched.
pub fn strip_keys(payload: &mut Value, fields: &[String]) {
    if let Value::Object(map) = payload {
        for field in fields {
            map.remove(field);
        }
    }
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

/// A `$filter` expression built from equality clauses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ODataFilter {
    #[serde(rename = "$filter", skip_serializing_if = "String::is_empty")]
    expression: String,
}

impl ODataFilter {
    pub fn as_str(&self) -> &str {
        &self.expression
    }

    pub fn is_empty(&self) -> bool {
        self.expression.is_empty()
    }

    /// `{"$filter": expr}`, or no parameters when nothing qualified.
    pub fn as_query(&self) -> QueryParams {
        let mut query = QueryParams::new();
        if !self.is_empty() {
            query.insert(FILTER_PARAM.into(), Value::String(self.expression.clone()));
        }
        query
    }
}

/// Build `k1 eq v1 and k2 eq v2` from ordered pairs, skipping falsy values
/// (empty string, zero, false, null).
pub fn filter<I, K>(params: I) -> ODataFilter
where
    I: IntoIterator<Item = (K, Value)>,
    K: AsRef<str>,
{
    let clauses: Vec<String> = params
        .into_iter()
        .filter(|(_, v)| !is_falsy(v))
        .map(|(k, v)| format!("{} eq {}", k.as_ref(), literal(&v, is_date_like)))
        .collect();
    ODataFilter {
        expression: clauses.join(" and "),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn keys(fields: &[&str]) -> Vec<String> {
        fields.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn uuid_key_is_unquoted() {
        let payload = json!({"id": "7b6e0b6c-3f3a-4f7e-9a53-0a9c1b2d3e4f", "x": 1});
        assert_eq!(
            primary_key_segment(&payload, &keys(&["id"])).unwrap(),
            "id=7b6e0b6c-3f3a-4f7e-9a53-0a9c1b2d3e4f"
        );
    }

    #[test]
    fn string_key_is_quoted() {
        let payload = json!({"no": "SADV000"});
        let segment = primary_key_segment(&payload, &keys(&["no"])).unwrap();
        assert_eq!(resource_url("/orders", &segment), "/orders(no='SADV000')");
    }

    #[test]
    fn composite_key_mixes_date_and_number() {
        let payload = json!({"postingDate": "2025-03-14", "lineNo": 10000, "docNo": "O'Brien"});
        assert_eq!(
            primary_key_segment(&payload, &keys(&["docNo", "postingDate", "lineNo"])).unwrap(),
            "docNo='O''Brien',postingDate=2025-03-14,lineNo=10000"
        );
    }

    #[test]
    fn missing_key_field_is_configuration_error() {
        let err = primary_key_segment(&json!({"no": null}), &keys(&["no"])).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(primary_key_segment(&json!({}), &[]).is_err());
    }

    #[test]
    fn near_uuid_strings_are_quoted() {
        let payload = json!({"id": "7b6e0b6c3f3a4f7e9a530a9c1b2d3e4f"});
        assert_eq!(
            primary_key_segment(&payload, &keys(&["id"])).unwrap(),
            "id='7b6e0b6c3f3a4f7e9a530a9c1b2d3e4f'"
        );
    }

    #[test]
    fn strip_keys_leaves_other_fields() {
        let mut payload = json!({"no": "A", "qty": 2});
        strip_keys(&mut payload, &keys(&["no"]));
        assert_eq!(payload, json!({"qty": 2}));
    }

    #[test]
    fn filter_skips_falsy_and_formats_literals() {
        let f = filter([
            ("status", json!("open")),
            ("count", json!(0)),
            ("date", json!("2025-03-14")),
            ("blocked", json!(false)),
            ("note", json!("")),
            ("owner", Value::Null),
            ("amount", json!(12.5)),
        ]);
        assert_eq!(
            f.as_str(),
            "status eq 'open' and date eq 2025-03-14 and amount eq 12.5"
        );
        assert_eq!(f.as_query()["$filter"], json!(f.as_str()));
    }

    #[test]
    fn filter_with_nothing_qualifying_is_empty() {
        let f = filter([("a", json!("")), ("b", json!(0))]);
        assert!(f.is_empty());
        assert!(f.as_query().is_empty());
        assert_eq!(serde_json::to_value(&f).unwrap(), json!({}));
    }

    #[test]
    fn filter_keeps_timestamps_unquoted() {
        let f = filter([("modifiedAt", json!("2025-03-14T08:30:00Z"))]);
        assert_eq!(f.as_str(), "modifiedAt eq 2025-03-14T08:30:00Z");
    }

    #[test]
    fn date_detection() {
        assert!(is_date_like("2025-03-14"));
        assert!(is_date_like("2025-03-14T08:30:00"));
        assert!(is_date_like("2025-03-14T08:30:00.123+01:00"));
        assert!(!is_date_like("SADV000"));
        assert!(!is_date_like("2025-13-40"));
    }
}
