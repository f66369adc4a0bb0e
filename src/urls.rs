use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::Value;
use sha2::Sha256;
use std::collections::{BTreeMap, HashMap};
use url::Url;

type HmacSha256 = Hmac<Sha256>;

// Query-string quoting: everything but unreserved characters is encoded.
const QUERY: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.');

// RFC 3986 unreserved set, required by the AWS signing recipe.
const RFC3986: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Separator between query arguments in generated URLs. Correct HTML
/// cannot contain a bare `&`, so generated links use the entity form.
const ARG_SEPARATOR: &str = "&amp;";

/// Best-effort string form of a request argument. Lists coerce to their
/// first element, null to the empty string. Never fails.
pub fn coerce_str(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.first().map(coerce_str).unwrap_or_default(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Best-effort integer form of a request argument; anything non-numeric
/// coerces to zero. Never fails.
pub fn coerce_int(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        Value::Array(items) => items.first().map(coerce_int).unwrap_or(0),
        _ => 0,
    }
}

/// List form of a request argument: lists as-is, anything else wrapped
pub fn coerce_list(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        other => vec![other],
    }
}

/// Remove arguments whose value equals the configured default, so the
/// simplest form of the URL survives.
pub fn drop_default_args(
    args: &HashMap<String, Value>,
    defaults: &HashMap<String, Value>,
) -> HashMap<String, Value> {
    args.iter()
        .filter(|(key, value)| defaults.get(key.as_str()) != Some(*value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

fn encode_query_pairs(args: &HashMap<String, Value>, escape: bool) -> String {
    let sorted: BTreeMap<&String, &Value> = args.iter().collect();

    let mut pairs = Vec::new();
    for (key, value) in sorted {
        // Multi-valued arguments repeat the key once per element.
        let values: Vec<String> = match value {
            Value::Array(items) => items.iter().map(coerce_str).collect(),
            other => vec![coerce_str(other)],
        };
        for item in values {
            if escape {
                pairs.push(format!(
                    "{}={}",
                    utf8_percent_encode(key, QUERY),
                    utf8_percent_encode(&item, QUERY)
                ));
            } else {
                pairs.push(format!("{}={}", key, item));
            }
        }
    }

    pairs.join(ARG_SEPARATOR)
}

/// Build the canonical query part of a URL: defaulted arguments dropped,
/// keys in sorted order, everything percent-encoded. Returns the leading
/// `?` only when arguments remain.
pub fn canonical_query(
    args: &HashMap<String, Value>,
    defaults: &HashMap<String, Value>,
) -> String {
    let canonical = drop_default_args(args, defaults);

    if canonical.is_empty() {
        return String::new();
    }

    format!("?{}", encode_query_pairs(&canonical, true))
}

/// Append query arguments to a base URL, keys in sorted order.
/// `escape_args=false` leaves values as given.
pub fn create_url(base: &str, args: &HashMap<String, Value>, escape_args: bool) -> String {
    if args.is_empty() {
        return base.to_string();
    }

    format!("{}?{}", base, encode_query_pairs(args, escape_args))
}

/// Compare two URLs for equality, ignoring how their query arguments are
/// ordered. Unparseable input falls back to plain string comparison.
pub fn same_urls(a: &str, b: &str) -> bool {
    let (ua, ub) = match (Url::parse(a), Url::parse(b)) {
        (Ok(ua), Ok(ub)) => (ua, ub),
        _ => return a == b,
    };

    let mut qa: Vec<(String, String)> = ua
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    let mut qb: Vec<(String, String)> = ub
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    qa.sort();
    qb.sort();

    ua.scheme() == ub.scheme()
        && ua.host_str() == ub.host_str()
        && ua.port_or_known_default() == ub.port_or_known_default()
        && ua.path() == ub.path()
        && ua.fragment() == ub.fragment()
        && qa == qb
}

/// Convert every UTF-8 byte of `text` into a numeric character reference
pub fn string_to_numeric_char_reference(text: &str) -> String {
    use std::fmt::Write;

    text.bytes().fold(String::new(), |mut out, byte| {
        // Infallible on String.
        let _ = write!(out, "&#{};", byte);
        out
    })
}

/// Build a signed request URL in the AWS query-signature style: arguments
/// plus a UTC `Timestamp` are sorted and RFC 3986-encoded, the string to
/// sign is `GET\n<host>\n<path>\n<query>`, and the base64 HMAC-SHA256
/// signature is appended as the `Signature` argument.
///
/// `timestamp` overrides the generated `Timestamp` (fixed inputs sign
/// reproducibly).
pub fn create_aws_request_url(
    base_url: &str,
    args: &HashMap<String, Value>,
    secret_key: &str,
    timestamp: Option<&str>,
) -> Result<String> {
    let parsed = Url::parse(base_url).context("Failed to parse signing base URL")?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("Signing base URL has no host: {}", base_url))?;
    let path = if parsed.path().is_empty() {
        "/"
    } else {
        parsed.path()
    };

    let mut full: BTreeMap<String, String> = args
        .iter()
        .map(|(key, value)| (key.clone(), coerce_str(value)))
        .collect();
    full.insert(
        "Timestamp".to_string(),
        match timestamp {
            Some(given) => given.to_string(),
            None => Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        },
    );

    let canonical = rfc3986_query(&full);
    let string_to_sign = format!("GET\n{}\n{}\n{}", host, path, canonical);

    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
        .map_err(|_| anyhow!("Invalid HMAC key"))?;
    mac.update(string_to_sign.as_bytes());
    let signature = general_purpose::STANDARD.encode(mac.finalize().into_bytes());

    full.insert("Signature".to_string(), signature);

    Ok(format!(
        "{}://{}{}?{}",
        parsed.scheme(),
        host,
        path,
        rfc3986_query(&full)
    ))
}

fn rfc3986_query(args: &BTreeMap<String, String>) -> String {
    args.iter()
        .map(|(key, value)| {
            format!(
                "{}={}",
                utf8_percent_encode(key, RFC3986),
                utf8_percent_encode(value, RFC3986)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}
