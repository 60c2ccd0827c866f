//! Request extraction and sanitization.
//!
//! `extract` builds the ephemeral [`RequestData`] view the pipeline evaluates;
//! `sanitize` produces the redacted copy that is allowed into the audit log.

use crate::model::RequestData;
use hyper::http::request::Parts;
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;

const REDACTED: &str = "[REDACTED]";

/// Payload keys redacted at any nesting depth, matched case-insensitively
/// as substrings of the key
const SENSITIVE_KEYS: [&str; 5] = ["password", "token", "secret", "key", "credential"];

/// Build a [`RequestData`] from a buffered request.
///
/// Client IP preference: first entry of `x-forwarded-for`, then `x-real-ip`,
/// then the socket peer address, then the `"unknown"` sentinel.
pub fn extract(parts: &Parts, body: &[u8], remote_addr: Option<SocketAddr>) -> RequestData {
    let mut headers = HashMap::new();
    for (name, value) in parts.headers.iter() {
        if let Ok(value_str) = value.to_str() {
            headers.insert(name.as_str().to_ascii_lowercase(), value_str.to_string());
        }
    }

    // HTTP/2 carries the host in the :authority pseudo-header, which hyper
    // exposes through the URI rather than the header map.
    if !headers.contains_key("host") {
        if let Some(authority) = parts.uri.authority() {
            headers.insert("host".to_string(), authority.to_string());
        }
    }

    let ip_address = client_ip(&headers, remote_addr);

    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string());

    let query_params = parts
        .uri
        .query()
        .map(parse_query_string)
        .unwrap_or_default();

    let cookies = headers
        .get("cookie")
        .map(|raw| parse_cookies(raw))
        .unwrap_or_default();

    let body_text = String::from_utf8_lossy(body).to_string();
    let payload = serde_json::from_str::<Value>(&body_text).ok();

    RequestData {
        ip_address,
        method: parts.method.to_string(),
        path,
        headers,
        body: body_text,
        payload,
        query_params,
        cookies,
    }
}

fn client_ip(headers: &HashMap<String, String>, remote_addr: Option<SocketAddr>) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for") {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip") {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }

    match remote_addr {
        Some(addr) => addr.ip().to_string(),
        None => "unknown".to_string(),
    }
}

fn parse_query_string(query: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = match pair.split_once('=') {
            Some((k, v)) => (k, v),
            None => (pair, ""),
        };
        let key = urlencoding::decode(key)
            .map(|k| k.into_owned())
            .unwrap_or_else(|_| key.to_string());
        let value = urlencoding::decode(value)
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| value.to_string());
        params.insert(key, value);
    }
    params
}

fn parse_cookies(raw: &str) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    for pair in raw.split(';') {
        if let Some((name, value)) = pair.split_once('=') {
            cookies.insert(name.trim().to_string(), value.trim().to_string());
        }
    }
    cookies
}

/// Return a redacted deep copy of `data`. Never mutates its input and is
/// idempotent: `sanitize(sanitize(x)) == sanitize(x)`.
pub fn sanitize(data: &RequestData) -> RequestData {
    let mut clean = data.clone();

    for header in ["authorization", "cookie", "proxy-authorization"] {
        if let Some(value) = clean.headers.get_mut(header) {
            *value = REDACTED.to_string();
        }
    }

    for value in clean.cookies.values_mut() {
        *value = REDACTED.to_string();
    }

    if let Some(payload) = clean.payload.take() {
        let redacted = redact_value(payload);
        // Keep the persisted body consistent with the redacted payload.
        // serde_json orders object keys deterministically, so re-serializing
        // an already-redacted payload reproduces the same body text.
        clean.body = redacted.to_string();
        clean.payload = Some(redacted);
    }

    clean
}

fn redact_value(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let redacted = map
                .into_iter()
                .map(|(key, inner)| {
                    if is_sensitive_key(&key) {
                        (key, Value::String(REDACTED.to_string()))
                    } else {
                        (key, redact_value(inner))
                    }
                })
                .collect();
            Value::Object(redacted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(redact_value).collect()),
        other => other,
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    SENSITIVE_KEYS.iter().any(|needle| lower.contains(needle))
}
