use axum::extract::Query;
use bytes::Bytes;
use http::{HeaderMap, Method, Uri, header};
use serde::{Serialize, Serializer, ser::SerializeMap};
use serde_json::Value;
use std::{
    collections::{
        BTreeMap,
        btree_map::Entry,
    },
    net::IpAddr,
};

use crate::correlation::host_header;

pub type AdviceHeaders = BTreeMap<String, String>;

/// Per-request pipeline state, created at ingress and dropped once the
/// response is sent.
#[derive(Debug, Clone)]
pub struct ProxyRequestState {
    pub correlation_id: String,
    pub target: String,
    pub advice_headers: AdviceHeaders,
}

/// Snapshot of the inbound request sent verbatim to the advice service.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    pub correlation_id: String,
    pub method: String,
    pub url: String,
    #[serde(serialize_with = "serialize_headers")]
    pub headers: HeaderMap,
    pub body: Value,
    pub query: BTreeMap<String, Value>,
    pub params: BTreeMap<String, String>,
    pub cookies: BTreeMap<String, String>,
    pub ip: String,
    pub user_agent: String,
    pub accept: String,
    pub accept_language: String,
}

impl RequestContext {
    pub fn capture(
        correlation_id: &str,
        method: &Method,
        uri: &Uri,
        headers: &HeaderMap,
        body: &Bytes,
        peer_ip: Option<IpAddr>,
    ) -> Self {
        let path_and_query = uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| uri.path());

        Self {
            correlation_id: correlation_id.to_string(),
            method: method.to_string(),
            url: format!(
                "http://{}{}",
                host_header(headers).unwrap_or_default(),
                path_and_query
            ),
            headers: headers.clone(),
            body: parse_body(headers, body),
            query: parse_query(uri),
            params: BTreeMap::new(),
            cookies: parse_cookies(headers),
            ip: client_ip(headers, peer_ip),
            user_agent: header_or_empty(headers, header::USER_AGENT),
            accept: header_or_empty(headers, header::ACCEPT),
            accept_language: header_or_empty(headers, header::ACCEPT_LANGUAGE),
        }
    }
}

fn header_or_empty(headers: &HeaderMap, name: header::HeaderName) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Leftmost `X-Forwarded-For` entry, then the socket peer, then "Unknown".
fn client_ip(headers: &HeaderMap, peer_ip: Option<IpAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
        .or_else(|| peer_ip.map(|ip| ip.to_string()))
        .unwrap_or_else(|| "Unknown".to_string())
}

/// Single keys map to a string; repeated keys collect into an array.
fn parse_query(uri: &Uri) -> BTreeMap<String, Value> {
    let pairs = Query::<Vec<(String, String)>>::try_from_uri(uri)
        .map(|Query(pairs)| pairs)
        .unwrap_or_default();

    let mut query = BTreeMap::new();
    for (key, value) in pairs {
        match query.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(Value::String(value));
            }
            Entry::Occupied(mut slot) => match slot.get_mut() {
                Value::Array(values) => values.push(Value::String(value)),
                existing => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, Value::String(value)]);
                }
            },
        }
    }
    query
}

fn parse_body(headers: &HeaderMap, body: &Bytes) -> Value {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| {
            let mime = ct.split(';').next().unwrap_or_default().trim();
            mime.eq_ignore_ascii_case("application/json") || mime.ends_with("+json")
        })
        .unwrap_or(false);

    if is_json && !body.is_empty() {
        match serde_json::from_slice(body) {
            Ok(value) => return value,
            Err(err) => tracing::debug!(error = %err, "request body is not valid JSON"),
        }
    }
    Value::Object(Default::default())
}

fn parse_cookies(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut cookies = BTreeMap::new();
    for value in headers.get_all(header::COOKIE) {
        let Ok(raw) = value.to_str() else {
            continue;
        };
        for pair in raw.split(';') {
            let Some((name, value)) = pair.split_once('=') else {
                continue;
            };
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            // First occurrence wins.
            cookies
                .entry(name.to_string())
                .or_insert_with(|| value.to_string());
        }
    }
    cookies
}

// Repeated headers collapse into one comma-joined value; names keep the
// order they arrived in.
fn serialize_headers<S>(headers: &HeaderMap, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut map = serializer.serialize_map(Some(headers.keys_len()))?;
    for name in headers.keys() {
        let joined = headers
            .get_all(name)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect::<Vec<_>>()
            .join(", ");
        map.serialize_entry(name.as_str(), &joined)?;
    }
    map.end()
}
