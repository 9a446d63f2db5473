use http::{HeaderMap, Method, Uri, header};
use uuid::Uuid;

/// Header carrying the correlation id to the advice service, the backend and
/// back to the client.
pub const CORRELATION_HEADER: &str = "proxy-correlation-id";

/// Assigns a fresh correlation id to an inbound request and records ingress.
pub fn tag(method: &Method, uri: &Uri, headers: &HeaderMap) -> String {
    let correlation_id = Uuid::new_v4().to_string();

    tracing::info!(
        correlation_id = %correlation_id,
        method = %method,
        path = %uri.path(),
        host = host_header(headers).unwrap_or_default(),
        "incoming request received"
    );

    correlation_id
}

pub fn host_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::HOST).and_then(|v| v.to_str().ok())
}
