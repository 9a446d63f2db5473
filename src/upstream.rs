use axum::{
    body::Body,
    response::Response,
};
use bytes::Bytes;
use http::{
    HeaderMap, Method, Uri,
    header::{HeaderName, HeaderValue},
};
use std::time::Duration;

use crate::{
    config::UpstreamConfig,
    context::{AdviceHeaders, ProxyRequestState},
    correlation::CORRELATION_HEADER,
    error::{ProxyError, ProxyResult},
};

/// Dispatches requests to backend targets and relays their responses.
#[derive(Clone)]
pub struct Forwarder {
    client: reqwest::Client,
}

impl Forwarder {
    pub fn new(cfg: &UpstreamConfig) -> ProxyResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(32)
            .tcp_nodelay(true)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ProxyError::Config(e.to_string()))?;

        Ok(Self { client })
    }

    pub async fn forward(
        &self,
        state: &ProxyRequestState,
        method: &Method,
        uri: &Uri,
        headers: &HeaderMap,
        body: Bytes,
    ) -> ProxyResult<Response<Body>> {
        let path_and_query = uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| uri.path());
        let target_url = format!("{}{}", state.target.trim_end_matches('/'), path_and_query);

        tracing::info!(
            correlation_id = %state.correlation_id,
            target_url = %target_url,
            "preparing to forward request to target"
        );

        let outbound = outbound_headers(state, headers);
        tracing::debug!(
            correlation_id = %state.correlation_id,
            headers = ?outbound,
            "outgoing proxy request headers set"
        );

        let upstream_response = self
            .client
            .request(method.clone(), &target_url)
            .headers(outbound)
            .body(body)
            .send()
            .await?;

        let status = upstream_response.status();
        let response_headers = upstream_response.headers().clone();
        let body = upstream_response.bytes().await?;

        let mut builder = Response::builder().status(status);
        for (name, value) in &response_headers {
            if should_forward_header(name) {
                builder = builder.header(name, value);
            }
        }

        builder
            .body(Body::from(body))
            .map_err(|e| ProxyError::Dispatch(e.to_string()))
    }
}

/// Inbound headers minus hop-by-hop ones, then advice on top, then the
/// correlation id last so advice can never replace it.
fn outbound_headers(state: &ProxyRequestState, inbound: &HeaderMap) -> HeaderMap {
    let mut outbound = HeaderMap::with_capacity(inbound.len() + state.advice_headers.len() + 1);
    for (name, value) in inbound {
        if should_forward_header(name) {
            outbound.append(name, value.clone());
        }
    }

    apply_advice(&state.correlation_id, &state.advice_headers, &mut outbound);

    if let Ok(value) = HeaderValue::from_str(&state.correlation_id) {
        outbound.insert(HeaderName::from_static(CORRELATION_HEADER), value);
    }
    outbound
}

fn apply_advice(correlation_id: &str, advice: &AdviceHeaders, outbound: &mut HeaderMap) {
    if advice.is_empty() {
        return;
    }

    tracing::info!(
        correlation_id = %correlation_id,
        advice_headers = ?advice,
        "applying advised headers to outgoing request"
    );

    for (name, value) in advice {
        let parsed = HeaderName::from_bytes(name.as_bytes())
            .ok()
            .zip(HeaderValue::from_str(value).ok());
        match parsed {
            Some((name, value)) if should_forward_header(&name) => {
                outbound.insert(name, value);
            }
            _ => {
                tracing::warn!(
                    correlation_id = %correlation_id,
                    header = %name,
                    "skipping advised header that cannot be forwarded"
                );
            }
        }
    }
}

fn should_forward_header(name: &HeaderName) -> bool {
    !matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "proxy-connection"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
            | "host"
            | "content-length"
    )
}
