use std::net::IpAddr;

use axum::{
    body::{
        Body,
        to_bytes,
    },
    http::{
        HeaderName,
        HeaderValue,
        Request,
    },
    response::{
        IntoResponse,
        Response,
    },
};
use http_body_util::LengthLimitError;

use crate::{
    advice::AdviceClient,
    config::ProxyConfig,
    context::{ProxyRequestState, RequestContext},
    correlation::{self, CORRELATION_HEADER, host_header},
    error::{ProxyError, ProxyResult},
    routing::RoutingTable,
    upstream::Forwarder,
};

pub struct Gateway {
    advice: AdviceClient,
    routing: RoutingTable,
    forwarder: Forwarder,
    max_body_bytes: usize,
}

impl Gateway {
    pub fn from_config(config: &ProxyConfig) -> ProxyResult<Self> {
        let routing = RoutingTable::new(config.main_app_url.clone(), &config.routes)?;
        let advice =
            AdviceClient::new(&config.advice).map_err(|e| ProxyError::Config(e.to_string()))?;
        let forwarder = Forwarder::new(&config.upstream)?;

        tracing::info!(
            routes = routing.route_count(),
            default_target = %config.main_app_url,
            protected_host_prefix = %config.advice.protected_host_prefix,
            "routing table loaded"
        );

        Ok(Self {
            advice,
            routing,
            forwarder,
            max_body_bytes: config.max_body_bytes,
        })
    }

    pub async fn handle_http(
        &self,
        request: Request<Body>,
        peer_ip: Option<IpAddr>,
    ) -> Response<Body> {
        let (parts, body) = request.into_parts();
        let correlation_id = correlation::tag(&parts.method, &parts.uri, &parts.headers);

        let body = match to_bytes(body, self.max_body_bytes).await {
            Ok(body) => body,
            Err(err) => {
                let err = body_error(err);
                tracing::warn!(
                    correlation_id = %correlation_id,
                    error = %err,
                    "failed to read request body"
                );
                return with_correlation(&correlation_id, err.into_response());
            }
        };

        let host = host_header(&parts.headers);
        let advice_headers = self
            .advice
            .advise(&correlation_id, host, || {
                RequestContext::capture(
                    &correlation_id,
                    &parts.method,
                    &parts.uri,
                    &parts.headers,
                    &body,
                    peer_ip,
                )
            })
            .await;

        let target = self.routing.resolve(host).to_string();
        tracing::info!(
            correlation_id = %correlation_id,
            host = host.unwrap_or_default(),
            selected_target = %target,
            "routing request"
        );

        let state = ProxyRequestState {
            correlation_id,
            target,
            advice_headers,
        };

        let response = match self
            .forwarder
            .forward(&state, &parts.method, &parts.uri, &parts.headers, body)
            .await
        {
            Ok(response) => {
                tracing::info!(
                    correlation_id = %state.correlation_id,
                    status = %response.status(),
                    "relayed backend response"
                );
                response
            }
            Err(err) => {
                tracing::error!(
                    correlation_id = %state.correlation_id,
                    target = %state.target,
                    error = %err,
                    "proxy error occurred"
                );
                err.into_response()
            }
        };

        with_correlation(&state.correlation_id, response)
    }
}

fn body_error(err: axum::Error) -> ProxyError {
    let over_limit =
        std::error::Error::source(&err).is_some_and(|e| e.is::<LengthLimitError>());
    if over_limit {
        ProxyError::PayloadTooLarge
    } else {
        ProxyError::InvalidBody(err.to_string())
    }
}

fn with_correlation(correlation_id: &str, mut response: Response<Body>) -> Response<Body> {
    if let Ok(value) = HeaderValue::from_str(correlation_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(CORRELATION_HEADER), value);
    }
    response
}
