use serde::Deserialize;
use thiserror::Error;

use crate::{
    config::AdviceConfig,
    context::{AdviceHeaders, RequestContext},
    correlation::CORRELATION_HEADER,
};

#[derive(Debug, Error)]
pub enum AdviceError {
    #[error("advice service timed out")]
    Timeout,
    #[error("advice service unreachable: {0}")]
    Transport(String),
    #[error("advice service returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("malformed advice response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for AdviceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(err.to_string())
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct AdviceResponse {
    #[serde(default, rename = "adviceHeaders")]
    advice_headers: Option<AdviceHeaders>,
}

/// Fetches header advice for requests addressed to the protected host class.
pub struct AdviceClient {
    client: reqwest::Client,
    service_url: String,
    protected_host_prefix: String,
}

impl AdviceClient {
    pub fn new(cfg: &AdviceConfig) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .pool_idle_timeout(std::time::Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()?;

        Ok(Self {
            client,
            service_url: cfg.service_url.clone(),
            protected_host_prefix: cfg.protected_host_prefix.to_ascii_lowercase(),
        })
    }

    pub fn is_protected(&self, host: Option<&str>) -> bool {
        host.is_some_and(|h| {
            h.to_ascii_lowercase()
                .starts_with(self.protected_host_prefix.as_str())
        })
    }

    /// Returns the advice headers for `host`, or an empty map when the host is
    /// not protected or the advice service fails. `capture` is only evaluated
    /// for protected hosts.
    pub async fn advise<F>(
        &self,
        correlation_id: &str,
        host: Option<&str>,
        capture: F,
    ) -> AdviceHeaders
    where
        F: FnOnce() -> RequestContext,
    {
        if !self.is_protected(host) {
            tracing::info!(
                correlation_id = %correlation_id,
                host = host.unwrap_or_default(),
                "no advice service call required for this host"
            );
            return AdviceHeaders::new();
        }

        tracing::info!(
            correlation_id = %correlation_id,
            advice_service = %self.service_url,
            "requesting advice for protected host"
        );

        match self.fetch(&capture()).await {
            Ok(headers) => {
                tracing::info!(
                    correlation_id = %correlation_id,
                    advice_headers = ?headers,
                    "received advice response"
                );
                headers
            }
            Err(err) => {
                tracing::error!(
                    correlation_id = %correlation_id,
                    error = %err,
                    "advice retrieval failed; forwarding without advice"
                );
                AdviceHeaders::new()
            }
        }
    }

    async fn fetch(&self, ctx: &RequestContext) -> Result<AdviceHeaders, AdviceError> {
        let response = self
            .client
            .post(&self.service_url)
            .header(CORRELATION_HEADER, ctx.correlation_id.as_str())
            .json(ctx)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AdviceError::Status(status));
        }

        let body = response.bytes().await?;
        parse_advice(&body)
    }
}

fn parse_advice(body: &[u8]) -> Result<AdviceHeaders, AdviceError> {
    let parsed: AdviceResponse =
        serde_json::from_slice(body).map_err(|e| AdviceError::Malformed(e.to_string()))?;
    Ok(parsed.advice_headers.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Json,
        Router,
        http::StatusCode,
        routing::post,
    };
    use bytes::Bytes;
    use http::{HeaderMap, Method, Uri};
    use serde_json::{Value, json};
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    async fn spawn(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/advice")
    }

    fn client(service_url: String, timeout_ms: u64) -> AdviceClient {
        AdviceClient::new(&AdviceConfig {
            service_url,
            protected_host_prefix: "app.lab.com".into(),
            timeout: Duration::from_millis(timeout_ms),
        })
        .unwrap()
    }

    fn capture(correlation_id: &str) -> RequestContext {
        RequestContext::capture(
            correlation_id,
            &Method::GET,
            &Uri::from_static("/orders?id=5"),
            &HeaderMap::new(),
            &Bytes::new(),
            None,
        )
    }

    #[test]
    fn protected_prefix_is_case_insensitive() {
        let client = client("http://127.0.0.1:9/advice".into(), 100);
        assert!(client.is_protected(Some("APP.lab.com:3000")));
        assert!(client.is_protected(Some("app.lab.com")));
        assert!(!client.is_protected(Some("auth.lab.com:3000")));
        assert!(!client.is_protected(None));
    }

    #[test]
    fn missing_or_null_advice_headers_are_empty() {
        assert!(parse_advice(br#"{}"#).unwrap().is_empty());
        assert!(parse_advice(br#"{"adviceHeaders":null}"#).unwrap().is_empty());
        assert!(matches!(parse_advice(b"[1,2]"), Err(AdviceError::Malformed(_))));
        assert!(matches!(
            parse_advice(br#"{"adviceHeaders":{"x-n":1}}"#),
            Err(AdviceError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn posts_context_with_correlation_header() {
        let router = Router::new().route(
            "/advice",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                let echoed = headers
                    .get(CORRELATION_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                Json(json!({
                    "adviceHeaders": {
                        "x-header-echo": echoed,
                        "x-body-echo": body["correlationId"],
                        "x-url-echo": body["url"],
                    }
                }))
            }),
        );
        let client = client(spawn(router).await, 1_000);

        let headers = client
            .advise("cid-42", Some("app.lab.com:3000"), || capture("cid-42"))
            .await;

        assert_eq!(headers["x-header-echo"], "cid-42");
        assert_eq!(headers["x-body-echo"], "cid-42");
        assert_eq!(headers["x-url-echo"], "http:///orders?id=5");
    }

    #[tokio::test]
    async fn unprotected_host_never_calls_service() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let router = Router::new().route(
            "/advice",
            post(move || {
                let seen = seen.clone();
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Json(json!({ "adviceHeaders": { "x-role": "admin" } }))
                }
            }),
        );
        let client = client(spawn(router).await, 1_000);

        let headers = client
            .advise("cid", Some("other.lab.com:3000"), || {
                panic!("context must not be captured for unprotected hosts")
            })
            .await;

        assert!(headers.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn non_success_status_fails_open() {
        let router = Router::new().route(
            "/advice",
            post(|| async {
                (
                    StatusCode::FORBIDDEN,
                    Json(json!({ "adviceHeaders": { "x-role": "admin" } })),
                )
            }),
        );
        let client = client(spawn(router).await, 1_000);

        let err = client.fetch(&capture("cid")).await.unwrap_err();
        assert!(matches!(err, AdviceError::Status(s) if s == StatusCode::FORBIDDEN));

        let headers = client
            .advise("cid", Some("app.lab.com:3000"), || capture("cid"))
            .await;
        assert!(headers.is_empty());
    }

    #[tokio::test]
    async fn slow_service_times_out() {
        let router = Router::new().route(
            "/advice",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Json(json!({ "adviceHeaders": { "x-role": "admin" } }))
            }),
        );
        let client = client(spawn(router).await, 100);

        let err = client.fetch(&capture("cid")).await.unwrap_err();
        assert!(matches!(err, AdviceError::Timeout));
    }

    #[tokio::test]
    async fn unreachable_service_fails_open() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let client = client(format!("http://{addr}/advice"), 500);

        let headers = client
            .advise("cid", Some("app.lab.com:3000"), || capture("cid"))
            .await;
        assert!(headers.is_empty());
    }
}
