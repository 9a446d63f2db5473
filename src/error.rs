use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use thiserror::Error;

pub type ProxyResult<T> = Result<T, ProxyError>;

/// Body returned to clients whenever a backend dispatch fails.
pub const PROXY_ERROR_BODY: &str = "Proxy error occurred.";

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("backend dispatch failed: {0}")]
    Dispatch(String),
    #[error("request body exceeds configured limit")]
    PayloadTooLarge,
    #[error("failed to read request body: {0}")]
    InvalidBody(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Dispatch(_) | Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::InvalidBody(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ProxyError {
    // Internal detail stays in the logs; clients only ever see fixed text.
    fn into_response(self) -> Response {
        let body = match self {
            Self::PayloadTooLarge => "Request body too large.",
            Self::InvalidBody(_) => "Bad request.",
            Self::Dispatch(_) | Self::Config(_) => PROXY_ERROR_BODY,
        };

        let mut response = (self.status(), body).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        Self::Dispatch(err.to_string())
    }
}
