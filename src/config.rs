use anyhow::{Context, Result, anyhow};
use reqwest::Url;
use std::{
    env,
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub bind_addr: SocketAddr,
    pub main_app_url: String,
    pub advice: AdviceConfig,
    pub upstream: UpstreamConfig,
    pub routes: Vec<RouteConfig>,
    pub max_body_bytes: usize,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone)]
pub struct AdviceConfig {
    pub service_url: String,
    pub protected_host_prefix: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub timeout: Duration,
}

/// One `host=target` entry of the routing table, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteConfig {
    pub host: String,
    pub target: String,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl ProxyConfig {
    pub fn from_env() -> Result<Self> {
        let port = parse_env("PORT", 3000u16);
        let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));

        let main_app_url = validate_target(
            &env::var("MAIN_APP_URL").unwrap_or_else(|_| "http://localhost:4000".to_string()),
        )
        .context("invalid MAIN_APP_URL")?;

        let auth_service_target = validate_target(
            &env::var("AUTH_SERVICE_TARGET")
                .unwrap_or_else(|_| "http://localhost:5000".to_string()),
        )
        .context("invalid AUTH_SERVICE_TARGET")?;

        let service_url = validate_target(
            &env::var("AUTH_SERVICE_URL")
                .unwrap_or_else(|_| "http://localhost:5000/advice".to_string()),
        )
        .context("invalid AUTH_SERVICE_URL")?;

        let protected_host_prefix = env::var("PROTECTED_HOST_PREFIX")
            .unwrap_or_else(|_| "app.lab.com".to_string())
            .trim()
            .to_ascii_lowercase();
        if protected_host_prefix.is_empty() {
            return Err(anyhow!("PROTECTED_HOST_PREFIX must not be empty"));
        }

        let advice = AdviceConfig {
            service_url,
            protected_host_prefix,
            timeout: Duration::from_millis(parse_env("ADVICE_TIMEOUT_MS", 2_000u64).max(50)),
        };

        let upstream = UpstreamConfig {
            timeout: Duration::from_millis(parse_env("UPSTREAM_TIMEOUT_MS", 30_000u64).max(100)),
        };

        let routes = match env::var("HOST_ROUTES") {
            Ok(raw) => parse_routes(&raw).context("invalid HOST_ROUTES")?,
            Err(_) => default_routes(&main_app_url, &auth_service_target),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "debug".to_string()),
            json: env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        };

        Ok(Self {
            bind_addr,
            main_app_url,
            advice,
            upstream,
            routes,
            max_body_bytes: parse_env("MAX_BODY_BYTES", 1_048_576usize),
            logging,
        })
    }
}

// `localhost:3000` points at the auth service: the legacy table declared it
// twice and the auth service entry was the one that survived.
fn default_routes(main_app_url: &str, auth_service_target: &str) -> Vec<RouteConfig> {
    [
        ("app.lab.com:3000", main_app_url),
        ("auth.lab.com:3000", auth_service_target),
        ("localhost:3000", auth_service_target),
    ]
    .into_iter()
    .map(|(host, target)| RouteConfig {
        host: host.to_string(),
        target: target.to_string(),
    })
    .collect()
}

fn parse_routes(raw: &str) -> Result<Vec<RouteConfig>> {
    let mut out = Vec::new();
    for chunk in raw.split(',').filter(|c| !c.trim().is_empty()) {
        let (host, target) = chunk
            .split_once('=')
            .ok_or_else(|| anyhow!("invalid route entry: {chunk}"))?;

        let host = host.trim().to_ascii_lowercase();
        if host.is_empty() {
            return Err(anyhow!("route entry has no host: {chunk}"));
        }

        let target = validate_target(target.trim())
            .with_context(|| format!("invalid target for host {host}"))?;

        out.push(RouteConfig { host, target });
    }
    Ok(out)
}

fn validate_target(raw: &str) -> Result<String> {
    let url = Url::parse(raw).with_context(|| format!("not a URL: {raw}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(anyhow!("unsupported scheme in {raw}"));
    }
    if url.host_str().is_none() {
        return Err(anyhow!("missing host in {raw}"));
    }
    Ok(raw.trim_end_matches('/').to_string())
}

fn parse_env<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    env::var(key)
        .ok()
        .and_then(|s| s.parse::<T>().ok())
        .unwrap_or(default)
}
