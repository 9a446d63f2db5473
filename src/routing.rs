use std::collections::HashMap;

use crate::{
    config::RouteConfig,
    error::{ProxyError, ProxyResult},
};

/// Static host → backend map. Keys are lowercase and include the port.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    targets: HashMap<String, String>,
    default_target: String,
}

impl RoutingTable {
    pub fn new(default_target: String, routes: &[RouteConfig]) -> ProxyResult<Self> {
        let mut targets = HashMap::with_capacity(routes.len());

        for route in routes {
            let host = route.host.trim().to_ascii_lowercase();
            if let Some(previous) = targets.insert(host.clone(), route.target.clone()) {
                return Err(ProxyError::Config(format!(
                    "host {host} is routed twice ({previous} and {})",
                    route.target
                )));
            }
        }

        Ok(Self {
            targets,
            default_target,
        })
    }

    /// Exact, case-insensitive lookup. Unknown or missing hosts get the default.
    pub fn resolve(&self, host: Option<&str>) -> &str {
        host.and_then(|h| self.targets.get(&h.to_ascii_lowercase()))
            .map(String::as_str)
            .unwrap_or(&self.default_target)
    }

    pub fn route_count(&self) -> usize {
        self.targets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(host: &str, target: &str) -> RouteConfig {
        RouteConfig {
            host: host.to_string(),
            target: target.to_string(),
        }
    }

    fn table() -> RoutingTable {
        RoutingTable::new(
            "http://main".into(),
            &[
                route("app.lab.com:3000", "http://app"),
                route("auth.lab.com:3000", "http://auth"),
            ],
        )
        .unwrap()
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let table = table();
        assert_eq!(table.resolve(Some("APP.LAB.COM:3000")), "http://app");
        assert_eq!(table.resolve(Some("app.lab.com:3000")), "http://app");
    }

    #[test]
    fn port_is_part_of_the_key() {
        let table = table();
        assert_eq!(table.resolve(Some("app.lab.com")), "http://main");
        assert_eq!(table.resolve(Some("app.lab.com:8080")), "http://main");
    }

    #[test]
    fn misses_fall_back_to_default() {
        let table = table();
        assert_eq!(table.resolve(Some("other.lab.com:3000")), "http://main");
        assert_eq!(table.resolve(None), "http://main");
    }

    #[test]
    fn duplicate_hosts_are_rejected() {
        let err = RoutingTable::new(
            "http://main".into(),
            &[
                route("localhost:3000", "http://app"),
                route("LOCALHOST:3000", "http://auth"),
            ],
        )
        .unwrap_err();

        assert!(matches!(err, ProxyError::Config(msg) if msg.contains("localhost:3000")));
    }
}
