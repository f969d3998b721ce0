//! Blocking HTTP backend on `ureq`.
//!
//! Non-2xx statuses are ordinary responses here; only transport
//! failure reaches the caller as an error, and the service loop turns
//! that into a synthesized bad-gateway response.
//!
//! Hosts the embedding cannot reach directly are rewritten through a
//! relay prefix, `<prefix><original-url>`, before the request is made.

use std::time::Duration;

use hostbridge_core::config::BridgeConfig;
use hostbridge_core::host::{HttpBackend, HttpExchange};

pub struct UreqHttp {
    agent: ureq::Agent,
    relay: Option<String>,
    relay_hosts: Vec<String>,
}

impl UreqHttp {
    pub fn new(config: &BridgeConfig) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(config.io_timeout))
            .build()
            .into();
        Self {
            agent,
            relay: config.http_relay.clone(),
            relay_hosts: config.relay_hosts.clone(),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(&BridgeConfig::new().io_timeout(timeout))
    }

    fn rewrite(&self, url: &str) -> String {
        let Some(prefix) = &self.relay else {
            return url.to_string();
        };
        if host_of(url).is_some_and(|h| self.relay_hosts.iter().any(|r| r == h)) {
            format!("{prefix}{url}")
        } else {
            url.to_string()
        }
    }
}

fn host_of(url: &str) -> Option<&str> {
    let rest = url.split_once("://")?.1;
    let authority = rest.split(['/', '?', '#']).next()?;
    // Strip credentials and port.
    let host = authority.rsplit('@').next()?;
    Some(host.split(':').next().unwrap_or(host))
}

impl HttpBackend for UreqHttp {
    fn execute(
        &self,
        method: &str,
        url: &str,
        headers: &[(String, String)],
        body: &[u8],
    ) -> Result<HttpExchange, String> {
        let url = self.rewrite(url);

        let response = match method.to_ascii_uppercase().as_str() {
            "GET" | "HEAD" | "DELETE" => {
                let mut req = match method.to_ascii_uppercase().as_str() {
                    "GET" => self.agent.get(&url),
                    "HEAD" => self.agent.head(&url),
                    _ => self.agent.delete(&url),
                };
                for (k, v) in headers {
                    req = req.header(k, v);
                }
                req.call().map_err(|e| e.to_string())?
            }
            "POST" | "PUT" | "PATCH" => {
                let mut req = match method.to_ascii_uppercase().as_str() {
                    "POST" => self.agent.post(&url),
                    "PUT" => self.agent.put(&url),
                    _ => self.agent.patch(&url),
                };
                for (k, v) in headers {
                    req = req.header(k, v);
                }
                req.send(body).map_err(|e| e.to_string())?
            }
            other => return Err(format!("unsupported HTTP method: {other}")),
        };

        let status = response.status().as_u16();
        let resp_headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();

        Ok(HttpExchange {
            status,
            headers: resp_headers,
            body: Box::new(response.into_body().into_reader()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_rewrites_only_listed_hosts() {
        let config = BridgeConfig::new()
            .http_relay("https://relay.example/fetch?url=")
            .relay_host("blocked.example");
        let http = UreqHttp::new(&config);

        assert_eq!(
            http.rewrite("https://blocked.example/data.json"),
            "https://relay.example/fetch?url=https://blocked.example/data.json"
        );
        assert_eq!(
            http.rewrite("https://open.example/data.json"),
            "https://open.example/data.json"
        );
    }

    #[test]
    fn no_relay_leaves_urls_alone() {
        let http = UreqHttp::new(&BridgeConfig::new());
        assert_eq!(http.rewrite("http://a.example/x"), "http://a.example/x");
    }

    #[test]
    fn host_extraction() {
        assert_eq!(host_of("https://a.example/path"), Some("a.example"));
        assert_eq!(host_of("http://a.example:8080/x?y"), Some("a.example"));
        assert_eq!(host_of("http://user@a.example/"), Some("a.example"));
        assert_eq!(host_of("not-a-url"), None);
    }
}
