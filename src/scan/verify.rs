//! Full verification: latency against a canonical endpoint, then anonymity
//! detection through echo endpoints.

use crate::scan::http::{forward_proxy_client, HeaderStrategy, RandomizedHeaders};
use crate::scan::models::{Anonymity, Verification};
use crate::scan::retry::{self, MAX_RETRIES};
use anyhow::Result;
use log::debug;
use reqwest::Client;
use serde_json::{Map, Value};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Canonical fast, low-payload endpoint; 204 is the only success signal.
const LATENCY_CHECK_URL: &str = "http://www.google.com/generate_204";

/// Echo endpoints used for anonymity detection: request headers first, then
/// request address.
const ECHO_URLS: &[&str] = &["http://httpbin.org/headers", "http://httpbin.org/ip"];

/// Response headers that give away a proxy hop.
const DISCLOSURE_HEADERS: &[&str] = &["Via", "X-Forwarded-For", "X-Proxy-ID"];

pub struct VerificationPipeline {
    timeout: Duration,
    headers: Arc<dyn HeaderStrategy>,
    /// The caller's own egress address; `None` when discovery failed.
    client_ip: Option<String>,
}

impl VerificationPipeline {
    pub fn new(timeout: Duration, client_ip: Option<String>) -> Self {
        Self {
            timeout,
            headers: Arc::new(RandomizedHeaders),
            client_ip,
        }
    }

    pub fn with_header_strategy(mut self, headers: Arc<dyn HeaderStrategy>) -> Self {
        self.headers = headers;
        self
    }

    /// Ask the IP echo endpoint, unproxied, what address we present as.
    /// Without it a disclosed X-Forwarded-For cannot be matched against the
    /// real caller address.
    pub async fn discover_client_ip(timeout: Duration) -> Option<String> {
        let client = Client::builder().timeout(timeout).build().ok()?;
        let body: Value = client.get(ECHO_URLS[1]).send().await.ok()?.json().await.ok()?;
        let origin = body.get("origin")?.as_str()?;
        origin.split(',').next().map(|ip| ip.trim().to_string())
    }

    /// Measure latency and anonymity through `addr:port`, with the standard
    /// retry budget. `None` means not working.
    pub async fn verify(&self, addr: Ipv4Addr, port: u16) -> Option<Verification> {
        retry::with_retries(MAX_RETRIES, || self.attempt(addr, port)).await
    }

    async fn attempt(&self, addr: Ipv4Addr, port: u16) -> Result<Option<Verification>> {
        let client = forward_proxy_client(addr, port, self.timeout)?;
        let started = Instant::now();
        let response = client
            .get(LATENCY_CHECK_URL)
            .headers(self.headers.generate())
            .send()
            .await?;
        if response.status().as_u16() != 204 {
            debug!(
                "{addr}:{port} answered {} to the latency check",
                response.status()
            );
            return Ok(None);
        }
        let latency_ms = started.elapsed().as_millis() as u32;
        let anonymity = self.detect_anonymity(&client).await;
        debug!("{addr}:{port} verified: {latency_ms}ms, {anonymity}");
        Ok(Some(Verification {
            latency_ms,
            anonymity,
        }))
    }

    /// Probe both echo endpoints through the candidate. No usable structured
    /// data from either means `Unknown`; usable data with no disclosure
    /// header anywhere means `Elite`.
    async fn detect_anonymity(&self, client: &Client) -> Anonymity {
        let mut usable = false;
        for url in ECHO_URLS {
            let response = match client
                .get(*url)
                .headers(self.headers.generate())
                .send()
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    debug!("echo endpoint {url} failed: {err}");
                    continue;
                }
            };
            let body: Value = match response.json().await {
                Ok(body) => body,
                Err(err) => {
                    debug!("echo endpoint {url} returned no usable body: {err}");
                    continue;
                }
            };
            usable = true;
            let Some(echoed) = body.get("headers").and_then(Value::as_object) else {
                continue;
            };
            if let Some(verdict) = classify_disclosure(echoed, self.client_ip.as_deref()) {
                return verdict;
            }
        }
        if usable {
            Anonymity::Elite
        } else {
            Anonymity::Unknown
        }
    }
}

/// Judge the headers an echo endpoint saw. `None` means no proxy hop was
/// disclosed; otherwise the verdict depends on whether the caller's real
/// address leaked into X-Forwarded-For.
pub fn classify_disclosure(
    echoed: &Map<String, Value>,
    client_ip: Option<&str>,
) -> Option<Anonymity> {
    let disclosed = echoed
        .keys()
        .any(|key| DISCLOSURE_HEADERS.iter().any(|name| name.eq_ignore_ascii_case(key)));
    if !disclosed {
        return None;
    }
    let forwarded_for = echoed
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case("X-Forwarded-For"))
        .and_then(|(_, value)| value.as_str())
        .unwrap_or_default();
    match client_ip {
        Some(ip) if forwarded_for.contains(ip) => Some(Anonymity::Anonymous),
        _ => Some(Anonymity::Transparent),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echoed(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_via_without_caller_address_is_transparent() {
        let headers = echoed(json!({"Via": "1.1 proxy", "Host": "httpbin.org"}));
        assert_eq!(
            classify_disclosure(&headers, Some("198.51.100.9")),
            Some(Anonymity::Transparent)
        );
    }

    #[test]
    fn test_leaked_caller_address_is_anonymous() {
        let headers = echoed(json!({"X-Forwarded-For": "198.51.100.9, 203.0.113.7"}));
        assert_eq!(
            classify_disclosure(&headers, Some("198.51.100.9")),
            Some(Anonymity::Anonymous)
        );
    }

    #[test]
    fn test_no_disclosure_headers_is_not_a_verdict() {
        let headers = echoed(json!({"Host": "httpbin.org", "Accept": "*/*"}));
        assert_eq!(classify_disclosure(&headers, Some("198.51.100.9")), None);
    }

    #[test]
    fn test_unknown_caller_address_degrades_to_transparent() {
        let headers = echoed(json!({"X-Forwarded-For": "198.51.100.9"}));
        assert_eq!(
            classify_disclosure(&headers, None),
            Some(Anonymity::Transparent)
        );
    }

    #[test]
    fn test_disclosure_header_match_ignores_case() {
        let headers = echoed(json!({"x-proxy-id": "edge-3"}));
        assert_eq!(
            classify_disclosure(&headers, Some("198.51.100.9")),
            Some(Anonymity::Transparent)
        );
    }
}
