//! Shared HTTP plumbing: proxied client construction and request identity
//! randomization.

use crate::Result;
use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, CACHE_CONTROL,
    CONNECTION, USER_AGENT,
};
use reqwest::{Client, Proxy};
use std::net::Ipv4Addr;
use std::time::Duration;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 13_2_3 like Mac OS X) AppleWebKit/605.1.15",
    "Mozilla/5.0 (Linux; Android 10; SM-A205U) AppleWebKit/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:80.0) Gecko/20100101 Firefox/80.0",
];

const ACCEPT_LANGUAGES: &[&str] = &["en-US,en;q=0.9", "fa-IR,fa;q=0.8"];
const CONNECTION_MODES: &[&str] = &["keep-alive", "close"];
const CACHE_MODES: &[&str] = &["no-cache", "max-age=0"];

/// Build a client that routes every request through `addr:port` as an HTTP
/// forward proxy.
///
/// Pooling is disabled: no connection may outlive one request, and nothing is
/// ever reused across distinct target proxies.
pub fn forward_proxy_client(addr: Ipv4Addr, port: u16, timeout: Duration) -> Result<Client> {
    let proxy = Proxy::http(&format!("http://{addr}:{port}"))?;
    let client = Client::builder()
        .proxy(proxy)
        .timeout(timeout)
        .pool_max_idle_per_host(0)
        .build()?;
    Ok(client)
}

/// Per-request header generation.
///
/// Randomized request identities are part of the probe contract, not noise:
/// they keep probe traffic from matching trivial filters. Swap the strategy
/// to change the identity profile.
pub trait HeaderStrategy: Send + Sync {
    fn generate(&self) -> HeaderMap;
}

/// Default strategy: rotate user agent, language, connection and cache
/// headers, and spoof an X-Forwarded-For chain entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomizedHeaders;

impl HeaderStrategy for RandomizedHeaders {
    fn generate(&self) -> HeaderMap {
        let mut rng = rand::thread_rng();
        let mut headers = HeaderMap::new();
        insert_choice(&mut headers, USER_AGENT, USER_AGENTS, &mut rng);
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml"),
        );
        insert_choice(&mut headers, ACCEPT_LANGUAGE, ACCEPT_LANGUAGES, &mut rng);
        insert_choice(&mut headers, CONNECTION, CONNECTION_MODES, &mut rng);
        let spoofed = format!(
            "{}.{}.{}.{}",
            rng.gen_range(1..=255u8),
            rng.gen_range(0..=255u8),
            rng.gen_range(0..=255u8),
            rng.gen_range(1..=254u8)
        );
        if let Ok(value) = HeaderValue::from_str(&spoofed) {
            headers.insert(HeaderName::from_static("x-forwarded-for"), value);
        }
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip, deflate"));
        insert_choice(&mut headers, CACHE_CONTROL, CACHE_MODES, &mut rng);
        headers
    }
}

fn insert_choice(
    headers: &mut HeaderMap,
    name: HeaderName,
    pool: &'static [&'static str],
    rng: &mut impl Rng,
) {
    if let Some(value) = pool.choose(rng) {
        headers.insert(name, HeaderValue::from_static(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_randomized_headers_cover_identity_fields() {
        let headers = RandomizedHeaders.generate();
        for name in [
            "user-agent",
            "accept",
            "accept-language",
            "connection",
            "x-forwarded-for",
            "accept-encoding",
            "cache-control",
        ] {
            assert!(headers.contains_key(name), "missing header {name}");
        }
    }

    #[test]
    fn test_spoofed_forwarded_for_is_a_valid_address() {
        for _ in 0..50 {
            let headers = RandomizedHeaders.generate();
            let value = headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .unwrap();
            let addr: Ipv4Addr = value.parse().unwrap();
            let octets = addr.octets();
            assert!(octets[0] >= 1);
            assert!((1..=254).contains(&octets[3]));
        }
    }

    #[test]
    fn test_user_agent_comes_from_the_pool() {
        let headers = RandomizedHeaders.generate();
        let agent = headers.get("user-agent").and_then(|v| v.to_str().ok());
        assert!(USER_AGENTS.contains(&agent.unwrap()));
    }

    #[test]
    fn test_forward_proxy_client_builds() {
        let client =
            forward_proxy_client(Ipv4Addr::new(203, 0, 113, 7), 8080, Duration::from_secs(5));
        assert!(client.is_ok());
    }
}
