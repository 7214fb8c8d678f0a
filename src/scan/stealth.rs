//! Open-proxy detection: the cheap heuristic pass that filters a large
//! candidate pool before full verification.

use crate::scan::http::{forward_proxy_client, HeaderStrategy, RandomizedHeaders};
use crate::scan::retry;
use log::debug;
use rand::seq::SliceRandom;
use reqwest::Response;
use std::net::Ipv4Addr;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

/// Heuristic class of a test site. Each class carries its own acceptance
/// rule, so new sites slot into the table without touching the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteClass {
    /// Storefront asset endpoints; static content served broadly.
    Catalog,
    /// Player embed paths that answer 404 to anything unrecognized.
    VideoEmbed,
    /// State broadcasters that tag responses with a regional language.
    GovBroadcast,
    /// Plain availability endpoints with no special signal.
    Generic,
}

/// One probe endpoint and the rule used to judge its responses.
#[derive(Debug, Clone, Copy)]
pub struct TestSite {
    pub url: &'static str,
    pub class: SiteClass,
}

/// Endpoints representative of the target deployment region.
pub const TEST_SITES: &[TestSite] = &[
    TestSite {
        url: "http://www.aparat.com/video/video/embed/videohash/xyz",
        class: SiteClass::VideoEmbed,
    },
    TestSite {
        url: "http://www.snapp.ir/api/v1/ping",
        class: SiteClass::Generic,
    },
    TestSite {
        url: "http://www.digikala.com/static/js/main.js",
        class: SiteClass::Catalog,
    },
    TestSite {
        url: "http://www.torob.com/api/v1/ping",
        class: SiteClass::Generic,
    },
    TestSite {
        url: "http://www.shahed.ir/",
        class: SiteClass::GovBroadcast,
    },
    TestSite {
        url: "http://www.yjc.ir/",
        class: SiteClass::GovBroadcast,
    },
];

/// Pre-request pacing; spreads probe timing so bursts do not stand out.
const PROBE_DELAY_SECS: Range<f64> = 0.1..1.5;

const PROXY_SERVER_SOFTWARE: &[&str] = &["apache", "nginx", "iis", "litespeed"];

/// Lightweight open-proxy classifier.
pub struct StealthProbe {
    timeout: Duration,
    headers: Arc<dyn HeaderStrategy>,
}

impl StealthProbe {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            headers: Arc::new(RandomizedHeaders),
        }
    }

    pub fn with_header_strategy(mut self, headers: Arc<dyn HeaderStrategy>) -> Self {
        self.headers = headers;
        self
    }

    /// Decide whether `addr:port` looks like an open HTTP proxy.
    ///
    /// Transport failures and anything unexpected resolve to `false`; nothing
    /// propagates out of a probe.
    pub async fn classify(&self, addr: Ipv4Addr, port: u16) -> bool {
        tokio::time::sleep(retry::jitter(PROBE_DELAY_SECS)).await;

        let site = match TEST_SITES.choose(&mut rand::thread_rng()) {
            Some(site) => *site,
            None => return false,
        };
        let client = match forward_proxy_client(addr, port, self.timeout) {
            Ok(client) => client,
            Err(err) => {
                debug!("client setup for {addr}:{port} failed: {err}");
                return false;
            }
        };

        let request = client.get(site.url).headers(self.headers.generate());
        match request.send().await {
            Ok(response) => {
                let verdict = judge(site.class, &response);
                debug!(
                    "{addr}:{port} via {} -> {verdict} (status {})",
                    site.url,
                    response.status()
                );
                verdict
            }
            Err(err) => {
                debug!("{addr}:{port} via {} failed: {err}", site.url);
                false
            }
        }
    }
}

fn judge(class: SiteClass, response: &Response) -> bool {
    evaluate(
        class,
        response.status().as_u16(),
        header_str(response, "server").as_deref(),
        header_str(response, "content-type").as_deref(),
        header_str(response, "content-language").as_deref(),
    )
}

fn header_str(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

/// The per-class decision table, first match wins:
/// a known proxy-fronting `Server` header passes any site, then each site
/// class applies its own rule.
pub fn evaluate(
    class: SiteClass,
    status: u16,
    server: Option<&str>,
    content_type: Option<&str>,
    content_language: Option<&str>,
) -> bool {
    if let Some(server) = server {
        let server = server.to_ascii_lowercase();
        if PROXY_SERVER_SOFTWARE
            .iter()
            .any(|software| server.contains(software))
        {
            return true;
        }
    }

    let status_ok = matches!(status, 200 | 204 | 404);
    match class {
        SiteClass::Catalog => {
            let content_type = content_type.map(str::to_ascii_lowercase).unwrap_or_default();
            status_ok && (content_type.contains("javascript") || content_type.contains("text/html"))
        }
        SiteClass::VideoEmbed => status == 404,
        SiteClass::GovBroadcast => content_language
            .map(str::to_ascii_lowercase)
            .unwrap_or_default()
            .contains("fa-ir"),
        SiteClass::Generic => status_ok,
    }
}
