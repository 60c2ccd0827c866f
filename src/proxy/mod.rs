//! Reverse proxy to the protected origins.
//!
//! The target comes from the matched domain's `proxy_target`, with the
//! configured default upstream as fallback. Headers are rewritten
//! (Host, X-Forwarded-For, X-Real-IP, hop-by-hop stripped) and the origin's
//! response is streamed back unmodified.

pub mod instrument;

use crate::config::ProxyConfig;
use crate::error::{Result, WafError};
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::http::request::Parts;
use hyper::{HeaderMap, Request, Response, Uri};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use std::time::Duration;

const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

pub struct ReverseProxy {
    client: Client<HttpConnector, Full<Bytes>>,
    default_upstream: Uri,
    timeout: Duration,
}

impl ReverseProxy {
    pub fn new(config: &ProxyConfig) -> Result<Self> {
        let default_upstream: Uri = config
            .default_upstream
            .parse()
            .map_err(|e| WafError::Config(format!("Invalid default_upstream URL: {e}")))?;

        let client = Client::builder(TokioExecutor::new()).build_http();

        Ok(Self {
            client,
            default_upstream,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    /// Forward a buffered request to `target` (or the default upstream) and
    /// return the origin's streaming response. Dropping the returned future
    /// cancels the outbound call.
    pub async fn forward(
        &self,
        parts: &Parts,
        body: Bytes,
        client_ip: &str,
        target: Option<&str>,
    ) -> Result<Response<Incoming>> {
        let upstream = match target {
            Some(raw) => raw
                .parse::<Uri>()
                .map_err(|e| WafError::Config(format!("Invalid proxy target {raw:?}: {e}")))?,
            None => self.default_upstream.clone(),
        };

        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        let authority = upstream
            .authority()
            .map(|a| a.as_str().to_string())
            .ok_or_else(|| {
                WafError::Config(format!("Proxy target {upstream} has no authority"))
            })?;

        let outbound_uri: Uri = format!(
            "{}://{}{}",
            upstream.scheme_str().unwrap_or("http"),
            authority,
            path_and_query
        )
        .parse()
        .map_err(|e| WafError::Config(format!("Failed to build upstream URI: {e}")))?;

        let mut builder = Request::builder().method(parts.method.clone()).uri(outbound_uri);
        if let Some(headers) = builder.headers_mut() {
            *headers = parts.headers.clone();
            rewrite_headers(headers, client_ip, &authority);
        }

        let outbound = builder
            .body(Full::new(body))
            .map_err(|e| WafError::Config(format!("Failed to build upstream request: {e}")))?;

        let response = tokio::time::timeout(self.timeout, self.client.request(outbound))
            .await
            .map_err(|_| WafError::ProxyUnreachable {
                target: authority.clone(),
                reason: format!("timed out after {:?}", self.timeout),
            })?
            .map_err(|e| WafError::ProxyUnreachable {
                target: authority,
                reason: e.to_string(),
            })?;

        Ok(response)
    }
}

fn rewrite_headers(headers: &mut HeaderMap, client_ip: &str, authority: &str) {
    for header in HOP_BY_HOP_HEADERS {
        headers.remove(header);
    }

    let forwarded = match headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        Some(existing) => format!("{existing}, {client_ip}"),
        None => client_ip.to_string(),
    };
    if let Ok(value) = forwarded.parse() {
        headers.insert("x-forwarded-for", value);
    }
    if let Ok(value) = client_ip.parse() {
        headers.insert("x-real-ip", value);
    }
    if let Ok(value) = authority.parse() {
        headers.insert("host", value);
    }
}
