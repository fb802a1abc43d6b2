//! Upstream HTTP calls against the real origin.
//!
//! One shared client serves every in-flight request. Any failure to build
//! or perform the call — unparsable rewritten URL, bad method, DNS,
//! connect, or read errors — collapses into a synthetic 500 envelope so
//! the broker always gets an answer it can correlate.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use backhaul_common::config::ProxyConfig;
use backhaul_proto::{Headers, RequestEnvelope, ResponseEnvelope};

use crate::rewrite::{target_url, RewriteRules};
use crate::AgentError;

#[derive(Error, Debug)]
enum UpstreamError {
    #[error("invalid target URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid method: {0}")]
    Method(#[from] http::method::InvalidMethod),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Shared upstream state: the HTTP client, compiled rewrite rules, and the
/// default target for relative URLs.
#[derive(Debug)]
pub(crate) struct Upstream {
    client: reqwest::Client,
    rules: RewriteRules,
    default_target: Url,
}

impl Upstream {
    pub(crate) fn new(proxy: &ProxyConfig) -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(!proxy.ssl.reject_unauthorized)
            .build()?;
        let rules = RewriteRules::compile(&proxy.rewrite_rules)?;
        let default_target =
            Url::parse(&proxy.default_target).map_err(|source| AgentError::DefaultTarget {
                url: proxy.default_target.clone(),
                source,
            })?;
        Ok(Self {
            client,
            rules,
            default_target,
        })
    }

    /// Carry one request to the origin. Never fails: errors become a
    /// synthetic 500 envelope.
    pub(crate) async fn handle(&self, request: &RequestEnvelope) -> ResponseEnvelope {
        match self.perform(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(request_id = %request.request_id, error = %e, "upstream request failed");
                ResponseEnvelope {
                    client_id: request.client_id.clone(),
                    request_id: request.request_id.clone(),
                    status_code: 500,
                    headers: Headers::new(),
                    body: b"Internal Server Error".to_vec(),
                }
            }
        }
    }

    async fn perform(
        &self,
        request: &RequestEnvelope,
    ) -> std::result::Result<ResponseEnvelope, UpstreamError> {
        let target = target_url(&request.url, &self.rules, &self.default_target)?;
        let method = reqwest::Method::from_bytes(request.method.as_bytes())?;

        let mut headers = HeaderMap::new();
        for (name, values) in request.headers.iter() {
            // Host comes from the target URL, not the tunnel.
            if name.eq_ignore_ascii_case("host") {
                continue;
            }
            let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) else {
                warn!(header = name, "skipping invalid header name");
                continue;
            };
            for value in values {
                match HeaderValue::from_str(value) {
                    Ok(v) => {
                        headers.append(header_name.clone(), v);
                    }
                    Err(_) => warn!(header = name, "skipping invalid header value"),
                }
            }
        }

        debug!(method = %method, url = %target, request_id = %request.request_id, "calling upstream");

        let response = self
            .client
            .request(method, target)
            .headers(headers)
            .body(request.body.clone())
            .send()
            .await?;

        let status_code = response.status().as_u16();
        let mut out_headers = Headers::new();
        for (name, value) in response.headers() {
            match value.to_str() {
                Ok(v) => out_headers.append(name.as_str(), v),
                Err(_) => warn!(header = %name, "skipping non-UTF-8 upstream header value"),
            }
        }

        let body = response.bytes().await?.to_vec();

        Ok(ResponseEnvelope {
            client_id: request.client_id.clone(),
            request_id: request.request_id.clone(),
            status_code,
            headers: out_headers,
            body,
        })
    }
}
