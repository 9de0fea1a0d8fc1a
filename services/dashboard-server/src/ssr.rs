//! Server-rendering collaborator
//!
//! Anything that is not a static file is handed to an [`SsrHandler`]. The
//! production handler forwards the request to the rendering runtime over HTTP
//! and streams its response back untouched.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::{self, HeaderMap, HeaderName};
use axum::http::{Request, Response};
use tracing::debug;

use crate::error::{DashboardError, Result};

/// Renders a response for a request that matched no static file
#[async_trait]
pub trait SsrHandler: Send + Sync {
    async fn handle(&self, request: Request<Body>) -> Result<Response<Body>>;
}

/// Forwards requests to an HTTP server-rendering runtime
pub struct ProxySsrHandler {
    client: reqwest::Client,
    upstream: String,
    max_request_body_bytes: usize,
}

impl ProxySsrHandler {
    pub fn new(upstream: impl Into<String>, max_request_body_bytes: usize) -> Result<Self> {
        // Redirects from the renderer belong to the browser
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| DashboardError::Ssr(format!("Building HTTP client: {}", e)))?;

        Ok(Self {
            client,
            upstream: upstream.into().trim_end_matches('/').to_string(),
            max_request_body_bytes,
        })
    }

    fn upstream_url(&self, request: &Request<Body>) -> String {
        let path_and_query = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        format!("{}{}", self.upstream, path_and_query)
    }
}

#[async_trait]
impl SsrHandler for ProxySsrHandler {
    async fn handle(&self, request: Request<Body>) -> Result<Response<Body>> {
        let url = self.upstream_url(&request);
        let (parts, body) = request.into_parts();
        debug!("{} {} -> {}", parts.method, parts.uri, url);

        let body = axum::body::to_bytes(body, self.max_request_body_bytes)
            .await
            .map_err(|e| DashboardError::Ssr(format!("Reading request body: {}", e)))?;

        let mut headers = forwardable(&parts.headers);
        if let Some(host) = parts.headers.get(header::HOST) {
            headers.insert(X_FORWARDED_HOST, host.clone());
        }

        let upstream = self
            .client
            .request(parts.method.clone(), &url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| DashboardError::Ssr(format!("{} {} failed: {}", parts.method, url, e)))?;

        debug!("{} {} -> {}", parts.method, url, upstream.status());

        let mut response = Response::builder().status(upstream.status());
        if let Some(headers) = response.headers_mut() {
            *headers = forwardable(upstream.headers());
        }
        response
            .body(Body::from_stream(upstream.bytes_stream()))
            .map_err(|e| DashboardError::Ssr(format!("Building response: {}", e)))
    }
}

/// Copy of `headers` without hop-by-hop headers and `Host`
fn forwardable(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = headers.clone();
    for name in &HOP_BY_HOP {
        forwarded.remove(name);
    }
    forwarded.remove(header::HOST);
    forwarded
}

const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

static HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];
