//! Forwarding of allowed requests to the protected upstream.

use std::time::Duration;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{self, HeaderMap, HeaderName};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use url::Url;

/// Largest request body forwarded upstream.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Connection-scoped headers never forwarded.
const HOP_BY_HOP: &[HeaderName] = &[
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Protected service requests are forwarded to.
#[derive(Debug, Clone)]
pub struct Upstream {
    client: reqwest::Client,
    base: Url,
}

impl Upstream {
    pub fn new(base: Url, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client, base })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Upstream URL for a request path and query.
    ///
    /// The request path is appended to the base path as a string; the result
    /// always keeps the base origin.
    fn target(&self, path: &str, query: Option<&str>) -> Option<Url> {
        let mut url = self.base.clone();
        let base_path = self.base.path().trim_end_matches('/');
        if path.starts_with('/') {
            url.set_path(&format!("{}{}", base_path, path));
        } else {
            url.set_path(&format!("{}/{}", base_path, path));
        }
        url.set_query(query);
        url.set_fragment(None);
        (url.origin() == self.base.origin()).then_some(url)
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    headers.remove("keep-alive");
}

/// Fallback handler relaying the request to the upstream.
pub async fn forward(State(upstream): State<Upstream>, request: Request) -> Response {
    let Some(target) = upstream.target(request.uri().path(), request.uri().query()) else {
        tracing::warn!(uri = %request.uri(), "Request target escapes the upstream, rejecting");
        return StatusCode::BAD_REQUEST.into_response();
    };

    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!(error = %e, "Failed to read request body");
            return StatusCode::PAYLOAD_TOO_LARGE.into_response();
        }
    };

    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);
    headers.remove(header::HOST);

    let result = upstream
        .client
        .request(parts.method, target.clone())
        .headers(headers)
        .body(body)
        .send()
        .await;

    let upstream_response = match result {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(target = %target, error = %e, "Upstream request failed");
            let status = if e.is_timeout() {
                StatusCode::GATEWAY_TIMEOUT
            } else {
                StatusCode::BAD_GATEWAY
            };
            return status.into_response();
        }
    };

    let status = upstream_response.status();
    let mut response_headers = upstream_response.headers().clone();
    strip_hop_by_hop(&mut response_headers);
    response_headers.remove(header::CONTENT_LENGTH);

    let bytes = match upstream_response.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(target = %target, error = %e, "Failed to read upstream response");
            return StatusCode::BAD_GATEWAY.into_response();
        }
    };

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    response
}
