//! axum middleware running every request through the bouncer.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use bouncer_core::TrustError;

use crate::challenge::ChallengeState;
use crate::dispatcher::{dispatch, is_challenge_exempt, Action};
use crate::response::forbidden;
use crate::state::{BouncerState, Evaluation};

/// Admission control layer.
///
/// Install with `axum::middleware::from_fn_with_state` and serve the router
/// with `into_make_service_with_connect_info::<SocketAddr>()` so the peer
/// address is available. Requests without one are denied.
pub async fn bouncer_middleware(
    State(state): State<BouncerState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(peer) = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
    else {
        tracing::warn!("Peer address unavailable, denying request");
        return forbidden();
    };

    let forwarded = match forwarded_header(request.headers(), state.trust.header_name()) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(peer = %peer, error = %e, "Denying request");
            return forbidden();
        }
    };

    let evaluation = match state.evaluate(peer, forwarded.as_deref()).await {
        Ok(evaluation) => evaluation,
        Err(e) => {
            tracing::warn!(peer = %peer, error = %e, "Request could not be evaluated, denying");
            return forbidden();
        }
    };

    let (ip, remediation) = match evaluation {
        Evaluation::Bypass => return next.run(request).await,
        Evaluation::Deny { ip, reason } => {
            tracing::debug!(ip = %ip, reason = ?reason, "Request denied");
            return forbidden();
        }
        Evaluation::Remediate { ip, remediation } => (ip, remediation),
    };

    match dispatch(remediation, state.challenge.as_deref(), state.fallback) {
        Action::Pass => next.run(request).await,
        Action::Block => {
            tracing::debug!(ip = %ip, remediation = %remediation, "Request blocked");
            forbidden()
        }
        Action::Challenge => {
            let Some(challenge) = state.challenge.as_deref() else {
                return next.run(request).await;
            };
            let ip = ip.to_string();
            if is_challenge_exempt(request.uri().path())
                || challenge.check_cookie(request.headers(), &ip) == ChallengeState::Verified
            {
                return next.run(request).await;
            }
            tracing::debug!(ip = %ip, path = %request.uri().path(), "Serving challenge");
            challenge.respond(request, &ip).await
        }
    }
}

/// Every occurrence of the forwarding header, joined by `,`.
fn forwarded_header(headers: &HeaderMap, name: &str) -> Result<Option<String>, TrustError> {
    let mut values = Vec::new();
    for value in headers.get_all(name) {
        let value = value.to_str().map_err(|_| TrustError::MalformedHeader {
            header: name.to_string(),
            value: String::from_utf8_lossy(value.as_bytes()).into_owned(),
        })?;
        values.push(value);
    }
    Ok((!values.is_empty()).then(|| values.join(",")))
}
