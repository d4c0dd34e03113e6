use crate::AppState;
use crate::api::error::AppError;
use crate::utils::client_ip::extract_client_ip;
use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;

/// Per-IP request budget for the `/auth` routes. Exposes the resolved
/// address to handlers as a `ClientIp` extension.
pub async fn auth_rate_limit_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let ip = extract_client_ip(req.headers(), peer, state.config.trust_proxy_headers);

    if !state.auth_limiter.check(&ip.0) {
        tracing::warn!(client_ip = %ip.0, path = %req.uri().path(), "Auth rate limit hit");
        return Err(AppError::TooManyRequests(
            "Too many requests, please try again later".to_string(),
        ));
    }

    req.extensions_mut().insert(ip);
    Ok(next.run(req).await)
}
