use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::IntoResponse,
};
use std::net::SocketAddr;

use crate::state::AppState;

/// Requests per client IP per window.
const LIMIT: i64 = 100;
const WINDOW_SECONDS: i64 = 60;

pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<impl IntoResponse, impl IntoResponse> {
    let (Some(limiter), Some(ConnectInfo(addr))) = (
        state.rate_limiter.as_ref(),
        req.extensions().get::<ConnectInfo<SocketAddr>>().copied(),
    ) else {
        return Ok(next.run(req).await);
    };

    let key = format!("ratelimit:{}", addr.ip());
    match limiter.allow(&key, LIMIT, WINDOW_SECONDS).await {
        Ok(true) => Ok(next.run(req).await),
        Ok(false) => {
            tracing::warn!(ip = %addr.ip(), "Rate limit exceeded");
            Err((StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded"))
        }
        Err(e) => {
            // Fail open
            tracing::debug!("Rate limit check failed: {}", e);
            Ok(next.run(req).await)
        }
    }
}
