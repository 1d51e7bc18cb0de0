use axum::{http::Method, routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod error;
pub mod middleware;
pub mod orders;
pub mod returns;
pub mod state;
pub mod webhooks;
pub mod worker;

pub use state::{AppState, Backends};

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::USER_AGENT,
        ]);

    let commerce_webhooks = webhooks::commerce_routes().route_layer(axum::middleware::from_fn_with_state(
        state.clone(),
        middleware::rate_limit_middleware,
    ));

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(commerce_webhooks)
        .merge(webhooks::courier_routes())
        .merge(orders::routes())
        .merge(returns::routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
