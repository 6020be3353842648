pub mod api;
pub mod common;

pub use api::api_routes;
pub use common::common_routes;

use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::DefaultBodyLimit,
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    Router,
};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// The full application: common routes at the root, resources under `/api/v1`.
/// Bodies are capped as a whole here; uploads are additionally capped per file.
pub fn app(state: AppState) -> Router {
    let max_body = state.config.max_request_bytes;
    Router::new()
        .merge(common_routes(state.clone()))
        .nest("/api/v1", api_routes(state))
        .fallback(unknown_route)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body))
        .layer(middleware::map_response(envelope_bare_errors))
        .layer(TraceLayer::new_for_http())
}

async fn unknown_route() -> AppError {
    AppError::NotFound("接口不存在".into())
}

/// Rewrites the plain-text rejections axum and the body limit layer emit on their own
/// (wrong method, oversized body) into the JSON envelope.
async fn envelope_bare_errors(res: Response) -> Response {
    let is_json = res
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));
    if is_json {
        return res;
    }
    let err = match res.status() {
        StatusCode::NOT_FOUND => AppError::NotFound("接口不存在".into()),
        StatusCode::METHOD_NOT_ALLOWED => AppError::MethodNotAllowed,
        StatusCode::PAYLOAD_TOO_LARGE => AppError::PayloadTooLarge,
        _ => return res,
    };
    let allow = res.headers().get(header::ALLOW).cloned();
    let mut enveloped = err.into_response();
    if let Some(allow) = allow {
        enveloped.headers_mut().insert(header::ALLOW, allow);
    }
    enveloped
}
