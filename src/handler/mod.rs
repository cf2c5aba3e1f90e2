use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

pub mod calls;
pub mod dashboard;
pub mod handler;
pub mod insights;
pub mod sync;
#[cfg(test)]
mod tests;
pub mod webhook;
pub use handler::router;

pub(crate) fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "error": message.into() })),
    )
        .into_response()
}

/// Bounds a storage call by the configured storage timeout.
pub(crate) async fn bounded<T>(
    state: &crate::app::AppState,
    op: impl std::future::Future<Output = anyhow::Result<T>>,
) -> anyhow::Result<T> {
    tokio::time::timeout(state.config.storage_timeout(), op)
        .await
        .map_err(|_| anyhow::anyhow!("storage timed out"))?
}
