use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use crate::application::store::StoreError;

/// Maps store failures onto the edit surface's status policy: validation
/// errors are the caller's fault (400), unknown ids on a save are 404, and
/// anything touching persistence is a logged 500 with no internals leaked.
pub struct EditorError(StoreError);

impl From<StoreError> for EditorError {
    fn from(err: StoreError) -> Self {
        Self(err)
    }
}

impl IntoResponse for EditorError {
    fn into_response(self) -> Response {
        let (status, message) = if self.0.is_validation() {
            (StatusCode::BAD_REQUEST, self.0.to_string())
        } else if self.0.is_not_found() {
            (StatusCode::NOT_FOUND, self.0.to_string())
        } else {
            error!(error = %self.0, "content store operation failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error".to_string(),
            )
        };
        (status, Json(json!({ "message": message }))).into_response()
    }
}
