use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{error, warn};

use crate::utils::QuizError;

/// RPC 错误响应：`{"error": {"status": <code>, "message": <text>}}`
#[derive(Debug)]
pub struct ApiError(pub QuizError);

impl From<QuizError> for ApiError {
    fn from(err: QuizError) -> Self {
        Self(err)
    }
}

pub fn status_for(err: &QuizError) -> StatusCode {
    match err {
        QuizError::Unauthenticated => StatusCode::UNAUTHORIZED,
        QuizError::PermissionDenied => StatusCode::FORBIDDEN,
        QuizError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        QuizError::NotFound(_) => StatusCode::NOT_FOUND,
        QuizError::FailedPrecondition(_) => StatusCode::CONFLICT,
        QuizError::UnsupportedFormat(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        QuizError::InsufficientContent { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        QuizError::ClassificationFailed(_) | QuizError::GenerationFailed(_) => StatusCode::BAD_GATEWAY,
        QuizError::TransactionFailed(_)
        | QuizError::Ocr(_)
        | QuizError::Database(_)
        | QuizError::Network(_)
        | QuizError::Io(_)
        | QuizError::Serde(_)
        | QuizError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!("RPC 失败 [{}]: {}", self.0.code(), self.0);
        } else {
            warn!("RPC 拒绝 [{}]: {}", self.0.code(), self.0);
        }

        let body = Json(json!({
            "error": {
                "status": self.0.code(),
                "message": self.0.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
