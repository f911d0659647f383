use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

pub type Result<T, E = AppError> = std::result::Result<T, E>;

/// API错误类型
pub struct AppError(pub StatusCode, pub anyhow::Error);

impl AppError {
    /// 鉴权失败
    pub fn unauthorized() -> Self {
        Self(StatusCode::UNAUTHORIZED, anyhow::anyhow!("鉴权失败"))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self.0 {
            StatusCode::INTERNAL_SERVER_ERROR => {
                (self.0, format!("Something went wrong: {}", self.1)).into_response()
            }
            _ => (self.0, self.1.to_string()).into_response(),
        }
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(StatusCode::INTERNAL_SERVER_ERROR, err.into())
    }
}
