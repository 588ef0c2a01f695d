// src/error.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

// 应用主错误类型，专门用于 HTTP 处理层
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Message not found: {0}")]
    MessageNotFound(i64),

    #[error("Room not found: {0}")]
    RoomNotFound(String),

    #[error("Invalid room name: {0:?}")]
    InvalidRoom(String),

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // 在服务端记录完整的错误细节
        tracing::error!("HTTP Handler Error: {}", self);

        let (status, error_message) = match self {
            AppError::MessageNotFound(id) => {
                (StatusCode::NOT_FOUND, format!("Message not found: {}", id))
            }
            AppError::RoomNotFound(room) => {
                (StatusCode::NOT_FOUND, format!("Room not found: {}", room))
            }
            AppError::InvalidRoom(room) => {
                (StatusCode::BAD_REQUEST, format!("Invalid room name: {}", room))
            }
            // 其他错误都归为内部服务器错误，避免向客户端暴露过多细节
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An internal error occurred".to_string(),
            ),
        };

        (status, error_message).into_response()
    }
}
