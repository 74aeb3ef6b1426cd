use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::time::Duration;

/// 子进程层错误
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("无法启动 {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("读取子进程输出失败: {0}")]
    Io(#[from] std::io::Error),

    #[error("命令执行超时（{0:?}）")]
    Timeout(Duration),
}

/// 应用目录存储错误
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("读写应用目录失败: {0}")]
    Io(#[from] std::io::Error),

    #[error("应用目录 JSON 格式错误: {0}")]
    Json(#[from] serde_json::Error),

    #[error("应用目录任务异常退出: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// 请求边界错误，统一转换成 JSON 错误体
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("应用不存在")]
    NotFound,

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Run(#[from] RunError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Run(RunError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Run(_) | ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("请求处理失败: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
