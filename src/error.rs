use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error, Clone)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    /// Bad, missing or expired handshake token. Terminal: the connection
    /// is closed without registering anything.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Room action without membership. Recoverable; the connection stays open.
    #[error("not authorized")]
    NotAuthorized,

    #[error("not found")]
    NotFound,

    /// The external storage collaborator refused the write.
    #[error("storage rejected: {0}")]
    StorageRejected(String),

    /// The pub/sub bus is unreachable. Recovered internally via retry;
    /// callers degrade to local-only delivery.
    #[error("bridge unavailable: {0}")]
    BridgeUnavailable(String),

    #[error("internal server error")]
    Internal,
}

impl AppError {
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::BadRequest(_) => 400,
            AppError::Auth(_) => 401,
            AppError::NotAuthorized => 403,
            AppError::NotFound => 404,
            AppError::StorageRejected(_) => 422,
            AppError::BridgeUnavailable(_) => 503,
            AppError::Config(_) | AppError::StartServer(_) | AppError::Internal => 500,
        }
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let status = actix_web::http::StatusCode::from_u16(self.status_code())
            .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR);
        HttpResponse::build(status).json(serde_json::json!({ "error": self.to_string() }))
    }
}

impl From<redis::RedisError> for AppError {
    fn from(e: redis::RedisError) -> Self {
        AppError::BridgeUnavailable(e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::BadRequest(format!("serialization: {e}"))
    }
}
