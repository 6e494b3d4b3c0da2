use crate::web::extractors::SESSION_HEADER;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpotError {
    #[error("Model loading failed: {0}")]
    ModelLoad(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("File too large: {0} bytes, max allowed: {1} bytes")]
    FileTooLarge(usize, usize),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("SMTP credentials missing: set GMAIL_USER and GMAIL_PASSWORD")]
    MissingCredentials,

    #[error("Image fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("Email delivery failed: {0}")]
    Email(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Image decode error: {0}")]
    ImageDecode(#[from] image::ImageError),

    #[error("ORT error: {0}")]
    Ort(#[from] ort::Error),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<lettre::error::Error> for SpotError {
    fn from(err: lettre::error::Error) -> Self {
        SpotError::Email(err.to_string())
    }
}

impl From<lettre::transport::smtp::Error> for SpotError {
    fn from(err: lettre::transport::smtp::Error) -> Self {
        SpotError::Email(err.to_string())
    }
}

impl From<lettre::address::AddressError> for SpotError {
    fn from(err: lettre::address::AddressError) -> Self {
        SpotError::InvalidInput(format!("Invalid email address: {}", err))
    }
}

impl SpotError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            SpotError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            SpotError::FileTooLarge(_, _) => StatusCode::PAYLOAD_TOO_LARGE,
            SpotError::UnsupportedFormat(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            SpotError::NotFound(_) => StatusCode::NOT_FOUND,
            SpotError::Conflict(_) => StatusCode::CONFLICT,
            SpotError::Base64(_) => StatusCode::BAD_REQUEST,
            SpotError::ImageDecode(_) => StatusCode::UNPROCESSABLE_ENTITY,
            SpotError::Fetch(_) => StatusCode::BAD_GATEWAY,
            SpotError::Email(_) | SpotError::MissingCredentials => StatusCode::BAD_GATEWAY,
            SpotError::ModelLoad(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            SpotError::ModelLoad(_) => "MODEL_LOAD_ERROR",
            SpotError::Inference(_) => "INFERENCE_ERROR",
            SpotError::InvalidInput(_) => "INVALID_INPUT",
            SpotError::FileTooLarge(_, _) => "FILE_TOO_LARGE",
            SpotError::UnsupportedFormat(_) => "UNSUPPORTED_FORMAT",
            SpotError::NotFound(_) => "NOT_FOUND",
            SpotError::Conflict(_) => "CONFLICT",
            SpotError::MissingCredentials => "MISSING_CREDENTIALS",
            SpotError::Fetch(_) => "FETCH_ERROR",
            SpotError::Email(_) => "EMAIL_ERROR",
            SpotError::Config(_) => "CONFIG_ERROR",
            SpotError::Io(_) => "IO_ERROR",
            SpotError::Base64(_) => "BASE64_DECODE_ERROR",
            SpotError::ImageDecode(_) => "IMAGE_DECODE_ERROR",
            SpotError::Ort(_) => "ORT_ERROR",
            SpotError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl SpotError {
    /// 渲染错误响应；带会话ID时同时写入响应体和 `X-Session-ID` 头
    pub fn into_response_for_session(self, session_id: Option<&str>) -> Response {
        let status = self.status_code();
        let request_id = uuid::Uuid::new_v4().to_string();
        let mut error_response = serde_json::json!({
            "success": false,
            "error": {
                "code": self.error_code(),
                "message": self.to_string(),
            },
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "request_id": request_id,
        });
        if let Some(id) = session_id {
            error_response["session_id"] = serde_json::Value::from(id);
        }

        if status.is_server_error() {
            tracing::error!("Request {} failed: {} ({})", request_id, self, status);
        } else {
            tracing::warn!("Request {} rejected: {} ({})", request_id, self, status);
        }

        let mut response = (status, axum::Json(error_response)).into_response();
        if let Some(value) = session_id.and_then(|id| HeaderValue::from_str(id).ok()) {
            response.headers_mut().insert(SESSION_HEADER, value);
        }
        response
    }
}

impl IntoResponse for SpotError {
    fn into_response(self) -> Response {
        self.into_response_for_session(None)
    }
}
