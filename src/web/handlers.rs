use crate::{
    acquire::AcquiredImage,
    analysis::{AnalysisPipeline, AnalysisResult},
    notify::{self, DeliveryStatus, EmailMessage},
    session::SessionSnapshot,
    utils::error::SpotError,
    web::{
        extractors::{SessionId, Validate, ValidatedJson, SESSION_HEADER},
        AppState,
    },
    Result,
};
use axum::{
    extract::{multipart::MultipartRejection, Multipart, Path, State},
    http::{header, HeaderValue},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// URL获取请求
#[derive(Debug, Deserialize)]
pub struct UrlRequest {
    pub url: String,
}

/// 最近图片选择请求，`name` 为空时取最新一张
#[derive(Debug, Default, Deserialize)]
pub struct RecentRequest {
    #[serde(default)]
    pub name: String,
}

/// 邮件发送请求
#[derive(Debug, Deserialize)]
pub struct NotifyRequest {
    #[serde(default)]
    pub email: String,
}

impl Validate for UrlRequest {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.url.trim().is_empty() {
            return Err("Please input url".to_string());
        }
        Ok(())
    }
}

impl Validate for NotifyRequest {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.email.trim().is_empty() {
            return Err("Please enter your email".to_string());
        }
        Ok(())
    }
}

impl Validate for RecentRequest {
    fn validate(&self) -> std::result::Result<(), String> {
        Ok(())
    }
}

/// JSON响应格式
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    pub timestamp: String,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            timestamp: chrono::Utc::now().to_rfc3339(),
            request_id: uuid::Uuid::new_v4().to_string(),
            session_id: None,
        }
    }

    pub fn for_session(data: T, session: &SessionId) -> Self {
        let mut response = Self::success(data);
        response.session_id = Some(session.as_str().to_string());
        response
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let session_header = self
            .session_id
            .as_deref()
            .and_then(|id| HeaderValue::from_str(id).ok());

        let mut response = Json(self).into_response();
        if let Some(value) = session_header {
            response.headers_mut().insert(SESSION_HEADER, value);
        }
        response
    }
}

/// 分析接口的返回内容
#[derive(Debug, Serialize)]
pub struct AnalysisView {
    pub result: AnalysisResult,
    pub session: SessionSnapshot,
}

/// 邮件接口的返回内容
#[derive(Debug, Serialize)]
pub struct NotifyView {
    pub delivery: DeliveryStatus,
    pub session: SessionSnapshot,
}

/// 带会话ID的错误：失败的请求同样把会话ID返回给客户端
#[derive(Debug)]
pub struct ApiError {
    pub error: SpotError,
    pub session_id: String,
}

impl ApiError {
    pub fn new(error: SpotError, session: &SessionId) -> Self {
        Self {
            error,
            session_id: session.as_str().to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.error.into_response_for_session(Some(&self.session_id))
    }
}

pub type ApiResult<T> = std::result::Result<ApiResponse<T>, ApiError>;

type JsonPayload<T> = std::result::Result<ValidatedJson<T>, SpotError>;

/// Multipart文件上传
pub async fn analyze_upload_handler(
    State(state): State<AppState>,
    session: SessionId,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> ApiResult<AnalysisView> {
    tracing::info!("Processing upload request: session={}", session.as_str());

    let result = match multipart {
        Ok(multipart) => receive_upload(&state, &session, multipart).await,
        Err(e) => Err(SpotError::InvalidInput(format!(
            "Invalid multipart request: {}",
            e.body_text()
        ))),
    };
    result.map_err(|e| ApiError::new(e, &session))
}

async fn receive_upload(
    state: &AppState,
    session: &SessionId,
    mut multipart: Multipart,
) -> Result<ApiResponse<AnalysisView>> {
    let mut upload: Option<(String, axum::body::Bytes)> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        SpotError::InvalidInput(format!("Failed to read multipart field: {}", e))
    })? {
        let field_name = field.name().unwrap_or("unknown").to_string();

        match field_name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let data = field.bytes().await.map_err(|e| {
                    SpotError::InvalidInput(format!("Failed to read file data: {}", e))
                })?;

                tracing::debug!("Received file: {} ({} bytes)", file_name, data.len());
                upload = Some((file_name, data));
            }
            _ => {
                tracing::debug!("Ignoring unknown field: {}", field_name);
            }
        }
    }

    let (file_name, data) = upload
        .ok_or_else(|| SpotError::InvalidInput("Please upload an image file".to_string()))?;

    let image = state.store.save_upload(&file_name, &data).await?;
    state.sessions.record_acquisition(session.as_str(), &image);
    apply_retention(state).await;

    analyze(state, session, image).await
}

/// URL下载
pub async fn analyze_url_handler(
    State(state): State<AppState>,
    session: SessionId,
    payload: JsonPayload<UrlRequest>,
) -> ApiResult<AnalysisView> {
    tracing::info!("Processing url request: session={}", session.as_str());

    fetch(&state, &session, payload)
        .await
        .map_err(|e| ApiError::new(e, &session))
}

async fn fetch(
    state: &AppState,
    session: &SessionId,
    payload: JsonPayload<UrlRequest>,
) -> Result<ApiResponse<AnalysisView>> {
    let ValidatedJson(request) = payload?;

    let image = state.store.fetch_url(&state.http, &request.url).await?;
    state.sessions.record_acquisition(session.as_str(), &image);
    apply_retention(state).await;

    analyze(state, session, image).await
}

/// 选择最近图片
pub async fn analyze_recent_handler(
    State(state): State<AppState>,
    session: SessionId,
    payload: JsonPayload<RecentRequest>,
) -> ApiResult<AnalysisView> {
    reuse_recent(&state, &session, payload)
        .await
        .map_err(|e| ApiError::new(e, &session))
}

async fn reuse_recent(
    state: &AppState,
    session: &SessionId,
    payload: JsonPayload<RecentRequest>,
) -> Result<ApiResponse<AnalysisView>> {
    let ValidatedJson(request) = payload?;
    tracing::info!(
        "Processing recent image request: session={}, name={:?}",
        session.as_str(),
        request.name
    );

    let recent = state.sessions.recent(session.as_str());
    let image = state.store.resolve_recent(&recent, &request.name).await?;
    state.sessions.select_recent(session.as_str(), &image);

    analyze(state, session, image).await
}

/// 发送结果邮件；邮箱为空时不会调用发送
pub async fn notify_handler(
    State(state): State<AppState>,
    session: SessionId,
    payload: JsonPayload<NotifyRequest>,
) -> ApiResult<NotifyView> {
    send_result(&state, &session, payload)
        .await
        .map_err(|e| ApiError::new(e, &session))
}

async fn send_result(
    state: &AppState,
    session: &SessionId,
    payload: JsonPayload<NotifyRequest>,
) -> Result<ApiResponse<NotifyView>> {
    let ValidatedJson(request) = payload?;

    let prediction = state.sessions.last_prediction(session.as_str()).ok_or_else(|| {
        SpotError::Conflict("No prediction available, analyze an image first".to_string())
    })?;

    let message = EmailMessage::for_prediction(&request.email, &prediction)?;
    let delivery = notify::deliver(state.notifier.as_ref(), &message).await;

    if delivery.is_sent() {
        state.sessions.mark_email_sent(session.as_str());
    }

    let view = NotifyView {
        delivery,
        session: state.sessions.snapshot(session.as_str()),
    };
    Ok(ApiResponse::for_session(view, session))
}

/// 当前会话状态
pub async fn session_handler(
    State(state): State<AppState>,
    session: SessionId,
) -> ApiResponse<SessionSnapshot> {
    let snapshot = state.sessions.snapshot(session.as_str());
    ApiResponse::for_session(snapshot, &session)
}

/// 回显上传目录中的图片
pub async fn image_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response> {
    let path = state.store.image_path(&name).await?;
    let bytes = tokio::fs::read(&path).await?;

    let content_type = match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    };

    Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}

async fn analyze(
    state: &AppState,
    session: &SessionId,
    image: AcquiredImage,
) -> Result<ApiResponse<AnalysisView>> {
    let start_time = Instant::now();
    let input_size = state.config.onnx_config.input_size;

    let method = image.method();
    let size = image.size();

    let result = AnalysisPipeline::analyze(state.models.model(), image, input_size).await?;
    let recorded = state
        .sessions
        .record_prediction(session.as_str(), &result.image, &result.prediction);
    if !recorded {
        tracing::debug!(
            "Session {} moved on from {}, prediction not stored",
            session.as_str(),
            result.image.name()
        );
    }

    tracing::info!(
        "Request completed: session={}, source={}, size={} bytes, label={}, time={:.3}s",
        session.as_str(),
        method,
        size,
        result.prediction.label,
        start_time.elapsed().as_secs_f32()
    );

    let view = AnalysisView {
        result,
        session: state.sessions.snapshot(session.as_str()),
    };
    Ok(ApiResponse::for_session(view, session))
}

async fn apply_retention(state: &AppState) {
    let protected = state.sessions.referenced_paths();
    if let Err(e) = state.store.enforce_retention(&protected).await {
        tracing::warn!("Retention pass failed: {}", e);
    }
}
