pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod ui;

use crate::{
    acquire::ImageStore,
    models::ModelManager,
    notify::{Notifier, SmtpNotifier},
    session::SessionStore,
    utils::error::SpotError,
    Config, Result,
};
use axum::{
    extract::{DefaultBodyLimit, State},
    middleware::from_fn,
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, timeout::TimeoutLayer};

/// 处理器共享的应用状态
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub models: ModelManager,
    pub store: Arc<ImageStore>,
    pub sessions: Arc<SessionStore>,
    pub notifier: Arc<dyn Notifier>,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(config: Config, models: ModelManager, notifier: Arc<dyn Notifier>) -> Result<Self> {
        let store = ImageStore::new(
            config.storage_config.upload_dir.clone(),
            config.storage_config.max_retained_images,
        )?;

        let sessions = SessionStore::new(config.storage_config.recent_capacity, config.session_ttl());

        let http = reqwest::Client::builder()
            .timeout(config.fetch_timeout())
            .user_agent(concat!("spot-detection/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            config,
            models,
            store: Arc::new(store),
            sessions: Arc::new(sessions),
            notifier,
            http,
        })
    }
}

pub async fn serve(config: Config) -> Result<()> {
    // 启动时加载一次模型
    let models = ModelManager::load(config.clone())?;
    let notifier: Arc<dyn Notifier> = Arc::new(SmtpNotifier::new(config.smtp_config.clone()));
    let state = AppState::new(config.clone(), models, notifier)?;

    spawn_session_sweeper(Arc::clone(&state.sessions));

    let app = create_app(state);

    let addr: SocketAddr = config.bind_addr.parse().map_err(|e| {
        SpotError::Config(format!("Invalid bind address {}: {}", config.bind_addr, e))
    })?;

    tracing::info!("Server starting on http://{}", addr);
    tracing::info!("API endpoints:");
    tracing::info!("  GET  /                    - Web UI");
    tracing::info!("  POST /api/analyze/upload  - Multipart file upload");
    tracing::info!("  POST /api/analyze/url     - Fetch image from url");
    tracing::info!("  POST /api/analyze/recent  - Reuse a recent image");
    tracing::info!("  POST /api/notify          - Email the last result");
    tracing::info!("  GET  /api/session         - Session state");
    tracing::info!("  GET  /health              - Health check");
    tracing::info!("  GET  /api/info            - Service information");

    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        SpotError::Internal(format!("Failed to bind to address {}: {}", addr, e))
    })?;

    axum::serve(listener, app)
        .await
        .map_err(|e| SpotError::Internal(format!("Server failed to start: {}", e)))?;

    Ok(())
}

pub fn create_app(state: AppState) -> Router {
    let server_config = &state.config.server_config;
    let max_request_size = server_config.max_request_size;
    let request_timeout = Duration::from_secs(server_config.request_timeout);

    Router::new()
        // 分析接口
        .route("/api/analyze/upload", post(handlers::analyze_upload_handler))
        .route("/api/analyze/url", post(handlers::analyze_url_handler))
        .route("/api/analyze/recent", post(handlers::analyze_recent_handler))
        .route("/api/notify", post(handlers::notify_handler))
        .route("/api/session", get(handlers::session_handler))
        .route("/images/:name", get(handlers::image_handler))

        // Web UI路由
        .route("/", get(ui::index_handler))

        // 系统路由
        .route("/health", get(health_handler))
        .route("/api/info", get(info_handler))

        .layer(DefaultBodyLimit::max(max_request_size))
        .layer(RequestBodyLimitLayer::new(max_request_size))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(CorsLayer::permissive())
        .layer(from_fn(middleware::security_headers))
        .layer(from_fn(middleware::request_logging))
        .with_state(state)
}

fn spawn_session_sweeper(sessions: Arc<SessionStore>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(600));
        loop {
            interval.tick().await;
            sessions.purge_idle();
        }
    });
}

/// 健康检查端点
async fn health_handler(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    let check = state.models.health_check()?;
    Ok(Json(json!({
        "status": "healthy",
        "model_check": check,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    })))
}

/// 服务信息端点
async fn info_handler(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    let stats = state.models.get_stats();
    Ok(Json(json!({
        "service": "SpotDetection",
        "version": env!("CARGO_PKG_VERSION"),
        "description": env!("CARGO_PKG_DESCRIPTION"),
        "model": stats,
        "active_sessions": state.sessions.len(),
        "email_configured": state.config.smtp_config.has_credentials(),
        "acquisition_methods": ["upload_file", "provide_url", "use_recent"]
    })))
}
