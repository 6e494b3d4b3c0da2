use anyhow::Result;
use clap::Parser;
use spot_detection::{
    config::{Config, DEFAULT_SMTP_HOST, DEFAULT_SMTP_PORT},
    web::serve,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "spot-detection")]
#[command(about = "Skin lesion classification service")]
struct Args {
    /// Server bind address
    #[arg(long, default_value = "0.0.0.0:8501")]
    bind: String,

    /// Number of worker threads
    #[arg(long)]
    workers: Option<usize>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Path to the ONNX export of the trained model
    #[arg(long, default_value = "final_model.onnx")]
    model_path: String,

    /// Directory holding acquired images
    #[arg(long, default_value = "uploaded_images")]
    upload_dir: String,

    /// Maximum number of images kept in the upload directory
    #[arg(long, default_value_t = 200)]
    max_retained_images: usize,

    /// SMTP relay host
    #[arg(long, default_value = DEFAULT_SMTP_HOST)]
    smtp_host: String,

    /// SMTP relay port (STARTTLS)
    #[arg(long, default_value_t = DEFAULT_SMTP_PORT)]
    smtp_port: u16,

    /// Enable development mode
    #[arg(long)]
    dev: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // 初始化日志系统
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_target(false)
        .init();

    let config = Config::new(
        args.bind,
        args.model_path,
        args.upload_dir,
        args.workers,
        args.max_retained_images,
        args.smtp_host,
        args.smtp_port,
        args.dev,
    )?;

    tracing::info!("Starting SpotDetection service...");
    tracing::info!("Bind address: {}", config.bind_addr);
    tracing::info!("Model path: {}", config.model_path.display());
    tracing::info!("Worker threads: {}", config.workers);

    if config.smtp_config.has_credentials() {
        tracing::info!("Environment variables set");
    } else {
        tracing::warn!("Environment variables not set: GMAIL_USER / GMAIL_PASSWORD");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.workers)
        .enable_all()
        .build()?;

    runtime.block_on(serve(config))?;

    Ok(())
}
