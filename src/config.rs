use crate::utils::error::SpotError;
use crate::Result;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_SMTP_HOST: &str = "smtp.gmail.com";
pub const DEFAULT_SMTP_PORT: u16 = 587;

#[derive(Debug, Clone)]
pub struct Config {
    /// 服务器绑定地址
    pub bind_addr: String,

    /// 模型文件路径
    pub model_path: PathBuf,

    /// 工作线程数量
    pub workers: usize,

    /// 开发模式
    pub dev_mode: bool,

    /// ONNX Runtime配置
    pub onnx_config: OnnxConfig,

    /// 服务器配置
    pub server_config: ServerConfig,

    /// 图片存储配置
    pub storage_config: StorageConfig,

    /// 邮件配置
    pub smtp_config: SmtpConfig,
}

#[derive(Debug, Clone)]
pub struct OnnxConfig {
    /// CPU线程数
    pub intra_threads: usize,

    /// 模型输入尺寸 (宽, 高)
    pub input_size: (u32, u32),
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// 请求超时时间（秒）
    pub request_timeout: u64,

    /// 最大请求体大小（字节）
    pub max_request_size: usize,

    /// URL下载超时时间（秒）
    pub fetch_timeout: u64,

    /// 会话空闲过期时间（秒）
    pub session_ttl: u64,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// 上传目录
    pub upload_dir: PathBuf,

    /// 目录中最多保留的图片数量
    pub max_retained_images: usize,

    /// 每个会话的最近图片数量
    pub recent_capacity: usize,
}

#[derive(Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout: Duration,
}

// 不在日志里打印密码
impl std::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl SmtpConfig {
    /// 从 `GMAIL_USER` / `GMAIL_PASSWORD` 读取发件人凭据
    pub fn from_env(host: String, port: u16) -> Self {
        Self {
            host,
            port,
            username: non_empty_env("GMAIL_USER"),
            password: non_empty_env("GMAIL_PASSWORD"),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bind_addr: String,
        model_path: String,
        upload_dir: String,
        workers: Option<usize>,
        max_retained_images: usize,
        smtp_host: String,
        smtp_port: u16,
        dev_mode: bool,
    ) -> Result<Self> {
        if bind_addr.trim().is_empty() {
            return Err(SpotError::Config("Bind address cannot be empty".to_string()));
        }
        if max_retained_images == 0 {
            return Err(SpotError::Config(
                "max_retained_images must be at least 1".to_string(),
            ));
        }

        let cpu_cores = num_cpus::get();
        let workers = workers.unwrap_or(cpu_cores).max(1);

        let onnx_config = OnnxConfig {
            intra_threads: (cpu_cores / 2).max(1),
            input_size: (crate::image::INPUT_WIDTH, crate::image::INPUT_HEIGHT),
        };

        let server_config = ServerConfig {
            request_timeout: if dev_mode { 300 } else { 60 }, // 开发模式更长超时
            max_request_size: 20 * 1024 * 1024, // 20MB
            fetch_timeout: 15,
            session_ttl: 24 * 60 * 60,
        };

        let storage_config = StorageConfig {
            upload_dir: PathBuf::from(upload_dir),
            max_retained_images,
            recent_capacity: 5,
        };

        let smtp_config = SmtpConfig::from_env(smtp_host, smtp_port);

        Ok(Self {
            bind_addr,
            model_path: PathBuf::from(model_path),
            workers,
            dev_mode,
            onnx_config,
            server_config,
            storage_config,
            smtp_config,
        })
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.server_config.fetch_timeout)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.server_config.session_ttl)
    }
}

#[cfg(test)]
pub(crate) fn test_config(upload_dir: &std::path::Path) -> Config {
    Config {
        bind_addr: "127.0.0.1:0".to_string(),
        model_path: PathBuf::from("final_model.onnx"),
        workers: 1,
        dev_mode: false,
        onnx_config: OnnxConfig {
            intra_threads: 1,
            input_size: (crate::image::INPUT_WIDTH, crate::image::INPUT_HEIGHT),
        },
        server_config: ServerConfig {
            request_timeout: 10,
            max_request_size: 5 * 1024 * 1024,
            fetch_timeout: 5,
            session_ttl: 60,
        },
        storage_config: StorageConfig {
            upload_dir: upload_dir.to_path_buf(),
            max_retained_images: 50,
            recent_capacity: 5,
        },
        smtp_config: SmtpConfig {
            host: DEFAULT_SMTP_HOST.to_string(),
            port: DEFAULT_SMTP_PORT,
            username: None,
            password: None,
            timeout: Duration::from_secs(5),
        },
    }
}
