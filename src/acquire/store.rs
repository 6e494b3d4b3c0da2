use crate::acquire::{AcquiredImage, AcquisitionMethod};
use crate::image::{loader::MAX_IMAGE_BYTES, ImageLoader};
use crate::session::RecentImages;
use crate::utils::error::SpotError;
use crate::Result;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use uuid::Uuid;

/// 允许上传的扩展名
const UPLOAD_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// 上传目录中的图片存储
pub struct ImageStore {
    base_dir: PathBuf,
    max_retained: usize,
}

impl ImageStore {
    pub fn new(base_dir: impl Into<PathBuf>, max_retained: usize) -> Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        tracing::info!("Upload directory: {}", base_dir.display());
        Ok(Self {
            base_dir,
            max_retained: max_retained.max(1),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// 按原文件名原样保存上传的字节，不做转码
    pub async fn save_upload(&self, file_name: &str, data: &[u8]) -> Result<AcquiredImage> {
        if data.is_empty() {
            return Err(SpotError::InvalidInput("Please upload an image file".to_string()));
        }
        if data.len() > MAX_IMAGE_BYTES {
            return Err(SpotError::FileTooLarge(data.len(), MAX_IMAGE_BYTES));
        }

        let name = sanitize_file_name(file_name)?;
        let ext = Path::new(&name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        if !UPLOAD_EXTENSIONS.contains(&ext.as_str()) {
            return Err(SpotError::UnsupportedFormat(format!(
                "'{}' (allowed: jpg, png)",
                name
            )));
        }

        let path = self.base_dir.join(&name);
        self.write_atomic(&path, data).await?;

        tracing::info!("Saved uploaded file {} ({} bytes)", path.display(), data.len());
        Ok(AcquiredImage::new(path, AcquisitionMethod::UploadFile, data.len() as u64))
    }

    /// 下载URL指向的图片，确认文件签名后保存
    pub async fn fetch_url(&self, client: &reqwest::Client, url: &str) -> Result<AcquiredImage> {
        let url = url.trim();
        if url.is_empty() {
            return Err(SpotError::InvalidInput("Please input url".to_string()));
        }

        let data = if url.starts_with("data:") {
            ImageLoader::decode_base64(url)?
        } else {
            let parsed = reqwest::Url::parse(url)
                .map_err(|e| SpotError::InvalidInput(format!("Invalid url '{}': {}", url, e)))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(SpotError::InvalidInput(format!(
                    "Unsupported url scheme: {}",
                    parsed.scheme()
                )));
            }

            tracing::info!("Fetching image from {}", parsed);
            let response = client.get(parsed).send().await?.error_for_status()?;
            read_limited(response, MAX_IMAGE_BYTES).await?
        };

        let ext = ImageLoader::sniff_extension(&data)?;
        let path = self.base_dir.join(format!("url-{}.{}", Uuid::new_v4(), ext));
        self.write_atomic(&path, &data).await?;

        tracing::info!("Saved fetched image {} ({} bytes)", path.display(), data.len());
        Ok(AcquiredImage::new(path, AcquisitionMethod::ProvideUrl, data.len() as u64))
    }

    /// 从会话的最近列表中选取图片；名称为空时取最新一张
    pub async fn resolve_recent(&self, recent: &RecentImages, name: &str) -> Result<AcquiredImage> {
        if recent.is_empty() {
            return Err(SpotError::InvalidInput("No recent images available".to_string()));
        }

        let name = name.trim();
        let found = if name.is_empty() {
            recent.latest()
        } else {
            recent.find_by_name(name)
        };
        let path = found
            .cloned()
            .ok_or_else(|| SpotError::NotFound(format!("'{}' is not a recent image", name)))?;

        let metadata = fs::metadata(&path).await.map_err(|_| {
            SpotError::NotFound(format!("Recent image {} no longer exists", path.display()))
        })?;

        Ok(AcquiredImage::new(path, AcquisitionMethod::UseRecent, metadata.len()))
    }

    /// 查找上传目录中的文件，用于回显图片
    pub async fn image_path(&self, name: &str) -> Result<PathBuf> {
        let clean = sanitize_file_name(name)?;
        if clean != name {
            return Err(SpotError::InvalidInput(format!("Invalid image name: {}", name)));
        }

        let path = self.base_dir.join(&clean);
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            _ => Err(SpotError::NotFound(name.to_string())),
        }
    }

    /// 只保留最新的 `max_retained` 个文件，仍被引用的文件不删除
    pub async fn enforce_retention(&self, protected: &HashSet<PathBuf>) -> Result<usize> {
        let mut files: Vec<(PathBuf, SystemTime)> = Vec::new();
        let mut entries = fs::read_dir(&self.base_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let hidden = path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(true, |n| n.starts_with('.'));
            if hidden {
                continue;
            }
            let meta = entry.metadata().await?;
            if meta.is_file() {
                files.push((path, meta.modified().unwrap_or(SystemTime::UNIX_EPOCH)));
            }
        }

        if files.len() <= self.max_retained {
            return Ok(0);
        }

        files.sort_by(|a, b| b.1.cmp(&a.1));

        let mut removed = 0;
        for (path, _) in files.into_iter().skip(self.max_retained) {
            if protected.contains(&path) {
                continue;
            }
            match fs::remove_file(&path).await {
                Ok(()) => {
                    tracing::debug!("Retention removed {}", path.display());
                    removed += 1;
                }
                Err(e) => tracing::warn!("Failed to remove {}: {}", path.display(), e),
            }
        }

        if removed > 0 {
            tracing::info!("Retention removed {} old images", removed);
        }
        Ok(removed)
    }

    /// 先写临时文件再重命名，避免并发写入交错
    async fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<()> {
        let tmp = self.base_dir.join(format!(".{}.part", Uuid::new_v4()));
        fs::write(&tmp, data).await?;
        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

/// 分块读取响应体，超过 `limit` 立即停止
async fn read_limited(mut response: reqwest::Response, limit: usize) -> Result<Vec<u8>> {
    if let Some(declared) = response.content_length() {
        if declared > limit as u64 {
            return Err(SpotError::FileTooLarge(declared as usize, limit));
        }
    }

    let mut data = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if data.len() + chunk.len() > limit {
            return Err(SpotError::FileTooLarge(data.len() + chunk.len(), limit));
        }
        data.extend_from_slice(&chunk);
    }
    Ok(data)
}

/// 去掉路径部分，只保留文件名
fn sanitize_file_name(file_name: &str) -> Result<String> {
    let name = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    if name.is_empty() || name.starts_with('.') {
        return Err(SpotError::InvalidInput(format!(
            "Invalid file name: '{}'",
            file_name
        )));
    }

    Ok(name.to_string())
}
