pub mod store;

pub use store::ImageStore;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 图片来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionMethod {
    UploadFile,
    ProvideUrl,
    UseRecent,
}

impl std::fmt::Display for AcquisitionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            AcquisitionMethod::UploadFile => "Upload a file",
            AcquisitionMethod::ProvideUrl => "Provide a URL",
            AcquisitionMethod::UseRecent => "Use a recent image",
        };
        f.write_str(label)
    }
}

/// 已保存到上传目录中的图片
#[derive(Debug, Clone, Serialize)]
pub struct AcquiredImage {
    name: String,
    #[serde(skip)]
    path: PathBuf,
    method: AcquisitionMethod,
    size: u64,
}

impl AcquiredImage {
    pub(crate) fn new(path: PathBuf, method: AcquisitionMethod, size: u64) -> Self {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        Self {
            name,
            path,
            method,
            size,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn method(&self) -> AcquisitionMethod {
        self.method
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}
