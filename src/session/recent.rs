use std::collections::VecDeque;
use std::path::PathBuf;

/// 最近图片列表，按获取顺序排列，最旧的在前
#[derive(Debug, Clone)]
pub struct RecentImages {
    entries: VecDeque<PathBuf>,
    capacity: usize,
}

impl RecentImages {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// 追加一条记录；超出容量时丢弃最旧的。已存在的路径会移到末尾。
    pub fn push(&mut self, path: PathBuf) {
        if let Some(pos) = self.entries.iter().position(|p| *p == path) {
            self.entries.remove(pos);
        }
        self.entries.push_back(path);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// 按文件名查找
    pub fn find_by_name(&self, name: &str) -> Option<&PathBuf> {
        self.entries
            .iter()
            .rev()
            .find(|p| p.file_name().and_then(|n| n.to_str()) == Some(name))
    }

    pub fn latest(&self) -> Option<&PathBuf> {
        self.entries.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathBuf> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

}
