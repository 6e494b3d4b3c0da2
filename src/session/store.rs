use crate::acquire::AcquiredImage;
use crate::models::Prediction;
use crate::session::{RecentImages, SessionEvent, SessionState};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::{Duration, Instant};

struct Session {
    state: SessionState,
    recent: RecentImages,
    current: Option<AcquiredImage>,
    prediction: Option<Prediction>,
    last_seen: Instant,
}

impl Session {
    fn new(recent_capacity: usize) -> Self {
        Self {
            state: SessionState::NoInput,
            recent: RecentImages::new(recent_capacity),
            current: None,
            prediction: None,
            last_seen: Instant::now(),
        }
    }

    fn apply(&mut self, event: SessionEvent) {
        let next = self.state.transition(event);
        if next != self.state {
            tracing::debug!("Session state: {:?} -> {:?}", self.state, next);
        }
        self.state = next;
    }

    fn snapshot(&self, id: &str) -> SessionSnapshot {
        SessionSnapshot {
            session_id: id.to_string(),
            state: self.state,
            current_image: self.current.as_ref().map(|i| i.name().to_string()),
            prediction: self.prediction.clone(),
            recent_images: self
                .recent
                .iter()
                .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_string))
                .collect(),
        }
    }
}

/// 会话视图在某一时刻的状态
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub state: SessionState,
    pub current_image: Option<String>,
    pub prediction: Option<Prediction>,
    pub recent_images: Vec<String>,
}

/// 按会话ID保存状态和最近图片列表
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
    recent_capacity: usize,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(recent_capacity: usize, ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            recent_capacity,
            ttl,
        }
    }

    fn with_session<T>(&self, id: &str, f: impl FnOnce(&mut Session) -> T) -> T {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .entry(id.to_string())
            .or_insert_with(|| Session::new(self.recent_capacity));
        session.last_seen = Instant::now();
        f(session)
    }

    pub fn snapshot(&self, id: &str) -> SessionSnapshot {
        self.with_session(id, |s| s.snapshot(id))
    }

    /// 记录一次成功的图片获取
    pub fn record_acquisition(&self, id: &str, image: &AcquiredImage) {
        self.with_session(id, |s| {
            s.recent.push(image.path().to_path_buf());
            s.current = Some(image.clone());
            s.prediction = None;
            s.apply(SessionEvent::ImageAcquired);
        })
    }

    /// 选用最近图片：不改变列表，只切换当前图片
    pub fn select_recent(&self, id: &str, image: &AcquiredImage) {
        self.with_session(id, |s| {
            s.current = Some(image.clone());
            s.prediction = None;
            s.apply(SessionEvent::ImageAcquired);
        })
    }

    /// 只有当预测对应的图片仍是当前图片时才记录，返回是否记录
    pub fn record_prediction(&self, id: &str, image: &AcquiredImage, prediction: &Prediction) -> bool {
        self.with_session(id, |s| {
            let is_current = s.current.as_ref().map(|c| c.path()) == Some(image.path());
            if is_current {
                s.prediction = Some(prediction.clone());
                s.apply(SessionEvent::PredictionReady);
            }
            is_current
        })
    }

    pub fn mark_email_sent(&self, id: &str) {
        self.with_session(id, |s| s.apply(SessionEvent::EmailSent))
    }

    pub fn last_prediction(&self, id: &str) -> Option<Prediction> {
        self.with_session(id, |s| {
            if s.state.has_prediction() {
                s.prediction.clone()
            } else {
                None
            }
        })
    }

    pub fn recent(&self, id: &str) -> RecentImages {
        self.with_session(id, |s| s.recent.clone())
    }

    /// 所有会话最近列表中仍被引用的路径
    pub fn referenced_paths(&self) -> HashSet<PathBuf> {
        let sessions = self.sessions.lock();
        sessions
            .values()
            .flat_map(|s| s.recent.iter().cloned())
            .collect()
    }

    /// 清除空闲超时的会话，返回清除数量
    pub fn purge_idle(&self) -> usize {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, s| s.last_seen.elapsed() < self.ttl);
        let purged = before - sessions.len();
        if purged > 0 {
            tracing::debug!("Purged {} idle sessions", purged);
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
