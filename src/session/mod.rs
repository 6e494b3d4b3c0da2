pub mod recent;
pub mod store;

pub use recent::RecentImages;
pub use store::{SessionSnapshot, SessionStore};

use serde::Serialize;

/// 会话视图的状态，只由用户操作驱动
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    NoInput,
    ImageAcquired,
    Predicted,
    EmailSent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    ImageAcquired,
    PredictionReady,
    EmailSent,
}

impl SessionState {
    pub fn transition(self, event: SessionEvent) -> SessionState {
        match (self, event) {
            (_, SessionEvent::ImageAcquired) => SessionState::ImageAcquired,
            (SessionState::ImageAcquired, SessionEvent::PredictionReady)
            | (SessionState::Predicted, SessionEvent::PredictionReady)
            | (SessionState::EmailSent, SessionEvent::PredictionReady) => SessionState::Predicted,
            (SessionState::Predicted, SessionEvent::EmailSent)
            | (SessionState::EmailSent, SessionEvent::EmailSent) => SessionState::EmailSent,
            (state, _) => state,
        }
    }

    pub fn has_prediction(self) -> bool {
        matches!(self, SessionState::Predicted | SessionState::EmailSent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path() {
        let state = SessionState::default()
            .transition(SessionEvent::ImageAcquired)
            .transition(SessionEvent::PredictionReady)
            .transition(SessionEvent::EmailSent);
        assert_eq!(state, SessionState::EmailSent);
    }

    #[test]
    fn cannot_skip_acquisition() {
        assert_eq!(
            SessionState::NoInput.transition(SessionEvent::PredictionReady),
            SessionState::NoInput
        );
        assert_eq!(
            SessionState::NoInput.transition(SessionEvent::EmailSent),
            SessionState::NoInput
        );
        assert_eq!(
            SessionState::ImageAcquired.transition(SessionEvent::EmailSent),
            SessionState::ImageAcquired
        );
    }

    #[test]
    fn new_acquisition_resets_to_acquired() {
        assert_eq!(
            SessionState::EmailSent.transition(SessionEvent::ImageAcquired),
            SessionState::ImageAcquired
        );
        assert!(!SessionState::ImageAcquired.has_prediction());
        assert!(SessionState::EmailSent.has_prediction());
    }
}
