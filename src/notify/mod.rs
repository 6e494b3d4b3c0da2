pub mod smtp;

pub use smtp::SmtpNotifier;

use crate::models::Prediction;
use crate::utils::error::SpotError;
use crate::Result;
use async_trait::async_trait;
use lettre::message::Mailbox;
use serde::Serialize;

pub const RESULT_SUBJECT: &str = "Skin Lesion Analysis Results";

/// 纯文本邮件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl EmailMessage {
    /// 根据预测结果生成邮件；收件人为空或格式错误时返回输入错误
    pub fn for_prediction(to: &str, prediction: &Prediction) -> Result<Self> {
        let to = to.trim();
        if to.is_empty() {
            return Err(SpotError::InvalidInput("Please enter your email".to_string()));
        }
        to.parse::<Mailbox>()?;

        Ok(Self {
            to: to.to_string(),
            subject: RESULT_SUBJECT.to_string(),
            body: format!(
                "Your skin lesion has been classified as {} (confidence {:.1}%).",
                prediction.label,
                prediction.confidence * 100.0
            ),
        })
    }
}

/// 邮件投递结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    Failed { reason: String },
}

impl DeliveryStatus {
    pub fn is_sent(&self) -> bool {
        matches!(self, DeliveryStatus::Sent)
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// 发送邮件并把结果转换为明确的投递状态
pub async fn deliver(notifier: &dyn Notifier, message: &EmailMessage) -> DeliveryStatus {
    match notifier.send(message).await {
        Ok(()) => {
            tracing::info!("Email sent successfully to {}", message.to);
            DeliveryStatus::Sent
        }
        Err(e) => {
            tracing::error!("Email delivery to {} failed: {}", message.to, e);
            DeliveryStatus::Failed {
                reason: e.to_string(),
            }
        }
    }
}

/// 测试用：记录所有发送请求
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingNotifier {
    pub sent: parking_lot::Mutex<Vec<EmailMessage>>,
    pub fail: bool,
}

#[cfg(test)]
#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        self.sent.lock().push(message.clone());
        if self.fail {
            Err(SpotError::Email("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}
