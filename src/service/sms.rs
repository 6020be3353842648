//! SMS dispatch.

use crate::error::AppError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send(&self, mobile: &str, content: &str) -> Result<(), AppError>;
}

/// Mask the middle of a mobile number for logs: 138****8000.
pub fn mask_mobile(mobile: &str) -> String {
    let chars: Vec<char> = mobile.chars().collect();
    if chars.len() < 7 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..3].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}****{}", head, tail)
}

/// Writes messages to the log instead of a gateway.
pub struct LogSmsSender;

#[async_trait]
impl SmsSender for LogSmsSender {
    async fn send(&self, mobile: &str, content: &str) -> Result<(), AppError> {
        tracing::info!(mobile = %mask_mobile(mobile), content = %content, "sms dispatched");
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SmsMessage {
    pub mobile: String,
    pub content: String,
}

/// Keeps every accepted message in memory; can be switched to fail.
#[derive(Default)]
pub struct RecordingSmsSender {
    sent: Mutex<Vec<SmsMessage>>,
    failing: AtomicBool,
}

impl RecordingSmsSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<SmsMessage> {
        self.sent.lock().map(|m| m.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SmsSender for RecordingSmsSender {
    async fn send(&self, mobile: &str, content: &str) -> Result<(), AppError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::ServiceUnavailable("短信发送失败".into()));
        }
        self.sent
            .lock()
            .map_err(|_| AppError::Internal("sms log lock poisoned".into()))?
            .push(SmsMessage {
                mobile: mobile.to_string(),
                content: content.to_string(),
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_mobile() {
        assert_eq!(mask_mobile("13800138000"), "138****8000");
        assert_eq!(mask_mobile("123"), "***");
    }

    #[tokio::test]
    async fn recording_sender_can_fail() {
        let s = RecordingSmsSender::new();
        s.send("13800138000", "hi").await.unwrap();
        s.set_failing(true);
        assert!(matches!(s.send("13800138000", "again").await, Err(AppError::ServiceUnavailable(_))));
        assert_eq!(s.messages().len(), 1);
    }
}
