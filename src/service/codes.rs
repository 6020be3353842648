//! SMS verification codes: generation, resend spacing, single-use verification.
//! At most one live code per (purpose, mobile); a resend overwrites it.

use crate::error::AppError;
use crate::service::validation::RequestValidator;
use crate::state::AppState;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex;

const INVALID_CODE: &str = "验证码错误或已过期";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CodePurpose {
    Login,
    Register,
    ResetPassword,
    Bind,
}

impl CodePurpose {
    pub fn as_str(self) -> &'static str {
        match self {
            CodePurpose::Login => "login",
            CodePurpose::Register => "register",
            CodePurpose::ResetPassword => "reset_password",
            CodePurpose::Bind => "bind",
        }
    }

    fn sms_label(self) -> &'static str {
        match self {
            CodePurpose::Login => "登录",
            CodePurpose::Register => "注册",
            CodePurpose::ResetPassword => "重置密码",
            CodePurpose::Bind => "",
        }
    }
}

impl FromStr for CodePurpose {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "login" => Ok(CodePurpose::Login),
            "register" => Ok(CodePurpose::Register),
            "reset_password" | "reset" | "resetPassword" => Ok(CodePurpose::ResetPassword),
            "bind" => Ok(CodePurpose::Bind),
            other => Err(AppError::BadRequest(format!("不支持的验证码类型: {}", other))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodeRecord {
    pub code: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CodeRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

#[async_trait]
pub trait CodeStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CodeRecord>, AppError>;

    async fn put(&self, key: &str, record: CodeRecord) -> Result<(), AppError>;

    /// Remove `key` only while it still holds `expected`. Returns true for the caller that removed it.
    async fn remove_if(&self, key: &str, expected: &CodeRecord) -> Result<bool, AppError>;
}

#[derive(Default)]
pub struct MemoryCodeStore {
    entries: Mutex<HashMap<String, CodeRecord>>,
}

impl MemoryCodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, CodeRecord>>, AppError> {
        self.entries
            .lock()
            .map_err(|_| AppError::Internal("code store lock poisoned".into()))
    }
}

#[async_trait]
impl CodeStore for MemoryCodeStore {
    async fn get(&self, key: &str) -> Result<Option<CodeRecord>, AppError> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn put(&self, key: &str, record: CodeRecord) -> Result<(), AppError> {
        let mut entries = self.lock()?;
        let now = Utc::now();
        entries.retain(|_, r| !r.is_expired(now));
        entries.insert(key.to_string(), record);
        Ok(())
    }

    async fn remove_if(&self, key: &str, expected: &CodeRecord) -> Result<bool, AppError> {
        let mut entries = self.lock()?;
        if entries.get(key) == Some(expected) {
            entries.remove(key);
            return Ok(true);
        }
        Ok(false)
    }
}

fn store_key(purpose: CodePurpose, mobile: &str) -> String {
    format!("{}:{}", purpose.as_str(), mobile)
}

/// Six random digits.
pub fn generate_code() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000u32))
}

pub fn sms_content(signature: &str, purpose: CodePurpose, code: &str, ttl_secs: i64) -> String {
    format!(
        "{}您的{}验证码是: {}, 有效期{}分钟, 请勿泄露给他人",
        signature,
        purpose.sms_label(),
        code,
        (ttl_secs / 60).max(1)
    )
}

pub struct CodeService;

impl CodeService {
    /// Generate and dispatch a code; it is stored only after the SMS collaborator accepted it.
    pub async fn send(state: &AppState, mobile: &str, purpose: CodePurpose) -> Result<String, AppError> {
        RequestValidator::mobile(mobile)?;
        let key = store_key(purpose, mobile);
        let now = Utc::now();
        let interval = state.config.code_resend_interval_secs;
        if interval > 0 {
            if let Some(prev) = state.codes.get(&key).await? {
                if now < prev.issued_at + Duration::seconds(interval) {
                    return Err(AppError::SendTooFrequently);
                }
            }
        }

        let code = generate_code();
        let content = sms_content(&state.config.sms_signature, purpose, &code, state.config.code_ttl_secs);
        state.sms.send(mobile, &content).await.map_err(|e| {
            tracing::warn!(purpose = purpose.as_str(), error = %e, "verification sms failed");
            match e {
                AppError::ServiceUnavailable(_) => e,
                _ => AppError::ServiceUnavailable("短信服务异常".into()),
            }
        })?;

        state
            .codes
            .put(
                &key,
                CodeRecord {
                    code: code.clone(),
                    issued_at: now,
                    expires_at: now + Duration::seconds(state.config.code_ttl_secs),
                },
            )
            .await?;
        tracing::info!(purpose = purpose.as_str(), "verification code issued");
        Ok(code)
    }

    /// Check and consume a code. A mismatch leaves the stored code in place.
    pub async fn verify(state: &AppState, mobile: &str, purpose: CodePurpose, code: &str) -> Result<(), AppError> {
        RequestValidator::code_format(code)?;
        let key = store_key(purpose, mobile);
        let Some(record) = state.codes.get(&key).await? else {
            return Err(AppError::InvalidVerificationCode(INVALID_CODE.into()));
        };
        if record.is_expired(Utc::now()) {
            state.codes.remove_if(&key, &record).await?;
            return Err(AppError::InvalidVerificationCode(INVALID_CODE.into()));
        }
        if record.code != code {
            return Err(AppError::InvalidVerificationCode(INVALID_CODE.into()));
        }
        if !state.codes.remove_if(&key, &record).await? {
            return Err(AppError::InvalidVerificationCode(INVALID_CODE.into()));
        }
        Ok(())
    }
}
