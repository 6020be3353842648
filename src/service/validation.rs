//! Input rules shared by the auth, user and content services.

use crate::error::AppError;
use regex::Regex;

pub const MIN_PASSWORD_LEN: usize = 6;
pub const MAX_NICKNAME_CHARS: usize = 32;
pub const MAX_BIO_CHARS: usize = 200;
pub const MAX_CONTENT_CHARS: usize = 5000;

const MOBILE_PATTERN: &str = r"^1[3-9]\d{9}$";
const CODE_PATTERN: &str = r"^\d{6}$";

fn is_match(pattern: &str, s: &str) -> Result<bool, AppError> {
    let re = Regex::new(pattern).map_err(|e| AppError::Internal(format!("invalid pattern {}: {}", pattern, e)))?;
    Ok(re.is_match(s))
}

pub struct RequestValidator;

impl RequestValidator {
    /// Mainland mobile number: 11 digits starting with 13-19.
    pub fn mobile(mobile: &str) -> Result<(), AppError> {
        if is_match(MOBILE_PATTERN, mobile)? {
            Ok(())
        } else {
            Err(AppError::BadRequest("请输入正确的手机号".into()))
        }
    }

    pub fn code_format(code: &str) -> Result<(), AppError> {
        if is_match(CODE_PATTERN, code)? {
            Ok(())
        } else {
            Err(AppError::InvalidVerificationCode("验证码格式错误".into()))
        }
    }

    pub fn password(password: &str) -> Result<(), AppError> {
        Self::password_labeled(password, "密码")
    }

    /// Same rule as `password`, with the field name used in the message (e.g. "新密码").
    pub fn password_labeled(password: &str, label: &str) -> Result<(), AppError> {
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AppError::BadRequest(format!("{}长度不能少于{}位", label, MIN_PASSWORD_LEN)));
        }
        Ok(())
    }

    pub fn max_chars(value: &str, max: usize, label: &str) -> Result<(), AppError> {
        if value.chars().count() > max {
            return Err(AppError::Validation(format!("{}不能超过{}个字符", label, max)));
        }
        Ok(())
    }

    /// Trimmed, non-empty text.
    pub fn required_text(value: Option<&str>, label: &str) -> Result<String, AppError> {
        match value.map(str::trim).filter(|s| !s.is_empty()) {
            Some(s) => Ok(s.to_string()),
            None => Err(AppError::BadRequest(format!("{}不能为空", label))),
        }
    }
}

/// Last four characters of a mobile number, used for default nicknames.
pub fn mobile_suffix(mobile: &str) -> String {
    let chars: Vec<char> = mobile.chars().collect();
    chars[chars.len().saturating_sub(4)..].iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mobile_numbers() {
        assert!(RequestValidator::mobile("13800138000").is_ok());
        assert!(RequestValidator::mobile("19912345678").is_ok());
        assert!(RequestValidator::mobile("12800138000").is_err());
        assert!(RequestValidator::mobile("1380013800").is_err());
        assert!(RequestValidator::mobile("138001380001").is_err());
        assert!(RequestValidator::mobile("1380013800a").is_err());
    }

    #[test]
    fn codes_and_passwords() {
        assert!(RequestValidator::code_format("123456").is_ok());
        assert!(matches!(
            RequestValidator::code_format("12345"),
            Err(AppError::InvalidVerificationCode(_))
        ));
        assert!(RequestValidator::password("123456").is_ok());
        let err = RequestValidator::password_labeled("123", "新密码").unwrap_err();
        assert_eq!(err.to_string(), "新密码长度不能少于6位");
    }

    #[test]
    fn text_helpers() {
        assert_eq!(RequestValidator::required_text(Some("  hi "), "内容").unwrap(), "hi");
        assert!(RequestValidator::required_text(Some("   "), "内容").is_err());
        assert!(RequestValidator::required_text(None, "内容").is_err());
        assert!(RequestValidator::max_chars("你好", 2, "昵称").is_ok());
        assert!(RequestValidator::max_chars("你好呀", 2, "昵称").is_err());
        assert_eq!(mobile_suffix("13800138000"), "8000");
        assert_eq!(mobile_suffix("12"), "12");
    }
}
