//! Password and verification-code authentication, registration and account self-service.

use crate::error::AppError;
use crate::service::codes::{CodePurpose, CodeService};
use crate::service::password::{hash_password, verify_password};
use crate::service::sites::SiteService;
use crate::service::token::Claims;
use crate::service::users::{ProfilePatch, UserProfile, UserRow, UserService};
use crate::service::validation::{mobile_suffix, RequestValidator};
use crate::state::AppState;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoginType {
    #[default]
    Password,
    Code,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub mobile: Option<String>,
    pub password: Option<String>,
    pub code: Option<String>,
    #[serde(default)]
    pub login_type: LoginType,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisterRequest {
    pub mobile: Option<String>,
    pub password: Option<String>,
    pub code: Option<String>,
    pub nickname: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoginUser {
    #[serde(flatten)]
    pub profile: UserProfile,
    #[serde(rename = "isNewUser", skip_serializing_if = "Option::is_none")]
    pub is_new_user: Option<bool>,
}

/// `{token, user}` returned by every login flow.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoginResult {
    pub token: String,
    pub user: LoginUser,
}

fn required(value: Option<&str>, message: &str) -> Result<String, AppError> {
    match value.map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => Ok(s.to_string()),
        None => Err(AppError::BadRequest(message.into())),
    }
}

pub struct AuthService;

impl AuthService {
    fn issue(state: &AppState, row: UserRow, is_new_user: Option<bool>) -> Result<LoginResult, AppError> {
        let token = state.tokens.issue(&row.subject())?;
        Ok(LoginResult {
            token,
            user: LoginUser {
                profile: row.into(),
                is_new_user,
            },
        })
    }

    pub async fn login(state: &AppState, req: LoginRequest) -> Result<LoginResult, AppError> {
        let mobile = required(req.mobile.as_deref(), "请输入手机号")?;
        match req.login_type {
            LoginType::Password => {
                let password = req.password.unwrap_or_default();
                Self::login_with_password(state, &mobile, &password).await
            }
            LoginType::Code => {
                let code = required(req.code.as_deref(), "请输入验证码")?;
                Self::login_with_code(state, &mobile, &code).await
            }
        }
    }

    pub async fn login_with_password(state: &AppState, mobile: &str, password: &str) -> Result<LoginResult, AppError> {
        RequestValidator::mobile(mobile)?;
        if password.is_empty() {
            return Err(AppError::BadRequest("请输入密码".into()));
        }
        let user = UserService::find_by_mobile(state, mobile)
            .await?
            .ok_or(AppError::InvalidCredentials)?;
        let Some(hash) = user.password.as_deref() else {
            return Err(AppError::InvalidCredentials);
        };
        if !verify_password(password, hash).await? {
            tracing::info!(user_id = user.id, "password login rejected");
            return Err(AppError::InvalidCredentials);
        }
        let user = UserService::touch_login(state, &user).await?;
        tracing::info!(user_id = user.id, "password login");
        Self::issue(state, user, None)
    }

    /// Code login; an unknown mobile is registered on the spot.
    pub async fn login_with_code(state: &AppState, mobile: &str, code: &str) -> Result<LoginResult, AppError> {
        RequestValidator::mobile(mobile)?;
        CodeService::verify(state, mobile, CodePurpose::Login, code).await?;

        let (user, is_new) = match UserService::find_by_mobile(state, mobile).await? {
            Some(user) => (user, false),
            None => {
                let site = SiteService::default_site(state).await?.map(|s| s.id);
                let nickname = format!("用户{}", mobile_suffix(mobile));
                (UserService::insert(state, mobile, None, &nickname, site).await?, true)
            }
        };
        let user = UserService::touch_login(state, &user).await?;
        tracing::info!(user_id = user.id, is_new, "code login");
        Self::issue(state, user, Some(is_new))
    }

    /// Duplicate mobiles are rejected before the code is consumed.
    pub async fn register(state: &AppState, req: RegisterRequest) -> Result<LoginResult, AppError> {
        let mobile = required(req.mobile.as_deref(), "请输入手机号")?;
        let password = req.password.unwrap_or_default();
        let code = required(req.code.as_deref(), "请输入验证码")?;
        RequestValidator::mobile(&mobile)?;
        RequestValidator::password(&password)?;
        RequestValidator::code_format(&code)?;
        if UserService::find_by_mobile(state, &mobile).await?.is_some() {
            return Err(AppError::UserExists);
        }
        CodeService::verify(state, &mobile, CodePurpose::Register, &code).await?;

        let nickname = req
            .nickname
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| format!("用户{}", mobile_suffix(&mobile)));
        let hash = hash_password(&password, state.config.bcrypt_cost).await?;
        let site = SiteService::default_site(state).await?.map(|s| s.id);
        let user = UserService::insert(state, &mobile, Some(hash), &nickname, site).await?;
        let user = UserService::touch_login(state, &user).await?;
        Self::issue(state, user, None)
    }

    /// The caller may only reset the password of the mobile they are signed in with.
    pub async fn reset_password(
        state: &AppState,
        caller: &Claims,
        mobile: &str,
        new_password: &str,
        code: &str,
    ) -> Result<(), AppError> {
        RequestValidator::mobile(mobile)?;
        if caller.mobile != mobile {
            return Err(AppError::Forbidden("只能重置当前账号的密码".into()));
        }
        RequestValidator::password_labeled(new_password, "新密码")?;
        RequestValidator::code_format(code)?;
        let user = UserService::find_by_mobile(state, mobile)
            .await?
            .ok_or(AppError::UserNotFound)?;
        CodeService::verify(state, mobile, CodePurpose::ResetPassword, code).await?;

        let hash = hash_password(new_password, state.config.bcrypt_cost).await?;
        let mut set = Map::new();
        set.insert("password".into(), json!(hash));
        UserService::set_columns(state, user.id, set).await?;
        tracing::info!(user_id = user.id, "password reset");
        Ok(())
    }

    pub async fn current_user(state: &AppState, caller: &Claims) -> Result<UserProfile, AppError> {
        UserService::get(state, caller.id).await
    }

    pub async fn update_profile(state: &AppState, caller: &Claims, patch: ProfilePatch) -> Result<UserProfile, AppError> {
        let set = patch.into_set()?;
        Ok(UserService::set_columns(state, caller.id, set).await?.into())
    }

    pub async fn change_password(
        state: &AppState,
        caller: &Claims,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), AppError> {
        if old_password.is_empty() {
            return Err(AppError::BadRequest("请输入原密码".into()));
        }
        RequestValidator::password_labeled(new_password, "新密码")?;
        let user = UserService::find_by_id(state, caller.id).await?;
        let Some(hash) = user.as_ref().and_then(|u| u.password.as_deref()) else {
            return Err(AppError::BadRequest("用户不存在或未设置密码".into()));
        };
        if !verify_password(old_password, hash).await? {
            return Err(AppError::BadRequest("原密码错误".into()));
        }
        let hash = hash_password(new_password, state.config.bcrypt_cost).await?;
        let mut set = Map::new();
        set.insert("password".into(), json!(hash));
        UserService::set_columns(state, caller.id, set).await?;
        tracing::info!(user_id = caller.id, "password changed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    async fn seeded() -> (AppState, UserRow) {
        let state = AppState::in_memory(AppConfig::for_tests());
        let hash = hash_password("secret1", 4).await.unwrap();
        let user = UserService::insert(&state, "13800138000", Some(hash), "老用户", None)
            .await
            .unwrap();
        (state, user)
    }

    fn claims_of(state: &AppState, result: &LoginResult) -> Claims {
        state.tokens.verify(&result.token).unwrap()
    }

    #[tokio::test]
    async fn password_login_issues_token_for_the_mobile() {
        let (state, _) = seeded().await;
        let res = AuthService::login_with_password(&state, "13800138000", "secret1").await.unwrap();
        assert_eq!(claims_of(&state, &res).mobile, "13800138000");
        assert!(res.user.is_new_user.is_none());

        let row = UserService::find_by_mobile(&state, "13800138000").await.unwrap().unwrap();
        assert!(row.last_login_at.is_some());
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_mobile_look_the_same() {
        let (state, _) = seeded().await;
        let wrong = AuthService::login_with_password(&state, "13800138000", "nope123").await;
        let unknown = AuthService::login_with_password(&state, "13900139000", "secret1").await;
        assert!(matches!(wrong, Err(AppError::InvalidCredentials)));
        assert!(matches!(unknown, Err(AppError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn code_login_provisions_new_users() {
        let state = AppState::in_memory(AppConfig::for_tests());
        let code = CodeService::send(&state, "13700137000", CodePurpose::Login).await.unwrap();
        let res = AuthService::login_with_code(&state, "13700137000", &code).await.unwrap();
        assert_eq!(res.user.is_new_user, Some(true));
        assert_eq!(res.user.profile.nickname.as_deref(), Some("用户7000"));

        let again = AuthService::login_with_code(&state, "13700137000", &code).await;
        assert!(matches!(again, Err(AppError::InvalidVerificationCode(_))));
    }

    #[tokio::test]
    async fn bad_code_creates_nothing() {
        let state = AppState::in_memory(AppConfig::for_tests());
        let res = AuthService::login_with_code(&state, "13700137000", "123456").await;
        assert!(res.is_err());
        assert!(UserService::find_by_mobile(&state, "13700137000").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn register_rejects_existing_mobile_without_spending_the_code() {
        let (state, _) = seeded().await;
        let code = CodeService::send(&state, "13800138000", CodePurpose::Register).await.unwrap();
        let req = RegisterRequest {
            mobile: Some("13800138000".into()),
            password: Some("another1".into()),
            code: Some(code),
            nickname: None,
        };
        assert!(matches!(AuthService::register(&state, req).await, Err(AppError::UserExists)));
        assert!(state.codes.get("register:13800138000").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn reset_requires_matching_caller_and_valid_code() {
        let (state, user) = seeded().await;
        let login = AuthService::login_with_password(&state, "13800138000", "secret1").await.unwrap();
        let caller = claims_of(&state, &login);
        let other = Claims {
            mobile: "13900139000".into(),
            ..caller.clone()
        };
        let res = AuthService::reset_password(&state, &other, "13800138000", "newpass1", "123456").await;
        assert!(matches!(res, Err(AppError::Forbidden(_))));

        let bad = AuthService::reset_password(&state, &caller, "13800138000", "newpass1", "000000").await;
        assert!(matches!(bad, Err(AppError::InvalidVerificationCode(_))));
        AuthService::login_with_password(&state, "13800138000", "secret1").await.unwrap();

        let code = CodeService::send(&state, "13800138000", CodePurpose::ResetPassword).await.unwrap();
        AuthService::reset_password(&state, &caller, "13800138000", "newpass1", &code).await.unwrap();
        assert!(AuthService::login_with_password(&state, "13800138000", "secret1").await.is_err());
        let res = AuthService::login_with_password(&state, "13800138000", "newpass1").await.unwrap();
        assert_eq!(res.user.profile.id, user.id);
    }

    #[tokio::test]
    async fn change_password_checks_the_old_one() {
        let (state, user) = seeded().await;
        let caller = Claims {
            id: user.id,
            mobile: user.mobile.clone(),
            nickname: None,
            role: "user".into(),
            current_site_id: None,
            iat: 0,
            exp: 0,
        };
        let res = AuthService::change_password(&state, &caller, "wrong12", "newpass1").await;
        assert!(matches!(res, Err(AppError::BadRequest(ref m)) if m == "原密码错误"));
        let short = AuthService::change_password(&state, &caller, "secret1", "123").await;
        assert!(matches!(short, Err(AppError::BadRequest(ref m)) if m == "新密码长度不能少于6位"));
        AuthService::change_password(&state, &caller, "secret1", "newpass1").await.unwrap();
        AuthService::login_with_password(&state, "13800138000", "newpass1").await.unwrap();
    }
}
