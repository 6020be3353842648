//! Auth handlers: login flows, registration, codes and account self-service.

use crate::error::AppError;
use crate::extractors::{ApiJson, AuthUser, AUTH_COOKIE};
use crate::response::{ok, ok_empty, ok_with_message, ApiResponse, Envelope};
use crate::service::auth::{AuthService, LoginRequest, LoginResult, RegisterRequest};
use crate::service::codes::{CodePurpose, CodeService};
use crate::service::users::{ProfilePatch, UserProfile};
use crate::state::AppState;
use axum::{
    extract::State,
    http::{header, HeaderValue},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

fn session_cookie(state: &AppState, token: &str, max_age: i64) -> Result<HeaderValue, AppError> {
    let mut cookie = format!("{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}", AUTH_COOKIE, token, max_age);
    if state.config.environment.is_production() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie).map_err(|e| AppError::Internal(format!("cookie header: {}", e)))
}

pub async fn login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<ApiResponse<LoginResult>, AppError> {
    let result = AuthService::login(&state, req).await?;
    Ok(ok_with_message(result, "登录成功"))
}

#[derive(Debug, Deserialize)]
pub struct PasswordLogin {
    pub mobile: Option<String>,
    pub password: Option<String>,
}

/// Password login that also sets the `auth_token` cookie.
pub async fn login_with_password(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<PasswordLogin>,
) -> Result<impl IntoResponse, AppError> {
    let mobile = body.mobile.unwrap_or_default();
    let password = body.password.unwrap_or_default();
    if mobile.trim().is_empty() || password.is_empty() {
        return Err(AppError::BadRequest("手机号和密码不能为空".into()));
    }
    let result = AuthService::login_with_password(&state, mobile.trim(), &password).await?;
    let cookie = session_cookie(&state, &result.token, state.tokens.ttl_secs())?;
    Ok(([(header::SET_COOKIE, cookie)], ok_with_message(result, "登录成功")))
}

pub async fn register(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> Result<ApiResponse<LoginResult>, AppError> {
    let result = AuthService::register(&state, req).await?;
    Ok(ok_with_message(result, "注册成功"))
}

/// Tokens are stateless; logging out only clears the cookie.
pub async fn logout(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let cookie = session_cookie(&state, "", 0)?;
    Ok(([(header::SET_COOKIE, cookie)], ok_empty("退出登录成功")))
}

#[derive(Debug, Deserialize)]
pub struct SendCode {
    pub mobile: Option<String>,
    #[serde(rename = "type")]
    pub purpose: Option<String>,
}

async fn send(state: &AppState, mobile: Option<String>, purpose: CodePurpose) -> Result<ApiResponse<Value>, AppError> {
    let mobile = mobile.map(|m| m.trim().to_string()).unwrap_or_default();
    if mobile.is_empty() {
        return Err(AppError::BadRequest("请输入手机号".into()));
    }
    let code = CodeService::send(state, &mobile, purpose).await?;
    let data = if state.config.environment.is_production() {
        None
    } else {
        Some(json!({ "code": code }))
    };
    Ok(Json(Envelope::success(data, "验证码发送成功")))
}

/// `type` defaults to `login`.
pub async fn send_verification_code(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<SendCode>,
) -> Result<ApiResponse<Value>, AppError> {
    let purpose = match body.purpose.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => raw.parse()?,
        None => CodePurpose::Login,
    };
    send(&state, body.mobile, purpose).await
}

pub async fn send_code(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<SendCode>,
) -> Result<ApiResponse<Value>, AppError> {
    let Some(raw) = body.purpose.as_deref().map(str::trim).filter(|s| !s.is_empty()) else {
        return Err(AppError::BadRequest("验证码类型不能为空".into()));
    };
    let purpose: CodePurpose = raw.parse()?;
    send(&state, body.mobile, purpose).await
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPassword {
    pub mobile: Option<String>,
    pub new_password: Option<String>,
    pub code: Option<String>,
}

pub async fn reset_password(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    ApiJson(body): ApiJson<ResetPassword>,
) -> Result<ApiResponse<()>, AppError> {
    let (Some(mobile), Some(password), Some(code)) = (body.mobile, body.new_password, body.code) else {
        return Err(AppError::BadRequest("手机号、新密码和验证码不能为空".into()));
    };
    AuthService::reset_password(&state, &claims, mobile.trim(), &password, code.trim()).await?;
    Ok(ok_empty("密码重置成功"))
}

pub async fn me(State(state): State<AppState>, AuthUser(claims): AuthUser) -> Result<ApiResponse<UserProfile>, AppError> {
    Ok(ok(AuthService::current_user(&state, &claims).await?))
}

pub async fn update_profile(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    ApiJson(patch): ApiJson<ProfilePatch>,
) -> Result<ApiResponse<UserProfile>, AppError> {
    let profile = AuthService::update_profile(&state, &claims, patch).await?;
    Ok(ok_with_message(profile, "个人资料更新成功"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePassword {
    pub old_password: Option<String>,
    pub new_password: Option<String>,
}

pub async fn change_password(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    ApiJson(body): ApiJson<ChangePassword>,
) -> Result<ApiResponse<()>, AppError> {
    let old = body.old_password.unwrap_or_default();
    let new = body.new_password.unwrap_or_default();
    AuthService::change_password(&state, &claims, &old, &new).await?;
    Ok(ok_empty("密码修改成功"))
}
