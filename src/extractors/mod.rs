pub mod auth;
pub mod json;

pub use auth::{bearer_token, AuthUser, AUTH_COOKIE};
pub use json::{ApiJson, ApiPath};
