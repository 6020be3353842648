//! Domain services over the data client.

pub mod auth;
pub mod codes;
pub mod comments;
pub mod pagination;
pub mod password;
pub mod posts;
pub mod sites;
pub mod sms;
pub mod token;
pub mod topics;
pub mod upload;
pub mod users;
pub mod validation;

pub use auth::AuthService;
pub use codes::{CodePurpose, CodeService, CodeStore, MemoryCodeStore};
pub use comments::CommentService;
pub use pagination::{PageData, PageParams, SortParams};
pub use posts::PostService;
pub use sites::SiteService;
pub use sms::{LogSmsSender, RecordingSmsSender, SmsSender};
pub use token::{Claims, TokenIssuer};
pub use topics::TopicService;
pub use upload::UploadService;
pub use users::UserService;
pub use validation::RequestValidator;

use crate::error::AppError;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Decode a data client row into a typed shape.
pub(crate) fn decode_row<T: DeserializeOwned>(row: Value) -> Result<T, AppError> {
    serde_json::from_value(row).map_err(|e| AppError::Internal(format!("decode row: {}", e)))
}
