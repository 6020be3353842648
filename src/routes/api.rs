//! `/api/v1` resource routes.

use crate::handlers::{auth, posts, sites, topics, upload, users};
use crate::state::AppState;
use axum::{
    routing::{get, post, put},
    Router,
};

pub fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/auth/login", post(auth::login))
        .route("/auth/loginWithPassword", post(auth::login_with_password))
        .route("/auth/register", post(auth::register))
        .route("/auth/logout", post(auth::logout).get(auth::logout))
        .route("/auth/sendVerificationCode", post(auth::send_verification_code))
        .route("/auth/send-code", post(auth::send_code))
        .route("/auth/resetPassword", post(auth::reset_password))
        .route("/auth/me", get(auth::me))
        .route("/auth/profile", put(auth::update_profile))
        .route("/auth/password", put(auth::change_password))
        .route("/users", get(users::list).post(users::create))
        .route("/users/:id", get(users::read).put(users::update).delete(users::delete))
        .route("/posts", get(posts::list).post(posts::create))
        .route("/posts/topics", get(topics::list))
        .route("/posts/:id", get(posts::read).put(posts::update).delete(posts::delete))
        .route("/posts/:id/comments", get(posts::list_comments).post(posts::create_comment))
        .route("/posts/:id/comments/:comment_id", axum::routing::delete(posts::delete_comment))
        .route("/topics", get(topics::list).post(topics::create))
        .route("/topics/:id", get(topics::read).put(topics::update).delete(topics::delete))
        .route("/topics/:id/posts", get(topics::posts))
        .route("/sites", get(sites::list).post(sites::create))
        .route("/sites/:id", get(sites::read))
        .route("/site", get(sites::list_for_user))
        .route("/site/switch", post(sites::switch))
        .route("/upload", post(upload::upload))
        .route("/upload/batch", post(upload::upload_batch))
        .with_state(state)
}
