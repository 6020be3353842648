mod common;

use axum::http::{Method, StatusCode};
use campus_portal::client::Filter;
use campus_portal::{AppConfig, Environment};
use common::TestApp;
use serde_json::json;

#[tokio::test]
async fn password_login_token_carries_the_mobile() {
    let app = TestApp::new();
    app.seed_user("13800138000", "secret1", "user").await;
    let token = app.login("13800138000", "secret1").await;
    let claims = app.state.tokens.verify(&token).unwrap();
    assert_eq!(claims.mobile, "13800138000");
    assert_eq!(claims.role, "user");

    let me = app.get("/api/v1/auth/me", Some(&token)).await;
    assert_eq!(me.status, StatusCode::OK);
    assert_eq!(me.body["data"]["mobile"], "13800138000");
    assert!(me.body["data"].get("password").is_none());
}

#[tokio::test]
async fn login_with_password_sets_an_http_only_cookie() {
    let app = TestApp::new();
    app.seed_user("13800138000", "secret1", "user").await;
    let res = app
        .json(
            Method::POST,
            "/api/v1/auth/loginWithPassword",
            None,
            json!({"mobile": "13800138000", "password": "secret1"}),
        )
        .await;
    assert_eq!(res.status, StatusCode::OK);
    let cookie = res.set_cookie.unwrap();
    assert!(cookie.starts_with("auth_token="));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("Max-Age=604800"));
    assert!(!cookie.contains("Secure"));

    let logout = app.json(Method::POST, "/api/v1/auth/logout", None, json!({})).await;
    assert!(logout.set_cookie.unwrap().contains("Max-Age=0"));
}

#[tokio::test]
async fn wrong_password_is_an_envelope_error() {
    let app = TestApp::new();
    app.seed_user("13800138000", "secret1", "user").await;
    let res = app
        .json(
            Method::POST,
            "/api/v1/auth/login",
            None,
            json!({"mobile": "13800138000", "password": "nope123"}),
        )
        .await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(res.body["success"], false);
    assert_eq!(res.body["code"], 3001);
    assert_eq!(res.body["message"], "手机号或密码错误");
    assert!(res.body["timestamp"].is_i64());
}

#[tokio::test]
async fn code_login_works_once() {
    let app = TestApp::new();
    let sent = app
        .json(
            Method::POST,
            "/api/v1/auth/sendVerificationCode",
            None,
            json!({"mobile": "13800138000", "type": "login"}),
        )
        .await;
    assert_eq!(sent.status, StatusCode::OK);
    let code = sent.body["data"]["code"].as_str().unwrap().to_string();
    assert!(app.sms.messages()[0].content.contains(&code));

    let body = json!({"mobile": "13800138000", "code": code, "loginType": "code"});
    let first = app.json(Method::POST, "/api/v1/auth/login", None, body.clone()).await;
    assert_eq!(first.status, StatusCode::OK);
    assert!(first.body["data"]["token"].is_string());
    assert_eq!(first.body["data"]["user"]["isNewUser"], true);

    let again = app.json(Method::POST, "/api/v1/auth/login", None, body).await;
    assert_eq!(again.status, StatusCode::BAD_REQUEST);
    assert_eq!(again.body["code"], 3005);
}

#[tokio::test]
async fn wrong_code_changes_nothing() {
    let app = TestApp::new();
    let sent = app
        .json(
            Method::POST,
            "/api/v1/auth/send-code",
            None,
            json!({"mobile": "13800138000", "type": "login"}),
        )
        .await;
    let code = sent.body["data"]["code"].as_str().unwrap().to_string();
    let wrong = if code == "999999" { "000000" } else { "999999" };

    let res = app
        .json(
            Method::POST,
            "/api/v1/auth/login",
            None,
            json!({"mobile": "13800138000", "code": wrong, "loginType": "code"}),
        )
        .await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(app.count("users", Some(Filter::eq("mobile", "13800138000"))).await, 0);

    let ok = app
        .json(
            Method::POST,
            "/api/v1/auth/login",
            None,
            json!({"mobile": "13800138000", "code": code, "loginType": "code"}),
        )
        .await;
    assert_eq!(ok.status, StatusCode::OK);
}

#[tokio::test]
async fn production_does_not_echo_codes() {
    let config = AppConfig {
        environment: Environment::Production,
        jwt_secret: "a-real-secret".into(),
        ..AppConfig::for_tests()
    };
    let app = TestApp::with_config(config);
    let res = app
        .json(
            Method::POST,
            "/api/v1/auth/sendVerificationCode",
            None,
            json!({"mobile": "13800138000"}),
        )
        .await;
    assert_eq!(res.status, StatusCode::OK);
    assert!(res.body.get("data").is_none());
    assert_eq!(app.sms.messages().len(), 1);
}

#[tokio::test]
async fn send_code_validates_input() {
    let app = TestApp::new();
    let bad_mobile = app
        .json(Method::POST, "/api/v1/auth/send-code", None, json!({"mobile": "123", "type": "login"}))
        .await;
    assert_eq!(bad_mobile.body["code"], 1001);
    let no_type = app
        .json(Method::POST, "/api/v1/auth/send-code", None, json!({"mobile": "13800138000"}))
        .await;
    assert_eq!(no_type.status, StatusCode::BAD_REQUEST);
    assert!(app.sms.messages().is_empty());
}

async fn register_code(app: &TestApp, mobile: &str) -> String {
    let res = app
        .json(
            Method::POST,
            "/api/v1/auth/send-code",
            None,
            json!({"mobile": mobile, "type": "register"}),
        )
        .await;
    res.body["data"]["code"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn register_then_duplicate() {
    let app = TestApp::new();
    let site = app.seed_site("主站").await;
    let code = register_code(&app, "13800138000").await;
    let res = app
        .json(
            Method::POST,
            "/api/v1/auth/register",
            None,
            json!({"mobile": "13800138000", "password": "secret1", "code": code}),
        )
        .await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    assert_eq!(res.body["data"]["user"]["nickname"], "用户8000");
    assert_eq!(res.body["data"]["user"]["current_site"]["id"], site);

    let code = register_code(&app, "13800138000").await;
    let dup = app
        .json(
            Method::POST,
            "/api/v1/auth/register",
            None,
            json!({"mobile": "13800138000", "password": "secret1", "code": code}),
        )
        .await;
    assert_eq!(dup.status, StatusCode::CONFLICT);
    assert_eq!(dup.body["code"], 3004);
}

#[tokio::test]
async fn reset_password_requires_auth() {
    let app = TestApp::new();
    app.seed_user("13800138000", "secret1", "user").await;
    let anon = app
        .json(
            Method::POST,
            "/api/v1/auth/resetPassword",
            None,
            json!({"mobile": "13800138000", "newPassword": "newpass1", "code": "123456"}),
        )
        .await;
    assert_eq!(anon.status, StatusCode::UNAUTHORIZED);
    assert_eq!(anon.body["code"], 2000);

    let token = app.login("13800138000", "secret1").await;
    let sent = app
        .json(
            Method::POST,
            "/api/v1/auth/send-code",
            None,
            json!({"mobile": "13800138000", "type": "reset_password"}),
        )
        .await;
    let code = sent.body["data"]["code"].as_str().unwrap().to_string();
    let res = app
        .json(
            Method::POST,
            "/api/v1/auth/resetPassword",
            Some(&token),
            json!({"mobile": "13800138000", "newPassword": "newpass1", "code": code}),
        )
        .await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    app.login("13800138000", "newpass1").await;
}

#[tokio::test]
async fn profile_and_password_self_service() {
    let app = TestApp::new();
    app.seed_user("13800138000", "secret1", "user").await;
    let token = app.login("13800138000", "secret1").await;

    let res = app
        .json(Method::PUT, "/api/v1/auth/profile", Some(&token), json!({"nickname": "小明", "bio": "hi"}))
        .await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["data"]["nickname"], "小明");

    let wrong = app
        .json(
            Method::PUT,
            "/api/v1/auth/password",
            Some(&token),
            json!({"oldPassword": "bad1234", "newPassword": "newpass1"}),
        )
        .await;
    assert_eq!(wrong.body["message"], "原密码错误");
    let ok = app
        .json(
            Method::PUT,
            "/api/v1/auth/password",
            Some(&token),
            json!({"oldPassword": "secret1", "newPassword": "newpass1"}),
        )
        .await;
    assert_eq!(ok.status, StatusCode::OK);
}

#[tokio::test]
async fn malformed_tokens_and_bodies_stay_in_the_envelope() {
    let app = TestApp::new();
    let res = app.get("/api/v1/auth/me", Some("not-a-jwt")).await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(res.body["code"], 2003);

    let req = axum::http::Request::builder()
        .method(Method::POST)
        .uri("/api/v1/auth/login")
        .header("content-type", "application/json")
        .body(axum::body::Body::from("{not json"))
        .unwrap();
    let res = app.send(req).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.body["code"], 1001);
    assert_eq!(res.body["success"], false);
}
