#![allow(dead_code)]

use axum::body::{to_bytes, Body};
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::Router;
use campus_portal::client::{DataClient, Filter, MemoryClient, Schema, Update};
use campus_portal::service::password::hash_password;
use campus_portal::service::sms::RecordingSmsSender;
use campus_portal::service::users::UserService;
use campus_portal::service::MemoryCodeStore;
use campus_portal::storage::MemoryStorage;
use campus_portal::{app, AppConfig, AppState};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tower::ServiceExt;

pub struct TestApp {
    pub state: AppState,
    pub router: Router,
    pub sms: Arc<RecordingSmsSender>,
    pub storage: Arc<MemoryStorage>,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub set_cookie: Option<String>,
    pub body: Value,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(AppConfig::for_tests())
    }

    pub fn with_config(config: AppConfig) -> Self {
        let sms = Arc::new(RecordingSmsSender::new());
        let storage = Arc::new(MemoryStorage::new());
        let state = AppState::new(
            config,
            Arc::new(MemoryClient::new(Schema::campus())),
            Arc::new(MemoryCodeStore::new()),
            sms.clone(),
            storage.clone(),
        );
        TestApp {
            router: app(state.clone()),
            state,
            sms,
            storage,
        }
    }

    pub async fn send(&self, req: Request<Body>) -> TestResponse {
        let res = self.router.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let set_cookie = res
            .headers()
            .get(header::SET_COOKIE)
            .map(|v| v.to_str().unwrap().to_string());
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        TestResponse { status, set_cookie, body }
    }

    /// Status, headers and body bytes, for responses that are not JSON.
    pub async fn raw(&self, req: Request<Body>) -> (StatusCode, HeaderMap, Vec<u8>) {
        let res = self.router.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let headers = res.headers().clone();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, headers, bytes.to_vec())
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> TestResponse {
        let mut req = Request::builder().method(Method::GET).uri(uri);
        if let Some(t) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {}", t));
        }
        self.send(req.body(Body::empty()).unwrap()).await
    }

    pub async fn json(&self, method: Method, uri: &str, token: Option<&str>, body: Value) -> TestResponse {
        let mut req = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(t) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {}", t));
        }
        self.send(req.body(Body::from(body.to_string())).unwrap()).await
    }

    pub async fn multipart(&self, uri: &str, token: Option<&str>, form: Multipart) -> TestResponse {
        let (content_type, body) = form.finish();
        let mut req = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, content_type);
        if let Some(t) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {}", t));
        }
        self.send(req.body(Body::from(body)).unwrap()).await
    }

    /// A user with a password; returns its id.
    pub async fn seed_user(&self, mobile: &str, password: &str, role: &str) -> i64 {
        let hash = hash_password(password, 4).await.unwrap();
        let user = UserService::insert(&self.state, mobile, Some(hash), "测试用户", None)
            .await
            .unwrap();
        if role != "user" {
            let mut set = Map::new();
            set.insert("role".into(), json!(role));
            self.state
                .client
                .update(&Update::new("users", Filter::id(user.id), set))
                .await
                .unwrap();
        }
        user.id
    }

    pub async fn seed_site(&self, name: &str) -> i64 {
        let mut obj = Map::new();
        obj.insert("name".into(), json!(name));
        let res = self
            .state
            .client
            .insert(&campus_portal::client::Insert::one("sites", obj))
            .await
            .unwrap();
        res.returning[0]["id"].as_i64().unwrap()
    }

    pub async fn login(&self, mobile: &str, password: &str) -> String {
        let res = self
            .json(
                Method::POST,
                "/api/v1/auth/login",
                None,
                json!({"mobile": mobile, "password": password, "loginType": "password"}),
            )
            .await;
        assert_eq!(res.status, StatusCode::OK, "{}", res.body);
        res.body["data"]["token"].as_str().unwrap().to_string()
    }

    pub async fn count(&self, table: &str, filter: Option<Filter>) -> u64 {
        self.state.client.count(table, filter.as_ref()).await.unwrap()
    }
}

/// Hand-built multipart/form-data body.
pub struct Multipart {
    boundary: String,
    body: Vec<u8>,
}

impl Multipart {
    pub fn new() -> Self {
        Multipart {
            boundary: "campus-test-boundary".into(),
            body: Vec::new(),
        }
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                self.boundary, name, value
            )
            .as_bytes(),
        );
        self
    }

    pub fn file(mut self, name: &str, file_name: &str, content_type: &str, bytes: &[u8]) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                self.boundary, name, file_name, content_type
            )
            .as_bytes(),
        );
        self.body.extend_from_slice(bytes);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    pub fn finish(mut self) -> (String, Vec<u8>) {
        self.body
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        (format!("multipart/form-data; boundary={}", self.boundary), self.body)
    }
}
