//! Shared fixtures for unit tests.

use crate::claims::encode_test_token;
use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
use chrono::{DateTime, Duration, TimeZone, Utc};
use core_runtime::config::ApiConfig;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Mutex;

pub const BASE_URL: &str = "https://wms.test";

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
}

pub fn api() -> ApiConfig {
    ApiConfig::builder()
        .base_url(BASE_URL)
        .logout_path("/api/v1/auth/logout")
        .build()
        .unwrap()
}

pub fn access_token(username: &str, version: u32) -> String {
    encode_test_token(&json!({
        "sub": "1",
        "username": username,
        "roles": ["MANAGER"],
        "v": version
    }))
}

/// Login/refresh response body in the backend's shape.
pub fn token_body(access_token: &str, access_ttl: Duration) -> Value {
    json!({
        "access_token": access_token,
        "refresh_token": format!("refresh-for-{}", access_token.len()),
        "expire_access_token": (now() + access_ttl).timestamp(),
        "expire_refresh_token": (now() + Duration::days(7)).to_rfc3339(),
        "ip": "127.0.0.1"
    })
}

pub fn json_response(status: u16, body: Value) -> HttpResponse {
    HttpResponse::new(status, body.to_string())
}

/// Replays queued replies in order and records every request.
#[derive(Default)]
pub struct ScriptedHttpClient {
    replies: Mutex<VecDeque<BridgeResult<HttpResponse>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(&self, response: HttpResponse) -> &Self {
        self.replies.lock().unwrap().push_back(Ok(response));
        self
    }

    pub fn fail(&self, error: BridgeError) -> &Self {
        self.replies.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl HttpClient for ScriptedHttpClient {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        self.requests.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(BridgeError::NotAvailable(format!("no reply for {}", request.url))))
    }
}
