//! Test harness: an in-memory backend transport and a fully wired session.

#![allow(dead_code)]

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use bridge_desktop::MemorySecureStore;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
use bridge_traits::FixedClock;
use chrono::{DateTime, Duration, TimeZone, Utc};
use core_auth::{AuthGateway, RequestAuthorizer, SessionPublisher, TokenPair, TokenStore};
use core_runtime::config::ApiConfig;
use core_runtime::events::EventBus;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
}

pub fn jwt(payload: Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{}.{}.sig", header, body)
}

pub fn access_token_for(username: &str, generation: u32) -> String {
    jwt(json!({
        "sub": format!("user-{}", username),
        "username": username,
        "email": format!("{}@example.com", username),
        "roles": ["STAFF"],
        "gen": generation
    }))
}

pub fn token_response(access_token: &str) -> HttpResponse {
    let body = json!({
        "access_token": access_token,
        "refresh_token": format!("rt-{}", &access_token[access_token.len() - 8..]),
        "expire_access_token": (now() + Duration::minutes(15)).timestamp(),
        "expire_refresh_token": (now() + Duration::days(7)).timestamp(),
        "ip": "10.0.0.1"
    });
    HttpResponse::new(200, body.to_string())
}

pub fn stored_pair(username: &str, access_ttl: Duration) -> TokenPair {
    TokenPair::new(
        access_token_for(username, 0),
        "stored-refresh-token",
        now() + access_ttl,
        now() + Duration::days(7),
    )
    .unwrap()
}

/// Backend stand-in that answers from a queue and records what it saw.
#[derive(Default)]
pub struct FakeBackend {
    replies: Mutex<VecDeque<BridgeResult<HttpResponse>>>,
    seen: Mutex<Vec<HttpRequest>>,
}

impl FakeBackend {
    pub fn then(&self, response: HttpResponse) -> &Self {
        self.replies.lock().unwrap().push_back(Ok(response));
        self
    }

    pub fn then_fail(&self, error: BridgeError) -> &Self {
        self.replies.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn seen(&self) -> Vec<HttpRequest> {
        self.seen.lock().unwrap().clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.seen()
            .iter()
            .map(|request| request.url.trim_start_matches("https://wms.test").to_string())
            .collect()
    }
}

#[async_trait]
impl HttpClient for FakeBackend {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        self.seen.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(BridgeError::Network(format!("unexpected call to {}", request.url))))
    }
}

pub struct Session {
    pub backend: Arc<FakeBackend>,
    pub secure_store: MemorySecureStore,
    pub store: TokenStore,
    pub publisher: SessionPublisher,
    pub gateway: Arc<AuthGateway>,
    pub authorizer: RequestAuthorizer,
    pub events: EventBus,
}

pub fn api() -> ApiConfig {
    ApiConfig::builder().base_url("https://wms.test").build().unwrap()
}

/// Wire every component the way the application root does.
pub async fn session(stored: Option<TokenPair>) -> Session {
    let secure_store = MemorySecureStore::new();
    let store = TokenStore::new(Arc::new(secure_store.clone()));
    if let Some(pair) = stored {
        store.save(&pair).await.unwrap();
    }

    let publisher = SessionPublisher::restore(store.clone(), Arc::new(FixedClock::new(now()))).await;
    let backend = Arc::new(FakeBackend::default());
    let events = EventBus::new(64);
    let gateway = Arc::new(AuthGateway::new(
        backend.clone(),
        api(),
        publisher.clone(),
        events.clone(),
    ));
    let authorizer = RequestAuthorizer::new(backend.clone(), gateway.clone(), api());

    Session {
        backend,
        secure_store,
        store,
        publisher,
        gateway,
        authorizer,
        events,
    }
}
