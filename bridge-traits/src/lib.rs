//! # Host Bridge Traits
//!
//! Platform abstraction traits that must be implemented by each host platform.
//!
//! ## Overview
//!
//! This crate defines the contract between the warehouse client core and the
//! host that embeds it. Each trait represents a capability the core requires
//! but that is implemented differently per host (desktop, browser shell, tests).
//!
//! ## Traits
//!
//! ### Networking
//! - [`HttpClient`](http::HttpClient) - Async HTTP transport (REST/JSON)
//!
//! ### Security & Storage
//! - [`SecureStore`](storage::SecureStore) - Durable client-local credential storage
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for token expiry checks and deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type. Host
//! implementations should convert platform errors into it and keep transport
//! failures (`Network`, `Timeout`) distinct from local failures so the auth
//! layer can classify them.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds so a single instance can be
//! shared across async tasks behind an `Arc`.
//!
//! ## Examples
//!
//! ### Implementing HttpClient
//!
//! ```ignore
//! use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
//! use bridge_traits::error::Result;
//! use async_trait::async_trait;
//!
//! pub struct MyHttpClient {
//!     client: reqwest::Client,
//! }
//!
//! #[async_trait]
//! impl HttpClient for MyHttpClient {
//!     async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
//!         // Implementation
//!         todo!()
//!     }
//! }
//! ```

pub mod error;
pub mod http;
pub mod storage;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use storage::SecureStore;
pub use time::{Clock, FixedClock, LogEntry, LogLevel, LoggerSink, SystemClock};
