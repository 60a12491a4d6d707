//! # Warehouse API
//!
//! Typed access to the warehouse endpoints of the backend.
//!
//! Every response uses the same envelope:
//!
//! ```json
//! {
//!   "success": true,
//!   "error_code": null,
//!   "message": null,
//!   "data": { "...": "..." },
//!   "field_errors": [],
//!   "timestamp": "2024-06-01T09:00:00Z"
//! }
//! ```
//!
//! [`WarehouseClient`] sends its requests through whatever [`HttpClient`]
//! it is given. In the application that is the request authorizer from
//! `core-auth`, so credentials and `401` handling stay out of this crate.
//! Failures are classified into [`ApiError`] and reported to the user as a
//! [`Notification`](core_runtime::events::Notification).
//!
//! [`HttpClient`]: bridge_traits::http::HttpClient

pub mod client;
pub mod error;
pub mod types;

pub use client::WarehouseClient;
pub use error::{ApiError, Result};
pub use types::{ApiEnvelope, FieldError, Page, Warehouse, WarehouseQuery};
