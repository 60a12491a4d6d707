//! # Authentication Module
//!
//! Client-side session handling for the warehouse backend.
//!
//! ## Overview
//!
//! ```text
//!              ┌──────────────────┐
//!   UI ───────>│   AuthGateway    │── login / refresh / logout ──> backend
//!              └────────┬─────────┘
//!                       │ commit (ticketed)
//!              ┌────────▼─────────┐      on_change / watch
//!              │ SessionPublisher ├─────────────────────────> guards, UI
//!              └────────┬─────────┘
//!                       │ save / load / clear
//!              ┌────────▼─────────┐
//!              │    TokenStore    │── SecureStore bridge
//!              └──────────────────┘
//!
//!   API clients ──> RequestAuthorizer (HttpClient) ──> transport
//! ```
//!
//! - [`TokenStore`]: durable persistence of the issued [`TokenPair`]
//! - [`SessionPublisher`]: observable [`SessionState`], the only writer of the store
//! - [`AuthGateway`]: network calls that drive session transitions
//! - [`RequestAuthorizer`]: attaches the bearer credential and handles `401`

pub mod authorizer;
pub mod claims;
pub mod error;
pub mod gateway;
pub mod session;
pub mod token_store;
pub mod types;

#[cfg(test)]
mod testing;

pub use authorizer::RequestAuthorizer;
pub use claims::AccessClaims;
pub use error::{AuthError, Result};
pub use gateway::AuthGateway;
pub use session::{ListenerHandle, SessionPublisher, SessionWatch, Ticket};
pub use token_store::TokenStore;
pub use types::{AuthStatus, Credentials, SessionState, TokenPair, UserInfo};
