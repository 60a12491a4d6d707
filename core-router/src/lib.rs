//! # Route Guards
//!
//! Navigation predicates over the current session state.
//!
//! Guards read the latest [`SessionState`](core_auth::SessionState) snapshot
//! from the [`SessionPublisher`](core_auth::SessionPublisher). They never
//! change state and never touch the network.
//!
//! ```text
//! require_auth   unauthenticated ──> /login?returnUrl=<target>
//! require_guest  authenticated   ──> landing route
//! ```

pub mod error;
pub mod guards;
pub mod route;

pub use error::{Result, RouteError};
pub use guards::{GuardDecision, RouteGuards, RETURN_URL_PARAM};
pub use route::Route;
