//! Workspace facade crate.
//!
//! Re-exports [`core_service`] and maps the workspace feature flags onto it,
//! so host applications depend on `wms-workspace` alone.
//!
//! - `desktop-shims` (default): fall back to `reqwest` and the OS keychain
//!   when the host injects no HTTP client or secure store.

pub use core_service::*;
