//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the warehouse client core:
//! - Logging and tracing infrastructure
//! - Structured API endpoint configuration, validated at startup
//! - Event bus for auth events and user-visible notifications
//!
//! ## Overview
//!
//! This crate contains the runtime utilities that the domain crates depend on.
//! It establishes the logging conventions, the configuration surface, and the
//! broadcast mechanism the rest of the system uses to report to the UI.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
