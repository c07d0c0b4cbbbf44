//! Shared domain types for the Pi control plane.
//!
//! Everything here is dependency-light and usable by every other crate:
//! the workspace error type, the circuit breaker, configuration structs,
//! provider-agnostic message types, and structured trace events.

pub mod breaker;
pub mod config;
pub mod error;
pub mod message;
pub mod stream;
pub mod trace;

pub use error::{Error, Result};
