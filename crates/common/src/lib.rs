//! Common utilities and types shared across the call engine crates.

#![warn(clippy::pedantic)]

/// Module for shared call identifiers and enums
pub mod types;

/// Module for secret types that prevent accidental logging
pub mod secret;
