//! # HyperCuebe Common Library
//!
//! Shared code for HyperCuebe services including:
//! - Common error type
//! - Root folder and TOML configuration resolution
//! - Logging initialisation

pub mod config;
pub mod error;
pub mod logging;

pub use error::{Error, Result};
