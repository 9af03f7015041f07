//! Utility modules for hcb-analyzer

pub mod file_names;

pub use file_names::{extension_for_content_type, file_extension};
