//! Core module - shared infrastructure for quillmind
//!
//! This module contains foundational types, settings, and error handling
//! used throughout the crate.

pub mod config;
pub mod error;
pub mod types;

pub use config::{Settings, SettingsOverrides, SettingsStore};
pub use error::{QuillError, Result};
pub use types::*;
