//! # CertTrack Common Library
//!
//! Shared code for the CertTrack progress services including:
//! - Error types
//! - Configuration loading
//! - Database initialization and schema
//! - Completion event types and the in-process EventBus
//! - Utility functions

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod time;
pub mod uuid_utils;

pub use error::{Error, Result};
