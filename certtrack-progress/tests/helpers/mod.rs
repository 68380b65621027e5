//! Test Helper Utilities
//!
//! Shared fixtures and test doubles for certtrack-progress integration tests

#![allow(dead_code)]

pub mod doubles;
pub mod fixtures;

pub use doubles::{ConcurrentWrite, FailingPublisher, RecordingPublisher, ScriptedStore};
pub use fixtures::{sample_curriculum, TestEngine, CERT_KEY, CORE_COURSE, EXTRA_COURSE};
