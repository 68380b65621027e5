//! certtrack-progress: certification progress engine
//!
//! Tracks learners through certifications. Lessons are recorded through
//! the idempotent [`writer`], percentages are derived on read by
//! [`aggregate`], certifications are finalized only through the [`gate`],
//! and [`reconcile`] compares local state with an external completion feed.

pub mod aggregate;
pub mod curriculum;
pub mod engine;
pub mod enrollment;
pub mod error;
pub mod gate;
pub mod idempotency;
pub mod model;
pub mod publisher;
pub mod reconcile;
pub mod store;
pub mod writer;

pub use engine::ProgressEngine;
pub use error::{Error, Result};
