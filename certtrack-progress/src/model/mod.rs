//! Progress hierarchy model
//!
//! Enrollment → CertificationProgress → ModuleProgress → CompletedLesson.
//! Each level owns the next; the whole tree is created together when a
//! learner starts a certification.

mod builder;
mod resource;

pub use builder::{build_certification_tree, build_progress_tree};
pub use resource::{ResourceKind, ResourceProgress, ResourceRef, UdemyProgress};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Lifecycle state shared by module and certification progress
///
/// Only ever advances: not-started → in-progress → completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProgressStatus {
    NotStarted,
    InProgress,
    Completed,
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::NotStarted => "not-started",
            ProgressStatus::InProgress => "in-progress",
            ProgressStatus::Completed => "completed",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self> {
        match s {
            "not-started" => Ok(ProgressStatus::NotStarted),
            "in-progress" => Ok(ProgressStatus::InProgress),
            "completed" => Ok(ProgressStatus::Completed),
            other => Err(Error::Internal(format!("Unknown progress status: {}", other))),
        }
    }
}

impl std::fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Enrollment state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrollmentStatus {
    Enrolled,
    Disenrolled,
    Completed,
}

impl EnrollmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentStatus::Enrolled => "enrolled",
            EnrollmentStatus::Disenrolled => "disenrolled",
            EnrollmentStatus::Completed => "completed",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self> {
        match s {
            "enrolled" => Ok(EnrollmentStatus::Enrolled),
            "disenrolled" => Ok(EnrollmentStatus::Disenrolled),
            "completed" => Ok(EnrollmentStatus::Completed),
            other => Err(Error::Internal(format!("Unknown enrollment status: {}", other))),
        }
    }
}

/// Learner ↔ certification binding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: Uuid,
    pub user_id: String,
    pub certification_id: String,
    pub status: EnrollmentStatus,
    /// Set exactly once when the certification is earned; globally unique
    pub completion_marker: Option<Uuid>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Enrollment {
    pub fn new(user_id: &str, certification_id: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            certification_id: certification_id.to_string(),
            status: EnrollmentStatus::Enrolled,
            completion_marker: None,
            completed_at: None,
            created_at,
        }
    }
}

/// Module/lesson composite key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LessonPointer {
    pub module_key: String,
    pub lesson_id: String,
}

impl LessonPointer {
    pub fn new(module_key: &str, lesson_id: &str) -> Self {
        Self {
            module_key: module_key.to_string(),
            lesson_id: lesson_id.to_string(),
        }
    }
}

/// Append-only fact that a lesson was finished
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedLesson {
    pub lesson_id: String,
    pub dashed_name: String,
    pub completed_date: DateTime<Utc>,
}

/// Progress within one curriculum module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleProgress {
    pub id: Uuid,
    pub module_key: String,
    pub status: ProgressStatus,
    /// Cached from the course definition when the tree was built
    pub lesson_count: u32,
    pub is_assessment: bool,
    pub start_date: Option<DateTime<Utc>>,
    pub completed_date: Option<DateTime<Utc>>,
    pub completed_lessons: Vec<CompletedLesson>,
}

impl ModuleProgress {
    pub fn completed_lesson_count(&self) -> u32 {
        self.completed_lessons.len() as u32
    }

    pub fn has_completed(&self, lesson_id: &str) -> bool {
        self.completed_lessons.iter().any(|l| l.lesson_id == lesson_id)
    }

    /// Most recently completed lesson; later insertion wins ties
    pub fn last_completed(&self) -> Option<&CompletedLesson> {
        self.completed_lessons
            .iter()
            .enumerate()
            .max_by_key(|(idx, l)| (l.completed_date, *idx))
            .map(|(_, l)| l)
    }
}

/// Per-learner progress through one course of a certification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificationProgress {
    pub id: Uuid,
    pub enrollment_id: Uuid,
    pub user_id: String,
    pub certification_key: String,
    pub course_key: String,
    pub status: ProgressStatus,
    pub start_date: Option<DateTime<Utc>>,
    pub completed_date: Option<DateTime<Utc>>,
    pub current_lesson: Option<LessonPointer>,
    pub academic_honesty_accepted_at: Option<DateTime<Utc>>,
    pub modules: Vec<ModuleProgress>,
}

impl CertificationProgress {
    pub fn module(&self, module_key: &str) -> Option<&ModuleProgress> {
        self.modules.iter().find(|m| m.module_key == module_key)
    }

    pub fn module_mut(&mut self, module_key: &str) -> Option<&mut ModuleProgress> {
        self.modules.iter_mut().find(|m| m.module_key == module_key)
    }

    /// Look up a module or fail with NotFound
    pub fn require_module(&self, module_key: &str) -> Result<&ModuleProgress> {
        self.module(module_key).ok_or_else(|| {
            Error::NotFound(format!("module {} in progress {}", module_key, self.id))
        })
    }

    pub fn assessment_modules(&self) -> impl Iterator<Item = &ModuleProgress> {
        self.modules.iter().filter(|m| m.is_assessment)
    }
}
