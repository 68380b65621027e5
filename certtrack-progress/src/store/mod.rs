//! Progress persistence
//!
//! [`ProgressStore`] is the seam between the engine and its storage. The
//! SQLite implementation lives in [`sqlite`]; tests may supply their own.

pub mod sqlite;

pub use sqlite::SqliteProgressStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::idempotency::IdempotencyKey;
use crate::model::{
    CertificationProgress, CompletedLesson, Enrollment, EnrollmentStatus, LessonPointer,
    UdemyProgress,
};

/// Narrows a scan of in-progress records
#[derive(Debug, Clone, Default)]
pub struct ProgressFilter {
    pub user_id: Option<String>,
    pub certification_key: Option<String>,
}

impl ProgressFilter {
    pub fn for_user(user_id: &str) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
            certification_key: None,
        }
    }
}

/// A single lesson completion to append
#[derive(Debug, Clone)]
pub struct LessonCompletion {
    pub progress_id: Uuid,
    pub module_key: String,
    pub lesson: CompletedLesson,
}

/// Which guard recognized a repeated completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateReason {
    /// Key already present in the idempotency ledger
    IdempotencyKey,
    /// Ledger entry had expired; the lesson row itself already existed
    ExistingLesson,
}

#[derive(Debug, Clone)]
pub enum AppendOutcome {
    Applied(CertificationProgress),
    Duplicate {
        reason: DuplicateReason,
        progress: CertificationProgress,
    },
}

impl AppendOutcome {
    pub fn into_progress(self) -> CertificationProgress {
        match self {
            AppendOutcome::Applied(p) => p,
            AppendOutcome::Duplicate { progress, .. } => progress,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, AppendOutcome::Applied(_))
    }
}

#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Persist an enrollment and its progress trees in one transaction
    ///
    /// `replacing` names a prior enrollment (and its trees) to delete first.
    async fn create_enrollment(
        &self,
        enrollment: &Enrollment,
        trees: &[CertificationProgress],
        replacing: Option<Uuid>,
    ) -> Result<()>;

    async fn find_enrollment(&self, user_id: &str, certification_id: &str) -> Result<Option<Enrollment>>;

    async fn get_enrollment(&self, enrollment_id: Uuid) -> Result<Enrollment>;

    async fn set_enrollment_status(&self, enrollment_id: Uuid, status: EnrollmentStatus) -> Result<()>;

    /// Set the completion marker if none is set yet
    ///
    /// Returns true only for the caller that set it.
    async fn mark_enrollment_completed(
        &self,
        enrollment_id: Uuid,
        marker: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Full progress tree; fails with NotFound
    async fn get_progress(&self, progress_id: Uuid) -> Result<CertificationProgress>;

    async fn list_enrollment_progress(&self, enrollment_id: Uuid) -> Result<Vec<CertificationProgress>>;

    /// In-progress records ordered by user, certification, course
    async fn scan_in_progress(&self, filter: &ProgressFilter) -> Result<Vec<CertificationProgress>>;

    /// Append a completed lesson atomically with its module transitions
    async fn append_completed_lesson(
        &self,
        completion: &LessonCompletion,
        key: &IdempotencyKey,
    ) -> Result<AppendOutcome>;

    /// Remove the most recent completion of a module
    async fn remove_last_completed_lesson(
        &self,
        progress_id: Uuid,
        module_key: &str,
    ) -> Result<CompletedLesson>;

    /// Point the record at a lesson, starting its module and the record
    ///
    /// Only not-started statuses move. Fails with InvalidState once the
    /// record is completed.
    async fn set_current_lesson(
        &self,
        progress_id: Uuid,
        pointer: &LessonPointer,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Set the academic honesty timestamp if none is set yet
    ///
    /// Returns true only for the caller that set it.
    async fn accept_academic_honesty(&self, progress_id: Uuid, at: DateTime<Utc>) -> Result<bool>;

    /// Mark a record completed unless it already is
    ///
    /// Returns true only for the caller that made the transition.
    async fn finalize_progress(&self, progress_id: Uuid, at: DateTime<Utc>) -> Result<bool>;

    async fn get_udemy_progress(&self, id: Uuid) -> Result<UdemyProgress>;

    async fn save_udemy_progress(&self, progress: &UdemyProgress) -> Result<()>;
}
