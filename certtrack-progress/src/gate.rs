//! Completion gate
//!
//! State machine shared by modules and certification progress:
//!
//! ```text
//! not-started ──first lesson / current lesson──▶ in-progress ──all lessons──▶ completed   (module)
//! not-started ──certification start──────────▶ in-progress ──gate request──▶ completed   (certification)
//! ```
//!
//! Statuses never move backwards. A certification progress record is
//! completed only through [`CompletionGate::complete_certification`], which
//! refuses while any assessment module is unfinished.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use certtrack_common::events::{CompletionEvent, CompletionKind};

use crate::aggregate::{decorate, ProgressView};
use crate::curriculum::CurriculumLookup;
use crate::error::{Error, Result};
use crate::model::{CertificationProgress, Enrollment, ModuleProgress, ProgressStatus};
use crate::publisher::CompletionPublisher;
use crate::store::ProgressStore;

/// not-started → in-progress; sets the start date if unset
///
/// Returns true when the status changed.
pub fn start_module(module: &mut ModuleProgress, at: DateTime<Utc>) -> bool {
    if module.start_date.is_none() {
        module.start_date = Some(at);
    }
    if module.status == ProgressStatus::NotStarted {
        module.status = ProgressStatus::InProgress;
        return true;
    }
    false
}

/// Apply the module transitions that follow a recorded lesson
///
/// `completed_count` is the module's lesson count after the write. The
/// module completes once every lesson is recorded.
pub fn advance_after_completion(module: &mut ModuleProgress, completed_count: u32, at: DateTime<Utc>) {
    start_module(module, at);
    if module.status == ProgressStatus::InProgress
        && module.lesson_count > 0
        && completed_count >= module.lesson_count
    {
        module.status = ProgressStatus::Completed;
        module.completed_date = Some(at);
    }
}

/// Assessment modules that are not yet completed, in course order
pub fn unmet_assessment_modules(progress: &CertificationProgress) -> Vec<String> {
    progress
        .assessment_modules()
        .filter(|m| m.status != ProgressStatus::Completed)
        .map(|m| m.module_key.clone())
        .collect()
}

pub fn all_assessment_modules_completed(progress: &CertificationProgress) -> bool {
    progress
        .assessment_modules()
        .all(|m| m.status == ProgressStatus::Completed)
}

/// Check the gate and mark the record completed in memory
pub fn finalize(progress: &mut CertificationProgress, at: DateTime<Utc>) -> Result<()> {
    match progress.status {
        ProgressStatus::Completed => return Ok(()),
        ProgressStatus::NotStarted => {
            return Err(Error::InvalidState(format!(
                "progress {} has not been started",
                progress.id
            )))
        }
        ProgressStatus::InProgress => {}
    }

    if !all_assessment_modules_completed(progress) {
        return Err(Error::BusinessRule {
            message: format!(
                "certification {} cannot be completed before all assessment modules",
                progress.certification_key
            ),
            unmet_modules: unmet_assessment_modules(progress),
        });
    }

    progress.status = ProgressStatus::Completed;
    progress.completed_date = Some(at);
    Ok(())
}

/// Result of a certification completion request
#[derive(Debug, Clone, Serialize)]
pub struct CertificationCompletion {
    pub progress: ProgressView,
    /// False when the record was already completed before this request
    pub newly_completed: bool,
    /// Completion marker, when this request also completed the enrollment
    pub enrollment_completion_marker: Option<Uuid>,
}

/// Enforces the completion rule and emits completion events
pub struct CompletionGate {
    store: Arc<dyn ProgressStore>,
    curriculum: Arc<dyn CurriculumLookup>,
    publisher: Arc<dyn CompletionPublisher>,
}

impl CompletionGate {
    pub fn new(
        store: Arc<dyn ProgressStore>,
        curriculum: Arc<dyn CurriculumLookup>,
        publisher: Arc<dyn CompletionPublisher>,
    ) -> Self {
        Self {
            store,
            curriculum,
            publisher,
        }
    }

    /// Complete a certification progress record
    ///
    /// Fails with [`Error::BusinessRule`] naming the unfinished assessment
    /// modules; nothing is written in that case. A repeated request on a
    /// completed record returns the current state without new events.
    pub async fn complete_certification(&self, progress_id: Uuid) -> Result<CertificationCompletion> {
        let mut progress = self.store.get_progress(progress_id).await?;

        if progress.status == ProgressStatus::Completed {
            info!(progress_id = %progress_id, "Certification progress already completed");
            return Ok(CertificationCompletion {
                progress: decorate(progress),
                newly_completed: false,
                enrollment_completion_marker: None,
            });
        }

        let now = Utc::now();
        if let Err(e) = finalize(&mut progress, now) {
            if let Some(unmet) = e.unmet_modules() {
                warn!(
                    progress_id = %progress_id,
                    unmet = ?unmet,
                    "Certification completion refused: assessment modules incomplete"
                );
            }
            return Err(e);
        }

        // Conditional write: only one concurrent request performs the transition
        let transitioned = self.store.finalize_progress(progress_id, now).await?;
        let progress = self.store.get_progress(progress_id).await?;
        if !transitioned {
            return Ok(CertificationCompletion {
                progress: decorate(progress),
                newly_completed: false,
                enrollment_completion_marker: None,
            });
        }

        info!(
            progress_id = %progress_id,
            user_id = %progress.user_id,
            course = %progress.course_key,
            "Certification progress completed"
        );

        let course_skills = match self
            .curriculum
            .course(&progress.certification_key, &progress.course_key)
            .await
        {
            Ok(Some(course)) => course.skills,
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(progress_id = %progress_id, error = %e, "Course skill lookup failed");
                Vec::new()
            }
        };
        self.publish(CompletionEvent::new(
            progress.id,
            CompletionKind::Course,
            &progress.user_id,
            &course_skills,
        ))
        .await;

        let marker = self.complete_enrollment_if_done(progress.enrollment_id, now).await?;

        Ok(CertificationCompletion {
            progress: decorate(progress),
            newly_completed: true,
            enrollment_completion_marker: marker,
        })
    }

    /// Mark the enrollment completed once every course progress is completed
    async fn complete_enrollment_if_done(
        &self,
        enrollment_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<Uuid>> {
        let records = self.store.list_enrollment_progress(enrollment_id).await?;
        if records.is_empty() || records.iter().any(|p| p.status != ProgressStatus::Completed) {
            return Ok(None);
        }

        let marker = Uuid::new_v4();
        if !self.store.mark_enrollment_completed(enrollment_id, marker, at).await? {
            // Another request already set the marker
            return Ok(None);
        }

        let enrollment: Enrollment = self.store.get_enrollment(enrollment_id).await?;
        info!(
            enrollment_id = %enrollment_id,
            user_id = %enrollment.user_id,
            certification = %enrollment.certification_id,
            marker = %marker,
            "Enrollment completed"
        );

        let skills = match self.curriculum.certification(&enrollment.certification_id).await {
            Ok(Some(cert)) => cert.skills,
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(enrollment_id = %enrollment_id, error = %e, "Certification skill lookup failed");
                Vec::new()
            }
        };
        self.publish(CompletionEvent::new(
            marker,
            CompletionKind::Certification,
            &enrollment.user_id,
            &skills,
        ))
        .await;

        Ok(Some(marker))
    }

    /// Fire-and-forget: failures are logged and never undo the completion
    async fn publish(&self, event: CompletionEvent) {
        let id = event.id;
        let kind = event.kind;
        if let Err(e) = self.publisher.publish(event).await {
            warn!(event_id = %id, kind = ?kind, error = %e, "Failed to publish completion event");
        }
    }
}
