//! Enrollment operations
//!
//! Starting a certification creates the enrollment and every course's
//! progress tree in one write.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::aggregate::{decorate, ProgressView};
use crate::curriculum::CurriculumLookup;
use crate::error::{Error, Result};
use crate::model::{
    build_certification_tree, Enrollment, EnrollmentStatus, LessonPointer, ProgressStatus,
};
use crate::store::ProgressStore;

/// Enrollment together with its decorated progress trees
#[derive(Debug, Clone, Serialize)]
pub struct EnrollmentView {
    pub enrollment: Enrollment,
    pub progress: Vec<ProgressView>,
}

pub struct EnrollmentService {
    store: Arc<dyn ProgressStore>,
    curriculum: Arc<dyn CurriculumLookup>,
}

impl EnrollmentService {
    pub fn new(store: Arc<dyn ProgressStore>, curriculum: Arc<dyn CurriculumLookup>) -> Self {
        Self { store, curriculum }
    }

    /// Enroll a learner and build the progress trees
    ///
    /// A second start for the same certification is a conflict unless the
    /// earlier enrollment was disenrolled, in which case it is replaced.
    pub async fn start_certification(
        &self,
        user_id: &str,
        certification_key: &str,
        starting_point: Option<LessonPointer>,
    ) -> Result<EnrollmentView> {
        if user_id.trim().is_empty() {
            return Err(Error::InvalidInput("user id is empty".to_string()));
        }

        let definition = self
            .curriculum
            .certification(certification_key)
            .await?
            .ok_or_else(|| Error::NotFound(format!("certification {}", certification_key)))?;

        let replacing = match self.store.find_enrollment(user_id, certification_key).await? {
            None => None,
            Some(existing) if existing.status == EnrollmentStatus::Disenrolled => {
                info!(
                    user_id = %user_id,
                    certification = %certification_key,
                    previous = %existing.id,
                    "Replacing disenrolled enrollment"
                );
                Some(existing.id)
            }
            Some(existing) => {
                return Err(Error::Conflict(format!(
                    "user {} already has enrollment {} for {}",
                    user_id, existing.id, certification_key
                )))
            }
        };

        let now = Utc::now();
        let enrollment = Enrollment::new(user_id, certification_key, now);
        let trees = build_certification_tree(&enrollment, &definition, starting_point.as_ref(), now)?;
        self.store.create_enrollment(&enrollment, &trees, replacing).await?;

        info!(
            user_id = %user_id,
            certification = %certification_key,
            enrollment_id = %enrollment.id,
            courses = trees.len(),
            "Certification started"
        );

        let progress = self.store.list_enrollment_progress(enrollment.id).await?;
        Ok(EnrollmentView {
            enrollment,
            progress: progress.into_iter().map(decorate).collect(),
        })
    }

    pub async fn disenroll(&self, user_id: &str, certification_key: &str) -> Result<Enrollment> {
        let enrollment = self
            .store
            .find_enrollment(user_id, certification_key)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!("enrollment of {} in {}", user_id, certification_key))
            })?;

        match enrollment.status {
            EnrollmentStatus::Completed => {
                return Err(Error::InvalidState(format!(
                    "enrollment {} is completed",
                    enrollment.id
                )))
            }
            EnrollmentStatus::Disenrolled => return Ok(enrollment),
            EnrollmentStatus::Enrolled => {}
        }

        self.store
            .set_enrollment_status(enrollment.id, EnrollmentStatus::Disenrolled)
            .await?;
        info!(user_id = %user_id, certification = %certification_key, "Disenrolled");

        self.store.get_enrollment(enrollment.id).await
    }

    /// Move the current-lesson pointer, starting the module if needed
    ///
    /// The store re-checks completion inside the write.
    pub async fn update_current_lesson(
        &self,
        progress_id: Uuid,
        pointer: LessonPointer,
    ) -> Result<ProgressView> {
        let progress = self.store.get_progress(progress_id).await?;
        if progress.status == ProgressStatus::Completed {
            return Err(Error::InvalidState(format!(
                "progress {} is completed and cannot be changed",
                progress_id
            )));
        }

        let course = self
            .curriculum
            .course(&progress.certification_key, &progress.course_key)
            .await?
            .ok_or_else(|| Error::NotFound(format!("course {}", progress.course_key)))?;
        let in_course = course
            .module(&pointer.module_key)
            .is_some_and(|m| m.lesson(&pointer.lesson_id).is_some());
        if !in_course {
            return Err(Error::NotFound(format!(
                "lesson {} in module {}",
                pointer.lesson_id, pointer.module_key
            )));
        }

        self.store
            .set_current_lesson(progress_id, &pointer, Utc::now())
            .await?;
        debug!(
            progress_id = %progress_id,
            module = %pointer.module_key,
            lesson = %pointer.lesson_id,
            "Current lesson updated"
        );
        Ok(decorate(self.store.get_progress(progress_id).await?))
    }

    /// Record acceptance of the academic honesty policy; the first timestamp is kept
    pub async fn accept_academic_honesty(&self, progress_id: Uuid) -> Result<ProgressView> {
        if self
            .store
            .accept_academic_honesty(progress_id, Utc::now())
            .await?
        {
            info!(progress_id = %progress_id, "Academic honesty policy accepted");
        }
        let progress = self.store.get_progress(progress_id).await?;
        Ok(decorate(progress))
    }
}
