//! Idempotent completion writer
//!
//! Records a lesson as completed. Repeated submissions of the same
//! (progress, lesson) pair are answered with the current state instead of
//! an error, whichever guard catches them:
//!
//! 1. the pre-check against already recorded lessons,
//! 2. the idempotency ledger inside the storage transaction,
//! 3. the unique (module, lesson) constraint once a ledger entry expired.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::aggregate::{decorate, ProgressView};
use crate::curriculum::CurriculumLookup;
use crate::error::{Error, Result};
use crate::idempotency::IdempotencyKey;
use crate::model::{CompletedLesson, ProgressStatus};
use crate::store::{AppendOutcome, DuplicateReason, LessonCompletion, ProgressStore};

/// Default bound on the storage call
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// A lesson completion submitted by a client
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub progress_id: Uuid,
    pub module_key: String,
    pub lesson_id: String,
    pub dashed_name: String,
    pub completed_date: DateTime<Utc>,
    /// Overrides the writer's default timeout for this request
    pub timeout: Option<Duration>,
}

impl CompletionRequest {
    pub fn new(progress_id: Uuid, module_key: &str, lesson_id: &str, dashed_name: &str) -> Self {
        Self {
            progress_id,
            module_key: module_key.to_string(),
            lesson_id: lesson_id.to_string(),
            dashed_name: dashed_name.to_string(),
            completed_date: Utc::now(),
            timeout: None,
        }
    }

    pub fn completed_at(mut self, completed_date: DateTime<Utc>) -> Self {
        self.completed_date = completed_date;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.module_key.trim().is_empty() {
            return Err(Error::InvalidInput("module key is empty".to_string()));
        }
        if self.lesson_id.trim().is_empty() {
            return Err(Error::InvalidInput("lesson id is empty".to_string()));
        }
        Ok(())
    }
}

pub struct CompletionWriter {
    store: Arc<dyn ProgressStore>,
    curriculum: Arc<dyn CurriculumLookup>,
    write_timeout: Duration,
}

impl CompletionWriter {
    pub fn new(store: Arc<dyn ProgressStore>, curriculum: Arc<dyn CurriculumLookup>) -> Self {
        Self {
            store,
            curriculum,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Record a completed lesson and return the reloaded, decorated progress
    pub async fn record_completion(&self, request: CompletionRequest) -> Result<ProgressView> {
        request.validate()?;

        let progress = self.store.get_progress(request.progress_id).await?;
        let module = progress.require_module(&request.module_key)?;

        let location = self.curriculum.locate_lesson(&request.lesson_id).await?;
        let belongs = location.as_ref().is_some_and(|loc| {
            loc.course == progress.course_key
                && loc.certification == progress.certification_key
                && loc.module == request.module_key
        });
        if !belongs {
            return Err(Error::NotFound(format!(
                "lesson {} in module {}",
                request.lesson_id, request.module_key
            )));
        }

        if module.has_completed(&request.lesson_id) {
            debug!(
                progress_id = %request.progress_id,
                lesson_id = %request.lesson_id,
                "Lesson already completed, skipping write"
            );
            return Ok(decorate(progress));
        }

        if progress.status == ProgressStatus::Completed {
            return Err(Error::InvalidState(format!(
                "progress {} is completed and no longer accepts lessons",
                progress.id
            )));
        }

        let completion = LessonCompletion {
            progress_id: request.progress_id,
            module_key: request.module_key.clone(),
            lesson: CompletedLesson {
                lesson_id: request.lesson_id.clone(),
                dashed_name: request.dashed_name.clone(),
                completed_date: request.completed_date,
            },
        };
        let key = IdempotencyKey::for_completion(request.progress_id, &request.lesson_id);
        let timeout = request.timeout.unwrap_or(self.write_timeout);

        let outcome = tokio::time::timeout(timeout, self.store.append_completed_lesson(&completion, &key))
            .await
            .map_err(|_| {
                warn!(
                    progress_id = %request.progress_id,
                    lesson_id = %request.lesson_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Completion write timed out"
                );
                Error::Transient(format!("completion write timed out after {:?}", timeout))
            })??;

        match &outcome {
            AppendOutcome::Applied(updated) => {
                let module = updated.module(&request.module_key);
                info!(
                    progress_id = %request.progress_id,
                    module = %request.module_key,
                    lesson_id = %request.lesson_id,
                    module_status = %module.map(|m| m.status).unwrap_or(ProgressStatus::InProgress),
                    "Lesson completed"
                );
            }
            AppendOutcome::Duplicate {
                reason: DuplicateReason::IdempotencyKey,
                ..
            } => {
                debug!(
                    progress_id = %request.progress_id,
                    idempotency_key = %key,
                    "Duplicate completion rejected by idempotency key"
                );
            }
            AppendOutcome::Duplicate {
                reason: DuplicateReason::ExistingLesson,
                ..
            } => {
                warn!(
                    progress_id = %request.progress_id,
                    lesson_id = %request.lesson_id,
                    idempotency_key = %key,
                    "Idempotency window mismatch: lesson already recorded"
                );
            }
        }

        Ok(decorate(outcome.into_progress()))
    }

    /// Remove the most recently completed lesson of a module
    pub async fn undo_last_lesson(&self, progress_id: Uuid, module_key: &str) -> Result<ProgressView> {
        let progress = self.store.get_progress(progress_id).await?;
        if progress.status == ProgressStatus::Completed {
            return Err(Error::InvalidState(format!(
                "progress {} is completed and cannot be changed",
                progress_id
            )));
        }

        let module = progress.require_module(module_key)?;
        if module.status == ProgressStatus::Completed {
            return Err(Error::InvalidState(format!(
                "module {} is completed; status cannot regress",
                module_key
            )));
        }
        if module.completed_lessons.is_empty() {
            return Err(Error::InvalidState(format!(
                "module {} has no completed lessons",
                module_key
            )));
        }

        let removed = self.store.remove_last_completed_lesson(progress_id, module_key).await?;
        info!(
            progress_id = %progress_id,
            module = %module_key,
            lesson_id = %removed.lesson_id,
            "Last completed lesson removed"
        );

        Ok(decorate(self.store.get_progress(progress_id).await?))
    }
}
