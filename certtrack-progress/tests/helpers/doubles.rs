//! Test doubles for the publisher and store seams

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use certtrack_common::events::{CompletionEvent, CompletionKind};
use certtrack_progress::error::{Error, Result};
use certtrack_progress::idempotency::IdempotencyKey;
use certtrack_progress::model::{
    CertificationProgress, CompletedLesson, Enrollment, EnrollmentStatus, LessonPointer,
    UdemyProgress,
};
use certtrack_progress::publisher::CompletionPublisher;
use certtrack_progress::store::{AppendOutcome, LessonCompletion, ProgressFilter, ProgressStore};

/// Keeps every published event
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<CompletionEvent>>,
}

impl RecordingPublisher {
    pub fn events(&self) -> Vec<CompletionEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn events_of(&self, kind: CompletionKind) -> Vec<CompletionEvent> {
        self.events().into_iter().filter(|e| e.kind == kind).collect()
    }
}

#[async_trait]
impl CompletionPublisher for RecordingPublisher {
    async fn publish(&self, event: CompletionEvent) -> Result<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

/// Always fails to publish
pub struct FailingPublisher;

#[async_trait]
impl CompletionPublisher for FailingPublisher {
    async fn publish(&self, _event: CompletionEvent) -> Result<()> {
        Err(Error::Transient("message bus unavailable".to_string()))
    }
}

/// A write another request makes between a service's read and its own write
pub enum ConcurrentWrite {
    Lesson(LessonCompletion),
    Finalize(Uuid),
}

/// Delegates to an inner store, delaying completion writes and optionally
/// slipping a concurrent write in ahead of the next progress update
pub struct ScriptedStore {
    inner: Arc<dyn ProgressStore>,
    delay: Duration,
    pending: Mutex<Option<ConcurrentWrite>>,
}

impl ScriptedStore {
    pub fn slow(inner: Arc<dyn ProgressStore>, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            pending: Mutex::new(None),
        }
    }

    pub fn interleaving(inner: Arc<dyn ProgressStore>, write: ConcurrentWrite) -> Self {
        Self {
            inner,
            delay: Duration::ZERO,
            pending: Mutex::new(Some(write)),
        }
    }

    async fn run_pending(&self) {
        let pending = self.pending.lock().unwrap().take();
        match pending {
            Some(ConcurrentWrite::Lesson(completion)) => {
                let key = IdempotencyKey::for_completion(
                    completion.progress_id,
                    &completion.lesson.lesson_id,
                );
                let outcome = self
                    .inner
                    .append_completed_lesson(&completion, &key)
                    .await
                    .unwrap();
                assert!(outcome.is_applied());
            }
            Some(ConcurrentWrite::Finalize(progress_id)) => {
                assert!(self.inner.finalize_progress(progress_id, Utc::now()).await.unwrap());
            }
            None => {}
        }
    }
}

#[async_trait]
impl ProgressStore for ScriptedStore {
    async fn create_enrollment(
        &self,
        enrollment: &Enrollment,
        trees: &[CertificationProgress],
        replacing: Option<Uuid>,
    ) -> Result<()> {
        self.inner.create_enrollment(enrollment, trees, replacing).await
    }

    async fn find_enrollment(&self, user_id: &str, certification_id: &str) -> Result<Option<Enrollment>> {
        self.inner.find_enrollment(user_id, certification_id).await
    }

    async fn get_enrollment(&self, enrollment_id: Uuid) -> Result<Enrollment> {
        self.inner.get_enrollment(enrollment_id).await
    }

    async fn set_enrollment_status(&self, enrollment_id: Uuid, status: EnrollmentStatus) -> Result<()> {
        self.inner.set_enrollment_status(enrollment_id, status).await
    }

    async fn mark_enrollment_completed(
        &self,
        enrollment_id: Uuid,
        marker: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        self.inner.mark_enrollment_completed(enrollment_id, marker, at).await
    }

    async fn get_progress(&self, progress_id: Uuid) -> Result<CertificationProgress> {
        self.inner.get_progress(progress_id).await
    }

    async fn list_enrollment_progress(&self, enrollment_id: Uuid) -> Result<Vec<CertificationProgress>> {
        self.inner.list_enrollment_progress(enrollment_id).await
    }

    async fn scan_in_progress(&self, filter: &ProgressFilter) -> Result<Vec<CertificationProgress>> {
        self.inner.scan_in_progress(filter).await
    }

    async fn append_completed_lesson(
        &self,
        completion: &LessonCompletion,
        key: &IdempotencyKey,
    ) -> Result<AppendOutcome> {
        tokio::time::sleep(self.delay).await;
        self.inner.append_completed_lesson(completion, key).await
    }

    async fn remove_last_completed_lesson(
        &self,
        progress_id: Uuid,
        module_key: &str,
    ) -> Result<CompletedLesson> {
        self.inner.remove_last_completed_lesson(progress_id, module_key).await
    }

    async fn set_current_lesson(
        &self,
        progress_id: Uuid,
        pointer: &LessonPointer,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.run_pending().await;
        self.inner.set_current_lesson(progress_id, pointer, at).await
    }

    async fn accept_academic_honesty(&self, progress_id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        self.run_pending().await;
        self.inner.accept_academic_honesty(progress_id, at).await
    }

    async fn finalize_progress(&self, progress_id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        self.inner.finalize_progress(progress_id, at).await
    }

    async fn get_udemy_progress(&self, id: Uuid) -> Result<UdemyProgress> {
        self.inner.get_udemy_progress(id).await
    }

    async fn save_udemy_progress(&self, progress: &UdemyProgress) -> Result<()> {
        self.inner.save_udemy_progress(progress).await
    }
}
