//! Curriculum and engine fixtures

use std::sync::Arc;
use uuid::Uuid;

use certtrack_common::db::init_memory_database;
use certtrack_progress::aggregate::ProgressView;
use certtrack_progress::curriculum::{
    CertificationDefinition, CourseDefinition, LessonDefinition, ModuleDefinition, StaticCurriculum,
};
use certtrack_progress::publisher::CompletionPublisher;
use certtrack_progress::store::{ProgressStore, SqliteProgressStore};
use certtrack_progress::writer::CompletionRequest;
use certtrack_progress::ProgressEngine;

use super::RecordingPublisher;

pub const CERT_KEY: &str = "responsive-web-design";
pub const CORE_COURSE: &str = "rwd-core";
pub const EXTRA_COURSE: &str = "rwd-projects";

fn module(key: &str, prefix: &str, lessons: usize, is_assessment: bool) -> ModuleDefinition {
    ModuleDefinition {
        key: key.to_string(),
        is_assessment,
        lessons: (1..=lessons)
            .map(|i| LessonDefinition {
                id: format!("{}-{}", prefix, i),
                dashed_name: format!("{}-step-{}", key, i),
            })
            .collect(),
    }
}

/// Two courses:
///
/// - `rwd-core`: `cat-photo-app` (30 lessons `step-N`), `basic-html` (10),
///   `css-flexbox` (200), assessments `survey-form` and `tribute-page` (1 each)
/// - `rwd-projects`: `applied-accessibility` (2), assessment `portfolio` (1)
pub fn sample_curriculum() -> StaticCurriculum {
    let certification = CertificationDefinition {
        key: CERT_KEY.to_string(),
        skills: vec!["html".to_string(), "css".to_string()],
        courses: vec![
            CourseDefinition {
                key: CORE_COURSE.to_string(),
                skills: vec!["html".to_string()],
                modules: vec![
                    module("cat-photo-app", "step", 30, false),
                    module("basic-html", "html", 10, false),
                    module("css-flexbox", "flex", 200, false),
                    module("survey-form", "survey", 1, true),
                    module("tribute-page", "tribute", 1, true),
                ],
            },
            CourseDefinition {
                key: EXTRA_COURSE.to_string(),
                skills: vec!["a11y".to_string()],
                modules: vec![
                    module("applied-accessibility", "a11y", 2, false),
                    module("portfolio", "portfolio", 1, true),
                ],
            },
        ],
    };

    match StaticCurriculum::new(vec![certification]) {
        Ok(curriculum) => curriculum,
        Err(e) => panic!("sample curriculum is invalid: {}", e),
    }
}

/// Engine over an in-memory database with a recording publisher
pub struct TestEngine {
    pub engine: ProgressEngine,
    pub store: Arc<SqliteProgressStore>,
    pub publisher: Arc<RecordingPublisher>,
}

impl TestEngine {
    pub async fn new() -> Self {
        let publisher = Arc::new(RecordingPublisher::default());
        Self::with_publisher(publisher.clone(), publisher).await
    }

    /// Engine publishing through `publisher`; `recorder` is kept for assertions
    pub async fn with_publisher(
        publisher: Arc<dyn CompletionPublisher>,
        recorder: Arc<RecordingPublisher>,
    ) -> Self {
        let pool = init_memory_database().await.unwrap();
        let store = Arc::new(SqliteProgressStore::new(pool));
        let store_dyn: Arc<dyn ProgressStore> = store.clone();
        let engine = ProgressEngine::new(store_dyn, Arc::new(sample_curriculum()), publisher);
        Self {
            engine,
            store,
            publisher: recorder,
        }
    }

    /// Enroll `user` and return the (core, projects) progress ids
    pub async fn enroll(&self, user: &str) -> (Uuid, Uuid) {
        let view = self
            .engine
            .enrollments
            .start_certification(user, CERT_KEY, None)
            .await
            .unwrap();
        let id_of = |course: &str| {
            view.progress
                .iter()
                .find(|p| p.progress.course_key == course)
                .map(|p| p.progress.id)
                .unwrap()
        };
        (id_of(CORE_COURSE), id_of(EXTRA_COURSE))
    }

    pub async fn complete(&self, progress_id: Uuid, module: &str, lesson: &str) -> ProgressView {
        self.engine
            .writer
            .record_completion(CompletionRequest::new(progress_id, module, lesson, lesson))
            .await
            .unwrap()
    }

    /// Complete every lesson of a module
    pub async fn complete_module(&self, progress_id: Uuid, module: &str, prefix: &str, lessons: usize) {
        for i in 1..=lessons {
            self.complete(progress_id, module, &format!("{}-{}", prefix, i)).await;
        }
    }
}
