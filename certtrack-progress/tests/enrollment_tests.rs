//! Integration tests for enrollment operations and resource resolution

mod helpers;

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use certtrack_progress::enrollment::EnrollmentService;
use certtrack_progress::error::Error;
use certtrack_progress::model::{
    CompletedLesson, EnrollmentStatus, LessonPointer, ProgressStatus, ResourceKind, ResourceRef,
    UdemyProgress,
};
use certtrack_progress::store::{LessonCompletion, ProgressStore};
use helpers::{
    sample_curriculum, ConcurrentWrite, ScriptedStore, TestEngine, CERT_KEY, CORE_COURSE,
    EXTRA_COURSE,
};

#[tokio::test]
async fn test_start_builds_tree_for_every_course() {
    let t = TestEngine::new().await;
    let view = t
        .engine
        .enrollments
        .start_certification("u1", CERT_KEY, None)
        .await
        .unwrap();

    assert_eq!(view.enrollment.status, EnrollmentStatus::Enrolled);
    assert!(view.enrollment.completion_marker.is_none());
    assert_eq!(view.progress.len(), 2);

    let courses: Vec<_> = view.progress.iter().map(|p| p.progress.course_key.as_str()).collect();
    assert_eq!(courses, vec![CORE_COURSE, EXTRA_COURSE]);

    let core = &view.progress[0];
    assert_eq!(core.progress.modules.len(), 5);
    assert!(core
        .progress
        .modules
        .iter()
        .all(|m| m.status == ProgressStatus::NotStarted));
    assert_eq!(core.progress.module("css-flexbox").unwrap().lesson_count, 200);
    assert_eq!(core.course_progress_percentage, 0);
}

#[tokio::test]
async fn test_start_with_starting_point() {
    let t = TestEngine::new().await;
    let view = t
        .engine
        .enrollments
        .start_certification("u1", CERT_KEY, Some(LessonPointer::new("basic-html", "html-4")))
        .await
        .unwrap();

    let core = view
        .progress
        .iter()
        .find(|p| p.progress.course_key == CORE_COURSE)
        .unwrap();
    assert_eq!(core.progress.status, ProgressStatus::InProgress);
    assert_eq!(
        core.progress.current_lesson,
        Some(LessonPointer::new("basic-html", "html-4"))
    );
    assert_eq!(
        core.progress.module("basic-html").unwrap().status,
        ProgressStatus::InProgress
    );
    let in_progress = core
        .progress
        .modules
        .iter()
        .filter(|m| m.status == ProgressStatus::InProgress)
        .count();
    assert_eq!(in_progress, 1);
}

#[tokio::test]
async fn test_bad_starting_point_persists_nothing() {
    let t = TestEngine::new().await;
    let result = t
        .engine
        .enrollments
        .start_certification("u1", CERT_KEY, Some(LessonPointer::new("basic-html", "nope")))
        .await;
    assert!(matches!(result, Err(Error::NotFound(_))));

    assert!(t.store.find_enrollment("u1", CERT_KEY).await.unwrap().is_none());
}

#[tokio::test]
async fn test_unknown_certification_is_not_found() {
    let t = TestEngine::new().await;
    let result = t
        .engine
        .enrollments
        .start_certification("u1", "quantum-basket-weaving", None)
        .await;
    assert!(matches!(result, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn test_second_start_conflicts() {
    let t = TestEngine::new().await;
    t.enroll("u1").await;

    let result = t
        .engine
        .enrollments
        .start_certification("u1", CERT_KEY, None)
        .await;
    assert!(matches!(result, Err(Error::Conflict(_))));
}

#[tokio::test]
async fn test_restart_after_disenroll_replaces_tree() {
    let t = TestEngine::new().await;
    let (old_core, _) = t.enroll("u1").await;
    t.complete(old_core, "basic-html", "html-1").await;

    let enrollment = t.engine.enrollments.disenroll("u1", CERT_KEY).await.unwrap();
    assert_eq!(enrollment.status, EnrollmentStatus::Disenrolled);

    let (new_core, _) = t.enroll("u1").await;
    assert_ne!(new_core, old_core);
    assert!(matches!(
        t.store.get_progress(old_core).await,
        Err(Error::NotFound(_))
    ));

    // The fresh tree accepts the same lesson again
    let view = t.complete(new_core, "basic-html", "html-1").await;
    assert_eq!(view.module_percent("basic-html"), Some(10));
}

#[tokio::test]
async fn test_completed_enrollment_cannot_disenroll() {
    let t = TestEngine::new().await;
    let (core, projects) = t.enroll("u1").await;
    t.complete(core, "survey-form", "survey-1").await;
    t.complete(core, "tribute-page", "tribute-1").await;
    t.complete(projects, "portfolio", "portfolio-1").await;
    t.engine.gate.complete_certification(core).await.unwrap();
    t.engine.gate.complete_certification(projects).await.unwrap();

    let result = t.engine.enrollments.disenroll("u1", CERT_KEY).await;
    assert!(matches!(result, Err(Error::InvalidState(_))));
}

#[tokio::test]
async fn test_current_lesson_starts_module_and_progress() {
    let t = TestEngine::new().await;
    let (core, _) = t.enroll("u1").await;

    let view = t
        .engine
        .enrollments
        .update_current_lesson(core, LessonPointer::new("css-flexbox", "flex-9"))
        .await
        .unwrap();

    assert_eq!(view.progress.status, ProgressStatus::InProgress);
    assert!(view.progress.start_date.is_some());
    let module = view.progress.module("css-flexbox").unwrap();
    assert_eq!(module.status, ProgressStatus::InProgress);
    assert!(module.start_date.is_some());
    assert_eq!(module.completed_lesson_count(), 0);
    assert_eq!(
        view.progress.current_lesson,
        Some(LessonPointer::new("css-flexbox", "flex-9"))
    );
}

#[tokio::test]
async fn test_current_lesson_must_exist_in_course() {
    let t = TestEngine::new().await;
    let (core, _) = t.enroll("u1").await;

    let result = t
        .engine
        .enrollments
        .update_current_lesson(core, LessonPointer::new("portfolio", "portfolio-1"))
        .await;
    assert!(matches!(result, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn test_academic_honesty_keeps_first_timestamp() {
    let t = TestEngine::new().await;
    let (core, _) = t.enroll("u1").await;

    let first = t.engine.enrollments.accept_academic_honesty(core).await.unwrap();
    let accepted = first.progress.academic_honesty_accepted_at.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = t.engine.enrollments.accept_academic_honesty(core).await.unwrap();

    assert_eq!(second.progress.academic_honesty_accepted_at, Some(accepted));
}

#[tokio::test]
async fn test_resolve_fcc_resource() {
    let t = TestEngine::new().await;
    let (_, projects) = t.enroll("u1").await;
    t.complete(projects, "applied-accessibility", "a11y-1").await;

    let resolved = t
        .engine
        .resolve_resource(&ResourceRef::fcc(projects))
        .await
        .unwrap();
    assert_eq!(resolved.kind, ResourceKind::FccProgress);
    assert_eq!(resolved.user_id, "u1");
    assert_eq!(resolved.percent, 33);
    assert!(!resolved.completed);
}

#[tokio::test]
async fn test_resolve_udemy_resource() {
    let t = TestEngine::new().await;
    let udemy = UdemyProgress {
        id: Uuid::new_v4(),
        user_id: "u1".to_string(),
        course_key: "react-complete-guide".to_string(),
        percent_complete: 100,
        completed_at: Some(Utc::now()),
    };
    t.store.save_udemy_progress(&udemy).await.unwrap();

    let resolved = t
        .engine
        .resolve_resource(&ResourceRef::udemy(udemy.id))
        .await
        .unwrap();
    assert_eq!(resolved.kind, ResourceKind::UdemyProgress);
    assert_eq!(resolved.percent, 100);
    assert!(resolved.completed);

    let missing = t.engine.resolve_resource(&ResourceRef::udemy(Uuid::new_v4())).await;
    assert!(matches!(missing, Err(Error::NotFound(_))));
}

fn concurrent_lesson(progress_id: Uuid, module: &str, lesson: &str) -> ConcurrentWrite {
    ConcurrentWrite::Lesson(LessonCompletion {
        progress_id,
        module_key: module.to_string(),
        lesson: CompletedLesson {
            lesson_id: lesson.to_string(),
            dashed_name: lesson.to_string(),
            completed_date: Utc::now(),
        },
    })
}

fn service_over(t: &TestEngine, write: ConcurrentWrite) -> EnrollmentService {
    let store = Arc::new(ScriptedStore::interleaving(t.store.clone(), write));
    EnrollmentService::new(store, Arc::new(sample_curriculum()))
}

#[tokio::test]
async fn test_current_lesson_keeps_module_completed_concurrently() {
    let t = TestEngine::new().await;
    let (core, _) = t.enroll("u1").await;
    t.complete(core, "basic-html", "html-1").await;

    // survey-form completes after the service has read the record
    let service = service_over(&t, concurrent_lesson(core, "survey-form", "survey-1"));
    let view = service
        .update_current_lesson(core, LessonPointer::new("survey-form", "survey-1"))
        .await
        .unwrap();

    let survey = view.progress.module("survey-form").unwrap();
    assert_eq!(survey.status, ProgressStatus::Completed);
    assert!(survey.completed_date.is_some());
    assert_eq!(survey.completed_lesson_count(), 1);
    assert_eq!(
        view.progress.current_lesson,
        Some(LessonPointer::new("survey-form", "survey-1"))
    );

    t.complete(core, "tribute-page", "tribute-1").await;
    let result = t.engine.gate.complete_certification(core).await.unwrap();
    assert!(result.newly_completed);
}

#[tokio::test]
async fn test_current_lesson_refused_when_finalized_concurrently() {
    let t = TestEngine::new().await;
    let (_, projects) = t.enroll("u1").await;
    t.complete(projects, "portfolio", "portfolio-1").await;
    let before = t.store.get_progress(projects).await.unwrap();

    let service = service_over(&t, ConcurrentWrite::Finalize(projects));
    let result = service
        .update_current_lesson(projects, LessonPointer::new("applied-accessibility", "a11y-1"))
        .await;
    assert!(matches!(result, Err(Error::InvalidState(_))));

    let after = t.store.get_progress(projects).await.unwrap();
    assert_eq!(after.status, ProgressStatus::Completed);
    assert!(after.completed_date.is_some());
    assert_eq!(after.current_lesson, before.current_lesson);
    assert_eq!(
        after.module("applied-accessibility").unwrap().status,
        ProgressStatus::NotStarted
    );
}

#[tokio::test]
async fn test_academic_honesty_keeps_concurrent_completion() {
    let t = TestEngine::new().await;
    let (_, projects) = t.enroll("u1").await;
    t.complete(projects, "portfolio", "portfolio-1").await;

    let service = service_over(&t, ConcurrentWrite::Finalize(projects));
    let view = service.accept_academic_honesty(projects).await.unwrap();

    assert_eq!(view.progress.status, ProgressStatus::Completed);
    assert!(view.progress.completed_date.is_some());
    assert!(view.progress.academic_honesty_accepted_at.is_some());

    let stored = t.store.get_progress(projects).await.unwrap();
    assert_eq!(stored.status, ProgressStatus::Completed);
    assert_eq!(stored.completed_date, view.progress.completed_date);
}

#[tokio::test]
async fn test_academic_honesty_unknown_progress_is_not_found() {
    let t = TestEngine::new().await;
    let result = t.engine.enrollments.accept_academic_honesty(Uuid::new_v4()).await;
    assert!(matches!(result, Err(Error::NotFound(_))));
}
