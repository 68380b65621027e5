//! Progress tree construction
//!
//! Trees are built entirely in memory and handed to the store as one unit,
//! so a module that fails to build leaves nothing behind.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use uuid::Uuid;

use super::{CertificationProgress, Enrollment, LessonPointer, ModuleProgress, ProgressStatus};
use crate::curriculum::{CertificationDefinition, CourseDefinition, ModuleDefinition};
use crate::error::{Error, Result};

/// Build one progress tree per course of the certification
///
/// The starting point, if given, must name a module/lesson of one of the
/// certification's courses.
pub fn build_certification_tree(
    enrollment: &Enrollment,
    certification: &CertificationDefinition,
    starting_point: Option<&LessonPointer>,
    now: DateTime<Utc>,
) -> Result<Vec<CertificationProgress>> {
    if certification.courses.is_empty() {
        return Err(Error::InvalidInput(format!(
            "certification {} has no courses",
            certification.key
        )));
    }

    if let Some(start) = starting_point {
        let known = certification
            .courses
            .iter()
            .any(|c| c.module(&start.module_key).is_some());
        if !known {
            return Err(Error::NotFound(format!(
                "module {} in certification {}",
                start.module_key, certification.key
            )));
        }
    }

    certification
        .courses
        .iter()
        .map(|course| {
            let start = starting_point.filter(|s| course.module(&s.module_key).is_some());
            build_progress_tree(enrollment, &certification.key, course, start, now)
        })
        .collect()
}

/// Build the progress tree for a single course
///
/// Every module starts not-started with its lesson count cached from the
/// definition. A starting point marks its module in-progress and sets the
/// current lesson.
pub fn build_progress_tree(
    enrollment: &Enrollment,
    certification_key: &str,
    course: &CourseDefinition,
    starting_point: Option<&LessonPointer>,
    now: DateTime<Utc>,
) -> Result<CertificationProgress> {
    let mut seen = HashSet::new();
    let mut modules = Vec::with_capacity(course.modules.len());
    for definition in &course.modules {
        if !seen.insert(definition.key.as_str()) {
            return Err(Error::InvalidInput(format!(
                "duplicate module {} in course {}",
                definition.key, course.key
            )));
        }
        modules.push(build_module(definition));
    }

    let mut progress = CertificationProgress {
        id: Uuid::new_v4(),
        enrollment_id: enrollment.id,
        user_id: enrollment.user_id.clone(),
        certification_key: certification_key.to_string(),
        course_key: course.key.clone(),
        status: ProgressStatus::NotStarted,
        start_date: None,
        completed_date: None,
        current_lesson: None,
        academic_honesty_accepted_at: None,
        modules,
    };

    if let Some(start) = starting_point {
        let definition = course.module(&start.module_key).ok_or_else(|| {
            Error::NotFound(format!("module {} in course {}", start.module_key, course.key))
        })?;
        if definition.lesson(&start.lesson_id).is_none() {
            return Err(Error::NotFound(format!(
                "lesson {} in module {}",
                start.lesson_id, start.module_key
            )));
        }

        if let Some(module) = progress.module_mut(&start.module_key) {
            module.status = ProgressStatus::InProgress;
            module.start_date = Some(now);
        }
        progress.status = ProgressStatus::InProgress;
        progress.start_date = Some(now);
        progress.current_lesson = Some(start.clone());
    }

    Ok(progress)
}

fn build_module(definition: &ModuleDefinition) -> ModuleProgress {
    ModuleProgress {
        id: Uuid::new_v4(),
        module_key: definition.key.clone(),
        status: ProgressStatus::NotStarted,
        lesson_count: definition.lesson_count(),
        is_assessment: definition.is_assessment,
        start_date: None,
        completed_date: None,
        completed_lessons: Vec::new(),
    }
}
