//! Percentage aggregation
//!
//! Percentages are derived on every read and never stored. `decorate` is
//! called explicitly by every read path that hands progress to a caller.
//!
//! All percentages are integers in 0..=100. A non-zero amount of completed
//! work never reports 0: a ratio that floors to 0 is rounded up to 1.

use serde::{Deserialize, Serialize};

use crate::model::{CertificationProgress, ModuleProgress};

/// floor(completed / total * 100) with the round-up-to-1 rule
///
/// A zero total yields 0. The result is clamped to 100 in case a cached
/// lesson count fell behind the completed lessons.
pub fn percent(completed: u64, total: u64) -> u8 {
    if total == 0 || completed == 0 {
        return 0;
    }
    let floored = (completed.saturating_mul(100) / total).min(100);
    floored.max(1) as u8
}

pub fn module_percent(module: &ModuleProgress) -> u8 {
    percent(
        u64::from(module.completed_lesson_count()),
        u64::from(module.lesson_count),
    )
}

/// Progress over all modules of the course
pub fn course_percent(progress: &CertificationProgress) -> u8 {
    weighted_percent(progress.modules.iter())
}

/// Progress over assessment modules only
pub fn certification_percent(progress: &CertificationProgress) -> u8 {
    weighted_percent(progress.assessment_modules())
}

fn weighted_percent<'a>(modules: impl Iterator<Item = &'a ModuleProgress>) -> u8 {
    let (completed, total) = modules.fold((0u64, 0u64), |(c, t), m| {
        (
            c + u64::from(m.completed_lesson_count()),
            t + u64::from(m.lesson_count),
        )
    });
    percent(completed, total)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModulePercent {
    pub module_key: String,
    pub completed_lesson_count: u32,
    pub lesson_count: u32,
    pub percent: u8,
}

/// Progress record plus its derived percentages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressView {
    #[serde(flatten)]
    pub progress: CertificationProgress,
    pub course_progress_percentage: u8,
    pub certification_progress_percentage: u8,
    pub module_percentages: Vec<ModulePercent>,
}

impl ProgressView {
    pub fn module_percent(&self, module_key: &str) -> Option<u8> {
        self.module_percentages
            .iter()
            .find(|m| m.module_key == module_key)
            .map(|m| m.percent)
    }
}

/// Attach derived percentages to a progress record
pub fn decorate(progress: CertificationProgress) -> ProgressView {
    let module_percentages = progress
        .modules
        .iter()
        .map(|m| ModulePercent {
            module_key: m.module_key.clone(),
            completed_lesson_count: m.completed_lesson_count(),
            lesson_count: m.lesson_count,
            percent: module_percent(m),
        })
        .collect();

    ProgressView {
        course_progress_percentage: course_percent(&progress),
        certification_progress_percentage: certification_percent(&progress),
        module_percentages,
        progress,
    }
}
