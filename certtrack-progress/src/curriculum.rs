//! Curriculum lookup
//!
//! The curriculum (certifications, their courses, modules and lessons) is
//! owned by the content platform. The engine only needs three questions
//! answered, expressed by [`CurriculumLookup`]. [`StaticCurriculum`] answers
//! them from a TOML definition loaded at startup.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::info;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LessonDefinition {
    pub id: String,
    pub dashed_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModuleDefinition {
    pub key: String,
    #[serde(default)]
    pub is_assessment: bool,
    #[serde(default)]
    pub lessons: Vec<LessonDefinition>,
}

impl ModuleDefinition {
    pub fn lesson_count(&self) -> u32 {
        self.lessons.len() as u32
    }

    pub fn lesson(&self, lesson_id: &str) -> Option<&LessonDefinition> {
        self.lessons.iter().find(|l| l.id == lesson_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CourseDefinition {
    pub key: String,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub modules: Vec<ModuleDefinition>,
}

impl CourseDefinition {
    pub fn module(&self, module_key: &str) -> Option<&ModuleDefinition> {
        self.modules.iter().find(|m| m.key == module_key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CertificationDefinition {
    pub key: String,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub courses: Vec<CourseDefinition>,
}

impl CertificationDefinition {
    pub fn course(&self, course_key: &str) -> Option<&CourseDefinition> {
        self.courses.iter().find(|c| c.key == course_key)
    }
}

/// Where a lesson lives in the curriculum
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LessonLocation {
    pub certification: String,
    pub course: String,
    pub module: String,
}

/// Curriculum lookup collaborator
#[async_trait]
pub trait CurriculumLookup: Send + Sync {
    /// Certification definition with all courses
    async fn certification(&self, key: &str) -> Result<Option<CertificationDefinition>>;

    /// Course definition within a certification
    async fn course(&self, certification: &str, course: &str) -> Result<Option<CourseDefinition>>;

    /// Map a lesson id to its certification/course/module
    async fn locate_lesson(&self, lesson_id: &str) -> Result<Option<LessonLocation>>;
}

#[derive(Debug, Deserialize)]
struct CurriculumFile {
    #[serde(default)]
    certifications: Vec<CertificationDefinition>,
}

/// In-memory curriculum indexed by certification key and lesson id
#[derive(Debug, Clone, Default)]
pub struct StaticCurriculum {
    certifications: HashMap<String, CertificationDefinition>,
    lessons: HashMap<String, LessonLocation>,
}

impl StaticCurriculum {
    /// Build and validate from definitions
    ///
    /// Fails on duplicate certification keys, duplicate course or module
    /// keys within their parent, or a lesson id used more than once.
    pub fn new(certifications: Vec<CertificationDefinition>) -> Result<Self> {
        let mut by_key = HashMap::new();
        let mut lessons = HashMap::new();

        for cert in certifications {
            let mut course_keys = HashSet::new();
            for course in &cert.courses {
                if !course_keys.insert(course.key.as_str()) {
                    return Err(Error::InvalidInput(format!(
                        "duplicate course {} in certification {}",
                        course.key, cert.key
                    )));
                }

                let mut module_keys = HashSet::new();
                for module in &course.modules {
                    if !module_keys.insert(module.key.as_str()) {
                        return Err(Error::InvalidInput(format!(
                            "duplicate module {} in course {}",
                            module.key, course.key
                        )));
                    }

                    for lesson in &module.lessons {
                        let location = LessonLocation {
                            certification: cert.key.clone(),
                            course: course.key.clone(),
                            module: module.key.clone(),
                        };
                        if lessons.insert(lesson.id.clone(), location).is_some() {
                            return Err(Error::InvalidInput(format!(
                                "lesson {} is defined more than once",
                                lesson.id
                            )));
                        }
                    }
                }
            }

            let key = cert.key.clone();
            if by_key.insert(key.clone(), cert).is_some() {
                return Err(Error::InvalidInput(format!("duplicate certification {}", key)));
            }
        }

        Ok(Self {
            certifications: by_key,
            lessons,
        })
    }

    /// Parse a TOML curriculum document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: CurriculumFile = toml::from_str(content)
            .map_err(|e| Error::InvalidInput(format!("invalid curriculum definition: {}", e)))?;
        Self::new(file.certifications)
    }

    /// Load a TOML curriculum file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Common(certtrack_common::Error::Config(format!(
                "cannot read curriculum {}: {}",
                path.display(),
                e
            )))
        })?;
        let curriculum = Self::from_toml_str(&content)?;
        info!(
            certifications = curriculum.certifications.len(),
            lessons = curriculum.lessons.len(),
            "Loaded curriculum from {}",
            path.display()
        );
        Ok(curriculum)
    }

    pub fn lesson_count(&self) -> usize {
        self.lessons.len()
    }
}

#[async_trait]
impl CurriculumLookup for StaticCurriculum {
    async fn certification(&self, key: &str) -> Result<Option<CertificationDefinition>> {
        Ok(self.certifications.get(key).cloned())
    }

    async fn course(&self, certification: &str, course: &str) -> Result<Option<CourseDefinition>> {
        Ok(self
            .certifications
            .get(certification)
            .and_then(|c| c.course(course))
            .cloned())
    }

    async fn locate_lesson(&self, lesson_id: &str) -> Result<Option<LessonLocation>> {
        Ok(self.lessons.get(lesson_id).cloned())
    }
}
