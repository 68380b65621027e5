//! Certification resources
//!
//! A certification resource points at one of two progress kinds. The kind
//! is stored with the id and resolved by an explicit match, so each kind
//! keeps its own storage and percentage rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ProgressStatus;
use crate::aggregate;
use crate::error::Result;
use crate::store::ProgressStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceKind {
    /// Progress tracked by this engine
    FccProgress,
    /// Progress reported by the external course platform
    UdemyProgress,
}

/// Tagged reference to a progress record of either kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub id: Uuid,
}

impl ResourceRef {
    pub fn fcc(id: Uuid) -> Self {
        Self {
            kind: ResourceKind::FccProgress,
            id,
        }
    }

    pub fn udemy(id: Uuid) -> Self {
        Self {
            kind: ResourceKind::UdemyProgress,
            id,
        }
    }
}

/// Externally reported course progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UdemyProgress {
    pub id: Uuid,
    pub user_id: String,
    pub course_key: String,
    pub percent_complete: u8,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Kind-independent summary of a resolved resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceProgress {
    pub kind: ResourceKind,
    pub id: Uuid,
    pub user_id: String,
    pub percent: u8,
    pub completed: bool,
}

impl ResourceRef {
    /// Load and summarize the referenced progress record
    pub async fn resolve(&self, store: &dyn ProgressStore) -> Result<ResourceProgress> {
        match self.kind {
            ResourceKind::FccProgress => {
                let progress = store.get_progress(self.id).await?;
                Ok(ResourceProgress {
                    kind: self.kind,
                    id: self.id,
                    percent: aggregate::course_percent(&progress),
                    completed: progress.status == ProgressStatus::Completed,
                    user_id: progress.user_id,
                })
            }
            ResourceKind::UdemyProgress => {
                let progress = store.get_udemy_progress(self.id).await?;
                Ok(ResourceProgress {
                    kind: self.kind,
                    id: self.id,
                    percent: progress.percent_complete.min(100),
                    completed: progress.completed_at.is_some(),
                    user_id: progress.user_id,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_ref_serializes_tagged() {
        let json = serde_json::to_value(ResourceRef::udemy(Uuid::nil())).unwrap();
        assert_eq!(json["kind"], "udemyProgress");

        let json = serde_json::to_value(ResourceRef::fcc(Uuid::nil())).unwrap();
        assert_eq!(json["kind"], "fccProgress");
    }
}
