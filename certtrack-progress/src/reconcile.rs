//! Reconciliation engine
//!
//! Offline comparison of locally recorded lessons against an external
//! per-user completion feed. Read-only: the engine never writes progress,
//! it only reports differences. Cancellation is checked between users, so
//! a cancelled run still returns complete results for every user it
//! finished.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::curriculum::{CurriculumLookup, LessonLocation};
use crate::error::{Error, Result};
use crate::model::{CertificationProgress, ProgressStatus};
use crate::store::{ProgressFilter, ProgressStore};

/// One completed challenge in the external feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedChallenge {
    pub id: String,
    /// Epoch milliseconds
    #[serde(default)]
    pub completed_date: Option<i64>,
}

/// Per-user record of the external feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedRecord {
    pub user_id: String,
    #[serde(default)]
    pub completed_challenges: Vec<FeedChallenge>,
}

/// Parse a feed document (a JSON array of user records)
pub fn parse_feed(json: &str) -> Result<Vec<FeedRecord>> {
    serde_json::from_str(json).map_err(|e| Error::InvalidInput(format!("invalid feed: {}", e)))
}

/// Set difference between feed and local lesson ids
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LessonSetDiff {
    pub extra_in_feed: BTreeSet<String>,
    pub extra_local: BTreeSet<String>,
    pub count_delta: i64,
}

impl LessonSetDiff {
    pub fn is_empty(&self) -> bool {
        self.extra_in_feed.is_empty() && self.extra_local.is_empty() && self.count_delta == 0
    }
}

pub fn diff_lesson_sets(feed: &BTreeSet<String>, local: &BTreeSet<String>) -> LessonSetDiff {
    LessonSetDiff {
        extra_in_feed: feed.difference(local).cloned().collect(),
        extra_local: local.difference(feed).cloned().collect(),
        count_delta: feed.len() as i64 - local.len() as i64,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscrepancyReport {
    pub user_id: String,
    pub certification: String,
    pub module: String,
    pub count_delta: i64,
    pub extra_in_feed: Vec<String>,
    pub extra_local: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    /// Ordered by (user, certification, module)
    pub discrepancies: Vec<DiscrepancyReport>,
    pub users_processed: usize,
    pub modules_checked: usize,
    /// Feed lesson ids the curriculum could not place
    pub unmapped_lessons: BTreeSet<String>,
    pub cancelled: bool,
    pub generated_at: DateTime<Utc>,
}

/// (certification, course, module) → lesson ids
type FeedIndex = BTreeMap<(String, String, String), BTreeSet<String>>;

pub struct ReconciliationEngine {
    store: Arc<dyn ProgressStore>,
    curriculum: Arc<dyn CurriculumLookup>,
}

impl ReconciliationEngine {
    pub fn new(store: Arc<dyn ProgressStore>, curriculum: Arc<dyn CurriculumLookup>) -> Self {
        Self { store, curriculum }
    }

    /// Compare every in-progress module matching `filter` against the feed
    pub async fn run(
        &self,
        feed: &[FeedRecord],
        filter: &ProgressFilter,
        cancel: &CancellationToken,
    ) -> Result<ReconciliationReport> {
        let records = self.store.scan_in_progress(filter).await?;

        let mut by_user: BTreeMap<&str, Vec<&CertificationProgress>> = BTreeMap::new();
        for progress in &records {
            by_user.entry(progress.user_id.as_str()).or_default().push(progress);
        }

        // A user may appear in several feed records
        let mut feed_by_user: HashMap<&str, Vec<&FeedChallenge>> = HashMap::new();
        for record in feed {
            feed_by_user
                .entry(record.user_id.as_str())
                .or_default()
                .extend(record.completed_challenges.iter());
        }

        info!(
            users = by_user.len(),
            progress_records = records.len(),
            feed_users = feed_by_user.len(),
            "Reconciliation started"
        );

        let mut report = ReconciliationReport {
            discrepancies: Vec::new(),
            users_processed: 0,
            modules_checked: 0,
            unmapped_lessons: BTreeSet::new(),
            cancelled: false,
            generated_at: Utc::now(),
        };
        let mut locations: HashMap<String, Option<LessonLocation>> = HashMap::new();

        for (user_id, progress_list) in by_user {
            if cancel.is_cancelled() {
                warn!(
                    users_processed = report.users_processed,
                    "Reconciliation cancelled; report is partial"
                );
                report.cancelled = true;
                break;
            }

            let challenges = feed_by_user.get(user_id).map(Vec::as_slice).unwrap_or(&[]);
            let index = self
                .index_feed(challenges, &mut locations, &mut report.unmapped_lessons)
                .await?;

            for progress in progress_list {
                for module in &progress.modules {
                    if module.status != ProgressStatus::InProgress {
                        continue;
                    }
                    report.modules_checked += 1;

                    let local: BTreeSet<String> = module
                        .completed_lessons
                        .iter()
                        .map(|l| l.lesson_id.clone())
                        .collect();
                    let key = (
                        progress.certification_key.clone(),
                        progress.course_key.clone(),
                        module.module_key.clone(),
                    );
                    let empty = BTreeSet::new();
                    let remote = index.get(&key).unwrap_or(&empty);

                    let diff = diff_lesson_sets(remote, &local);
                    if diff.is_empty() {
                        continue;
                    }

                    debug!(
                        user_id = %user_id,
                        certification = %progress.certification_key,
                        module = %module.module_key,
                        count_delta = diff.count_delta,
                        "Discrepancy found"
                    );
                    report.discrepancies.push(DiscrepancyReport {
                        user_id: user_id.to_string(),
                        certification: progress.certification_key.clone(),
                        module: module.module_key.clone(),
                        count_delta: diff.count_delta,
                        extra_in_feed: diff.extra_in_feed.into_iter().collect(),
                        extra_local: diff.extra_local.into_iter().collect(),
                    });
                }
            }

            report.users_processed += 1;
        }

        report.discrepancies.sort_by(|a, b| {
            (&a.user_id, &a.certification, &a.module).cmp(&(&b.user_id, &b.certification, &b.module))
        });

        info!(
            users_processed = report.users_processed,
            modules_checked = report.modules_checked,
            discrepancies = report.discrepancies.len(),
            unmapped = report.unmapped_lessons.len(),
            cancelled = report.cancelled,
            "Reconciliation finished"
        );
        Ok(report)
    }

    /// Group one user's feed lessons by curriculum location
    async fn index_feed(
        &self,
        challenges: &[&FeedChallenge],
        cache: &mut HashMap<String, Option<LessonLocation>>,
        unmapped: &mut BTreeSet<String>,
    ) -> Result<FeedIndex> {
        let mut index = FeedIndex::new();
        for challenge in challenges {
            let location = match cache.get(&challenge.id) {
                Some(found) => found.clone(),
                None => {
                    let found = self.curriculum.locate_lesson(&challenge.id).await?;
                    cache.insert(challenge.id.clone(), found.clone());
                    found
                }
            };

            match location {
                Some(loc) => {
                    index
                        .entry((loc.certification, loc.course, loc.module))
                        .or_default()
                        .insert(challenge.id.clone());
                }
                None => {
                    unmapped.insert(challenge.id.clone());
                }
            }
        }
        Ok(index)
    }
}
