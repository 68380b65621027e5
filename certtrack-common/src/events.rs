//! Completion events and the in-process EventBus
//!
//! A completion event is emitted once per finalized course or certification
//! and carries what downstream consumers (skill grants, notifications)
//! need. Delivery is fire-and-forget: the bus never reports back into the
//! state change that produced the event.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// What was completed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionKind {
    Certification,
    Course,
}

/// Learner who completed the course or certification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Graduate {
    #[serde(rename = "userId")]
    pub user_id: String,
}

/// Skill granted by the completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillRef {
    pub id: String,
}

/// Downstream completion payload
///
/// Serializes as `{ "id", "type", "graduate": { "userId" }, "skills": [{ "id" }] }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionEvent {
    /// One-time identifier; consumers deduplicate on it
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: CompletionKind,
    pub graduate: Graduate,
    pub skills: Vec<SkillRef>,
}

impl CompletionEvent {
    pub fn new<S: AsRef<str>>(id: Uuid, kind: CompletionKind, user_id: &str, skills: &[S]) -> Self {
        Self {
            id,
            kind,
            graduate: Graduate {
                user_id: user_id.to_string(),
            },
            skills: skills
                .iter()
                .map(|s| SkillRef {
                    id: s.as_ref().to_string(),
                })
                .collect(),
        }
    }
}

/// Broadcast channel for completion events
///
/// Subscribers only see events emitted after they subscribe.
pub struct EventBus {
    tx: broadcast::Sender<CompletionEvent>,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<CompletionEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists,
    /// `Err` if nobody is listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: CompletionEvent,
    ) -> Result<usize, broadcast::error::SendError<CompletionEvent>> {
        self.tx.send(event)
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
