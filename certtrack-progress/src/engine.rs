//! Engine assembly
//!
//! Wires the store, curriculum and publisher handles into each component
//! once at construction time.

use std::sync::Arc;

use certtrack_common::config::EngineConfig;
use certtrack_common::events::EventBus;

use crate::curriculum::{CurriculumLookup, StaticCurriculum};
use crate::enrollment::EnrollmentService;
use crate::error::Result;
use crate::gate::CompletionGate;
use crate::model::{ResourceProgress, ResourceRef};
use crate::publisher::{CompletionPublisher, EventBusPublisher};
use crate::reconcile::ReconciliationEngine;
use crate::store::{ProgressStore, SqliteProgressStore};
use crate::writer::CompletionWriter;

pub struct ProgressEngine {
    pub store: Arc<dyn ProgressStore>,
    pub enrollments: EnrollmentService,
    pub writer: CompletionWriter,
    pub gate: CompletionGate,
    pub reconciler: ReconciliationEngine,
}

impl ProgressEngine {
    pub fn new(
        store: Arc<dyn ProgressStore>,
        curriculum: Arc<dyn CurriculumLookup>,
        publisher: Arc<dyn CompletionPublisher>,
    ) -> Self {
        Self {
            enrollments: EnrollmentService::new(store.clone(), curriculum.clone()),
            writer: CompletionWriter::new(store.clone(), curriculum.clone()),
            gate: CompletionGate::new(store.clone(), curriculum.clone(), publisher),
            reconciler: ReconciliationEngine::new(store.clone(), curriculum),
            store,
        }
    }

    /// Open the configured database and curriculum
    pub async fn from_config(config: &EngineConfig, bus: Arc<EventBus>) -> Result<Self> {
        let pool = certtrack_common::db::init_database(&config.database_path).await?;
        let store = SqliteProgressStore::new(pool).with_idempotency_window(config.idempotency_window());
        let curriculum = StaticCurriculum::load(&config.curriculum_path)?;

        let mut engine = Self::new(
            Arc::new(store),
            Arc::new(curriculum),
            Arc::new(EventBusPublisher::new(bus)),
        );
        engine.writer = engine.writer.with_write_timeout(config.write_timeout());
        Ok(engine)
    }

    pub async fn resolve_resource(&self, resource: &ResourceRef) -> Result<ResourceProgress> {
        resource.resolve(self.store.as_ref()).await
    }
}
