use std::sync::Arc;

use sqlx::SqlitePool;

use crate::audio::transcription::TranscriptionBackend;
use crate::config::Config;
use crate::database::manager::DatabaseManager;
use crate::notifications::{NotificationBus, SummaryChannel};
use crate::summary::chunker::TranscriptChunker;
use crate::summary::llm_client::InferenceBackend;
use crate::summary::merger::SummaryMerger;

/// Root service container threaded through the API handlers and the worker
/// tasks. Everything here is constructed once at startup; there are no
/// process-wide singletons.
pub struct AppContext {
    pub config: Config,
    pub db: DatabaseManager,
    pub bus: Arc<NotificationBus>,
    pub updates: SummaryChannel,
    pub inference: Arc<dyn InferenceBackend>,
    pub transcriber: Arc<dyn TranscriptionBackend>,
    pub chunker: TranscriptChunker,
    pub merger: SummaryMerger,
}

impl AppContext {
    pub fn new(
        config: Config,
        db: DatabaseManager,
        inference: Arc<dyn InferenceBackend>,
        transcriber: Arc<dyn TranscriptionBackend>,
    ) -> Result<Arc<Self>, String> {
        let chunker = TranscriptChunker::new(config.chunk_size, config.overlap_ratio)
            .map_err(|e| e.to_string())?;

        Ok(Arc::new(Self {
            config,
            db,
            bus: Arc::new(NotificationBus::new()),
            updates: SummaryChannel::new(),
            inference,
            transcriber,
            chunker,
            merger: SummaryMerger::default(),
        }))
    }

    pub fn pool(&self) -> &SqlitePool {
        self.db.pool()
    }
}
