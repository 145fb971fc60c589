//! Processing queue scheduler.
//!
//! Pulls pending queue items in priority order and drives each through its
//! enrichment steps. Every item's terminal transition is committed together
//! with the photo fields its pass produced, before the next item starts.
//!
//! At most one continuous run is active per scheduler; see
//! [`ProcessingScheduler::start_continuous`]. Observers follow runs through
//! [`ProcessingScheduler::progress`] snapshots or the [`ProcessingEvent`]
//! broadcast channel.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use lumen_core::defaults;
use lumen_core::{
    EnrichmentStep, Error, Library, LibraryStats, QueueItem, QueueStats, Result, SchedulerConfig,
    TaskType,
};

use crate::enrichment::Enricher;
use crate::progress::{ProgressSnapshot, ProgressTracker, RunGuard};

/// Events emitted while processing the queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProcessingEvent {
    /// A continuous run started with `total` items targeted.
    RunStarted { total: u64 },
    ItemStarted {
        queue_item_id: i64,
        photo_id: i64,
        task_type: TaskType,
    },
    StepStarted {
        queue_item_id: i64,
        photo_id: i64,
        step: EnrichmentStep,
    },
    ItemCompleted { queue_item_id: i64, photo_id: i64 },
    ItemFailed {
        queue_item_id: i64,
        photo_id: i64,
        error: String,
    },
    /// A continuous run ended.
    RunStopped {
        processed: u64,
        stop_requested: bool,
    },
}

/// How a queue item ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Completed,
    Failed(String),
}

/// Drives the processing queue. Cheap to clone; clones share progress and events.
#[derive(Clone)]
pub struct ProcessingScheduler {
    library: Library,
    enricher: Arc<Enricher>,
    config: SchedulerConfig,
    progress: Arc<ProgressTracker>,
    event_tx: broadcast::Sender<ProcessingEvent>,
}

impl ProcessingScheduler {
    pub fn new(library: Library, enricher: Enricher, config: SchedulerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity);
        Self {
            library,
            enricher: Arc::new(enricher),
            config,
            progress: Arc::new(ProgressTracker::new()),
            event_tx,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn enricher(&self) -> &Enricher {
        &self.enricher
    }

    /// Subscribe to processing events.
    pub fn events(&self) -> broadcast::Receiver<ProcessingEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: ProcessingEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }

    // =========================================================================
    // QUEUEING
    // =========================================================================

    /// Insert a pending item. Never deduplicates.
    pub async fn enqueue(&self, photo_id: i64, task_type: TaskType, priority: i32) -> Result<i64> {
        let id = self
            .library
            .queue
            .enqueue(photo_id, task_type, priority)
            .await?;
        debug!(
            subsystem = "jobs",
            component = "scheduler",
            queue_item_id = id,
            photo_id,
            task_type = %task_type,
            priority,
            "Enqueued"
        );
        Ok(id)
    }

    /// Enqueue a `full` pass for every photo not yet processed.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "scheduler", op = "queue_all"))]
    pub async fn queue_all_unprocessed(&self) -> Result<usize> {
        let ids = self.library.photos.list_unprocessed_ids().await?;
        for &photo_id in &ids {
            self.library
                .queue
                .enqueue(photo_id, TaskType::Full, defaults::QUEUE_PRIORITY)
                .await?;
        }
        info!(count = ids.len(), "Queued unprocessed photos");
        Ok(ids.len())
    }

    /// Enqueue a `faces` pass for every still image without face processing.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "scheduler", op = "queue_faces"))]
    pub async fn queue_faces_unprocessed(&self) -> Result<usize> {
        let ids = self.library.photos.list_faces_pending_ids().await?;
        for &photo_id in &ids {
            self.library
                .queue
                .enqueue(photo_id, TaskType::Faces, defaults::QUEUE_PRIORITY)
                .await?;
        }
        info!(count = ids.len(), "Queued photos for face detection");
        Ok(ids.len())
    }

    /// Reprocess a photo: drop its pending items, clear `is_processed` and
    /// enqueue a fresh `full` pass. Completed and failed history is kept.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "scheduler", op = "requeue"))]
    pub async fn requeue_photo(&self, photo_id: i64, priority: i32) -> Result<i64> {
        if self.library.photos.get(photo_id).await?.is_none() {
            return Err(Error::PhotoNotFound(photo_id));
        }
        let removed = self
            .library
            .queue
            .remove_pending_for_photo(photo_id)
            .await?;
        self.library.photos.reset_processed(photo_id).await?;
        let id = self
            .library
            .queue
            .enqueue(photo_id, TaskType::Full, priority)
            .await?;
        info!(photo_id, queue_item_id = id, removed, "Requeued photo");
        Ok(id)
    }

    /// Regenerate every video: clear its thumbnails and `is_processed`, drop
    /// its queue items that are not in flight and enqueue a `full` pass at
    /// [`defaults::VIDEO_REQUEUE_PRIORITY`]. Returns the number queued.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "scheduler", op = "requeue_videos"))]
    pub async fn requeue_videos(&self) -> Result<usize> {
        let ids = self.library.photos.list_video_ids().await?;
        for &photo_id in &ids {
            self.library
                .queue
                .requeue_for_reprocess(photo_id, TaskType::Full, defaults::VIDEO_REQUEUE_PRIORITY)
                .await?;
        }
        info!(count = ids.len(), "Queued videos for reprocessing");
        Ok(ids.len())
    }

    pub async fn queue_stats(&self) -> Result<QueueStats> {
        self.library.queue.stats().await
    }

    pub async fn library_stats(&self) -> Result<LibraryStats> {
        self.library.search.library_stats().await
    }

    // =========================================================================
    // RUNS
    // =========================================================================

    /// Process up to `batch_size` pending items, each by its own task type.
    ///
    /// Returns the number of items that completed. Item failures are recorded
    /// on the item and do not stop the batch.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "scheduler", op = "run_batch"))]
    pub async fn run_batch(&self, batch_size: usize) -> Result<usize> {
        let start = Instant::now();
        let items = self.library.queue.next_pending(batch_size).await?;
        let mut completed = 0;

        for item in items {
            match self.process_item(&item, false, None).await {
                Ok(ItemOutcome::Completed) => completed += 1,
                Ok(ItemOutcome::Failed(_)) => {}
                Err(Error::InvalidTransition { .. }) => {
                    debug!(queue_item_id = item.id, "Item no longer pending, skipping");
                }
                Err(e) => {
                    error!(queue_item_id = item.id, error = %e, "Queue bookkeeping failed");
                    return Err(e);
                }
            }
        }

        info!(
            processed = completed,
            duration_ms = start.elapsed().as_millis() as u64,
            "Batch finished"
        );
        Ok(completed)
    }

    /// [`run_batch`](Self::run_batch) with the configured batch size.
    pub async fn run_default_batch(&self) -> Result<usize> {
        self.run_batch(self.config.batch_size).await
    }

    /// Process pending items one at a time through the full sequence until the
    /// queue drains, `max_items` complete, or a stop is requested.
    ///
    /// Returns `Ok(0)` immediately if another continuous run is active.
    pub async fn run_continuous(&self, max_items: Option<usize>) -> Result<u64> {
        match self.progress.try_begin() {
            Some(guard) => self.run_with_guard(guard, max_items).await,
            None => {
                info!(
                    subsystem = "jobs",
                    component = "scheduler",
                    "Continuous run already active"
                );
                Ok(0)
            }
        }
    }

    /// Start a continuous run on a background task.
    ///
    /// Returns `None` without spawning if a run is already active.
    pub fn start_continuous(&self, max_items: Option<usize>) -> Option<JoinHandle<Result<u64>>> {
        let guard = self.progress.try_begin()?;
        let this = self.clone();
        Some(tokio::spawn(async move {
            this.run_with_guard(guard, max_items).await
        }))
    }

    #[instrument(skip(self, guard), fields(subsystem = "jobs", component = "scheduler", op = "run_continuous"))]
    async fn run_with_guard(&self, guard: RunGuard, max_items: Option<usize>) -> Result<u64> {
        let pending = self.library.queue.pending_count().await?.max(0) as u64;
        let total = match max_items {
            Some(max) => pending.min(max as u64),
            None => pending,
        };
        guard.set_total(total);
        self.emit(ProcessingEvent::RunStarted { total });
        info!(total, "Continuous run started");

        let result = self.continuous_loop(&guard, max_items).await;

        let processed = guard.processed();
        let stop_requested = guard.stop_requested();
        drop(guard);
        self.emit(ProcessingEvent::RunStopped {
            processed,
            stop_requested,
        });
        info!(processed, stop_requested, "Continuous run stopped");
        result.map(|_| processed)
    }

    async fn continuous_loop(&self, guard: &RunGuard, max_items: Option<usize>) -> Result<()> {
        loop {
            if guard.stop_requested() {
                info!("Stop requested");
                return Ok(());
            }
            if max_items.is_some_and(|max| guard.processed() >= max as u64) {
                return Ok(());
            }

            let Some(item) = self.library.queue.next_pending(1).await?.into_iter().next() else {
                return Ok(());
            };

            match self.process_item(&item, true, Some(guard)).await {
                Ok(ItemOutcome::Completed) => guard.record_completed(),
                Ok(ItemOutcome::Failed(_)) => guard.record_failed(),
                Err(Error::InvalidTransition { .. }) => {
                    debug!(queue_item_id = item.id, "Item claimed elsewhere, skipping");
                }
                Err(e) => {
                    error!(queue_item_id = item.id, error = %e, "Queue bookkeeping failed, stopping run");
                    return Err(e);
                }
            }
        }
    }

    /// Ask the active continuous run to stop after its current item.
    pub fn request_stop(&self) {
        info!(subsystem = "jobs", component = "scheduler", "Stop requested");
        self.progress.request_stop();
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    // =========================================================================
    // ITEMS
    // =========================================================================

    /// Claim and process one item.
    ///
    /// `Err` is returned only when the queue bookkeeping itself fails; any
    /// error during enrichment is recorded on the item as `Failed`.
    #[instrument(
        skip(self, item, guard),
        fields(queue_item_id = item.id, photo_id = item.photo_id, task_type = %item.task_type)
    )]
    async fn process_item(
        &self,
        item: &QueueItem,
        full_sequence: bool,
        guard: Option<&RunGuard>,
    ) -> Result<ItemOutcome> {
        let start = Instant::now();
        self.library.queue.mark_processing(item.id).await?;
        self.emit(ProcessingEvent::ItemStarted {
            queue_item_id: item.id,
            photo_id: item.photo_id,
            task_type: item.task_type,
        });

        let photo = match self.library.photos.get(item.photo_id).await {
            Ok(Some(photo)) => photo,
            Ok(None) => {
                warn!("Photo no longer exists, completing without work");
                self.library.queue.complete(item.id, None).await?;
                self.emit(ProcessingEvent::ItemCompleted {
                    queue_item_id: item.id,
                    photo_id: item.photo_id,
                });
                return Ok(ItemOutcome::Completed);
            }
            Err(e) => return self.fail_item(item, e, None).await,
        };

        if let Some(guard) = guard {
            guard.set_current_photo(&photo.file_name);
        }

        let steps: &[EnrichmentStep] = if full_sequence {
            &EnrichmentStep::ALL
        } else {
            item.task_type.steps()
        };
        let marks_processed = full_sequence || item.task_type.marks_processed();

        let mut update = photo.processing_update();
        for &step in steps {
            if let Some(guard) = guard {
                guard.set_current_step(step);
            }
            self.emit(ProcessingEvent::StepStarted {
                queue_item_id: item.id,
                photo_id: photo.id,
                step,
            });
            if let Err(e) = self.enricher.run_step(step, &photo, &mut update).await {
                return self.fail_item(item, e, Some(update)).await;
            }
        }

        if marks_processed {
            update.is_processed = true;
        }
        self.library.queue.complete(item.id, Some(&update)).await?;
        self.emit(ProcessingEvent::ItemCompleted {
            queue_item_id: item.id,
            photo_id: photo.id,
        });
        info!(
            duration_ms = start.elapsed().as_millis() as u64,
            "Item completed"
        );
        Ok(ItemOutcome::Completed)
    }

    async fn fail_item(
        &self,
        item: &QueueItem,
        cause: Error,
        update: Option<lumen_core::PhotoProcessingUpdate>,
    ) -> Result<ItemOutcome> {
        let message = cause.to_string();
        warn!(error = %message, "Item failed");
        self.library
            .queue
            .fail(item.id, &message, update.as_ref())
            .await?;
        self.emit(ProcessingEvent::ItemFailed {
            queue_item_id: item.id,
            photo_id: item.photo_id,
            error: message.clone(),
        });
        Ok(ItemOutcome::Failed(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_value(ProcessingEvent::StepStarted {
            queue_item_id: 1,
            photo_id: 2,
            step: EnrichmentStep::Faces,
        })
        .unwrap();
        assert_eq!(json["event"], "step_started");
        assert_eq!(json["step"], "faces");

        let json = serde_json::to_value(ProcessingEvent::RunStopped {
            processed: 3,
            stop_requested: true,
        })
        .unwrap();
        assert_eq!(json["event"], "run_stopped");
        assert_eq!(json["processed"], 3);
    }
}
