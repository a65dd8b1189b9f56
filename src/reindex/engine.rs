/// Reindex batch engine
use super::{
    embedding_text, ReindexError, ReindexFilter, ReindexItemError, ReindexOptions,
    ReindexProgress, ReindexResult, MAX_RECORDED_ERRORS,
};
use crate::embedding::{EmbeddingModelInfo, EmbeddingProvider, RetryPolicy};
use crate::storage::{ClearScope, GraphStore, StoredEmbedding};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What happened to one entity
enum ItemOutcome {
    Embedded,
    Skipped(&'static str),
}

#[derive(Debug, Clone, Serialize)]
pub struct ClearMatchingOutcome {
    pub matched: usize,
    pub cleared: usize,
    pub dry_run: bool,
    pub message: String,
}

/// Regenerates embeddings for a filtered entity snapshot
///
/// One logical worker per run: entities are embedded one after another in
/// selection order. Two runs over overlapping entities are not coordinated.
pub struct ReindexEngine {
    store: Arc<dyn GraphStore>,
    provider: Arc<dyn EmbeddingProvider>,
    retry: RetryPolicy,
    progress: Option<UnboundedSender<ReindexProgress>>,
    cancel: CancellationToken,
}

impl ReindexEngine {
    pub fn new(store: Arc<dyn GraphStore>, provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            store,
            provider,
            retry: RetryPolicy::default(),
            progress: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Receive a `ReindexProgress` after every entity
    pub fn with_progress(mut self, sender: UnboundedSender<ReindexProgress>) -> Self {
        self.progress = Some(sender);
        self
    }

    /// Checked between entities and during batch delays
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Number of entities a run with this filter would select
    pub fn count_matching(&self, filter: &ReindexFilter) -> Result<usize, ReindexError> {
        let selection = filter.to_selection()?;
        Ok(self.store.select_entity_names(&selection)?.len())
    }

    /// Remove the embeddings of every entity the filter selects
    pub fn clear_matching(
        &self,
        filter: &ReindexFilter,
        dry_run: bool,
    ) -> Result<ClearMatchingOutcome, ReindexError> {
        let selection = filter.to_selection()?;
        let names = self.store.select_entity_names(&selection)?;
        let matched = names.len();
        let scope = ClearScope::Names(names);

        if dry_run {
            let clearable = self.store.count_clearable(&scope)?;
            return Ok(ClearMatchingOutcome {
                matched,
                cleared: clearable,
                dry_run: true,
                message: format!(
                    "[DRY RUN] Would clear embeddings of {} of {} matching entities",
                    clearable, matched
                ),
            });
        }

        let cleared = self.store.clear_embeddings(&scope)?;
        warn!("Cleared embeddings of {} entities", cleared);
        Ok(ClearMatchingOutcome {
            matched,
            cleared,
            dry_run: false,
            message: format!(
                "Cleared embeddings of {} of {} matching entities",
                cleared, matched
            ),
        })
    }

    /// Run a reindex. Only an invalid request or an unusable store fails the
    /// whole call; per-entity failures land in `errors`.
    pub async fn run(
        &self,
        filter: &ReindexFilter,
        options: &ReindexOptions,
    ) -> Result<ReindexResult, ReindexError> {
        options.validate()?;
        let selection = filter.to_selection()?;

        let start = Instant::now();
        let names = self.store.select_entity_names(&selection)?;
        let total = names.len();
        let total_batches = total.div_ceil(options.batch_size);

        let mut result = ReindexResult {
            total,
            processed: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            errors: Vec::new(),
            errors_truncated: false,
            duration: Duration::ZERO,
            dry_run: options.dry_run,
            cancelled: false,
        };

        if options.dry_run {
            info!(
                "[DRY RUN] Would reindex {} entities in {} batches",
                total, total_batches
            );
            result.duration = start.elapsed();
            return Ok(result);
        }

        let model = self.provider.model_info();
        let last_clear = if filter.force && options.resume_after_clear {
            self.store.last_clear_at()?
        } else {
            None
        };

        info!(
            total,
            total_batches,
            batch_size = options.batch_size,
            provider = self.provider.provider_name(),
            model = %model.name,
            "Starting reindex"
        );

        let mut time_spent = Duration::ZERO;

        'batches: for (batch_index, batch) in names.chunks(options.batch_size).enumerate() {
            for name in batch {
                if self.cancel.is_cancelled() {
                    result.cancelled = true;
                    break 'batches;
                }

                let item_start = Instant::now();
                match self
                    .process_entity(name, &model, filter.force, last_clear)
                    .await
                {
                    Ok(ItemOutcome::Embedded) => {
                        result.succeeded += 1;
                        debug!("Embedded '{}'", name);
                    }
                    Ok(ItemOutcome::Skipped(reason)) => {
                        result.skipped += 1;
                        debug!("Skipped '{}': {}", name, reason);
                    }
                    Err(error) => {
                        result.failed += 1;
                        warn!("Failed to embed '{}': {}", name, error);
                        if result.errors.len() < MAX_RECORDED_ERRORS {
                            result.errors.push(ReindexItemError {
                                entity_name: name.clone(),
                                error,
                            });
                        } else {
                            result.errors_truncated = true;
                        }
                    }
                }
                result.processed += 1;
                time_spent += item_start.elapsed();

                self.emit_progress(&result, name, batch_index + 1, total_batches, time_spent);
            }

            let is_last = batch_index + 1 == total_batches;
            if !is_last && !options.batch_delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(options.batch_delay) => {}
                    _ = self.cancel.cancelled() => {
                        result.cancelled = true;
                        break 'batches;
                    }
                }
            }
        }

        result.duration = start.elapsed();

        if result.cancelled {
            warn!(
                "Reindex cancelled after {} of {} entities",
                result.processed, total
            );
        }
        info!(
            succeeded = result.succeeded,
            failed = result.failed,
            skipped = result.skipped,
            duration_ms = result.duration.as_millis() as u64,
            "Reindex finished"
        );

        Ok(result)
    }

    async fn process_entity(
        &self,
        name: &str,
        model: &EmbeddingModelInfo,
        force: bool,
        last_clear: Option<DateTime<Utc>>,
    ) -> Result<ItemOutcome, String> {
        // Fresh read: the snapshot only holds names
        let entity = self
            .store
            .get_entity(name)
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("Entity not found: {}", name))?;

        if !force
            && entity.embedding_len() == model.dimensions
            && entity.embedding_model.as_deref() == Some(model.name.as_str())
        {
            return Ok(ItemOutcome::Skipped("embedding already current"));
        }

        if let (Some(cleared_at), Some(updated)) = (last_clear, entity.embedding_updated) {
            if updated >= cleared_at {
                return Ok(ItemOutcome::Skipped("re-embedded since last clear"));
            }
        }

        let text = embedding_text(&entity);
        let (vector, produced_by) = self
            .retry
            .embed_with_info(self.provider.as_ref(), &text)
            .await
            .map_err(|e| e.to_string())?;

        if vector.len() != model.dimensions {
            return Err(format!(
                "Dimension mismatch: expected {}, got {}",
                model.dimensions,
                vector.len()
            ));
        }

        self.store
            .set_embedding(
                name,
                &StoredEmbedding {
                    vector,
                    model: produced_by.name,
                    updated_at: Utc::now(),
                },
            )
            .map_err(|e| e.to_string())?;

        Ok(ItemOutcome::Embedded)
    }

    fn emit_progress(
        &self,
        result: &ReindexResult,
        current: &str,
        current_batch: usize,
        total_batches: usize,
        time_spent: Duration,
    ) {
        let Some(sender) = &self.progress else {
            return;
        };

        let remaining = result.total.saturating_sub(result.processed);
        let estimated_time_remaining = (result.processed > 0).then(|| {
            let average = time_spent.as_secs_f64() / result.processed as f64;
            Duration::from_secs_f64(average * remaining as f64)
        });
        let percentage = if result.total == 0 {
            100.0
        } else {
            result.processed as f64 * 100.0 / result.total as f64
        };

        // A dropped receiver only means nobody is watching
        let _ = sender.send(ReindexProgress {
            total: result.total,
            processed: result.processed,
            succeeded: result.succeeded,
            failed: result.failed,
            skipped: result.skipped,
            percentage,
            current_batch,
            total_batches,
            estimated_time_remaining,
            current_entity: current.to_string(),
        });
    }
}
