//! Embedding population migrations
//!
//! Each transition can be invoked on its own and accepts `dry_run`. A dry run
//! walks the same counting path and writes nothing. Outcomes are always
//! structured; dry-run messages start with `[DRY RUN]`.

use crate::config::IndexConfig;
use crate::storage::{ClearScope, GraphStore, IndexDefinition, IndexState, StoreError};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

const DRY_RUN_PREFIX: &str = "[DRY RUN]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MigrationOperation {
    Backup,
    ClearMismatched,
    ClearAll,
    RecreateIndex,
    Restore,
}

impl std::fmt::Display for MigrationOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MigrationOperation::Backup => "backup",
            MigrationOperation::ClearMismatched => "clear-mismatched",
            MigrationOperation::ClearAll => "clear-all",
            MigrationOperation::RecreateIndex => "recreate-index",
            MigrationOperation::Restore => "restore",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationOutcome {
    pub operation: MigrationOperation,
    pub dry_run: bool,
    pub affected: usize,
    pub message: String,
}

impl MigrationOutcome {
    fn new(
        operation: MigrationOperation,
        dry_run: bool,
        affected: usize,
        message: impl Into<String>,
    ) -> Self {
        let message = message.into();
        let message = if dry_run {
            format!("{} {}", DRY_RUN_PREFIX, message)
        } else {
            message
        };
        Self {
            operation,
            dry_run,
            affected,
            message,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ClearAllOptions {
    /// Clearing backs up first unless this is set
    pub skip_backup: bool,
}

/// How long to wait for a recreated index to come online
#[derive(Debug, Clone, Copy)]
pub struct SettleSettings {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for SettleSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl From<&IndexConfig> for SettleSettings {
    fn from(config: &IndexConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.settle_timeout_secs),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        }
    }
}

pub struct MigrationEngine {
    store: Arc<dyn GraphStore>,
    settle: SettleSettings,
}

impl MigrationEngine {
    pub fn new(store: Arc<dyn GraphStore>, settle: SettleSettings) -> Self {
        Self { store, settle }
    }

    /// Copy every present embedding into the shadow field. Re-running
    /// overwrites the shadow with the current state.
    pub fn backup(&self, dry_run: bool) -> Result<MigrationOutcome, StoreError> {
        let op = MigrationOperation::Backup;
        if dry_run {
            let count = self.store.count_with_embeddings()?;
            return Ok(MigrationOutcome::new(
                op,
                true,
                count,
                format!("Would back up {} embeddings", count),
            ));
        }

        let count = self.store.backup_embeddings()?;
        tracing::info!("Backed up {} embeddings", count);
        Ok(MigrationOutcome::new(
            op,
            false,
            count,
            format!("Backed up {} embeddings", count),
        ))
    }

    /// Remove embeddings whose length differs from `target_dimensions`
    pub fn clear_mismatched(
        &self,
        target_dimensions: usize,
        dry_run: bool,
    ) -> Result<MigrationOutcome, StoreError> {
        let op = MigrationOperation::ClearMismatched;
        let scope = ClearScope::Mismatched(target_dimensions);
        let count = self.store.count_clearable(&scope)?;

        if count == 0 {
            return Ok(MigrationOutcome::new(
                op,
                dry_run,
                0,
                format!(
                    "No embeddings differ from {} dimensions; nothing to clear",
                    target_dimensions
                ),
            ));
        }

        if dry_run {
            return Ok(MigrationOutcome::new(
                op,
                true,
                count,
                format!(
                    "Would clear {} embeddings that are not {} dimensions",
                    count, target_dimensions
                ),
            ));
        }

        let cleared = self.store.clear_embeddings(&scope)?;
        tracing::warn!(
            "Cleared {} embeddings that were not {} dimensions",
            cleared,
            target_dimensions
        );
        Ok(MigrationOutcome::new(
            op,
            false,
            cleared,
            format!(
                "Cleared {} embeddings that were not {} dimensions",
                cleared, target_dimensions
            ),
        ))
    }

    /// Remove every embedding, backing up first unless told not to
    pub fn clear_all(
        &self,
        options: ClearAllOptions,
        dry_run: bool,
    ) -> Result<MigrationOutcome, StoreError> {
        let op = MigrationOperation::ClearAll;
        let count = self.store.count_with_embeddings()?;
        let backup_note = if options.skip_backup {
            "without backup"
        } else {
            "after backing them up"
        };

        if dry_run {
            return Ok(MigrationOutcome::new(
                op,
                true,
                count,
                format!("Would clear {} embeddings {}", count, backup_note),
            ));
        }

        if options.skip_backup {
            tracing::warn!("Clearing all embeddings without a backup");
        } else {
            let backed_up = self.store.backup_embeddings()?;
            tracing::info!("Backed up {} embeddings before clearing", backed_up);
        }

        let cleared = self.store.clear_embeddings(&ClearScope::All)?;
        tracing::warn!("Cleared {} embeddings", cleared);
        Ok(MigrationOutcome::new(
            op,
            false,
            cleared,
            format!("Cleared {} embeddings {}", cleared, backup_note),
        ))
    }

    /// Drop the index if present, create it anew and wait until it is ONLINE
    pub async fn recreate_index(
        &self,
        definition: &IndexDefinition,
        dry_run: bool,
    ) -> Result<MigrationOutcome, StoreError> {
        let op = MigrationOperation::RecreateIndex;
        let existing = self.store.vector_index(&definition.name)?;
        let drop_note = match &existing {
            Some(info) => format!(
                "drop '{}' ({} dimensions, {})",
                definition.name, info.definition.dimensions, info.definition.similarity
            ),
            None => format!("'{}' does not exist yet", definition.name),
        };

        if dry_run {
            return Ok(MigrationOutcome::new(
                op,
                true,
                1,
                format!(
                    "Would {} and create it with {} dimensions ({})",
                    drop_note, definition.dimensions, definition.similarity
                ),
            ));
        }

        if existing.is_some() {
            self.store.drop_vector_index(&definition.name)?;
            tracing::info!("Dropped vector index '{}'", definition.name);
        }
        self.store.create_vector_index(definition)?;
        self.wait_until_online(&definition.name).await?;

        Ok(MigrationOutcome::new(
            op,
            false,
            1,
            format!(
                "Recreated index '{}' with {} dimensions ({})",
                definition.name, definition.dimensions, definition.similarity
            ),
        ))
    }

    async fn wait_until_online(&self, name: &str) -> Result<(), StoreError> {
        let deadline = tokio::time::Instant::now() + self.settle.timeout;

        loop {
            let info = self
                .store
                .vector_index(name)?
                .ok_or_else(|| StoreError::IndexNotFound(name.to_string()))?;

            match info.state {
                IndexState::Online => return Ok(()),
                IndexState::Failed => {
                    return Err(StoreError::IndexNotReady {
                        name: name.to_string(),
                        state: info.state,
                    })
                }
                IndexState::Populating => {
                    if tokio::time::Instant::now() >= deadline {
                        tracing::warn!(
                            "Index '{}' still {} after {:?}",
                            name,
                            info.state,
                            self.settle.timeout
                        );
                        return Err(StoreError::IndexNotReady {
                            name: name.to_string(),
                            state: info.state,
                        });
                    }
                    tracing::debug!("Waiting for index '{}' to come online", name);
                    tokio::time::sleep(self.settle.poll_interval).await;
                }
            }
        }
    }

    /// Copy the shadow back to the live field and delete the shadow
    pub fn restore(&self, dry_run: bool) -> Result<MigrationOutcome, StoreError> {
        let op = MigrationOperation::Restore;
        let count = self.store.count_backups()?;

        if count == 0 {
            return Ok(MigrationOutcome::new(
                op,
                dry_run,
                0,
                "No backup present; nothing to restore",
            ));
        }

        if dry_run {
            return Ok(MigrationOutcome::new(
                op,
                true,
                count,
                format!("Would restore {} embeddings from backup", count),
            ));
        }

        let restored = self.store.restore_embeddings()?;
        tracing::info!("Restored {} embeddings from backup", restored);
        Ok(MigrationOutcome::new(
            op,
            false,
            restored,
            format!("Restored {} embeddings from backup", restored),
        ))
    }

    /// Back up, clear mismatched embeddings, then recreate the index at the
    /// target size. Regenerating the cleared embeddings is left to a reindex.
    pub async fn migrate_to(
        &self,
        target_dimensions: usize,
        definition: &IndexDefinition,
        dry_run: bool,
    ) -> Result<Vec<MigrationOutcome>, StoreError> {
        if definition.dimensions != target_dimensions {
            return Err(StoreError::DimensionMismatch {
                expected: target_dimensions,
                actual: definition.dimensions,
            });
        }

        let backup = self.backup(dry_run)?;
        let clear = self.clear_mismatched(target_dimensions, dry_run)?;
        let recreate = self.recreate_index(definition, dry_run).await?;
        Ok(vec![backup, clear, recreate])
    }
}
