use graphvec::cli::{Cli, Commands, DiagAction, FilterArgs, MigrateAction, ReindexAction};
use graphvec::config::{Config, DimensionRegistry, ResolvedDimensions};
use graphvec::consistency::ConsistencyAnalyzer;
use graphvec::embedding::{provider_from_config, EmbeddingProvider, RetryPolicy};
use graphvec::error::{GraphvecError, Result};
use graphvec::migration::{ClearAllOptions, MigrationEngine, SettleSettings};
use graphvec::reindex::{ReindexEngine, ReindexFilter, ReindexOptions};
use graphvec::retrieval::{reranker_from_config, SearchOptions, VectorStore};
use graphvec::storage::{GraphStore, IndexDefinition, SqliteGraphStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    init_logging(cli.verbose);

    let config = load_config(cli.config)?;

    let rt = tokio::runtime::Runtime::new().map_err(|e| GraphvecError::Io {
        source: e,
        context: "Failed to create tokio runtime".to_string(),
    })?;

    match cli.command {
        Commands::Migrate { action } => rt.block_on(cmd_migrate(&config, action)),
        Commands::Reindex { action } => rt.block_on(cmd_reindex(&config, action)),
        Commands::Search {
            query,
            limit,
            no_hybrid,
            min_similarity,
            rerank,
            json,
        } => {
            let mut options = SearchOptions::from_config(&config.search).with_query_text(&query);
            if let Some(limit) = limit {
                options.limit = limit;
            }
            if let Some(min_similarity) = min_similarity {
                options.min_similarity = min_similarity;
            }
            if no_hybrid {
                options.hybrid_search = false;
            }
            rt.block_on(cmd_search(&config, &query, options, rerank, json))
        }
        Commands::Diag { action } => cmd_diag(&config, action),
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "graphvec=debug" } else { "graphvec=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt().with_env_filter(filter).with_target(false).init();
}

fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    if let Some(path) = config_path {
        return Config::load(&path);
    }

    let path = Config::default_path()?;
    if path.exists() {
        Config::load(&path)
    } else {
        tracing::warn!("Config file not found at {:?}, using defaults", path);
        Config::from_env()
    }
}

fn open_store(config: &Config) -> Result<Arc<SqliteGraphStore>> {
    let path = config.database_path()?;
    let store = SqliteGraphStore::open(&path)?;
    Ok(Arc::new(store))
}

fn resolve_dimensions(config: &Config) -> ResolvedDimensions {
    DimensionRegistry::from_config(config).resolve()
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(|e| GraphvecError::Json {
        source: e,
        context: "Failed to serialize output".to_string(),
    })?;
    println!("{}", json);
    Ok(())
}

async fn cmd_migrate(config: &Config, action: MigrateAction) -> Result<()> {
    let store: Arc<dyn GraphStore> = open_store(config)?;
    let dims = resolve_dimensions(config);
    let engine = MigrationEngine::new(store.clone(), SettleSettings::from(&config.index));

    match action {
        MigrateAction::Analyze { dimensions, json } => {
            let expected = dimensions.unwrap_or(dims.embedding_dimensions);
            let analyzer = ConsistencyAnalyzer::new(store);
            let summary = analyzer.analyze_embedding_state(expected)?;
            let index = analyzer.validate_index_definition(&config.index.name, expected)?;

            if json {
                return print_json(&serde_json::json!({
                    "summary": summary,
                    "index": index,
                }));
            }

            println!("Embedding state (expected {} dimensions)", expected);
            println!("=========================================");
            println!("  Status:             {}", summary.consistency_status);
            println!("  Entities:           {}", summary.total_entities);
            println!("  With embeddings:    {}", summary.entities_with_embeddings);
            println!("  Without embeddings: {}", summary.entities_without_embeddings);
            if !summary.dimension_counts.is_empty() {
                println!("\nDimensions:");
                for (size, count) in &summary.dimension_counts {
                    let marker = if *size == expected { "✓" } else { "✗" };
                    println!("  {} {:>5}: {}", marker, size, count);
                }
            }
            if !summary.mismatches.is_empty() {
                println!("\nNeeding embeddings:");
                for m in summary.mismatches.iter().take(10) {
                    println!(
                        "  {} ({}) - {} dims",
                        m.entity_name, m.entity_type, m.current_dimensions
                    );
                }
                if summary.mismatches.len() > 10 || summary.mismatches_truncated {
                    println!("  ... run 'graphvec migrate list-needing' for more");
                }
            }
            println!("\nIndex: {}", index.message);
        }
        MigrateAction::Backup { dry_run } => {
            println!("{}", engine.backup(dry_run)?.message);
        }
        MigrateAction::Clear {
            all,
            no_backup,
            dimensions,
            dry_run,
        } => {
            let outcome = if all {
                engine.clear_all(
                    ClearAllOptions {
                        skip_backup: no_backup,
                    },
                    dry_run,
                )?
            } else {
                engine.clear_mismatched(dimensions.unwrap_or(dims.embedding_dimensions), dry_run)?
            };
            println!("{}", outcome.message);
            if !dry_run && outcome.affected > 0 {
                println!("  Next: graphvec reindex run --only-missing");
            }
        }
        MigrateAction::RecreateIndex {
            dimensions,
            dry_run,
        } => {
            let definition = IndexDefinition::from_config(
                &config.index,
                dimensions.unwrap_or(dims.index_dimensions),
            );
            println!("{}", engine.recreate_index(&definition, dry_run).await?.message);
        }
        MigrateAction::Restore { dry_run } => {
            println!("{}", engine.restore(dry_run)?.message);
        }
        MigrateAction::ListNeeding {
            dimensions,
            limit,
            json,
        } => {
            let expected = dimensions.unwrap_or(dims.embedding_dimensions);
            let needing = ConsistencyAnalyzer::new(store)
                .list_entities_needing_embeddings(expected, limit)?;
            if json {
                return print_json(&needing);
            }
            if needing.is_empty() {
                println!("✓ All entities have {}-dimensional embeddings", expected);
            }
            for m in &needing {
                let state = if m.has_embedding {
                    format!("{} dims", m.current_dimensions)
                } else {
                    "missing".to_string()
                };
                println!("  {} ({}) - {}", m.entity_name, m.entity_type, state);
            }
        }
    }

    Ok(())
}

fn to_filter(args: FilterArgs, force: bool) -> ReindexFilter {
    ReindexFilter {
        entity_types: (!args.entity_types.is_empty()).then_some(args.entity_types),
        name_pattern: args.name_pattern,
        only_missing: args.only_missing,
        force,
        limit: args.limit,
        custom_query: args.query,
    }
}

async fn cmd_reindex(config: &Config, action: ReindexAction) -> Result<()> {
    let store: Arc<dyn GraphStore> = open_store(config)?;
    let dims = resolve_dimensions(config);

    match action {
        ReindexAction::Count { filter } => {
            // Counting never calls the provider
            let provider = graphvec::embedding::MockProvider::new(dims.embedding_dimensions);
            let engine = ReindexEngine::new(store, Arc::new(provider));
            let count = engine.count_matching(&to_filter(filter, false))?;
            println!("{} entities match", count);
        }
        ReindexAction::Delete { filter, dry_run } => {
            let provider = graphvec::embedding::MockProvider::new(dims.embedding_dimensions);
            let engine = ReindexEngine::new(store, Arc::new(provider));
            let outcome = engine.clear_matching(&to_filter(filter, false), dry_run)?;
            println!("{}", outcome.message);
        }
        ReindexAction::Run {
            filter,
            force,
            resume,
            batch_size,
            batch_delay_ms,
            dry_run,
        } => {
            let provider: Arc<dyn EmbeddingProvider> =
                Arc::new(provider_from_config(config, &dims)?);
            let retry = RetryPolicy::new(
                config.embedding.max_retries,
                Duration::from_millis(config.embedding.retry_base_delay_ms),
            );

            let mut options = ReindexOptions::from_config(&config.reindex);
            if let Some(batch_size) = batch_size {
                options.batch_size = batch_size;
            }
            if let Some(delay) = batch_delay_ms {
                options.batch_delay = Duration::from_millis(delay);
            }
            options.dry_run = dry_run;
            options.resume_after_clear = resume;

            let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
            let engine = ReindexEngine::new(store, provider)
                .with_retry_policy(retry)
                .with_progress(tx);

            let token = engine.cancellation_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupted, finishing current entity");
                    token.cancel();
                }
            });

            let printer = tokio::spawn(async move {
                while let Some(progress) = rx.recv().await {
                    let eta = progress
                        .estimated_time_remaining
                        .map(|d| format!(", ~{}s left", d.as_secs()))
                        .unwrap_or_default();
                    println!(
                        "  [{}/{}] {:>5.1}% batch {}/{} {}{}",
                        progress.processed,
                        progress.total,
                        progress.percentage,
                        progress.current_batch,
                        progress.total_batches,
                        progress.current_entity,
                        eta
                    );
                }
            });

            let result = engine.run(&to_filter(filter, force), &options).await?;
            drop(engine);
            let _ = printer.await;

            if result.dry_run {
                println!("[DRY RUN] Would reindex {} entities", result.total);
                return Ok(());
            }

            println!(
                "{} reindex in {:.1}s",
                if result.cancelled { "Cancelled" } else { "Finished" },
                result.duration.as_secs_f64()
            );
            println!("  Succeeded: {}", result.succeeded);
            println!("  Skipped:   {}", result.skipped);
            println!("  Failed:    {}", result.failed);
            for error in &result.errors {
                println!("    {}", GraphvecError::from(error.clone()));
            }
            if result.errors_truncated {
                println!("    ... more errors not shown");
            }
        }
    }

    Ok(())
}

async fn cmd_search(
    config: &Config,
    query: &str,
    options: SearchOptions,
    rerank: bool,
    json: bool,
) -> Result<()> {
    let store: Arc<dyn GraphStore> = open_store(config)?;
    let dims = resolve_dimensions(config);
    let provider = provider_from_config(config, &dims)?;

    let mut vector_store = VectorStore::new(store, &config.index.name, dims.index_dimensions)
        .with_provider(Arc::new(provider));

    let reranker = if rerank {
        let reranker = reranker_from_config(&config.rerank)?;
        if reranker.is_none() {
            tracing::warn!("Reranking requested but disabled in configuration");
        }
        reranker
    } else {
        None
    };

    let outcome = match reranker {
        Some(reranker) => {
            vector_store = vector_store.with_reranker(Arc::new(reranker));
            vector_store
                .search_with_rerank(query, &options, options.limit)
                .await?
        }
        None => vector_store.search_text(query, &options).await?,
    };

    if json {
        return print_json(&outcome);
    }

    if outcome.route.is_fallback() {
        println!("(fallback search: {:?})", outcome.route);
    }
    if outcome.results.is_empty() {
        println!("No results");
    }
    for (i, result) in outcome.results.iter().enumerate() {
        println!(
            "{:>3}. {} ({}) {:.4} [{}]",
            i + 1,
            result.id,
            result.metadata.entity_type,
            result.similarity,
            result.metadata.search_method
        );
    }

    Ok(())
}

fn cmd_diag(config: &Config, action: DiagAction) -> Result<()> {
    match action {
        DiagAction::Config => {
            let registry = DimensionRegistry::from_config(config);
            let dims = registry.resolve();
            let report = registry.validate();

            println!("Model:      {}", dims.model);
            println!(
                "Embedding:  {} dims ({:?})",
                dims.embedding_dimensions, dims.embedding_source
            );
            println!(
                "Index:      {} dims ({:?})",
                dims.index_dimensions, dims.index_source
            );
            println!("Database:   {}", config.database_path()?.display());
            for warning in &report.warnings {
                println!("⚠ {}", warning);
            }
            for error in &report.errors {
                println!("✗ {}", error);
            }
            if report.is_valid {
                println!("✓ Dimension configuration is consistent");
            }
        }
        DiagAction::Database => {
            let store = open_store(config)?;
            let stats = store.stats()?;
            println!("Entities:        {}", stats.entity_count);
            println!("With embeddings: {}", stats.embedded_count);
            println!("Backups:         {}", stats.backup_count);
            println!("Vector indexes:  {}", stats.index_count);
            match store.vector_index(&config.index.name)? {
                Some(info) => println!(
                    "Index '{}': {} ({} dims, {})",
                    info.definition.name,
                    info.state,
                    info.definition.dimensions,
                    info.definition.similarity
                ),
                None => println!("Index '{}': not created", config.index.name),
            }
        }
    }

    Ok(())
}
