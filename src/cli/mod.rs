//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "graphvec",
    version,
    author = "neur0map",
    about = "Embedding consistency, reindexing and hybrid search for knowledge graphs",
    long_about = "Graphvec keeps entity embeddings in a knowledge graph consistent with the configured \
                  embedding model. It detects dimension drift, migrates and regenerates embeddings in \
                  batches, and answers vector, hybrid and reranked searches."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/graphvec/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Inspect and repair stored embedding dimensions
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },

    /// Regenerate embeddings in batches
    Reindex {
        #[command(subcommand)]
        action: ReindexAction,
    },

    /// Search entities by text
    Search {
        /// Search query text
        query: String,

        /// Maximum number of results to return
        #[arg(short, long)]
        limit: Option<usize>,

        /// Vector search only, no keyword fusion
        #[arg(long)]
        no_hybrid: bool,

        /// Minimum similarity for pure vector results
        #[arg(long)]
        min_similarity: Option<f32>,

        /// Rerank the results with the configured reranker
        #[arg(long)]
        rerank: bool,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Diagnostics
    Diag {
        #[command(subcommand)]
        action: DiagAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum MigrateAction {
    /// Report embedding dimensions and consistency status
    Analyze {
        /// Expected dimensions (defaults to the resolved embedding dimensions)
        #[arg(short, long)]
        dimensions: Option<usize>,

        /// Show report in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Copy current embeddings into the backup field
    Backup {
        #[arg(long)]
        dry_run: bool,
    },

    /// Clear embeddings
    Clear {
        /// Clear every embedding instead of only mismatched ones
        #[arg(long)]
        all: bool,

        /// Skip the backup that precedes clearing everything
        #[arg(long, requires = "all")]
        no_backup: bool,

        /// Target dimensions for mismatch detection
        #[arg(short, long)]
        dimensions: Option<usize>,

        #[arg(long)]
        dry_run: bool,
    },

    /// Drop and recreate the vector index
    RecreateIndex {
        /// Index dimensions (defaults to the resolved index dimensions)
        #[arg(short, long)]
        dimensions: Option<usize>,

        #[arg(long)]
        dry_run: bool,
    },

    /// Restore embeddings from the backup field
    Restore {
        #[arg(long)]
        dry_run: bool,
    },

    /// List entities whose embedding is missing or has the wrong size
    ListNeeding {
        #[arg(short, long)]
        dimensions: Option<usize>,

        #[arg(short, long, default_value = "50")]
        limit: usize,

        #[arg(long)]
        json: bool,
    },
}

/// Entity selection shared by the reindex commands
#[derive(clap::Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Restrict to these entity types (repeatable)
    #[arg(short = 't', long = "type", value_name = "TYPE")]
    pub entity_types: Vec<String>,

    /// Regex over entity names
    #[arg(short = 'p', long = "pattern")]
    pub name_pattern: Option<String>,

    /// Only entities without an embedding
    #[arg(long)]
    pub only_missing: bool,

    /// Read-only SELECT returning entity names
    #[arg(long)]
    pub query: Option<String>,

    /// Maximum number of entities
    #[arg(short, long)]
    pub limit: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum ReindexAction {
    /// Count entities a reindex would select
    Count {
        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Regenerate embeddings
    Run {
        #[command(flatten)]
        filter: FilterArgs,

        /// Regenerate even when the stored embedding already fits
        #[arg(short, long)]
        force: bool,

        /// With --force, skip entities re-embedded since the last clear
        #[arg(long)]
        resume: bool,

        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Pause between batches in milliseconds
        #[arg(long)]
        batch_delay_ms: Option<u64>,

        #[arg(long)]
        dry_run: bool,
    },

    /// Clear the embeddings of the selected entities
    Delete {
        #[command(flatten)]
        filter: FilterArgs,

        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum DiagAction {
    /// Show resolved configuration and dimension checks
    Config,

    /// Show database statistics and index state
    Database,
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_reindex_run() {
        let cli = Cli::try_parse_from([
            "graphvec", "reindex", "run", "-t", "person", "-t", "project", "--force", "-b", "25",
        ])
        .unwrap();
        match cli.command {
            Commands::Reindex {
                action:
                    ReindexAction::Run {
                        filter,
                        force,
                        batch_size,
                        ..
                    },
            } => {
                assert_eq!(filter.entity_types, vec!["person", "project"]);
                assert!(force);
                assert_eq!(batch_size, Some(25));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_negative_limit_is_rejected() {
        assert!(Cli::try_parse_from(["graphvec", "search", "rust", "--limit", "-3"]).is_err());
    }

    #[test]
    fn test_no_backup_requires_all() {
        assert!(Cli::try_parse_from(["graphvec", "migrate", "clear", "--no-backup"]).is_err());
        assert!(
            Cli::try_parse_from(["graphvec", "migrate", "clear", "--all", "--no-backup"]).is_ok()
        );
    }
}
