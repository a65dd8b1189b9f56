//! SQLite-backed graph store with migrations
//!
//! Entities live in one table with their live embedding, provenance and the
//! backup shadow. Vector indexes are catalog rows; similarity queries are an
//! exact scan over the embeddings that honors the index's function and size.

use super::similarity;
use super::{
    contains_folded, ClearScope, Entity, EntitySample, EntitySelection, GraphStore, IndexDefinition, IndexInfo,
    IndexState, NewEntity, ScoredEntity, SimilarityFunction, StoreError, StoredEmbedding,
};
use ahash::AHashSet;
use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::functions::FunctionFlags;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

type PooledConn = r2d2::PooledConnection<SqliteConnectionManager>;

const ENTITY_COLUMNS: &str = "id, name, entity_type, observations, embedding, embedding_model, \
     embedding_dimensions, embedding_updated, created_at";

const RECENCY_ORDER: &str = "ORDER BY created_at DESC, rowid DESC";

/// Metadata key holding the time of the last bulk clear
pub const LAST_CLEAR_KEY: &str = "last_embedding_clear_at";

/// Graph store backed by a pooled SQLite database
pub struct SqliteGraphStore {
    pool: DbPool,
    build_state: IndexState,
}

impl SqliteGraphStore {
    /// Open (or create) the database file and bring the schema up to date
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA busy_timeout = 5000;
                ",
            )?;
            register_functions(conn)
        });

        let pool = Pool::builder()
            .max_size(8)
            .build(manager)
            .map_err(|e| StoreError::Pool(format!("Failed to create connection pool: {}", e)))?;

        let store = Self {
            pool,
            build_state: IndexState::Online,
        };
        store.migrate()?;

        tracing::debug!("Opened graph store at {:?}", db_path);
        Ok(store)
    }

    /// State newly created indexes start in. `Populating` models a backend
    /// that builds indexes in the background; something must later move the
    /// index on with `set_index_state`.
    pub fn with_index_build_state(mut self, state: IndexState) -> Self {
        self.build_state = state;
        self
    }

    pub fn get_conn(&self) -> Result<PooledConn, StoreError> {
        self.pool
            .get()
            .map_err(|e| StoreError::Pool(format!("Failed to get connection: {}", e)))
    }

    fn migrate(&self) -> Result<(), StoreError> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM _migrations",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::info!("Applying migration {}", version);
                conn.execute_batch(migration)?;
                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Force an index into a state. Used by tooling and tests that need to
    /// observe a non-ONLINE index.
    pub fn set_index_state(&self, name: &str, state: IndexState) -> Result<(), StoreError> {
        let conn = self.get_conn()?;
        let updated = conn.execute(
            "UPDATE vector_indexes SET state = ?1 WHERE name = ?2",
            params![state.to_string(), name],
        )?;
        if updated == 0 {
            return Err(StoreError::IndexNotFound(name.to_string()));
        }
        Ok(())
    }

    pub fn stats(&self) -> Result<DbStats, StoreError> {
        let conn = self.get_conn()?;

        let count = |sql: &str| -> Result<usize, StoreError> {
            let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n as usize)
        };

        Ok(DbStats {
            entity_count: count("SELECT COUNT(*) FROM entities")?,
            embedded_count: count("SELECT COUNT(*) FROM entities WHERE embedding IS NOT NULL")?,
            backup_count: count(
                "SELECT COUNT(*) FROM entities WHERE embedding_backup IS NOT NULL",
            )?,
            index_count: count("SELECT COUNT(*) FROM vector_indexes")?,
        })
    }

    fn query_entities(
        conn: &PooledConn,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Entity>, StoreError> {
        let mut stmt = conn.prepare(sql)?;
        let raws = stmt
            .query_map(params, RawEntity::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raws.into_iter().map(Entity::try_from).collect()
    }

    fn record_clear(conn: &PooledConn, at: DateTime<Utc>) -> Result<(), StoreError> {
        conn.execute(
            "INSERT INTO store_metadata (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![LAST_CLEAR_KEY, format_time(at)],
        )?;
        Ok(())
    }

    fn custom_selection(conn: &PooledConn, query: &str) -> Result<Vec<String>, StoreError> {
        let trimmed = query.trim().trim_end_matches(';').trim();
        let is_select = trimmed
            .get(..6)
            .map(|head| head.eq_ignore_ascii_case("select"))
            .unwrap_or(false);
        if !is_select || trimmed.contains(';') {
            return Err(StoreError::InvalidQuery(
                "custom query must be a single SELECT statement".to_string(),
            ));
        }

        let mut stmt = conn.prepare(trimmed)?;
        if !stmt.readonly() {
            return Err(StoreError::InvalidQuery(
                "custom query must be read-only".to_string(),
            ));
        }
        if stmt.column_count() == 0 {
            return Err(StoreError::InvalidQuery(
                "custom query must return entity names in its first column".to_string(),
            ));
        }

        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
    }
}

/// Database statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbStats {
    pub entity_count: usize,
    pub embedded_count: usize,
    pub backup_count: usize,
    pub index_count: usize,
}

impl GraphStore for SqliteGraphStore {
    fn insert_entity(&self, entity: &NewEntity) -> Result<Entity, StoreError> {
        let conn = self.get_conn()?;
        let id = Uuid::new_v4();
        let created_at = entity.created_at.unwrap_or_else(Utc::now);
        let observations = serde_json::to_string(&entity.observations)
            .map_err(|e| StoreError::Corrupt(format!("observations: {}", e)))?;

        let inserted = conn.execute(
            "INSERT INTO entities (id, name, entity_type, observations, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(name) DO NOTHING",
            params![
                id.to_string(),
                entity.name,
                entity.entity_type,
                observations,
                format_time(created_at)
            ],
        )?;
        if inserted == 0 {
            return Err(StoreError::EntityExists(entity.name.clone()));
        }

        Ok(Entity {
            id,
            name: entity.name.clone(),
            entity_type: entity.entity_type.clone(),
            observations: entity.observations.clone(),
            embedding: None,
            embedding_model: None,
            embedding_dimensions: None,
            embedding_updated: None,
            created_at,
        })
    }

    fn get_entity(&self, name: &str) -> Result<Option<Entity>, StoreError> {
        let conn = self.get_conn()?;
        let raw = conn
            .query_row(
                &format!("SELECT {} FROM entities WHERE name = ?1", ENTITY_COLUMNS),
                params![name],
                RawEntity::from_row,
            )
            .optional()?;
        raw.map(Entity::try_from).transpose()
    }

    fn get_entities(&self, names: &[String]) -> Result<Vec<Entity>, StoreError> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM entities WHERE name = ?1",
            ENTITY_COLUMNS
        ))?;

        let mut entities = Vec::with_capacity(names.len());
        for name in names {
            if let Some(raw) = stmt
                .query_row(params![name], RawEntity::from_row)
                .optional()?
            {
                entities.push(Entity::try_from(raw)?);
            }
        }
        Ok(entities)
    }

    fn count_entities(&self) -> Result<usize, StoreError> {
        let conn = self.get_conn()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM entities", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    fn count_with_embeddings(&self) -> Result<usize, StoreError> {
        let conn = self.get_conn()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM entities WHERE embedding IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    fn dimension_histogram(&self) -> Result<BTreeMap<usize, usize>, StoreError> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT embedding_dimensions, COUNT(*) FROM entities
             WHERE embedding IS NOT NULL
             GROUP BY embedding_dimensions",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?;

        let mut histogram = BTreeMap::new();
        for row in rows {
            let (dims, count) = row?;
            histogram.insert(dims as usize, count as usize);
        }
        Ok(histogram)
    }

    fn sample_mismatched(
        &self,
        expected: usize,
        limit: usize,
    ) -> Result<Vec<EntitySample>, StoreError> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT name, entity_type, embedding_dimensions FROM entities
             WHERE embedding IS NOT NULL AND embedding_dimensions != ?1
             {} LIMIT ?2",
            RECENCY_ORDER
        ))?;
        let samples = stmt
            .query_map(params![expected as i64, limit as i64], |row| {
                Ok(EntitySample {
                    name: row.get(0)?,
                    entity_type: row.get(1)?,
                    dimensions: row.get::<_, i64>(2)? as usize,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(samples)
    }

    fn count_mismatched(&self, expected: usize) -> Result<usize, StoreError> {
        let conn = self.get_conn()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM entities
             WHERE embedding IS NOT NULL AND embedding_dimensions != ?1",
            params![expected as i64],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    fn sample_missing(&self, limit: usize) -> Result<Vec<EntitySample>, StoreError> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT name, entity_type FROM entities WHERE embedding IS NULL {} LIMIT ?1",
            RECENCY_ORDER
        ))?;
        let samples = stmt
            .query_map(params![limit as i64], |row| {
                Ok(EntitySample {
                    name: row.get(0)?,
                    entity_type: row.get(1)?,
                    dimensions: 0,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(samples)
    }

    fn select_entity_names(&self, selection: &EntitySelection) -> Result<Vec<String>, StoreError> {
        let conn = self.get_conn()?;

        let candidates = if let Some(query) = &selection.custom_query {
            Self::custom_selection(&conn, query)?
        } else {
            let mut sql = String::from("SELECT name FROM entities WHERE 1 = 1");
            let mut args: Vec<String> = Vec::new();

            if let Some(types) = selection.entity_types.as_ref().filter(|t| !t.is_empty()) {
                let placeholders = vec!["?"; types.len()].join(", ");
                sql.push_str(&format!(" AND entity_type IN ({})", placeholders));
                args.extend(types.iter().cloned());
            }
            if selection.only_missing {
                sql.push_str(" AND embedding IS NULL");
            }
            sql.push(' ');
            sql.push_str(RECENCY_ORDER);

            let mut stmt = conn.prepare(&sql)?;
            let names = stmt
                .query_map(params_from_iter(args.iter()), |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            names
        };

        let mut seen = AHashSet::with_capacity(candidates.len());
        let limit = selection.limit.unwrap_or(usize::MAX);
        let names = candidates
            .into_iter()
            .filter(|name| {
                selection
                    .name_pattern
                    .as_ref()
                    .map_or(true, |re| re.is_match(name))
            })
            .filter(|name| seen.insert(name.clone()))
            .take(limit)
            .collect();
        Ok(names)
    }

    fn set_embedding(&self, name: &str, embedding: &StoredEmbedding) -> Result<(), StoreError> {
        let conn = self.get_conn()?;
        let updated = conn.execute(
            "UPDATE entities
             SET embedding = ?1, embedding_model = ?2, embedding_dimensions = ?3,
                 embedding_updated = ?4
             WHERE name = ?5",
            params![
                encode_vector(&embedding.vector),
                embedding.model,
                embedding.vector.len() as i64,
                format_time(embedding.updated_at),
                name
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::EntityNotFound(name.to_string()));
        }
        Ok(())
    }

    fn clear_embeddings(&self, scope: &ClearScope) -> Result<usize, StoreError> {
        const CLEAR: &str = "UPDATE entities
             SET embedding = NULL, embedding_model = NULL, embedding_dimensions = NULL,
                 embedding_updated = NULL";

        let mut conn = self.get_conn()?;
        let now = Utc::now();

        let cleared = match scope {
            ClearScope::All => {
                let n = conn.execute(&format!("{} WHERE embedding IS NOT NULL", CLEAR), [])?;
                Self::record_clear(&conn, now)?;
                n
            }
            ClearScope::Mismatched(expected) => {
                let n = conn.execute(
                    &format!(
                        "{} WHERE embedding IS NOT NULL AND embedding_dimensions != ?1",
                        CLEAR
                    ),
                    params![*expected as i64],
                )?;
                Self::record_clear(&conn, now)?;
                n
            }
            ClearScope::Names(names) => {
                let tx = conn.transaction()?;
                let mut n = 0;
                {
                    let mut stmt = tx.prepare(&format!(
                        "{} WHERE name = ?1 AND embedding IS NOT NULL",
                        CLEAR
                    ))?;
                    for name in names {
                        n += stmt.execute(params![name])?;
                    }
                }
                tx.commit()?;
                n
            }
        };

        Ok(cleared)
    }

    fn count_clearable(&self, scope: &ClearScope) -> Result<usize, StoreError> {
        match scope {
            ClearScope::All => self.count_with_embeddings(),
            ClearScope::Mismatched(expected) => self.count_mismatched(*expected),
            ClearScope::Names(names) => {
                let conn = self.get_conn()?;
                let mut stmt = conn.prepare(
                    "SELECT COUNT(*) FROM entities WHERE name = ?1 AND embedding IS NOT NULL",
                )?;
                let mut total = 0usize;
                for name in names {
                    let n: i64 = stmt.query_row(params![name], |row| row.get(0))?;
                    total += n as usize;
                }
                Ok(total)
            }
        }
    }

    fn backup_embeddings(&self) -> Result<usize, StoreError> {
        let conn = self.get_conn()?;
        let n = conn.execute(
            "UPDATE entities
             SET embedding_backup = embedding, embedding_backup_model = embedding_model,
                 embedding_backup_updated = embedding_updated, embedding_backup_at = ?1
             WHERE embedding IS NOT NULL",
            params![format_time(Utc::now())],
        )?;
        Ok(n)
    }

    fn restore_embeddings(&self) -> Result<usize, StoreError> {
        let conn = self.get_conn()?;
        let n = conn.execute(
            "UPDATE entities
             SET embedding = embedding_backup,
                 embedding_model = embedding_backup_model,
                 embedding_dimensions = length(embedding_backup) / 4,
                 embedding_updated = COALESCE(embedding_backup_updated, embedding_backup_at),
                 embedding_backup = NULL, embedding_backup_model = NULL,
                 embedding_backup_updated = NULL, embedding_backup_at = NULL
             WHERE embedding_backup IS NOT NULL",
            [],
        )?;
        Ok(n)
    }

    fn count_backups(&self) -> Result<usize, StoreError> {
        let conn = self.get_conn()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM entities WHERE embedding_backup IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    fn last_clear_at(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let conn = self.get_conn()?;
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM store_metadata WHERE key = ?1",
                params![LAST_CLEAR_KEY],
                |row| row.get(0),
            )
            .optional()?;
        value.as_deref().map(parse_time).transpose()
    }

    fn vector_index(&self, name: &str) -> Result<Option<IndexInfo>, StoreError> {
        let conn = self.get_conn()?;
        let row = conn
            .query_row(
                "SELECT name, label, property, dimensions, similarity, state
                 FROM vector_indexes WHERE name = ?1",
                params![name],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((name, label, property, dimensions, similarity, state)) = row else {
            return Ok(None);
        };

        let similarity = similarity
            .parse::<SimilarityFunction>()
            .map_err(StoreError::Corrupt)?;
        let state = state.parse::<IndexState>().map_err(StoreError::Corrupt)?;

        Ok(Some(IndexInfo {
            definition: IndexDefinition {
                name,
                label,
                property,
                dimensions: dimensions as usize,
                similarity,
            },
            state,
        }))
    }

    fn create_vector_index(&self, definition: &IndexDefinition) -> Result<(), StoreError> {
        if definition.dimensions == 0 {
            return Err(StoreError::InvalidIndex(
                "dimensions must be greater than 0".to_string(),
            ));
        }

        let conn = self.get_conn()?;
        let inserted = conn.execute(
            "INSERT INTO vector_indexes
                (name, label, property, dimensions, similarity, state, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(name) DO NOTHING",
            params![
                definition.name,
                definition.label,
                definition.property,
                definition.dimensions as i64,
                definition.similarity.to_string(),
                self.build_state.to_string(),
                format_time(Utc::now())
            ],
        )?;
        if inserted == 0 {
            return Err(StoreError::IndexExists(definition.name.clone()));
        }

        tracing::info!(
            index = %definition.name,
            dimensions = definition.dimensions,
            similarity = %definition.similarity,
            "Created vector index"
        );
        Ok(())
    }

    fn drop_vector_index(&self, name: &str) -> Result<bool, StoreError> {
        let conn = self.get_conn()?;
        let removed = conn.execute("DELETE FROM vector_indexes WHERE name = ?1", params![name])?;
        Ok(removed > 0)
    }

    fn nearest(
        &self,
        index_name: &str,
        k: usize,
        query: &[f32],
    ) -> Result<Vec<ScoredEntity>, StoreError> {
        let info = self
            .vector_index(index_name)?
            .ok_or_else(|| StoreError::IndexNotFound(index_name.to_string()))?;
        if info.state != IndexState::Online {
            return Err(StoreError::IndexNotReady {
                name: index_name.to_string(),
                state: info.state,
            });
        }

        let expected = info.definition.dimensions;
        if query.len() != expected {
            return Err(StoreError::DimensionMismatch {
                expected,
                actual: query.len(),
            });
        }

        let conn = self.get_conn()?;
        let entities = Self::query_entities(
            &conn,
            &format!(
                "SELECT {} FROM entities WHERE embedding IS NOT NULL {}",
                ENTITY_COLUMNS, RECENCY_ORDER
            ),
            [],
        )?;

        let mut scored = Vec::new();
        for entity in entities {
            let Some(vector) = entity.embedding.as_deref() else {
                continue;
            };
            if vector.len() != expected {
                return Err(StoreError::StoredDimensionMismatch {
                    entity: entity.name.clone(),
                    expected,
                    actual: vector.len(),
                });
            }
            if let Some(score) = similarity::score(info.definition.similarity, query, vector) {
                scored.push(ScoredEntity { entity, score });
            }
        }

        // Stable sort keeps recency order among equal scores
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);
        Ok(scored)
    }

    fn scan_keyword_matches(
        &self,
        text: &str,
        visit: &mut dyn FnMut(Entity),
    ) -> Result<(), StoreError> {
        let needle = text.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(());
        }

        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM entities WHERE keyword_hit(name, observations, ?1) {}",
            ENTITY_COLUMNS, RECENCY_ORDER
        ))?;
        let mut rows = stmt.query(params![needle])?;
        while let Some(row) = rows.next()? {
            visit(Entity::try_from(RawEntity::from_row(row)?)?);
        }
        Ok(())
    }

    fn recent_entities(&self, limit: usize) -> Result<Vec<Entity>, StoreError> {
        let conn = self.get_conn()?;
        Self::query_entities(
            &conn,
            &format!("SELECT {} FROM entities {} LIMIT ?1", ENTITY_COLUMNS, RECENCY_ORDER),
            params![limit as i64],
        )
    }
}

/// `keyword_hit(name, observations, needle)` matches with the same Unicode
/// lower-casing the keyword scorer applies. SQLite's `lower()` only folds ASCII.
fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "keyword_hit",
        3,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let name = ctx.get::<String>(0)?;
            let needle = ctx.get::<String>(2)?;
            if contains_folded(&name, &needle) {
                return Ok(true);
            }
            let observations: Vec<String> = serde_json::from_str(&ctx.get::<String>(1)?)
                .map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e)))?;
            Ok(observations.iter().any(|o| contains_folded(o, &needle)))
        },
    )
}

/// Column values as read, before decoding
struct RawEntity {
    id: String,
    name: String,
    entity_type: String,
    observations: String,
    embedding: Option<Vec<u8>>,
    embedding_model: Option<String>,
    embedding_dimensions: Option<i64>,
    embedding_updated: Option<String>,
    created_at: String,
}

impl RawEntity {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            entity_type: row.get(2)?,
            observations: row.get(3)?,
            embedding: row.get(4)?,
            embedding_model: row.get(5)?,
            embedding_dimensions: row.get(6)?,
            embedding_updated: row.get(7)?,
            created_at: row.get(8)?,
        })
    }
}

impl TryFrom<RawEntity> for Entity {
    type Error = StoreError;

    fn try_from(raw: RawEntity) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&raw.id)
            .map_err(|e| StoreError::Corrupt(format!("entity '{}' id: {}", raw.name, e)))?;
        let observations: Vec<String> = serde_json::from_str(&raw.observations).map_err(|e| {
            StoreError::Corrupt(format!("entity '{}' observations: {}", raw.name, e))
        })?;
        let embedding = raw.embedding.as_deref().map(decode_vector).transpose()?;

        Ok(Entity {
            id,
            name: raw.name,
            entity_type: raw.entity_type,
            observations,
            embedding,
            embedding_model: raw.embedding_model,
            embedding_dimensions: raw.embedding_dimensions.map(|d| d as usize),
            embedding_updated: raw.embedding_updated.as_deref().map(parse_time).transpose()?,
            created_at: parse_time(&raw.created_at)?,
        })
    }
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode_vector(bytes: &[u8]) -> Result<Vec<f32>, StoreError> {
    if bytes.len() % 4 != 0 {
        return Err(StoreError::Corrupt(format!(
            "embedding blob of {} bytes is not a whole number of f32 values",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

fn format_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp '{}': {}", value, e)))
}

/// Database migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: Initial schema
    r#"
    CREATE TABLE entities (
        id TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL UNIQUE,
        entity_type TEXT NOT NULL,
        observations TEXT NOT NULL DEFAULT '[]',  -- JSON array
        embedding BLOB,                           -- little-endian f32
        embedding_model TEXT,
        embedding_dimensions INTEGER,
        embedding_updated TEXT,
        embedding_backup BLOB,
        embedding_backup_model TEXT,
        embedding_backup_updated TEXT,
        embedding_backup_at TEXT,
        created_at TEXT NOT NULL
    );

    CREATE INDEX idx_entities_created_at ON entities(created_at);
    CREATE INDEX idx_entities_type ON entities(entity_type);
    CREATE INDEX idx_entities_dimensions ON entities(embedding_dimensions);

    CREATE TABLE vector_indexes (
        name TEXT PRIMARY KEY,
        label TEXT NOT NULL,
        property TEXT NOT NULL,
        dimensions INTEGER NOT NULL,
        similarity TEXT NOT NULL,
        state TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE TABLE store_metadata (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
    "#,
];
