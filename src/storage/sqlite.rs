//! Embedded `SQLite` graph engine.
//!
//! Backs the full [`GraphStore`] interface with one database: graph tables
//! for memories/entities/edges, an FTS5 virtual table as the BM25 lexical
//! index, and brute-force cosine scans over stored embeddings as the vector
//! index (`entity_vectors`).
//!
//! # Concurrency Model
//!
//! A `Mutex<Connection>` serializes all access. WAL mode and a busy timeout
//! handle concurrent readers from other handles. The lexical index is
//! single-writer; the write pipeline's per-item drain sequences memory
//! writes against background extraction, and the mutex covers the rest.

// SQLite returns i64; counts and offsets are non-negative and small.
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]
// Closures are needed due to rusqlite's Error type.
#![allow(clippy::redundant_closure_for_method_calls)]

use crate::models::{
    Entity, EntityId, ExtractionStatus, Memory, MemoryId, NewMemory, Relationship,
    TraversalResult, content_fingerprint, merge_tags,
};
use crate::storage::traits::{EntityUpdate, GraphStore, NewEntity};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Stop words removed from lexical queries before FTS5 matching.
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "in", "is", "it",
    "of", "on", "or", "that", "the", "to", "was", "were", "with",
];

/// Helper to acquire the connection lock with poison recovery.
fn acquire_lock(mutex: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("graph sqlite mutex was poisoned, recovering");
            metrics::counter!("memforge_sqlite_mutex_poison_recovery_total").increment(1);
            poisoned.into_inner()
        },
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Builds an FTS5 `MATCH` expression from free text: quoted tokens joined
/// with OR, stop words removed. Returns `None` when nothing survives.
fn fts_match_expression(query: &str) -> Option<String> {
    let tokens: Vec<String> = query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty() && !STOP_WORDS.contains(t))
        .map(|t| format!("\"{t}\""))
        .collect();
    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" OR "))
    }
}

fn sql_error(operation: &'static str) -> impl FnOnce(rusqlite::Error) -> Error {
    move |e| Error::operation(operation, e)
}

/// Embedded `SQLite`-backed [`GraphStore`].
pub struct SqliteGraphStore {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl SqliteGraphStore {
    /// Opens (or creates) a store at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or the schema
    /// cannot be initialized.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        let conn = Connection::open(&db_path).map_err(sql_error("open_graph_store"))?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: Some(db_path),
        };
        store.initialize()?;
        Ok(store)
    }

    /// Creates an in-memory store, useful for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be initialized.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(sql_error("open_graph_store_memory"))?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: None,
        };
        store.initialize()?;
        Ok(store)
    }

    /// Returns the database path, if file-backed.
    #[must_use]
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Initializes the schema. Idempotent.
    fn initialize(&self) -> Result<()> {
        let conn = acquire_lock(&self.conn);

        let _ = conn.pragma_update(None, "journal_mode", "WAL");
        let _ = conn.pragma_update(None, "synchronous", "NORMAL");
        let _ = conn.pragma_update(None, "busy_timeout", "5000");
        let _ = conn.pragma_update(None, "foreign_keys", "ON");

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY
            );

            CREATE TABLE IF NOT EXISTS memories (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id),
                content TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                invalid_at INTEGER,
                resolved_at INTEGER,
                extraction_status TEXT NOT NULL DEFAULT 'unstarted',
                extraction_attempts INTEGER NOT NULL DEFAULT 0,
                extraction_error TEXT,
                tags TEXT NOT NULL DEFAULT '[]',
                app_name TEXT NOT NULL DEFAULT 'default',
                embedding BLOB
            );
            CREATE INDEX IF NOT EXISTS idx_memories_user ON memories(user_id, created_at DESC);
            CREATE INDEX IF NOT EXISTS idx_memories_hash ON memories(user_id, content_hash);

            CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
                content,
                memory_id UNINDEXED
            );

            CREATE TABLE IF NOT EXISTS entities (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id),
                name TEXT NOT NULL,
                normalized_name TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                metadata TEXT NOT NULL DEFAULT '{}',
                description_embedding BLOB,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE(user_id, normalized_name)
            );
            CREATE INDEX IF NOT EXISTS idx_entities_type ON entities(user_id, entity_type);

            CREATE TABLE IF NOT EXISTS relationships (
                user_id TEXT NOT NULL,
                source_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
                target_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
                rel_type TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (source_id, target_id, rel_type)
            );
            CREATE INDEX IF NOT EXISTS idx_relationships_source ON relationships(source_id);
            CREATE INDEX IF NOT EXISTS idx_relationships_target ON relationships(target_id);

            CREATE TABLE IF NOT EXISTS mentions (
                memory_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
                entity_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (memory_id, entity_id)
            );
            CREATE INDEX IF NOT EXISTS idx_mentions_entity ON mentions(entity_id);

            CREATE TABLE IF NOT EXISTS categories (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id),
                name TEXT NOT NULL,
                name_lower TEXT NOT NULL,
                UNIQUE(user_id, name_lower)
            );

            CREATE TABLE IF NOT EXISTS memory_categories (
                memory_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
                category_id TEXT NOT NULL REFERENCES categories(id) ON DELETE CASCADE,
                PRIMARY KEY (memory_id, category_id)
            );

            CREATE TABLE IF NOT EXISTS apps (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id),
                name TEXT NOT NULL,
                UNIQUE(user_id, name)
            );

            CREATE TABLE IF NOT EXISTS access_log (
                app_id TEXT NOT NULL REFERENCES apps(id) ON DELETE CASCADE,
                memory_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
                access_count INTEGER NOT NULL DEFAULT 0,
                last_accessed INTEGER NOT NULL,
                PRIMARY KEY (app_id, memory_id)
            );

            CREATE TABLE IF NOT EXISTS supersedes (
                new_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
                old_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (new_id, old_id)
            );

            CREATE TABLE IF NOT EXISTS config (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )
        .map_err(sql_error("initialize_schema"))?;

        Ok(())
    }

    fn ensure_user(conn: &Connection, user_id: &str) -> Result<()> {
        conn.execute("INSERT OR IGNORE INTO users (id) VALUES (?1)", params![user_id])
            .map_err(sql_error("ensure_user"))?;
        Ok(())
    }

    fn parse_memory_row(row: &Row<'_>) -> rusqlite::Result<Memory> {
        let tags_json: String = row.get("tags")?;
        let status: String = row.get("extraction_status")?;
        let embedding: Option<Vec<u8>> = row.get("embedding")?;
        Ok(Memory {
            id: MemoryId::new(row.get::<_, String>("id")?),
            user_id: row.get("user_id")?,
            content: row.get("content")?,
            created_at: from_ms(row.get("created_at")?),
            updated_at: from_ms(row.get("updated_at")?),
            invalid_at: row.get::<_, Option<i64>>("invalid_at")?.map(from_ms),
            resolved_at: row.get::<_, Option<i64>>("resolved_at")?.map(from_ms),
            extraction_status: ExtractionStatus::parse(&status).unwrap_or_default(),
            extraction_attempts: row.get::<_, i64>("extraction_attempts")? as u32,
            extraction_error: row.get("extraction_error")?,
            tags: serde_json::from_str(&tags_json).unwrap_or_default(),
            app_name: row.get("app_name")?,
            embedding: embedding.map(|b| blob_to_embedding(&b)),
        })
    }

    fn parse_entity_row(row: &Row<'_>) -> rusqlite::Result<Entity> {
        let metadata_json: String = row.get("metadata")?;
        let embedding: Option<Vec<u8>> = row.get("description_embedding")?;
        Ok(Entity {
            id: EntityId::new(row.get::<_, String>("id")?),
            user_id: row.get("user_id")?,
            name: row.get("name")?,
            normalized_name: row.get("normalized_name")?,
            entity_type: row.get("entity_type")?,
            description: row.get("description")?,
            metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
            description_embedding: embedding.map(|b| blob_to_embedding(&b)),
            created_at: from_ms(row.get("created_at")?),
            updated_at: from_ms(row.get("updated_at")?),
        })
    }

    fn parse_relationship_row(row: &Row<'_>) -> rusqlite::Result<Relationship> {
        let metadata_json: String = row.get("metadata")?;
        Ok(Relationship {
            source: EntityId::new(row.get::<_, String>("source_id")?),
            target: EntityId::new(row.get::<_, String>("target_id")?),
            rel_type: row.get("rel_type")?,
            description: row.get("description")?,
            metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
            created_at: from_ms(row.get("created_at")?),
            updated_at: from_ms(row.get("updated_at")?),
        })
    }

    /// Inserts a memory row and its lexical index entry.
    fn insert_memory(
        conn: &Connection,
        user_id: &str,
        memory: &NewMemory,
        now: i64,
    ) -> Result<Memory> {
        let id = MemoryId::generate();
        let tags = merge_tags(&memory.tags, &[]);
        let tags_json = serde_json::to_string(&tags)
            .map_err(|e| Error::operation("serialize_tags", e))?;
        let app_name = if memory.app_name.is_empty() {
            "default".to_string()
        } else {
            memory.app_name.clone()
        };

        conn.execute(
            "INSERT INTO memories
                (id, user_id, content, content_hash, created_at, updated_at,
                 tags, app_name, embedding)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?6, ?7, ?8)",
            params![
                id.as_str(),
                user_id,
                memory.content,
                content_fingerprint(&memory.content),
                now,
                tags_json,
                app_name,
                memory.embedding.as_deref().map(embedding_to_blob),
            ],
        )
        .map_err(sql_error("insert_memory"))?;

        conn.execute(
            "INSERT INTO memories_fts (content, memory_id) VALUES (?1, ?2)",
            params![memory.content, id.as_str()],
        )
        .map_err(sql_error("index_memory"))?;

        Ok(Memory {
            id,
            user_id: user_id.to_string(),
            content: memory.content.clone(),
            created_at: from_ms(now),
            updated_at: from_ms(now),
            invalid_at: None,
            resolved_at: None,
            extraction_status: ExtractionStatus::Unstarted,
            extraction_attempts: 0,
            extraction_error: None,
            tags,
            app_name,
            embedding: memory.embedding.clone(),
        })
    }

    /// Fetches a memory row for update, raising `NotFound` when absent.
    fn require_memory(conn: &Connection, user_id: &str, id: &MemoryId) -> Result<Memory> {
        conn.query_row(
            "SELECT * FROM memories WHERE id = ?1 AND user_id = ?2",
            params![id.as_str(), user_id],
            Self::parse_memory_row,
        )
        .optional()
        .map_err(sql_error("get_memory"))?
        .ok_or_else(|| Error::NotFound(format!("memory {id}")))
    }

    fn write_tags(conn: &Connection, id: &MemoryId, tags: &[String], now: i64) -> Result<()> {
        let tags_json =
            serde_json::to_string(tags).map_err(|e| Error::operation("serialize_tags", e))?;
        conn.execute(
            "UPDATE memories SET tags = ?1, updated_at = ?2 WHERE id = ?3",
            params![tags_json, now, id.as_str()],
        )
        .map_err(sql_error("write_tags"))?;
        Ok(())
    }
}

impl GraphStore for SqliteGraphStore {
    fn add_memory(&self, user_id: &str, memory: NewMemory) -> Result<Memory> {
        let conn = acquire_lock(&self.conn);
        Self::ensure_user(&conn, user_id)?;
        Self::insert_memory(&conn, user_id, &memory, now_ms())
    }

    fn get_memory(&self, user_id: &str, id: &MemoryId) -> Result<Option<Memory>> {
        let conn = acquire_lock(&self.conn);
        conn.query_row(
            "SELECT * FROM memories WHERE id = ?1 AND user_id = ?2",
            params![id.as_str(), user_id],
            Self::parse_memory_row,
        )
        .optional()
        .map_err(sql_error("get_memory"))
    }

    fn delete_memory(&self, user_id: &str, id: &MemoryId) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        Self::require_memory(&conn, user_id, id)?;
        conn.execute(
            "DELETE FROM memories_fts WHERE memory_id = ?1",
            params![id.as_str()],
        )
        .map_err(sql_error("deindex_memory"))?;
        conn.execute(
            "DELETE FROM memories WHERE id = ?1 AND user_id = ?2",
            params![id.as_str(), user_id],
        )
        .map_err(sql_error("delete_memory"))?;
        Ok(())
    }

    fn invalidate_memory(&self, user_id: &str, id: &MemoryId) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        Self::require_memory(&conn, user_id, id)?;
        conn.execute(
            "UPDATE memories SET invalid_at = ?1 WHERE id = ?2",
            params![now_ms(), id.as_str()],
        )
        .map_err(sql_error("invalidate_memory"))?;
        Ok(())
    }

    fn supersede_memory(
        &self,
        user_id: &str,
        old_id: &MemoryId,
        memory: NewMemory,
    ) -> Result<Memory> {
        let mut conn = acquire_lock(&self.conn);
        let tx = conn.transaction().map_err(sql_error("supersede_memory"))?;

        let old = tx
            .query_row(
                "SELECT * FROM memories WHERE id = ?1 AND user_id = ?2",
                params![old_id.as_str(), user_id],
                Self::parse_memory_row,
            )
            .optional()
            .map_err(sql_error("get_memory"))?
            .ok_or_else(|| Error::NotFound(format!("memory {old_id}")))?;

        let now = now_ms();
        let merged = NewMemory {
            tags: merge_tags(&old.tags, &memory.tags),
            ..memory
        };
        let created = Self::insert_memory(&tx, user_id, &merged, now)?;

        tx.execute(
            "INSERT INTO supersedes (new_id, old_id, created_at) VALUES (?1, ?2, ?3)",
            params![created.id.as_str(), old_id.as_str(), now],
        )
        .map_err(sql_error("link_supersedes"))?;
        tx.execute(
            "UPDATE memories SET invalid_at = ?1 WHERE id = ?2",
            params![now, old_id.as_str()],
        )
        .map_err(sql_error("tombstone_memory"))?;

        tx.commit().map_err(sql_error("supersede_memory"))?;
        Ok(created)
    }

    fn touch_memory(&self, user_id: &str, id: &MemoryId, tags: &[String]) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        let memory = Self::require_memory(&conn, user_id, id)?;
        let merged = merge_tags(&memory.tags, tags);
        Self::write_tags(&conn, id, &merged, now_ms())
    }

    fn resolve_memory(&self, user_id: &str, id: &MemoryId) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        let memory = Self::require_memory(&conn, user_id, id)?;
        let now = now_ms();
        let merged = merge_tags(&memory.tags, &["resolved".to_string()]);
        let tags_json =
            serde_json::to_string(&merged).map_err(|e| Error::operation("serialize_tags", e))?;
        conn.execute(
            "UPDATE memories SET resolved_at = ?1, tags = ?2, updated_at = ?1 WHERE id = ?3",
            params![now, tags_json, id.as_str()],
        )
        .map_err(sql_error("resolve_memory"))?;
        Ok(())
    }

    fn set_extraction_state(
        &self,
        user_id: &str,
        id: &MemoryId,
        status: ExtractionStatus,
        error: Option<&str>,
        increment_attempts: bool,
    ) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        let changed = conn
            .execute(
                "UPDATE memories SET
                    extraction_status = ?1,
                    extraction_error = ?2,
                    extraction_attempts = extraction_attempts + ?3
                 WHERE id = ?4 AND user_id = ?5",
                params![
                    status.as_str(),
                    error,
                    i64::from(increment_attempts),
                    id.as_str(),
                    user_id
                ],
            )
            .map_err(sql_error("set_extraction_state"))?;
        if changed == 0 {
            return Err(Error::NotFound(format!("memory {id}")));
        }
        Ok(())
    }

    fn recent_memories(
        &self,
        user_id: &str,
        limit: usize,
        exclude: Option<&MemoryId>,
    ) -> Result<Vec<Memory>> {
        let conn = acquire_lock(&self.conn);
        let excluded = exclude.map_or(String::new(), |id| id.as_str().to_string());
        let mut stmt = conn
            .prepare(
                "SELECT * FROM memories
                 WHERE user_id = ?1 AND invalid_at IS NULL AND id != ?2
                 ORDER BY created_at DESC, id DESC LIMIT ?3",
            )
            .map_err(sql_error("recent_memories"))?;
        let rows = stmt
            .query_map(params![user_id, excluded, limit as i64], Self::parse_memory_row)
            .map_err(sql_error("recent_memories"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(sql_error("recent_memories"))?;
        Ok(rows)
    }

    fn lexical_search(&self, user_id: &str, query: &str, limit: usize) -> Result<Vec<MemoryId>> {
        let Some(match_expr) = fts_match_expression(query) else {
            return Ok(Vec::new());
        };

        let conn = acquire_lock(&self.conn);
        let mut stmt = conn
            .prepare(
                "SELECT memories_fts.memory_id FROM memories_fts
                 JOIN memories m ON m.id = memories_fts.memory_id
                 WHERE memories_fts MATCH ?1
                   AND m.user_id = ?2 AND m.invalid_at IS NULL
                 ORDER BY bm25(memories_fts) LIMIT ?3",
            )
            .map_err(sql_error("lexical_search"))?;
        let ids = stmt
            .query_map(params![match_expr, user_id, limit as i64], |row| {
                row.get::<_, String>(0).map(MemoryId::new)
            })
            .map_err(sql_error("lexical_search"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(sql_error("lexical_search"))?;
        Ok(ids)
    }

    fn vector_search_memories(
        &self,
        user_id: &str,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<(MemoryId, f32)>> {
        let conn = acquire_lock(&self.conn);
        let mut stmt = conn
            .prepare(
                "SELECT id, embedding FROM memories
                 WHERE user_id = ?1 AND invalid_at IS NULL AND embedding IS NOT NULL",
            )
            .map_err(sql_error("vector_search_memories"))?;
        let candidates = stmt
            .query_map(params![user_id], |row| {
                let id: String = row.get(0)?;
                let blob: Vec<u8> = row.get(1)?;
                Ok((MemoryId::new(id), blob_to_embedding(&blob)))
            })
            .map_err(sql_error("vector_search_memories"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(sql_error("vector_search_memories"))?;

        let mut scored: Vec<(MemoryId, f32)> = candidates
            .into_iter()
            .map(|(id, vector)| {
                let score = crate::embedding::cosine_similarity(embedding, &vector);
                (id, score)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    fn browse_memories(
        &self,
        user_id: &str,
        offset: usize,
        limit: usize,
        category: Option<&str>,
        tag: Option<&str>,
    ) -> Result<(usize, Vec<Memory>)> {
        let conn = acquire_lock(&self.conn);

        // Blank filter values disable their clause so the statement binds a
        // fixed parameter set regardless of which filters are active.
        const FILTERS: &str = " AND (?2 = '' OR EXISTS (
                SELECT 1 FROM memory_categories mc
                JOIN categories c ON c.id = mc.category_id
                WHERE mc.memory_id = m.id AND c.name_lower = ?2))
            AND (?3 = '' OR EXISTS (
                SELECT 1 FROM json_each(m.tags)
                WHERE lower(json_each.value) = ?3))";

        let category_lower = category.map(|c| c.to_lowercase()).unwrap_or_default();
        let tag_lower = tag.map(|t| t.to_lowercase()).unwrap_or_default();

        let total: i64 = conn
            .query_row(
                &format!(
                    "SELECT COUNT(*) FROM memories m
                     WHERE m.user_id = ?1 AND m.invalid_at IS NULL{FILTERS}"
                ),
                params![user_id, category_lower, tag_lower],
                |row| row.get(0),
            )
            .map_err(sql_error("browse_memories"))?;

        let mut stmt = conn
            .prepare(&format!(
                "SELECT m.* FROM memories m
                 WHERE m.user_id = ?1 AND m.invalid_at IS NULL{FILTERS}
                 ORDER BY m.created_at DESC, m.id DESC LIMIT ?4 OFFSET ?5",
            ))
            .map_err(sql_error("browse_memories"))?;
        let rows = stmt
            .query_map(
                params![user_id, category_lower, tag_lower, limit as i64, offset as i64],
                Self::parse_memory_row,
            )
            .map_err(sql_error("browse_memories"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(sql_error("browse_memories"))?;

        Ok((total as usize, rows))
    }

    fn find_memory_by_hash(
        &self,
        user_id: &str,
        content_hash: &str,
    ) -> Result<Option<MemoryId>> {
        let conn = acquire_lock(&self.conn);
        conn.query_row(
            "SELECT id FROM memories
             WHERE user_id = ?1 AND content_hash = ?2 AND invalid_at IS NULL
             ORDER BY created_at DESC LIMIT 1",
            params![user_id, content_hash],
            |row| row.get::<_, String>(0).map(MemoryId::new),
        )
        .optional()
        .map_err(sql_error("find_memory_by_hash"))
    }

    fn assign_categories(
        &self,
        user_id: &str,
        memory_id: &MemoryId,
        names: &[String],
    ) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        let mut conn = acquire_lock(&self.conn);
        let tx = conn.transaction().map_err(sql_error("assign_categories"))?;
        Self::ensure_user(&tx, user_id)?;

        for name in names {
            let trimmed = name.trim();
            if trimmed.is_empty() {
                continue;
            }
            let lower = trimmed.to_lowercase();
            tx.execute(
                "INSERT OR IGNORE INTO categories (id, user_id, name, name_lower)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    format!("cat_{}", uuid::Uuid::new_v4().simple()),
                    user_id,
                    trimmed,
                    lower
                ],
            )
            .map_err(sql_error("merge_category"))?;
            let category_id: String = tx
                .query_row(
                    "SELECT id FROM categories WHERE user_id = ?1 AND name_lower = ?2",
                    params![user_id, lower],
                    |row| row.get(0),
                )
                .map_err(sql_error("merge_category"))?;
            tx.execute(
                "INSERT OR IGNORE INTO memory_categories (memory_id, category_id)
                 VALUES (?1, ?2)",
                params![memory_id.as_str(), category_id],
            )
            .map_err(sql_error("link_category"))?;
        }

        tx.commit().map_err(sql_error("assign_categories"))
    }

    fn categories_for_memory(&self, memory_id: &MemoryId) -> Result<Vec<String>> {
        let conn = acquire_lock(&self.conn);
        let mut stmt = conn
            .prepare(
                "SELECT c.name FROM categories c
                 JOIN memory_categories mc ON mc.category_id = c.id
                 WHERE mc.memory_id = ?1 ORDER BY c.name",
            )
            .map_err(sql_error("categories_for_memory"))?;
        let names = stmt
            .query_map(params![memory_id.as_str()], |row| row.get::<_, String>(0))
            .map_err(sql_error("categories_for_memory"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(sql_error("categories_for_memory"))?;
        Ok(names)
    }

    fn find_entity_by_normalized(
        &self,
        user_id: &str,
        normalized: &str,
    ) -> Result<Option<Entity>> {
        let conn = acquire_lock(&self.conn);
        conn.query_row(
            "SELECT * FROM entities WHERE user_id = ?1 AND normalized_name = ?2",
            params![user_id, normalized],
            Self::parse_entity_row,
        )
        .optional()
        .map_err(sql_error("find_entity_by_normalized"))
    }

    fn batch_find_by_normalized(
        &self,
        user_id: &str,
        normalized: &[String],
    ) -> Result<HashMap<String, Entity>> {
        if normalized.is_empty() {
            return Ok(HashMap::new());
        }
        let conn = acquire_lock(&self.conn);
        let placeholders = vec!["?"; normalized.len()].join(", ");
        let mut stmt = conn
            .prepare(&format!(
                "SELECT * FROM entities
                 WHERE user_id = ? AND normalized_name IN ({placeholders})"
            ))
            .map_err(sql_error("batch_find_by_normalized"))?;
        let params_iter =
            std::iter::once(user_id.to_string()).chain(normalized.iter().cloned());
        let entities = stmt
            .query_map(params_from_iter(params_iter), Self::parse_entity_row)
            .map_err(sql_error("batch_find_by_normalized"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(sql_error("batch_find_by_normalized"))?;
        Ok(entities
            .into_iter()
            .map(|e| (e.normalized_name.clone(), e))
            .collect())
    }

    fn entities_by_type(&self, user_id: &str, entity_type: &str) -> Result<Vec<Entity>> {
        let conn = acquire_lock(&self.conn);
        let mut stmt = conn
            .prepare("SELECT * FROM entities WHERE user_id = ?1 AND entity_type = ?2")
            .map_err(sql_error("entities_by_type"))?;
        let entities = stmt
            .query_map(params![user_id, entity_type], Self::parse_entity_row)
            .map_err(sql_error("entities_by_type"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(sql_error("entities_by_type"))?;
        Ok(entities)
    }

    fn entity_vector_search(
        &self,
        user_id: &str,
        embedding: &[f32],
        k: usize,
        threshold: f32,
    ) -> Result<Vec<(Entity, f32)>> {
        let conn = acquire_lock(&self.conn);
        let mut stmt = conn
            .prepare(
                "SELECT * FROM entities
                 WHERE user_id = ?1 AND description_embedding IS NOT NULL",
            )
            .map_err(sql_error("entity_vector_search"))?;
        let entities = stmt
            .query_map(params![user_id], Self::parse_entity_row)
            .map_err(sql_error("entity_vector_search"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(sql_error("entity_vector_search"))?;

        let mut scored: Vec<(Entity, f32)> = entities
            .into_iter()
            .filter_map(|entity| {
                let vector = entity.description_embedding.as_ref()?;
                let score = crate::embedding::cosine_similarity(embedding, vector);
                (score >= threshold).then_some((entity, score))
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    fn merge_entity(&self, user_id: &str, entity: NewEntity) -> Result<EntityId> {
        let mut conn = acquire_lock(&self.conn);
        let tx = conn.transaction().map_err(sql_error("merge_entity"))?;
        Self::ensure_user(&tx, user_id)?;

        let now = now_ms();
        let metadata_json = serde_json::to_string(&entity.metadata)
            .map_err(|e| Error::operation("serialize_metadata", e))?;
        tx.execute(
            "INSERT INTO entities
                (id, user_id, name, normalized_name, entity_type, description,
                 metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
             ON CONFLICT(user_id, normalized_name) DO NOTHING",
            params![
                EntityId::generate().as_str(),
                user_id,
                entity.name,
                entity.normalized_name,
                entity.entity_type,
                entity.description,
                metadata_json,
                now,
            ],
        )
        .map_err(sql_error("merge_entity"))?;

        // The row that won the merge is authoritative, not the id we minted.
        let winner: String = tx
            .query_row(
                "SELECT id FROM entities WHERE user_id = ?1 AND normalized_name = ?2",
                params![user_id, entity.normalized_name],
                |row| row.get(0),
            )
            .map_err(sql_error("merge_entity"))?;

        tx.commit().map_err(sql_error("merge_entity"))?;
        Ok(EntityId::new(winner))
    }

    fn get_entity(&self, user_id: &str, id: &EntityId) -> Result<Option<Entity>> {
        let conn = acquire_lock(&self.conn);
        conn.query_row(
            "SELECT * FROM entities WHERE id = ?1 AND user_id = ?2",
            params![id.as_str(), user_id],
            Self::parse_entity_row,
        )
        .optional()
        .map_err(sql_error("get_entity"))
    }

    fn update_entity(&self, user_id: &str, id: &EntityId, update: EntityUpdate) -> Result<()> {
        if update.is_empty() {
            return Ok(());
        }
        let mut conn = acquire_lock(&self.conn);
        let tx = conn.transaction().map_err(sql_error("update_entity"))?;

        let existing = tx
            .query_row(
                "SELECT * FROM entities WHERE id = ?1 AND user_id = ?2",
                params![id.as_str(), user_id],
                Self::parse_entity_row,
            )
            .optional()
            .map_err(sql_error("update_entity"))?
            .ok_or_else(|| Error::NotFound(format!("entity {id}")))?;

        let name = update.name.unwrap_or(existing.name);
        let entity_type = update.entity_type.unwrap_or(existing.entity_type);
        let description = update.description.unwrap_or(existing.description);
        let metadata = update.metadata.unwrap_or(existing.metadata);
        let metadata_json = serde_json::to_string(&metadata)
            .map_err(|e| Error::operation("serialize_metadata", e))?;

        tx.execute(
            "UPDATE entities SET
                name = ?1, normalized_name = ?2, entity_type = ?3,
                description = ?4, metadata = ?5, updated_at = ?6
             WHERE id = ?7",
            params![
                name,
                crate::models::normalized_name(&name),
                entity_type,
                description,
                metadata_json,
                now_ms(),
                id.as_str(),
            ],
        )
        .map_err(sql_error("update_entity"))?;

        tx.commit().map_err(sql_error("update_entity"))
    }

    fn set_entity_embedding(
        &self,
        user_id: &str,
        id: &EntityId,
        embedding: &[f32],
    ) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        conn.execute(
            "UPDATE entities SET description_embedding = ?1
             WHERE id = ?2 AND user_id = ?3",
            params![embedding_to_blob(embedding), id.as_str(), user_id],
        )
        .map_err(sql_error("set_entity_embedding"))?;
        Ok(())
    }

    fn delete_entity(&self, user_id: &str, id: &EntityId) -> Result<bool> {
        let conn = acquire_lock(&self.conn);
        // Foreign keys cascade over relationships and mentions.
        let deleted = conn
            .execute(
                "DELETE FROM entities WHERE id = ?1 AND user_id = ?2",
                params![id.as_str(), user_id],
            )
            .map_err(sql_error("delete_entity"))?;
        Ok(deleted > 0)
    }

    fn mention_count(&self, entity_id: &EntityId) -> Result<usize> {
        let conn = acquire_lock(&self.conn);
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM mentions WHERE entity_id = ?1",
                params![entity_id.as_str()],
                |row| row.get(0),
            )
            .map_err(sql_error("mention_count"))?;
        Ok(count as usize)
    }

    fn memories_mentioning(
        &self,
        user_id: &str,
        entity_id: &EntityId,
        limit: usize,
    ) -> Result<Vec<Memory>> {
        let conn = acquire_lock(&self.conn);
        let mut stmt = conn
            .prepare(
                "SELECT m.* FROM memories m
                 JOIN mentions mn ON mn.memory_id = m.id
                 WHERE mn.entity_id = ?1 AND m.user_id = ?2 AND m.invalid_at IS NULL
                 ORDER BY m.created_at DESC LIMIT ?3",
            )
            .map_err(sql_error("memories_mentioning"))?;
        let rows = stmt
            .query_map(
                params![entity_id.as_str(), user_id, limit as i64],
                Self::parse_memory_row,
            )
            .map_err(sql_error("memories_mentioning"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(sql_error("memories_mentioning"))?;
        Ok(rows)
    }

    fn entities_for_memory(&self, memory_id: &MemoryId) -> Result<Vec<Entity>> {
        let conn = acquire_lock(&self.conn);
        let mut stmt = conn
            .prepare(
                "SELECT e.* FROM entities e
                 JOIN mentions mn ON mn.entity_id = e.id
                 WHERE mn.memory_id = ?1 ORDER BY e.name",
            )
            .map_err(sql_error("entities_for_memory"))?;
        let entities = stmt
            .query_map(params![memory_id.as_str()], Self::parse_entity_row)
            .map_err(sql_error("entities_for_memory"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(sql_error("entities_for_memory"))?;
        Ok(entities)
    }

    fn link_mention(&self, memory_id: &MemoryId, entity_id: &EntityId) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        conn.execute(
            "INSERT OR IGNORE INTO mentions (memory_id, entity_id, created_at)
             VALUES (?1, ?2, ?3)",
            params![memory_id.as_str(), entity_id.as_str(), now_ms()],
        )
        .map_err(sql_error("link_mention"))?;
        Ok(())
    }

    fn upsert_relationship(&self, user_id: &str, relationship: &Relationship) -> Result<()> {
        let mut conn = acquire_lock(&self.conn);
        let tx = conn.transaction().map_err(sql_error("upsert_relationship"))?;

        let existing = tx
            .query_row(
                "SELECT * FROM relationships
                 WHERE source_id = ?1 AND target_id = ?2 AND rel_type = ?3 AND user_id = ?4",
                params![
                    relationship.source.as_str(),
                    relationship.target.as_str(),
                    relationship.rel_type,
                    user_id
                ],
                Self::parse_relationship_row,
            )
            .optional()
            .map_err(sql_error("upsert_relationship"))?;

        let now = now_ms();
        if let Some(existing) = existing {
            // Keep the longer description; shallow-union metadata with newer
            // keys winning.
            let description = if relationship.description.len() > existing.description.len() {
                relationship.description.clone()
            } else {
                existing.description
            };
            let mut metadata = existing.metadata;
            for (key, value) in &relationship.metadata {
                metadata.insert(key.clone(), value.clone());
            }
            let metadata_json = serde_json::to_string(&metadata)
                .map_err(|e| Error::operation("serialize_metadata", e))?;
            tx.execute(
                "UPDATE relationships SET description = ?1, metadata = ?2, updated_at = ?3
                 WHERE source_id = ?4 AND target_id = ?5 AND rel_type = ?6",
                params![
                    description,
                    metadata_json,
                    now,
                    relationship.source.as_str(),
                    relationship.target.as_str(),
                    relationship.rel_type,
                ],
            )
            .map_err(sql_error("upsert_relationship"))?;
        } else {
            let metadata_json = serde_json::to_string(&relationship.metadata)
                .map_err(|e| Error::operation("serialize_metadata", e))?;
            tx.execute(
                "INSERT INTO relationships
                    (user_id, source_id, target_id, rel_type, description, metadata,
                     created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![
                    user_id,
                    relationship.source.as_str(),
                    relationship.target.as_str(),
                    relationship.rel_type,
                    relationship.description,
                    metadata_json,
                    now,
                ],
            )
            .map_err(sql_error("upsert_relationship"))?;
        }

        tx.commit().map_err(sql_error("upsert_relationship"))
    }

    fn relationships_for_entity(
        &self,
        user_id: &str,
        entity_id: &EntityId,
    ) -> Result<Vec<Relationship>> {
        let conn = acquire_lock(&self.conn);
        let mut stmt = conn
            .prepare(
                "SELECT * FROM relationships
                 WHERE user_id = ?1 AND (source_id = ?2 OR target_id = ?2)
                 ORDER BY updated_at DESC",
            )
            .map_err(sql_error("relationships_for_entity"))?;
        let relationships = stmt
            .query_map(
                params![user_id, entity_id.as_str()],
                Self::parse_relationship_row,
            )
            .map_err(sql_error("relationships_for_entity"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(sql_error("relationships_for_entity"))?;
        Ok(relationships)
    }

    fn neighborhood(
        &self,
        user_id: &str,
        center: &EntityId,
        hops: u32,
    ) -> Result<TraversalResult> {
        self.traverse(user_id, center, hops, false)
    }

    fn subgraph(&self, user_id: &str, center: &EntityId, hops: u32) -> Result<TraversalResult> {
        self.traverse(user_id, center, hops, true)
    }

    fn record_access(&self, user_id: &str, app_name: &str, memory_id: &MemoryId) -> Result<()> {
        let mut conn = acquire_lock(&self.conn);
        let tx = conn.transaction().map_err(sql_error("record_access"))?;
        Self::ensure_user(&tx, user_id)?;

        tx.execute(
            "INSERT OR IGNORE INTO apps (id, user_id, name) VALUES (?1, ?2, ?3)",
            params![
                format!("app_{}", uuid::Uuid::new_v4().simple()),
                user_id,
                app_name
            ],
        )
        .map_err(sql_error("merge_app"))?;
        let app_id: String = tx
            .query_row(
                "SELECT id FROM apps WHERE user_id = ?1 AND name = ?2",
                params![user_id, app_name],
                |row| row.get(0),
            )
            .map_err(sql_error("merge_app"))?;

        tx.execute(
            "INSERT INTO access_log (app_id, memory_id, access_count, last_accessed)
             VALUES (?1, ?2, 1, ?3)
             ON CONFLICT(app_id, memory_id) DO UPDATE SET
                access_count = access_count + 1,
                last_accessed = excluded.last_accessed",
            params![app_id, memory_id.as_str(), now_ms()],
        )
        .map_err(sql_error("record_access"))?;

        tx.commit().map_err(sql_error("record_access"))
    }

    fn access_count(&self, user_id: &str, app_name: &str, memory_id: &MemoryId) -> Result<u64> {
        let conn = acquire_lock(&self.conn);
        let count: Option<i64> = conn
            .query_row(
                "SELECT al.access_count FROM access_log al
                 JOIN apps a ON a.id = al.app_id
                 WHERE a.user_id = ?1 AND a.name = ?2 AND al.memory_id = ?3",
                params![user_id, app_name, memory_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(sql_error("access_count"))?;
        Ok(count.unwrap_or(0) as u64)
    }

    fn load_config(&self) -> Result<Option<serde_json::Value>> {
        let conn = acquire_lock(&self.conn);
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM config WHERE key = 'memforge'",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(sql_error("load_config"))?;
        match raw {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| Error::operation("load_config", e)),
            None => Ok(None),
        }
    }

    fn store_config(&self, value: &serde_json::Value) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        let json =
            serde_json::to_string(value).map_err(|e| Error::operation("store_config", e))?;
        conn.execute(
            "INSERT INTO config (key, value) VALUES ('memforge', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![json],
        )
        .map_err(sql_error("store_config"))?;
        Ok(())
    }

    fn list_entities(&self, user_id: &str, limit: usize) -> Result<Vec<Entity>> {
        let conn = acquire_lock(&self.conn);
        let mut stmt = conn
            .prepare(
                "SELECT * FROM entities WHERE user_id = ?1
                 ORDER BY updated_at DESC LIMIT ?2",
            )
            .map_err(sql_error("list_entities"))?;
        let entities = stmt
            .query_map(params![user_id, limit as i64], Self::parse_entity_row)
            .map_err(sql_error("list_entities"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(sql_error("list_entities"))?;
        Ok(entities)
    }

    fn count_memories(&self, user_id: &str) -> Result<usize> {
        let conn = acquire_lock(&self.conn);
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM memories WHERE user_id = ?1 AND invalid_at IS NULL",
                params![user_id],
                |row| row.get(0),
            )
            .map_err(sql_error("count_memories"))?;
        Ok(count as usize)
    }
}

impl SqliteGraphStore {
    /// Breadth-first traversal over `RELATED_TO` edges.
    ///
    /// Bookkeeping edges never enter the relationships table, so the scan is
    /// inherently restricted to semantic paths. With `between_neighbors` the
    /// result is the ego-graph: edges among collected nodes are added after
    /// the frontier walk.
    fn traverse(
        &self,
        user_id: &str,
        center: &EntityId,
        hops: u32,
        between_neighbors: bool,
    ) -> Result<TraversalResult> {
        let incident = |entity_id: &EntityId| -> Result<Vec<Relationship>> {
            self.relationships_for_entity(user_id, entity_id)
        };

        let mut visited: HashSet<EntityId> = HashSet::from([center.clone()]);
        let mut frontier: Vec<EntityId> = vec![center.clone()];
        let mut edges: HashMap<(EntityId, EntityId, String), Relationship> = HashMap::new();

        for _ in 0..hops {
            let mut next = Vec::new();
            for node in &frontier {
                for relationship in incident(node)? {
                    let key = (
                        relationship.source.clone(),
                        relationship.target.clone(),
                        relationship.rel_type.clone(),
                    );
                    edges.entry(key).or_insert_with(|| relationship.clone());
                    for endpoint in [&relationship.source, &relationship.target] {
                        if visited.insert(endpoint.clone()) {
                            next.push(endpoint.clone());
                        }
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        // The frontier walk only collects edges incident to walked nodes; an
        // ego-graph additionally includes edges between the neighbors found
        // at the final hop.
        if between_neighbors {
            for node in visited.clone() {
                for relationship in incident(&node)? {
                    if visited.contains(&relationship.source)
                        && visited.contains(&relationship.target)
                    {
                        let key = (
                            relationship.source.clone(),
                            relationship.target.clone(),
                            relationship.rel_type.clone(),
                        );
                        edges.entry(key).or_insert(relationship);
                    }
                }
            }
        }

        let mut entities = Vec::with_capacity(visited.len());
        for id in &visited {
            if let Some(entity) = self.get_entity(user_id, id)? {
                entities.push(entity);
            }
        }
        entities.sort_by(|a, b| a.name.cmp(&b.name));

        let mut relationships: Vec<Relationship> = edges.into_values().collect();
        relationships.sort_by(|a, b| {
            (a.source.as_str(), a.target.as_str(), &a.rel_type)
                .cmp(&(b.source.as_str(), b.target.as_str(), &b.rel_type))
        });

        Ok(TraversalResult {
            entities,
            relationships,
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::models::normalized_name;

    fn store() -> SqliteGraphStore {
        SqliteGraphStore::in_memory().unwrap()
    }

    fn new_memory(content: &str) -> NewMemory {
        NewMemory {
            content: content.to_string(),
            tags: Vec::new(),
            app_name: "test".to_string(),
            embedding: None,
        }
    }

    fn new_entity(name: &str, entity_type: &str) -> NewEntity {
        NewEntity {
            name: name.to_string(),
            normalized_name: normalized_name(name),
            entity_type: entity_type.to_string(),
            description: format!("{name} description"),
            metadata: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_memory_roundtrip() {
        let store = store();
        let created = store.add_memory("u1", new_memory("Alice prefers TypeScript")).unwrap();
        let fetched = store.get_memory("u1", &created.id).unwrap().unwrap();
        assert_eq!(fetched.content, "Alice prefers TypeScript");
        assert_eq!(fetched.extraction_status, ExtractionStatus::Unstarted);
        assert!(fetched.created_at <= fetched.updated_at);
    }

    #[test]
    fn test_get_unknown_memory_is_none() {
        let store = store();
        assert!(store.get_memory("u1", &MemoryId::new("mem_missing")).unwrap().is_none());
    }

    #[test]
    fn test_delete_unknown_memory_raises() {
        let store = store();
        let result = store.delete_memory("u1", &MemoryId::new("mem_missing"));
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_user_scoping_blocks_cross_user_reads() {
        let store = store();
        let created = store.add_memory("u1", new_memory("private")).unwrap();
        assert!(store.get_memory("u2", &created.id).unwrap().is_none());
    }

    #[test]
    fn test_supersede_unions_tags_and_tombstones() {
        let store = store();
        let old = store
            .add_memory(
                "u1",
                NewMemory {
                    tags: vec!["audit-17".to_string()],
                    ..new_memory("Old preference")
                },
            )
            .unwrap();

        let new = store
            .supersede_memory(
                "u1",
                &old.id,
                NewMemory {
                    tags: vec!["audit-18".to_string()],
                    ..new_memory("Updated preference")
                },
            )
            .unwrap();

        assert_eq!(new.tags, vec!["audit-17".to_string(), "audit-18".to_string()]);
        let old = store.get_memory("u1", &old.id).unwrap().unwrap();
        assert!(old.is_invalid());

        // The replacement link exists exactly once.
        let conn = store.conn.lock().unwrap();
        let links: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM supersedes WHERE new_id = ?1 AND old_id = ?2",
                params![new.id.as_str(), old.id.as_str()],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(links, 1);
    }

    #[test]
    fn test_invalidated_memory_hidden_from_search_and_browse() {
        let store = store();
        let memory = store.add_memory("u1", new_memory("Rust ownership notes")).unwrap();
        assert_eq!(store.lexical_search("u1", "ownership", 10).unwrap().len(), 1);

        store.invalidate_memory("u1", &memory.id).unwrap();
        assert!(store.lexical_search("u1", "ownership", 10).unwrap().is_empty());
        let (total, rows) = store.browse_memories("u1", 0, 10, None, None).unwrap();
        assert_eq!(total, 0);
        assert!(rows.is_empty());
    }

    #[test]
    fn test_lexical_search_ranks_better_match_first() {
        let store = store();
        store.add_memory("u1", new_memory("database migration plan")).unwrap();
        let best = store
            .add_memory("u1", new_memory("postgres database migration migration"))
            .unwrap();
        let ids = store.lexical_search("u1", "database migration", 10).unwrap();
        assert_eq!(ids.first(), Some(&best.id));
    }

    #[test]
    fn test_vector_search_orders_by_cosine() {
        let store = store();
        let close = store
            .add_memory(
                "u1",
                NewMemory {
                    embedding: Some(vec![1.0, 0.0, 0.0]),
                    ..new_memory("close")
                },
            )
            .unwrap();
        store
            .add_memory(
                "u1",
                NewMemory {
                    embedding: Some(vec![0.0, 1.0, 0.0]),
                    ..new_memory("far")
                },
            )
            .unwrap();

        let hits = store.vector_search_memories("u1", &[1.0, 0.0, 0.0], 10).unwrap();
        assert_eq!(hits[0].0, close.id);
        assert!(hits[0].1 > hits[1].1);
    }

    #[test]
    fn test_merge_entity_converges() {
        let store = store();
        let first = store.merge_entity("u1", new_entity("Alice Chen", "PERSON")).unwrap();
        let second = store.merge_entity("u1", new_entity("alice-chen", "PERSON")).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_merge_entity_scoped_per_user() {
        let store = store();
        let u1 = store.merge_entity("u1", new_entity("Alice", "PERSON")).unwrap();
        let u2 = store.merge_entity("u2", new_entity("Alice", "PERSON")).unwrap();
        assert_ne!(u1, u2);
    }

    #[test]
    fn test_relationship_upsert_keeps_longer_description() {
        let store = store();
        let alice = store.merge_entity("u1", new_entity("Alice", "PERSON")).unwrap();
        let acme = store.merge_entity("u1", new_entity("Acme", "ORGANIZATION")).unwrap();

        let mut relationship = Relationship {
            source: alice.clone(),
            target: acme.clone(),
            rel_type: "WORKS_AT".to_string(),
            description: "works there".to_string(),
            metadata: serde_json::Map::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        store.upsert_relationship("u1", &relationship).unwrap();

        relationship.description = "short".to_string();
        store.upsert_relationship("u1", &relationship).unwrap();

        let edges = store.relationships_for_entity("u1", &alice).unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].description, "works there");
    }

    #[test]
    fn test_relationship_triple_unique() {
        let store = store();
        let alice = store.merge_entity("u1", new_entity("Alice", "PERSON")).unwrap();
        let acme = store.merge_entity("u1", new_entity("Acme", "ORGANIZATION")).unwrap();

        let relationship = Relationship {
            source: alice.clone(),
            target: acme,
            rel_type: "WORKS_AT".to_string(),
            description: "desc".to_string(),
            metadata: serde_json::Map::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        for _ in 0..3 {
            store.upsert_relationship("u1", &relationship).unwrap();
        }
        assert_eq!(store.relationships_for_entity("u1", &alice).unwrap().len(), 1);
    }

    #[test]
    fn test_mention_idempotent() {
        let store = store();
        let memory = store.add_memory("u1", new_memory("Alice ships code")).unwrap();
        let alice = store.merge_entity("u1", new_entity("Alice", "PERSON")).unwrap();

        store.link_mention(&memory.id, &alice).unwrap();
        store.link_mention(&memory.id, &alice).unwrap();
        assert_eq!(store.mention_count(&alice).unwrap(), 1);
    }

    #[test]
    fn test_delete_entity_cascades() {
        let store = store();
        let memory = store.add_memory("u1", new_memory("Alice at Acme")).unwrap();
        let alice = store.merge_entity("u1", new_entity("Alice", "PERSON")).unwrap();
        let acme = store.merge_entity("u1", new_entity("Acme", "ORGANIZATION")).unwrap();
        store.link_mention(&memory.id, &alice).unwrap();
        store
            .upsert_relationship(
                "u1",
                &Relationship {
                    source: alice.clone(),
                    target: acme.clone(),
                    rel_type: "WORKS_AT".to_string(),
                    description: String::new(),
                    metadata: serde_json::Map::new(),
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                },
            )
            .unwrap();

        assert!(store.delete_entity("u1", &alice).unwrap());
        assert!(!store.delete_entity("u1", &alice).unwrap());
        assert_eq!(store.relationships_for_entity("u1", &acme).unwrap().len(), 0);
        assert_eq!(store.mention_count(&alice).unwrap(), 0);
    }

    #[test]
    fn test_access_logging_increments() {
        let store = store();
        let memory = store.add_memory("u1", new_memory("accessed")).unwrap();
        store.record_access("u1", "claude", &memory.id).unwrap();
        store.record_access("u1", "claude", &memory.id).unwrap();
        assert_eq!(store.access_count("u1", "claude", &memory.id).unwrap(), 2);
        assert_eq!(store.access_count("u1", "other", &memory.id).unwrap(), 0);
    }

    #[test]
    fn test_categories_case_insensitive_merge() {
        let store = store();
        let m1 = store.add_memory("u1", new_memory("one")).unwrap();
        let m2 = store.add_memory("u1", new_memory("two")).unwrap();
        store.assign_categories("u1", &m1.id, &["Work".to_string()]).unwrap();
        store.assign_categories("u1", &m2.id, &["work".to_string()]).unwrap();

        let (total, _) = store.browse_memories("u1", 0, 10, Some("WORK"), None).unwrap();
        assert_eq!(total, 2);
        // Display name comes from the first merge.
        assert_eq!(store.categories_for_memory(&m2.id).unwrap(), vec!["Work".to_string()]);
    }

    #[test]
    fn test_browse_tag_filter_case_insensitive() {
        let store = store();
        store
            .add_memory(
                "u1",
                NewMemory {
                    tags: vec!["Audit-17".to_string()],
                    ..new_memory("tagged")
                },
            )
            .unwrap();
        store.add_memory("u1", new_memory("untagged")).unwrap();

        let (total, rows) = store.browse_memories("u1", 0, 10, None, Some("audit-17")).unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].content, "tagged");
    }

    #[test]
    fn test_browse_pagination() {
        let store = store();
        for i in 0..5 {
            store.add_memory("u1", new_memory(&format!("memory {i}"))).unwrap();
        }
        let (total, page) = store.browse_memories("u1", 2, 2, None, None).unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 2);
    }

    #[test]
    fn test_config_document_roundtrip() {
        let store = store();
        assert!(store.load_config().unwrap().is_none());
        let value = serde_json::json!({"dedup": {"enabled": true, "similarity_threshold": 0.8}});
        store.store_config(&value).unwrap();
        assert_eq!(store.load_config().unwrap(), Some(value));
    }

    #[test]
    fn test_extraction_state_attempts_monotonic() {
        let store = store();
        let memory = store.add_memory("u1", new_memory("extract me")).unwrap();
        store
            .set_extraction_state("u1", &memory.id, ExtractionStatus::Pending, None, true)
            .unwrap();
        store
            .set_extraction_state("u1", &memory.id, ExtractionStatus::Failed, Some("boom"), false)
            .unwrap();
        store
            .set_extraction_state("u1", &memory.id, ExtractionStatus::Pending, None, true)
            .unwrap();

        let memory = store.get_memory("u1", &memory.id).unwrap().unwrap();
        assert_eq!(memory.extraction_attempts, 2);
        assert_eq!(memory.extraction_status, ExtractionStatus::Pending);
    }

    #[test]
    fn test_subgraph_includes_edges_between_neighbors() {
        let store = store();
        let a = store.merge_entity("u1", new_entity("A", "CONCEPT")).unwrap();
        let b = store.merge_entity("u1", new_entity("B", "CONCEPT")).unwrap();
        let c = store.merge_entity("u1", new_entity("C", "CONCEPT")).unwrap();

        let edge = |source: &EntityId, target: &EntityId| Relationship {
            source: source.clone(),
            target: target.clone(),
            rel_type: "RELATES".to_string(),
            description: String::new(),
            metadata: serde_json::Map::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        store.upsert_relationship("u1", &edge(&a, &b)).unwrap();
        store.upsert_relationship("u1", &edge(&a, &c)).unwrap();
        store.upsert_relationship("u1", &edge(&b, &c)).unwrap();

        // One hop from a: the neighborhood sees only a's incident edges,
        // while the ego-graph also picks up the b-c edge between neighbors.
        let neighborhood = store.neighborhood("u1", &a, 1).unwrap();
        let subgraph = store.subgraph("u1", &a, 1).unwrap();
        assert_eq!(neighborhood.entities.len(), 3);
        assert_eq!(neighborhood.relationships.len(), 2);
        assert_eq!(subgraph.relationships.len(), 3);
        assert!(
            subgraph
                .relationships
                .iter()
                .any(|r| r.source == b && r.target == c)
        );
    }

    #[test]
    fn test_batch_find_by_normalized() {
        let store = store();
        store.merge_entity("u1", new_entity("Alice", "PERSON")).unwrap();
        store.merge_entity("u1", new_entity("Rust", "PROGRAMMING_LANGUAGE")).unwrap();

        let found = store
            .batch_find_by_normalized(
                "u1",
                &["alice".to_string(), "rust".to_string(), "missing".to_string()],
            )
            .unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.contains_key("alice"));
        assert!(found.contains_key("rust"));
    }

    #[test]
    fn test_entity_vector_search_threshold() {
        let store = store();
        let alice = store.merge_entity("u1", new_entity("Alice", "PERSON")).unwrap();
        let bob = store.merge_entity("u1", new_entity("Bob", "PERSON")).unwrap();
        store.set_entity_embedding("u1", &alice, &[1.0, 0.0]).unwrap();
        store.set_entity_embedding("u1", &bob, &[0.0, 1.0]).unwrap();

        let hits = store.entity_vector_search("u1", &[1.0, 0.0], 5, 0.88).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.id, alice);
    }

    #[test]
    fn test_find_memory_by_hash() {
        let store = store();
        let memory = store.add_memory("u1", new_memory("Exact duplicate")).unwrap();
        let hash = content_fingerprint("Exact duplicate");
        assert_eq!(store.find_memory_by_hash("u1", &hash).unwrap(), Some(memory.id.clone()));

        store.invalidate_memory("u1", &memory.id).unwrap();
        assert_eq!(store.find_memory_by_hash("u1", &hash).unwrap(), None);
    }
}
