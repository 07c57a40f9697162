//! SQLite storage backend
//!
//! One database file holds every table. Each trait method is one unit of
//! work: writes that touch more than one row run inside an IMMEDIATE
//! transaction, so several `SqliteStore` handles over the same file behave
//! like independent workers racing on the same uniqueness constraints.

use super::traits::{EntityFilter, EntityStore, IncrementOutcome, OpenStore, StorageError, StorageResult};
use crate::model::{
    AnalysisId, AnalysisResult, ArticleId, CanonicalEntity, EntityId, EntityMention, EntityMentionContext,
    EntityPair, EntityRelationship, EntityType, MentionContextId, MentionId, NewAnalysisResult, NewEntity,
    NewMention, RunId, RunStatus, Span, TrackingState,
};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const ENTITY_COLUMNS: &str = "id, canonical_name, normalized_name, entity_type, first_seen, last_seen";
const MENTION_COLUMNS: &str =
    "id, article_id, entity_id, surface_text, start_offset, end_offset, confidence, observed_at, run_id";
const RELATIONSHIP_COLUMNS: &str = "entity_a, entity_b, count, first_seen, last_updated";
const ANALYSIS_COLUMNS: &str = "id, result_type, entity_id, article_id, payload_json, supersedes, created_at";
const RUN_COLUMNS: &str = "run_id, article_id, status, log_json, mentions_json, error_json, created_at, updated_at";

type EntityRow = (i64, String, String, String, String, String);
type MentionRow = (i64, String, i64, String, i64, i64, f64, String, String);
type RelationshipRow = (i64, i64, i64, String, String);
type AnalysisRow = (i64, String, Option<i64>, Option<String>, String, Option<i64>, String);
type RunRow = (String, String, String, String, String, Option<String>, String, String);

/// SQLite-backed entity store
///
/// Thread-safe via internal mutex on the connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    fn init_schema(conn: &Connection) -> StorageResult<()> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            -- Enable WAL mode for concurrent reads during writes
            PRAGMA journal_mode = WAL;

            CREATE TABLE IF NOT EXISTS entities (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                canonical_name TEXT NOT NULL,
                normalized_name TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                first_seen TEXT NOT NULL,
                last_seen TEXT NOT NULL,
                UNIQUE (normalized_name, entity_type)
            );

            -- Alias index: every surface form with its comparison key
            CREATE TABLE IF NOT EXISTS entity_aliases (
                entity_id INTEGER NOT NULL,
                surface TEXT NOT NULL,
                normalized_key TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                PRIMARY KEY (entity_id, surface),
                FOREIGN KEY (entity_id) REFERENCES entities(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_aliases_key
                ON entity_aliases(entity_type, normalized_key);

            CREATE TABLE IF NOT EXISTS mentions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                article_id TEXT NOT NULL,
                entity_id INTEGER NOT NULL,
                surface_text TEXT NOT NULL,
                start_offset INTEGER NOT NULL,
                end_offset INTEGER NOT NULL,
                confidence REAL NOT NULL,
                observed_at TEXT NOT NULL,
                run_id TEXT NOT NULL,
                UNIQUE (article_id, start_offset, end_offset),
                FOREIGN KEY (entity_id) REFERENCES entities(id)
            );
            CREATE INDEX IF NOT EXISTS idx_mentions_entity ON mentions(entity_id);
            CREATE INDEX IF NOT EXISTS idx_mentions_observed ON mentions(observed_at);

            CREATE TABLE IF NOT EXISTS mention_contexts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                mention_id INTEGER NOT NULL UNIQUE,
                window_text TEXT NOT NULL,
                window_size INTEGER NOT NULL,
                FOREIGN KEY (mention_id) REFERENCES mentions(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS relationships (
                entity_a INTEGER NOT NULL,
                entity_b INTEGER NOT NULL,
                count INTEGER NOT NULL,
                first_seen TEXT NOT NULL,
                last_updated TEXT NOT NULL,
                PRIMARY KEY (entity_a, entity_b),
                CHECK (entity_a < entity_b),
                FOREIGN KEY (entity_a) REFERENCES entities(id),
                FOREIGN KEY (entity_b) REFERENCES entities(id)
            );
            CREATE INDEX IF NOT EXISTS idx_relationships_b ON relationships(entity_b);

            -- Which articles already contributed to a pair's count
            CREATE TABLE IF NOT EXISTS relationship_articles (
                entity_a INTEGER NOT NULL,
                entity_b INTEGER NOT NULL,
                article_id TEXT NOT NULL,
                counted_at TEXT NOT NULL,
                PRIMARY KEY (entity_a, entity_b, article_id),
                FOREIGN KEY (entity_a, entity_b) REFERENCES relationships(entity_a, entity_b)
            );

            CREATE TABLE IF NOT EXISTS analysis_results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                result_type TEXT NOT NULL,
                entity_id INTEGER,
                article_id TEXT,
                payload_json TEXT NOT NULL,
                supersedes INTEGER,
                created_at TEXT NOT NULL,
                FOREIGN KEY (supersedes) REFERENCES analysis_results(id)
            );
            CREATE INDEX IF NOT EXISTS idx_analysis_subject
                ON analysis_results(result_type, entity_id);
            CREATE INDEX IF NOT EXISTS idx_analysis_supersedes
                ON analysis_results(supersedes);

            CREATE TABLE IF NOT EXISTS tracking_runs (
                run_id TEXT PRIMARY KEY,
                article_id TEXT NOT NULL,
                status TEXT NOT NULL,
                log_json TEXT NOT NULL,
                mentions_json TEXT NOT NULL,
                error_json TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_runs_article ON tracking_runs(article_id, created_at);
            "#,
        )?;
        Ok(())
    }

    fn from_connection(conn: Connection) -> StorageResult<Self> {
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    fn read_entity_row(row: &Row<'_>) -> rusqlite::Result<EntityRow> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?))
    }

    fn read_mention_row(row: &Row<'_>) -> rusqlite::Result<MentionRow> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
            row.get(7)?,
            row.get(8)?,
        ))
    }

    fn read_relationship_row(row: &Row<'_>) -> rusqlite::Result<RelationshipRow> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
    }

    fn read_analysis_row(row: &Row<'_>) -> rusqlite::Result<AnalysisRow> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
        ))
    }

    fn read_run_row(row: &Row<'_>) -> rusqlite::Result<RunRow> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
            row.get(7)?,
        ))
    }

    /// Build an entity from its row plus its alias rows
    fn entity_from_row(conn: &Connection, row: EntityRow) -> StorageResult<CanonicalEntity> {
        let (id, canonical_name, normalized_name, entity_type, first_seen, last_seen) = row;
        let mut stmt = conn.prepare_cached("SELECT surface FROM entity_aliases WHERE entity_id = ?1")?;
        let aliases = stmt
            .query_map(params![id], |row| row.get::<_, String>(0))?
            .collect::<Result<BTreeSet<_>, _>>()?;

        Ok(CanonicalEntity {
            id: EntityId::from_raw(id),
            canonical_name,
            normalized_name,
            entity_type: parse_entity_type(&entity_type)?,
            first_seen: parse_ts(&first_seen)?,
            last_seen: parse_ts(&last_seen)?,
            aliases,
        })
    }

    fn mention_from_row(row: MentionRow) -> StorageResult<EntityMention> {
        let (id, article_id, entity_id, surface_text, start, end, confidence, observed_at, run_id) = row;
        Ok(EntityMention {
            id: MentionId::from_raw(id),
            article_id: ArticleId::new(article_id),
            entity_id: EntityId::from_raw(entity_id),
            surface_text,
            span: Span::new(start as usize, end as usize),
            confidence: confidence as f32,
            observed_at: parse_ts(&observed_at)?,
            run_id: parse_run_id(&run_id)?,
        })
    }

    fn relationship_from_row(row: RelationshipRow) -> StorageResult<EntityRelationship> {
        let (a, b, count, first_seen, last_updated) = row;
        let pair = EntityPair::new(EntityId::from_raw(a), EntityId::from_raw(b))
            .ok_or_else(|| StorageError::Corrupt(format!("self-relationship on entity {}", a)))?;
        Ok(EntityRelationship {
            pair,
            count: count as u64,
            first_seen: parse_ts(&first_seen)?,
            last_updated: parse_ts(&last_updated)?,
        })
    }

    fn analysis_from_row(row: AnalysisRow) -> StorageResult<AnalysisResult> {
        let (id, result_type, entity_id, article_id, payload_json, supersedes, created_at) = row;
        Ok(AnalysisResult {
            id: AnalysisId::from_raw(id),
            result_type,
            entity_id: entity_id.map(EntityId::from_raw),
            article_id: article_id.map(ArticleId::new),
            payload: serde_json::from_str(&payload_json)?,
            supersedes: supersedes.map(AnalysisId::from_raw),
            created_at: parse_ts(&created_at)?,
        })
    }

    fn run_from_row(row: RunRow) -> StorageResult<TrackingState> {
        let (run_id, article_id, status, log_json, mentions_json, error_json, created_at, updated_at) = row;
        Ok(TrackingState {
            run_id: parse_run_id(&run_id)?,
            article_id: ArticleId::new(article_id),
            status: status.parse::<RunStatus>().map_err(StorageError::Corrupt)?,
            log: serde_json::from_str(&log_json)?,
            mentions: serde_json::from_str(&mentions_json)?,
            error: error_json.map(|e| serde_json::from_str(&e)).transpose()?,
            created_at: parse_ts(&created_at)?,
            updated_at: parse_ts(&updated_at)?,
        })
    }

    fn query_mentions(conn: &Connection, sql: &str, param: &dyn rusqlite::ToSql) -> StorageResult<Vec<EntityMention>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([param], Self::read_mention_row)?;
        let mut mentions = Vec::new();
        for row in rows {
            mentions.push(Self::mention_from_row(row?)?);
        }
        Ok(mentions)
    }
}

/// Fixed-width UTC timestamps so that text comparison matches time order
fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::DateParse(format!("{}: {}", s, e)))
}

fn parse_entity_type(s: &str) -> StorageResult<EntityType> {
    s.parse::<EntityType>().map_err(StorageError::Corrupt)
}

fn parse_run_id(s: &str) -> StorageResult<RunId> {
    s.parse::<RunId>()
        .map_err(|e| StorageError::Corrupt(format!("run id {}: {}", s, e)))
}

impl OpenStore for SqliteStore {
    fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::from_connection(Connection::open(path)?)
    }

    fn open_in_memory() -> StorageResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }
}

impl EntityStore for SqliteStore {
    // === Canonical entities ===

    fn insert_entity(&self, entity: &NewEntity) -> StorageResult<EntityId> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let seen = ts(entity.seen_at);

        tx.execute(
            "INSERT INTO entities (canonical_name, normalized_name, entity_type, first_seen, last_seen)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![
                entity.canonical_name,
                entity.normalized_name,
                entity.entity_type.as_str(),
                seen
            ],
        )?;
        let id = tx.last_insert_rowid();

        tx.execute(
            "INSERT INTO entity_aliases (entity_id, surface, normalized_key, entity_type)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                id,
                entity.canonical_name,
                entity.normalized_name,
                entity.entity_type.as_str()
            ],
        )?;

        tx.commit()?;
        Ok(EntityId::from_raw(id))
    }

    fn load_entity(&self, id: EntityId) -> StorageResult<Option<CanonicalEntity>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM entities WHERE id = ?1", ENTITY_COLUMNS),
                params![id.value()],
                Self::read_entity_row,
            )
            .optional()?;

        match row {
            Some(row) => Ok(Some(Self::entity_from_row(&conn, row)?)),
            None => Ok(None),
        }
    }

    fn find_by_alias(&self, normalized_key: &str, entity_type: EntityType) -> StorageResult<Vec<EntityId>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT DISTINCT entity_id FROM entity_aliases
             WHERE entity_type = ?1 AND normalized_key = ?2
             ORDER BY entity_id",
        )?;
        let ids = stmt
            .query_map(params![entity_type.as_str(), normalized_key], |row| row.get::<_, i64>(0))?
            .map(|r| r.map(EntityId::from_raw))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn find_by_normalized_name(
        &self,
        normalized_name: &str,
        entity_type: EntityType,
    ) -> StorageResult<Option<EntityId>> {
        let conn = self.conn()?;
        let id: Option<i64> = conn
            .query_row(
                "SELECT id FROM entities WHERE normalized_name = ?1 AND entity_type = ?2",
                params![normalized_name, entity_type.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id.map(EntityId::from_raw))
    }

    fn canonical_keys_of_type(&self, entity_type: EntityType) -> StorageResult<Vec<(String, EntityId)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT normalized_name, id FROM entities WHERE entity_type = ?1 ORDER BY id",
        )?;
        let keys = stmt
            .query_map(params![entity_type.as_str()], |row| {
                Ok((row.get::<_, String>(0)?, EntityId::from_raw(row.get(1)?)))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    fn add_alias(
        &self,
        id: EntityId,
        surface: &str,
        normalized_key: &str,
        entity_type: EntityType,
    ) -> StorageResult<bool> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "INSERT INTO entity_aliases (entity_id, surface, normalized_key, entity_type)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(entity_id, surface) DO NOTHING",
            params![id.value(), surface, normalized_key, entity_type.as_str()],
        )?;
        Ok(rows > 0)
    }

    fn touch_entity(&self, id: EntityId, seen_at: DateTime<Utc>) -> StorageResult<()> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "UPDATE entities SET last_seen = MAX(last_seen, ?2), first_seen = MIN(first_seen, ?2)
             WHERE id = ?1",
            params![id.value(), ts(seen_at)],
        )?;
        if rows == 0 {
            return Err(StorageError::NotFound(format!("entity {}", id)));
        }
        Ok(())
    }

    fn list_entities(&self, filter: &EntityFilter) -> StorageResult<Vec<CanonicalEntity>> {
        let conn = self.conn()?;

        let mut sql = format!("SELECT {} FROM entities WHERE 1 = 1", ENTITY_COLUMNS);
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(entity_type) = filter.entity_type {
            sql.push_str(" AND entity_type = ?");
            params_vec.push(Box::new(entity_type.as_str()));
        }

        if let Some(since) = filter.seen_since {
            sql.push_str(" AND last_seen >= ?");
            params_vec.push(Box::new(ts(since)));
        }

        sql.push_str(" ORDER BY id");

        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let rows = {
            let mut stmt = conn.prepare(&sql)?;
            let params_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|b| b.as_ref()).collect();
            let rows = stmt
                .query_map(params_refs.as_slice(), Self::read_entity_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        rows.into_iter()
            .map(|row| Self::entity_from_row(&conn, row))
            .collect()
    }

    // === Mentions ===

    fn insert_mention(&self, mention: &NewMention) -> StorageResult<(EntityMention, bool)> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let rows = tx.execute(
            "INSERT INTO mentions (article_id, entity_id, surface_text, start_offset, end_offset,
                                   confidence, observed_at, run_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(article_id, start_offset, end_offset) DO NOTHING",
            params![
                mention.article_id.as_str(),
                mention.entity_id.value(),
                mention.surface_text,
                mention.span.start as i64,
                mention.span.end as i64,
                mention.confidence as f64,
                ts(mention.observed_at),
                mention.run_id.to_string(),
            ],
        )?;

        let row = tx.query_row(
            &format!(
                "SELECT {} FROM mentions WHERE article_id = ?1 AND start_offset = ?2 AND end_offset = ?3",
                MENTION_COLUMNS
            ),
            params![
                mention.article_id.as_str(),
                mention.span.start as i64,
                mention.span.end as i64
            ],
            Self::read_mention_row,
        )?;
        tx.commit()?;

        Ok((Self::mention_from_row(row)?, rows > 0))
    }

    fn find_mention(&self, article_id: &ArticleId, span: Span) -> StorageResult<Option<EntityMention>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM mentions WHERE article_id = ?1 AND start_offset = ?2 AND end_offset = ?3",
                    MENTION_COLUMNS
                ),
                params![article_id.as_str(), span.start as i64, span.end as i64],
                Self::read_mention_row,
            )
            .optional()?;
        row.map(Self::mention_from_row).transpose()
    }

    fn load_mention(&self, id: MentionId) -> StorageResult<Option<EntityMention>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM mentions WHERE id = ?1", MENTION_COLUMNS),
                params![id.value()],
                Self::read_mention_row,
            )
            .optional()?;
        row.map(Self::mention_from_row).transpose()
    }

    fn mentions_for_entity(&self, id: EntityId) -> StorageResult<Vec<EntityMention>> {
        let conn = self.conn()?;
        Self::query_mentions(
            &conn,
            &format!("SELECT {} FROM mentions WHERE entity_id = ?1 ORDER BY observed_at, id", MENTION_COLUMNS),
            &id.value(),
        )
    }

    fn mentions_for_article(&self, article_id: &ArticleId) -> StorageResult<Vec<EntityMention>> {
        let conn = self.conn()?;
        Self::query_mentions(
            &conn,
            &format!("SELECT {} FROM mentions WHERE article_id = ?1 ORDER BY start_offset", MENTION_COLUMNS),
            &article_id.as_str(),
        )
    }

    fn mention_times(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> StorageResult<Vec<(EntityId, DateTime<Utc>)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT entity_id, observed_at FROM mentions
             WHERE observed_at >= ?1 AND observed_at < ?2
             ORDER BY entity_id, observed_at",
        )?;
        let rows = stmt
            .query_map(params![ts(since), ts(until)], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, at)| Ok((EntityId::from_raw(id), parse_ts(&at)?)))
            .collect()
    }

    fn delete_mention(&self, id: MentionId) -> StorageResult<bool> {
        let conn = self.conn()?;
        let rows = conn.execute("DELETE FROM mentions WHERE id = ?1", params![id.value()])?;
        Ok(rows > 0)
    }

    // === Mention contexts ===

    fn insert_context(
        &self,
        mention_id: MentionId,
        window_text: &str,
        window_size: usize,
    ) -> StorageResult<MentionContextId> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO mention_contexts (mention_id, window_text, window_size)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(mention_id) DO NOTHING",
            params![mention_id.value(), window_text, window_size as i64],
        )?;
        let id: i64 = tx.query_row(
            "SELECT id FROM mention_contexts WHERE mention_id = ?1",
            params![mention_id.value()],
            |row| row.get(0),
        )?;
        tx.commit()?;
        Ok(MentionContextId::from_raw(id))
    }

    fn context_for_mention(&self, mention_id: MentionId) -> StorageResult<Option<EntityMentionContext>> {
        let conn = self.conn()?;
        let row: Option<(i64, String, i64)> = conn
            .query_row(
                "SELECT id, window_text, window_size FROM mention_contexts WHERE mention_id = ?1",
                params![mention_id.value()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        Ok(row.map(|(id, window_text, window_size)| EntityMentionContext {
            id: MentionContextId::from_raw(id),
            mention_id,
            window_text,
            window_size: window_size as usize,
        }))
    }

    // === Relationships ===

    fn increment_relationship(
        &self,
        pair: EntityPair,
        article_id: &ArticleId,
        at: DateTime<Utc>,
    ) -> StorageResult<IncrementOutcome> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let (a, b) = (pair.a().value(), pair.b().value());

        let counted: bool = tx.query_row(
            "SELECT COUNT(*) > 0 FROM relationship_articles
             WHERE entity_a = ?1 AND entity_b = ?2 AND article_id = ?3",
            params![a, b, article_id.as_str()],
            |row| row.get(0),
        )?;
        if counted {
            return Ok(IncrementOutcome::AlreadyCounted);
        }

        let rows = tx.execute(
            "UPDATE relationships SET count = count + 1, last_updated = MAX(last_updated, ?3)
             WHERE entity_a = ?1 AND entity_b = ?2",
            params![a, b, ts(at)],
        )?;
        if rows == 0 {
            return Ok(IncrementOutcome::Missing);
        }

        tx.execute(
            "INSERT INTO relationship_articles (entity_a, entity_b, article_id, counted_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![a, b, article_id.as_str(), ts(at)],
        )?;
        tx.commit()?;
        Ok(IncrementOutcome::Incremented)
    }

    fn insert_relationship(&self, pair: EntityPair, article_id: &ArticleId, at: DateTime<Utc>) -> StorageResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let (a, b) = (pair.a().value(), pair.b().value());

        tx.execute(
            "INSERT INTO relationships (entity_a, entity_b, count, first_seen, last_updated)
             VALUES (?1, ?2, 1, ?3, ?3)",
            params![a, b, ts(at)],
        )?;
        tx.execute(
            "INSERT INTO relationship_articles (entity_a, entity_b, article_id, counted_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![a, b, article_id.as_str(), ts(at)],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn load_relationship(&self, pair: EntityPair) -> StorageResult<Option<EntityRelationship>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM relationships WHERE entity_a = ?1 AND entity_b = ?2",
                    RELATIONSHIP_COLUMNS
                ),
                params![pair.a().value(), pair.b().value()],
                Self::read_relationship_row,
            )
            .optional()?;
        row.map(Self::relationship_from_row).transpose()
    }

    fn relationships_for(&self, id: EntityId) -> StorageResult<Vec<EntityRelationship>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM relationships WHERE entity_a = ?1 OR entity_b = ?1
             ORDER BY count DESC, entity_a, entity_b",
            RELATIONSHIP_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![id.value()], Self::read_relationship_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(Self::relationship_from_row).collect()
    }

    fn top_relationships(&self, limit: usize) -> StorageResult<Vec<EntityRelationship>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM relationships ORDER BY count DESC, entity_a, entity_b LIMIT ?1",
            RELATIONSHIP_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![limit as i64], Self::read_relationship_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(Self::relationship_from_row).collect()
    }

    // === Analysis results ===

    fn append_analysis(&self, result: &NewAnalysisResult) -> StorageResult<AnalysisResult> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let entity_id = result.entity_id.map(|id| id.value());
        let article_id = result.article_id.as_ref().map(|id| id.as_str().to_string());

        let supersedes: Option<i64> = tx
            .query_row(
                "SELECT id FROM analysis_results
                 WHERE result_type = ?1 AND entity_id IS ?2 AND article_id IS ?3
                 ORDER BY id DESC LIMIT 1",
                params![result.result_type, entity_id, article_id],
                |row| row.get(0),
            )
            .optional()?;

        tx.execute(
            "INSERT INTO analysis_results (result_type, entity_id, article_id, payload_json, supersedes, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                result.result_type,
                entity_id,
                article_id,
                serde_json::to_string(&result.payload)?,
                supersedes,
                ts(result.created_at),
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(AnalysisResult {
            id: AnalysisId::from_raw(id),
            result_type: result.result_type.clone(),
            entity_id: result.entity_id,
            article_id: result.article_id.clone(),
            payload: result.payload.clone(),
            supersedes: supersedes.map(AnalysisId::from_raw),
            created_at: result.created_at,
        })
    }

    fn latest_analysis(&self, result_type: &str, entity_id: EntityId) -> StorageResult<Option<AnalysisResult>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM analysis_results WHERE result_type = ?1 AND entity_id = ?2
                     ORDER BY id DESC LIMIT 1",
                    ANALYSIS_COLUMNS
                ),
                params![result_type, entity_id.value()],
                Self::read_analysis_row,
            )
            .optional()?;
        row.map(Self::analysis_from_row).transpose()
    }

    fn current_analyses(&self, result_type: &str, limit: usize) -> StorageResult<Vec<AnalysisResult>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM analysis_results r
             WHERE r.result_type = ?1
               AND NOT EXISTS (SELECT 1 FROM analysis_results s WHERE s.supersedes = r.id)
             ORDER BY r.id DESC LIMIT ?2",
            ANALYSIS_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![result_type, limit as i64], Self::read_analysis_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(Self::analysis_from_row).collect()
    }

    // === Tracking runs ===

    fn save_run(&self, state: &TrackingState) -> StorageResult<()> {
        let conn = self.conn()?;
        let error_json = state.error.as_ref().map(serde_json::to_string).transpose()?;

        conn.execute(
            r#"
            INSERT INTO tracking_runs (run_id, article_id, status, log_json, mentions_json, error_json,
                                       created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(run_id) DO UPDATE SET
                status = excluded.status,
                log_json = excluded.log_json,
                mentions_json = excluded.mentions_json,
                error_json = excluded.error_json,
                updated_at = excluded.updated_at
            "#,
            params![
                state.run_id.to_string(),
                state.article_id.as_str(),
                state.status.as_str(),
                serde_json::to_string(&state.log)?,
                serde_json::to_string(&state.mentions)?,
                error_json,
                ts(state.created_at),
                ts(state.updated_at),
            ],
        )?;
        Ok(())
    }

    fn load_run(&self, run_id: RunId) -> StorageResult<Option<TrackingState>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM tracking_runs WHERE run_id = ?1", RUN_COLUMNS),
                params![run_id.to_string()],
                Self::read_run_row,
            )
            .optional()?;
        row.map(Self::run_from_row).transpose()
    }

    fn runs_for_article(&self, article_id: &ArticleId) -> StorageResult<Vec<TrackingState>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM tracking_runs WHERE article_id = ?1 ORDER BY created_at, rowid",
            RUN_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![article_id.as_str()], Self::read_run_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(Self::run_from_row).collect()
    }
}
