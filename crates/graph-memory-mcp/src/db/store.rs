//! Embedded property-graph store.
//!
//! One SQLite file per provisioner key holds a node table and an edge
//! table; label-specific attributes live in JSON property bags. All rows
//! are scoped by repository so distinct repositories sharing a branch file
//! stay isolated.

use std::collections::BTreeSet;
use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params};
use serde_json::{Map, Value, json};

use crate::error::{StoreError, StoreResult};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS nodes (
    node_key    INTEGER PRIMARY KEY,
    repository  TEXT NOT NULL,
    label       TEXT NOT NULL,
    id          TEXT NOT NULL,
    name        TEXT NOT NULL DEFAULT '',
    properties  TEXT NOT NULL DEFAULT '{}',
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    UNIQUE (repository, label, id)
);
CREATE TABLE IF NOT EXISTS edges (
    edge_key    INTEGER PRIMARY KEY,
    repository  TEXT NOT NULL,
    rel_type    TEXT NOT NULL,
    from_key    INTEGER NOT NULL REFERENCES nodes(node_key) ON DELETE CASCADE,
    to_key      INTEGER NOT NULL REFERENCES nodes(node_key) ON DELETE CASCADE,
    properties  TEXT NOT NULL DEFAULT '{}',
    created_at  TEXT NOT NULL,
    UNIQUE (repository, rel_type, from_key, to_key)
);
CREATE INDEX IF NOT EXISTS idx_nodes_repo_label ON nodes (repository, label);
CREATE INDEX IF NOT EXISTS idx_edges_from ON edges (from_key);
CREATE INDEX IF NOT EXISTS idx_edges_to ON edges (to_key);
";

/// A node row with its decoded property bag.
#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub label: String,
    pub id: String,
    pub name: String,
    pub properties: Value,
    pub created_at: String,
    pub updated_at: String,
}

impl NodeRecord {
    /// JSON shape returned to tool callers.
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "label": self.label,
            "id": self.id,
            "name": self.name,
            "properties": self.properties,
            "createdAt": self.created_at,
            "updatedAt": self.updated_at,
        })
    }
}

/// An edge row resolved to its endpoint domain ids.
#[derive(Debug, Clone)]
pub struct EdgeRecord {
    pub rel_type: String,
    pub from_label: String,
    pub from_id: String,
    pub to_label: String,
    pub to_id: String,
}

impl EdgeRecord {
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "type": self.rel_type,
            "from": {"label": self.from_label, "id": self.from_id},
            "to": {"label": self.to_label, "id": self.to_id},
        })
    }
}

/// Direction selector for neighbor walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

/// Synchronous store over one database file. Callers hold it behind the
/// handle's mutex; statements are short enough to run on the async runtime.
pub struct GraphStore {
    conn: Connection,
}

impl GraphStore {
    /// Open (creating if absent) the database file and its schema.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Open`] when the file cannot be opened or the
    /// schema cannot be installed.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)
            .map_err(|e| StoreError::open(path.display().to_string(), e.to_string()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| StoreError::open(path.display().to_string(), e.to_string()))?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| StoreError::open(path.display().to_string(), e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| StoreError::open(path.display().to_string(), e.to_string()))?;
        Ok(Self { conn })
    }

    /// In-memory store for tests.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Open`] when schema installation fails.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::open(":memory:", e.to_string()))?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| StoreError::open(":memory:", e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| StoreError::open(":memory:", e.to_string()))?;
        Ok(Self { conn })
    }

    /// Insert or update a node, returning the stored record.
    pub fn upsert_node(
        &mut self,
        repository: &str,
        label: &str,
        id: &str,
        name: &str,
        properties: &Value,
    ) -> StoreResult<NodeRecord> {
        let now = now_iso();
        let props = serde_json::to_string(properties)?;
        self.conn.execute(
            "INSERT INTO nodes (repository, label, id, name, properties, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT (repository, label, id)
             DO UPDATE SET name = excluded.name,
                           properties = excluded.properties,
                           updated_at = excluded.updated_at",
            params![repository, label, id, name, props, now],
        )?;
        self.get_node(repository, label, id)?
            .ok_or_else(|| StoreError::Rejected(format!("upsert of {label} {id} did not persist")))
    }

    /// Fetch one node.
    pub fn get_node(
        &self,
        repository: &str,
        label: &str,
        id: &str,
    ) -> StoreResult<Option<NodeRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT label, id, name, properties, created_at, updated_at
                 FROM nodes WHERE repository = ?1 AND label = ?2 AND id = ?3",
                params![repository, label, id],
                row_to_node,
            )
            .optional()?;
        Ok(record)
    }

    /// Delete a node and, via cascade, its edges.
    pub fn delete_node(&mut self, repository: &str, label: &str, id: &str) -> StoreResult<bool> {
        let affected = self.conn.execute(
            "DELETE FROM nodes WHERE repository = ?1 AND label = ?2 AND id = ?3",
            params![repository, label, id],
        )?;
        Ok(affected > 0)
    }

    /// List nodes of one label, newest first.
    pub fn list_nodes(
        &self,
        repository: &str,
        label: &str,
        limit: usize,
    ) -> StoreResult<Vec<NodeRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT label, id, name, properties, created_at, updated_at
             FROM nodes WHERE repository = ?1 AND label = ?2
             ORDER BY updated_at DESC, id ASC LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![repository, label, limit as i64], row_to_node)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Distinct labels present for a repository.
    pub fn labels(&self, repository: &str) -> StoreResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT label FROM nodes WHERE repository = ?1 ORDER BY label")?;
        let rows = stmt.query_map(params![repository], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Node count per label.
    pub fn count_by_label(&self, repository: &str) -> StoreResult<Vec<(String, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT label, COUNT(*) FROM nodes WHERE repository = ?1 GROUP BY label ORDER BY label",
        )?;
        let rows = stmt.query_map(params![repository], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Union of property keys across a label's nodes.
    pub fn property_keys(&self, repository: &str, label: &str) -> StoreResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT properties FROM nodes WHERE repository = ?1 AND label = ?2")?;
        let rows = stmt.query_map(params![repository, label], |row| row.get::<_, String>(0))?;

        let mut keys = BTreeSet::new();
        for raw in rows {
            let bag: Value = serde_json::from_str(&raw?)?;
            if let Value::Object(map) = bag {
                keys.extend(map.into_iter().map(|(k, _)| k));
            }
        }
        Ok(keys.into_iter().collect())
    }

    /// Insert an edge between two existing nodes. Idempotent per
    /// `(repository, type, endpoints)`.
    pub fn upsert_edge(
        &mut self,
        repository: &str,
        rel_type: &str,
        from: (&str, &str),
        to: (&str, &str),
    ) -> StoreResult<()> {
        let from_key = self.node_key(repository, from.0, from.1)?.ok_or_else(|| {
            StoreError::Rejected(format!("unknown edge source {} {}", from.0, from.1))
        })?;
        let to_key = self.node_key(repository, to.0, to.1)?.ok_or_else(|| {
            StoreError::Rejected(format!("unknown edge target {} {}", to.0, to.1))
        })?;
        self.conn.execute(
            "INSERT INTO edges (repository, rel_type, from_key, to_key, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (repository, rel_type, from_key, to_key) DO NOTHING",
            params![repository, rel_type, from_key, to_key, now_iso()],
        )?;
        Ok(())
    }

    /// Edges of a repository, optionally filtered by relationship type.
    pub fn edges(&self, repository: &str, rel_type: Option<&str>) -> StoreResult<Vec<EdgeRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT e.rel_type, f.label, f.id, t.label, t.id
             FROM edges e
             JOIN nodes f ON f.node_key = e.from_key
             JOIN nodes t ON t.node_key = e.to_key
             WHERE e.repository = ?1 AND (?2 IS NULL OR e.rel_type = ?2)
             ORDER BY e.edge_key",
        )?;
        let rows = stmt.query_map(params![repository, rel_type], |row| {
            Ok(EdgeRecord {
                rel_type: row.get(0)?,
                from_label: row.get(1)?,
                from_id: row.get(2)?,
                to_label: row.get(3)?,
                to_id: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Neighbors of a node along edges of one type.
    pub fn neighbors(
        &self,
        repository: &str,
        label: &str,
        id: &str,
        rel_type: Option<&str>,
        direction: Direction,
    ) -> StoreResult<Vec<NodeRecord>> {
        let Some(key) = self.node_key(repository, label, id)? else {
            return Ok(Vec::new());
        };

        let sql = match direction {
            Direction::Outgoing => {
                "SELECT n.label, n.id, n.name, n.properties, n.created_at, n.updated_at
                 FROM edges e JOIN nodes n ON n.node_key = e.to_key
                 WHERE e.from_key = ?1 AND (?2 IS NULL OR e.rel_type = ?2)"
            }
            Direction::Incoming => {
                "SELECT n.label, n.id, n.name, n.properties, n.created_at, n.updated_at
                 FROM edges e JOIN nodes n ON n.node_key = e.from_key
                 WHERE e.to_key = ?1 AND (?2 IS NULL OR e.rel_type = ?2)"
            }
            Direction::Both => {
                "SELECT n.label, n.id, n.name, n.properties, n.created_at, n.updated_at
                 FROM edges e JOIN nodes n
                   ON n.node_key = CASE WHEN e.from_key = ?1 THEN e.to_key ELSE e.from_key END
                 WHERE (e.from_key = ?1 OR e.to_key = ?1)
                   AND (?2 IS NULL OR e.rel_type = ?2)"
            }
        };
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params![key, rel_type], row_to_node)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Case-insensitive substring search over id, name, and property text.
    pub fn search(
        &self,
        repository: &str,
        query: &str,
        labels: Option<&[String]>,
        limit: usize,
    ) -> StoreResult<Vec<NodeRecord>> {
        let pattern = format!("%{}%", query.to_lowercase());
        let mut stmt = self.conn.prepare(
            "SELECT label, id, name, properties, created_at, updated_at
             FROM nodes
             WHERE repository = ?1
               AND (lower(id) LIKE ?2 OR lower(name) LIKE ?2 OR lower(properties) LIKE ?2)
             ORDER BY label, id LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![repository, pattern, limit as i64], row_to_node)?;
        let mut records = rows.collect::<Result<Vec<_>, _>>()?;
        if let Some(wanted) = labels {
            if !wanted.is_empty() {
                records.retain(|r| wanted.iter().any(|l| l == &r.label));
            }
        }
        Ok(records)
    }

    /// Load the adjacency of selected labels and relationship types for the
    /// algorithm layer. Node keys in the result are `label:id` strings.
    pub fn load_adjacency(
        &self,
        repository: &str,
        node_labels: &[String],
        rel_types: &[String],
    ) -> StoreResult<(Vec<String>, Vec<(String, String)>)> {
        let mut nodes = Vec::new();
        {
            let mut stmt = self.conn.prepare(
                "SELECT label, id FROM nodes WHERE repository = ?1 ORDER BY node_key",
            )?;
            let rows = stmt.query_map(params![repository], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (label, id) = row?;
                if node_labels.is_empty() || node_labels.contains(&label) {
                    nodes.push(format!("{label}:{id}"));
                }
            }
        }

        let mut edges = Vec::new();
        for edge in self.edges(repository, None)? {
            if !rel_types.is_empty() && !rel_types.contains(&edge.rel_type) {
                continue;
            }
            edges.push((
                format!("{}:{}", edge.from_label, edge.from_id),
                format!("{}:{}", edge.to_label, edge.to_id),
            ));
        }
        Ok((nodes, edges))
    }

    /// Run a read-only statement and return rows as JSON objects keyed by
    /// column name. The engine's own dialect; writes are rejected.
    pub fn execute_query(&self, sql: &str, query_params: &[Value]) -> StoreResult<Vec<Value>> {
        let head = sql.trim_start().to_lowercase();
        if !(head.starts_with("select") || head.starts_with("with")) {
            return Err(StoreError::Rejected(
                "only read-only SELECT statements are permitted".to_string(),
            ));
        }
        if sql.trim_end().trim_end_matches(';').contains(';') {
            return Err(StoreError::Rejected(
                "multiple statements are not permitted".to_string(),
            ));
        }

        let mut stmt = self.conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(ToString::to_string).collect();
        let bound = query_params.iter().map(json_to_sql);
        let mut rows = stmt.query(rusqlite::params_from_iter(bound))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut object = Map::new();
            for (i, column) in columns.iter().enumerate() {
                object.insert(column.clone(), sql_to_json(row.get_ref(i)?));
            }
            out.push(Value::Object(object));
        }
        Ok(out)
    }

    fn node_key(&self, repository: &str, label: &str, id: &str) -> StoreResult<Option<i64>> {
        let key = self
            .conn
            .query_row(
                "SELECT node_key FROM nodes WHERE repository = ?1 AND label = ?2 AND id = ?3",
                params![repository, label, id],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(key)
    }
}

impl std::fmt::Debug for GraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphStore").finish()
    }
}

fn row_to_node(row: &rusqlite::Row<'_>) -> rusqlite::Result<NodeRecord> {
    let raw_properties: String = row.get(3)?;
    Ok(NodeRecord {
        label: row.get(0)?,
        id: row.get(1)?,
        name: row.get(2)?,
        properties: serde_json::from_str(&raw_properties).unwrap_or(Value::Null),
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn json_to_sql(value: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;
    match value {
        Value::Null => Sql::Null,
        Value::Bool(b) => Sql::Integer(i64::from(*b)),
        Value::Number(n) => n
            .as_i64()
            .map(Sql::Integer)
            .or_else(|| n.as_f64().map(Sql::Real))
            .unwrap_or(Sql::Null),
        Value::String(s) => Sql::Text(s.clone()),
        other => Sql::Text(other.to_string()),
    }
}

fn sql_to_json(value: rusqlite::types::ValueRef<'_>) -> Value {
    use rusqlite::types::ValueRef;
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => json!(i),
        ValueRef::Real(f) => json!(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => json!(b.len()),
    }
}
