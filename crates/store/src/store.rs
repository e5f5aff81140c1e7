use crate::error::{Result, StoreError};
use crate::node::{EmbeddingStats, Node, NodeEdge};
use crate::schema;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use taskwing_protocol::Evidence;

/// The knowledge store. Writes are serialised by the internal mutex; callers
/// get read-your-write consistency within a single agent run.
pub struct KnowledgeStore {
    conn: Mutex<Connection>,
}

impl KnowledgeStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = schema::open_or_create(path.as_ref())?;
        log::info!("Opened knowledge store at {}", path.as_ref().display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(schema::open_in_memory()?),
        })
    }

    /// Idempotent by semantic summary: re-upserting the same meaning updates
    /// the existing node and unions evidence instead of inserting a sibling.
    /// Returns the node id.
    pub fn upsert_by_summary(&self, node: &Node) -> Result<String> {
        let conn = self.conn.lock().unwrap();
        let existing: Option<(String, String)> = conn
            .query_row(
                "SELECT id, evidence FROM nodes
                 WHERE summary = ?1 AND node_type = ?2 AND workspace = ?3",
                params![node.summary, node.node_type, node.workspace],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let id = match existing {
            Some((id, stored_evidence)) => {
                let merged = union_evidence(&stored_evidence, &node.evidence)?;
                conn.execute(
                    "UPDATE nodes SET title = ?1, content = ?2, evidence = ?3,
                     source_agent = ?4, confidence = ?5, debt_score = ?6
                     WHERE id = ?7",
                    params![
                        node.title,
                        node.content,
                        merged,
                        node.source_agent,
                        node.confidence,
                        node.debt_score,
                        id
                    ],
                )?;
                conn.execute("DELETE FROM nodes_fts WHERE node_id = ?1", params![id])?;
                id
            }
            None => {
                conn.execute(
                    "INSERT INTO nodes (id, node_type, title, summary, content, evidence,
                     source_agent, workspace, confidence, debt_score, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    params![
                        node.id,
                        node.node_type,
                        node.title,
                        node.summary,
                        node.content,
                        serde_json::to_string(&node.evidence)?,
                        node.source_agent,
                        node.workspace,
                        node.confidence,
                        node.debt_score,
                        node.created_at.to_rfc3339(),
                    ],
                )?;
                node.id.clone()
            }
        };

        conn.execute(
            "INSERT INTO nodes_fts (node_id, title, summary, content)
             VALUES (?1, ?2, ?3, ?4)",
            params![id, node.title, node.summary, node.content],
        )?;

        conn.execute("DELETE FROM node_files WHERE node_id = ?1", params![id])?;
        for path in node.evidence_paths() {
            conn.execute(
                "INSERT OR IGNORE INTO node_files (node_id, file_path) VALUES (?1, ?2)",
                params![id, path],
            )?;
        }
        Ok(id)
    }

    pub fn set_embedding(&self, node_id: &str, vector: &[f32]) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let exists: bool = conn
            .query_row("SELECT 1 FROM nodes WHERE id = ?1", params![node_id], |_| Ok(true))
            .optional()?
            .unwrap_or(false);
        if !exists {
            return Err(StoreError::NodeNotFound(node_id.to_string()));
        }
        conn.execute(
            "INSERT INTO node_embeddings (node_id, dim, vector) VALUES (?1, ?2, ?3)
             ON CONFLICT(node_id) DO UPDATE SET dim = ?2, vector = ?3",
            params![node_id, vector.len() as i64, vec_to_blob(vector)],
        )?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<Node>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("{NODE_SELECT} WHERE id = ?1"),
            params![id],
            row_to_node,
        )
        .optional()
        .map_err(Into::into)
    }

    /// Unfiltered type listing; constraints are always fully retrieved this
    /// way, never semantically filtered.
    pub fn list_by_type(&self, node_type: &str) -> Result<Vec<Node>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare(&format!("{NODE_SELECT} WHERE node_type = ?1 ORDER BY created_at"))?;
        let nodes = stmt
            .query_map(params![node_type], row_to_node)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(nodes)
    }

    /// Remove everything a given agent produced. Also sweeps edges whose
    /// endpoints no longer exist.
    pub fn delete_by_agent(&self, agent: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM nodes_fts WHERE node_id IN
             (SELECT id FROM nodes WHERE source_agent = ?1)",
            params![agent],
        )?;
        let deleted = conn.execute("DELETE FROM nodes WHERE source_agent = ?1", params![agent])?;
        conn.execute(
            "DELETE FROM node_edges WHERE
             from_node NOT IN (SELECT id FROM nodes)
             OR to_node NOT IN (SELECT id FROM nodes)",
            [],
        )?;
        log::info!("Deleted {deleted} nodes for agent '{agent}'");
        Ok(deleted)
    }

    /// Remove an agent's nodes whose evidence cites any of `paths`. Nodes
    /// only; edges referencing deleted nodes become invisible through
    /// `edges_of` and are swept by the next `delete_by_agent`.
    pub fn delete_by_files(&self, agent: &str, paths: &[String]) -> Result<usize> {
        if paths.is_empty() {
            return Ok(0);
        }
        let conn = self.conn.lock().unwrap();
        let mut doomed: HashSet<String> = HashSet::new();
        {
            let mut stmt = conn.prepare(
                "SELECT n.id FROM nodes n JOIN node_files f ON f.node_id = n.id
                 WHERE n.source_agent = ?1 AND f.file_path = ?2",
            )?;
            for path in paths {
                let ids = stmt.query_map(params![agent, path], |row| row.get::<_, String>(0))?;
                for id in ids {
                    doomed.insert(id?);
                }
            }
        }
        for id in &doomed {
            conn.execute("DELETE FROM nodes_fts WHERE node_id = ?1", params![id])?;
            conn.execute("DELETE FROM nodes WHERE id = ?1", params![id])?;
        }
        log::info!("Deleted {} nodes for agent '{agent}' by file scope", doomed.len());
        Ok(doomed.len())
    }

    /// Create an edge. Both endpoints must exist; self-edges are rejected.
    pub fn link(
        &self,
        from: &str,
        to: &str,
        relation: &str,
        confidence: f64,
        properties: serde_json::Value,
    ) -> Result<()> {
        if from == to {
            return Err(StoreError::SelfEdge(from.to_string()));
        }
        let conn = self.conn.lock().unwrap();
        for id in [from, to] {
            let exists: bool = conn
                .query_row("SELECT 1 FROM nodes WHERE id = ?1", params![id], |_| Ok(true))
                .optional()?
                .unwrap_or(false);
            if !exists {
                return Err(StoreError::NodeNotFound(id.to_string()));
            }
        }
        conn.execute(
            "INSERT INTO node_edges (from_node, to_node, relation, confidence, properties)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(from_node, to_node, relation)
             DO UPDATE SET confidence = ?4, properties = ?5",
            params![from, to, relation, confidence, properties.to_string()],
        )?;
        Ok(())
    }

    /// Outgoing edges of a node whose target still exists.
    pub fn edges_of(&self, id: &str) -> Result<Vec<NodeEdge>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT e.from_node, e.to_node, e.relation, e.confidence, e.properties
             FROM node_edges e JOIN nodes t ON t.id = e.to_node
             WHERE e.from_node = ?1
             ORDER BY e.confidence DESC",
        )?;
        let edges = stmt
            .query_map(params![id], |row| {
                Ok(NodeEdge {
                    from_node: row.get(0)?,
                    to_node: row.get(1)?,
                    relation: row.get(2)?,
                    confidence: row.get(3)?,
                    properties: serde_json::from_str(&row.get::<_, String>(4)?)
                        .unwrap_or(serde_json::Value::Null),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(edges)
    }

    /// Lexical candidates with BM25-style negative ranks (more negative =
    /// better match).
    pub fn search_fts(&self, query: &str, limit: usize) -> Result<Vec<(Node, f64)>> {
        let match_expr = fts_match_expr(query);
        if match_expr.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {NODE_COLUMNS}, bm25(nodes_fts) AS rank
             FROM nodes_fts JOIN nodes n ON n.id = nodes_fts.node_id
             WHERE nodes_fts MATCH ?1
             ORDER BY rank
             LIMIT ?2"
        ))?;
        let rows = stmt
            .query_map(params![match_expr, limit as i64], |row| {
                Ok((row_to_node(row)?, row.get::<_, f64>(11)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// All embedding-bearing nodes in one JOIN pass. Never issue per-node
    /// queries on top of this.
    pub fn list_with_embeddings(&self) -> Result<Vec<(Node, Vec<f32>)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {NODE_COLUMNS}, e.vector
             FROM nodes n JOIN node_embeddings e ON e.node_id = n.id"
        ))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row_to_node(row)?, blob_to_vec(&row.get::<_, Vec<u8>>(11)?)))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Consistency snapshot: mixed dimensionality means the vector index
    /// needs a rebuild.
    pub fn embedding_stats(&self) -> Result<EmbeddingStats> {
        let conn = self.conn.lock().unwrap();
        let total: usize =
            conn.query_row("SELECT COUNT(*) FROM nodes", [], |r| r.get::<_, i64>(0))? as usize;
        let with_embeddings: usize = conn.query_row(
            "SELECT COUNT(*) FROM node_embeddings",
            [],
            |r| r.get::<_, i64>(0),
        )? as usize;
        let mut stmt = conn.prepare("SELECT DISTINCT dim FROM node_embeddings")?;
        let dims: Vec<i64> = stmt
            .query_map([], |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(EmbeddingStats {
            total,
            with_embeddings,
            without: total.saturating_sub(with_embeddings),
            dim: if dims.len() == 1 { Some(dims[0] as usize) } else { None },
            mixed_dim: dims.len() > 1,
        })
    }

    /// Repopulate the FTS index from stored rows. Always possible; the FTS
    /// table carries no content of its own.
    pub fn rebuild_fts(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM nodes_fts", [])?;
        let rebuilt = conn.execute(
            "INSERT INTO nodes_fts (node_id, title, summary, content)
             SELECT id, title, summary, content FROM nodes",
            [],
        )?;
        log::info!("Rebuilt FTS index over {rebuilt} nodes");
        Ok(rebuilt)
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM nodes", [], |r| r.get(0))?;
        Ok(n as usize)
    }
}

const NODE_COLUMNS: &str = "n.id, n.node_type, n.title, n.summary, n.content, n.evidence, \
     n.source_agent, n.workspace, n.confidence, n.debt_score, n.created_at";
const NODE_SELECT: &str = "SELECT id, node_type, title, summary, content, evidence, \
     source_agent, workspace, confidence, debt_score, created_at FROM nodes";

fn row_to_node(row: &Row<'_>) -> rusqlite::Result<Node> {
    let evidence_json: String = row.get(5)?;
    let created_raw: String = row.get(10)?;
    Ok(Node {
        id: row.get(0)?,
        node_type: row.get(1)?,
        title: row.get(2)?,
        summary: row.get(3)?,
        content: row.get(4)?,
        evidence: serde_json::from_str(&evidence_json).unwrap_or_default(),
        source_agent: row.get(6)?,
        workspace: row.get(7)?,
        confidence: row.get(8)?,
        debt_score: row.get(9)?,
        created_at: DateTime::parse_from_rfc3339(&created_raw)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

fn union_evidence(stored_json: &str, incoming: &[Evidence]) -> Result<String> {
    let mut merged: Vec<Evidence> = serde_json::from_str(stored_json).unwrap_or_default();
    let mut keys: HashSet<(String, usize)> = merged.iter().map(|e| e.dedup_key()).collect();
    for ev in incoming {
        if keys.insert(ev.dedup_key()) {
            merged.push(ev.clone());
        }
    }
    Ok(serde_json::to_string(&merged)?)
}

/// Quote alphanumeric tokens so user text cannot inject FTS5 syntax.
fn fts_match_expr(query: &str) -> String {
    query
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| t.len() >= 2)
        .map(|t| format!("\"{t}\""))
        .collect::<Vec<_>>()
        .join(" OR ")
}

fn vec_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        blob.extend_from_slice(&v.to_le_bytes());
    }
    blob
}

fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
