mod community;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use carve_core::{
    ClassNode, Decomposition, DecompositionJob, Dependency, DependencyBreakdown, DependencyGraph,
    GraphError, JobStatus, NodeKind, SourceReference, StrategyKind,
};
use rusqlite::{Connection, OptionalExtension, Row, params};
use thiserror::Error;

pub use community::{
    CommunityAssignment, CommunityError, CommunityService, GraphProjection,
    HttpCommunityService, ProjectedRelationship, algorithm_name, projection_name,
};

pub const SQLITE_FILE_NAME: &str = "carve.sqlite";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("stored graph is inconsistent: {0}")]
    Graph(#[from] GraphError),
    #[error("invalid stored record: {0}")]
    InvalidRecord(String),
    #[error("unknown job {0}")]
    UnknownJob(String),
}

/// Persistence boundary for jobs, graph snapshots and decompositions. Holds
/// plain data only.
pub trait DecompositionStore: Send + Sync {
    fn insert_job(&self, job: &DecompositionJob) -> Result<(), StoreError>;
    /// Overwrites status, reason and timestamps of an existing job.
    fn update_job(&self, job: &DecompositionJob) -> Result<(), StoreError>;
    fn get_job(&self, job_id: &str) -> Result<Option<DecompositionJob>, StoreError>;
    fn list_jobs(&self) -> Result<Vec<DecompositionJob>, StoreError>;

    /// Deletes every node and edge of the graph's job and inserts the new
    /// set in one transaction.
    fn replace_graph(&self, graph: &DependencyGraph) -> Result<(), StoreError>;
    fn load_graph(&self, job_id: &str) -> Result<Option<DependencyGraph>, StoreError>;

    /// Replaces every stored decomposition of the job with `decompositions`
    /// in one transaction.
    fn save_decompositions(
        &self,
        job_id: &str,
        decompositions: &[Decomposition],
    ) -> Result<(), StoreError>;
    fn decompositions(&self, job_id: &str) -> Result<Vec<Decomposition>, StoreError>;
    fn clear_results(&self, job_id: &str) -> Result<(), StoreError>;
}

pub struct SqliteStore {
    sqlite_path: PathBuf,
}

impl SqliteStore {
    pub fn open(workspace_root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let carve_dir = carve_config::carve_dir(workspace_root.as_ref());
        fs::create_dir_all(&carve_dir)?;
        let sqlite_path = carve_dir.join(SQLITE_FILE_NAME);

        let conn = Connection::open(&sqlite_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        run_migrations(&conn)?;
        drop(conn);

        Ok(Self { sqlite_path })
    }

    pub fn sqlite_path(&self) -> &Path {
        &self.sqlite_path
    }

    fn connection(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&self.sqlite_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(conn)
    }
}

impl DecompositionStore for SqliteStore {
    fn insert_job(&self, job: &DecompositionJob) -> Result<(), StoreError> {
        let conn = self.connection()?;
        conn.execute(
            r#"
            INSERT INTO jobs (
                id, source_json, strategies_json, status, failure_reason,
                created_at, started_at, finished_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                job.id,
                serde_json::to_string(&job.source)?,
                serde_json::to_string(&job.strategies)?,
                job.status.as_str(),
                job.failure_reason,
                job.created_at,
                job.started_at,
                job.finished_at,
            ],
        )?;
        Ok(())
    }

    fn update_job(&self, job: &DecompositionJob) -> Result<(), StoreError> {
        let conn = self.connection()?;
        let updated = conn.execute(
            r#"
            UPDATE jobs
            SET status = ?2,
                failure_reason = ?3,
                started_at = ?4,
                finished_at = ?5
            WHERE id = ?1
            "#,
            params![
                job.id,
                job.status.as_str(),
                job.failure_reason,
                job.started_at,
                job.finished_at,
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::UnknownJob(job.id.clone()));
        }
        Ok(())
    }

    fn get_job(&self, job_id: &str) -> Result<Option<DecompositionJob>, StoreError> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, source_json, strategies_json, status, failure_reason,
                   created_at, started_at, finished_at
            FROM jobs
            WHERE id = ?1
            "#,
        )?;
        let raw = stmt
            .query_row(params![job_id.trim()], RawJob::from_row)
            .optional()?;
        raw.map(RawJob::into_job).transpose()
    }

    fn list_jobs(&self) -> Result<Vec<DecompositionJob>, StoreError> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, source_json, strategies_json, status, failure_reason,
                   created_at, started_at, finished_at
            FROM jobs
            ORDER BY created_at ASC, id ASC
            "#,
        )?;
        let rows = stmt.query_map([], RawJob::from_row)?;
        let raw = rows.collect::<Result<Vec<_>, _>>()?;
        raw.into_iter().map(RawJob::into_job).collect()
    }

    fn replace_graph(&self, graph: &DependencyGraph) -> Result<(), StoreError> {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM graph_edges WHERE job_id = ?1",
            params![graph.job_id()],
        )?;
        tx.execute(
            "DELETE FROM graph_nodes WHERE job_id = ?1",
            params![graph.job_id()],
        )?;

        {
            let mut insert_node = tx.prepare(
                r#"
                INSERT INTO graph_nodes (job_id, fqn, id, simple_name, kind)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )?;
            for node in graph.nodes() {
                insert_node.execute(params![
                    node.job_id,
                    node.fqn,
                    node.id,
                    node.simple_name,
                    node.kind.as_str(),
                ])?;
            }

            let mut insert_edge = tx.prepare(
                r#"
                INSERT INTO graph_edges (
                    job_id, source_fqn, target_fqn, weight,
                    method_calls, field_accesses, object_creations, type_references
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )?;
            for edge in graph.edges() {
                let breakdown = edge.breakdown;
                insert_edge.execute(params![
                    graph.job_id(),
                    edge.source_fqn,
                    edge.target_fqn,
                    edge.weight,
                    breakdown.map(|counts| counts.method_calls),
                    breakdown.map(|counts| counts.field_accesses),
                    breakdown.map(|counts| counts.object_creations),
                    breakdown.map(|counts| counts.type_references),
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn load_graph(&self, job_id: &str) -> Result<Option<DependencyGraph>, StoreError> {
        let job_id = job_id.trim();
        let conn = self.connection()?;

        let mut node_stmt = conn.prepare(
            r#"
            SELECT id, simple_name, fqn, kind
            FROM graph_nodes
            WHERE job_id = ?1
            ORDER BY fqn ASC
            "#,
        )?;
        let nodes = node_stmt
            .query_map(params![job_id], |row| {
                Ok(ClassNode {
                    id: row.get(0)?,
                    simple_name: row.get(1)?,
                    fqn: row.get(2)?,
                    kind: NodeKind::parse(&row.get::<_, String>(3)?),
                    job_id: job_id.to_owned(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        if nodes.is_empty() {
            return Ok(None);
        }

        let mut edge_stmt = conn.prepare(
            r#"
            SELECT source_fqn, target_fqn, weight,
                   method_calls, field_accesses, object_creations, type_references
            FROM graph_edges
            WHERE job_id = ?1
            ORDER BY source_fqn ASC, target_fqn ASC
            "#,
        )?;
        let edges = edge_stmt
            .query_map(params![job_id], |row| {
                let counts = (
                    row.get::<_, Option<u32>>(3)?,
                    row.get::<_, Option<u32>>(4)?,
                    row.get::<_, Option<u32>>(5)?,
                    row.get::<_, Option<u32>>(6)?,
                );
                let breakdown = match counts {
                    (
                        Some(method_calls),
                        Some(field_accesses),
                        Some(object_creations),
                        Some(type_references),
                    ) => Some(DependencyBreakdown {
                        method_calls,
                        field_accesses,
                        object_creations,
                        type_references,
                    }),
                    _ => None,
                };
                Ok(Dependency {
                    source_fqn: row.get(0)?,
                    target_fqn: row.get(1)?,
                    weight: row.get(2)?,
                    breakdown,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(DependencyGraph::from_parts(job_id, nodes, edges)?))
    }

    fn save_decompositions(
        &self,
        job_id: &str,
        decompositions: &[Decomposition],
    ) -> Result<(), StoreError> {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM decompositions WHERE job_id = ?1",
            params![job_id],
        )?;
        {
            let mut insert = tx.prepare(
                r#"
                INSERT INTO decompositions (job_id, strategy, record_json)
                VALUES (?1, ?2, ?3)
                "#,
            )?;
            for decomposition in decompositions {
                if decomposition.job_id != job_id {
                    return Err(StoreError::InvalidRecord(format!(
                        "decomposition of job {} saved under job {job_id}",
                        decomposition.job_id
                    )));
                }
                insert.execute(params![
                    job_id,
                    decomposition.strategy.as_str(),
                    serde_json::to_string(decomposition)?,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn decompositions(&self, job_id: &str) -> Result<Vec<Decomposition>, StoreError> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT record_json
            FROM decompositions
            WHERE job_id = ?1
            ORDER BY strategy ASC
            "#,
        )?;
        let rows = stmt.query_map(params![job_id.trim()], |row| row.get::<_, String>(0))?;
        let mut records = Vec::new();
        for row in rows {
            records.push(serde_json::from_str::<Decomposition>(&row?)?);
        }
        Ok(records)
    }

    fn clear_results(&self, job_id: &str) -> Result<(), StoreError> {
        let conn = self.connection()?;
        conn.execute(
            "DELETE FROM decompositions WHERE job_id = ?1",
            params![job_id.trim()],
        )?;
        Ok(())
    }
}

struct RawJob {
    id: String,
    source_json: String,
    strategies_json: String,
    status: String,
    failure_reason: Option<String>,
    created_at: i64,
    started_at: Option<i64>,
    finished_at: Option<i64>,
}

impl RawJob {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            source_json: row.get(1)?,
            strategies_json: row.get(2)?,
            status: row.get(3)?,
            failure_reason: row.get(4)?,
            created_at: row.get(5)?,
            started_at: row.get(6)?,
            finished_at: row.get(7)?,
        })
    }

    fn into_job(self) -> Result<DecompositionJob, StoreError> {
        let status = self
            .status
            .parse::<JobStatus>()
            .map_err(StoreError::InvalidRecord)?;
        Ok(DecompositionJob {
            source: serde_json::from_str::<SourceReference>(&self.source_json)?,
            strategies: serde_json::from_str::<Vec<StrategyKind>>(&self.strategies_json)?,
            id: self.id,
            status,
            failure_reason: self.failure_reason,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        })
    }
}

fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            source_json TEXT NOT NULL,
            strategies_json TEXT NOT NULL,
            status TEXT NOT NULL,
            failure_reason TEXT,
            created_at INTEGER NOT NULL,
            started_at INTEGER,
            finished_at INTEGER
        );

        CREATE TABLE IF NOT EXISTS graph_nodes (
            job_id TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
            fqn TEXT NOT NULL,
            id TEXT NOT NULL,
            simple_name TEXT NOT NULL,
            kind TEXT NOT NULL,
            PRIMARY KEY (job_id, fqn)
        );

        CREATE TABLE IF NOT EXISTS graph_edges (
            job_id TEXT NOT NULL,
            source_fqn TEXT NOT NULL,
            target_fqn TEXT NOT NULL,
            weight INTEGER NOT NULL,
            method_calls INTEGER,
            field_accesses INTEGER,
            object_creations INTEGER,
            type_references INTEGER,
            PRIMARY KEY (job_id, source_fqn, target_fqn),
            FOREIGN KEY (job_id, source_fqn) REFERENCES graph_nodes(job_id, fqn) ON DELETE CASCADE,
            FOREIGN KEY (job_id, target_fqn) REFERENCES graph_nodes(job_id, fqn) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS decompositions (
            job_id TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
            strategy TEXT NOT NULL,
            record_json TEXT NOT NULL,
            PRIMARY KEY (job_id, strategy)
        );
        "#,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use carve_core::{DeclaredType, ExtractionOutput, RawEdge};
    use tempfile::tempdir;

    use super::*;

    fn job(id: &str, created_at: i64) -> DecompositionJob {
        DecompositionJob::new(
            id,
            SourceReference::SourceTree {
                root: PathBuf::from("/repo"),
            },
            vec![StrategyKind::Louvain, StrategyKind::DomainDriven],
            created_at,
        )
    }

    #[test]
    fn store_creates_layout_and_round_trips_jobs() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteStore::open(temp.path()).expect("open store");
        assert!(temp.path().join(".carve").join(SQLITE_FILE_NAME).exists());

        let mut first = job("job-1", 10);
        store.insert_job(&first).expect("insert first");
        store.insert_job(&job("job-2", 20)).expect("insert second");

        first.start(11).expect("start");
        first.fail("boom", 12).expect("fail");
        store.update_job(&first).expect("update");

        drop(store);
        let reopened = SqliteStore::open(temp.path()).expect("reopen store");
        assert_eq!(reopened.get_job("job-1").expect("get"), Some(first));
        assert_eq!(
            reopened
                .list_jobs()
                .expect("list")
                .iter()
                .map(|job| job.id.as_str())
                .collect::<Vec<_>>(),
            vec!["job-1", "job-2"]
        );
        assert!(reopened.get_job("missing").expect("get missing").is_none());
    }

    #[test]
    fn update_of_unknown_job_is_an_error() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteStore::open(temp.path()).expect("open store");
        let err = store.update_job(&job("ghost", 1)).expect_err("unknown job");
        assert!(matches!(err, StoreError::UnknownJob(id) if id == "ghost"));
    }

    fn decomposition(job_id: &str, strategy: StrategyKind, unassigned: usize) -> Decomposition {
        Decomposition {
            job_id: job_id.to_owned(),
            strategy,
            modularity: None,
            boundaries: Vec::new(),
            unassigned,
        }
    }

    #[test]
    fn decompositions_are_saved_as_one_set() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteStore::open(temp.path()).expect("open store");
        store.insert_job(&job("job-1", 10)).expect("insert job");

        let first = vec![
            decomposition("job-1", StrategyKind::Louvain, 1),
            decomposition("job-1", StrategyKind::DomainDriven, 2),
        ];
        store.save_decompositions("job-1", &first).expect("save first");
        assert_eq!(store.decompositions("job-1").expect("load").len(), 2);

        let broken = vec![
            decomposition("job-1", StrategyKind::Louvain, 7),
            decomposition("job-2", StrategyKind::DomainDriven, 7),
        ];
        let err = store
            .save_decompositions("job-1", &broken)
            .expect_err("foreign record");
        assert!(matches!(err, StoreError::InvalidRecord(_)));
        let kept = store.decompositions("job-1").expect("load after failure");
        assert_eq!(
            kept.iter().map(|record| record.unassigned).collect::<Vec<_>>(),
            vec![2, 1]
        );

        store
            .save_decompositions("job-1", &[decomposition("job-1", StrategyKind::Leiden, 0)])
            .expect("save second");
        let replaced = store.decompositions("job-1").expect("load replaced");
        assert_eq!(replaced.len(), 1);
        assert_eq!(replaced[0].strategy, StrategyKind::Leiden);
    }

    #[test]
    fn graph_round_trips_with_breakdowns() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteStore::open(temp.path()).expect("open store");
        store.insert_job(&job("job-1", 10)).expect("insert job");

        let counts = DependencyBreakdown {
            method_calls: 2,
            field_accesses: 1,
            ..DependencyBreakdown::default()
        };
        let graph = DependencyGraph::build(
            "job-1",
            &ExtractionOutput {
                declared: vec![DeclaredType {
                    fqn: "app.A".to_owned(),
                    kind: NodeKind::Class,
                }],
                edges: vec![
                    RawEdge::with_breakdown("app.A", "app.B", counts),
                    RawEdge::unweighted("app.B", "app.C"),
                ],
            },
        )
        .expect("build graph");

        store.replace_graph(&graph).expect("replace graph");
        let loaded = store.load_graph("job-1").expect("load").expect("graph");
        assert_eq!(loaded, graph);
        assert!(store.load_graph("job-2").expect("load other").is_none());
    }
}
