use std::path::PathBuf;

use carve_core::{
    DecompositionJob, DependencyGraph, ExtractionOutput, RawEdge, SourceReference, StrategyKind,
};
use carve_store::{DecompositionStore, SqliteStore};
use rusqlite::Connection;
use tempfile::tempdir;

fn graph(job_id: &str, edges: &[(&str, &str)]) -> DependencyGraph {
    DependencyGraph::build(
        job_id,
        &ExtractionOutput {
            declared: Vec::new(),
            edges: edges
                .iter()
                .map(|(source, target)| RawEdge::unweighted(*source, *target))
                .collect(),
        },
    )
    .expect("build graph")
}

fn fqns(graph: &DependencyGraph) -> Vec<&str> {
    graph.nodes().iter().map(|node| node.fqn.as_str()).collect()
}

fn open_with_job(job_id: &str) -> (tempfile::TempDir, SqliteStore) {
    let temp = tempdir().expect("tempdir");
    let store = SqliteStore::open(temp.path()).expect("open store");
    store
        .insert_job(&DecompositionJob::new(
            job_id,
            SourceReference::SourceTree {
                root: PathBuf::from("/repo"),
            },
            vec![StrategyKind::Louvain],
            1,
        ))
        .expect("insert job");
    (temp, store)
}

#[test]
fn second_build_replaces_the_first_entirely() {
    let (_temp, store) = open_with_job("job-1");

    store
        .replace_graph(&graph("job-1", &[("app.A", "app.B"), ("app.B", "app.C")]))
        .expect("first replace");
    store
        .replace_graph(&graph("job-1", &[("app.X", "app.Y")]))
        .expect("second replace");

    let loaded = store.load_graph("job-1").expect("load").expect("graph");
    assert_eq!(fqns(&loaded), vec!["app.X", "app.Y"]);
    assert_eq!(loaded.edge_count(), 1);
    assert!(loaded.edge("app.X", "app.Y").is_some());
}

#[test]
fn failed_replace_keeps_the_previous_graph() {
    let (_temp, store) = open_with_job("job-1");
    store
        .replace_graph(&graph("job-1", &[("app.A", "app.B")]))
        .expect("first replace");

    let conn = Connection::open(store.sqlite_path()).expect("open raw connection");
    conn.execute_batch(
        r#"
        CREATE TRIGGER poison_edge BEFORE INSERT ON graph_edges
        WHEN NEW.target_fqn = 'app.Poison'
        BEGIN
            SELECT RAISE(ABORT, 'poisoned edge');
        END;
        "#,
    )
    .expect("create trigger");
    drop(conn);

    let err = store
        .replace_graph(&graph("job-1", &[("app.C", "app.D"), ("app.D", "app.Poison")]))
        .expect_err("poisoned replace");
    assert!(err.to_string().contains("poisoned edge"));

    let loaded = store.load_graph("job-1").expect("load").expect("graph");
    assert_eq!(fqns(&loaded), vec!["app.A", "app.B"]);
    assert!(loaded.edge("app.A", "app.B").is_some());
}

#[test]
fn graphs_of_different_jobs_do_not_interfere() {
    let (_temp, store) = open_with_job("job-1");
    store
        .insert_job(&DecompositionJob::new(
            "job-2",
            SourceReference::SourceTree {
                root: PathBuf::from("/other"),
            },
            vec![StrategyKind::Leiden],
            2,
        ))
        .expect("insert second job");

    store
        .replace_graph(&graph("job-1", &[("app.A", "app.B")]))
        .expect("job-1 graph");
    store
        .replace_graph(&graph("job-2", &[("app.A", "app.C")]))
        .expect("job-2 graph");
    store
        .replace_graph(&graph("job-1", &[("app.A", "app.D")]))
        .expect("job-1 rebuild");

    let second = store.load_graph("job-2").expect("load").expect("graph");
    assert_eq!(fqns(&second), vec!["app.A", "app.C"]);
    assert!(second.nodes().iter().all(|node| node.job_id == "job-2"));
}
