#![cfg(unix)]

use std::fs;
use std::path::{Path, PathBuf};

use carve_config::ArtifactConfig;
use carve_core::{RawEdge, SourceReference};
use carve_extract::{ArtifactExtractor, DependencyExtractor, ExtractError};
use tempfile::TempDir;

const WRITES_DOT: &str = r#"
out=""
while [ "$#" -gt 0 ]; do
  if [ "$1" = "-dotoutput" ]; then
    out="$2"
    shift
  fi
  shift
done
echo "$out" > "$(dirname "$0")/outdir.txt"
cat > "$out/app.jar.dot" <<'DOT'
digraph "app.jar" {
    "app.order.Order"     -> "app.billing.Invoice";
    "app.order.Order"     -> "app.billing.Invoice";
    "app.order.Order"     -> "app.order.Order$Line";
    "app.order.Order"     -> "java.util.List (java.base)";
    "app.billing.Invoice" -> "app.legacy.Ledger";
    "app.billing.Invoice" -> "app.order.Order (app.jar)";
}
DOT
cat > "$out/summary.dot" <<'DOT'
digraph "summary" {
    "app.jar" -> "java.base";
}
DOT
"#;

const FAILS: &str = r#"
out=""
while [ "$#" -gt 0 ]; do
  if [ "$1" = "-dotoutput" ]; then
    out="$2"
    shift
  fi
  shift
done
echo "$out" > "$(dirname "$0")/outdir.txt"
echo "partial" > "$out/app.jar.dot"
echo "error: archive is corrupt" >&2
exit 3
"#;

struct FakeTool {
    dir: TempDir,
    archive: PathBuf,
}

impl FakeTool {
    fn new(script: &str) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("tool.sh"), script).expect("write script");
        let archive = dir.path().join("app.jar");
        fs::write(&archive, b"PK").expect("write archive");
        Self { dir, archive }
    }

    fn extractor(&self, timeout_secs: u64) -> ArtifactExtractor {
        ArtifactExtractor::new(ArtifactConfig {
            tool: "sh".to_owned(),
            timeout_secs,
            extra_args: vec![self.dir.path().join("tool.sh").display().to_string()],
        })
    }

    fn reference(&self, exclude: &[&str]) -> SourceReference {
        SourceReference::Artifact {
            archive_path: self.archive.clone(),
            include_prefix: "app".to_owned(),
            exclude_prefixes: exclude.iter().map(|prefix| (*prefix).to_owned()).collect(),
        }
    }

    fn output_dir(&self) -> PathBuf {
        let recorded = fs::read_to_string(self.dir.path().join("outdir.txt")).expect("outdir");
        Path::new(recorded.trim()).to_path_buf()
    }
}

#[tokio::test]
async fn artifact_edges_are_unweighted_filtered_and_deduplicated() {
    let tool = FakeTool::new(WRITES_DOT);
    let output = tool
        .extractor(30)
        .extract(&tool.reference(&["app.legacy"]))
        .await
        .expect("extract artifact");

    assert_eq!(
        output.edges,
        vec![
            RawEdge::unweighted("app.billing.Invoice", "app.order.Order"),
            RawEdge::unweighted("app.order.Order", "app.billing.Invoice"),
        ]
    );
    assert!(output.declared.is_empty());
    assert!(!tool.output_dir().exists(), "dot output must be removed");
}

#[tokio::test]
async fn non_zero_exit_fails_and_still_cleans_up() {
    let tool = FakeTool::new(FAILS);
    let err = tool
        .extractor(30)
        .extract(&tool.reference(&[]))
        .await
        .expect_err("tool failure");

    match &err {
        ExtractError::ToolFailed { status, stderr, .. } => {
            assert_eq!(status, "3");
            assert!(stderr.contains("archive is corrupt"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.is_tool_failure());
    assert!(!tool.output_dir().exists(), "dot output must be removed");
}

#[tokio::test]
async fn slow_tool_times_out() {
    let tool = FakeTool::new("sleep 10\n");
    let err = tool
        .extractor(1)
        .extract(&tool.reference(&[]))
        .await
        .expect_err("timeout");
    assert!(matches!(err, ExtractError::ToolTimeout { timeout_secs: 1, .. }));
}

#[tokio::test]
async fn missing_tool_is_a_spawn_failure() {
    let tool = FakeTool::new("");
    let extractor = ArtifactExtractor::new(ArtifactConfig {
        tool: "carve-no-such-dependency-tool".to_owned(),
        ..ArtifactConfig::default()
    });
    let err = extractor
        .extract(&tool.reference(&[]))
        .await
        .expect_err("spawn failure");
    assert!(matches!(err, ExtractError::ToolSpawn { .. }));
}

#[tokio::test]
async fn empty_include_prefix_and_missing_archive_are_input_errors() {
    let tool = FakeTool::new(WRITES_DOT);
    let extractor = tool.extractor(30);

    let err = extractor
        .extract(&SourceReference::Artifact {
            archive_path: tool.archive.clone(),
            include_prefix: " ".to_owned(),
            exclude_prefixes: Vec::new(),
        })
        .await
        .expect_err("empty prefix");
    assert!(matches!(err, ExtractError::InvalidSource(_)));

    let err = extractor
        .extract(&SourceReference::Artifact {
            archive_path: tool.dir.path().join("missing.jar"),
            include_prefix: "app".to_owned(),
            exclude_prefixes: Vec::new(),
        })
        .await
        .expect_err("missing archive");
    assert!(matches!(err, ExtractError::InvalidSource(_)));
}
