mod events;
mod outline;
mod resolve;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use carve_config::SourceConfig;
use carve_core::{ExtractionOutput, ExtractorKind, SourceReference};
use tracing::{debug, info, warn};
use tree_sitter::Parser;
use walkdir::{DirEntry, WalkDir};

use crate::{DependencyExtractor, ExtractError};

pub use events::{
    DeclarationFailure, ReferenceEvent, UnitEvents, VisitError, collect_reference_events,
    reduce_events,
};
pub use outline::{ParsedUnit, UnitOutline, outline_unit};
pub use resolve::{TypeIndex, UnitScope};

/// Builds weighted class dependencies from a Java source tree.
#[derive(Debug, Clone, Default)]
pub struct SourceExtractor {
    config: SourceConfig,
}

impl SourceExtractor {
    pub fn new(config: SourceConfig) -> Self {
        Self { config }
    }

    /// Synchronous extraction over an on-disk tree.
    pub fn extract_tree(&self, root: &Path) -> Result<ExtractionOutput, ExtractError> {
        if !root.is_dir() {
            return Err(ExtractError::InvalidSource(format!(
                "source root {} does not exist or is not a directory",
                root.display()
            )));
        }

        let mut parser = java_parser()?;
        let mut units = Vec::new();
        for path in self.java_files(root) {
            let source = match std::fs::read_to_string(&path) {
                Ok(source) => source,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unreadable source file");
                    continue;
                }
            };
            match parser.parse(&source, None) {
                Some(tree) => units.push(ParsedUnit { path, source, tree }),
                None => warn!(path = %path.display(), "parser produced no syntax tree"),
            }
        }

        let output = extract_units(&units);
        info!(
            root = %root.display(),
            files = units.len(),
            types = output.declared.len(),
            edges = output.edges.len(),
            "source extraction finished"
        );
        Ok(output)
    }

    fn java_files(&self, root: &Path) -> Vec<PathBuf> {
        let mut files = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !self.is_skipped_dir(entry))
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(err) => {
                    warn!(error = %err, "skipping unreadable directory entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(DirEntry::into_path)
            .filter(|path| path.extension().is_some_and(|ext| ext == "java"))
            .collect::<Vec<_>>();
        files.sort();
        files
    }

    fn is_skipped_dir(&self, entry: &DirEntry) -> bool {
        if !entry.file_type().is_dir() {
            return false;
        }
        let name = entry.file_name().to_string_lossy();
        if self.config.exclude_dirs.iter().any(|dir| dir == name.as_ref()) {
            return true;
        }
        if self.config.include_tests {
            return false;
        }
        let parent_is_src = entry
            .path()
            .parent()
            .and_then(Path::file_name)
            .is_some_and(|parent| parent == "src");
        parent_is_src && matches!(name.as_ref(), "test" | "tests" | "testFixtures")
    }
}

#[async_trait]
impl DependencyExtractor for SourceExtractor {
    fn kind(&self) -> ExtractorKind {
        ExtractorKind::Source
    }

    async fn extract(&self, source: &SourceReference) -> Result<ExtractionOutput, ExtractError> {
        let SourceReference::SourceTree { root } = source else {
            return Err(ExtractError::InvalidSource(format!(
                "source extractor cannot read {}",
                source.describe()
            )));
        };

        let extractor = self.clone();
        let root = root.clone();
        tokio::task::spawn_blocking(move || extractor.extract_tree(&root))
            .await
            .map_err(|err| ExtractError::Task(err.to_string()))?
    }
}

/// Declaration pass over every unit, then the reference pass against the
/// project-wide type index.
pub fn extract_units(units: &[ParsedUnit]) -> ExtractionOutput {
    let outlines = units.iter().map(outline_unit).collect::<Vec<_>>();
    let index = TypeIndex::build(&outlines);

    let mut events = Vec::new();
    for (unit, outline) in units.iter().zip(&outlines) {
        let collected = collect_reference_events(unit, outline, &index);
        for failure in &collected.failures {
            warn!(
                path = %unit.path.display(),
                declaration = %failure.fqn,
                error = %failure.error,
                "declaration visit failed, counting no dependencies for it"
            );
        }
        if !collected.unresolved.is_empty() {
            debug!(
                path = %unit.path.display(),
                unresolved = collected.unresolved.len(),
                names = ?collected.unresolved,
                "skipped unresolved type references"
            );
        }
        events.extend(collected.events);
    }

    ExtractionOutput {
        declared: index.declared_types(),
        edges: reduce_events(&events),
    }
}

pub fn java_parser() -> Result<Parser, ExtractError> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_java::LANGUAGE.into())
        .map_err(|err| ExtractError::Parser(err.to_string()))?;
    Ok(parser)
}

/// Parses in-memory sources, e.g. fixtures. Paths are only used for logging.
pub fn parse_units<'a>(
    sources: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Result<Vec<ParsedUnit>, ExtractError> {
    let mut parser = java_parser()?;
    let mut units = Vec::new();
    for (path, source) in sources {
        let tree = parser
            .parse(source, None)
            .ok_or_else(|| ExtractError::Parser(format!("no syntax tree for {path}")))?;
        units.push(ParsedUnit {
            path: PathBuf::from(path),
            source: source.to_owned(),
            tree,
        });
    }
    Ok(units)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    fn write_file(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().expect("parent")).expect("create dirs");
        fs::write(path, content).expect("write file");
    }

    #[test]
    fn java_files_skip_test_trees_and_excluded_dirs() {
        let temp = tempdir().expect("tempdir");
        write_file(temp.path(), "src/main/java/app/A.java", "package app; class A {}");
        write_file(temp.path(), "src/test/java/app/ATest.java", "package app; class ATest {}");
        write_file(temp.path(), "target/gen/app/G.java", "package app; class G {}");
        write_file(temp.path(), "src/main/resources/readme.txt", "not java");

        let extractor = SourceExtractor::new(SourceConfig::default());
        let files = extractor
            .java_files(temp.path())
            .into_iter()
            .map(|path| path.strip_prefix(temp.path()).expect("relative").to_path_buf())
            .collect::<Vec<_>>();

        assert_eq!(files, vec![PathBuf::from("src/main/java/app/A.java")]);
    }

    #[test]
    fn extract_tree_rejects_missing_root() {
        let temp = tempdir().expect("tempdir");
        let extractor = SourceExtractor::new(SourceConfig::default());
        let err = extractor
            .extract_tree(&temp.path().join("missing"))
            .expect_err("missing root");
        assert!(matches!(err, ExtractError::InvalidSource(_)));
    }
}
