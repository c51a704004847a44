use std::collections::HashMap;
use std::sync::Arc;

use carve_config::CarveConfig;
use carve_core::{ExtractionOutput, ExtractorKind, SourceReference};

use crate::{ArtifactExtractor, DependencyExtractor, ExtractError, SourceExtractor};

/// Extractors keyed by kind, resolved once from configuration.
#[derive(Clone, Default)]
pub struct ExtractorTable {
    extractors: HashMap<ExtractorKind, Arc<dyn DependencyExtractor>>,
}

impl ExtractorTable {
    pub fn from_config(config: &CarveConfig) -> Self {
        let mut table = Self::default();
        table.register(Arc::new(ArtifactExtractor::new(config.artifact.clone())));
        table.register(Arc::new(SourceExtractor::new(config.source.clone())));
        table
    }

    /// Replaces any extractor already registered for the same kind.
    pub fn register(&mut self, extractor: Arc<dyn DependencyExtractor>) {
        self.extractors.insert(extractor.kind(), extractor);
    }

    pub fn get(&self, kind: ExtractorKind) -> Option<Arc<dyn DependencyExtractor>> {
        self.extractors.get(&kind).cloned()
    }

    pub async fn extract(&self, source: &SourceReference) -> Result<ExtractionOutput, ExtractError> {
        let kind = source.extractor_kind();
        let extractor = self
            .get(kind)
            .ok_or(ExtractError::Unsupported(kind.as_str()))?;
        extractor.extract(source).await
    }
}

impl std::fmt::Debug for ExtractorTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds = self.extractors.keys().map(|kind| kind.as_str()).collect::<Vec<_>>();
        kinds.sort_unstable();
        f.debug_struct("ExtractorTable").field("kinds", &kinds).finish()
    }
}
