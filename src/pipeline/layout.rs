//! On-disk artifact layout, sharded by identifier prefix.
//!
//! ```text
//! <root>/pdf/2301/2301.00001.pdf
//! <root>/pdf/hep-th/9901001.pdf
//! <root>/src/2301/2301.00001/...
//! <root>/src/hep-th/9901001/...
//! ```

use std::path::{Path, PathBuf};

use crate::paper::PaperId;

const PDF_DIR: &str = "pdf";
const SRC_DIR: &str = "src";

/// Maps identifiers to artifact paths under a cache root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    root: PathBuf,
}

impl ArtifactLayout {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn pdf_path(&self, id: &PaperId) -> PathBuf {
        self.root
            .join(PDF_DIR)
            .join(id.shard())
            .join(format!("{}.pdf", id.file_stem()))
    }

    #[must_use]
    pub fn source_dir(&self, id: &PaperId) -> PathBuf {
        self.root.join(SRC_DIR).join(id.shard()).join(id.file_stem())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_modern_layout() {
        let layout = ArtifactLayout::new("/cache");
        let id = PaperId::parse("2301.00001v2").unwrap();
        assert_eq!(layout.pdf_path(&id), Path::new("/cache/pdf/2301/2301.00001.pdf"));
        assert_eq!(layout.source_dir(&id), Path::new("/cache/src/2301/2301.00001"));
    }

    #[test]
    fn test_legacy_layout_shards_by_archive() {
        let layout = ArtifactLayout::new("/cache");
        let id = PaperId::parse("hep-th/9901001").unwrap();
        assert_eq!(layout.pdf_path(&id), Path::new("/cache/pdf/hep-th/9901001.pdf"));
        assert_eq!(layout.source_dir(&id), Path::new("/cache/src/hep-th/9901001"));
    }
}
