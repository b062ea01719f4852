//! Reference extraction from unpacked source trees.
//!
//! [`extract_references`] is a pure function of on-disk content: it walks the
//! tree in sorted order, scans every `.bbl`, `.bib` and `.tex` file line by
//! line against the [`patterns`] battery and returns normalized identifiers in
//! first-seen order. When no text file yields a match, text extracted from any
//! embedded PDFs is scanned instead.

pub mod patterns;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument};
use walkdir::WalkDir;

use crate::paper::normalize_id;
use crate::pdf;

const TEXT_EXTENSIONS: [&str; 3] = ["bbl", "bib", "tex"];

/// Extracts the identifiers cited by the source tree at `source_dir`.
///
/// Versions are stripped before deduplication and `self_id` is never
/// returned. Unreadable files are skipped; this never fails.
#[instrument(fields(source_dir = %source_dir.display()))]
pub fn extract_references(source_dir: &Path, self_id: &str) -> Vec<String> {
    let mut collector = Collector::new(self_id);
    let mut pdf_files: Vec<PathBuf> = Vec::new();

    for entry in WalkDir::new(source_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
    {
        let path = entry.path();
        let Some(ext) = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
        else {
            continue;
        };

        if ext == "pdf" {
            pdf_files.push(path.to_path_buf());
        } else if TEXT_EXTENSIONS.contains(&ext.as_str()) {
            scan_text_file(path, &mut collector);
        }
    }

    if collector.refs.is_empty() && !pdf_files.is_empty() {
        debug!(count = pdf_files.len(), "no references in text files, scanning embedded PDFs");
        for path in &pdf_files {
            match pdf::extract_text(path) {
                Ok(text) => collector.scan(&text),
                Err(e) => debug!(error = %e, "skipping embedded PDF"),
            }
        }
    }

    debug!(count = collector.refs.len(), "extracted references");
    collector.refs
}

fn scan_text_file(path: &Path, collector: &mut Collector<'_>) {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "skipping unreadable file");
            return;
        }
    };
    // TeX sources are frequently Latin-1; identifiers are ASCII either way.
    let text = String::from_utf8_lossy(&bytes);
    for line in text.lines() {
        collector.scan(line);
    }
}

/// First-seen ordered, deduplicated set of normalized identifiers.
struct Collector<'a> {
    self_id: &'a str,
    seen: HashSet<String>,
    refs: Vec<String>,
}

impl<'a> Collector<'a> {
    fn new(self_id: &'a str) -> Self {
        Self {
            self_id: normalize_id(self_id),
            seen: HashSet::new(),
            refs: Vec::new(),
        }
    }

    fn scan(&mut self, text: &str) {
        for raw in patterns::scan(text) {
            let id = normalize_id(raw);
            if id == self.self_id || self.seen.contains(id) {
                continue;
            }
            self.seen.insert(id.to_string());
            self.refs.push(id.to_string());
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_versions_collapse_and_self_dropped() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("main.bbl"),
            "\\bibitem{a} arXiv:2301.00001\n\\bibitem{b} arXiv:2301.00001v3\n\\bibitem{c} arXiv:2302.99999\n",
        )
        .unwrap();

        let refs = extract_references(dir.path(), "2302.99999");
        assert_eq!(refs, vec!["2301.00001".to_string()]);
    }

    #[test]
    fn test_order_follows_walk_then_lines() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("b.tex"), "arXiv:1111.11111\n").unwrap();
        fs::write(
            dir.path().join("a.bib"),
            "eprint = {2222.22222}\nurl = {https://arxiv.org/abs/3333.33333}\n",
        )
        .unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("x.bbl"), "hep-th/9901001\n").unwrap();

        let refs = extract_references(dir.path(), "0000.00000");
        assert_eq!(
            refs,
            vec!["2222.22222", "3333.33333", "1111.11111", "hep-th/9901001"]
        );
    }

    #[test]
    fn test_ignores_other_extensions() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("notes.txt"), "arXiv:2301.00001\n").unwrap();
        fs::write(dir.path().join("fig.eps"), "arXiv:2301.00002\n").unwrap();

        assert!(extract_references(dir.path(), "9999.99999").is_empty());
    }

    #[test]
    fn test_missing_dir_yields_nothing() {
        let dir = TempDir::new().unwrap();
        assert!(extract_references(&dir.path().join("absent"), "2301.00001").is_empty());
    }

    #[test]
    fn test_non_utf8_file_still_scanned() {
        let dir = TempDir::new().unwrap();
        let mut content = b"Caf\xe9 arXiv:1706.03762v5\n".to_vec();
        content.extend_from_slice(b"\xff\xfe\n");
        fs::write(dir.path().join("main.tex"), content).unwrap();

        assert_eq!(extract_references(dir.path(), "2301.00001"), vec!["1706.03762"]);
    }

    #[test]
    fn test_broken_embedded_pdf_is_skipped() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("main.tex"), "no identifiers here\n").unwrap();
        fs::write(dir.path().join("figure.pdf"), b"not really a pdf").unwrap();

        assert!(extract_references(dir.path(), "2301.00001").is_empty());
    }
}
