//! Extension allow-list deciding which files are worth sending to the
//! content extractor.

use std::collections::HashSet;
use std::path::Path;

/// Immutable set of lowercase extensions (without the leading dot).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionFilter {
    extensions: HashSet<String>,
}

impl ExtensionFilter {
    /// Load an allow-list file: one extension per line, `#` comments and
    /// blank lines ignored.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let filter = Self::parse(&raw);
        tracing::debug!(
            path = %path.display(),
            count = filter.len(),
            "Extension filter loaded"
        );
        Ok(filter)
    }

    pub fn parse(raw: &str) -> Self {
        let extensions = raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|line| line.trim_start_matches('.').to_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        Self { extensions }
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    pub fn contains(&self, extension: &str) -> bool {
        self.extensions.contains(&extension.to_lowercase())
    }

    /// Whether the final component of `path` carries an allowed extension.
    /// Files without an extension never match.
    pub fn matches_path(&self, path: &str) -> bool {
        let name = path.rsplit('/').next().unwrap_or(path);
        match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => self.contains(ext),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "# document formats\npdf\n  DOCX  \n\n.txt\n#xls\n";

    #[test]
    fn parse_skips_comments_and_blanks() {
        let filter = ExtensionFilter::parse(SAMPLE);
        assert_eq!(filter.len(), 3);
        assert!(filter.contains("pdf"));
        assert!(filter.contains("docx"));
        assert!(filter.contains("txt"));
        assert!(!filter.contains("xls"));
    }

    #[test]
    fn match_is_case_insensitive_and_exact() {
        let filter = ExtensionFilter::parse(SAMPLE);
        assert!(filter.matches_path("/proj/run/REPORT.PDF"));
        assert!(filter.matches_path("notes.txt"));
        assert!(!filter.matches_path("/proj/archive.pdfx"));
        assert!(!filter.matches_path("/proj/file.p"));
    }

    #[test]
    fn no_extension_never_matches() {
        let filter = ExtensionFilter::parse("pdf\n");
        assert!(!filter.matches_path("/proj/pdf"));
        assert!(!filter.matches_path("/proj/.pdf"));
        assert!(!filter.matches_path("/proj.pdf/readme"));
        assert!(!filter.matches_path("/proj/file."));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("extensions.conf");
        std::fs::write(&path, SAMPLE).unwrap();
        let filter = ExtensionFilter::load(&path).unwrap();
        assert_eq!(filter, ExtensionFilter::parse(SAMPLE));
    }

    #[test]
    fn empty_filter_matches_nothing() {
        let filter = ExtensionFilter::default();
        assert!(filter.is_empty());
        assert!(!filter.matches_path("a.pdf"));
    }
}
