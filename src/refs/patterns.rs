//! Ordered battery of identifier matchers.
//!
//! Each matcher captures the identifier in group 1. Order matters only for
//! the first-seen ordering of results.

use std::sync::LazyLock;

use regex::Regex;

use crate::paper::compile_static_regex;

/// Which textual form of an identifier a matcher recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdShape {
    /// `arXiv:2301.00001v2`
    Modern,
    /// `arXiv preprint arXiv:2301.00001`
    Preprint,
    /// `arxiv.org/abs/2301.00001`
    AbsUrl,
    /// `arxiv.org/pdf/2301.00001`
    PdfUrl,
    /// `arXiv:hep-th/9901001`
    Legacy,
    /// `arxiv.org/abs/hep-th/9901001`
    LegacyAbsUrl,
    /// `ar{X}iv:{\tt 1308.0850}` and other markup-mangled spellings
    Mangled,
    /// BibTeX `eprint = {2301.00001}`
    Eprint,
    /// bare `hep-th/9901001`
    BareHyphenated,
    /// bare `cs/0001001`
    BareArchive,
    /// bare `math.CO/0001001`
    BareSubject,
}

/// One tagged entry of the battery.
#[derive(Debug)]
pub struct Matcher {
    pub shape: IdShape,
    regex: Regex,
}

impl Matcher {
    fn new(shape: IdShape, pattern: &str) -> Self {
        Self {
            shape,
            regex: compile_static_regex(pattern),
        }
    }

    /// Captured identifiers in `text`, in order of appearance.
    pub fn find_iter<'t>(&self, text: &'t str) -> impl Iterator<Item = &'t str> {
        self.regex
            .captures_iter(text)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str())
    }
}

static BATTERY: LazyLock<Vec<Matcher>> = LazyLock::new(|| {
    vec![
        Matcher::new(IdShape::Modern, r"(?i)arXiv[:\s]+(\d{4}\.\d{4,5}(?:v\d+)?)"),
        Matcher::new(
            IdShape::Preprint,
            r"(?i)arXiv\s+preprint\s+arXiv[:\s]+(\d{4}\.\d{4,5}(?:v\d+)?)",
        ),
        Matcher::new(IdShape::AbsUrl, r"(?i)arxiv\.org/abs/(\d{4}\.\d{4,5}(?:v\d+)?)"),
        Matcher::new(IdShape::PdfUrl, r"(?i)arxiv\.org/pdf/(\d{4}\.\d{4,5}(?:v\d+)?)"),
        Matcher::new(IdShape::Legacy, r"(?i)arXiv[:\s]+([a-z-]+/\d{7}(?:v\d+)?)"),
        Matcher::new(
            IdShape::LegacyAbsUrl,
            r"(?i)arxiv\.org/abs/([a-z-]+/\d{7}(?:v\d+)?)",
        ),
        Matcher::new(IdShape::Mangled, r"ar.{0,5}iv.{0,20}?(\d{4}\.\d{4,5})"),
        Matcher::new(
            IdShape::Eprint,
            r#"eprint\s*=\s*[{"']?(\d{4}\.\d{4,5}(?:v\d+)?)"#,
        ),
        Matcher::new(IdShape::BareHyphenated, r"\b([a-z]+-[a-z]+/\d{7})\b"),
        Matcher::new(
            IdShape::BareArchive,
            r"\b((?:cs|math|astro-ph|gr-qc|nlin|nucl-ex|nucl-th|physics|q-bio|q-fin|stat)/\d{7})\b",
        ),
        Matcher::new(IdShape::BareSubject, r"(?i)\b([a-z]+\.[A-Z]{2}/\d{7})\b"),
    ]
});

/// The battery in match order.
pub fn battery() -> &'static [Matcher] {
    &BATTERY
}

/// Every raw identifier the battery finds in `text`, pattern by pattern.
pub fn scan(text: &str) -> impl Iterator<Item = &str> {
    battery().iter().flat_map(move |m| m.find_iter(text))
}
