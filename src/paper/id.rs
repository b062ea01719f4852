//! arXiv identifier validation, normalization and derived storage keys.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Compiles a regex that is known valid at build time.
///
/// # Panics
///
/// Panics if the pattern is invalid; only used for literal patterns.
pub(crate) fn compile_static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}

/// `YYMM.NNNN` (2007-2014) or `YYMM.NNNNN` (2015+).
static MODERN_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"^\d{4}\.\d{4,5}$"));

/// `archive/YYMMNNN`, `archive-sub/YYMMNNN` or `archive.SC/YYMMNNN`.
static LEGACY_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r"^[a-z]+(?:-[a-z]+)*(?:\.[A-Za-z]{2})?/\d{7}$")
});

/// Errors produced while parsing an identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaperIdError {
    /// Input was empty after trimming.
    #[error("empty arXiv identifier")]
    Empty,

    /// Input matched neither identifier shape.
    #[error(
        "invalid arXiv identifier '{0}'\n  Suggestion: use YYMM.NNNNN (e.g. 2301.00001) or archive/YYMMNNN (e.g. hep-th/9901001)"
    )]
    Invalid(String),
}

/// A validated, version-free arXiv identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PaperId(String);

impl PaperId {
    /// Parses and normalizes an identifier.
    ///
    /// Accepts an optional `arXiv:` prefix and a trailing `vN` version, both of
    /// which are stripped.
    ///
    /// # Errors
    ///
    /// Returns [`PaperIdError`] if the input is empty or not a valid shape.
    pub fn parse(raw: &str) -> Result<Self, PaperIdError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(PaperIdError::Empty);
        }
        let without_prefix = trimmed
            .get(..6)
            .filter(|prefix| prefix.eq_ignore_ascii_case("arxiv:"))
            .map_or(trimmed, |_| &trimmed[6..]);
        let candidate = normalize_id(without_prefix.trim());

        if MODERN_ID_RE.is_match(candidate) || LEGACY_ID_RE.is_match(candidate) {
            Ok(Self(candidate.to_string()))
        } else {
            Err(PaperIdError::Invalid(trimmed.to_string()))
        }
    }

    /// Returns the identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for `archive/YYMMNNN` identifiers.
    #[must_use]
    pub fn is_legacy(&self) -> bool {
        self.0.contains('/')
    }

    /// Directory shard: the archive prefix for legacy IDs, the `YYMM` prefix otherwise.
    #[must_use]
    pub fn shard(&self) -> &str {
        shard_for(&self.0)
    }

    /// File or directory name inside the shard.
    #[must_use]
    pub fn file_stem(&self) -> &str {
        self.0.rsplit_once('/').map_or(self.0.as_str(), |(_, rest)| rest)
    }

    /// Year derived from the identifier's date segment.
    #[must_use]
    pub fn year(&self) -> Option<i32> {
        year_from_id(&self.0)
    }
}

impl fmt::Display for PaperId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PaperId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for PaperId {
    type Err = PaperIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PaperId {
    type Error = PaperIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PaperId> for String {
    fn from(value: PaperId) -> Self {
        value.0
    }
}

/// Strips a trailing `vN` version suffix (N all digits, at least one).
///
/// `2301.00001v2` becomes `2301.00001`; `hep-th/9901001v3` becomes
/// `hep-th/9901001`; anything else is returned unchanged.
#[must_use]
pub fn normalize_id(id: &str) -> &str {
    let Some(idx) = id.rfind(['v', 'V']) else {
        return id;
    };
    let suffix = &id[idx + 1..];
    if idx > 0 && !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()) {
        &id[..idx]
    } else {
        id
    }
}

/// Shard directory name for an identifier string.
#[must_use]
pub fn shard_for(id: &str) -> &str {
    if let Some((archive, _)) = id.split_once('/') {
        return archive;
    }
    id.get(..4).unwrap_or(id)
}

/// Derives a publication year from the two leading digits of the date segment.
///
/// Legacy identifiers use the digits after the slash. Two-digit years 91-99
/// map to the 1990s; every other value maps to 2000-2090.
#[must_use]
pub fn year_from_id(id: &str) -> Option<i32> {
    let segment = id.rsplit_once('/').map_or(id, |(_, rest)| rest);
    let digits = segment.as_bytes().get(..2)?;
    if !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    let yy = i32::from(digits[0] - b'0') * 10 + i32::from(digits[1] - b'0');
    if (91..=99).contains(&yy) {
        Some(1900 + yy)
    } else {
        Some(2000 + yy)
    }
}
