//! Approximate matching over extracted document text.
//!
//! Scores are in `0.0..=1.0`. A case-insensitive substring hit scores 1.0.
//! Otherwise the best of two measures wins:
//!
//! - positional agreement between the query and every query-length window
//!   of the text (Hamming distance over characters)
//! - normalized Levenshtein similarity between the query and each token of
//!   at least [`MIN_TOKEN_CHARS`] characters
//!
//! All positions are character indices, so snippets never split a UTF-8
//! sequence.

/// Default acceptance threshold.
pub const DEFAULT_THRESHOLD: f64 = 0.6;

/// Context characters around a match in a snippet.
pub const SNIPPET_CHARS: usize = 200;

/// Tokens shorter than this are not compared.
pub const MIN_TOKEN_CHARS: usize = 3;

const ELLIPSIS: &str = "...";

/// Best match of a query inside one document.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextMatch {
    pub score: f64,
    /// Character offset of the match, when one was located.
    pub position: Option<usize>,
    /// Length of the matched span in characters.
    pub len: usize,
}

/// Lowercases char by char, keeping one output char per input char.
fn fold(text: &str) -> Vec<char> {
    text.chars()
        .map(|c| c.to_lowercase().next().unwrap_or(c))
        .collect()
}

fn find(haystack: &[char], needle: &[char]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Case-insensitive substring match.
#[must_use]
pub fn exact_match(text: &str, query: &str) -> Option<TextMatch> {
    let query = fold(query.trim());
    find(&fold(text), &query).map(|position| TextMatch {
        score: 1.0,
        position: Some(position),
        len: query.len(),
    })
}

#[allow(clippy::cast_precision_loss)]
fn window_similarity(window: &[char], query: &[char]) -> f64 {
    match strsim::generic_hamming(window, query) {
        Ok(distance) => 1.0 - distance as f64 / query.len() as f64,
        Err(_) => 0.0,
    }
}

/// Scores `query` against `text` and returns the best match if it clears
/// `threshold`.
#[must_use]
pub fn fuzzy_match(text: &str, query: &str, threshold: f64) -> Option<TextMatch> {
    let query = fold(query.trim());
    if query.is_empty() {
        return None;
    }
    let text = fold(text);
    if let Some(position) = find(&text, &query) {
        return Some(TextMatch {
            score: 1.0,
            position: Some(position),
            len: query.len(),
        });
    }

    let mut best = TextMatch {
        score: 0.0,
        position: None,
        len: query.len(),
    };

    if text.len() >= query.len() {
        for (start, window) in text.windows(query.len()).enumerate() {
            let score = window_similarity(window, &query);
            if score > best.score {
                best = TextMatch {
                    score,
                    position: Some(start),
                    len: query.len(),
                };
            }
        }
    }

    let query_text: String = query.iter().collect();
    let mut start = 0;
    for token in text.split(|c| c.is_whitespace()) {
        if token.len() >= MIN_TOKEN_CHARS {
            let token_text: String = token.iter().collect();
            let score = strsim::normalized_levenshtein(&token_text, &query_text);
            if score > best.score {
                best = TextMatch {
                    score,
                    position: Some(start),
                    len: token.len(),
                };
            }
        }
        start += token.len() + 1;
    }

    (best.score > threshold).then_some(best)
}

/// Context around a match, or the start of the text when there is none.
///
/// Up to half of `context` characters are kept on each side of the match;
/// truncated ends are marked with `...`.
#[must_use]
pub fn snippet(text: &str, found: Option<TextMatch>, context: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    let Some((position, len)) = found.and_then(|m| m.position.map(|p| (p, m.len))) else {
        if chars.len() > context {
            let mut head: String = chars[..context].iter().collect();
            head.push_str(ELLIPSIS);
            return head;
        }
        return text.to_string();
    };

    let start = position.saturating_sub(context / 2).min(chars.len());
    let end = (position + len + context / 2).min(chars.len());
    let mut out = String::new();
    if start > 0 {
        out.push_str(ELLIPSIS);
    }
    out.extend(&chars[start..end]);
    if end < chars.len() {
        out.push_str(ELLIPSIS);
    }
    out
}
