//! Full-text search over titles and abstracts.

use sqlx::SqlitePool;

use crate::paper::{PAPER_COLUMNS, Paper};
use crate::store::StoreError;

/// Turns free text into an FTS5 query of quoted terms.
///
/// Every whitespace-separated token becomes a phrase, so operators, column
/// filters and stray quotes in user input are matched literally. Returns
/// `None` when nothing searchable remains.
pub(crate) fn match_expression(input: &str) -> Option<String> {
    let terms: Vec<String> = input
        .split_whitespace()
        .map(|token| token.replace('"', ""))
        .filter(|token| !token.is_empty())
        .map(|token| format!("\"{token}\""))
        .collect();
    (!terms.is_empty()).then(|| terms.join(" "))
}

/// Ranked lookup, best match first.
pub(crate) async fn search(
    pool: &SqlitePool,
    query: &str,
    category: Option<&str>,
    limit: i64,
) -> Result<Vec<Paper>, StoreError> {
    let Some(expression) = match_expression(query) else {
        return Ok(Vec::new());
    };
    let category = category.map(str::trim).filter(|c| !c.is_empty());

    let sql = format!(
        "SELECT {PAPER_COLUMNS} FROM papers
         JOIN (SELECT rowid AS hit, rank FROM papers_fts WHERE papers_fts MATCH ?) f
           ON papers.rowid = f.hit
         WHERE (? IS NULL OR categories LIKE '%' || ? || '%')
         ORDER BY f.rank LIMIT ?"
    );
    let papers = sqlx::query_as::<_, Paper>(&sql)
        .bind(expression)
        .bind(category)
        .bind(category)
        .bind(limit)
        .fetch_all(pool)
        .await?;
    Ok(papers)
}
