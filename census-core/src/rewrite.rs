//! Lazy rewriting of attribute rows onto geometry identifiers.
//!
//! The first row of an attribute source is its header. The rewriter prepends
//! a `gid` column to the header and, for every data row, the surrogate
//! identifier resolved from the row's first cell. Rows are produced one at a
//! time in source order and a missing key surfaces only when its row is
//! pulled.

use std::error::Error as StdError;

use thiserror::Error;

use crate::identifiers::KeyMatcher;
use crate::schema::GID_COLUMN;

/// Fallible row source, typically a CSV reader.
pub type RowResult = Result<Vec<String>, Box<dyn StdError + Send + Sync>>;

/// Errors raised while rewriting rows.
#[derive(Debug, Error)]
pub enum RewriteError {
    /// A row's business key has no geometry.
    #[error("key {key:?} on line {line} of {source_name} has no matching geometry")]
    KeyNotFound {
        /// Unmatched business key.
        key: String,
        /// Name of the attribute source.
        source_name: String,
        /// One-based line number, counting the header.
        line: usize,
    },
    /// A data row had no cells to read a key from.
    #[error("line {line} of {source_name} is empty")]
    EmptyRow {
        /// Name of the attribute source.
        source_name: String,
        /// One-based line number, counting the header.
        line: usize,
    },
    /// The source is missing its header row.
    #[error("{source_name} has no header row")]
    MissingHeader {
        /// Name of the attribute source.
        source_name: String,
    },
    /// The underlying row source failed.
    #[error("failed to read line {line} of {source_name}")]
    Source {
        /// Name of the attribute source.
        source_name: String,
        /// One-based line number, counting the header.
        line: usize,
        /// Reader error.
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

/// Iterator adaptor produced by [`rewrite_rows`].
pub struct RewrittenRows<'a, I> {
    rows: I,
    matcher: &'a KeyMatcher,
    source_name: String,
    line: usize,
}

impl<I> std::fmt::Debug for RewrittenRows<'_, I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RewrittenRows")
            .field("source_name", &self.source_name)
            .field("line", &self.line)
            .finish_non_exhaustive()
    }
}

/// Rewrite attribute rows so that each is prefixed by its geometry `gid`.
///
/// Row count and order are preserved. The header gains a leading `gid` cell
/// and data rows gain the resolved identifier rendered in decimal.
///
/// # Examples
///
/// ```
/// use census_core::{IdentifierLookup, KeyCast, KeyMatcher, rewrite_rows};
///
/// let matcher = KeyMatcher::new(IdentifierLookup::from_pairs([("105", 7)]), KeyCast::None);
/// let rows = vec![
///     Ok(vec!["region_id".to_owned(), "total".to_owned()]),
///     Ok(vec!["105".to_owned(), "42".to_owned()]),
/// ];
/// let rewritten: Vec<_> = rewrite_rows(rows, &matcher, "B01.csv")
///     .collect::<Result<_, _>>()
///     .expect("all keys resolve");
/// assert_eq!(rewritten[0], ["gid", "region_id", "total"]);
/// assert_eq!(rewritten[1], ["7", "105", "42"]);
/// ```
pub fn rewrite_rows<'a, I>(
    rows: I,
    matcher: &'a KeyMatcher,
    source_name: impl Into<String>,
) -> RewrittenRows<'a, I::IntoIter>
where
    I: IntoIterator<Item = RowResult>,
{
    RewrittenRows {
        rows: rows.into_iter(),
        matcher,
        source_name: source_name.into(),
        line: 0,
    }
}

impl<I> RewrittenRows<'_, I> {
    fn rewrite(&self, mut row: Vec<String>) -> Result<Vec<String>, RewriteError> {
        if self.line == 1 {
            row.insert(0, GID_COLUMN.to_owned());
            return Ok(row);
        }
        let key = row.first().ok_or_else(|| RewriteError::EmptyRow {
            source_name: self.source_name.clone(),
            line: self.line,
        })?;
        let gid = self
            .matcher
            .resolve(key)
            .ok_or_else(|| RewriteError::KeyNotFound {
                key: key.clone(),
                source_name: self.source_name.clone(),
                line: self.line,
            })?;
        row.insert(0, gid.to_string());
        Ok(row)
    }
}

impl<I> Iterator for RewrittenRows<'_, I>
where
    I: Iterator<Item = RowResult>,
{
    type Item = Result<Vec<String>, RewriteError>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.rows.next()?;
        self.line += 1;
        match next {
            Err(source) => Some(Err(RewriteError::Source {
                source_name: self.source_name.clone(),
                line: self.line,
                source,
            })),
            Ok(row) => Some(self.rewrite(row)),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.rows.size_hint()
    }
}

/// Collect every rewritten row, splitting off the header.
///
/// Stops at the first error so that nothing is loaded for a source with an
/// unmatched key.
pub fn collect_rewritten<I>(
    mut rows: RewrittenRows<'_, I>,
) -> Result<(Vec<String>, Vec<Vec<String>>), RewriteError>
where
    I: Iterator<Item = RowResult>,
{
    let source_name = rows.source_name.clone();
    let header = rows
        .next()
        .ok_or(RewriteError::MissingHeader { source_name })??;
    let data = rows.collect::<Result<Vec<_>, _>>()?;
    Ok((header, data))
}
