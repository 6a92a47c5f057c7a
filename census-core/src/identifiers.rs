//! Business key to surrogate identifier lookups.
//!
//! Attribute rows name their region by a business key (for example an SA1
//! code). Geometry rows are identified by a surrogate `gid`. An
//! [`IdentifierLookup`] is built once per geometry table and a
//! [`KeyMatcher`] applies it to attribute keys, normalising them the same way
//! the database side was cast.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::database::{DatabaseError, SpatialDatabase};
use crate::schema::GeometrySource;

/// Cast applied to business keys before comparison.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyCast {
    /// Compare keys as text.
    #[default]
    None,
    /// Compare keys as integers, so `"0123"` and `"123"` match.
    Integer,
}

impl KeyCast {
    /// Normalise a key the way the database renders a cast value.
    ///
    /// Keys that do not parse under an integer cast are returned trimmed so
    /// that the lookup reports them as missing rather than panicking.
    ///
    /// # Examples
    ///
    /// ```
    /// use census_core::KeyCast;
    ///
    /// assert_eq!(KeyCast::Integer.normalise(" 0123 "), "123");
    /// assert_eq!(KeyCast::None.normalise("0123"), "0123");
    /// ```
    pub fn normalise(self, key: &str) -> String {
        match self {
            Self::None => key.to_owned(),
            Self::Integer => {
                let trimmed = key.trim();
                trimmed
                    .parse::<i64>()
                    .map_or_else(|_| trimmed.to_owned(), |value| value.to_string())
            }
        }
    }
}

/// Errors raised while building an [`IdentifierLookup`].
#[derive(Debug, Error)]
pub enum LookupError {
    /// The geometry source was registered without a business key.
    #[error("geometry source {table} has no business key column")]
    NoBusinessKey {
        /// Geometry table.
        table: String,
    },
    /// Two geometry rows share the same normalised key.
    #[error("business key {key:?} maps to both gid {first} and gid {second} in {table}")]
    DuplicateKey {
        /// Geometry table.
        table: String,
        /// Offending key after normalisation.
        key: String,
        /// First identifier seen.
        first: i64,
        /// Conflicting identifier.
        second: i64,
    },
    /// Reading the key column failed.
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Immutable map from normalised business key to surrogate identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentifierLookup {
    ids: HashMap<String, i64>,
}

impl IdentifierLookup {
    /// Read the key column of a geometry source and index it.
    ///
    /// Rows with a NULL key are skipped with a warning.
    pub fn build<D>(db: &mut D, source: &GeometrySource, cast: KeyCast) -> Result<Self, LookupError>
    where
        D: SpatialDatabase + ?Sized,
    {
        let key_column = source
            .business_key
            .as_deref()
            .ok_or_else(|| LookupError::NoBusinessKey {
                table: source.table.clone(),
            })?;
        let pairs = db.key_pairs(&source.table, &source.gid_column, key_column, cast)?;
        let mut ids = HashMap::with_capacity(pairs.len());
        let mut skipped = 0_usize;
        for (gid, key) in pairs {
            let Some(key) = key else {
                skipped += 1;
                continue;
            };
            if let Some(first) = ids.insert(key.clone(), gid) {
                return Err(LookupError::DuplicateKey {
                    table: source.table.clone(),
                    key,
                    first,
                    second: gid,
                });
            }
        }
        if skipped > 0 {
            log::warn!(
                "skipped {skipped} rows of {} with a NULL {key_column}",
                source.table
            );
        }
        log::debug!("indexed {} keys from {}", ids.len(), source.table);
        Ok(Self { ids })
    }

    /// Build a lookup from pre-normalised pairs.
    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, i64)>,
        K: Into<String>,
    {
        Self {
            ids: pairs.into_iter().map(|(key, gid)| (key.into(), gid)).collect(),
        }
    }

    /// Identifier for an already-normalised key.
    pub fn get(&self, key: &str) -> Option<i64> {
        self.ids.get(key).copied()
    }

    /// Number of indexed keys.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether no keys are indexed.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Applies an [`IdentifierLookup`] to raw attribute keys.
///
/// # Examples
///
/// ```
/// use census_core::{IdentifierLookup, KeyCast, KeyMatcher};
///
/// let matcher = KeyMatcher::new(IdentifierLookup::from_pairs([("105", 7)]), KeyCast::Integer);
/// assert_eq!(matcher.resolve("00105"), Some(7));
/// assert_eq!(matcher.resolve("106"), None);
/// ```
#[derive(Debug, Clone)]
pub struct KeyMatcher {
    lookup: IdentifierLookup,
    cast: KeyCast,
}

impl KeyMatcher {
    /// Pair a lookup with the cast used to build it.
    pub fn new(lookup: IdentifierLookup, cast: KeyCast) -> Self {
        Self { lookup, cast }
    }

    /// Surrogate identifier for a raw key, if present.
    pub fn resolve(&self, key: &str) -> Option<i64> {
        self.lookup.get(&self.cast.normalise(key))
    }

    /// Underlying lookup.
    pub fn lookup(&self) -> &IdentifierLookup {
        &self.lookup
    }

    /// Cast applied to raw keys.
    pub fn cast(&self) -> KeyCast {
        self.cast
    }
}
