//! Join paths from attribute tables to geometry sources.
//!
//! Linkages are registered in a second pass once every attribute table of a
//! batch is loaded. Both ends must already be registered, which enforces
//! the load order: geometries first, attributes second, links last.

use std::fmt;

use thiserror::Error;

use crate::database::{Database, DatabaseError};
use crate::schema::{GeometryLinkage, GeometryRelation, GeometrySource, TableInfo};

/// Which end of a linkage a table was expected to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableRole {
    /// A registered geometry source.
    Geometry,
    /// A registered attribute table.
    Attribute,
}

impl fmt::Display for TableRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Geometry => "geometry source",
            Self::Attribute => "attribute table",
        })
    }
}

/// Errors raised while registering or querying linkages.
#[derive(Debug, Error)]
pub enum LinkageError {
    /// A table is not registered in the expected role.
    #[error("{table} is not a registered {role}")]
    UnknownTable {
        /// Unregistered table.
        table: String,
        /// Role it was expected to play.
        role: TableRole,
    },
    /// The backend failed.
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

fn geometry_source<D>(db: &mut D, table: &str) -> Result<GeometrySource, LinkageError>
where
    D: Database + ?Sized,
{
    db.find_geometry_source(table)?
        .ok_or_else(|| LinkageError::UnknownTable {
            table: table.to_owned(),
            role: TableRole::Geometry,
        })
}

fn attribute_table<D>(db: &mut D, table: &str) -> Result<TableInfo, LinkageError>
where
    D: Database + ?Sized,
{
    db.find_table_info(table)?
        .ok_or_else(|| LinkageError::UnknownTable {
            table: table.to_owned(),
            role: TableRole::Attribute,
        })
}

/// A linkage waiting for the second pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingLinkage {
    /// Geometry table.
    pub geo_table: String,
    /// Join column on the geometry table.
    pub geo_column: String,
    /// Attribute table.
    pub attr_table: String,
    /// Join column on the attribute table.
    pub attr_column: String,
}

impl PendingLinkage {
    fn insert<D>(&self, db: &mut D) -> Result<GeometryLinkage, LinkageError>
    where
        D: Database + ?Sized,
    {
        let source = geometry_source(db, &self.geo_table)?;
        let attribute = attribute_table(db, &self.attr_table)?;
        let linkage = GeometryLinkage {
            geometry_source_id: source.id,
            geo_column: self.geo_column.clone(),
            attribute_table_id: attribute.id,
            attr_column: self.attr_column.clone(),
        };
        db.insert_linkage(&linkage)?;
        Ok(linkage)
    }
}

/// Record that `attr_table.attr_column` joins `geo_table.geo_column`.
///
/// Each call inserts one row; calling twice for the same pair records two.
pub fn link<D>(
    db: &mut D,
    geo_table: &str,
    geo_column: &str,
    attr_table: &str,
    attr_column: &str,
) -> Result<GeometryLinkage, LinkageError>
where
    D: Database + ?Sized,
{
    let linkage = PendingLinkage {
        geo_table: geo_table.to_owned(),
        geo_column: geo_column.to_owned(),
        attr_table: attr_table.to_owned(),
        attr_column: attr_column.to_owned(),
    }
    .insert(db)?;
    db.commit()?;
    log::debug!("linked {attr_table}.{attr_column} to {geo_table}.{geo_column}");
    Ok(linkage)
}

/// Linkages queued during attribute loading.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingLinkages(Vec<PendingLinkage>);

impl PendingLinkages {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a linkage.
    pub fn push(&mut self, linkage: PendingLinkage) {
        self.0.push(linkage);
    }

    /// Number of queued linkages.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Queued linkages in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &PendingLinkage> {
        self.0.iter()
    }

    /// Register every queued linkage and commit once.
    ///
    /// Stops at the first unresolved table; nothing is committed in that
    /// case.
    pub fn register_all<D>(&self, db: &mut D) -> Result<Vec<GeometryLinkage>, LinkageError>
    where
        D: Database + ?Sized,
    {
        let registered = self
            .0
            .iter()
            .map(|pending| pending.insert(db))
            .collect::<Result<Vec<_>, _>>();
        match registered {
            Ok(linkages) => {
                db.commit()?;
                log::info!("registered {} linkages", linkages.len());
                Ok(linkages)
            }
            Err(err) => {
                db.rollback()?;
                Err(err)
            }
        }
    }
}

/// Linkages recorded between a geometry table and an attribute table.
pub fn find_linkages<D>(
    db: &mut D,
    geo_table: &str,
    attr_table: &str,
) -> Result<Vec<GeometryLinkage>, LinkageError>
where
    D: Database + ?Sized,
{
    let source = geometry_source(db, geo_table)?;
    let attribute = attribute_table(db, attr_table)?;
    Ok(db
        .linkages()?
        .into_iter()
        .filter(|linkage| {
            linkage.geometry_source_id == source.id && linkage.attribute_table_id == attribute.id
        })
        .collect())
}

/// Cached overlap between two geometry tables, if one was computed.
pub fn geometry_relation<D>(
    db: &mut D,
    from_table: &str,
    to_table: &str,
) -> Result<Option<GeometryRelation>, LinkageError>
where
    D: Database + ?Sized,
{
    let from = geometry_source(db, from_table)?;
    let to = geometry_source(db, to_table)?;
    Ok(db.find_geometry_relation(from.id, to.id)?)
}
