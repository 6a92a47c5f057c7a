//! Storage seams used by the registrars and the pipeline.
//!
//! [`SpatialDatabase`] covers the physical tables: introspection, geometry
//! columns, indexes, bulk loads and schema moves. [`SchemaStore`] covers the
//! catalogue tables described in [`crate::schema`]. Both are implemented by
//! the PostGIS adapter in `census-data` and by the in-memory double in
//! [`crate::test_support`].

use std::error::Error as StdError;

use thiserror::Error;

use crate::identifiers::KeyCast;
use crate::schema::{
    ColumnInfo, GeometryLinkage, GeometryRelation, GeometrySource, GeometrySourceId,
    GeometrySourceProjected, GeometryType, Metadata, NewGeometrySource, Srid, TableInfo,
    TableInfoId, TableSchema,
};

/// Errors raised by storage backends.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// The named table does not exist.
    #[error("table {table} does not exist")]
    NoSuchTable {
        /// Requested table.
        table: String,
    },
    /// The named column does not exist.
    #[error("column {column} does not exist on table {table}")]
    NoSuchColumn {
        /// Owning table.
        table: String,
        /// Requested column.
        column: String,
    },
    /// A data row did not match the header width.
    #[error("row {line} of {table} has {found} cells but the header has {expected}")]
    RaggedRow {
        /// Target table.
        table: String,
        /// One-based data row number.
        line: usize,
        /// Header width.
        expected: usize,
        /// Row width.
        found: usize,
    },
    /// The backend rejected a statement.
    #[error("{operation} failed")]
    Backend {
        /// Description of the failed operation.
        operation: String,
        /// Underlying driver error.
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl DatabaseError {
    /// Wrap a driver error with the operation that produced it.
    pub fn backend(
        operation: impl Into<String>,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self::Backend {
            operation: operation.into(),
            source: source.into(),
        }
    }
}

/// Physical table operations against a spatially-enabled database.
///
/// Writes are buffered in the current session until [`commit`] is called.
///
/// [`commit`]: SpatialDatabase::commit
pub trait SpatialDatabase {
    /// Names of every table in the default namespace.
    fn table_names(&mut self) -> Result<Vec<String>, DatabaseError>;

    /// Capture the column layout of a table.
    fn describe_table(&mut self, table: &str) -> Result<TableSchema, DatabaseError>;

    /// Distinct geometry type names of the non-null values in a column.
    fn geometry_types(&mut self, table: &str, column: &str) -> Result<Vec<String>, DatabaseError>;

    /// Add an empty two-dimensional geometry column.
    fn add_geometry_column(
        &mut self,
        table: &str,
        column: &str,
        srid: Srid,
        geometry_type: GeometryType,
    ) -> Result<(), DatabaseError>;

    /// Populate `target` with the 2D-forced transform of `source` into `srid`.
    ///
    /// Returns the number of rows updated.
    fn transform_geometry(
        &mut self,
        table: &str,
        source: &str,
        target: &str,
        srid: Srid,
    ) -> Result<u64, DatabaseError>;

    /// Replace invalid geometries in a column with repaired multi-geometries.
    ///
    /// Returns the number of rows repaired.
    fn repair_geometries(&mut self, table: &str, column: &str) -> Result<u64, DatabaseError>;

    /// Whether an index with the given name exists.
    fn index_exists(&mut self, index: &str) -> Result<bool, DatabaseError>;

    /// Build a spatial index over a geometry column.
    fn create_spatial_index(
        &mut self,
        index: &str,
        table: &str,
        column: &str,
    ) -> Result<(), DatabaseError>;

    /// Build a unique index over a scalar column.
    fn create_unique_index(
        &mut self,
        index: &str,
        table: &str,
        column: &str,
    ) -> Result<(), DatabaseError>;

    /// Read every `(surrogate id, business key)` pair of a table.
    ///
    /// The key is cast according to `cast` and rendered as text; `None`
    /// marks a NULL key.
    fn key_pairs(
        &mut self,
        table: &str,
        gid_column: &str,
        key_column: &str,
        cast: KeyCast,
    ) -> Result<Vec<(i64, Option<String>)>, DatabaseError>;

    /// Create and fill a table from a header and data rows.
    ///
    /// The first column becomes the primary key. Returns the number of rows
    /// written.
    fn load_attribute_table(
        &mut self,
        table: &str,
        header: &[String],
        rows: &[Vec<String>],
    ) -> Result<u64, DatabaseError>;

    /// Create a schema namespace.
    fn create_schema(&mut self, schema: &str) -> Result<(), DatabaseError>;

    /// Move a table from the default namespace into `schema`.
    fn move_table(&mut self, table: &str, schema: &str) -> Result<(), DatabaseError>;

    /// Commit outstanding writes.
    fn commit(&mut self) -> Result<(), DatabaseError>;

    /// Discard outstanding writes.
    fn rollback(&mut self) -> Result<(), DatabaseError>;
}

/// Persistence of the catalogue tables.
pub trait SchemaStore {
    /// Create the catalogue tables if they are missing.
    fn create_catalogue(&mut self) -> Result<(), DatabaseError>;

    /// Record a new table.
    fn insert_table_info(
        &mut self,
        name: &str,
        metadata: &Metadata,
    ) -> Result<TableInfo, DatabaseError>;

    /// Look up a table by name.
    fn find_table_info(&mut self, name: &str) -> Result<Option<TableInfo>, DatabaseError>;

    /// Replace the metadata of a table.
    fn set_table_metadata(
        &mut self,
        table: TableInfoId,
        metadata: &Metadata,
    ) -> Result<(), DatabaseError>;

    /// Record metadata for one column.
    fn insert_column_info(
        &mut self,
        table: TableInfoId,
        name: &str,
        metadata: &Metadata,
    ) -> Result<ColumnInfo, DatabaseError>;

    /// Column metadata recorded for a table.
    fn columns(&mut self, table: TableInfoId) -> Result<Vec<ColumnInfo>, DatabaseError>;

    /// Record a geometry source.
    fn insert_geometry_source(
        &mut self,
        source: NewGeometrySource,
    ) -> Result<GeometrySource, DatabaseError>;

    /// Look up the geometry source of a table by table name.
    fn find_geometry_source(&mut self, table: &str)
    -> Result<Option<GeometrySource>, DatabaseError>;

    /// Record a reprojected copy.
    fn insert_projection(
        &mut self,
        projection: &GeometrySourceProjected,
    ) -> Result<(), DatabaseError>;

    /// Reprojected copies recorded for a source.
    fn projections(
        &mut self,
        source: GeometrySourceId,
    ) -> Result<Vec<GeometrySourceProjected>, DatabaseError>;

    /// Record a linkage.
    fn insert_linkage(&mut self, linkage: &GeometryLinkage) -> Result<(), DatabaseError>;

    /// Every recorded linkage, in insertion order.
    fn linkages(&mut self) -> Result<Vec<GeometryLinkage>, DatabaseError>;

    /// Look up a cached relation by ordered pair.
    fn find_geometry_relation(
        &mut self,
        from: GeometrySourceId,
        to: GeometrySourceId,
    ) -> Result<Option<GeometryRelation>, DatabaseError>;
}

/// A backend providing both physical and catalogue operations.
pub trait Database: SpatialDatabase + SchemaStore {}

impl<T: SpatialDatabase + SchemaStore + ?Sized> Database for T {}
