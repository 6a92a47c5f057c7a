//! Core domain of the census loader.
//!
//! Geometry tables are registered as [`GeometrySource`]s and projected into
//! a mandatory set of coordinate systems. Attribute tables are rewritten so
//! their business keys become geometry identifiers, linked back to the
//! geometry they describe and annotated with workbook metadata. The
//! [`Pipeline`] sequences these steps against any [`Database`]; adapters for
//! PostGIS, shapefiles, CSV files and workbooks live in `census-data`.

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod database;
pub mod dump;
pub mod geometry;
pub mod identifiers;
pub mod linkage;
pub mod metadata;
pub mod pipeline;
pub mod rewrite;
pub mod schema;

pub use database::{Database, DatabaseError, SchemaStore, SpatialDatabase};
pub use dump::{DumpError, DumpOutcome, DumpRequest, DumpRunner};
pub use geometry::{
    GeometryRegistrar, RegisterOptions, RegistrationError, detect_geometry_column,
    projected_column_name, spatial_index_name,
};
pub use identifiers::{IdentifierLookup, KeyCast, KeyMatcher, LookupError};
pub use linkage::{
    LinkageError, PendingLinkage, PendingLinkages, TableRole, find_linkages, geometry_relation,
    link,
};
pub use metadata::{
    MetadataCatalogue, MetadataError, MetadataKind, MetadataRegistrar, TABLE_NUMBER_PATTERN,
    attach_column_metadata, attach_table_metadata, datapack_file,
};
pub use pipeline::{
    AttributeInput, DEFAULT_MANDATORY_SRIDS, EXCLUDED_TABLES, FinalizeReport, GeometryLayer,
    Pipeline, PipelineConfig, PipelineError, PipelineState, PipelineSummary,
};
pub use rewrite::{RewriteError, RewrittenRows, RowResult, collect_rewritten, rewrite_rows};
pub use schema::{
    CATALOGUE_TABLES, ColumnDescription, ColumnInfo, ColumnKind, GID_COLUMN, GeometryLinkage,
    GeometryRelation, GeometrySource, GeometrySourceId, GeometrySourceProjected, GeometryType,
    Metadata, NewGeometrySource, Srid, TableInfo, TableInfoId, TableSchema, UnknownGeometryType,
};

#[cfg(any(test, feature = "test-support"))]
#[cfg_attr(docsrs, doc(cfg(feature = "test-support")))]
pub mod test_support;

#[cfg(test)]
mod tests;
