//! Adapters between a census release on disk and a PostGIS database.
//!
//! Responsibilities:
//! - Discover boundary archives, datapack CSVs and metadata workbooks.
//! - Import shapefiles with `shp2pgsql` and stream attribute rows from CSV.
//! - Implement the `census-core` storage seams on PostGIS.
//! - Export the finished schema with `pg_dump`.
//!
//! Boundaries:
//! - Do not encode domain rules (live in `census-core`).
//! - External programs run as child processes; credentials reach them only
//!   through their environment.

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod attributes;
pub mod dump;
pub mod postgis;
pub mod release;
pub mod shapes;
pub mod workbook;

pub use attributes::{AttributeError, CsvRows, attribute_input, attribute_table_name, division_of};
pub use dump::PgDump;
pub use postgis::{ConnectionSettings, PostgisDatabase, PostgisError, recreate_database};
pub use release::{DEFAULT_DATAPACKS, DEFAULT_WORKBOOKS, ReleaseError, ReleaseLayout, division_table};
pub use shapes::{
    ScriptExecutor, ShapeError, ShapefileLoader, Shp2Pgsql, extract_archive, import_archive,
    import_shapefile,
};
pub use workbook::{WorkbookError, load_workbook, load_workbooks};

#[cfg(any(test, feature = "test-support"))]
#[cfg_attr(docsrs, doc(cfg(feature = "test-support")))]
pub mod test_support;
