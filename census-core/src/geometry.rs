//! Registration of geometry tables and their reprojected copies.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::database::{Database, DatabaseError};
use crate::schema::{
    ColumnDescription, ColumnKind, GID_COLUMN, GeometrySource, GeometrySourceProjected,
    GeometryType, Metadata, NewGeometrySource, Srid, TableInfo, TableSchema,
};

/// Errors raised while registering a table.
#[derive(Debug, Error)]
pub enum RegistrationError {
    /// The table has no geometry column.
    #[error("table {table} has no geometry column")]
    NoGeometryColumn {
        /// Offending table.
        table: String,
    },
    /// The table has more than one geometry column.
    #[error("table {table} has {} geometry columns: {}", columns.len(), columns.join(", "))]
    AmbiguousGeometryColumn {
        /// Offending table.
        table: String,
        /// Every geometry column found.
        columns: Vec<String>,
    },
    /// The table was registered earlier in the run.
    #[error("table {table} is already registered")]
    AlreadyRegistered {
        /// Offending table.
        table: String,
    },
    /// No SRID was supplied and the column does not declare one.
    #[error("geometry column {column} of {table} has no declared SRID")]
    UnknownSrid {
        /// Offending table.
        table: String,
        /// Geometry column.
        column: String,
    },
    /// The requested business key column does not exist.
    #[error("business key column {column} does not exist on {table}")]
    UnknownBusinessKey {
        /// Offending table.
        table: String,
        /// Requested column.
        column: String,
    },
    /// The backend failed.
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// How a table should be registered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterOptions {
    /// Detect and record a geometry source for the table.
    pub detect_geometry: bool,
    /// Native SRID; defaults to the SRID declared on the geometry column.
    pub native_srid: Option<Srid>,
    /// Natural key column used to link attribute tables.
    pub business_key: Option<String>,
}

impl RegisterOptions {
    /// Options for a plain attribute table.
    pub fn attribute() -> Self {
        Self::default()
    }

    /// Options for a geometry table.
    pub fn geometry(native_srid: Option<Srid>, business_key: Option<String>) -> Self {
        Self {
            detect_geometry: true,
            native_srid,
            business_key,
        }
    }
}

/// Name of the reprojected copy of `column` in `srid`.
///
/// # Examples
///
/// ```
/// use census_core::{Srid, projected_column_name};
///
/// assert_eq!(projected_column_name("geom", Srid::new(3112)), "geom_3112");
/// ```
pub fn projected_column_name(column: &str, srid: Srid) -> String {
    format!("{column}_{srid}")
}

/// Deterministic name of the spatial index over `table.column`.
///
/// # Examples
///
/// ```
/// use census_core::spatial_index_name;
///
/// assert_eq!(spatial_index_name("regions", "geom_3857"), "regions_geom_3857_gist");
/// ```
pub fn spatial_index_name(table: &str, column: &str) -> String {
    format!("{table}_{column}_gist")
}

/// Find the single geometry column of a table.
pub fn detect_geometry_column(schema: &TableSchema) -> Result<&ColumnDescription, RegistrationError> {
    let mut found = schema.geometry_columns();
    let first = found
        .next()
        .ok_or_else(|| RegistrationError::NoGeometryColumn {
            table: schema.name.clone(),
        })?;
    if found.next().is_some() {
        return Err(RegistrationError::AmbiguousGeometryColumn {
            table: schema.name.clone(),
            columns: schema
                .geometry_columns()
                .map(|column| column.name.clone())
                .collect(),
        });
    }
    Ok(first)
}

/// Registers tables and keeps geometry projections complete.
///
/// The mandatory SRIDs are the coordinate systems every geometry source must
/// be available in once registration completes. Projections are committed
/// one at a time, so a failure part way through leaves the earlier ones in
/// place; [`GeometryRegistrar::missing_projections`] reports the gap.
#[derive(Debug, Clone, Default)]
pub struct GeometryRegistrar {
    mandatory_srids: BTreeSet<Srid>,
    repair: bool,
}

impl GeometryRegistrar {
    /// Create a registrar for the given mandatory SRIDs.
    pub fn new<I>(mandatory_srids: I) -> Self
    where
        I: IntoIterator<Item = Srid>,
    {
        Self {
            mandatory_srids: mandatory_srids.into_iter().collect(),
            repair: false,
        }
    }

    /// Repair invalid geometries before projecting them.
    #[must_use]
    pub fn with_repair(mut self, repair: bool) -> Self {
        self.repair = repair;
        self
    }

    /// Mandatory SRIDs, in ascending order.
    pub fn mandatory_srids(&self) -> impl Iterator<Item = Srid> + '_ {
        self.mandatory_srids.iter().copied()
    }

    /// Register a table already present in the database.
    ///
    /// With `detect_geometry` set, the table must have exactly one geometry
    /// column. Its type is classified from the values present, a
    /// [`GeometrySource`] is recorded and the column is reprojected into
    /// every mandatory SRID other than the native one.
    pub fn register<D>(
        &self,
        db: &mut D,
        table: &str,
        options: &RegisterOptions,
    ) -> Result<TableInfo, RegistrationError>
    where
        D: Database + ?Sized,
    {
        if db.find_table_info(table)?.is_some() {
            return Err(RegistrationError::AlreadyRegistered {
                table: table.to_owned(),
            });
        }
        if !options.detect_geometry {
            let info = db.insert_table_info(table, &Metadata::new())?;
            db.commit()?;
            log::debug!("registered table {table}");
            return Ok(info);
        }

        let schema = db.describe_table(table)?;
        let geometry_column = detect_geometry_column(&schema)?;
        let declared = match &geometry_column.kind {
            ColumnKind::Geometry { srid } => *srid,
            ColumnKind::Scalar(_) => None,
        };
        let srid = options
            .native_srid
            .or(declared)
            .ok_or_else(|| RegistrationError::UnknownSrid {
                table: table.to_owned(),
                column: geometry_column.name.clone(),
            })?;
        if let Some(key) = options.business_key.as_deref()
            && !schema.has_column(key)
        {
            return Err(RegistrationError::UnknownBusinessKey {
                table: table.to_owned(),
                column: key.to_owned(),
            });
        }

        let observed = db.geometry_types(table, &geometry_column.name)?;
        let geometry_type = GeometryType::classify(&observed);
        if geometry_type == GeometryType::Geometry && observed.len() > 1 {
            log::warn!(
                "{table}.{} mixes geometry types ({}); recording as GEOMETRY",
                geometry_column.name,
                observed.join(", ")
            );
        }

        let info = db.insert_table_info(table, &Metadata::new())?;
        let source = db.insert_geometry_source(NewGeometrySource {
            table_info_id: info.id,
            table: table.to_owned(),
            column: geometry_column.name.clone(),
            geometry_type,
            srid,
            gid_column: GID_COLUMN.to_owned(),
            business_key: options.business_key.clone(),
        })?;
        if self.repair {
            let repaired = db.repair_geometries(table, &source.column)?;
            if repaired > 0 {
                log::info!("repaired {repaired} invalid geometries in {table}");
            }
        }
        db.commit()?;
        log::info!(
            "registered geometry source {table}.{} ({geometry_type}, SRID {srid})",
            source.column
        );

        for target in self.mandatory_srids.iter().copied().filter(|s| *s != srid) {
            self.reproject(db, &source, &schema, target)?;
        }
        Ok(info)
    }

    /// Create, populate and index the copy of `source` in `srid`.
    ///
    /// Re-running for the same SRID recomputes the column and reuses the
    /// existing column, catalogue row and index.
    pub fn reproject<D>(
        &self,
        db: &mut D,
        source: &GeometrySource,
        schema: &TableSchema,
        srid: Srid,
    ) -> Result<GeometrySourceProjected, RegistrationError>
    where
        D: Database + ?Sized,
    {
        let column = projected_column_name(&source.column, srid);
        if !schema.has_column(&column) {
            db.add_geometry_column(&source.table, &column, srid, source.geometry_type)?;
        }
        let rows = db.transform_geometry(&source.table, &source.column, &column, srid)?;

        let projection = GeometrySourceProjected {
            geometry_source_id: source.id,
            srid,
            column,
        };
        let recorded = db
            .projections(source.id)?
            .iter()
            .any(|existing| existing.srid == srid);
        if !recorded {
            db.insert_projection(&projection)?;
        }

        let index = spatial_index_name(&source.table, &projection.column);
        if !db.index_exists(&index)? {
            db.create_spatial_index(&index, &source.table, &projection.column)?;
        }
        db.commit()?;
        log::info!(
            "projected {} rows of {}.{} into {}",
            rows,
            source.table,
            source.column,
            projection.column
        );
        Ok(projection)
    }

    /// Mandatory SRIDs that `source` is not yet available in.
    pub fn missing_projections<D>(
        &self,
        db: &mut D,
        source: &GeometrySource,
    ) -> Result<Vec<Srid>, RegistrationError>
    where
        D: Database + ?Sized,
    {
        let present: BTreeSet<Srid> = db
            .projections(source.id)?
            .into_iter()
            .map(|projection| projection.srid)
            .chain(std::iter::once(source.srid))
            .collect();
        Ok(self
            .mandatory_srids
            .difference(&present)
            .copied()
            .collect())
    }
}
