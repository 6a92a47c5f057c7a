//! Test-only, in-memory database and dump runner used by unit and behaviour
//! tests.
//!
//! [`MemoryDatabase`] applies every write immediately; `commit` and
//! `rollback` are only counted. Geometry values are stored as
//! [`geo::Geometry`] and "transforming" one copies its coordinates and tags
//! the target column with the new SRID.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

use geo::Geometry;

use crate::database::{DatabaseError, SchemaStore, SpatialDatabase};
use crate::dump::{DumpError, DumpOutcome, DumpRequest, DumpRunner};
use crate::identifiers::KeyCast;
use crate::schema::{
    CATALOGUE_TABLES, ColumnDescription, ColumnInfo, GID_COLUMN, GeometryLinkage,
    GeometryRelation, GeometrySource, GeometrySourceId, GeometrySourceProjected, GeometryType,
    Metadata, NewGeometrySource, Srid, TABLE_INFO_TABLE, TableInfo, TableInfoId, TableSchema,
};

/// Table provided by the spatial extension in every fresh database.
pub const SPATIAL_REF_SYS_TABLE: &str = "spatial_ref_sys";

#[derive(Debug, Clone, PartialEq)]
enum Cell {
    Text(String),
    Shape(Geometry<f64>),
}

#[derive(Debug, Clone, Default)]
struct MemoryTable {
    columns: Vec<ColumnDescription>,
    rows: Vec<BTreeMap<String, Cell>>,
}

impl MemoryTable {
    fn with_gid() -> Self {
        Self {
            columns: vec![ColumnDescription::scalar(GID_COLUMN, "int4")],
            rows: Vec::new(),
        }
    }

    fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c.name == column)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct MemoryIndex {
    table: String,
    column: String,
    unique: bool,
}

/// In-memory [`SpatialDatabase`] and [`SchemaStore`] implementation.
///
/// A fresh database contains `spatial_ref_sys`, as a PostGIS-enabled one
/// does.
#[derive(Debug)]
pub struct MemoryDatabase {
    tables: BTreeMap<String, MemoryTable>,
    schemas: BTreeMap<String, BTreeSet<String>>,
    indexes: BTreeMap<String, MemoryIndex>,
    immovable: BTreeSet<String>,
    repaired: Vec<(String, String)>,
    catalogue: bool,
    table_infos: Vec<TableInfo>,
    column_infos: Vec<ColumnInfo>,
    sources: Vec<GeometrySource>,
    projections: Vec<GeometrySourceProjected>,
    linkages: Vec<GeometryLinkage>,
    relations: Vec<GeometryRelation>,
    commits: usize,
    rollbacks: usize,
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder returned by [`MemoryDatabase::add_table`].
#[derive(Debug)]
pub struct TableBuilder<'a> {
    table: &'a mut MemoryTable,
}

impl TableBuilder<'_> {
    /// Add a scalar text column.
    pub fn with_column(self, name: &str) -> Self {
        self.table.columns.push(ColumnDescription::scalar(name, "varchar"));
        self
    }

    /// Add a geometry column.
    pub fn with_geometry_column(self, name: &str, srid: Option<Srid>) -> Self {
        self.table.columns.push(ColumnDescription::geometry(name, srid));
        self
    }

    /// Append a row without geometry. Unlisted columns are NULL.
    pub fn with_row(self, gid: i64, cells: &[(&str, &str)]) -> Self {
        let mut row = BTreeMap::new();
        row.insert(GID_COLUMN.to_owned(), Cell::Text(gid.to_string()));
        for (column, value) in cells {
            row.insert((*column).to_owned(), Cell::Text((*value).to_owned()));
        }
        self.table.rows.push(row);
        self
    }

    /// Append a row whose first geometry column holds `geometry`.
    pub fn with_feature(self, gid: i64, geometry: Geometry<f64>, cells: &[(&str, &str)]) -> Self {
        let column = self
            .table
            .columns
            .iter()
            .find(|c| c.is_geometry())
            .map(|c| c.name.clone());
        let this = self.with_row(gid, cells);
        if let (Some(column), Some(row)) = (column, this.table.rows.last_mut()) {
            row.insert(column, Cell::Shape(geometry));
        }
        this
    }
}

impl MemoryDatabase {
    /// Create an empty database with the spatial extension's tables.
    pub fn new() -> Self {
        let mut tables = BTreeMap::new();
        tables.insert(SPATIAL_REF_SYS_TABLE.to_owned(), MemoryTable::default());
        Self {
            tables,
            schemas: BTreeMap::new(),
            indexes: BTreeMap::new(),
            immovable: BTreeSet::new(),
            repaired: Vec::new(),
            catalogue: false,
            table_infos: Vec::new(),
            column_infos: Vec::new(),
            sources: Vec::new(),
            projections: Vec::new(),
            linkages: Vec::new(),
            relations: Vec::new(),
            commits: 0,
            rollbacks: 0,
        }
    }

    /// Add a table holding only a `gid` column.
    pub fn add_table(&mut self, name: &str) -> TableBuilder<'_> {
        let table = self
            .tables
            .entry(name.to_owned())
            .or_insert_with(MemoryTable::with_gid);
        TableBuilder { table }
    }

    /// Add a table with a `gid` column and one geometry column.
    pub fn add_geometry_table(&mut self, name: &str, column: &str, srid: Srid) -> TableBuilder<'_> {
        self.add_table(name).with_geometry_column(column, Some(srid))
    }

    /// Make every move of `table` fail.
    pub fn fail_move(&mut self, table: &str) {
        self.immovable.insert(table.to_owned());
    }

    /// Record a computed overlap between two sources.
    pub fn add_geometry_relation(&mut self, from: GeometrySourceId, to: GeometrySourceId) {
        self.relations.push(GeometryRelation {
            geometry_source_id: from,
            overlaps_with_id: to,
        });
    }

    /// Whether a table exists in the default namespace.
    pub fn has_table(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    /// Tables moved into `schema`, in name order.
    pub fn tables_in_schema(&self, schema: &str) -> Vec<String> {
        self.schemas
            .get(schema)
            .map(|tables| tables.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Text values of a column in row order; `None` marks NULL.
    pub fn column_text(&self, table: &str, column: &str) -> Option<Vec<Option<String>>> {
        let table = self.tables.get(table)?;
        if !table.has_column(column) {
            return None;
        }
        Some(
            table
                .rows
                .iter()
                .map(|row| match row.get(column) {
                    Some(Cell::Text(value)) => Some(value.clone()),
                    _ => None,
                })
                .collect(),
        )
    }

    /// Number of non-NULL geometries in a column.
    pub fn geometry_count(&self, table: &str, column: &str) -> usize {
        self.tables.get(table).map_or(0, |table| {
            table
                .rows
                .iter()
                .filter(|row| matches!(row.get(column), Some(Cell::Shape(_))))
                .count()
        })
    }

    /// Whether an index with the given name exists over `table.column`.
    pub fn has_index_on(&self, index: &str, table: &str, column: &str) -> bool {
        self.indexes
            .get(index)
            .is_some_and(|i| i.table == table && i.column == column)
    }

    /// Whether `index` exists and enforces uniqueness.
    pub fn is_unique_index(&self, index: &str) -> bool {
        self.indexes.get(index).is_some_and(|i| i.unique)
    }

    /// Columns passed to [`SpatialDatabase::repair_geometries`].
    pub fn repaired(&self) -> &[(String, String)] {
        &self.repaired
    }

    /// Number of commits issued.
    pub fn commits(&self) -> usize {
        self.commits
    }

    /// Number of rollbacks issued.
    pub fn rollbacks(&self) -> usize {
        self.rollbacks
    }

    fn table(&self, table: &str) -> Result<&MemoryTable, DatabaseError> {
        self.tables.get(table).ok_or_else(|| DatabaseError::NoSuchTable {
            table: table.to_owned(),
        })
    }

    fn table_mut(&mut self, table: &str) -> Result<&mut MemoryTable, DatabaseError> {
        self.tables
            .get_mut(table)
            .ok_or_else(|| DatabaseError::NoSuchTable {
                table: table.to_owned(),
            })
    }

    fn require_column(table_name: &str, table: &MemoryTable, column: &str) -> Result<(), DatabaseError> {
        if table.has_column(column) {
            Ok(())
        } else {
            Err(DatabaseError::NoSuchColumn {
                table: table_name.to_owned(),
                column: column.to_owned(),
            })
        }
    }

    fn require_catalogue(&self) -> Result<(), DatabaseError> {
        if self.catalogue {
            Ok(())
        } else {
            Err(DatabaseError::NoSuchTable {
                table: TABLE_INFO_TABLE.to_owned(),
            })
        }
    }
}

fn geometry_type_name(geometry: &Geometry<f64>) -> GeometryType {
    match geometry {
        Geometry::Point(_) => GeometryType::Point,
        Geometry::Line(_) | Geometry::LineString(_) => GeometryType::LineString,
        Geometry::Polygon(_) | Geometry::Rect(_) | Geometry::Triangle(_) => GeometryType::Polygon,
        Geometry::MultiPoint(_) => GeometryType::MultiPoint,
        Geometry::MultiLineString(_) => GeometryType::MultiLineString,
        Geometry::MultiPolygon(_) => GeometryType::MultiPolygon,
        Geometry::GeometryCollection(_) => GeometryType::GeometryCollection,
    }
}

fn rejected(operation: &str, reason: impl Into<String>) -> DatabaseError {
    DatabaseError::backend(operation, reason.into())
}

impl SpatialDatabase for MemoryDatabase {
    fn table_names(&mut self) -> Result<Vec<String>, DatabaseError> {
        Ok(self.tables.keys().cloned().collect())
    }

    fn describe_table(&mut self, table: &str) -> Result<TableSchema, DatabaseError> {
        Ok(TableSchema {
            name: table.to_owned(),
            columns: self.table(table)?.columns.clone(),
        })
    }

    fn geometry_types(&mut self, table: &str, column: &str) -> Result<Vec<String>, DatabaseError> {
        let memory = self.table(table)?;
        Self::require_column(table, memory, column)?;
        let distinct: BTreeSet<&'static str> = memory
            .rows
            .iter()
            .filter_map(|row| match row.get(column) {
                Some(Cell::Shape(geometry)) => Some(geometry_type_name(geometry).as_str()),
                _ => None,
            })
            .collect();
        Ok(distinct.into_iter().map(str::to_owned).collect())
    }

    fn add_geometry_column(
        &mut self,
        table: &str,
        column: &str,
        srid: Srid,
        _geometry_type: GeometryType,
    ) -> Result<(), DatabaseError> {
        let memory = self.table_mut(table)?;
        if memory.has_column(column) {
            return Err(rejected(
                "add geometry column",
                format!("column {column} of {table} already exists"),
            ));
        }
        memory.columns.push(ColumnDescription::geometry(column, Some(srid)));
        Ok(())
    }

    fn transform_geometry(
        &mut self,
        table: &str,
        source: &str,
        target: &str,
        _srid: Srid,
    ) -> Result<u64, DatabaseError> {
        let memory = self.table_mut(table)?;
        Self::require_column(table, memory, source)?;
        Self::require_column(table, memory, target)?;
        let mut updated = 0;
        for row in &mut memory.rows {
            match row.get(source).cloned() {
                Some(shape @ Cell::Shape(_)) => {
                    row.insert(target.to_owned(), shape);
                    updated += 1;
                }
                _ => {
                    row.remove(target);
                }
            }
        }
        Ok(updated)
    }

    fn repair_geometries(&mut self, table: &str, column: &str) -> Result<u64, DatabaseError> {
        let memory = self.table(table)?;
        Self::require_column(table, memory, column)?;
        self.repaired.push((table.to_owned(), column.to_owned()));
        Ok(0)
    }

    fn index_exists(&mut self, index: &str) -> Result<bool, DatabaseError> {
        Ok(self.indexes.contains_key(index))
    }

    fn create_spatial_index(
        &mut self,
        index: &str,
        table: &str,
        column: &str,
    ) -> Result<(), DatabaseError> {
        let memory = self.table(table)?;
        Self::require_column(table, memory, column)?;
        if self.indexes.contains_key(index) {
            return Err(rejected("create index", format!("relation {index} already exists")));
        }
        self.indexes.insert(
            index.to_owned(),
            MemoryIndex {
                table: table.to_owned(),
                column: column.to_owned(),
                unique: false,
            },
        );
        Ok(())
    }

    fn create_unique_index(
        &mut self,
        index: &str,
        table: &str,
        column: &str,
    ) -> Result<(), DatabaseError> {
        let values = self
            .column_text(table, column)
            .ok_or_else(|| DatabaseError::NoSuchColumn {
                table: table.to_owned(),
                column: column.to_owned(),
            })?;
        let mut seen = BTreeSet::new();
        if let Some(duplicate) = values.iter().flatten().find(|value| !seen.insert(*value)) {
            return Err(rejected(
                "create unique index",
                format!("duplicate key value {duplicate:?} in {table}.{column}"),
            ));
        }
        if self.indexes.contains_key(index) {
            return Err(rejected("create index", format!("relation {index} already exists")));
        }
        self.indexes.insert(
            index.to_owned(),
            MemoryIndex {
                table: table.to_owned(),
                column: column.to_owned(),
                unique: true,
            },
        );
        Ok(())
    }

    fn key_pairs(
        &mut self,
        table: &str,
        gid_column: &str,
        key_column: &str,
        cast: KeyCast,
    ) -> Result<Vec<(i64, Option<String>)>, DatabaseError> {
        let memory = self.table(table)?;
        Self::require_column(table, memory, gid_column)?;
        Self::require_column(table, memory, key_column)?;
        memory
            .rows
            .iter()
            .map(|row| {
                let gid = match row.get(gid_column) {
                    Some(Cell::Text(value)) => value.parse::<i64>().map_err(|err| {
                        DatabaseError::backend("read key pairs", err)
                    })?,
                    _ => return Err(rejected("read key pairs", format!("NULL {gid_column}"))),
                };
                let key = match row.get(key_column) {
                    Some(Cell::Text(value)) => match cast {
                        KeyCast::None => Some(value.clone()),
                        KeyCast::Integer => Some(
                            value
                                .trim()
                                .parse::<i64>()
                                .map_err(|err| DatabaseError::backend("read key pairs", err))?
                                .to_string(),
                        ),
                    },
                    _ => None,
                };
                Ok((gid, key))
            })
            .collect()
    }

    fn load_attribute_table(
        &mut self,
        table: &str,
        header: &[String],
        rows: &[Vec<String>],
    ) -> Result<u64, DatabaseError> {
        if self.tables.contains_key(table) {
            return Err(rejected("create table", format!("relation {table} already exists")));
        }
        let mut memory = MemoryTable {
            columns: header
                .iter()
                .map(|name| ColumnDescription::scalar(name.as_str(), "text"))
                .collect(),
            rows: Vec::with_capacity(rows.len()),
        };
        for (index, row) in rows.iter().enumerate() {
            if row.len() != header.len() {
                return Err(DatabaseError::RaggedRow {
                    table: table.to_owned(),
                    line: index + 1,
                    expected: header.len(),
                    found: row.len(),
                });
            }
            memory.rows.push(
                header
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned().map(Cell::Text))
                    .collect(),
            );
        }
        self.tables.insert(table.to_owned(), memory);
        Ok(rows.len() as u64)
    }

    fn create_schema(&mut self, schema: &str) -> Result<(), DatabaseError> {
        self.schemas.entry(schema.to_owned()).or_default();
        Ok(())
    }

    fn move_table(&mut self, table: &str, schema: &str) -> Result<(), DatabaseError> {
        if self.immovable.contains(table) {
            return Err(rejected(
                "move table",
                format!("cannot move {table} into schema {schema}"),
            ));
        }
        if !self.schemas.contains_key(schema) {
            return Err(rejected("move table", format!("schema {schema} does not exist")));
        }
        self.tables
            .remove(table)
            .ok_or_else(|| DatabaseError::NoSuchTable {
                table: table.to_owned(),
            })?;
        self.schemas
            .entry(schema.to_owned())
            .or_default()
            .insert(table.to_owned());
        Ok(())
    }

    fn commit(&mut self) -> Result<(), DatabaseError> {
        self.commits += 1;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), DatabaseError> {
        self.rollbacks += 1;
        Ok(())
    }
}

impl SchemaStore for MemoryDatabase {
    fn create_catalogue(&mut self) -> Result<(), DatabaseError> {
        for name in CATALOGUE_TABLES {
            self.tables.entry(name.to_owned()).or_default();
        }
        self.catalogue = true;
        Ok(())
    }

    fn insert_table_info(
        &mut self,
        name: &str,
        metadata: &Metadata,
    ) -> Result<TableInfo, DatabaseError> {
        self.require_catalogue()?;
        let info = TableInfo {
            id: TableInfoId(self.table_infos.len() as i64 + 1),
            name: name.to_owned(),
            metadata: metadata.clone(),
        };
        self.table_infos.push(info.clone());
        Ok(info)
    }

    fn find_table_info(&mut self, name: &str) -> Result<Option<TableInfo>, DatabaseError> {
        self.require_catalogue()?;
        Ok(self.table_infos.iter().find(|info| info.name == name).cloned())
    }

    fn set_table_metadata(
        &mut self,
        table: TableInfoId,
        metadata: &Metadata,
    ) -> Result<(), DatabaseError> {
        self.require_catalogue()?;
        let info = self
            .table_infos
            .iter_mut()
            .find(|info| info.id == table)
            .ok_or_else(|| rejected("update table_info", format!("no row with id {}", table.0)))?;
        info.metadata = metadata.clone();
        Ok(())
    }

    fn insert_column_info(
        &mut self,
        table: TableInfoId,
        name: &str,
        metadata: &Metadata,
    ) -> Result<ColumnInfo, DatabaseError> {
        self.require_catalogue()?;
        let info = ColumnInfo {
            table_info_id: table,
            name: name.to_owned(),
            metadata: metadata.clone(),
        };
        self.column_infos.push(info.clone());
        Ok(info)
    }

    fn columns(&mut self, table: TableInfoId) -> Result<Vec<ColumnInfo>, DatabaseError> {
        self.require_catalogue()?;
        Ok(self
            .column_infos
            .iter()
            .filter(|info| info.table_info_id == table)
            .cloned()
            .collect())
    }

    fn insert_geometry_source(
        &mut self,
        source: NewGeometrySource,
    ) -> Result<GeometrySource, DatabaseError> {
        self.require_catalogue()?;
        let id = GeometrySourceId(self.sources.len() as i64 + 1);
        let source = GeometrySource::from_new(id, source);
        self.sources.push(source.clone());
        Ok(source)
    }

    fn find_geometry_source(
        &mut self,
        table: &str,
    ) -> Result<Option<GeometrySource>, DatabaseError> {
        self.require_catalogue()?;
        Ok(self.sources.iter().find(|source| source.table == table).cloned())
    }

    fn insert_projection(
        &mut self,
        projection: &GeometrySourceProjected,
    ) -> Result<(), DatabaseError> {
        self.require_catalogue()?;
        self.projections.push(projection.clone());
        Ok(())
    }

    fn projections(
        &mut self,
        source: GeometrySourceId,
    ) -> Result<Vec<GeometrySourceProjected>, DatabaseError> {
        self.require_catalogue()?;
        Ok(self
            .projections
            .iter()
            .filter(|projection| projection.geometry_source_id == source)
            .cloned()
            .collect())
    }

    fn insert_linkage(&mut self, linkage: &GeometryLinkage) -> Result<(), DatabaseError> {
        self.require_catalogue()?;
        self.linkages.push(linkage.clone());
        Ok(())
    }

    fn linkages(&mut self) -> Result<Vec<GeometryLinkage>, DatabaseError> {
        self.require_catalogue()?;
        Ok(self.linkages.clone())
    }

    fn find_geometry_relation(
        &mut self,
        from: GeometrySourceId,
        to: GeometrySourceId,
    ) -> Result<Option<GeometryRelation>, DatabaseError> {
        self.require_catalogue()?;
        Ok(self
            .relations
            .iter()
            .find(|relation| relation.geometry_source_id == from && relation.overlaps_with_id == to)
            .copied())
    }
}

/// Scripted [`DumpRunner`] recording every request it receives.
#[derive(Debug)]
pub struct StubDumpRunner {
    failure: Option<(Option<i32>, String)>,
    requests: RefCell<Vec<DumpRequest>>,
}

impl StubDumpRunner {
    /// A runner whose dumps always succeed.
    pub fn succeeding() -> Self {
        Self {
            failure: None,
            requests: RefCell::new(Vec::new()),
        }
    }

    /// A runner whose dumps exit with `status` and print `stderr`.
    pub fn failing(status: i32, stderr: &str) -> Self {
        Self {
            failure: Some((Some(status), stderr.to_owned())),
            requests: RefCell::new(Vec::new()),
        }
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<DumpRequest> {
        self.requests.borrow().clone()
    }
}

impl DumpRunner for StubDumpRunner {
    fn dump(&self, request: &DumpRequest) -> Result<DumpOutcome, DumpError> {
        self.requests.borrow_mut().push(request.clone());
        match &self.failure {
            None => Ok(DumpOutcome {
                destination: request.destination.clone(),
            }),
            Some((status, stderr)) => Err(DumpError::Failed {
                status: *status,
                stderr: stderr.clone(),
            }),
        }
    }
}
