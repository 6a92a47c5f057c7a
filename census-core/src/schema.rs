//! Catalogue entities describing loaded tables and their geometry.
//!
//! Every physical table loaded by the pipeline is described by a
//! [`TableInfo`]. Geometry tables additionally carry a [`GeometrySource`],
//! zero or more [`GeometrySourceProjected`] copies, and are the target of
//! [`GeometryLinkage`] rows recorded for attribute tables.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of the surrogate identifier column assigned to geometry rows.
pub const GID_COLUMN: &str = "gid";

/// Physical catalogue table holding [`TableInfo`] rows.
pub const TABLE_INFO_TABLE: &str = "table_info";
/// Physical catalogue table holding [`ColumnInfo`] rows.
pub const COLUMN_INFO_TABLE: &str = "column_info";
/// Physical catalogue table holding [`GeometrySource`] rows.
pub const GEOMETRY_SOURCE_TABLE: &str = "geometry_source";
/// Physical catalogue table holding [`GeometrySourceProjected`] rows.
pub const GEOMETRY_SOURCE_PROJECTED_TABLE: &str = "geometry_source_projected";
/// Physical catalogue table holding [`GeometryLinkage`] rows.
pub const GEOMETRY_LINKAGE_TABLE: &str = "geometry_linkage";
/// Physical catalogue table holding [`GeometryRelation`] rows.
pub const GEOMETRY_RELATION_TABLE: &str = "geometry_relation";

/// Every catalogue table, in creation order.
pub const CATALOGUE_TABLES: [&str; 6] = [
    TABLE_INFO_TABLE,
    COLUMN_INFO_TABLE,
    GEOMETRY_SOURCE_TABLE,
    GEOMETRY_SOURCE_PROJECTED_TABLE,
    GEOMETRY_LINKAGE_TABLE,
    GEOMETRY_RELATION_TABLE,
];

/// Spatial reference system identifier.
///
/// # Examples
///
/// ```
/// use census_core::Srid;
///
/// let gda94 = Srid::new(4283);
/// assert_eq!(gda94.get(), 4283);
/// assert_eq!(gda94.to_string(), "4283");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Srid(u32);

impl Srid {
    /// Wrap a raw SRID value.
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Raw SRID value.
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Srid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u32> for Srid {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Geometry classification recorded for a [`GeometrySource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GeometryType {
    /// Single points.
    Point,
    /// Single line strings.
    LineString,
    /// Single polygons.
    Polygon,
    /// Point collections.
    MultiPoint,
    /// Line string collections.
    MultiLineString,
    /// Polygon collections.
    MultiPolygon,
    /// Heterogeneous collections.
    GeometryCollection,
    /// Generic geometry, used when a column mixes types.
    Geometry,
}

/// Error returned when parsing an unrecognised geometry type name.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unrecognised geometry type {0:?}")]
pub struct UnknownGeometryType(pub String);

impl GeometryType {
    /// Upper-case name as used by spatial databases.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Point => "POINT",
            Self::LineString => "LINESTRING",
            Self::Polygon => "POLYGON",
            Self::MultiPoint => "MULTIPOINT",
            Self::MultiLineString => "MULTILINESTRING",
            Self::MultiPolygon => "MULTIPOLYGON",
            Self::GeometryCollection => "GEOMETRYCOLLECTION",
            Self::Geometry => "GEOMETRY",
        }
    }

    /// Classify a column from the distinct geometry type names observed in it.
    ///
    /// A single distinct type is reported as-is. Anything else, including an
    /// empty column or an unrecognised name, falls back to
    /// [`GeometryType::Geometry`].
    ///
    /// # Examples
    ///
    /// ```
    /// use census_core::GeometryType;
    ///
    /// assert_eq!(GeometryType::classify(["MULTIPOLYGON"]), GeometryType::MultiPolygon);
    /// assert_eq!(
    ///     GeometryType::classify(["POLYGON", "MULTIPOLYGON"]),
    ///     GeometryType::Geometry
    /// );
    /// ```
    pub fn classify<I, S>(observed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut distinct: Vec<String> = observed
            .into_iter()
            .map(|name| name.as_ref().trim().to_ascii_uppercase())
            .collect();
        distinct.sort();
        distinct.dedup();
        match distinct.as_slice() {
            [single] => single.parse().unwrap_or_else(|err: UnknownGeometryType| {
                log::warn!("{err}; recording column as GEOMETRY");
                Self::Geometry
            }),
            _ => Self::Geometry,
        }
    }
}

impl fmt::Display for GeometryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GeometryType {
    type Err = UnknownGeometryType;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let upper = value.trim().to_ascii_uppercase();
        // Measured variants (e.g. POLYGONM) classify as their planar type.
        let base = upper.strip_suffix('M').unwrap_or(&upper);
        let parsed = match base {
            "POINT" => Self::Point,
            "LINESTRING" => Self::LineString,
            "POLYGON" => Self::Polygon,
            "MULTIPOINT" => Self::MultiPoint,
            "MULTILINESTRING" => Self::MultiLineString,
            "MULTIPOLYGON" => Self::MultiPolygon,
            "GEOMETRYCOLLECTION" => Self::GeometryCollection,
            "GEOMETRY" => Self::Geometry,
            _ => return Err(UnknownGeometryType(value.to_owned())),
        };
        Ok(parsed)
    }
}

/// Opaque classification metadata attached to tables and columns.
///
/// The keys and values are defined by the upstream metadata workbooks and
/// are never interpreted by the loader. At the persistence boundary the map
/// is stored as a JSON object.
///
/// # Examples
///
/// ```
/// use census_core::Metadata;
///
/// let metadata = Metadata::from_pairs([("type", "Persons"), ("kind", "Count")]);
/// assert_eq!(metadata.get("kind"), Some("Count"));
/// assert_eq!(metadata.to_json().unwrap(), r#"{"kind":"Count","type":"Persons"}"#);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, String>);

impl Metadata {
    /// Create an empty metadata map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build metadata from key/value pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }

    /// Insert or replace a value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Look up a value by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Whether no entries are present.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Encode as a JSON object.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode from a JSON object.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Identifier of a [`TableInfo`] row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableInfoId(pub i64);

/// Identifier of a [`GeometrySource`] row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeometrySourceId(pub i64);

/// A registered physical table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    /// Catalogue identifier.
    pub id: TableInfoId,
    /// Physical table name.
    pub name: String,
    /// Classification metadata.
    pub metadata: Metadata,
}

/// Metadata attached to one column of a registered table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    /// Owning table.
    pub table_info_id: TableInfoId,
    /// Column name.
    pub name: String,
    /// Classification metadata.
    pub metadata: Metadata,
}

/// Values required to record a new [`GeometrySource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewGeometrySource {
    /// Owning table.
    pub table_info_id: TableInfoId,
    /// Physical table name of the owning table.
    pub table: String,
    /// Column holding the native geometry.
    pub column: String,
    /// Geometry classification.
    pub geometry_type: GeometryType,
    /// Native spatial reference system.
    pub srid: Srid,
    /// Column holding the surrogate identifier.
    pub gid_column: String,
    /// Natural key column used to link attribute tables, if any.
    pub business_key: Option<String>,
}

/// A table registered as a source of geometry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeometrySource {
    /// Catalogue identifier.
    pub id: GeometrySourceId,
    /// Owning table.
    pub table_info_id: TableInfoId,
    /// Physical table name of the owning table.
    pub table: String,
    /// Column holding the native geometry.
    pub column: String,
    /// Geometry classification.
    pub geometry_type: GeometryType,
    /// Native spatial reference system.
    pub srid: Srid,
    /// Column holding the surrogate identifier.
    pub gid_column: String,
    /// Natural key column used to link attribute tables, if any.
    pub business_key: Option<String>,
}

impl GeometrySource {
    /// Attach an identifier to a pending source.
    pub fn from_new(id: GeometrySourceId, source: NewGeometrySource) -> Self {
        let NewGeometrySource {
            table_info_id,
            table,
            column,
            geometry_type,
            srid,
            gid_column,
            business_key,
        } = source;
        Self {
            id,
            table_info_id,
            table,
            column,
            geometry_type,
            srid,
            gid_column,
            business_key,
        }
    }
}

/// A reprojected copy of a geometry source's native column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeometrySourceProjected {
    /// Source the copy was derived from.
    pub geometry_source_id: GeometrySourceId,
    /// Target spatial reference system.
    pub srid: Srid,
    /// Column holding the reprojected geometry.
    pub column: String,
}

/// Join path from an attribute table to the geometry it describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeometryLinkage {
    /// Geometry side of the join.
    pub geometry_source_id: GeometrySourceId,
    /// Join column on the geometry table.
    pub geo_column: String,
    /// Attribute side of the join.
    pub attribute_table_id: TableInfoId,
    /// Join column on the attribute table.
    pub attr_column: String,
}

/// Cached overlap relationship between two geometry sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeometryRelation {
    /// Source the relation was computed from.
    pub geometry_source_id: GeometrySourceId,
    /// Source overlapping the first.
    pub overlaps_with_id: GeometrySourceId,
}

/// Storage classification of a column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnKind {
    /// Spatial column, with its declared SRID when known.
    Geometry {
        /// Declared spatial reference system.
        srid: Option<Srid>,
    },
    /// Any non-spatial column, named by its storage type.
    Scalar(String),
}

/// One column of a [`TableSchema`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescription {
    /// Column name.
    pub name: String,
    /// Storage classification.
    pub kind: ColumnKind,
}

impl ColumnDescription {
    /// Describe a geometry column.
    pub fn geometry(name: impl Into<String>, srid: Option<Srid>) -> Self {
        Self {
            name: name.into(),
            kind: ColumnKind::Geometry { srid },
        }
    }

    /// Describe a scalar column.
    pub fn scalar(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ColumnKind::Scalar(type_name.into()),
        }
    }

    /// Whether the column stores geometry.
    pub const fn is_geometry(&self) -> bool {
        matches!(self.kind, ColumnKind::Geometry { .. })
    }
}

/// Column layout of a physical table, captured once and passed by reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    /// Physical table name.
    pub name: String,
    /// Columns in ordinal order.
    pub columns: Vec<ColumnDescription>,
}

impl TableSchema {
    /// Columns classified as geometry.
    pub fn geometry_columns(&self) -> impl Iterator<Item = &ColumnDescription> {
        self.columns.iter().filter(|column| column.is_geometry())
    }

    /// Whether a column with the given name exists.
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|column| column.name == name)
    }
}
