//! SQL text helpers shared by the PostGIS adapter.

use census_core::schema::{
    COLUMN_INFO_TABLE, GEOMETRY_LINKAGE_TABLE, GEOMETRY_RELATION_TABLE,
    GEOMETRY_SOURCE_PROJECTED_TABLE, GEOMETRY_SOURCE_TABLE, TABLE_INFO_TABLE,
};

/// Quote an identifier for interpolation into SQL.
///
/// # Examples
///
/// ```
/// use census_data::postgis::quote_ident;
///
/// assert_eq!(quote_ident("b01_aust_sa1"), "\"b01_aust_sa1\"");
/// assert_eq!(quote_ident("odd\"name"), "\"odd\"\"name\"");
/// ```
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Storage type chosen for an attribute column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Every value is an integer without leading zeros.
    BigInt,
    /// Every value is a finite number.
    Double,
    /// Anything else.
    Text,
}

impl ColumnType {
    /// SQL type name.
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::BigInt => "bigint",
            Self::Double => "double precision",
            Self::Text => "text",
        }
    }
}

fn is_integer(value: &str) -> bool {
    let digits = value.strip_prefix('-').unwrap_or(value);
    let padded = digits.len() > 1 && digits.starts_with('0');
    !padded && value.parse::<i64>().is_ok()
}

fn is_number(value: &str) -> bool {
    value.parse::<f64>().is_ok_and(f64::is_finite)
}

/// Pick the narrowest type holding every non-empty value.
///
/// Codes with leading zeros stay text so they survive a round trip. A column
/// with no values at all is text.
pub fn infer_column_type<'a, I>(values: I) -> ColumnType
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = false;
    let mut integer = true;
    let mut number = true;
    for value in values.into_iter().filter(|value| !value.is_empty()) {
        seen = true;
        integer = integer && is_integer(value);
        number = number && is_number(value);
        if !number {
            return ColumnType::Text;
        }
    }
    match (seen, integer, number) {
        (false, _, _) => ColumnType::Text,
        (true, true, _) => ColumnType::BigInt,
        (true, false, true) => ColumnType::Double,
        (true, false, false) => ColumnType::Text,
    }
}

/// Render one row in `COPY ... FROM STDIN` text format.
///
/// Empty cells become NULL.
pub fn copy_line(row: &[String]) -> String {
    let mut line = String::new();
    for (index, cell) in row.iter().enumerate() {
        if index > 0 {
            line.push('\t');
        }
        if cell.is_empty() {
            line.push_str("\\N");
            continue;
        }
        for ch in cell.chars() {
            match ch {
                '\\' => line.push_str("\\\\"),
                '\t' => line.push_str("\\t"),
                '\n' => line.push_str("\\n"),
                '\r' => line.push_str("\\r"),
                other => line.push(other),
            }
        }
    }
    line.push('\n');
    line
}

pub(super) fn catalogue_ddl() -> [String; 6] {
    [
        format!(
            "CREATE TABLE IF NOT EXISTS {TABLE_INFO_TABLE} (
                id bigserial PRIMARY KEY,
                name text NOT NULL UNIQUE,
                metadata_json text NOT NULL DEFAULT '{{}}'
            )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {COLUMN_INFO_TABLE} (
                id bigserial PRIMARY KEY,
                table_info_id bigint NOT NULL REFERENCES {TABLE_INFO_TABLE} (id),
                name text NOT NULL,
                metadata_json text NOT NULL DEFAULT '{{}}'
            )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {GEOMETRY_SOURCE_TABLE} (
                id bigserial PRIMARY KEY,
                table_info_id bigint NOT NULL UNIQUE REFERENCES {TABLE_INFO_TABLE} (id),
                geometry_type text NOT NULL,
                column_name text NOT NULL,
                srid integer NOT NULL,
                gid_column text NOT NULL,
                business_key text
            )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {GEOMETRY_SOURCE_PROJECTED_TABLE} (
                id bigserial PRIMARY KEY,
                geometry_source_id bigint NOT NULL REFERENCES {GEOMETRY_SOURCE_TABLE} (id),
                srid integer NOT NULL,
                column_name text NOT NULL,
                UNIQUE (geometry_source_id, srid)
            )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {GEOMETRY_LINKAGE_TABLE} (
                id bigserial PRIMARY KEY,
                geometry_source_id bigint NOT NULL REFERENCES {GEOMETRY_SOURCE_TABLE} (id),
                geo_column text NOT NULL,
                attribute_table_id bigint NOT NULL REFERENCES {TABLE_INFO_TABLE} (id),
                attr_column text NOT NULL
            )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {GEOMETRY_RELATION_TABLE} (
                id bigserial PRIMARY KEY,
                geo_source_id bigint NOT NULL REFERENCES {GEOMETRY_SOURCE_TABLE} (id),
                overlaps_with_id bigint NOT NULL REFERENCES {GEOMETRY_SOURCE_TABLE} (id)
            )"
        ),
    ]
}
