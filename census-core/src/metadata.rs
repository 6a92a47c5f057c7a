//! Descriptive metadata for loaded attribute tables.
//!
//! Metadata comes from workbooks published alongside each datapack. Table
//! entries are keyed by table number (`b01`) and column entries by datapack
//! file (`b01a`). Every attribute table must find both; an undocumented
//! table is an error rather than a skip.

use std::collections::BTreeMap;
use std::fmt;

use regex::Regex;
use thiserror::Error;

use crate::database::{Database, DatabaseError};
use crate::schema::{Metadata, TableInfo};

/// Pattern splitting a datapack file into its table number and suffix.
pub const TABLE_NUMBER_PATTERN: &str = r"^([A-Za-z]+[0-9]+)([a-z]+)?$";

/// Which catalogue a missing entry was looked up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataKind {
    /// Table entries, keyed by table number.
    Table,
    /// Column entries, keyed by datapack file.
    Column,
}

impl fmt::Display for MetadataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Table => "table",
            Self::Column => "column",
        })
    }
}

/// Errors raised while attaching metadata.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// The table number pattern failed to compile.
    #[error("invalid table number pattern")]
    Pattern(#[from] regex::Error),
    /// The table name does not start with a table number.
    #[error("cannot derive a table number from {table}")]
    UnrecognisedTableName {
        /// Offending table.
        table: String,
    },
    /// No metadata entry exists for the derived key.
    #[error("no {kind} metadata for {table} (looked up {key:?})")]
    MetadataNotFound {
        /// Table being annotated.
        table: String,
        /// Lookup key.
        key: String,
        /// Catalogue consulted.
        kind: MetadataKind,
    },
    /// The table is not registered.
    #[error("table {table} is not registered")]
    UnknownTable {
        /// Offending table.
        table: String,
    },
    /// The backend failed.
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Table and column metadata gathered from the workbooks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataCatalogue {
    tables: BTreeMap<String, Metadata>,
    columns: BTreeMap<String, Vec<(String, Metadata)>>,
}

impl MetadataCatalogue {
    /// Create an empty catalogue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record metadata for a table number. Keys are case-insensitive.
    pub fn insert_table(&mut self, table_number: &str, metadata: Metadata) {
        self.tables.insert(table_number.to_lowercase(), metadata);
    }

    /// Append metadata for one column of a datapack file.
    pub fn add_column(&mut self, datapack_file: &str, column: impl Into<String>, metadata: Metadata) {
        self.columns
            .entry(datapack_file.to_lowercase())
            .or_default()
            .push((column.into(), metadata));
    }

    /// Metadata for a table number.
    pub fn table(&self, table_number: &str) -> Option<&Metadata> {
        self.tables.get(&table_number.to_lowercase())
    }

    /// Column metadata for a datapack file.
    pub fn columns(&self, datapack_file: &str) -> Option<&[(String, Metadata)]> {
        self.columns
            .get(&datapack_file.to_lowercase())
            .map(Vec::as_slice)
    }

    /// Fold another catalogue into this one. Later table entries win.
    pub fn merge(&mut self, other: Self) {
        self.tables.extend(other.tables);
        for (file, columns) in other.columns {
            self.columns.entry(file).or_default().extend(columns);
        }
    }

    /// Number of table entries.
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// Number of datapack files with column entries.
    pub fn file_count(&self) -> usize {
        self.columns.len()
    }
}

/// Datapack file a table was loaded from: its name up to the first `_`,
/// lowercased.
///
/// # Examples
///
/// ```
/// use census_core::datapack_file;
///
/// assert_eq!(datapack_file("B01A_aust_sa1"), "b01a");
/// assert_eq!(datapack_file("x20"), "x20");
/// ```
pub fn datapack_file(table_name: &str) -> String {
    table_name
        .split_once('_')
        .map_or(table_name, |(head, _)| head)
        .to_lowercase()
}

fn registered<D>(db: &mut D, table: &str) -> Result<TableInfo, MetadataError>
where
    D: Database + ?Sized,
{
    db.find_table_info(table)?
        .ok_or_else(|| MetadataError::UnknownTable {
            table: table.to_owned(),
        })
}

/// Replace the metadata of a registered table.
pub fn attach_table_metadata<D>(
    db: &mut D,
    table: &str,
    metadata: &Metadata,
) -> Result<(), MetadataError>
where
    D: Database + ?Sized,
{
    let info = registered(db, table)?;
    db.set_table_metadata(info.id, metadata)?;
    db.commit()?;
    Ok(())
}

/// Record metadata for columns of a registered table.
pub fn attach_column_metadata<D>(
    db: &mut D,
    table: &str,
    columns: &[(String, Metadata)],
) -> Result<(), MetadataError>
where
    D: Database + ?Sized,
{
    let info = registered(db, table)?;
    for (column, metadata) in columns {
        db.insert_column_info(info.id, column, metadata)?;
    }
    db.commit()?;
    Ok(())
}

/// Attaches workbook metadata to attribute tables.
#[derive(Debug, Clone)]
pub struct MetadataRegistrar {
    catalogue: MetadataCatalogue,
    pattern: Regex,
}

impl MetadataRegistrar {
    /// Create a registrar over a catalogue.
    pub fn new(catalogue: MetadataCatalogue) -> Result<Self, MetadataError> {
        Ok(Self {
            catalogue,
            pattern: Regex::new(TABLE_NUMBER_PATTERN)?,
        })
    }

    /// Catalogue consulted by [`MetadataRegistrar::annotate`].
    pub fn catalogue(&self) -> &MetadataCatalogue {
        &self.catalogue
    }

    /// Table number of a datapack file, lowercased.
    pub fn table_number(&self, datapack_file: &str) -> Option<String> {
        self.pattern
            .captures(datapack_file)
            .and_then(|captures| captures.get(1))
            .map(|number| number.as_str().to_lowercase())
    }

    /// Attach table and column metadata to a loaded attribute table.
    pub fn annotate<D>(&self, db: &mut D, table: &str) -> Result<(), MetadataError>
    where
        D: Database + ?Sized,
    {
        let file = datapack_file(table);
        let number =
            self.table_number(&file)
                .ok_or_else(|| MetadataError::UnrecognisedTableName {
                    table: table.to_owned(),
                })?;
        let table_metadata =
            self.catalogue
                .table(&number)
                .ok_or_else(|| MetadataError::MetadataNotFound {
                    table: table.to_owned(),
                    key: number.clone(),
                    kind: MetadataKind::Table,
                })?;
        let columns =
            self.catalogue
                .columns(&file)
                .ok_or_else(|| MetadataError::MetadataNotFound {
                    table: table.to_owned(),
                    key: file.clone(),
                    kind: MetadataKind::Column,
                })?;
        attach_table_metadata(db, table, table_metadata)?;
        attach_column_metadata(db, table, columns)?;
        log::debug!("attached {} column descriptions to {table}", columns.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::SchemaStore;
    use crate::geometry::{GeometryRegistrar, RegisterOptions};
    use crate::test_support::MemoryDatabase;
    use rstest::{fixture, rstest};

    fn classification(kind: &str) -> Metadata {
        Metadata::from_pairs([("type", "Persons"), ("kind", kind)])
    }

    #[fixture]
    fn registrar() -> MetadataRegistrar {
        let mut catalogue = MetadataCatalogue::new();
        catalogue.insert_table("B01", classification("Selected Person Characteristics"));
        catalogue.add_column("B01A", "tot_p_m", classification("Count"));
        catalogue.add_column("b01a", "tot_p_f", classification("Count"));
        MetadataRegistrar::new(catalogue).expect("compile pattern")
    }

    #[fixture]
    fn database() -> MemoryDatabase {
        let mut db = MemoryDatabase::new();
        db.create_catalogue().expect("create catalogue");
        for table in ["b01a_aust_sa1", "b02_aust_sa1", "w09_aust_sa1"] {
            db.add_table(table);
            GeometryRegistrar::default()
                .register(&mut db, table, &RegisterOptions::attribute())
                .expect("register table");
        }
        db
    }

    #[rstest]
    #[case("b01", Some("b01"))]
    #[case("b01a", Some("b01"))]
    #[case("I03B", None)]
    #[case("t27b", Some("t27"))]
    #[case("01", None)]
    fn derives_table_numbers(
        registrar: MetadataRegistrar,
        #[case] file: &str,
        #[case] expected: Option<&str>,
    ) {
        assert_eq!(registrar.table_number(file).as_deref(), expected);
    }

    #[rstest]
    fn annotates_table_and_columns(registrar: MetadataRegistrar, mut database: MemoryDatabase) {
        registrar
            .annotate(&mut database, "b01a_aust_sa1")
            .expect("annotate");
        let info = database
            .find_table_info("b01a_aust_sa1")
            .expect("query")
            .expect("registered");
        assert_eq!(info.metadata.get("kind"), Some("Selected Person Characteristics"));
        let columns: Vec<_> = database
            .columns(info.id)
            .expect("columns")
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(columns, vec!["tot_p_m", "tot_p_f"]);
    }

    #[rstest]
    fn missing_table_metadata_is_an_error(
        registrar: MetadataRegistrar,
        mut database: MemoryDatabase,
    ) {
        let err = registrar
            .annotate(&mut database, "w09_aust_sa1")
            .expect_err("undocumented table");
        match err {
            MetadataError::MetadataNotFound { key, kind, .. } => {
                assert_eq!(key, "w09");
                assert_eq!(kind, MetadataKind::Table);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[rstest]
    fn missing_column_metadata_is_an_error(mut database: MemoryDatabase) {
        let mut catalogue = MetadataCatalogue::new();
        catalogue.insert_table("b02", classification("Medians"));
        let registrar = MetadataRegistrar::new(catalogue).expect("compile pattern");
        let err = registrar
            .annotate(&mut database, "b02_aust_sa1")
            .expect_err("undocumented columns");
        assert!(matches!(
            err,
            MetadataError::MetadataNotFound { kind: MetadataKind::Column, .. }
        ));
    }

    #[rstest]
    fn merge_combines_workbooks() {
        let mut basic = MetadataCatalogue::new();
        basic.insert_table("b01", classification("Count"));
        basic.add_column("b01", "tot_p_m", classification("Count"));
        let mut expanded = MetadataCatalogue::new();
        expanded.insert_table("x01", classification("Count"));
        expanded.add_column("b01", "tot_p_f", classification("Count"));
        basic.merge(expanded);
        assert_eq!(basic.table_count(), 2);
        assert_eq!(basic.columns("B01").map(<[_]>::len), Some(2));
    }
}
