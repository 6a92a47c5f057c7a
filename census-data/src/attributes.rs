//! Datapack attribute files.
//!
//! Every datapack CSV becomes one attribute table. The table name comes from
//! the file name, and its last `_` field names the division whose geometry
//! the rows describe.

use std::fmt;
use std::io;
use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::fs_utf8::File;
use census_core::{AttributeInput, RowResult};
use regex::Regex;
use thiserror::Error;

/// File name pattern of a datapack CSV.
pub const ATTRIBUTE_FILE_PATTERN: &str = r"^2011Census_(.*)_sequential.csv$";

static ATTRIBUTE_FILE: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(ATTRIBUTE_FILE_PATTERN));

/// Errors raised while naming attribute files.
#[derive(Debug, Error)]
pub enum AttributeError {
    /// The file name does not follow the datapack convention.
    #[error("{path} is not a datapack file")]
    UnrecognisedFileName {
        /// Offending path.
        path: Utf8PathBuf,
    },
    /// The file name pattern failed to compile.
    #[error("invalid attribute file pattern")]
    Pattern(#[source] regex::Error),
}

/// Table name for a datapack CSV.
///
/// # Examples
///
/// ```
/// use camino::Utf8Path;
/// use census_data::attributes::attribute_table_name;
///
/// let path = Utf8Path::new("SA1/AUST/2011Census_B01_AUST_SA1_sequential.csv");
/// assert_eq!(attribute_table_name(path).unwrap(), "b01_aust_sa1");
/// ```
pub fn attribute_table_name(path: &Utf8Path) -> Result<String, AttributeError> {
    let pattern = ATTRIBUTE_FILE
        .as_ref()
        .map_err(|err| AttributeError::Pattern(err.clone()))?;
    path.file_name()
        .and_then(|name| pattern.captures(name))
        .and_then(|captures| captures.get(1))
        .map(|table| table.as_str().to_lowercase())
        .ok_or_else(|| AttributeError::UnrecognisedFileName {
            path: path.to_path_buf(),
        })
}

/// Division of an attribute table: the third `_` field of a three-field name.
///
/// Two-field names, such as national totals, have no division.
///
/// # Examples
///
/// ```
/// use census_data::attributes::division_of;
///
/// assert_eq!(division_of("b01_aust_sa1"), Some("sa1"));
/// assert_eq!(division_of("b01_aust"), None);
/// ```
pub fn division_of(table: &str) -> Option<&str> {
    let mut fields = table.split('_');
    match (fields.next(), fields.next(), fields.next(), fields.next()) {
        (Some(_), Some(_), Some(division), None) => Some(division),
        _ => None,
    }
}

/// Rows of a delimited file, read lazily.
///
/// The file is opened on the first call to `next`; a failure to open it is
/// yielded as the first row. Records may differ in width.
pub struct CsvRows {
    path: Utf8PathBuf,
    records: Option<csv::StringRecordsIntoIter<File>>,
    finished: bool,
}

impl fmt::Debug for CsvRows {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CsvRows")
            .field("path", &self.path)
            .field("opened", &self.records.is_some())
            .field("finished", &self.finished)
            .finish()
    }
}

impl CsvRows {
    /// Rows of the file at `path`.
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: None,
            finished: false,
        }
    }

    /// Path being read.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn open(&self) -> io::Result<csv::StringRecordsIntoIter<File>> {
        let file = census_fs::open_utf8_file(&self.path)?;
        Ok(csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(file)
            .into_records())
    }
}

impl Iterator for CsvRows {
    type Item = RowResult;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if self.records.is_none() {
            match self.open() {
                Ok(records) => self.records = Some(records),
                Err(err) => {
                    self.finished = true;
                    return Some(Err(Box::new(err)));
                }
            }
        }
        let record = self.records.as_mut()?.next()?;
        Some(
            record
                .map(|fields| fields.iter().map(str::to_owned).collect())
                .map_err(Into::into),
        )
    }
}

/// Build the pipeline input for one datapack CSV.
pub fn attribute_input(path: &Utf8Path) -> Result<AttributeInput, AttributeError> {
    let table = attribute_table_name(path)?;
    let source_name = path.file_name().unwrap_or(path.as_str()).to_owned();
    let division = division_of(&table).map(str::to_owned);
    let input = AttributeInput::new(table, source_name, CsvRows::new(path));
    Ok(match division {
        Some(division) => input.with_division(division),
        None => input,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::fs;
    use tempfile::TempDir;

    #[rstest]
    #[case("2011Census_B01_AUST_SA1_sequential.csv", "b01_aust_sa1")]
    #[case("dir/2011Census_I03A_AUST_sequential.csv", "i03a_aust")]
    #[case("2011Census_X01_AUST_POA_sequential.csv", "x01_aust_poa")]
    fn names_tables_from_files(#[case] path: &str, #[case] expected: &str) {
        let name = attribute_table_name(Utf8Path::new(path)).expect("datapack file");
        assert_eq!(name, expected);
    }

    #[rstest]
    #[case("2011Census_B01_AUST_SA1.csv")]
    #[case("readme.txt")]
    #[case("2006Census_B01_AUST_SA1_sequential.csv")]
    fn rejects_other_files(#[case] path: &str) {
        let err = attribute_table_name(Utf8Path::new(path));
        assert!(matches!(
            err,
            Err(AttributeError::UnrecognisedFileName { .. })
        ));
    }

    #[rstest]
    #[case("b01_aust_sa1", Some("sa1"))]
    #[case("b01_aust", None)]
    #[case("b01", None)]
    #[case("b01_aust_sa1_extra", None)]
    fn divisions_come_from_three_field_names(#[case] table: &str, #[case] expected: Option<&str>) {
        assert_eq!(division_of(table), expected);
    }

    #[rstest]
    fn reads_rows_lazily_and_flexibly() {
        let dir = TempDir::new().expect("tempdir");
        let path = Utf8PathBuf::from_path_buf(dir.path().join("2011Census_B01_AUST_SA1_sequential.csv"))
            .expect("utf-8 path");
        fs::write(&path, "region_id,Tot_P_M,Tot_P_F\n1100701,98,102\n1100702,\"1,2\"\n")
            .expect("write csv");
        let rows: Vec<Vec<String>> = CsvRows::new(&path)
            .collect::<Result<_, _>>()
            .expect("read rows");
        assert_eq!(
            rows,
            vec![
                vec!["region_id", "Tot_P_M", "Tot_P_F"],
                vec!["1100701", "98", "102"],
                vec!["1100702", "1,2"],
            ]
        );
    }

    #[rstest]
    fn missing_file_is_the_first_row() {
        let mut rows = CsvRows::new("/nonexistent/2011Census_B01_AUST_sequential.csv");
        assert!(matches!(rows.next(), Some(Err(_))));
        assert!(rows.next().is_none());
    }

    #[rstest]
    fn builds_pipeline_inputs() {
        let input = attribute_input(Utf8Path::new("SA1/2011Census_B01_AUST_SA1_sequential.csv"))
            .expect("input");
        assert_eq!(input.table, "b01_aust_sa1");
        assert_eq!(input.source_name, "2011Census_B01_AUST_SA1_sequential.csv");
        assert_eq!(input.division.as_deref(), Some("sa1"));
        let national = attribute_input(Utf8Path::new("2011Census_B01_AUST_sequential.csv"))
            .expect("input");
        assert_eq!(national.division, None);
    }
}
