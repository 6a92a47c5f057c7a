//! Metadata workbooks.
//!
//! Each datapack ships a workbook whose first sheet describes tables and
//! whose second sheet describes columns. Both sheets open with a banner of
//! header rows which are skipped.

use std::fs::File;
use std::io::BufReader;

use calamine::{Data, Range, Reader, Sheets, open_workbook_auto};
use camino::{Utf8Path, Utf8PathBuf};
use census_core::{Metadata, MetadataCatalogue};
use thiserror::Error;

/// Header rows above the table descriptions.
pub const TABLE_SHEET_HEADER_ROWS: usize = 3;

/// Header rows above the column descriptions.
pub const COLUMN_SHEET_HEADER_ROWS: usize = 4;

/// Errors raised while reading workbooks.
#[derive(Debug, Error)]
pub enum WorkbookError {
    /// The workbook could not be opened or decoded.
    #[error("failed to read workbook {path}")]
    Read {
        /// Workbook path.
        path: Utf8PathBuf,
        /// Decoder error.
        #[source]
        source: calamine::Error,
    },
    /// A required sheet is absent.
    #[error("workbook {path} has no sheet {index}")]
    MissingSheet {
        /// Workbook path.
        path: Utf8PathBuf,
        /// Zero-based sheet index.
        index: usize,
    },
}

fn cell(row: &[String], index: usize) -> &str {
    row.get(index).map_or("", String::as_str)
}

fn classification(kind_of: &str, kind: &str) -> Metadata {
    Metadata::from_pairs([("type", kind_of), ("kind", kind)])
}

/// Fold the table sheet into `catalogue`.
///
/// Column 0 holds the table number, 1 its type and 2 its kind. Rows without
/// a table number are ignored.
pub fn parse_table_sheet<I>(rows: I, catalogue: &mut MetadataCatalogue)
where
    I: IntoIterator<Item = Vec<String>>,
{
    for row in rows.into_iter().skip(TABLE_SHEET_HEADER_ROWS) {
        let name = cell(&row, 0).trim();
        if name.is_empty() {
            continue;
        }
        catalogue.insert_table(name, classification(cell(&row, 1), cell(&row, 2)));
    }
}

/// Fold the column sheet into `catalogue`.
///
/// Column 0 holds the column name, 2 its type, 3 the datapack file and 5 its
/// kind. Names are lowercased to match loaded headers.
pub fn parse_column_sheet<I>(rows: I, catalogue: &mut MetadataCatalogue)
where
    I: IntoIterator<Item = Vec<String>>,
{
    for row in rows.into_iter().skip(COLUMN_SHEET_HEADER_ROWS) {
        let name = cell(&row, 0).trim();
        if name.is_empty() {
            continue;
        }
        catalogue.add_column(
            cell(&row, 3),
            name.to_lowercase(),
            classification(cell(&row, 2), cell(&row, 5)),
        );
    }
}

fn render(value: &Data) -> String {
    match value {
        Data::Empty => String::new(),
        other => other.to_string(),
    }
}

/// Rows of `range` addressed from A1.
///
/// Calamine ranges begin at the first used cell, so leading blank rows and
/// columns are restored as empty cells to keep the header offsets and
/// column positions absolute.
fn absolute_rows(range: &Range<Data>) -> Vec<Vec<String>> {
    let Some((first_row, first_column)) = range.start() else {
        return Vec::new();
    };
    let leading_rows = std::iter::repeat_with(Vec::new).take(first_row as usize);
    let used_rows = range.rows().map(|row| {
        std::iter::repeat_with(String::new)
            .take(first_column as usize)
            .chain(row.iter().map(render))
            .collect()
    });
    leading_rows.chain(used_rows).collect()
}

fn sheet_rows(
    workbook: &mut Sheets<BufReader<File>>,
    path: &Utf8Path,
    index: usize,
) -> Result<Vec<Vec<String>>, WorkbookError> {
    let range = workbook
        .worksheet_range_at(index)
        .ok_or_else(|| WorkbookError::MissingSheet {
            path: path.to_path_buf(),
            index,
        })?
        .map_err(|source| WorkbookError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(absolute_rows(&range))
}

/// Read one workbook into a fresh catalogue.
pub fn load_workbook(path: &Utf8Path) -> Result<MetadataCatalogue, WorkbookError> {
    log::info!("parsing metadata: {path}");
    let mut workbook = open_workbook_auto(path).map_err(|source| WorkbookError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut catalogue = MetadataCatalogue::new();
    parse_table_sheet(sheet_rows(&mut workbook, path, 0)?, &mut catalogue);
    parse_column_sheet(sheet_rows(&mut workbook, path, 1)?, &mut catalogue);
    log::debug!(
        "{path}: {} tables, {} datapack files",
        catalogue.table_count(),
        catalogue.file_count()
    );
    Ok(catalogue)
}

/// Read several workbooks into one catalogue. Later table entries win.
pub fn load_workbooks<'a, I>(paths: I) -> Result<MetadataCatalogue, WorkbookError>
where
    I: IntoIterator<Item = &'a Utf8Path>,
{
    paths
        .into_iter()
        .try_fold(MetadataCatalogue::new(), |mut catalogue, path| {
            catalogue.merge(load_workbook(path)?);
            Ok(catalogue)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn rows(lines: &[&[&str]]) -> Vec<Vec<String>> {
        lines
            .iter()
            .map(|line| line.iter().map(|cell| (*cell).to_owned()).collect())
            .collect()
    }

    #[rstest]
    fn table_sheet_skips_banner_and_blanks() {
        let sheet = rows(&[
            &["Australian Bureau of Statistics"],
            &["2011 Census of Population and Housing"],
            &["Table number", "Table name", "Population"],
            &["B01", "Selected Person Characteristics by Sex", "Persons"],
            &["", "stray", "row"],
            &["B02", "Selected Medians and Averages"],
        ]);
        let mut catalogue = MetadataCatalogue::new();
        parse_table_sheet(sheet, &mut catalogue);
        assert_eq!(catalogue.table_count(), 2);
        let b01 = catalogue.table("b01").expect("b01");
        assert_eq!(b01.get("type"), Some("Selected Person Characteristics by Sex"));
        assert_eq!(b01.get("kind"), Some("Persons"));
        assert_eq!(catalogue.table("B02").and_then(|m| m.get("kind")), Some(""));
    }

    #[rstest]
    fn column_sheet_groups_by_datapack_file() {
        let sheet = rows(&[
            &["banner"],
            &["banner"],
            &["banner"],
            &["Sequential", "Short", "Long", "DataPack file", "Profile table", "Column heading"],
            &["B1", "Tot_P_M", "Total Persons Males", "B01A", "B01", "Males"],
            &["B2", "Tot_P_F", "Total Persons Females", "B01A", "B01", "Females"],
            &["B3", "Age_0_4", "Age groups 0-4", "B01b", "B01", "0-4 years"],
            &[""],
        ]);
        let mut catalogue = MetadataCatalogue::new();
        parse_column_sheet(sheet, &mut catalogue);
        assert_eq!(catalogue.file_count(), 2);
        let columns = catalogue.columns("b01a").expect("b01a");
        let names: Vec<_> = columns.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, ["b1", "b2"]);
        assert_eq!(columns[0].1.get("type"), Some("Total Persons Males"));
        assert_eq!(columns[0].1.get("kind"), Some("Males"));
        assert!(catalogue.columns("b01b").is_some());
    }

    #[rstest]
    fn short_sheets_yield_nothing() {
        let mut catalogue = MetadataCatalogue::new();
        parse_table_sheet(rows(&[&["B01", "x", "y"]]), &mut catalogue);
        parse_column_sheet(rows(&[&["B1"]]), &mut catalogue);
        assert_eq!(catalogue, MetadataCatalogue::new());
    }

    fn write_workbook(path: &Utf8Path, tables: &[(u32, u16, &str)], columns: &[(u32, u16, &str)]) {
        let mut workbook = rust_xlsxwriter::Workbook::new();
        let sheet = workbook.add_worksheet();
        for (row, column, text) in tables {
            sheet.write_string(*row, *column, *text).expect("write table cell");
        }
        let sheet = workbook.add_worksheet();
        for (row, column, text) in columns {
            sheet.write_string(*row, *column, *text).expect("write column cell");
        }
        workbook.save(path.as_std_path()).expect("save workbook");
    }

    #[rstest]
    fn offsets_count_from_the_first_row_and_column() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = Utf8PathBuf::from_path_buf(dir.path().join("Metadata_2011_BCP_DataPack.xlsx"))
            .expect("utf-8 path");
        // Row 0 of the table sheet is blank; column A of the column sheet
        // holds nothing at all.
        write_workbook(
            &path,
            &[
                (1, 0, "Australian Bureau of Statistics"),
                (2, 0, "Table number"),
                (3, 0, "B01"),
                (3, 1, "Persons"),
                (3, 2, "Count"),
            ],
            &[
                (2, 1, "banner"),
                (4, 1, "Tot_P_M"),
                (4, 2, "Total Persons Males"),
                (4, 3, "B01"),
                (4, 5, "Males"),
            ],
        );

        let catalogue = load_workbook(&path).expect("read workbook");
        let b01 = catalogue.table("b01").expect("b01 follows the three banner rows");
        assert_eq!(b01.get("type"), Some("Persons"));
        assert_eq!(b01.get("kind"), Some("Count"));
        assert_eq!(catalogue.table_count(), 1);

        // Column A is blank, so the row has no column name and is skipped
        // rather than read one cell to the left.
        assert_eq!(catalogue.file_count(), 0);
    }

    #[rstest]
    fn column_sheet_keeps_absolute_positions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = Utf8PathBuf::from_path_buf(dir.path().join("metadata.xlsx"))
            .expect("utf-8 path");
        write_workbook(
            &path,
            &[(3, 0, "B01"), (3, 1, "Persons"), (3, 2, "Count")],
            &[
                (4, 0, "Tot_P_M"),
                (4, 2, "Total Persons Males"),
                (4, 3, "B01"),
                (4, 5, "Males"),
            ],
        );

        let catalogue = load_workbook(&path).expect("read workbook");
        let columns = catalogue.columns("b01").expect("b01 columns");
        assert_eq!(columns.len(), 1);
        assert_eq!(columns[0].0, "tot_p_m");
        assert_eq!(columns[0].1.get("type"), Some("Total Persons Males"));
        assert_eq!(columns[0].1.get("kind"), Some("Males"));
    }

    #[rstest]
    fn missing_workbook_reports_path() {
        let path = Utf8Path::new("/nonexistent/Metadata_2011_BCP_DataPack.xlsx");
        match load_workbook(path) {
            Err(WorkbookError::Read { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("unexpected result {other:?}"),
        }
    }
}
