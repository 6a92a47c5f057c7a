//! Layout of an unpacked census release.
//!
//! ```text
//! <root>/Digital Boundaries/*_shape.zip
//! <root>/<datapack>/Sequential Number Descriptor/<geography>/*.csv
//! <root>/<datapack>/Sequential Number Descriptor/<geography>/AUST/*.csv
//! <root>/Metadata/*.xlsx
//! ```

use std::collections::BTreeSet;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

/// Directory holding boundary archives.
pub const BOUNDARIES_DIR: &str = "Digital Boundaries";

/// Directory, inside a datapack, holding one directory per geography.
pub const SEQUENTIAL_DIR: &str = "Sequential Number Descriptor";

/// Directory holding metadata workbooks.
pub const METADATA_DIR: &str = "Metadata";

/// Fallback directory inside a geography.
pub const NATIONAL_DIR: &str = "AUST";

/// Suffix of every boundary archive.
pub const ARCHIVE_SUFFIX: &str = "_shape.zip";

/// Suffix of the place-of-work boundary archives, which take precedence.
pub const POW_ARCHIVE_SUFFIX: &str = "_POW_shape.zip";

/// Datapacks of the 2011 release.
pub const DEFAULT_DATAPACKS: [&str; 6] = [
    "2011 Aboriginal and Torres Strait Islander Peoples Profile Release 3",
    "2011 Basic Community Profile Release 3",
    "2011 Expanded Community Profile Release 3",
    "2011 Place of Enumeration Profile Release 3",
    "2011 Time Series Profile Release 3",
    "2011 Working Population Profile Release 3",
];

/// Metadata workbooks of the 2011 release.
pub const DEFAULT_WORKBOOKS: [&str; 6] = [
    "Metadata_2011_BCP_DataPack.xlsx",
    "Metadata_2011_IP_DataPack.xlsx",
    "Metadata_2011_PEP_DataPack.xlsx",
    "Metadata_2011_TSP_DataPack.xlsx",
    "Metadata_2011_WPP_DataPack.xlsx",
    "Metadata_2011_XCP_DataPack.xlsx",
];

/// Errors raised while discovering release files.
#[derive(Debug, Error)]
pub enum ReleaseError {
    /// A directory could not be listed.
    #[error("failed to read {path}")]
    Io {
        /// Directory being listed.
        path: Utf8PathBuf,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// A geography directory has no CSV files, directly or under `AUST`.
    #[error("can't find CSV files for {geography}")]
    NoCsvFiles {
        /// Geography directory searched.
        geography: Utf8PathBuf,
    },
    /// No loaded geometry table belongs to a division.
    #[error("no geometry table loaded for division {division}")]
    MissingDivisionTable {
        /// Division without a table.
        division: String,
    },
    /// An expected file is absent.
    #[error("{path} does not exist")]
    Missing {
        /// Absent path.
        path: Utf8PathBuf,
    },
}

fn io_error(path: &Utf8Path) -> impl FnOnce(io::Error) -> ReleaseError + '_ {
    move |source| ReleaseError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Second `_` field of an archive name, naming the division it covers.
///
/// # Examples
///
/// ```
/// use camino::Utf8Path;
/// use census_data::release::projection_token;
///
/// let archive = Utf8Path::new("1270055001_sa1_2011_aust_shape.zip");
/// assert_eq!(projection_token(archive), Some("sa1"));
/// ```
pub fn projection_token(archive: &Utf8Path) -> Option<&str> {
    archive.file_name()?.split('_').nth(1)
}

/// Physical geometry table of `division`: the first loaded table named
/// `<division>_2011...`.
pub fn division_table<'a, I>(division: &str, tables: I) -> Result<&'a str, ReleaseError>
where
    I: IntoIterator<Item = &'a str>,
{
    let prefix = format!("{division}_2011");
    tables
        .into_iter()
        .find(|table| table.starts_with(&prefix))
        .ok_or_else(|| ReleaseError::MissingDivisionTable {
            division: division.to_owned(),
        })
}

/// An unpacked release rooted at one directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseLayout {
    root: Utf8PathBuf,
}

impl ReleaseLayout {
    /// Layout rooted at `root`.
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Release root.
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Directory holding boundary archives.
    pub fn boundaries_dir(&self) -> Utf8PathBuf {
        self.root.join(BOUNDARIES_DIR)
    }

    /// Boundary archives to load.
    ///
    /// Place-of-work archives come first. Any other archive is included only
    /// when no place-of-work archive covers its division. Suffixes match in
    /// any case.
    pub fn boundary_archives(&self) -> Result<Vec<Utf8PathBuf>, ReleaseError> {
        let dir = self.boundaries_dir();
        let archives =
            census_fs::files_with_suffix(&dir, ARCHIVE_SUFFIX).map_err(io_error(&dir))?;
        let (preferred, others): (Vec<_>, Vec<_>) = archives
            .into_iter()
            .partition(|path| has_suffix(path, POW_ARCHIVE_SUFFIX));
        let covered: BTreeSet<String> = preferred
            .iter()
            .filter_map(|path| projection_token(path).map(str::to_ascii_lowercase))
            .collect();
        let mut selected = preferred;
        for archive in others {
            match projection_token(&archive).map(str::to_ascii_lowercase) {
                Some(token) if covered.contains(&token) => {
                    log::debug!("{archive} superseded by a place-of-work archive");
                }
                _ => selected.push(archive),
            }
        }
        Ok(selected)
    }

    /// Directory of geographies inside `datapack`.
    pub fn datapack_dir(&self, datapack: &str) -> Utf8PathBuf {
        self.root.join(datapack).join(SEQUENTIAL_DIR)
    }

    /// Every attribute CSV of `datapack`, geography by geography.
    pub fn datapack_csvs(&self, datapack: &str) -> Result<Vec<Utf8PathBuf>, ReleaseError> {
        let dir = self.datapack_dir(datapack);
        let mut files = Vec::new();
        for geography in census_fs::subdirectories(&dir).map_err(io_error(&dir))? {
            files.extend(geography_csvs(&geography)?);
        }
        log::debug!("{datapack}: {} CSV files", files.len());
        Ok(files)
    }

    /// Path of a metadata workbook.
    pub fn metadata_workbook(&self, name: &str) -> Utf8PathBuf {
        self.root.join(METADATA_DIR).join(name)
    }

    /// Paths of `names`, failing on the first absent workbook.
    pub fn metadata_workbooks<'a, I>(&self, names: I) -> Result<Vec<Utf8PathBuf>, ReleaseError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        names
            .into_iter()
            .map(|name| {
                let path = self.metadata_workbook(name);
                if census_fs::is_file(&path).map_err(io_error(&path))? {
                    Ok(path)
                } else {
                    Err(ReleaseError::Missing { path })
                }
            })
            .collect()
    }
}

fn has_suffix(path: &Utf8Path, suffix: &str) -> bool {
    path.file_name()
        .is_some_and(|name| name.to_ascii_lowercase().ends_with(&suffix.to_ascii_lowercase()))
}

fn geography_csvs(geography: &Utf8Path) -> Result<Vec<Utf8PathBuf>, ReleaseError> {
    let direct = census_fs::files_with_suffix(geography, ".csv").map_err(io_error(geography))?;
    if !direct.is_empty() {
        return Ok(direct);
    }
    let national = geography.join(NATIONAL_DIR);
    let nested = match census_fs::files_with_suffix(&national, ".csv") {
        Ok(files) => files,
        Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
        Err(source) => {
            return Err(ReleaseError::Io {
                path: national,
                source,
            });
        }
    };
    if nested.is_empty() {
        return Err(ReleaseError::NoCsvFiles {
            geography: geography.to_path_buf(),
        });
    }
    Ok(nested)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use std::fs;
    use tempfile::TempDir;

    struct Release {
        _dir: TempDir,
        layout: ReleaseLayout,
    }

    impl Release {
        fn touch(&self, relative: &str) {
            let path = self.layout.root().join(relative);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).expect("create parent");
            }
            fs::write(&path, b"").expect("touch file");
        }

        fn mkdir(&self, relative: &str) {
            fs::create_dir_all(self.layout.root().join(relative)).expect("create dir");
        }
    }

    #[fixture]
    fn release() -> Release {
        let dir = TempDir::new().expect("tempdir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 tempdir");
        Release {
            _dir: dir,
            layout: ReleaseLayout::new(root),
        }
    }

    const PACK: &str = "2011 Basic Community Profile Release 3";

    #[rstest]
    fn place_of_work_archives_supersede_their_division(release: Release) {
        release.touch("Digital Boundaries/1270055001_sa1_2011_aust_shape.zip");
        release.touch("Digital Boundaries/1270055001_sa2_2011_aust_shape.zip");
        release.touch("Digital Boundaries/1270055001_sa2_2011_aust_POW_shape.zip");
        release.touch("Digital Boundaries/readme.txt");
        let names: Vec<String> = release
            .layout
            .boundary_archives()
            .expect("archives")
            .iter()
            .filter_map(|path| path.file_name().map(str::to_owned))
            .collect();
        assert_eq!(
            names,
            [
                "1270055001_sa2_2011_aust_POW_shape.zip",
                "1270055001_sa1_2011_aust_shape.zip",
            ]
        );
    }

    #[rstest]
    fn archive_suffixes_match_in_any_case(release: Release) {
        release.touch("Digital Boundaries/1270055001_SA1_2011_AUST_SHAPE.zip");
        release.touch("Digital Boundaries/1270055001_sa2_2011_aust_shape.zip");
        release.touch("Digital Boundaries/1270055001_SA2_2011_AUST_pow_shape.zip");
        let names: Vec<String> = release
            .layout
            .boundary_archives()
            .expect("archives")
            .iter()
            .filter_map(|path| path.file_name().map(str::to_owned))
            .collect();
        assert_eq!(
            names,
            [
                "1270055001_SA2_2011_AUST_pow_shape.zip",
                "1270055001_SA1_2011_AUST_SHAPE.zip",
            ]
        );
    }

    #[rstest]
    fn missing_boundaries_directory_is_an_io_error(release: Release) {
        assert!(matches!(
            release.layout.boundary_archives(),
            Err(ReleaseError::Io { .. })
        ));
    }

    #[rstest]
    fn csvs_fall_back_to_national_directory(release: Release) {
        release.touch(&format!(
            "{PACK}/Sequential Number Descriptor/SA1/2011Census_B01_AUST_SA1_sequential.csv"
        ));
        release.touch(&format!(
            "{PACK}/Sequential Number Descriptor/AUS/AUST/2011Census_B01_AUST_sequential.csv"
        ));
        let files = release.layout.datapack_csvs(PACK).expect("csvs");
        let names: Vec<_> = files.iter().filter_map(|path| path.file_name()).collect();
        assert_eq!(
            names,
            [
                "2011Census_B01_AUST_sequential.csv",
                "2011Census_B01_AUST_SA1_sequential.csv",
            ]
        );
    }

    #[rstest]
    fn empty_geography_is_reported(release: Release) {
        release.mkdir(&format!("{PACK}/Sequential Number Descriptor/SA2/AUST"));
        match release.layout.datapack_csvs(PACK) {
            Err(ReleaseError::NoCsvFiles { geography }) => {
                assert_eq!(geography.file_name(), Some("SA2"));
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[rstest]
    fn workbooks_must_exist(release: Release) {
        release.touch("Metadata/Metadata_2011_BCP_DataPack.xlsx");
        let found = release
            .layout
            .metadata_workbooks(["Metadata_2011_BCP_DataPack.xlsx"])
            .expect("present");
        assert_eq!(found.len(), 1);
        let missing = release
            .layout
            .metadata_workbooks(["Metadata_2011_XCP_DataPack.xlsx"]);
        assert!(matches!(missing, Err(ReleaseError::Missing { .. })));
    }

    #[rstest]
    #[case("sa1", Ok("sa1_2011_aust"))]
    #[case("ste", Ok("ste_2011_aust"))]
    #[case("ced", Err(()))]
    fn finds_division_tables(#[case] division: &str, #[case] expected: Result<&str, ()>) {
        let tables = ["sa1_2011_aust", "sa2_2011_aust", "ste_2011_aust"];
        let found = division_table(division, tables).map_err(|_| ());
        assert_eq!(found, expected);
    }

    #[rstest]
    #[case("1270055001_sa1_2011_aust_shape.zip", Some("sa1"))]
    #[case("1270055003_poa_2011_aust_POW_shape.zip", Some("poa"))]
    #[case("shape.zip", None)]
    fn reads_projection_tokens(#[case] name: &str, #[case] expected: Option<&str>) {
        assert_eq!(projection_token(Utf8Path::new(name)), expected);
    }
}
