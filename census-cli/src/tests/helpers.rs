//! Test helpers that lay out a miniature release on disk.

use crate::config::{DEFAULT_NATIVE_SRID, DEFAULT_SCHEMA, LoadConfig};
use camino::{Utf8Path, Utf8PathBuf};
use census_core::{DEFAULT_MANDATORY_SRIDS, Metadata, MetadataCatalogue};
use census_data::ConnectionSettings;
use census_data::release::{BOUNDARIES_DIR, METADATA_DIR, SEQUENTIAL_DIR};
use census_data::test_support::StubShapefileLoader;
use std::fs::{self, File};
use std::io::Write as _;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

pub(super) const DATAPACK: &str = "2011 Basic Community Profile Release 3";
pub(super) const WORKBOOK: &str = "Metadata_2011_BCP_DataPack.xlsx";

const DIVISIONS: &str = r#"[
    {"division": "sa1", "key_column": "sa1_7digit", "cast": "integer",
     "description": "Statistical Area Level 1"},
    {"division": "ste", "key_column": "state_code",
     "description": "State/Territory"}
]"#;

/// An unpacked release with SA1 and STE boundaries and one datapack.
pub(super) struct ReleaseFixture {
    _dir: TempDir,
    root: Utf8PathBuf,
}

impl ReleaseFixture {
    pub(super) fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 tempdir");
        let release = root.join("release");

        let boundaries = release.join(BOUNDARIES_DIR);
        fs::create_dir_all(&boundaries).expect("create boundaries dir");
        write_archive(
            &boundaries.join("1270055001_sa1_2011_aust_shape.zip"),
            "SA1_2011_AUST",
        );
        write_archive(
            &boundaries.join("1270055001_ste_2011_aust_shape.zip"),
            "STE_2011_AUST",
        );

        let geographies = release.join(DATAPACK).join(SEQUENTIAL_DIR);
        write_csv(
            &geographies.join("SA1/AUST/2011Census_B01_AUST_SA1_sequential.csv"),
            "region_id,Tot_P_P\n1100701,200\n1100702,150\n",
        );
        write_csv(
            &geographies.join("STE/AUST/2011Census_B01_AUST_STE_sequential.csv"),
            "region_id,Tot_P_P\n1,350\n",
        );
        write_csv(
            &geographies.join("AUS/AUST/2011Census_B01_AUST_sequential.csv"),
            "region_id,Tot_P_P\nAUS,350\n",
        );

        let metadata = release.join(METADATA_DIR);
        fs::create_dir_all(&metadata).expect("create metadata dir");
        File::create(metadata.join(WORKBOOK)).expect("create workbook placeholder");

        fs::write(root.join("divisions.json"), DIVISIONS).expect("write divisions");
        Self { _dir: dir, root }
    }

    pub(super) fn release_dir(&self) -> Utf8PathBuf {
        self.root.join("release")
    }

    pub(super) fn divisions_file(&self) -> Utf8PathBuf {
        self.root.join("divisions.json")
    }

    pub(super) fn dump_dir(&self) -> Utf8PathBuf {
        self.root.join("dumps")
    }

    pub(super) fn scratch_dir(&self) -> Utf8PathBuf {
        self.root.join("scratch")
    }

    /// Resolved configuration pointing at this release.
    pub(super) fn config(&self) -> LoadConfig {
        LoadConfig {
            release_dir: self.release_dir(),
            scratch_dir: Some(self.scratch_dir()),
            dump_dir: self.dump_dir(),
            schema: DEFAULT_SCHEMA.to_owned(),
            connection: ConnectionSettings::new("localhost", "postgres", "aucensus2011"),
            mandatory_srids: DEFAULT_MANDATORY_SRIDS.to_vec(),
            native_srid: DEFAULT_NATIVE_SRID,
            repair_geometry: false,
            divisions_file: Some(self.divisions_file()),
            datapacks: vec![DATAPACK.to_owned()],
            workbooks: vec![WORKBOOK.to_owned()],
        }
    }
}

fn write_archive(path: &Utf8Path, stem: &str) {
    let file = File::create(path).expect("create archive");
    let mut writer = zip::ZipWriter::new(file);
    for extension in ["shp", "shx", "dbf", "prj"] {
        writer
            .start_file(format!("{stem}.{extension}"), SimpleFileOptions::default())
            .expect("start entry");
        writer.write_all(b"shape bytes").expect("write entry");
    }
    writer.finish().expect("finish archive");
}

fn write_csv(path: &Utf8Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create geography dir");
    }
    fs::write(path, contents).expect("write csv");
}

/// Converter stand-in populating the SA1 and STE boundary tables.
pub(super) fn boundary_loader() -> StubShapefileLoader {
    StubShapefileLoader::new()
        .with_layer("sa1_2011_aust", "sa1_7digit", ["01100701", "01100702"])
        .with_layer("ste_2011_aust", "state_code", ["1"])
}

/// Catalogue documenting table `b01`.
pub(super) fn b01_catalogue() -> MetadataCatalogue {
    let mut catalogue = MetadataCatalogue::new();
    catalogue.insert_table(
        "B01",
        Metadata::from_pairs([("type", "Persons"), ("kind", "Selected Person Characteristics")]),
    );
    catalogue.add_column(
        "B01",
        "tot_p_p",
        Metadata::from_pairs([("type", "Persons"), ("kind", "Total")]),
    );
    catalogue
}
