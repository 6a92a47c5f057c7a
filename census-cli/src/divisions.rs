//! How each census division links attribute rows to its boundaries.

use camino::Utf8Path;
use census_core::KeyCast;
use serde::{Deserialize, Serialize};

use crate::CliError;

/// One division: the business key of its geometry table and how to compare
/// it against attribute rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DivisionLinkage {
    /// Division name, as it appears in attribute table names.
    pub division: String,
    /// Business-key column of the division's geometry table.
    pub key_column: String,
    /// Cast applied to keys before matching.
    #[serde(default)]
    pub cast: KeyCast,
    /// Human-readable description stored as table metadata.
    pub description: String,
}

impl DivisionLinkage {
    fn new(division: &str, key_column: &str, cast: KeyCast, description: &str) -> Self {
        Self {
            division: division.to_owned(),
            key_column: key_column.to_owned(),
            cast,
            description: description.to_owned(),
        }
    }
}

const DEFAULT_LINKAGES: [(&str, &str, KeyCast, &str); 20] = [
    ("ced", "ced_code", KeyCast::None, "Commonwealth Electoral Division"),
    ("gccsa", "gccsa_code", KeyCast::None, "Greater Capital City Statistical Areas"),
    ("iare", "iare_code", KeyCast::None, "Indigenous Area"),
    ("iloc", "iloc_code", KeyCast::None, "Indigenous Location"),
    ("ireg", "ireg_code", KeyCast::None, "Indigenous Region"),
    ("lga", "lga_code", KeyCast::None, "Local Government Area"),
    ("poa", "poa_code", KeyCast::None, "Postal Areas"),
    ("ra", "ra_code", KeyCast::None, "Remoteness Area"),
    ("sa1", "sa1_7digit", KeyCast::Integer, "Statistical Area Level 1"),
    ("sa2", "sa2_main", KeyCast::None, "Statistical Area Level 2"),
    ("sa3", "sa3_code", KeyCast::None, "Statistical Area Level 3"),
    ("sa4", "sa4_code", KeyCast::None, "Statistical Area Level 4"),
    ("sed", "sed_code", KeyCast::None, "State Electoral Division"),
    ("sla", "sla_main", KeyCast::None, "Statistical Local Areas"),
    ("sos", "sos_code", KeyCast::None, "Section of State"),
    ("sosr", "sosr_code", KeyCast::None, "Section of State Range"),
    ("ssc", "ssc_code", KeyCast::None, "State Suburb"),
    ("ste", "state_code", KeyCast::None, "State/Territory"),
    ("sua", "sua_code", KeyCast::None, "Significant Urban Areas"),
    ("ucl", "ucl_code", KeyCast::None, "Urban Centre/Locality"),
];

/// Division linkages of the 2011 release.
pub fn default_linkages() -> Vec<DivisionLinkage> {
    DEFAULT_LINKAGES
        .iter()
        .map(|(division, key, cast, description)| {
            DivisionLinkage::new(division, key, *cast, description)
        })
        .collect()
}

/// Read a JSON array of linkages replacing the defaults.
pub fn load_linkages(path: &Utf8Path) -> Result<Vec<DivisionLinkage>, CliError> {
    let file = census_fs::open_utf8_file(path).map_err(|source| CliError::ReadDivisions {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_reader(std::io::BufReader::new(file)).map_err(|source| {
        CliError::ParseDivisions {
            path: path.to_path_buf(),
            source,
        }
    })
}
