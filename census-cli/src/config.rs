//! Layered configuration for the `load` and `check` commands.

use camino::Utf8PathBuf;
use census_core::{DEFAULT_MANDATORY_SRIDS, PipelineConfig, Srid};
use census_data::ConnectionSettings;
use census_data::postgis::DEFAULT_PORT;
use census_data::release::{DEFAULT_DATAPACKS, DEFAULT_WORKBOOKS};
use clap::Parser;
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};

use crate::CliError;
use crate::divisions::{DivisionLinkage, default_linkages, load_linkages};

pub(crate) const ARG_RELEASE_DIR: &str = "release-dir";
pub(crate) const ENV_RELEASE_DIR: &str = "CENSUS_CMDS_LOAD_RELEASE_DIR";

/// Schema the release is moved into.
pub const DEFAULT_SCHEMA: &str = "aus_census_2011";
/// Database the release is loaded into.
pub const DEFAULT_DATABASE: &str = "aucensus2011";
/// Coordinate system of the 2011 boundaries (GDA94).
pub const DEFAULT_NATIVE_SRID: Srid = Srid::new(4283);
const DEFAULT_HOST: &str = "localhost";
const DEFAULT_USER: &str = "postgres";

/// Arguments shared by the `load` and `check` subcommands.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    name = "load",
    long_about = "Load an unpacked census release into PostGIS. Options can \
                 come from CLI flags, configuration files, or environment \
                 variables prefixed with CENSUS_.",
    about = "Describe the release and the target database"
)]
#[ortho_config(prefix = "CENSUS")]
pub(crate) struct LoadArgs {
    /// Root directory of the unpacked release.
    #[arg(long = ARG_RELEASE_DIR, value_name = "dir")]
    #[serde(default)]
    pub(crate) release_dir: Option<Utf8PathBuf>,
    /// Directory for unpacked archives; a temporary directory by default.
    #[arg(long, value_name = "dir")]
    #[serde(default)]
    pub(crate) scratch_dir: Option<Utf8PathBuf>,
    /// Directory the schema dump is written to.
    #[arg(long, value_name = "dir")]
    #[serde(default)]
    pub(crate) dump_dir: Option<Utf8PathBuf>,
    /// Schema the loaded tables are moved into.
    #[arg(long, value_name = "name")]
    #[serde(default)]
    pub(crate) schema: Option<String>,
    /// Database server host.
    #[arg(long, value_name = "host")]
    #[serde(default)]
    pub(crate) db_host: Option<String>,
    /// Database server port.
    #[arg(long, value_name = "port")]
    #[serde(default)]
    pub(crate) db_port: Option<u16>,
    /// Database login role.
    #[arg(long, value_name = "user")]
    #[serde(default)]
    pub(crate) db_user: Option<String>,
    /// Database password.
    #[arg(long, value_name = "password")]
    #[serde(default)]
    pub(crate) db_password: Option<String>,
    /// Database to recreate and load into.
    #[arg(long, value_name = "name")]
    #[serde(default)]
    pub(crate) db_name: Option<String>,
    /// SRIDs every geometry is projected into.
    #[arg(long, value_name = "srid", value_delimiter = ',')]
    #[serde(default)]
    pub(crate) mandatory_srids: Option<Vec<u32>>,
    /// SRID of the boundary shapefiles.
    #[arg(long, value_name = "srid")]
    #[serde(default)]
    pub(crate) native_srid: Option<u32>,
    /// Make invalid geometries valid before projecting them.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_name = "bool")]
    #[serde(default)]
    pub(crate) repair_geometry: Option<bool>,
    /// JSON file replacing the built-in division linkages.
    #[arg(long, value_name = "path")]
    #[serde(default)]
    pub(crate) divisions_file: Option<Utf8PathBuf>,
    /// Datapack directories to load, in order.
    #[arg(long = "datapack", value_name = "name")]
    #[serde(default)]
    pub(crate) datapacks: Option<Vec<String>>,
    /// Metadata workbooks to read, in order.
    #[arg(long = "workbook", value_name = "file")]
    #[serde(default)]
    pub(crate) workbooks: Option<Vec<String>>,
}

impl LoadArgs {
    pub(crate) fn into_config(self) -> Result<LoadConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        LoadConfig::try_from(merged)
    }
}

/// Resolved configuration of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LoadConfig {
    pub(crate) release_dir: Utf8PathBuf,
    pub(crate) scratch_dir: Option<Utf8PathBuf>,
    pub(crate) dump_dir: Utf8PathBuf,
    pub(crate) schema: String,
    pub(crate) connection: ConnectionSettings,
    pub(crate) mandatory_srids: Vec<Srid>,
    pub(crate) native_srid: Srid,
    pub(crate) repair_geometry: bool,
    pub(crate) divisions_file: Option<Utf8PathBuf>,
    pub(crate) datapacks: Vec<String>,
    pub(crate) workbooks: Vec<String>,
}

impl LoadConfig {
    /// Fail unless the release directory exists.
    pub(crate) fn validate_release_dir(&self) -> Result<(), CliError> {
        match census_fs::is_dir(&self.release_dir) {
            Ok(true) => Ok(()),
            Ok(false) => Err(CliError::MissingReleaseDirectory {
                path: self.release_dir.clone(),
            }),
            Err(source) => Err(CliError::InspectPath {
                field: ARG_RELEASE_DIR,
                path: self.release_dir.clone(),
                source,
            }),
        }
    }

    /// Division linkages: the override file when given, else the defaults.
    pub(crate) fn division_linkages(&self) -> Result<Vec<DivisionLinkage>, CliError> {
        self.divisions_file
            .as_deref()
            .map_or_else(|| Ok(default_linkages()), load_linkages)
    }

    pub(crate) fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig::new(&self.schema)
            .with_mandatory_srids(self.mandatory_srids.iter().copied())
            .with_repair(self.repair_geometry)
    }

    /// Archive path of the dump: `<dump_dir>/<schema>`.
    pub(crate) fn dump_destination(&self) -> Utf8PathBuf {
        self.dump_dir.join(&self.schema)
    }
}

impl TryFrom<LoadArgs> for LoadConfig {
    type Error = CliError;

    fn try_from(args: LoadArgs) -> Result<Self, Self::Error> {
        let release_dir = args.release_dir.ok_or(CliError::MissingArgument {
            field: ARG_RELEASE_DIR,
            env: ENV_RELEASE_DIR,
        })?;

        let mut connection = ConnectionSettings::new(
            args.db_host.unwrap_or_else(|| DEFAULT_HOST.to_owned()),
            args.db_user.unwrap_or_else(|| DEFAULT_USER.to_owned()),
            args.db_name.unwrap_or_else(|| DEFAULT_DATABASE.to_owned()),
        )
        .with_port(args.db_port.unwrap_or(DEFAULT_PORT));
        if let Some(password) = args.db_password {
            connection = connection.with_password(password);
        }

        let mandatory_srids = args.mandatory_srids.map_or_else(
            || DEFAULT_MANDATORY_SRIDS.to_vec(),
            |srids| srids.into_iter().map(Srid::new).collect(),
        );

        Ok(Self {
            release_dir,
            scratch_dir: args.scratch_dir,
            dump_dir: args.dump_dir.unwrap_or_else(|| Utf8PathBuf::from(".")),
            schema: args.schema.unwrap_or_else(|| DEFAULT_SCHEMA.to_owned()),
            connection,
            mandatory_srids,
            native_srid: args.native_srid.map_or(DEFAULT_NATIVE_SRID, Srid::new),
            repair_geometry: args.repair_geometry.unwrap_or(false),
            divisions_file: args.divisions_file,
            datapacks: args.datapacks.unwrap_or_else(|| {
                DEFAULT_DATAPACKS.iter().map(|pack| (*pack).to_owned()).collect()
            }),
            workbooks: args.workbooks.unwrap_or_else(|| {
                DEFAULT_WORKBOOKS.iter().map(|book| (*book).to_owned()).collect()
            }),
        })
    }
}

#[cfg(test)]
pub(crate) fn config_from_layers_for_test(
    layers: Vec<ortho_config::MergeLayer<'static>>,
) -> Result<LoadConfig, CliError> {
    let merged = LoadArgs::merge_from_layers(layers).map_err(CliError::from)?;
    LoadConfig::try_from(merged)
}
