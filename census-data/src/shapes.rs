//! Boundary archive import.
//!
//! An archive is unpacked into its own scratch directory and every shapefile
//! inside it is loaded as one physical table. [`Shp2Pgsql`] converts with
//! the PostGIS `shp2pgsql` utility and runs the generated script through a
//! [`ScriptExecutor`]; tests substitute their own [`ShapefileLoader`].

use std::io;
use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};
use census_core::{DatabaseError, SpatialDatabase, Srid};
use thiserror::Error;
use zip::ZipArchive;

/// Default converter program.
pub const SHP2PGSQL: &str = "shp2pgsql";

/// Geometry column created by the converter.
pub const GEOMETRY_COLUMN: &str = "geom";

/// Errors raised while importing boundary archives.
#[derive(Debug, Error)]
pub enum ShapeError {
    /// Reading or writing a file failed.
    #[error("failed to access {path}")]
    Io {
        /// Path being accessed.
        path: Utf8PathBuf,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// The archive could not be read.
    #[error("failed to unpack {archive}")]
    Archive {
        /// Archive path.
        archive: Utf8PathBuf,
        /// Decoder error.
        #[source]
        source: zip::result::ZipError,
    },
    /// A shapefile name does not yield a table name.
    #[error("cannot derive a table name from {path}")]
    UnnamedShapefile {
        /// Offending path.
        path: Utf8PathBuf,
    },
    /// The converter could not be started.
    #[error("failed to run {program}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// The converter exited unsuccessfully.
    #[error("{program} failed on {shapefile}: {stderr}")]
    Converter {
        /// Program that failed.
        program: String,
        /// Shapefile being converted.
        shapefile: Utf8PathBuf,
        /// Exit code, absent when terminated by a signal.
        status: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },
    /// The converter output was not UTF-8.
    #[error("{program} produced non UTF-8 output for {shapefile}")]
    Encoding {
        /// Program that produced the output.
        program: String,
        /// Shapefile being converted.
        shapefile: Utf8PathBuf,
    },
    /// Loading a shapefile did not create exactly one table.
    #[error("loading {shapefile} created {} tables, expected one", tables.len())]
    UnexpectedTableCount {
        /// Shapefile that was loaded.
        shapefile: Utf8PathBuf,
        /// Tables that appeared.
        tables: Vec<String>,
    },
    /// The database rejected the import.
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Runs a SQL script containing its own transaction control.
pub trait ScriptExecutor {
    /// Execute every statement of `script`.
    fn execute_script(&mut self, script: &str) -> Result<(), DatabaseError>;
}

/// Loads one shapefile into a new table.
pub trait ShapefileLoader<D: ?Sized> {
    /// Load `shapefile` into `table`, tagging geometries with `srid`.
    fn load(
        &self,
        db: &mut D,
        shapefile: &Utf8Path,
        table: &str,
        srid: Srid,
    ) -> Result<(), ShapeError>;
}

/// Converts shapefiles with `shp2pgsql`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shp2Pgsql {
    program: String,
}

impl Default for Shp2Pgsql {
    fn default() -> Self {
        Self::new(SHP2PGSQL)
    }
}

impl Shp2Pgsql {
    /// Use `program` as the converter.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Converter program.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Build the converter invocation.
    pub fn command(&self, shapefile: &Utf8Path, table: &str, srid: Srid) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("-s")
            .arg(srid.to_string())
            .arg("-g")
            .arg(GEOMETRY_COLUMN)
            .arg(shapefile.as_str())
            .arg(table);
        command
    }

    /// Run the converter and return the generated SQL.
    pub fn convert(&self, shapefile: &Utf8Path, table: &str, srid: Srid) -> Result<String, ShapeError> {
        let output = self
            .command(shapefile, table, srid)
            .output()
            .map_err(|source| ShapeError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(ShapeError::Converter {
                program: self.program.clone(),
                shapefile: shapefile.to_path_buf(),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        String::from_utf8(output.stdout).map_err(|_| ShapeError::Encoding {
            program: self.program.clone(),
            shapefile: shapefile.to_path_buf(),
        })
    }
}

impl<D: ScriptExecutor + ?Sized> ShapefileLoader<D> for Shp2Pgsql {
    fn load(
        &self,
        db: &mut D,
        shapefile: &Utf8Path,
        table: &str,
        srid: Srid,
    ) -> Result<(), ShapeError> {
        let script = self.convert(shapefile, table, srid)?;
        log::debug!("running {} bytes of SQL for {shapefile}", script.len());
        db.execute_script(&script)?;
        Ok(())
    }
}

/// Table name for a shapefile: its lowercased file stem.
///
/// # Examples
///
/// ```
/// use camino::Utf8Path;
/// use census_data::shapes::shapefile_table_name;
///
/// let name = shapefile_table_name(Utf8Path::new("scratch/SA1_2011_AUST.shp"));
/// assert_eq!(name.as_deref(), Some("sa1_2011_aust"));
/// ```
pub fn shapefile_table_name(shapefile: &Utf8Path) -> Option<String> {
    shapefile
        .file_stem()
        .filter(|stem| !stem.is_empty())
        .map(str::to_lowercase)
}

/// Unpack `archive` into a directory named after it under `scratch`.
///
/// Returns the shapefiles found, sorted by path.
pub fn extract_archive(archive: &Utf8Path, scratch: &Utf8Path) -> Result<Vec<Utf8PathBuf>, ShapeError> {
    let stem = archive.file_stem().unwrap_or("archive");
    let target = scratch.join(stem);
    census_fs::ensure_dir(&target).map_err(|source| ShapeError::Io {
        path: target.clone(),
        source,
    })?;
    let file = census_fs::open_utf8_file(archive).map_err(|source| ShapeError::Io {
        path: archive.to_path_buf(),
        source,
    })?;
    let mut zip = ZipArchive::new(file).map_err(|source| ShapeError::Archive {
        archive: archive.to_path_buf(),
        source,
    })?;
    zip.extract(target.as_std_path())
        .map_err(|source| ShapeError::Archive {
            archive: archive.to_path_buf(),
            source,
        })?;
    let shapefiles =
        census_fs::files_with_suffix_recursive(&target, ".shp").map_err(|source| ShapeError::Io {
            path: target.clone(),
            source,
        })?;
    log::debug!("{archive} holds {} shapefiles", shapefiles.len());
    Ok(shapefiles)
}

/// Load one shapefile and return the single table it created.
pub fn import_shapefile<D, L>(
    db: &mut D,
    loader: &L,
    shapefile: &Utf8Path,
    srid: Srid,
) -> Result<String, ShapeError>
where
    D: SpatialDatabase + ?Sized,
    L: ShapefileLoader<D> + ?Sized,
{
    let table = shapefile_table_name(shapefile).ok_or_else(|| ShapeError::UnnamedShapefile {
        path: shapefile.to_path_buf(),
    })?;
    let before = db.table_names()?;
    loader.load(db, shapefile, &table, srid)?;
    db.commit()?;
    let mut created: Vec<String> = db
        .table_names()?
        .into_iter()
        .filter(|name| !before.contains(name))
        .collect();
    match created.pop() {
        Some(name) if created.is_empty() => {
            log::info!("loaded {shapefile} into {name}");
            Ok(name)
        }
        last => {
            created.extend(last);
            Err(ShapeError::UnexpectedTableCount {
                shapefile: shapefile.to_path_buf(),
                tables: created,
            })
        }
    }
}

/// Unpack `archive` and load every shapefile in it.
///
/// Returns the created tables in shapefile order.
pub fn import_archive<D, L>(
    db: &mut D,
    loader: &L,
    archive: &Utf8Path,
    scratch: &Utf8Path,
    srid: Srid,
) -> Result<Vec<String>, ShapeError>
where
    D: SpatialDatabase + ?Sized,
    L: ShapefileLoader<D> + ?Sized,
{
    extract_archive(archive, scratch)?
        .iter()
        .map(|shapefile| import_shapefile(db, loader, shapefile, srid))
        .collect()
}
