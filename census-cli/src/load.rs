//! The `load` and `check` commands.
//!
//! [`load_release`] is generic over the database, shapefile loader and dump
//! runner so the whole run can be exercised without PostGIS; [`run_load`]
//! wires in the real adapters.

use std::collections::BTreeMap;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use census_core::{
    Database, DumpRunner, FinalizeReport, GeometryLayer, MetadataCatalogue, MetadataRegistrar,
    Pipeline, PipelineSummary, Srid, datapack_file,
};
use census_data::postgis::MAINTENANCE_DATABASE;
use census_data::{
    PgDump, PostgisDatabase, ReleaseLayout, ShapefileLoader, Shp2Pgsql, attribute_input,
    attribute_table_name, division_table, import_archive, load_workbooks, recreate_database,
};
use tempfile::TempDir;

use crate::CliError;
use crate::config::{LoadArgs, LoadConfig};
use crate::divisions::DivisionLinkage;

/// Files of a release selected for loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ReleasePlan {
    pub(crate) archives: Vec<Utf8PathBuf>,
    pub(crate) attribute_files: Vec<Utf8PathBuf>,
    pub(crate) workbooks: Vec<Utf8PathBuf>,
    pub(crate) linkages: Vec<DivisionLinkage>,
}

/// What a completed load produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LoadReport {
    pub(crate) boundary_tables: Vec<String>,
    pub(crate) summary: PipelineSummary,
    pub(crate) finalize: FinalizeReport,
}

/// Locate every file the run needs, failing before the database is touched.
pub(crate) fn discover(config: &LoadConfig) -> Result<ReleasePlan, CliError> {
    config.validate_release_dir()?;
    let layout = ReleaseLayout::new(config.release_dir.clone());
    let archives = layout.boundary_archives()?;
    let mut attribute_files = Vec::new();
    for datapack in &config.datapacks {
        attribute_files.extend(layout.datapack_csvs(datapack)?);
    }
    for file in &attribute_files {
        attribute_table_name(file)?;
    }
    let workbooks = layout.metadata_workbooks(config.workbooks.iter().map(String::as_str))?;
    let linkages = config.division_linkages()?;
    log::info!(
        "release {}: {} boundary archives, {} attribute files, {} workbooks",
        config.release_dir,
        archives.len(),
        attribute_files.len(),
        workbooks.len()
    );
    Ok(ReleasePlan {
        archives,
        attribute_files,
        workbooks,
        linkages,
    })
}

/// Geometry layers for the imported boundary tables.
///
/// Every division must own exactly one table; tables serving no division are
/// registered without a business key.
pub(crate) fn geometry_layers(
    tables: &[String],
    linkages: &[DivisionLinkage],
    native_srid: Srid,
) -> Result<Vec<GeometryLayer>, CliError> {
    let mut by_table: BTreeMap<&str, &DivisionLinkage> = BTreeMap::new();
    for linkage in linkages {
        let table = division_table(&linkage.division, tables.iter().map(String::as_str))?;
        by_table.insert(table, linkage);
    }
    Ok(tables
        .iter()
        .map(|table| {
            let layer = GeometryLayer::new(table).with_native_srid(native_srid);
            match by_table.get(table.as_str()) {
                Some(linkage) => layer
                    .with_division(&linkage.division, &linkage.key_column, linkage.cast)
                    .with_description(&linkage.description),
                None => layer,
            }
        })
        .collect())
}

/// Attribute tables whose table or column metadata is absent from the
/// catalogue.
pub(crate) fn undocumented_tables(
    registrar: &MetadataRegistrar,
    files: &[Utf8PathBuf],
) -> Result<Vec<String>, CliError> {
    let catalogue = registrar.catalogue();
    let mut missing = Vec::new();
    for file in files {
        let table = attribute_table_name(file)?;
        let datapack = datapack_file(&table);
        let documented = registrar
            .table_number(&datapack)
            .is_some_and(|number| catalogue.table(&number).is_some())
            && catalogue.columns(&datapack).is_some();
        if !documented {
            missing.push(table);
        }
    }
    Ok(missing)
}

/// Import boundaries, run every pipeline stage and dump the schema.
pub(crate) fn load_release<D, L, R>(
    mut db: D,
    loader: &L,
    runner: &R,
    plan: &ReleasePlan,
    catalogue: MetadataCatalogue,
    scratch: &Utf8Path,
    config: &LoadConfig,
) -> Result<LoadReport, CliError>
where
    D: Database,
    L: ShapefileLoader<D> + ?Sized,
    R: DumpRunner + ?Sized,
{
    let registrar = MetadataRegistrar::new(catalogue)?;
    db.create_catalogue().map_err(CliError::Catalogue)?;
    db.commit().map_err(CliError::Catalogue)?;

    let mut boundary_tables = Vec::new();
    for archive in &plan.archives {
        boundary_tables.extend(import_archive(
            &mut db,
            loader,
            archive,
            scratch,
            config.native_srid,
        )?);
    }
    log::info!("loaded {} boundary tables", boundary_tables.len());

    let layers = geometry_layers(&boundary_tables, &plan.linkages, config.native_srid)?;
    let inputs = plan
        .attribute_files
        .iter()
        .map(|file| attribute_input(file))
        .collect::<Result<Vec<_>, _>>()?;

    let mut pipeline = Pipeline::new(db, config.pipeline_config());
    pipeline.load_geometries(layers)?;
    pipeline.load_attributes(inputs)?;
    pipeline.link()?;
    pipeline.attach_metadata(&registrar)?;
    let finalize = pipeline.finalize(runner, config.dump_destination().into_std_path_buf())?;
    Ok(LoadReport {
        boundary_tables,
        summary: pipeline.summary(),
        finalize,
    })
}

/// Where archives are unpacked: the configured directory, or a temporary
/// one removed when the run ends.
struct Scratch {
    path: Utf8PathBuf,
    _temporary: Option<TempDir>,
}

impl Scratch {
    fn prepare(configured: Option<&Utf8Path>) -> Result<Self, CliError> {
        if let Some(dir) = configured {
            census_fs::ensure_dir(dir).map_err(CliError::Scratch)?;
            return Ok(Self {
                path: dir.to_path_buf(),
                _temporary: None,
            });
        }
        let temporary = tempfile::Builder::new()
            .prefix("census-")
            .tempdir()
            .map_err(CliError::Scratch)?;
        let path = Utf8PathBuf::from_path_buf(temporary.path().to_path_buf()).map_err(|path| {
            CliError::Scratch(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("scratch directory {} is not UTF-8", path.display()),
            ))
        })?;
        Ok(Self {
            path,
            _temporary: Some(temporary),
        })
    }
}

/// Load a release into PostGIS.
pub(crate) fn run_load(args: LoadArgs) -> Result<LoadReport, CliError> {
    let config = args.into_config()?;
    let plan = discover(&config)?;
    let catalogue = load_workbooks(plan.workbooks.iter().map(Utf8PathBuf::as_path))?;

    recreate_database(&config.connection, MAINTENANCE_DATABASE)?;
    let mut db = PostgisDatabase::connect(&config.connection)?;
    db.create_extensions()?;

    let scratch = Scratch::prepare(config.scratch_dir.as_deref())?;
    let dump = PgDump::new(config.connection.clone());
    load_release(
        db,
        &Shp2Pgsql::default(),
        &dump,
        &plan,
        catalogue,
        &scratch.path,
        &config,
    )
}

/// Validate configuration, release layout and metadata without a database.
pub(crate) fn run_check(args: LoadArgs, writer: &mut dyn Write) -> Result<(), CliError> {
    let config = args.into_config()?;
    let plan = discover(&config)?;
    let catalogue = load_workbooks(plan.workbooks.iter().map(Utf8PathBuf::as_path))?;
    let registrar = MetadataRegistrar::new(catalogue)?;
    let undocumented = undocumented_tables(&registrar, &plan.attribute_files)?;
    write_check_report(writer, &config, &plan, &registrar, &undocumented)
        .map_err(CliError::WriteOutput)
}

fn write_check_report(
    writer: &mut dyn Write,
    config: &LoadConfig,
    plan: &ReleasePlan,
    registrar: &MetadataRegistrar,
    undocumented: &[String],
) -> std::io::Result<()> {
    let catalogue = registrar.catalogue();
    writeln!(writer, "release {}", config.release_dir)?;
    writeln!(writer, "boundary archives: {}", plan.archives.len())?;
    writeln!(writer, "attribute files: {}", plan.attribute_files.len())?;
    writeln!(
        writer,
        "metadata: {} tables, {} datapack files",
        catalogue.table_count(),
        catalogue.file_count()
    )?;
    writeln!(writer, "divisions: {}", plan.linkages.len())?;
    for table in undocumented {
        writeln!(writer, "undocumented: {table}")?;
    }
    Ok(())
}

/// Summarise a completed load.
pub(crate) fn write_load_report(writer: &mut dyn Write, report: &LoadReport) -> std::io::Result<()> {
    let summary = &report.summary;
    writeln!(writer, "geometry tables: {}", summary.geometry_tables)?;
    writeln!(writer, "projections: {}", summary.projections)?;
    writeln!(
        writer,
        "attribute tables: {} ({} rows)",
        summary.attribute_tables, summary.rows_loaded
    )?;
    writeln!(writer, "linkages: {}", summary.linkages)?;
    writeln!(writer, "moved: {}", report.finalize.moved.len())?;
    for (table, reason) in &report.finalize.unmoved {
        writeln!(writer, "not moved: {table} ({reason})")?;
    }
    writeln!(writer, "dump: {}", report.finalize.dump.destination.display())
}
