//! Sequencing of a release load.
//!
//! A [`Pipeline`] moves strictly forward through [`PipelineState`]:
//! geometries are registered and indexed by business key, attribute tables
//! are rewritten onto geometry identifiers and loaded, linkages are
//! registered in a second pass, metadata is attached, and finally every
//! table is moved into the release schema and dumped. Any failure aborts
//! the run; there is no resume.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::database::{Database, DatabaseError};
use crate::dump::{DumpError, DumpOutcome, DumpRequest, DumpRunner};
use crate::geometry::{GeometryRegistrar, RegisterOptions, RegistrationError};
use crate::identifiers::{IdentifierLookup, KeyCast, KeyMatcher, LookupError};
use crate::linkage::{LinkageError, PendingLinkage, PendingLinkages, TableRole};
use crate::metadata::{MetadataError, MetadataRegistrar};
use crate::rewrite::{RewriteError, RowResult, collect_rewritten, rewrite_rows};
use crate::schema::{GID_COLUMN, Metadata, Srid};

/// Tables left in the default namespace when finalising.
pub const EXCLUDED_TABLES: [&str; 7] = [
    "user",
    "setting",
    "geometry_touches",
    "map_definition",
    "geometry_intersection",
    "geometry_relation",
    "spatial_ref_sys",
];

/// Coordinate systems every geometry must be available in by default.
pub const DEFAULT_MANDATORY_SRIDS: [Srid; 2] = [Srid::new(3112), Srid::new(3857)];

/// Stage reached by a [`Pipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Nothing loaded.
    Init,
    /// Geometry tables registered and indexed.
    GeometriesLoaded,
    /// Attribute tables loaded.
    AttributesLoaded,
    /// Linkages registered.
    Linked,
    /// Metadata attached.
    MetadataAttached,
    /// Tables moved and dumped.
    Finalized,
    /// A stage failed; the run cannot continue.
    Aborted,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Init => "INIT",
            Self::GeometriesLoaded => "GEOMETRIES_LOADED",
            Self::AttributesLoaded => "ATTRIBUTES_LOADED",
            Self::Linked => "LINKED",
            Self::MetadataAttached => "METADATA_ATTACHED",
            Self::Finalized => "FINALIZED",
            Self::Aborted => "ABORTED",
        })
    }
}

/// Errors raised by the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A stage was requested out of order.
    #[error("cannot {operation} in state {state}")]
    InvalidTransition {
        /// Requested stage.
        operation: &'static str,
        /// Current state.
        state: PipelineState,
    },
    /// An earlier stage failed.
    #[error("cannot {operation}: the pipeline was aborted by an earlier failure")]
    Aborted {
        /// Requested stage.
        operation: &'static str,
    },
    /// An attribute table names a division with no geometry layer.
    #[error("attribute table {table} refers to unknown division {division}")]
    UnknownDivision {
        /// Attribute table.
        table: String,
        /// Requested division.
        division: String,
    },
    /// Two geometry layers claim the same division.
    #[error("division {division} is provided by both {first} and {second}")]
    DuplicateDivision {
        /// Division name.
        division: String,
        /// Table registered first.
        first: String,
        /// Conflicting table.
        second: String,
    },
    /// Registering a table failed.
    #[error(transparent)]
    Registration(#[from] RegistrationError),
    /// Building an identifier lookup failed.
    #[error(transparent)]
    Lookup(#[from] LookupError),
    /// Rewriting attribute rows failed.
    #[error(transparent)]
    Rewrite(#[from] RewriteError),
    /// Registering linkages failed.
    #[error(transparent)]
    Linkage(#[from] LinkageError),
    /// Attaching metadata failed.
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    /// The backend failed.
    #[error(transparent)]
    Database(#[from] DatabaseError),
    /// The dump utility failed.
    #[error(transparent)]
    Dump(#[from] DumpError),
}

/// Settings shared by every stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// SRIDs every geometry source must be projected into.
    pub mandatory_srids: Vec<Srid>,
    /// Repair invalid geometries before projecting.
    pub repair_geometry: bool,
    /// Schema namespace the release is moved into.
    pub target_schema: String,
    /// Tables left in the default namespace.
    pub excluded_tables: BTreeSet<String>,
}

impl PipelineConfig {
    /// Defaults for a release moved into `target_schema`.
    pub fn new(target_schema: impl Into<String>) -> Self {
        Self {
            mandatory_srids: DEFAULT_MANDATORY_SRIDS.to_vec(),
            repair_geometry: false,
            target_schema: target_schema.into(),
            excluded_tables: EXCLUDED_TABLES.iter().map(|t| (*t).to_owned()).collect(),
        }
    }

    /// Replace the mandatory SRIDs.
    #[must_use]
    pub fn with_mandatory_srids<I>(mut self, srids: I) -> Self
    where
        I: IntoIterator<Item = Srid>,
    {
        self.mandatory_srids = srids.into_iter().collect();
        self
    }

    /// Enable or disable geometry repair.
    #[must_use]
    pub fn with_repair(mut self, repair: bool) -> Self {
        self.repair_geometry = repair;
        self
    }
}

/// A geometry table to register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeometryLayer {
    /// Physical table, already loaded.
    pub table: String,
    /// Division served by the table, used to route attribute tables.
    pub division: Option<String>,
    /// Native SRID; defaults to the column's declared SRID.
    pub native_srid: Option<Srid>,
    /// Natural key column matched against attribute rows.
    pub business_key: Option<String>,
    /// Cast applied to the business key.
    pub key_cast: KeyCast,
    /// Human-readable description stored as table metadata.
    pub description: Option<String>,
}

impl GeometryLayer {
    /// A layer with no division, key or description.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            division: None,
            native_srid: None,
            business_key: None,
            key_cast: KeyCast::None,
            description: None,
        }
    }

    /// Route attribute tables of `division` through `business_key`.
    #[must_use]
    pub fn with_division(
        mut self,
        division: impl Into<String>,
        business_key: impl Into<String>,
        key_cast: KeyCast,
    ) -> Self {
        self.division = Some(division.into());
        self.business_key = Some(business_key.into());
        self.key_cast = key_cast;
        self
    }

    /// Set the native SRID.
    #[must_use]
    pub fn with_native_srid(mut self, srid: Srid) -> Self {
        self.native_srid = Some(srid);
        self
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// An attribute table to load.
pub struct AttributeInput {
    /// Physical table to create.
    pub table: String,
    /// Name of the source, used in diagnostics.
    pub source_name: String,
    /// Division whose geometry the rows describe.
    pub division: Option<String>,
    /// Header row followed by data rows.
    pub rows: Box<dyn Iterator<Item = RowResult>>,
}

impl fmt::Debug for AttributeInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeInput")
            .field("table", &self.table)
            .field("source_name", &self.source_name)
            .field("division", &self.division)
            .finish_non_exhaustive()
    }
}

impl AttributeInput {
    /// Wrap a row source.
    pub fn new<I>(table: impl Into<String>, source_name: impl Into<String>, rows: I) -> Self
    where
        I: IntoIterator<Item = RowResult>,
        I::IntoIter: 'static,
    {
        Self {
            table: table.into(),
            source_name: source_name.into(),
            division: None,
            rows: Box::new(rows.into_iter()),
        }
    }

    /// Link the table to a division.
    #[must_use]
    pub fn with_division(mut self, division: impl Into<String>) -> Self {
        self.division = Some(division.into());
        self
    }
}

/// Outcome of [`Pipeline::finalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeReport {
    /// Tables moved into the target schema.
    pub moved: Vec<String>,
    /// Tables left in place because they are excluded.
    pub skipped: Vec<String>,
    /// Tables whose move failed, with the reason.
    pub unmoved: Vec<(String, String)>,
    /// Archive written by the dump.
    pub dump: DumpOutcome,
}

/// Counts of what a run has loaded so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineSummary {
    /// Geometry tables registered.
    pub geometry_tables: usize,
    /// Projected copies recorded.
    pub projections: usize,
    /// Attribute tables loaded.
    pub attribute_tables: usize,
    /// Attribute rows loaded.
    pub rows_loaded: u64,
    /// Linkages registered.
    pub linkages: usize,
}

#[derive(Debug)]
struct Division {
    table: String,
    matcher: KeyMatcher,
}

/// Drives one release load against a database.
#[derive(Debug)]
pub struct Pipeline<D> {
    db: D,
    config: PipelineConfig,
    registrar: GeometryRegistrar,
    state: PipelineState,
    divisions: BTreeMap<String, Division>,
    attribute_tables: Vec<String>,
    pending: PendingLinkages,
    summary: PipelineSummary,
}

impl<D: Database> Pipeline<D> {
    /// Start a run. The catalogue tables must already exist.
    pub fn new(db: D, config: PipelineConfig) -> Self {
        let registrar = GeometryRegistrar::new(config.mandatory_srids.iter().copied())
            .with_repair(config.repair_geometry);
        Self {
            db,
            config,
            registrar,
            state: PipelineState::Init,
            divisions: BTreeMap::new(),
            attribute_tables: Vec::new(),
            pending: PendingLinkages::new(),
            summary: PipelineSummary::default(),
        }
    }

    /// Current state.
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Settings in use.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Counts of what has been loaded.
    pub fn summary(&self) -> PipelineSummary {
        self.summary
    }

    /// Attribute tables loaded, in load order.
    pub fn attribute_tables(&self) -> &[String] {
        &self.attribute_tables
    }

    /// Borrow the database.
    pub fn database(&self) -> &D {
        &self.db
    }

    /// Borrow the database mutably.
    pub fn database_mut(&mut self) -> &mut D {
        &mut self.db
    }

    /// Release the database.
    pub fn into_database(self) -> D {
        self.db
    }

    fn advance<T>(
        &mut self,
        operation: &'static str,
        from: PipelineState,
        to: PipelineState,
        step: impl FnOnce(&mut Self) -> Result<T, PipelineError>,
    ) -> Result<T, PipelineError> {
        match self.state {
            PipelineState::Aborted => return Err(PipelineError::Aborted { operation }),
            state if state != from => {
                return Err(PipelineError::InvalidTransition { operation, state });
            }
            _ => {}
        }
        match step(self) {
            Ok(value) => {
                log::info!("pipeline {from} -> {to}");
                self.state = to;
                Ok(value)
            }
            Err(err) => {
                log::error!("{operation} failed in state {from}: {err}");
                self.state = PipelineState::Aborted;
                Err(err)
            }
        }
    }

    /// Register geometry tables and build their identifier lookups.
    pub fn load_geometries<I>(&mut self, layers: I) -> Result<(), PipelineError>
    where
        I: IntoIterator<Item = GeometryLayer>,
    {
        self.advance(
            "load geometries",
            PipelineState::Init,
            PipelineState::GeometriesLoaded,
            |this| {
                for layer in layers {
                    this.load_geometry(layer)?;
                }
                Ok(())
            },
        )
    }

    fn load_geometry(&mut self, layer: GeometryLayer) -> Result<(), PipelineError> {
        let options = RegisterOptions::geometry(layer.native_srid, layer.business_key.clone());
        let info = self.registrar.register(&mut self.db, &layer.table, &options)?;
        if let Some(description) = &layer.description {
            let metadata = Metadata::from_pairs([("description", description.as_str())]);
            self.db.set_table_metadata(info.id, &metadata)?;
        }
        if let Some(key) = &layer.business_key {
            let index = format!("{}_{key}_idx", layer.table);
            if !self.db.index_exists(&index)? {
                self.db.create_unique_index(&index, &layer.table, key)?;
            }
        }
        self.db.commit()?;

        let source = self
            .db
            .find_geometry_source(&layer.table)?
            .ok_or_else(|| LinkageError::UnknownTable {
                table: layer.table.clone(),
                role: TableRole::Geometry,
            })?;
        self.summary.geometry_tables += 1;
        self.summary.projections += self.db.projections(source.id)?.len();

        if let Some(division) = layer.division {
            if let Some(existing) = self.divisions.get(&division) {
                return Err(PipelineError::DuplicateDivision {
                    division,
                    first: existing.table.clone(),
                    second: layer.table,
                });
            }
            let lookup = IdentifierLookup::build(&mut self.db, &source, layer.key_cast)?;
            log::info!(
                "division {division} maps {} keys onto {}",
                lookup.len(),
                layer.table
            );
            self.divisions.insert(
                division,
                Division {
                    table: layer.table,
                    matcher: KeyMatcher::new(lookup, layer.key_cast),
                },
            );
        }
        Ok(())
    }

    /// Load attribute tables, rewriting keys of linked tables onto `gid`.
    pub fn load_attributes<I>(&mut self, inputs: I) -> Result<(), PipelineError>
    where
        I: IntoIterator<Item = AttributeInput>,
    {
        self.advance(
            "load attributes",
            PipelineState::GeometriesLoaded,
            PipelineState::AttributesLoaded,
            |this| {
                for input in inputs {
                    this.load_attribute(input)?;
                }
                Ok(())
            },
        )
    }

    fn load_attribute(&mut self, input: AttributeInput) -> Result<(), PipelineError> {
        let AttributeInput {
            table,
            source_name,
            division,
            rows,
        } = input;
        let (header, data) = match &division {
            Some(name) => {
                let division =
                    self.divisions
                        .get(name)
                        .ok_or_else(|| PipelineError::UnknownDivision {
                            table: table.clone(),
                            division: name.clone(),
                        })?;
                let rewritten =
                    collect_rewritten(rewrite_rows(rows, &division.matcher, &source_name))?;
                self.pending.push(PendingLinkage {
                    geo_table: division.table.clone(),
                    geo_column: GID_COLUMN.to_owned(),
                    attr_table: table.clone(),
                    attr_column: GID_COLUMN.to_owned(),
                });
                rewritten
            }
            None => collect_plain(rows, &source_name)?,
        };
        let loaded = self.db.load_attribute_table(&table, &header, &data)?;
        self.registrar
            .register(&mut self.db, &table, &RegisterOptions::attribute())?;
        log::info!("loaded {loaded} rows into {table} from {source_name}");
        self.summary.attribute_tables += 1;
        self.summary.rows_loaded += loaded;
        self.attribute_tables.push(table);
        Ok(())
    }

    /// Register the linkages queued while loading attributes.
    pub fn link(&mut self) -> Result<(), PipelineError> {
        self.advance(
            "register linkages",
            PipelineState::AttributesLoaded,
            PipelineState::Linked,
            |this| {
                let linkages = this.pending.register_all(&mut this.db)?;
                this.summary.linkages += linkages.len();
                Ok(())
            },
        )
    }

    /// Attach workbook metadata to every loaded attribute table.
    pub fn attach_metadata(&mut self, registrar: &MetadataRegistrar) -> Result<(), PipelineError> {
        self.advance(
            "attach metadata",
            PipelineState::Linked,
            PipelineState::MetadataAttached,
            |this| {
                for table in &this.attribute_tables {
                    registrar.annotate(&mut this.db, table)?;
                }
                Ok(())
            },
        )
    }

    /// Move tables into the target schema and dump it to `destination`.
    ///
    /// Excluded tables stay where they are. A table that fails to move is
    /// rolled back, logged and reported; the run continues. A failed dump
    /// aborts the run.
    pub fn finalize<R>(
        &mut self,
        runner: &R,
        destination: impl Into<PathBuf>,
    ) -> Result<FinalizeReport, PipelineError>
    where
        R: DumpRunner + ?Sized,
    {
        let destination = destination.into();
        self.advance(
            "finalize",
            PipelineState::MetadataAttached,
            PipelineState::Finalized,
            |this| {
                let schema = this.config.target_schema.clone();
                this.db.create_schema(&schema)?;
                this.db.commit()?;

                let mut moved = Vec::new();
                let mut skipped = Vec::new();
                let mut unmoved = Vec::new();
                for table in this.db.table_names()? {
                    if this.config.excluded_tables.contains(&table) {
                        skipped.push(table);
                        continue;
                    }
                    match this.db.move_table(&table, &schema) {
                        Ok(()) => {
                            this.db.commit()?;
                            log::debug!("moved {table} into {schema}");
                            moved.push(table);
                        }
                        Err(err) => {
                            this.db.rollback()?;
                            log::warn!("could not move {table} into {schema}: {err}");
                            unmoved.push((table, err.to_string()));
                        }
                    }
                }
                log::info!(
                    "moved {} tables into {schema}; {} excluded, {} failed",
                    moved.len(),
                    skipped.len(),
                    unmoved.len()
                );

                let dump = runner.dump(&DumpRequest {
                    schema,
                    destination,
                })?;
                Ok(FinalizeReport {
                    moved,
                    skipped,
                    unmoved,
                    dump,
                })
            },
        )
    }
}

fn collect_plain<I>(
    rows: I,
    source_name: &str,
) -> Result<(Vec<String>, Vec<Vec<String>>), RewriteError>
where
    I: Iterator<Item = RowResult>,
{
    let mut rows = rows.enumerate().map(|(index, row)| {
        row.map_err(|source| RewriteError::Source {
            source_name: source_name.to_owned(),
            line: index + 1,
            source,
        })
    });
    let header = rows.next().ok_or_else(|| RewriteError::MissingHeader {
        source_name: source_name.to_owned(),
    })??;
    let data = rows.collect::<Result<Vec<_>, _>>()?;
    Ok((header, data))
}

#[cfg(test)]
mod tests;
