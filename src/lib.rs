//! Facade crate for the census loader.
//!
//! This crate re-exports the core domain types: the schema catalogue model,
//! the registrars and the pipeline driver. Storage and file adapters live in
//! `census-data`; the `census` binary lives in `census-cli`.

#![forbid(unsafe_code)]

pub use census_core::{
    AttributeInput, Database, DatabaseError, DumpError, DumpOutcome, DumpRequest, DumpRunner,
    FinalizeReport, GeometryLayer, GeometryRegistrar, GeometrySource, KeyCast, KeyMatcher,
    Metadata, MetadataCatalogue, MetadataRegistrar, Pipeline, PipelineConfig, PipelineError,
    PipelineState, PipelineSummary, SchemaStore, SpatialDatabase, Srid, TableInfo,
};

#[cfg(feature = "test-support")]
pub use census_core::test_support;
