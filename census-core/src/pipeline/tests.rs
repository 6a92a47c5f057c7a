//! Unit tests for the pipeline state machine.

use super::*;
use crate::database::SchemaStore;
use crate::metadata::MetadataCatalogue;
use crate::test_support::{MemoryDatabase, StubDumpRunner};
use geo::{Geometry, Point};
use rstest::{fixture, rstest};

fn rows(lines: &[&[&str]]) -> Vec<RowResult> {
    lines
        .iter()
        .map(|line| Ok(line.iter().map(|cell| (*cell).to_owned()).collect()))
        .collect()
}

#[fixture]
fn database() -> MemoryDatabase {
    let mut db = MemoryDatabase::new();
    db.create_catalogue().expect("create catalogue");
    db.add_geometry_table("sa1_2011_aust", "geom", Srid::new(4283))
        .with_column("sa1_7digit")
        .with_feature(1, Geometry::Point(Point::new(149.1, -35.3)), &[("sa1_7digit", "1100701")])
        .with_feature(2, Geometry::Point(Point::new(149.2, -35.4)), &[("sa1_7digit", "1100702")]);
    db
}

#[fixture]
fn pipeline(database: MemoryDatabase) -> Pipeline<MemoryDatabase> {
    Pipeline::new(database, PipelineConfig::new("aus_census_2011"))
}

fn sa1_layer() -> GeometryLayer {
    GeometryLayer::new("sa1_2011_aust")
        .with_native_srid(Srid::new(4283))
        .with_division("sa1", "sa1_7digit", KeyCast::Integer)
        .with_description("Statistical Area Level 1")
}

fn b01() -> AttributeInput {
    AttributeInput::new(
        "b01_aust_sa1",
        "2011Census_B01_AUST_SA1_sequential.csv",
        rows(&[&["region_id", "tot_p_m"], &["1100702", "7"], &["1100701", "5"]]),
    )
    .with_division("sa1")
}

fn metadata_registrar() -> MetadataRegistrar {
    let mut catalogue = MetadataCatalogue::new();
    catalogue.insert_table("b01", Metadata::from_pairs([("type", "Persons"), ("kind", "Count")]));
    catalogue.add_column("b01", "tot_p_m", Metadata::from_pairs([("kind", "Males")]));
    MetadataRegistrar::new(catalogue).expect("compile pattern")
}

fn run_to_metadata(pipeline: &mut Pipeline<MemoryDatabase>) {
    pipeline.load_geometries([sa1_layer()]).expect("load geometries");
    pipeline.load_attributes([b01()]).expect("load attributes");
    pipeline.link().expect("link");
    pipeline
        .attach_metadata(&metadata_registrar())
        .expect("attach metadata");
}

#[rstest]
fn runs_every_stage_in_order(mut pipeline: Pipeline<MemoryDatabase>) {
    run_to_metadata(&mut pipeline);
    assert_eq!(pipeline.state(), PipelineState::MetadataAttached);

    let runner = StubDumpRunner::succeeding();
    let report = pipeline
        .finalize(&runner, "/tmp/census.dump")
        .expect("finalize");
    assert_eq!(pipeline.state(), PipelineState::Finalized);
    assert!(report.moved.contains(&"b01_aust_sa1".to_owned()));
    assert!(report.moved.contains(&"sa1_2011_aust".to_owned()));
    assert!(report.skipped.contains(&"spatial_ref_sys".to_owned()));
    assert!(report.skipped.contains(&"geometry_relation".to_owned()));
    assert!(report.unmoved.is_empty());
    assert_eq!(
        runner.requests(),
        vec![DumpRequest {
            schema: "aus_census_2011".into(),
            destination: PathBuf::from("/tmp/census.dump"),
        }]
    );

    let summary = pipeline.summary();
    assert_eq!(summary.geometry_tables, 1);
    assert_eq!(summary.projections, 2);
    assert_eq!(summary.attribute_tables, 1);
    assert_eq!(summary.rows_loaded, 2);
    assert_eq!(summary.linkages, 1);
}

#[rstest]
fn loaded_rows_carry_geometry_ids(mut pipeline: Pipeline<MemoryDatabase>) {
    pipeline.load_geometries([sa1_layer()]).expect("load geometries");
    pipeline.load_attributes([b01()]).expect("load attributes");
    let db = pipeline.database();
    assert_eq!(
        db.column_text("b01_aust_sa1", "gid"),
        Some(vec![Some("2".to_owned()), Some("1".to_owned())])
    );
    assert_eq!(
        db.column_text("b01_aust_sa1", "region_id"),
        Some(vec![Some("1100702".to_owned()), Some("1100701".to_owned())])
    );
    assert!(db.is_unique_index("sa1_2011_aust_sa1_7digit_idx"));
}

#[rstest]
fn geometry_description_becomes_table_metadata(mut pipeline: Pipeline<MemoryDatabase>) {
    pipeline.load_geometries([sa1_layer()]).expect("load geometries");
    let info = pipeline
        .database_mut()
        .find_table_info("sa1_2011_aust")
        .expect("query")
        .expect("registered");
    assert_eq!(info.metadata.get("description"), Some("Statistical Area Level 1"));
}

#[rstest]
fn unlinked_attribute_tables_load_verbatim(mut pipeline: Pipeline<MemoryDatabase>) {
    pipeline.load_geometries([sa1_layer()]).expect("load geometries");
    let input = AttributeInput::new("t01_aust", "T01.csv", rows(&[&["year", "count"], &["2011", "9"]]));
    pipeline.load_attributes([input]).expect("load attributes");
    pipeline.link().expect("link");
    assert_eq!(pipeline.summary().linkages, 0);
    assert_eq!(
        pipeline.database().column_text("t01_aust", "year"),
        Some(vec![Some("2011".to_owned())])
    );
}

#[rstest]
fn missing_key_aborts_without_loading_the_table(mut pipeline: Pipeline<MemoryDatabase>) {
    pipeline.load_geometries([sa1_layer()]).expect("load geometries");
    let input = AttributeInput::new(
        "b02_aust_sa1",
        "2011Census_B02_AUST_SA1_sequential.csv",
        rows(&[&["region_id"], &["1100701"], &["123456789"]]),
    )
    .with_division("sa1");
    let err = pipeline.load_attributes([input]).expect_err("missing key");
    match err {
        PipelineError::Rewrite(RewriteError::KeyNotFound { key, source_name, .. }) => {
            assert_eq!(key, "123456789");
            assert_eq!(source_name, "2011Census_B02_AUST_SA1_sequential.csv");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(pipeline.state(), PipelineState::Aborted);
    assert!(!pipeline.database().has_table("b02_aust_sa1"));
    assert!(matches!(
        pipeline.link(),
        Err(PipelineError::Aborted { .. })
    ));
}

#[rstest]
fn out_of_order_calls_are_rejected(mut pipeline: Pipeline<MemoryDatabase>) {
    let err = pipeline.link().expect_err("link before load");
    assert!(matches!(
        err,
        PipelineError::InvalidTransition { state: PipelineState::Init, .. }
    ));
    assert_eq!(pipeline.state(), PipelineState::Init);
}

#[rstest]
fn unknown_division_is_rejected(mut pipeline: Pipeline<MemoryDatabase>) {
    pipeline.load_geometries([sa1_layer()]).expect("load geometries");
    let input = AttributeInput::new("b01_aust_sa2", "B01.csv", rows(&[&["region_id"]]))
        .with_division("sa2");
    let err = pipeline.load_attributes([input]).expect_err("unknown division");
    assert!(matches!(err, PipelineError::UnknownDivision { division, .. } if division == "sa2"));
}

#[rstest]
fn duplicate_division_is_rejected(mut database: MemoryDatabase) {
    database
        .add_geometry_table("sa1_2011_pow", "geom", Srid::new(4283))
        .with_column("sa1_7digit");
    let mut pipeline = Pipeline::new(database, PipelineConfig::new("aus_census_2011"));
    let pow = GeometryLayer::new("sa1_2011_pow").with_division("sa1", "sa1_7digit", KeyCast::Integer);
    let err = pipeline
        .load_geometries([sa1_layer(), pow])
        .expect_err("duplicate division");
    assert!(matches!(err, PipelineError::DuplicateDivision { .. }));
}

#[rstest]
fn failed_moves_are_reported_and_skipped(mut pipeline: Pipeline<MemoryDatabase>) {
    run_to_metadata(&mut pipeline);
    pipeline.database_mut().fail_move("sa1_2011_aust");
    let rollbacks = pipeline.database().rollbacks();
    let report = pipeline
        .finalize(&StubDumpRunner::succeeding(), "/tmp/census.dump")
        .expect("finalize tolerates move failures");
    assert_eq!(report.unmoved.len(), 1);
    assert_eq!(report.unmoved[0].0, "sa1_2011_aust");
    assert!(pipeline.database().has_table("sa1_2011_aust"));
    assert_eq!(pipeline.database().rollbacks(), rollbacks + 1);
    assert!(
        pipeline
            .database()
            .tables_in_schema("aus_census_2011")
            .contains(&"b01_aust_sa1".to_owned())
    );
}

#[rstest]
fn failed_dump_is_fatal_and_verbatim(mut pipeline: Pipeline<MemoryDatabase>) {
    run_to_metadata(&mut pipeline);
    let stderr = "pg_dump: error: connection to server failed\n";
    let err = pipeline
        .finalize(&StubDumpRunner::failing(1, stderr), "/tmp/census.dump")
        .expect_err("dump failure");
    match err {
        PipelineError::Dump(DumpError::Failed { status, stderr: captured }) => {
            assert_eq!(status, Some(1));
            assert_eq!(captured, stderr);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(pipeline.state(), PipelineState::Aborted);
}
