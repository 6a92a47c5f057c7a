//! Behavioural coverage for moving and dumping a finished release.

use super::helpers::{RELEASE_SCHEMA, b01_metadata, csv_rows, sa1_database, sa1_layer};
use super::*;
use crate::test_support::{MemoryDatabase, SPATIAL_REF_SYS_TABLE, StubDumpRunner};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use std::cell::RefCell;

const DUMP_DIAGNOSTICS: &str = "pg_dump: error: could not open output file: Permission denied\n";

struct ReleaseWorld {
    pipeline: RefCell<Option<Pipeline<MemoryDatabase>>>,
    runner: RefCell<StubDumpRunner>,
    outcome: RefCell<Option<Result<FinalizeReport, PipelineError>>>,
}

impl ReleaseWorld {
    fn with_pipeline<T>(&self, f: impl FnOnce(&mut Pipeline<MemoryDatabase>) -> T) -> T {
        let mut pipeline = self.pipeline.borrow_mut();
        f(pipeline.as_mut().expect("pipeline should be initialised"))
    }

    fn report(&self) -> FinalizeReport {
        match self.outcome.borrow().as_ref() {
            Some(Ok(report)) => report.clone(),
            Some(Err(err)) => panic!("finalise should succeed, got {err}"),
            None => panic!("finalise should have run"),
        }
    }
}

#[fixture]
fn release_world() -> ReleaseWorld {
    ReleaseWorld {
        pipeline: RefCell::new(None),
        runner: RefCell::new(StubDumpRunner::succeeding()),
        outcome: RefCell::new(None),
    }
}

#[given("a fully loaded release")]
fn loaded_release(#[from(release_world)] world: &ReleaseWorld) {
    let mut pipeline = Pipeline::new(sa1_database(), PipelineConfig::new(RELEASE_SCHEMA));
    pipeline
        .load_geometries([sa1_layer()])
        .expect("load geometries");
    let rows = csv_rows(&[&["region_id", "tot_p_p"], &["1100701", "200"]]);
    pipeline
        .load_attributes([AttributeInput::new(
            "b01_aust_sa1",
            "2011Census_B01_AUST_SA1_sequential.csv",
            rows,
        )
        .with_division("sa1")])
        .expect("load attributes");
    pipeline.link().expect("register linkages");
    pipeline
        .attach_metadata(&b01_metadata())
        .expect("attach metadata");
    world.pipeline.replace(Some(pipeline));
}

#[given("the sa1_2011_aust table cannot be moved")]
fn immovable_table(#[from(release_world)] world: &ReleaseWorld) {
    world.with_pipeline(|pipeline| pipeline.database_mut().fail_move("sa1_2011_aust"));
}

#[given("a dump utility that fails")]
fn failing_dump(#[from(release_world)] world: &ReleaseWorld) {
    world
        .runner
        .replace(StubDumpRunner::failing(1, DUMP_DIAGNOSTICS));
}

#[when("the release is finalised")]
fn finalise(#[from(release_world)] world: &ReleaseWorld) {
    let runner = world.runner.borrow();
    let outcome = world.with_pipeline(|pipeline| {
        pipeline.finalize(&*runner, "/srv/dumps/aus_census_2011.dump")
    });
    world.outcome.replace(Some(outcome));
}

#[then("spatial_ref_sys and geometry_relation remain outside the release schema")]
fn excluded_remain(#[from(release_world)] world: &ReleaseWorld) {
    let report = world.report();
    world.with_pipeline(|pipeline| {
        let db = pipeline.database();
        let moved = db.tables_in_schema(RELEASE_SCHEMA);
        for table in [SPATIAL_REF_SYS_TABLE, "geometry_relation"] {
            assert!(db.has_table(table), "{table} should stay in place");
            assert!(!moved.contains(&table.to_owned()));
            assert!(report.skipped.contains(&table.to_owned()));
        }
    });
}

#[then("every other table is moved into the release schema")]
fn others_moved(#[from(release_world)] world: &ReleaseWorld) {
    let report = world.report();
    assert!(report.unmoved.is_empty());
    world.with_pipeline(|pipeline| {
        let mut remaining = pipeline
            .database_mut()
            .table_names()
            .expect("list tables");
        remaining.sort();
        assert_eq!(remaining, vec!["geometry_relation", SPATIAL_REF_SYS_TABLE]);
        let moved = pipeline.database().tables_in_schema(RELEASE_SCHEMA);
        for table in ["sa1_2011_aust", "b01_aust_sa1", "table_info", "geometry_linkage"] {
            assert!(moved.contains(&table.to_owned()), "{table} should be moved");
        }
    });
}

#[then("the release schema is dumped")]
fn schema_dumped(#[from(release_world)] world: &ReleaseWorld) {
    let report = world.report();
    let requests = world.runner.borrow().requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].schema, RELEASE_SCHEMA);
    assert_eq!(report.dump.destination, requests[0].destination);
    world.with_pipeline(|pipeline| assert_eq!(pipeline.state(), PipelineState::Finalized));
}

#[then("sa1_2011_aust is reported as unmoved")]
fn reported_unmoved(#[from(release_world)] world: &ReleaseWorld) {
    let report = world.report();
    let unmoved: Vec<_> = report.unmoved.iter().map(|(table, _)| table.as_str()).collect();
    assert_eq!(unmoved, vec!["sa1_2011_aust"]);
    assert!(report.moved.contains(&"b01_aust_sa1".to_owned()));
}

#[then("finalising fails with the dump diagnostics")]
fn dump_failed(#[from(release_world)] world: &ReleaseWorld) {
    let outcome = world.outcome.borrow();
    match outcome.as_ref().expect("outcome should exist") {
        Err(PipelineError::Dump(DumpError::Failed { stderr, .. })) => {
            assert_eq!(stderr, DUMP_DIAGNOSTICS);
        }
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("finalise should fail"),
    }
    world.with_pipeline(|pipeline| assert_eq!(pipeline.state(), PipelineState::Aborted));
}

#[scenario(
    path = "tests/features/finalize.feature",
    name = "Allow-listed tables stay outside the release schema"
)]
fn allow_listed_tables_stay(#[from(release_world)] world: ReleaseWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/finalize.feature",
    name = "A table that cannot be moved does not stop the release"
)]
fn failed_move_tolerated(#[from(release_world)] world: ReleaseWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/finalize.feature",
    name = "A failed dump aborts the release"
)]
fn failed_dump_aborts(#[from(release_world)] world: ReleaseWorld) {
    let _ = world;
}
