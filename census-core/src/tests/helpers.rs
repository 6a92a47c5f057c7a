//! Shared fixtures for the behaviour scenarios.

use super::*;
use crate::test_support::MemoryDatabase;
use geo::{Geometry, MultiPolygon, polygon};

pub(super) const GDA94: Srid = Srid::new(4283);
pub(super) const RELEASE_SCHEMA: &str = "aus_census_2011";

/// A unit square anchored at `(x, y)`.
pub(super) fn square(x: f64, y: f64) -> Geometry<f64> {
    Geometry::MultiPolygon(MultiPolygon(vec![polygon![
        (x: x, y: y),
        (x: x + 1.0, y: y),
        (x: x + 1.0, y: y + 1.0),
        (x: x, y: y + 1.0),
        (x: x, y: y),
    ]]))
}

/// A database holding two SA1 regions keyed by zero-padded codes.
pub(super) fn sa1_database() -> MemoryDatabase {
    let mut db = MemoryDatabase::new();
    db.create_catalogue().expect("create catalogue");
    db.add_geometry_table("sa1_2011_aust", "geom", GDA94)
        .with_column("sa1_7digit")
        .with_feature(1, square(149.0, -35.0), &[("sa1_7digit", "01100701")])
        .with_feature(2, square(150.0, -35.0), &[("sa1_7digit", "01100702")]);
    db
}

/// The SA1 layer routing the `sa1` division through an integer key.
pub(super) fn sa1_layer() -> GeometryLayer {
    GeometryLayer::new("sa1_2011_aust")
        .with_native_srid(GDA94)
        .with_division("sa1", "sa1_7digit", KeyCast::Integer)
        .with_description("Statistical Area Level 1")
}

/// Attribute rows read from a sequential-number CSV.
pub(super) fn csv_rows(lines: &[&[&str]]) -> Vec<RowResult> {
    lines
        .iter()
        .map(|line| Ok(line.iter().map(|cell| (*cell).to_owned()).collect()))
        .collect()
}

/// Metadata documenting table `b01`.
pub(super) fn b01_metadata() -> MetadataRegistrar {
    let mut catalogue = MetadataCatalogue::new();
    catalogue.insert_table(
        "b01",
        Metadata::from_pairs([("type", "Persons"), ("kind", "Selected Person Characteristics")]),
    );
    catalogue.add_column(
        "b01",
        "tot_p_p",
        Metadata::from_pairs([("type", "Persons"), ("kind", "Total")]),
    );
    MetadataRegistrar::new(catalogue).expect("compile table number pattern")
}
