//! Stand-ins for the external converter used in tests.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

use camino::{Utf8Path, Utf8PathBuf};
use census_core::Srid;
use census_core::test_support::MemoryDatabase;
use geo::{Geometry, Rect, coord};

use crate::shapes::{GEOMETRY_COLUMN, ShapeError, ShapefileLoader};

#[derive(Debug, Clone)]
struct StubLayer {
    key_column: String,
    keys: Vec<String>,
}

/// [`ShapefileLoader`] that creates in-memory geometry tables instead of
/// running a converter.
///
/// Each configured layer becomes a table of unit squares, one per key, with
/// surrogate ids counting from 1. Unconfigured tables are created empty.
#[derive(Debug, Default)]
pub struct StubShapefileLoader {
    layers: BTreeMap<String, StubLayer>,
    silent: BTreeSet<String>,
    loaded: RefCell<Vec<(Utf8PathBuf, String, Srid)>>,
}

impl StubShapefileLoader {
    /// A loader with no configured layers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Populate `table` with one feature per key in `key_column`.
    #[must_use]
    pub fn with_layer<I, S>(mut self, table: &str, key_column: &str, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.layers.insert(
            table.to_owned(),
            StubLayer {
                key_column: key_column.to_owned(),
                keys: keys.into_iter().map(Into::into).collect(),
            },
        );
        self
    }

    /// Pretend to load `table` without creating anything.
    #[must_use]
    pub fn silent_for(mut self, table: &str) -> Self {
        self.silent.insert(table.to_owned());
        self
    }

    /// Every `(shapefile, table, srid)` loaded so far.
    pub fn loaded(&self) -> Vec<(Utf8PathBuf, String, Srid)> {
        self.loaded.borrow().clone()
    }
}

fn unit_square(offset: f64) -> Geometry<f64> {
    Geometry::Polygon(
        Rect::new(
            coord! { x: 149.0 + offset, y: -35.0 },
            coord! { x: 150.0 + offset, y: -34.0 },
        )
        .to_polygon(),
    )
}

impl ShapefileLoader<MemoryDatabase> for StubShapefileLoader {
    fn load(
        &self,
        db: &mut MemoryDatabase,
        shapefile: &Utf8Path,
        table: &str,
        srid: Srid,
    ) -> Result<(), ShapeError> {
        self.loaded
            .borrow_mut()
            .push((shapefile.to_path_buf(), table.to_owned(), srid));
        if self.silent.contains(table) {
            return Ok(());
        }
        let mut builder = db.add_geometry_table(table, GEOMETRY_COLUMN, srid);
        if let Some(layer) = self.layers.get(table) {
            builder = builder.with_column(&layer.key_column);
            let mut offset = 0.0;
            for (gid, key) in (1_i64..).zip(&layer.keys) {
                builder = builder.with_feature(
                    gid,
                    unit_square(offset),
                    &[(layer.key_column.as_str(), key.as_str())],
                );
                offset += 1.0;
            }
        }
        Ok(())
    }
}
