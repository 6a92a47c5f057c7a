//! Catalogue table persistence.

use census_core::{
    ColumnInfo, DatabaseError, GeometryLinkage, GeometryRelation, GeometrySource, GeometrySourceId,
    GeometrySourceProjected, GeometryType, Metadata, NewGeometrySource, SchemaStore, TableInfo,
    TableInfoId,
};
use tokio_postgres::Row;

use super::spatial::{srid_param, srid_value};
use super::sql::catalogue_ddl;
use super::{PostgisDatabase, column};

fn encode(metadata: &Metadata) -> Result<String, DatabaseError> {
    metadata
        .to_json()
        .map_err(|source| DatabaseError::backend("encode metadata", source))
}

fn decode(json: &str) -> Result<Metadata, DatabaseError> {
    Metadata::from_json(json).map_err(|source| DatabaseError::backend("decode metadata", source))
}

fn geometry_source(row: &Row, table: &str) -> Result<GeometrySource, DatabaseError> {
    let operation = "read geometry source";
    let geometry_type: String = column(row, 3, operation)?;
    Ok(GeometrySource {
        id: GeometrySourceId(column(row, 0, operation)?),
        table_info_id: TableInfoId(column(row, 1, operation)?),
        table: table.to_owned(),
        column: column(row, 2, operation)?,
        geometry_type: geometry_type
            .parse::<GeometryType>()
            .map_err(|source| DatabaseError::backend(operation, source))?,
        srid: srid_value(column(row, 4, operation)?)?,
        gid_column: column(row, 5, operation)?,
        business_key: column(row, 6, operation)?,
    })
}

fn linkage(row: &Row) -> Result<GeometryLinkage, DatabaseError> {
    let operation = "read geometry linkage";
    Ok(GeometryLinkage {
        geometry_source_id: GeometrySourceId(column(row, 0, operation)?),
        geo_column: column(row, 1, operation)?,
        attribute_table_id: TableInfoId(column(row, 2, operation)?),
        attr_column: column(row, 3, operation)?,
    })
}

impl SchemaStore for PostgisDatabase {
    fn create_catalogue(&mut self) -> Result<(), DatabaseError> {
        for statement in catalogue_ddl() {
            self.batch("create catalogue", &statement)?;
        }
        Ok(())
    }

    fn insert_table_info(
        &mut self,
        name: &str,
        metadata: &Metadata,
    ) -> Result<TableInfo, DatabaseError> {
        let json = encode(metadata)?;
        let operation = format!("record table {name}");
        let rows = self.query(
            &operation,
            "INSERT INTO table_info (name, metadata_json) VALUES ($1, $2) RETURNING id",
            &[&name, &json],
        )?;
        let row = rows
            .first()
            .ok_or_else(|| DatabaseError::backend(operation.as_str(), "no id returned"))?;
        Ok(TableInfo {
            id: TableInfoId(column(row, 0, &operation)?),
            name: name.to_owned(),
            metadata: metadata.clone(),
        })
    }

    fn find_table_info(&mut self, name: &str) -> Result<Option<TableInfo>, DatabaseError> {
        let operation = format!("look up table {name}");
        let rows = self.query(
            &operation,
            "SELECT id, metadata_json FROM table_info WHERE name = $1",
            &[&name],
        )?;
        rows.first()
            .map(|row| {
                let json: String = column(row, 1, &operation)?;
                Ok(TableInfo {
                    id: TableInfoId(column(row, 0, &operation)?),
                    name: name.to_owned(),
                    metadata: decode(&json)?,
                })
            })
            .transpose()
    }

    fn set_table_metadata(
        &mut self,
        table: TableInfoId,
        metadata: &Metadata,
    ) -> Result<(), DatabaseError> {
        let json = encode(metadata)?;
        let updated = self.execute(
            "update table metadata",
            "UPDATE table_info SET metadata_json = $2 WHERE id = $1",
            &[&table.0, &json],
        )?;
        if updated == 0 {
            return Err(DatabaseError::NoSuchTable {
                table: format!("table_info #{}", table.0),
            });
        }
        Ok(())
    }

    fn insert_column_info(
        &mut self,
        table: TableInfoId,
        name: &str,
        metadata: &Metadata,
    ) -> Result<ColumnInfo, DatabaseError> {
        let json = encode(metadata)?;
        self.execute(
            &format!("record column {name}"),
            "INSERT INTO column_info (table_info_id, name, metadata_json) VALUES ($1, $2, $3)",
            &[&table.0, &name, &json],
        )?;
        Ok(ColumnInfo {
            table_info_id: table,
            name: name.to_owned(),
            metadata: metadata.clone(),
        })
    }

    fn columns(&mut self, table: TableInfoId) -> Result<Vec<ColumnInfo>, DatabaseError> {
        let operation = "read column metadata";
        let rows = self.query(
            operation,
            "SELECT name, metadata_json FROM column_info WHERE table_info_id = $1 ORDER BY id",
            &[&table.0],
        )?;
        rows.iter()
            .map(|row| {
                let json: String = column(row, 1, operation)?;
                Ok(ColumnInfo {
                    table_info_id: table,
                    name: column(row, 0, operation)?,
                    metadata: decode(&json)?,
                })
            })
            .collect()
    }

    fn insert_geometry_source(
        &mut self,
        source: NewGeometrySource,
    ) -> Result<GeometrySource, DatabaseError> {
        let operation = format!("record geometry source {}", source.table);
        let srid = srid_param(source.srid)?;
        let rows = self.query(
            &operation,
            "INSERT INTO geometry_source \
             (table_info_id, geometry_type, column_name, srid, gid_column, business_key) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
            &[
                &source.table_info_id.0,
                &source.geometry_type.as_str(),
                &source.column,
                &srid,
                &source.gid_column,
                &source.business_key,
            ],
        )?;
        let row = rows
            .first()
            .ok_or_else(|| DatabaseError::backend(operation.as_str(), "no id returned"))?;
        let id = GeometrySourceId(column(row, 0, &operation)?);
        Ok(GeometrySource::from_new(id, source))
    }

    fn find_geometry_source(
        &mut self,
        table: &str,
    ) -> Result<Option<GeometrySource>, DatabaseError> {
        let rows = self.query(
            &format!("look up geometry source {table}"),
            "SELECT gs.id, gs.table_info_id, gs.column_name, gs.geometry_type, gs.srid, \
             gs.gid_column, gs.business_key \
             FROM geometry_source gs JOIN table_info ti ON ti.id = gs.table_info_id \
             WHERE ti.name = $1",
            &[&table],
        )?;
        rows.first()
            .map(|row| geometry_source(row, table))
            .transpose()
    }

    fn insert_projection(
        &mut self,
        projection: &GeometrySourceProjected,
    ) -> Result<(), DatabaseError> {
        let srid = srid_param(projection.srid)?;
        self.execute(
            &format!("record projection {}", projection.column),
            "INSERT INTO geometry_source_projected (geometry_source_id, srid, column_name) \
             VALUES ($1, $2, $3)",
            &[&projection.geometry_source_id.0, &srid, &projection.column],
        )?;
        Ok(())
    }

    fn projections(
        &mut self,
        source: GeometrySourceId,
    ) -> Result<Vec<GeometrySourceProjected>, DatabaseError> {
        let operation = "read projections";
        let rows = self.query(
            operation,
            "SELECT srid, column_name FROM geometry_source_projected \
             WHERE geometry_source_id = $1 ORDER BY id",
            &[&source.0],
        )?;
        rows.iter()
            .map(|row| {
                Ok(GeometrySourceProjected {
                    geometry_source_id: source,
                    srid: srid_value(column(row, 0, operation)?)?,
                    column: column(row, 1, operation)?,
                })
            })
            .collect()
    }

    fn insert_linkage(&mut self, linkage: &GeometryLinkage) -> Result<(), DatabaseError> {
        self.execute(
            "record geometry linkage",
            "INSERT INTO geometry_linkage \
             (geometry_source_id, geo_column, attribute_table_id, attr_column) \
             VALUES ($1, $2, $3, $4)",
            &[
                &linkage.geometry_source_id.0,
                &linkage.geo_column,
                &linkage.attribute_table_id.0,
                &linkage.attr_column,
            ],
        )?;
        Ok(())
    }

    fn linkages(&mut self) -> Result<Vec<GeometryLinkage>, DatabaseError> {
        let rows = self.query(
            "read geometry linkages",
            "SELECT geometry_source_id, geo_column, attribute_table_id, attr_column \
             FROM geometry_linkage ORDER BY id",
            &[],
        )?;
        rows.iter().map(linkage).collect()
    }

    fn find_geometry_relation(
        &mut self,
        from: GeometrySourceId,
        to: GeometrySourceId,
    ) -> Result<Option<GeometryRelation>, DatabaseError> {
        let rows = self.query(
            "look up geometry relation",
            "SELECT 1 FROM geometry_relation WHERE geo_source_id = $1 AND overlaps_with_id = $2",
            &[&from.0, &to.0],
        )?;
        Ok((!rows.is_empty()).then_some(GeometryRelation {
            geometry_source_id: from,
            overlaps_with_id: to,
        }))
    }
}
