//! Physical table operations.

use bytes::Bytes;
use census_core::{
    ColumnDescription, DatabaseError, GeometryType, KeyCast, SpatialDatabase, Srid, TableSchema,
};
use futures_util::SinkExt;

use super::sql::{copy_line, infer_column_type, quote_ident};
use super::{PostgisDatabase, column};

const DEFAULT_SCHEMA: &str = "public";

pub(super) fn srid_param(srid: Srid) -> Result<i32, DatabaseError> {
    i32::try_from(srid.get())
        .map_err(|source| DatabaseError::backend(format!("encode SRID {srid}"), source))
}

pub(super) fn srid_value(raw: i32) -> Result<Srid, DatabaseError> {
    u32::try_from(raw)
        .map(Srid::new)
        .map_err(|source| DatabaseError::backend(format!("decode SRID {raw}"), source))
}

impl PostgisDatabase {
    fn geometry_srids(&mut self, table: &str) -> Result<Vec<(String, i32)>, DatabaseError> {
        let operation = format!("read geometry columns of {table}");
        let rows = self.query(
            &operation,
            "SELECT f_geometry_column::text, srid FROM geometry_columns \
             WHERE f_table_schema = $1 AND f_table_name = $2",
            &[&DEFAULT_SCHEMA, &table],
        )?;
        rows.iter()
            .map(|row| -> Result<(String, i32), DatabaseError> {
                Ok((column(row, 0, &operation)?, column(row, 1, &operation)?))
            })
            .collect()
    }
}

impl SpatialDatabase for PostgisDatabase {
    fn table_names(&mut self) -> Result<Vec<String>, DatabaseError> {
        let operation = "list tables";
        let rows = self.query(
            operation,
            "SELECT table_name::text FROM information_schema.tables \
             WHERE table_schema = $1 AND table_type = 'BASE TABLE' ORDER BY table_name",
            &[&DEFAULT_SCHEMA],
        )?;
        rows.iter().map(|row| column(row, 0, operation)).collect()
    }

    fn describe_table(&mut self, table: &str) -> Result<TableSchema, DatabaseError> {
        let operation = format!("describe {table}");
        let rows = self.query(
            &operation,
            "SELECT column_name::text, udt_name::text FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2 ORDER BY ordinal_position",
            &[&DEFAULT_SCHEMA, &table],
        )?;
        if rows.is_empty() {
            return Err(DatabaseError::NoSuchTable {
                table: table.to_owned(),
            });
        }
        let srids = self.geometry_srids(table)?;
        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            let name: String = column(row, 0, &operation)?;
            let type_name: String = column(row, 1, &operation)?;
            if type_name == "geometry" {
                let declared = srids
                    .iter()
                    .find(|(geometry_column, _)| *geometry_column == name)
                    .map(|(_, srid)| *srid)
                    .filter(|srid| *srid > 0)
                    .map(srid_value)
                    .transpose()?;
                columns.push(ColumnDescription::geometry(name, declared));
            } else {
                columns.push(ColumnDescription::scalar(name, type_name));
            }
        }
        Ok(TableSchema {
            name: table.to_owned(),
            columns,
        })
    }

    fn geometry_types(&mut self, table: &str, column_name: &str) -> Result<Vec<String>, DatabaseError> {
        let operation = format!("classify geometries of {table}.{column_name}");
        let target = quote_ident(column_name);
        let statement = format!(
            "SELECT DISTINCT GeometryType({target}) FROM {} WHERE {target} IS NOT NULL",
            quote_ident(table)
        );
        let rows = self.query(&operation, &statement, &[])?;
        rows.iter().map(|row| column(row, 0, &operation)).collect()
    }

    fn add_geometry_column(
        &mut self,
        table: &str,
        column_name: &str,
        srid: Srid,
        geometry_type: GeometryType,
    ) -> Result<(), DatabaseError> {
        let srid = srid_param(srid)?;
        let dimensions = 2_i32;
        self.query(
            &format!("add geometry column {table}.{column_name}"),
            "SELECT AddGeometryColumn($1::varchar, $2::varchar, $3, $4::varchar, $5)",
            &[&table, &column_name, &srid, &geometry_type.as_str(), &dimensions],
        )?;
        Ok(())
    }

    fn transform_geometry(
        &mut self,
        table: &str,
        source: &str,
        target: &str,
        srid: Srid,
    ) -> Result<u64, DatabaseError> {
        let value = srid_param(srid)?;
        let statement = format!(
            "UPDATE {} SET {} = ST_Transform(ST_Force2D({}), $1)",
            quote_ident(table),
            quote_ident(target),
            quote_ident(source)
        );
        self.execute(
            &format!("transform {table}.{source} into {target}"),
            &statement,
            &[&value],
        )
    }

    fn repair_geometries(&mut self, table: &str, column_name: &str) -> Result<u64, DatabaseError> {
        let target = quote_ident(column_name);
        let statement = format!(
            "UPDATE {} SET {target} = ST_Multi(ST_Buffer({target}, 0)) WHERE NOT ST_IsValid({target})",
            quote_ident(table)
        );
        self.execute(&format!("repair {table}.{column_name}"), &statement, &[])
    }

    fn index_exists(&mut self, index: &str) -> Result<bool, DatabaseError> {
        let operation = format!("look up index {index}");
        let rows = self.query(
            &operation,
            "SELECT EXISTS (SELECT 1 FROM pg_indexes WHERE schemaname = $1 AND indexname = $2)",
            &[&DEFAULT_SCHEMA, &index],
        )?;
        match rows.first() {
            Some(row) => column(row, 0, &operation),
            None => Ok(false),
        }
    }

    fn create_spatial_index(
        &mut self,
        index: &str,
        table: &str,
        column_name: &str,
    ) -> Result<(), DatabaseError> {
        let statement = format!(
            "CREATE INDEX {} ON {} USING gist ({})",
            quote_ident(index),
            quote_ident(table),
            quote_ident(column_name)
        );
        self.batch(&format!("create spatial index {index}"), &statement)
    }

    fn create_unique_index(
        &mut self,
        index: &str,
        table: &str,
        column_name: &str,
    ) -> Result<(), DatabaseError> {
        let statement = format!(
            "CREATE UNIQUE INDEX {} ON {} ({})",
            quote_ident(index),
            quote_ident(table),
            quote_ident(column_name)
        );
        self.batch(&format!("create unique index {index}"), &statement)
    }

    fn key_pairs(
        &mut self,
        table: &str,
        gid_column: &str,
        key_column: &str,
        cast: KeyCast,
    ) -> Result<Vec<(i64, Option<String>)>, DatabaseError> {
        let gid = quote_ident(gid_column);
        let key = match cast {
            KeyCast::None => format!("{}::text", quote_ident(key_column)),
            KeyCast::Integer => format!("CAST({} AS bigint)::text", quote_ident(key_column)),
        };
        let statement = format!(
            "SELECT {gid}::bigint, {key} FROM {} ORDER BY {gid}",
            quote_ident(table)
        );
        let operation = format!("read {table}.{key_column} keys");
        let rows = self.query(&operation, &statement, &[])?;
        rows.iter()
            .map(|row| -> Result<(i64, Option<String>), DatabaseError> {
                Ok((column(row, 0, &operation)?, column(row, 1, &operation)?))
            })
            .collect()
    }

    fn load_attribute_table(
        &mut self,
        table: &str,
        header: &[String],
        rows: &[Vec<String>],
    ) -> Result<u64, DatabaseError> {
        for (index, row) in rows.iter().enumerate() {
            if row.len() != header.len() {
                return Err(DatabaseError::RaggedRow {
                    table: table.to_owned(),
                    line: index + 1,
                    expected: header.len(),
                    found: row.len(),
                });
            }
        }

        let names: Vec<String> = header
            .iter()
            .map(|name| quote_ident(&name.to_lowercase()))
            .collect();
        let definitions: Vec<String> = names
            .iter()
            .enumerate()
            .map(|(position, name)| {
                let column_type =
                    infer_column_type(rows.iter().filter_map(|row| row.get(position)).map(String::as_str));
                let key = if position == 0 { " PRIMARY KEY" } else { "" };
                format!("{name} {}{key}", column_type.as_sql())
            })
            .collect();
        let quoted = quote_ident(table);
        self.batch(
            &format!("create table {table}"),
            &format!("CREATE TABLE {quoted} ({})", definitions.join(", ")),
        )?;

        let statement = format!("COPY {quoted} ({}) FROM STDIN", names.join(", "));
        let payload: String = rows.iter().map(|row| copy_line(row)).collect();
        self.begin()?;
        let client = &self.client;
        let copied = self
            .runtime
            .block_on(async {
                let sink = client.copy_in::<_, Bytes>(statement.as_str()).await?;
                futures_util::pin_mut!(sink);
                sink.send(Bytes::from(payload)).await?;
                sink.finish().await
            })
            .map_err(|source| DatabaseError::backend(format!("copy rows into {table}"), source))?;
        log::debug!("copied {copied} rows into {table}");
        Ok(copied)
    }

    fn create_schema(&mut self, schema: &str) -> Result<(), DatabaseError> {
        self.batch(
            &format!("create schema {schema}"),
            &format!("CREATE SCHEMA {}", quote_ident(schema)),
        )
    }

    fn move_table(&mut self, table: &str, schema: &str) -> Result<(), DatabaseError> {
        let statement = format!(
            "ALTER TABLE {}.{} SET SCHEMA {}",
            quote_ident(DEFAULT_SCHEMA),
            quote_ident(table),
            quote_ident(schema)
        );
        self.batch(&format!("move {table} into {schema}"), &statement)
    }

    fn commit(&mut self) -> Result<(), DatabaseError> {
        self.finish("COMMIT")
    }

    fn rollback(&mut self) -> Result<(), DatabaseError> {
        self.finish("ROLLBACK")
    }
}
