//! PostGIS implementation of the storage seams.
//!
//! [`PostgisDatabase`] drives a single `tokio-postgres` session from a
//! current-thread runtime, so every call blocks until the server answers.
//! Writes open a transaction lazily; [`SpatialDatabase::commit`] and
//! [`SpatialDatabase::rollback`] close it. Identifiers interpolated into SQL
//! are always quoted.
//!
//! [`SpatialDatabase::commit`]: census_core::SpatialDatabase::commit
//! [`SpatialDatabase::rollback`]: census_core::SpatialDatabase::rollback

use std::fmt;
use std::io;

use census_core::DatabaseError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::runtime::Runtime;
use tokio_postgres::types::{FromSql, ToSql};
use tokio_postgres::{Client, NoTls, Row};

use crate::shapes::ScriptExecutor;

mod catalogue;
mod spatial;
mod sql;

pub use sql::{ColumnType, copy_line, infer_column_type, quote_ident};

/// Default PostgreSQL port.
pub const DEFAULT_PORT: u16 = 5432;

/// Database used to drop and create the target database.
pub const MAINTENANCE_DATABASE: &str = "postgres";

/// Extensions the loader relies on.
pub const REQUIRED_EXTENSIONS: [&str; 1] = ["postgis"];

/// How to reach the target database.
///
/// The password is never rendered by [`fmt::Debug`] or
/// [`ConnectionSettings::url_without_password`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Server host name.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Login role.
    pub user: String,
    /// Login password, if the server requires one.
    pub password: Option<String>,
    /// Database name.
    pub database: String,
}

impl fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("database", &self.database)
            .finish()
    }
}

impl ConnectionSettings {
    /// Settings for `database` on `host` as `user`, on the default port and
    /// without a password.
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            user: user.into(),
            password: None,
            database: database.into(),
        }
    }

    /// Use a non-default port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Authenticate with `password`.
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// The same server and credentials pointed at another database.
    #[must_use]
    pub fn for_database(&self, database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            ..self.clone()
        }
    }

    /// Connection URL suitable for command-line tools, without the password.
    ///
    /// # Examples
    ///
    /// ```
    /// use census_data::ConnectionSettings;
    ///
    /// let settings = ConnectionSettings::new("db", "loader", "census").with_password("secret");
    /// assert_eq!(settings.url_without_password(), "postgresql://loader@db:5432/census");
    /// ```
    pub fn url_without_password(&self) -> String {
        format!(
            "postgresql://{}@{}:{}/{}",
            self.user, self.host, self.port, self.database
        )
    }

    fn config(&self) -> tokio_postgres::Config {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .user(&self.user)
            .dbname(&self.database)
            .application_name("census-loader");
        if let Some(password) = &self.password {
            config.password(password);
        }
        config
    }
}

/// Errors raised while connecting to or preparing the database.
#[derive(Debug, Error)]
pub enum PostgisError {
    /// The runtime driving the session could not be started.
    #[error("failed to start the database runtime")]
    Runtime(#[source] io::Error),
    /// The server refused the connection.
    #[error("failed to connect to {target}")]
    Connect {
        /// Connection URL, without the password.
        target: String,
        /// Driver error.
        #[source]
        source: tokio_postgres::Error,
    },
    /// A bootstrap statement failed.
    #[error("{operation} failed")]
    Bootstrap {
        /// Statement being run.
        operation: String,
        /// Driver error.
        #[source]
        source: tokio_postgres::Error,
    },
}

fn start_runtime() -> Result<Runtime, PostgisError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(PostgisError::Runtime)
}

fn open_client(runtime: &Runtime, settings: &ConnectionSettings) -> Result<Client, PostgisError> {
    let config = settings.config();
    let (client, connection) =
        runtime
            .block_on(config.connect(NoTls))
            .map_err(|source| PostgisError::Connect {
                target: settings.url_without_password(),
                source,
            })?;
    runtime.spawn(async move {
        if let Err(err) = connection.await {
            log::error!("database connection closed: {err}");
        }
    });
    Ok(client)
}

/// Drop the target database if it exists and create it afresh.
///
/// Runs on `maintenance_database` because a database cannot drop itself.
pub fn recreate_database(
    settings: &ConnectionSettings,
    maintenance_database: &str,
) -> Result<(), PostgisError> {
    let runtime = start_runtime()?;
    let client = open_client(&runtime, &settings.for_database(maintenance_database))?;
    let name = quote_ident(&settings.database);
    for statement in [
        format!("DROP DATABASE IF EXISTS {name}"),
        format!("CREATE DATABASE {name}"),
    ] {
        runtime
            .block_on(client.batch_execute(&statement))
            .map_err(|source| PostgisError::Bootstrap {
                operation: statement.clone(),
                source,
            })?;
    }
    log::info!("recreated database {}", settings.database);
    Ok(())
}

/// A single PostGIS session.
pub struct PostgisDatabase {
    runtime: Runtime,
    client: Client,
    settings: ConnectionSettings,
    in_transaction: bool,
}

impl fmt::Debug for PostgisDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgisDatabase")
            .field("settings", &self.settings)
            .field("in_transaction", &self.in_transaction)
            .finish_non_exhaustive()
    }
}

impl PostgisDatabase {
    /// Open a session.
    pub fn connect(settings: &ConnectionSettings) -> Result<Self, PostgisError> {
        let runtime = start_runtime()?;
        let client = open_client(&runtime, settings)?;
        log::info!("connected to {}", settings.url_without_password());
        Ok(Self {
            runtime,
            client,
            settings: settings.clone(),
            in_transaction: false,
        })
    }

    /// Settings this session was opened with.
    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Install [`REQUIRED_EXTENSIONS`].
    pub fn create_extensions(&mut self) -> Result<(), PostgisError> {
        for extension in REQUIRED_EXTENSIONS {
            let statement = format!("CREATE EXTENSION IF NOT EXISTS {}", quote_ident(extension));
            self.runtime
                .block_on(self.client.batch_execute(&statement))
                .map_err(|source| PostgisError::Bootstrap {
                    operation: statement.clone(),
                    source,
                })?;
            log::debug!("extension {extension} available");
        }
        Ok(())
    }

    fn begin(&mut self) -> Result<(), DatabaseError> {
        if !self.in_transaction {
            self.runtime
                .block_on(self.client.batch_execute("BEGIN"))
                .map_err(|source| DatabaseError::backend("begin transaction", source))?;
            self.in_transaction = true;
        }
        Ok(())
    }

    fn finish(&mut self, statement: &str) -> Result<(), DatabaseError> {
        if !self.in_transaction {
            return Ok(());
        }
        self.in_transaction = false;
        self.runtime
            .block_on(self.client.batch_execute(statement))
            .map_err(|source| DatabaseError::backend(statement.to_ascii_lowercase(), source))
    }

    fn execute(
        &mut self,
        operation: &str,
        statement: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<u64, DatabaseError> {
        self.begin()?;
        self.runtime
            .block_on(self.client.execute(statement, params))
            .map_err(|source| DatabaseError::backend(operation, source))
    }

    fn query(
        &mut self,
        operation: &str,
        statement: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Row>, DatabaseError> {
        self.begin()?;
        self.runtime
            .block_on(self.client.query(statement, params))
            .map_err(|source| DatabaseError::backend(operation, source))
    }

    fn batch(&mut self, operation: &str, statement: &str) -> Result<(), DatabaseError> {
        self.begin()?;
        self.runtime
            .block_on(self.client.batch_execute(statement))
            .map_err(|source| DatabaseError::backend(operation, source))
    }
}

impl ScriptExecutor for PostgisDatabase {
    /// Runs the script outside the session transaction, since converter
    /// output carries its own `BEGIN`/`COMMIT`.
    fn execute_script(&mut self, script: &str) -> Result<(), DatabaseError> {
        self.finish("COMMIT")?;
        self.runtime
            .block_on(self.client.batch_execute(script))
            .map_err(|source| DatabaseError::backend("execute import script", source))
    }
}

fn column<'a, T: FromSql<'a>>(row: &'a Row, index: usize, operation: &str) -> Result<T, DatabaseError> {
    row.try_get(index)
        .map_err(|source| DatabaseError::backend(operation, source))
}
