//! Schema export with `pg_dump`.

use std::process::Command;

use camino::Utf8Path;
use census_core::{DumpError, DumpOutcome, DumpRequest, DumpRunner};

use crate::postgis::ConnectionSettings;

/// Default dump program.
pub const PG_DUMP: &str = "pg_dump";

/// [`DumpRunner`] invoking `pg_dump` in custom format.
///
/// Connection settings are passed as separate options, so socket hosts and
/// unusual role names reach `pg_dump` unchanged. The password, when present,
/// reaches the child through `PGPASSWORD` and never appears on its command
/// line.
#[derive(Debug, Clone)]
pub struct PgDump {
    settings: ConnectionSettings,
    program: String,
}

impl PgDump {
    /// Dump from the database described by `settings`.
    pub fn new(settings: ConnectionSettings) -> Self {
        Self {
            settings,
            program: PG_DUMP.to_owned(),
        }
    }

    /// Use `program` instead of `pg_dump`.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Build the invocation for `request`.
    pub fn command(&self, request: &DumpRequest) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg(format!("--host={}", self.settings.host))
            .arg(format!("--port={}", self.settings.port))
            .arg(format!("--username={}", self.settings.user))
            .arg(format!("--dbname={}", self.settings.database))
            .arg(format!("--schema={}", request.schema))
            .arg("--format=c")
            .arg(format!("--file={}", request.destination.display()));
        if let Some(password) = &self.settings.password {
            command.env("PGPASSWORD", password);
        }
        command
    }
}

impl DumpRunner for PgDump {
    fn dump(&self, request: &DumpRequest) -> Result<DumpOutcome, DumpError> {
        if let Some(destination) = Utf8Path::from_path(&request.destination) {
            census_fs::ensure_parent_dir(destination).map_err(|source| DumpError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        }
        log::info!("dumping schema {} to {}", request.schema, request.destination.display());
        let output = self
            .command(request)
            .output()
            .map_err(|source| DumpError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(DumpError::Failed {
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        log::info!(
            "load with: pg_restore --username={} --dbname={} {}",
            self.settings.user,
            self.settings.database,
            request.destination.display()
        );
        log::info!("then run VACUUM ANALYZE;");
        Ok(DumpOutcome {
            destination: request.destination.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::path::PathBuf;

    fn request(destination: impl Into<PathBuf>) -> DumpRequest {
        DumpRequest {
            schema: "aus_census_2011".to_owned(),
            destination: destination.into(),
        }
    }

    fn settings() -> ConnectionSettings {
        ConnectionSettings::new("localhost", "loader", "census").with_password("s3cret")
    }

    #[rstest]
    fn password_stays_off_the_command_line() {
        let dump = PgDump::new(settings());
        let command = dump.command(&request("/tmp/aus_census_2011"));
        let args: Vec<_> = command
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            [
                "--host=localhost",
                "--port=5432",
                "--username=loader",
                "--dbname=census",
                "--schema=aus_census_2011",
                "--format=c",
                "--file=/tmp/aus_census_2011",
            ]
        );
        assert!(args.iter().all(|arg| !arg.contains("s3cret")));
        let envs: Vec<_> = command
            .get_envs()
            .filter_map(|(key, value)| Some((key.to_str()?, value?.to_str()?)))
            .collect();
        assert_eq!(envs, [("PGPASSWORD", "s3cret")]);
    }

    #[rstest]
    #[case("/var/run/postgresql", "loader@corp", "census/2011")]
    #[case("db.internal", "load:er", "census")]
    fn connection_options_are_passed_verbatim(
        #[case] host: &str,
        #[case] user: &str,
        #[case] database: &str,
    ) {
        let dump = PgDump::new(ConnectionSettings::new(host, user, database).with_port(6543));
        let command = dump.command(&request("/tmp/aus_census_2011"));
        let args: Vec<_> = command
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args[0], format!("--host={host}"));
        assert_eq!(args[1], "--port=6543");
        assert_eq!(args[2], format!("--username={user}"));
        assert_eq!(args[3], format!("--dbname={database}"));
        assert!(args.iter().all(|arg| !arg.starts_with("postgresql://")));
    }

    #[rstest]
    fn missing_program_is_a_spawn_error() {
        let dump = PgDump::new(settings()).with_program("/nonexistent/pg_dump");
        let dir = tempfile::tempdir().expect("tempdir");
        let err = dump
            .dump(&request(dir.path().join("out")))
            .expect_err("missing program");
        assert!(matches!(err, DumpError::Spawn { .. }));
    }

    #[cfg(unix)]
    mod scripted {
        use super::*;
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        use std::path::Path;

        fn script(dir: &Path, body: &str) -> String {
            let path = dir.join("fake-pg_dump");
            fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod script");
            path.to_string_lossy().into_owned()
        }

        #[rstest]
        fn writes_the_archive_with_scoped_password() {
            let dir = tempfile::tempdir().expect("tempdir");
            let program = script(
                dir.path(),
                "for arg; do case \"$arg\" in --file=*) printf '%s' \"$PGPASSWORD\" > \"${arg#--file=}\";; esac; done",
            );
            let destination = dir.path().join("dumps").join("aus_census_2011");
            let outcome = PgDump::new(settings())
                .with_program(program)
                .dump(&request(&destination))
                .expect("dump");
            assert_eq!(outcome.destination, destination);
            assert_eq!(fs::read_to_string(&destination).expect("archive"), "s3cret");
        }

        #[rstest]
        fn failure_keeps_stderr_verbatim() {
            let dir = tempfile::tempdir().expect("tempdir");
            let program = script(
                dir.path(),
                "echo 'pg_dump: error: schema \"aus_census_2011\" not found' >&2\nexit 1",
            );
            let err = PgDump::new(settings())
                .with_program(program)
                .dump(&request(dir.path().join("out")))
                .expect_err("dump failure");
            match err {
                DumpError::Failed { status, stderr } => {
                    assert_eq!(status, Some(1));
                    assert_eq!(stderr, "pg_dump: error: schema \"aus_census_2011\" not found\n");
                }
                other => panic!("unexpected error {other}"),
            }
        }
    }
}
