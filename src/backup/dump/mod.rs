pub mod template;

use crate::backup::dump::template::{DumpCommandTemplate, DumpInvocation, PASSWORD_KEY};
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use bon::Builder;
use derive_more::{Display, From};
use flate2::write::GzEncoder;
use flate2::Compression;
use getset::Getters;
use serde::de::Visitor;
use serde::{Deserialize, Deserializer, Serialize};
use serde_with::skip_serializing_none;
use std::collections::BTreeMap;
use std::fmt::Formatter;
use std::fs::File;
use std::io::{BufWriter, IntoInnerError};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{info, warn};

/// Subdirectory of the working directory that receives the dumps
pub static SQL_DIR: &str = "sql";
pub static DUMP_FILE_EXT: &str = "sql.gz";
pub static DEFAULT_COMPRESSION_LEVEL: u32 = 9;

fn default_host() -> String {
    "localhost".to_string()
}

/// Value of an extra placeholder key; YAML scalars of any kind render as text
#[derive(Clone, Debug, Display, From, Serialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct PlaceholderValue(String);

struct PlaceholderValueVisitor;

impl Visitor<'_> for PlaceholderValueVisitor {
    type Value = PlaceholderValue;

    fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
        formatter.write_str("a string, number or boolean")
    }

    fn visit_str<E>(self, v: &str) -> std::result::Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(PlaceholderValue(v.to_string()))
    }

    fn visit_i64<E>(self, v: i64) -> std::result::Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(PlaceholderValue(v.to_string()))
    }

    fn visit_u64<E>(self, v: u64) -> std::result::Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(PlaceholderValue(v.to_string()))
    }

    fn visit_f64<E>(self, v: f64) -> std::result::Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(PlaceholderValue(v.to_string()))
    }

    fn visit_bool<E>(self, v: bool) -> std::result::Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(PlaceholderValue(v.to_string()))
    }
}

impl<'de> Deserialize<'de> for PlaceholderValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(PlaceholderValueVisitor)
    }
}

/// A database as written in the config file
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct DatabaseConfig {
    /// Schema to dump, defaults to the entry key
    pub db: Option<String>,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: RedactedString,
    /// Per database override of the dump command
    pub command: Option<DumpCommandTemplate>,
    /// Any other key becomes a `{key}` placeholder
    #[serde(flatten)]
    pub extra: BTreeMap<String, PlaceholderValue>,
}

/// A database with every parameter resolved
#[derive(Clone, Debug, Builder, Getters, PartialEq, Eq)]
#[getset(get = "pub")]
pub struct DatabaseEntry {
    #[builder(into)]
    name: String,
    #[builder(into)]
    db: String,
    #[builder(into, default = default_host())]
    host: String,
    #[builder(into, default)]
    username: String,
    #[builder(into, default)]
    password: RedactedString,
    command: Option<DumpCommandTemplate>,
    #[builder(default)]
    extra: BTreeMap<String, String>,
}

impl DatabaseEntry {
    /// Placeholder values; the named fields win over `extra` keys.
    pub fn params(&self) -> BTreeMap<&str, &str> {
        let mut params: BTreeMap<&str, &str> = self
            .extra
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        params.insert("name", &self.name);
        params.insert("db", &self.db);
        params.insert("host", &self.host);
        params.insert("username", &self.username);
        if self.password.is_empty() {
            params.remove(PASSWORD_KEY);
        } else {
            params.insert(PASSWORD_KEY, self.password.inner());
        }
        params
    }

    /// Renders the entry's own template if set and non-empty, else `default`.
    pub fn invocation(&self, default: &DumpCommandTemplate) -> Result<DumpInvocation> {
        let template = self
            .command
            .as_ref()
            .filter(|c| !c.is_empty())
            .unwrap_or(default);
        template
            .render(&self.params())
            .ok_or_else(|| Error::dump_execution(&self.name, "dump command is empty"))
    }
}

/// What happens to the run when a dump fails
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DumpFailurePolicy {
    /// Keep dumping, bundle what was produced, report the failures
    #[default]
    Continue,
    /// Stop the run at the first failed dump
    Abort,
}

/// Result of dumping one database
#[derive(Debug)]
pub struct DumpOutcome {
    pub name: String,
    pub file: PathBuf,
    pub result: Result<()>,
}

#[derive(Clone, Debug, Builder)]
pub struct DatabaseDumper {
    #[builder(default)]
    default_command: DumpCommandTemplate,
    #[builder(default = DEFAULT_COMPRESSION_LEVEL)]
    compression_level: u32,
    #[builder(default)]
    on_failure: DumpFailurePolicy,
}

impl DatabaseDumper {
    /// Dumps every database into `<destination_dir>/sql/<name>.sql.gz`.
    ///
    /// Failing to create the `sql` directory is fatal. Individual dump
    /// failures are returned in the outcomes, unless the policy is
    /// [`DumpFailurePolicy::Abort`], in which case the first one is returned
    /// as the error.
    pub fn backup_database<P: AsRef<Path>>(
        &self,
        destination_dir: P,
        databases: &BTreeMap<String, DatabaseEntry>,
    ) -> Result<Vec<DumpOutcome>> {
        let sql_dir = destination_dir.as_ref().join(SQL_DIR);
        std::fs::create_dir_all(&sql_dir)
            .map_err(|e| Error::resource_creation(&sql_dir, e.to_string()))?;

        let mut outcomes = Vec::with_capacity(databases.len());
        for entry in databases.values() {
            let file = sql_dir.join(format!("{}.{}", entry.name, DUMP_FILE_EXT));
            let result = match self.dump(entry, &file) {
                Ok(()) => {
                    info!("Dumped database {:?} into {:?}", entry.name, file);
                    Ok(())
                }
                Err(e) if self.on_failure == DumpFailurePolicy::Abort => {
                    return Err(e.with_msg("Aborting backup run after failed dump"));
                }
                Err(e) => {
                    warn!("{e}");
                    Err(e)
                }
            };
            outcomes.push(DumpOutcome {
                name: entry.name.clone(),
                file,
                result,
            });
        }

        Ok(outcomes)
    }

    fn dump(&self, entry: &DatabaseEntry, file: &Path) -> Result<()> {
        let invocation = entry.invocation(&self.default_command)?;
        info!("Dumping database {:?}: {}", entry.name, invocation);
        run_to_gzip(
            &entry.name,
            &invocation,
            file,
            Compression::new(self.compression_level),
        )
    }
}

/// Runs the invocation and gzips its stdout into `file`.
///
/// Every failure, including a non-zero exit status, is an
/// [`Error::DumpExecution`] for `name`.
fn run_to_gzip(
    name: &str,
    invocation: &DumpInvocation,
    file: &Path,
    level: Compression,
) -> Result<()> {
    let program = &invocation.program;
    let mut child = Command::new(program)
        .args(&invocation.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .spawn()
        .map_err(|e| Error::dump_execution(name, format!("cannot spawn {program:?}: {e}")))?;

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::dump_execution(name, "stdout of the dump tool was not captured"))?;

    let written = File::create(file)
        .map(|f| GzEncoder::new(BufWriter::new(f), level))
        .and_then(|mut encoder| {
            std::io::copy(&mut stdout, &mut encoder)?;
            encoder
                .finish()?
                .into_inner()
                .map_err(IntoInnerError::into_error)?
                .sync_all()
        });
    // closing the pipe lets a child blocked on a full pipe exit
    drop(stdout);
    let status = child
        .wait()
        .map_err(|e| Error::dump_execution(name, format!("waiting for {program:?} failed: {e}")))?;

    written.map_err(|e| {
        Error::dump_execution(name, format!("writing dump output to {file:?} failed: {e}"))
    })?;

    match status.code() {
        Some(0) => Ok(()),
        Some(code) => Err(Error::dump_execution(
            name,
            format!("{program:?} exited with status {code}"),
        )),
        None => Err(Error::dump_execution(
            name,
            format!("{program:?} was terminated by a signal"),
        )),
    }
}
