//! Resolution of the database set.
//!
//! Turns the `databases` section of the config into [`DatabaseEntry`] values,
//! adding the primary database when one is available.

use crate::backup::dump::{DatabaseConfig, DatabaseEntry};
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::result::Result;
use crate::backup::validate::validate_valid_file_name;
use derive_more::From;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub static PRIMARY_HOST: &str = "localhost";

/// Live connection details of the application's own database
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PrimaryConnection {
    /// Schema the connection is using, also the key of the synthesized entry
    pub schema: String,
    pub username: String,
    #[serde(default)]
    pub password: RedactedString,
}

/// Looks up a primary connection by name.
///
/// `Ok(None)` means no connection with that name is known; `Err` means it is
/// known but could not be queried. Both skip the primary database.
pub trait PrimaryConnectionProvider {
    fn primary_connection(&self, name: &str) -> Result<Option<PrimaryConnection>>;
}

/// Connections declared in the `connections` section of the config file
#[derive(Clone, Debug, Default, Serialize, Deserialize, From)]
#[serde(transparent)]
pub struct ConnectionRegistry(BTreeMap<String, PrimaryConnection>);

impl PrimaryConnectionProvider for ConnectionRegistry {
    fn primary_connection(&self, name: &str) -> Result<Option<PrimaryConnection>> {
        Ok(self.0.get(name).cloned())
    }
}

/// Asks `provider` for the primary connection named `name`.
///
/// A disabled (`None`), unknown or failing primary yields `None`, so the run
/// goes on without it.
pub fn resolve_primary<P: PrimaryConnectionProvider + ?Sized>(
    provider: &P,
    name: Option<&str>,
) -> Option<PrimaryConnection> {
    let name = name?;
    match provider.primary_connection(name) {
        Ok(Some(connection)) => Some(connection),
        Ok(None) => {
            tracing::debug!("Primary connection {name:?} is not configured, skipping it");
            None
        }
        Err(e) => {
            tracing::warn!("Primary connection {name:?} is unavailable, skipping it: {e}");
            None
        }
    }
}

/// Builds the final database set.
///
/// Entries are never removed. `db` defaults to the entry key. The primary
/// connection is added under its schema name unless that key is taken or
/// the schema is not a safe file name.
pub fn resolve_databases(
    databases: &BTreeMap<String, DatabaseConfig>,
    primary: Option<PrimaryConnection>,
) -> BTreeMap<String, DatabaseEntry> {
    let mut resolved: BTreeMap<String, DatabaseEntry> = databases
        .iter()
        .map(|(name, config)| {
            let entry = DatabaseEntry::builder()
                .name(name)
                .db(config.db.clone().unwrap_or_else(|| name.clone()))
                .host(&config.host)
                .username(&config.username)
                .password(config.password.clone())
                .maybe_command(config.command.clone())
                .extra(
                    config
                        .extra
                        .iter()
                        .map(|(k, v)| (k.clone(), v.to_string()))
                        .collect(),
                )
                .build();
            (name.clone(), entry)
        })
        .collect();

    if let Some(primary) = primary {
        if let Err(e) = validate_valid_file_name(&primary.schema) {
            tracing::warn!(
                "Primary schema {:?} cannot be used as a dump file name, skipping it: {e}",
                primary.schema
            );
        } else if resolved.contains_key(&primary.schema) {
            tracing::debug!(
                "Database {:?} is configured explicitly, not adding the primary connection",
                primary.schema
            );
        } else {
            tracing::debug!("Adding primary database {:?}", primary.schema);
            let entry = DatabaseEntry::builder()
                .name(&primary.schema)
                .db(&primary.schema)
                .host(PRIMARY_HOST)
                .username(primary.username)
                .password(primary.password)
                .build();
            resolved.insert(primary.schema, entry);
        }
    }

    resolved
}
