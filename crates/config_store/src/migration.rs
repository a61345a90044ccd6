//! Step-wise schema migrations.
//!
//! Each step upgrades a raw TOML table from version `n` to `n + 1`. Steps
//! run in order until the table reaches [`CURRENT_SCHEMA_VERSION`]; the
//! schema version key is rewritten after every step.
//!
//! | From | To | Change |
//! |------|----|--------|
//! | 1 | 2 | top-level `pipelines` move into the `defaultGroup` pipeline group |
//! | 2 | 3 | top-level `mailhost` moves to `server.mail_host`, `host` becomes `hostname` |

use toml::{Table, Value};
use tracing::{debug, info};

use crate::errors::{ConfigStoreError, ConfigStoreResult};
use crate::model::{CURRENT_SCHEMA_VERSION, DEFAULT_GROUP_NAME};
use crate::schema::SCHEMA_VERSION_KEY;

#[cfg(test)]
#[path = "migration_tests.rs"]
mod tests;

type MigrationStep = fn(Table) -> Result<Table, String>;

/// Registered steps, keyed by the version they upgrade from.
const MIGRATIONS: &[(u32, MigrationStep)] = &[
    (1, move_pipelines_into_default_group),
    (2, move_mailhost_under_server),
];

/// Upgrades `table` from `from_version` to the current schema version.
pub fn migrate(mut table: Table, from_version: u32) -> ConfigStoreResult<Table> {
    let mut version = from_version;

    while version < CURRENT_SCHEMA_VERSION {
        let step = MIGRATIONS
            .iter()
            .find(|(from, _)| *from == version)
            .map(|(_, step)| *step)
            .ok_or_else(|| ConfigStoreError::MigrationFailed {
                from: version,
                to: version + 1,
                reason: "no migration registered".to_string(),
            })?;

        table = step(table).map_err(|reason| ConfigStoreError::MigrationFailed {
            from: version,
            to: version + 1,
            reason,
        })?;

        version += 1;
        table.insert(
            SCHEMA_VERSION_KEY.to_string(),
            Value::Integer(i64::from(version)),
        );
        debug!(to_version = version, "Applied configuration migration");
    }

    if version != from_version {
        info!(
            from_version,
            to_version = version,
            "Configuration migrated to current schema version"
        );
    }

    Ok(table)
}

fn move_pipelines_into_default_group(mut table: Table) -> Result<Table, String> {
    let Some(pipelines) = table.remove("pipelines") else {
        return Ok(table);
    };

    let Value::Array(pipelines) = pipelines else {
        return Err("'pipelines' must be an array of tables".to_string());
    };

    let groups = table
        .entry("pipeline_groups".to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    let Value::Array(groups) = groups else {
        return Err("'pipeline_groups' must be an array of tables".to_string());
    };

    let existing = groups.iter().position(|group| {
        group
            .get("name")
            .and_then(Value::as_str)
            .is_some_and(|name| name.eq_ignore_ascii_case(DEFAULT_GROUP_NAME))
    });

    match existing {
        Some(index) => {
            let Some(group) = groups[index].as_table_mut() else {
                return Err("pipeline group must be a table".to_string());
            };
            let members = group
                .entry("pipelines".to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            let Value::Array(members) = members else {
                return Err(format!(
                    "'pipelines' of group '{DEFAULT_GROUP_NAME}' must be an array of tables"
                ));
            };
            members.extend(pipelines);
        }
        None => {
            let mut group = Table::new();
            group.insert(
                "name".to_string(),
                Value::String(DEFAULT_GROUP_NAME.to_string()),
            );
            group.insert("pipelines".to_string(), Value::Array(pipelines));
            groups.push(Value::Table(group));
        }
    }

    Ok(table)
}

fn move_mailhost_under_server(mut table: Table) -> Result<Table, String> {
    let Some(mailhost) = table.remove("mailhost") else {
        return Ok(table);
    };

    let Value::Table(mut mailhost) = mailhost else {
        return Err("'mailhost' must be a table".to_string());
    };

    if let Some(host) = mailhost.remove("host") {
        mailhost.insert("hostname".to_string(), host);
    }

    let server = table
        .entry("server".to_string())
        .or_insert_with(|| Value::Table(Table::new()));
    let Value::Table(server) = server else {
        return Err("'server' must be a table".to_string());
    };

    if server.contains_key("mail_host") {
        return Err("both 'mailhost' and 'server.mail_host' are defined".to_string());
    }
    server.insert("mail_host".to_string(), Value::Table(mailhost));

    Ok(table)
}
