use std::{
    path::Path,
    str::FromStr,
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use jiff::Timestamp;
use rusqlite::{Connection, OptionalExtension, Row, params, types::Type};
use serde::Serialize;

use super::Datastore;
use crate::{Model, ModelFilter, Provider, ProviderFilter, Service, StoreError};

const MIGRATIONS: &str = r#"
    PRAGMA journal_mode=WAL;

    CREATE TABLE IF NOT EXISTS aog_service (
        name TEXT PRIMARY KEY,
        hybrid_policy TEXT NOT NULL DEFAULT 'default',
        remote_provider TEXT NOT NULL DEFAULT '',
        local_provider TEXT NOT NULL DEFAULT '',
        status INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS aog_service_provider (
        provider_name TEXT PRIMARY KEY,
        service_name TEXT NOT NULL,
        service_source TEXT NOT NULL DEFAULT 'local',
        flavor TEXT NOT NULL,
        "desc" TEXT NOT NULL DEFAULT '',
        method TEXT NOT NULL DEFAULT 'POST',
        url TEXT NOT NULL,
        auth_type TEXT NOT NULL DEFAULT 'none',
        auth_key TEXT NOT NULL DEFAULT '',
        extra_headers TEXT NOT NULL DEFAULT '{}',
        extra_json_body TEXT NOT NULL DEFAULT '{}',
        properties TEXT NOT NULL DEFAULT '{}',
        status INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS aog_model (
        model_name TEXT NOT NULL,
        provider_name TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (model_name, provider_name)
    );
"#;

const PROVIDER_COLUMNS: &str = r#"provider_name, service_name, service_source, flavor, "desc", method, url,
    auth_type, auth_key, extra_headers, extra_json_body, properties, status, created_at, updated_at"#;

/// SQLite-backed tables in a single database file.
pub struct SqliteStore {
    connection: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let connection = Connection::open(path)?;
        connection.busy_timeout(Duration::from_secs(5))?;
        connection.execute_batch(MIGRATIONS)?;

        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.connection.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl Datastore for SqliteStore {
    fn get_service(&self, name: &str) -> Result<Option<Service>, StoreError> {
        let connection = self.connection()?;

        let service = connection
            .query_row(
                "SELECT name, hybrid_policy, local_provider, remote_provider, status, created_at, updated_at
                 FROM aog_service WHERE name = ?1",
                params![name],
                service_from_row,
            )
            .optional()?;

        Ok(service)
    }

    fn list_services(&self) -> Result<Vec<Service>, StoreError> {
        let connection = self.connection()?;

        let mut statement = connection.prepare(
            "SELECT name, hybrid_policy, local_provider, remote_provider, status, created_at, updated_at
             FROM aog_service ORDER BY name",
        )?;

        let services = statement.query_map([], service_from_row)?.collect::<Result<_, _>>()?;

        Ok(services)
    }

    fn put_service(&self, service: &Service) -> Result<(), StoreError> {
        self.connection()?.execute(
            "INSERT OR REPLACE INTO aog_service
             (name, hybrid_policy, local_provider, remote_provider, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                service.name,
                service.hybrid_policy.as_str(),
                service.local_provider,
                service.remote_provider,
                service.enabled,
                service.created_at.to_string(),
                service.updated_at.to_string(),
            ],
        )?;

        Ok(())
    }

    fn get_provider(&self, name: &str) -> Result<Option<Provider>, StoreError> {
        let connection = self.connection()?;
        let sql = format!("SELECT {PROVIDER_COLUMNS} FROM aog_service_provider WHERE provider_name = ?1");

        let provider = connection.query_row(&sql, params![name], provider_from_row).optional()?;

        Ok(provider)
    }

    fn list_providers(&self, filter: &ProviderFilter) -> Result<Vec<Provider>, StoreError> {
        let connection = self.connection()?;

        let sql = format!(
            "SELECT {PROVIDER_COLUMNS} FROM aog_service_provider
             WHERE (?1 IS NULL OR service_name = ?1)
               AND (?2 IS NULL OR provider_name = ?2)
               AND (?3 IS NULL OR flavor = ?3)
               AND (?4 IS NULL OR service_source = ?4)
             ORDER BY provider_name"
        );

        let mut statement = connection.prepare(&sql)?;

        let params = params![
            filter.service_name,
            filter.provider_name,
            filter.flavor,
            filter.source.map(|source| source.as_str()),
        ];

        let providers = statement.query_map(params, provider_from_row)?.collect::<Result<_, _>>()?;

        Ok(providers)
    }

    fn insert_provider(&self, provider: &Provider) -> Result<(), StoreError> {
        let connection = self.connection()?;

        let exists: bool = connection.query_row(
            "SELECT EXISTS(SELECT 1 FROM aog_service_provider WHERE provider_name = ?1)",
            params![provider.name],
            |row| row.get(0),
        )?;

        if exists {
            return Err(StoreError::conflict("provider", &provider.name));
        }

        write_provider(&connection, "INSERT", provider)
    }

    fn update_provider(&self, provider: &Provider) -> Result<(), StoreError> {
        let connection = self.connection()?;

        let exists: bool = connection.query_row(
            "SELECT EXISTS(SELECT 1 FROM aog_service_provider WHERE provider_name = ?1)",
            params![provider.name],
            |row| row.get(0),
        )?;

        if !exists {
            return Err(StoreError::not_found("provider", &provider.name));
        }

        write_provider(&connection, "INSERT OR REPLACE", provider)
    }

    fn delete_provider(&self, name: &str) -> Result<(), StoreError> {
        self.connection()?
            .execute("DELETE FROM aog_service_provider WHERE provider_name = ?1", params![name])?;

        Ok(())
    }

    fn get_model(&self, provider_name: &str, model_name: &str) -> Result<Option<Model>, StoreError> {
        let connection = self.connection()?;

        let model = connection
            .query_row(
                "SELECT model_name, provider_name, status, created_at, updated_at
                 FROM aog_model WHERE provider_name = ?1 AND model_name = ?2",
                params![provider_name, model_name],
                model_from_row,
            )
            .optional()?;

        Ok(model)
    }

    fn list_models(&self, filter: &ModelFilter) -> Result<Vec<Model>, StoreError> {
        let connection = self.connection()?;

        let mut statement = connection.prepare(
            "SELECT model_name, provider_name, status, created_at, updated_at FROM aog_model
             WHERE (?1 IS NULL OR provider_name = ?1) AND (?2 IS NULL OR model_name = ?2)
             ORDER BY provider_name, model_name",
        )?;

        let models = statement
            .query_map(params![filter.provider_name, filter.model_name], model_from_row)?
            .collect::<Result<_, _>>()?;

        Ok(models)
    }

    fn put_model(&self, model: &Model) -> Result<(), StoreError> {
        self.connection()?.execute(
            "INSERT OR REPLACE INTO aog_model (model_name, provider_name, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                model.name,
                model.provider_name,
                model.status.as_str(),
                model.created_at.to_string(),
                model.updated_at.to_string(),
            ],
        )?;

        Ok(())
    }

    fn delete_model(&self, provider_name: &str, model_name: &str) -> Result<(), StoreError> {
        self.connection()?.execute(
            "DELETE FROM aog_model WHERE provider_name = ?1 AND model_name = ?2",
            params![provider_name, model_name],
        )?;

        Ok(())
    }

    fn delete_models_of(&self, provider_name: &str) -> Result<(), StoreError> {
        self.connection()?
            .execute("DELETE FROM aog_model WHERE provider_name = ?1", params![provider_name])?;

        Ok(())
    }
}

fn write_provider(connection: &Connection, verb: &str, provider: &Provider) -> Result<(), StoreError> {
    let sql = format!(
        "{verb} INTO aog_service_provider ({PROVIDER_COLUMNS})
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
    );

    connection.execute(
        &sql,
        params![
            provider.name,
            provider.service_name,
            provider.source.as_str(),
            provider.flavor,
            provider.desc,
            provider.method,
            provider.url,
            provider.auth_type.as_str(),
            provider.auth_key,
            to_json("extra_headers", &provider.extra_headers)?,
            to_json("extra_json_body", &provider.extra_json_body)?,
            to_json("properties", &provider.properties)?,
            provider.enabled,
            provider.created_at.to_string(),
            provider.updated_at.to_string(),
        ],
    )?;

    Ok(())
}

fn to_json(column: &'static str, value: &impl Serialize) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|error| StoreError::Serialization {
        column,
        message: error.to_string(),
    })
}

fn service_from_row(row: &Row<'_>) -> rusqlite::Result<Service> {
    Ok(Service {
        name: row.get(0)?,
        hybrid_policy: parsed(row, 1)?,
        local_provider: row.get(2)?,
        remote_provider: row.get(3)?,
        enabled: row.get(4)?,
        created_at: parsed(row, 5)?,
        updated_at: parsed(row, 6)?,
    })
}

fn provider_from_row(row: &Row<'_>) -> rusqlite::Result<Provider> {
    Ok(Provider {
        name: row.get(0)?,
        service_name: row.get(1)?,
        source: parsed(row, 2)?,
        flavor: row.get(3)?,
        desc: row.get(4)?,
        method: row.get(5)?,
        url: row.get(6)?,
        auth_type: parsed(row, 7)?,
        auth_key: row.get(8)?,
        extra_headers: json(row, 9)?,
        extra_json_body: json(row, 10)?,
        properties: json(row, 11)?,
        enabled: row.get(12)?,
        created_at: parsed(row, 13)?,
        updated_at: parsed(row, 14)?,
    })
}

fn model_from_row(row: &Row<'_>) -> rusqlite::Result<Model> {
    Ok(Model {
        name: row.get(0)?,
        provider_name: row.get(1)?,
        status: parsed(row, 2)?,
        created_at: parsed::<Timestamp>(row, 3)?,
        updated_at: parsed::<Timestamp>(row, 4)?,
    })
}

/// Read a text column through its `FromStr` implementation.
fn parsed<T>(row: &Row<'_>, index: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(index)?;

    text.parse()
        .map_err(|error| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(error)))
}

fn json<T: serde::de::DeserializeOwned>(row: &Row<'_>, index: usize) -> rusqlite::Result<T> {
    let text: String = row.get(index)?;
    let text = if text.trim().is_empty() { "{}" } else { text.as_str() };

    serde_json::from_str(text).map_err(|error| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(error)))
}
