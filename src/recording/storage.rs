// src/recording/storage.rs
//! SQLite-backed store for mock configuration, call history and the
//! service-instance heartbeat table
//!
//! Every statement runs under one async mutex around the connection. No
//! operation spans more than one logical row group, so callers never see
//! partial multi-row transactions.

use crate::recording::models::{
    CallEvent, CallStatus, ConfigInput, EndpointConfig, HistoryQuery, NewCallEvent, Page,
    ResponseRule, ServiceInstance, SshConfig, SshConfigInput, SshEvent,
};
use crate::utils::errors::{MockError, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{debug, info};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS configs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    endpoint TEXT NOT NULL,
    source TEXT NOT NULL DEFAULT '',
    project TEXT NOT NULL DEFAULT '',
    remark TEXT NOT NULL DEFAULT '',
    default_response TEXT NOT NULL DEFAULT '',
    updated_at INTEGER NOT NULL,
    UNIQUE (endpoint, source)
);
CREATE INDEX IF NOT EXISTS idx_configs_project ON configs(project);

CREATE TABLE IF NOT EXISTS response_rules (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    config_id INTEGER NOT NULL,
    keyword TEXT NOT NULL,
    response TEXT NOT NULL DEFAULT ''
);
CREATE INDEX IF NOT EXISTS idx_rules_config ON response_rules(config_id);

CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    request_id TEXT NOT NULL UNIQUE,
    endpoint TEXT NOT NULL,
    project TEXT NOT NULL DEFAULT '',
    payload TEXT NOT NULL DEFAULT '',
    response_body TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    source TEXT NOT NULL DEFAULT ''
);
CREATE INDEX IF NOT EXISTS idx_events_project ON events(project);
CREATE INDEX IF NOT EXISTS idx_events_source ON events(source);

CREATE TABLE IF NOT EXISTS ssh_configs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    command TEXT NOT NULL UNIQUE,
    project TEXT NOT NULL DEFAULT '',
    remark TEXT NOT NULL DEFAULT '',
    response TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS ssh_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    request_id TEXT NOT NULL UNIQUE,
    command TEXT NOT NULL,
    project TEXT NOT NULL DEFAULT '',
    response_body TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL,
    timestamp INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS service_instances (
    address TEXT PRIMARY KEY,
    protocol TEXT NOT NULL,
    registered_at INTEGER NOT NULL,
    last_seen_at INTEGER NOT NULL
);
"#;

const EVENT_COLUMNS: &str =
    "id, request_id, endpoint, project, payload, response_body, status, timestamp, source";
const SSH_EVENT_COLUMNS: &str =
    "id, request_id, command, project, response_body, status, timestamp";

/// Store collaborator used by the broker, the transports and the admin API
pub struct MockStore {
    db: Mutex<Connection>,
}

impl MockStore {
    /// Open (or create) the database file and migrate the schema
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|e| {
            MockError::StorageFailed(format!("Failed to open database {:?}: {}", path, e))
        })?;

        let store = Self::from_connection(conn).await?;
        info!("Mock store opened at {:?}", path);
        Ok(store)
    }

    /// Private in-memory database, used by tests and ephemeral runs
    pub async fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            MockError::StorageFailed(format!("Failed to open in-memory database: {}", e))
        })?;
        Self::from_connection(conn).await
    }

    async fn from_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            db: Mutex::new(conn),
        };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        let db = self.db.lock().await;
        db.execute_batch(SCHEMA)
            .map_err(|e| MockError::StorageFailed(format!("Schema creation failed: {}", e)))?;
        Ok(())
    }

    // ----------------------------------------------------------------------
    // Endpoint configuration and rules
    // ----------------------------------------------------------------------

    /// Configuration for `(endpoint, source)`, falling back to the
    /// source-less entry for the endpoint
    pub async fn config_for_request(
        &self,
        endpoint: &str,
        source: &str,
    ) -> Result<Option<EndpointConfig>> {
        let db = self.db.lock().await;

        if let Some(config) = query_config(&db, endpoint, source)? {
            return Ok(Some(config));
        }
        if source.is_empty() {
            return Ok(None);
        }

        debug!("No config for {} from {}, trying source-less entry", endpoint, source);
        query_config(&db, endpoint, "")
    }

    /// Exact lookup without source fallback
    pub async fn get_config(&self, endpoint: &str, source: &str) -> Result<Option<EndpointConfig>> {
        let db = self.db.lock().await;
        query_config(&db, endpoint, source)
    }

    /// Create or replace the configuration for `(endpoint, source)`
    pub async fn set_config(&self, input: &ConfigInput) -> Result<EndpointConfig> {
        if input.endpoint.is_empty() {
            return Err(MockError::BadRequest("Endpoint cannot be empty".to_string()));
        }

        let db = self.db.lock().await;
        db.execute(
            r#"
            INSERT INTO configs (endpoint, source, project, remark, default_response, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(endpoint, source) DO UPDATE SET
                project = excluded.project,
                remark = excluded.remark,
                default_response = excluded.default_response,
                updated_at = excluded.updated_at
            "#,
            params![
                input.endpoint,
                input.source,
                input.project,
                input.remark,
                input.default_response,
                Utc::now().timestamp_millis(),
            ],
        )
        .map_err(|e| MockError::StorageFailed(format!("Failed to save configuration: {}", e)))?;

        query_config(&db, &input.endpoint, &input.source)?.ok_or_else(|| {
            MockError::StorageFailed(format!("Configuration for {} vanished", input.endpoint))
        })
    }

    /// All configurations ordered by project, source and endpoint
    pub async fn list_configs(&self) -> Result<Vec<EndpointConfig>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, endpoint, source, project, remark, default_response FROM configs
             ORDER BY project, source, endpoint",
        )?;
        let mut configs = stmt
            .query_map([], config_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        for config in &mut configs {
            config.rules = query_rules(&db, config.id)?;
        }
        Ok(configs)
    }

    /// Delete a configuration together with its rules
    pub async fn delete_config(&self, endpoint: &str, source: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let id: Option<i64> = db
            .query_row(
                "SELECT id FROM configs WHERE endpoint = ?1 AND source = ?2",
                params![endpoint, source],
                |row| row.get(0),
            )
            .optional()?;

        let Some(id) = id else {
            return Ok(false);
        };

        db.execute("DELETE FROM response_rules WHERE config_id = ?1", params![id])?;
        db.execute("DELETE FROM configs WHERE id = ?1", params![id])?;
        Ok(true)
    }

    /// Distinct non-empty configuration sources
    pub async fn config_sources(&self) -> Result<Vec<String>> {
        let db = self.db.lock().await;
        distinct_sources(&db, "configs")
    }

    pub async fn rules_for_config(&self, config_id: i64) -> Result<Vec<ResponseRule>> {
        let db = self.db.lock().await;
        query_rules(&db, config_id)
    }

    /// Attach a keyword rule; rules are evaluated in insertion order
    pub async fn add_rule(&self, config_id: i64, keyword: &str, response: &str) -> Result<ResponseRule> {
        if keyword.is_empty() || config_id <= 0 {
            return Err(MockError::BadRequest(
                "configID and keyword cannot be empty".to_string(),
            ));
        }

        let db = self.db.lock().await;
        let exists: Option<i64> = db
            .query_row("SELECT id FROM configs WHERE id = ?1", params![config_id], |row| {
                row.get(0)
            })
            .optional()?;
        if exists.is_none() {
            return Err(MockError::NotFound(format!("config {}", config_id)));
        }

        db.execute(
            "INSERT INTO response_rules (config_id, keyword, response) VALUES (?1, ?2, ?3)",
            params![config_id, keyword, response],
        )
        .map_err(|e| MockError::StorageFailed(format!("Failed to add rule: {}", e)))?;

        Ok(ResponseRule {
            id: db.last_insert_rowid(),
            config_id,
            keyword: keyword.to_string(),
            response: response.to_string(),
        })
    }

    pub async fn update_rule(&self, rule_id: i64, keyword: &str, response: &str) -> Result<ResponseRule> {
        if keyword.is_empty() {
            return Err(MockError::BadRequest("keyword cannot be empty".to_string()));
        }

        let db = self.db.lock().await;
        let changed = db.execute(
            "UPDATE response_rules SET keyword = ?1, response = ?2 WHERE id = ?3",
            params![keyword, response, rule_id],
        )?;
        if changed == 0 {
            return Err(MockError::NotFound(format!("rule {}", rule_id)));
        }

        db.query_row(
            "SELECT id, config_id, keyword, response FROM response_rules WHERE id = ?1",
            params![rule_id],
            rule_from_row,
        )
        .map_err(Into::into)
    }

    pub async fn delete_rule(&self, rule_id: i64) -> Result<()> {
        let db = self.db.lock().await;
        let changed = db.execute("DELETE FROM response_rules WHERE id = ?1", params![rule_id])?;
        if changed == 0 {
            return Err(MockError::NotFound(format!("rule {}", rule_id)));
        }
        Ok(())
    }

    // ----------------------------------------------------------------------
    // Terminal command configuration
    // ----------------------------------------------------------------------

    pub async fn set_ssh_config(&self, input: &SshConfigInput) -> Result<SshConfig> {
        if input.command.is_empty() {
            return Err(MockError::BadRequest("Command cannot be empty".to_string()));
        }

        let db = self.db.lock().await;
        db.execute(
            r#"
            INSERT INTO ssh_configs (command, project, remark, response)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(command) DO UPDATE SET
                project = excluded.project,
                remark = excluded.remark,
                response = excluded.response
            "#,
            params![input.command, input.project, input.remark, input.response],
        )
        .map_err(|e| MockError::StorageFailed(format!("Failed to save SSH configuration: {}", e)))?;

        query_ssh_config(&db, &input.command)?.ok_or_else(|| {
            MockError::StorageFailed(format!("SSH configuration for {} vanished", input.command))
        })
    }

    pub async fn ssh_config_for_command(&self, command: &str) -> Result<Option<SshConfig>> {
        let db = self.db.lock().await;
        query_ssh_config(&db, command)
    }

    pub async fn list_ssh_configs(&self) -> Result<Vec<SshConfig>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, command, project, remark, response FROM ssh_configs ORDER BY project, command",
        )?;
        let configs = stmt
            .query_map([], ssh_config_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(configs)
    }

    pub async fn delete_ssh_config(&self, command: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let changed = db.execute("DELETE FROM ssh_configs WHERE command = ?1", params![command])?;
        Ok(changed > 0)
    }

    // ----------------------------------------------------------------------
    // HTTP call history
    // ----------------------------------------------------------------------

    pub async fn create_event(&self, event: &NewCallEvent<'_>) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            r#"
            INSERT INTO events (request_id, endpoint, project, payload, response_body, status, timestamp, source)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                event.request_id,
                event.endpoint,
                event.project,
                event.payload,
                event.response_body,
                event.status.as_str(),
                Utc::now().timestamp_millis(),
                event.source,
            ],
        )
        .map_err(|e| MockError::StorageFailed(format!("Failed to record event: {}", e)))?;
        Ok(())
    }

    /// Record the final response and status of a call
    pub async fn update_event(&self, request_id: &str, response_body: &str, status: CallStatus) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE events SET response_body = ?1, status = ?2 WHERE request_id = ?3",
            params![response_body, status.as_str(), request_id],
        )
        .map_err(|e| MockError::StorageFailed(format!("Failed to update event: {}", e)))?;
        Ok(())
    }

    pub async fn get_event(&self, request_id: &str) -> Result<Option<CallEvent>> {
        let db = self.db.lock().await;
        let sql = format!("SELECT {} FROM events WHERE request_id = ?1", EVENT_COLUMNS);
        db.query_row(&sql, params![request_id], event_from_row)
            .optional()
            .map_err(Into::into)
    }

    pub async fn event_status(&self, request_id: &str) -> Result<Option<CallStatus>> {
        Ok(self.get_event(request_id).await?.map(|event| event.status))
    }

    /// Newest-first page of HTTP history
    pub async fn list_events(&self, query: &HistoryQuery) -> Result<Page<CallEvent>> {
        let mut clauses = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(project) = non_empty(&query.project) {
            clauses.push("project = ?");
            values.push(Value::Text(project.to_string()));
        }
        if let Some(source) = non_empty(&query.source) {
            clauses.push("source = ?");
            values.push(Value::Text(source.to_string()));
        }
        if let Some(search) = non_empty(&query.search) {
            clauses.push("(endpoint LIKE ? OR payload LIKE ? OR response_body LIKE ?)");
            let pattern = format!("%{}%", search);
            for _ in 0..3 {
                values.push(Value::Text(pattern.clone()));
            }
        }

        let filter = where_clause(&clauses);
        let db = self.db.lock().await;

        let total: i64 = db.query_row(
            &format!("SELECT COUNT(*) FROM events{}", filter),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )?;

        values.push(Value::Integer(i64::from(query.page_size)));
        values.push(Value::Integer(query.offset()));
        let sql = format!(
            "SELECT {} FROM events{} ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?",
            EVENT_COLUMNS, filter
        );
        let mut stmt = db.prepare(&sql)?;
        let data = stmt
            .query_map(params_from_iter(values.iter()), event_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Page {
            data,
            total,
            page: query.page.max(1),
            page_size: query.page_size,
        })
    }

    /// Distinct non-empty history sources
    pub async fn event_sources(&self) -> Result<Vec<String>> {
        let db = self.db.lock().await;
        distinct_sources(&db, "events")
    }

    // ----------------------------------------------------------------------
    // Terminal history
    // ----------------------------------------------------------------------

    pub async fn create_ssh_event(
        &self,
        request_id: &str,
        command: &str,
        project: &str,
        response_body: &str,
        status: CallStatus,
    ) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            r#"
            INSERT INTO ssh_events (request_id, command, project, response_body, status, timestamp)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                request_id,
                command,
                project,
                response_body,
                status.as_str(),
                Utc::now().timestamp_millis(),
            ],
        )
        .map_err(|e| MockError::StorageFailed(format!("Failed to record SSH event: {}", e)))?;
        Ok(())
    }

    pub async fn update_ssh_event(&self, request_id: &str, response_body: &str, status: CallStatus) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE ssh_events SET response_body = ?1, status = ?2 WHERE request_id = ?3",
            params![response_body, status.as_str(), request_id],
        )
        .map_err(|e| MockError::StorageFailed(format!("Failed to update SSH event: {}", e)))?;
        Ok(())
    }

    pub async fn get_ssh_event(&self, request_id: &str) -> Result<Option<SshEvent>> {
        let db = self.db.lock().await;
        let sql = format!("SELECT {} FROM ssh_events WHERE request_id = ?1", SSH_EVENT_COLUMNS);
        db.query_row(&sql, params![request_id], ssh_event_from_row)
            .optional()
            .map_err(Into::into)
    }

    pub async fn list_ssh_events(&self, query: &HistoryQuery) -> Result<Page<SshEvent>> {
        let mut clauses = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(project) = non_empty(&query.project) {
            clauses.push("project = ?");
            values.push(Value::Text(project.to_string()));
        }
        if let Some(search) = non_empty(&query.search) {
            clauses.push("(command LIKE ? OR response_body LIKE ?)");
            let pattern = format!("%{}%", search);
            values.push(Value::Text(pattern.clone()));
            values.push(Value::Text(pattern));
        }

        let filter = where_clause(&clauses);
        let db = self.db.lock().await;

        let total: i64 = db.query_row(
            &format!("SELECT COUNT(*) FROM ssh_events{}", filter),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )?;

        values.push(Value::Integer(i64::from(query.page_size)));
        values.push(Value::Integer(query.offset()));
        let sql = format!(
            "SELECT {} FROM ssh_events{} ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?",
            SSH_EVENT_COLUMNS, filter
        );
        let mut stmt = db.prepare(&sql)?;
        let data = stmt
            .query_map(params_from_iter(values.iter()), ssh_event_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Page {
            data,
            total,
            page: query.page.max(1),
            page_size: query.page_size,
        })
    }

    // ----------------------------------------------------------------------
    // Service-instance heartbeat rows
    // ----------------------------------------------------------------------

    /// Insert the instance or refresh its heartbeat. `registered_at` is only
    /// written on first insert.
    pub async fn upsert_instance(&self, address: &str, protocol: &str, now: DateTime<Utc>) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            r#"
            INSERT INTO service_instances (address, protocol, registered_at, last_seen_at)
            VALUES (?1, ?2, ?3, ?3)
            ON CONFLICT(address) DO UPDATE SET
                last_seen_at = excluded.last_seen_at,
                protocol = excluded.protocol
            "#,
            params![address, protocol, now.timestamp_millis()],
        )
        .map_err(|e| MockError::StorageFailed(format!("Failed to upsert instance {}: {}", address, e)))?;
        Ok(())
    }

    pub async fn get_instance(&self, address: &str) -> Result<Option<ServiceInstance>> {
        let db = self.db.lock().await;
        db.query_row(
            "SELECT address, protocol, registered_at, last_seen_at FROM service_instances WHERE address = ?1",
            params![address],
            instance_from_row,
        )
        .optional()
        .map_err(Into::into)
    }

    pub async fn remove_instance(&self, address: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.execute("DELETE FROM service_instances WHERE address = ?1", params![address])
            .map_err(|e| MockError::StorageFailed(format!("Failed to remove instance {}: {}", address, e)))?;
        Ok(())
    }

    /// Instances whose heartbeat is newer than `cutoff`, in row order
    pub async fn active_instances(&self, cutoff: DateTime<Utc>) -> Result<Vec<ServiceInstance>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT address, protocol, registered_at, last_seen_at FROM service_instances
             WHERE last_seen_at > ?1 ORDER BY rowid",
        )?;
        let instances = stmt
            .query_map(params![cutoff.timestamp_millis()], instance_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(instances)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn where_clause(clauses: &[&str]) -> String {
    if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    }
}

fn distinct_sources(db: &Connection, table: &str) -> Result<Vec<String>> {
    let sql = format!(
        "SELECT DISTINCT source FROM {} WHERE source != '' ORDER BY source ASC",
        table
    );
    let mut stmt = db.prepare(&sql)?;
    let sources = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(sources)
}

fn query_config(db: &Connection, endpoint: &str, source: &str) -> Result<Option<EndpointConfig>> {
    let config = db
        .query_row(
            "SELECT id, endpoint, source, project, remark, default_response FROM configs
             WHERE endpoint = ?1 AND source = ?2",
            params![endpoint, source],
            config_from_row,
        )
        .optional()?;

    match config {
        Some(mut config) => {
            config.rules = query_rules(db, config.id)?;
            Ok(Some(config))
        }
        None => Ok(None),
    }
}

fn query_rules(db: &Connection, config_id: i64) -> Result<Vec<ResponseRule>> {
    let mut stmt = db.prepare(
        "SELECT id, config_id, keyword, response FROM response_rules WHERE config_id = ?1 ORDER BY id",
    )?;
    let rules = stmt
        .query_map(params![config_id], rule_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rules)
}

fn query_ssh_config(db: &Connection, command: &str) -> Result<Option<SshConfig>> {
    db.query_row(
        "SELECT id, command, project, remark, response FROM ssh_configs WHERE command = ?1",
        params![command],
        ssh_config_from_row,
    )
    .optional()
    .map_err(Into::into)
}

fn config_from_row(row: &Row<'_>) -> rusqlite::Result<EndpointConfig> {
    Ok(EndpointConfig {
        id: row.get(0)?,
        endpoint: row.get(1)?,
        source: row.get(2)?,
        project: row.get(3)?,
        remark: row.get(4)?,
        default_response: row.get(5)?,
        rules: Vec::new(),
    })
}

fn rule_from_row(row: &Row<'_>) -> rusqlite::Result<ResponseRule> {
    Ok(ResponseRule {
        id: row.get(0)?,
        config_id: row.get(1)?,
        keyword: row.get(2)?,
        response: row.get(3)?,
    })
}

fn ssh_config_from_row(row: &Row<'_>) -> rusqlite::Result<SshConfig> {
    Ok(SshConfig {
        id: row.get(0)?,
        command: row.get(1)?,
        project: row.get(2)?,
        remark: row.get(3)?,
        response: row.get(4)?,
    })
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<CallEvent> {
    Ok(CallEvent {
        id: row.get(0)?,
        request_id: row.get(1)?,
        endpoint: row.get(2)?,
        project: row.get(3)?,
        payload: row.get(4)?,
        response_body: row.get(5)?,
        status: status_column(row, 6)?,
        timestamp: millis_column(row, 7)?,
        source: row.get(8)?,
    })
}

fn ssh_event_from_row(row: &Row<'_>) -> rusqlite::Result<SshEvent> {
    Ok(SshEvent {
        id: row.get(0)?,
        request_id: row.get(1)?,
        command: row.get(2)?,
        project: row.get(3)?,
        response_body: row.get(4)?,
        status: status_column(row, 5)?,
        timestamp: millis_column(row, 6)?,
    })
}

fn instance_from_row(row: &Row<'_>) -> rusqlite::Result<ServiceInstance> {
    Ok(ServiceInstance {
        address: row.get(0)?,
        protocol: row.get(1)?,
        registered_at: millis_column(row, 2)?,
        last_seen_at: millis_column(row, 3)?,
    })
}

fn status_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<CallStatus> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn millis_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let millis: i64 = row.get(idx)?;
    DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Integer,
            format!("timestamp out of range: {}", millis).into(),
        )
    })
}
