use crate::errors::{AppError, AppResult};
use crate::models::{
    ContractDefinition, ContractEvent, ContractEventKind, ContractFilter, ContractStatus, ContractVersion,
    MetricContract,
};
use crate::store::{first_free_identifier, ContractBackend};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const SCHEMA_SQL: &str = include_str!("schema.sql");

const CONTRACT_COLUMNS: &str = "id, status, version, definition_json, review_notes, created_at, updated_at, revision, owner";

/// SQLite-backed contract storage.
#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;
        tracing::debug!(path = %path.display(), "contract database opened");

        Ok(Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }
}

impl ContractBackend for Database {
    fn insert_unique(
        &self,
        base_id: &str,
        mut contract: MetricContract,
        mut event: ContractEvent,
    ) -> AppResult<MetricContract> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let id = first_free_identifier(base_id, |candidate| {
            let count: i64 = tx.query_row(
                "SELECT COUNT(1) FROM contracts WHERE id = ?1",
                [candidate],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })?;
        contract.id = id.clone();
        event.contract_id = id;

        let definition_json = serde_json::to_string(&contract.definition)?;
        tx.execute(
            "INSERT INTO contracts (
               id, name, domain, business_owner, owner, status, version, definition_json,
               review_notes, created_at, updated_at, revision
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                contract.id,
                contract.definition.name,
                contract.definition.domain,
                contract.definition.business_owner,
                contract.owner,
                contract.status.as_str(),
                contract.version.to_string(),
                definition_json,
                contract.review_notes,
                contract.created_at.to_rfc3339(),
                contract.updated_at.to_rfc3339(),
                contract.revision as i64,
            ],
        )?;
        insert_event(&tx, &event)?;
        tx.commit()?;

        Ok(contract)
    }

    fn fetch(&self, id: &str) -> AppResult<Option<MetricContract>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM contracts WHERE id = ?1", CONTRACT_COLUMNS),
            [id],
            parse_contract_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    fn fetch_all(&self, filter: &ContractFilter) -> AppResult<Vec<MetricContract>> {
        let conn = self.lock()?;
        let mut query = format!("SELECT {} FROM contracts WHERE 1 = 1", CONTRACT_COLUMNS);
        let mut params_vec: Vec<String> = Vec::new();

        if let Some(status) = filter.status {
            query.push_str(" AND status = ?");
            params_vec.push(status.as_str().to_string());
        }
        if let Some(domain) = &filter.domain {
            query.push_str(" AND domain = ? COLLATE NOCASE");
            params_vec.push(domain.trim().to_string());
        }
        if let Some(owner) = &filter.owner {
            query.push_str(" AND business_owner = ? COLLATE NOCASE");
            params_vec.push(owner.trim().to_string());
        }
        query.push_str(" ORDER BY seq ASC");

        let mut statement = conn.prepare(&query)?;
        let rows = statement.query_map(rusqlite::params_from_iter(params_vec.iter()), parse_contract_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    fn compare_and_swap(
        &self,
        expected_revision: u64,
        contract: &MetricContract,
        event: &ContractEvent,
    ) -> AppResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let changed = tx.execute(
            "UPDATE contracts SET name = ?1, domain = ?2, business_owner = ?3, status = ?4, version = ?5,
             definition_json = ?6, review_notes = ?7, updated_at = ?8, revision = ?9
             WHERE id = ?10 AND revision = ?11",
            params![
                contract.definition.name,
                contract.definition.domain,
                contract.definition.business_owner,
                contract.status.as_str(),
                contract.version.to_string(),
                serde_json::to_string(&contract.definition)?,
                contract.review_notes,
                contract.updated_at.to_rfc3339(),
                contract.revision as i64,
                contract.id,
                expected_revision as i64,
            ],
        )?;

        if changed == 0 {
            let actual: Option<i64> = tx
                .query_row(
                    "SELECT revision FROM contracts WHERE id = ?1",
                    [contract.id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            return Err(match actual {
                Some(actual) => AppError::Conflict {
                    id: contract.id.clone(),
                    expected: expected_revision,
                    actual: actual as u64,
                },
                None => AppError::NotFound(format!("Contract '{}' not found", contract.id)),
            });
        }

        insert_event(&tx, event)?;
        tx.commit()?;
        Ok(())
    }

    fn events(&self, contract_id: &str) -> AppResult<Vec<ContractEvent>> {
        let conn = self.lock()?;
        let mut statement = conn.prepare(
            "SELECT id, contract_id, kind, from_status, to_status, actor, note, version, occurred_at
             FROM contract_events WHERE contract_id = ?1 ORDER BY seq ASC",
        )?;
        let rows = statement.query_map([contract_id], parse_event_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }
}

fn insert_event(conn: &Connection, event: &ContractEvent) -> AppResult<()> {
    conn.execute(
        "INSERT INTO contract_events (
           id, contract_id, kind, from_status, to_status, actor, note, version, occurred_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            event.id,
            event.contract_id,
            event.kind.as_str(),
            event.from_status.map(ContractStatus::as_str),
            event.to_status.as_str(),
            event.actor,
            event.note,
            event.version.to_string(),
            event.occurred_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn parse_contract_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MetricContract> {
    let definition_raw: String = row.get(3)?;
    let definition: ContractDefinition =
        serde_json::from_str(&definition_raw).map_err(|error| conversion_error(3, error.to_string()))?;
    Ok(MetricContract {
        id: row.get(0)?,
        definition,
        owner: row.get(8)?,
        status: parse_status(&row.get::<_, String>(1)?)?,
        version: parse_version(&row.get::<_, String>(2)?)?,
        review_notes: row.get(4)?,
        created_at: parse_time(&row.get::<_, String>(5)?)?,
        updated_at: parse_time(&row.get::<_, String>(6)?)?,
        revision: row.get::<_, i64>(7)? as u64,
    })
}

fn parse_event_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContractEvent> {
    let kind_raw: String = row.get(2)?;
    Ok(ContractEvent {
        id: row.get(0)?,
        contract_id: row.get(1)?,
        kind: ContractEventKind::parse(&kind_raw)
            .ok_or_else(|| conversion_error(2, format!("Unknown event kind '{}'", kind_raw)))?,
        from_status: row
            .get::<_, Option<String>>(3)?
            .map(|raw| parse_status(&raw))
            .transpose()?,
        to_status: parse_status(&row.get::<_, String>(4)?)?,
        actor: row.get(5)?,
        note: row.get(6)?,
        version: parse_version(&row.get::<_, String>(7)?)?,
        occurred_at: parse_time(&row.get::<_, String>(8)?)?,
    })
}

fn parse_status(raw: &str) -> rusqlite::Result<ContractStatus> {
    ContractStatus::parse(raw).ok_or_else(|| conversion_error(0, format!("Unknown contract status '{}'", raw)))
}

fn parse_version(raw: &str) -> rusqlite::Result<ContractVersion> {
    ContractVersion::parse(raw).ok_or_else(|| conversion_error(0, format!("Invalid contract version '{}'", raw)))
}

fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| conversion_error(0, error.to_string()))
}

fn conversion_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}
