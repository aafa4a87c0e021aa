// ==========================================
// 数据交换引擎 - 交换任务 Repository 实现
// ==========================================
// 实现: rusqlite + Arc<Mutex<Connection>>
// 约束: 批量写入事务化，失败整体回滚
// ==========================================

use crate::db::init_engine_schema;
use crate::domain::job::{
    ExchangeErrorEntry, ExchangeJob, ExchangeLogEntry, JobCounters, RollbackEntry,
};
use crate::domain::types::{JobStatus, RowAction, Severity};
use crate::repository::codec;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::job_repo::ExchangeJobRepository;
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

// ==========================================
// ExchangeJobRepositoryImpl
// ==========================================
pub struct ExchangeJobRepositoryImpl {
    conn: Arc<Mutex<Connection>>,
}

struct JobRow {
    job_id: String,
    tenant_id: String,
    profile_id: String,
    connector_id: Option<String>,
    schedule_id: Option<String>,
    direction: String,
    status: String,
    phase: Option<String>,
    file_name: Option<String>,
    counters: JobCounters,
    progress_percent: f64,
    error_message: Option<String>,
    options_json: String,
    rollback_available: bool,
    created_at: chrono::DateTime<chrono::Utc>,
    started_at: Option<chrono::DateTime<chrono::Utc>>,
    finished_at: Option<chrono::DateTime<chrono::Utc>>,
}

const JOB_COLUMNS: &str = r#"
    job_id, tenant_id, profile_id, connector_id, schedule_id, direction, status,
    phase, file_name, total_rows, processed_rows, created_count, updated_count,
    skipped_count, error_count, warning_count, progress_percent, error_message,
    options_json, rollback_available, created_at, started_at, finished_at
"#;

impl ExchangeJobRepositoryImpl {
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = crate::db::open_sqlite_connection(db_path)?;
        init_engine_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn map_job_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobRow> {
        Ok(JobRow {
            job_id: row.get(0)?,
            tenant_id: row.get(1)?,
            profile_id: row.get(2)?,
            connector_id: row.get(3)?,
            schedule_id: row.get(4)?,
            direction: row.get(5)?,
            status: row.get(6)?,
            phase: row.get(7)?,
            file_name: row.get(8)?,
            counters: JobCounters {
                total_rows: row.get(9)?,
                processed_rows: row.get(10)?,
                created_count: row.get(11)?,
                updated_count: row.get(12)?,
                skipped_count: row.get(13)?,
                error_count: row.get(14)?,
                warning_count: row.get(15)?,
            },
            progress_percent: row.get(16)?,
            error_message: row.get(17)?,
            options_json: row.get(18)?,
            rollback_available: row.get::<_, i32>(19)? != 0,
            created_at: row.get(20)?,
            started_at: row.get(21)?,
            finished_at: row.get(22)?,
        })
    }

    fn hydrate(raw: JobRow) -> RepositoryResult<ExchangeJob> {
        let phase = match raw.phase {
            Some(p) => Some(codec::parse_phase(&p)?),
            None => None,
        };
        Ok(ExchangeJob {
            job_id: raw.job_id,
            tenant_id: raw.tenant_id,
            profile_id: raw.profile_id,
            connector_id: raw.connector_id,
            schedule_id: raw.schedule_id,
            direction: codec::parse_direction(&raw.direction)?,
            status: codec::parse_status(&raw.status)?,
            phase,
            file_name: raw.file_name,
            counters: raw.counters,
            progress_percent: raw.progress_percent,
            error_message: raw.error_message,
            options: serde_json::from_str(&raw.options_json)?,
            rollback_available: raw.rollback_available,
            created_at: raw.created_at,
            started_at: raw.started_at,
            finished_at: raw.finished_at,
        })
    }

    fn map_log_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(ExchangeLogEntry, String)> {
        let action_raw: String = row.get(3)?;
        let source_json: Option<String> = row.get(6)?;
        let mapped_json: Option<String> = row.get(7)?;
        let diff_json: Option<String> = row.get(8)?;
        Ok((
            ExchangeLogEntry {
                log_id: row.get(0)?,
                job_id: row.get(1)?,
                row_number: row.get::<_, i64>(2)? as usize,
                action: RowAction::Failed, // 占位，外层按 action_raw 覆盖
                entity_type: row.get(4)?,
                entity_id: row.get(5)?,
                source_data: source_json
                    .and_then(|s| serde_json::from_str(&s).ok())
                    .unwrap_or(serde_json::Value::Null),
                mapped_data: mapped_json
                    .and_then(|s| serde_json::from_str(&s).ok())
                    .unwrap_or(serde_json::Value::Null),
                diff: diff_json.and_then(|s| serde_json::from_str(&s).ok()),
                success: row.get::<_, i32>(9)? != 0,
                message: row.get(10)?,
                elapsed_ms: row.get(11)?,
                created_at: row.get(12)?,
            },
            action_raw,
        ))
    }
}

impl ExchangeJobRepository for ExchangeJobRepositoryImpl {
    fn insert_job(&self, job: &ExchangeJob) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO exchange_job (
                job_id, tenant_id, profile_id, connector_id, schedule_id, direction,
                status, phase, file_name, total_rows, processed_rows, created_count,
                updated_count, skipped_count, error_count, warning_count,
                progress_percent, error_message, options_json, rollback_available,
                created_at, started_at, finished_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
                ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23
            )
            "#,
            params![
                job.job_id,
                job.tenant_id,
                job.profile_id,
                job.connector_id,
                job.schedule_id,
                job.direction.to_string(),
                job.status.to_string(),
                job.phase.map(|p| p.to_string()),
                job.file_name,
                job.counters.total_rows,
                job.counters.processed_rows,
                job.counters.created_count,
                job.counters.updated_count,
                job.counters.skipped_count,
                job.counters.error_count,
                job.counters.warning_count,
                job.progress_percent,
                job.error_message,
                serde_json::to_string(&job.options)?,
                job.rollback_available as i32,
                job.created_at,
                job.started_at,
                job.finished_at,
            ],
        )?;
        Ok(())
    }

    fn update_job(&self, job: &ExchangeJob) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let changed = conn.execute(
            r#"
            UPDATE exchange_job SET
                status = ?1, phase = ?2, file_name = ?3, total_rows = ?4,
                processed_rows = ?5, created_count = ?6, updated_count = ?7,
                skipped_count = ?8, error_count = ?9, warning_count = ?10,
                progress_percent = ?11, error_message = ?12, options_json = ?13,
                rollback_available = ?14, started_at = ?15, finished_at = ?16
            WHERE job_id = ?17 AND tenant_id = ?18
            "#,
            params![
                job.status.to_string(),
                job.phase.map(|p| p.to_string()),
                job.file_name,
                job.counters.total_rows,
                job.counters.processed_rows,
                job.counters.created_count,
                job.counters.updated_count,
                job.counters.skipped_count,
                job.counters.error_count,
                job.counters.warning_count,
                job.progress_percent,
                job.error_message,
                serde_json::to_string(&job.options)?,
                job.rollback_available as i32,
                job.started_at,
                job.finished_at,
                job.job_id,
                job.tenant_id,
            ],
        )?;
        if changed == 0 {
            return Err(RepositoryError::NotFound {
                entity: "ExchangeJob".to_string(),
                id: job.job_id.clone(),
            });
        }
        Ok(())
    }

    fn find_job(&self, tenant_id: &str, job_id: &str) -> RepositoryResult<Option<ExchangeJob>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM exchange_job WHERE tenant_id = ?1 AND job_id = ?2",
            JOB_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let result = stmt.query_row(params![tenant_id, job_id], Self::map_job_row);

        match result {
            Ok(raw) => Ok(Some(Self::hydrate(raw)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn list_jobs(
        &self,
        tenant_id: &str,
        status: Option<JobStatus>,
        sort_by: Option<&str>,
        sort_desc: bool,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<ExchangeJob>> {
        // 排序列白名单（拼接前校验，杜绝注入）
        let sort_column = match sort_by.unwrap_or("created_at") {
            "created_at" => "created_at",
            "status" => "status",
            "progress_percent" => "progress_percent",
            other => {
                return Err(RepositoryError::FieldValueError {
                    field: "sort_by".to_string(),
                    message: format!("不支持的排序列: {}", other),
                })
            }
        };
        // 缺省视图: 最新任务在前
        let direction = if sort_by.is_none() || sort_desc {
            "DESC"
        } else {
            "ASC"
        };

        let conn = self.get_conn()?;
        let mut sql = format!(
            "SELECT {} FROM exchange_job WHERE tenant_id = ?1",
            JOB_COLUMNS
        );
        if status.is_some() {
            sql.push_str(" AND status = ?2");
        }
        sql.push_str(&format!(
            " ORDER BY {} {} LIMIT ?3 OFFSET ?4",
            sort_column, direction
        ));

        let status_str = status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "".to_string());
        let mut stmt = conn.prepare(&sql)?;
        let raws = stmt
            .query_map(params![tenant_id, status_str, limit, offset], |row| {
                Self::map_job_row(row)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut jobs = Vec::with_capacity(raws.len());
        for raw in raws {
            jobs.push(Self::hydrate(raw)?);
        }
        Ok(jobs)
    }

    fn count_jobs(&self, tenant_id: &str, status: Option<JobStatus>) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count: i64 = if let Some(s) = status {
            conn.query_row(
                "SELECT COUNT(*) FROM exchange_job WHERE tenant_id = ?1 AND status = ?2",
                params![tenant_id, s.to_string()],
                |row| row.get(0),
            )?
        } else {
            conn.query_row(
                "SELECT COUNT(*) FROM exchange_job WHERE tenant_id = ?1",
                params![tenant_id],
                |row| row.get(0),
            )?
        };
        Ok(count)
    }

    fn find_active_job(
        &self,
        tenant_id: &str,
        profile_id: &str,
        connector_id: Option<&str>,
    ) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;
        // 活动状态: PENDING / VALIDATING / PROCESSING
        let result: rusqlite::Result<String> = if let Some(cid) = connector_id {
            conn.query_row(
                r#"
                SELECT job_id FROM exchange_job
                WHERE tenant_id = ?1 AND profile_id = ?2 AND connector_id = ?3
                  AND status IN ('PENDING', 'VALIDATING', 'PROCESSING')
                LIMIT 1
                "#,
                params![tenant_id, profile_id, cid],
                |row| row.get(0),
            )
        } else {
            conn.query_row(
                r#"
                SELECT job_id FROM exchange_job
                WHERE tenant_id = ?1 AND profile_id = ?2 AND connector_id IS NULL
                  AND status IN ('PENDING', 'VALIDATING', 'PROCESSING')
                LIMIT 1
                "#,
                params![tenant_id, profile_id],
                |row| row.get(0),
            )
        };

        match result {
            Ok(job_id) => Ok(Some(job_id)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn insert_log_entries(&self, entries: &[ExchangeLogEntry]) -> RepositoryResult<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        let mut count = 0;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO exchange_log (
                    log_id, job_id, row_number, action, entity_type, entity_id,
                    source_json, mapped_json, diff_json, success, message,
                    elapsed_ms, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                "#,
            )?;
            for entry in entries {
                stmt.execute(params![
                    entry.log_id,
                    entry.job_id,
                    entry.row_number as i64,
                    entry.action.to_string(),
                    entry.entity_type,
                    entry.entity_id,
                    serde_json::to_string(&entry.source_data)?,
                    serde_json::to_string(&entry.mapped_data)?,
                    entry
                        .diff
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()?,
                    entry.success as i32,
                    entry.message,
                    entry.elapsed_ms,
                    entry.created_at,
                ])?;
                count += 1;
            }
        }

        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        Ok(count)
    }

    fn list_logs(
        &self,
        job_id: &str,
        action: Option<RowAction>,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<ExchangeLogEntry>> {
        let conn = self.get_conn()?;
        let mut sql = r#"
            SELECT log_id, job_id, row_number, action, entity_type, entity_id,
                   source_json, mapped_json, diff_json, success, message,
                   elapsed_ms, created_at
            FROM exchange_log
            WHERE job_id = ?1
        "#
        .to_string();
        if action.is_some() {
            sql.push_str(" AND action = ?2");
        }
        sql.push_str(" ORDER BY row_number ASC LIMIT ?3 OFFSET ?4");

        let action_str = action
            .map(|a| a.to_string())
            .unwrap_or_else(|| "".to_string());
        let mut stmt = conn.prepare(&sql)?;
        let raws = stmt
            .query_map(params![job_id, action_str, limit, offset], |row| {
                Self::map_log_row(row)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut entries = Vec::with_capacity(raws.len());
        for (mut entry, action_raw) in raws {
            entry.action = codec::parse_row_action(&action_raw)?;
            entries.push(entry);
        }
        Ok(entries)
    }

    fn count_logs(&self, job_id: &str, action: Option<RowAction>) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count: i64 = if let Some(a) = action {
            conn.query_row(
                "SELECT COUNT(*) FROM exchange_log WHERE job_id = ?1 AND action = ?2",
                params![job_id, a.to_string()],
                |row| row.get(0),
            )?
        } else {
            conn.query_row(
                "SELECT COUNT(*) FROM exchange_log WHERE job_id = ?1",
                params![job_id],
                |row| row.get(0),
            )?
        };
        Ok(count)
    }

    fn insert_error_entries(&self, entries: &[ExchangeErrorEntry]) -> RepositoryResult<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        let mut count = 0;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO exchange_error (
                    error_id, job_id, row_number, column_name, field_name, error_type,
                    error_code, severity, offending_value, expected_value, rule_code,
                    message, row_snapshot_json, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                "#,
            )?;
            for entry in entries {
                stmt.execute(params![
                    entry.error_id,
                    entry.job_id,
                    entry.row_number.map(|n| n as i64),
                    entry.column_name,
                    entry.field_name,
                    entry.error_type.to_string(),
                    entry.error_code,
                    entry.severity.to_string(),
                    entry.offending_value,
                    entry.expected_value,
                    entry.rule_code,
                    entry.message,
                    entry
                        .row_snapshot
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()?,
                    entry.created_at,
                ])?;
                count += 1;
            }
        }

        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        Ok(count)
    }

    fn list_errors(
        &self,
        job_id: &str,
        severity: Option<Severity>,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<ExchangeErrorEntry>> {
        let conn = self.get_conn()?;
        let mut sql = r#"
            SELECT error_id, job_id, row_number, column_name, field_name, error_type,
                   error_code, severity, offending_value, expected_value, rule_code,
                   message, row_snapshot_json, created_at
            FROM exchange_error
            WHERE job_id = ?1
        "#
        .to_string();
        if severity.is_some() {
            sql.push_str(" AND severity = ?2");
        }
        sql.push_str(" ORDER BY row_number ASC, created_at ASC LIMIT ?3 OFFSET ?4");

        let severity_str = severity
            .map(|s| s.to_string())
            .unwrap_or_else(|| "".to_string());
        let mut stmt = conn.prepare(&sql)?;
        let raws = stmt
            .query_map(params![job_id, severity_str, limit, offset], |row| {
                let snapshot_json: Option<String> = row.get(12)?;
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, Option<String>>(8)?,
                    row.get::<_, Option<String>>(9)?,
                    row.get::<_, Option<String>>(10)?,
                    row.get::<_, String>(11)?,
                    snapshot_json,
                    row.get::<_, chrono::DateTime<chrono::Utc>>(13)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut entries = Vec::with_capacity(raws.len());
        for raw in raws {
            entries.push(ExchangeErrorEntry {
                error_id: raw.0,
                job_id: raw.1,
                row_number: raw.2.map(|n| n as usize),
                column_name: raw.3,
                field_name: raw.4,
                error_type: codec::parse_error_entry_type(&raw.5)?,
                error_code: raw.6,
                severity: codec::parse_severity(&raw.7)?,
                offending_value: raw.8,
                expected_value: raw.9,
                rule_code: raw.10,
                message: raw.11,
                row_snapshot: raw.12.and_then(|s| serde_json::from_str(&s).ok()),
                created_at: raw.13,
            });
        }
        Ok(entries)
    }

    fn count_errors(&self, job_id: &str, severity: Option<Severity>) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count: i64 = if let Some(s) = severity {
            conn.query_row(
                "SELECT COUNT(*) FROM exchange_error WHERE job_id = ?1 AND severity = ?2",
                params![job_id, s.to_string()],
                |row| row.get(0),
            )?
        } else {
            conn.query_row(
                "SELECT COUNT(*) FROM exchange_error WHERE job_id = ?1",
                params![job_id],
                |row| row.get(0),
            )?
        };
        Ok(count)
    }

    fn insert_rollback_entries(&self, entries: &[RollbackEntry]) -> RepositoryResult<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        let mut count = 0;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO exchange_rollback (
                    entry_id, job_id, seq_no, entity_type, entity_id, action,
                    prior_json, exhausted, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )?;
            for entry in entries {
                stmt.execute(params![
                    entry.entry_id,
                    entry.job_id,
                    entry.seq_no,
                    entry.entity_type,
                    entry.entity_id,
                    entry.action.to_string(),
                    entry
                        .prior_values
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()?,
                    entry.exhausted as i32,
                    entry.created_at,
                ])?;
                count += 1;
            }
        }

        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        Ok(count)
    }

    fn list_rollback_entries(&self, job_id: &str) -> RepositoryResult<Vec<RollbackEntry>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT entry_id, job_id, seq_no, entity_type, entity_id, action,
                   prior_json, exhausted, created_at
            FROM exchange_rollback
            WHERE job_id = ?1 AND exhausted = 0
            ORDER BY seq_no ASC
            "#,
        )?;

        let raws = stmt
            .query_map(params![job_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, i32>(7)? != 0,
                    row.get::<_, chrono::DateTime<chrono::Utc>>(8)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut entries = Vec::with_capacity(raws.len());
        for raw in raws {
            entries.push(RollbackEntry {
                entry_id: raw.0,
                job_id: raw.1,
                seq_no: raw.2,
                entity_type: raw.3,
                entity_id: raw.4,
                action: codec::parse_row_action(&raw.5)?,
                prior_values: raw.6.and_then(|s| serde_json::from_str(&s).ok()),
                exhausted: raw.7,
                created_at: raw.8,
            });
        }
        Ok(entries)
    }

    fn mark_rollback_exhausted(&self, job_id: &str) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let changed = conn.execute(
            "UPDATE exchange_rollback SET exhausted = 1 WHERE job_id = ?1",
            params![job_id],
        )?;
        Ok(changed)
    }
}
