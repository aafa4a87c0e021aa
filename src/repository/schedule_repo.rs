// ==========================================
// 数据交换引擎 - 定时交换仓储
// ==========================================
// 职责: ScheduledExchange 的 CRUD 与运行簿记持久化
// ==========================================

use crate::db::init_engine_schema;
use crate::domain::schedule::ScheduledExchange;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

// ==========================================
// ScheduledExchangeRepository Trait
// ==========================================
pub trait ScheduledExchangeRepository: Send + Sync {
    fn insert(&self, schedule: &ScheduledExchange) -> RepositoryResult<()>;

    /// 整行更新（含运行簿记字段）
    fn update(&self, schedule: &ScheduledExchange) -> RepositoryResult<()>;

    fn find_by_id(
        &self,
        tenant_id: &str,
        schedule_id: &str,
    ) -> RepositoryResult<Option<ScheduledExchange>>;

    fn find_by_code(
        &self,
        tenant_id: &str,
        code: &str,
    ) -> RepositoryResult<Option<ScheduledExchange>>;

    fn list(
        &self,
        tenant_id: &str,
        active_only: bool,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<ScheduledExchange>>;

    fn count(&self, tenant_id: &str, active_only: bool) -> RepositoryResult<i64>;

    fn delete(&self, tenant_id: &str, schedule_id: &str) -> RepositoryResult<()>;

    fn set_active(
        &self,
        tenant_id: &str,
        schedule_id: &str,
        is_active: bool,
    ) -> RepositoryResult<()>;
}

// ==========================================
// ScheduledExchangeRepositoryImpl
// ==========================================
pub struct ScheduledExchangeRepositoryImpl {
    conn: Arc<Mutex<Connection>>,
}

const SCHEDULE_COLUMNS: &str = r#"
    schedule_id, tenant_id, code, name, profile_id, connector_id, recurrence,
    is_active, last_run_at, next_run_at, run_count, failure_count,
    consecutive_failures, pause_threshold, created_at, updated_at
"#;

impl ScheduledExchangeRepositoryImpl {
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

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduledExchange> {
        Ok(ScheduledExchange {
            schedule_id: row.get(0)?,
            tenant_id: row.get(1)?,
            code: row.get(2)?,
            name: row.get(3)?,
            profile_id: row.get(4)?,
            connector_id: row.get(5)?,
            recurrence: row.get(6)?,
            is_active: row.get::<_, i32>(7)? != 0,
            last_run_at: row.get(8)?,
            next_run_at: row.get(9)?,
            run_count: row.get(10)?,
            failure_count: row.get(11)?,
            consecutive_failures: row.get(12)?,
            pause_threshold: row.get(13)?,
            created_at: row.get(14)?,
            updated_at: row.get(15)?,
        })
    }
}

impl ScheduledExchangeRepository for ScheduledExchangeRepositoryImpl {
    fn insert(&self, schedule: &ScheduledExchange) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let result = conn.execute(
            r#"
            INSERT INTO scheduled_exchange (
                schedule_id, tenant_id, code, name, profile_id, connector_id,
                recurrence, is_active, last_run_at, next_run_at, run_count,
                failure_count, consecutive_failures, pause_threshold,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
            params![
                schedule.schedule_id,
                schedule.tenant_id,
                schedule.code,
                schedule.name,
                schedule.profile_id,
                schedule.connector_id,
                schedule.recurrence,
                schedule.is_active as i32,
                schedule.last_run_at,
                schedule.next_run_at,
                schedule.run_count,
                schedule.failure_count,
                schedule.consecutive_failures,
                schedule.pause_threshold,
                schedule.created_at,
                schedule.updated_at,
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) => match RepositoryError::from(e) {
                RepositoryError::UniqueConstraintViolation(_) => {
                    Err(RepositoryError::DuplicateCode {
                        entity: "ScheduledExchange".to_string(),
                        code: schedule.code.clone(),
                    })
                }
                other => Err(other),
            },
        }
    }

    fn update(&self, schedule: &ScheduledExchange) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let changed = conn.execute(
            r#"
            UPDATE scheduled_exchange SET
                name = ?1, profile_id = ?2, connector_id = ?3, recurrence = ?4,
                is_active = ?5, last_run_at = ?6, next_run_at = ?7, run_count = ?8,
                failure_count = ?9, consecutive_failures = ?10, pause_threshold = ?11,
                updated_at = ?12
            WHERE tenant_id = ?13 AND schedule_id = ?14
            "#,
            params![
                schedule.name,
                schedule.profile_id,
                schedule.connector_id,
                schedule.recurrence,
                schedule.is_active as i32,
                schedule.last_run_at,
                schedule.next_run_at,
                schedule.run_count,
                schedule.failure_count,
                schedule.consecutive_failures,
                schedule.pause_threshold,
                schedule.updated_at,
                schedule.tenant_id,
                schedule.schedule_id,
            ],
        )?;
        if changed == 0 {
            return Err(RepositoryError::NotFound {
                entity: "ScheduledExchange".to_string(),
                id: schedule.schedule_id.clone(),
            });
        }
        Ok(())
    }

    fn find_by_id(
        &self,
        tenant_id: &str,
        schedule_id: &str,
    ) -> RepositoryResult<Option<ScheduledExchange>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM scheduled_exchange WHERE tenant_id = ?1 AND schedule_id = ?2",
            SCHEDULE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let result = stmt.query_row(params![tenant_id, schedule_id], Self::map_row);

        match result {
            Ok(schedule) => Ok(Some(schedule)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn find_by_code(
        &self,
        tenant_id: &str,
        code: &str,
    ) -> RepositoryResult<Option<ScheduledExchange>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM scheduled_exchange WHERE tenant_id = ?1 AND code = ?2",
            SCHEDULE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let result = stmt.query_row(params![tenant_id, code], Self::map_row);

        match result {
            Ok(schedule) => Ok(Some(schedule)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn list(
        &self,
        tenant_id: &str,
        active_only: bool,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<ScheduledExchange>> {
        let conn = self.get_conn()?;
        let mut sql = format!(
            "SELECT {} FROM scheduled_exchange WHERE tenant_id = ?1",
            SCHEDULE_COLUMNS
        );
        if active_only {
            sql.push_str(" AND is_active = 1");
        }
        sql.push_str(" ORDER BY code ASC LIMIT ?2 OFFSET ?3");

        let mut stmt = conn.prepare(&sql)?;
        let schedules = stmt
            .query_map(params![tenant_id, limit, offset], Self::map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(schedules)
    }

    fn count(&self, tenant_id: &str, active_only: bool) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let mut sql = "SELECT COUNT(*) FROM scheduled_exchange WHERE tenant_id = ?1".to_string();
        if active_only {
            sql.push_str(" AND is_active = 1");
        }
        let count: i64 = conn.query_row(&sql, params![tenant_id], |row| row.get(0))?;
        Ok(count)
    }

    fn delete(&self, tenant_id: &str, schedule_id: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let changed = conn.execute(
            "DELETE FROM scheduled_exchange WHERE tenant_id = ?1 AND schedule_id = ?2",
            params![tenant_id, schedule_id],
        )?;
        if changed == 0 {
            return Err(RepositoryError::NotFound {
                entity: "ScheduledExchange".to_string(),
                id: schedule_id.to_string(),
            });
        }
        Ok(())
    }

    fn set_active(
        &self,
        tenant_id: &str,
        schedule_id: &str,
        is_active: bool,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let changed = conn.execute(
            r#"
            UPDATE scheduled_exchange SET is_active = ?1, updated_at = ?2
            WHERE tenant_id = ?3 AND schedule_id = ?4
            "#,
            params![is_active as i32, chrono::Utc::now(), tenant_id, schedule_id],
        )?;
        if changed == 0 {
            return Err(RepositoryError::NotFound {
                entity: "ScheduledExchange".to_string(),
                id: schedule_id.to_string(),
            });
        }
        Ok(())
    }
}
