// ==========================================
// 数据交换引擎 - 查找表仓储
// ==========================================
// 职责: LookupTable 的 CRUD（entries 以 JSON 列存储）
// ==========================================

use crate::db::init_engine_schema;
use crate::domain::lookup::LookupTable;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

// ==========================================
// LookupTableRepository Trait
// ==========================================
pub trait LookupTableRepository: Send + Sync {
    fn insert(&self, table: &LookupTable) -> RepositoryResult<()>;

    fn update(&self, table: &LookupTable) -> RepositoryResult<()>;

    fn find_by_code(&self, tenant_id: &str, code: &str) -> RepositoryResult<Option<LookupTable>>;

    fn list(
        &self,
        tenant_id: &str,
        filter: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<LookupTable>>;

    fn count(&self, tenant_id: &str, filter: Option<&str>) -> RepositoryResult<i64>;

    fn delete(&self, tenant_id: &str, code: &str) -> RepositoryResult<()>;
}

// ==========================================
// LookupTableRepositoryImpl
// ==========================================
pub struct LookupTableRepositoryImpl {
    conn: Arc<Mutex<Connection>>,
}

impl LookupTableRepositoryImpl {
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

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(LookupTable, String)> {
        let entries_json: String = row.get(4)?;
        Ok((
            LookupTable {
                table_id: row.get(0)?,
                tenant_id: row.get(1)?,
                code: row.get(2)?,
                name: row.get(3)?,
                entries: HashMap::new(), // 外层按 entries_json 填充
                default_value: row.get(5)?,
                case_sensitive: row.get::<_, i32>(6)? != 0,
                created_at: row.get(7)?,
                updated_at: row.get(8)?,
            },
            entries_json,
        ))
    }
}

const LOOKUP_COLUMNS: &str = r#"
    table_id, tenant_id, code, name, entries_json, default_value,
    case_sensitive, created_at, updated_at
"#;

impl LookupTableRepository for LookupTableRepositoryImpl {
    fn insert(&self, table: &LookupTable) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let result = conn.execute(
            r#"
            INSERT INTO lookup_table (
                table_id, tenant_id, code, name, entries_json, default_value,
                case_sensitive, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                table.table_id,
                table.tenant_id,
                table.code,
                table.name,
                serde_json::to_string(&table.entries)?,
                table.default_value,
                table.case_sensitive as i32,
                table.created_at,
                table.updated_at,
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) => match RepositoryError::from(e) {
                RepositoryError::UniqueConstraintViolation(_) => {
                    Err(RepositoryError::DuplicateCode {
                        entity: "LookupTable".to_string(),
                        code: table.code.clone(),
                    })
                }
                other => Err(other),
            },
        }
    }

    fn update(&self, table: &LookupTable) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let changed = conn.execute(
            r#"
            UPDATE lookup_table SET
                name = ?1, entries_json = ?2, default_value = ?3,
                case_sensitive = ?4, updated_at = ?5
            WHERE tenant_id = ?6 AND code = ?7
            "#,
            params![
                table.name,
                serde_json::to_string(&table.entries)?,
                table.default_value,
                table.case_sensitive as i32,
                chrono::Utc::now(),
                table.tenant_id,
                table.code,
            ],
        )?;
        if changed == 0 {
            return Err(RepositoryError::NotFound {
                entity: "LookupTable".to_string(),
                id: table.code.clone(),
            });
        }
        Ok(())
    }

    fn find_by_code(&self, tenant_id: &str, code: &str) -> RepositoryResult<Option<LookupTable>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM lookup_table WHERE tenant_id = ?1 AND code = ?2",
            LOOKUP_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let result = stmt.query_row(params![tenant_id, code], Self::map_row);

        match result {
            Ok((mut table, entries_json)) => {
                table.entries = serde_json::from_str(&entries_json)?;
                Ok(Some(table))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn list(
        &self,
        tenant_id: &str,
        filter: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<LookupTable>> {
        let conn = self.get_conn()?;
        let mut sql = format!(
            "SELECT {} FROM lookup_table WHERE tenant_id = ?1",
            LOOKUP_COLUMNS
        );
        if filter.is_some() {
            sql.push_str(" AND (code LIKE ?2 OR name LIKE ?2)");
        }
        sql.push_str(" ORDER BY code ASC LIMIT ?3 OFFSET ?4");

        let pattern = filter
            .map(|f| format!("%{}%", f))
            .unwrap_or_else(|| "%".to_string());
        let mut stmt = conn.prepare(&sql)?;
        let raws = stmt
            .query_map(params![tenant_id, pattern, limit, offset], Self::map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut tables = Vec::with_capacity(raws.len());
        for (mut table, entries_json) in raws {
            table.entries = serde_json::from_str(&entries_json)?;
            tables.push(table);
        }
        Ok(tables)
    }

    fn count(&self, tenant_id: &str, filter: Option<&str>) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let mut sql = "SELECT COUNT(*) FROM lookup_table WHERE tenant_id = ?1".to_string();
        let count: i64 = if let Some(f) = filter {
            sql.push_str(" AND (code LIKE ?2 OR name LIKE ?2)");
            conn.query_row(&sql, params![tenant_id, format!("%{}%", f)], |row| {
                row.get(0)
            })?
        } else {
            conn.query_row(&sql, params![tenant_id], |row| row.get(0))?
        };
        Ok(count)
    }

    fn delete(&self, tenant_id: &str, code: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let changed = conn.execute(
            "DELETE FROM lookup_table WHERE tenant_id = ?1 AND code = ?2",
            params![tenant_id, code],
        )?;
        if changed == 0 {
            return Err(RepositoryError::NotFound {
                entity: "LookupTable".to_string(),
                id: code.to_string(),
            });
        }
        Ok(())
    }
}
