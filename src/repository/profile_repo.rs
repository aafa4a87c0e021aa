// ==========================================
// 数据交换引擎 - 交换配置仓储
// ==========================================
// 职责: ExchangeProfile 及其映射/规则/转换子表的存取
// 红线: Repository 不含业务规则，只做数据 CRUD
// 约束: 所有查询使用参数化，防止 SQL 注入
// ==========================================

use crate::db::init_engine_schema;
use crate::domain::profile::{
    DialectOptions, ExchangeProfile, FieldMapping, RuleConfig, TransformConfig, Transformation,
    ValidationRule,
};
use crate::domain::BehaviorOptions;
use crate::repository::codec;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

// ==========================================
// ProfileRepository Trait
// ==========================================
// 实现者: ProfileRepositoryImpl（rusqlite）
pub trait ProfileRepository: Send + Sync {
    /// 插入配置（含子表，事务化）
    ///
    /// # 错误
    /// - DuplicateCode: (tenant_id, code) 已存在
    fn insert(&self, profile: &ExchangeProfile) -> RepositoryResult<()>;

    /// 整体更新配置（子表删除重建，事务化）
    fn update(&self, profile: &ExchangeProfile) -> RepositoryResult<()>;

    fn find_by_id(
        &self,
        tenant_id: &str,
        profile_id: &str,
    ) -> RepositoryResult<Option<ExchangeProfile>>;

    fn find_by_code(
        &self,
        tenant_id: &str,
        code: &str,
    ) -> RepositoryResult<Option<ExchangeProfile>>;

    /// 分页列表（filter 对 code/name 做 LIKE 匹配）
    ///
    /// # 参数
    /// - sort_by: code/name/created_at/updated_at（None = code）
    fn list(
        &self,
        tenant_id: &str,
        include_deleted: bool,
        filter: Option<&str>,
        sort_by: Option<&str>,
        sort_desc: bool,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<ExchangeProfile>>;

    fn count(
        &self,
        tenant_id: &str,
        include_deleted: bool,
        filter: Option<&str>,
    ) -> RepositoryResult<i64>;

    /// 软删除（历史任务仍引用时使用）
    fn soft_delete(&self, tenant_id: &str, profile_id: &str) -> RepositoryResult<()>;

    /// 物理删除（无任务引用时使用）
    fn hard_delete(&self, tenant_id: &str, profile_id: &str) -> RepositoryResult<()>;

    /// 是否被任务引用
    fn has_jobs(&self, profile_id: &str) -> RepositoryResult<bool>;
}

// ==========================================
// ProfileRepositoryImpl
// ==========================================
pub struct ProfileRepositoryImpl {
    conn: Arc<Mutex<Connection>>,
}

/// 中间行结构（闭包内仅取原始列，枚举转换在外层做）
struct ProfileRow {
    profile_id: String,
    tenant_id: String,
    code: String,
    name: String,
    direction: String,
    file_format: String,
    custom_format: Option<String>,
    entity_type: String,
    dialect_json: String,
    behavior_json: String,
    is_system: bool,
    is_deleted: bool,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

const PROFILE_COLUMNS: &str = r#"
    profile_id, tenant_id, code, name, direction, file_format, custom_format,
    entity_type, dialect_json, behavior_json, is_system, is_deleted,
    created_at, updated_at
"#;

impl ProfileRepositoryImpl {
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

    fn map_profile_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProfileRow> {
        Ok(ProfileRow {
            profile_id: row.get(0)?,
            tenant_id: row.get(1)?,
            code: row.get(2)?,
            name: row.get(3)?,
            direction: row.get(4)?,
            file_format: row.get(5)?,
            custom_format: row.get(6)?,
            entity_type: row.get(7)?,
            dialect_json: row.get(8)?,
            behavior_json: row.get(9)?,
            is_system: row.get::<_, i32>(10)? != 0,
            is_deleted: row.get::<_, i32>(11)? != 0,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }

    /// ProfileRow → 实体（加载子表）
    fn hydrate(&self, conn: &Connection, raw: ProfileRow) -> RepositoryResult<ExchangeProfile> {
        let dialect: DialectOptions = serde_json::from_str(&raw.dialect_json)?;
        let behavior: BehaviorOptions = serde_json::from_str(&raw.behavior_json)?;

        let mut profile = ExchangeProfile {
            profile_id: raw.profile_id,
            tenant_id: raw.tenant_id,
            code: raw.code,
            name: raw.name,
            direction: codec::parse_direction(&raw.direction)?,
            file_format: codec::parse_file_format(&raw.file_format)?,
            custom_format: raw.custom_format,
            entity_type: raw.entity_type,
            dialect,
            behavior,
            is_system: raw.is_system,
            is_deleted: raw.is_deleted,
            mappings: Vec::new(),
            rules: Vec::new(),
            transformations: Vec::new(),
            created_at: raw.created_at,
            updated_at: raw.updated_at,
        };

        profile.mappings = Self::load_mappings(conn, &profile.profile_id)?;
        profile.rules = Self::load_rules(conn, &profile.profile_id)?;
        profile.transformations = Self::load_transformations(conn, &profile.profile_id)?;
        profile.sort_members();
        Ok(profile)
    }

    fn load_mappings(conn: &Connection, profile_id: &str) -> RepositoryResult<Vec<FieldMapping>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT mapping_id, profile_id, source_field, target_field, source_type,
                   target_type, required, is_key, default_value, transformation_code, sort_order
            FROM field_mapping
            WHERE profile_id = ?1
            ORDER BY sort_order ASC
            "#,
        )?;

        let raws = stmt
            .query_map(params![profile_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, i32>(6)? != 0,
                    row.get::<_, i32>(7)? != 0,
                    row.get::<_, Option<String>>(8)?,
                    row.get::<_, Option<String>>(9)?,
                    row.get::<_, i32>(10)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut mappings = Vec::with_capacity(raws.len());
        for raw in raws {
            mappings.push(FieldMapping {
                mapping_id: raw.0,
                profile_id: raw.1,
                source_field: raw.2,
                target_field: raw.3,
                source_type: codec::parse_field_type(&raw.4)?,
                target_type: codec::parse_field_type(&raw.5)?,
                required: raw.6,
                is_key: raw.7,
                default_value: raw.8,
                transformation_code: raw.9,
                sort_order: raw.10,
            });
        }
        Ok(mappings)
    }

    fn load_rules(conn: &Connection, profile_id: &str) -> RepositoryResult<Vec<ValidationRule>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT rule_id, profile_id, code, field_name, config_json, severity,
                   stop_on_fail, stage, message, sort_order
            FROM validation_rule
            WHERE profile_id = ?1
            ORDER BY sort_order ASC
            "#,
        )?;

        let raws = stmt
            .query_map(params![profile_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, i32>(6)? != 0,
                    row.get::<_, String>(7)?,
                    row.get::<_, Option<String>>(8)?,
                    row.get::<_, i32>(9)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut rules = Vec::with_capacity(raws.len());
        for raw in raws {
            let config: RuleConfig = serde_json::from_str(&raw.4)?;
            rules.push(ValidationRule {
                rule_id: raw.0,
                profile_id: raw.1,
                code: raw.2,
                field_name: raw.3,
                config,
                severity: codec::parse_severity(&raw.5)?,
                stop_on_fail: raw.6,
                stage: codec::parse_rule_stage(&raw.7)?,
                message: raw.8,
                sort_order: raw.9,
            });
        }
        Ok(rules)
    }

    fn load_transformations(
        conn: &Connection,
        profile_id: &str,
    ) -> RepositoryResult<Vec<Transformation>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT transformation_id, profile_id, code, name, config_json, sort_order
            FROM transformation
            WHERE profile_id = ?1
            ORDER BY sort_order ASC
            "#,
        )?;

        let raws = stmt
            .query_map(params![profile_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, i32>(5)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut transformations = Vec::with_capacity(raws.len());
        for raw in raws {
            let config: TransformConfig = serde_json::from_str(&raw.4)?;
            transformations.push(Transformation {
                transformation_id: raw.0,
                profile_id: raw.1,
                code: raw.2,
                name: raw.3,
                config,
                sort_order: raw.5,
            });
        }
        Ok(transformations)
    }

    /// 事务内写入子表
    fn insert_children(
        tx: &rusqlite::Transaction<'_>,
        profile: &ExchangeProfile,
    ) -> RepositoryResult<()> {
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO field_mapping (
                    mapping_id, profile_id, source_field, target_field, source_type,
                    target_type, required, is_key, default_value, transformation_code, sort_order
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                "#,
            )?;
            for m in &profile.mappings {
                stmt.execute(params![
                    m.mapping_id,
                    profile.profile_id,
                    m.source_field,
                    m.target_field,
                    m.source_type.to_string(),
                    m.target_type.to_string(),
                    m.required as i32,
                    m.is_key as i32,
                    m.default_value,
                    m.transformation_code,
                    m.sort_order,
                ])?;
            }
        }

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO validation_rule (
                    rule_id, profile_id, code, field_name, config_json, severity,
                    stop_on_fail, stage, message, sort_order
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
            )?;
            for r in &profile.rules {
                stmt.execute(params![
                    r.rule_id,
                    profile.profile_id,
                    r.code,
                    r.field_name,
                    serde_json::to_string(&r.config)
                        .map_err(RepositoryError::from)?,
                    r.severity.to_string(),
                    r.stop_on_fail as i32,
                    r.stage.to_string(),
                    r.message,
                    r.sort_order,
                ])?;
            }
        }

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO transformation (
                    transformation_id, profile_id, code, name, config_json, sort_order
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )?;
            for t in &profile.transformations {
                stmt.execute(params![
                    t.transformation_id,
                    profile.profile_id,
                    t.code,
                    t.name,
                    serde_json::to_string(&t.config)
                        .map_err(RepositoryError::from)?,
                    t.sort_order,
                ])?;
            }
        }

        Ok(())
    }

    /// UNIQUE(tenant_id, code) 冲突 → DuplicateCode
    fn classify_unique(err: RepositoryError, code: &str) -> RepositoryError {
        match err {
            RepositoryError::UniqueConstraintViolation(_) => RepositoryError::DuplicateCode {
                entity: "ExchangeProfile".to_string(),
                code: code.to_string(),
            },
            other => other,
        }
    }
}

impl ProfileRepository for ProfileRepositoryImpl {
    fn insert(&self, profile: &ExchangeProfile) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        let result: RepositoryResult<()> = (|| {
            tx.execute(
                r#"
                INSERT INTO exchange_profile (
                    profile_id, tenant_id, code, name, direction, file_format, custom_format,
                    entity_type, dialect_json, behavior_json, is_system, is_deleted,
                    created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                "#,
                params![
                    profile.profile_id,
                    profile.tenant_id,
                    profile.code,
                    profile.name,
                    profile.direction.to_string(),
                    profile.file_format.to_string(),
                    profile.custom_format,
                    profile.entity_type,
                    serde_json::to_string(&profile.dialect)?,
                    serde_json::to_string(&profile.behavior)?,
                    profile.is_system as i32,
                    profile.is_deleted as i32,
                    profile.created_at,
                    profile.updated_at,
                ],
            )?;
            Self::insert_children(&tx, profile)?;
            Ok(())
        })();

        match result {
            Ok(()) => {
                tx.commit()
                    .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
                Ok(())
            }
            Err(e) => Err(Self::classify_unique(e, &profile.code)),
        }
    }

    fn update(&self, profile: &ExchangeProfile) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        let result: RepositoryResult<()> = (|| {
            let changed = tx.execute(
                r#"
                UPDATE exchange_profile SET
                    code = ?1, name = ?2, direction = ?3, file_format = ?4,
                    custom_format = ?5, entity_type = ?6, dialect_json = ?7,
                    behavior_json = ?8, is_system = ?9, is_deleted = ?10, updated_at = ?11
                WHERE profile_id = ?12 AND tenant_id = ?13
                "#,
                params![
                    profile.code,
                    profile.name,
                    profile.direction.to_string(),
                    profile.file_format.to_string(),
                    profile.custom_format,
                    profile.entity_type,
                    serde_json::to_string(&profile.dialect)?,
                    serde_json::to_string(&profile.behavior)?,
                    profile.is_system as i32,
                    profile.is_deleted as i32,
                    chrono::Utc::now(),
                    profile.profile_id,
                    profile.tenant_id,
                ],
            )?;
            if changed == 0 {
                return Err(RepositoryError::NotFound {
                    entity: "ExchangeProfile".to_string(),
                    id: profile.profile_id.clone(),
                });
            }

            // 子表删除重建
            tx.execute(
                "DELETE FROM field_mapping WHERE profile_id = ?1",
                params![profile.profile_id],
            )?;
            tx.execute(
                "DELETE FROM validation_rule WHERE profile_id = ?1",
                params![profile.profile_id],
            )?;
            tx.execute(
                "DELETE FROM transformation WHERE profile_id = ?1",
                params![profile.profile_id],
            )?;
            Self::insert_children(&tx, profile)?;
            Ok(())
        })();

        match result {
            Ok(()) => {
                tx.commit()
                    .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
                Ok(())
            }
            Err(e) => Err(Self::classify_unique(e, &profile.code)),
        }
    }

    fn find_by_id(
        &self,
        tenant_id: &str,
        profile_id: &str,
    ) -> RepositoryResult<Option<ExchangeProfile>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM exchange_profile WHERE tenant_id = ?1 AND profile_id = ?2",
            PROFILE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let result = stmt.query_row(params![tenant_id, profile_id], Self::map_profile_row);

        match result {
            Ok(raw) => Ok(Some(self.hydrate(&conn, raw)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn find_by_code(
        &self,
        tenant_id: &str,
        code: &str,
    ) -> RepositoryResult<Option<ExchangeProfile>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM exchange_profile WHERE tenant_id = ?1 AND code = ?2",
            PROFILE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let result = stmt.query_row(params![tenant_id, code], Self::map_profile_row);

        match result {
            Ok(raw) => Ok(Some(self.hydrate(&conn, raw)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn list(
        &self,
        tenant_id: &str,
        include_deleted: bool,
        filter: Option<&str>,
        sort_by: Option<&str>,
        sort_desc: bool,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<ExchangeProfile>> {
        // 排序列白名单（拼接前校验，杜绝注入）
        let sort_column = match sort_by.unwrap_or("code") {
            "code" => "code",
            "name" => "name",
            "created_at" => "created_at",
            "updated_at" => "updated_at",
            other => {
                return Err(RepositoryError::FieldValueError {
                    field: "sort_by".to_string(),
                    message: format!("不支持的排序列: {}", other),
                })
            }
        };
        let direction = if sort_desc { "DESC" } else { "ASC" };

        let conn = self.get_conn()?;
        let mut sql = format!(
            "SELECT {} FROM exchange_profile WHERE tenant_id = ?1",
            PROFILE_COLUMNS
        );
        if !include_deleted {
            sql.push_str(" AND is_deleted = 0");
        }
        if filter.is_some() {
            sql.push_str(" AND (code LIKE ?2 OR name LIKE ?2)");
        }
        sql.push_str(&format!(
            " ORDER BY {} {} LIMIT ?3 OFFSET ?4",
            sort_column, direction
        ));

        // 无 filter 时 ?2 为未引用的占位参数，绑定不影响结果
        let pattern = filter
            .map(|f| format!("%{}%", f))
            .unwrap_or_else(|| "%".to_string());

        let mut stmt = conn.prepare(&sql)?;
        let raws = stmt
            .query_map(params![tenant_id, pattern, limit, offset], |row| {
                Self::map_profile_row(row)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut profiles = Vec::with_capacity(raws.len());
        for raw in raws {
            profiles.push(self.hydrate(&conn, raw)?);
        }
        Ok(profiles)
    }

    fn count(
        &self,
        tenant_id: &str,
        include_deleted: bool,
        filter: Option<&str>,
    ) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let mut sql = "SELECT COUNT(*) FROM exchange_profile WHERE tenant_id = ?1".to_string();
        if !include_deleted {
            sql.push_str(" AND is_deleted = 0");
        }
        let count: i64 = if let Some(f) = filter {
            sql.push_str(" AND (code LIKE ?2 OR name LIKE ?2)");
            let pattern = format!("%{}%", f);
            conn.query_row(&sql, params![tenant_id, pattern], |row| row.get(0))?
        } else {
            conn.query_row(&sql, params![tenant_id], |row| row.get(0))?
        };
        Ok(count)
    }

    fn soft_delete(&self, tenant_id: &str, profile_id: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let changed = conn.execute(
            "UPDATE exchange_profile SET is_deleted = 1, updated_at = ?1
             WHERE tenant_id = ?2 AND profile_id = ?3",
            params![chrono::Utc::now(), tenant_id, profile_id],
        )?;
        if changed == 0 {
            return Err(RepositoryError::NotFound {
                entity: "ExchangeProfile".to_string(),
                id: profile_id.to_string(),
            });
        }
        Ok(())
    }

    fn hard_delete(&self, tenant_id: &str, profile_id: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let changed = conn.execute(
            "DELETE FROM exchange_profile WHERE tenant_id = ?1 AND profile_id = ?2",
            params![tenant_id, profile_id],
        )?;
        if changed == 0 {
            return Err(RepositoryError::NotFound {
                entity: "ExchangeProfile".to_string(),
                id: profile_id.to_string(),
            });
        }
        Ok(())
    }

    fn has_jobs(&self, profile_id: &str) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM exchange_job WHERE profile_id = ?1",
            params![profile_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}
