// ==========================================
// 数据交换引擎 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为，避免“部分模块外键开启/部分不开启”
// - 统一 busy_timeout，减少并发写入时的偶发 busy 错误
// - 提供引擎自身表结构的初始化入口（宿主应用负责业务实体表）
// ==========================================

use rusqlite::Connection;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 初始化引擎表结构（幂等）
///
/// 说明：
/// - 各 Repository 的 ensure_tables 也会按需建表，这里提供整库一次性初始化入口
/// - 业务实体表（contacts/invoices/...）由宿主应用自行管理，引擎不建
pub fn init_engine_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS exchange_profile (
          profile_id TEXT PRIMARY KEY,
          tenant_id TEXT NOT NULL,
          code TEXT NOT NULL,
          name TEXT NOT NULL,
          direction TEXT NOT NULL,
          file_format TEXT NOT NULL,
          custom_format TEXT,
          entity_type TEXT NOT NULL,
          dialect_json TEXT NOT NULL,
          behavior_json TEXT NOT NULL,
          is_system INTEGER NOT NULL DEFAULT 0,
          is_deleted INTEGER NOT NULL DEFAULT 0,
          created_at TEXT NOT NULL DEFAULT (datetime('now')),
          updated_at TEXT NOT NULL DEFAULT (datetime('now')),
          UNIQUE(tenant_id, code)
        );

        CREATE TABLE IF NOT EXISTS field_mapping (
          mapping_id TEXT PRIMARY KEY,
          profile_id TEXT NOT NULL REFERENCES exchange_profile(profile_id) ON DELETE CASCADE,
          source_field TEXT NOT NULL,
          target_field TEXT NOT NULL,
          source_type TEXT NOT NULL,
          target_type TEXT NOT NULL,
          required INTEGER NOT NULL DEFAULT 0,
          is_key INTEGER NOT NULL DEFAULT 0,
          default_value TEXT,
          transformation_code TEXT,
          sort_order INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS validation_rule (
          rule_id TEXT PRIMARY KEY,
          profile_id TEXT NOT NULL REFERENCES exchange_profile(profile_id) ON DELETE CASCADE,
          code TEXT NOT NULL,
          field_name TEXT,
          config_json TEXT NOT NULL,
          severity TEXT NOT NULL,
          stop_on_fail INTEGER NOT NULL DEFAULT 0,
          stage TEXT NOT NULL,
          message TEXT,
          sort_order INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS transformation (
          transformation_id TEXT PRIMARY KEY,
          profile_id TEXT NOT NULL REFERENCES exchange_profile(profile_id) ON DELETE CASCADE,
          code TEXT NOT NULL,
          name TEXT NOT NULL,
          config_json TEXT NOT NULL,
          sort_order INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS lookup_table (
          table_id TEXT PRIMARY KEY,
          tenant_id TEXT NOT NULL,
          code TEXT NOT NULL,
          name TEXT NOT NULL,
          entries_json TEXT NOT NULL,
          default_value TEXT,
          case_sensitive INTEGER NOT NULL DEFAULT 1,
          created_at TEXT NOT NULL DEFAULT (datetime('now')),
          updated_at TEXT NOT NULL DEFAULT (datetime('now')),
          UNIQUE(tenant_id, code)
        );

        CREATE TABLE IF NOT EXISTS exchange_job (
          job_id TEXT PRIMARY KEY,
          tenant_id TEXT NOT NULL,
          profile_id TEXT NOT NULL REFERENCES exchange_profile(profile_id),
          connector_id TEXT,
          schedule_id TEXT,
          direction TEXT NOT NULL,
          status TEXT NOT NULL,
          phase TEXT,
          file_name TEXT,
          total_rows INTEGER NOT NULL DEFAULT 0,
          processed_rows INTEGER NOT NULL DEFAULT 0,
          created_count INTEGER NOT NULL DEFAULT 0,
          updated_count INTEGER NOT NULL DEFAULT 0,
          skipped_count INTEGER NOT NULL DEFAULT 0,
          error_count INTEGER NOT NULL DEFAULT 0,
          warning_count INTEGER NOT NULL DEFAULT 0,
          progress_percent REAL NOT NULL DEFAULT 0,
          error_message TEXT,
          options_json TEXT NOT NULL DEFAULT '{}',
          rollback_available INTEGER NOT NULL DEFAULT 0,
          created_at TEXT NOT NULL,
          started_at TEXT,
          finished_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_exchange_job_tenant_status
          ON exchange_job(tenant_id, status);

        CREATE TABLE IF NOT EXISTS exchange_log (
          log_id TEXT PRIMARY KEY,
          job_id TEXT NOT NULL REFERENCES exchange_job(job_id) ON DELETE CASCADE,
          row_number INTEGER NOT NULL,
          action TEXT NOT NULL,
          entity_type TEXT NOT NULL,
          entity_id TEXT,
          source_json TEXT,
          mapped_json TEXT,
          diff_json TEXT,
          success INTEGER NOT NULL,
          message TEXT,
          elapsed_ms INTEGER NOT NULL DEFAULT 0,
          created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_exchange_log_job_row
          ON exchange_log(job_id, row_number);

        CREATE TABLE IF NOT EXISTS exchange_error (
          error_id TEXT PRIMARY KEY,
          job_id TEXT NOT NULL REFERENCES exchange_job(job_id) ON DELETE CASCADE,
          row_number INTEGER,
          column_name TEXT,
          field_name TEXT,
          error_type TEXT NOT NULL,
          error_code TEXT,
          severity TEXT NOT NULL,
          offending_value TEXT,
          expected_value TEXT,
          rule_code TEXT,
          message TEXT NOT NULL,
          row_snapshot_json TEXT,
          created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_exchange_error_job_severity
          ON exchange_error(job_id, severity);

        CREATE TABLE IF NOT EXISTS exchange_rollback (
          entry_id TEXT PRIMARY KEY,
          job_id TEXT NOT NULL REFERENCES exchange_job(job_id) ON DELETE CASCADE,
          seq_no INTEGER NOT NULL,
          entity_type TEXT NOT NULL,
          entity_id TEXT NOT NULL,
          action TEXT NOT NULL,
          prior_json TEXT,
          exhausted INTEGER NOT NULL DEFAULT 0,
          created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_exchange_rollback_job_seq
          ON exchange_rollback(job_id, seq_no);

        CREATE TABLE IF NOT EXISTS scheduled_exchange (
          schedule_id TEXT PRIMARY KEY,
          tenant_id TEXT NOT NULL,
          code TEXT NOT NULL,
          name TEXT NOT NULL,
          profile_id TEXT NOT NULL REFERENCES exchange_profile(profile_id),
          connector_id TEXT,
          recurrence TEXT NOT NULL,
          is_active INTEGER NOT NULL DEFAULT 1,
          last_run_at TEXT,
          next_run_at TEXT,
          run_count INTEGER NOT NULL DEFAULT 0,
          failure_count INTEGER NOT NULL DEFAULT 0,
          consecutive_failures INTEGER NOT NULL DEFAULT 0,
          pause_threshold INTEGER NOT NULL DEFAULT 3,
          created_at TEXT NOT NULL DEFAULT (datetime('now')),
          updated_at TEXT NOT NULL DEFAULT (datetime('now')),
          UNIQUE(tenant_id, code)
        );
        "#,
    )?;
    Ok(())
}
