// ==========================================
// 数据交换引擎 - 交换任务实体
// ==========================================
// 职责: Job / Log / Error / Rollback 记录定义
// 约束: processed = created + updated + skipped + error
// 约束: 回滚数据归属于任务，回滚成功后标记耗尽
// ==========================================

use crate::domain::types::{
    ErrorEntryType, ExchangeDirection, JobPhase, JobStatus, RowAction, Severity,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ==========================================
// JobCounters - 行计数器
// ==========================================
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct JobCounters {
    pub total_rows: i64,
    pub processed_rows: i64,
    pub created_count: i64,
    pub updated_count: i64,
    pub skipped_count: i64,
    pub error_count: i64,
    pub warning_count: i64,
}

impl JobCounters {
    /// 进度百分比（total=0 视为 0）
    pub fn progress_percent(&self) -> f64 {
        if self.total_rows <= 0 {
            0.0
        } else {
            (self.processed_rows as f64 / self.total_rows as f64) * 100.0
        }
    }

    /// 计数恒等式校验: processed = created + updated + skipped + error
    pub fn is_consistent(&self) -> bool {
        self.processed_rows
            == self.created_count + self.updated_count + self.skipped_count + self.error_count
    }
}

// ==========================================
// ExchangeJob - 一次交换执行
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeJob {
    pub job_id: String,
    pub tenant_id: String,
    pub profile_id: String,
    pub connector_id: Option<String>,
    pub schedule_id: Option<String>,
    pub direction: ExchangeDirection,
    pub status: JobStatus,
    pub phase: Option<JobPhase>,
    pub file_name: Option<String>,
    pub counters: JobCounters,
    pub progress_percent: f64,
    pub error_message: Option<String>,
    /// 自由选项包（宿主透传）
    pub options: serde_json::Value,
    /// 存在未耗尽的回滚数据
    pub rollback_available: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExchangeJob {
    pub fn new(
        tenant_id: &str,
        profile_id: &str,
        direction: ExchangeDirection,
    ) -> Self {
        Self {
            job_id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            profile_id: profile_id.to_string(),
            connector_id: None,
            schedule_id: None,
            direction,
            status: JobStatus::Draft,
            phase: None,
            file_name: None,
            counters: JobCounters::default(),
            progress_percent: 0.0,
            error_message: None,
            options: serde_json::Value::Object(serde_json::Map::new()),
            rollback_available: false,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// 状态推进（非法转换返回 false，状态不变）
    pub fn transition_to(&mut self, next: JobStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }
}

// ==========================================
// ExchangeLogEntry - 行处理日志
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeLogEntry {
    pub log_id: String,
    pub job_id: String,
    pub row_number: usize,
    pub action: RowAction,
    pub entity_type: String,
    pub entity_id: Option<String>,
    /// 源行快照
    pub source_data: serde_json::Value,
    /// 映射后快照
    pub mapped_data: serde_json::Value,
    /// UPDATE 动作的变更差异（字段 → [旧, 新]）
    pub diff: Option<serde_json::Value>,
    pub success: bool,
    pub message: Option<String>,
    pub elapsed_ms: i64,
    pub created_at: DateTime<Utc>,
}

impl ExchangeLogEntry {
    pub fn new(job_id: &str, row_number: usize, action: RowAction, entity_type: &str) -> Self {
        Self {
            log_id: uuid::Uuid::new_v4().to_string(),
            job_id: job_id.to_string(),
            row_number,
            action,
            entity_type: entity_type.to_string(),
            entity_id: None,
            source_data: serde_json::Value::Null,
            mapped_data: serde_json::Value::Null,
            diff: None,
            success: !matches!(action, RowAction::Failed),
            message: None,
            elapsed_ms: 0,
            created_at: Utc::now(),
        }
    }
}

// ==========================================
// ExchangeErrorEntry - 行/任务级错误条目
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeErrorEntry {
    pub error_id: String,
    pub job_id: String,
    /// None = 任务级错误
    pub row_number: Option<usize>,
    pub column_name: Option<String>,
    pub field_name: Option<String>,
    pub error_type: ErrorEntryType,
    /// 规则类型/错误细分标识（required/regex/duplicate/...）
    pub error_code: Option<String>,
    pub severity: Severity,
    pub offending_value: Option<String>,
    pub expected_value: Option<String>,
    pub rule_code: Option<String>,
    pub message: String,
    /// 整行快照，便于人工修复源文件
    pub row_snapshot: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl ExchangeErrorEntry {
    pub fn new(
        job_id: &str,
        row_number: Option<usize>,
        error_type: ErrorEntryType,
        severity: Severity,
        message: &str,
    ) -> Self {
        Self {
            error_id: uuid::Uuid::new_v4().to_string(),
            job_id: job_id.to_string(),
            row_number,
            column_name: None,
            field_name: None,
            error_type,
            error_code: None,
            severity,
            offending_value: None,
            expected_value: None,
            rule_code: None,
            message: message.to_string(),
            row_snapshot: None,
            created_at: Utc::now(),
        }
    }
}

// ==========================================
// RollbackEntry - 回滚数据条目
// ==========================================
// 按 seq_no 升序记录，回滚时倒序执行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackEntry {
    pub entry_id: String,
    pub job_id: String,
    pub seq_no: i64,
    pub entity_type: String,
    pub entity_id: String,
    /// CREATED: 回滚=删除; UPDATED: 回滚=恢复 prior_values
    pub action: RowAction,
    pub prior_values: Option<serde_json::Value>,
    pub exhausted: bool,
    pub created_at: DateTime<Utc>,
}

impl RollbackEntry {
    pub fn created(job_id: &str, seq_no: i64, entity_type: &str, entity_id: &str) -> Self {
        Self {
            entry_id: uuid::Uuid::new_v4().to_string(),
            job_id: job_id.to_string(),
            seq_no,
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            action: RowAction::Created,
            prior_values: None,
            exhausted: false,
            created_at: Utc::now(),
        }
    }

    pub fn updated(
        job_id: &str,
        seq_no: i64,
        entity_type: &str,
        entity_id: &str,
        prior_values: serde_json::Value,
    ) -> Self {
        Self {
            entry_id: uuid::Uuid::new_v4().to_string(),
            job_id: job_id.to_string(),
            seq_no,
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            action: RowAction::Updated,
            prior_values: Some(prior_values),
            exhausted: false,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_identity() {
        let counters = JobCounters {
            total_rows: 10,
            processed_rows: 10,
            created_count: 6,
            updated_count: 2,
            skipped_count: 1,
            error_count: 1,
            warning_count: 3,
        };
        assert!(counters.is_consistent());
        assert!((counters.progress_percent() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_job_transition_guard() {
        let mut job = ExchangeJob::new("t1", "p1", ExchangeDirection::Import);
        assert_eq!(job.status, JobStatus::Draft);
        assert!(job.transition_to(JobStatus::Pending));
        assert!(job.transition_to(JobStatus::Validating));
        // 非法回退被拒绝且状态不变
        assert!(!job.transition_to(JobStatus::Pending));
        assert_eq!(job.status, JobStatus::Validating);
    }
}
