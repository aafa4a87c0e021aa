// ==========================================
// 数据交换引擎 - 定时交换实体
// ==========================================
// 职责: 周期描述与运行簿记；实际定时触发由外部调度器负责
// 约束: 连续失败达到 pause_threshold 自动停用
// ==========================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledExchange {
    pub schedule_id: String,
    pub tenant_id: String,
    /// 租户内唯一
    pub code: String,
    pub name: String,
    pub profile_id: String,
    pub connector_id: Option<String>,
    /// 周期表达式（语义由外部调度器解释，引擎仅存储）
    pub recurrence: String,
    pub is_active: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    /// 由调用方在每次触发后推进
    pub next_run_at: Option<DateTime<Utc>>,
    pub run_count: i64,
    pub failure_count: i64,
    pub consecutive_failures: i64,
    /// 连续失败自动暂停阈值
    pub pause_threshold: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledExchange {
    pub fn new(tenant_id: &str, code: &str, profile_id: &str, recurrence: &str) -> Self {
        let now = Utc::now();
        Self {
            schedule_id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            code: code.to_string(),
            name: code.to_string(),
            profile_id: profile_id.to_string(),
            connector_id: None,
            recurrence: recurrence.to_string(),
            is_active: true,
            last_run_at: None,
            next_run_at: None,
            run_count: 0,
            failure_count: 0,
            consecutive_failures: 0,
            pause_threshold: 3,
            created_at: now,
            updated_at: now,
        }
    }

    /// 记录一次成功运行（重置连续失败计数）
    pub fn record_success(&mut self, now: DateTime<Utc>) {
        self.run_count += 1;
        self.consecutive_failures = 0;
        self.last_run_at = Some(now);
        self.updated_at = now;
    }

    /// 记录一次失败运行（达到阈值自动停用）
    pub fn record_failure(&mut self, now: DateTime<Utc>) {
        self.run_count += 1;
        self.failure_count += 1;
        self.consecutive_failures += 1;
        self.last_run_at = Some(now);
        self.updated_at = now;
        if self.pause_threshold > 0 && self.consecutive_failures >= self.pause_threshold {
            self.is_active = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_pause_on_consecutive_failures() {
        let mut schedule = ScheduledExchange::new("t1", "nightly_contacts", "p1", "0 2 * * *");
        schedule.pause_threshold = 3;

        let now = Utc::now();
        schedule.record_failure(now);
        schedule.record_failure(now);
        assert!(schedule.is_active);

        schedule.record_failure(now);
        assert!(!schedule.is_active);
        assert_eq!(schedule.consecutive_failures, 3);
        assert_eq!(schedule.failure_count, 3);
    }

    #[test]
    fn test_success_resets_consecutive() {
        let mut schedule = ScheduledExchange::new("t1", "nightly_contacts", "p1", "0 2 * * *");
        let now = Utc::now();
        schedule.record_failure(now);
        schedule.record_failure(now);
        schedule.record_success(now);

        assert!(schedule.is_active);
        assert_eq!(schedule.consecutive_failures, 0);
        // 历史失败总数保留
        assert_eq!(schedule.failure_count, 2);
        assert_eq!(schedule.run_count, 3);
    }
}
