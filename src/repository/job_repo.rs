// ==========================================
// 数据交换引擎 - 交换任务 Repository Trait
// ==========================================
// 职责: 定义任务/日志/错误/回滚数据访问接口（不包含实现）
// 红线: Repository 不含业务规则，只做数据 CRUD
// ==========================================

use crate::domain::job::{ExchangeErrorEntry, ExchangeJob, ExchangeLogEntry, RollbackEntry};
use crate::domain::types::{JobStatus, RowAction, Severity};
use crate::repository::error::RepositoryResult;

// ==========================================
// ExchangeJobRepository Trait
// ==========================================
// 实现者: ExchangeJobRepositoryImpl（rusqlite）
pub trait ExchangeJobRepository: Send + Sync {
    // ===== 任务 =====

    fn insert_job(&self, job: &ExchangeJob) -> RepositoryResult<()>;

    /// 整行更新（状态/阶段/计数器/时间戳）
    fn update_job(&self, job: &ExchangeJob) -> RepositoryResult<()>;

    fn find_job(&self, tenant_id: &str, job_id: &str) -> RepositoryResult<Option<ExchangeJob>>;

    /// 分页列表（status 过滤可选）
    ///
    /// # 参数
    /// - sort_by: created_at/status/progress_percent（None = created_at 倒序）
    fn list_jobs(
        &self,
        tenant_id: &str,
        status: Option<JobStatus>,
        sort_by: Option<&str>,
        sort_desc: bool,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<ExchangeJob>>;

    fn count_jobs(&self, tenant_id: &str, status: Option<JobStatus>) -> RepositoryResult<i64>;

    /// 查找同 (profile, connector) 的活动任务（调度互斥判定）
    ///
    /// # 返回
    /// - Some(job_id): 存在 PENDING/VALIDATING/PROCESSING 任务
    fn find_active_job(
        &self,
        tenant_id: &str,
        profile_id: &str,
        connector_id: Option<&str>,
    ) -> RepositoryResult<Option<String>>;

    // ===== 行日志（批量写，事务化）=====

    fn insert_log_entries(&self, entries: &[ExchangeLogEntry]) -> RepositoryResult<usize>;

    fn list_logs(
        &self,
        job_id: &str,
        action: Option<RowAction>,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<ExchangeLogEntry>>;

    fn count_logs(&self, job_id: &str, action: Option<RowAction>) -> RepositoryResult<i64>;

    // ===== 错误条目 =====

    fn insert_error_entries(&self, entries: &[ExchangeErrorEntry]) -> RepositoryResult<usize>;

    fn list_errors(
        &self,
        job_id: &str,
        severity: Option<Severity>,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<ExchangeErrorEntry>>;

    fn count_errors(&self, job_id: &str, severity: Option<Severity>) -> RepositoryResult<i64>;

    // ===== 回滚数据 =====

    fn insert_rollback_entries(&self, entries: &[RollbackEntry]) -> RepositoryResult<usize>;

    /// 未耗尽的回滚条目，按 seq_no 升序
    fn list_rollback_entries(&self, job_id: &str) -> RepositoryResult<Vec<RollbackEntry>>;

    /// 回滚成功后标记耗尽
    fn mark_rollback_exhausted(&self, job_id: &str) -> RepositoryResult<usize>;
}
