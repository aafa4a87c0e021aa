// ==========================================
// 数据交换引擎 - 回滚管理器
// ==========================================
// 职责: 用任务记录的回滚数据撤销一次已完成导入的实体变更
// 约束: 仅 COMPLETED/PARTIAL 且存在未耗尽回滚数据的任务可回滚
// 约束: 倒序（后创建的先撤销）执行以尊重引用依赖
// 约束: 中途失败保持任务状态不变，并报告已/未回退的实体
// ==========================================

use crate::domain::job::ExchangeJob;
use crate::domain::types::{JobStatus, RowAction};
use crate::domain::value::MappedRecord;
use crate::engine::entity_handler::EntityHandlerRegistry;
use crate::exchange::error::{ExchangeError, ExchangeResult};
use crate::repository::ExchangeJobRepository;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument, warn};

// ==========================================
// RollbackManager
// ==========================================
pub struct RollbackManager {
    job_repo: Arc<dyn ExchangeJobRepository>,
    handlers: Arc<EntityHandlerRegistry>,
}

/// 回滚结果明细
#[derive(Debug)]
pub struct RollbackReport {
    pub job: ExchangeJob,
    pub reverted_entities: Vec<String>,
}

impl RollbackManager {
    pub fn new(
        job_repo: Arc<dyn ExchangeJobRepository>,
        handlers: Arc<EntityHandlerRegistry>,
    ) -> Self {
        Self { job_repo, handlers }
    }

    /// 回滚一次已完成的导入
    ///
    /// # 流程
    /// 1. 资格检查: 状态 ∈ {COMPLETED, PARTIAL} 且回滚数据未耗尽
    /// 2. 按 seq_no 倒序: CREATED → 删除实体; UPDATED → 恢复 prior 值
    /// 3. 全部成功: 标记回滚数据耗尽，任务 → ROLLED_BACK
    /// 4. 任一失败: 任务状态不变，报告失败点与已回退实体
    ///    （操作不保证幂等，调用方不可盲目重试）
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn rollback_job(
        &self,
        tenant_id: &str,
        job_id: &str,
    ) -> ExchangeResult<RollbackReport> {
        let mut job = self
            .job_repo
            .find_job(tenant_id, job_id)?
            .ok_or_else(|| ExchangeError::InternalError(format!("任务不存在: {}", job_id)))?;

        if !job.status.can_rollback() {
            return Err(ExchangeError::NotRollbackEligible {
                status: job.status.to_string(),
            });
        }

        let entries = self.job_repo.list_rollback_entries(job_id)?;
        if entries.is_empty() {
            return Err(ExchangeError::NotRollbackEligible {
                status: job.status.to_string(),
            });
        }

        info!(job_id = %job_id, entries = entries.len(), "开始回滚");

        let mut reverted: Vec<String> = Vec::new();
        // 倒序: 后创建的先撤销
        for entry in entries.iter().rev() {
            let handler = self.handlers.get(&entry.entity_type)?;

            let result = match entry.action {
                RowAction::Created => handler.delete(&entry.entity_id).await,
                RowAction::Updated => {
                    let prior = entry.prior_values.clone().ok_or_else(|| {
                        ExchangeError::InternalError(format!(
                            "UPDATED 回滚条目缺少 prior 值: {}",
                            entry.entity_id
                        ))
                    })?;
                    let record = MappedRecord::from_json(0, &prior);
                    handler.update(&entry.entity_id, &record).await
                }
                other => {
                    warn!(action = %other, entity_id = %entry.entity_id, "非法回滚动作，跳过");
                    Ok(())
                }
            };

            match result {
                Ok(()) => reverted.push(entry.entity_id.clone()),
                Err(e) => {
                    // 任务状态保持不变，调用方据此人工处理
                    warn!(
                        entity_id = %entry.entity_id,
                        reverted = reverted.len(),
                        error = %e,
                        "回滚中途失败"
                    );
                    return Err(ExchangeError::RollbackFailed {
                        entity_type: entry.entity_type.clone(),
                        entity_id: entry.entity_id.clone(),
                        reverted: reverted.len(),
                        message: e.to_string(),
                    });
                }
            }
        }

        // 回滚数据归属任务，成功后标记耗尽（不可再次回滚）
        self.job_repo.mark_rollback_exhausted(job_id)?;
        if !job.transition_to(JobStatus::RolledBack) {
            return Err(ExchangeError::InternalError(format!(
                "非法状态转换: {} → ROLLED_BACK",
                job.status
            )));
        }
        job.rollback_available = false;
        job.finished_at = Some(Utc::now());
        self.job_repo.update_job(&job)?;

        info!(job_id = %job_id, reverted = reverted.len(), "回滚完成");
        Ok(RollbackReport {
            job,
            reverted_entities: reverted,
        })
    }
}
