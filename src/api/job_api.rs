// ==========================================
// 数据交换引擎 - 任务 API
// ==========================================
// 职责: 任务创建/执行/查询/取消/回滚/预览的上行接口
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::api::pagination::{PageRequest, PageResponse};
use crate::domain::job::{ExchangeErrorEntry, ExchangeJob, ExchangeLogEntry};
use crate::domain::types::{ExchangeDirection, JobStatus, RowAction, Severity};
use crate::engine::orchestrator::{ExchangeOrchestrator, ExportOutcome, ImportSource, PreviewResult};
use crate::engine::rollback::{RollbackManager, RollbackReport};
use crate::exchange::traits::Connector;
use crate::repository::{ExchangeJobRepository, ProfileRepository};
use std::sync::Arc;
use tracing::info;

// ==========================================
// JobApi
// ==========================================
pub struct JobApi {
    job_repo: Arc<dyn ExchangeJobRepository>,
    profile_repo: Arc<dyn ProfileRepository>,
    orchestrator: Arc<ExchangeOrchestrator>,
    rollback: Arc<RollbackManager>,
}

impl JobApi {
    pub fn new(
        job_repo: Arc<dyn ExchangeJobRepository>,
        profile_repo: Arc<dyn ProfileRepository>,
        orchestrator: Arc<ExchangeOrchestrator>,
        rollback: Arc<RollbackManager>,
    ) -> Self {
        Self {
            job_repo,
            profile_repo,
            orchestrator,
            rollback,
        }
    }

    /// 创建任务（PENDING，未执行）
    ///
    /// # 参数
    /// - profile_code: 交换配置编码
    /// - options: 自由选项包（notify_recipients/filters 等）
    pub fn create_job(
        &self,
        tenant_id: &str,
        profile_code: &str,
        file_name: Option<&str>,
        options: Option<serde_json::Value>,
    ) -> ApiResult<ExchangeJob> {
        let profile = self
            .profile_repo
            .find_by_code(tenant_id, profile_code)?
            .filter(|p| !p.is_deleted)
            .ok_or_else(|| ApiError::NotFound(format!("交换配置 {}", profile_code)))?;

        let mut job = ExchangeJob::new(tenant_id, &profile.profile_id, profile.direction);
        job.file_name = file_name.map(|s| s.to_string());
        if let Some(options) = options {
            job.options = options;
        }
        job.transition_to(JobStatus::Pending);
        self.job_repo.insert_job(&job)?;

        info!(job_id = %job.job_id, profile_code = %profile_code, "任务已创建");
        Ok(job)
    }

    /// 创建并执行一次导入（上传字节场景）
    pub async fn import_bytes(
        &self,
        tenant_id: &str,
        profile_code: &str,
        file_name: Option<&str>,
        bytes: Vec<u8>,
        options: Option<serde_json::Value>,
    ) -> ApiResult<ExchangeJob> {
        self.ensure_direction(tenant_id, profile_code, ExchangeDirection::Import)?;
        let job = self.create_job(tenant_id, profile_code, file_name, options)?;

        let finished = self
            .orchestrator
            .run_import(
                tenant_id,
                &job.job_id,
                ImportSource::Bytes {
                    file_name: file_name.map(|s| s.to_string()),
                    bytes,
                },
            )
            .await?;
        Ok(finished)
    }

    /// 批量导入多个文件（并发执行）
    ///
    /// # 说明
    /// - 每个文件一个独立任务，互不影响
    /// - 某个文件失败不影响其他文件
    pub async fn batch_import_bytes(
        &self,
        tenant_id: &str,
        profile_code: &str,
        files: Vec<(Option<String>, Vec<u8>)>,
    ) -> ApiResult<Vec<Result<ExchangeJob, String>>> {
        use futures::future::join_all;

        info!(count = files.len(), profile_code = %profile_code, "开始批量导入");

        let tasks = files.into_iter().map(|(file_name, bytes)| async move {
            self.import_bytes(tenant_id, profile_code, file_name.as_deref(), bytes, None)
                .await
                .map_err(|e| e.to_string())
        });
        let results = join_all(tasks).await;

        info!(
            total = results.len(),
            success = results.iter().filter(|r| r.is_ok()).count(),
            failed = results.iter().filter(|r| r.is_err()).count(),
            "批量导入完成"
        );
        Ok(results)
    }

    /// 创建并执行一次导入（连接器取文件场景）
    pub async fn import_from_connector(
        &self,
        tenant_id: &str,
        profile_code: &str,
        connector: Arc<dyn Connector>,
        path: &str,
        options: Option<serde_json::Value>,
    ) -> ApiResult<ExchangeJob> {
        self.ensure_direction(tenant_id, profile_code, ExchangeDirection::Import)?;
        let job = self.create_job(tenant_id, profile_code, Some(path), options)?;

        let finished = self
            .orchestrator
            .run_import(
                tenant_id,
                &job.job_id,
                ImportSource::Connector {
                    connector,
                    path: path.to_string(),
                },
            )
            .await?;
        Ok(finished)
    }

    /// 创建并执行一次导出
    ///
    /// # 返回
    /// - 未给目的地时产物字节随结果返回
    pub async fn export(
        &self,
        tenant_id: &str,
        profile_code: &str,
        destination: Option<(Arc<dyn Connector>, String)>,
        options: Option<serde_json::Value>,
    ) -> ApiResult<ExportOutcome> {
        self.ensure_direction(tenant_id, profile_code, ExchangeDirection::Export)?;
        let job = self.create_job(tenant_id, profile_code, None, options)?;

        let outcome = self
            .orchestrator
            .run_export(tenant_id, &job.job_id, destination)
            .await?;
        Ok(outcome)
    }

    pub fn get_job(&self, tenant_id: &str, job_id: &str) -> ApiResult<ExchangeJob> {
        self.job_repo
            .find_job(tenant_id, job_id)?
            .ok_or_else(|| ApiError::NotFound(format!("任务 {}", job_id)))
    }

    pub fn list_jobs(
        &self,
        tenant_id: &str,
        status: Option<JobStatus>,
        request: &PageRequest,
    ) -> ApiResult<PageResponse<ExchangeJob>> {
        request.validate()?;
        let items = self.job_repo.list_jobs(
            tenant_id,
            status,
            request.sort_by.as_deref(),
            request.sort_desc,
            request.limit(),
            request.offset(),
        )?;
        let total = self.job_repo.count_jobs(tenant_id, status)?;
        Ok(PageResponse::new(items, total, request))
    }

    /// 取消任务（协作式）
    ///
    /// # 行为
    /// - 任务正在执行: 发出取消信号，批间生效（返回时状态可能仍是 PROCESSING）
    /// - 任务排队未执行: 直接转为 CANCELLED
    pub fn cancel_job(&self, tenant_id: &str, job_id: &str) -> ApiResult<ExchangeJob> {
        let mut job = self.get_job(tenant_id, job_id)?;
        if !job.status.can_cancel() {
            return Err(ApiError::JobNotCancellable {
                status: job.status.to_string(),
            });
        }

        if self.orchestrator.request_cancel(job_id) {
            info!(job_id = %job_id, "已向运行中任务发出取消信号");
            return Ok(job);
        }

        // 没有活动执行: 直接落状态
        job.transition_to(JobStatus::Cancelled);
        job.finished_at = Some(chrono::Utc::now());
        self.job_repo.update_job(&job)?;
        info!(job_id = %job_id, "任务已取消");
        Ok(job)
    }

    /// 回滚已完成任务
    pub async fn rollback_job(&self, tenant_id: &str, job_id: &str) -> ApiResult<RollbackReport> {
        // 已回滚的任务给出明确错误
        let job = self.get_job(tenant_id, job_id)?;
        if job.status == JobStatus::RolledBack {
            return Err(ApiError::AlreadyRolledBack(job_id.to_string()));
        }

        let report = self.rollback.rollback_job(tenant_id, job_id).await?;
        Ok(report)
    }

    /// 任务行日志（分页，action 可过滤）
    pub fn get_job_logs(
        &self,
        tenant_id: &str,
        job_id: &str,
        action: Option<RowAction>,
        request: &PageRequest,
    ) -> ApiResult<PageResponse<ExchangeLogEntry>> {
        request.validate()?;
        // 租户归属校验
        self.get_job(tenant_id, job_id)?;

        let items = self
            .job_repo
            .list_logs(job_id, action, request.limit(), request.offset())?;
        let total = self.job_repo.count_logs(job_id, action)?;
        Ok(PageResponse::new(items, total, request))
    }

    /// 任务错误条目（分页，severity 可过滤）
    pub fn get_job_errors(
        &self,
        tenant_id: &str,
        job_id: &str,
        severity: Option<Severity>,
        request: &PageRequest,
    ) -> ApiResult<PageResponse<ExchangeErrorEntry>> {
        request.validate()?;
        self.get_job(tenant_id, job_id)?;

        let items = self
            .job_repo
            .list_errors(job_id, severity, request.limit(), request.offset())?;
        let total = self.job_repo.count_errors(job_id, severity)?;
        Ok(PageResponse::new(items, total, request))
    }

    /// 方向前置检查（避免创建方向不符的孤儿任务）
    fn ensure_direction(
        &self,
        tenant_id: &str,
        profile_code: &str,
        expected: ExchangeDirection,
    ) -> ApiResult<()> {
        let profile = self
            .profile_repo
            .find_by_code(tenant_id, profile_code)?
            .filter(|p| !p.is_deleted)
            .ok_or_else(|| ApiError::NotFound(format!("交换配置 {}", profile_code)))?;
        if profile.direction != expected {
            return Err(ApiError::InvalidInput(format!(
                "配置 {} 方向为 {}，期望 {}",
                profile_code, profile.direction, expected
            )));
        }
        Ok(())
    }

    /// 导入预览（解析 + 映射 + 校验，零落库）
    pub async fn preview_import(
        &self,
        tenant_id: &str,
        profile_code: &str,
        bytes: &[u8],
        sample: Option<usize>,
    ) -> ApiResult<PreviewResult> {
        let result = self
            .orchestrator
            .preview_import(tenant_id, profile_code, bytes, sample)
            .await?;
        Ok(result)
    }
}
