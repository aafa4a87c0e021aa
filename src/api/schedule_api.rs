// ==========================================
// 数据交换引擎 - 定时交换 API
// ==========================================
// 职责: 定时交换的配置管理与外部触发入口
// 说明: 周期表达式语义由外部调度器解释，这里只做存在性校验
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::api::pagination::{PageRequest, PageResponse};
use crate::domain::job::ExchangeJob;
use crate::domain::schedule::ScheduledExchange;
use crate::engine::scheduler::{ScheduleIo, ScheduledExchangeService};
use crate::repository::{ProfileRepository, ScheduledExchangeRepository};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

// ==========================================
// ScheduleApi
// ==========================================
pub struct ScheduleApi {
    schedule_repo: Arc<dyn ScheduledExchangeRepository>,
    profile_repo: Arc<dyn ProfileRepository>,
    service: Arc<ScheduledExchangeService>,
}

impl ScheduleApi {
    pub fn new(
        schedule_repo: Arc<dyn ScheduledExchangeRepository>,
        profile_repo: Arc<dyn ProfileRepository>,
        service: Arc<ScheduledExchangeService>,
    ) -> Self {
        Self {
            schedule_repo,
            profile_repo,
            service,
        }
    }

    pub fn create_schedule(&self, schedule: ScheduledExchange) -> ApiResult<ScheduledExchange> {
        if schedule.code.trim().is_empty() {
            return Err(ApiError::InvalidInput("定时交换编码不能为空".to_string()));
        }
        if schedule.recurrence.trim().is_empty() {
            return Err(ApiError::InvalidInput("周期表达式不能为空".to_string()));
        }
        if schedule.pause_threshold < 0 {
            return Err(ApiError::InvalidInput(
                "pause_threshold 不能为负数".to_string(),
            ));
        }
        // 引用的配置必须存在
        self.profile_repo
            .find_by_id(&schedule.tenant_id, &schedule.profile_id)?
            .filter(|p| !p.is_deleted)
            .ok_or_else(|| ApiError::NotFound(format!("交换配置 {}", schedule.profile_id)))?;

        self.schedule_repo.insert(&schedule)?;
        info!(code = %schedule.code, "定时交换已创建");
        Ok(schedule)
    }

    pub fn update_schedule(&self, schedule: ScheduledExchange) -> ApiResult<ScheduledExchange> {
        if schedule.recurrence.trim().is_empty() {
            return Err(ApiError::InvalidInput("周期表达式不能为空".to_string()));
        }
        self.schedule_repo.update(&schedule)?;
        Ok(schedule)
    }

    pub fn get_schedule(&self, tenant_id: &str, code: &str) -> ApiResult<ScheduledExchange> {
        self.schedule_repo
            .find_by_code(tenant_id, code)?
            .ok_or_else(|| ApiError::NotFound(format!("定时交换 {}", code)))
    }

    pub fn list_schedules(
        &self,
        tenant_id: &str,
        active_only: bool,
        request: &PageRequest,
    ) -> ApiResult<PageResponse<ScheduledExchange>> {
        request.validate()?;
        let items = self.schedule_repo.list(
            tenant_id,
            active_only,
            request.limit(),
            request.offset(),
        )?;
        let total = self.schedule_repo.count(tenant_id, active_only)?;
        Ok(PageResponse::new(items, total, request))
    }

    pub fn delete_schedule(&self, tenant_id: &str, code: &str) -> ApiResult<()> {
        let schedule = self.get_schedule(tenant_id, code)?;
        self.schedule_repo
            .delete(tenant_id, &schedule.schedule_id)?;
        info!(code = %code, "定时交换已删除");
        Ok(())
    }

    /// 手工启停（自动停用后的人工恢复走这里）
    pub fn set_active(
        &self,
        tenant_id: &str,
        code: &str,
        is_active: bool,
    ) -> ApiResult<ScheduledExchange> {
        let schedule = self.get_schedule(tenant_id, code)?;
        self.schedule_repo
            .set_active(tenant_id, &schedule.schedule_id, is_active)?;
        self.get_schedule(tenant_id, code)
    }

    /// 外部调度器触发一次执行
    pub async fn trigger(
        &self,
        tenant_id: &str,
        code: &str,
        io: ScheduleIo,
    ) -> ApiResult<ExchangeJob> {
        let schedule = self.get_schedule(tenant_id, code)?;
        let job = self
            .service
            .trigger(tenant_id, &schedule.schedule_id, io)
            .await?;
        Ok(job)
    }

    /// 触发后由调用方推进 next_run_at
    pub fn advance_next_run(
        &self,
        tenant_id: &str,
        code: &str,
        next_run_at: DateTime<Utc>,
    ) -> ApiResult<ScheduledExchange> {
        let schedule = self.get_schedule(tenant_id, code)?;
        let updated = self
            .service
            .advance_next_run(tenant_id, &schedule.schedule_id, next_run_at)?;
        Ok(updated)
    }
}
