// ==========================================
// 数据交换引擎 - 定时交换服务
// ==========================================
// 职责: 外部调度器触发一次定时交换的执行与运行簿记
// 红线: 同 (profile, connector) 至多一个活动任务，重入必须拒绝
// 说明: 时间触发本身在引擎之外；next_run_at 由调用方推进
// ==========================================

use crate::domain::job::ExchangeJob;
use crate::domain::schedule::ScheduledExchange;
use crate::domain::types::{ExchangeDirection, JobStatus};
use crate::engine::orchestrator::{ExchangeOrchestrator, ImportSource};
use crate::exchange::error::{ExchangeError, ExchangeResult};
use crate::exchange::traits::Connector;
use crate::repository::{ExchangeJobRepository, ProfileRepository, ScheduledExchangeRepository};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, instrument, warn};

// ==========================================
// ScheduleIo - 触发时的文件出入口
// ==========================================
pub enum ScheduleIo {
    /// 导入: 经连接器取文件
    Import {
        connector: Arc<dyn Connector>,
        path: String,
    },
    /// 导出: 可选连接器目的地（None 时产物随任务丢弃，仅用于演练）
    Export {
        destination: Option<(Arc<dyn Connector>, String)>,
    },
}

// ==========================================
// ScheduledExchangeService
// ==========================================
pub struct ScheduledExchangeService {
    schedule_repo: Arc<dyn ScheduledExchangeRepository>,
    profile_repo: Arc<dyn ProfileRepository>,
    job_repo: Arc<dyn ExchangeJobRepository>,
    orchestrator: Arc<ExchangeOrchestrator>,
}

impl ScheduledExchangeService {
    pub fn new(
        schedule_repo: Arc<dyn ScheduledExchangeRepository>,
        profile_repo: Arc<dyn ProfileRepository>,
        job_repo: Arc<dyn ExchangeJobRepository>,
        orchestrator: Arc<ExchangeOrchestrator>,
    ) -> Self {
        Self {
            schedule_repo,
            profile_repo,
            job_repo,
            orchestrator,
        }
    }

    /// 外部调度器触发一次执行
    ///
    /// # 流程
    /// 1. 定时交换必须处于激活状态
    /// 2. 互斥: 同 (profile, connector) 已有活动任务则拒绝
    /// 3. 创建任务并交给编排器
    /// 4. 簿记: run_count/failure_count/consecutive_failures，
    ///    连续失败达阈值自动停用；成功清零连续失败
    #[instrument(skip(self, io), fields(schedule_id = %schedule_id))]
    pub async fn trigger(
        &self,
        tenant_id: &str,
        schedule_id: &str,
        io: ScheduleIo,
    ) -> ExchangeResult<ExchangeJob> {
        let mut schedule = self
            .schedule_repo
            .find_by_id(tenant_id, schedule_id)?
            .ok_or_else(|| {
                ExchangeError::InternalError(format!("定时交换不存在: {}", schedule_id))
            })?;

        if !schedule.is_active {
            return Err(ExchangeError::ScheduleInactive(schedule.code.clone()));
        }

        // 互斥检查: 同 (profile, connector) 至多一个活动任务
        if let Some(running) = self.job_repo.find_active_job(
            tenant_id,
            &schedule.profile_id,
            schedule.connector_id.as_deref(),
        )? {
            return Err(ExchangeError::JobAlreadyRunning { job_id: running });
        }

        let profile = self
            .profile_repo
            .find_by_id(tenant_id, &schedule.profile_id)?
            .filter(|p| !p.is_deleted)
            .ok_or_else(|| {
                ExchangeError::ProfileMisconfigured(format!(
                    "配置不存在或已删除: {}",
                    schedule.profile_id
                ))
            })?;

        // 创建任务并提交
        let mut job = ExchangeJob::new(tenant_id, &profile.profile_id, profile.direction);
        job.schedule_id = Some(schedule.schedule_id.clone());
        job.connector_id = schedule.connector_id.clone();
        job.transition_to(JobStatus::Pending);
        self.job_repo.insert_job(&job)?;

        info!(
            schedule_code = %schedule.code,
            job_id = %job.job_id,
            direction = %profile.direction,
            "定时交换触发"
        );

        let run_result = match (profile.direction, io) {
            (ExchangeDirection::Import, ScheduleIo::Import { connector, path }) => {
                self.orchestrator
                    .run_import(
                        tenant_id,
                        &job.job_id,
                        ImportSource::Connector { connector, path },
                    )
                    .await
            }
            (ExchangeDirection::Export, ScheduleIo::Export { destination }) => self
                .orchestrator
                .run_export(tenant_id, &job.job_id, destination)
                .await
                .map(|outcome| outcome.job),
            (direction, _) => Err(ExchangeError::ProfileMisconfigured(format!(
                "触发出入口与配置方向不一致: {}",
                direction
            ))),
        };

        // 运行簿记
        let now = Utc::now();
        let finished_job = match run_result {
            Ok(finished_job) => {
                if finished_job.status == JobStatus::Failed {
                    schedule.record_failure(now);
                } else {
                    schedule.record_success(now);
                }
                finished_job
            }
            Err(e) => {
                schedule.record_failure(now);
                self.persist_bookkeeping(&schedule);
                return Err(e);
            }
        };

        if !schedule.is_active {
            warn!(
                schedule_code = %schedule.code,
                consecutive_failures = schedule.consecutive_failures,
                "连续失败达到阈值，定时交换已自动停用"
            );
        }
        self.persist_bookkeeping(&schedule);
        Ok(finished_job)
    }

    /// 推进 next_run_at（由调用方在每次触发后调用）
    pub fn advance_next_run(
        &self,
        tenant_id: &str,
        schedule_id: &str,
        next_run_at: DateTime<Utc>,
    ) -> ExchangeResult<ScheduledExchange> {
        let mut schedule = self
            .schedule_repo
            .find_by_id(tenant_id, schedule_id)?
            .ok_or_else(|| {
                ExchangeError::InternalError(format!("定时交换不存在: {}", schedule_id))
            })?;
        schedule.next_run_at = Some(next_run_at);
        schedule.updated_at = Utc::now();
        self.schedule_repo.update(&schedule)?;
        Ok(schedule)
    }

    fn persist_bookkeeping(&self, schedule: &ScheduledExchange) {
        if let Err(e) = self.schedule_repo.update(schedule) {
            warn!(schedule_id = %schedule.schedule_id, error = %e, "定时交换簿记落库失败");
        }
    }
}
