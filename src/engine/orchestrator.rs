// ==========================================
// 数据交换引擎 - 交换任务编排器
// ==========================================
// 用途: 驱动一次导入/导出执行的全部阶段
// 流程(导入): 取文件 → 解析 → 校验 → 逐批 映射/转换/重复判定/落实体
// 流程(导出): 查询实体 → 序列化 → 写文件
// 红线: 状态转换单调; 取消只在批间生效; 行级失败是数据不是异常
// ==========================================

use crate::config::ExchangeConfigReader;
use crate::domain::job::{ExchangeErrorEntry, ExchangeJob, ExchangeLogEntry, RollbackEntry};
use crate::domain::profile::ExchangeProfile;
use crate::domain::types::{
    ErrorEntryType, ErrorStrategy, JobPhase, JobStatus, RowAction, RuleStage, Severity,
};
use crate::domain::value::MappedRecord;
use crate::engine::entity_handler::EntityHandlerRegistry;
use crate::engine::exporter::Exporter;
use crate::exchange::duplicate_resolver::{DuplicateDecision, DuplicateResolver};
use crate::exchange::error::{ExchangeError, ExchangeResult};
use crate::exchange::field_mapper::{FieldMapper, RowError};
use crate::exchange::file_parser::ParserRegistry;
use crate::exchange::profile_check::validate_profile;
use crate::exchange::traits::{Connector, NotificationEvent, Notifier, RawRecord};
use crate::exchange::transformer::{LookupStore, Transformer};
use crate::exchange::validator::{RuleFinding, ValidationEngine};
use crate::repository::{
    ExchangeJobRepository, LookupTableRepository, ProfileRepository,
};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument, warn};

// ==========================================
// ImportSource - 导入文件来源
// ==========================================
pub enum ImportSource {
    /// 直接提交的文件字节（上传场景）
    Bytes {
        file_name: Option<String>,
        bytes: Vec<u8>,
    },
    /// 经连接器取文件（定时/远端场景）
    Connector {
        connector: Arc<dyn Connector>,
        path: String,
    },
}

/// 导出产物
pub struct ExportOutcome {
    pub job: ExchangeJob,
    /// 未配置连接器目的地时返回字节
    pub bytes: Option<Vec<u8>>,
}

/// 预览单行
#[derive(Debug)]
pub struct PreviewRow {
    pub row_number: usize,
    pub source: serde_json::Value,
    pub mapped: Option<serde_json::Value>,
    pub findings: Vec<RuleFinding>,
}

/// 预览结果（只读，不产生任务与落库）
#[derive(Debug)]
pub struct PreviewResult {
    pub total_rows: usize,
    pub sampled_rows: usize,
    pub rows: Vec<PreviewRow>,
}

/// 校验阶段的行标记
#[derive(Debug, Clone, Copy, Default)]
struct RowFlag {
    has_error: bool,
    has_warning: bool,
    stopped: bool,
}

// ==========================================
// ExchangeOrchestrator - 交换任务编排器
// ==========================================
pub struct ExchangeOrchestrator {
    profile_repo: Arc<dyn ProfileRepository>,
    job_repo: Arc<dyn ExchangeJobRepository>,
    lookup_repo: Arc<dyn LookupTableRepository>,
    handlers: Arc<EntityHandlerRegistry>,
    parsers: Arc<ParserRegistry>,
    transformer: Arc<Transformer>,
    validator: Arc<ValidationEngine>,
    notifier: Arc<dyn Notifier>,
    config: Arc<dyn ExchangeConfigReader>,
    /// job_id → 取消标志（协作式，批间检查）
    cancel_flags: Mutex<HashMap<String, Arc<AtomicBool>>>,
}

impl ExchangeOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        profile_repo: Arc<dyn ProfileRepository>,
        job_repo: Arc<dyn ExchangeJobRepository>,
        lookup_repo: Arc<dyn LookupTableRepository>,
        handlers: Arc<EntityHandlerRegistry>,
        parsers: Arc<ParserRegistry>,
        transformer: Arc<Transformer>,
        validator: Arc<ValidationEngine>,
        notifier: Arc<dyn Notifier>,
        config: Arc<dyn ExchangeConfigReader>,
    ) -> Self {
        Self {
            profile_repo,
            job_repo,
            lookup_repo,
            handlers,
            parsers,
            transformer,
            validator,
            notifier,
            config,
            cancel_flags: Mutex::new(HashMap::new()),
        }
    }

    /// 请求取消运行中的任务
    ///
    /// # 返回
    /// - true: 已向活动执行发出信号（批间生效）
    /// - false: 该任务当前没有活动执行
    pub fn request_cancel(&self, job_id: &str) -> bool {
        match self.cancel_flags.lock() {
            Ok(flags) => match flags.get(job_id) {
                Some(flag) => {
                    flag.store(true, Ordering::SeqCst);
                    true
                }
                None => false,
            },
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "取消标志锁获取失败");
                false
            }
        }
    }

    fn register_cancel_flag(&self, job_id: &str) -> Arc<AtomicBool> {
        let flag = Arc::new(AtomicBool::new(false));
        if let Ok(mut flags) = self.cancel_flags.lock() {
            flags.insert(job_id.to_string(), flag.clone());
        }
        flag
    }

    fn remove_cancel_flag(&self, job_id: &str) {
        if let Ok(mut flags) = self.cancel_flags.lock() {
            flags.remove(job_id);
        }
    }

    // ==========================================
    // 导入执行
    // ==========================================
    // 任务级失败不抛出: 标记 FAILED + error_message 后返回任务
    #[instrument(skip(self, source), fields(job_id = %job_id))]
    pub async fn run_import(
        &self,
        tenant_id: &str,
        job_id: &str,
        source: ImportSource,
    ) -> ExchangeResult<ExchangeJob> {
        let mut job = self
            .job_repo
            .find_job(tenant_id, job_id)?
            .ok_or_else(|| ExchangeError::InternalError(format!("任务不存在: {}", job_id)))?;

        let flag = self.register_cancel_flag(job_id);
        let result = self.run_import_inner(&mut job, source, &flag).await;
        self.remove_cancel_flag(job_id);

        match result {
            Ok(()) => Ok(job),
            Err(ExchangeError::Cancelled) => {
                info!(job_id = %job.job_id, "任务已取消");
                Ok(job)
            }
            Err(e) => {
                warn!(job_id = %job.job_id, error = %e, "导入任务失败");
                self.mark_failed(&mut job, &e.to_string());
                self.notify(NotificationEvent::JobFailed, &job).await;
                Ok(job)
            }
        }
    }

    async fn run_import_inner(
        &self,
        job: &mut ExchangeJob,
        source: ImportSource,
        cancel: &AtomicBool,
    ) -> ExchangeResult<()> {
        let started = std::time::Instant::now();
        info!(job_id = %job.job_id, profile_id = %job.profile_id, "开始导入");

        // === 步骤 1: 解析配置并校验 ===
        let profile = self
            .profile_repo
            .find_by_id(&job.tenant_id, &job.profile_id)?
            .filter(|p| !p.is_deleted)
            .ok_or_else(|| {
                ExchangeError::ProfileMisconfigured(format!("配置不存在或已删除: {}", job.profile_id))
            })?;

        let lookups = self.load_lookup_store(&job.tenant_id)?;
        validate_profile(&profile, &lookups, &self.transformer, &self.validator)?;
        let handler = self.handlers.get(&profile.entity_type)?;

        job.started_at = Some(Utc::now());
        self.notify(NotificationEvent::JobStarted, job).await;

        // === 步骤 2: 取文件字节 ===
        debug!("步骤 2: 取文件字节");
        job.phase = Some(JobPhase::Fetch);
        self.job_repo.update_job(job)?;
        let bytes = self.fetch_bytes(job, source).await?;

        let max_bytes = self
            .config
            .get_max_file_bytes()
            .await
            .map_err(|e| ExchangeError::InternalError(e.to_string()))?;
        if max_bytes > 0 && bytes.len() > max_bytes {
            return Err(ExchangeError::FileTooLarge {
                size: bytes.len(),
                limit: max_bytes,
            });
        }

        // === 步骤 3: 解析（失败整体中止，不产出部分结果）===
        debug!("步骤 3: 解析文件");
        job.phase = Some(JobPhase::Parse);
        self.job_repo.update_job(job)?;
        let records = self.parsers.parse(&profile, &bytes)?;

        job.counters.total_rows = records.len() as i64;
        info!(total_rows = records.len(), "文件解析完成");

        // === 步骤 4: 校验阶段 ===
        let mut row_flags: HashMap<usize, RowFlag> = HashMap::new();

        // unique 预扫不依赖 validate_before_import（需要整文件视角）
        let batch_validation = self.validator.check_unique(&profile, &records);
        let mut error_entries: Vec<ExchangeErrorEntry> = Vec::new();
        self.collect_findings(
            job,
            &records,
            batch_validation.findings,
            &mut row_flags,
            &mut error_entries,
        );
        for row in batch_validation.stopped_rows {
            row_flags.entry(row).or_default().stopped = true;
        }

        if profile.behavior.validate_before_import {
            debug!("步骤 4: 校验阶段");
            if !job.transition_to(JobStatus::Validating) {
                return Err(ExchangeError::InternalError(format!(
                    "非法状态转换: {} → VALIDATING",
                    job.status
                )));
            }
            job.phase = Some(JobPhase::Validate);
            self.job_repo.update_job(job)?;

            for record in &records {
                if row_flags.get(&record.row_number).is_some_and(|f| f.stopped) {
                    continue;
                }
                let result = self
                    .validator
                    .validate_row(&profile, record, None, RuleStage::Raw, self.handlers.as_ref())
                    .await;
                if result.stopped {
                    row_flags.entry(record.row_number).or_default().stopped = true;
                }
                self.collect_findings(
                    job,
                    std::slice::from_ref(record),
                    result.findings,
                    &mut row_flags,
                    &mut error_entries,
                );
            }

            if !error_entries.is_empty() {
                self.job_repo.insert_error_entries(&error_entries)?;
                error_entries.clear();
            }

            // 校验阶段中止判定（任何行尚未提交）
            let error_rows = row_flags.values().filter(|f| f.has_error).count();
            if let Some(ceiling) = self.effective_ceiling(&profile) {
                if error_rows >= ceiling {
                    job.counters.error_count = error_rows as i64;
                    return Err(ExchangeError::ErrorCeilingReached { limit: ceiling });
                }
            }
            info!(error_rows = error_rows, "校验阶段完成");
        } else if !error_entries.is_empty() {
            self.job_repo.insert_error_entries(&error_entries)?;
            error_entries.clear();
        }

        // === 步骤 5: 处理阶段（逐批）===
        debug!("步骤 5: 处理阶段");
        if !job.transition_to(JobStatus::Processing) {
            return Err(ExchangeError::InternalError(format!(
                "非法状态转换: {} → PROCESSING",
                job.status
            )));
        }
        job.phase = Some(JobPhase::Process);
        self.job_repo.update_job(job)?;

        // 校验阶段已计数的错误行
        job.counters.error_count = 0;
        job.counters.warning_count = 0;

        let mapper = FieldMapper;
        let resolver = DuplicateResolver;
        let batch_size = profile.behavior.batch_size.max(1);
        let mut rollback_seq: i64 = 0;
        let mut aborted: Option<ExchangeError> = None;

        for batch in records.chunks(batch_size) {
            // 取消点: 只在批间检查，保证已处理行边界清晰
            if cancel.load(Ordering::SeqCst) {
                if job.transition_to(JobStatus::Cancelled) {
                    job.finished_at = Some(Utc::now());
                    self.job_repo.update_job(job)?;
                }
                return Err(ExchangeError::Cancelled);
            }

            let mut log_entries: Vec<ExchangeLogEntry> = Vec::with_capacity(batch.len());
            let mut rollback_entries: Vec<RollbackEntry> = Vec::new();

            for record in batch {
                let flag = row_flags.get(&record.row_number).copied().unwrap_or_default();

                let job_id = job.job_id.clone();
                let entries_before = error_entries.len();
                let row_result = self
                    .process_row(
                        &job_id,
                        &profile,
                        record,
                        flag,
                        &mapper,
                        &resolver,
                        handler.as_ref(),
                        &lookups,
                        &mut rollback_seq,
                        &mut error_entries,
                        &mut rollback_entries,
                    )
                    .await;
                job.counters.processed_rows += 1;

                // 告警行计数（校验阶段标记 + 处理阶段新增的 WARNING 条目）
                let warned_now = error_entries[entries_before..]
                    .iter()
                    .any(|e| e.severity == Severity::Warning);
                if flag.has_warning || warned_now {
                    job.counters.warning_count += 1;
                }

                match row_result {
                    Ok(entry) => {
                        match entry.action {
                            RowAction::Created => job.counters.created_count += 1,
                            RowAction::Updated => job.counters.updated_count += 1,
                            RowAction::Skipped => job.counters.skipped_count += 1,
                            RowAction::Failed => job.counters.error_count += 1,
                        }
                        log_entries.push(entry);
                    }
                    Err(e) => {
                        // 行处理内部未预期失败: 任务级错误
                        aborted = Some(e);
                        break;
                    }
                }

                // stop/rollback 策略的错误上限检查（批内立即生效）
                if let Some(ceiling) = self.effective_ceiling(&profile) {
                    if job.counters.error_count >= ceiling as i64 {
                        aborted = Some(ExchangeError::ErrorCeilingReached { limit: ceiling });
                        break;
                    }
                }
            }

            // 批量落库（日志/错误/回滚数据）
            if !log_entries.is_empty() {
                self.job_repo.insert_log_entries(&log_entries)?;
            }
            if !error_entries.is_empty() {
                self.job_repo.insert_error_entries(&error_entries)?;
                error_entries.clear();
            }
            if !rollback_entries.is_empty() {
                self.job_repo.insert_rollback_entries(&rollback_entries)?;
                job.rollback_available = true;
            }

            job.progress_percent = job.counters.progress_percent();
            self.job_repo.update_job(job)?;

            if aborted.is_some() {
                break;
            }
        }

        if let Some(e) = aborted {
            // 已提交的行保持不动，回滚由显式调用发起
            return Err(e);
        }

        // === 步骤 6: 收尾 ===
        job.phase = Some(JobPhase::Finalize);
        let final_status = if job.counters.error_count == 0 {
            JobStatus::Completed
        } else {
            JobStatus::Partial
        };
        if !job.transition_to(final_status) {
            return Err(ExchangeError::InternalError(format!(
                "非法状态转换: {} → {}",
                job.status, final_status
            )));
        }
        job.finished_at = Some(Utc::now());
        job.progress_percent = job.counters.progress_percent();
        self.job_repo.update_job(job)?;

        info!(
            job_id = %job.job_id,
            total = job.counters.total_rows,
            created = job.counters.created_count,
            updated = job.counters.updated_count,
            skipped = job.counters.skipped_count,
            errors = job.counters.error_count,
            elapsed_ms = started.elapsed().as_millis(),
            "导入完成"
        );

        if job.counters.warning_count > 0 {
            self.notify(NotificationEvent::JobWarning, job).await;
        }
        self.notify(NotificationEvent::JobCompleted, job).await;
        Ok(())
    }

    /// 处理单行: 映射 → 映射后校验 → 重复判定 → 落实体
    ///
    /// # 返回
    /// - Ok(ExchangeLogEntry): 行结果（含失败行）
    /// - Err: 仓储等任务级失败
    #[allow(clippy::too_many_arguments)]
    async fn process_row(
        &self,
        job_id: &str,
        profile: &ExchangeProfile,
        record: &RawRecord,
        flag: RowFlag,
        mapper: &FieldMapper,
        resolver: &DuplicateResolver,
        handler: &dyn crate::exchange::traits::EntityHandler,
        lookups: &LookupStore,
        rollback_seq: &mut i64,
        error_entries: &mut Vec<ExchangeErrorEntry>,
        rollback_entries: &mut Vec<RollbackEntry>,
    ) -> ExchangeResult<ExchangeLogEntry> {
        let row_started = std::time::Instant::now();

        let mut entry = ExchangeLogEntry::new(
            job_id,
            record.row_number,
            RowAction::Failed,
            &profile.entity_type,
        );
        entry.source_data = record.to_json();

        // 校验阶段已判失败的行: 不做实体操作
        if flag.has_error || flag.stopped {
            entry.message = Some("校验未通过".to_string());
            entry.elapsed_ms = row_started.elapsed().as_millis() as i64;
            return Ok(entry);
        }

        // 跳过了校验阶段时，RAW 规则在行处理中补跑
        if !profile.behavior.validate_before_import {
            let raw_validation = self
                .validator
                .validate_row(profile, record, None, RuleStage::Raw, self.handlers.as_ref())
                .await;
            let raw_failed = raw_validation
                .findings
                .iter()
                .any(|f| f.severity == Severity::Error)
                || raw_validation.stopped;
            if !raw_validation.findings.is_empty() {
                let message = raw_validation
                    .findings
                    .iter()
                    .map(|f| f.message.clone())
                    .collect::<Vec<_>>()
                    .join("; ");
                for finding in raw_validation.findings {
                    error_entries.push(self.finding_entry(job_id, record, finding));
                }
                if raw_failed {
                    entry.message = Some(message);
                    entry.elapsed_ms = row_started.elapsed().as_millis() as i64;
                    return Ok(entry);
                }
            }
        }

        // 映射/转换
        let mapped = match mapper.map_row(profile, record, &self.transformer, lookups) {
            Ok(mapped) => mapped,
            Err(row_error) => {
                error_entries.push(self.row_error_entry(job_id, profile, record, &row_error));
                entry.message = Some(row_error.message);
                entry.elapsed_ms = row_started.elapsed().as_millis() as i64;
                return Ok(entry);
            }
        };
        entry.mapped_data = mapped.to_json();

        // 映射后校验（MAPPED 阶段规则）
        let mapped_validation = self
            .validator
            .validate_row(profile, record, Some(&mapped), RuleStage::Mapped, self.handlers.as_ref())
            .await;
        let mut row_failed = false;
        for finding in &mapped_validation.findings {
            if finding.severity == Severity::Error {
                row_failed = true;
            }
        }
        if !mapped_validation.findings.is_empty() {
            let findings_msg = mapped_validation
                .findings
                .iter()
                .map(|f| f.message.clone())
                .collect::<Vec<_>>()
                .join("; ");
            for finding in mapped_validation.findings {
                error_entries.push(self.finding_entry(job_id, record, finding));
            }
            if row_failed {
                entry.message = Some(findings_msg);
                entry.elapsed_ms = row_started.elapsed().as_millis() as i64;
                return Ok(entry);
            }
        }

        // 重复判定
        let decision = resolver.resolve(profile, &mapped, handler).await?;
        match decision {
            DuplicateDecision::Create => {
                match handler.create(&mapped).await {
                    Ok(entity_id) => {
                        if profile.behavior.rollback_enabled {
                            *rollback_seq += 1;
                            rollback_entries.push(RollbackEntry::created(
                                job_id,
                                *rollback_seq,
                                &profile.entity_type,
                                &entity_id,
                            ));
                        }
                        entry.action = RowAction::Created;
                        entry.success = true;
                        entry.entity_id = Some(entity_id);
                    }
                    Err(e) => {
                        error_entries.push(self.processing_error_entry(job_id, record, &e));
                        entry.message = Some(e.to_string());
                    }
                }
            }
            DuplicateDecision::Update { existing_id } => {
                // 先捕获 prior 值（回滚与 diff 依据）
                let prior = handler.get(&existing_id).await?.unwrap_or(serde_json::Value::Null);
                match handler.update(&existing_id, &mapped).await {
                    Ok(()) => {
                        if profile.behavior.rollback_enabled {
                            *rollback_seq += 1;
                            rollback_entries.push(RollbackEntry::updated(
                                job_id,
                                *rollback_seq,
                                &profile.entity_type,
                                &existing_id,
                                prior.clone(),
                            ));
                        }
                        entry.diff = Some(diff_values(&prior, &mapped));
                        entry.action = RowAction::Updated;
                        entry.success = true;
                        entry.entity_id = Some(existing_id);
                    }
                    Err(e) => {
                        error_entries.push(self.processing_error_entry(job_id, record, &e));
                        entry.message = Some(e.to_string());
                    }
                }
            }
            DuplicateDecision::Skip { existing_id } => {
                entry.action = RowAction::Skipped;
                entry.success = true;
                entry.entity_id = Some(existing_id);
                entry.message = Some("重复记录，按策略跳过".to_string());
            }
            DuplicateDecision::Reject { existing_id } => {
                let mut err_entry = ExchangeErrorEntry::new(
                    job_id,
                    Some(record.row_number),
                    ErrorEntryType::Duplicate,
                    Severity::Error,
                    &format!("重复记录（既有实体 {}），按策略拒绝", existing_id),
                );
                err_entry.error_code = Some("duplicate".to_string());
                err_entry.row_snapshot = Some(record.to_json());
                error_entries.push(err_entry);
                entry.message = Some("重复记录，按策略拒绝".to_string());
            }
        }

        entry.elapsed_ms = row_started.elapsed().as_millis() as i64;
        Ok(entry)
    }

    // ==========================================
    // 导出执行
    // ==========================================
    #[instrument(skip(self, destination), fields(job_id = %job_id))]
    pub async fn run_export(
        &self,
        tenant_id: &str,
        job_id: &str,
        destination: Option<(Arc<dyn Connector>, String)>,
    ) -> ExchangeResult<ExportOutcome> {
        let mut job = self
            .job_repo
            .find_job(tenant_id, job_id)?
            .ok_or_else(|| ExchangeError::InternalError(format!("任务不存在: {}", job_id)))?;

        match self.run_export_inner(&mut job, destination).await {
            Ok(bytes) => Ok(ExportOutcome { job, bytes }),
            Err(e) => {
                warn!(job_id = %job.job_id, error = %e, "导出任务失败");
                self.mark_failed(&mut job, &e.to_string());
                self.notify(NotificationEvent::JobFailed, &job).await;
                Ok(ExportOutcome { job, bytes: None })
            }
        }
    }

    async fn run_export_inner(
        &self,
        job: &mut ExchangeJob,
        destination: Option<(Arc<dyn Connector>, String)>,
    ) -> ExchangeResult<Option<Vec<u8>>> {
        info!(job_id = %job.job_id, "开始导出");
        let profile = self
            .profile_repo
            .find_by_id(&job.tenant_id, &job.profile_id)?
            .filter(|p| !p.is_deleted)
            .ok_or_else(|| {
                ExchangeError::ProfileMisconfigured(format!("配置不存在或已删除: {}", job.profile_id))
            })?;
        let lookups = self.load_lookup_store(&job.tenant_id)?;
        validate_profile(&profile, &lookups, &self.transformer, &self.validator)?;
        let handler = self.handlers.get(&profile.entity_type)?;

        job.started_at = Some(Utc::now());
        self.notify(NotificationEvent::JobStarted, job).await;

        // 导出两阶段: PENDING → PROCESSING → {COMPLETED | FAILED}
        if !job.transition_to(JobStatus::Processing) {
            return Err(ExchangeError::InternalError(format!(
                "非法状态转换: {} → PROCESSING",
                job.status
            )));
        }
        job.phase = Some(JobPhase::Process);
        self.job_repo.update_job(job)?;

        // 查询实体（分页循环）并映射为输出行
        let page_size = self
            .config
            .get_export_page_size()
            .await
            .map_err(|e| ExchangeError::InternalError(e.to_string()))?;
        let fields: Vec<String> = profile
            .mappings
            .iter()
            .map(|m| m.source_field.clone())
            .collect();
        let filters = job
            .options
            .get("filters")
            .cloned()
            .unwrap_or(serde_json::Value::Null);

        let mapper = FieldMapper;
        let mut mapped_records: Vec<MappedRecord> = Vec::new();
        let mut offset = 0i64;
        loop {
            let page = handler.list(&filters, &fields, page_size, offset).await?;
            let page_len = page.len();
            for value in &page {
                let row_number = mapped_records.len() + 1;
                // 实体 JSON → 原始行 → 按映射整形（与导入同一条路径）
                let raw = entity_to_raw(row_number, value);
                match mapper.map_row(&profile, &raw, &self.transformer, &lookups) {
                    Ok(mapped) => mapped_records.push(mapped),
                    Err(row_error) => {
                        warn!(row = row_number, error = %row_error.message, "导出行映射失败");
                        job.counters.error_count += 1;
                    }
                }
            }
            job.counters.total_rows += page_len as i64;
            job.counters.processed_rows += page_len as i64;
            if (page_len as i64) < page_size {
                break;
            }
            offset += page_size;
        }

        // 序列化并写出
        job.phase = Some(JobPhase::Write);
        self.job_repo.update_job(job)?;
        let bytes = Exporter.serialize(&profile, &mapped_records)?;

        let returned = match destination {
            Some((connector, path)) => {
                self.store_with_retry(connector.as_ref(), &path, &bytes).await?;
                job.file_name = Some(path);
                None
            }
            None => Some(bytes),
        };

        if !job.transition_to(JobStatus::Completed) {
            return Err(ExchangeError::InternalError(format!(
                "非法状态转换: {} → COMPLETED",
                job.status
            )));
        }
        job.finished_at = Some(Utc::now());
        job.progress_percent = 100.0;
        self.job_repo.update_job(job)?;

        info!(
            job_id = %job.job_id,
            rows = job.counters.processed_rows,
            "导出完成"
        );
        self.notify(NotificationEvent::JobCompleted, job).await;
        Ok(returned)
    }

    // ==========================================
    // 导入预览（解析 + 映射 + 校验，零落库）
    // ==========================================
    pub async fn preview_import(
        &self,
        tenant_id: &str,
        profile_code: &str,
        bytes: &[u8],
        sample: Option<usize>,
    ) -> ExchangeResult<PreviewResult> {
        let profile = self
            .profile_repo
            .find_by_code(tenant_id, profile_code)?
            .filter(|p| !p.is_deleted)
            .ok_or_else(|| {
                ExchangeError::ProfileMisconfigured(format!("配置不存在: {}", profile_code))
            })?;
        let lookups = self.load_lookup_store(tenant_id)?;
        validate_profile(&profile, &lookups, &self.transformer, &self.validator)?;

        let records = self.parsers.parse(&profile, bytes)?;
        let total_rows = records.len();

        let default_sample = self
            .config
            .get_preview_sample_rows()
            .await
            .map_err(|e| ExchangeError::InternalError(e.to_string()))?;
        let sample_size = sample.unwrap_or(default_sample).max(1);

        let sampled: Vec<&RawRecord> = records.iter().take(sample_size).collect();
        let batch_validation = self.validator.check_unique(&profile, &records);
        let sampled_rows: HashSet<usize> = sampled.iter().map(|r| r.row_number).collect();

        let mapper = FieldMapper;
        let mut rows = Vec::with_capacity(sampled.len());
        for record in sampled {
            let mut findings: Vec<RuleFinding> = batch_validation
                .findings
                .iter()
                .filter(|f| f.row_number == record.row_number && sampled_rows.contains(&f.row_number))
                .cloned()
                .collect();

            let raw_validation = self
                .validator
                .validate_row(&profile, record, None, RuleStage::Raw, self.handlers.as_ref())
                .await;
            findings.extend(raw_validation.findings);

            let mapped = match mapper.map_row(&profile, record, &self.transformer, &lookups) {
                Ok(mapped) => {
                    let mapped_validation = self
                        .validator
                        .validate_row(
                            &profile,
                            record,
                            Some(&mapped),
                            RuleStage::Mapped,
                            self.handlers.as_ref(),
                        )
                        .await;
                    findings.extend(mapped_validation.findings);
                    Some(mapped.to_json())
                }
                Err(row_error) => {
                    findings.push(RuleFinding {
                        row_number: row_error.row_number,
                        field_name: row_error.field_name.clone(),
                        rule_code: row_error.error_code.clone(),
                        error_code: row_error.error_code,
                        severity: Severity::Error,
                        offending_value: row_error.offending_value,
                        expected_value: None,
                        message: row_error.message,
                    });
                    None
                }
            };

            rows.push(PreviewRow {
                row_number: record.row_number,
                source: record.to_json(),
                mapped,
                findings,
            });
        }

        Ok(PreviewResult {
            total_rows,
            sampled_rows: rows.len(),
            rows,
        })
    }

    // ==========================================
    // 内部辅助
    // ==========================================

    /// 取文件字节（连接类失败按配置重试）
    async fn fetch_bytes(
        &self,
        job: &mut ExchangeJob,
        source: ImportSource,
    ) -> ExchangeResult<Vec<u8>> {
        match source {
            ImportSource::Bytes { file_name, bytes } => {
                if job.file_name.is_none() {
                    job.file_name = file_name;
                }
                Ok(bytes)
            }
            ImportSource::Connector { connector, path } => {
                job.file_name = Some(path.clone());
                let retry_count = self
                    .config
                    .get_connector_retry_count()
                    .await
                    .map_err(|e| ExchangeError::InternalError(e.to_string()))?;
                let retry_delay = self
                    .config
                    .get_connector_retry_delay_ms()
                    .await
                    .map_err(|e| ExchangeError::InternalError(e.to_string()))?;

                let mut attempt = 0u32;
                loop {
                    match connector.fetch(&path).await {
                        Ok(bytes) => return Ok(bytes),
                        Err(ExchangeError::ConnectorFetchError(msg)) if attempt < retry_count => {
                            attempt += 1;
                            warn!(path = %path, attempt = attempt, error = %msg, "取文件失败，重试");
                            tokio::time::sleep(std::time::Duration::from_millis(retry_delay)).await;
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }

    /// 写出文件（连接类失败按配置重试）
    async fn store_with_retry(
        &self,
        connector: &dyn Connector,
        path: &str,
        bytes: &[u8],
    ) -> ExchangeResult<()> {
        let retry_count = self
            .config
            .get_connector_retry_count()
            .await
            .map_err(|e| ExchangeError::InternalError(e.to_string()))?;
        let retry_delay = self
            .config
            .get_connector_retry_delay_ms()
            .await
            .map_err(|e| ExchangeError::InternalError(e.to_string()))?;

        let mut attempt = 0u32;
        loop {
            match connector.store(path, bytes).await {
                Ok(()) => return Ok(()),
                Err(ExchangeError::ConnectorStoreError(msg)) if attempt < retry_count => {
                    attempt += 1;
                    warn!(path = %path, attempt = attempt, error = %msg, "写文件失败，重试");
                    tokio::time::sleep(std::time::Duration::from_millis(retry_delay)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn load_lookup_store(&self, tenant_id: &str) -> ExchangeResult<LookupStore> {
        let tables = self.lookup_repo.list(tenant_id, None, i64::MAX, 0)?;
        Ok(LookupStore::from_tables(tables))
    }

    /// 发现 → 错误条目并更新行标记
    fn collect_findings(
        &self,
        job: &ExchangeJob,
        records: &[RawRecord],
        findings: Vec<RuleFinding>,
        row_flags: &mut HashMap<usize, RowFlag>,
        error_entries: &mut Vec<ExchangeErrorEntry>,
    ) {
        let snapshots: HashMap<usize, &RawRecord> =
            records.iter().map(|r| (r.row_number, r)).collect();

        for finding in findings {
            let flag = row_flags.entry(finding.row_number).or_default();
            match finding.severity {
                Severity::Error => flag.has_error = true,
                Severity::Warning => flag.has_warning = true,
                Severity::Info => {}
            }

            let record = snapshots.get(&finding.row_number).copied();
            let mut entry = self.finding_entry(&job.job_id, record.unwrap_or(&RawRecord::default()), finding);
            if record.is_none() {
                entry.row_snapshot = None;
            }
            error_entries.push(entry);
        }
    }

    fn finding_entry(
        &self,
        job_id: &str,
        record: &RawRecord,
        finding: RuleFinding,
    ) -> ExchangeErrorEntry {
        let mut entry = ExchangeErrorEntry::new(
            job_id,
            Some(finding.row_number),
            ErrorEntryType::Validation,
            finding.severity,
            &finding.message,
        );
        entry.field_name = finding.field_name.clone();
        entry.column_name = finding.field_name;
        entry.error_code = Some(finding.error_code);
        entry.rule_code = Some(finding.rule_code);
        entry.offending_value = finding.offending_value;
        entry.expected_value = finding.expected_value;
        entry.row_snapshot = Some(record.to_json());
        entry
    }

    fn row_error_entry(
        &self,
        job_id: &str,
        _profile: &ExchangeProfile,
        record: &RawRecord,
        row_error: &RowError,
    ) -> ExchangeErrorEntry {
        // 必填缺失按校验口径，其余按转换口径
        let error_type = if row_error.error_code == "required" {
            ErrorEntryType::Validation
        } else {
            ErrorEntryType::Transformation
        };
        let mut entry = ExchangeErrorEntry::new(
            job_id,
            Some(row_error.row_number),
            error_type,
            Severity::Error,
            &row_error.message,
        );
        entry.field_name = row_error.field_name.clone();
        entry.column_name = row_error.field_name.clone();
        entry.error_code = Some(row_error.error_code.clone());
        entry.offending_value = row_error.offending_value.clone();
        entry.row_snapshot = Some(record.to_json());
        entry
    }

    fn processing_error_entry(
        &self,
        job_id: &str,
        record: &RawRecord,
        error: &ExchangeError,
    ) -> ExchangeErrorEntry {
        let mut entry = ExchangeErrorEntry::new(
            job_id,
            Some(record.row_number),
            ErrorEntryType::Processing,
            Severity::Error,
            &error.to_string(),
        );
        entry.error_code = Some("entity_persist".to_string());
        entry.row_snapshot = Some(record.to_json());
        entry
    }

    /// 错误上限（None = 不中止）
    ///
    /// - CONTINUE: 仅 strict_validation 时按 max_errors 中止
    /// - STOP/ROLLBACK: 首个错误即中止；strict_validation 时放宽到 max_errors
    fn effective_ceiling(&self, profile: &ExchangeProfile) -> Option<usize> {
        match profile.behavior.on_error {
            ErrorStrategy::Continue => {
                if profile.behavior.strict_validation {
                    Some(profile.behavior.max_errors.max(1))
                } else {
                    None
                }
            }
            ErrorStrategy::Stop | ErrorStrategy::Rollback => {
                if profile.behavior.strict_validation {
                    Some(profile.behavior.max_errors.max(1))
                } else {
                    Some(1)
                }
            }
        }
    }

    fn mark_failed(&self, job: &mut ExchangeJob, message: &str) {
        job.error_message = Some(message.to_string());
        if job.transition_to(JobStatus::Failed) {
            job.finished_at = Some(Utc::now());
        }
        if let Err(e) = self.job_repo.update_job(job) {
            warn!(job_id = %job.job_id, error = %e, "任务失败状态落库失败");
        }
    }

    async fn notify(&self, event: NotificationEvent, job: &ExchangeJob) {
        let recipients: Vec<String> = job
            .options
            .get("notify_recipients")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default();

        let variables = serde_json::json!({
            "job_id": job.job_id,
            "status": job.status.to_string(),
            "total_rows": job.counters.total_rows,
            "processed_rows": job.counters.processed_rows,
            "created": job.counters.created_count,
            "updated": job.counters.updated_count,
            "skipped": job.counters.skipped_count,
            "errors": job.counters.error_count,
            "warnings": job.counters.warning_count,
            "error_message": job.error_message,
        });

        if let Err(e) = self.notifier.send(event, &recipients, &variables).await {
            warn!(job_id = %job.job_id, event = %event, error = %e, "通知发送失败");
        }
    }

}

/// 实体 JSON → 原始行（导出路径复用映射管道）
fn entity_to_raw(row_number: usize, value: &serde_json::Value) -> RawRecord {
    let mut raw = RawRecord::new(row_number);
    if let serde_json::Value::Object(map) = value {
        for (k, v) in map {
            let text = match v {
                serde_json::Value::Null => String::new(),
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            raw.fields.insert(k.clone(), text);
        }
    }
    raw
}

/// UPDATE 动作的字段差异（字段 → [旧, 新]）
fn diff_values(prior: &serde_json::Value, mapped: &MappedRecord) -> serde_json::Value {
    let mut diff = serde_json::Map::new();
    let prior_obj = prior.as_object();
    for (field, value) in mapped.iter() {
        let new_value = value.to_json();
        let old_value = prior_obj
            .and_then(|o| o.get(field))
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        if old_value != new_value {
            diff.insert(
                field.clone(),
                serde_json::Value::Array(vec![old_value, new_value]),
            );
        }
    }
    serde_json::Value::Object(diff)
}
