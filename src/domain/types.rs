// ==========================================
// 数据交换引擎 - 领域类型定义
// ==========================================
// 职责: 交换方向/文件格式/任务状态机/处理策略等枚举
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 交换方向 (Exchange Direction)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExchangeDirection {
    Import, // 文件 → 实体
    Export, // 实体 → 文件
}

impl fmt::Display for ExchangeDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeDirection::Import => write!(f, "IMPORT"),
            ExchangeDirection::Export => write!(f, "EXPORT"),
        }
    }
}

// ==========================================
// 文件格式 (File Format)
// ==========================================
// CUSTOM 格式通过 ParserRegistry 注册的解析器处理（银行对账单等）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileFormat {
    Csv,
    Excel,
    Json,
    Xml,
    Custom,
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileFormat::Csv => write!(f, "CSV"),
            FileFormat::Excel => write!(f, "EXCEL"),
            FileFormat::Json => write!(f, "JSON"),
            FileFormat::Xml => write!(f, "XML"),
            FileFormat::Custom => write!(f, "CUSTOM"),
        }
    }
}

// ==========================================
// 任务状态 (Job Status)
// ==========================================
// 状态机: DRAFT → PENDING → VALIDATING → PROCESSING
//         → {COMPLETED | PARTIAL | FAILED | CANCELLED} → ROLLED_BACK
// 红线: 状态转换单调，禁止回退
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Draft,      // 草稿（未提交）
    Pending,    // 待执行
    Validating, // 校验阶段
    Processing, // 逐批处理阶段
    Completed,  // 全部成功
    Partial,    // 部分成功（error_count > 0）
    Failed,     // 失败（系统错误或 stop 策略触发）
    Cancelled,  // 人工取消
    RolledBack, // 已回滚
}

impl JobStatus {
    /// 状态转换合法性判定
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Draft, Pending)
                | (Pending, Validating)
                | (Pending, Processing)
                | (Pending, Failed)
                | (Validating, Processing)
                | (Validating, Failed)
                | (Processing, Completed)
                | (Processing, Partial)
                | (Processing, Failed)
                | (Pending, Cancelled)
                | (Validating, Cancelled)
                | (Processing, Cancelled)
                | (Completed, RolledBack)
                | (Partial, RolledBack)
        )
    }

    /// 是否为终态
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed
                | JobStatus::Partial
                | JobStatus::Failed
                | JobStatus::Cancelled
                | JobStatus::RolledBack
        )
    }

    /// 是否允许取消（仅 PENDING/VALIDATING/PROCESSING）
    pub fn can_cancel(self) -> bool {
        matches!(
            self,
            JobStatus::Pending | JobStatus::Validating | JobStatus::Processing
        )
    }

    /// 是否允许回滚（仅 COMPLETED/PARTIAL）
    pub fn can_rollback(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Partial)
    }

    /// 是否为活动状态（用于"同一 profile+connector 仅一个活动任务"判定）
    pub fn is_active(self) -> bool {
        matches!(
            self,
            JobStatus::Pending | JobStatus::Validating | JobStatus::Processing
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Draft => write!(f, "DRAFT"),
            JobStatus::Pending => write!(f, "PENDING"),
            JobStatus::Validating => write!(f, "VALIDATING"),
            JobStatus::Processing => write!(f, "PROCESSING"),
            JobStatus::Completed => write!(f, "COMPLETED"),
            JobStatus::Partial => write!(f, "PARTIAL"),
            JobStatus::Failed => write!(f, "FAILED"),
            JobStatus::Cancelled => write!(f, "CANCELLED"),
            JobStatus::RolledBack => write!(f, "ROLLED_BACK"),
        }
    }
}

// ==========================================
// 任务阶段 (Job Phase)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobPhase {
    Fetch,    // 取文件字节
    Parse,    // 解析为原始行
    Validate, // 校验
    Process,  // 映射/转换/落实体
    Write,    // 导出写文件
    Finalize, // 汇总收尾
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobPhase::Fetch => write!(f, "FETCH"),
            JobPhase::Parse => write!(f, "PARSE"),
            JobPhase::Validate => write!(f, "VALIDATE"),
            JobPhase::Process => write!(f, "PROCESS"),
            JobPhase::Write => write!(f, "WRITE"),
            JobPhase::Finalize => write!(f, "FINALIZE"),
        }
    }
}

// ==========================================
// 重复处理策略 (Duplicate Strategy)
// ==========================================
// 仅当 profile 配置了 key 字段时 UPDATE/REJECT 才合法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DuplicateStrategy {
    Skip,      // 跳过，计入 skipped
    Update,    // 更新既有实体
    Reject,    // 记为 duplicate 错误
    CreateNew, // 忽略匹配，照常新建
}

impl fmt::Display for DuplicateStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DuplicateStrategy::Skip => write!(f, "SKIP"),
            DuplicateStrategy::Update => write!(f, "UPDATE"),
            DuplicateStrategy::Reject => write!(f, "REJECT"),
            DuplicateStrategy::CreateNew => write!(f, "CREATE_NEW"),
        }
    }
}

// ==========================================
// 错误处理策略 (Error Strategy)
// ==========================================
// ROLLBACK: 标记 FAILED 后由调用方显式发起回滚（无隐式事务中止）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorStrategy {
    Continue, // 行级错误累积，任务继续
    Stop,     // 达到错误上限即中止
    Rollback, // 中止并等待显式回滚
}

impl fmt::Display for ErrorStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorStrategy::Continue => write!(f, "CONTINUE"),
            ErrorStrategy::Stop => write!(f, "STOP"),
            ErrorStrategy::Rollback => write!(f, "ROLLBACK"),
        }
    }
}

// ==========================================
// 严重级别 (Severity)
// ==========================================
// 仅 ERROR 计入 error_count 并参与中止判定
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Warning => write!(f, "WARNING"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}

// ==========================================
// 行处理动作 (Row Action)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RowAction {
    Created,
    Updated,
    Skipped,
    Failed,
}

impl fmt::Display for RowAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowAction::Created => write!(f, "CREATED"),
            RowAction::Updated => write!(f, "UPDATED"),
            RowAction::Skipped => write!(f, "SKIPPED"),
            RowAction::Failed => write!(f, "FAILED"),
        }
    }
}

// ==========================================
// 错误条目类型 (Error Entry Type)
// ==========================================
// 序列化为小写（错误报表口径）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorEntryType {
    Validation,     // 校验规则失败
    Transformation, // 类型转换/转换器失败
    Duplicate,      // 重复策略 REJECT 命中
    Processing,     // 实体 create/update 失败
    File,           // 文件级失败
}

impl fmt::Display for ErrorEntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorEntryType::Validation => write!(f, "validation"),
            ErrorEntryType::Transformation => write!(f, "transformation"),
            ErrorEntryType::Duplicate => write!(f, "duplicate"),
            ErrorEntryType::Processing => write!(f, "processing"),
            ErrorEntryType::File => write!(f, "file"),
        }
    }
}

// ==========================================
// 字段数据类型 (Field Data Type)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldType {
    String,
    Integer,
    Decimal,
    Date,
    DateTime,
    Boolean,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::String => write!(f, "STRING"),
            FieldType::Integer => write!(f, "INTEGER"),
            FieldType::Decimal => write!(f, "DECIMAL"),
            FieldType::Date => write!(f, "DATE"),
            FieldType::DateTime => write!(f, "DATETIME"),
            FieldType::Boolean => write!(f, "BOOLEAN"),
        }
    }
}

// ==========================================
// 校验阶段 (Rule Stage)
// ==========================================
// RAW: 映射前对源字段原始值校验; MAPPED: 映射后对目标字段校验
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleStage {
    Raw,
    Mapped,
}

impl fmt::Display for RuleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleStage::Raw => write!(f, "RAW"),
            RuleStage::Mapped => write!(f, "MAPPED"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_machine_forward_only() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Validating));
        assert!(JobStatus::Validating.can_transition_to(JobStatus::Processing));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Partial));
        // 禁止回退
        assert!(!JobStatus::Processing.can_transition_to(JobStatus::Validating));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Processing));
    }

    #[test]
    fn test_status_cancel_window() {
        assert!(JobStatus::Pending.can_cancel());
        assert!(JobStatus::Processing.can_cancel());
        assert!(!JobStatus::Draft.can_cancel());
        assert!(!JobStatus::Completed.can_cancel());
        assert!(!JobStatus::RolledBack.can_cancel());
    }

    #[test]
    fn test_status_rollback_eligibility() {
        assert!(JobStatus::Completed.can_rollback());
        assert!(JobStatus::Partial.can_rollback());
        assert!(!JobStatus::Draft.can_rollback());
        assert!(!JobStatus::Failed.can_rollback());
        assert!(!JobStatus::RolledBack.can_rollback());
    }

    #[test]
    fn test_validate_before_import_skip_path() {
        // validate_before_import=false 时: PENDING → PROCESSING 直达
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Processing));
    }

    #[test]
    fn test_error_entry_type_lowercase() {
        assert_eq!(ErrorEntryType::Validation.to_string(), "validation");
        assert_eq!(
            serde_json::to_string(&ErrorEntryType::Duplicate).unwrap(),
            "\"duplicate\""
        );
    }
}
