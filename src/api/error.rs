// ==========================================
// 数据交换引擎 - API 层错误类型
// ==========================================
// 职责: 定义 API 层错误类型，转换下层错误为用户友好的错误消息
// 约束: 所有错误信息必须包含显式原因
// ==========================================

use crate::exchange::error::ExchangeError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// API 层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 业务规则错误
    // ==========================================
    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("编码重复: {0}")]
    DuplicateCode(String),

    #[error("系统内置配置不可修改或删除: {0}")]
    SystemProfileImmutable(String),

    #[error("配置被历史任务引用，已改为软删除: {0}")]
    ProfileInUse(String),

    // ==========================================
    // 任务状态错误
    // ==========================================
    #[error("任务当前状态不可取消: {status}")]
    JobNotCancellable { status: String },

    #[error("同配置存在运行中的任务: {0}")]
    JobAlreadyRunning(String),

    #[error("任务不可回滚: {0}")]
    NotRollbackEligible(String),

    #[error("任务已回滚，不可重复回滚: {0}")]
    AlreadyRolledBack(String),

    // ==========================================
    // 导入导出错误
    // ==========================================
    #[error("导入失败: {0}")]
    ImportError(String),

    #[error("导出失败: {0}")]
    ExportError(String),

    #[error("数据验证失败: {0}")]
    ValidationError(String),

    #[error("回滚失败: {0}")]
    RollbackError(String),

    // ==========================================
    // 数据访问错误
    // ==========================================
    #[error("数据库错误: {0}")]
    DatabaseError(String),

    // ==========================================
    // 通用错误
    // ==========================================
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ==========================================
// 从 RepositoryError 转换
// 目的: 将仓储层的技术错误转换为用户友好的业务错误
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{} (id={})", entity, id))
            }
            RepositoryError::DuplicateCode { entity, code } => {
                ApiError::DuplicateCode(format!("{} code={}", entity, code))
            }
            RepositoryError::UniqueConstraintViolation(msg) => ApiError::DuplicateCode(msg),
            RepositoryError::FieldValueError { field, message } => {
                ApiError::InvalidInput(format!("{}: {}", field, message))
            }
            RepositoryError::InvalidStateTransition { from, to } => {
                ApiError::InvalidInput(format!("非法状态转换: {} → {}", from, to))
            }
            other => ApiError::DatabaseError(other.to_string()),
        }
    }
}

// ==========================================
// 从 ExchangeError 转换
// ==========================================
impl From<ExchangeError> for ApiError {
    fn from(err: ExchangeError) -> Self {
        match err {
            ExchangeError::JobAlreadyRunning { job_id } => ApiError::JobAlreadyRunning(job_id),
            ExchangeError::NotRollbackEligible { status } => {
                if status == "ROLLED_BACK" {
                    ApiError::AlreadyRolledBack(status)
                } else {
                    ApiError::NotRollbackEligible(status)
                }
            }
            ExchangeError::RollbackFailed { .. } => ApiError::RollbackError(err.to_string()),
            ExchangeError::NoKeyFieldForStrategy { .. }
            | ExchangeError::ProfileMisconfigured(_)
            | ExchangeError::TransformationNotFound(_)
            | ExchangeError::LookupTableNotFound(_)
            | ExchangeError::CustomParserNotFound(_)
            | ExchangeError::ScheduleInactive(_) => ApiError::InvalidInput(err.to_string()),
            ExchangeError::Repository(repo_err) => ApiError::from(repo_err),
            other => ApiError::ImportError(other.to_string()),
        }
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;
