// ==========================================
// 数据交换引擎 - 交换管道错误类型
// ==========================================
// 工具: thiserror 派生宏
// 约束: 行级失败是数据（ExchangeErrorEntry），不走本错误类型；
//       此处仅承载任务级/配置级失败
// ==========================================

use thiserror::Error;

/// 交换管道错误类型
#[derive(Error, Debug)]
pub enum ExchangeError {
    // ===== 文件相关错误 =====
    #[error("文件不存在: {0}")]
    FileNotFound(String),

    #[error("文件格式不支持: {0}")]
    UnsupportedFormat(String),

    #[error("文件读取失败: {0}")]
    FileReadError(String),

    #[error("文件写入失败: {0}")]
    FileWriteError(String),

    #[error("文件过大: {size} 字节（上限 {limit} 字节）")]
    FileTooLarge { size: usize, limit: usize },

    #[error("编码转换失败: {0}")]
    EncodingError(String),

    #[error("CSV 解析失败: {0}")]
    CsvParseError(String),

    #[error("Excel 解析失败: {0}")]
    ExcelParseError(String),

    #[error("JSON 解析失败: {0}")]
    JsonParseError(String),

    #[error("XML 解析失败: {0}")]
    XmlParseError(String),

    // ===== 配置错误（在配置校验阶段暴露，不落行级错误）=====
    #[error("交换配置不合法: {0}")]
    ProfileMisconfigured(String),

    #[error("重复策略 {strategy} 需要至少一个 key 字段映射")]
    NoKeyFieldForStrategy { strategy: String },

    #[error("转换未定义: {0}")]
    TransformationNotFound(String),

    #[error("查找表不存在: {0}")]
    LookupTableNotFound(String),

    #[error("实体类型未注册处理器: {0}")]
    EntityHandlerNotFound(String),

    #[error("自定义解析器未注册: {0}")]
    CustomParserNotFound(String),

    // ===== 运行期任务级错误 =====
    #[error("任务已取消")]
    Cancelled,

    #[error("同配置存在运行中的任务: {job_id}")]
    JobAlreadyRunning { job_id: String },

    #[error("任务不可回滚（状态 {status} 或无回滚数据）")]
    NotRollbackEligible { status: String },

    #[error("定时交换已停用: {0}")]
    ScheduleInactive(String),

    #[error("校验错误达到上限 {limit}，任务中止")]
    ErrorCeilingReached { limit: usize },

    #[error("连接器取文件失败: {0}")]
    ConnectorFetchError(String),

    #[error("连接器写文件失败: {0}")]
    ConnectorStoreError(String),

    // ===== 回滚错误 =====
    #[error("回滚失败于实体 {entity_type}/{entity_id}（已回退 {reverted} 条）: {message}")]
    RollbackFailed {
        entity_type: String,
        entity_id: String,
        reverted: usize,
        message: String,
    },

    // ===== 通用错误 =====
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Repository(#[from] crate::repository::RepositoryError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// 实现 From<std::io::Error>
impl From<std::io::Error> for ExchangeError {
    fn from(err: std::io::Error) -> Self {
        ExchangeError::FileReadError(err.to_string())
    }
}

// 实现 From<csv::Error>
impl From<csv::Error> for ExchangeError {
    fn from(err: csv::Error) -> Self {
        ExchangeError::CsvParseError(err.to_string())
    }
}

// 实现 From<calamine::Error>
impl From<calamine::Error> for ExchangeError {
    fn from(err: calamine::Error) -> Self {
        ExchangeError::ExcelParseError(err.to_string())
    }
}

// 实现 From<serde_json::Error>
impl From<serde_json::Error> for ExchangeError {
    fn from(err: serde_json::Error) -> Self {
        ExchangeError::JsonParseError(err.to_string())
    }
}

/// Result 类型别名
pub type ExchangeResult<T> = Result<T, ExchangeError>;
