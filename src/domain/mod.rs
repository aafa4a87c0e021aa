// ==========================================
// 数据交换引擎 - 领域层
// ==========================================
// 职责: 实体与类型定义，不含持久化与业务编排
// ==========================================

pub mod job;
pub mod lookup;
pub mod profile;
pub mod schedule;
pub mod types;
pub mod value;

// 重导出核心类型
pub use job::{ExchangeErrorEntry, ExchangeJob, ExchangeLogEntry, JobCounters, RollbackEntry};
pub use lookup::LookupTable;
pub use profile::{
    BehaviorOptions, DialectOptions, ExchangeProfile, FieldMapping, RuleConfig, TransformConfig,
    Transformation, ValidationRule,
};
pub use schedule::ScheduledExchange;
pub use types::{
    DuplicateStrategy, ErrorEntryType, ErrorStrategy, ExchangeDirection, FieldType, FileFormat,
    JobPhase, JobStatus, RowAction, RuleStage, Severity,
};
pub use value::{FieldValue, MappedRecord};
