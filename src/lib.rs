// ==========================================
// 数据交换引擎 - 核心库
// ==========================================
// 定位: 租户级结构化数据导入导出管道
// 流程: 解析 → 映射/转换 → 校验 → 重复判定 → 落实体 → 可回滚
// 技术栈: Rust + SQLite；传输/通知/实体持久化由宿主实现
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 交换管道层 - 解析/映射/校验
pub mod exchange;

// 引擎层 - 编排/导出/回滚/定时
pub mod engine;

// 配置层 - 引擎运行参数
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一/表结构）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 业务接口
pub mod api;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{
    DuplicateStrategy, ErrorEntryType, ErrorStrategy, ExchangeDirection, FieldType, FileFormat,
    JobPhase, JobStatus, RowAction, RuleStage, Severity,
};

// 领域实体
pub use domain::{
    BehaviorOptions, DialectOptions, ExchangeErrorEntry, ExchangeJob, ExchangeLogEntry,
    ExchangeProfile, FieldMapping, FieldValue, JobCounters, LookupTable, MappedRecord,
    RollbackEntry, RuleConfig, ScheduledExchange, TransformConfig, Transformation, ValidationRule,
};

// 引擎
pub use engine::{
    EntityHandlerRegistry, ExchangeOrchestrator, Exporter, ImportSource, RollbackManager,
    ScheduledExchangeService,
};

// 管道组件
pub use exchange::{
    DuplicateResolver, ExchangeError, ExchangeResult, FieldMapper, LookupStore, ParserRegistry,
    Transformer, ValidationEngine,
};

// API
pub use api::{JobApi, ProfileApi, ScheduleApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "数据交换引擎";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
