// ==========================================
// 数据交换引擎 - 交换管道层
// ==========================================
// 职责: 文件解析 → 字段映射/转换 → 校验 → 重复判定
// 流程: 解析 → 映射 → 校验 → 重复判定 → 落实体（编排见 engine 层）
// ==========================================

// 模块声明
pub mod duplicate_resolver;
pub mod error;
pub mod field_mapper;
pub mod file_parser;
pub mod profile_check;
pub mod traits;
pub mod transformer;
pub mod validator;

// 重导出核心类型
pub use duplicate_resolver::{DuplicateDecision, DuplicateResolver};
pub use error::{ExchangeError, ExchangeResult};
pub use field_mapper::{FieldMapper, RowError};
pub use file_parser::{
    CalamineSpreadsheetReader, CsvParser, ExcelParser, JsonParser, ParserRegistry, XmlParser,
};
pub use profile_check::validate_profile;
pub use transformer::{CustomTransform, LookupStore, Transformer};
pub use validator::{BatchValidation, CustomRule, RowValidation, RuleFinding, ValidationEngine};

// 重导出宿主协作接口
pub use traits::{
    Connector, EntityHandler, FileParser, NoopNotifier, NotificationEvent, Notifier, RawRecord,
    ReferenceLookup, SpreadsheetReader, XmlRowReader,
};
