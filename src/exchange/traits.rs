// ==========================================
// 数据交换引擎 - 引擎接口定义
// ==========================================
// 职责: 定义解析与宿主协作接口（不包含实现）
// 说明: 传输层/表格二进制解析/通知投递均为外部协作者
// ==========================================

use crate::domain::profile::DialectOptions;
use crate::exchange::error::ExchangeResult;
use async_trait::async_trait;
use std::collections::HashMap;

// ==========================================
// RawRecord - 原始行记录
// ==========================================
// 字段名 → 原始字符串值（任何格式解析器的统一输出）
#[derive(Debug, Clone, Default)]
pub struct RawRecord {
    /// 数据行号（1 起，表头不计）
    pub row_number: usize,
    pub fields: HashMap<String, String>,
}

impl RawRecord {
    pub fn new(row_number: usize) -> Self {
        Self {
            row_number,
            fields: HashMap::new(),
        }
    }

    /// 取字段（trim 后非空才返回）
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields
            .get(field)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// 整行是否空白
    pub fn is_blank(&self) -> bool {
        self.fields.values().all(|v| v.trim().is_empty())
    }

    /// 行快照 JSON（错误条目 row_snapshot 口径）
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (k, v) in &self.fields {
            map.insert(k.clone(), serde_json::Value::String(v.clone()));
        }
        serde_json::Value::Object(map)
    }
}

// ==========================================
// FileParser Trait
// ==========================================
// 用途: 文件字节 → 原始行记录序列（纯函数，可重复执行）
// 实现者: CsvParser / ExcelParser / JsonParser / XmlParser / 宿主注册解析器
pub trait FileParser: Send + Sync {
    /// 解析文件字节为原始行记录
    ///
    /// # 失败
    /// - 任何格式错误整体失败，不产出部分结果
    fn parse(&self, bytes: &[u8], dialect: &DialectOptions) -> ExchangeResult<Vec<RawRecord>>;
}

// ==========================================
// SpreadsheetReader Trait
// ==========================================
// 用途: 表格二进制（xlsx/xls）→ 字符串单元格矩阵
// 实现者: CalamineSpreadsheetReader（内置缺省），宿主可替换
pub trait SpreadsheetReader: Send + Sync {
    /// 读取指定工作表为行矩阵（含表头行）
    ///
    /// # 参数
    /// - sheet_name: None = 第一个工作表
    fn read_rows(
        &self,
        bytes: &[u8],
        sheet_name: Option<&str>,
    ) -> ExchangeResult<Vec<Vec<String>>>;
}

// ==========================================
// XmlRowReader Trait
// ==========================================
// 用途: XML 字节 → 行记录；由宿主按 root/row 元素名实现
pub trait XmlRowReader: Send + Sync {
    fn read_rows(
        &self,
        bytes: &[u8],
        root_element: &str,
        row_element: &str,
    ) -> ExchangeResult<Vec<HashMap<String, String>>>;
}

// ==========================================
// Connector Trait
// ==========================================
// 用途: 传输层取/存文件；本地/FTP/SFTP/S3/... 对引擎不可见
#[async_trait]
pub trait Connector: Send + Sync {
    /// 取文件字节
    async fn fetch(&self, path: &str) -> ExchangeResult<Vec<u8>>;

    /// 写文件字节
    async fn store(&self, path: &str, bytes: &[u8]) -> ExchangeResult<()>;
}

// ==========================================
// EntityHandler Trait
// ==========================================
// 用途: 按目标实体类型的能力接口（宿主按实体类型各实现一次，
//       注册到 EntityHandlerRegistry，编排器按 entity_type 标签查找）
#[async_trait]
pub trait EntityHandler: Send + Sync {
    /// 创建实体
    ///
    /// # 返回
    /// - Ok(String): 新实体 id
    async fn create(
        &self,
        record: &crate::domain::value::MappedRecord,
    ) -> ExchangeResult<String>;

    /// 更新实体
    async fn update(
        &self,
        entity_id: &str,
        record: &crate::domain::value::MappedRecord,
    ) -> ExchangeResult<()>;

    /// 按条件查找既有实体（重复判定）
    ///
    /// # 参数
    /// - criteria: key 字段 → 映射值（全部相等才算命中）
    async fn find(
        &self,
        criteria: &[(String, crate::domain::value::FieldValue)],
    ) -> ExchangeResult<Option<String>>;

    /// 读取实体当前值（回滚 prior 捕获与 diff 计算）
    async fn get(&self, entity_id: &str) -> ExchangeResult<Option<serde_json::Value>>;

    /// 删除实体（回滚 CREATED 条目）
    async fn delete(&self, entity_id: &str) -> ExchangeResult<()>;

    /// 查询实体列表（导出）
    ///
    /// # 参数
    /// - filters: 宿主解释的过滤条件
    /// - fields: 需要的字段名（空 = 全部）
    async fn list(
        &self,
        filters: &serde_json::Value,
        fields: &[String],
        limit: i64,
        offset: i64,
    ) -> ExchangeResult<Vec<serde_json::Value>>;
}

// ==========================================
// ReferenceLookup Trait
// ==========================================
// 用途: reference 规则的存在性检查（委托宿主实体查询）
#[async_trait]
pub trait ReferenceLookup: Send + Sync {
    /// 目标实体中是否存在 field=value 的记录
    async fn exists(&self, entity_type: &str, field: &str, value: &str) -> ExchangeResult<bool>;
}

/// 空实现（无 reference 规则场景/测试用）: 一律视为存在
pub struct NoReferenceLookup;

#[async_trait]
impl ReferenceLookup for NoReferenceLookup {
    async fn exists(&self, _entity_type: &str, _field: &str, _value: &str) -> ExchangeResult<bool> {
        Ok(true)
    }
}

// ==========================================
// 通知事件
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationEvent {
    JobStarted,
    JobCompleted,
    JobFailed,
    JobWarning,
}

impl std::fmt::Display for NotificationEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationEvent::JobStarted => write!(f, "JOB_STARTED"),
            NotificationEvent::JobCompleted => write!(f, "JOB_COMPLETED"),
            NotificationEvent::JobFailed => write!(f, "JOB_FAILED"),
            NotificationEvent::JobWarning => write!(f, "JOB_WARNING"),
        }
    }
}

// ==========================================
// Notifier Trait
// ==========================================
// 用途: 任务开始/完成/失败/告警通知；投递渠道由宿主实现
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(
        &self,
        event: NotificationEvent,
        recipients: &[String],
        variables: &serde_json::Value,
    ) -> ExchangeResult<()>;
}

/// 空实现（未配置通知时使用）
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn send(
        &self,
        _event: NotificationEvent,
        _recipients: &[String],
        _variables: &serde_json::Value,
    ) -> ExchangeResult<()> {
        Ok(())
    }
}
