// ==========================================
// 数据交换引擎 - 交换配置实体
// ==========================================
// 职责: Profile / FieldMapping / ValidationRule / Transformation 定义
// 约束: code 租户内唯一; is_system 配置不可修改/删除
// 约束: 转换与规则配置为带标签联合类型，禁止无类型键值包
// ==========================================

use crate::domain::types::{
    DuplicateStrategy, ErrorStrategy, ExchangeDirection, FieldType, FileFormat, RuleStage,
    Severity,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ==========================================
// DialectOptions - 文件方言选项
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialectOptions {
    /// 文件编码（当前仅 UTF-8 原生支持，其余由宿主预转码）
    pub encoding: String,
    /// CSV 分隔符
    pub delimiter: char,
    /// CSV 引号字符
    pub quote: char,
    /// 首行是否为表头；false 时合成 column_1..column_n
    pub has_header: bool,
    /// 数据前跳过的行数
    pub skip_rows: usize,
    /// Excel 工作表名（None = 第一个）
    pub sheet_name: Option<String>,
    /// XML 根元素名
    pub xml_root: Option<String>,
    /// XML 行元素名
    pub xml_row: Option<String>,
    /// JSON 根路径（None = 顶层数组或惯例键 data/items/records/rows）
    pub json_root_path: Option<String>,
    /// 日期格式（chrono 格式串）
    pub date_format: String,
    /// 日期时间格式（chrono 格式串）
    pub datetime_format: String,
    /// 小数分隔符
    pub decimal_separator: char,
    /// 千分位分隔符（None = 无）
    pub thousands_separator: Option<char>,
    /// 布尔真值集合（比较时不区分大小写）
    pub truthy_values: Vec<String>,
    /// 布尔假值集合（比较时不区分大小写）
    pub falsy_values: Vec<String>,
}

impl Default for DialectOptions {
    fn default() -> Self {
        Self {
            encoding: "UTF-8".to_string(),
            delimiter: ',',
            quote: '"',
            has_header: true,
            skip_rows: 0,
            sheet_name: None,
            xml_root: None,
            xml_row: None,
            json_root_path: None,
            date_format: "%Y-%m-%d".to_string(),
            datetime_format: "%Y-%m-%d %H:%M:%S".to_string(),
            decimal_separator: '.',
            thousands_separator: None,
            truthy_values: vec![
                "1".to_string(),
                "true".to_string(),
                "yes".to_string(),
                "y".to_string(),
                "是".to_string(),
            ],
            falsy_values: vec![
                "0".to_string(),
                "false".to_string(),
                "no".to_string(),
                "n".to_string(),
                "否".to_string(),
            ],
        }
    }
}

// ==========================================
// BehaviorOptions - 行为选项
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorOptions {
    pub on_duplicate: DuplicateStrategy,
    pub on_error: ErrorStrategy,
    /// 批大小（取消点在批间检查）
    pub batch_size: usize,
    /// 是否记录回滚数据
    pub rollback_enabled: bool,
    /// 严格校验：ERROR 达到 max_errors 即中止
    pub strict_validation: bool,
    /// 是否在处理前整体跑一遍校验阶段
    pub validate_before_import: bool,
    /// 错误上限（strict_validation 或 on_error=STOP 时生效）
    pub max_errors: usize,
}

impl Default for BehaviorOptions {
    fn default() -> Self {
        Self {
            on_duplicate: DuplicateStrategy::Skip,
            on_error: ErrorStrategy::Continue,
            batch_size: 100,
            rollback_enabled: true,
            strict_validation: false,
            validate_before_import: true,
            max_errors: 100,
        }
    }
}

// ==========================================
// FieldMapping - 字段映射
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMapping {
    pub mapping_id: String,
    pub profile_id: String,
    pub source_field: String,
    pub target_field: String,
    pub source_type: FieldType,
    pub target_type: FieldType,
    pub required: bool,
    /// key 字段参与重复判定条件
    pub is_key: bool,
    pub default_value: Option<String>,
    /// 引用 Transformation.code
    pub transformation_code: Option<String>,
    /// 求值顺序（formula/concat 等可读取已计算的兄弟字段）
    pub sort_order: i32,
}

impl FieldMapping {
    pub fn new(profile_id: &str, source_field: &str, target_field: &str) -> Self {
        Self {
            mapping_id: uuid::Uuid::new_v4().to_string(),
            profile_id: profile_id.to_string(),
            source_field: source_field.to_string(),
            target_field: target_field.to_string(),
            source_type: FieldType::String,
            target_type: FieldType::String,
            required: false,
            is_key: false,
            default_value: None,
            transformation_code: None,
            sort_order: 0,
        }
    }
}

// ==========================================
// RuleConfig - 校验规则配置（带标签联合）
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleConfig {
    /// 值存在且非空
    Required,
    /// 文件内该字段值不得重复
    Unique,
    /// 全串正则匹配
    Regex { pattern: String },
    MinLength { min: usize },
    MaxLength { max: usize },
    /// 数值下限（转换后比较）
    MinValue { min: f64 },
    /// 数值上限（转换后比较）
    MaxValue { max: f64 },
    /// 值集合成员判定
    Enum { values: Vec<String> },
    /// 引用存在性检查（委托宿主实体处理器 find）
    Reference {
        entity_type: String,
        field: String,
    },
    /// 宿主注册的自定义谓词
    Custom { code: String },
}

impl RuleConfig {
    /// 规则类型标识（错误条目 error_code 口径）
    pub fn kind_name(&self) -> &'static str {
        match self {
            RuleConfig::Required => "required",
            RuleConfig::Unique => "unique",
            RuleConfig::Regex { .. } => "regex",
            RuleConfig::MinLength { .. } => "min_length",
            RuleConfig::MaxLength { .. } => "max_length",
            RuleConfig::MinValue { .. } => "min_value",
            RuleConfig::MaxValue { .. } => "max_value",
            RuleConfig::Enum { .. } => "enum",
            RuleConfig::Reference { .. } => "reference",
            RuleConfig::Custom { .. } => "custom",
        }
    }
}

// ==========================================
// ValidationRule - 校验规则
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRule {
    pub rule_id: String,
    pub profile_id: String,
    pub code: String,
    /// None = 行级规则
    pub field_name: Option<String>,
    pub config: RuleConfig,
    pub severity: Severity,
    /// 命中后跳过该行后续规则（不影响其他行）
    pub stop_on_fail: bool,
    /// RAW: 映射前按源字段; MAPPED: 映射后按目标字段
    pub stage: RuleStage,
    /// 自定义消息（None = 按规则类型生成）
    pub message: Option<String>,
    pub sort_order: i32,
}

impl ValidationRule {
    pub fn new(profile_id: &str, code: &str, field: Option<&str>, config: RuleConfig) -> Self {
        Self {
            rule_id: uuid::Uuid::new_v4().to_string(),
            profile_id: profile_id.to_string(),
            code: code.to_string(),
            field_name: field.map(|s| s.to_string()),
            config,
            severity: Severity::Error,
            stop_on_fail: false,
            stage: RuleStage::Raw,
            message: None,
            sort_order: 0,
        }
    }
}

// ==========================================
// TransformConfig - 转换配置（带标签联合）
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformConfig {
    Uppercase,
    Lowercase,
    Trim,
    /// 子串/正则替换
    Replace {
        pattern: String,
        replacement: String,
        #[serde(default)]
        is_regex: bool,
    },
    /// 日期重排版（输入已是 Date/DateTime 值）
    FormatDate { format: String },
    /// 数值重排版
    FormatNumber {
        decimals: usize,
        decimal_separator: char,
        thousands_separator: Option<char>,
    },
    /// 查找表转换（引用 LookupTable.code）
    Lookup { table_code: String },
    /// 数值公式，可引用同行其他字段（fasteval 语法）
    Formula { expression: String },
    /// 多字段拼接
    Concat {
        fields: Vec<String>,
        separator: String,
    },
    /// 拆分后取第 index 段
    Split { delimiter: String, index: usize },
    /// 内联值映射
    Map {
        entries: HashMap<String, String>,
        default: Option<String>,
        #[serde(default = "default_true")]
        case_sensitive: bool,
    },
    /// 宿主注册的自定义转换
    Custom { code: String },
}

fn default_true() -> bool {
    true
}

impl TransformConfig {
    pub fn kind_name(&self) -> &'static str {
        match self {
            TransformConfig::Uppercase => "uppercase",
            TransformConfig::Lowercase => "lowercase",
            TransformConfig::Trim => "trim",
            TransformConfig::Replace { .. } => "replace",
            TransformConfig::FormatDate { .. } => "format_date",
            TransformConfig::FormatNumber { .. } => "format_number",
            TransformConfig::Lookup { .. } => "lookup",
            TransformConfig::Formula { .. } => "formula",
            TransformConfig::Concat { .. } => "concat",
            TransformConfig::Split { .. } => "split",
            TransformConfig::Map { .. } => "map",
            TransformConfig::Custom { .. } => "custom",
        }
    }
}

// ==========================================
// Transformation - 命名转换
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transformation {
    pub transformation_id: String,
    pub profile_id: String,
    pub code: String,
    pub name: String,
    pub config: TransformConfig,
    pub sort_order: i32,
}

impl Transformation {
    pub fn new(profile_id: &str, code: &str, config: TransformConfig) -> Self {
        Self {
            transformation_id: uuid::Uuid::new_v4().to_string(),
            profile_id: profile_id.to_string(),
            code: code.to_string(),
            name: code.to_string(),
            config,
            sort_order: 0,
        }
    }
}

// ==========================================
// ExchangeProfile - 交换配置
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeProfile {
    pub profile_id: String,
    pub tenant_id: String,
    /// 租户内唯一
    pub code: String,
    pub name: String,
    pub direction: ExchangeDirection,
    pub file_format: FileFormat,
    /// file_format=CUSTOM 时的注册解析器名（银行格式等）
    pub custom_format: Option<String>,
    /// 目标实体类型标签（contacts/invoices/products/...）
    pub entity_type: String,
    pub dialect: DialectOptions,
    pub behavior: BehaviorOptions,
    /// 系统内置配置不可修改/删除
    pub is_system: bool,
    /// 软删除标记（历史任务仍引用）
    pub is_deleted: bool,
    /// 按 sort_order 升序
    pub mappings: Vec<FieldMapping>,
    /// 按 sort_order 升序
    pub rules: Vec<ValidationRule>,
    pub transformations: Vec<Transformation>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExchangeProfile {
    pub fn new(tenant_id: &str, code: &str, direction: ExchangeDirection, entity_type: &str) -> Self {
        let now = Utc::now();
        Self {
            profile_id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            code: code.to_string(),
            name: code.to_string(),
            direction,
            file_format: FileFormat::Csv,
            custom_format: None,
            entity_type: entity_type.to_string(),
            dialect: DialectOptions::default(),
            behavior: BehaviorOptions::default(),
            is_system: false,
            is_deleted: false,
            mappings: Vec::new(),
            rules: Vec::new(),
            transformations: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// key 字段映射（重复判定条件来源）
    pub fn key_mappings(&self) -> Vec<&FieldMapping> {
        self.mappings.iter().filter(|m| m.is_key).collect()
    }

    /// 按 code 查命名转换
    pub fn find_transformation(&self, code: &str) -> Option<&Transformation> {
        self.transformations.iter().find(|t| t.code == code)
    }

    /// 映射/规则按 sort_order 重排（仓储读取后调用）
    pub fn sort_members(&mut self) {
        self.mappings.sort_by_key(|m| m.sort_order);
        self.rules.sort_by_key(|r| r.sort_order);
        self.transformations.sort_by_key(|t| t.sort_order);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_key_mappings() {
        let mut profile =
            ExchangeProfile::new("t1", "contacts_import", ExchangeDirection::Import, "contacts");
        let mut m1 = FieldMapping::new(&profile.profile_id, "Email", "email");
        m1.is_key = true;
        let m2 = FieldMapping::new(&profile.profile_id, "Name", "name");
        profile.mappings = vec![m1, m2];

        assert_eq!(profile.key_mappings().len(), 1);
        assert_eq!(profile.key_mappings()[0].target_field, "email");
    }

    #[test]
    fn test_rule_config_tagged_serde() {
        let config = RuleConfig::Regex {
            pattern: "^[a-z]+$".to_string(),
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"kind\":\"regex\""));

        let back: RuleConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind_name(), "regex");
    }

    #[test]
    fn test_transform_config_tagged_serde() {
        let config = TransformConfig::Lookup {
            table_code: "country_names".to_string(),
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["kind"], "lookup");
        assert_eq!(json["table_code"], "country_names");
    }

    #[test]
    fn test_sort_members() {
        let mut profile =
            ExchangeProfile::new("t1", "p", ExchangeDirection::Import, "contacts");
        let mut a = FieldMapping::new(&profile.profile_id, "B", "b");
        a.sort_order = 2;
        let mut b = FieldMapping::new(&profile.profile_id, "A", "a");
        b.sort_order = 1;
        profile.mappings = vec![a, b];
        profile.sort_members();
        assert_eq!(profile.mappings[0].target_field, "a");
    }
}
