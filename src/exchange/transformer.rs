// ==========================================
// 数据交换引擎 - 转换器实现
// ==========================================
// 职责: 按 TransformConfig 对已转换值做数据整形
// 说明: uppercase/lowercase/trim 为单字段终结操作；
//       formula/concat/split/map/custom 基于整行求值，可引用已计算的兄弟字段
// ==========================================

use crate::domain::lookup::LookupTable;
use crate::domain::profile::{DialectOptions, TransformConfig};
use crate::domain::value::{FieldValue, MappedRecord};
use crate::exchange::traits::RawRecord;
use std::collections::HashMap;
use std::sync::Arc;

// ==========================================
// LookupStore - 任务级查找表缓存
// ==========================================
// 任务启动时从仓储整体加载（租户范围），生命周期绑定单次执行
#[derive(Default)]
pub struct LookupStore {
    tables: HashMap<String, LookupTable>,
}

impl LookupStore {
    pub fn from_tables(tables: Vec<LookupTable>) -> Self {
        Self {
            tables: tables.into_iter().map(|t| (t.code.clone(), t)).collect(),
        }
    }

    pub fn get(&self, code: &str) -> Option<&LookupTable> {
        self.tables.get(code)
    }

    pub fn contains(&self, code: &str) -> bool {
        self.tables.contains_key(code)
    }
}

// ==========================================
// CustomTransform Trait
// ==========================================
// 宿主注册的自定义转换（按 code 查找）
pub trait CustomTransform: Send + Sync {
    fn apply(
        &self,
        value: &FieldValue,
        record: &MappedRecord,
        raw: &RawRecord,
    ) -> Result<FieldValue, String>;
}

// ==========================================
// Transformer - 转换执行器
// ==========================================
pub struct Transformer {
    customs: HashMap<String, Arc<dyn CustomTransform>>,
}

impl Default for Transformer {
    fn default() -> Self {
        Self::new()
    }
}

impl Transformer {
    pub fn new() -> Self {
        Self {
            customs: HashMap::new(),
        }
    }

    pub fn register_custom(&mut self, code: &str, transform: Arc<dyn CustomTransform>) {
        self.customs.insert(code.to_string(), transform);
    }

    pub fn has_custom(&self, code: &str) -> bool {
        self.customs.contains_key(code)
    }

    /// 应用单个转换
    ///
    /// # 参数
    /// - value: 当前字段已转换值
    /// - record: 已计算的兄弟字段（按映射 sort_order 在前的字段）
    /// - raw: 原始行（公式/拼接可回退读取）
    ///
    /// # 返回
    /// - Err(String): 行级转换失败原因（不中止批次）
    pub fn apply(
        &self,
        config: &TransformConfig,
        value: FieldValue,
        record: &MappedRecord,
        raw: &RawRecord,
        lookups: &LookupStore,
        _dialect: &DialectOptions,
    ) -> Result<FieldValue, String> {
        match config {
            TransformConfig::Uppercase => Ok(map_text(value, |s| s.to_uppercase())),
            TransformConfig::Lowercase => Ok(map_text(value, |s| s.to_lowercase())),
            TransformConfig::Trim => Ok(map_text(value, |s| s.trim().to_string())),

            TransformConfig::Replace {
                pattern,
                replacement,
                is_regex,
            } => match value {
                FieldValue::Text(s) => {
                    if *is_regex {
                        let re = regex::Regex::new(pattern)
                            .map_err(|e| format!("正则不合法: {}", e))?;
                        Ok(FieldValue::Text(re.replace_all(&s, replacement.as_str()).into_owned()))
                    } else {
                        Ok(FieldValue::Text(s.replace(pattern, replacement)))
                    }
                }
                other => Ok(other),
            },

            TransformConfig::FormatDate { format } => match &value {
                FieldValue::Date(d) => Ok(FieldValue::Text(d.format(format).to_string())),
                FieldValue::DateTime(dt) => Ok(FieldValue::Text(dt.format(format).to_string())),
                FieldValue::Null => Ok(FieldValue::Null),
                other => Err(format!("format_date 需要日期值，实际: {}", other)),
            },

            TransformConfig::FormatNumber {
                decimals,
                decimal_separator,
                thousands_separator,
            } => match value.as_f64() {
                Some(n) => Ok(FieldValue::Text(format_number(
                    n,
                    *decimals,
                    *decimal_separator,
                    *thousands_separator,
                ))),
                None => {
                    if value == FieldValue::Null {
                        Ok(FieldValue::Null)
                    } else {
                        Err(format!("format_number 需要数值，实际: {}", value))
                    }
                }
            },

            TransformConfig::Lookup { table_code } => {
                let table = lookups
                    .get(table_code)
                    .ok_or_else(|| format!("查找表不存在: {}", table_code))?;
                match &value {
                    FieldValue::Null => Ok(FieldValue::Null),
                    v => {
                        let key = v.to_string();
                        match table.resolve(&key) {
                            Some(target) => Ok(FieldValue::Text(target)),
                            None => Ok(FieldValue::Null),
                        }
                    }
                }
            }

            TransformConfig::Formula { expression } => {
                self.eval_formula(expression, record, raw)
            }

            TransformConfig::Concat { fields, separator } => {
                let mut parts = Vec::with_capacity(fields.len());
                for field in fields {
                    let part = record
                        .get(field)
                        .map(|v| v.to_string())
                        .or_else(|| raw.get(field).map(|s| s.to_string()))
                        .unwrap_or_default();
                    parts.push(part);
                }
                Ok(FieldValue::Text(parts.join(separator)))
            }

            TransformConfig::Split { delimiter, index } => match &value {
                FieldValue::Text(s) => {
                    let parts: Vec<&str> = s.split(delimiter.as_str()).collect();
                    match parts.get(*index) {
                        Some(part) => Ok(FieldValue::Text(part.trim().to_string())),
                        None => Err(format!(
                            "split 索引越界: index={}，实际段数={}",
                            index,
                            parts.len()
                        )),
                    }
                }
                FieldValue::Null => Ok(FieldValue::Null),
                other => Err(format!("split 需要文本值，实际: {}", other)),
            },

            TransformConfig::Map {
                entries,
                default,
                case_sensitive,
            } => match &value {
                FieldValue::Null => Ok(FieldValue::Null),
                v => {
                    let key = v.to_string();
                    let hit = if *case_sensitive {
                        entries.get(&key).cloned()
                    } else {
                        let lowered = key.to_lowercase();
                        entries
                            .iter()
                            .find(|(k, _)| k.to_lowercase() == lowered)
                            .map(|(_, v)| v.clone())
                    };
                    match hit.or_else(|| default.clone()) {
                        Some(target) => Ok(FieldValue::Text(target)),
                        None => Ok(FieldValue::Null),
                    }
                }
            },

            TransformConfig::Custom { code } => {
                let transform = self
                    .customs
                    .get(code)
                    .ok_or_else(|| format!("自定义转换未注册: {}", code))?;
                transform.apply(&value, record, raw)
            }
        }
    }

    /// 数值公式求值（变量名解析顺序: 已映射字段 → 原始字段）
    fn eval_formula(
        &self,
        expression: &str,
        record: &MappedRecord,
        raw: &RawRecord,
    ) -> Result<FieldValue, String> {
        let mut ns = |name: &str, _args: Vec<f64>| -> Option<f64> {
            if let Some(v) = record.get(name).and_then(|v| v.as_f64()) {
                return Some(v);
            }
            raw.get(name).and_then(|s| s.parse::<f64>().ok())
        };

        let result = fasteval::ez_eval(expression, &mut ns)
            .map_err(|e| format!("公式求值失败: {:?}", e))?;
        Ok(FieldValue::Decimal(result))
    }
}

/// 文本值整形（非文本原样返回）
fn map_text(value: FieldValue, f: impl Fn(&str) -> String) -> FieldValue {
    match value {
        FieldValue::Text(s) => FieldValue::Text(f(&s)),
        other => other,
    }
}

/// 数值排版（decimals 位小数 + 自定义分隔符）
fn format_number(
    n: f64,
    decimals: usize,
    decimal_separator: char,
    thousands_separator: Option<char>,
) -> String {
    let formatted = format!("{:.*}", decimals, n);
    let (int_part, frac_part) = match formatted.split_once('.') {
        Some((i, f)) => (i.to_string(), Some(f.to_string())),
        None => (formatted, None),
    };

    // 千分位插入（符号位除外）
    let int_with_sep = match thousands_separator {
        Some(sep) => {
            let (sign, digits) = match int_part.strip_prefix('-') {
                Some(rest) => ("-", rest),
                None => ("", int_part.as_str()),
            };
            let mut grouped = String::new();
            let chars: Vec<char> = digits.chars().collect();
            for (i, c) in chars.iter().enumerate() {
                if i > 0 && (chars.len() - i) % 3 == 0 {
                    grouped.push(sep);
                }
                grouped.push(*c);
            }
            format!("{}{}", sign, grouped)
        }
        None => int_part,
    };

    match frac_part {
        Some(frac) => format!("{}{}{}", int_with_sep, decimal_separator, frac),
        None => int_with_sep,
    }
}
