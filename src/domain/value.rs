// ==========================================
// 数据交换引擎 - 字段值与映射行
// ==========================================
// 职责: 类型转换后的字段值联合类型 + 有序映射行
// 约束: 映射行保持 FieldMapping 的 sort_order 顺序
// ==========================================

use chrono::{DateTime, NaiveDate, Utc};
use std::fmt;

// ==========================================
// FieldValue - 转换后的字段值
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Text(String),
    Integer(i64),
    Decimal(f64),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
    Bool(bool),
}

impl FieldValue {
    /// 空值判定（Null 或空白文本）
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Null => true,
            FieldValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// 数值视图（Integer/Decimal → f64，其余 None）
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(i) => Some(*i as f64),
            FieldValue::Decimal(d) => Some(*d),
            _ => None,
        }
    }

    /// 转为 JSON 值（用于日志/错误快照与导出）
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Null => serde_json::Value::Null,
            FieldValue::Text(s) => serde_json::Value::String(s.clone()),
            FieldValue::Integer(i) => serde_json::Value::from(*i),
            FieldValue::Decimal(d) => serde_json::Number::from_f64(*d)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            FieldValue::Date(d) => serde_json::Value::String(d.format("%Y-%m-%d").to_string()),
            FieldValue::DateTime(dt) => serde_json::Value::String(dt.to_rfc3339()),
            FieldValue::Bool(b) => serde_json::Value::Bool(*b),
        }
    }

    /// 从 JSON 值还原（回滚 prior 值、导出查询结果使用）
    pub fn from_json(value: &serde_json::Value) -> FieldValue {
        match value {
            serde_json::Value::Null => FieldValue::Null,
            serde_json::Value::Bool(b) => FieldValue::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    FieldValue::Integer(i)
                } else {
                    FieldValue::Decimal(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => FieldValue::Text(s.clone()),
            other => FieldValue::Text(other.to_string()),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => Ok(()),
            FieldValue::Text(s) => write!(f, "{}", s),
            FieldValue::Integer(i) => write!(f, "{}", i),
            FieldValue::Decimal(d) => write!(f, "{}", d),
            FieldValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            FieldValue::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
            FieldValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

// ==========================================
// MappedRecord - 映射后的一行
// ==========================================
// 字段顺序 = FieldMapping sort_order 顺序（导出列序依赖此顺序）
#[derive(Debug, Clone, Default)]
pub struct MappedRecord {
    fields: Vec<(String, FieldValue)>,
    /// 源文件行号（1 起），用于日志与错误定位
    pub row_number: usize,
}

impl MappedRecord {
    pub fn new(row_number: usize) -> Self {
        Self {
            fields: Vec::new(),
            row_number,
        }
    }

    /// 写入字段（同名覆盖，保持原位置）
    pub fn set(&mut self, name: &str, value: FieldValue) {
        if let Some(slot) = self.fields.iter_mut().find(|(n, _)| n == name) {
            slot.1 = value;
        } else {
            self.fields.push((name.to_string(), value));
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, FieldValue)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// 整行转为 JSON 对象（日志 mapped_data、实体落库载荷）
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (name, value) in &self.fields {
            map.insert(name.clone(), value.to_json());
        }
        serde_json::Value::Object(map)
    }

    /// 从 JSON 对象还原（导出查询结果 → 行）
    pub fn from_json(row_number: usize, value: &serde_json::Value) -> MappedRecord {
        let mut record = MappedRecord::new(row_number);
        if let serde_json::Value::Object(map) = value {
            for (name, v) in map {
                record.set(name, FieldValue::from_json(v));
            }
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapped_record_keeps_order() {
        let mut record = MappedRecord::new(1);
        record.set("name", FieldValue::Text("张三".to_string()));
        record.set("age", FieldValue::Integer(30));
        record.set("name", FieldValue::Text("李四".to_string()));

        assert_eq!(record.field_names(), vec!["name", "age"]);
        assert_eq!(record.get("name"), Some(&FieldValue::Text("李四".to_string())));
    }

    #[test]
    fn test_field_value_empty() {
        assert!(FieldValue::Null.is_empty());
        assert!(FieldValue::Text("  ".to_string()).is_empty());
        assert!(!FieldValue::Integer(0).is_empty());
        assert!(!FieldValue::Bool(false).is_empty());
    }

    #[test]
    fn test_json_round_trip() {
        let mut record = MappedRecord::new(3);
        record.set("qty", FieldValue::Integer(7));
        record.set("price", FieldValue::Decimal(12.5));
        record.set("note", FieldValue::Null);

        let json = record.to_json();
        let restored = MappedRecord::from_json(3, &json);
        assert_eq!(restored.get("qty"), Some(&FieldValue::Integer(7)));
        assert_eq!(restored.get("price"), Some(&FieldValue::Decimal(12.5)));
        assert_eq!(restored.get("note"), Some(&FieldValue::Null));
    }
}
