// ==========================================
// 数据交换引擎 - 查找表实体
// ==========================================
// 职责: 租户级 源值 → 目标值 字典，供 lookup 转换使用
// ==========================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupTable {
    pub table_id: String,
    pub tenant_id: String,
    /// 租户内唯一
    pub code: String,
    pub name: String,
    pub entries: HashMap<String, String>,
    /// 未命中时的缺省目标值（可为空）
    pub default_value: Option<String>,
    pub case_sensitive: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LookupTable {
    pub fn new(tenant_id: &str, code: &str) -> Self {
        let now = Utc::now();
        Self {
            table_id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            code: code.to_string(),
            name: code.to_string(),
            entries: HashMap::new(),
            default_value: None,
            case_sensitive: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// 解析源值
    ///
    /// # 返回
    /// - Some(target): 命中（case_sensitive=false 时忽略大小写比较）
    /// - 未命中: default_value（可能为 None）
    pub fn resolve(&self, key: &str) -> Option<String> {
        if self.case_sensitive {
            if let Some(v) = self.entries.get(key) {
                return Some(v.clone());
            }
        } else {
            let lowered = key.to_lowercase();
            for (k, v) in &self.entries {
                if k.to_lowercase() == lowered {
                    return Some(v.clone());
                }
            }
        }
        self.default_value.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn country_table() -> LookupTable {
        let mut table = LookupTable::new("t1", "country_names");
        table.entries.insert("FR".to_string(), "France".to_string());
        table.case_sensitive = false;
        table.default_value = Some("Unknown".to_string());
        table
    }

    #[test]
    fn test_resolve_case_insensitive() {
        let table = country_table();
        assert_eq!(table.resolve("fr"), Some("France".to_string()));
        assert_eq!(table.resolve("FR"), Some("France".to_string()));
    }

    #[test]
    fn test_resolve_default_on_miss() {
        let table = country_table();
        assert_eq!(table.resolve("de"), Some("Unknown".to_string()));
    }

    #[test]
    fn test_resolve_case_sensitive_miss() {
        let mut table = country_table();
        table.case_sensitive = true;
        table.default_value = None;
        assert_eq!(table.resolve("fr"), None);
        assert_eq!(table.resolve("FR"), Some("France".to_string()));
    }
}
