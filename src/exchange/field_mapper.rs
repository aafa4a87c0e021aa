// ==========================================
// 数据交换引擎 - 字段映射器实现
// ==========================================
// 职责: 按 FieldMapping 列表（sort_order 顺序）做
//       源字段提取 → 缺省值替补 → 类型转换 → 命名转换
// 约束: 行级失败返回 RowError，不中止批次（stop 策略由编排器判定）
// ==========================================

use crate::domain::profile::{DialectOptions, ExchangeProfile, FieldMapping};
use crate::domain::types::FieldType;
use crate::domain::value::{FieldValue, MappedRecord};
use crate::exchange::transformer::{LookupStore, Transformer};
use crate::exchange::traits::RawRecord;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

// ==========================================
// RowError - 行级失败描述
// ==========================================
// 编排器据此生成 ExchangeErrorEntry
#[derive(Debug, Clone)]
pub struct RowError {
    pub row_number: usize,
    pub field_name: Option<String>,
    pub offending_value: Option<String>,
    /// 错误细分标识（type_conversion/transform_failed/required/...）
    pub error_code: String,
    pub message: String,
}

// ==========================================
// FieldMapper - 字段映射器
// ==========================================
pub struct FieldMapper;

impl FieldMapper {
    /// 映射一行
    ///
    /// # 流程（每个映射按 sort_order）
    /// 1. 读源字段值（trim 后空视为缺失）
    /// 2. 缺失 → 用 default_value 替补并跳过该字段的后续处理
    /// 3. 类型转换（按 target_type 与方言约定）
    /// 4. 命名转换（transformation_code 引用）
    ///
    /// # 返回
    /// - Err(RowError): 首个失败即返回（行内不继续）
    pub fn map_row(
        &self,
        profile: &ExchangeProfile,
        raw: &RawRecord,
        transformer: &Transformer,
        lookups: &LookupStore,
    ) -> Result<MappedRecord, RowError> {
        let mut record = MappedRecord::new(raw.row_number);

        for mapping in &profile.mappings {
            let value = match raw.get(&mapping.source_field) {
                None => {
                    // 缺省值替补，跳过转换
                    match mapping.default_value.as_deref() {
                        Some(default) => {
                            let coerced = self
                                .coerce(default, mapping.target_type, &profile.dialect)
                                .map_err(|msg| RowError {
                                    row_number: raw.row_number,
                                    field_name: Some(mapping.target_field.clone()),
                                    offending_value: Some(default.to_string()),
                                    error_code: "default_value".to_string(),
                                    message: format!("缺省值转换失败: {}", msg),
                                })?;
                            record.set(&mapping.target_field, coerced);
                        }
                        None => {
                            if mapping.required {
                                return Err(RowError {
                                    row_number: raw.row_number,
                                    field_name: Some(mapping.target_field.clone()),
                                    offending_value: None,
                                    error_code: "required".to_string(),
                                    message: format!(
                                        "必填字段缺失: {}",
                                        mapping.source_field
                                    ),
                                });
                            }
                            record.set(&mapping.target_field, FieldValue::Null);
                        }
                    }
                    continue;
                }
                Some(v) => v.to_string(),
            };

            // 类型转换
            let coerced = self
                .coerce(&value, mapping.target_type, &profile.dialect)
                .map_err(|msg| RowError {
                    row_number: raw.row_number,
                    field_name: Some(mapping.target_field.clone()),
                    offending_value: Some(value.clone()),
                    error_code: "type_conversion".to_string(),
                    message: msg,
                })?;

            // 命名转换
            let transformed = match mapping.transformation_code.as_deref() {
                Some(code) => {
                    let transformation =
                        profile.find_transformation(code).ok_or_else(|| RowError {
                            row_number: raw.row_number,
                            field_name: Some(mapping.target_field.clone()),
                            offending_value: None,
                            error_code: "transformation_not_found".to_string(),
                            message: format!("转换未定义: {}", code),
                        })?;
                    transformer
                        .apply(
                            &transformation.config,
                            coerced,
                            &record,
                            raw,
                            lookups,
                            &profile.dialect,
                        )
                        .map_err(|msg| RowError {
                            row_number: raw.row_number,
                            field_name: Some(mapping.target_field.clone()),
                            offending_value: Some(value.clone()),
                            error_code: "transform_failed".to_string(),
                            message: msg,
                        })?
                }
                None => coerced,
            };

            record.set(&mapping.target_field, transformed);
        }

        Ok(record)
    }

    /// 类型转换（按方言约定）
    fn coerce(
        &self,
        value: &str,
        target_type: FieldType,
        dialect: &DialectOptions,
    ) -> Result<FieldValue, String> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Ok(FieldValue::Null);
        }

        match target_type {
            FieldType::String => Ok(FieldValue::Text(trimmed.to_string())),

            FieldType::Integer => {
                let cleaned = strip_thousands(trimmed, dialect.thousands_separator);
                cleaned
                    .parse::<i64>()
                    .map(FieldValue::Integer)
                    .map_err(|_| format!("无法解析为整数: {}", trimmed))
            }

            FieldType::Decimal => {
                let cleaned = strip_thousands(trimmed, dialect.thousands_separator);
                let normalized = if dialect.decimal_separator != '.' {
                    cleaned.replace(dialect.decimal_separator, ".")
                } else {
                    cleaned
                };
                normalized
                    .parse::<f64>()
                    .map(FieldValue::Decimal)
                    .map_err(|_| format!("无法解析为小数: {}", trimmed))
            }

            FieldType::Date => NaiveDate::parse_from_str(trimmed, &dialect.date_format)
                .map(FieldValue::Date)
                .map_err(|_| {
                    format!(
                        "日期格式错误: 期望 {}，实际 {}",
                        dialect.date_format, trimmed
                    )
                }),

            FieldType::DateTime => {
                NaiveDateTime::parse_from_str(trimmed, &dialect.datetime_format)
                    .map(|naive| {
                        FieldValue::DateTime(DateTime::<Utc>::from_naive_utc_and_offset(
                            naive, Utc,
                        ))
                    })
                    .map_err(|_| {
                        format!(
                            "日期时间格式错误: 期望 {}，实际 {}",
                            dialect.datetime_format, trimmed
                        )
                    })
            }

            FieldType::Boolean => {
                let lowered = trimmed.to_lowercase();
                if dialect
                    .truthy_values
                    .iter()
                    .any(|t| t.to_lowercase() == lowered)
                {
                    Ok(FieldValue::Bool(true))
                } else if dialect
                    .falsy_values
                    .iter()
                    .any(|f| f.to_lowercase() == lowered)
                {
                    Ok(FieldValue::Bool(false))
                } else {
                    Err(format!("无法解析为布尔值: {}", trimmed))
                }
            }
        }
    }

    /// 重复判定条件: key 映射的目标字段 → 映射值
    pub fn key_criteria(
        &self,
        profile: &ExchangeProfile,
        record: &MappedRecord,
    ) -> Vec<(String, FieldValue)> {
        profile
            .key_mappings()
            .iter()
            .filter_map(|m| {
                record
                    .get(&m.target_field)
                    .map(|v| (m.target_field.clone(), v.clone()))
            })
            .collect()
    }
}

/// 去除千分位分隔符
fn strip_thousands(value: &str, separator: Option<char>) -> String {
    match separator {
        Some(sep) => value.chars().filter(|c| *c != sep).collect(),
        None => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::profile::{TransformConfig, Transformation};
    use crate::domain::types::ExchangeDirection;

    fn base_profile() -> ExchangeProfile {
        let mut profile =
            ExchangeProfile::new("t1", "contacts_import", ExchangeDirection::Import, "contacts");
        let mut m1 = FieldMapping::new(&profile.profile_id, "Name", "name");
        m1.sort_order = 1;
        let mut m2 = FieldMapping::new(&profile.profile_id, "Age", "age");
        m2.target_type = FieldType::Integer;
        m2.sort_order = 2;
        let mut m3 = FieldMapping::new(&profile.profile_id, "Birthday", "birthday");
        m3.target_type = FieldType::Date;
        m3.sort_order = 3;
        profile.mappings = vec![m1, m2, m3];
        profile
    }

    fn raw(fields: &[(&str, &str)]) -> RawRecord {
        let mut record = RawRecord::new(1);
        for (k, v) in fields {
            record.fields.insert(k.to_string(), v.to_string());
        }
        record
    }

    #[test]
    fn test_map_row_basic() {
        let profile = base_profile();
        let mapper = FieldMapper;
        let record = mapper
            .map_row(
                &profile,
                &raw(&[("Name", " 张三 "), ("Age", "30"), ("Birthday", "1996-05-01")]),
                &Transformer::new(),
                &LookupStore::default(),
            )
            .unwrap();

        assert_eq!(record.get("name"), Some(&FieldValue::Text("张三".to_string())));
        assert_eq!(record.get("age"), Some(&FieldValue::Integer(30)));
        assert_eq!(
            record.get("birthday"),
            Some(&FieldValue::Date(
                NaiveDate::from_ymd_opt(1996, 5, 1).unwrap()
            ))
        );
    }

    #[test]
    fn test_map_row_default_value_skips_transform() {
        let mut profile = base_profile();
        profile.transformations.push(Transformation::new(
            &profile.profile_id,
            "up",
            TransformConfig::Uppercase,
        ));
        profile.mappings[0].default_value = Some("unknown".to_string());
        profile.mappings[0].transformation_code = Some("up".to_string());

        let mapper = FieldMapper;
        let record = mapper
            .map_row(
                &profile,
                &raw(&[("Age", "1")]),
                &Transformer::new(),
                &LookupStore::default(),
            )
            .unwrap();

        // 缺省值不做转换（保持 "unknown"，不是 "UNKNOWN"）
        assert_eq!(
            record.get("name"),
            Some(&FieldValue::Text("unknown".to_string()))
        );
    }

    #[test]
    fn test_map_row_required_missing() {
        let mut profile = base_profile();
        profile.mappings[0].required = true;

        let mapper = FieldMapper;
        let err = mapper
            .map_row(
                &profile,
                &raw(&[("Age", "1")]),
                &Transformer::new(),
                &LookupStore::default(),
            )
            .unwrap_err();

        assert_eq!(err.error_code, "required");
        assert_eq!(err.field_name.as_deref(), Some("name"));
    }

    #[test]
    fn test_map_row_type_conversion_failure() {
        let profile = base_profile();
        let mapper = FieldMapper;
        let err = mapper
            .map_row(
                &profile,
                &raw(&[("Name", "a"), ("Age", "abc")]),
                &Transformer::new(),
                &LookupStore::default(),
            )
            .unwrap_err();

        assert_eq!(err.error_code, "type_conversion");
        assert_eq!(err.offending_value.as_deref(), Some("abc"));
    }

    #[test]
    fn test_coerce_decimal_with_separators() {
        let mapper = FieldMapper;
        let mut dialect = DialectOptions::default();
        dialect.decimal_separator = ',';
        dialect.thousands_separator = Some('.');

        let value = mapper
            .coerce("1.234.567,89", FieldType::Decimal, &dialect)
            .unwrap();
        assert_eq!(value, FieldValue::Decimal(1234567.89));
    }

    #[test]
    fn test_coerce_boolean_truth_sets() {
        let mapper = FieldMapper;
        let dialect = DialectOptions::default();

        assert_eq!(
            mapper.coerce("YES", FieldType::Boolean, &dialect).unwrap(),
            FieldValue::Bool(true)
        );
        assert_eq!(
            mapper.coerce("否", FieldType::Boolean, &dialect).unwrap(),
            FieldValue::Bool(false)
        );
        assert!(mapper.coerce("maybe", FieldType::Boolean, &dialect).is_err());
    }

    #[test]
    fn test_transform_reads_computed_sibling() {
        let mut profile = base_profile();
        profile.transformations.push(Transformation::new(
            &profile.profile_id,
            "double_age",
            TransformConfig::Formula {
                expression: "age * 2".to_string(),
            },
        ));
        let mut m = FieldMapping::new(&profile.profile_id, "Age", "age_doubled");
        m.target_type = FieldType::Integer;
        m.transformation_code = Some("double_age".to_string());
        m.sort_order = 10; // age 之后求值
        profile.mappings.push(m);

        let mapper = FieldMapper;
        let record = mapper
            .map_row(
                &profile,
                &raw(&[("Name", "a"), ("Age", "21")]),
                &Transformer::new(),
                &LookupStore::default(),
            )
            .unwrap();

        assert_eq!(record.get("age_doubled"), Some(&FieldValue::Decimal(42.0)));
    }
}
