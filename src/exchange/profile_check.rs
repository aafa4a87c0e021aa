// ==========================================
// 数据交换引擎 - 交换配置校验
// ==========================================
// 职责: 配置级错误在任务启动/配置保存时拦截，绝不留到行处理阶段
// ==========================================

use crate::domain::profile::{ExchangeProfile, RuleConfig, TransformConfig};
use crate::domain::types::{DuplicateStrategy, FileFormat};
use crate::exchange::error::{ExchangeError, ExchangeResult};
use crate::exchange::transformer::{LookupStore, Transformer};
use crate::exchange::validator::ValidationEngine;

/// 配置完整性校验
///
/// # 检查项
/// - batch_size / max_errors 合法
/// - UPDATE/REJECT 策略必须有 key 字段映射
/// - 映射引用的转换必须已定义
/// - lookup 转换引用的查找表必须存在
/// - custom 转换/规则必须已在引擎注册
/// - CUSTOM 格式必须声明 custom_format；XML 必须配置 root/row 元素
pub fn validate_profile(
    profile: &ExchangeProfile,
    lookups: &LookupStore,
    transformer: &Transformer,
    validator: &ValidationEngine,
) -> ExchangeResult<()> {
    if profile.behavior.batch_size == 0 {
        return Err(ExchangeError::ProfileMisconfigured(
            "batch_size 必须大于 0".to_string(),
        ));
    }

    // 重复策略与 key 字段的一致性
    if matches!(
        profile.behavior.on_duplicate,
        DuplicateStrategy::Update | DuplicateStrategy::Reject
    ) && profile.key_mappings().is_empty()
    {
        return Err(ExchangeError::NoKeyFieldForStrategy {
            strategy: profile.behavior.on_duplicate.to_string(),
        });
    }

    // 格式方言完整性
    match profile.file_format {
        FileFormat::Custom => {
            if profile.custom_format.as_deref().unwrap_or("").is_empty() {
                return Err(ExchangeError::ProfileMisconfigured(
                    "CUSTOM 格式需要配置 custom_format".to_string(),
                ));
            }
        }
        FileFormat::Xml => {
            if profile.dialect.xml_root.is_none() || profile.dialect.xml_row.is_none() {
                return Err(ExchangeError::ProfileMisconfigured(
                    "XML 格式需要配置 xml_root 与 xml_row".to_string(),
                ));
            }
        }
        _ => {}
    }

    // 映射引用的转换必须可解析
    for mapping in &profile.mappings {
        if let Some(code) = mapping.transformation_code.as_deref() {
            if profile.find_transformation(code).is_none() {
                return Err(ExchangeError::TransformationNotFound(code.to_string()));
            }
        }
    }

    // 转换配置自身的引用检查
    for transformation in &profile.transformations {
        match &transformation.config {
            TransformConfig::Lookup { table_code } => {
                if !lookups.contains(table_code) {
                    return Err(ExchangeError::LookupTableNotFound(table_code.clone()));
                }
            }
            TransformConfig::Custom { code } => {
                if !transformer.has_custom(code) {
                    return Err(ExchangeError::ProfileMisconfigured(format!(
                        "自定义转换未注册: {}",
                        code
                    )));
                }
            }
            TransformConfig::Replace {
                pattern, is_regex, ..
            } if *is_regex => {
                if let Err(e) = regex::Regex::new(pattern) {
                    return Err(ExchangeError::ProfileMisconfigured(format!(
                        "replace 正则不合法: {}",
                        e
                    )));
                }
            }
            _ => {}
        }
    }

    // 规则配置检查
    for rule in &profile.rules {
        match &rule.config {
            RuleConfig::Regex { pattern } => {
                if let Err(e) = regex::Regex::new(pattern) {
                    return Err(ExchangeError::ProfileMisconfigured(format!(
                        "规则 {} 正则不合法: {}",
                        rule.code, e
                    )));
                }
            }
            RuleConfig::Custom { code } => {
                if !validator.has_custom(code) {
                    return Err(ExchangeError::ProfileMisconfigured(format!(
                        "自定义规则未注册: {}",
                        code
                    )));
                }
            }
            _ => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::profile::{FieldMapping, Transformation};
    use crate::domain::types::ExchangeDirection;

    fn base() -> (ExchangeProfile, LookupStore, Transformer, ValidationEngine) {
        (
            ExchangeProfile::new("t1", "p", ExchangeDirection::Import, "contacts"),
            LookupStore::default(),
            Transformer::new(),
            ValidationEngine::new(),
        )
    }

    #[test]
    fn test_update_strategy_without_key_rejected() {
        let (mut profile, lookups, transformer, validator) = base();
        profile.behavior.on_duplicate = DuplicateStrategy::Update;

        let result = validate_profile(&profile, &lookups, &transformer, &validator);
        assert!(matches!(
            result,
            Err(ExchangeError::NoKeyFieldForStrategy { .. })
        ));
    }

    #[test]
    fn test_update_strategy_with_key_passes() {
        let (mut profile, lookups, transformer, validator) = base();
        profile.behavior.on_duplicate = DuplicateStrategy::Update;
        let mut mapping = FieldMapping::new(&profile.profile_id, "Email", "email");
        mapping.is_key = true;
        profile.mappings = vec![mapping];

        assert!(validate_profile(&profile, &lookups, &transformer, &validator).is_ok());
    }

    #[test]
    fn test_dangling_transformation_reference() {
        let (mut profile, lookups, transformer, validator) = base();
        let mut mapping = FieldMapping::new(&profile.profile_id, "A", "a");
        mapping.transformation_code = Some("ghost".to_string());
        profile.mappings = vec![mapping];

        assert!(matches!(
            validate_profile(&profile, &lookups, &transformer, &validator),
            Err(ExchangeError::TransformationNotFound(_))
        ));
    }

    #[test]
    fn test_lookup_table_must_exist() {
        let (mut profile, lookups, transformer, validator) = base();
        profile.transformations.push(Transformation::new(
            &profile.profile_id,
            "country",
            TransformConfig::Lookup {
                table_code: "missing_table".to_string(),
            },
        ));

        assert!(matches!(
            validate_profile(&profile, &lookups, &transformer, &validator),
            Err(ExchangeError::LookupTableNotFound(_))
        ));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let (mut profile, lookups, transformer, validator) = base();
        profile.behavior.batch_size = 0;

        assert!(matches!(
            validate_profile(&profile, &lookups, &transformer, &validator),
            Err(ExchangeError::ProfileMisconfigured(_))
        ));
    }
}
