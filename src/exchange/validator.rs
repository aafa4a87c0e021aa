// ==========================================
// 数据交换引擎 - 校验引擎实现
// ==========================================
// 职责: 按 sort_order 执行字段/行级规则，产出严重级别标记的发现
// 约束: stop_on_fail 只中止"该行"的后续规则，不影响其他行
// 约束: unique 规则为文件级预扫，报告所有冲突行号
// ==========================================

use crate::domain::profile::{ExchangeProfile, RuleConfig, ValidationRule};
use crate::domain::types::{RuleStage, Severity};
use crate::domain::value::MappedRecord;
use crate::exchange::traits::{RawRecord, ReferenceLookup};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

// ==========================================
// RuleFinding - 单条校验发现
// ==========================================
#[derive(Debug, Clone)]
pub struct RuleFinding {
    pub row_number: usize,
    pub field_name: Option<String>,
    pub rule_code: String,
    /// 规则类型标识（required/unique/regex/...）
    pub error_code: String,
    pub severity: Severity,
    pub offending_value: Option<String>,
    pub expected_value: Option<String>,
    pub message: String,
}

/// 单行校验结果
#[derive(Debug, Default)]
pub struct RowValidation {
    pub findings: Vec<RuleFinding>,
    /// 命中 stop_on_fail 规则，该行后续规则已跳过
    pub stopped: bool,
}

/// 文件级预扫结果（unique 规则）
#[derive(Debug, Default)]
pub struct BatchValidation {
    pub findings: Vec<RuleFinding>,
    /// 命中 stop_on_fail unique 规则的行
    pub stopped_rows: HashSet<usize>,
}

// ==========================================
// CustomRule Trait
// ==========================================
// 宿主注册的自定义谓词（返回 true = 通过）
pub trait CustomRule: Send + Sync {
    fn validate(
        &self,
        raw: &RawRecord,
        mapped: Option<&MappedRecord>,
        field_name: Option<&str>,
    ) -> Result<bool, String>;
}

// ==========================================
// ValidationEngine - 校验引擎
// ==========================================
pub struct ValidationEngine {
    customs: HashMap<String, Arc<dyn CustomRule>>,
    /// 正则按 pattern 缓存（全串匹配形式）
    regex_cache: Mutex<HashMap<String, regex::Regex>>,
}

impl Default for ValidationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationEngine {
    pub fn new() -> Self {
        Self {
            customs: HashMap::new(),
            regex_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn register_custom(&mut self, code: &str, rule: Arc<dyn CustomRule>) {
        self.customs.insert(code.to_string(), rule);
    }

    pub fn has_custom(&self, code: &str) -> bool {
        self.customs.contains_key(code)
    }

    // ==========================================
    // 文件级预扫: unique 规则
    // ==========================================
    // 对配置字段做整文件值分桶，重复值的每个行号都产出一条发现
    pub fn check_unique(
        &self,
        profile: &ExchangeProfile,
        records: &[RawRecord],
    ) -> BatchValidation {
        let mut result = BatchValidation::default();

        for rule in profile
            .rules
            .iter()
            .filter(|r| matches!(r.config, RuleConfig::Unique))
        {
            let Some(field) = rule.field_name.as_deref() else {
                continue;
            };
            // MAPPED 阶段的 unique 按映射反查源字段取值
            let source_field = match rule.stage {
                RuleStage::Raw => field.to_string(),
                RuleStage::Mapped => profile
                    .mappings
                    .iter()
                    .find(|m| m.target_field == field)
                    .map(|m| m.source_field.clone())
                    .unwrap_or_else(|| field.to_string()),
            };

            let mut buckets: HashMap<String, Vec<usize>> = HashMap::new();
            for record in records {
                if let Some(value) = record.get(&source_field) {
                    buckets
                        .entry(value.to_string())
                        .or_default()
                        .push(record.row_number);
                }
            }

            for (value, rows) in buckets {
                if rows.len() < 2 {
                    continue;
                }
                for row_number in rows {
                    result.findings.push(self.finding(rule, row_number, Some(value.clone()), None));
                    if rule.stop_on_fail {
                        result.stopped_rows.insert(row_number);
                    }
                }
            }
        }

        result
    }

    // ==========================================
    // 单行校验（按阶段）
    // ==========================================
    // unique 规则在预扫处理，这里跳过
    pub async fn validate_row(
        &self,
        profile: &ExchangeProfile,
        raw: &RawRecord,
        mapped: Option<&MappedRecord>,
        stage: RuleStage,
        refs: &dyn ReferenceLookup,
    ) -> RowValidation {
        let mut result = RowValidation::default();

        for rule in profile.rules.iter().filter(|r| r.stage == stage) {
            if matches!(rule.config, RuleConfig::Unique) {
                continue;
            }

            let passed = self.evaluate(rule, raw, mapped, refs).await;
            match passed {
                Ok(true) => {}
                Ok(false) => {
                    let value = self.field_text(rule, raw, mapped);
                    let expected = self.expected_of(rule);
                    result
                        .findings
                        .push(self.finding(rule, raw.row_number, value, expected));
                    if rule.stop_on_fail {
                        result.stopped = true;
                        break;
                    }
                }
                Err(message) => {
                    // 规则执行本身失败（自定义规则异常、引用查询失败等）
                    let mut finding =
                        self.finding(rule, raw.row_number, self.field_text(rule, raw, mapped), None);
                    finding.message = message;
                    result.findings.push(finding);
                    if rule.stop_on_fail {
                        result.stopped = true;
                        break;
                    }
                }
            }
        }

        result
    }

    /// 规则求值（true = 通过）
    async fn evaluate(
        &self,
        rule: &ValidationRule,
        raw: &RawRecord,
        mapped: Option<&MappedRecord>,
        refs: &dyn ReferenceLookup,
    ) -> Result<bool, String> {
        let text = self.field_text(rule, raw, mapped);

        match &rule.config {
            RuleConfig::Required => Ok(text.is_some()),

            // 预扫处理
            RuleConfig::Unique => Ok(true),

            RuleConfig::Regex { pattern } => match text {
                // 空值由 required 规则负责
                None => Ok(true),
                Some(value) => {
                    let re = self.compiled_regex(pattern)?;
                    Ok(re.is_match(&value))
                }
            },

            RuleConfig::MinLength { min } => match text {
                None => Ok(true),
                Some(value) => Ok(value.chars().count() >= *min),
            },

            RuleConfig::MaxLength { max } => match text {
                None => Ok(true),
                Some(value) => Ok(value.chars().count() <= *max),
            },

            RuleConfig::MinValue { min } => match self.field_num(rule, raw, mapped) {
                None => Ok(true),
                Some(n) => Ok(n >= *min),
            },

            RuleConfig::MaxValue { max } => match self.field_num(rule, raw, mapped) {
                None => Ok(true),
                Some(n) => Ok(n <= *max),
            },

            RuleConfig::Enum { values } => match text {
                None => Ok(true),
                Some(value) => Ok(values.iter().any(|v| v == &value)),
            },

            RuleConfig::Reference { entity_type, field } => match text {
                None => Ok(true),
                Some(value) => refs
                    .exists(entity_type, field, &value)
                    .await
                    .map_err(|e| format!("引用查询失败: {}", e)),
            },

            RuleConfig::Custom { code } => {
                let custom = self
                    .customs
                    .get(code)
                    .ok_or_else(|| format!("自定义规则未注册: {}", code))?;
                custom.validate(raw, mapped, rule.field_name.as_deref())
            }
        }
    }

    /// 取字段文本值（按阶段: RAW 用源字段原始值，MAPPED 用映射值）
    fn field_text(
        &self,
        rule: &ValidationRule,
        raw: &RawRecord,
        mapped: Option<&MappedRecord>,
    ) -> Option<String> {
        let field = rule.field_name.as_deref()?;
        match rule.stage {
            RuleStage::Raw => raw.get(field).map(|s| s.to_string()),
            RuleStage::Mapped => mapped
                .and_then(|r| r.get(field))
                .filter(|v| !v.is_empty())
                .map(|v| v.to_string()),
        }
    }

    /// 取字段数值
    fn field_num(
        &self,
        rule: &ValidationRule,
        raw: &RawRecord,
        mapped: Option<&MappedRecord>,
    ) -> Option<f64> {
        let field = rule.field_name.as_deref()?;
        match rule.stage {
            RuleStage::Raw => raw.get(field).and_then(|s| s.parse::<f64>().ok()),
            RuleStage::Mapped => mapped.and_then(|r| r.get(field)).and_then(|v| v.as_f64()),
        }
    }

    /// 期望值描述（错误条目 expected_value 口径）
    fn expected_of(&self, rule: &ValidationRule) -> Option<String> {
        match &rule.config {
            RuleConfig::Regex { pattern } => Some(pattern.clone()),
            RuleConfig::MinLength { min } => Some(format!(">= {} 字符", min)),
            RuleConfig::MaxLength { max } => Some(format!("<= {} 字符", max)),
            RuleConfig::MinValue { min } => Some(format!(">= {}", min)),
            RuleConfig::MaxValue { max } => Some(format!("<= {}", max)),
            RuleConfig::Enum { values } => Some(values.join("|")),
            _ => None,
        }
    }

    /// 组装发现（消息模板支持 {field}/{value} 占位）
    fn finding(
        &self,
        rule: &ValidationRule,
        row_number: usize,
        offending_value: Option<String>,
        expected_value: Option<String>,
    ) -> RuleFinding {
        let field = rule.field_name.clone().unwrap_or_default();
        let value = offending_value.clone().unwrap_or_default();
        let message = match &rule.message {
            Some(template) => template.replace("{field}", &field).replace("{value}", &value),
            None => default_message(rule, &field, &value),
        };

        RuleFinding {
            row_number,
            field_name: rule.field_name.clone(),
            rule_code: rule.code.clone(),
            error_code: rule.config.kind_name().to_string(),
            severity: rule.severity,
            offending_value,
            expected_value,
            message,
        }
    }

    /// 全串匹配正则（带缓存）
    fn compiled_regex(&self, pattern: &str) -> Result<regex::Regex, String> {
        let mut cache = self
            .regex_cache
            .lock()
            .map_err(|e| format!("正则缓存锁失败: {}", e))?;
        if let Some(re) = cache.get(pattern) {
            return Ok(re.clone());
        }
        let anchored = format!("^(?:{})$", pattern);
        let re = regex::Regex::new(&anchored).map_err(|e| format!("正则不合法: {}", e))?;
        cache.insert(pattern.to_string(), re.clone());
        Ok(re)
    }
}

/// 按规则类型生成缺省消息
fn default_message(rule: &ValidationRule, field: &str, value: &str) -> String {
    match &rule.config {
        RuleConfig::Required => format!("必填字段缺失: {}", field),
        RuleConfig::Unique => format!("字段 {} 值重复: {}", field, value),
        RuleConfig::Regex { pattern } => {
            format!("字段 {} 格式不符: {} (期望 {})", field, value, pattern)
        }
        RuleConfig::MinLength { min } => format!("字段 {} 长度不足 {} 字符: {}", field, min, value),
        RuleConfig::MaxLength { max } => format!("字段 {} 超过 {} 字符: {}", field, max, value),
        RuleConfig::MinValue { min } => format!("字段 {} 低于下限 {}: {}", field, min, value),
        RuleConfig::MaxValue { max } => format!("字段 {} 超过上限 {}: {}", field, max, value),
        RuleConfig::Enum { values } => {
            format!("字段 {} 不在取值范围 [{}]: {}", field, values.join(","), value)
        }
        RuleConfig::Reference { entity_type, .. } => {
            format!("字段 {} 引用的 {} 不存在: {}", field, entity_type, value)
        }
        RuleConfig::Custom { code } => format!("自定义规则 {} 未通过 (字段 {})", code, field),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::ExchangeDirection;
    use crate::exchange::traits::NoReferenceLookup;

    fn profile_with_rules(rules: Vec<ValidationRule>) -> ExchangeProfile {
        let mut profile =
            ExchangeProfile::new("t1", "p", ExchangeDirection::Import, "contacts");
        profile.rules = rules;
        profile
    }

    fn raw(fields: &[(&str, &str)], row_number: usize) -> RawRecord {
        let mut record = RawRecord::new(row_number);
        for (k, v) in fields {
            record.fields.insert(k.to_string(), v.to_string());
        }
        record
    }

    #[tokio::test]
    async fn test_required_rule() {
        let mut rule = ValidationRule::new("p", "email_required", Some("email"), RuleConfig::Required);
        rule.sort_order = 1;
        let profile = profile_with_rules(vec![rule]);
        let engine = ValidationEngine::new();

        let result = engine
            .validate_row(
                &profile,
                &raw(&[("email", "")], 1),
                None,
                RuleStage::Raw,
                &NoReferenceLookup,
            )
            .await;

        assert_eq!(result.findings.len(), 1);
        assert_eq!(result.findings[0].error_code, "required");
        assert_eq!(result.findings[0].field_name.as_deref(), Some("email"));
    }

    #[tokio::test]
    async fn test_stop_on_fail_skips_later_rules() {
        let mut first = ValidationRule::new("p", "email_required", Some("email"), RuleConfig::Required);
        first.stop_on_fail = true;
        first.sort_order = 1;
        let mut second = ValidationRule::new(
            "p",
            "email_format",
            Some("email"),
            RuleConfig::Regex {
                pattern: r"[^@]+@[^@]+".to_string(),
            },
        );
        second.sort_order = 2;
        let profile = profile_with_rules(vec![first, second]);
        let engine = ValidationEngine::new();

        // email 缺失: required 命中且 stop，regex 不再评估
        let result = engine
            .validate_row(
                &profile,
                &raw(&[("name", "a")], 1),
                None,
                RuleStage::Raw,
                &NoReferenceLookup,
            )
            .await;
        assert_eq!(result.findings.len(), 1);
        assert!(result.stopped);

        // 其他行不受影响
        let ok = engine
            .validate_row(
                &profile,
                &raw(&[("email", "a@b.com")], 2),
                None,
                RuleStage::Raw,
                &NoReferenceLookup,
            )
            .await;
        assert!(ok.findings.is_empty());
        assert!(!ok.stopped);
    }

    #[tokio::test]
    async fn test_regex_full_match() {
        let rule = ValidationRule::new(
            "p",
            "zip_format",
            Some("zip"),
            RuleConfig::Regex {
                pattern: r"\d{5}".to_string(),
            },
        );
        let profile = profile_with_rules(vec![rule]);
        let engine = ValidationEngine::new();

        // 局部匹配不算通过（全串匹配）
        let result = engine
            .validate_row(
                &profile,
                &raw(&[("zip", "12345-67")], 1),
                None,
                RuleStage::Raw,
                &NoReferenceLookup,
            )
            .await;
        assert_eq!(result.findings.len(), 1);

        let ok = engine
            .validate_row(
                &profile,
                &raw(&[("zip", "12345")], 2),
                None,
                RuleStage::Raw,
                &NoReferenceLookup,
            )
            .await;
        assert!(ok.findings.is_empty());
    }

    #[test]
    fn test_unique_reports_every_offending_row() {
        let rule = ValidationRule::new("p", "email_unique", Some("email"), RuleConfig::Unique);
        let profile = profile_with_rules(vec![rule]);
        let engine = ValidationEngine::new();

        let records = vec![
            raw(&[("email", "a@x.com")], 1),
            raw(&[("email", "b@x.com")], 2),
            raw(&[("email", "a@x.com")], 3),
            raw(&[("email", "a@x.com")], 4),
        ];

        let result = engine.check_unique(&profile, &records);
        let mut rows: Vec<usize> = result.findings.iter().map(|f| f.row_number).collect();
        rows.sort_unstable();
        assert_eq!(rows, vec![1, 3, 4]);
    }

    #[tokio::test]
    async fn test_range_rules_on_mapped_values() {
        use crate::domain::value::{FieldValue, MappedRecord};

        let mut min_rule = ValidationRule::new(
            "p",
            "qty_min",
            Some("qty"),
            RuleConfig::MinValue { min: 1.0 },
        );
        min_rule.stage = RuleStage::Mapped;
        min_rule.sort_order = 1;
        let mut max_rule = ValidationRule::new(
            "p",
            "qty_max",
            Some("qty"),
            RuleConfig::MaxValue { max: 100.0 },
        );
        max_rule.stage = RuleStage::Mapped;
        max_rule.sort_order = 2;
        let profile = profile_with_rules(vec![min_rule, max_rule]);
        let engine = ValidationEngine::new();

        let mut mapped = MappedRecord::new(1);
        mapped.set("qty", FieldValue::Integer(250));

        let result = engine
            .validate_row(
                &profile,
                &raw(&[], 1),
                Some(&mapped),
                RuleStage::Mapped,
                &NoReferenceLookup,
            )
            .await;

        assert_eq!(result.findings.len(), 1);
        assert_eq!(result.findings[0].error_code, "max_value");
    }

    #[tokio::test]
    async fn test_warning_severity_finding() {
        let mut rule = ValidationRule::new(
            "p",
            "name_length",
            Some("name"),
            RuleConfig::MaxLength { max: 3 },
        );
        rule.severity = Severity::Warning;
        let profile = profile_with_rules(vec![rule]);
        let engine = ValidationEngine::new();

        let result = engine
            .validate_row(
                &profile,
                &raw(&[("name", "abcdef")], 1),
                None,
                RuleStage::Raw,
                &NoReferenceLookup,
            )
            .await;
        assert_eq!(result.findings[0].severity, Severity::Warning);
    }

    #[tokio::test]
    async fn test_message_template() {
        let mut rule = ValidationRule::new("p", "email_required", Some("email"), RuleConfig::Required);
        rule.message = Some("{field} 不能为空".to_string());
        let profile = profile_with_rules(vec![rule]);
        let engine = ValidationEngine::new();

        let result = engine
            .validate_row(
                &profile,
                &raw(&[], 1),
                None,
                RuleStage::Raw,
                &NoReferenceLookup,
            )
            .await;
        assert_eq!(result.findings[0].message, "email 不能为空");
    }
}
