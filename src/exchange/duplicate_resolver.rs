// ==========================================
// 数据交换引擎 - 重复解决器实现
// ==========================================
// 职责: 按 key 字段构造查找条件，命中后按 on_duplicate 策略分支
// 约束: 无 key 字段时 UPDATE/REJECT 属配置错误，在配置校验阶段拦截，
//       不在行处理阶段出现
// ==========================================

use crate::domain::profile::ExchangeProfile;
use crate::domain::types::DuplicateStrategy;
use crate::domain::value::MappedRecord;
use crate::exchange::error::ExchangeResult;
use crate::exchange::field_mapper::FieldMapper;
use crate::exchange::traits::EntityHandler;

// ==========================================
// DuplicateDecision - 行处理决策
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub enum DuplicateDecision {
    /// 新建（无匹配，或 CREATE_NEW 策略无视匹配）
    Create,
    /// 跳过，计入 skipped
    Skip { existing_id: String },
    /// 更新既有实体
    Update { existing_id: String },
    /// 记为 duplicate 错误（不计入 skipped）
    Reject { existing_id: String },
}

// ==========================================
// DuplicateResolver - 重复解决器
// ==========================================
pub struct DuplicateResolver;

impl DuplicateResolver {
    /// 对一条映射记录做重复判定
    ///
    /// # 流程
    /// 1. 无 key 映射 → 直接 Create（不调用宿主查找）
    /// 2. key 字段全为空 → 视为无匹配 → Create
    /// 3. 宿主 find 命中 → 按 on_duplicate 分支
    pub async fn resolve(
        &self,
        profile: &ExchangeProfile,
        record: &MappedRecord,
        handler: &dyn EntityHandler,
    ) -> ExchangeResult<DuplicateDecision> {
        if profile.key_mappings().is_empty() {
            return Ok(DuplicateDecision::Create);
        }

        let criteria = FieldMapper.key_criteria(profile, record);
        let criteria: Vec<_> = criteria
            .into_iter()
            .filter(|(_, v)| !v.is_empty())
            .collect();
        if criteria.is_empty() {
            return Ok(DuplicateDecision::Create);
        }

        match handler.find(&criteria).await? {
            None => Ok(DuplicateDecision::Create),
            Some(existing_id) => Ok(match profile.behavior.on_duplicate {
                DuplicateStrategy::Skip => DuplicateDecision::Skip { existing_id },
                DuplicateStrategy::Update => DuplicateDecision::Update { existing_id },
                DuplicateStrategy::Reject => DuplicateDecision::Reject { existing_id },
                DuplicateStrategy::CreateNew => DuplicateDecision::Create,
            }),
        }
    }
}
