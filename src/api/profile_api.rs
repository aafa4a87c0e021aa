// ==========================================
// 数据交换引擎 - 配置 API
// ==========================================
// 职责: Profile/FieldMapping/ValidationRule/Transformation/LookupTable 管理
// 约束: is_system 配置不可修改/删除; code 租户内唯一
// 约束: 配置保存即做完整性校验，不把配置错误留到行处理阶段
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::api::pagination::{PageRequest, PageResponse};
use crate::domain::lookup::LookupTable;
use crate::domain::profile::{ExchangeProfile, FieldMapping, Transformation, ValidationRule};
use crate::exchange::profile_check::validate_profile;
use crate::exchange::transformer::{LookupStore, Transformer};
use crate::exchange::validator::ValidationEngine;
use crate::repository::{LookupTableRepository, ProfileRepository};
use std::sync::Arc;
use tracing::info;

/// 删除结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// 被历史任务引用，仅打软删除标记
    SoftDeleted,
    /// 无引用，物理删除
    Deleted,
}

// ==========================================
// ProfileApi
// ==========================================
pub struct ProfileApi {
    profile_repo: Arc<dyn ProfileRepository>,
    lookup_repo: Arc<dyn LookupTableRepository>,
    transformer: Arc<Transformer>,
    validator: Arc<ValidationEngine>,
}

impl ProfileApi {
    pub fn new(
        profile_repo: Arc<dyn ProfileRepository>,
        lookup_repo: Arc<dyn LookupTableRepository>,
        transformer: Arc<Transformer>,
        validator: Arc<ValidationEngine>,
    ) -> Self {
        Self {
            profile_repo,
            lookup_repo,
            transformer,
            validator,
        }
    }

    // ==========================================
    // Profile 管理
    // ==========================================

    pub fn create_profile(&self, profile: ExchangeProfile) -> ApiResult<ExchangeProfile> {
        if profile.code.trim().is_empty() {
            return Err(ApiError::InvalidInput("配置编码不能为空".to_string()));
        }
        if profile.entity_type.trim().is_empty() {
            return Err(ApiError::InvalidInput("目标实体类型不能为空".to_string()));
        }
        self.check_profile(&profile)?;

        self.profile_repo.insert(&profile)?;
        info!(code = %profile.code, tenant = %profile.tenant_id, "交换配置已创建");
        Ok(profile)
    }

    pub fn update_profile(&self, profile: ExchangeProfile) -> ApiResult<ExchangeProfile> {
        let existing = self
            .profile_repo
            .find_by_id(&profile.tenant_id, &profile.profile_id)?
            .ok_or_else(|| ApiError::NotFound(format!("交换配置 {}", profile.profile_id)))?;
        if existing.is_system {
            return Err(ApiError::SystemProfileImmutable(existing.code));
        }
        self.check_profile(&profile)?;

        self.profile_repo.update(&profile)?;
        info!(code = %profile.code, "交换配置已更新");
        Ok(profile)
    }

    pub fn get_profile(&self, tenant_id: &str, code: &str) -> ApiResult<ExchangeProfile> {
        self.profile_repo
            .find_by_code(tenant_id, code)?
            .filter(|p| !p.is_deleted)
            .ok_or_else(|| ApiError::NotFound(format!("交换配置 {}", code)))
    }

    pub fn list_profiles(
        &self,
        tenant_id: &str,
        request: &PageRequest,
    ) -> ApiResult<PageResponse<ExchangeProfile>> {
        request.validate()?;
        let items = self.profile_repo.list(
            tenant_id,
            false,
            request.filter.as_deref(),
            request.sort_by.as_deref(),
            request.sort_desc,
            request.limit(),
            request.offset(),
        )?;
        let total = self
            .profile_repo
            .count(tenant_id, false, request.filter.as_deref())?;
        Ok(PageResponse::new(items, total, request))
    }

    /// 删除配置
    ///
    /// # 行为
    /// - 系统配置: 拒绝
    /// - 被历史任务引用: 软删除（历史任务仍可追溯）
    /// - 无引用: 物理删除
    pub fn delete_profile(&self, tenant_id: &str, code: &str) -> ApiResult<DeleteOutcome> {
        let profile = self.get_profile(tenant_id, code)?;
        if profile.is_system {
            return Err(ApiError::SystemProfileImmutable(code.to_string()));
        }

        if self.profile_repo.has_jobs(&profile.profile_id)? {
            self.profile_repo
                .soft_delete(tenant_id, &profile.profile_id)?;
            info!(code = %code, "交换配置已软删除（存在历史任务）");
            Ok(DeleteOutcome::SoftDeleted)
        } else {
            self.profile_repo
                .hard_delete(tenant_id, &profile.profile_id)?;
            info!(code = %code, "交换配置已删除");
            Ok(DeleteOutcome::Deleted)
        }
    }

    // ==========================================
    // 子对象管理（映射/规则/转换）
    // ==========================================
    // 统一模式: 读取 → 变更子列表 → 整体校验 → 整体落库

    pub fn add_field_mapping(
        &self,
        tenant_id: &str,
        profile_code: &str,
        mapping: FieldMapping,
    ) -> ApiResult<ExchangeProfile> {
        self.mutate_profile(tenant_id, profile_code, |profile| {
            let mut mapping = mapping.clone();
            mapping.profile_id = profile.profile_id.clone();
            profile.mappings.push(mapping);
            profile.sort_members();
            Ok(())
        })
    }

    pub fn remove_field_mapping(
        &self,
        tenant_id: &str,
        profile_code: &str,
        mapping_id: &str,
    ) -> ApiResult<ExchangeProfile> {
        self.mutate_profile(tenant_id, profile_code, |profile| {
            let before = profile.mappings.len();
            profile.mappings.retain(|m| m.mapping_id != mapping_id);
            if profile.mappings.len() == before {
                return Err(ApiError::NotFound(format!("字段映射 {}", mapping_id)));
            }
            Ok(())
        })
    }

    pub fn add_validation_rule(
        &self,
        tenant_id: &str,
        profile_code: &str,
        rule: ValidationRule,
    ) -> ApiResult<ExchangeProfile> {
        self.mutate_profile(tenant_id, profile_code, |profile| {
            let mut rule = rule.clone();
            rule.profile_id = profile.profile_id.clone();
            profile.rules.push(rule);
            profile.sort_members();
            Ok(())
        })
    }

    pub fn remove_validation_rule(
        &self,
        tenant_id: &str,
        profile_code: &str,
        rule_id: &str,
    ) -> ApiResult<ExchangeProfile> {
        self.mutate_profile(tenant_id, profile_code, |profile| {
            let before = profile.rules.len();
            profile.rules.retain(|r| r.rule_id != rule_id);
            if profile.rules.len() == before {
                return Err(ApiError::NotFound(format!("校验规则 {}", rule_id)));
            }
            Ok(())
        })
    }

    pub fn add_transformation(
        &self,
        tenant_id: &str,
        profile_code: &str,
        transformation: Transformation,
    ) -> ApiResult<ExchangeProfile> {
        self.mutate_profile(tenant_id, profile_code, |profile| {
            let mut transformation = transformation.clone();
            transformation.profile_id = profile.profile_id.clone();
            profile.transformations.push(transformation);
            profile.sort_members();
            Ok(())
        })
    }

    pub fn remove_transformation(
        &self,
        tenant_id: &str,
        profile_code: &str,
        transformation_id: &str,
    ) -> ApiResult<ExchangeProfile> {
        self.mutate_profile(tenant_id, profile_code, |profile| {
            let before = profile.transformations.len();
            profile
                .transformations
                .retain(|t| t.transformation_id != transformation_id);
            if profile.transformations.len() == before {
                return Err(ApiError::NotFound(format!("转换 {}", transformation_id)));
            }
            Ok(())
        })
    }

    // ==========================================
    // 查找表管理
    // ==========================================

    pub fn create_lookup_table(&self, table: LookupTable) -> ApiResult<LookupTable> {
        if table.code.trim().is_empty() {
            return Err(ApiError::InvalidInput("查找表编码不能为空".to_string()));
        }
        self.lookup_repo.insert(&table)?;
        info!(code = %table.code, "查找表已创建");
        Ok(table)
    }

    pub fn update_lookup_table(&self, table: LookupTable) -> ApiResult<LookupTable> {
        self.lookup_repo.update(&table)?;
        Ok(table)
    }

    pub fn get_lookup_table(&self, tenant_id: &str, code: &str) -> ApiResult<LookupTable> {
        self.lookup_repo
            .find_by_code(tenant_id, code)?
            .ok_or_else(|| ApiError::NotFound(format!("查找表 {}", code)))
    }

    pub fn list_lookup_tables(
        &self,
        tenant_id: &str,
        request: &PageRequest,
    ) -> ApiResult<PageResponse<LookupTable>> {
        request.validate()?;
        let items = self.lookup_repo.list(
            tenant_id,
            request.filter.as_deref(),
            request.limit(),
            request.offset(),
        )?;
        let total = self.lookup_repo.count(tenant_id, request.filter.as_deref())?;
        Ok(PageResponse::new(items, total, request))
    }

    pub fn delete_lookup_table(&self, tenant_id: &str, code: &str) -> ApiResult<()> {
        self.lookup_repo.delete(tenant_id, code)?;
        info!(code = %code, "查找表已删除");
        Ok(())
    }

    // ==========================================
    // 内部辅助
    // ==========================================

    /// 读取-变更-校验-落库的统一路径
    fn mutate_profile(
        &self,
        tenant_id: &str,
        profile_code: &str,
        mutate: impl FnOnce(&mut ExchangeProfile) -> ApiResult<()>,
    ) -> ApiResult<ExchangeProfile> {
        let mut profile = self.get_profile(tenant_id, profile_code)?;
        if profile.is_system {
            return Err(ApiError::SystemProfileImmutable(profile.code));
        }

        mutate(&mut profile)?;
        self.check_profile(&profile)?;
        self.profile_repo.update(&profile)?;
        Ok(profile)
    }

    /// 配置完整性校验（查找表引用按当前租户数据）
    fn check_profile(&self, profile: &ExchangeProfile) -> ApiResult<()> {
        let tables = self
            .lookup_repo
            .list(&profile.tenant_id, None, i64::MAX, 0)?;
        let lookups = LookupStore::from_tables(tables);
        validate_profile(profile, &lookups, &self.transformer, &self.validator)?;
        Ok(())
    }
}
