// ==========================================
// 数据交换引擎 - 配置 API 测试
// ==========================================
// 覆盖: 编码唯一 / 系统配置不可变 / 软硬删除 / 配置时机校验 / 子对象管理
// ==========================================

mod test_helpers;

use data_exchange::api::{DeleteOutcome, PageRequest};
use data_exchange::domain::profile::{FieldMapping, RuleConfig, ValidationRule};
use data_exchange::domain::types::DuplicateStrategy;
use test_helpers::{contacts_csv_clean, contacts_import_profile, setup_engine, TENANT};

// ==========================================
// 编码租户内唯一
// ==========================================
#[tokio::test]
async fn test_duplicate_profile_code_rejected() {
    let engine = setup_engine();
    engine
        .profile_api
        .create_profile(contacts_import_profile())
        .unwrap();

    let err = engine
        .profile_api
        .create_profile(contacts_import_profile())
        .unwrap_err();
    assert!(err.to_string().contains("编码重复"));
}

#[tokio::test]
async fn test_same_code_in_other_tenant_allowed() {
    let engine = setup_engine();
    engine
        .profile_api
        .create_profile(contacts_import_profile())
        .unwrap();

    let mut other = contacts_import_profile();
    other.tenant_id = "tenant-002".to_string();
    // 同编码不同租户可共存
    engine.profile_api.create_profile(other).unwrap();

    // 各自租户只看到自己的
    let page = engine
        .profile_api
        .list_profiles(TENANT, &PageRequest::default())
        .unwrap();
    assert_eq!(page.total, 1);
}

// ==========================================
// 系统配置不可变
// ==========================================
#[tokio::test]
async fn test_system_profile_immutable() {
    let engine = setup_engine();
    let mut profile = contacts_import_profile();
    profile.is_system = true;
    engine.profile_api.create_profile(profile.clone()).unwrap();

    profile.name = "改名".to_string();
    let err = engine.profile_api.update_profile(profile).unwrap_err();
    assert!(err.to_string().contains("不可修改"));

    let err = engine
        .profile_api
        .delete_profile(TENANT, "contacts_import")
        .unwrap_err();
    assert!(err.to_string().contains("不可修改"));
}

// ==========================================
// 删除: 无任务物理删除，有任务软删除
// ==========================================
#[tokio::test]
async fn test_delete_profile_hard_when_unused() {
    let engine = setup_engine();
    engine
        .profile_api
        .create_profile(contacts_import_profile())
        .unwrap();

    let outcome = engine
        .profile_api
        .delete_profile(TENANT, "contacts_import")
        .unwrap();
    assert_eq!(outcome, DeleteOutcome::Deleted);
    assert!(engine
        .profile_api
        .get_profile(TENANT, "contacts_import")
        .is_err());
}

#[tokio::test]
async fn test_delete_profile_soft_when_jobs_exist() {
    let engine = setup_engine();
    engine
        .profile_api
        .create_profile(contacts_import_profile())
        .unwrap();

    // 跑一次任务产生历史
    engine
        .job_api
        .import_bytes(TENANT, "contacts_import", None, contacts_csv_clean(), None)
        .await
        .unwrap();

    let outcome = engine
        .profile_api
        .delete_profile(TENANT, "contacts_import")
        .unwrap();
    assert_eq!(outcome, DeleteOutcome::SoftDeleted);

    // 列表不再可见，但任务历史仍在
    assert!(engine
        .profile_api
        .get_profile(TENANT, "contacts_import")
        .is_err());
    assert_eq!(
        engine
            .job_api
            .list_jobs(TENANT, None, &PageRequest::default())
            .unwrap()
            .total,
        1
    );
}

// ==========================================
// 配置时机校验: UPDATE 策略无 key 字段在保存时报错
// ==========================================
#[tokio::test]
async fn test_update_strategy_without_key_rejected_at_save() {
    let engine = setup_engine();
    let mut profile = contacts_import_profile();
    profile.behavior.on_duplicate = DuplicateStrategy::Update;
    for mapping in &mut profile.mappings {
        mapping.is_key = false;
    }

    let err = engine.profile_api.create_profile(profile).unwrap_err();
    assert!(err.to_string().contains("key 字段"));
}

// ==========================================
// 子对象管理: 增删映射与规则
// ==========================================
#[tokio::test]
async fn test_mapping_and_rule_management() {
    let engine = setup_engine();
    engine
        .profile_api
        .create_profile(contacts_import_profile())
        .unwrap();

    // 加映射
    let mut phone = FieldMapping::new("", "Phone", "phone");
    phone.sort_order = 9;
    let mapping_id = phone.mapping_id.clone();
    let profile = engine
        .profile_api
        .add_field_mapping(TENANT, "contacts_import", phone)
        .unwrap();
    assert_eq!(profile.mappings.len(), 4);

    // 加规则
    let rule = ValidationRule::new(
        "",
        "phone_length",
        Some("Phone"),
        RuleConfig::MaxLength { max: 20 },
    );
    let rule_id = rule.rule_id.clone();
    let profile = engine
        .profile_api
        .add_validation_rule(TENANT, "contacts_import", rule)
        .unwrap();
    assert_eq!(profile.rules.len(), 2);

    // 删除
    let profile = engine
        .profile_api
        .remove_field_mapping(TENANT, "contacts_import", &mapping_id)
        .unwrap();
    assert_eq!(profile.mappings.len(), 3);
    let profile = engine
        .profile_api
        .remove_validation_rule(TENANT, "contacts_import", &rule_id)
        .unwrap();
    assert_eq!(profile.rules.len(), 1);

    // 删除不存在的子对象
    let err = engine
        .profile_api
        .remove_field_mapping(TENANT, "contacts_import", "ghost")
        .unwrap_err();
    assert!(err.to_string().contains("未找到"));
}

// ==========================================
// 查找表 CRUD 与编码唯一
// ==========================================
#[tokio::test]
async fn test_lookup_table_crud() {
    let engine = setup_engine();

    let mut table = data_exchange::domain::lookup::LookupTable::new(TENANT, "country_names");
    table.entries.insert("FR".to_string(), "France".to_string());
    engine.profile_api.create_lookup_table(table.clone()).unwrap();

    // 编码重复
    let err = engine
        .profile_api
        .create_lookup_table(data_exchange::domain::lookup::LookupTable::new(
            TENANT,
            "country_names",
        ))
        .unwrap_err();
    assert!(err.to_string().contains("编码重复"));

    // 更新
    table.entries.insert("DE".to_string(), "Germany".to_string());
    engine.profile_api.update_lookup_table(table).unwrap();
    let loaded = engine
        .profile_api
        .get_lookup_table(TENANT, "country_names")
        .unwrap();
    assert_eq!(loaded.entries.len(), 2);

    // 列表 + 删除
    let page = engine
        .profile_api
        .list_lookup_tables(TENANT, &PageRequest::default())
        .unwrap();
    assert_eq!(page.total, 1);

    engine
        .profile_api
        .delete_lookup_table(TENANT, "country_names")
        .unwrap();
    assert!(engine
        .profile_api
        .get_lookup_table(TENANT, "country_names")
        .is_err());
}

// ==========================================
// 分页与过滤
// ==========================================
#[tokio::test]
async fn test_profile_list_pagination_and_filter() {
    let engine = setup_engine();
    for i in 1..=5 {
        let mut profile = contacts_import_profile();
        profile.code = format!("profile_{:02}", i);
        profile.name = if i <= 2 {
            format!("订单导入 {}", i)
        } else {
            format!("联系人导入 {}", i)
        };
        engine.profile_api.create_profile(profile).unwrap();
    }

    let page = engine
        .profile_api
        .list_profiles(
            TENANT,
            &PageRequest {
                page: 2,
                page_size: 2,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(page.total, 5);
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.items[0].code, "profile_03");

    let filtered = engine
        .profile_api
        .list_profiles(
            TENANT,
            &PageRequest {
                filter: Some("订单".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(filtered.total, 2);
}
