// ==========================================
// 数据交换引擎 - 导出与往返测试
// ==========================================
// 覆盖: 导出两阶段状态机 / 连接器写出 / 导出→导入往返保真
// ==========================================

mod test_helpers;

use data_exchange::domain::profile::{ExchangeProfile, FieldMapping};
use data_exchange::domain::types::{ExchangeDirection, FieldType, FileFormat, JobStatus};
use test_helpers::{setup_engine, MemoryConnector, TENANT};

/// 联系人导出配置（实体字段 → 输出列）
fn contacts_export_profile() -> ExchangeProfile {
    let mut profile = ExchangeProfile::new(
        TENANT,
        "contacts_export",
        ExchangeDirection::Export,
        "contacts",
    );
    let mut name = FieldMapping::new(&profile.profile_id, "name", "Name");
    name.sort_order = 1;
    let mut email = FieldMapping::new(&profile.profile_id, "email", "Email");
    email.sort_order = 2;
    let mut age = FieldMapping::new(&profile.profile_id, "age", "Age");
    age.target_type = FieldType::Integer;
    age.sort_order = 3;
    profile.mappings = vec![name, email, age];
    profile
}

/// 对应的往返导入配置（输出列 → 实体字段）
fn contacts_reimport_profile() -> ExchangeProfile {
    let mut profile = ExchangeProfile::new(
        TENANT,
        "contacts_reimport",
        ExchangeDirection::Import,
        "contacts",
    );
    let mut name = FieldMapping::new(&profile.profile_id, "Name", "name");
    name.sort_order = 1;
    let mut email = FieldMapping::new(&profile.profile_id, "Email", "email");
    email.is_key = true;
    email.sort_order = 2;
    let mut age = FieldMapping::new(&profile.profile_id, "Age", "age");
    age.target_type = FieldType::Integer;
    age.sort_order = 3;
    profile.mappings = vec![name, email, age];
    profile
}

fn seed_contacts(engine: &test_helpers::TestEngine) {
    engine.store.seed(&[
        ("name", serde_json::json!("Alice")),
        ("email", serde_json::json!("alice@example.com")),
        ("age", serde_json::json!(30)),
    ]);
    engine.store.seed(&[
        ("name", serde_json::json!("Bob")),
        ("email", serde_json::json!("bob@example.com")),
        ("age", serde_json::json!(41)),
    ]);
}

// ==========================================
// 导出: 字节返回 + 两阶段状态机
// ==========================================
#[tokio::test]
async fn test_csv_export_returns_bytes() {
    let engine = setup_engine();
    engine
        .profile_api
        .create_profile(contacts_export_profile())
        .unwrap();
    seed_contacts(&engine);

    let outcome = engine
        .job_api
        .export(TENANT, "contacts_export", None, None)
        .await
        .unwrap();

    assert_eq!(outcome.job.status, JobStatus::Completed);
    assert_eq!(outcome.job.counters.processed_rows, 2);

    let text = String::from_utf8(outcome.bytes.unwrap()).unwrap();
    assert!(text.starts_with("Name,Email,Age"));
    assert!(text.contains("Alice,alice@example.com,30"));
    assert!(text.contains("Bob,bob@example.com,41"));
}

#[tokio::test]
async fn test_export_stores_via_connector() {
    let engine = setup_engine();
    engine
        .profile_api
        .create_profile(contacts_export_profile())
        .unwrap();
    seed_contacts(&engine);

    let connector = MemoryConnector::new();
    let outcome = engine
        .job_api
        .export(
            TENANT,
            "contacts_export",
            Some((connector.clone(), "out/contacts.csv".to_string())),
            None,
        )
        .await
        .unwrap();

    assert_eq!(outcome.job.status, JobStatus::Completed);
    assert!(outcome.bytes.is_none());
    assert_eq!(outcome.job.file_name.as_deref(), Some("out/contacts.csv"));

    let stored = connector.files.lock().unwrap();
    assert!(stored.contains_key("out/contacts.csv"));
}

// ==========================================
// 往返: 导出产物用逆向映射导入还原字段值
// ==========================================
#[tokio::test]
async fn test_export_then_reimport_round_trip() {
    let engine = setup_engine();
    engine
        .profile_api
        .create_profile(contacts_export_profile())
        .unwrap();
    engine
        .profile_api
        .create_profile(contacts_reimport_profile())
        .unwrap();
    seed_contacts(&engine);

    let outcome = engine
        .job_api
        .export(TENANT, "contacts_export", None, None)
        .await
        .unwrap();
    let bytes = outcome.bytes.unwrap();

    // 清空实体后按逆向映射导入
    engine.store.entities.lock().unwrap().clear();
    let job = engine
        .job_api
        .import_bytes(TENANT, "contacts_reimport", None, bytes, None)
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.counters.created_count, 2);

    let entities: Vec<_> = engine
        .store
        .entities
        .lock()
        .unwrap()
        .values()
        .cloned()
        .collect();
    let alice = entities.iter().find(|e| e["name"] == "Alice").unwrap();
    assert_eq!(alice["email"], "alice@example.com");
    assert_eq!(alice["age"], 30);
    let bob = entities.iter().find(|e| e["name"] == "Bob").unwrap();
    assert_eq!(bob["age"], 41);
}

// ==========================================
// Excel 导出未内置: 任务失败并带顶层消息
// ==========================================
#[tokio::test]
async fn test_excel_export_fails_with_unsupported_format() {
    let engine = setup_engine();
    let mut profile = contacts_export_profile();
    profile.file_format = FileFormat::Excel;
    engine.profile_api.create_profile(profile).unwrap();
    seed_contacts(&engine);

    let outcome = engine
        .job_api
        .export(TENANT, "contacts_export", None, None)
        .await
        .unwrap();

    assert_eq!(outcome.job.status, JobStatus::Failed);
    assert!(outcome
        .job
        .error_message
        .as_deref()
        .unwrap()
        .contains("不支持"));
    assert!(outcome.bytes.is_none());
}
