// ==========================================
// 数据交换引擎 - 回滚测试
// ==========================================
// 覆盖: 回滚资格 / 真逆操作 / 重复回滚拒绝 / 中途失败保持状态
// ==========================================

mod test_helpers;

use data_exchange::domain::job::ExchangeJob;
use data_exchange::domain::types::{DuplicateStrategy, ExchangeDirection, JobStatus};
use data_exchange::repository::ExchangeJobRepository;
use test_helpers::{contacts_csv_clean, contacts_import_profile, setup_engine, TENANT};

// ==========================================
// 资格: DRAFT 任务不可回滚
// ==========================================
#[tokio::test]
async fn test_draft_job_not_rollback_eligible() {
    let engine = setup_engine();
    let profile = contacts_import_profile();
    let profile_id = profile.profile_id.clone();
    engine.profile_api.create_profile(profile).unwrap();

    // 直接落一条 DRAFT 任务
    let job = ExchangeJob::new(TENANT, &profile_id, ExchangeDirection::Import);
    engine.job_repo.insert_job(&job).unwrap();

    let err = engine
        .job_api
        .rollback_job(TENANT, &job.job_id)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("不可回滚"));
}

#[tokio::test]
async fn test_failed_job_not_rollback_eligible() {
    let engine = setup_engine();
    let profile = contacts_import_profile();
    let profile_id = profile.profile_id.clone();
    engine.profile_api.create_profile(profile).unwrap();

    let mut job = ExchangeJob::new(TENANT, &profile_id, ExchangeDirection::Import);
    job.transition_to(JobStatus::Pending);
    job.transition_to(JobStatus::Failed);
    engine.job_repo.insert_job(&job).unwrap();

    let err = engine
        .job_api
        .rollback_job(TENANT, &job.job_id)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("不可回滚"));
}

// ==========================================
// 真逆操作: 创建删除 + 更新还原
// ==========================================
#[tokio::test]
async fn test_rollback_is_true_inverse() {
    let engine = setup_engine();
    let mut profile = contacts_import_profile();
    profile.behavior.on_duplicate = DuplicateStrategy::Update;
    engine.profile_api.create_profile(profile).unwrap();

    // 预置一条将被更新的实体
    let existing_id = engine.store.seed(&[
        ("name", serde_json::json!("原始名")),
        ("email", serde_json::json!("alice@example.com")),
        ("age", serde_json::json!(99)),
    ]);

    // Alice 命中更新，Bob/Carol 新建
    let job = engine
        .job_api
        .import_bytes(TENANT, "contacts_import", None, contacts_csv_clean(), None)
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.counters.updated_count, 1);
    assert_eq!(job.counters.created_count, 2);
    assert!(job.rollback_available);
    assert_eq!(engine.store.count(), 3);

    // 更新已生效
    assert_eq!(
        engine.store.get_value(&existing_id).unwrap()["name"],
        "Alice"
    );

    let report = engine
        .job_api
        .rollback_job(TENANT, &job.job_id)
        .await
        .unwrap();
    assert_eq!(report.job.status, JobStatus::RolledBack);
    assert_eq!(report.reverted_entities.len(), 3);

    // 新建的实体已删除，更新的实体恢复原值
    assert_eq!(engine.store.count(), 1);
    let restored = engine.store.get_value(&existing_id).unwrap();
    assert_eq!(restored["name"], "原始名");
    assert_eq!(restored["age"], 99);
}

// ==========================================
// 重复回滚拒绝
// ==========================================
#[tokio::test]
async fn test_double_rollback_rejected() {
    let engine = setup_engine();
    engine
        .profile_api
        .create_profile(contacts_import_profile())
        .unwrap();

    let job = engine
        .job_api
        .import_bytes(TENANT, "contacts_import", None, contacts_csv_clean(), None)
        .await
        .unwrap();

    engine
        .job_api
        .rollback_job(TENANT, &job.job_id)
        .await
        .unwrap();

    let err = engine
        .job_api
        .rollback_job(TENANT, &job.job_id)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("不可重复回滚"));
}

// ==========================================
// 中途失败: 任务状态不变，报告已回退实体数
// ==========================================
#[tokio::test]
async fn test_rollback_failure_leaves_job_state() {
    let engine = setup_engine();
    engine
        .profile_api
        .create_profile(contacts_import_profile())
        .unwrap();

    let job = engine
        .job_api
        .import_bytes(TENANT, "contacts_import", None, contacts_csv_clean(), None)
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Completed);

    // 注入: 第一个创建的实体删除失败（倒序回滚，先删后两个）
    *engine.store.fail_delete_of.lock().unwrap() = Some("e-1".to_string());

    let err = engine
        .job_api
        .rollback_job(TENANT, &job.job_id)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("回滚失败"));
    // 已回退 2 个（e-3/e-2），失败于 e-1
    assert!(err.to_string().contains("已回退 2 条"));

    // 任务状态保持 COMPLETED
    let after = engine.job_api.get_job(TENANT, &job.job_id).unwrap();
    assert_eq!(after.status, JobStatus::Completed);
}

// ==========================================
// rollback_enabled=false: 无回滚数据
// ==========================================
#[tokio::test]
async fn test_rollback_disabled_means_no_rollback_data() {
    let engine = setup_engine();
    let mut profile = contacts_import_profile();
    profile.behavior.rollback_enabled = false;
    engine.profile_api.create_profile(profile).unwrap();

    let job = engine
        .job_api
        .import_bytes(TENANT, "contacts_import", None, contacts_csv_clean(), None)
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(!job.rollback_available);

    let err = engine
        .job_api
        .rollback_job(TENANT, &job.job_id)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("不可回滚"));
}
