// ==========================================
// 数据交换引擎 - 定时交换测试
// ==========================================
// 覆盖: 连续失败自动停用 / 成功清零 / 活动任务互斥 / 触发取文件重试
// ==========================================

mod test_helpers;

use data_exchange::domain::job::ExchangeJob;
use data_exchange::domain::schedule::ScheduledExchange;
use data_exchange::domain::types::{ExchangeDirection, JobStatus};
use data_exchange::engine::scheduler::ScheduleIo;
use data_exchange::repository::ExchangeJobRepository;
use std::sync::atomic::Ordering;
use test_helpers::{
    contacts_csv_clean, contacts_import_profile, setup_engine, MemoryConnector, TENANT,
};

fn schedule_for(profile_id: &str) -> ScheduledExchange {
    let mut schedule = ScheduledExchange::new(TENANT, "nightly_contacts", profile_id, "0 2 * * *");
    schedule.pause_threshold = 3;
    schedule
}

// ==========================================
// 场景: 连续 3 次失败自动停用
// ==========================================
#[tokio::test]
async fn test_three_consecutive_failures_auto_pause() {
    let engine = setup_engine();
    let profile = contacts_import_profile();
    let profile_id = profile.profile_id.clone();
    engine.profile_api.create_profile(profile).unwrap();
    engine
        .schedule_api
        .create_schedule(schedule_for(&profile_id))
        .unwrap();

    let connector = MemoryConnector::new();
    // 不放文件: 每次触发取文件失败 → 任务 FAILED

    for i in 1..=3 {
        let job = engine
            .schedule_api
            .trigger(
                TENANT,
                "nightly_contacts",
                ScheduleIo::Import {
                    connector: connector.clone(),
                    path: "in/contacts.csv".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Failed, "第 {} 次触发应失败", i);
    }

    let schedule = engine
        .schedule_api
        .get_schedule(TENANT, "nightly_contacts")
        .unwrap();
    assert!(!schedule.is_active);
    assert_eq!(schedule.consecutive_failures, 3);
    assert_eq!(schedule.failure_count, 3);
    assert_eq!(schedule.run_count, 3);

    // 停用后不可再触发
    let err = engine
        .schedule_api
        .trigger(
            TENANT,
            "nightly_contacts",
            ScheduleIo::Import {
                connector: connector.clone(),
                path: "in/contacts.csv".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("已停用"));
}

// ==========================================
// 场景: 达阈值前成功，连续失败清零
// ==========================================
#[tokio::test]
async fn test_success_resets_consecutive_failures() {
    let engine = setup_engine();
    let profile = contacts_import_profile();
    let profile_id = profile.profile_id.clone();
    engine.profile_api.create_profile(profile).unwrap();
    engine
        .schedule_api
        .create_schedule(schedule_for(&profile_id))
        .unwrap();

    let connector = MemoryConnector::new();

    // 两次失败（文件缺失）
    for _ in 0..2 {
        engine
            .schedule_api
            .trigger(
                TENANT,
                "nightly_contacts",
                ScheduleIo::Import {
                    connector: connector.clone(),
                    path: "in/contacts.csv".to_string(),
                },
            )
            .await
            .unwrap();
    }

    // 放上文件后第三次成功
    connector.put("in/contacts.csv", &contacts_csv_clean());
    let job = engine
        .schedule_api
        .trigger(
            TENANT,
            "nightly_contacts",
            ScheduleIo::Import {
                connector: connector.clone(),
                path: "in/contacts.csv".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Completed);

    let schedule = engine
        .schedule_api
        .get_schedule(TENANT, "nightly_contacts")
        .unwrap();
    assert!(schedule.is_active);
    assert_eq!(schedule.consecutive_failures, 0);
    assert_eq!(schedule.failure_count, 2);
    assert_eq!(schedule.run_count, 3);
    assert!(schedule.last_run_at.is_some());
}

// ==========================================
// 互斥: 同 (profile, connector) 已有活动任务则拒绝
// ==========================================
#[tokio::test]
async fn test_trigger_rejected_while_prior_run_active() {
    let engine = setup_engine();
    let profile = contacts_import_profile();
    let profile_id = profile.profile_id.clone();
    engine.profile_api.create_profile(profile).unwrap();
    engine
        .schedule_api
        .create_schedule(schedule_for(&profile_id))
        .unwrap();

    // 手工落一条 PROCESSING 任务占住 (profile, connector=None)
    let mut running = ExchangeJob::new(TENANT, &profile_id, ExchangeDirection::Import);
    running.transition_to(JobStatus::Pending);
    running.transition_to(JobStatus::Processing);
    engine.job_repo.insert_job(&running).unwrap();

    let connector = MemoryConnector::new();
    connector.put("in/contacts.csv", &contacts_csv_clean());

    let err = engine
        .schedule_api
        .trigger(
            TENANT,
            "nightly_contacts",
            ScheduleIo::Import {
                connector,
                path: "in/contacts.csv".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("运行中的任务"));

    // 被拒绝的触发不产生簿记
    let schedule = engine
        .schedule_api
        .get_schedule(TENANT, "nightly_contacts")
        .unwrap();
    assert_eq!(schedule.run_count, 0);
}

// ==========================================
// 连接失败重试: 前两次失败第三次成功
// ==========================================
#[tokio::test]
async fn test_connector_fetch_retry_then_success() {
    let engine = setup_engine();
    let profile = contacts_import_profile();
    let profile_id = profile.profile_id.clone();
    engine.profile_api.create_profile(profile).unwrap();
    engine
        .schedule_api
        .create_schedule(schedule_for(&profile_id))
        .unwrap();

    let connector = MemoryConnector::new();
    connector.put("in/contacts.csv", &contacts_csv_clean());
    connector.remaining_fetch_failures.store(2, Ordering::SeqCst);

    let job = engine
        .schedule_api
        .trigger(
            TENANT,
            "nightly_contacts",
            ScheduleIo::Import {
                connector: connector.clone(),
                path: "in/contacts.csv".to_string(),
            },
        )
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    // 2 次失败 + 1 次成功
    assert_eq!(connector.fetch_calls.load(Ordering::SeqCst), 3);
}

// ==========================================
// next_run_at 由调用方推进
// ==========================================
#[tokio::test]
async fn test_advance_next_run() {
    let engine = setup_engine();
    let profile = contacts_import_profile();
    let profile_id = profile.profile_id.clone();
    engine.profile_api.create_profile(profile).unwrap();
    engine
        .schedule_api
        .create_schedule(schedule_for(&profile_id))
        .unwrap();

    let next = chrono::Utc::now() + chrono::Duration::hours(24);
    let updated = engine
        .schedule_api
        .advance_next_run(TENANT, "nightly_contacts", next)
        .unwrap();
    assert_eq!(updated.next_run_at, Some(next));
}
