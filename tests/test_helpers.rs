// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 提供测试所需的数据库初始化、内存宿主实现、引擎装配
// ==========================================

use async_trait::async_trait;
use data_exchange::config::StaticExchangeConfig;
use data_exchange::domain::profile::{ExchangeProfile, FieldMapping, RuleConfig, ValidationRule};
use data_exchange::domain::types::{ExchangeDirection, FieldType};
use data_exchange::domain::value::{FieldValue, MappedRecord};
use data_exchange::engine::entity_handler::EntityHandlerRegistry;
use data_exchange::engine::orchestrator::ExchangeOrchestrator;
use data_exchange::engine::rollback::RollbackManager;
use data_exchange::engine::scheduler::ScheduledExchangeService;
use data_exchange::exchange::error::{ExchangeError, ExchangeResult};
use data_exchange::exchange::file_parser::ParserRegistry;
use data_exchange::exchange::traits::{Connector, EntityHandler, NoopNotifier};
use data_exchange::exchange::transformer::Transformer;
use data_exchange::exchange::validator::ValidationEngine;
use data_exchange::repository::{
    ExchangeJobRepositoryImpl, LookupTableRepositoryImpl, ProfileRepositoryImpl,
    ScheduledExchangeRepositoryImpl,
};
use data_exchange::api::{JobApi, ProfileApi, ScheduleApi};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;

pub const TENANT: &str = "tenant-001";

// ==========================================
// 内存实体存储（contacts 等宿主实体的测试替身）
// ==========================================
#[derive(Default)]
pub struct MemoryEntityStore {
    pub entities: Mutex<BTreeMap<String, serde_json::Value>>,
    next_id: AtomicUsize,
    pub create_calls: AtomicUsize,
    pub update_calls: AtomicUsize,
    pub delete_calls: AtomicUsize,
    /// 指定实体 id 的 delete 注入失败（回滚失败路径测试）
    pub fail_delete_of: Mutex<Option<String>>,
}

impl MemoryEntityStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed(&self, fields: &[(&str, serde_json::Value)]) -> String {
        let id = format!("e-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let mut obj = serde_json::Map::new();
        for (k, v) in fields {
            obj.insert(k.to_string(), v.clone());
        }
        self.entities
            .lock()
            .unwrap()
            .insert(id.clone(), serde_json::Value::Object(obj));
        id
    }

    pub fn count(&self) -> usize {
        self.entities.lock().unwrap().len()
    }

    pub fn get_value(&self, id: &str) -> Option<serde_json::Value> {
        self.entities.lock().unwrap().get(id).cloned()
    }
}

pub struct MemoryEntityHandler {
    pub store: Arc<MemoryEntityStore>,
}

#[async_trait]
impl EntityHandler for MemoryEntityHandler {
    async fn create(&self, record: &MappedRecord) -> ExchangeResult<String> {
        self.store.create_calls.fetch_add(1, Ordering::SeqCst);
        let id = format!(
            "e-{}",
            self.store.next_id.fetch_add(1, Ordering::SeqCst) + 1
        );
        self.store
            .entities
            .lock()
            .unwrap()
            .insert(id.clone(), record.to_json());
        Ok(id)
    }

    async fn update(&self, entity_id: &str, record: &MappedRecord) -> ExchangeResult<()> {
        self.store.update_calls.fetch_add(1, Ordering::SeqCst);
        let mut entities = self.store.entities.lock().unwrap();
        let entity = entities
            .get_mut(entity_id)
            .ok_or_else(|| ExchangeError::InternalError(format!("实体不存在: {}", entity_id)))?;
        if let serde_json::Value::Object(obj) = entity {
            for (field, value) in record.iter() {
                obj.insert(field.clone(), value.to_json());
            }
        }
        Ok(())
    }

    async fn find(
        &self,
        criteria: &[(String, FieldValue)],
    ) -> ExchangeResult<Option<String>> {
        let entities = self.store.entities.lock().unwrap();
        for (id, entity) in entities.iter() {
            let all_match = criteria.iter().all(|(field, value)| {
                entity.get(field).map(|v| v == &value.to_json()).unwrap_or(false)
            });
            if all_match {
                return Ok(Some(id.clone()));
            }
        }
        Ok(None)
    }

    async fn get(&self, entity_id: &str) -> ExchangeResult<Option<serde_json::Value>> {
        Ok(self.store.get_value(entity_id))
    }

    async fn delete(&self, entity_id: &str) -> ExchangeResult<()> {
        if self
            .store
            .fail_delete_of
            .lock()
            .unwrap()
            .as_deref()
            == Some(entity_id)
        {
            return Err(ExchangeError::InternalError(format!(
                "注入的删除失败: {}",
                entity_id
            )));
        }
        self.store.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.store.entities.lock().unwrap().remove(entity_id);
        Ok(())
    }

    async fn list(
        &self,
        _filters: &serde_json::Value,
        fields: &[String],
        limit: i64,
        offset: i64,
    ) -> ExchangeResult<Vec<serde_json::Value>> {
        let entities = self.store.entities.lock().unwrap();
        let page: Vec<serde_json::Value> = entities
            .values()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|entity| {
                if fields.is_empty() {
                    entity.clone()
                } else {
                    let mut obj = serde_json::Map::new();
                    for field in fields {
                        if let Some(v) = entity.get(field) {
                            obj.insert(field.clone(), v.clone());
                        }
                    }
                    serde_json::Value::Object(obj)
                }
            })
            .collect();
        Ok(page)
    }
}

// ==========================================
// 内存连接器（可注入取文件失败次数）
// ==========================================
#[derive(Default)]
pub struct MemoryConnector {
    pub files: Mutex<HashMap<String, Vec<u8>>>,
    pub remaining_fetch_failures: AtomicUsize,
    pub fetch_calls: AtomicUsize,
}

impl MemoryConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put(&self, path: &str, bytes: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), bytes.to_vec());
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn fetch(&self, path: &str) -> ExchangeResult<Vec<u8>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.remaining_fetch_failures.load(Ordering::SeqCst) > 0 {
            self.remaining_fetch_failures.fetch_sub(1, Ordering::SeqCst);
            return Err(ExchangeError::ConnectorFetchError(
                "注入的连接失败".to_string(),
            ));
        }
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| ExchangeError::ConnectorFetchError(format!("文件不存在: {}", path)))
    }

    async fn store(&self, path: &str, bytes: &[u8]) -> ExchangeResult<()> {
        self.put(path, bytes);
        Ok(())
    }
}

// ==========================================
// 引擎装配
// ==========================================
pub struct TestEngine {
    pub profile_repo: Arc<ProfileRepositoryImpl>,
    pub job_repo: Arc<ExchangeJobRepositoryImpl>,
    pub lookup_repo: Arc<LookupTableRepositoryImpl>,
    pub schedule_repo: Arc<ScheduledExchangeRepositoryImpl>,
    pub store: Arc<MemoryEntityStore>,
    pub orchestrator: Arc<ExchangeOrchestrator>,
    pub scheduler: Arc<ScheduledExchangeService>,
    pub job_api: JobApi,
    pub profile_api: ProfileApi,
    pub schedule_api: ScheduleApi,
    // 临时数据库文件需保持存活
    _db_file: NamedTempFile,
}

/// 创建临时数据库 + 全内存宿主的完整引擎
pub fn setup_engine() -> TestEngine {
    let db_file = NamedTempFile::new().expect("创建临时数据库失败");
    let db_path = db_file.path().to_str().unwrap().to_string();

    let conn = data_exchange::db::open_sqlite_connection(&db_path).expect("打开数据库失败");
    data_exchange::db::init_engine_schema(&conn).expect("初始化表结构失败");
    let conn = Arc::new(Mutex::new(conn));

    let profile_repo = Arc::new(ProfileRepositoryImpl::from_connection(conn.clone()));
    let job_repo = Arc::new(ExchangeJobRepositoryImpl::from_connection(conn.clone()));
    let lookup_repo = Arc::new(LookupTableRepositoryImpl::from_connection(conn.clone()));
    let schedule_repo = Arc::new(ScheduledExchangeRepositoryImpl::from_connection(conn));

    let store = MemoryEntityStore::new();
    let mut handlers = EntityHandlerRegistry::new();
    handlers.register(
        "contacts",
        Arc::new(MemoryEntityHandler {
            store: store.clone(),
        }),
    );
    let handlers = Arc::new(handlers);

    // 测试不等待重试间隔
    let config = Arc::new(StaticExchangeConfig {
        connector_retry_delay_ms: 1,
        ..StaticExchangeConfig::default()
    });

    let transformer = Arc::new(Transformer::new());
    let validator = Arc::new(ValidationEngine::new());

    let orchestrator = Arc::new(ExchangeOrchestrator::new(
        profile_repo.clone(),
        job_repo.clone(),
        lookup_repo.clone(),
        handlers.clone(),
        Arc::new(ParserRegistry::new()),
        transformer.clone(),
        validator.clone(),
        Arc::new(NoopNotifier),
        config,
    ));

    let rollback = Arc::new(RollbackManager::new(job_repo.clone(), handlers));
    let scheduler = Arc::new(ScheduledExchangeService::new(
        schedule_repo.clone(),
        profile_repo.clone(),
        job_repo.clone(),
        orchestrator.clone(),
    ));

    let job_api = JobApi::new(
        job_repo.clone(),
        profile_repo.clone(),
        orchestrator.clone(),
        rollback,
    );
    let profile_api = ProfileApi::new(
        profile_repo.clone(),
        lookup_repo.clone(),
        transformer,
        validator,
    );
    let schedule_api = ScheduleApi::new(
        schedule_repo.clone(),
        profile_repo.clone(),
        scheduler.clone(),
    );

    TestEngine {
        profile_repo,
        job_repo,
        lookup_repo,
        schedule_repo,
        store,
        orchestrator,
        scheduler,
        job_api,
        profile_api,
        schedule_api,
        _db_file: db_file,
    }
}

// ==========================================
// 配置构造
// ==========================================

/// 联系人导入配置: Name→name, Email→email(必填/key), Age→age(整数)
pub fn contacts_import_profile() -> ExchangeProfile {
    let mut profile = ExchangeProfile::new(
        TENANT,
        "contacts_import",
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

    let mut required = ValidationRule::new(
        &profile.profile_id,
        "email_required",
        Some("Email"),
        RuleConfig::Required,
    );
    required.sort_order = 1;
    profile.rules = vec![required];

    profile
}

/// 标准 4 行联系人 CSV（第 2 行缺 Email）
pub fn contacts_csv_with_missing_email() -> Vec<u8> {
    b"Name,Email,Age\n\
      Alice,alice@example.com,30\n\
      Bob,,41\n\
      Carol,carol@example.com,28\n\
      Dave,dave@example.com,35\n"
        .to_vec()
}

pub fn contacts_csv_clean() -> Vec<u8> {
    b"Name,Email,Age\n\
      Alice,alice@example.com,30\n\
      Bob,bob@example.com,41\n\
      Carol,carol@example.com,28\n"
        .to_vec()
}
