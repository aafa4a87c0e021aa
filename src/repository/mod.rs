// ==========================================
// 数据交换引擎 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// 职责: 提供数据访问接口，屏蔽数据库细节
// 约束: 所有查询使用参数化，防止 SQL 注入
// ==========================================

pub mod codec;
pub mod error;
pub mod job_repo;
pub mod job_repo_impl;
pub mod lookup_repo;
pub mod profile_repo;
pub mod schedule_repo;

// 重导出核心仓储
pub use error::{RepositoryError, RepositoryResult};
pub use job_repo::ExchangeJobRepository;
pub use job_repo_impl::ExchangeJobRepositoryImpl;
pub use lookup_repo::{LookupTableRepository, LookupTableRepositoryImpl};
pub use profile_repo::{ProfileRepository, ProfileRepositoryImpl};
pub use schedule_repo::{ScheduledExchangeRepository, ScheduledExchangeRepositoryImpl};
