// ==========================================
// 数据交换引擎 - 配置层
// ==========================================
// 职责: 引擎运行参数的读取接口与静态实现
// ==========================================

pub mod exchange_config;

pub use exchange_config::{ExchangeConfigReader, StaticExchangeConfig};
