// ==========================================
// 数据交换引擎 - 引擎配置读取 Trait
// ==========================================
// 职责: 定义引擎运行所需的配置读取接口（不包含写入）
// 实现者: StaticExchangeConfig（内置缺省）；宿主可从配置表/环境实现
// ==========================================

use async_trait::async_trait;
use std::error::Error;

// ==========================================
// ExchangeConfigReader Trait
// ==========================================
#[async_trait]
pub trait ExchangeConfigReader: Send + Sync {
    /// 预览取样行数上限
    ///
    /// # 默认值
    /// - 20
    async fn get_preview_sample_rows(&self) -> Result<usize, Box<dyn Error>>;

    /// 连接器取/存文件的重试次数（连接类失败才重试）
    ///
    /// # 默认值
    /// - 3
    async fn get_connector_retry_count(&self) -> Result<u32, Box<dyn Error>>;

    /// 连接器重试间隔（毫秒）
    ///
    /// # 默认值
    /// - 500
    async fn get_connector_retry_delay_ms(&self) -> Result<u64, Box<dyn Error>>;

    /// 导入文件大小上限（字节，0 = 不限制）
    ///
    /// # 默认值
    /// - 64 MiB
    async fn get_max_file_bytes(&self) -> Result<usize, Box<dyn Error>>;

    /// 导出查询分页大小
    ///
    /// # 默认值
    /// - 500
    async fn get_export_page_size(&self) -> Result<i64, Box<dyn Error>>;
}

// ==========================================
// StaticExchangeConfig - 静态配置实现
// ==========================================
#[derive(Debug, Clone)]
pub struct StaticExchangeConfig {
    pub preview_sample_rows: usize,
    pub connector_retry_count: u32,
    pub connector_retry_delay_ms: u64,
    pub max_file_bytes: usize,
    pub export_page_size: i64,
}

impl Default for StaticExchangeConfig {
    fn default() -> Self {
        Self {
            preview_sample_rows: 20,
            connector_retry_count: 3,
            connector_retry_delay_ms: 500,
            max_file_bytes: 64 * 1024 * 1024,
            export_page_size: 500,
        }
    }
}

#[async_trait]
impl ExchangeConfigReader for StaticExchangeConfig {
    async fn get_preview_sample_rows(&self) -> Result<usize, Box<dyn Error>> {
        Ok(self.preview_sample_rows)
    }

    async fn get_connector_retry_count(&self) -> Result<u32, Box<dyn Error>> {
        Ok(self.connector_retry_count)
    }

    async fn get_connector_retry_delay_ms(&self) -> Result<u64, Box<dyn Error>> {
        Ok(self.connector_retry_delay_ms)
    }

    async fn get_max_file_bytes(&self) -> Result<usize, Box<dyn Error>> {
        Ok(self.max_file_bytes)
    }

    async fn get_export_page_size(&self) -> Result<i64, Box<dyn Error>> {
        Ok(self.export_page_size)
    }
}
