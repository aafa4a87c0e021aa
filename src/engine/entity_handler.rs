// ==========================================
// 数据交换引擎 - 实体处理器注册表
// ==========================================
// 职责: 按 entity_type 标签查找宿主能力实现（避免反射式分发）
// ==========================================

use crate::domain::value::FieldValue;
use crate::exchange::error::{ExchangeError, ExchangeResult};
use crate::exchange::traits::{EntityHandler, ReferenceLookup};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

// ==========================================
// EntityHandlerRegistry
// ==========================================
#[derive(Default)]
pub struct EntityHandlerRegistry {
    handlers: HashMap<String, Arc<dyn EntityHandler>>,
}

impl EntityHandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// 注册实体类型处理器（同名覆盖）
    pub fn register(&mut self, entity_type: &str, handler: Arc<dyn EntityHandler>) {
        self.handlers.insert(entity_type.to_string(), handler);
    }

    pub fn get(&self, entity_type: &str) -> ExchangeResult<Arc<dyn EntityHandler>> {
        self.handlers
            .get(entity_type)
            .cloned()
            .ok_or_else(|| ExchangeError::EntityHandlerNotFound(entity_type.to_string()))
    }

    pub fn contains(&self, entity_type: &str) -> bool {
        self.handlers.contains_key(entity_type)
    }
}

// reference 规则的存在性检查走同一注册表
#[async_trait]
impl ReferenceLookup for EntityHandlerRegistry {
    async fn exists(&self, entity_type: &str, field: &str, value: &str) -> ExchangeResult<bool> {
        let handler = self.get(entity_type)?;
        let criteria = vec![(field.to_string(), FieldValue::Text(value.to_string()))];
        Ok(handler.find(&criteria).await?.is_some())
    }
}
