// ==========================================
// 数据交换引擎 - 分页请求/响应
// ==========================================
// 职责: 列表接口的统一分页/排序/过滤参数
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use serde::{Deserialize, Serialize};

/// 每页上限
pub const MAX_PAGE_SIZE: i64 = 500;

// ==========================================
// PageRequest
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRequest {
    /// 页码（1 起）
    pub page: i64,
    pub page_size: i64,
    /// 排序列（各接口白名单校验）
    pub sort_by: Option<String>,
    pub sort_desc: bool,
    /// 自由文本过滤（code/name LIKE）
    pub filter: Option<String>,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 50,
            sort_by: None,
            sort_desc: false,
            filter: None,
        }
    }
}

impl PageRequest {
    pub fn validate(&self) -> ApiResult<()> {
        if self.page < 1 {
            return Err(ApiError::InvalidInput(format!(
                "page 必须 >= 1，实际 {}",
                self.page
            )));
        }
        if self.page_size < 1 || self.page_size > MAX_PAGE_SIZE {
            return Err(ApiError::InvalidInput(format!(
                "page_size 必须在 1..={}，实际 {}",
                MAX_PAGE_SIZE, self.page_size
            )));
        }
        Ok(())
    }

    pub fn limit(&self) -> i64 {
        self.page_size
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.page_size
    }
}

// ==========================================
// PageResponse
// ==========================================
#[derive(Debug, Clone, Serialize)]
pub struct PageResponse<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

impl<T> PageResponse<T> {
    pub fn new(items: Vec<T>, total: i64, request: &PageRequest) -> Self {
        Self {
            items,
            total,
            page: request.page,
            page_size: request.page_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_calc() {
        let request = PageRequest {
            page: 3,
            page_size: 20,
            ..Default::default()
        };
        assert_eq!(request.offset(), 40);
        assert_eq!(request.limit(), 20);
    }

    #[test]
    fn test_validate_bounds() {
        let mut request = PageRequest::default();
        assert!(request.validate().is_ok());

        request.page = 0;
        assert!(request.validate().is_err());

        request.page = 1;
        request.page_size = MAX_PAGE_SIZE + 1;
        assert!(request.validate().is_err());
    }
}
