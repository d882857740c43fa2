use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Uniform `{ success, data, message }` wrapper used by every endpoint, and
/// by the remote API this service can front.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn ok_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: Some(message.into()),
        }
    }
}

impl ApiResponse<()> {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: None,
            message: Some(message.into()),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
        }
    }
}

/// One page of a longer listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
}

impl<T: Clone> Page<T> {
    /// `page` is 1-based; 0 is treated as 1.
    pub fn slice(all: &[T], page: usize, limit: usize) -> Self {
        let page = page.max(1);
        let start = (page - 1).saturating_mul(limit).min(all.len());
        let end = start.saturating_add(limit).min(all.len());
        Self {
            items: all[start..end].to_vec(),
            total: all.len(),
            page,
            limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_envelope_omits_message() {
        let v = serde_json::to_value(ApiResponse::ok(vec![1, 2])).unwrap();
        assert_eq!(v, serde_json::json!({ "success": true, "data": [1, 2] }));
    }

    #[test]
    fn failure_envelope_has_no_data() {
        let v = serde_json::to_value(ApiResponse::failure("nope")).unwrap();
        assert_eq!(v, serde_json::json!({ "success": false, "message": "nope" }));
    }

    #[test]
    fn page_slices_and_clamps() {
        let all: Vec<u32> = (1..=25).collect();
        let p = Page::slice(&all, 3, 10);
        assert_eq!(p.items, vec![21, 22, 23, 24, 25]);
        assert_eq!(p.total, 25);

        let past_end = Page::slice(&all, 9, 10);
        assert!(past_end.items.is_empty());

        let zero = Page::slice(&all, 0, 2);
        assert_eq!(zero.page, 1);
        assert_eq!(zero.items, vec![1, 2]);
    }
}
