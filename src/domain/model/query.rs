use serde::{Deserialize, Serialize};

use super::id::BookId;

/// 1冊分の木が収まる取得件数
pub const DEFAULT_TREE_TAKE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortType {
    Asc,
    Desc,
}

/// GET /menu-book のクエリ。`book_id` は必須。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MenuQuery {
    pub book_id: BookId,
    pub page: u32,
    pub take: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_type: Option<SortType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
}

impl MenuQuery {
    /// 木の再構築用。部分木が欠けないよう1ページで全行を取る。
    pub fn whole_tree(book_id: BookId, take: u32) -> Self {
        Self {
            book_id,
            page: 1,
            take,
            sort_field: Some("order".to_string()),
            sort_type: Some(SortType::Asc),
            search: None,
        }
    }
}

/// GET /exams のクエリ
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExamQuery {
    pub page: u32,
    pub take: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub take: u32,
    #[serde(default, alias = "total", alias = "itemCount")]
    pub total_item: u64,
}

impl Pagination {
    pub fn has_next(&self) -> bool {
        self.take > 0 && u64::from(self.page) * u64::from(self.take) < self.total_item
    }
}

/// `{ data: [...], pagination }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    #[serde(rename = "data")]
    pub items: Vec<T>,
    #[serde(default)]
    pub pagination: Pagination,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn whole_tree_query_string() {
        let q = MenuQuery::whole_tree(BookId::new("b1"), DEFAULT_TREE_TAKE);
        let value = serde_json::to_value(&q).unwrap();
        assert_eq!(
            value,
            json!({
                "book_id": "b1",
                "page": 1,
                "take": 100,
                "sort_field": "order",
                "sort_type": "ASC"
            })
        );
    }

    #[test]
    fn page_deserializes_envelope_body() {
        let page: Page<u32> = serde_json::from_value(json!({
            "data": [1, 2],
            "pagination": { "page": 1, "take": 2, "total": 5 }
        }))
        .unwrap();
        assert_eq!(page.items, vec![1, 2]);
        assert!(page.pagination.has_next());
    }
}
