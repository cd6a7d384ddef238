use std::sync::Arc;

use crate::domain::error::DomainError;
use crate::domain::model::id::{BookId, NodeId};
use crate::domain::model::node::{MenuNode, MenuPayload};
use crate::domain::model::query::{MenuQuery, Page, DEFAULT_TREE_TAKE};
use crate::domain::model::tree::MenuTree;
use crate::domain::repository::ContentApi;

use super::error::AppError;

/// 目次ノードのCRUD。
/// 書き込み後に木を直接書き換えることはせず、呼び出し側が `fetch_tree` で取り直す。
pub struct MenuTreeRepository<A: ContentApi> {
    api: Arc<A>,
    tree_take: u32,
}

impl<A: ContentApi> Clone for MenuTreeRepository<A> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            tree_take: self.tree_take,
        }
    }
}

impl<A: ContentApi> MenuTreeRepository<A> {
    pub fn new(api: Arc<A>) -> Self {
        Self {
            api,
            tree_take: DEFAULT_TREE_TAKE,
        }
    }

    /// 木の取得件数を変える（既定100件）。
    pub fn with_tree_take(mut self, take: u32) -> Self {
        self.tree_take = take.max(1);
        self
    }

    pub fn api(&self) -> &Arc<A> {
        &self.api
    }

    /// フラットな行を取得する。
    pub async fn list(&self, query: &MenuQuery) -> Result<Page<MenuNode>, AppError> {
        if query.book_id.is_blank() {
            return Err(DomainError::validation("book_id", "book_id is required").into());
        }
        let page = self.api.list_menu(query).await.map_err(|e| {
            tracing::warn!(book_id = %query.book_id, error = %e, "menu list failed");
            AppError::api(e)
        })?;
        tracing::debug!(book_id = %query.book_id, rows = page.items.len(), "menu list fetched");
        Ok(page)
    }

    /// 1冊分の木を取得して組み立てる。
    pub async fn fetch_tree(&self, book_id: &BookId) -> Result<MenuTree, AppError> {
        let query = MenuQuery::whole_tree(book_id.clone(), self.tree_take);
        let page = self.list(&query).await?;
        if page.pagination.has_next() {
            tracing::warn!(
                %book_id,
                take = self.tree_take,
                total = page.pagination.total_item,
                "book has more rows than one page; some subtrees will be missing"
            );
        }
        Ok(MenuTree::build_for(book_id, page.items))
    }

    /// ノード詳細
    pub async fn get(&self, id: &NodeId) -> Result<MenuNode, AppError> {
        self.api.get_menu(id).await.map_err(|e| {
            tracing::warn!(node_id = %id, error = %e, "menu detail failed");
            AppError::api(e)
        })
    }

    /// ノードを作成する。必須: type, book_id, title。
    pub async fn create(&self, payload: MenuPayload) -> Result<MenuNode, AppError> {
        Self::validate_create(&payload)?;
        let payload = payload.with_create_defaults();

        let node = self.api.create_menu(&payload).await.map_err(|e| {
            tracing::warn!(error = %e, "menu create failed");
            AppError::api(e)
        })?;
        tracing::info!(node_id = %node.id(), kind = %node.kind(), "menu node created");
        Ok(node)
    }

    /// 部分更新。省略したフィールドはサーバ側で維持される。
    pub async fn update(&self, id: &NodeId, payload: MenuPayload) -> Result<MenuNode, AppError> {
        Self::validate_update(id, &payload)?;

        let node = self.api.update_menu(id, &payload).await.map_err(|e| {
            tracing::warn!(node_id = %id, error = %e, "menu update failed");
            AppError::api(e)
        })?;
        tracing::info!(node_id = %id, "menu node updated");
        Ok(node)
    }

    /// 1行だけ削除する（子は連鎖削除しない）。取り消し不可。
    pub async fn delete(&self, id: &NodeId) -> Result<(), AppError> {
        self.api.delete_menu(id).await.map_err(|e| {
            tracing::warn!(node_id = %id, error = %e, "menu delete failed");
            AppError::api(e)
        })?;
        tracing::info!(node_id = %id, "menu node deleted");
        Ok(())
    }

    /// 子を持つノードの削除を通信前に拒否する。
    pub async fn delete_checked(&self, tree: &MenuTree, id: &NodeId) -> Result<(), AppError> {
        if tree.get(id).is_none() {
            return Err(DomainError::NodeNotFound(id.clone()).into());
        }
        if tree.has_children(id) {
            return Err(DomainError::HasChildren(id.clone()).into());
        }
        self.delete(id).await
    }

    // --- private ---

    fn validate_create(payload: &MenuPayload) -> Result<(), DomainError> {
        if payload.kind.is_none() {
            return Err(DomainError::validation("type", "type is required"));
        }
        match &payload.book_id {
            Some(b) if !b.is_blank() => {}
            _ => return Err(DomainError::validation("book_id", "book_id is required")),
        }
        Self::validate_title(payload.title.as_deref(), true)
    }

    fn validate_update(id: &NodeId, payload: &MenuPayload) -> Result<(), DomainError> {
        if payload.kind.is_some() {
            return Err(DomainError::KindImmutable);
        }
        if payload.new_parent() == Some(id) {
            return Err(DomainError::SelfParent(id.clone()));
        }
        Self::validate_title(payload.title.as_deref(), false)
    }

    fn validate_title(title: Option<&str>, required: bool) -> Result<(), DomainError> {
        match title {
            Some(t) if t.trim().is_empty() => {
                Err(DomainError::validation("title", "title must not be empty"))
            }
            None if required => Err(DomainError::validation("title", "title is required")),
            _ => Ok(()),
        }
    }
}
