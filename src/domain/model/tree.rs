//! フラットな menu-book 行から表示用の森を組み立てる。
//!
//! サーバは木を保存しないため、木は取得のたびに作り直す派生データとして扱う。
//! 行はID索引つきのアリーナに置き、親子は ID で参照する。

use std::collections::{HashMap, HashSet};

use super::id::{BookId, NodeId};
use super::node::{MenuNode, NodeKind};
use crate::domain::error::DomainError;

#[derive(Debug, Clone, PartialEq)]
struct TreeEntry {
    node: MenuNode,
    children: Vec<NodeId>,
}

/// 1冊分の目次ツリー。ルートから到達できる行だけを保持する。
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MenuTree {
    book_id: Option<BookId>,
    entries: HashMap<NodeId, TreeEntry>,
    roots: Vec<NodeId>,
}

impl MenuTree {
    /// 先頭行のBookで森にする。Bookが分かっている場合は `build_for` を使う。
    pub fn build(rows: Vec<MenuNode>) -> Self {
        match rows.first().map(|r| r.book_id().clone()) {
            Some(book_id) => Self::build_for(&book_id, rows),
            None => Self::default(),
        }
    }

    /// 指定Bookの行を親IDでまとめて森にする。
    ///
    /// 親が結果に含まれない行（ページング漏れ等）と、その子孫は木に載らない。
    /// 呼び出し側は部分木全体が入る件数で取得すること。
    pub fn build_for(book_id: &BookId, rows: Vec<MenuNode>) -> Self {
        let total = rows.len();
        let book_id = Some(book_id.clone());

        // 同一IDは最初の行を採用。別Bookの行は除外する。
        let mut seen = HashSet::new();
        let mut rows: Vec<MenuNode> = rows
            .into_iter()
            .filter(|r| Some(r.book_id()) == book_id.as_ref())
            .filter(|r| seen.insert(r.id().clone()))
            .collect();

        // 兄弟順: order → 作成日時 → サーバ順（安定ソート）
        rows.sort_by(|a, b| {
            a.order()
                .cmp(&b.order())
                .then_with(|| a.created_at().cmp(&b.created_at()))
        });

        let ids: HashSet<NodeId> = rows.iter().map(|r| r.id().clone()).collect();
        let mut roots = Vec::new();
        let mut children_of: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for row in &rows {
            match row.parent_id() {
                None => roots.push(row.id().clone()),
                Some(p) if p != row.id() && ids.contains(p) => {
                    children_of
                        .entry(p.clone())
                        .or_default()
                        .push(row.id().clone());
                }
                Some(_) => {}
            }
        }

        // ルートから到達できる行のみ残す（循環・親欠落を除外）
        let mut reachable = HashSet::new();
        let mut stack: Vec<NodeId> = roots.clone();
        while let Some(id) = stack.pop() {
            if !reachable.insert(id.clone()) {
                continue;
            }
            if let Some(children) = children_of.get(&id) {
                stack.extend(children.iter().cloned());
            }
        }

        let entries: HashMap<NodeId, TreeEntry> = rows
            .into_iter()
            .filter(|r| reachable.contains(r.id()))
            .map(|node| {
                let children = children_of.remove(node.id()).unwrap_or_default();
                (node.id().clone(), TreeEntry { node, children })
            })
            .collect();

        let dropped = total - entries.len();
        if dropped > 0 {
            tracing::debug!(dropped, "menu rows not attached to the tree");
        }
        let book_id = if entries.is_empty() { None } else { book_id };

        Self {
            book_id,
            entries,
            roots,
        }
    }

    pub fn book_id(&self) -> Option<&BookId> {
        self.book_id.as_ref()
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn get(&self, id: &NodeId) -> Option<&MenuNode> {
        self.entries.get(id).map(|e| &e.node)
    }

    pub fn children(&self, id: &NodeId) -> &[NodeId] {
        self.entries
            .get(id)
            .map(|e| e.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn has_children(&self, id: &NodeId) -> bool {
        !self.children(id).is_empty()
    }

    pub fn node_count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// ノードの深さ（ルート=1）。木に無ければ0。
    pub fn depth_of(&self, id: &NodeId) -> usize {
        let mut depth = 0;
        let mut current = self.get(id);
        while let Some(node) = current {
            depth += 1;
            if depth > self.entries.len() {
                break;
            }
            current = node.parent_id().and_then(|p| self.get(p));
        }
        depth
    }

    /// 全ノードをDFS順で返す。
    pub fn all_nodes_dfs(&self) -> Vec<&MenuNode> {
        let mut out = Vec::with_capacity(self.entries.len());
        for root in &self.roots {
            self.collect_dfs(root, &mut out);
        }
        out
    }

    /// 指定ノードを含む部分木（DFS順）
    pub fn subtree_nodes(&self, root: &NodeId) -> Vec<&MenuNode> {
        let mut out = Vec::new();
        self.collect_dfs(root, &mut out);
        out
    }

    /// 行に戻す。`build(flatten())` は同じ木になる。
    pub fn flatten(&self) -> Vec<MenuNode> {
        self.all_nodes_dfs().into_iter().cloned().collect()
    }

    /// `node` が `ancestor` の子孫か
    pub fn is_descendant_of(&self, node: &NodeId, ancestor: &NodeId) -> bool {
        let mut current = self.get(node).and_then(|n| n.parent_id());
        let mut steps = 0;
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            steps += 1;
            if steps > self.entries.len() {
                break;
            }
            current = self.get(parent).and_then(|n| n.parent_id());
        }
        false
    }

    /// 親指定の検証。`node` は編集中のノード（新規作成なら None）。
    ///
    /// - 親は木に存在する章であること
    /// - 自分自身・自分の子孫を親にしないこと
    pub fn validate_parent(
        &self,
        node: Option<&NodeId>,
        parent: &NodeId,
    ) -> Result<(), DomainError> {
        if let Some(id) = node {
            if id == parent {
                return Err(DomainError::SelfParent(id.clone()));
            }
        }
        let parent_node = self
            .get(parent)
            .ok_or_else(|| DomainError::NodeNotFound(parent.clone()))?;
        if !parent_node.kind().can_have_children() {
            return Err(DomainError::InvalidParent {
                parent: parent.clone(),
                kind: parent_node.kind(),
            });
        }
        if let Some(id) = node {
            if self.is_descendant_of(parent, id) {
                return Err(DomainError::CyclicParent(id.clone()));
            }
        }
        Ok(())
    }

    /// 種別ごとの件数（章, 課, 試験セット）
    pub fn count_by_kind(&self) -> (usize, usize, usize) {
        self.entries
            .values()
            .fold((0, 0, 0), |(c, l, e), entry| match entry.node.kind() {
                NodeKind::Chapter => (c + 1, l, e),
                NodeKind::Lesson => (c, l + 1, e),
                NodeKind::ExamSet => (c, l, e + 1),
            })
    }

    fn collect_dfs<'a>(&'a self, id: &NodeId, out: &mut Vec<&'a MenuNode>) {
        if let Some(entry) = self.entries.get(id) {
            out.push(&entry.node);
            for child in &entry.children {
                self.collect_dfs(child, out);
            }
        }
    }
}
