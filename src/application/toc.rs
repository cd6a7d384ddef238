//! 目次の番号付けと表示。
//!
//! 番号は兄弟順に1始まりで、階層を `-` で繋ぐ（`1`, `2-3`, `1-2-1`）。
//! 番号は表示時点の木に対するもので、木を取り直すとずれることがある。

use crate::domain::model::id::NodeId;
use crate::domain::model::node::MenuNode;
use crate::domain::model::tree::MenuTree;

/// 階層番号かどうか判定（`1`, `2-3`, `1-2-1` 等）
pub fn is_hierarchical_id(s: &str) -> bool {
    !s.is_empty()
        && s.split('-')
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
}

/// 木全体の (階層番号, NodeId) をDFS順で返す。
pub fn hierarchical_ids(tree: &MenuTree) -> Vec<(String, NodeId)> {
    let mut result = Vec::with_capacity(tree.node_count());
    for (i, root) in tree.roots().iter().enumerate() {
        let num = (i + 1).to_string();
        result.push((num.clone(), root.clone()));
        collect_children(tree, root, &num, &mut result);
    }
    result
}

fn collect_children(
    tree: &MenuTree,
    parent: &NodeId,
    parent_num: &str,
    result: &mut Vec<(String, NodeId)>,
) {
    for (j, child) in tree.children(parent).iter().enumerate() {
        let num = format!("{}-{}", parent_num, j + 1);
        result.push((num.clone(), child.clone()));
        collect_children(tree, child, &num, result);
    }
}

/// 階層番号 → NodeId
pub fn resolve_hierarchical(tree: &MenuTree, num: &str) -> Option<NodeId> {
    hierarchical_ids(tree)
        .into_iter()
        .find(|(n, _)| n == num)
        .map(|(_, id)| id)
}

/// NodeId → 階層番号
pub fn find_hierarchical_id(tree: &MenuTree, target: &NodeId) -> Option<String> {
    hierarchical_ids(tree)
        .into_iter()
        .find(|(_, id)| id == target)
        .map(|(num, _)| num)
}

fn render_line(tree: &MenuTree, node: &MenuNode, num: &str, base_depth: usize) -> String {
    let depth = tree.depth_of(node.id()).saturating_sub(base_depth);
    let mut line = format!(
        "{}{}. {} [{}]",
        "  ".repeat(depth),
        num,
        node.title(),
        node.kind()
    );
    if !node.is_active() {
        line.push_str(" (inactive)");
    }
    line
}

/// 目次をテキストで返す。`subtree_root` 指定時はその部分木だけ。
pub fn render_toc(tree: &MenuTree, subtree_root: Option<&NodeId>) -> String {
    let numbers = hierarchical_ids(tree);
    let number_of = |id: &NodeId| {
        numbers
            .iter()
            .find(|(_, n)| n == id)
            .map(|(num, _)| num.as_str())
            .unwrap_or("?")
    };

    let (nodes, base_depth) = match subtree_root {
        Some(root) => (tree.subtree_nodes(root), tree.depth_of(root)),
        None => (tree.all_nodes_dfs(), 1),
    };

    let (chapters, lessons, exams) = tree.count_by_kind();
    let book = tree
        .book_id()
        .map(|b| b.to_string())
        .unwrap_or_else(|| "-".to_string());
    let mut output = format!(
        "# Book {book} ({} nodes: {chapters} chapters, {lessons} lessons, {exams} exam sets)\n",
        tree.node_count()
    );
    if nodes.is_empty() {
        output.push_str("\n(empty)\n");
        return output;
    }
    output.push('\n');
    for node in nodes {
        output.push_str(&render_line(tree, node, number_of(node.id()), base_depth));
        output.push('\n');
    }
    output
}
