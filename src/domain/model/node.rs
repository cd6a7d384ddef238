use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use super::attachment::{self, AttachmentState};
use super::id::{BookId, ExamId, NodeId};

/// ノードの種別。作成後は変更できない。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// 章。子（章・課・試験セット）を持てる唯一の種別。
    #[serde(rename = "CHUONG")]
    Chapter,
    /// 課
    #[serde(rename = "BAI")]
    Lesson,
    /// 試験セット。Exam集約への参照を持つ。
    #[serde(rename = "DE")]
    ExamSet,
}

impl NodeKind {
    pub fn can_have_children(&self) -> bool {
        matches!(self, Self::Chapter)
    }

    pub fn wire_value(&self) -> &'static str {
        match self {
            Self::Chapter => "CHUONG",
            Self::Lesson => "BAI",
            Self::ExamSet => "DE",
        }
    }

    /// `chapter` / `CHUONG` 形式のどちらも受け付ける。
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chapter" | "chuong" => Some(Self::Chapter),
            "lesson" | "bai" => Some(Self::Lesson),
            "exam_set" | "exam-set" | "examset" | "de" => Some(Self::ExamSet),
            _ => None,
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Chapter => "chapter",
            Self::Lesson => "lesson",
            Self::ExamSet => "exam_set",
        };
        f.write_str(s)
    }
}

/// 試験セットノードが持つExam参照。変換待ちの間は `pending_doc` のみを持つ。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamRef {
    pub exam_id: Option<ExamId>,
    pub pending_doc: Option<String>,
}

/// サーバの menu-book 行。木構造はサーバには無く、`parent_id` だけを持つ。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuNode {
    id: NodeId,
    #[serde(rename = "type")]
    kind: NodeKind,
    #[serde(default, deserialize_with = "blank_as_none")]
    parent_id: Option<NodeId>,
    book_id: BookId,
    title: String,
    #[serde(default, deserialize_with = "blank_as_none")]
    description: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    cover: Option<String>,
    #[serde(default)]
    active: bool,
    #[serde(default)]
    order: i64,
    #[serde(
        default,
        rename = "active_code_id",
        deserialize_with = "flag_or_code"
    )]
    generates_activation_code: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    video: String,
    #[serde(default, deserialize_with = "null_as_default")]
    attached: Vec<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    exam_id: Option<ExamId>,
    #[serde(default, deserialize_with = "blank_as_none")]
    exam_url_doc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<String>,
}

impl MenuNode {
    pub fn new(id: NodeId, kind: NodeKind, book_id: BookId, title: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            parent_id: None,
            book_id,
            title: title.into(),
            description: None,
            cover: None,
            active: false,
            order: 0,
            generates_activation_code: false,
            video: String::new(),
            attached: Vec::new(),
            exam_id: None,
            exam_url_doc: None,
            created_at: None,
        }
    }

    pub fn with_parent(mut self, parent: NodeId) -> Self {
        self.parent_id = Some(parent);
        self
    }

    pub fn with_order(mut self, order: i64) -> Self {
        self.order = order;
        self
    }

    pub fn with_created_at(mut self, created_at: impl Into<String>) -> Self {
        self.created_at = Some(created_at.into());
        self
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn parent_id(&self) -> Option<&NodeId> {
        self.parent_id.as_ref()
    }

    pub fn book_id(&self) -> &BookId {
        &self.book_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn cover(&self) -> Option<&str> {
        self.cover.as_deref()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn order(&self) -> i64 {
        self.order
    }

    pub fn generates_activation_code(&self) -> bool {
        self.generates_activation_code
    }

    /// 保存されている生の動画文字列
    pub fn video_raw(&self) -> &str {
        &self.video
    }

    pub fn attachment(&self) -> AttachmentState {
        attachment::classify(&self.video)
    }

    pub fn attached(&self) -> &[String] {
        &self.attached
    }

    pub fn created_at(&self) -> Option<&str> {
        self.created_at.as_deref()
    }

    /// 試験セット以外は常に None。
    pub fn exam_ref(&self) -> Option<ExamRef> {
        if self.kind != NodeKind::ExamSet {
            return None;
        }
        Some(ExamRef {
            exam_id: self.exam_id.clone(),
            pending_doc: self.exam_url_doc.clone(),
        })
    }
}

/// menu-book の作成・更新ボディ。None のフィールドは送信しない（部分更新）。
/// 空文字・空配列を明示的に送るとサーバ側でクリアされる。
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MenuPayload {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<NodeKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub book_id: Option<BookId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attached: Option<Vec<String>>,
    #[serde(rename = "active_code_id", skip_serializing_if = "Option::is_none")]
    pub generates_activation_code: Option<bool>,
    /// `Some(None)` はトップレベルへの移動（null を送る）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Option<NodeId>>,
    /// 空文字でExam参照を外す
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exam_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exam_url_doc: Option<String>,
}

impl MenuPayload {
    /// 作成時の既定値を埋める。`video` / `attached` は null にしない。
    pub fn with_create_defaults(mut self) -> Self {
        self.video.get_or_insert_with(String::new);
        self.attached.get_or_insert_with(Vec::new);
        self.active.get_or_insert(false);
        self.generates_activation_code.get_or_insert(false);
        self
    }

    pub fn new_parent(&self) -> Option<&NodeId> {
        self.parent_id.as_ref().and_then(|p| p.as_ref())
    }
}

// --- serde helpers ---

/// null と空文字を None として扱う。
fn blank_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: From<String>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.filter(|s| !s.trim().is_empty()).map(T::from))
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// `active_code_id` は真偽値のほか、発行済みコードのID文字列で返ることがある。
fn flag_or_code<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum FlagOrCode {
        Flag(bool),
        Code(String),
        Number(i64),
    }

    Ok(match Option::<FlagOrCode>::deserialize(deserializer)? {
        Some(FlagOrCode::Flag(b)) => b,
        Some(FlagOrCode::Code(s)) => !s.trim().is_empty(),
        Some(FlagOrCode::Number(n)) => n != 0,
        None => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserialize_server_row() {
        let node: MenuNode = serde_json::from_value(json!({
            "id": "n1",
            "type": "DE",
            "parent_id": "c1",
            "book_id": "b1",
            "title": "Đề 1",
            "description": null,
            "cover": "",
            "active": true,
            "order": 3,
            "active_code_id": "code-77",
            "video": null,
            "attached": null,
            "exam_id": "",
            "exam_url_doc": "https://cdn.test/de1.docx"
        }))
        .unwrap();

        assert_eq!(node.kind(), NodeKind::ExamSet);
        assert_eq!(node.parent_id(), Some(&NodeId::new("c1")));
        assert_eq!(node.description(), None);
        assert_eq!(node.cover(), None);
        assert!(node.generates_activation_code());
        assert_eq!(node.video_raw(), "");
        assert!(node.attached().is_empty());
        assert_eq!(
            node.exam_ref(),
            Some(ExamRef {
                exam_id: None,
                pending_doc: Some("https://cdn.test/de1.docx".into()),
            })
        );
    }

    #[test]
    fn empty_parent_is_top_level() {
        let node: MenuNode = serde_json::from_value(json!({
            "id": "n1", "type": "CHUONG", "parent_id": "", "book_id": "b1", "title": "Chương 1"
        }))
        .unwrap();
        assert!(node.parent_id().is_none());
        assert!(node.exam_ref().is_none());
    }

    #[test]
    fn kind_parse_accepts_both_spellings() {
        assert_eq!(NodeKind::parse("chapter"), Some(NodeKind::Chapter));
        assert_eq!(NodeKind::parse("CHUONG"), Some(NodeKind::Chapter));
        assert_eq!(NodeKind::parse("bai"), Some(NodeKind::Lesson));
        assert_eq!(NodeKind::parse("exam_set"), Some(NodeKind::ExamSet));
        assert_eq!(NodeKind::parse("DE"), Some(NodeKind::ExamSet));
        assert_eq!(NodeKind::parse("section"), None);
    }

    #[test]
    fn payload_omits_unset_fields() {
        let payload = MenuPayload {
            title: Some("Bài 2".into()),
            ..Default::default()
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value, json!({ "title": "Bài 2" }));
    }

    #[test]
    fn payload_moves_to_top_level_with_null() {
        let payload = MenuPayload {
            parent_id: Some(None),
            ..Default::default()
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value, json!({ "parent_id": null }));
    }

    #[test]
    fn create_defaults_never_null() {
        let payload = MenuPayload::default().with_create_defaults();
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["video"], json!(""));
        assert_eq!(value["attached"], json!([]));
        assert_eq!(value["active"], json!(false));
        assert_eq!(value["active_code_id"], json!(false));
    }
}
