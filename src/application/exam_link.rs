//! 試験セットノードとExam集約の紐付け。
//!
//! 取得経路は2つで、画面上は排他:
//! 1. 既存Examの検索・選択
//! 2. 文書（Word/PDF）の取り込み。サーバが非同期でExamに変換する。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::domain::error::DomainError;
use crate::domain::lock::{ActiveLockGuard, LockedAction};
use crate::domain::model::exam::ExamAggregate;
use crate::domain::model::id::ExamId;
use crate::domain::model::node::MenuNode;
use crate::domain::model::query::{ExamQuery, Page};
use crate::domain::repository::{ContentApi, FileUploader, UploadFile};

use super::error::AppError;

/// 取り込み可能な文書の拡張子
pub const DOCUMENT_EXTENSIONS: &[&str] = &["doc", "docx", "pdf"];

/// 現在の紐付けがどの経路で作られたか
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPath {
    /// 検索から選択（未保存）
    Search,
    /// 文書を取り込み（未保存）
    Document,
    /// サーバに保存済み
    Stored,
}

impl LinkPath {
    fn label(&self) -> &'static str {
        match self {
            Self::Search => "exam search",
            Self::Document => "document import",
            Self::Stored => "saved link",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExamLinkResolver {
    exam_id: Option<ExamId>,
    doc_url: Option<String>,
    /// 取得済みのExam詳細（ロック判定に使う）
    exam: Option<ExamAggregate>,
    path: Option<LinkPath>,
}

impl ExamLinkResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// 保存済みノードの値から初期化する。
    pub fn seeded(node: &MenuNode, exam: Option<ExamAggregate>) -> Self {
        let Some(exam_ref) = node.exam_ref() else {
            return Self::default();
        };
        let linked = exam_ref.exam_id.is_some() || exam_ref.pending_doc.is_some();
        Self {
            exam_id: exam_ref.exam_id,
            doc_url: exam_ref.pending_doc,
            exam,
            path: linked.then_some(LinkPath::Stored),
        }
    }

    pub fn exam_id(&self) -> Option<&ExamId> {
        self.exam_id.as_ref()
    }

    pub fn doc_url(&self) -> Option<&str> {
        self.doc_url.as_deref()
    }

    pub fn exam(&self) -> Option<&ExamAggregate> {
        self.exam.as_ref()
    }

    pub fn path(&self) -> Option<LinkPath> {
        self.path
    }

    pub fn is_linked(&self) -> bool {
        self.path.is_some()
    }

    /// 検索結果から1件選ぶ。タイトル欄が空ならExamのタイトルで埋める。
    pub fn select_exam(
        &mut self,
        exam: ExamAggregate,
        title: &mut String,
    ) -> Result<(), DomainError> {
        match self.path {
            None | Some(LinkPath::Search) => {}
            Some(other) => return Err(DomainError::ExamLinkConflict(other.label())),
        }
        if title.trim().is_empty() {
            *title = exam.title.clone();
        }
        tracing::debug!(exam_id = %exam.id, "exam selected");
        self.exam_id = Some(exam.id.clone());
        self.doc_url = None;
        self.exam = Some(exam);
        self.path = Some(LinkPath::Search);
        Ok(())
    }

    /// 文書をアップロードし、変換待ちURLとして保持する。
    pub async fn import_document<U: FileUploader>(
        &mut self,
        uploader: &U,
        file: &UploadFile,
    ) -> Result<(), AppError> {
        match self.path {
            None | Some(LinkPath::Document) => {}
            Some(other) => return Err(DomainError::ExamLinkConflict(other.label()).into()),
        }
        match file.extension() {
            Some(ext) if DOCUMENT_EXTENSIONS.contains(&ext.as_str()) => {}
            _ => {
                return Err(DomainError::validation(
                    "exam_url_doc",
                    format!(
                        "'{}' is not a Word or PDF document (.doc, .docx, .pdf)",
                        file.file_name
                    ),
                )
                .into())
            }
        }

        let url = uploader.upload(file).await.map_err(|e| {
            tracing::warn!(file = %file.file_name, error = %e, "document upload failed");
            AppError::upload(e)
        })?;
        tracing::info!(file = %file.file_name, %url, "exam document uploaded");

        self.exam_id = None;
        self.exam = None;
        self.doc_url = Some(url);
        self.path = Some(LinkPath::Document);
        Ok(())
    }

    /// Exam参照と文書URLを同時に外す。片方だけ外すことはしない。
    pub fn remove(&mut self, confirmed: bool) -> Result<(), AppError> {
        if !self.is_linked() {
            return Ok(());
        }
        if !confirmed {
            return Err(AppError::ConfirmationRequired("remove the linked exam"));
        }
        if self.path == Some(LinkPath::Stored) {
            if let Some(exam) = &self.exam {
                ActiveLockGuard::ensure_unlocked(exam, LockedAction::ReplaceLink)?;
            }
        }
        *self = Self::default();
        Ok(())
    }

    /// 送信用の `(exam_id, exam_url_doc)`。未設定は空文字。
    pub fn payload_fields(&self) -> (String, String) {
        (
            self.exam_id
                .as_ref()
                .map(|id| id.to_string())
                .unwrap_or_default(),
            self.doc_url.clone().unwrap_or_default(),
        )
    }
}

/// 検索結果
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    Results(Page<ExamAggregate>),
    /// 新しい入力・要求に追い越された
    Superseded,
}

/// 入力が落ち着いてから検索するExam検索。
///
/// 要求ごとに連番を振り、最後に送った要求より古い応答は捨てる。
pub struct ExamSearch<A: ContentApi> {
    api: Arc<A>,
    settle: Duration,
    take: u32,
    input_seq: AtomicU64,
    latest_dispatched: AtomicU64,
}

impl<A: ContentApi> ExamSearch<A> {
    pub const DEFAULT_SETTLE: Duration = Duration::from_millis(500);
    pub const DEFAULT_TAKE: u32 = 10;

    pub fn new(api: Arc<A>) -> Self {
        Self {
            api,
            settle: Self::DEFAULT_SETTLE,
            take: Self::DEFAULT_TAKE,
            input_seq: AtomicU64::new(0),
            latest_dispatched: AtomicU64::new(0),
        }
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn with_take(mut self, take: u32) -> Self {
        self.take = take.max(1);
        self
    }

    /// 入力イベント1回分。
    pub async fn query(&self, text: &str, page: u32) -> Result<SearchOutcome, AppError> {
        let seq = self.input_seq.fetch_add(1, Ordering::SeqCst) + 1;

        if !self.settle.is_zero() {
            tokio::time::sleep(self.settle).await;
            if self.input_seq.load(Ordering::SeqCst) != seq {
                return Ok(SearchOutcome::Superseded);
            }
        }

        self.latest_dispatched.fetch_max(seq, Ordering::SeqCst);
        let search = text.trim();
        let query = ExamQuery {
            page: page.max(1),
            take: self.take,
            search: (!search.is_empty()).then(|| search.to_string()),
        };
        let result = self.api.search_exams(&query).await.map_err(|e| {
            tracing::warn!(error = %e, "exam search failed");
            AppError::api(e)
        })?;

        if self.latest_dispatched.load(Ordering::SeqCst) > seq {
            tracing::debug!(seq, "stale exam search response discarded");
            return Ok(SearchOutcome::Superseded);
        }
        Ok(SearchOutcome::Results(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::id::{BookId, NodeId};
    use crate::domain::model::node::NodeKind;
    use serde_json::json;

    fn exam(id: &str, title: &str, active: bool) -> ExamAggregate {
        serde_json::from_value(json!({ "id": id, "title": title, "active": active })).unwrap()
    }

    #[test]
    fn select_prefills_empty_title_only() {
        let mut link = ExamLinkResolver::new();
        let mut title = String::new();
        link.select_exam(exam("E1", "Đề giữa kỳ", false), &mut title)
            .unwrap();
        assert_eq!(title, "Đề giữa kỳ");

        let mut title = "Custom".to_string();
        link.select_exam(exam("E2", "Other", false), &mut title)
            .unwrap();
        assert_eq!(title, "Custom");
        assert_eq!(link.exam_id(), Some(&ExamId::new("E2")));
        assert_eq!(link.payload_fields(), ("E2".to_string(), String::new()));
    }

    #[test]
    fn stored_link_blocks_search_selection() {
        let node: MenuNode = serde_json::from_value(json!({
            "id": "n1", "type": "DE", "book_id": "b1", "title": "Đề 1", "exam_id": "E1"
        }))
        .unwrap();
        let mut link = ExamLinkResolver::seeded(&node, Some(exam("E1", "Đề 1", false)));
        assert_eq!(link.path(), Some(LinkPath::Stored));

        let mut title = String::new();
        assert!(matches!(
            link.select_exam(exam("E2", "x", false), &mut title),
            Err(DomainError::ExamLinkConflict(_))
        ));
    }

    #[test]
    fn remove_clears_both_fields() {
        let node: MenuNode = serde_json::from_value(json!({
            "id": "n1", "type": "DE", "book_id": "b1", "title": "Đề 1",
            "exam_id": "E1", "exam_url_doc": "https://cdn.test/a.docx"
        }))
        .unwrap();
        let mut link = ExamLinkResolver::seeded(&node, Some(exam("E1", "Đề 1", false)));

        assert!(matches!(
            link.remove(false),
            Err(AppError::ConfirmationRequired(_))
        ));
        link.remove(true).unwrap();
        assert_eq!(link.payload_fields(), (String::new(), String::new()));
        assert!(!link.is_linked());
    }

    #[test]
    fn remove_stored_active_exam_is_locked() {
        let node = MenuNode::new(
            NodeId::new("n1"),
            NodeKind::ExamSet,
            BookId::new("b1"),
            "Đề 1",
        );
        let mut link = ExamLinkResolver::seeded(&node, None);
        assert!(!link.is_linked());

        let node: MenuNode = serde_json::from_value(json!({
            "id": "n1", "type": "DE", "book_id": "b1", "title": "Đề 1", "exam_id": "E1"
        }))
        .unwrap();
        link = ExamLinkResolver::seeded(&node, Some(exam("E1", "Đề 1", true)));
        let err = link.remove(true).unwrap_err();
        assert!(matches!(
            err,
            AppError::Domain(DomainError::ExamLocked {
                action: LockedAction::ReplaceLink,
                ..
            })
        ));
        assert_eq!(link.exam_id(), Some(&ExamId::new("E1")));
    }

    #[test]
    fn non_exam_nodes_seed_unlinked() {
        let node = MenuNode::new(
            NodeId::new("c1"),
            NodeKind::Chapter,
            BookId::new("b1"),
            "Chương 1",
        );
        assert_eq!(ExamLinkResolver::seeded(&node, None), ExamLinkResolver::new());
    }
}
