//! 1回分の作成・編集操作。
//!
//! ```text
//! Idle → (Loading) → Editing → Submitting → Closed（成功） | Editing（失敗）
//! ```
//!
//! 成功後は木を書き換えず、呼び出し側が木を取り直す。

use crate::domain::error::DomainError;
use crate::domain::model::attachment::{AttachmentKind, AttachmentState};
use crate::domain::model::exam::ExamAggregate;
use crate::domain::model::id::{BookId, NodeId};
use crate::domain::model::node::{MenuNode, MenuPayload, NodeKind};
use crate::domain::model::tree::MenuTree;
use crate::domain::repository::{ContentApi, FileUploader, UploadFile};

use super::error::AppError;
use super::exam_link::ExamLinkResolver;
use super::service::MenuTreeRepository;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Loading,
    Editing,
    Submitting,
    Closed,
}

impl SessionPhase {
    fn label(&self) -> &'static str {
        match self {
            Self::Idle => "not opened",
            Self::Loading => "still loading",
            Self::Editing => "editing",
            Self::Submitting => "submitting",
            Self::Closed => "closed",
        }
    }
}

/// フォームの入力値
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeForm {
    pub title: String,
    pub description: Option<String>,
    pub cover: Option<String>,
    pub active: bool,
    pub generates_activation_code: bool,
    pub attached: Vec<String>,
    pub parent_id: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq)]
enum Target {
    Create { book_id: BookId, kind: NodeKind },
    Edit { original: MenuNode },
}

/// 送信する変更
#[derive(Debug, Clone, PartialEq)]
pub enum MutationRequest {
    Create(MenuPayload),
    Update { id: NodeId, payload: MenuPayload },
}

impl MutationRequest {
    pub fn payload(&self) -> &MenuPayload {
        match self {
            Self::Create(payload) => payload,
            Self::Update { payload, .. } => payload,
        }
    }

    pub async fn execute<A: ContentApi>(
        self,
        repo: &MenuTreeRepository<A>,
    ) -> Result<MenuNode, AppError> {
        match self {
            Self::Create(payload) => repo.create(payload).await,
            Self::Update { id, payload } => repo.update(&id, payload).await,
        }
    }
}

/// 送信1回分の引換券。`finish` に渡したトークンが一致しない応答は捨てる。
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitTicket {
    token: u64,
    pub request: MutationRequest,
}

impl SubmitTicket {
    pub fn token(&self) -> u64 {
        self.token
    }
}

#[derive(Debug)]
pub enum SubmitOutcome {
    /// 保存済み。呼び出し側は木を取り直すこと。
    Saved(MenuNode),
    /// 入力は保持したまま Editing に戻る
    Failed(AppError),
    /// セッションが閉じられた後に届いた応答
    Discarded,
}

pub struct TreeEditingSession<A: ContentApi> {
    repo: MenuTreeRepository<A>,
    phase: SessionPhase,
    target: Option<Target>,
    form: NodeForm,
    attachment: AttachmentState,
    /// セッション中に動画を差し替え・削除したか。false なら更新時に `video` を送らない。
    video_changed: bool,
    exam_link: ExamLinkResolver,
    in_flight: Option<u64>,
    next_token: u64,
    last_error: Option<String>,
}

impl<A: ContentApi> TreeEditingSession<A> {
    pub fn new(repo: MenuTreeRepository<A>) -> Self {
        Self {
            repo,
            phase: SessionPhase::Idle,
            target: None,
            form: NodeForm::default(),
            attachment: AttachmentState::Empty,
            video_changed: false,
            exam_link: ExamLinkResolver::new(),
            in_flight: None,
            next_token: 0,
            last_error: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn form(&self) -> &NodeForm {
        &self.form
    }

    pub fn attachment(&self) -> &AttachmentState {
        &self.attachment
    }

    pub fn exam_link(&self) -> &ExamLinkResolver {
        &self.exam_link
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn kind(&self) -> Option<NodeKind> {
        match self.target.as_ref()? {
            Target::Create { kind, .. } => Some(*kind),
            Target::Edit { original } => Some(original.kind()),
        }
    }

    /// 編集中のノードID（新規作成なら None）
    pub fn node_id(&self) -> Option<&NodeId> {
        match self.target.as_ref()? {
            Target::Edit { original } => Some(original.id()),
            Target::Create { .. } => None,
        }
    }

    pub fn book_id(&self) -> Option<&BookId> {
        match self.target.as_ref()? {
            Target::Create { book_id, .. } => Some(book_id),
            Target::Edit { original } => Some(original.book_id()),
        }
    }

    // --- open / close ---

    /// 新規作成を開く。通信はしない。
    pub fn open_create(
        &mut self,
        book_id: BookId,
        kind: NodeKind,
        parent: Option<&MenuNode>,
    ) -> Result<(), AppError> {
        self.ensure_openable()?;
        if book_id.is_blank() {
            return Err(DomainError::validation("book_id", "book_id is required").into());
        }
        if let Some(p) = parent {
            if !p.kind().can_have_children() {
                return Err(DomainError::InvalidParent {
                    parent: p.id().clone(),
                    kind: p.kind(),
                }
                .into());
            }
            if p.book_id() != &book_id {
                return Err(DomainError::validation(
                    "parent_id",
                    format!("parent {} belongs to another book", p.id()),
                )
                .into());
            }
        }

        self.reset_local_state();
        self.form.parent_id = parent.map(|p| p.id().clone());
        self.target = Some(Target::Create { book_id, kind });
        self.phase = SessionPhase::Editing;
        tracing::debug!(%kind, "create session opened");
        Ok(())
    }

    /// 既存ノードの編集を開く。詳細とリンク先Examを取得してから Editing になる。
    pub async fn open_edit(&mut self, id: &NodeId) -> Result<(), AppError> {
        self.ensure_openable()?;
        self.reset_local_state();
        self.phase = SessionPhase::Loading;

        let loaded = self.load_detail(id).await;
        let (node, exam) = match loaded {
            Ok(v) => v,
            Err(e) => {
                self.phase = SessionPhase::Idle;
                return Err(e);
            }
        };

        self.form = NodeForm {
            title: node.title().to_string(),
            description: node.description().map(str::to_string),
            cover: node.cover().map(str::to_string),
            active: node.is_active(),
            generates_activation_code: node.generates_activation_code(),
            attached: node.attached().to_vec(),
            parent_id: node.parent_id().cloned(),
        };
        self.attachment = node.attachment();
        self.exam_link = ExamLinkResolver::seeded(&node, exam);
        self.target = Some(Target::Edit { original: node });
        self.phase = SessionPhase::Editing;
        tracing::debug!(node_id = %id, "edit session opened");
        Ok(())
    }

    /// 閉じる。送信中の応答は後で届いても捨てる（サーバ側の書き込みは取り消さない）。
    pub fn close(&mut self) {
        if self.in_flight.is_some() {
            tracing::debug!("session closed with a submission in flight");
        }
        self.reset_local_state();
        self.target = None;
        self.in_flight = None;
        self.phase = SessionPhase::Closed;
    }

    // --- form fields ---

    pub fn set_title(&mut self, title: impl Into<String>) -> Result<(), AppError> {
        self.ensure_editing()?;
        self.form.title = title.into();
        Ok(())
    }

    pub fn set_description(&mut self, description: Option<String>) -> Result<(), AppError> {
        self.ensure_editing()?;
        self.form.description = description;
        Ok(())
    }

    pub fn set_cover(&mut self, cover: Option<String>) -> Result<(), AppError> {
        self.ensure_editing()?;
        self.form.cover = cover;
        Ok(())
    }

    pub fn set_active(&mut self, active: bool) -> Result<(), AppError> {
        self.ensure_editing()?;
        self.form.active = active;
        Ok(())
    }

    /// アクティベーションコード発行は作成時にしか決められない。
    pub fn set_activation_code(&mut self, enabled: bool) -> Result<(), AppError> {
        self.ensure_editing()?;
        if !matches!(self.target, Some(Target::Create { .. })) {
            return Err(DomainError::validation(
                "active_code_id",
                "activation code can only be chosen when creating a node",
            )
            .into());
        }
        self.form.generates_activation_code = enabled;
        Ok(())
    }

    pub fn set_attached(&mut self, attached: Vec<String>) -> Result<(), AppError> {
        self.ensure_editing()?;
        self.form.attached = attached;
        Ok(())
    }

    /// 親の変更。`tree` は同じBookの最新の木。
    pub fn set_parent(&mut self, tree: &MenuTree, parent: Option<NodeId>) -> Result<(), AppError> {
        self.ensure_editing()?;
        if let Some(p) = &parent {
            tree.validate_parent(self.node_id(), p)?;
            if tree.book_id() != self.book_id() {
                return Err(DomainError::validation(
                    "parent_id",
                    format!("parent {p} belongs to another book"),
                )
                .into());
            }
        }
        self.form.parent_id = parent;
        Ok(())
    }

    pub async fn upload_cover<U: FileUploader>(
        &mut self,
        uploader: &U,
        file: &UploadFile,
    ) -> Result<(), AppError> {
        self.ensure_editing()?;
        let url = uploader.upload(file).await.map_err(|e| {
            tracing::warn!(file = %file.file_name, error = %e, "cover upload failed");
            AppError::upload(e)
        })?;
        self.form.cover = Some(url);
        Ok(())
    }

    // --- video attachment ---

    pub fn select_video_upload(&mut self) -> Result<(), AppError> {
        self.ensure_editing()?;
        self.attachment.select_upload()?;
        Ok(())
    }

    /// ファイル選択からアップロード完了まで。失敗時は Empty に戻る。
    pub async fn upload_video<U: FileUploader>(
        &mut self,
        uploader: &U,
        file: &UploadFile,
    ) -> Result<(), AppError> {
        self.ensure_editing()?;
        self.attachment.select_upload()?;
        match uploader.upload(file).await {
            Ok(url) => {
                tracing::info!(file = %file.file_name, %url, "video uploaded");
                self.attachment.complete_upload(url)?;
                self.video_changed = true;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(file = %file.file_name, error = %e, "video upload failed");
                self.attachment.fail_upload();
                Err(AppError::upload(e))
            }
        }
    }

    pub fn embed_video(&mut self, code: impl Into<String>) -> Result<(), AppError> {
        self.ensure_editing()?;
        self.attachment.select_embed(code)?;
        self.video_changed = true;
        Ok(())
    }

    /// 動画を外す。判別できない保存値（相対パス等）もここで消せる。
    pub fn remove_video(&mut self, confirmed: bool) -> Result<(), AppError> {
        self.ensure_editing()?;
        if !self.has_video() {
            return Ok(());
        }
        if !confirmed {
            return Err(AppError::ConfirmationRequired("remove the video"));
        }
        self.attachment.remove();
        self.video_changed = true;
        Ok(())
    }

    /// 状態が Empty でも、編集対象に未変更の保存値があれば動画ありとみなす。
    fn has_video(&self) -> bool {
        if !self.attachment.is_empty() {
            return true;
        }
        match &self.target {
            Some(Target::Edit { original }) if !self.video_changed => {
                !original.video_raw().trim().is_empty()
            }
            _ => false,
        }
    }

    // --- exam link ---

    pub fn select_exam(&mut self, exam: ExamAggregate) -> Result<(), AppError> {
        self.ensure_exam_set()?;
        self.exam_link.select_exam(exam, &mut self.form.title)?;
        Ok(())
    }

    pub async fn import_exam_document<U: FileUploader>(
        &mut self,
        uploader: &U,
        file: &UploadFile,
    ) -> Result<(), AppError> {
        self.ensure_exam_set()?;
        self.exam_link.import_document(uploader, file).await
    }

    pub fn remove_exam(&mut self, confirmed: bool) -> Result<(), AppError> {
        self.ensure_exam_set()?;
        self.exam_link.remove(confirmed)
    }

    // --- submit ---

    /// 入力を検証して送信内容を確定する。送信中は2回目を受け付けない。
    pub fn prepare_submit(&mut self) -> Result<SubmitTicket, AppError> {
        match self.phase {
            SessionPhase::Editing => {}
            SessionPhase::Submitting => return Err(AppError::SubmitInFlight),
            other => return Err(AppError::SessionState(other.label())),
        }
        let request = self.build_request()?;

        self.next_token += 1;
        let token = self.next_token;
        self.in_flight = Some(token);
        self.phase = SessionPhase::Submitting;
        self.last_error = None;
        Ok(SubmitTicket { token, request })
    }

    /// 送信結果を反映する。
    pub fn finish(&mut self, token: u64, result: Result<MenuNode, AppError>) -> SubmitOutcome {
        if self.in_flight != Some(token) || self.phase != SessionPhase::Submitting {
            tracing::debug!(token, "late submission response discarded");
            return SubmitOutcome::Discarded;
        }
        self.in_flight = None;

        match result {
            Ok(node) => {
                self.reset_local_state();
                self.target = None;
                self.phase = SessionPhase::Closed;
                SubmitOutcome::Saved(node)
            }
            Err(e) => {
                self.last_error = Some(e.to_string());
                self.phase = SessionPhase::Editing;
                SubmitOutcome::Failed(e)
            }
        }
    }

    /// `prepare_submit` → 通信 → `finish` をまとめて行う。
    pub async fn submit(&mut self) -> Result<MenuNode, AppError> {
        let ticket = self.prepare_submit()?;
        let repo = self.repo.clone();
        let result = ticket.request.execute(&repo).await;
        match self.finish(ticket.token, result) {
            SubmitOutcome::Saved(node) => Ok(node),
            SubmitOutcome::Failed(e) => Err(e),
            SubmitOutcome::Discarded => Err(AppError::SessionState(SessionPhase::Closed.label())),
        }
    }

    // --- private ---

    async fn load_detail(
        &self,
        id: &NodeId,
    ) -> Result<(MenuNode, Option<ExamAggregate>), AppError> {
        let node = self.repo.get(id).await?;
        let exam_id = node.exam_ref().and_then(|r| r.exam_id);
        let exam = match exam_id {
            // 削除済みExamへの参照でも編集・リンク解除はできるようにする
            Some(exam_id) => match self.repo.api().get_exam(&exam_id).await {
                Ok(exam) => Some(exam),
                Err(e) => {
                    tracing::warn!(node_id = %id, %exam_id, error = %e, "linked exam unavailable");
                    None
                }
            },
            None => None,
        };
        Ok((node, exam))
    }

    fn build_request(&self) -> Result<MutationRequest, AppError> {
        let title = self.form.title.trim();
        if title.is_empty() {
            return Err(DomainError::validation("title", "title is required").into());
        }
        self.validate_attachment()?;

        let (exam_id, exam_url_doc) = self.exam_link.payload_fields();
        let video = self.attachment.serialize();

        match self.target.as_ref() {
            Some(Target::Create { book_id, kind }) => Ok(MutationRequest::Create(MenuPayload {
                kind: Some(*kind),
                book_id: Some(book_id.clone()),
                title: Some(title.to_string()),
                description: self.form.description.clone(),
                cover: self.form.cover.clone(),
                active: Some(self.form.active),
                video: Some(video),
                attached: Some(self.form.attached.clone()),
                generates_activation_code: Some(self.form.generates_activation_code),
                parent_id: self.form.parent_id.clone().map(Some),
                exam_id: Some(exam_id),
                exam_url_doc: Some(exam_url_doc),
            })),
            Some(Target::Edit { original }) => {
                let parent_changed = self.form.parent_id.as_ref() != original.parent_id();
                if parent_changed && self.form.parent_id.as_ref() == Some(original.id()) {
                    return Err(DomainError::SelfParent(original.id().clone()).into());
                }
                Ok(MutationRequest::Update {
                    id: original.id().clone(),
                    payload: MenuPayload {
                        title: Some(title.to_string()),
                        description: Some(self.form.description.clone().unwrap_or_default()),
                        cover: Some(self.form.cover.clone().unwrap_or_default()),
                        active: Some(self.form.active),
                        video: self.video_changed.then_some(video),
                        attached: Some(self.form.attached.clone()),
                        parent_id: parent_changed.then(|| self.form.parent_id.clone()),
                        exam_id: Some(exam_id),
                        exam_url_doc: Some(exam_url_doc),
                        ..Default::default()
                    },
                })
            }
            None => Err(AppError::SessionState(self.phase.label())),
        }
    }

    fn validate_attachment(&self) -> Result<(), DomainError> {
        if self.attachment.is_submittable() {
            return Ok(());
        }
        let message = match self.attachment.kind() {
            AttachmentKind::AwaitingFile => "video upload has not finished",
            _ => "embed code must contain an <iframe>, <embed>, <video> or <object> tag",
        };
        Err(DomainError::validation("video", message))
    }

    fn ensure_openable(&self) -> Result<(), AppError> {
        match self.phase {
            SessionPhase::Idle | SessionPhase::Closed => Ok(()),
            SessionPhase::Submitting => Err(AppError::SubmitInFlight),
            other => Err(AppError::SessionState(other.label())),
        }
    }

    fn ensure_editing(&self) -> Result<(), AppError> {
        match self.phase {
            SessionPhase::Editing => Ok(()),
            SessionPhase::Submitting => Err(AppError::SubmitInFlight),
            other => Err(AppError::SessionState(other.label())),
        }
    }

    fn ensure_exam_set(&self) -> Result<(), AppError> {
        self.ensure_editing()?;
        match self.kind() {
            Some(NodeKind::ExamSet) => Ok(()),
            Some(other) => Err(DomainError::NotExamSet(other).into()),
            None => Err(AppError::SessionState(self.phase.label())),
        }
    }

    fn reset_local_state(&mut self) {
        self.form = NodeForm::default();
        self.attachment = AttachmentState::Empty;
        self.video_changed = false;
        self.exam_link = ExamLinkResolver::new();
        self.last_error = None;
    }
}
