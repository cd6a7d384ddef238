//! MCP Server for booktree-mcp
//!
//! MCP Protocol (stdio) <-> application::{MenuTreeRepository, TreeEditingSession, ExamQuestionService}
//!
//! 12 tools: select_book, toc, node_show, node_create, node_update, node_delete,
//! exam_search, exam_show, exam_update, exam_question_open, exam_questions_add, exam_questions_remove

use std::path::Path;
use std::sync::{Arc, RwLock};

use rmcp::{
    handler::server::{tool::ToolCallContext, tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolRequestParams, CallToolResult, Content, Implementation, ListToolsResult,
        PaginatedRequestParams, ProtocolVersion, ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
    transport::stdio,
    ErrorData as McpError, ServerHandler, ServiceExt,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::application::error::AppError;
use crate::application::exam_link::{ExamSearch, SearchOutcome};
use crate::application::exam_questions::ExamQuestionService;
use crate::application::service::MenuTreeRepository;
use crate::application::session::TreeEditingSession;
use crate::application::toc::{
    find_hierarchical_id, is_hierarchical_id, render_toc, resolve_hierarchical,
};
use crate::config::AppConfig;
use crate::domain::lock::ActiveLockGuard;
use crate::domain::model::attachment::AttachmentState;
use crate::domain::model::exam::{ExamAggregate, UploadStatus};
use crate::domain::model::id::{BookId, ExamId, NodeId, QuestionId};
use crate::domain::model::node::{MenuNode, NodeKind};
use crate::domain::model::tree::MenuTree;
use crate::domain::repository::UploadFile;
use crate::infra::auth::StaticToken;
use crate::infra::http_api::HttpContentApi;

// =============================================================================
// Public entry point
// =============================================================================

/// MCP Serverを起動する。
pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    tracing::info!(api_url = %config.api_url, "starting booktree-mcp");
    let server = BookTreeMcpServer::new(&config)?;
    let service = server.serve(stdio()).await?;
    service.waiting().await?;
    Ok(())
}

// =============================================================================
// MCP Server
// =============================================================================

type Api = HttpContentApi;

#[derive(Clone)]
struct BookTreeMcpServer {
    api: Arc<Api>,
    repo: MenuTreeRepository<Api>,
    questions: Arc<ExamQuestionService<Api>>,
    search: Arc<ExamSearch<Api>>,
    selected: Arc<RwLock<Option<BookId>>>,
    tool_router: ToolRouter<Self>,
}

impl BookTreeMcpServer {
    fn new(config: &AppConfig) -> Result<Self, crate::infra::http_api::HttpApiError> {
        let tokens = Arc::new(StaticToken::new(config.token.clone()));
        let api = Arc::new(HttpContentApi::new(
            config.api_url.clone(),
            tokens,
            config.http_timeout,
        )?);
        Ok(Self {
            repo: MenuTreeRepository::new(Arc::clone(&api)).with_tree_take(config.tree_take),
            questions: Arc::new(ExamQuestionService::new(Arc::clone(&api))),
            search: Arc::new(ExamSearch::new(Arc::clone(&api)).with_settle(config.search_settle)),
            selected: Arc::new(RwLock::new(config.default_book.clone())),
            api,
            tool_router: Self::tool_router(),
        })
    }

    /// 選択中のBook。未選択ならエラー。
    fn selected_book(&self) -> Result<BookId, McpError> {
        let guard = self
            .selected
            .read()
            .map_err(|_| McpError::internal_error("Lock poisoned", None))?;
        guard.clone().ok_or_else(|| {
            McpError::invalid_params(
                "No book selected. Use `select_book` with a book id first.",
                None,
            )
        })
    }

    async fn tree(&self, book: &BookId) -> Result<MenuTree, McpError> {
        self.repo.fetch_tree(book).await.map_err(to_mcp_error)
    }

    fn session(&self) -> TreeEditingSession<Api> {
        TreeEditingSession::new(self.repo.clone())
    }

    async fn load_exam(&self, id: &str) -> Result<ExamAggregate, McpError> {
        let id = parse_exam_id(id)?;
        self.questions.load(&id).await.map_err(to_mcp_error)
    }

    /// フォーム入力をセッションに反映する。作成・編集で共通。
    async fn apply_edits(
        &self,
        session: &mut TreeEditingSession<Api>,
        edits: NodeEdits,
    ) -> Result<(), McpError> {
        if let Some(title) = edits.title {
            session
                .set_title(unescape_newlines(&title))
                .map_err(to_mcp_error)?;
        }
        if let Some(description) = edits.description {
            let description = unescape_newlines(&description);
            session
                .set_description((!description.trim().is_empty()).then_some(description))
                .map_err(to_mcp_error)?;
        }
        if let Some(active) = edits.active {
            session.set_active(active).map_err(to_mcp_error)?;
        }
        if let Some(attached) = edits.attached {
            session.set_attached(attached).map_err(to_mcp_error)?;
        }

        if edits.remove_cover {
            session.set_cover(None).map_err(to_mcp_error)?;
        }
        if let Some(path) = edits.cover_file {
            let file = read_upload(&path).await?;
            session
                .upload_cover(self.api.as_ref(), &file)
                .await
                .map_err(to_mcp_error)?;
        }

        if edits.video_file.is_some() && edits.video_embed.is_some() {
            return Err(McpError::invalid_params(
                "Give either video_file or video_embed, not both",
                None,
            ));
        }
        if edits.remove_video {
            session.remove_video(true).map_err(to_mcp_error)?;
        }
        if let Some(path) = edits.video_file {
            let file = read_upload(&path).await?;
            session
                .upload_video(self.api.as_ref(), &file)
                .await
                .map_err(to_mcp_error)?;
        }
        if let Some(code) = edits.video_embed {
            session.embed_video(code).map_err(to_mcp_error)?;
        }

        if edits.exam_id.is_some() && edits.exam_document.is_some() {
            return Err(McpError::invalid_params(
                "Give either exam_id or exam_document, not both",
                None,
            ));
        }
        if edits.remove_exam {
            session.remove_exam(true).map_err(to_mcp_error)?;
        }
        if let Some(exam_id) = edits.exam_id {
            let exam = self.load_exam(&exam_id).await?;
            session.select_exam(exam).map_err(to_mcp_error)?;
        }
        if let Some(path) = edits.exam_document {
            let file = read_upload(&path).await?;
            session
                .import_exam_document(self.api.as_ref(), &file)
                .await
                .map_err(to_mcp_error)?;
        }
        Ok(())
    }

    /// 保存後に木を取り直して `番号. タイトル` を返す。
    async fn describe_saved(&self, node: &MenuNode) -> Result<String, McpError> {
        let tree = self.tree(node.book_id()).await?;
        let hier = find_hierarchical_id(&tree, node.id()).unwrap_or_else(|| node.id().short());
        Ok(format!(
            "{}. {} [{}] (id {})",
            hier,
            node.title(),
            node.kind(),
            node.id()
        ))
    }
}

/// 利用者側で直せるエラーは invalid_params、通信エラーは internal_error。
fn to_mcp_error(e: AppError) -> McpError {
    if e.is_user_facing() {
        McpError::invalid_params(e.to_string(), None)
    } else {
        McpError::internal_error(e.to_string(), None)
    }
}

async fn read_upload(path: &str) -> Result<UploadFile, McpError> {
    UploadFile::from_path(Path::new(path))
        .await
        .map_err(|e| to_mcp_error(AppError::File(e)))
}

/// 階層番号 / サーバID / IDプレフィックス / タイトル部分一致 → NodeId。
///
/// 優先順位:
/// 1. 階層番号 (e.g. "1", "2-3") — `toc` 出力と対応
/// 2. サーバID完全一致
/// 3. IDプレフィックス
/// 4. タイトル部分一致（フォールバック）
fn resolve_id(tree: &MenuTree, s: &str) -> Result<NodeId, McpError> {
    let s = s.trim();
    if is_hierarchical_id(s) {
        return resolve_hierarchical(tree, s).ok_or_else(|| {
            McpError::invalid_params(
                format!("No node at position '{s}'. Run `toc` to see available IDs."),
                None,
            )
        });
    }

    let exact = NodeId::new(s);
    if tree.get(&exact).is_some() {
        return Ok(exact);
    }

    let nodes = tree.all_nodes_dfs();
    let id_matches: Vec<&MenuNode> = nodes
        .iter()
        .copied()
        .filter(|n| n.id().as_str().starts_with(s))
        .collect();
    match id_matches.len() {
        1 => return Ok(id_matches[0].id().clone()),
        n if n > 1 => {
            return Err(McpError::invalid_params(
                format!("Ambiguous ID prefix: '{s}' matches {n} nodes"),
                None,
            ))
        }
        _ => {}
    }

    let query = s.to_lowercase();
    let title_matches: Vec<&MenuNode> = nodes
        .iter()
        .copied()
        .filter(|n| n.title().to_lowercase().contains(&query))
        .collect();
    match title_matches.len() {
        0 => Err(McpError::invalid_params(
            format!("No node found matching: '{s}'"),
            None,
        )),
        1 => Ok(title_matches[0].id().clone()),
        n => Err(McpError::invalid_params(
            format!(
                "Ambiguous title match: '{s}' matches {n} nodes: {}",
                title_matches
                    .iter()
                    .map(|node| {
                        let hier = find_hierarchical_id(tree, node.id())
                            .unwrap_or_else(|| node.id().short());
                        format!("'{}' ({})", node.title(), hier)
                    })
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            None,
        )),
    }
}

// =============================================================================
// ServerHandler impl
// =============================================================================

impl ServerHandler for BookTreeMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_03_26,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "booktree-mcp".to_string(),
                title: Some("Book Tree MCP — Course Outline Editor".to_string()),
                description: Some(
                    "Edit a book's table of contents (chapters, lessons, exam sets) \
                     and the question lists of linked exams."
                        .to_string(),
                ),
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Manage the content tree of a book stored in the content service.\n\
                 \n\
                 Chapters hold lessons, exam sets and sub-chapters. Exam sets link to an exam, \
                 either picked with `exam_search` or imported from a Word/PDF document.\n\
                 Active exams are locked: their questions cannot be removed or edited.\n\
                 \n\
                 Tools: `select_book` → `toc` → `node_show`/`node_create`/`node_update`/`node_delete`. \
                 Exams: `exam_search`, `exam_show`, `exam_update`, `exam_question_open`, \
                 `exam_questions_add`, `exam_questions_remove`."
                    .to_string(),
            ),
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult {
            tools: self.tool_router.list_all(),
            next_cursor: None,
            meta: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let tool_ctx = ToolCallContext::new(self, request, context);
        self.tool_router.call(tool_ctx).await
    }
}

// =============================================================================
// Request types
// =============================================================================

fn parse_node_kind(s: &str) -> Result<NodeKind, McpError> {
    NodeKind::parse(s).ok_or_else(|| {
        McpError::invalid_params(
            format!("Unknown kind: '{s}'. Use: chapter, lesson, exam_set"),
            None,
        )
    })
}

fn parse_exam_id(s: &str) -> Result<ExamId, McpError> {
    let id = ExamId::new(s.trim());
    if id.is_blank() {
        return Err(McpError::invalid_params("exam_id must not be empty", None));
    }
    Ok(id)
}

fn parse_question_ids(ids: &[String]) -> Vec<QuestionId> {
    ids.iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(QuestionId::new)
        .collect()
}

/// MCP経由のテキストに含まれるリテラル `\n` を実際の改行に変換する。
fn unescape_newlines(s: &str) -> String {
    s.replace("\\n", "\n")
}

/// 作成・編集で共通の入力
#[derive(Debug, Default)]
struct NodeEdits {
    title: Option<String>,
    description: Option<String>,
    active: Option<bool>,
    attached: Option<Vec<String>>,
    cover_file: Option<String>,
    remove_cover: bool,
    video_file: Option<String>,
    video_embed: Option<String>,
    remove_video: bool,
    exam_id: Option<String>,
    exam_document: Option<String>,
    remove_exam: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct McpSelectBookRequest {
    #[schemars(description = "Book id in the content service")]
    pub book_id: String,

    #[schemars(description = "Suppress TOC output (default: false)")]
    #[serde(default)]
    pub quiet: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct McpTocRequest {
    #[schemars(description = "Chapter ID from `toc` output (e.g. '2'). Omit to show entire book.")]
    pub subtree_root: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct McpNodeShowRequest {
    #[schemars(description = "Node ID from `toc` output (e.g. '2-3'). Server id also accepted.")]
    pub node_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct McpNodeCreateRequest {
    #[schemars(
        description = "Parent chapter ID from `toc` output (e.g. '1', '2-3'). Omit for a top-level node."
    )]
    pub parent: Option<String>,
    #[schemars(description = "Node kind: chapter, lesson or exam_set")]
    pub kind: String,
    #[schemars(
        description = "Node title. May be omitted for an exam_set with exam_id; the exam title is used."
    )]
    #[serde(default)]
    pub title: String,
    #[schemars(description = "Optional description")]
    pub description: Option<String>,
    #[schemars(description = "Publish the node (default: false)")]
    pub active: Option<bool>,
    #[schemars(description = "Generate an activation code for this node (default: false)")]
    pub activation_code: Option<bool>,
    #[schemars(description = "Attached resource URLs")]
    pub attached: Option<Vec<String>>,
    #[schemars(description = "Local image file to upload as the cover")]
    pub cover_file: Option<String>,
    #[schemars(description = "Local video file to upload")]
    pub video_file: Option<String>,
    #[schemars(description = "Video embed code (<iframe>, <embed>, <video> or <object>)")]
    pub video_embed: Option<String>,
    #[schemars(description = "exam_set only: id of an existing exam (see `exam_search`)")]
    pub exam_id: Option<String>,
    #[schemars(
        description = "exam_set only: local .doc/.docx/.pdf file to import as a new exam"
    )]
    pub exam_document: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct McpNodeUpdateRequest {
    #[schemars(description = "Node ID from `toc` output (e.g. '2-3'). Server id also accepted.")]
    pub node_id: String,
    #[schemars(description = "New title (omit to keep current)")]
    pub title: Option<String>,
    #[schemars(description = "New description (empty string clears, omit to keep current)")]
    pub description: Option<String>,
    #[schemars(description = "Publish or unpublish the node")]
    pub active: Option<bool>,
    #[schemars(description = "New parent chapter ID from `toc` output")]
    pub parent: Option<String>,
    #[schemars(description = "Move the node to the top level (default: false)")]
    #[serde(default)]
    pub move_to_root: bool,
    #[schemars(description = "Replace attached resource URLs")]
    pub attached: Option<Vec<String>>,
    #[schemars(description = "Local image file to upload as the new cover")]
    pub cover_file: Option<String>,
    #[schemars(description = "Remove the cover image (default: false)")]
    #[serde(default)]
    pub remove_cover: bool,
    #[schemars(description = "Local video file to upload (requires remove_video if one exists)")]
    pub video_file: Option<String>,
    #[schemars(description = "Video embed code (requires remove_video if a video exists)")]
    pub video_embed: Option<String>,
    #[schemars(description = "Confirm removal of the current video (default: false)")]
    #[serde(default)]
    pub remove_video: bool,
    #[schemars(description = "exam_set only: link an existing exam")]
    pub exam_id: Option<String>,
    #[schemars(description = "exam_set only: local .doc/.docx/.pdf file to import")]
    pub exam_document: Option<String>,
    #[schemars(
        description = "Confirm removal of the current exam link (refused while the exam is active)"
    )]
    #[serde(default)]
    pub remove_exam: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct McpNodeDeleteRequest {
    #[schemars(description = "Node ID from `toc` output (e.g. '2-3'). Server id also accepted.")]
    pub node_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct McpExamSearchRequest {
    #[schemars(description = "Search text (omit to list all exams)")]
    pub search: Option<String>,
    #[schemars(description = "Page number, 1-based (default: 1)")]
    pub page: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct McpExamShowRequest {
    #[schemars(description = "Exam id")]
    pub exam_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct McpExamUpdateRequest {
    #[schemars(description = "Exam id")]
    pub exam_id: String,
    #[schemars(description = "New exam title")]
    pub title: Option<String>,
    #[schemars(description = "Activate or deactivate the exam")]
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct McpExamQuestionOpenRequest {
    #[schemars(description = "Exam id")]
    pub exam_id: String,
    #[schemars(description = "Question id from `exam_show` output")]
    pub question_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct McpExamQuestionsRequest {
    #[schemars(description = "Exam id")]
    pub exam_id: String,
    #[schemars(description = "Question ids")]
    pub question_ids: Vec<String>,
}

// =============================================================================
// Tool implementations
// =============================================================================

#[tool_router]
impl BookTreeMcpServer {
    #[tool(
        name = "select_book",
        description = "Select the book to work with. All subsequent node operations target it. Shows the TOC unless quiet=true.",
        annotations(
            read_only_hint = false,
            destructive_hint = false,
            idempotent_hint = true,
            open_world_hint = true
        )
    )]
    async fn select_book(
        &self,
        Parameters(req): Parameters<McpSelectBookRequest>,
    ) -> Result<CallToolResult, McpError> {
        let book = BookId::new(req.book_id.trim());
        let tree = self.tree(&book).await?;

        {
            let mut guard = self
                .selected
                .write()
                .map_err(|_| McpError::internal_error("Lock poisoned", None))?;
            *guard = Some(book.clone());
        }
        tracing::info!(book_id = %book, nodes = tree.node_count(), "book selected");

        let toc_section = if req.quiet {
            String::new()
        } else {
            format!("\n\n{}", render_toc(&tree, None))
        };
        Ok(CallToolResult::success(vec![Content::text(format!(
            "Selected: {} ({} nodes){}",
            book,
            tree.node_count(),
            toc_section
        ))]))
    }

    #[tool(
        name = "toc",
        description = "Show the table of contents with numbered IDs (e.g. '1', '2-3'). Use these IDs with other tools.",
        annotations(
            read_only_hint = true,
            destructive_hint = false,
            idempotent_hint = true,
            open_world_hint = true
        )
    )]
    async fn toc(
        &self,
        Parameters(req): Parameters<McpTocRequest>,
    ) -> Result<CallToolResult, McpError> {
        let book = self.selected_book()?;
        let tree = self.tree(&book).await?;
        let root = req
            .subtree_root
            .as_deref()
            .map(|s| resolve_id(&tree, s))
            .transpose()?;
        Ok(CallToolResult::success(vec![Content::text(render_toc(
            &tree,
            root.as_ref(),
        ))]))
    }

    #[tool(
        name = "node_show",
        description = "Show one node in detail: description, cover, video, attachments and the linked exam.",
        annotations(
            read_only_hint = true,
            destructive_hint = false,
            idempotent_hint = true,
            open_world_hint = true
        )
    )]
    async fn node_show(
        &self,
        Parameters(req): Parameters<McpNodeShowRequest>,
    ) -> Result<CallToolResult, McpError> {
        let book = self.selected_book()?;
        let tree = self.tree(&book).await?;
        let id = resolve_id(&tree, &req.node_id)?;
        let node = self.repo.get(&id).await.map_err(to_mcp_error)?;

        let exam = match node.exam_ref().and_then(|r| r.exam_id) {
            Some(exam_id) => Some(self.questions.load(&exam_id).await),
            None => None,
        };
        let hier = find_hierarchical_id(&tree, &id).unwrap_or_else(|| id.short());
        Ok(CallToolResult::success(vec![Content::text(format_node(
            &hier, &node, exam,
        ))]))
    }

    #[tool(
        name = "node_create",
        description = "Create a chapter, lesson or exam set. Use a parent chapter ID from `toc` output (e.g. '1') to nest it, or omit for top level.",
        annotations(
            read_only_hint = false,
            destructive_hint = false,
            idempotent_hint = false,
            open_world_hint = true
        )
    )]
    async fn node_create(
        &self,
        Parameters(req): Parameters<McpNodeCreateRequest>,
    ) -> Result<CallToolResult, McpError> {
        let book = self.selected_book()?;
        let kind = parse_node_kind(&req.kind)?;
        let tree = self.tree(&book).await?;
        let parent_id = req
            .parent
            .as_deref()
            .map(|s| resolve_id(&tree, s))
            .transpose()?;
        let parent = parent_id.as_ref().and_then(|id| tree.get(id));

        let mut session = self.session();
        session
            .open_create(book, kind, parent)
            .map_err(to_mcp_error)?;
        if let Some(enabled) = req.activation_code {
            session.set_activation_code(enabled).map_err(to_mcp_error)?;
        }
        let edits = NodeEdits {
            title: Some(req.title),
            description: req.description,
            active: req.active,
            attached: req.attached,
            cover_file: req.cover_file,
            video_file: req.video_file,
            video_embed: req.video_embed,
            exam_id: req.exam_id,
            exam_document: req.exam_document,
            ..Default::default()
        };
        self.apply_edits(&mut session, edits).await?;

        let node = session.submit().await.map_err(to_mcp_error)?;
        let summary = self.describe_saved(&node).await?;
        Ok(CallToolResult::success(vec![Content::text(format!(
            "Created: {summary}"
        ))]))
    }

    #[tool(
        name = "node_update",
        description = "Edit a node. Specify it by ID from `toc` output (e.g. '2-3'). Only given fields change. Replacing a video or exam link needs remove_video / remove_exam.",
        annotations(
            read_only_hint = false,
            destructive_hint = false,
            idempotent_hint = true,
            open_world_hint = true
        )
    )]
    async fn node_update(
        &self,
        Parameters(req): Parameters<McpNodeUpdateRequest>,
    ) -> Result<CallToolResult, McpError> {
        let book = self.selected_book()?;
        let tree = self.tree(&book).await?;
        let id = resolve_id(&tree, &req.node_id)?;

        let mut session = self.session();
        session.open_edit(&id).await.map_err(to_mcp_error)?;

        if req.move_to_root {
            session.set_parent(&tree, None).map_err(to_mcp_error)?;
        } else if let Some(parent) = req.parent.as_deref() {
            let parent = resolve_id(&tree, parent)?;
            session
                .set_parent(&tree, Some(parent))
                .map_err(to_mcp_error)?;
        }
        let edits = NodeEdits {
            title: req.title,
            description: req.description,
            active: req.active,
            attached: req.attached,
            cover_file: req.cover_file,
            remove_cover: req.remove_cover,
            video_file: req.video_file,
            video_embed: req.video_embed,
            remove_video: req.remove_video,
            exam_id: req.exam_id,
            exam_document: req.exam_document,
            remove_exam: req.remove_exam,
        };
        self.apply_edits(&mut session, edits).await?;

        let node = session.submit().await.map_err(to_mcp_error)?;
        let summary = self.describe_saved(&node).await?;
        Ok(CallToolResult::success(vec![Content::text(format!(
            "Updated: {summary}"
        ))]))
    }

    #[tool(
        name = "node_delete",
        description = "Delete a node by ID from `toc` output. Nodes that still have children are refused; delete or move the children first. Cannot be undone.",
        annotations(
            read_only_hint = false,
            destructive_hint = true,
            idempotent_hint = false,
            open_world_hint = true
        )
    )]
    async fn node_delete(
        &self,
        Parameters(req): Parameters<McpNodeDeleteRequest>,
    ) -> Result<CallToolResult, McpError> {
        let book = self.selected_book()?;
        let tree = self.tree(&book).await?;
        let id = resolve_id(&tree, &req.node_id)?;
        let title = tree
            .get(&id)
            .map(|n| n.title().to_string())
            .unwrap_or_default();

        self.repo
            .delete_checked(&tree, &id)
            .await
            .map_err(to_mcp_error)?;
        Ok(CallToolResult::success(vec![Content::text(format!(
            "Deleted: {title} (id {id})"
        ))]))
    }

    #[tool(
        name = "exam_search",
        description = "Search exams by title. Results can be linked to an exam set via node_create/node_update exam_id.",
        annotations(
            read_only_hint = true,
            destructive_hint = false,
            idempotent_hint = true,
            open_world_hint = true
        )
    )]
    async fn exam_search(
        &self,
        Parameters(req): Parameters<McpExamSearchRequest>,
    ) -> Result<CallToolResult, McpError> {
        let text = req.search.unwrap_or_default();
        let outcome = self
            .search
            .query(&text, req.page.unwrap_or(1))
            .await
            .map_err(to_mcp_error)?;

        let page = match outcome {
            SearchOutcome::Results(page) => page,
            SearchOutcome::Superseded => {
                return Ok(CallToolResult::success(vec![Content::text(
                    "Superseded by a newer search; results discarded.",
                )]))
            }
        };
        if page.items.is_empty() {
            return Ok(CallToolResult::success(vec![Content::text(
                "No exams found.",
            )]));
        }
        let mut output = format!(
            "Exams (page {}, {} total)\n\n",
            page.pagination.page, page.pagination.total_item
        );
        for exam in &page.items {
            output.push_str(&format!("- {}\n", exam_summary(exam)));
        }
        Ok(CallToolResult::success(vec![Content::text(output)]))
    }

    #[tool(
        name = "exam_show",
        description = "Show an exam and its question list.",
        annotations(
            read_only_hint = true,
            destructive_hint = false,
            idempotent_hint = true,
            open_world_hint = true
        )
    )]
    async fn exam_show(
        &self,
        Parameters(req): Parameters<McpExamShowRequest>,
    ) -> Result<CallToolResult, McpError> {
        let exam = self.load_exam(&req.exam_id).await?;
        Ok(CallToolResult::success(vec![Content::text(format_exam(
            &exam,
        ))]))
    }

    #[tool(
        name = "exam_update",
        description = "Change an exam's title or active flag. Allowed while the exam is active.",
        annotations(
            read_only_hint = false,
            destructive_hint = false,
            idempotent_hint = true,
            open_world_hint = true
        )
    )]
    async fn exam_update(
        &self,
        Parameters(req): Parameters<McpExamUpdateRequest>,
    ) -> Result<CallToolResult, McpError> {
        let exam = self.load_exam(&req.exam_id).await?;
        let updated = self
            .questions
            .update_metadata(&exam, req.title, req.active)
            .await
            .map_err(to_mcp_error)?;
        Ok(CallToolResult::success(vec![Content::text(format!(
            "Updated: {}",
            exam_summary(&updated)
        ))]))
    }

    #[tool(
        name = "exam_question_open",
        description = "Open one question of an exam for editing. Refused while the exam is active.",
        annotations(
            read_only_hint = true,
            destructive_hint = false,
            idempotent_hint = true,
            open_world_hint = true
        )
    )]
    async fn exam_question_open(
        &self,
        Parameters(req): Parameters<McpExamQuestionOpenRequest>,
    ) -> Result<CallToolResult, McpError> {
        let exam = self.load_exam(&req.exam_id).await?;
        let question_id = QuestionId::new(req.question_id.trim());
        let question = self
            .questions
            .open_question(&exam, &question_id)
            .map_err(to_mcp_error)?;

        let mut output = format!("Question {}\n\n{}\n", question.id, question.content);
        if !question.options.is_null() {
            output.push_str(&format!("\noptions: {}", question.options));
        }
        if !question.answers.is_null() {
            output.push_str(&format!("\nanswers: {}", question.answers));
        }
        if let Some(solution) = &question.solution {
            output.push_str(&format!("\nsolution: {solution}"));
        }
        if let Some(video) = &question.video {
            output.push_str(&format!("\nvideo: {video}"));
        }
        Ok(CallToolResult::success(vec![Content::text(output)]))
    }

    #[tool(
        name = "exam_questions_add",
        description = "Add questions to an exam by id. Questions already in the exam are skipped.",
        annotations(
            read_only_hint = false,
            destructive_hint = false,
            idempotent_hint = true,
            open_world_hint = true
        )
    )]
    async fn exam_questions_add(
        &self,
        Parameters(req): Parameters<McpExamQuestionsRequest>,
    ) -> Result<CallToolResult, McpError> {
        let exam = self.load_exam(&req.exam_id).await?;
        let ids = parse_question_ids(&req.question_ids);
        let before = exam.question_count();
        let updated = self
            .questions
            .add_questions(&exam, &ids)
            .await
            .map_err(to_mcp_error)?;
        Ok(CallToolResult::success(vec![Content::text(format!(
            "Exam {}: {} → {} questions",
            updated.id,
            before,
            updated.question_count()
        ))]))
    }

    #[tool(
        name = "exam_questions_remove",
        description = "Remove questions from an exam by id. Refused while the exam is active.",
        annotations(
            read_only_hint = false,
            destructive_hint = true,
            idempotent_hint = false,
            open_world_hint = true
        )
    )]
    async fn exam_questions_remove(
        &self,
        Parameters(req): Parameters<McpExamQuestionsRequest>,
    ) -> Result<CallToolResult, McpError> {
        let exam = self.load_exam(&req.exam_id).await?;
        let ids = parse_question_ids(&req.question_ids);
        let before = exam.question_count();
        let updated = self
            .questions
            .remove_questions(&exam, &ids)
            .await
            .map_err(to_mcp_error)?;
        Ok(CallToolResult::success(vec![Content::text(format!(
            "Exam {}: {} → {} questions",
            updated.id,
            before,
            updated.question_count()
        ))]))
    }
}

// =============================================================================
// Helpers — formatting
// =============================================================================

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

fn describe_video(state: &AttachmentState) -> String {
    match state {
        AttachmentState::Empty => "none".to_string(),
        AttachmentState::AwaitingFile => "upload pending".to_string(),
        AttachmentState::UploadedFile { url } => format!("file {url}"),
        AttachmentState::Embedded { .. } => "embed code".to_string(),
    }
}

fn exam_summary(exam: &ExamAggregate) -> String {
    let mut line = format!(
        "{} \"{}\" ({} questions",
        exam.id,
        exam.title,
        exam.question_count()
    );
    if ActiveLockGuard::is_locked(exam) {
        line.push_str(", active, locked");
    }
    match exam.status_upload {
        UploadStatus::Processing => line.push_str(", import processing"),
        UploadStatus::Error => line.push_str(", import failed"),
        UploadStatus::None | UploadStatus::Done => {}
    }
    line.push(')');
    line
}

fn format_exam(exam: &ExamAggregate) -> String {
    let mut output = format!("{}\n", exam_summary(exam));
    if let Some(subject) = &exam.subject {
        output.push_str(&format!("subject: {subject}\n"));
    }
    if exam.questions().is_empty() {
        output.push_str("\n(no questions)\n");
        return output;
    }
    output.push('\n');
    for (i, entry) in exam.questions().iter().enumerate() {
        let first_line = entry.question.content.lines().next().unwrap_or("");
        let preview: String = first_line.chars().take(80).collect();
        output.push_str(&format!(
            "{}. [{}] {}\n",
            i + 1,
            entry.question.id,
            preview
        ));
    }
    output
}

fn format_node(
    hier: &str,
    node: &MenuNode,
    exam: Option<Result<ExamAggregate, AppError>>,
) -> String {
    let mut output = format!("{}. {} [{}]\n", hier, node.title(), node.kind());
    output.push_str(&format!("id: {}\n", node.id()));
    if let Some(parent) = node.parent_id() {
        output.push_str(&format!("parent: {parent}\n"));
    }
    output.push_str(&format!("active: {}\n", yes_no(node.is_active())));
    output.push_str(&format!(
        "activation code: {}\n",
        yes_no(node.generates_activation_code())
    ));
    if let Some(description) = node.description() {
        output.push_str(&format!("description: {description}\n"));
    }
    if let Some(cover) = node.cover() {
        output.push_str(&format!("cover: {cover}\n"));
    }
    output.push_str(&format!("video: {}\n", describe_video(&node.attachment())));
    if !node.attached().is_empty() {
        output.push_str(&format!("attached: {}\n", node.attached().join(", ")));
    }

    if let Some(exam_ref) = node.exam_ref() {
        match (exam_ref.exam_id, exam) {
            (Some(_), Some(Ok(exam))) => {
                output.push_str(&format!("exam: {}\n", exam_summary(&exam)));
            }
            (Some(id), Some(Err(e))) => {
                output.push_str(&format!("exam: {id} (could not load: {e})\n"));
            }
            (Some(id), None) => output.push_str(&format!("exam: {id}\n")),
            (None, _) => output.push_str("exam: none\n"),
        }
        if let Some(doc) = exam_ref.pending_doc {
            output.push_str(&format!("exam document: {doc}\n"));
        }
    }
    output
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config() -> AppConfig {
        AppConfig {
            api_url: "http://127.0.0.1:9".to_string(),
            token: Some("t".to_string()),
            default_book: None,
            tree_take: 100,
            search_settle: Duration::ZERO,
            http_timeout: Duration::from_secs(1),
        }
    }

    fn tree() -> MenuTree {
        let book = BookId::new("b1");
        MenuTree::build(vec![
            MenuNode::new(
                NodeId::new("65a0c1"),
                NodeKind::Chapter,
                book.clone(),
                "Chương 1",
            )
            .with_order(1),
            MenuNode::new(
                NodeId::new("65a0c2"),
                NodeKind::Chapter,
                book.clone(),
                "Chương 2",
            )
            .with_order(2),
            MenuNode::new(NodeId::new("77b1"), NodeKind::Lesson, book, "Bài mở đầu")
                .with_parent(NodeId::new("65a0c1")),
        ])
    }

    #[test]
    fn parse_node_kind_valid() {
        assert_eq!(parse_node_kind("chapter").unwrap(), NodeKind::Chapter);
        assert_eq!(parse_node_kind("lesson").unwrap(), NodeKind::Lesson);
        assert_eq!(parse_node_kind("exam_set").unwrap(), NodeKind::ExamSet);
    }

    #[test]
    fn parse_node_kind_invalid() {
        assert!(parse_node_kind("section").is_err());
    }

    #[test]
    fn server_info() {
        let server = BookTreeMcpServer::new(&config()).unwrap();
        let info = server.get_info();
        assert_eq!(info.server_info.name, "booktree-mcp");
        assert!(!info.server_info.version.is_empty());
    }

    #[test]
    fn no_book_selected_is_invalid_params() {
        let server = BookTreeMcpServer::new(&config()).unwrap();
        let err = server.selected_book().unwrap_err();
        assert!(err.message.contains("select_book"));
    }

    #[test]
    fn default_book_is_preselected() {
        let mut config = config();
        config.default_book = Some(BookId::new("b9"));
        let server = BookTreeMcpServer::new(&config).unwrap();
        assert_eq!(server.selected_book().unwrap(), BookId::new("b9"));
    }

    #[test]
    fn resolve_by_number_id_prefix_and_title() {
        let tree = tree();
        assert_eq!(resolve_id(&tree, "1-1").unwrap(), NodeId::new("77b1"));
        assert_eq!(resolve_id(&tree, "65a0c2").unwrap(), NodeId::new("65a0c2"));
        assert_eq!(resolve_id(&tree, "77b").unwrap(), NodeId::new("77b1"));
        assert_eq!(resolve_id(&tree, "mở đầu").unwrap(), NodeId::new("77b1"));
    }

    #[test]
    fn resolve_reports_ambiguity_and_misses() {
        let tree = tree();
        let err = resolve_id(&tree, "65a0").unwrap_err();
        assert!(err.message.contains("Ambiguous ID prefix"));

        let err = resolve_id(&tree, "chương").unwrap_err();
        assert!(err.message.contains("Ambiguous title match"));

        let err = resolve_id(&tree, "3").unwrap_err();
        assert!(err.message.contains("No node at position '3'"));
    }

    #[test]
    fn node_create_request_minimal() {
        let req: McpNodeCreateRequest =
            serde_json::from_str(r#"{"kind": "lesson", "title": "Bài 1"}"#).unwrap();
        assert_eq!(req.kind, "lesson");
        assert!(req.parent.is_none());
        assert!(req.exam_id.is_none());
    }

    #[test]
    fn node_update_request_flags_default_false() {
        let req: McpNodeUpdateRequest = serde_json::from_str(r#"{"node_id": "2-3"}"#).unwrap();
        assert!(!req.move_to_root);
        assert!(!req.remove_video);
        assert!(!req.remove_exam);
        assert!(!req.remove_cover);
    }

    #[test]
    fn question_ids_are_trimmed() {
        let ids = parse_question_ids(&[" q1 ".to_string(), "".to_string(), "q2".to_string()]);
        assert_eq!(ids, vec![QuestionId::new("q1"), QuestionId::new("q2")]);
    }

    #[test]
    fn user_errors_map_to_invalid_params() {
        let err = to_mcp_error(AppError::SubmitInFlight);
        assert_eq!(err.code, rmcp::model::ErrorCode::INVALID_PARAMS);

        let io = std::io::Error::other("boom");
        let err = to_mcp_error(AppError::api(io));
        assert_eq!(err.code, rmcp::model::ErrorCode::INTERNAL_ERROR);
    }

    #[test]
    fn exam_summary_marks_locked() {
        let exam: ExamAggregate = serde_json::from_value(serde_json::json!({
            "id": "E1", "title": "Đề 1", "active": true, "total_question": 3,
            "status_upload": "processing"
        }))
        .unwrap();
        assert_eq!(
            exam_summary(&exam),
            "E1 \"Đề 1\" (3 questions, active, locked, import processing)"
        );
    }

    #[test]
    fn format_node_shows_exam_link() {
        let node: MenuNode = serde_json::from_value(serde_json::json!({
            "id": "n1", "type": "DE", "book_id": "b1", "title": "Đề 1",
            "exam_url_doc": "https://cdn.test/de1.docx"
        }))
        .unwrap();
        let text = format_node("1-2", &node, None);
        assert!(text.starts_with("1-2. Đề 1 [exam_set]\n"));
        assert!(text.contains("exam: none\n"));
        assert!(text.contains("exam document: https://cdn.test/de1.docx\n"));
        assert!(text.contains("video: none\n"));
    }

    #[test]
    fn unescape_literal_newlines() {
        assert_eq!(unescape_newlines("a\\nb"), "a\nb");
    }
}
