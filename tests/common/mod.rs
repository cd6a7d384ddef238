//! Shared test harness for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use booktree_mcp::application::service::MenuTreeRepository;
use booktree_mcp::application::session::TreeEditingSession;
use booktree_mcp::domain::model::exam::{ExamAggregate, ExamUpdate};
use booktree_mcp::domain::model::id::{ExamId, NodeId, QuestionId};
use booktree_mcp::domain::model::node::{MenuNode, MenuPayload};
use booktree_mcp::domain::model::query::{ExamQuery, MenuQuery, Page};
use booktree_mcp::domain::repository::{ContentApi, FileUploader, UploadFile};

// =============================================================================
// FakeContentApi — サーバのJSON行をメモリに持つテスト用API
// =============================================================================

#[derive(Debug, thiserror::Error)]
#[error("fake service error: {0}")]
pub struct FakeApiError(pub String);

#[derive(Default)]
struct FakeState {
    menus: Vec<Value>,
    exams: Vec<Value>,
    question_bank: HashMap<String, Value>,
    payloads: Vec<Value>,
    next_id: u64,
}

/// ネットワーク無しで `ContentApi` を満たす。呼び出し回数を操作ごとに数える。
#[derive(Default)]
pub struct FakeContentApi {
    state: Mutex<FakeState>,
    calls: Mutex<HashMap<&'static str, usize>>,
    failing: Mutex<HashSet<&'static str>>,
    search_delays: Mutex<HashMap<String, Duration>>,
}

pub fn question(id: &str, content: &str) -> Value {
    json!({
        "id": id,
        "content": content,
        "options": ["A", "B", "C", "D"],
        "answers": ["A"],
        "solution": null,
        "video": null
    })
}

fn exam_question(q: &Value) -> Value {
    json!({ "id": format!("eq-{}", q["id"].as_str().unwrap_or_default()), "question": q })
}

impl FakeContentApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// 標準的なBook b1:
    ///
    /// ```text
    /// C1 Chương 1
    ///   L1 Bài 1
    /// C2 Chương 2
    /// ```
    ///
    /// Exam: E1（非公開, q1,q2） / E2（公開中, q3,q4）。問題バンクに q1..q6。
    pub fn seeded() -> Self {
        let api = Self::new();
        api.insert_row(json!({
            "id": "C1", "type": "CHUONG", "book_id": "b1", "title": "Chương 1",
            "parent_id": null, "order": 1, "active": true,
            "video": "", "attached": [], "created_at": "2024-01-01T00:00:00Z"
        }));
        api.insert_row(json!({
            "id": "L1", "type": "BAI", "book_id": "b1", "title": "Bài 1",
            "parent_id": "C1", "order": 1, "active": true,
            "video": "https://cdn.test/bai1.mp4", "attached": [],
            "created_at": "2024-01-01T00:01:00Z"
        }));
        api.insert_row(json!({
            "id": "C2", "type": "CHUONG", "book_id": "b1", "title": "Chương 2",
            "parent_id": null, "order": 2, "active": false,
            "video": "", "attached": [], "created_at": "2024-01-01T00:02:00Z"
        }));

        for i in 1..=6 {
            let id = format!("q{i}");
            api.add_question(question(&id, &format!("Câu hỏi {i}")));
        }
        api.insert_exam("E1", "Đề giữa kỳ", false, &["q1", "q2"]);
        api.insert_exam("E2", "Đề cuối kỳ", true, &["q3", "q4"]);
        api
    }

    pub fn insert_row(&self, row: Value) {
        self.state.lock().unwrap().menus.push(row);
    }

    pub fn add_question(&self, q: Value) {
        let id = q["id"].as_str().unwrap().to_string();
        self.state.lock().unwrap().question_bank.insert(id, q);
    }

    pub fn insert_exam(&self, id: &str, title: &str, active: bool, question_ids: &[&str]) {
        let mut state = self.state.lock().unwrap();
        let questions: Vec<Value> = question_ids
            .iter()
            .map(|q| exam_question(&state.question_bank[*q]))
            .collect();
        state.exams.push(json!({
            "id": id,
            "title": title,
            "code_id": format!("CODE-{id}"),
            "active": active,
            "subject": "math",
            "total_question": questions.len(),
            "status_upload": "none",
            "file_upload": null,
            "exams_question": questions
        }));
    }

    /// 文書変換の完了をシミュレートする。`exam_url_doc` を持つ行に新しいExamを紐付ける。
    pub fn complete_conversion(&self, doc_url: &str, exam_id: &str, question_ids: &[&str]) {
        self.insert_exam(exam_id, "Imported", false, question_ids);
        let mut state = self.state.lock().unwrap();
        if let Some(exam) = state.exams.iter_mut().find(|e| e["id"] == exam_id) {
            exam["status_upload"] = json!("done");
            exam["file_upload"] = json!(doc_url);
        }
        for row in state.menus.iter_mut() {
            if row["exam_url_doc"] == doc_url {
                row["exam_id"] = json!(exam_id);
            }
        }
    }

    // ---- inspection ----

    pub fn calls(&self, op: &str) -> usize {
        self.calls.lock().unwrap().get(op).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    /// 最後に送られた menu-book の作成・更新ボディ
    pub fn last_payload(&self) -> Option<Value> {
        self.state.lock().unwrap().payloads.last().cloned()
    }

    pub fn row(&self, id: &str) -> Option<Value> {
        self.state
            .lock()
            .unwrap()
            .menus
            .iter()
            .find(|r| r["id"] == id)
            .cloned()
    }

    pub fn exam_question_ids(&self, id: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .exams
            .iter()
            .find(|e| e["id"] == id)
            .map(|e| {
                e["exams_question"]
                    .as_array()
                    .into_iter()
                    .flatten()
                    .map(|q| q["question"]["id"].as_str().unwrap_or_default().to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    // ---- failure injection ----

    pub fn set_failing(&self, op: &'static str, failing: bool) {
        let mut set = self.failing.lock().unwrap();
        if failing {
            set.insert(op);
        } else {
            set.remove(op);
        }
    }

    /// 検索語ごとの応答遅延
    pub fn delay_search(&self, search: &str, delay: Duration) {
        self.search_delays
            .lock()
            .unwrap()
            .insert(search.to_string(), delay);
    }

    fn record(&self, op: &'static str) -> Result<(), FakeApiError> {
        *self.calls.lock().unwrap().entry(op).or_insert(0) += 1;
        if self.failing.lock().unwrap().contains(op) {
            return Err(FakeApiError(format!("{op} unavailable (503)")));
        }
        Ok(())
    }

    fn exam_value(&self, id: &str) -> Result<Value, FakeApiError> {
        self.state
            .lock()
            .unwrap()
            .exams
            .iter()
            .find(|e| e["id"] == id)
            .cloned()
            .ok_or_else(|| FakeApiError(format!("exam {id} not found (404)")))
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, FakeApiError> {
    serde_json::from_value(value).map_err(|e| FakeApiError(format!("malformed response: {e}")))
}

fn page_of(items: Vec<Value>, page: u32, take: u32) -> Value {
    let total = items.len();
    let start = ((page.max(1) - 1) * take) as usize;
    let data: Vec<Value> = items.into_iter().skip(start).take(take as usize).collect();
    json!({
        "data": data,
        "pagination": { "page": page, "take": take, "total": total }
    })
}

#[async_trait]
impl ContentApi for FakeContentApi {
    type Error = FakeApiError;

    async fn list_menu(&self, query: &MenuQuery) -> Result<Page<MenuNode>, Self::Error> {
        self.record("list_menu")?;
        let rows: Vec<Value> = {
            let state = self.state.lock().unwrap();
            let mut rows: Vec<Value> = state
                .menus
                .iter()
                .filter(|r| r["book_id"] == query.book_id.as_str())
                .filter(|r| match &query.search {
                    Some(s) => r["title"].as_str().unwrap_or_default().contains(s.as_str()),
                    None => true,
                })
                .cloned()
                .collect();
            rows.sort_by_key(|r| r["order"].as_i64().unwrap_or(0));
            rows
        };
        decode(page_of(rows, query.page, query.take))
    }

    async fn get_menu(&self, id: &NodeId) -> Result<MenuNode, Self::Error> {
        self.record("get_menu")?;
        let row = self
            .row(id.as_str())
            .ok_or_else(|| FakeApiError(format!("menu {id} not found (404)")))?;
        decode(row)
    }

    async fn create_menu(&self, payload: &MenuPayload) -> Result<MenuNode, Self::Error> {
        self.record("create_menu")?;
        let body = serde_json::to_value(payload).map_err(|e| FakeApiError(e.to_string()))?;
        let row = {
            let mut state = self.state.lock().unwrap();
            state.payloads.push(body.clone());
            state.next_id += 1;
            let id = format!("N{}", state.next_id);
            let siblings = state
                .menus
                .iter()
                .filter(|r| r["parent_id"] == body.get("parent_id").cloned().unwrap_or(Value::Null))
                .count();

            let mut row = json!({
                "id": id,
                "parent_id": null,
                "description": null,
                "cover": null,
                "order": siblings + 1,
                "exam_id": null,
                "exam_url_doc": null,
                "created_at": format!("2024-02-01T00:00:{:02}Z", state.next_id),
            });
            merge(&mut row, &body);
            state.menus.push(row.clone());
            row
        };
        decode(row)
    }

    async fn update_menu(
        &self,
        id: &NodeId,
        payload: &MenuPayload,
    ) -> Result<MenuNode, Self::Error> {
        self.record("update_menu")?;
        let body = serde_json::to_value(payload).map_err(|e| FakeApiError(e.to_string()))?;
        let row = {
            let mut state = self.state.lock().unwrap();
            state.payloads.push(body.clone());
            let row = state
                .menus
                .iter_mut()
                .find(|r| r["id"] == id.as_str())
                .ok_or_else(|| FakeApiError(format!("menu {id} not found (404)")))?;
            merge(row, &body);
            row.clone()
        };
        decode(row)
    }

    async fn delete_menu(&self, id: &NodeId) -> Result<(), Self::Error> {
        self.record("delete_menu")?;
        let mut state = self.state.lock().unwrap();
        let before = state.menus.len();
        state.menus.retain(|r| r["id"] != id.as_str());
        if state.menus.len() == before {
            return Err(FakeApiError(format!("menu {id} not found (404)")));
        }
        Ok(())
    }

    async fn get_exam(&self, id: &ExamId) -> Result<ExamAggregate, Self::Error> {
        self.record("get_exam")?;
        decode(self.exam_value(id.as_str())?)
    }

    async fn search_exams(&self, query: &ExamQuery) -> Result<Page<ExamAggregate>, Self::Error> {
        self.record("search_exams")?;
        let search = query.search.clone().unwrap_or_default();
        let delay = self.search_delays.lock().unwrap().get(&search).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        // 一覧は問題リストを含まない
        let items: Vec<Value> = {
            let state = self.state.lock().unwrap();
            state
                .exams
                .iter()
                .filter(|e| {
                    e["title"]
                        .as_str()
                        .unwrap_or_default()
                        .to_lowercase()
                        .contains(&search.to_lowercase())
                })
                .map(|e| {
                    let mut summary = e.clone();
                    if let Some(obj) = summary.as_object_mut() {
                        obj.remove("exams_question");
                    }
                    summary
                })
                .collect()
        };
        decode(page_of(items, query.page, query.take))
    }

    async fn update_exam(
        &self,
        id: &ExamId,
        update: &ExamUpdate,
    ) -> Result<ExamAggregate, Self::Error> {
        self.record("update_exam")?;
        let exam = {
            let mut state = self.state.lock().unwrap();
            let questions: Vec<Value> = update
                .questions
                .iter()
                .filter_map(|q| state.question_bank.get(q.id.as_str()))
                .map(exam_question)
                .collect();
            let exam = state
                .exams
                .iter_mut()
                .find(|e| e["id"] == id.as_str())
                .ok_or_else(|| FakeApiError(format!("exam {id} not found (404)")))?;
            exam["title"] = json!(update.title);
            exam["active"] = json!(update.active);
            if let Some(subject) = &update.subject {
                exam["subject"] = json!(subject);
            }
            exam["total_question"] = json!(questions.len());
            exam["exams_question"] = Value::Array(questions);
            exam.clone()
        };
        decode(exam)
    }

    async fn remove_exam_questions(
        &self,
        id: &ExamId,
        question_ids: &[QuestionId],
    ) -> Result<(), Self::Error> {
        self.record("remove_exam_questions")?;
        let mut state = self.state.lock().unwrap();
        let exam = state
            .exams
            .iter_mut()
            .find(|e| e["id"] == id.as_str())
            .ok_or_else(|| FakeApiError(format!("exam {id} not found (404)")))?;
        if let Some(list) = exam["exams_question"].as_array_mut() {
            list.retain(|q| {
                !question_ids
                    .iter()
                    .any(|id| q["question"]["id"] == id.as_str())
            });
            let remaining = list.len();
            exam["total_question"] = json!(remaining);
        }
        Ok(())
    }
}

/// 部分更新: ボディに含まれるキーだけ上書きする。
fn merge(row: &mut Value, body: &Value) {
    if let (Some(row), Some(body)) = (row.as_object_mut(), body.as_object()) {
        for (k, v) in body {
            row.insert(k.clone(), v.clone());
        }
    }
}

// =============================================================================
// FakeUploader
// =============================================================================

/// `https://cdn.test/<file_name>` を返すアップローダ。
#[derive(Default)]
pub struct FakeUploader {
    uploads: Mutex<Vec<String>>,
    failing: Mutex<bool>,
}

impl FakeUploader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let uploader = Self::default();
        *uploader.failing.lock().unwrap() = true;
        uploader
    }

    pub fn uploads(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl FileUploader for FakeUploader {
    type Error = FakeApiError;

    async fn upload(&self, file: &UploadFile) -> Result<String, Self::Error> {
        if *self.failing.lock().unwrap() {
            return Err(FakeApiError("media upload rejected (413)".to_string()));
        }
        self.uploads.lock().unwrap().push(file.file_name.clone());
        Ok(format!("https://cdn.test/{}", file.file_name))
    }
}

// =============================================================================
// Builders
// =============================================================================

pub fn repo(api: &Arc<FakeContentApi>) -> MenuTreeRepository<FakeContentApi> {
    MenuTreeRepository::new(Arc::clone(api))
}

pub fn session(api: &Arc<FakeContentApi>) -> TreeEditingSession<FakeContentApi> {
    TreeEditingSession::new(repo(api))
}

// =============================================================================
// Assertion helpers
// =============================================================================

/// 結果がErrで、メッセージに指定文字列を含むことをassert。
#[allow(dead_code)]
pub fn assert_error_contains<T: std::fmt::Debug>(
    result: Result<T, impl std::fmt::Display>,
    expected: &str,
) {
    match result {
        Err(e) => {
            let msg = e.to_string();
            assert!(
                msg.contains(expected),
                "Expected error containing '{expected}', got: '{msg}'"
            );
        }
        Ok(v) => panic!("Expected error containing '{expected}', got Ok({v:?})"),
    }
}
