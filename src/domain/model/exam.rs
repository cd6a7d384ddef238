use serde::{Deserialize, Deserializer, Serialize};

use super::id::{ExamId, QuestionId};

/// 取り込み文書の非同期変換状態（none → processing → done | error）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    #[default]
    None,
    Processing,
    Done,
    Error,
}

impl<'de> Deserialize<'de> for UploadStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        Ok(match raw.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("processing") | Some("pending") => Self::Processing,
            Some("done") | Some("success") => Self::Done,
            Some("error") | Some("failed") => Self::Error,
            _ => Self::None,
        })
    }
}

/// 問題本体。選択肢・解答の形は本コアでは解釈しない。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    #[serde(default, alias = "title")]
    pub content: String,
    #[serde(default)]
    pub options: serde_json::Value,
    #[serde(default)]
    pub answers: serde_json::Value,
    #[serde(default)]
    pub solution: Option<String>,
    #[serde(default)]
    pub video: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamQuestion {
    #[serde(default)]
    pub id: Option<String>,
    pub question: Question,
}

impl ExamQuestion {
    pub fn question_id(&self) -> &QuestionId {
        &self.question.id
    }
}

/// 試験セット集約。目次ノードからは参照されるだけで所有されない。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamAggregate {
    pub id: ExamId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub code_id: Option<String>,
    /// 公開中。true の間は問題構成の変更を受け付けない。
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub total_question: u32,
    #[serde(default)]
    pub status_upload: UploadStatus,
    #[serde(default)]
    pub file_upload: Option<String>,
    /// 詳細取得時だけ存在する。検索結果では None。
    #[serde(
        default,
        rename = "exams_question",
        skip_serializing_if = "Option::is_none"
    )]
    pub questions: Option<Vec<ExamQuestion>>,
}

impl ExamAggregate {
    /// 問題リストを含む詳細か。問題リストは全量送信なので、詳細以外から更新してはいけない。
    pub fn has_detail(&self) -> bool {
        self.questions.is_some()
    }

    pub fn questions(&self) -> &[ExamQuestion] {
        self.questions.as_deref().unwrap_or_default()
    }

    pub fn question_ids(&self) -> Vec<QuestionId> {
        self.questions()
            .iter()
            .map(|q| q.question_id().clone())
            .collect()
    }

    pub fn find_question(&self, id: &QuestionId) -> Option<&Question> {
        self.questions()
            .iter()
            .map(|q| &q.question)
            .find(|q| &q.id == id)
    }

    /// 一覧の件数。詳細取得前は `total_question` を使う。
    pub fn question_count(&self) -> usize {
        match &self.questions {
            Some(questions) => questions.len(),
            None => self.total_question as usize,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionRef {
    pub id: QuestionId,
}

/// PUT /exams/{id}。問題リストは差分ではなく全量を送る。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExamUpdate {
    pub title: String,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub questions: Vec<QuestionRef>,
}

impl ExamUpdate {
    /// 現在の内容を保ったまま問題リストだけ差し替える。
    pub fn with_questions(exam: &ExamAggregate, ids: impl IntoIterator<Item = QuestionId>) -> Self {
        Self {
            title: exam.title.clone(),
            active: exam.active,
            subject: exam.subject.clone(),
            questions: ids.into_iter().map(|id| QuestionRef { id }).collect(),
        }
    }
}
