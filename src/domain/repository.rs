use std::path::Path;

use async_trait::async_trait;

use super::model::exam::{ExamAggregate, ExamUpdate};
use super::model::id::{ExamId, NodeId, QuestionId};
use super::model::node::{MenuNode, MenuPayload};
use super::model::query::{ExamQuery, MenuQuery, Page};

/// コンテンツサービスの抽象。Infra層が実装する。
#[async_trait]
pub trait ContentApi: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn list_menu(&self, query: &MenuQuery) -> Result<Page<MenuNode>, Self::Error>;
    async fn get_menu(&self, id: &NodeId) -> Result<MenuNode, Self::Error>;
    async fn create_menu(&self, payload: &MenuPayload) -> Result<MenuNode, Self::Error>;
    async fn update_menu(&self, id: &NodeId, payload: &MenuPayload)
        -> Result<MenuNode, Self::Error>;
    async fn delete_menu(&self, id: &NodeId) -> Result<(), Self::Error>;

    async fn get_exam(&self, id: &ExamId) -> Result<ExamAggregate, Self::Error>;
    async fn search_exams(&self, query: &ExamQuery) -> Result<Page<ExamAggregate>, Self::Error>;
    async fn update_exam(
        &self,
        id: &ExamId,
        update: &ExamUpdate,
    ) -> Result<ExamAggregate, Self::Error>;
    async fn remove_exam_questions(
        &self,
        id: &ExamId,
        question_ids: &[QuestionId],
    ) -> Result<(), Self::Error>;
}

/// アップロード対象のファイル
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }

    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload.bin")
            .to_string();
        Ok(Self { file_name, bytes })
    }

    /// 小文字の拡張子
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
    }
}

/// ファイルを保存してURLを返す外部サービス（POST /media/upload）。
#[async_trait]
pub trait FileUploader: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn upload(&self, file: &UploadFile) -> Result<String, Self::Error>;
}
