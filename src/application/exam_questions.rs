use std::collections::HashSet;
use std::sync::Arc;

use crate::domain::error::DomainError;
use crate::domain::lock::{ActiveLockGuard, LockedAction};
use crate::domain::model::exam::{ExamAggregate, ExamUpdate, Question};
use crate::domain::model::id::{ExamId, QuestionId};
use crate::domain::repository::ContentApi;

use super::error::AppError;

/// Examの問題リストの操作。構造変更はロック判定を通してから通信する。
pub struct ExamQuestionService<A: ContentApi> {
    api: Arc<A>,
}

impl<A: ContentApi> ExamQuestionService<A> {
    pub fn new(api: Arc<A>) -> Self {
        Self { api }
    }

    /// Exam詳細（問題リスト込み）
    pub async fn load(&self, id: &ExamId) -> Result<ExamAggregate, AppError> {
        self.api.get_exam(id).await.map_err(|e| {
            tracing::warn!(exam_id = %id, error = %e, "exam detail failed");
            AppError::api(e)
        })
    }

    /// 問題を外す。公開中なら通信せずに拒否する。
    pub async fn remove_questions(
        &self,
        exam: &ExamAggregate,
        ids: &[QuestionId],
    ) -> Result<ExamAggregate, AppError> {
        ActiveLockGuard::ensure_unlocked(exam, LockedAction::RemoveQuestion)?;
        if ids.is_empty() {
            return Err(DomainError::validation("ids", "no questions selected").into());
        }
        if let Some(missing) = ids.iter().find(|id| exam.find_question(id).is_none()) {
            return Err(DomainError::validation(
                "ids",
                format!("question {missing} is not in exam {}", exam.id),
            )
            .into());
        }

        self.api
            .remove_exam_questions(&exam.id, ids)
            .await
            .map_err(|e| {
                tracing::warn!(exam_id = %exam.id, error = %e, "question removal failed");
                AppError::api(e)
            })?;
        tracing::info!(exam_id = %exam.id, removed = ids.len(), "questions removed");
        self.load(&exam.id).await
    }

    /// 問題を追加する。既存リストとの和集合を全量で送る。
    pub async fn add_questions(
        &self,
        exam: &ExamAggregate,
        ids: &[QuestionId],
    ) -> Result<ExamAggregate, AppError> {
        let detail = self.ensure_detail(exam).await?;
        let exam = &detail;
        let existing: HashSet<QuestionId> = exam.question_ids().into_iter().collect();
        let mut seen: HashSet<QuestionId> = HashSet::new();
        let merged: Vec<QuestionId> = exam
            .question_ids()
            .into_iter()
            .chain(ids.iter().cloned())
            .filter(|id| seen.insert(id.clone()))
            .collect();
        let added = merged.len().saturating_sub(existing.len());
        if added == 0 {
            return Ok(exam.clone());
        }

        let update = ExamUpdate::with_questions(exam, merged);
        let updated = self.send_update(&exam.id, &update).await?;
        tracing::info!(exam_id = %exam.id, added, "questions added");
        Ok(updated)
    }

    /// 問題を編集用に開く。公開中は開かせない。
    pub fn open_question<'a>(
        &self,
        exam: &'a ExamAggregate,
        id: &QuestionId,
    ) -> Result<&'a Question, AppError> {
        ActiveLockGuard::ensure_unlocked(exam, LockedAction::EditQuestion)?;
        exam.find_question(id).ok_or_else(|| {
            DomainError::validation("question_id", format!("question {id} is not in exam"))
                .into()
        })
    }

    /// タイトル・公開状態の変更。公開停止のため公開中でも受け付ける。
    pub async fn update_metadata(
        &self,
        exam: &ExamAggregate,
        title: Option<String>,
        active: Option<bool>,
    ) -> Result<ExamAggregate, AppError> {
        let detail = self.ensure_detail(exam).await?;
        let mut update = ExamUpdate::with_questions(&detail, detail.question_ids());
        if let Some(title) = title {
            if title.trim().is_empty() {
                return Err(DomainError::validation("title", "title must not be empty").into());
            }
            update.title = title;
        }
        if let Some(active) = active {
            update.active = active;
        }
        self.send_update(&exam.id, &update).await
    }

    /// 検索結果（問題リスト無し）を渡された場合は詳細を取り直す。
    /// 問題リストは全量送信なので、欠けたまま送ると問題が消える。
    async fn ensure_detail(&self, exam: &ExamAggregate) -> Result<ExamAggregate, AppError> {
        if !exam.has_detail() {
            return self.load(&exam.id).await;
        }
        Ok(exam.clone())
    }

    async fn send_update(
        &self,
        id: &ExamId,
        update: &ExamUpdate,
    ) -> Result<ExamAggregate, AppError> {
        self.api.update_exam(id, update).await.map_err(|e| {
            tracing::warn!(exam_id = %id, error = %e, "exam update failed");
            AppError::api(e)
        })
    }
}
