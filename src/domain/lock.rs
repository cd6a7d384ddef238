use std::fmt;

use super::error::DomainError;
use super::model::exam::ExamAggregate;

/// 公開中のExamに対して拒否される操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockedAction {
    RemoveQuestion,
    EditQuestion,
    ReplaceLink,
}

impl fmt::Display for LockedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RemoveQuestion => "remove questions",
            Self::EditQuestion => "edit questions",
            Self::ReplaceLink => "replace or remove the exam link",
        };
        f.write_str(s)
    }
}

/// 公開中（active）のExamへの構造変更を、通信前に拒否する。
pub struct ActiveLockGuard;

impl ActiveLockGuard {
    pub fn is_locked(exam: &ExamAggregate) -> bool {
        exam.active
    }

    pub fn ensure_unlocked(exam: &ExamAggregate, action: LockedAction) -> Result<(), DomainError> {
        if Self::is_locked(exam) {
            tracing::warn!(exam_id = %exam.id, %action, "rejected: exam is active");
            return Err(DomainError::ExamLocked {
                exam_id: exam.id.clone(),
                action,
            });
        }
        Ok(())
    }
}
