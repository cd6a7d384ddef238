use super::lock::LockedAction;
use super::model::attachment::AttachmentKind;
use super::model::id::{ExamId, NodeId};
use super::model::node::NodeKind;

#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("{field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("node {0} cannot be its own parent")]
    SelfParent(NodeId),

    #[error("node {parent} is a {kind} and cannot contain children")]
    InvalidParent { parent: NodeId, kind: NodeKind },

    #[error("cannot move node {0} under its own descendant")]
    CyclicParent(NodeId),

    #[error("node {0} still has children; delete or move them first")]
    HasChildren(NodeId),

    #[error("node type cannot change after creation")]
    KindImmutable,

    #[error("node is a {0}, not an exam set")]
    NotExamSet(NodeKind),

    #[error("exam {exam_id} is active: cannot {action}")]
    ExamLocked {
        exam_id: ExamId,
        action: LockedAction,
    },

    #[error("attachment already holds {0}; remove it first")]
    AttachmentOccupied(AttachmentKind),

    #[error("attachment is {0}, not awaiting a file")]
    AttachmentNotAwaiting(AttachmentKind),

    #[error("exam is already linked via {0}; remove it first")]
    ExamLinkConflict(&'static str),
}

impl DomainError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }
}
