use crate::domain::error::DomainError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// 通信・サーバエラー。自動リトライはしない。
    #[error("content service error: {0}")]
    Api(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("upload failed: {0}")]
    Upload(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("local file error: {0}")]
    File(#[source] std::io::Error),

    #[error("a submission is already in flight")]
    SubmitInFlight,

    #[error("editing session is {0}")]
    SessionState(&'static str),

    #[error("confirmation required to {0}")]
    ConfirmationRequired(&'static str),
}

impl AppError {
    pub(crate) fn api<E: std::error::Error + Send + Sync + 'static>(e: E) -> Self {
        Self::Api(Box::new(e))
    }

    pub(crate) fn upload<E: std::error::Error + Send + Sync + 'static>(e: E) -> Self {
        Self::Upload(Box::new(e))
    }

    /// 利用者の入力・操作で解消できるエラーか（通信エラー以外）
    pub fn is_user_facing(&self) -> bool {
        !matches!(self, Self::Api(_) | Self::Upload(_))
    }
}
