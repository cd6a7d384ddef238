//! ノードの動画添付（アップロード済みファイル or 埋め込みコード）の状態機械。
//!
//! サーバ側は単一の文字列フィールド `video` しか持たないため、
//! 文字列からの状態復元は [`classify`] に閉じ込めたヒューリスティックで行う。

use std::fmt;

use crate::domain::error::DomainError;

/// 埋め込みコードとして認識するタグ
const EMBED_MARKERS: &[&str] = &["<iframe", "<embed", "<video", "<object"];

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AttachmentState {
    #[default]
    Empty,
    /// アップロードを選択し、ファイル待ち
    AwaitingFile,
    UploadedFile {
        url: String,
    },
    /// 入力途中の不正なコードもそのまま保持する
    Embedded {
        code: String,
    },
}

/// 状態の種別（エラー表示用）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Empty,
    AwaitingFile,
    UploadedFile,
    Embedded,
}

impl fmt::Display for AttachmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Empty => "empty",
            Self::AwaitingFile => "awaiting file",
            Self::UploadedFile => "uploaded file",
            Self::Embedded => "embedded code",
        };
        f.write_str(s)
    }
}

impl AttachmentState {
    pub fn kind(&self) -> AttachmentKind {
        match self {
            Self::Empty => AttachmentKind::Empty,
            Self::AwaitingFile => AttachmentKind::AwaitingFile,
            Self::UploadedFile { .. } => AttachmentKind::UploadedFile,
            Self::Embedded { .. } => AttachmentKind::Embedded,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Empty → AwaitingFile。既に AwaitingFile なら何もしない。
    pub fn select_upload(&mut self) -> Result<(), DomainError> {
        match self {
            Self::Empty => {
                *self = Self::AwaitingFile;
                Ok(())
            }
            Self::AwaitingFile => Ok(()),
            other => Err(DomainError::AttachmentOccupied(other.kind())),
        }
    }

    /// AwaitingFile → UploadedFile
    pub fn complete_upload(&mut self, url: impl Into<String>) -> Result<(), DomainError> {
        match self {
            Self::AwaitingFile => {
                *self = Self::UploadedFile { url: url.into() };
                Ok(())
            }
            other => Err(DomainError::AttachmentNotAwaiting(other.kind())),
        }
    }

    /// アップロード失敗時は Empty に戻す。
    pub fn fail_upload(&mut self) {
        if matches!(self, Self::AwaitingFile) {
            *self = Self::Empty;
        }
    }

    /// Empty → Embedded。Embedded 中の再入力はコードを置き換える。
    pub fn select_embed(&mut self, code: impl Into<String>) -> Result<(), DomainError> {
        match self {
            Self::Empty | Self::Embedded { .. } => {
                *self = Self::Embedded { code: code.into() };
                Ok(())
            }
            other => Err(DomainError::AttachmentOccupied(other.kind())),
        }
    }

    /// どの状態からでも Empty に戻す。確認はセッション側の責務。
    pub fn remove(&mut self) -> AttachmentState {
        std::mem::take(self)
    }

    /// 送信可能な値を持っているか。不正な埋め込みコードやファイル待ちは false。
    pub fn is_submittable(&self) -> bool {
        match self {
            Self::Empty | Self::UploadedFile { .. } => true,
            Self::AwaitingFile => false,
            Self::Embedded { code } => is_embed_code(code),
        }
    }

    /// `video` フィールドの値。Empty は空文字（null にはしない）。
    pub fn serialize(&self) -> String {
        match self {
            Self::UploadedFile { url } => url.clone(),
            Self::Embedded { code } if is_embed_code(code) => code.clone(),
            _ => String::new(),
        }
    }
}

/// 埋め込みマーカーを含むか（大文字小文字は区別しない）
pub fn is_embed_code(code: &str) -> bool {
    let lower = code.to_ascii_lowercase();
    EMBED_MARKERS.iter().any(|m| lower.contains(m))
}

fn looks_like_file_url(raw: &str) -> bool {
    let lower = raw.to_ascii_lowercase();
    (lower.starts_with("http://") || lower.starts_with("https://"))
        && !raw.chars().any(|c| c.is_whitespace() || c == '<' || c == '>')
}

/// 保存済み文字列から状態を推定する。判別不能なら Empty。
pub fn classify(raw: &str) -> AttachmentState {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return AttachmentState::Empty;
    }
    if is_embed_code(trimmed) {
        return AttachmentState::Embedded {
            code: raw.to_string(),
        };
    }
    if looks_like_file_url(trimmed) {
        return AttachmentState::UploadedFile {
            url: trimmed.to_string(),
        };
    }
    AttachmentState::Empty
}
