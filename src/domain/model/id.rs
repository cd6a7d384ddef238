use serde::{Deserialize, Serialize};
use std::fmt;

/// サーバ採番の文字列ID。作成後は不変。
macro_rules! server_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }

            /// 短縮ID（先頭8文字）
            pub fn short(&self) -> String {
                self.0.chars().take(8).collect()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self::new(raw)
            }
        }

        impl From<String> for $name {
            fn from(raw: String) -> Self {
                Self(raw)
            }
        }
    };
}

server_id!(
    /// 教材（Book）のID
    BookId
);

server_id!(
    /// 目次ノード（menu-book行）のID
    NodeId
);

server_id!(
    /// 試験セット（Exam集約）のID
    ExamId
);

server_id!(QuestionId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_truncates_on_char_boundary() {
        let id = NodeId::new("chương-1-abcdef");
        assert_eq!(id.short(), "chương-1");
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = ExamId::new("E1");
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""E1""#);
        let back: ExamId = serde_json::from_str(r#""E1""#).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn blank_detection() {
        assert!(BookId::new("  ").is_blank());
        assert!(!BookId::new("b-1").is_blank());
    }
}
