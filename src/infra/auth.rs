use std::sync::RwLock;

/// Bearerトークンの供給元。セッションストアを直接参照せず、生成時に注入する。
pub trait TokenProvider: Send + Sync {
    fn token(&self) -> Option<String>;
}

/// 差し替え可能な固定トークン（ログイン後に `set` する想定）
#[derive(Debug, Default)]
pub struct StaticToken {
    token: RwLock<Option<String>>,
}

impl StaticToken {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: RwLock::new(token.filter(|t| !t.trim().is_empty())),
        }
    }

    pub fn set(&self, token: Option<String>) {
        if let Ok(mut guard) = self.token.write() {
            *guard = token.filter(|t| !t.trim().is_empty());
        }
    }
}

impl TokenProvider for StaticToken {
    fn token(&self) -> Option<String> {
        self.token.read().ok().and_then(|g| g.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_token_is_none() {
        let provider = StaticToken::new(Some("  ".into()));
        assert_eq!(provider.token(), None);

        provider.set(Some("abc".into()));
        assert_eq!(provider.token().as_deref(), Some("abc"));

        provider.set(None);
        assert_eq!(provider.token(), None);
    }
}
