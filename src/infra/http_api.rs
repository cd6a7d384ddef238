//! コンテンツサービスのRESTクライアント。
//!
//! エンドポイント: `/menu-book`, `/exams`, `/media/upload`。応答は `{ "data": ... }` で包まれ、
//! 一覧は `{ "data": { "data": [...], "pagination": {...} } }` になる。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::domain::model::exam::{ExamAggregate, ExamUpdate};
use crate::domain::model::id::{ExamId, NodeId, QuestionId};
use crate::domain::model::node::{MenuNode, MenuPayload};
use crate::domain::model::query::{ExamQuery, MenuQuery, Page};
use crate::domain::repository::{ContentApi, FileUploader, UploadFile};

use super::auth::TokenProvider;

#[derive(Debug, thiserror::Error)]
pub enum HttpApiError {
    /// 通信自体の失敗（ネットワーク、DNS、TLS、タイムアウト、本文のデコード）
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// 2xx 以外のステータス
    #[error("content service error ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("no bearer token available; sign in first")]
    MissingToken,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct UploadedMedia {
    url: String,
}

/// コンテンツサービスへのHTTPクライアント
pub struct HttpContentApi {
    client: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl HttpContentApi {
    pub fn new(
        base_url: impl Into<String>,
        tokens: Arc<dyn TokenProvider>,
        timeout: Duration,
    ) -> Result<Self, HttpApiError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url, tokens))
    }

    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            tokens,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(
        &self,
        method: reqwest::Method,
        path: &str,
    ) -> Result<reqwest::RequestBuilder, HttpApiError> {
        let token = self.tokens.token().ok_or(HttpApiError::MissingToken)?;
        Ok(self
            .client
            .request(method, self.url(path))
            .bearer_auth(token))
    }

    // ---- private ----

    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, HttpApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(HttpApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_data<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, HttpApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<Envelope<T>>().await?.data)
    }

    async fn check_status(response: reqwest::Response) -> Result<(), HttpApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}

#[async_trait]
impl ContentApi for HttpContentApi {
    type Error = HttpApiError;

    async fn list_menu(&self, query: &MenuQuery) -> Result<Page<MenuNode>, Self::Error> {
        let response = self
            .request(reqwest::Method::GET, "menu-book")?
            .query(query)
            .send()
            .await?;
        Self::parse_data(response).await
    }

    async fn get_menu(&self, id: &NodeId) -> Result<MenuNode, Self::Error> {
        let response = self
            .request(reqwest::Method::GET, &format!("menu-book/{id}"))?
            .send()
            .await?;
        Self::parse_data(response).await
    }

    async fn create_menu(&self, payload: &MenuPayload) -> Result<MenuNode, Self::Error> {
        let response = self
            .request(reqwest::Method::POST, "menu-book")?
            .json(payload)
            .send()
            .await?;
        Self::parse_data(response).await
    }

    async fn update_menu(
        &self,
        id: &NodeId,
        payload: &MenuPayload,
    ) -> Result<MenuNode, Self::Error> {
        let response = self
            .request(reqwest::Method::PUT, &format!("menu-book/{id}"))?
            .json(payload)
            .send()
            .await?;
        Self::parse_data(response).await
    }

    async fn delete_menu(&self, id: &NodeId) -> Result<(), Self::Error> {
        let response = self
            .request(reqwest::Method::DELETE, &format!("menu-book/{id}"))?
            .send()
            .await?;
        Self::check_status(response).await
    }

    async fn get_exam(&self, id: &ExamId) -> Result<ExamAggregate, Self::Error> {
        let response = self
            .request(reqwest::Method::GET, &format!("exams/{id}"))?
            .send()
            .await?;
        Self::parse_data(response).await
    }

    async fn search_exams(&self, query: &ExamQuery) -> Result<Page<ExamAggregate>, Self::Error> {
        let response = self
            .request(reqwest::Method::GET, "exams")?
            .query(query)
            .send()
            .await?;
        Self::parse_data(response).await
    }

    async fn update_exam(
        &self,
        id: &ExamId,
        update: &ExamUpdate,
    ) -> Result<ExamAggregate, Self::Error> {
        let response = self
            .request(reqwest::Method::PUT, &format!("exams/{id}"))?
            .json(update)
            .send()
            .await?;
        Self::parse_data(response).await
    }

    async fn remove_exam_questions(
        &self,
        id: &ExamId,
        question_ids: &[QuestionId],
    ) -> Result<(), Self::Error> {
        let body = serde_json::json!({ "ids": question_ids });
        let response = self
            .request(reqwest::Method::DELETE, &format!("exams/{id}/question-ids"))?
            .json(&body)
            .send()
            .await?;
        Self::check_status(response).await
    }
}

#[async_trait]
impl FileUploader for HttpContentApi {
    type Error = HttpApiError;

    async fn upload(&self, file: &UploadFile) -> Result<String, Self::Error> {
        let part = reqwest::multipart::Part::bytes(file.bytes.clone())
            .file_name(file.file_name.clone());
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .request(reqwest::Method::POST, "media/upload")?
            .multipart(form)
            .send()
            .await?;
        let media: UploadedMedia = Self::parse_data(response).await?;
        Ok(media.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::auth::StaticToken;

    fn api(base: &str, token: Option<&str>) -> HttpContentApi {
        HttpContentApi::with_client(
            reqwest::Client::new(),
            base,
            Arc::new(StaticToken::new(token.map(String::from))),
        )
    }

    #[test]
    fn url_joins_without_double_slash() {
        let api = api("https://api.test/v1/", Some("t"));
        assert_eq!(api.url("/menu-book"), "https://api.test/v1/menu-book");
        assert_eq!(api.url("exams/E1"), "https://api.test/v1/exams/E1");
    }

    #[test]
    fn request_without_token_fails_locally() {
        let api = api("https://api.test", None);
        assert!(matches!(
            api.request(reqwest::Method::GET, "menu-book"),
            Err(HttpApiError::MissingToken)
        ));
    }

    #[test]
    fn list_envelope_unwraps_nested_data() {
        let body = serde_json::json!({
            "data": {
                "data": [{ "id": "c1", "type": "CHUONG", "book_id": "b1", "title": "Chương 1" }],
                "pagination": { "page": 1, "take": 100, "total": 1 }
            }
        });
        let env: Envelope<Page<MenuNode>> = serde_json::from_value(body).unwrap();
        assert_eq!(env.data.items.len(), 1);
        assert_eq!(env.data.items[0].title(), "Chương 1");
    }

    #[test]
    fn upload_envelope() {
        let env: Envelope<UploadedMedia> =
            serde_json::from_value(serde_json::json!({ "data": { "url": "https://cdn.test/a.mp4" } }))
                .unwrap();
        assert_eq!(env.data.url, "https://cdn.test/a.mp4");
    }
}
