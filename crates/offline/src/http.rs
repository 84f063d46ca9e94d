//! JSON/REST implementation of the backing services.
//!
//! Talks to a gateway in front of the document store:
//! `POST /{collection}`, `PATCH /{collection}/{id}`, `DELETE /{collection}/{id}`,
//! `GET /{collection}` and `POST /sendBulkEmails`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::backend::{BackendError, BackingStore, Document, EmailService, Fields};
use crate::types::EmailCampaign;

#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Created {
    id: String,
}

#[derive(Debug, Serialize)]
struct BulkEmailRequest<'a> {
    campaign: &'a EmailCampaign,
    recipients: &'a [String],
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.base_url, path);
        let mut req = self.client.request(method, url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        req
    }

    async fn send(
        &self,
        req: reqwest::RequestBuilder,
        collection: &str,
        id: Option<&str>,
    ) -> Result<reqwest::Response, BackendError> {
        let resp = req
            .send()
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(status_error(status, collection, id, body))
    }
}

/// 404 on a named document is `NotFound`, 5xx means the service is down,
/// anything else is a refusal carrying the response body.
fn status_error(
    status: reqwest::StatusCode,
    collection: &str,
    id: Option<&str>,
    body: String,
) -> BackendError {
    match id {
        Some(id) if status == reqwest::StatusCode::NOT_FOUND => BackendError::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        },
        _ if status.is_server_error() => {
            BackendError::Unavailable(format!("{collection}: HTTP {status}"))
        }
        _ => BackendError::Rejected {
            status: status.as_u16(),
            message: body,
        },
    }
}

#[async_trait]
impl BackingStore for HttpBackend {
    async fn create(&self, collection: &str, fields: Fields) -> Result<String, BackendError> {
        let req = self.request(reqwest::Method::POST, collection).json(&fields);
        let created: Created = self
            .send(req, collection, None)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::Serialization(e.to_string()))?;
        Ok(created.id)
    }

    async fn update(&self, collection: &str, id: &str, patch: Fields) -> Result<(), BackendError> {
        let req = self
            .request(reqwest::Method::PATCH, &format!("{collection}/{id}"))
            .json(&patch);
        self.send(req, collection, Some(id)).await?;
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), BackendError> {
        let req = self.request(reqwest::Method::DELETE, &format!("{collection}/{id}"));
        self.send(req, collection, Some(id)).await?;
        Ok(())
    }

    async fn list(&self, collection: &str) -> Result<Vec<Document>, BackendError> {
        let req = self.request(reqwest::Method::GET, collection);
        self.send(req, collection, None)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::Serialization(e.to_string()))
    }
}

#[async_trait]
impl EmailService for HttpBackend {
    async fn send_bulk(
        &self,
        campaign: &EmailCampaign,
        recipients: &[String],
    ) -> Result<(), BackendError> {
        let req = self
            .request(reqwest::Method::POST, "sendBulkEmails")
            .json(&BulkEmailRequest {
                campaign,
                recipients,
            });
        self.send(req, "sendBulkEmails", None).await?;
        Ok(())
    }
}
