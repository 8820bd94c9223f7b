//! REST collaborator: the donation/account backend.

use crate::config::OverlayConfig;
use crate::errors::ApiError;
use crate::session::SessionToken;
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Client, Method, RequestBuilder, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// What the notification channel needs from the backend
#[async_trait]
pub trait NotificationBackend: Send + Sync {
    async fn mark_notification_read(&self, id: u64) -> Result<(), ApiError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: u64,
    pub monto: f64,
    #[serde(default)]
    pub nombre_pagador: Option<String>,
    pub fecha: String,
    #[serde(default)]
    pub transaction_id: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountQr {
    pub id: u64,
    pub telefono: String,
    pub nombre: String,
    #[serde(default)]
    pub qr: Option<String>,
}

impl AccountQr {
    /// Fills in a wallet deep link when the backend has no usable QR payload.
    fn with_qr_fallback(mut self) -> Self {
        let usable = matches!(&self.qr, Some(q) if !q.is_empty() && q != "undefined" && q != "null");
        if !usable {
            if let Ok(mut link) = Url::parse("yape://transaction") {
                link.query_pairs_mut()
                    .append_pair("type", "p2p")
                    .append_pair("phoneNumber", &self.telefono)
                    .append_pair("name", &self.nombre);
                self.qr = Some(link.into());
            }
        }
        self
    }
}

#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base: String,
    token: SessionToken,
}

impl ApiClient {
    pub fn new(config: &OverlayConfig, token: SessionToken) -> Result<Self, ApiError> {
        let http = Client::builder().timeout(config.http_timeout()).build()?;
        Ok(Self {
            http,
            base: config.api_url.trim_end_matches('/').to_owned(),
            token,
        })
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ApiError> {
        let url = Url::parse(&format!("{}{}", self.base, path))
            .map_err(|e| ApiError::Url(e.to_string()))?;
        Ok(self
            .http
            .request(method, url)
            .header(ACCEPT, "application/json")
            .header(AUTHORIZATION, self.token.bearer()))
    }

    async fn send(&self, req: RequestBuilder) -> Result<reqwest::Response, ApiError> {
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }

    /// One page of transactions since `start_date` (midnight).
    pub async fn recent_transactions(
        &self,
        skip: u32,
        limit: u32,
        start_date: NaiveDate,
    ) -> Result<Vec<TransactionRecord>, ApiError> {
        let start = format!("{}T00:00:00", start_date.format("%Y-%m-%d"));
        let req = self
            .request(Method::GET, "/api/v1/transactions/")?
            .query(&[
                ("skip", skip.to_string()),
                ("limit", limit.to_string()),
                ("start_date", start),
            ]);
        let records: Vec<TransactionRecord> = self.send(req).await?.json().await?;
        debug!(count = records.len(), "fetched transactions");
        Ok(records)
    }

    pub async fn account(&self, phone: &str) -> Result<AccountQr, ApiError> {
        let req = self.request(Method::GET, &format!("/api/v1/accounts/{phone}"))?;
        let account: AccountQr = self.send(req).await?.json().await?;
        Ok(account.with_qr_fallback())
    }
}

#[async_trait]
impl NotificationBackend for ApiClient {
    async fn mark_notification_read(&self, id: u64) -> Result<(), ApiError> {
        let req = self.request(Method::PUT, &format!("/api/v1/notifications/{id}/read"))?;
        self.send(req).await?;
        info!(id, "notification marked as read");
        Ok(())
    }
}
