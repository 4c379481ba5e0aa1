use anyhow::Result;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use shared::domain::SessionId;
use shared::protocol::{
    AckResponse, ColumnMapping, ConvertResponse, DetectColumnsResponse, VerifyPaymentResponse,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("payment is required before downloads are available")]
    PaymentRequired,
    #[error("file not found")]
    NotFound,
    #[error("download failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Typed client for the conversion backend. Business failures travel inside
/// the response envelopes; `Err` means the transport itself failed.
#[async_trait]
pub trait ConverterApi: Send + Sync {
    async fn detect_columns(&self, filename: &str, bytes: Vec<u8>)
        -> Result<DetectColumnsResponse>;
    async fn convert(
        &self,
        filename: &str,
        bytes: Vec<u8>,
        mapping: &ColumnMapping,
    ) -> Result<ConvertResponse>;
    async fn verify_payment(&self, session: Option<SessionId>) -> Result<VerifyPaymentResponse>;
    async fn mark_payment_complete(&self, session: SessionId) -> Result<AckResponse>;
    async fn reset_session(&self, session: Option<SessionId>) -> Result<AckResponse>;
    async fn download(&self, session: SessionId, artifact: &str)
        -> Result<Vec<u8>, DownloadError>;
    async fn download_zip(&self, session: SessionId) -> Result<Vec<u8>, DownloadError>;
}

pub struct HttpConverterApi {
    http: Client,
    server_url: String,
}

impl HttpConverterApi {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            server_url: server_url.into(),
        }
    }

    fn csv_form(filename: &str, bytes: Vec<u8>) -> Result<Form> {
        let part = Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str("text/csv")?;
        Ok(Form::new().part("file", part))
    }

    async fn fetch_bytes(&self, url: String) -> Result<Vec<u8>, DownloadError> {
        let response = self.http.get(url).send().await?;
        match response.status() {
            reqwest::StatusCode::PAYMENT_REQUIRED => Err(DownloadError::PaymentRequired),
            reqwest::StatusCode::NOT_FOUND => Err(DownloadError::NotFound),
            _ => Ok(response.error_for_status()?.bytes().await?.to_vec()),
        }
    }
}

#[async_trait]
impl ConverterApi for HttpConverterApi {
    async fn detect_columns(
        &self,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<DetectColumnsResponse> {
        let form = Self::csv_form(filename, bytes)?;
        let response = self
            .http
            .post(format!("{}/detect_columns", self.server_url))
            .multipart(form)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response)
    }

    async fn convert(
        &self,
        filename: &str,
        bytes: Vec<u8>,
        mapping: &ColumnMapping,
    ) -> Result<ConvertResponse> {
        let form = Self::csv_form(filename, bytes)?
            .text("column_mapping", serde_json::to_string(mapping)?);
        let response = self
            .http
            .post(format!("{}/upload", self.server_url))
            .multipart(form)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response)
    }

    async fn verify_payment(&self, session: Option<SessionId>) -> Result<VerifyPaymentResponse> {
        let mut request = self
            .http
            .get(format!("{}/verify_payment", self.server_url));
        if let Some(session) = session {
            request = request.query(&[("session", session.to_string())]);
        }
        Ok(request
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    async fn mark_payment_complete(&self, session: SessionId) -> Result<AckResponse> {
        Ok(self
            .http
            .get(format!("{}/mark_payment_complete", self.server_url))
            .query(&[
                ("payment_success", "true".to_string()),
                ("session", session.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    async fn reset_session(&self, session: Option<SessionId>) -> Result<AckResponse> {
        let mut request = self.http.get(format!("{}/reset_session", self.server_url));
        if let Some(session) = session {
            request = request.query(&[("session", session.to_string())]);
        }
        Ok(request
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    async fn download(
        &self,
        session: SessionId,
        artifact: &str,
    ) -> Result<Vec<u8>, DownloadError> {
        self.fetch_bytes(format!(
            "{}/download/{artifact}?session={session}",
            self.server_url
        ))
        .await
    }

    async fn download_zip(&self, session: SessionId) -> Result<Vec<u8>, DownloadError> {
        self.fetch_bytes(format!(
            "{}/download_zip?session={session}",
            self.server_url
        ))
        .await
    }
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
