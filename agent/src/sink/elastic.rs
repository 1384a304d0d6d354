//! Remote metrics-store upload

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::collector::record::DerivedRecord;
use crate::errors::CollectorError;
use crate::sink::RecordSink;
use crate::storage::settings::StoreSettings;

/// Indexes derived records into an Elasticsearch-compatible store.
///
/// Upload is best-effort: callers log a failed append and move on, the local
/// file sink remains the durable copy.
pub struct ElasticStore {
    client: Client,
    base_url: String,
    index: String,
    username: String,
    password: SecretString,
}

impl ElasticStore {
    pub fn new(settings: &StoreSettings) -> Result<Self, CollectorError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            index: settings.index.clone(),
            username: settings.username.clone(),
            password: settings.password.clone(),
        })
    }
}

#[async_trait]
impl RecordSink for ElasticStore {
    async fn append(&self, record: &DerivedRecord) -> Result<(), CollectorError> {
        let url = format!("{}/{}/_doc", self.base_url, self.index);
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.username, Some(self.password.expose_secret()))
            .json(record)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CollectorError::StorageError(format!(
                "indexing failed: {}: {}",
                status, body
            )));
        }

        Ok(())
    }
}
