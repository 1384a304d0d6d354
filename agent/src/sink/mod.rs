//! Durable destinations for derived records

use async_trait::async_trait;

use crate::collector::record::DerivedRecord;
use crate::errors::CollectorError;

pub mod elastic;
pub mod file;

/// Append-only destination for derived records
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn append(&self, record: &DerivedRecord) -> Result<(), CollectorError>;
}
