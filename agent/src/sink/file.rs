//! Local newline-delimited JSON persistence

use async_trait::async_trait;

use crate::collector::record::DerivedRecord;
use crate::errors::CollectorError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::sink::RecordSink;

/// Appends one JSON line per record to `<run_dir>/<hostname>.json`
pub struct FileSink {
    file: File,
}

impl FileSink {
    pub fn new(run_dir: &Dir, hostname: &str) -> Self {
        Self {
            file: run_dir.file(&format!("{}.json", hostname)),
        }
    }

    pub fn file(&self) -> &File {
        &self.file
    }
}

#[async_trait]
impl RecordSink for FileSink {
    async fn append(&self, record: &DerivedRecord) -> Result<(), CollectorError> {
        let line = serde_json::to_string(record)?;
        self.file.append_line(&line).await
    }
}
