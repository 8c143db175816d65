//! FileSink - appends encoded records to a log file

use std::path::PathBuf;

use contracts::{ContractError, EventSink, SinkConfig};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

/// Sink that appends every record to one file
///
/// Missing parent directories are created on connect. Each record is
/// flushed before the write is reported as done.
pub struct FileSink {
    name: String,
    path: PathBuf,
    file: Option<File>,
}

impl FileSink {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            file: None,
        }
    }

    pub fn from_config(config: &SinkConfig) -> Self {
        Self::new(&config.id, config.path.clone().unwrap_or_default())
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    async fn open(&self) -> std::io::Result<File> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
    }
}

impl EventSink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(name = "file_sink_connect", skip(self), fields(sink = %self.name, path = %self.path.display()))]
    async fn connect(&mut self) -> Result<(), ContractError> {
        let file = self.open().await.map_err(|e| {
            ContractError::sink_connection(&self.name, format!("open {}: {e}", self.path.display()))
        })?;
        self.file = Some(file);
        debug!(sink = %self.name, "FileSink opened");
        Ok(())
    }

    async fn write(&mut self, payload: &[u8]) -> Result<(), ContractError> {
        let name = &self.name;
        let Some(file) = self.file.as_mut() else {
            return Err(ContractError::sink_write(name, "not open"));
        };
        file.write_all(payload)
            .await
            .map_err(|e| ContractError::sink_write(name, e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| ContractError::sink_write(name, e.to_string()))
    }

    #[instrument(name = "file_sink_close", skip(self), fields(sink = %self.name))]
    async fn close(&mut self) -> Result<(), ContractError> {
        if let Some(mut file) = self.file.take() {
            file.flush()
                .await
                .map_err(|e| ContractError::sink_write(&self.name, e.to_string()))?;
        }
        debug!(sink = %self.name, "FileSink closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::Encoding;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_appends_across_sessions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs").join("js8call.adi");
        let config = SinkConfig::file("adif", path.to_string_lossy(), Encoding::Adif);

        let mut sink = FileSink::from_config(&config);
        assert!(sink.write(b"early").await.is_err());

        sink.connect().await.unwrap();
        sink.write(b"<call:6>KK7JND <eor>\n").await.unwrap();
        sink.close().await.unwrap();
        assert!(!sink.is_open());

        sink.connect().await.unwrap();
        sink.write(b"<call:4>W1AW <eor>\n").await.unwrap();
        sink.close().await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "<call:6>KK7JND <eor>\n<call:4>W1AW <eor>\n");
    }

    #[tokio::test]
    async fn test_unwritable_path_fails_connect() {
        let dir = TempDir::new().unwrap();
        // A directory cannot be opened for appending
        let mut sink = FileSink::new("adif", dir.path());
        let err = sink.connect().await.unwrap_err();
        assert!(matches!(err, ContractError::SinkConnection { .. }));
    }
}
