use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One url to check and capture. `name` is free-form and only becomes a key
/// once sanitized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub url: String,
    pub name: String,
}

impl WorkItem {
    pub fn new(url: &str, name: &str) -> Self {
        WorkItem {
            url: url.into(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMetadata {
    pub h1: String,
    pub h2: String,
    pub affiliate: bool,
}

/// Emitted exactly once per work item, whichever step failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureResult {
    pub url: String,
    pub name: String,
    pub h1: String,
    pub h2: String,
    pub affiliate: bool,
    pub screenshot_url: Option<String>,
    pub active: bool,
}

impl CaptureResult {
    /// Result with every enrichment field at its default.
    pub fn inactive(item: &WorkItem) -> Self {
        CaptureResult {
            url: item.url.clone(),
            name: item.name.clone(),
            h1: String::new(),
            h2: String::new(),
            affiliate: false,
            screenshot_url: None,
            active: false,
        }
    }

    pub fn set_metadata(&mut self, metadata: PageMetadata) {
        self.h1 = metadata.h1;
        self.h2 = metadata.h2;
        self.affiliate = metadata.affiliate;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub url: String,
    pub name: String,
    pub error: String,
}

impl ErrorRecord {
    pub fn new(item: &WorkItem, error: impl ToString) -> Self {
        ErrorRecord {
            url: item.url.clone(),
            name: item.name.clone(),
            error: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub last_processed_name: String,
    pub processed_count: usize,
}

/// What the invoking environment gets back, success or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub status_code: u16,
    pub body: String,
}

/// Input event as supplied by the invoking environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CaptureEvent {
    Wrapped { urls: Vec<WorkItem> },
    Bare(Vec<WorkItem>),
}

impl CaptureEvent {
    pub fn into_items(self) -> Vec<WorkItem> {
        match self {
            CaptureEvent::Wrapped { urls } => urls,
            CaptureEvent::Bare(urls) => urls,
        }
    }
}

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("fetch: {0}")]
    Fetch(#[from] reqwest::Error),
    #[error("selector: {0}")]
    Selector(String),
}

impl ExtractError {
    /// Degraded failures fall back to empty metadata; the rest are item errors.
    pub fn is_degraded(&self) -> bool {
        matches!(self, ExtractError::Fetch(_))
    }
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("browser launch: {0}")]
    Launch(String),
    #[error("render: {0}")]
    Render(String),
    #[error("screenshot timeout after {0:?}")]
    Timeout(Duration),
    #[error("capture budget: ceiling {ceiling:?} must exceed navigation + settle {budget:?}")]
    Budget { ceiling: Duration, budget: Duration },
    #[error("could not write screenshot to {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("render task: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("could not read {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("object store: {0}")]
    Store(#[from] object_store::Error),
    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("{0} does not hold a json array")]
    NotACollection(String),
    #[error("storage config: {0}")]
    Config(String),
}

/// Failure after liveness passed; becomes an ErrorRecord.
#[derive(Error, Debug)]
pub enum ItemError {
    #[error("metadata extraction: {0}")]
    Extract(ExtractError),
    #[error("screenshot upload: {0}")]
    Upload(#[from] UploadError),
    #[error("artifact key: {0}")]
    ArtifactKey(String),
}

#[derive(Error, Debug)]
pub enum RunError {
    #[error("setup: could not prepare {path:?}: {source}")]
    Setup {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("flush of {key} failed: {source}")]
    Flush { key: String, source: UploadError },
    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),
}
