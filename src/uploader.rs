use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use object_store::{aws::AmazonS3Builder, path::Path as ObjPath, ObjectStore};
use serde_json::Value;
use tokio::fs;

use crate::{types::UploadError, utils::public_url};

/// Durable home for artifacts and record collections.
///
/// `merge_append` is a full read-modify-write with no concurrency guard: two
/// writers on the same key can silently drop each other's records. Callers
/// must keep a single writer per collection key.
#[async_trait]
pub trait StorageSink: Send + Sync {
    /// Uploads the file at `local_path` under `key`, overwriting any previous
    /// object, and returns its public url.
    async fn put_artifact(&self, local_path: &Path, key: &str) -> Result<String, UploadError>;

    /// Appends `records` to the json array stored at `collection_key`. A
    /// missing key counts as an empty array. Returns the new length.
    async fn merge_append(
        &self,
        collection_key: &str,
        records: Vec<Value>,
    ) -> Result<usize, UploadError>;
}

/// Cloudflare R2 (or any S3 compatible endpoint) settings.
#[derive(Debug, Clone)]
pub struct R2Config {
    pub endpoint: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
    pub public_url: String,
}

pub struct ObjectStoreSink {
    store: Arc<dyn ObjectStore>,
    public_url: String,
}

impl ObjectStoreSink {
    pub fn new(store: Arc<dyn ObjectStore>, public_url: &str) -> Self {
        ObjectStoreSink {
            store,
            public_url: public_url.into(),
        }
    }

    pub fn from_r2(config: &R2Config) -> Result<Self, UploadError> {
        if config.public_url.is_empty() {
            return Err(UploadError::Config("public url must be set".into()));
        }
        let store = AmazonS3Builder::new()
            .with_endpoint(&config.endpoint)
            .with_bucket_name(&config.bucket)
            .with_access_key_id(&config.access_key_id)
            .with_secret_access_key(&config.secret_access_key)
            .with_region("auto")
            // R2 only takes path style requests
            .with_virtual_hosted_style_request(false)
            .build()?;
        info!("storage sink ready on bucket {}", config.bucket);
        Ok(Self::new(Arc::new(store), &config.public_url))
    }

    pub fn public_url(&self, key: &str) -> String {
        public_url(&self.public_url, key)
    }

    async fn read_collection(&self, path: &ObjPath) -> Result<Vec<Value>, UploadError> {
        let data = match self.store.get(path).await {
            Ok(res) => res.bytes().await?,
            Err(object_store::Error::NotFound { .. }) => {
                debug!("{} does not exist yet, starting empty", path);
                return Ok(vec![]);
            }
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice::<Value>(&data)? {
            Value::Array(records) => Ok(records),
            _ => Err(UploadError::NotACollection(path.to_string())),
        }
    }
}

#[async_trait]
impl StorageSink for ObjectStoreSink {
    async fn put_artifact(&self, local_path: &Path, key: &str) -> Result<String, UploadError> {
        let data = fs::read(local_path)
            .await
            .map_err(|source| UploadError::Read {
                path: local_path.to_path_buf(),
                source,
            })?;
        let size = data.len();
        self.store
            .put(&ObjPath::from(key), Bytes::from(data).into())
            .await?;
        debug!("uploaded {:?} ({} bytes) to {}", local_path, size, key);
        Ok(self.public_url(key))
    }

    async fn merge_append(
        &self,
        collection_key: &str,
        records: Vec<Value>,
    ) -> Result<usize, UploadError> {
        let path = ObjPath::from(collection_key);
        let mut existing = self.read_collection(&path).await?;
        let added = records.len();
        existing.extend(records);
        let body = serde_json::to_vec_pretty(&existing)?;
        self.store.put(&path, Bytes::from(body).into()).await?;
        debug!(
            "appended {} records to {}, now {}",
            added,
            collection_key,
            existing.len()
        );
        Ok(existing.len())
    }
}
