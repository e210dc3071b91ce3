use anyhow::{Context, Result};
use async_trait::async_trait;
use google_cloud_storage::{
    client::{Client, ClientConfig},
    http::objects::{
        download::Range,
        get::GetObjectRequest,
        upload::{Media, UploadObjectRequest, UploadType},
    },
};
use tracing::info;

use crate::ports::ObjectStore;

/// Google Cloud Storage bucket. Authenticates with Application Default Credentials.
pub struct GcsObjectStore {
    client: Client,
    bucket: String,
}

impl GcsObjectStore {
    pub async fn connect(bucket: &str) -> Result<Self> {
        let config = ClientConfig::default()
            .with_auth()
            .await
            .context("authenticating to GCS")?;
        Ok(Self {
            client: Client::new(config),
            bucket: bucket.to_string(),
        })
    }
}

#[async_trait]
impl ObjectStore for GcsObjectStore {
    /// Single-request upload: the object appears whole or not at all.
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        let len = bytes.len();
        let mut media = Media::new(key.to_string());
        media.content_type = content_type.to_string().into();
        media.content_length = Some(len as u64);

        let request = UploadObjectRequest {
            bucket: self.bucket.clone(),
            ..Default::default()
        };

        self.client
            .upload_object(&request, bytes, &UploadType::Simple(media))
            .await
            .with_context(|| format!("Failed to upload {} to GCS bucket {}", key, self.bucket))?;

        info!(object = %self.uri(key), bytes = len, "Uploaded to GCS");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let request = GetObjectRequest {
            bucket: self.bucket.clone(),
            object: key.to_string(),
            ..Default::default()
        };
        self.client
            .download_object(&request, &Range::default())
            .await
            .with_context(|| format!("Failed to download {}", self.uri(key)))
    }

    fn uri(&self, key: &str) -> String {
        format!("gs://{}/{}", self.bucket, key)
    }
}
