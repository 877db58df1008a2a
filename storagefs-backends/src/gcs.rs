//! Google Cloud Storage client.
//!
//! Talks to the GCS JSON API with an OAuth bearer token. Object names are
//! placed under an optional location prefix, like the S3 client.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::DateTime;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::debug;

use storagefs_common::backend::{
    prefixed_key, BackendKind, Listing, ModifiedTime, StorageClient, StorageError, StorageResult,
};

const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Clone)]
pub struct GcsConfig {
    pub bucket: String,
    pub location: String,
    /// API base URL; defaults to the public endpoint (override for emulators).
    pub endpoint: Option<String>,
    pub token: String,
}

pub struct GcsStorage {
    config: GcsConfig,
    client: Client,
}

/// Object resource, trimmed to the fields the adapter needs.
#[derive(Debug, Deserialize)]
struct ObjectMeta {
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    updated: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectList {
    #[serde(default)]
    prefixes: Vec<String>,
    #[serde(default)]
    items: Vec<ObjectName>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectName {
    name: String,
}

impl GcsStorage {
    pub fn new(config: GcsConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { config, client })
    }

    fn endpoint(&self) -> &str {
        self.config
            .endpoint
            .as_deref()
            .unwrap_or(DEFAULT_ENDPOINT)
            .trim_end_matches('/')
    }

    fn full_key(&self, key: &str) -> String {
        prefixed_key(&self.config.location, key)
    }

    fn object_url(&self, full_key: &str) -> String {
        format!(
            "{}/storage/v1/b/{}/o/{}",
            self.endpoint(),
            urlencoding::encode(&self.config.bucket),
            urlencoding::encode(full_key)
        )
    }

    fn list_url(&self) -> String {
        format!(
            "{}/storage/v1/b/{}/o",
            self.endpoint(),
            urlencoding::encode(&self.config.bucket)
        )
    }

    fn upload_url(&self) -> String {
        format!(
            "{}/upload/storage/v1/b/{}/o",
            self.endpoint(),
            urlencoding::encode(&self.config.bucket)
        )
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.bearer_auth(&self.config.token)
    }

    async fn metadata(&self, key: &str) -> StorageResult<ObjectMeta> {
        let url = self.object_url(&self.full_key(key));
        let resp = self
            .authed(self.client.get(&url))
            .send()
            .await
            .context("GCS metadata request failed")?;
        let resp = check_status(resp, key).await?;
        Ok(resp.json().await.context("Failed to decode GCS object metadata")?)
    }
}

async fn check_status(resp: Response, key: &str) -> StorageResult<Response> {
    let status = resp.status();
    if status == StatusCode::NOT_FOUND {
        return Err(StorageError::not_found(key));
    }
    if !status.is_success() {
        let message = resp.text().await.unwrap_or_default();
        return Err(StorageError::Api {
            status: status.as_u16(),
            message,
        });
    }
    Ok(resp)
}

#[async_trait]
impl StorageClient for GcsStorage {
    fn kind(&self) -> BackendKind {
        BackendKind::Gcs
    }

    async fn save(&self, key: &str, data: Bytes) -> StorageResult<()> {
        let full_key = self.full_key(key);
        let len = data.len();
        let resp = self
            .authed(self.client.post(self.upload_url()))
            .query(&[("uploadType", "media"), ("name", full_key.as_str())])
            .header("Content-Type", "application/octet-stream")
            .body(data)
            .send()
            .await
            .context("GCS upload request failed")?;
        check_status(resp, key).await?;
        debug!(key = %full_key, bytes = len, "GCS upload complete");
        Ok(())
    }

    async fn open(&self, key: &str) -> StorageResult<Bytes> {
        let url = self.object_url(&self.full_key(key));
        let resp = self
            .authed(self.client.get(&url))
            .query(&[("alt", "media")])
            .send()
            .await
            .context("GCS download request failed")?;
        let resp = check_status(resp, key).await?;
        Ok(resp.bytes().await.context("Failed to read GCS response body")?)
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let full_key = self.full_key(key);
        let resp = self
            .authed(self.client.delete(self.object_url(&full_key)))
            .send()
            .await
            .context("GCS delete request failed")?;
        match check_status(resp, key).await {
            Ok(_) | Err(StorageError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        debug!(key = %full_key, "GCS delete complete");
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        match self.metadata(key).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn size(&self, key: &str) -> StorageResult<u64> {
        let meta = self.metadata(key).await?;
        let size = meta
            .size
            .as_deref()
            .and_then(|s| s.parse::<u64>().ok())
            .context("GCS object has no usable size")?;
        Ok(size)
    }

    async fn modified_time(&self, key: &str) -> StorageResult<ModifiedTime> {
        let meta = self.metadata(key).await?;
        let updated = meta
            .updated
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .context("GCS object has no usable updated time")?;
        Ok(ModifiedTime::Aware(updated))
    }

    async fn listdir(&self, key: &str) -> StorageResult<Listing> {
        let prefix = self.full_key(key);
        let mut listing = Listing::default();
        let mut page_token: Option<String> = None;

        loop {
            let mut req = self
                .authed(self.client.get(self.list_url()))
                .query(&[("prefix", prefix.as_str()), ("delimiter", "/")]);
            if let Some(ref token) = page_token {
                req = req.query(&[("pageToken", token.as_str())]);
            }
            let resp = req.send().await.context("GCS list request failed")?;
            let resp = check_status(resp, key).await?;
            let page: ObjectList = resp.json().await.context("Failed to decode GCS listing")?;

            for p in page.prefixes {
                if let Some(name) = p.strip_prefix(prefix.as_str()) {
                    listing.directories.push(name.trim_end_matches('/').to_string());
                }
            }
            for item in page.items {
                if let Some(name) = item.name.strip_prefix(prefix.as_str()) {
                    listing.files.push(name.to_string());
                }
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        if listing.is_empty() && !key.is_empty() {
            return Err(StorageError::not_found(key));
        }
        Ok(listing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn storage_for(server: &MockServer) -> GcsStorage {
        GcsStorage::new(GcsConfig {
            bucket: "media".to_string(),
            location: String::new(),
            endpoint: Some(server.uri()),
            token: "ya29.test".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn test_object_url_encodes_name() {
        let storage = GcsStorage::new(GcsConfig {
            bucket: "media".to_string(),
            location: "sw_data".to_string(),
            endpoint: None,
            token: String::new(),
        })
        .unwrap();
        assert_eq!(
            storage.object_url(&storage.full_key("users/42/avatar.png")),
            "https://storage.googleapis.com/storage/v1/b/media/o/sw_data%2Fusers%2F42%2Favatar.png"
        );
    }

    #[test]
    fn test_decode_listing() {
        let json = r#"{
            "kind": "storage#objects",
            "prefixes": ["exports/2024/"],
            "items": [{"name": "exports/", "size": "0"}, {"name": "exports/report.csv", "size": "12"}],
            "nextPageToken": "abc"
        }"#;
        let page: ObjectList = serde_json::from_str(json).unwrap();
        assert_eq!(page.prefixes, vec!["exports/2024/"]);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.next_page_token.as_deref(), Some("abc"));

        let empty: ObjectList = serde_json::from_str("{}").unwrap();
        assert!(empty.items.is_empty() && empty.prefixes.is_empty());
    }

    #[tokio::test]
    async fn test_metadata_queries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/storage/v1/b/media/o/report.csv"))
            .and(header("authorization", "Bearer ya29.test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "report.csv",
                "size": "2048",
                "updated": "2024-02-01T10:00:00.000Z"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/storage/v1/b/media/o/missing.csv"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let storage = storage_for(&server);
        assert!(storage.exists("report.csv").await.unwrap());
        assert_eq!(storage.size("report.csv").await.unwrap(), 2048);
        assert_eq!(
            storage.modified_time("report.csv").await.unwrap().epoch_seconds(),
            1706781600
        );
        assert!(!storage.exists("missing.csv").await.unwrap());
        assert!(storage.size("missing.csv").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_listdir_paginates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/storage/v1/b/media/o"))
            .and(query_param("prefix", "exports/"))
            .and(query_param("pageToken", "p2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{"name": "exports/summary.txt"}]
            })))
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/storage/v1/b/media/o"))
            .and(query_param("prefix", "exports/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "prefixes": ["exports/2024/"],
                "items": [{"name": "exports/"}, {"name": "exports/report.csv"}],
                "nextPageToken": "p2"
            })))
            .with_priority(2)
            .mount(&server)
            .await;

        let storage = storage_for(&server);
        let listing = storage.listdir("exports/").await.unwrap();
        assert_eq!(listing.directories, vec!["2024"]);
        assert_eq!(listing.files, vec!["", "report.csv", "summary.txt"]);
    }

    #[tokio::test]
    async fn test_listdir_missing_prefix() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/storage/v1/b/media/o"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "kind": "storage#objects"
            })))
            .mount(&server)
            .await;

        let storage = storage_for(&server);
        assert!(storage.listdir("ghost/").await.unwrap_err().is_not_found());
        assert!(storage.listdir("").await.unwrap().is_empty());
    }
}
