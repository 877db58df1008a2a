//! S3-compatible storage client.
//!
//! Handles AWS S3 and S3-compatible services (MinIO, Backblaze B2). Uses
//! reqwest with manual AWS Signature V4 signing so no SDK dependency is
//! needed. Requests are path-style: `{endpoint}/{bucket}/{location}/{key}`.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, Response, StatusCode};
use sha2::{Digest, Sha256};
use tracing::debug;

use storagefs_common::backend::{
    prefixed_key, BackendKind, Listing, ModifiedTime, StorageClient, StorageError, StorageResult,
};

type HmacSha256 = Hmac<Sha256>;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Clone)]
pub struct S3Config {
    pub bucket: String,
    /// Key prefix inside the bucket every object is stored under.
    pub location: String,
    pub region: String,
    pub endpoint: Option<String>, // Custom endpoint for MinIO, B2 or other S3-compatible APIs
    pub access_key_id: String,
    pub secret_access_key: String,
    pub storage_class: Option<String>,
}

pub struct S3Storage {
    config: S3Config,
    client: Client,
}

impl S3Storage {
    pub fn new(config: S3Config) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { config, client })
    }

    fn base_url(&self) -> String {
        match &self.config.endpoint {
            Some(ep) => format!("{}/{}", ep.trim_end_matches('/'), self.config.bucket),
            None => format!(
                "https://s3.{}.amazonaws.com/{}",
                self.config.region, self.config.bucket
            ),
        }
    }

    fn full_key(&self, key: &str) -> String {
        prefixed_key(&self.config.location, key)
    }

    /// Compute the AWS Signature V4 `Authorization` header value.
    #[allow(clippy::too_many_arguments)]
    fn sign(
        &self,
        method: &str,
        canonical_uri: &str,
        query: &str,
        headers: &BTreeMap<String, String>,
        body_hash: &str,
        date_time: &str,
        date: &str,
    ) -> String {
        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v.trim()))
            .collect();
        let signed_headers: String = headers.keys().cloned().collect::<Vec<_>>().join(";");

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method, canonical_uri, query, canonical_headers, signed_headers, body_hash
        );

        let cr_hash = hex::encode(Sha256::digest(canonical_request.as_bytes()));
        let credential_scope = format!("{}/{}/s3/aws4_request", date, self.config.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            date_time, credential_scope, cr_hash
        );

        let signing_key = derive_signing_key(&self.config.secret_access_key, date, &self.config.region);
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

        format!(
            "AWS4-HMAC-SHA256 Credential={}/{},SignedHeaders={},Signature={}",
            self.config.access_key_id, credential_scope, signed_headers, signature
        )
    }

    /// Sign and send one request. `full_key` of `None` addresses the bucket
    /// itself (used for listing).
    async fn send(
        &self,
        method: Method,
        full_key: Option<&str>,
        query: &str,
        body: Bytes,
    ) -> anyhow::Result<Response> {
        let now = Utc::now();
        let date_time = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();

        let base_url = self.base_url();
        let base_url = base_url.trim_end_matches('/');
        let object_path = full_key.map(encode_key_path).unwrap_or_default();
        let canonical_uri = format!("{}/{}", url_path(base_url), object_path);
        let mut url = format!("{}/{}", base_url, object_path);
        if !query.is_empty() {
            url = format!("{}?{}", url, query);
        }

        let payload_hash = body_hash(&body);
        let mut headers = BTreeMap::new();
        headers.insert("host".to_string(), url_host(base_url));
        headers.insert("x-amz-content-sha256".to_string(), payload_hash.clone());
        headers.insert("x-amz-date".to_string(), date_time.clone());
        if method == Method::PUT {
            headers.insert("content-type".to_string(), "application/octet-stream".to_string());
            if let Some(ref sc) = self.config.storage_class {
                headers.insert("x-amz-storage-class".to_string(), sc.clone());
            }
        }

        let auth = self.sign(
            method.as_str(),
            &canonical_uri,
            query,
            &headers,
            &payload_hash,
            &date_time,
            &date,
        );

        let mut req = self.client.request(method.clone(), &url);
        for (name, value) in headers.iter().filter(|(k, _)| k.as_str() != "host") {
            req = req.header(name.as_str(), value.as_str());
        }
        let resp = req
            .header("Authorization", auth)
            .body(body)
            .send()
            .await
            .with_context(|| format!("S3 {} request failed", method))?;
        Ok(resp)
    }

    async fn head(&self, key: &str) -> StorageResult<HeaderMap> {
        let full_key = self.full_key(key);
        let resp = self.send(Method::HEAD, Some(&full_key), "", Bytes::new()).await?;
        let resp = check_status(resp, key).await?;
        Ok(resp.headers().clone())
    }
}

fn derive_signing_key(secret: &str, date: &str, region: &str) -> Vec<u8> {
    let key = format!("AWS4{}", secret);
    let k_date = hmac_sha256(key.as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, b"s3");
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC key length ok");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn body_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// URI-encode each segment of an object key, keeping `/` separators.
fn encode_key_path(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Canonical (sorted, encoded) query string.
fn canonical_query(params: &[(&str, &str)]) -> String {
    let mut pairs: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (urlencoding::encode(k).into_owned(), urlencoding::encode(v).into_owned()))
        .collect();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Extract the host part from a URL for use in signing.
fn url_host(url: &str) -> String {
    let without_scheme = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    without_scheme.split('/').next().unwrap_or(without_scheme).to_string()
}

/// Extract the path part (without trailing `/`) from a URL.
fn url_path(url: &str) -> String {
    let without_scheme = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    match without_scheme.find('/') {
        Some(idx) => without_scheme[idx..].trim_end_matches('/').to_string(),
        None => String::new(),
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

/// `Last-Modified` is RFC 2822; some S3-compatible services drop the zone.
fn parse_last_modified(value: &str) -> Option<ModifiedTime> {
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(ModifiedTime::Aware(dt));
    }
    NaiveDateTime::parse_from_str(value.trim(), "%a, %d %b %Y %H:%M:%S")
        .ok()
        .map(ModifiedTime::Naive)
}

/// One page of a ListObjectsV2 response.
#[derive(Debug, Default, PartialEq)]
struct ListPage {
    prefixes: Vec<String>,
    keys: Vec<String>,
    next_token: Option<String>,
}

/// Extract common prefixes, keys and the continuation token from a
/// ListObjectsV2 XML response.
fn parse_list_page(xml: &str) -> ListPage {
    let mut page = ListPage::default();
    for block in xml_blocks(xml, "CommonPrefixes") {
        if let Some(prefix) = xml_blocks(block, "Prefix").into_iter().next() {
            page.prefixes.push(xml_unescape(prefix));
        }
    }
    for block in xml_blocks(xml, "Contents") {
        if let Some(key) = xml_blocks(block, "Key").into_iter().next() {
            page.keys.push(xml_unescape(key));
        }
    }
    let truncated = xml_blocks(xml, "IsTruncated")
        .first()
        .map(|v| v.trim() == "true")
        .unwrap_or(false);
    if truncated {
        page.next_token = xml_blocks(xml, "NextContinuationToken")
            .first()
            .map(|t| xml_unescape(t));
    }
    page
}

/// Inner text of every `<tag>…</tag>` element, in document order.
fn xml_blocks<'a>(xml: &'a str, tag: &str) -> Vec<&'a str> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let mut blocks = Vec::new();
    let mut remaining = xml;
    while let Some(start) = remaining.find(&open) {
        remaining = &remaining[start + open.len()..];
        match remaining.find(&close) {
            Some(end) => {
                blocks.push(&remaining[..end]);
                remaining = &remaining[end + close.len()..];
            }
            None => break,
        }
    }
    blocks
}

fn xml_unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[async_trait]
impl StorageClient for S3Storage {
    fn kind(&self) -> BackendKind {
        BackendKind::S3
    }

    async fn save(&self, key: &str, data: Bytes) -> StorageResult<()> {
        let full_key = self.full_key(key);
        let len = data.len();
        let resp = self.send(Method::PUT, Some(&full_key), "", data).await?;
        check_status(resp, key).await?;
        debug!(key = %full_key, bytes = len, "S3 upload complete");
        Ok(())
    }

    async fn open(&self, key: &str) -> StorageResult<Bytes> {
        let full_key = self.full_key(key);
        let resp = self.send(Method::GET, Some(&full_key), "", Bytes::new()).await?;
        let resp = check_status(resp, key).await?;
        Ok(resp.bytes().await.context("Failed to read S3 response body")?)
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let full_key = self.full_key(key);
        let resp = self.send(Method::DELETE, Some(&full_key), "", Bytes::new()).await?;
        match check_status(resp, key).await {
            Ok(_) | Err(StorageError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        debug!(key = %full_key, "S3 delete complete");
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        match self.head(key).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn size(&self, key: &str) -> StorageResult<u64> {
        let headers = self.head(key).await?;
        let size = headers
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .context("S3 HEAD response has no usable Content-Length")?;
        Ok(size)
    }

    async fn modified_time(&self, key: &str) -> StorageResult<ModifiedTime> {
        let headers = self.head(key).await?;
        let mtime = headers
            .get(reqwest::header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_last_modified)
            .context("S3 HEAD response has no usable Last-Modified")?;
        Ok(mtime)
    }

    async fn listdir(&self, key: &str) -> StorageResult<Listing> {
        let prefix = self.full_key(key);
        let mut listing = Listing::default();
        let mut token: Option<String> = None;

        loop {
            let query = {
                let mut params: Vec<(&str, &str)> = vec![
                    ("delimiter", "/"),
                    ("list-type", "2"),
                    ("prefix", prefix.as_str()),
                ];
                if let Some(ref t) = token {
                    params.push(("continuation-token", t.as_str()));
                }
                canonical_query(&params)
            };

            let resp = self.send(Method::GET, None, &query, Bytes::new()).await?;
            let resp = check_status(resp, key).await?;
            let body = resp.text().await.context("Failed to read S3 list response")?;
            let page = parse_list_page(&body);

            for p in page.prefixes {
                if let Some(name) = p.strip_prefix(prefix.as_str()) {
                    listing.directories.push(name.trim_end_matches('/').to_string());
                }
            }
            for k in page.keys {
                if let Some(name) = k.strip_prefix(prefix.as_str()) {
                    listing.files.push(name.to_string());
                }
            }

            match page.next_token {
                Some(t) => token = Some(t),
                None => break,
            }
        }

        if listing.is_empty() && !key.is_empty() {
            return Err(StorageError::not_found(key));
        }
        Ok(listing)
    }
}
