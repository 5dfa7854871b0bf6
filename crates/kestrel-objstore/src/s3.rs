//! S3-compatible storage backend
//!
//! Talks to any S3-compatible API using path-style URLs and AWS Signature V4.
//! Defaults target Scaleway Object Storage (`https://s3.{region}.scw.cloud`).

use crate::{ObjectStore, ObjectStoreError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use sha2::digest::Output;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::debug;

const DEFAULT_REGION: &str = "fr-par";
const SERVICE: &str = "s3";

/// Configuration for the S3 backend
#[derive(Debug, Clone, Default, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    #[serde(default)]
    pub region: String,
    /// Defaults to `https://s3.{region}.scw.cloud`
    #[serde(default)]
    pub endpoint: Option<String>,
    pub access_key: String,
    pub secret_key: String,
}

/// S3 object store
pub struct S3ObjectStore {
    endpoint: String,
    host: String,
    bucket: String,
    region: String,
    access_key: String,
    secret_key: String,
    client: Client,
}

impl std::fmt::Debug for S3ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3ObjectStore")
            .field("endpoint", &self.endpoint)
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl S3ObjectStore {
    /// Create a new S3 store from configuration
    ///
    /// All values are trimmed. Bucket and credentials are required.
    pub fn new(config: &S3Config) -> Result<Self> {
        let bucket = config.bucket.trim().to_string();
        if bucket.is_empty() {
            return Err(ObjectStoreError::InvalidConfig(
                "state bucket is required".to_string(),
            ));
        }

        let region = match config.region.trim() {
            "" => DEFAULT_REGION.to_string(),
            region => region.to_string(),
        };

        let endpoint = config
            .endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(|e| e.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("https://s3.{}.scw.cloud", region));

        let access_key = config.access_key.trim().to_string();
        let secret_key = config.secret_key.trim().to_string();
        if access_key.is_empty() || secret_key.is_empty() {
            return Err(ObjectStoreError::InvalidConfig(
                "S3 access key and secret key are required for state storage".to_string(),
            ));
        }

        let host = endpoint
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(endpoint.as_str())
            .split('/')
            .next()
            .unwrap_or_default()
            .to_string();
        if host.is_empty() {
            return Err(ObjectStoreError::InvalidConfig(format!(
                "invalid S3 endpoint: {}",
                endpoint
            )));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ObjectStoreError::InvalidConfig(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            endpoint,
            host,
            bucket,
            region,
            access_key,
            secret_key,
            client,
        })
    }

    /// Endpoint URL without trailing slash
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Signing region
    pub fn region(&self) -> &str {
        &self.region
    }

    fn object_path(&self, key: &str) -> String {
        let encoded: Vec<String> = key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        format!("/{}/{}", self.bucket, encoded.join("/"))
    }

    /// Send a signed request, returning status and body
    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Vec<u8>,
    ) -> Result<(StatusCode, Vec<u8>)> {
        let query = canonical_query(query);
        let payload_hash = sha256_hex(&body);
        let now = Utc::now();
        let content_type = (!body.is_empty()).then_some("application/json");

        let authorization = authorization_header(&SigningRequest {
            method: method.as_str(),
            host: &self.host,
            path,
            query: &query,
            content_type,
            payload_hash: &payload_hash,
            now,
            region: &self.region,
            access_key: &self.access_key,
            secret_key: &self.secret_key,
        });

        let mut url = format!("{}{}", self.endpoint, path);
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query);
        }

        let mut request = self
            .client
            .request(method, &url)
            .header("x-amz-date", amz_date(now))
            .header("x-amz-content-sha256", &payload_hash)
            .header("Authorization", authorization);
        if let Some(content_type) = content_type {
            request = request.header("Content-Type", content_type);
        }

        let response = request.body(body).send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        Ok((status, bytes.to_vec()))
    }

    fn http_error(&self, method: &str, key: &str, status: StatusCode, body: &[u8]) -> ObjectStoreError {
        let body = String::from_utf8_lossy(body);
        match error_code(&body).as_deref() {
            Some("NoSuchBucket") => ObjectStoreError::BucketNotFound(self.bucket.clone()),
            Some("NoSuchKey") | Some("NotFound") => ObjectStoreError::NotFound(key.to_string()),
            _ if status == StatusCode::NOT_FOUND => ObjectStoreError::NotFound(key.to_string()),
            _ => ObjectStoreError::Http {
                method: method.to_string(),
                key: key.to_string(),
                status: status.as_u16(),
                message: body.trim().to_string(),
            },
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()> {
        let path = self.object_path(key);
        let (status, body) = self.send(Method::PUT, &path, &[], data).await?;
        if !status.is_success() {
            return Err(self.http_error("PUT", key, status, &body));
        }
        debug!(bucket = %self.bucket, key = %key, "object written to S3");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.object_path(key);
        let (status, body) = self.send(Method::GET, &path, &[], Vec::new()).await?;
        if !status.is_success() {
            return Err(self.http_error("GET", key, status, &body));
        }
        Ok(body)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.object_path(key);
        let (status, body) = self.send(Method::DELETE, &path, &[], Vec::new()).await?;
        if status.is_success() {
            return Ok(());
        }
        match self.http_error("DELETE", key, status, &body) {
            ObjectStoreError::NotFound(_) => Ok(()),
            err => Err(err),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let path = format!("/{}", self.bucket);
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut query = vec![("list-type", "2"), ("prefix", prefix)];
            if let Some(token) = continuation.as_deref() {
                query.push(("continuation-token", token));
            }

            let (status, body) = self.send(Method::GET, &path, &query, Vec::new()).await?;
            if !status.is_success() {
                return Err(self.http_error("LIST", prefix, status, &body));
            }

            let body = String::from_utf8_lossy(&body);
            keys.extend(parse_list_keys(&body));

            let truncated = extract_tags(&body, "IsTruncated")
                .first()
                .map(|v| v == "true")
                .unwrap_or(false);
            continuation = extract_tags(&body, "NextContinuationToken").into_iter().next();
            if !truncated || continuation.is_none() {
                break;
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn create_bucket(&self) -> Result<()> {
        let path = format!("/{}", self.bucket);
        let (status, body) = self.send(Method::PUT, &path, &[], Vec::new()).await?;
        if status.is_success() {
            debug!(bucket = %self.bucket, "bucket created");
            return Ok(());
        }

        let text = String::from_utf8_lossy(&body);
        if is_bucket_already_exists(&text) {
            return Ok(());
        }
        Err(self.http_error("CREATE", &self.bucket, status, &body))
    }
}

// === Signature V4 ===

/// Inputs to a Signature V4 computation
struct SigningRequest<'a> {
    method: &'a str,
    host: &'a str,
    path: &'a str,
    query: &'a str,
    content_type: Option<&'a str>,
    payload_hash: &'a str,
    now: DateTime<Utc>,
    region: &'a str,
    access_key: &'a str,
    secret_key: &'a str,
}

fn amz_date(now: DateTime<Utc>) -> String {
    now.format("%Y%m%dT%H%M%SZ").to_string()
}

fn authorization_header(req: &SigningRequest<'_>) -> String {
    let amz_date = amz_date(req.now);
    let datestamp = req.now.format("%Y%m%d").to_string();

    let (canonical_headers, signed_headers) = match req.content_type {
        Some(ct) => (
            format!(
                "content-type:{}\nhost:{}\nx-amz-content-sha256:{}\nx-amz-date:{}\n",
                ct, req.host, req.payload_hash, amz_date
            ),
            "content-type;host;x-amz-content-sha256;x-amz-date",
        ),
        None => (
            format!(
                "host:{}\nx-amz-content-sha256:{}\nx-amz-date:{}\n",
                req.host, req.payload_hash, amz_date
            ),
            "host;x-amz-content-sha256;x-amz-date",
        ),
    };

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        req.method, req.path, req.query, canonical_headers, signed_headers, req.payload_hash
    );

    let scope = format!("{}/{}/{}/aws4_request", datestamp, req.region, SERVICE);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        scope,
        sha256_hex(canonical_request.as_bytes())
    );

    let key = signing_key(req.secret_key, &datestamp, req.region, SERVICE);
    let signature = format!("{:x}", hmac_sha256(&key, string_to_sign.as_bytes()));

    format!(
        "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
        req.access_key, scope, signed_headers, signature
    )
}

/// Query string with keys sorted and values URI-encoded, as SigV4 requires
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

fn signing_key(secret_key: &str, datestamp: &str, region: &str, service: &str) -> Output<Sha256> {
    let k_date = hmac_sha256(format!("AWS4{}", secret_key).as_bytes(), datestamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Output<Sha256> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes()
}

fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

// === XML helpers ===

/// Extract text of every `<tag>...</tag>` element, unescaping XML entities
fn extract_tags(xml: &str, tag: &str) -> Vec<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let mut values = Vec::new();
    let mut rest = xml;

    while let Some(start) = rest.find(&open) {
        let after = &rest[start + open.len()..];
        let Some(end) = after.find(&close) else {
            break;
        };
        values.push(unescape_xml(&after[..end]));
        rest = &after[end + close.len()..];
    }

    values
}

fn unescape_xml(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Object keys from a ListObjectsV2 response
fn parse_list_keys(xml: &str) -> Vec<String> {
    extract_tags(xml, "Key")
}

/// The `<Code>` of an S3 error document
fn error_code(xml: &str) -> Option<String> {
    extract_tags(xml, "Code").into_iter().next()
}

fn is_bucket_already_exists(xml: &str) -> bool {
    matches!(
        error_code(xml).as_deref(),
        Some("BucketAlreadyOwnedByYou") | Some("BucketAlreadyExists")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn config() -> S3Config {
        S3Config {
            bucket: " rawkode-cloud ".to_string(),
            region: " fr-par ".to_string(),
            endpoint: Some(" https://s3.fr-par.scw.cloud/ ".to_string()),
            access_key: " ak ".to_string(),
            secret_key: " sk ".to_string(),
        }
    }

    #[test]
    fn test_new_trims_config_values() {
        let store = S3ObjectStore::new(&config()).unwrap();
        assert_eq!(store.bucket(), "rawkode-cloud");
        assert_eq!(store.region(), "fr-par");
        assert_eq!(store.endpoint(), "https://s3.fr-par.scw.cloud");
        assert_eq!(store.host, "s3.fr-par.scw.cloud");
        assert_eq!(store.access_key, "ak");
        assert_eq!(store.secret_key, "sk");
    }

    #[test]
    fn test_new_applies_defaults() {
        let store = S3ObjectStore::new(&S3Config {
            bucket: "state".to_string(),
            access_key: "ak".to_string(),
            secret_key: "sk".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(store.region(), "fr-par");
        assert_eq!(store.endpoint(), "https://s3.fr-par.scw.cloud");
    }

    #[test]
    fn test_new_requires_bucket_and_credentials() {
        let mut cfg = config();
        cfg.bucket = "  ".to_string();
        assert!(matches!(
            S3ObjectStore::new(&cfg),
            Err(ObjectStoreError::InvalidConfig(_))
        ));

        let mut cfg = config();
        cfg.secret_key = String::new();
        assert!(matches!(
            S3ObjectStore::new(&cfg),
            Err(ObjectStoreError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_object_path_encodes_segments() {
        let store = S3ObjectStore::new(&config()).unwrap();
        assert_eq!(
            store.object_path("clusters/prod eu/nodes.json"),
            "/rawkode-cloud/clusters/prod%20eu/nodes.json"
        );
    }

    #[test]
    fn test_signing_key_matches_aws_example() {
        // Documented example from the AWS Signature V4 guide
        let key = signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        );
        assert_eq!(
            format!("{:x}", key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn test_authorization_header_shape() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let payload_hash = sha256_hex(b"");
        let header = authorization_header(&SigningRequest {
            method: "GET",
            host: "s3.fr-par.scw.cloud",
            path: "/state/operations/op-1.json",
            query: "",
            content_type: None,
            payload_hash: &payload_hash,
            now,
            region: "fr-par",
            access_key: "AKID",
            secret_key: "secret",
        });

        assert!(header.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKID/20240501/fr-par/s3/aws4_request, "
        ));
        assert!(header.contains("SignedHeaders=host;x-amz-content-sha256;x-amz-date, "));
        let signature = header.rsplit("Signature=").next().unwrap();
        assert_eq!(signature.len(), 64);
    }

    #[test]
    fn test_empty_payload_hash() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_canonical_query_sorted_and_encoded() {
        assert_eq!(
            canonical_query(&[("prefix", "operations/"), ("list-type", "2")]),
            "list-type=2&prefix=operations%2F"
        );
        assert_eq!(canonical_query(&[]), "");
    }

    #[test]
    fn test_parse_list_keys() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult>
  <Name>state</Name>
  <IsTruncated>false</IsTruncated>
  <Contents><Key>operations/op-1.json</Key><Size>10</Size></Contents>
  <Contents><Key>operations/a&amp;b.json</Key><Size>12</Size></Contents>
</ListBucketResult>"#;

        assert_eq!(
            parse_list_keys(xml),
            vec!["operations/op-1.json", "operations/a&b.json"]
        );
        assert_eq!(extract_tags(xml, "IsTruncated"), vec!["false"]);
        assert!(parse_list_keys("<ListBucketResult></ListBucketResult>").is_empty());
    }

    #[test]
    fn test_error_code_classification() {
        let store = S3ObjectStore::new(&config()).unwrap();

        let no_bucket = b"<Error><Code>NoSuchBucket</Code></Error>";
        assert!(store
            .http_error("GET", "k", StatusCode::NOT_FOUND, no_bucket)
            .is_bucket_not_found());

        let no_key = b"<Error><Code>NoSuchKey</Code></Error>";
        assert!(store
            .http_error("GET", "k", StatusCode::NOT_FOUND, no_key)
            .is_not_found());

        // Bare 404 without an error document
        assert!(store
            .http_error("GET", "k", StatusCode::NOT_FOUND, b"")
            .is_not_found());

        let denied = b"<Error><Code>AccessDenied</Code></Error>";
        assert!(matches!(
            store.http_error("PUT", "k", StatusCode::FORBIDDEN, denied),
            ObjectStoreError::Http { status: 403, .. }
        ));
    }

    #[test]
    fn test_bucket_already_exists() {
        assert!(is_bucket_already_exists(
            "<Error><Code>BucketAlreadyOwnedByYou</Code></Error>"
        ));
        assert!(is_bucket_already_exists(
            "<Error><Code>BucketAlreadyExists</Code></Error>"
        ));
        assert!(!is_bucket_already_exists("<Error><Code>AccessDenied</Code></Error>"));
    }
}
